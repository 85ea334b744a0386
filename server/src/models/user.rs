use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sqlx::FromRow;

use super::{patch_from_map, ModelError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct User {
    /// Subject id issued by the identity provider.
    pub id: String,
    pub admin: bool,
    pub student_number: String,
    pub full_name: String,
    pub pfp_url: String,
}

/// Lookup keys a user record can be found by.
#[derive(Debug, Clone, Copy)]
pub enum UserKey<'a> {
    Id(&'a str),
    StudentNumber(&'a str),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserPatch {
    #[serde(default)]
    pub admin: Option<bool>,
    #[serde(default)]
    pub student_number: Option<String>,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub pfp_url: Option<String>,
}

impl UserPatch {
    pub const UPDATABLE_KEYS: [&'static str; 4] =
        ["admin", "student_number", "full_name", "pfp_url"];

    pub fn full_name(name: impl Into<String>) -> Self {
        Self {
            full_name: Some(name.into()),
            ..Default::default()
        }
    }

    pub fn admin(admin: bool) -> Self {
        Self {
            admin: Some(admin),
            ..Default::default()
        }
    }

    /// Whether the patch touches fields only an admin may change.
    pub fn touches_privileged_fields(&self) -> bool {
        self.admin.is_some() || self.student_number.is_some() || self.pfp_url.is_some()
    }

    pub fn is_empty(&self) -> bool {
        *self == UserPatch::default()
    }

    pub fn apply(&self, user: &mut User) {
        if let Some(admin) = self.admin {
            user.admin = admin;
        }
        if let Some(student_number) = &self.student_number {
            user.student_number = student_number.clone();
        }
        if let Some(full_name) = &self.full_name {
            user.full_name = full_name.clone();
        }
        if let Some(pfp_url) = &self.pfp_url {
            user.pfp_url = pfp_url.clone();
        }
    }
}

impl TryFrom<Map<String, Value>> for UserPatch {
    type Error = ModelError;

    fn try_from(raw: Map<String, Value>) -> Result<Self, Self::Error> {
        patch_from_map(raw, &UserPatch::UPDATABLE_KEYS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_name_only_patch_is_not_privileged() {
        assert!(!UserPatch::full_name("Ada Lovelace").touches_privileged_fields());
        assert!(UserPatch::admin(true).touches_privileged_fields());
    }

    #[test]
    fn test_patch_from_map_rejects_unknown_keys() {
        let raw = json!({"id": "someone-else"});
        let err = UserPatch::try_from(raw.as_object().cloned().unwrap()).unwrap_err();
        assert!(matches!(err, ModelError::EditNotAllowed(_)));
    }

    #[test]
    fn test_apply_updates_only_given_fields() {
        let mut user = User {
            id: "uid-1".to_string(),
            admin: false,
            student_number: "123456".to_string(),
            full_name: "Old Name".to_string(),
            pfp_url: "https://example.com/a.png".to_string(),
        };
        UserPatch::full_name("New Name").apply(&mut user);
        assert_eq!(user.full_name, "New Name");
        assert_eq!(user.student_number, "123456");
        assert!(!user.admin);
    }
}
