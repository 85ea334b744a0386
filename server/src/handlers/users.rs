use axum::extract::{Path, State};
use axum::response::Response;
use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::models::{User, UserKey, UserPatch};
use crate::providers::IdentityError;
use crate::services::convert;
use crate::state::AppState;
use crate::utils::auth::{AdminUser, AuthUser};
use crate::utils::error::AppError;
use crate::utils::json::JsonBody;
use crate::utils::response::{empty_success, success};

use super::{audit, or_not_found};

const CONTROLLER: &str = "user";

/// Student numbers come from the school email's local part. Accounts without
/// a numeric one get a placeholder unique to the account, for an admin to fix.
fn student_number_for(email: &str, uid: &str) -> String {
    let local = email.split('@').next().unwrap_or_default();
    if !local.is_empty() && local.chars().all(|c| c.is_ascii_digit()) {
        local.to_string()
    } else {
        format!("unassigned-{uid}")
    }
}

/// First sign-in: copies the identity record into a user and converts the
/// student's queued tickets.
pub async fn register_user(
    State(state): State<AppState>,
    caller: AuthUser,
) -> Result<Response, AppError> {
    let uid = caller.uid().to_string();
    if state.store.user_exists(&uid).await? {
        return Err(AppError::Forbidden("User is already registered".to_string()));
    }

    let record = state.identity.get_user_record(&uid).await?;
    let user = User {
        student_number: student_number_for(&record.email, &uid),
        id: uid.clone(),
        admin: caller.is_admin(),
        full_name: record.display_name,
        pfp_url: record.photo_url,
    };
    state.store.create_user(&user).await?;

    let queued = state
        .store
        .list_queued_tickets_for_student(&user.student_number)
        .await
        .unwrap_or_else(|e| {
            warn!(error = %e, uid = %uid, "Could not list queued tickets for new user");
            Vec::new()
        });
    let mut converted = 0usize;
    for (index, queued_ticket) in queued.iter().enumerate() {
        match convert(state.store.as_ref(), queued_ticket, index == 0).await {
            Ok(_) => converted += 1,
            Err(e) => warn!(
                error = %e,
                queued_ticket = %queued_ticket.id,
                "Could not convert queued ticket"
            ),
        }
    }
    if converted > 0 {
        info!(uid = %uid, converted, "Converted queued tickets on registration");
    }

    let user = state.store.find_user(UserKey::Id(&uid)).await?;
    audit(CONTROLLER, "create", &uid, false);
    Ok(success(user, "User registered"))
}

pub async fn list_users(
    State(state): State<AppState>,
    admin: AdminUser,
) -> Result<Response, AppError> {
    let users = state.store.list_users().await?;
    audit(CONTROLLER, "list", admin.uid(), true);
    Ok(success(users, "Users retrieved"))
}

pub async fn get_user(
    State(state): State<AppState>,
    caller: AuthUser,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    caller.ensure_self_or_admin(&id)?;
    let user = state
        .store
        .find_user(UserKey::Id(&id))
        .await
        .map_err(or_not_found("User"))?;
    audit(CONTROLLER, "get", caller.uid(), caller.is_admin());
    Ok(success(user, "User retrieved"))
}

pub async fn update_user(
    State(state): State<AppState>,
    caller: AuthUser,
    Path(id): Path<String>,
    JsonBody(raw): JsonBody<Map<String, Value>>,
) -> Result<Response, AppError> {
    caller.ensure_self_or_admin(&id)?;
    let patch = UserPatch::try_from(raw)?;
    if !caller.is_admin() && patch.touches_privileged_fields() {
        return Err(AppError::Forbidden(
            "Only admins may change admin, student_number or pfp_url".to_string(),
        ));
    }
    if !state.store.user_exists(&id).await? {
        return Err(AppError::not_found("User"));
    }

    state.store.update_user(&id, &patch).await?;
    audit(CONTROLLER, "update", caller.uid(), caller.is_admin());
    Ok(empty_success("User updated"))
}

/// Removes the identity account first so a provider failure leaves the user intact.
pub async fn delete_user(
    State(state): State<AppState>,
    admin: AdminUser,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    if !state.store.user_exists(&id).await? {
        return Err(AppError::not_found("User"));
    }

    match state.identity.delete_user(&id).await {
        Ok(()) => {}
        Err(IdentityError::UserNotFound) => warn!(uid = %id, "Identity account already gone"),
        Err(e) => return Err(e.into()),
    }
    state.store.delete_user(&id).await.map_err(or_not_found("User"))?;

    audit(CONTROLLER, "delete", admin.uid(), true);
    Ok(empty_success("User deleted"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_student_number_from_numeric_email() {
        assert_eq!(student_number_for("123456@pdsb.net", "uid-1"), "123456");
        assert_eq!(student_number_for("ada.lovelace@example.org", "uid-1"), "unassigned-uid-1");
        assert_eq!(student_number_for("", "uid-2"), "unassigned-uid-2");
    }
}
