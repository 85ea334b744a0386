use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sqlx::FromRow;
use uuid::Uuid;

use super::{patch_from_map, ModelError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Event {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub img_urls: Vec<String>,
    /// Name of the venue.
    pub location: String,
    pub address: String,
    pub start_timestamp: DateTime<Utc>,
    pub end_timestamp: DateTime<Utc>,
    /// Raw JSON schema describing the event's custom ticket fields.
    pub custom_fields_schema: Option<Value>,
}

impl Event {
    pub fn validate_window(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<(), String> {
        if start < end {
            Ok(())
        } else {
            Err("start timestamp is not before end timestamp".to_string())
        }
    }

    /// Returns a copy of the event with the patch applied, keeping the time window valid.
    pub fn patched(&self, patch: &EventPatch) -> Result<Event, String> {
        let mut event = self.clone();
        if let Some(name) = &patch.name {
            event.name = name.clone();
        }
        if let Some(description) = &patch.description {
            event.description = description.clone();
        }
        if let Some(img_urls) = &patch.img_urls {
            event.img_urls = img_urls.clone();
        }
        if let Some(location) = &patch.location {
            event.location = location.clone();
        }
        if let Some(address) = &patch.address {
            event.address = address.clone();
        }
        if let Some(start) = patch.start_timestamp {
            event.start_timestamp = start;
        }
        if let Some(end) = patch.end_timestamp {
            event.end_timestamp = end;
        }

        Event::validate_window(event.start_timestamp, event.end_timestamp)?;
        Ok(event)
    }
}

/// The fields of an event an admin may change after creation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventPatch {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub img_urls: Option<Vec<String>>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub start_timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_timestamp: Option<DateTime<Utc>>,
}

impl EventPatch {
    pub const UPDATABLE_KEYS: [&'static str; 7] = [
        "name",
        "description",
        "img_urls",
        "location",
        "address",
        "start_timestamp",
        "end_timestamp",
    ];

    pub fn is_empty(&self) -> bool {
        *self == EventPatch::default()
    }
}

impl TryFrom<Map<String, Value>> for EventPatch {
    type Error = ModelError;

    fn try_from(raw: Map<String, Value>) -> Result<Self, Self::Error> {
        patch_from_map(raw, &EventPatch::UPDATABLE_KEYS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    fn sample_event() -> Event {
        let start = Utc::now();
        Event {
            id: Uuid::new_v4(),
            name: "Semi Formal".to_string(),
            description: "Winter dance".to_string(),
            img_urls: vec![],
            location: "Gym".to_string(),
            address: "1 School Rd".to_string(),
            start_timestamp: start,
            end_timestamp: start + Duration::hours(3),
            custom_fields_schema: None,
        }
    }

    #[test]
    fn test_patch_rejects_id_key() {
        let raw = json!({"id": Uuid::new_v4(), "name": "New"});
        let err = EventPatch::try_from(raw.as_object().cloned().unwrap()).unwrap_err();
        assert!(matches!(err, ModelError::EditNotAllowed(key) if key == "id"));
    }

    #[test]
    fn test_patch_accepts_allowed_keys() {
        let raw = json!({"name": "New", "location": "Cafeteria"});
        let patch = EventPatch::try_from(raw.as_object().cloned().unwrap()).unwrap();
        assert_eq!(patch.name.as_deref(), Some("New"));
        assert_eq!(patch.location.as_deref(), Some("Cafeteria"));
        assert!(patch.description.is_none());
        assert!(!patch.is_empty());
    }

    #[test]
    fn test_patched_keeps_window_valid() {
        let event = sample_event();
        let bad = EventPatch {
            end_timestamp: Some(event.start_timestamp - Duration::minutes(1)),
            ..Default::default()
        };
        assert!(event.patched(&bad).is_err());

        let good = EventPatch {
            name: Some("Prom".to_string()),
            ..Default::default()
        };
        let patched = event.patched(&good).unwrap();
        assert_eq!(patched.name, "Prom");
        assert_eq!(patched.id, event.id);
    }
}
