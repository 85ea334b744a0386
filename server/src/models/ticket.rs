use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use super::{patch_from_map, CustomFields, Event, ModelError, ScanLimit, User};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ticket {
    pub id: Uuid,
    #[serde(rename = "ownerID")]
    pub owner: String,
    #[serde(rename = "eventID")]
    pub event: Uuid,
    pub timestamp: DateTime<Utc>,
    pub scan_count: u32,
    pub last_scan_time: Option<DateTime<Utc>>,
    pub max_scan_count: ScanLimit,
    pub custom_fields: CustomFields,
}

impl Ticket {
    /// A fresh, never scanned ticket.
    pub fn new(
        owner: impl Into<String>,
        event: Uuid,
        max_scan_count: ScanLimit,
        custom_fields: CustomFields,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner: owner.into(),
            event,
            timestamp: Utc::now(),
            scan_count: 0,
            last_scan_time: None,
            max_scan_count,
            custom_fields,
        }
    }
}

/// A ticket joined with its owner and event, as listed to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketDetails {
    #[serde(flatten)]
    pub ticket: Ticket,
    pub owner_data: User,
    pub event_data: Event,
}

/// Conjunctive ticket filter; unset fields match anything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TicketFilter {
    pub id: Option<Uuid>,
    pub owner: Option<String>,
    pub event: Option<Uuid>,
    pub owner_student_number: Option<String>,
}

impl TicketFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn by_id(id: Uuid) -> Self {
        Self {
            id: Some(id),
            ..Default::default()
        }
    }

    pub fn by_owner(owner: impl Into<String>) -> Self {
        Self {
            owner: Some(owner.into()),
            ..Default::default()
        }
    }

    pub fn by_event(event: Uuid) -> Self {
        Self {
            event: Some(event),
            ..Default::default()
        }
    }

    pub fn by_owner_and_event(owner: impl Into<String>, event: Uuid) -> Self {
        Self {
            owner: Some(owner.into()),
            event: Some(event),
            ..Default::default()
        }
    }

    pub fn by_student_number_and_event(student_number: impl Into<String>, event: Uuid) -> Self {
        Self {
            owner_student_number: Some(student_number.into()),
            event: Some(event),
            ..Default::default()
        }
    }

    /// Evaluates the filter against a ticket and the student number of its owner.
    pub fn matches(&self, ticket: &Ticket, owner_student_number: Option<&str>) -> bool {
        self.id.map_or(true, |id| ticket.id == id)
            && self.owner.as_ref().map_or(true, |owner| &ticket.owner == owner)
            && self.event.map_or(true, |event| ticket.event == event)
            && self
                .owner_student_number
                .as_deref()
                .map_or(true, |number| owner_student_number == Some(number))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketPatch {
    #[serde(default)]
    pub scan_count: Option<u32>,
    #[serde(default)]
    pub last_scan_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub max_scan_count: Option<ScanLimit>,
    /// Merged into the existing custom fields key by key.
    #[serde(default)]
    pub custom_fields: Option<CustomFields>,
}

impl TicketPatch {
    pub const UPDATABLE_KEYS: [&'static str; 4] =
        ["scanCount", "lastScanTime", "maxScanCount", "customFields"];

    pub fn is_empty(&self) -> bool {
        *self == TicketPatch::default()
    }

    pub fn apply(&self, ticket: &mut Ticket) {
        if let Some(scan_count) = self.scan_count {
            ticket.scan_count = scan_count;
        }
        if let Some(last_scan_time) = self.last_scan_time {
            ticket.last_scan_time = Some(last_scan_time);
        }
        if let Some(max_scan_count) = self.max_scan_count {
            ticket.max_scan_count = max_scan_count;
        }
        if let Some(custom_fields) = &self.custom_fields {
            for (key, value) in custom_fields {
                ticket.custom_fields.insert(key.clone(), value.clone());
            }
        }
    }
}

impl TryFrom<Map<String, Value>> for TicketPatch {
    type Error = ModelError;

    fn try_from(raw: Map<String, Value>) -> Result<Self, Self::Error> {
        patch_from_map(raw, &TicketPatch::UPDATABLE_KEYS)
    }
}

/// Result of an atomic scan attempt against the store.
#[derive(Debug, Clone, PartialEq)]
pub enum ScanRecord {
    /// The counter was incremented; holds the ticket after the write.
    Admitted(Ticket),
    /// The limit was already reached; holds the unchanged ticket.
    Rejected(Ticket),
}

/// Receipt of one scan attempt. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketScan {
    pub index: u32,
    pub timestamp: Option<DateTime<Utc>>,
    pub ticket_data: Ticket,
    pub user_data: User,
    pub processed: bool,
    pub no_process_reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_ticket_serializes_with_client_field_names() {
        let ticket = Ticket::new("uid-1", Uuid::nil(), ScanLimit::from(2), CustomFields::new());
        let value = serde_json::to_value(&ticket).unwrap();
        assert_eq!(value["ownerID"], json!("uid-1"));
        assert_eq!(value["eventID"], json!(Uuid::nil()));
        assert_eq!(value["scanCount"], json!(0));
        assert_eq!(value["maxScanCount"], json!(2));
        assert_eq!(value["lastScanTime"], Value::Null);
    }

    #[test]
    fn test_filter_matches_on_student_number() {
        let event = Uuid::new_v4();
        let ticket = Ticket::new("uid-1", event, ScanLimit::Unlimited, CustomFields::new());
        let filter = TicketFilter::by_student_number_and_event("123", event);
        assert!(filter.matches(&ticket, Some("123")));
        assert!(!filter.matches(&ticket, Some("456")));
        assert!(!filter.matches(&ticket, None));
        assert!(TicketFilter::all().matches(&ticket, None));
    }

    #[test]
    fn test_patch_merges_custom_fields() {
        let mut fields = CustomFields::new();
        fields.insert("table".to_string(), json!(1));
        fields.insert("meal".to_string(), json!("veg"));
        let mut ticket = Ticket::new("uid-1", Uuid::nil(), ScanLimit::Unlimited, fields);

        let raw = json!({"customFields": {"meal": "fish"}, "maxScanCount": 3});
        let patch = TicketPatch::try_from(raw.as_object().cloned().unwrap()).unwrap();
        patch.apply(&mut ticket);

        assert_eq!(ticket.custom_fields["table"], json!(1));
        assert_eq!(ticket.custom_fields["meal"], json!("fish"));
        assert_eq!(ticket.max_scan_count, ScanLimit::from(3));
    }

    #[test]
    fn test_patch_rejects_owner_change() {
        let raw = json!({"ownerID": "uid-2"});
        assert!(matches!(
            TicketPatch::try_from(raw.as_object().cloned().unwrap()),
            Err(ModelError::EditNotAllowed(_))
        ));
    }
}
