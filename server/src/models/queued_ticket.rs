use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{CustomFields, ScanLimit, Ticket};

/// A ticket reserved for a student who has not registered yet.
///
/// Keyed by student number instead of a user id; converted into a real
/// [`Ticket`] once the student has an account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedTicket {
    pub id: Uuid,
    pub student_number: String,
    #[serde(rename = "eventID")]
    pub event_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub max_scan_count: ScanLimit,
    /// Display name to give the user when the ticket is converted, if any.
    pub full_name_update: Option<String>,
    pub custom_fields: CustomFields,
}

impl QueuedTicket {
    pub fn new(
        student_number: impl Into<String>,
        event_id: Uuid,
        max_scan_count: ScanLimit,
        custom_fields: CustomFields,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            student_number: student_number.into(),
            event_id,
            timestamp: Utc::now(),
            max_scan_count,
            full_name_update: None,
            custom_fields,
        }
    }

    pub fn with_full_name_update(mut self, full_name: impl Into<String>) -> Self {
        self.full_name_update = Some(full_name.into());
        self
    }

    /// The name update to apply on conversion, ignoring blank values.
    pub fn name_update(&self) -> Option<&str> {
        self.full_name_update
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
    }

    /// The ticket this reservation turns into for the given owner.
    pub fn to_ticket(&self, owner: impl Into<String>) -> Ticket {
        Ticket::new(owner, self.event_id, self.max_scan_count, self.custom_fields.clone())
    }
}
