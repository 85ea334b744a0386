pub mod custom_fields;
pub mod error;
pub mod event;
pub mod queued_ticket;
pub mod ticket;
pub mod user;

use std::num::NonZeroU32;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub use custom_fields::{CustomField, CustomFieldsSchema};
pub use error::ModelError;
pub use event::{Event, EventPatch};
pub use queued_ticket::QueuedTicket;
pub use ticket::{ScanRecord, Ticket, TicketDetails, TicketFilter, TicketPatch, TicketScan};
pub use user::{User, UserKey, UserPatch};

/// Open map of event-schema-defined values attached to a ticket.
pub type CustomFields = Map<String, Value>;

/// How many times a ticket may be scanned.
///
/// Serialized as a plain integer where `0` means unlimited, which is the
/// representation clients and the database already use. There is no way to
/// express "zero scans allowed".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "u32", into = "u32")]
pub enum ScanLimit {
    #[default]
    Unlimited,
    Limited(NonZeroU32),
}

impl ScanLimit {
    /// Whether a ticket that has already been scanned `scan_count` times may be scanned again.
    pub fn allows_scan(&self, scan_count: u32) -> bool {
        match self {
            ScanLimit::Unlimited => true,
            ScanLimit::Limited(max) => scan_count < max.get(),
        }
    }

    pub fn as_count(&self) -> u32 {
        u32::from(*self)
    }
}

impl From<u32> for ScanLimit {
    fn from(value: u32) -> Self {
        NonZeroU32::new(value).map_or(ScanLimit::Unlimited, ScanLimit::Limited)
    }
}

impl From<ScanLimit> for u32 {
    fn from(limit: ScanLimit) -> Self {
        match limit {
            ScanLimit::Unlimited => 0,
            ScanLimit::Limited(max) => max.get(),
        }
    }
}

/// Builds a typed patch from a raw JSON object, rejecting any key outside `allowed`.
pub(crate) fn patch_from_map<T: DeserializeOwned>(
    raw: Map<String, Value>,
    allowed: &[&str],
) -> Result<T, ModelError> {
    if let Some(key) = raw.keys().find(|key| !allowed.contains(&key.as_str())) {
        return Err(ModelError::EditNotAllowed(key.clone()));
    }

    serde_json::from_value(Value::Object(raw)).map_err(|e| ModelError::Malformed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_zero_scan_limit_is_unlimited() {
        let limit = ScanLimit::from(0);
        assert_eq!(limit, ScanLimit::Unlimited);
        assert!(limit.allows_scan(0));
        assert!(limit.allows_scan(u32::MAX - 1));
    }

    #[test]
    fn test_limited_scan_limit_stops_at_max() {
        let limit = ScanLimit::from(2);
        assert!(limit.allows_scan(0));
        assert!(limit.allows_scan(1));
        assert!(!limit.allows_scan(2));
        assert_eq!(limit.as_count(), 2);
    }

    #[test]
    fn test_scan_limit_serializes_as_integer() {
        assert_eq!(serde_json::to_value(ScanLimit::Unlimited).unwrap(), json!(0));
        assert_eq!(serde_json::to_value(ScanLimit::from(3)).unwrap(), json!(3));
        let parsed: ScanLimit = serde_json::from_value(json!(5)).unwrap();
        assert_eq!(parsed, ScanLimit::from(5));
        assert!(serde_json::from_value::<ScanLimit>(json!(-1)).is_err());
    }
}
