//! Scan admission at event entry.

use chrono::{DateTime, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use crate::models::{ModelError, ScanRecord, TicketScan, UserKey};
use crate::store::Store;

pub const MAX_SCAN_COUNT_EXCEEDED: &str = "max scan count exceeded";

/// Records one scan of a ticket and returns the receipt.
///
/// A scan past the ticket's limit is not an error: it yields a receipt with
/// `processed == false` that repeats the last admitted index and time, and
/// the ticket is left untouched.
pub async fn admit_scan(
    store: &dyn Store,
    ticket_id: Uuid,
    now: DateTime<Utc>,
) -> Result<TicketScan, ModelError> {
    let ticket = store.find_ticket(ticket_id).await?;
    let user_data = match store.find_user(UserKey::Id(&ticket.owner)).await {
        Ok(user) => user,
        Err(ModelError::NotFound) => {
            return Err(ModelError::Integrity(format!(
                "ticket {} references missing owner {}",
                ticket.id, ticket.owner
            )))
        }
        Err(e) => return Err(e),
    };

    match store.record_scan(ticket_id, now).await? {
        ScanRecord::Admitted(ticket_data) => {
            info!(ticket_id = %ticket_id, index = ticket_data.scan_count, "Admitted ticket scan");
            Ok(TicketScan {
                index: ticket_data.scan_count,
                timestamp: Some(now),
                ticket_data,
                user_data,
                processed: true,
                no_process_reason: None,
            })
        }
        ScanRecord::Rejected(ticket_data) => {
            warn!(
                ticket_id = %ticket_id,
                scan_count = ticket_data.scan_count,
                max_scan_count = ticket_data.max_scan_count.as_count(),
                "Rejected ticket scan"
            );
            Ok(TicketScan {
                index: ticket_data.scan_count,
                timestamp: ticket_data.last_scan_time,
                ticket_data,
                user_data,
                processed: false,
                no_process_reason: Some(MAX_SCAN_COUNT_EXCEEDED.to_string()),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Duration;

    use super::*;
    use crate::models::{CustomFields, ScanLimit, Ticket};
    use crate::store::MemoryStore;
    use crate::test_support::{sample_event, sample_user};

    async fn store_with_ticket(limit: ScanLimit) -> (MemoryStore, Ticket) {
        let store = MemoryStore::new();
        let event = sample_event();
        let user = sample_user("uid-1", "100001");
        store.create_event(&event).await.unwrap();
        store.create_user(&user).await.unwrap();
        let ticket = Ticket::new(&user.id, event.id, limit, CustomFields::new());
        store.create_ticket(&ticket).await.unwrap();
        (store, ticket)
    }

    #[tokio::test]
    async fn test_single_scan_limit_admits_once() {
        let (store, ticket) = store_with_ticket(ScanLimit::from(1)).await;
        let first_at = Utc::now();

        let first = admit_scan(&store, ticket.id, first_at).await.unwrap();
        assert!(first.processed);
        assert_eq!(first.index, 1);
        assert_eq!(first.timestamp, Some(first_at));
        assert_eq!(first.user_data.id, "uid-1");

        let second = admit_scan(&store, ticket.id, first_at + Duration::seconds(30)).await.unwrap();
        assert!(!second.processed);
        assert_eq!(second.index, 1);
        assert_eq!(second.timestamp, Some(first_at));
        assert_eq!(second.no_process_reason.as_deref(), Some(MAX_SCAN_COUNT_EXCEEDED));
    }

    #[tokio::test]
    async fn test_rejected_scans_leave_ticket_unchanged() {
        let (store, ticket) = store_with_ticket(ScanLimit::from(2)).await;
        let start = Utc::now();
        for offset in 0..2 {
            let receipt = admit_scan(&store, ticket.id, start + Duration::seconds(offset))
                .await
                .unwrap();
            assert!(receipt.processed);
        }
        let after_limit = store.find_ticket(ticket.id).await.unwrap();

        for offset in 2..5 {
            let receipt = admit_scan(&store, ticket.id, start + Duration::seconds(offset))
                .await
                .unwrap();
            assert!(!receipt.processed);
            assert_eq!(receipt.index, 2);
        }
        assert_eq!(store.find_ticket(ticket.id).await.unwrap(), after_limit);
        assert_eq!(after_limit.scan_count, 2);
        assert_eq!(after_limit.last_scan_time, Some(start + Duration::seconds(1)));
    }

    #[tokio::test]
    async fn test_unlimited_ticket_is_never_rejected() {
        let (store, ticket) = store_with_ticket(ScanLimit::Unlimited).await;
        for expected in 1..=25 {
            let receipt = admit_scan(&store, ticket.id, Utc::now()).await.unwrap();
            assert!(receipt.processed);
            assert_eq!(receipt.index, expected);
        }
    }

    #[tokio::test]
    async fn test_concurrent_scans_respect_limit() {
        let (store, ticket) = store_with_ticket(ScanLimit::from(3)).await;
        let store = Arc::new(store);

        let mut handles = Vec::new();
        for _ in 0..20 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                admit_scan(store.as_ref(), ticket.id, Utc::now()).await.unwrap()
            }));
        }

        let mut admitted = 0;
        for handle in handles {
            if handle.await.unwrap().processed {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 3);
        assert_eq!(store.find_ticket(ticket.id).await.unwrap().scan_count, 3);
    }

    #[tokio::test]
    async fn test_missing_ticket_is_not_found() {
        let (store, _) = store_with_ticket(ScanLimit::Unlimited).await;
        assert!(matches!(
            admit_scan(&store, Uuid::new_v4(), Utc::now()).await,
            Err(ModelError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_ticket_without_owner_is_integrity_error() {
        let (store, ticket) = store_with_ticket(ScanLimit::Unlimited).await;
        let orphan =
            Ticket::new("deleted-uid", ticket.event, ScanLimit::Unlimited, CustomFields::new());
        store.insert_ticket_unchecked(orphan.clone());

        assert!(matches!(
            admit_scan(&store, orphan.id, Utc::now()).await,
            Err(ModelError::Integrity(_))
        ));
        assert_eq!(store.find_ticket(orphan.id).await.unwrap().scan_count, 0);
    }
}
