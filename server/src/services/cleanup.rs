//! Sweep over all queued tickets, resolving the ones whose student has registered.

use std::sync::Arc;

use tracing::{info, warn};

use super::batch::{fan_out, BatchReport, Outcome};
use crate::models::{ModelError, QueuedTicket, TicketFilter, UserKey};
use crate::store::Store;

/// Resolves a single queued ticket.
///
/// * student not registered: `Delayed`, left in place
/// * ticket already issued: the queued ticket is deleted
/// * registered but no ticket yet: `Skipped`, left untouched
pub async fn sweep_one(store: &dyn Store, queued: &QueuedTicket) -> Outcome {
    let user = match store.find_user(UserKey::StudentNumber(&queued.student_number)).await {
        Ok(user) => user,
        Err(ModelError::NotFound) => {
            info!(student_number = %queued.student_number, "No user with student number yet");
            return Outcome::Delayed;
        }
        Err(e) => {
            warn!(
                error = %e,
                student_number = %queued.student_number,
                "Could not look up student"
            );
            return Outcome::Failed;
        }
    };

    let filter = TicketFilter::by_owner_and_event(&user.id, queued.event_id);
    match store.ticket_exists(&filter).await {
        Ok(true) => match store.delete_queued_ticket(queued.id).await {
            Ok(()) => {
                info!(queued_ticket_id = %queued.id, "Deleted redundant queued ticket");
                Outcome::Successful
            }
            Err(e) => {
                warn!(
                    error = %e,
                    queued_ticket_id = %queued.id,
                    "Could not delete redundant queued ticket"
                );
                Outcome::Failed
            }
        },
        Ok(false) => {
            info!(
                queued_ticket_id = %queued.id,
                uid = %user.id,
                "Student registered without a converted ticket, leaving queued ticket"
            );
            Outcome::Skipped
        }
        Err(e) => {
            warn!(error = %e, queued_ticket_id = %queued.id, "Could not check for existing ticket");
            Outcome::Failed
        }
    }
}

/// Sweeps every queued ticket with bounded concurrency.
///
/// Only the initial listing can fail the whole run.
pub async fn sweep_queued_tickets(
    store: Arc<dyn Store>,
    concurrency: usize,
) -> Result<BatchReport, ModelError> {
    let queued = store.list_queued_tickets().await?;
    info!(count = queued.len(), "Sweeping queued tickets");

    Ok(fan_out(queued, concurrency, move |queued| {
        let store = store.clone();
        async move { sweep_one(store.as_ref(), &queued).await }
    })
    .await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CustomFields, ScanLimit, Ticket};
    use crate::store::MemoryStore;
    use crate::test_support::{sample_event, sample_user};

    #[tokio::test]
    async fn test_sweep_classifies_each_queued_ticket() {
        let store = MemoryStore::new();
        let event = sample_event();
        store.create_event(&event).await.unwrap();

        // registered, ticket issued through another path
        let issued =
            QueuedTicket::new("100001", event.id, ScanLimit::Unlimited, CustomFields::new());
        store.create_queued_ticket(&issued).await.unwrap();
        store.create_user(&sample_user("uid-issued", "100001")).await.unwrap();
        let ticket = Ticket::new("uid-issued", event.id, ScanLimit::Unlimited, CustomFields::new());
        store.create_ticket(&ticket).await.unwrap();

        // registered, conversion never ran
        let pending =
            QueuedTicket::new("100002", event.id, ScanLimit::from(3), CustomFields::new());
        store.create_queued_ticket(&pending).await.unwrap();
        store.create_user(&sample_user("uid-pending", "100002")).await.unwrap();

        // never registered
        let waiting =
            QueuedTicket::new("100003", event.id, ScanLimit::Unlimited, CustomFields::new());
        store.create_queued_ticket(&waiting).await.unwrap();

        let store: Arc<dyn Store> = Arc::new(store);
        let report = sweep_queued_tickets(store.clone(), 2).await.unwrap();

        assert_eq!(report.successful, 1);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.delayed, 1);
        assert_eq!(report.failed, 0);

        let mut remaining = store.list_queued_tickets().await.unwrap();
        remaining.sort_by(|a, b| a.student_number.cmp(&b.student_number));
        assert_eq!(remaining, vec![pending, waiting]);
        assert!(!store
            .ticket_exists(&TicketFilter::by_owner("uid-pending"))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_sweep_on_empty_store() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let report = sweep_queued_tickets(store, 4).await.unwrap();
        assert_eq!(report.total(), 0);
    }
}
