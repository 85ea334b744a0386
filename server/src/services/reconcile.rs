//! Conversion of queued tickets into real tickets.
//!
//! Conversion runs in two phases. [`materialize`] creates the ticket and is
//! the only phase whose failure fails the conversion. [`settle`] then applies
//! the queued name update and deletes the queued ticket, both best effort. A
//! queued ticket left behind by a failed settle is harmless: its pair already
//! holds a ticket, so any retry reports `AlreadyExists` and the cleanup sweep
//! deletes it.

use tracing::{info, warn};

use crate::models::{ModelError, QueuedTicket, Ticket, User, UserKey, UserPatch};
use crate::store::Store;

/// A ticket created from a queued ticket, with the user it was issued to.
#[derive(Debug, Clone, PartialEq)]
pub struct Materialized {
    pub ticket: Ticket,
    pub user: User,
}

/// What the settle phase managed to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Settlement {
    pub name_updated: bool,
    pub queued_deleted: bool,
}

/// Phase one: create the real ticket for a queued ticket.
///
/// Fails with `NotFound` if no user has the queued student number yet or the
/// event is gone; store errors from ticket creation propagate unchanged.
pub async fn materialize(
    store: &dyn Store,
    queued: &QueuedTicket,
) -> Result<Materialized, ModelError> {
    let user = store.find_user(UserKey::StudentNumber(&queued.student_number)).await?;
    if !store.event_exists(queued.event_id).await? {
        return Err(ModelError::NotFound);
    }

    let ticket = queued.to_ticket(&user.id);
    store.create_ticket(&ticket).await?;
    Ok(Materialized { ticket, user })
}

/// Phase two: apply the name update and remove the queued ticket.
///
/// Never fails; each step that does not go through is logged.
pub async fn settle(
    store: &dyn Store,
    queued: &QueuedTicket,
    user: &User,
    apply_name_update: bool,
) -> Settlement {
    let mut settlement = Settlement::default();

    if let Some(name) = queued.name_update().filter(|_| apply_name_update) {
        match store.update_user(&user.id, &UserPatch::full_name(name)).await {
            Ok(()) => settlement.name_updated = true,
            Err(e) => warn!(error = %e, uid = %user.id, "Could not apply queued name update"),
        }
    }

    match store.delete_queued_ticket(queued.id).await {
        Ok(()) => settlement.queued_deleted = true,
        Err(e) => warn!(
            error = %e,
            queued_ticket_id = %queued.id,
            "Could not delete converted queued ticket, leaving it for the cleanup sweep"
        ),
    }

    settlement
}

/// Converts a queued ticket into a real ticket and returns it.
///
/// If the pair already holds a ticket, the redundant queued ticket is
/// deleted and `AlreadyExists` is returned, so converting twice never
/// creates a second ticket.
pub async fn convert(
    store: &dyn Store,
    queued: &QueuedTicket,
    apply_name_update: bool,
) -> Result<Ticket, ModelError> {
    let materialized = match materialize(store, queued).await {
        Ok(materialized) => materialized,
        Err(ModelError::AlreadyExists) => {
            if let Err(e) = store.delete_queued_ticket(queued.id).await {
                if !matches!(e, ModelError::NoDocumentModified) {
                    warn!(
                        error = %e,
                        queued_ticket_id = %queued.id,
                        "Could not delete redundant queued ticket"
                    );
                }
            }
            return Err(ModelError::AlreadyExists);
        }
        Err(e) => return Err(e),
    };

    settle(store, queued, &materialized.user, apply_name_update).await;
    info!(
        ticket_id = %materialized.ticket.id,
        owner_uid = %materialized.user.id,
        event_id = %queued.event_id,
        "Converted queued ticket"
    );
    Ok(materialized.ticket)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CustomFields, Event, ScanLimit, TicketFilter};
    use crate::services::cleanup::sweep_queued_tickets;
    use crate::store::MemoryStore;
    use crate::test_support::{sample_event, sample_user};
    use std::sync::Arc;

    async fn store_with_event() -> (MemoryStore, Event) {
        let store = MemoryStore::new();
        let event = sample_event();
        store.create_event(&event).await.unwrap();
        (store, event)
    }

    #[tokio::test]
    async fn test_registration_converts_queued_ticket() {
        let (store, event) = store_with_event().await;
        let queued = QueuedTicket::new("12345", event.id, ScanLimit::from(2), CustomFields::new())
            .with_full_name_update("Ada Lovelace");
        store.create_queued_ticket(&queued).await.unwrap();
        store.create_user(&sample_user("uid-ada", "12345")).await.unwrap();

        let ticket = convert(&store, &queued, true).await.unwrap();

        assert_eq!(ticket.owner, "uid-ada");
        assert_eq!(ticket.event, event.id);
        assert_eq!(ticket.scan_count, 0);
        assert_eq!(ticket.max_scan_count, ScanLimit::from(2));
        assert_eq!(store.count_tickets(&TicketFilter::all()).await.unwrap(), 1);
        assert!(store.list_queued_tickets().await.unwrap().is_empty());
        let user = store.find_user(UserKey::Id("uid-ada")).await.unwrap();
        assert_eq!(user.full_name, "Ada Lovelace");
    }

    #[tokio::test]
    async fn test_name_update_is_skipped_when_not_requested() {
        let (store, event) = store_with_event().await;
        let queued = QueuedTicket::new("12345", event.id, ScanLimit::Unlimited, CustomFields::new())
            .with_full_name_update("Ada Lovelace");
        store.create_queued_ticket(&queued).await.unwrap();
        store.create_user(&sample_user("uid-ada", "12345")).await.unwrap();

        convert(&store, &queued, false).await.unwrap();
        let user = store.find_user(UserKey::Id("uid-ada")).await.unwrap();
        assert_eq!(user.full_name, "Student 12345");
    }

    #[tokio::test]
    async fn test_unregistered_student_keeps_queued_ticket() {
        let (store, event) = store_with_event().await;
        let queued =
            QueuedTicket::new("55555", event.id, ScanLimit::Unlimited, CustomFields::new());
        store.create_queued_ticket(&queued).await.unwrap();

        assert!(matches!(convert(&store, &queued, true).await, Err(ModelError::NotFound)));
        assert_eq!(store.list_queued_tickets().await.unwrap(), vec![queued]);
    }

    #[tokio::test]
    async fn test_converting_twice_creates_one_ticket() {
        let (store, event) = store_with_event().await;
        let queued =
            QueuedTicket::new("12345", event.id, ScanLimit::Unlimited, CustomFields::new());
        store.create_queued_ticket(&queued).await.unwrap();
        store.create_user(&sample_user("uid-ada", "12345")).await.unwrap();

        convert(&store, &queued, true).await.unwrap();
        assert!(matches!(convert(&store, &queued, true).await, Err(ModelError::AlreadyExists)));
        assert_eq!(store.count_tickets(&TicketFilter::all()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_dangling_queued_ticket_is_swept() {
        let (store, event) = store_with_event().await;
        let queued =
            QueuedTicket::new("12345", event.id, ScanLimit::Unlimited, CustomFields::new());
        store.create_queued_ticket(&queued).await.unwrap();
        store.create_user(&sample_user("uid-ada", "12345")).await.unwrap();

        // phase one only, as if the settle phase had been lost
        materialize(&store, &queued).await.unwrap();
        assert_eq!(store.list_queued_tickets().await.unwrap().len(), 1);

        let store: Arc<dyn Store> = Arc::new(store);
        let report = sweep_queued_tickets(store.clone(), 4).await.unwrap();

        assert_eq!(report.successful, 1);
        assert_eq!(report.skipped, 0);
        assert_eq!(report.failed, 0);
        assert!(store.list_queued_tickets().await.unwrap().is_empty());
        assert_eq!(store.count_tickets(&TicketFilter::all()).await.unwrap(), 1);
    }
}
