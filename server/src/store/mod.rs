//! Persistence contract for events, users, tickets and queued tickets.
//!
//! The store owns every uniqueness invariant: one ticket per (owner, event)
//! and one queued ticket per (student number, event), with no queued ticket
//! for a pair that already holds a real ticket.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::{
    Event, EventPatch, ModelError, QueuedTicket, ScanRecord, Ticket, TicketDetails, TicketFilter,
    TicketPatch, User, UserKey, UserPatch,
};

pub use memory::MemoryStore;
pub use postgres::PgStore;

pub type StoreResult<T> = Result<T, ModelError>;

#[async_trait]
pub trait Store: Send + Sync {
    async fn list_events(&self) -> StoreResult<Vec<Event>>;

    async fn find_event(&self, id: Uuid) -> StoreResult<Event>;

    async fn event_exists(&self, id: Uuid) -> StoreResult<bool>;

    async fn create_event(&self, event: &Event) -> StoreResult<Uuid>;

    /// Fails with `NoDocumentModified` if the patch is empty or no event matched.
    async fn update_event(&self, id: Uuid, patch: &EventPatch) -> StoreResult<()>;

    /// Deletes the event and every ticket and queued ticket referencing it.
    async fn delete_event(&self, id: Uuid) -> StoreResult<()>;

    async fn list_users(&self) -> StoreResult<Vec<User>>;

    async fn find_user(&self, key: UserKey<'_>) -> StoreResult<User>;

    async fn user_exists(&self, id: &str) -> StoreResult<bool>;

    /// Fails with `AlreadyExists` if the id or student number is taken.
    async fn create_user(&self, user: &User) -> StoreResult<()>;

    async fn update_user(&self, id: &str, patch: &UserPatch) -> StoreResult<()>;

    /// Deletes the user and every ticket they own.
    async fn delete_user(&self, id: &str) -> StoreResult<()>;

    async fn list_tickets(&self, filter: &TicketFilter) -> StoreResult<Vec<TicketDetails>>;

    async fn count_tickets(&self, filter: &TicketFilter) -> StoreResult<u64>;

    async fn find_ticket(&self, id: Uuid) -> StoreResult<Ticket>;

    async fn search_ticket(&self, event: Uuid, owner: &str) -> StoreResult<Ticket>;

    async fn ticket_exists(&self, filter: &TicketFilter) -> StoreResult<bool>;

    /// Fails with `AlreadyExists` if the (owner, event) pair already holds a
    /// ticket and with `NotFound` if the owner or event is missing.
    async fn create_ticket(&self, ticket: &Ticket) -> StoreResult<Uuid>;

    async fn update_ticket(&self, id: Uuid, patch: &TicketPatch) -> StoreResult<()>;

    /// Atomically increments the scan counter if the ticket's limit allows it.
    ///
    /// The limit check and the write happen as one store operation, so two
    /// concurrent scans can never both pass a limit that only admits one.
    async fn record_scan(&self, id: Uuid, at: DateTime<Utc>) -> StoreResult<ScanRecord>;

    async fn delete_ticket(&self, id: Uuid) -> StoreResult<()>;

    /// Fails with `AlreadyExists` if a queued or real ticket exists for the
    /// (student number, event) pair and with `NotFound` if the event is missing.
    async fn create_queued_ticket(&self, queued: &QueuedTicket) -> StoreResult<Uuid>;

    async fn find_queued_ticket(&self, id: Uuid) -> StoreResult<QueuedTicket>;

    async fn delete_queued_ticket(&self, id: Uuid) -> StoreResult<()>;

    async fn list_queued_tickets_for_student(
        &self,
        student_number: &str,
    ) -> StoreResult<Vec<QueuedTicket>>;

    async fn list_queued_tickets(&self) -> StoreResult<Vec<QueuedTicket>>;
}
