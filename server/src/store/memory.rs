use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{Store, StoreResult};
use crate::models::{
    Event, EventPatch, ModelError, QueuedTicket, ScanRecord, Ticket, TicketDetails, TicketFilter,
    TicketPatch, User, UserKey, UserPatch,
};

#[derive(Debug, Default)]
struct Collections {
    events: HashMap<Uuid, Event>,
    users: HashMap<String, User>,
    tickets: HashMap<Uuid, Ticket>,
    queued_tickets: HashMap<Uuid, QueuedTicket>,
}

impl Collections {
    fn student_number_of(&self, owner: &str) -> Option<&str> {
        self.users.get(owner).map(|user| user.student_number.as_str())
    }

    fn matching_tickets<'a>(
        &'a self,
        filter: &'a TicketFilter,
    ) -> impl Iterator<Item = &'a Ticket> + 'a {
        self.tickets
            .values()
            .filter(move |ticket| filter.matches(ticket, self.student_number_of(&ticket.owner)))
    }
}

/// In-process store used by tests and local experiments.
///
/// Every operation runs under a single lock, which makes each one atomic.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Collections>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Collections> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Inserts a ticket without checking its references.
    #[cfg(test)]
    pub(crate) fn insert_ticket_unchecked(&self, ticket: Ticket) {
        self.lock().tickets.insert(ticket.id, ticket);
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn list_events(&self) -> StoreResult<Vec<Event>> {
        let mut events: Vec<Event> = self.lock().events.values().cloned().collect();
        events.sort_by_key(|event| event.start_timestamp);
        Ok(events)
    }

    async fn find_event(&self, id: Uuid) -> StoreResult<Event> {
        self.lock().events.get(&id).cloned().ok_or(ModelError::NotFound)
    }

    async fn event_exists(&self, id: Uuid) -> StoreResult<bool> {
        Ok(self.lock().events.contains_key(&id))
    }

    async fn create_event(&self, event: &Event) -> StoreResult<Uuid> {
        let mut data = self.lock();
        if data.events.contains_key(&event.id) {
            return Err(ModelError::AlreadyExists);
        }
        data.events.insert(event.id, event.clone());
        Ok(event.id)
    }

    async fn update_event(&self, id: Uuid, patch: &EventPatch) -> StoreResult<()> {
        if patch.is_empty() {
            return Err(ModelError::NoDocumentModified);
        }

        let mut data = self.lock();
        let event = data.events.get_mut(&id).ok_or(ModelError::NoDocumentModified)?;
        let patched = event.patched(patch).map_err(ModelError::Malformed)?;
        *event = patched;
        Ok(())
    }

    async fn delete_event(&self, id: Uuid) -> StoreResult<()> {
        let mut data = self.lock();
        if data.events.remove(&id).is_none() {
            return Err(ModelError::NotFound);
        }
        data.tickets.retain(|_, ticket| ticket.event != id);
        data.queued_tickets.retain(|_, queued| queued.event_id != id);
        Ok(())
    }

    async fn list_users(&self) -> StoreResult<Vec<User>> {
        let mut users: Vec<User> = self.lock().users.values().cloned().collect();
        users.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(users)
    }

    async fn find_user(&self, key: UserKey<'_>) -> StoreResult<User> {
        let data = self.lock();
        let user = match key {
            UserKey::Id(id) => data.users.get(id),
            UserKey::StudentNumber(number) => {
                data.users.values().find(|user| user.student_number == number)
            }
        };
        user.cloned().ok_or(ModelError::NotFound)
    }

    async fn user_exists(&self, id: &str) -> StoreResult<bool> {
        Ok(self.lock().users.contains_key(id))
    }

    async fn create_user(&self, user: &User) -> StoreResult<()> {
        let mut data = self.lock();
        let taken = data.users.contains_key(&user.id)
            || data
                .users
                .values()
                .any(|existing| existing.student_number == user.student_number);
        if taken {
            return Err(ModelError::AlreadyExists);
        }
        data.users.insert(user.id.clone(), user.clone());
        Ok(())
    }

    async fn update_user(&self, id: &str, patch: &UserPatch) -> StoreResult<()> {
        if patch.is_empty() {
            return Err(ModelError::NoDocumentModified);
        }

        let mut data = self.lock();
        if let Some(number) = &patch.student_number {
            if data
                .users
                .values()
                .any(|other| other.id != id && &other.student_number == number)
            {
                return Err(ModelError::AlreadyExists);
            }
        }
        let user = data.users.get_mut(id).ok_or(ModelError::NoDocumentModified)?;
        patch.apply(user);
        Ok(())
    }

    async fn delete_user(&self, id: &str) -> StoreResult<()> {
        let mut data = self.lock();
        if data.users.remove(id).is_none() {
            return Err(ModelError::NotFound);
        }
        data.tickets.retain(|_, ticket| ticket.owner != id);
        Ok(())
    }

    async fn list_tickets(&self, filter: &TicketFilter) -> StoreResult<Vec<TicketDetails>> {
        let data = self.lock();
        let mut tickets: Vec<TicketDetails> = data
            .matching_tickets(filter)
            .filter_map(|ticket| {
                let owner_data = data.users.get(&ticket.owner)?.clone();
                let event_data = data.events.get(&ticket.event)?.clone();
                Some(TicketDetails {
                    ticket: ticket.clone(),
                    owner_data,
                    event_data,
                })
            })
            .collect();
        tickets.sort_by_key(|details| details.ticket.timestamp);
        Ok(tickets)
    }

    async fn count_tickets(&self, filter: &TicketFilter) -> StoreResult<u64> {
        Ok(self.lock().matching_tickets(filter).count() as u64)
    }

    async fn find_ticket(&self, id: Uuid) -> StoreResult<Ticket> {
        self.lock().tickets.get(&id).cloned().ok_or(ModelError::NotFound)
    }

    async fn search_ticket(&self, event: Uuid, owner: &str) -> StoreResult<Ticket> {
        let filter = TicketFilter::by_owner_and_event(owner, event);
        let data = self.lock();
        let found = data.matching_tickets(&filter).next().cloned();
        found.ok_or(ModelError::NotFound)
    }

    async fn ticket_exists(&self, filter: &TicketFilter) -> StoreResult<bool> {
        Ok(self.lock().matching_tickets(filter).next().is_some())
    }

    async fn create_ticket(&self, ticket: &Ticket) -> StoreResult<Uuid> {
        let mut data = self.lock();
        let duplicate = data.tickets.values().any(|existing| {
            existing.id == ticket.id
                || (existing.owner == ticket.owner && existing.event == ticket.event)
        });
        if duplicate {
            return Err(ModelError::AlreadyExists);
        }
        if !data.events.contains_key(&ticket.event) || !data.users.contains_key(&ticket.owner) {
            return Err(ModelError::NotFound);
        }
        data.tickets.insert(ticket.id, ticket.clone());
        Ok(ticket.id)
    }

    async fn update_ticket(&self, id: Uuid, patch: &TicketPatch) -> StoreResult<()> {
        if patch.is_empty() {
            return Err(ModelError::NoDocumentModified);
        }

        let mut data = self.lock();
        let ticket = data.tickets.get_mut(&id).ok_or(ModelError::NoDocumentModified)?;
        patch.apply(ticket);
        Ok(())
    }

    async fn record_scan(&self, id: Uuid, at: DateTime<Utc>) -> StoreResult<ScanRecord> {
        let mut data = self.lock();
        let ticket = data.tickets.get_mut(&id).ok_or(ModelError::NotFound)?;
        if !ticket.max_scan_count.allows_scan(ticket.scan_count) {
            return Ok(ScanRecord::Rejected(ticket.clone()));
        }
        ticket.scan_count += 1;
        ticket.last_scan_time = Some(at);
        Ok(ScanRecord::Admitted(ticket.clone()))
    }

    async fn delete_ticket(&self, id: Uuid) -> StoreResult<()> {
        self.lock()
            .tickets
            .remove(&id)
            .map(|_| ())
            .ok_or(ModelError::NoDocumentModified)
    }

    async fn create_queued_ticket(&self, queued: &QueuedTicket) -> StoreResult<Uuid> {
        let mut data = self.lock();
        let queued_exists = data.queued_tickets.values().any(|existing| {
            existing.id == queued.id
                || (existing.student_number == queued.student_number
                    && existing.event_id == queued.event_id)
        });
        if queued_exists {
            return Err(ModelError::AlreadyExists);
        }

        let filter = TicketFilter::by_student_number_and_event(
            queued.student_number.clone(),
            queued.event_id,
        );
        if data.matching_tickets(&filter).next().is_some() {
            return Err(ModelError::AlreadyExists);
        }
        if !data.events.contains_key(&queued.event_id) {
            return Err(ModelError::NotFound);
        }

        data.queued_tickets.insert(queued.id, queued.clone());
        Ok(queued.id)
    }

    async fn find_queued_ticket(&self, id: Uuid) -> StoreResult<QueuedTicket> {
        self.lock()
            .queued_tickets
            .get(&id)
            .cloned()
            .ok_or(ModelError::NotFound)
    }

    async fn delete_queued_ticket(&self, id: Uuid) -> StoreResult<()> {
        self.lock()
            .queued_tickets
            .remove(&id)
            .map(|_| ())
            .ok_or(ModelError::NoDocumentModified)
    }

    async fn list_queued_tickets_for_student(
        &self,
        student_number: &str,
    ) -> StoreResult<Vec<QueuedTicket>> {
        let mut queued: Vec<QueuedTicket> = self
            .lock()
            .queued_tickets
            .values()
            .filter(|queued| queued.student_number == student_number)
            .cloned()
            .collect();
        queued.sort_by_key(|queued| queued.timestamp);
        Ok(queued)
    }

    async fn list_queued_tickets(&self) -> StoreResult<Vec<QueuedTicket>> {
        let mut queued: Vec<QueuedTicket> = self.lock().queued_tickets.values().cloned().collect();
        queued.sort_by_key(|queued| queued.timestamp);
        Ok(queued)
    }
}
