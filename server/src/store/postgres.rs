//! PostgreSQL store.
//!
//! Uniqueness rules are backed by unique indexes, so a lost race between two
//! writers still surfaces as [`ModelError::AlreadyExists`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;
use sqlx::{FromRow, Postgres, QueryBuilder};
use uuid::Uuid;

use super::{Store, StoreResult};
use crate::models::{
    CustomFields, Event, EventPatch, ModelError, QueuedTicket, ScanLimit, ScanRecord, Ticket,
    TicketDetails, TicketFilter, TicketPatch, User, UserKey, UserPatch,
};

const TICKET_COLUMNS: &str = "t.id, t.owner, t.event, t.timestamp, t.scan_count, \
     t.last_scan_time, t.max_scan_count, t.custom_fields";

const QUEUED_COLUMNS: &str =
    "id, student_number, event_id, timestamp, max_scan_count, full_name_update, custom_fields";

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str, max_connections: u32) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self::new(pool))
    }

    pub async fn migrate(&self) -> StoreResult<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| ModelError::Database(e.into()))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Maps driver errors onto the store's error vocabulary.
fn db_error(err: sqlx::Error) -> ModelError {
    match &err {
        sqlx::Error::RowNotFound => ModelError::NotFound,
        sqlx::Error::Database(db) if db.is_unique_violation() => ModelError::AlreadyExists,
        sqlx::Error::Database(db) if db.is_foreign_key_violation() => ModelError::NotFound,
        _ => ModelError::Database(err),
    }
}

fn to_db_count(value: u32) -> StoreResult<i32> {
    i32::try_from(value).map_err(|_| ModelError::Malformed(format!("count {value} out of range")))
}

fn from_db_count(value: i32) -> StoreResult<u32> {
    u32::try_from(value).map_err(|_| ModelError::Malformed(format!("negative count {value}")))
}

#[derive(FromRow)]
struct TicketRow {
    id: Uuid,
    owner: String,
    event: Uuid,
    timestamp: DateTime<Utc>,
    scan_count: i32,
    last_scan_time: Option<DateTime<Utc>>,
    max_scan_count: i32,
    custom_fields: Json<CustomFields>,
}

impl TryFrom<TicketRow> for Ticket {
    type Error = ModelError;

    fn try_from(row: TicketRow) -> Result<Self, Self::Error> {
        Ok(Ticket {
            id: row.id,
            owner: row.owner,
            event: row.event,
            timestamp: row.timestamp,
            scan_count: from_db_count(row.scan_count)?,
            last_scan_time: row.last_scan_time,
            max_scan_count: ScanLimit::from(from_db_count(row.max_scan_count)?),
            custom_fields: row.custom_fields.0,
        })
    }
}

#[derive(FromRow)]
struct TicketDetailsRow {
    #[sqlx(flatten)]
    ticket: TicketRow,
    owner_admin: bool,
    owner_student_number: String,
    owner_full_name: String,
    owner_pfp_url: String,
    event_name: String,
    event_description: String,
    event_img_urls: Vec<String>,
    event_location: String,
    event_address: String,
    event_start_timestamp: DateTime<Utc>,
    event_end_timestamp: DateTime<Utc>,
    event_custom_fields_schema: Option<serde_json::Value>,
}

impl TryFrom<TicketDetailsRow> for TicketDetails {
    type Error = ModelError;

    fn try_from(row: TicketDetailsRow) -> Result<Self, Self::Error> {
        let ticket = Ticket::try_from(row.ticket)?;
        let owner_data = User {
            id: ticket.owner.clone(),
            admin: row.owner_admin,
            student_number: row.owner_student_number,
            full_name: row.owner_full_name,
            pfp_url: row.owner_pfp_url,
        };
        let event_data = Event {
            id: ticket.event,
            name: row.event_name,
            description: row.event_description,
            img_urls: row.event_img_urls,
            location: row.event_location,
            address: row.event_address,
            start_timestamp: row.event_start_timestamp,
            end_timestamp: row.event_end_timestamp,
            custom_fields_schema: row.event_custom_fields_schema,
        };
        Ok(TicketDetails {
            ticket,
            owner_data,
            event_data,
        })
    }
}

#[derive(FromRow)]
struct QueuedTicketRow {
    id: Uuid,
    student_number: String,
    event_id: Uuid,
    timestamp: DateTime<Utc>,
    max_scan_count: i32,
    full_name_update: Option<String>,
    custom_fields: Json<CustomFields>,
}

impl TryFrom<QueuedTicketRow> for QueuedTicket {
    type Error = ModelError;

    fn try_from(row: QueuedTicketRow) -> Result<Self, Self::Error> {
        Ok(QueuedTicket {
            id: row.id,
            student_number: row.student_number,
            event_id: row.event_id,
            timestamp: row.timestamp,
            max_scan_count: ScanLimit::from(from_db_count(row.max_scan_count)?),
            full_name_update: row.full_name_update,
            custom_fields: row.custom_fields.0,
        })
    }
}

/// Appends the filter's conditions to a query over `tickets t JOIN users u`.
fn push_ticket_filter(query: &mut QueryBuilder<'_, Postgres>, filter: &TicketFilter) {
    query.push(" WHERE TRUE");
    if let Some(id) = filter.id {
        query.push(" AND t.id = ").push_bind(id);
    }
    if let Some(owner) = &filter.owner {
        query.push(" AND t.owner = ").push_bind(owner.clone());
    }
    if let Some(event) = filter.event {
        query.push(" AND t.event = ").push_bind(event);
    }
    if let Some(number) = &filter.owner_student_number {
        query.push(" AND u.student_number = ").push_bind(number.clone());
    }
}

#[async_trait]
impl Store for PgStore {
    async fn list_events(&self) -> StoreResult<Vec<Event>> {
        sqlx::query_as::<_, Event>("SELECT * FROM events ORDER BY start_timestamp")
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)
    }

    async fn find_event(&self, id: Uuid) -> StoreResult<Event> {
        sqlx::query_as::<_, Event>("SELECT * FROM events WHERE id = $1")
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .map_err(db_error)
    }

    async fn event_exists(&self, id: Uuid) -> StoreResult<bool> {
        sqlx::query_scalar::<_, bool>("SELECT EXISTS(SELECT 1 FROM events WHERE id = $1)")
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .map_err(db_error)
    }

    async fn create_event(&self, event: &Event) -> StoreResult<Uuid> {
        sqlx::query(
            r#"
            INSERT INTO events
                (id, name, description, img_urls, location, address,
                 start_timestamp, end_timestamp, custom_fields_schema)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(event.id)
        .bind(&event.name)
        .bind(&event.description)
        .bind(&event.img_urls)
        .bind(&event.location)
        .bind(&event.address)
        .bind(event.start_timestamp)
        .bind(event.end_timestamp)
        .bind(&event.custom_fields_schema)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(event.id)
    }

    async fn update_event(&self, id: Uuid, patch: &EventPatch) -> StoreResult<()> {
        if patch.is_empty() {
            return Err(ModelError::NoDocumentModified);
        }

        let mut tx = self.pool.begin().await.map_err(db_error)?;
        let current = sqlx::query_as::<_, Event>("SELECT * FROM events WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(db_error)?
            .ok_or(ModelError::NoDocumentModified)?;
        let event = current.patched(patch).map_err(ModelError::Malformed)?;

        sqlx::query(
            r#"
            UPDATE events
            SET name = $2, description = $3, img_urls = $4, location = $5, address = $6,
                start_timestamp = $7, end_timestamp = $8
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(&event.name)
        .bind(&event.description)
        .bind(&event.img_urls)
        .bind(&event.location)
        .bind(&event.address)
        .bind(event.start_timestamp)
        .bind(event.end_timestamp)
        .execute(&mut *tx)
        .await
        .map_err(db_error)?;

        tx.commit().await.map_err(db_error)
    }

    async fn delete_event(&self, id: Uuid) -> StoreResult<()> {
        // tickets and queued tickets go with it through ON DELETE CASCADE
        let result = sqlx::query("DELETE FROM events WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;

        if result.rows_affected() == 0 {
            return Err(ModelError::NotFound);
        }
        Ok(())
    }

    async fn list_users(&self) -> StoreResult<Vec<User>> {
        sqlx::query_as::<_, User>("SELECT * FROM users ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)
    }

    async fn find_user(&self, key: UserKey<'_>) -> StoreResult<User> {
        let query = match key {
            UserKey::Id(id) => {
                sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1").bind(id.to_string())
            }
            UserKey::StudentNumber(number) => {
                sqlx::query_as::<_, User>("SELECT * FROM users WHERE student_number = $1")
                    .bind(number.to_string())
            }
        };
        query.fetch_one(&self.pool).await.map_err(db_error)
    }

    async fn user_exists(&self, id: &str) -> StoreResult<bool> {
        sqlx::query_scalar::<_, bool>("SELECT EXISTS(SELECT 1 FROM users WHERE id = $1)")
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .map_err(db_error)
    }

    async fn create_user(&self, user: &User) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO users (id, admin, student_number, full_name, pfp_url) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(&user.id)
        .bind(user.admin)
        .bind(&user.student_number)
        .bind(&user.full_name)
        .bind(&user.pfp_url)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(())
    }

    async fn update_user(&self, id: &str, patch: &UserPatch) -> StoreResult<()> {
        if patch.is_empty() {
            return Err(ModelError::NoDocumentModified);
        }

        let result = sqlx::query(
            r#"
            UPDATE users
            SET admin = COALESCE($2, admin),
                student_number = COALESCE($3, student_number),
                full_name = COALESCE($4, full_name),
                pfp_url = COALESCE($5, pfp_url)
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(patch.admin)
        .bind(&patch.student_number)
        .bind(&patch.full_name)
        .bind(&patch.pfp_url)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        if result.rows_affected() == 0 {
            return Err(ModelError::NoDocumentModified);
        }
        Ok(())
    }

    async fn delete_user(&self, id: &str) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;

        if result.rows_affected() == 0 {
            return Err(ModelError::NotFound);
        }
        Ok(())
    }

    async fn list_tickets(&self, filter: &TicketFilter) -> StoreResult<Vec<TicketDetails>> {
        let mut query = QueryBuilder::<Postgres>::new(format!(
            r#"
            SELECT {TICKET_COLUMNS},
                u.admin AS owner_admin, u.student_number AS owner_student_number,
                u.full_name AS owner_full_name, u.pfp_url AS owner_pfp_url,
                e.name AS event_name, e.description AS event_description,
                e.img_urls AS event_img_urls,
                e.location AS event_location, e.address AS event_address,
                e.start_timestamp AS event_start_timestamp, e.end_timestamp AS event_end_timestamp,
                e.custom_fields_schema AS event_custom_fields_schema
            FROM tickets t
            JOIN users u ON u.id = t.owner
            JOIN events e ON e.id = t.event
            "#
        ));
        push_ticket_filter(&mut query, filter);
        query.push(" ORDER BY t.timestamp");

        let rows: Vec<TicketDetailsRow> = query
            .build_query_as()
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;
        rows.into_iter().map(TicketDetails::try_from).collect()
    }

    async fn count_tickets(&self, filter: &TicketFilter) -> StoreResult<u64> {
        let mut query = QueryBuilder::<Postgres>::new(
            "SELECT COUNT(*) FROM tickets t JOIN users u ON u.id = t.owner",
        );
        push_ticket_filter(&mut query, filter);

        let count: i64 = query.build_query_scalar().fetch_one(&self.pool).await.map_err(db_error)?;
        u64::try_from(count).map_err(|_| ModelError::Malformed(format!("negative count {count}")))
    }

    async fn find_ticket(&self, id: Uuid) -> StoreResult<Ticket> {
        let row = sqlx::query_as::<_, TicketRow>(&format!(
            "SELECT {TICKET_COLUMNS} FROM tickets t WHERE t.id = $1"
        ))
        .bind(id)
        .fetch_one(&self.pool)
        .await
        .map_err(db_error)?;
        Ticket::try_from(row)
    }

    async fn search_ticket(&self, event: Uuid, owner: &str) -> StoreResult<Ticket> {
        let row = sqlx::query_as::<_, TicketRow>(&format!(
            "SELECT {TICKET_COLUMNS} FROM tickets t WHERE t.event = $1 AND t.owner = $2"
        ))
        .bind(event)
        .bind(owner)
        .fetch_one(&self.pool)
        .await
        .map_err(db_error)?;
        Ticket::try_from(row)
    }

    async fn ticket_exists(&self, filter: &TicketFilter) -> StoreResult<bool> {
        let mut query = QueryBuilder::<Postgres>::new(
            "SELECT EXISTS(SELECT 1 FROM tickets t JOIN users u ON u.id = t.owner",
        );
        push_ticket_filter(&mut query, filter);
        query.push(")");

        query.build_query_scalar().fetch_one(&self.pool).await.map_err(db_error)
    }

    async fn create_ticket(&self, ticket: &Ticket) -> StoreResult<Uuid> {
        // unique (owner, event) reports AlreadyExists, the foreign keys report NotFound
        sqlx::query(
            r#"
            INSERT INTO tickets
                (id, owner, event, timestamp, scan_count,
                 last_scan_time, max_scan_count, custom_fields)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(ticket.id)
        .bind(&ticket.owner)
        .bind(ticket.event)
        .bind(ticket.timestamp)
        .bind(to_db_count(ticket.scan_count)?)
        .bind(ticket.last_scan_time)
        .bind(to_db_count(ticket.max_scan_count.as_count())?)
        .bind(Json(&ticket.custom_fields))
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(ticket.id)
    }

    async fn update_ticket(&self, id: Uuid, patch: &TicketPatch) -> StoreResult<()> {
        if patch.is_empty() {
            return Err(ModelError::NoDocumentModified);
        }

        let scan_count = patch.scan_count.map(to_db_count).transpose()?;
        let max_scan_count = patch
            .max_scan_count
            .map(|limit| to_db_count(limit.as_count()))
            .transpose()?;

        let result = sqlx::query(
            r#"
            UPDATE tickets
            SET scan_count = COALESCE($2, scan_count),
                last_scan_time = COALESCE($3, last_scan_time),
                max_scan_count = COALESCE($4, max_scan_count),
                custom_fields = custom_fields || COALESCE($5, '{}'::jsonb)
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(scan_count)
        .bind(patch.last_scan_time)
        .bind(max_scan_count)
        .bind(patch.custom_fields.as_ref().map(Json))
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        if result.rows_affected() == 0 {
            return Err(ModelError::NoDocumentModified);
        }
        Ok(())
    }

    async fn record_scan(&self, id: Uuid, at: DateTime<Utc>) -> StoreResult<ScanRecord> {
        let admitted = sqlx::query_as::<_, TicketRow>(
            r#"
            UPDATE tickets t
            SET scan_count = t.scan_count + 1, last_scan_time = $2
            WHERE t.id = $1 AND (t.max_scan_count = 0 OR t.scan_count < t.max_scan_count)
            RETURNING t.id, t.owner, t.event, t.timestamp, t.scan_count,
                t.last_scan_time, t.max_scan_count, t.custom_fields
            "#,
        )
        .bind(id)
        .bind(at)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        match admitted {
            Some(row) => Ok(ScanRecord::Admitted(Ticket::try_from(row)?)),
            // no row updated: either the ticket is gone or its limit is spent
            None => self.find_ticket(id).await.map(ScanRecord::Rejected),
        }
    }

    async fn delete_ticket(&self, id: Uuid) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM tickets WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;

        if result.rows_affected() == 0 {
            return Err(ModelError::NoDocumentModified);
        }
        Ok(())
    }

    async fn create_queued_ticket(&self, queued: &QueuedTicket) -> StoreResult<Uuid> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;

        let ticketed = sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM tickets t JOIN users u ON u.id = t.owner
                WHERE u.student_number = $1 AND t.event = $2
            )
            "#,
        )
        .bind(&queued.student_number)
        .bind(queued.event_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(db_error)?;
        if ticketed {
            return Err(ModelError::AlreadyExists);
        }

        sqlx::query(&format!(
            "INSERT INTO queued_tickets ({QUEUED_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7)"
        ))
        .bind(queued.id)
        .bind(&queued.student_number)
        .bind(queued.event_id)
        .bind(queued.timestamp)
        .bind(to_db_count(queued.max_scan_count.as_count())?)
        .bind(&queued.full_name_update)
        .bind(Json(&queued.custom_fields))
        .execute(&mut *tx)
        .await
        .map_err(db_error)?;

        tx.commit().await.map_err(db_error)?;
        Ok(queued.id)
    }

    async fn find_queued_ticket(&self, id: Uuid) -> StoreResult<QueuedTicket> {
        let row = sqlx::query_as::<_, QueuedTicketRow>(&format!(
            "SELECT {QUEUED_COLUMNS} FROM queued_tickets WHERE id = $1"
        ))
        .bind(id)
        .fetch_one(&self.pool)
        .await
        .map_err(db_error)?;
        QueuedTicket::try_from(row)
    }

    async fn delete_queued_ticket(&self, id: Uuid) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM queued_tickets WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;

        if result.rows_affected() == 0 {
            return Err(ModelError::NoDocumentModified);
        }
        Ok(())
    }

    async fn list_queued_tickets_for_student(
        &self,
        student_number: &str,
    ) -> StoreResult<Vec<QueuedTicket>> {
        let rows = sqlx::query_as::<_, QueuedTicketRow>(&format!(
            "SELECT {QUEUED_COLUMNS} FROM queued_tickets \
             WHERE student_number = $1 ORDER BY timestamp"
        ))
        .bind(student_number)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;
        rows.into_iter().map(QueuedTicket::try_from).collect()
    }

    async fn list_queued_tickets(&self) -> StoreResult<Vec<QueuedTicket>> {
        let rows = sqlx::query_as::<_, QueuedTicketRow>(&format!(
            "SELECT {QUEUED_COLUMNS} FROM queued_tickets ORDER BY timestamp"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;
        rows.into_iter().map(QueuedTicket::try_from).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_not_found_maps_to_not_found() {
        assert!(db_error(sqlx::Error::RowNotFound).is_not_found());
        assert!(matches!(db_error(sqlx::Error::PoolTimedOut), ModelError::Database(_)));
    }

    #[test]
    fn test_negative_counts_are_malformed() {
        assert_eq!(from_db_count(3).unwrap(), 3);
        assert!(matches!(from_db_count(-1), Err(ModelError::Malformed(_))));
        assert!(matches!(to_db_count(u32::MAX), Err(ModelError::Malformed(_))));
    }
}
