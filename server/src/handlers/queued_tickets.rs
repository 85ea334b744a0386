use axum::extract::{Path, State};
use axum::response::Response;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::models::{CustomFields, ModelError, QueuedTicket, ScanLimit, Ticket};
use crate::services::convert;
use crate::state::AppState;
use crate::utils::auth::AdminUser;
use crate::utils::error::AppError;
use crate::utils::json::{parse_id, JsonBody};
use crate::utils::response::{empty_success, success};

use super::{audit, check_custom_fields, or_not_found};

const CONTROLLER: &str = "queued_ticket";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateQueuedTicketRequest {
    pub student_number: String,
    #[serde(rename = "eventID")]
    pub event_id: String,
    #[serde(default)]
    pub max_scan_count: u32,
    #[serde(default)]
    pub custom_fields: CustomFields,
    #[serde(default)]
    pub full_name_update: Option<String>,
}

/// Result of queueing a ticket: converted straight away, or left for the student to register.
#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum QueuedTicketCreated {
    Converted { ticket: Ticket },
    Queued {
        #[serde(rename = "queuedTicket")]
        queued_ticket: QueuedTicket,
    },
}

pub async fn create_queued_ticket(
    State(state): State<AppState>,
    admin: AdminUser,
    JsonBody(request): JsonBody<CreateQueuedTicketRequest>,
) -> Result<Response, AppError> {
    let event_id = parse_id(&request.event_id, "event")?;
    let student_number = request.student_number.trim();
    if student_number.is_empty() {
        return Err(AppError::ValidationError("studentNumber must not be empty".to_string()));
    }

    let event = state.store.find_event(event_id).await.map_err(or_not_found("Event"))?;
    check_custom_fields(&event, &request.custom_fields)?;

    let mut queued = QueuedTicket::new(
        student_number,
        event_id,
        ScanLimit::from(request.max_scan_count),
        request.custom_fields,
    );
    if let Some(name) = request.full_name_update {
        queued = queued.with_full_name_update(name);
    }
    state.store.create_queued_ticket(&queued).await?;

    let created = match convert(state.store.as_ref(), &queued, true).await {
        Ok(ticket) => QueuedTicketCreated::Converted { ticket },
        Err(ModelError::NotFound) => QueuedTicketCreated::Queued { queued_ticket: queued },
        Err(ModelError::AlreadyExists) => {
            return Err(AppError::Conflict(
                "Student already holds a ticket for this event".to_string(),
            ));
        }
        Err(e) => {
            warn!(
                error = %e,
                queued_ticket = %queued.id,
                "Immediate conversion failed, ticket stays queued"
            );
            QueuedTicketCreated::Queued { queued_ticket: queued }
        }
    };

    audit(CONTROLLER, "create", admin.uid(), true);
    let message = match created {
        QueuedTicketCreated::Converted { .. } => "Ticket created",
        QueuedTicketCreated::Queued { .. } => "Ticket queued",
    };
    Ok(success(created, message))
}

pub async fn list_queued_tickets(
    State(state): State<AppState>,
    admin: AdminUser,
) -> Result<Response, AppError> {
    let queued = state.store.list_queued_tickets().await?;
    audit(CONTROLLER, "list", admin.uid(), true);
    Ok(success(queued, "Queued tickets retrieved"))
}

pub async fn delete_queued_ticket(
    State(state): State<AppState>,
    admin: AdminUser,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    let id = parse_id(&id, "queued ticket")?;
    state
        .store
        .delete_queued_ticket(id)
        .await
        .map_err(or_not_found("Queued ticket"))?;
    audit(CONTROLLER, "delete", admin.uid(), true);
    Ok(empty_success("Queued ticket deleted"))
}
