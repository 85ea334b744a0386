use axum::extract::{Path, State};
use axum::response::Response;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::models::custom_fields::redact_for_user;
use crate::models::{
    CustomFields, CustomFieldsSchema, ScanLimit, Ticket, TicketDetails, TicketFilter, TicketPatch,
    UserKey,
};
use crate::services::admit_scan;
use crate::state::AppState;
use crate::utils::auth::{AdminUser, AuthUser};
use crate::utils::error::AppError;
use crate::utils::json::{parse_id, JsonBody};
use crate::utils::response::{empty_success, success};

use super::{audit, check_custom_fields, or_not_found};

const CONTROLLER: &str = "ticket";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTicketRequest {
    pub student_number: String,
    #[serde(rename = "eventID")]
    pub event_id: String,
    #[serde(default)]
    pub max_scan_count: u32,
    #[serde(default)]
    pub custom_fields: CustomFields,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchTicketRequest {
    pub student_number: String,
    #[serde(rename = "eventID")]
    pub event_id: String,
}

#[derive(Debug, Deserialize)]
pub struct ScanTicketRequest {
    #[serde(rename = "ticketID")]
    pub ticket_id: String,
}

fn redact(tickets: &mut [TicketDetails]) {
    for details in tickets {
        redact_for_user(
            details.event_data.custom_fields_schema.as_ref(),
            &mut details.ticket.custom_fields,
        );
    }
}

async fn find_details(state: &AppState, id: uuid::Uuid) -> Result<TicketDetails, AppError> {
    state
        .store
        .list_tickets(&TicketFilter::by_id(id))
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| AppError::not_found("Ticket"))
}

/// Tickets owned by the caller.
pub async fn list_own_tickets(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Response, AppError> {
    let mut tickets = state.store.list_tickets(&TicketFilter::by_owner(user.uid())).await?;
    if tickets.is_empty() && !state.store.user_exists(user.uid()).await? {
        return Err(AppError::not_found("User"));
    }
    if !user.is_admin() {
        redact(&mut tickets);
    }

    audit(CONTROLLER, "list_self", user.uid(), false);
    Ok(success(tickets, "Tickets retrieved"))
}

pub async fn create_ticket(
    State(state): State<AppState>,
    admin: AdminUser,
    JsonBody(request): JsonBody<CreateTicketRequest>,
) -> Result<Response, AppError> {
    let event_id = parse_id(&request.event_id, "event")?;
    let owner = state
        .store
        .find_user(UserKey::StudentNumber(&request.student_number))
        .await
        .map_err(or_not_found("User"))?;
    if owner.id == admin.uid() && !admin.0.is_superadmin() {
        return Err(AppError::Forbidden(
            "Admins may not issue tickets to themselves".to_string(),
        ));
    }

    let event = state.store.find_event(event_id).await.map_err(or_not_found("Event"))?;
    check_custom_fields(&event, &request.custom_fields)?;

    let ticket = Ticket::new(
        owner.id,
        event.id,
        ScanLimit::from(request.max_scan_count),
        request.custom_fields,
    );
    state.store.create_ticket(&ticket).await?;

    audit(CONTROLLER, "create", admin.uid(), true);
    Ok(success(ticket, "Ticket created"))
}

pub async fn list_all_tickets(
    State(state): State<AppState>,
    admin: AdminUser,
) -> Result<Response, AppError> {
    let tickets = state.store.list_tickets(&TicketFilter::all()).await?;
    audit(CONTROLLER, "list_all", admin.uid(), true);
    Ok(success(tickets, "Tickets retrieved"))
}

pub async fn list_user_tickets(
    State(state): State<AppState>,
    admin: AdminUser,
    Path(uid): Path<String>,
) -> Result<Response, AppError> {
    let tickets = state.store.list_tickets(&TicketFilter::by_owner(&uid)).await?;
    if tickets.is_empty() && !state.store.user_exists(&uid).await? {
        return Err(AppError::not_found("User"));
    }

    audit(CONTROLLER, "list_user", admin.uid(), true);
    Ok(success(tickets, "Tickets retrieved"))
}

pub async fn search_ticket(
    State(state): State<AppState>,
    admin: AdminUser,
    JsonBody(request): JsonBody<SearchTicketRequest>,
) -> Result<Response, AppError> {
    let event_id = parse_id(&request.event_id, "event")?;
    let owner = state
        .store
        .find_user(UserKey::StudentNumber(&request.student_number))
        .await
        .map_err(or_not_found("User"))?;
    let ticket = state
        .store
        .search_ticket(event_id, &owner.id)
        .await
        .map_err(or_not_found("Ticket"))?;

    audit(CONTROLLER, "search", admin.uid(), true);
    Ok(success(ticket, "Ticket found"))
}

pub async fn scan_ticket(
    State(state): State<AppState>,
    admin: AdminUser,
    JsonBody(request): JsonBody<ScanTicketRequest>,
) -> Result<Response, AppError> {
    let ticket_id = parse_id(&request.ticket_id, "ticket")?;
    let receipt = admit_scan(state.store.as_ref(), ticket_id, Utc::now())
        .await
        .map_err(or_not_found("Ticket"))?;

    audit(CONTROLLER, "scan", admin.uid(), true);
    let message = if receipt.processed { "Ticket scanned" } else { "Scan rejected" };
    Ok(success(receipt, message))
}

pub async fn get_ticket(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    let id = parse_id(&id, "ticket")?;
    let mut details = find_details(&state, id).await?;
    if !user.is_admin() {
        if details.ticket.owner != user.uid() {
            return Err(AppError::Forbidden("Not allowed to view this ticket".to_string()));
        }
        redact(std::slice::from_mut(&mut details));
    }

    audit(CONTROLLER, "get", user.uid(), user.is_admin());
    Ok(success(details, "Ticket retrieved"))
}

pub async fn update_ticket(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
    JsonBody(raw): JsonBody<Map<String, Value>>,
) -> Result<Response, AppError> {
    let id = parse_id(&id, "ticket")?;
    let patch = TicketPatch::try_from(raw)?;
    let details = find_details(&state, id).await?;

    if !user.is_admin() {
        if details.ticket.owner != user.uid() {
            return Err(AppError::Forbidden("Not allowed to edit this ticket".to_string()));
        }
        if patch.scan_count.is_some()
            || patch.last_scan_time.is_some()
            || patch.max_scan_count.is_some()
        {
            return Err(AppError::Forbidden("Only custom fields may be edited".to_string()));
        }
        let schema = details
            .event_data
            .custom_fields_schema
            .as_ref()
            .and_then(|raw| CustomFieldsSchema::from_value(raw).ok());
        if let Some(key) = patch.custom_fields.iter().flat_map(|fields| fields.keys()).find(|key| {
            !schema.as_ref().is_some_and(|schema| schema.is_editable(key))
        }) {
            return Err(AppError::Forbidden(format!("Custom field '{key}' is not editable")));
        }
    }

    if let Some(fields) = &patch.custom_fields {
        let mut merged = details.ticket.custom_fields.clone();
        merged.extend(fields.clone());
        check_custom_fields(&details.event_data, &merged)?;
    }

    state.store.update_ticket(id, &patch).await?;
    audit(CONTROLLER, "update", user.uid(), user.is_admin());
    Ok(empty_success("Ticket updated"))
}

pub async fn delete_ticket(
    State(state): State<AppState>,
    admin: AdminUser,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    let id = parse_id(&id, "ticket")?;
    state.store.delete_ticket(id).await.map_err(or_not_found("Ticket"))?;
    audit(CONTROLLER, "delete", admin.uid(), true);
    Ok(empty_success("Ticket deleted"))
}
