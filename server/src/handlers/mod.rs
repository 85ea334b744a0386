use axum::response::Response;
use serde::Serialize;
use tracing::info;

use crate::models::{CustomFields, CustomFieldsSchema, Event, ModelError};
use crate::utils::error::AppError;
use crate::utils::response::success;

pub mod events;
pub mod queued_tickets;
pub mod tickets;
pub mod users;

#[derive(Serialize)]
struct HealthPayload {
    status: &'static str,
    service: &'static str,
}

pub async fn health_check() -> Response {
    let payload = HealthPayload {
        status: "ok",
        service: "frasertickets-api",
    };

    success(payload, "Health check successful")
}

/// Audit trail entry for a completed controller action.
pub(crate) fn audit(
    controller: &'static str,
    action: &'static str,
    requester_uid: &str,
    privileged: bool,
) {
    info!(
        audit = true,
        controller,
        action,
        requester_uid,
        privileged,
        "Audit"
    );
}

/// Maps a store `NotFound` to a 404 naming the missing entity.
pub(crate) fn or_not_found(what: &'static str) -> impl Fn(ModelError) -> AppError {
    move |err| match err {
        ModelError::NotFound | ModelError::NoDocumentModified => AppError::not_found(what),
        other => other.into(),
    }
}

/// Checks a ticket's complete custom field values against the event's schema.
///
/// An event without a schema accepts no custom fields.
pub(crate) fn check_custom_fields(event: &Event, fields: &CustomFields) -> Result<(), AppError> {
    let Some(raw) = event.custom_fields_schema.as_ref() else {
        return match fields.keys().next() {
            None => Ok(()),
            Some(key) => Err(AppError::ValidationError(format!(
                "event has no custom fields, got '{key}'"
            ))),
        };
    };

    let schema = CustomFieldsSchema::from_value(raw).map_err(|e| {
        AppError::InternalServerError(format!(
            "event {} has an unusable custom field schema: {e}",
            event.id
        ))
    })?;
    schema.check(fields).map_err(AppError::ValidationError)
}
