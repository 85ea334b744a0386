use std::collections::HashMap;

use axum::extract::{Multipart, Path, State};
use axum::response::Response;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::warn;
use uuid::Uuid;

use crate::models::{CustomFieldsSchema, Event, EventPatch, TicketFilter};
use crate::providers::ObjectStorage;
use crate::state::AppState;
use crate::utils::auth::{AdminUser, AuthUser};
use crate::utils::error::AppError;
use crate::utils::json::{parse_id, JsonBody};
use crate::utils::response::{empty_success, success};

use super::audit;

const CONTROLLER: &str = "event";
const MAX_IMAGES: usize = 5;
/// Upper bound for a multipart event submission, images included.
pub const MAX_UPLOAD_BYTES: usize = 30 << 20;

#[derive(Serialize)]
struct TicketCount {
    count: u64,
}

struct Image {
    content_type: String,
    bytes: Vec<u8>,
}

/// Multipart submission of a new event.
#[derive(Default)]
struct EventForm {
    fields: HashMap<String, String>,
    images: Vec<Image>,
}

impl EventForm {
    async fn read(mut multipart: Multipart) -> Result<Self, AppError> {
        let mut form = EventForm::default();
        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| AppError::ValidationError(e.body_text()))?
        {
            let name = field.name().unwrap_or_default().to_string();
            if name == "images" {
                if form.images.len() == MAX_IMAGES {
                    return Err(AppError::ValidationError(format!(
                        "more than {MAX_IMAGES} images provided"
                    )));
                }
                let content_type = field.content_type().unwrap_or_default().to_string();
                if content_type != "image/png" && content_type != "image/jpeg" {
                    return Err(AppError::ValidationError(
                        "non-image file provided, only provide png or jpg files".to_string(),
                    ));
                }
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| AppError::ValidationError(e.body_text()))?;
                form.images.push(Image {
                    content_type,
                    bytes: bytes.to_vec(),
                });
            } else {
                let value = field
                    .text()
                    .await
                    .map_err(|e| AppError::ValidationError(e.body_text()))?;
                form.fields.insert(name, value);
            }
        }
        Ok(form)
    }

    fn required(&self, key: &str) -> Result<String, AppError> {
        self.fields
            .get(key)
            .map(|value| value.trim())
            .filter(|value| !value.is_empty())
            .map(str::to_string)
            .ok_or_else(|| AppError::ValidationError(format!("missing field '{key}'")))
    }

    fn timestamp(&self, key: &str) -> Result<DateTime<Utc>, AppError> {
        let raw = self.required(key)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|parsed| parsed.with_timezone(&Utc))
            .map_err(|e| {
                AppError::ValidationError(format!("'{key}' is not an RFC 3339 timestamp: {e}"))
            })
    }

    fn custom_fields_schema(&self) -> Result<Option<Value>, AppError> {
        let Some(raw) = self
            .fields
            .get("custom_fields_schema")
            .filter(|raw| !raw.trim().is_empty())
        else {
            return Ok(None);
        };
        let schema: Value = serde_json::from_str(raw)
            .map_err(|e| {
                AppError::ValidationError(format!("custom_fields_schema is not valid JSON: {e}"))
            })?;
        CustomFieldsSchema::from_value(&schema).map_err(AppError::ValidationError)?;
        Ok(Some(schema))
    }
}

/// Uploads event images, returning each object's name and public URL.
///
/// A failed upload removes the images already stored for this event.
async fn upload_images(
    storage: &dyn ObjectStorage,
    event_id: Uuid,
    images: Vec<Image>,
) -> Result<Vec<(String, String)>, AppError> {
    let mut uploads: Vec<(String, String)> = Vec::with_capacity(images.len());
    for image in images {
        let extension = if image.content_type == "image/png" { "png" } else { "jpg" };
        let name = format!("{}.{extension}", Uuid::new_v4());
        match storage.put_object(&name, &image.content_type, image.bytes).await {
            Ok(url) => uploads.push((name, url)),
            Err(e) => {
                let names: Vec<String> = uploads.into_iter().map(|(name, _)| name).collect();
                discard_uploads(storage, event_id, &names).await;
                return Err(e.into());
            }
        }
    }
    Ok(uploads)
}

/// Removes images uploaded for an event that was never stored.
async fn discard_uploads(storage: &dyn ObjectStorage, event_id: Uuid, names: &[String]) {
    for name in names {
        if let Err(e) = storage.delete_object(name).await {
            warn!(%event_id, object = %name, error = %e, "Orphaned event image left in storage");
        }
    }
}

pub async fn list_events(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Response, AppError> {
    let events = state.store.list_events().await?;
    audit(CONTROLLER, "list", user.uid(), false);
    Ok(success(events, "Events retrieved"))
}

pub async fn get_event(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    let id = parse_id(&id, "event")?;
    let event = state.store.find_event(id).await?;
    audit(CONTROLLER, "get", user.uid(), false);
    Ok(success(event, "Event retrieved"))
}

pub async fn create_event(
    State(state): State<AppState>,
    admin: AdminUser,
    multipart: Multipart,
) -> Result<Response, AppError> {
    let form = EventForm::read(multipart).await?;

    let start_timestamp = form.timestamp("start_timestamp")?;
    let end_timestamp = form.timestamp("end_timestamp")?;
    Event::validate_window(start_timestamp, end_timestamp).map_err(AppError::ValidationError)?;

    let mut event = Event {
        id: Uuid::new_v4(),
        name: form.required("name")?,
        description: form.required("description")?,
        img_urls: Vec::new(),
        location: form.required("location")?,
        address: form.required("address")?,
        start_timestamp,
        end_timestamp,
        custom_fields_schema: form.custom_fields_schema()?,
    };

    let uploads = upload_images(state.storage.as_ref(), event.id, form.images).await?;
    event.img_urls = uploads.iter().map(|(_, url)| url.clone()).collect();

    if let Err(e) = state.store.create_event(&event).await {
        let names: Vec<String> = uploads.into_iter().map(|(name, _)| name).collect();
        discard_uploads(state.storage.as_ref(), event.id, &names).await;
        return Err(e.into());
    }
    audit(CONTROLLER, "create", admin.uid(), true);
    Ok(success(event, "Event created"))
}

pub async fn list_event_tickets(
    State(state): State<AppState>,
    admin: AdminUser,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    let id = parse_id(&id, "event")?;
    if !state.store.event_exists(id).await? {
        return Err(AppError::not_found("Event"));
    }

    let tickets = state.store.list_tickets(&TicketFilter::by_event(id)).await?;
    audit(CONTROLLER, "get_tickets", admin.uid(), true);
    Ok(success(tickets, "Event tickets retrieved"))
}

pub async fn count_event_tickets(
    State(state): State<AppState>,
    admin: AdminUser,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    let id = parse_id(&id, "event")?;
    if !state.store.event_exists(id).await? {
        return Err(AppError::not_found("Event"));
    }

    let count = state.store.count_tickets(&TicketFilter::by_event(id)).await?;
    audit(CONTROLLER, "get_ticket_count", admin.uid(), true);
    Ok(success(TicketCount { count }, "Event ticket count retrieved"))
}

pub async fn update_event(
    State(state): State<AppState>,
    admin: AdminUser,
    Path(id): Path<String>,
    JsonBody(raw): JsonBody<Map<String, Value>>,
) -> Result<Response, AppError> {
    let id = parse_id(&id, "event")?;
    let patch = EventPatch::try_from(raw)?;
    if !state.store.event_exists(id).await? {
        return Err(AppError::not_found("Event"));
    }

    state.store.update_event(id, &patch).await?;
    audit(CONTROLLER, "update", admin.uid(), true);
    Ok(empty_success("Event updated"))
}

pub async fn delete_event(
    State(state): State<AppState>,
    admin: AdminUser,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    let id = parse_id(&id, "event")?;
    state.store.delete_event(id).await?;
    audit(CONTROLLER, "delete", admin.uid(), true);
    Ok(empty_success("Event deleted"))
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::providers::{MemoryObjectStorage, StorageError};

    /// Accepts a fixed number of uploads, then rejects the rest.
    struct FullBucket {
        inner: MemoryObjectStorage,
        capacity: usize,
    }

    #[async_trait]
    impl ObjectStorage for FullBucket {
        async fn put_object(
            &self,
            name: &str,
            content_type: &str,
            bytes: Vec<u8>,
        ) -> Result<String, StorageError> {
            if self.inner.len() == self.capacity {
                return Err(StorageError::Rejected {
                    name: name.to_string(),
                    status: 507,
                });
            }
            self.inner.put_object(name, content_type, bytes).await
        }

        async fn delete_object(&self, name: &str) -> Result<(), StorageError> {
            self.inner.delete_object(name).await
        }
    }

    fn png() -> Image {
        Image {
            content_type: "image/png".to_string(),
            bytes: b"PNGDATA".to_vec(),
        }
    }

    #[tokio::test]
    async fn test_upload_images_returns_names_and_urls() {
        let storage = MemoryObjectStorage::default();
        let uploads = upload_images(&storage, Uuid::new_v4(), vec![png(), png()])
            .await
            .unwrap();

        assert_eq!(uploads.len(), 2);
        assert_eq!(storage.len(), 2);
        for (name, url) in &uploads {
            assert!(name.ends_with(".png"));
            assert_eq!(url, &format!("memory://bucket/{name}"));
        }
    }

    #[tokio::test]
    async fn test_failed_upload_removes_earlier_images() {
        let storage = FullBucket {
            inner: MemoryObjectStorage::default(),
            capacity: 1,
        };
        let result = upload_images(&storage, Uuid::new_v4(), vec![png(), png()]).await;

        assert!(result.is_err());
        assert!(storage.inner.is_empty());
    }

    #[tokio::test]
    async fn test_discard_uploads_removes_objects() {
        let storage = MemoryObjectStorage::default();
        let uploads = upload_images(&storage, Uuid::new_v4(), vec![png()]).await.unwrap();
        let names: Vec<String> = uploads.into_iter().map(|(name, _)| name).collect();

        discard_uploads(&storage, Uuid::new_v4(), &names).await;
        assert!(storage.is_empty());
    }
}
