use async_trait::async_trait;
use reqwest::Client;
use thiserror::Error;
use tracing::info;

use super::AccessTokenSource;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("upload request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("object storage rejected request for '{name}' with status {status}")]
    Rejected { name: String, status: u16 },
}

#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Stores `bytes` under `name` and returns the object's public URL.
    async fn put_object(
        &self,
        name: &str,
        content_type: &str,
        bytes: Vec<u8>,
    ) -> Result<String, StorageError>;

    /// Removes the object stored under `name`. A missing object is not an error.
    async fn delete_object(&self, name: &str) -> Result<(), StorageError>;
}

/// Google Cloud Storage bucket written through the JSON media upload API.
#[derive(Debug)]
pub struct GcsStorage {
    http: Client,
    base_url: String,
    bucket: String,
    tokens: AccessTokenSource,
}

impl GcsStorage {
    pub fn new(
        http: Client,
        base_url: impl Into<String>,
        bucket: impl Into<String>,
        tokens: AccessTokenSource,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            bucket: bucket.into(),
            tokens,
        }
    }

    pub fn public_url(&self, name: &str) -> String {
        format!("{}/{}/{}", self.base_url, self.bucket, name)
    }
}

#[async_trait]
impl ObjectStorage for GcsStorage {
    async fn put_object(
        &self,
        name: &str,
        content_type: &str,
        bytes: Vec<u8>,
    ) -> Result<String, StorageError> {
        let token = self.tokens.token().await?;
        let size = bytes.len();
        let response = self
            .http
            .post(format!("{}/upload/storage/v1/b/{}/o", self.base_url, self.bucket))
            .query(&[("uploadType", "media"), ("name", name)])
            .bearer_auth(token)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(bytes)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(StorageError::Rejected {
                name: name.to_string(),
                status: response.status().as_u16(),
            });
        }

        info!(bucket = %self.bucket, object = %name, size, "Uploaded object");
        Ok(self.public_url(name))
    }

    async fn delete_object(&self, name: &str) -> Result<(), StorageError> {
        let token = self.tokens.token().await?;
        let response = self
            .http
            .delete(format!("{}/storage/v1/b/{}/o/{}", self.base_url, self.bucket, name))
            .bearer_auth(token)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() && status != reqwest::StatusCode::NOT_FOUND {
            return Err(StorageError::Rejected {
                name: name.to_string(),
                status: status.as_u16(),
            });
        }

        info!(bucket = %self.bucket, object = %name, "Deleted object");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn media_bucket(server: &MockServer) -> GcsStorage {
        GcsStorage::new(
            Client::new(),
            server.uri(),
            "media",
            AccessTokenSource::Static("t".into()),
        )
    }

    #[tokio::test]
    async fn test_put_object_returns_public_url() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/upload/storage/v1/b/media/o"))
            .and(query_param("name", "events/poster.png"))
            .and(header("content-type", "image/png"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"name": "events/poster.png"})),
            )
            .mount(&server)
            .await;

        let storage = media_bucket(&server);
        let url = storage
            .put_object("events/poster.png", "image/png", vec![1, 2, 3])
            .await
            .unwrap();
        assert_eq!(url, format!("{}/media/events/poster.png", server.uri()));
    }

    #[tokio::test]
    async fn test_put_object_reports_rejection() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let storage = media_bucket(&server);
        let result = storage.put_object("x.png", "image/png", vec![]).await;
        assert!(matches!(result, Err(StorageError::Rejected { status: 403, .. })));
    }

    #[tokio::test]
    async fn test_delete_object_tolerates_missing_object() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/storage/v1/b/media/o/gone.png"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/storage/v1/b/media/o/poster.png"))
            .and(header("authorization", "Bearer t"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let storage = media_bucket(&server);
        storage.delete_object("poster.png").await.unwrap();
        storage.delete_object("gone.png").await.unwrap();
    }

    #[tokio::test]
    async fn test_delete_object_reports_rejection() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let result = media_bucket(&server).delete_object("poster.png").await;
        assert!(matches!(result, Err(StorageError::Rejected { status: 403, .. })));
    }
}
