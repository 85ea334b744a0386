use std::time::{Duration, Instant};

use reqwest::Client;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::debug;

const METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";

/// Tokens are refreshed this long before they actually expire.
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize)]
struct MetadataToken {
    access_token: String,
    expires_in: u64,
}

#[derive(Debug)]
pub struct CachedToken {
    value: String,
    refresh_at: Instant,
}

/// Where OAuth access tokens for Google APIs come from.
#[derive(Debug)]
pub enum AccessTokenSource {
    /// A fixed token, typically `GOOGLE_ACCESS_TOKEN` during development.
    Static(String),
    /// The compute metadata server, with the last token cached until shortly before expiry.
    Metadata {
        http: Client,
        url: String,
        cache: Mutex<Option<CachedToken>>,
    },
}

impl AccessTokenSource {
    pub fn from_env_token(token: Option<String>, http: Client) -> Self {
        match token.filter(|token| !token.is_empty()) {
            Some(token) => AccessTokenSource::Static(token),
            None => AccessTokenSource::metadata(http, METADATA_TOKEN_URL),
        }
    }

    pub fn metadata(http: Client, url: impl Into<String>) -> Self {
        AccessTokenSource::Metadata {
            http,
            url: url.into(),
            cache: Mutex::new(None),
        }
    }

    pub async fn token(&self) -> Result<String, reqwest::Error> {
        let (http, url, cache) = match self {
            AccessTokenSource::Static(token) => return Ok(token.clone()),
            AccessTokenSource::Metadata { http, url, cache } => (http, url, cache),
        };

        let mut cached = cache.lock().await;
        if let Some(token) = cached.as_ref().filter(|token| Instant::now() < token.refresh_at) {
            return Ok(token.value.clone());
        }

        let fresh: MetadataToken = http
            .get(url)
            .header("Metadata-Flavor", "Google")
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        debug!(expires_in = fresh.expires_in, "Fetched access token from metadata server");

        let lifetime = Duration::from_secs(fresh.expires_in).saturating_sub(EXPIRY_MARGIN);
        *cached = Some(CachedToken {
            value: fresh.access_token.clone(),
            refresh_at: Instant::now() + lifetime,
        });
        Ok(fresh.access_token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_static_token_is_returned_as_is() {
        let source = AccessTokenSource::from_env_token(Some("abc".to_string()), Client::new());
        assert_eq!(source.token().await.unwrap(), "abc");
    }

    #[tokio::test]
    async fn test_metadata_token_is_cached() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/token"))
            .and(header("Metadata-Flavor", "Google"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "ya29.token",
                "expires_in": 3599,
                "token_type": "Bearer"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let source = AccessTokenSource::metadata(Client::new(), format!("{}/token", server.uri()));
        assert_eq!(source.token().await.unwrap(), "ya29.token");
        assert_eq!(source.token().await.unwrap(), "ya29.token");
    }
}
