//! Identity platform client built on the Identity Toolkit REST API.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use thiserror::Error;
use tracing::{debug, warn};

use super::AccessTokenSource;

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("token is invalid or expired")]
    InvalidToken,

    #[error("identity record not found")]
    UserNotFound,

    #[error("identity request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("identity platform returned {status}: {message}")]
    Api { status: StatusCode, message: String },

    #[error("malformed identity response: {0}")]
    Malformed(String),
}

/// Subject and custom claims of a verified bearer token.
#[derive(Debug, Clone, PartialEq)]
pub struct VerifiedToken {
    pub uid: String,
    pub claims: Map<String, Value>,
}

impl VerifiedToken {
    pub fn new(uid: impl Into<String>, claims: Map<String, Value>) -> Self {
        Self {
            uid: uid.into(),
            claims,
        }
    }

    /// Whether a boolean custom claim is present and true.
    pub fn has_claim(&self, name: &str) -> bool {
        self.claims.get(name).and_then(Value::as_bool).unwrap_or(false)
    }

    pub fn is_admin(&self) -> bool {
        self.has_claim("admin")
    }

    pub fn is_superadmin(&self) -> bool {
        self.has_claim("superadmin")
    }
}

/// The profile fields copied into a user record at registration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IdentityRecord {
    pub uid: String,
    pub display_name: String,
    pub photo_url: String,
    pub email: String,
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn verify_token(&self, token: &str) -> Result<VerifiedToken, IdentityError>;

    async fn get_user_record(&self, uid: &str) -> Result<IdentityRecord, IdentityError>;

    /// Replaces every custom claim of the account.
    async fn set_custom_claims(
        &self,
        uid: &str,
        claims: Map<String, Value>,
    ) -> Result<(), IdentityError>;

    async fn delete_user(&self, uid: &str) -> Result<(), IdentityError>;
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccountInfo {
    local_id: String,
    #[serde(default)]
    email: String,
    #[serde(default)]
    display_name: String,
    #[serde(default)]
    photo_url: String,
    /// Custom claims as a JSON-encoded object.
    #[serde(default)]
    custom_attributes: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LookupResponse {
    #[serde(default)]
    users: Vec<AccountInfo>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

impl AccountInfo {
    fn claims(&self) -> Result<Map<String, Value>, IdentityError> {
        match self.custom_attributes.as_deref() {
            None | Some("") => Ok(Map::new()),
            Some(raw) => {
                serde_json::from_str(raw).map_err(|e| IdentityError::Malformed(e.to_string()))
            }
        }
    }
}

impl From<AccountInfo> for IdentityRecord {
    fn from(account: AccountInfo) -> Self {
        IdentityRecord {
            uid: account.local_id,
            display_name: account.display_name,
            photo_url: account.photo_url,
            email: account.email,
        }
    }
}

/// Firebase / Identity Platform accounts through `identitytoolkit.googleapis.com`.
#[derive(Debug)]
pub struct FirebaseIdentity {
    http: Client,
    base_url: String,
    project_id: String,
    api_key: String,
    tokens: AccessTokenSource,
}

impl FirebaseIdentity {
    pub fn new(
        http: Client,
        base_url: impl Into<String>,
        project_id: impl Into<String>,
        api_key: impl Into<String>,
        tokens: AccessTokenSource,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            project_id: project_id.into(),
            api_key: api_key.into(),
            tokens,
        }
    }

    fn admin_url(&self, method: &str) -> String {
        format!("{}/v1/projects/{}/accounts:{}", self.base_url, self.project_id, method)
    }

    /// Sends an admin call and returns the response body, mapping API failures.
    async fn admin_call(&self, method: &str, body: Value) -> Result<Value, IdentityError> {
        let token = self.tokens.token().await?;
        let response = self
            .http
            .post(self.admin_url(method))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await?;
        read_response(response).await
    }
}

async fn read_response(response: reqwest::Response) -> Result<Value, IdentityError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response.json().await?);
    }

    let message = response
        .json::<ApiErrorBody>()
        .await
        .map(|body| body.error.message)
        .unwrap_or_else(|_| status.to_string());
    if message.starts_with("USER_NOT_FOUND") {
        return Err(IdentityError::UserNotFound);
    }
    if message.starts_with("INVALID_ID_TOKEN") || message.starts_with("TOKEN_EXPIRED") {
        return Err(IdentityError::InvalidToken);
    }
    Err(IdentityError::Api { status, message })
}

fn first_account(body: Value) -> Result<AccountInfo, IdentityError> {
    let lookup: LookupResponse =
        serde_json::from_value(body).map_err(|e| IdentityError::Malformed(e.to_string()))?;
    lookup.users.into_iter().next().ok_or(IdentityError::UserNotFound)
}

#[async_trait]
impl IdentityProvider for FirebaseIdentity {
    async fn verify_token(&self, token: &str) -> Result<VerifiedToken, IdentityError> {
        let response = self
            .http
            .post(format!("{}/v1/accounts:lookup", self.base_url))
            .query(&[("key", self.api_key.as_str())])
            .json(&json!({ "idToken": token }))
            .send()
            .await?;

        let account = match read_response(response).await.and_then(first_account) {
            Ok(account) => account,
            Err(IdentityError::UserNotFound) => return Err(IdentityError::InvalidToken),
            Err(IdentityError::Api { status, message }) if status == StatusCode::BAD_REQUEST => {
                warn!(message = %message, "Rejected bearer token");
                return Err(IdentityError::InvalidToken);
            }
            Err(e) => return Err(e),
        };

        let claims = account.claims()?;
        debug!(uid = %account.local_id, "Verified bearer token");
        Ok(VerifiedToken::new(account.local_id, claims))
    }

    async fn get_user_record(&self, uid: &str) -> Result<IdentityRecord, IdentityError> {
        let body = self.admin_call("lookup", json!({ "localId": [uid] })).await?;
        first_account(body).map(IdentityRecord::from)
    }

    async fn set_custom_claims(
        &self,
        uid: &str,
        claims: Map<String, Value>,
    ) -> Result<(), IdentityError> {
        let encoded = Value::Object(claims).to_string();
        self.admin_call("update", json!({ "localId": uid, "customAttributes": encoded }))
            .await?;
        Ok(())
    }

    async fn delete_user(&self, uid: &str) -> Result<(), IdentityError> {
        self.admin_call("delete", json!({ "localId": uid })).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> FirebaseIdentity {
        FirebaseIdentity::new(
            Client::new(),
            server.uri(),
            "fraser-test",
            "api-key",
            AccessTokenSource::Static("access".to_string()),
        )
    }

    #[tokio::test]
    async fn test_verify_token_reads_custom_claims() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/accounts:lookup"))
            .and(query_param("key", "api-key"))
            .and(body_partial_json(json!({"idToken": "good-token"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "users": [{"localId": "uid-1", "customAttributes": "{\"admin\":true}"}]
            })))
            .mount(&server)
            .await;

        let verified = client(&server).verify_token("good-token").await.unwrap();
        assert_eq!(verified.uid, "uid-1");
        assert!(verified.is_admin());
        assert!(!verified.is_superadmin());
    }

    #[tokio::test]
    async fn test_verify_token_rejects_invalid_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/accounts:lookup"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": {"code": 400, "message": "INVALID_ID_TOKEN"}
            })))
            .mount(&server)
            .await;

        let result = client(&server).verify_token("bad-token").await;
        assert!(matches!(result, Err(IdentityError::InvalidToken)));
    }

    #[tokio::test]
    async fn test_get_user_record_uses_admin_endpoint() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/projects/fraser-test/accounts:lookup"))
            .and(header("authorization", "Bearer access"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "users": [{
                    "localId": "uid-2",
                    "email": "123456@students.example.org",
                    "displayName": "Grace Hopper",
                    "photoUrl": "https://example.org/p.png"
                }]
            })))
            .mount(&server)
            .await;

        let record = client(&server).get_user_record("uid-2").await.unwrap();
        assert_eq!(record.display_name, "Grace Hopper");
        assert_eq!(record.email, "123456@students.example.org");
    }

    #[tokio::test]
    async fn test_missing_account_maps_to_user_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/projects/fraser-test/accounts:lookup"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .mount(&server)
            .await;

        let result = client(&server).get_user_record("nobody").await;
        assert!(matches!(result, Err(IdentityError::UserNotFound)));
    }

    #[tokio::test]
    async fn test_set_custom_claims_sends_encoded_attributes() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/projects/fraser-test/accounts:update"))
            .and(body_partial_json(
                json!({"localId": "uid-3", "customAttributes": "{\"admin\":true}"}),
            ))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"localId": "uid-3"})))
            .expect(1)
            .mount(&server)
            .await;

        let mut claims = Map::new();
        claims.insert("admin".to_string(), Value::Bool(true));
        client(&server).set_custom_claims("uid-3", claims).await.unwrap();
    }
}
