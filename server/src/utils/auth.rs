//! Request extractors for authenticated callers.

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;

use crate::providers::VerifiedToken;
use crate::state::AppState;
use crate::utils::error::AppError;

/// Token from an `Authorization: Bearer <token>` header.
#[derive(Debug, Clone)]
pub struct BearerToken(pub String);

#[async_trait]
impl<S> FromRequestParts<S> for BearerToken
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .ok_or_else(|| AppError::AuthError("Missing authorization header".to_string()))?;
        let header = header
            .to_str()
            .map_err(|_| AppError::ValidationError("Malformed authorization header".to_string()))?;

        let token = header
            .strip_prefix("Bearer ")
            .ok_or_else(|| AppError::ValidationError("Expected 'Bearer <token>'".to_string()))?
            .trim();
        if token.is_empty() {
            return Err(AppError::AuthError("Empty bearer token".to_string()));
        }

        Ok(Self(token.to_string()))
    }
}

/// Any caller holding a valid identity token.
#[derive(Debug, Clone)]
pub struct AuthUser(pub VerifiedToken);

impl AuthUser {
    pub fn uid(&self) -> &str {
        &self.0.uid
    }

    pub fn is_admin(&self) -> bool {
        self.0.is_admin()
    }

    /// Admins may act on anyone; other callers only on themselves.
    pub fn ensure_self_or_admin(&self, uid: &str) -> Result<(), AppError> {
        if self.is_admin() || self.uid() == uid {
            Ok(())
        } else {
            Err(AppError::Forbidden("Not allowed to access another user's data".to_string()))
        }
    }
}

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let BearerToken(token) = BearerToken::from_request_parts(parts, state).await?;
        let verified = state.identity.verify_token(&token).await?;
        Ok(Self(verified))
    }
}

/// Caller holding the `admin` claim.
#[derive(Debug, Clone)]
pub struct AdminUser(pub VerifiedToken);

impl AdminUser {
    pub fn uid(&self) -> &str {
        &self.0.uid
    }
}

#[async_trait]
impl FromRequestParts<AppState> for AdminUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let AuthUser(verified) = AuthUser::from_request_parts(parts, state).await?;
        if !verified.is_admin() {
            return Err(AppError::Forbidden("Admin privileges required".to_string()));
        }
        Ok(Self(verified))
    }
}
