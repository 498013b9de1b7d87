//! Bearer authentication extractor
//!
//! Caller authentication proper is an upstream concern; this service
//! receives a bearer token whose subject identifies the user. The extractor
//! enforces presence and shape, and every session read compares the subject
//! to the session's owner.

use async_trait::async_trait;
use axum::{extract::FromRequestParts, http::request::Parts};

use crate::api::error::ApiError;

/// The authenticated user subject from the Authorization header
#[derive(Debug, Clone)]
pub struct AuthedUser(pub String);

#[async_trait]
impl<S> FromRequestParts<S> for AuthedUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or(ApiError::MissingBearerToken)?;

        let token = header
            .strip_prefix("Bearer ")
            .or_else(|| header.strip_prefix("bearer "))
            .ok_or(ApiError::MissingBearerToken)?
            .trim();

        if token.is_empty() {
            return Err(ApiError::InvalidToken);
        }

        Ok(AuthedUser(token.to_string()))
    }
}
