use crate::{errors::ServiceError, AppState};
use async_trait::async_trait;
use axum::{extract::FromRequestParts, http::header::COOKIE, http::request::Parts};
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Name of the session cookie issued by the external auth service.
pub const SESSION_COOKIE: &str = "token";

/// Claims carried by the session JWT. Issuing and refreshing tokens is the
/// auth service's job; this backend only verifies and decodes them.
#[derive(Debug, Serialize, Deserialize)]
pub struct SessionClaims {
    /// User id
    pub id: Uuid,
    /// Expiry (seconds since epoch)
    pub exp: usize,
}

/// Authenticated storefront user, extracted from the session cookie.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionUser {
    pub id: Uuid,
}

fn cookie_value<'a>(cookie_header: &'a str, name: &str) -> Option<&'a str> {
    cookie_header.split(';').find_map(|pair| {
        let (key, value) = pair.trim().split_once('=')?;
        (key == name).then_some(value)
    })
}

pub fn decode_session(token: &str, secret: &str) -> Result<SessionUser, ServiceError> {
    let data = decode::<SessionClaims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|e| ServiceError::Unauthorized(format!("invalid session token: {}", e)))?;

    Ok(SessionUser {
        id: data.claims.id,
    })
}

#[async_trait]
impl FromRequestParts<AppState> for SessionUser {
    type Rejection = ServiceError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(COOKIE)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ServiceError::Unauthorized("missing session cookie".into()))?;

        let token = cookie_value(header, SESSION_COOKIE)
            .ok_or_else(|| ServiceError::Unauthorized("missing session cookie".into()))?;

        decode_session(token, &state.config.jwt_secret)
    }
}
