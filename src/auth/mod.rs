/*!
 * # Authentication
 *
 * Bearer JWTs (HS256) carry the caller's id, role and optional department or
 * warehouse binding. Handlers receive the resolved [`Actor`] through the
 * [`AuthenticatedActor`] extractor; every authorization decision past that
 * point belongs to the services.
 */

use std::sync::Arc;

use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::{header, request::Parts, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::models::{Actor, Role};

pub const DEFAULT_TOKEN_TTL_MINUTES: i64 = 60;

/// JWT claims.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub department_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warehouse_id: Option<Uuid>,
    pub iat: i64,
    pub exp: i64,
}

impl Claims {
    pub fn for_actor(actor: &Actor, ttl: Duration) -> Self {
        let now = Utc::now();
        Self {
            sub: actor.id,
            role: actor.role,
            department_id: actor.department_id,
            warehouse_id: actor.warehouse_id,
            iat: now.timestamp(),
            exp: (now + ttl).timestamp(),
        }
    }

    pub fn actor(&self) -> Actor {
        Actor {
            id: self.sub,
            role: self.role,
            department_id: self.department_id,
            warehouse_id: self.warehouse_id,
        }
    }
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Missing token")]
    MissingToken,

    #[error("Invalid token")]
    InvalidToken,

    #[error("Token has expired")]
    TokenExpired,

    #[error("Token creation failed: {0}")]
    TokenCreation(String),
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, error_code, error_message): (StatusCode, &str, String) = match &self {
            Self::MissingToken => (
                StatusCode::UNAUTHORIZED,
                "AUTH_MISSING_TOKEN",
                "No authentication token provided".to_string(),
            ),
            Self::InvalidToken => (
                StatusCode::UNAUTHORIZED,
                "AUTH_INVALID_TOKEN",
                "Invalid authentication token".to_string(),
            ),
            Self::TokenExpired => (
                StatusCode::UNAUTHORIZED,
                "AUTH_TOKEN_EXPIRED",
                "Token has expired".to_string(),
            ),
            Self::TokenCreation(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "AUTH_TOKEN_CREATION_FAILED",
                "Token could not be issued".to_string(),
            ),
        };

        let body = Json(serde_json::json!({
            "error": error_code,
            "message": error_message,
            "timestamp": Utc::now().to_rfc3339(),
        }));

        (status, body).into_response()
    }
}

/// Signs and verifies bearer tokens with a shared secret.
#[derive(Clone)]
pub struct JwtAuth {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl JwtAuth {
    pub fn new(secret: &str) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
        }
    }

    pub fn issue_token(&self, actor: &Actor, ttl: Duration) -> Result<String, AuthError> {
        encode(
            &Header::new(Algorithm::HS256),
            &Claims::for_actor(actor, ttl),
            &self.encoding,
        )
        .map_err(|e| AuthError::TokenCreation(e.to_string()))
    }

    pub fn validate_token(&self, token: &str) -> Result<Claims, AuthError> {
        decode::<Claims>(token, &self.decoding, &Validation::new(Algorithm::HS256))
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::TokenExpired,
                _ => {
                    debug!(error = %e, "Rejected bearer token");
                    AuthError::InvalidToken
                }
            })
    }
}

fn bearer_token(parts: &Parts) -> Option<&str> {
    parts
        .headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// The caller resolved from the `Authorization: Bearer` header.
#[derive(Debug, Clone)]
pub struct AuthenticatedActor(pub Actor);

#[async_trait]
impl<S> FromRequestParts<S> for AuthenticatedActor
where
    S: Send + Sync,
    Arc<JwtAuth>: FromRef<S>,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let auth = Arc::<JwtAuth>::from_ref(state);
        let token = bearer_token(parts).ok_or(AuthError::MissingToken)?;
        let claims = auth.validate_token(token)?;
        Ok(AuthenticatedActor(claims.actor()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    const SECRET: &str = "k9Vq2LxT8bWm4RzY1nHc6JdF0sPa3GeU";

    #[test]
    fn token_round_trips_the_actor() {
        let auth = JwtAuth::new(SECRET);
        let actor = Actor::new(Uuid::new_v4(), Role::Warehouse).with_warehouse(Uuid::new_v4());

        let token = auth.issue_token(&actor, Duration::minutes(5)).unwrap();
        let claims = auth.validate_token(&token).unwrap();

        assert_eq!(claims.actor(), actor);
    }

    #[test]
    fn expired_and_foreign_tokens_are_rejected() {
        let auth = JwtAuth::new(SECRET);
        let actor = Actor::new(Uuid::new_v4(), Role::Driver);

        let expired = auth.issue_token(&actor, Duration::hours(-2)).unwrap();
        assert_matches!(auth.validate_token(&expired), Err(AuthError::TokenExpired));

        let other = JwtAuth::new("another-secret-that-is-long-enough!!")
            .issue_token(&actor, Duration::minutes(5))
            .unwrap();
        assert_matches!(auth.validate_token(&other), Err(AuthError::InvalidToken));
    }

    #[test]
    fn bearer_header_is_parsed() {
        let (mut parts, _) = axum::http::Request::builder()
            .header(header::AUTHORIZATION, "Bearer abc.def.ghi")
            .body(())
            .unwrap()
            .into_parts();
        assert_eq!(bearer_token(&parts), Some("abc.def.ghi"));

        parts.headers.insert(header::AUTHORIZATION, "Basic xyz".parse().unwrap());
        assert_eq!(bearer_token(&parts), None);
    }
}
