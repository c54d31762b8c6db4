use axum::{
    extract::{FromRef, FromRequestParts},
    http::{header, request::Parts},
};
use chrono::{DateTime, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode, errors::ErrorKind};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    config::{AppConfig, Env},
    error::AppError,
    models::Session,
    repository::RepositoryState,
};

/// Claims
///
/// Payload of a session token. The token only proves which session row it was issued
/// for; the row itself is the source of truth, so deleting it revokes the token.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// Subject: the user's id.
    pub sub: Uuid,
    /// Session id: primary key of the `sessions` row created at login.
    pub sid: Uuid,
    /// Expiration time, seconds since epoch. Matches the session's `expires_at`.
    pub exp: usize,
    /// Issued at, seconds since epoch.
    pub iat: usize,
}

/// Signs a session token for `session` with the configured secret.
pub fn issue_token(config: &AppConfig, session: &Session) -> Result<String, AppError> {
    let claims = Claims {
        sub: session.user_id,
        sid: session.id,
        exp: session.expires_at.timestamp().max(0) as usize,
        iat: session.created_at.timestamp().max(0) as usize,
    };
    let key = EncodingKey::from_secret(config.session_secret.as_bytes());
    encode(&Header::default(), &claims, &key)
        .map_err(|e| AppError::Internal(format!("token signing failed: {}", e)))
}

/// Verifies signature and expiry of a session token and returns its claims.
pub fn decode_token(config: &AppConfig, token: &str) -> Result<Claims, AppError> {
    let key = DecodingKey::from_secret(config.session_secret.as_bytes());
    let mut validation = Validation::default();
    validation.validate_exp = true;

    decode::<Claims>(token, &key, &validation)
        .map(|data| data.claims)
        .map_err(|e| {
            match e.kind() {
                ErrorKind::ExpiredSignature => tracing::debug!("rejected expired session token"),
                _ => tracing::warn!("rejected malformed session token: {}", e),
            }
            AppError::Unauthorized
        })
}

/// AuthUser
///
/// The resolved identity of an authenticated request. Handlers take it as an argument
/// and use `id` to scope every ficha query to its owner.
#[derive(Debug, Clone)]
pub struct AuthUser {
    /// Primary key of the `users` row.
    pub id: Uuid,
    pub username: String,
    /// The session backing this request. None only for the local `x-user-id` bypass.
    pub session_id: Option<Uuid>,
}

/// AuthUser Extractor Implementation
///
/// Implements Axum's `FromRequestParts`, so any handler that lists `AuthUser` among its
/// arguments is authenticated before its body runs. Repository and config are pulled
/// from the application state through `FromRef`.
///
/// 1. Local bypass: in `Env::Local` an `x-user-id` header naming an existing user is accepted.
/// 2. Bearer token: signature and `exp` are checked.
/// 3. Session lookup: the session row must exist, belong to the token's subject and be unexpired.
/// 4. User lookup: the user must still exist.
///
/// Any failure rejects with 401.
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    RepositoryState: FromRef<S>,
    AppConfig: FromRef<S>,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        // 1. Dependency Resolution
        let repo = RepositoryState::from_ref(state);
        let config = AppConfig::from_ref(state);

        // 2. Local Development Bypass
        // Only honoured outside production, and only for ids that map to a real user.
        // An unknown id falls through to the bearer check.
        if config.env == Env::Local {
            let bypass_id = parts
                .headers
                .get("x-user-id")
                .and_then(|value| value.to_str().ok())
                .and_then(|id_str| Uuid::parse_str(id_str).ok());
            if let Some(user_id) = bypass_id {
                if let Some(user) = repo.get_user(user_id).await? {
                    return Ok(AuthUser {
                        id: user.id,
                        username: user.username,
                        session_id: None,
                    });
                }
            }
        }

        // 3. Token Validation
        let token = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .ok_or(AppError::Unauthorized)?;

        let claims = decode_token(&config, token)?;

        // 4. Session Lookup
        // A deleted row (logout, purge) revokes the token even before `exp`.
        let session = repo
            .get_session(claims.sid)
            .await?
            .ok_or(AppError::Unauthorized)?;

        if session.user_id != claims.sub || !session.is_active(Utc::now()) {
            tracing::debug!(session_id = %session.id, "session expired or mismatched");
            return Err(AppError::Unauthorized);
        }

        // 5. User Lookup
        // The user may have been removed after the session was issued.
        let user = repo
            .get_user(claims.sub)
            .await?
            .ok_or(AppError::Unauthorized)?;

        Ok(AuthUser {
            id: user.id,
            username: user.username,
            session_id: Some(session.id),
        })
    }
}

/// Expiry instant for a session created at `now`.
pub fn session_expiry(config: &AppConfig, now: DateTime<Utc>) -> DateTime<Utc> {
    now + chrono::Duration::hours(config.session_ttl_hours)
}
