use axum::{
    extract::{Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::Response,
};
use chrono::{Duration, Utc};
use uuid::Uuid;

use crate::{
    crypto::generate_session_token,
    error::ApiError,
    models::Session,
    store::{Store, StoreResult},
    AppState,
};

/// Fixed lifetime of a session from login or registration.
pub const SESSION_TTL_DAYS: i64 = 7;

/// The caller resolved from a bearer token, placed in request extensions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AuthUser {
    pub user_id: Uuid,
}

pub async fn create_session(store: &dyn Store, user_id: Uuid) -> StoreResult<Session> {
    let now = Utc::now();
    let session = Session {
        token: generate_session_token(),
        user_id,
        expires_at: now + Duration::days(SESSION_TTL_DAYS),
        created_at: now,
    };
    store.insert_session(session.clone()).await?;
    Ok(session)
}

pub fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(str::to_string)
}

/// Rejects requests without a live session; otherwise records the caller
/// for the downstream handler.
pub async fn require_session(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = extract_bearer_token(request.headers()).ok_or(ApiError::Unauthorized)?;

    let session = state
        .store
        .resolve_session(&token, Utc::now())
        .await?
        .ok_or_else(|| {
            log::debug!("Rejected unknown or expired session token");
            ApiError::Unauthorized
        })?;

    request.extensions_mut().insert(AuthUser {
        user_id: session.user_id,
    });
    Ok(next.run(request).await)
}
