//! Account endpoints: registration, login, logout, recovery.

use axum::{
    extract::{rejection::JsonRejection, State},
    http::HeaderMap,
    Extension, Json,
};
use serde::Serialize;
use serde_json::Value;

use crate::{
    auth::{create_session, extract_bearer_token, AuthUser},
    crypto::{self, constant_time_eq, generate_encryption_key, hash_password, verify_password},
    error::{ApiError, ApiResult},
    models::{NewUser, User, UserProfile},
    validation, AppState,
};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponse {
    pub user: UserProfile,
    pub session_token: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryKeyResponse {
    pub recovery_key: String,
}

async fn issue_session(state: &AppState, user: &User) -> ApiResult<Json<AuthResponse>> {
    let session = create_session(state.store.as_ref(), user.id).await?;
    Ok(Json(AuthResponse {
        user: UserProfile::from(user),
        session_token: session.token,
    }))
}

pub async fn generate_recovery_key() -> Json<RecoveryKeyResponse> {
    Json(RecoveryKeyResponse {
        recovery_key: crypto::generate_recovery_key(),
    })
}

pub async fn register(
    State(state): State<AppState>,
    payload: Result<Json<Value>, JsonRejection>,
) -> ApiResult<Json<AuthResponse>> {
    let body = validation::json_object(payload)?;
    let req = validation::registration(&body)?;

    let password_hash = hash_password(&req.password, state.bcrypt_cost).await?;
    let user = state
        .store
        .create_user(NewUser {
            username: req.username,
            password_hash,
            recovery_key: req.recovery_key,
            encryption_key: generate_encryption_key(),
        })
        .await?;

    log::info!("Registered user {}", user.username);
    issue_session(&state, &user).await
}

pub async fn login(
    State(state): State<AppState>,
    payload: Result<Json<Value>, JsonRejection>,
) -> ApiResult<Json<AuthResponse>> {
    let body = validation::json_object(payload)?;
    let req = validation::credentials(&body)?;

    let user = state.store.find_user_by_username(&req.username).await?;
    let hash = user
        .as_ref()
        .map_or(state.dummy_hash.as_str(), |u| u.password_hash.as_str());

    // A malformed stored hash counts as a failed comparison.
    let password_valid = verify_password(&req.password, hash).await.unwrap_or(false);

    match user {
        Some(user) if password_valid => {
            log::info!("User {} logged in", user.username);
            issue_session(&state, &user).await
        }
        _ => Err(ApiError::InvalidCredentials),
    }
}

pub async fn logout(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<Value>> {
    if let Some(token) = extract_bearer_token(&headers) {
        state.store.delete_session(&token).await?;
        log::info!("Session closed");
    }
    Ok(Json(serde_json::json!({"message": "Logged out successfully"})))
}

pub async fn me(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
) -> ApiResult<Json<UserProfile>> {
    let user = state
        .store
        .find_user(auth.user_id)
        .await?
        .ok_or(ApiError::NotFound)?;
    Ok(Json(UserProfile::from(&user)))
}

/// Sets a new password for the account whose recovery key matches and
/// issues a fresh session.
pub async fn recover(
    State(state): State<AppState>,
    payload: Result<Json<Value>, JsonRejection>,
) -> ApiResult<Json<AuthResponse>> {
    let body = validation::json_object(payload)?;
    let req = validation::recovery(&body)?;

    let user = state
        .store
        .find_user_by_username(&req.username)
        .await?
        .filter(|u| constant_time_eq(&u.recovery_key, &req.recovery_key))
        .ok_or(ApiError::InvalidCredentials)?;

    let password_hash = hash_password(&req.new_password, state.bcrypt_cost).await?;
    if !state.store.update_password(user.id, &password_hash).await? {
        return Err(ApiError::InvalidCredentials);
    }

    log::info!("Password reset through recovery key for {}", user.username);
    issue_session(&state, &user).await
}
