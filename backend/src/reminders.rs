//! Reminder endpoints. The store does not check ownership for reminders, so
//! every handler here confirms the caller owns the parent event first.

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    Extension, Json,
};
use serde_json::Value;
use uuid::Uuid;

use crate::{
    auth::AuthUser,
    error::{ApiError, ApiResult},
    events::parse_path_id,
    models::Reminder,
    validation, AppState,
};

async fn ensure_event_owned(state: &AppState, event_id: Uuid, user_id: Uuid) -> ApiResult<()> {
    state
        .store
        .get_event(event_id, user_id)
        .await?
        .map(|_| ())
        .ok_or(ApiError::NotFound)
}

pub async fn list_reminders(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(event_id): Path<String>,
) -> ApiResult<Json<Vec<Reminder>>> {
    let event_id = parse_path_id(&event_id)?;
    ensure_event_owned(&state, event_id, auth.user_id).await?;
    let reminders = state.store.list_reminders(event_id).await?;
    Ok(Json(reminders))
}

pub async fn create_reminder(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    payload: Result<Json<Value>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Reminder>)> {
    let body = validation::json_object(payload)?;
    let req = validation::new_reminder(&body)?;
    ensure_event_owned(&state, req.event_id, auth.user_id).await?;

    let reminder = state
        .store
        .create_reminder(req.event_id, req.minutes_before)
        .await?;
    Ok((StatusCode::CREATED, Json(reminder)))
}

pub async fn delete_reminder(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let id = parse_path_id(&id)?;
    let reminder = state.store.get_reminder(id).await?.ok_or(ApiError::NotFound)?;
    ensure_event_owned(&state, reminder.event_id, auth.user_id).await?;

    if !state.store.delete_reminder(id).await? {
        return Err(ApiError::NotFound);
    }
    Ok(Json(serde_json::json!({"message": "Reminder deleted successfully"})))
}
