use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    Extension, Json,
};
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

use crate::{
    auth::AuthUser,
    error::{ApiError, ApiResult, FieldError},
    models::{CategoryCount, Event},
    store::DateRange,
    validation::{self, parse_timestamp},
    AppState,
};

#[derive(Debug, Default, Deserialize)]
pub struct EventRangeQuery {
    pub start: Option<String>,
    pub end: Option<String>,
}

impl EventRangeQuery {
    /// Each bound must parse if given. Filtering only happens when both are
    /// present.
    pub fn into_range(self) -> ApiResult<Option<DateRange>> {
        let mut errors = Vec::new();
        let mut parse = |name: &str, raw: Option<String>| match raw.map(|r| parse_timestamp(&r)) {
            Some(Ok(dt)) => Some(dt),
            Some(Err(msg)) => {
                errors.push(FieldError::new(name, msg));
                None
            }
            None => None,
        };
        let start = parse("start", self.start);
        let end = parse("end", self.end);

        if !errors.is_empty() {
            return Err(ApiError::Validation(errors));
        }
        Ok(DateRange::from_bounds(start, end))
    }
}

/// Unwraps the range query, reporting a malformed query string under
/// `query`.
pub fn range_query(
    query: Result<Query<EventRangeQuery>, QueryRejection>,
) -> ApiResult<Option<DateRange>> {
    match query {
        Ok(Query(query)) => query.into_range(),
        Err(rejection) => Err(ApiError::field("query", rejection.body_text())),
    }
}

/// Path ids that are not UUIDs cannot name an existing row.
pub fn parse_path_id(raw: &str) -> ApiResult<Uuid> {
    Uuid::parse_str(raw).map_err(|_| ApiError::NotFound)
}

pub async fn list_events(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    query: Result<Query<EventRangeQuery>, QueryRejection>,
) -> ApiResult<Json<Vec<Event>>> {
    let range = range_query(query)?;
    let events = state.store.list_events(auth.user_id, range).await?;
    Ok(Json(events))
}

pub async fn get_event(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<String>,
) -> ApiResult<Json<Event>> {
    let id = parse_path_id(&id)?;
    let event = state
        .store
        .get_event(id, auth.user_id)
        .await?
        .ok_or(ApiError::NotFound)?;
    Ok(Json(event))
}

pub async fn create_event(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    payload: Result<Json<Value>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Event>)> {
    let body = validation::json_object(payload)?;
    let new_event = validation::new_event(&body)?;
    let event = state.store.create_event(auth.user_id, new_event).await?;
    Ok((StatusCode::CREATED, Json(event)))
}

pub async fn update_event(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<String>,
    payload: Result<Json<Value>, JsonRejection>,
) -> ApiResult<Json<Event>> {
    let id = parse_path_id(&id)?;
    let body = validation::json_object(payload)?;
    let patch = validation::event_patch(&body)?;
    let event = state
        .store
        .update_event(id, auth.user_id, patch)
        .await?
        .ok_or(ApiError::NotFound)?;
    Ok(Json(event))
}

pub async fn delete_event(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let id = parse_path_id(&id)?;
    if !state.store.delete_event(id, auth.user_id).await? {
        return Err(ApiError::NotFound);
    }
    Ok(Json(serde_json::json!({"message": "Event deleted successfully"})))
}

pub async fn category_stats(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
) -> ApiResult<Json<Vec<CategoryCount>>> {
    let counts = state.store.count_by_category(auth.user_id).await?;
    Ok(Json(
        counts
            .into_iter()
            .map(|(category, count)| CategoryCount { category, count })
            .collect(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_bound_means_no_filter() {
        let query = EventRangeQuery {
            start: Some("2024-01-01T00:00:00Z".into()),
            end: None,
        };
        assert_eq!(query.into_range().unwrap(), None);
    }

    #[test]
    fn bad_bound_is_a_validation_error() {
        let query = EventRangeQuery {
            start: Some("soon".into()),
            end: Some("2024-01-01T00:00:00Z".into()),
        };
        assert!(matches!(query.into_range(), Err(ApiError::Validation(_))));
    }

    #[test]
    fn non_uuid_path_is_not_found() {
        assert!(matches!(parse_path_id("42"), Err(ApiError::NotFound)));
    }
}
