//! JSON export and import of a user's events.
//!
//! An export document can be fed straight back into import: server-assigned
//! fields such as `id` and `createdAt` are ignored on the way in.

use axum::{
    extract::{rejection::JsonRejection, State},
    Extension, Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashSet;

use crate::{
    auth::AuthUser,
    error::{ApiError, ApiResult, FieldError},
    models::{Event, NewEvent},
    validation::{self, Fields, MINUTES_BEFORE_MAX},
    AppState,
};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportedReminder {
    pub minutes_before: i32,
}

#[derive(Debug, Serialize)]
pub struct ExportedEvent {
    #[serde(flatten)]
    pub event: Event,
    pub reminders: Vec<ExportedReminder>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportDocument {
    pub exported_at: DateTime<Utc>,
    pub events: Vec<ExportedEvent>,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct ImportSummary {
    pub imported: usize,
    pub skipped: usize,
}

#[derive(Debug)]
pub struct ImportItem {
    pub event: NewEvent,
    pub reminders: Vec<i32>,
}

pub async fn export_events(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
) -> ApiResult<Json<ExportDocument>> {
    let events = state.store.list_events(auth.user_id, None).await?;

    let mut exported = Vec::with_capacity(events.len());
    for event in events {
        let reminders = state
            .store
            .list_reminders(event.id)
            .await?
            .into_iter()
            .map(|r| ExportedReminder {
                minutes_before: r.minutes_before,
            })
            .collect();
        exported.push(ExportedEvent { event, reminders });
    }

    Ok(Json(ExportDocument {
        exported_at: Utc::now(),
        events: exported,
    }))
}

fn read_reminders(fields: &mut Fields<'_>, item: &Map<String, Value>) -> Vec<i32> {
    let list = match item.get("reminders") {
        None | Some(Value::Null) => return Vec::new(),
        Some(Value::Array(list)) => list,
        Some(_) => {
            fields.error("reminders", "must be an array");
            return Vec::new();
        }
    };

    let mut minutes = Vec::with_capacity(list.len());
    for (i, reminder) in list.iter().enumerate() {
        let value = reminder
            .get("minutesBefore")
            .and_then(Value::as_i64)
            .filter(|m| (0..=MINUTES_BEFORE_MAX).contains(m))
            .and_then(|m| i32::try_from(m).ok());
        match value {
            Some(m) => minutes.push(m),
            None => fields.error(
                &format!("reminders[{}].minutesBefore", i),
                format!("must be an integer between 0 and {}", MINUTES_BEFORE_MAX),
            ),
        }
    }
    minutes
}

/// Validates the whole batch up front; nothing is written if any item is
/// invalid.
pub fn parse_import(body: &Map<String, Value>) -> ApiResult<Vec<ImportItem>> {
    let list = match body.get("events") {
        Some(Value::Array(list)) => list,
        _ => return Err(ApiError::field("events", "is required and must be an array")),
    };

    let mut items = Vec::with_capacity(list.len());
    let mut errors: Vec<FieldError> = Vec::new();
    for (i, raw) in list.iter().enumerate() {
        let Some(map) = raw.as_object() else {
            errors.push(FieldError::new(format!("events[{}]", i), "must be an object"));
            continue;
        };
        let mut fields = Fields::with_prefix(map, format!("events[{}].", i));
        let event = validation::read_new_event(&mut fields);
        let reminders = read_reminders(&mut fields, map);
        match event {
            Some(event) if !fields.has_errors() => items.push(ImportItem { event, reminders }),
            _ => errors.extend(fields.into_errors()),
        }
    }

    if !errors.is_empty() {
        return Err(ApiError::Validation(errors));
    }
    Ok(items)
}

pub async fn import_events(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    payload: Result<Json<Value>, JsonRejection>,
) -> ApiResult<Json<ImportSummary>> {
    let body = validation::json_object(payload)?;
    let items = parse_import(&body)?;

    // Dedup key: (title, startDate), across existing events and the batch.
    let mut seen: HashSet<(String, DateTime<Utc>)> = state
        .store
        .list_events(auth.user_id, None)
        .await?
        .into_iter()
        .map(|e| (e.title, e.start_date))
        .collect();

    let mut summary = ImportSummary {
        imported: 0,
        skipped: 0,
    };
    for item in items {
        let key = (item.event.title.clone(), item.event.start_date);
        if !seen.insert(key) {
            summary.skipped += 1;
            continue;
        }

        let event = state.store.create_event(auth.user_id, item.event).await?;
        for minutes_before in item.reminders {
            state.store.create_reminder(event.id, minutes_before).await?;
        }
        summary.imported += 1;
    }

    log::info!(
        "Imported {} events for {} ({} duplicates skipped)",
        summary.imported,
        auth.user_id,
        summary.skipped
    );
    Ok(Json(summary))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(value: Value) -> Map<String, Value> {
        value.as_object().cloned().expect("object")
    }

    #[test]
    fn parse_reads_events_and_reminders() {
        let body = object(json!({
            "events": [
                {
                    "id": "ignored",
                    "title": "Rent",
                    "startDate": "2024-02-01T00:00:00Z",
                    "category": "finance",
                    "reminders": [{"minutesBefore": 1440}, {"minutesBefore": 60}],
                },
                {"title": "Walk", "startDate": "2024-02-02T18:00:00Z"},
            ]
        }));
        let items = parse_import(&body).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].reminders, [1440, 60]);
        assert!(items[1].reminders.is_empty());
    }

    #[test]
    fn parse_reports_indexed_fields() {
        let body = object(json!({
            "events": [
                {"title": "ok", "startDate": "2024-02-01T00:00:00Z"},
                {"startDate": "2024-02-01T00:00:00Z", "reminders": [{"minutesBefore": "soon"}]},
                7,
            ]
        }));
        let ApiError::Validation(details) = parse_import(&body).unwrap_err() else {
            panic!("expected validation error");
        };
        let fields: Vec<_> = details.iter().map(|d| d.field.as_str()).collect();
        assert_eq!(
            fields,
            ["events[1].title", "events[1].reminders[0].minutesBefore", "events[2]"]
        );
    }

    #[test]
    fn parse_requires_event_array() {
        assert!(matches!(
            parse_import(&object(json!({"events": {}}))),
            Err(ApiError::Validation(_))
        ));
    }
}
