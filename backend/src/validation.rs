//! Request body validation.
//!
//! Bodies are taken as raw JSON and checked field by field so that every
//! violation in a request is reported together, each under its own field
//! name. Absent and `null` are distinct: on partial updates an absent field
//! is left alone while `null` clears a nullable column.

use axum::extract::rejection::JsonRejection;
use axum::Json;
use chrono::{DateTime, SubsecRound, Utc};
use regex::Regex;
use serde_json::{Map, Value};
use std::{str::FromStr, sync::OnceLock};
use uuid::Uuid;

use crate::error::{ApiError, ApiResult, FieldError};
use crate::models::{Category, EventPatch, NewEvent, RecurringPattern};

pub const USERNAME_MIN: usize = 3;
pub const USERNAME_MAX: usize = 50;
pub const PASSWORD_MIN: usize = 8;
/// bcrypt ignores everything past 72 bytes, so longer passwords are refused
/// rather than silently truncated.
pub const PASSWORD_MAX_BYTES: usize = 72;
pub const RECOVERY_KEY_MAX: usize = 256;
pub const TITLE_MAX: usize = 200;
pub const DESCRIPTION_MAX: usize = 10_000;
pub const ENCRYPTED_DATA_MAX: usize = 100_000;
/// One year.
pub const MINUTES_BEFORE_MAX: i64 = 525_600;

fn username_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-zA-Z0-9_-]+$").expect("username pattern is valid"))
}

// Rejects NUL and control characters other than common whitespace.
pub fn validate_input_string(input: &str, max_length: Option<usize>) -> Result<(), String> {
    if input.contains('\0') {
        return Err("contains null bytes".to_string());
    }

    if input
        .chars()
        .any(|ch| ch.is_control() && ch != '\n' && ch != '\r' && ch != '\t')
    {
        return Err("contains invalid control characters".to_string());
    }

    if let Some(max_len) = max_length {
        if input.chars().count() > max_len {
            return Err(format!("exceeds maximum length of {} characters", max_len));
        }
    }

    Ok(())
}

/// Unwraps a JSON body, turning extractor rejections into a validation
/// error on `body`.
pub fn json_object(payload: Result<Json<Value>, JsonRejection>) -> ApiResult<Map<String, Value>> {
    match payload {
        Ok(Json(Value::Object(map))) => Ok(map),
        Ok(Json(_)) => Err(ApiError::field("body", "expected a JSON object")),
        Err(rejection) => Err(ApiError::field("body", rejection.body_text())),
    }
}

/// Parses an RFC 3339 timestamp, truncated to the microsecond precision
/// Postgres keeps so both stores hold the same instant.
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc).trunc_subsecs(6))
        .map_err(|_| "must be an ISO-8601 timestamp".to_string())
}

/// Accumulates field errors while reading values out of a JSON object.
pub struct Fields<'a> {
    map: &'a Map<String, Value>,
    prefix: String,
    errors: Vec<FieldError>,
}

impl<'a> Fields<'a> {
    pub fn new(map: &'a Map<String, Value>) -> Self {
        Self::with_prefix(map, "")
    }

    /// Field names are reported as `{prefix}{name}`.
    pub fn with_prefix(map: &'a Map<String, Value>, prefix: impl Into<String>) -> Self {
        Self {
            map,
            prefix: prefix.into(),
            errors: Vec::new(),
        }
    }

    pub fn error(&mut self, name: &str, message: impl Into<String>) {
        self.errors
            .push(FieldError::new(format!("{}{}", self.prefix, name), message));
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn into_errors(self) -> Vec<FieldError> {
        self.errors
    }

    pub fn finish(self) -> ApiResult<()> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(ApiError::Validation(self.errors))
        }
    }

    // Length limits apply to the trimmed value.
    fn text(&mut self, name: &str, value: &Value, max: usize) -> Option<String> {
        let Some(s) = value.as_str() else {
            self.error(name, "must be a string");
            return None;
        };
        let checked =
            validate_input_string(s, None).and_then(|()| validate_input_string(s.trim(), Some(max)));
        match checked {
            Ok(()) => Some(s.to_string()),
            Err(msg) => {
                self.error(name, msg);
                None
            }
        }
    }

    pub fn required_string(&mut self, name: &str, max: usize) -> Option<String> {
        let map = self.map;
        match map.get(name) {
            None | Some(Value::Null) => {
                self.error(name, "is required");
                None
            }
            Some(value) => {
                let s = self.text(name, value, max)?;
                if s.trim().is_empty() {
                    self.error(name, "must not be empty");
                    return None;
                }
                Some(s)
            }
        }
    }

    /// Non-nullable string that may be omitted.
    pub fn optional_string(&mut self, name: &str, max: usize) -> Option<String> {
        let map = self.map;
        match map.get(name) {
            None => None,
            Some(Value::Null) => {
                self.error(name, "must not be null");
                None
            }
            Some(value) => {
                let s = self.text(name, value, max)?;
                if s.trim().is_empty() {
                    self.error(name, "must not be empty");
                    return None;
                }
                Some(s)
            }
        }
    }

    pub fn nullable_string(&mut self, name: &str, max: usize) -> Option<Option<String>> {
        let map = self.map;
        match map.get(name) {
            None => None,
            Some(Value::Null) => Some(None),
            Some(value) => self.text(name, value, max).map(Some),
        }
    }

    fn timestamp(&mut self, name: &str, value: &Value) -> Option<DateTime<Utc>> {
        let Some(raw) = value.as_str() else {
            self.error(name, "must be an ISO-8601 timestamp string");
            return None;
        };
        match parse_timestamp(raw) {
            Ok(dt) => Some(dt),
            Err(msg) => {
                self.error(name, msg);
                None
            }
        }
    }

    pub fn required_timestamp(&mut self, name: &str) -> Option<DateTime<Utc>> {
        let map = self.map;
        match map.get(name) {
            None | Some(Value::Null) => {
                self.error(name, "is required");
                None
            }
            Some(value) => self.timestamp(name, value),
        }
    }

    pub fn optional_timestamp(&mut self, name: &str) -> Option<DateTime<Utc>> {
        let map = self.map;
        match map.get(name) {
            None => None,
            Some(Value::Null) => {
                self.error(name, "must not be null");
                None
            }
            Some(value) => self.timestamp(name, value),
        }
    }

    pub fn nullable_timestamp(&mut self, name: &str) -> Option<Option<DateTime<Utc>>> {
        let map = self.map;
        match map.get(name) {
            None => None,
            Some(Value::Null) => Some(None),
            Some(value) => self.timestamp(name, value).map(Some),
        }
    }

    pub fn optional_bool(&mut self, name: &str) -> Option<bool> {
        let map = self.map;
        match map.get(name) {
            None => None,
            Some(Value::Bool(b)) => Some(*b),
            Some(_) => {
                self.error(name, "must be a boolean");
                None
            }
        }
    }

    fn choice<T: FromStr>(&mut self, name: &str, value: &Value, allowed: &[&str]) -> Option<T> {
        match value.as_str().and_then(|s| s.parse::<T>().ok()) {
            Some(parsed) => Some(parsed),
            None => {
                self.error(name, format!("must be one of: {}", allowed.join(", ")));
                None
            }
        }
    }

    pub fn optional_choice<T: FromStr>(&mut self, name: &str, allowed: &[&str]) -> Option<T> {
        let map = self.map;
        match map.get(name) {
            None => None,
            Some(value) => self.choice(name, value, allowed),
        }
    }

    pub fn nullable_choice<T: FromStr>(&mut self, name: &str, allowed: &[&str]) -> Option<Option<T>> {
        let map = self.map;
        match map.get(name) {
            None => None,
            Some(Value::Null) => Some(None),
            Some(value) => self.choice(name, value, allowed).map(Some),
        }
    }

    pub fn required_uuid(&mut self, name: &str) -> Option<Uuid> {
        let map = self.map;
        match map.get(name).and_then(Value::as_str) {
            Some(raw) => match Uuid::parse_str(raw) {
                Ok(id) => Some(id),
                Err(_) => {
                    self.error(name, "must be a UUID");
                    None
                }
            },
            None => {
                self.error(name, "is required and must be a UUID string");
                None
            }
        }
    }

    pub fn required_int(&mut self, name: &str, min: i64, max: i64) -> Option<i64> {
        let map = self.map;
        match map.get(name) {
            None | Some(Value::Null) => {
                self.error(name, "is required");
                None
            }
            Some(value) => match value.as_i64() {
                Some(n) if (min..=max).contains(&n) => Some(n),
                _ => {
                    self.error(name, format!("must be an integer between {} and {}", min, max));
                    None
                }
            },
        }
    }
}

const CATEGORY_NAMES: [&str; 4] = ["work", "personal", "health", "finance"];
const PATTERN_NAMES: [&str; 4] = ["daily", "weekly", "monthly", "yearly"];

fn check_date_order(
    fields: &mut Fields<'_>,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
) {
    if let (Some(start), Some(end)) = (start, end) {
        if end < start {
            fields.error("endDate", "must not be before startDate");
        }
    }
}

/// Reads the fields of a new event. Returns `None` when anything was
/// invalid; the reasons are left in `fields`.
pub fn read_new_event(fields: &mut Fields<'_>) -> Option<NewEvent> {
    let title = fields.required_string("title", TITLE_MAX);
    let description = fields.nullable_string("description", DESCRIPTION_MAX).flatten();
    let start_date = fields.required_timestamp("startDate");
    let end_date = fields.nullable_timestamp("endDate").flatten();
    let category = fields.optional_choice::<Category>("category", &CATEGORY_NAMES);
    let is_recurring = fields.optional_bool("isRecurring");
    let recurring_pattern = fields
        .nullable_choice::<RecurringPattern>("recurringPattern", &PATTERN_NAMES)
        .flatten();
    let recurring_end_date = fields.nullable_timestamp("recurringEndDate").flatten();
    let encrypted_data = fields
        .nullable_string("encryptedData", ENCRYPTED_DATA_MAX)
        .flatten();
    check_date_order(fields, start_date, end_date);

    if fields.has_errors() {
        return None;
    }
    Some(NewEvent {
        title: title?.trim().to_string(),
        description,
        start_date: start_date?,
        end_date,
        category: category.unwrap_or_default(),
        is_recurring: is_recurring.unwrap_or(false),
        recurring_pattern,
        recurring_end_date,
        encrypted_data,
    })
}

pub fn new_event(map: &Map<String, Value>) -> ApiResult<NewEvent> {
    let mut fields = Fields::new(map);
    match read_new_event(&mut fields) {
        Some(event) => Ok(event),
        None => Err(ApiError::Validation(fields.into_errors())),
    }
}

pub fn event_patch(map: &Map<String, Value>) -> ApiResult<EventPatch> {
    let mut fields = Fields::new(map);
    let patch = EventPatch {
        title: fields
            .optional_string("title", TITLE_MAX)
            .map(|t| t.trim().to_string()),
        description: fields.nullable_string("description", DESCRIPTION_MAX),
        start_date: fields.optional_timestamp("startDate"),
        end_date: fields.nullable_timestamp("endDate"),
        category: fields.optional_choice("category", &CATEGORY_NAMES),
        is_recurring: fields.optional_bool("isRecurring"),
        recurring_pattern: fields.nullable_choice("recurringPattern", &PATTERN_NAMES),
        recurring_end_date: fields.nullable_timestamp("recurringEndDate"),
        encrypted_data: fields.nullable_string("encryptedData", ENCRYPTED_DATA_MAX),
    };
    check_date_order(&mut fields, patch.start_date, patch.end_date.flatten());
    fields.finish()?;
    Ok(patch)
}

#[derive(Debug)]
pub struct Registration {
    pub username: String,
    pub password: String,
    pub recovery_key: String,
}

fn check_username(fields: &mut Fields<'_>, username: &str) {
    let len = username.chars().count();
    if !(USERNAME_MIN..=USERNAME_MAX).contains(&len) || !username_regex().is_match(username) {
        fields.error(
            "username",
            format!(
                "must be {}-{} characters and contain only letters, numbers, underscores, and hyphens",
                USERNAME_MIN, USERNAME_MAX
            ),
        );
    }
}

fn check_password(fields: &mut Fields<'_>, name: &str, password: &str) {
    if password.chars().count() < PASSWORD_MIN {
        fields.error(name, format!("must be at least {} characters", PASSWORD_MIN));
    } else if password.len() > PASSWORD_MAX_BYTES {
        fields.error(name, format!("must be at most {} bytes", PASSWORD_MAX_BYTES));
    }
}

pub fn registration(map: &Map<String, Value>) -> ApiResult<Registration> {
    let mut fields = Fields::new(map);
    let username = fields.required_string("username", USERNAME_MAX);
    let password = fields.required_string("password", PASSWORD_MAX_BYTES);
    let recovery_key = fields.required_string("recoveryKey", RECOVERY_KEY_MAX);
    if let Some(username) = &username {
        check_username(&mut fields, username);
    }
    if let Some(password) = &password {
        check_password(&mut fields, "password", password);
    }

    match (username, password, recovery_key) {
        (Some(username), Some(password), Some(recovery_key)) if !fields.has_errors() => {
            Ok(Registration {
                username,
                password,
                recovery_key: recovery_key.trim().to_string(),
            })
        }
        _ => Err(ApiError::Validation(fields.into_errors())),
    }
}

#[derive(Debug)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

pub fn credentials(map: &Map<String, Value>) -> ApiResult<Credentials> {
    let mut fields = Fields::new(map);
    let username = fields.required_string("username", USERNAME_MAX);
    let password = fields.required_string("password", PASSWORD_MAX_BYTES);

    match (username, password) {
        (Some(username), Some(password)) if !fields.has_errors() => {
            Ok(Credentials { username, password })
        }
        _ => Err(ApiError::Validation(fields.into_errors())),
    }
}

#[derive(Debug)]
pub struct Recovery {
    pub username: String,
    pub recovery_key: String,
    pub new_password: String,
}

pub fn recovery(map: &Map<String, Value>) -> ApiResult<Recovery> {
    let mut fields = Fields::new(map);
    let username = fields.required_string("username", USERNAME_MAX);
    let recovery_key = fields.required_string("recoveryKey", RECOVERY_KEY_MAX);
    let new_password = fields.required_string("newPassword", PASSWORD_MAX_BYTES);
    if let Some(password) = &new_password {
        check_password(&mut fields, "newPassword", password);
    }

    match (username, recovery_key, new_password) {
        (Some(username), Some(recovery_key), Some(new_password)) if !fields.has_errors() => {
            Ok(Recovery {
                username,
                recovery_key: recovery_key.trim().to_string(),
                new_password,
            })
        }
        _ => Err(ApiError::Validation(fields.into_errors())),
    }
}

#[derive(Debug)]
pub struct NewReminder {
    pub event_id: Uuid,
    pub minutes_before: i32,
}

pub fn new_reminder(map: &Map<String, Value>) -> ApiResult<NewReminder> {
    let mut fields = Fields::new(map);
    let event_id = fields.required_uuid("eventId");
    let minutes_before = fields.required_int("minutesBefore", 0, MINUTES_BEFORE_MAX);

    match (event_id, minutes_before.and_then(|m| i32::try_from(m).ok())) {
        (Some(event_id), Some(minutes_before)) if !fields.has_errors() => Ok(NewReminder {
            event_id,
            minutes_before,
        }),
        _ => Err(ApiError::Validation(fields.into_errors())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("test body must be an object"),
        }
    }

    fn field_names(err: ApiError) -> Vec<String> {
        match err {
            ApiError::Validation(details) => details.into_iter().map(|d| d.field).collect(),
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn input_string_rules() {
        assert!(validate_input_string("line\nbreak\ttab", Some(20)).is_ok());
        assert!(validate_input_string("nul\0", None).is_err());
        assert!(validate_input_string("bell\x07", None).is_err());
        assert!(validate_input_string("abcdef", Some(5)).is_err());
    }

    #[test]
    fn new_event_applies_defaults() {
        let map = object(json!({
            "title": "  Standup ",
            "startDate": "2024-01-10T09:00:00Z",
        }));
        let event = new_event(&map).unwrap();
        assert_eq!(event.title, "Standup");
        assert_eq!(event.category, Category::Personal);
        assert!(!event.is_recurring);
        assert_eq!(event.description, None);
    }

    #[test]
    fn new_event_reports_every_bad_field() {
        let map = object(json!({
            "startDate": "yesterday",
            "category": "leisure",
            "isRecurring": "yes",
            "recurringPattern": "hourly",
        }));
        let mut names = field_names(new_event(&map).unwrap_err());
        names.sort();
        assert_eq!(
            names,
            ["category", "isRecurring", "recurringPattern", "startDate", "title"]
        );
    }

    #[test]
    fn end_before_start_is_rejected() {
        let map = object(json!({
            "title": "Trip",
            "startDate": "2024-05-02T00:00:00Z",
            "endDate": "2024-05-01T00:00:00Z",
        }));
        assert_eq!(field_names(new_event(&map).unwrap_err()), ["endDate"]);
    }

    #[test]
    fn patch_distinguishes_null_from_absent() {
        let map = object(json!({"description": null, "category": "finance"}));
        let patch = event_patch(&map).unwrap();
        assert_eq!(patch.description, Some(None));
        assert_eq!(patch.category, Some(Category::Finance));
        assert_eq!(patch.title, None);
        assert_eq!(patch.end_date, None);

        let map = object(json!({"title": null}));
        assert_eq!(field_names(event_patch(&map).unwrap_err()), ["title"]);
    }

    #[test]
    fn registration_checks_username_and_password() {
        let map = object(json!({"username": "a b", "password": "short", "recoveryKey": "x"}));
        let mut names = field_names(registration(&map).unwrap_err());
        names.sort();
        assert_eq!(names, ["password", "username"]);

        let map = object(json!({"username": "alice", "password": "Secret123!", "recoveryKey": "lotus-river"}));
        let reg = registration(&map).unwrap();
        assert_eq!(reg.username, "alice");
    }

    #[test]
    fn reminder_bounds() {
        let id = Uuid::new_v4().to_string();
        let ok = object(json!({"eventId": id, "minutesBefore": 15}));
        assert_eq!(new_reminder(&ok).unwrap().minutes_before, 15);

        let bad = object(json!({"eventId": "nope", "minutesBefore": -5}));
        let mut names = field_names(new_reminder(&bad).unwrap_err());
        names.sort();
        assert_eq!(names, ["eventId", "minutesBefore"]);
    }

    #[test]
    fn timestamps_keep_microseconds_only() {
        let dt = parse_timestamp("2024-01-10T09:00:00.1234567Z").unwrap();
        assert_eq!(dt, parse_timestamp("2024-01-10T09:00:00.123456Z").unwrap());
        assert_eq!(dt.timestamp_subsec_nanos(), 123_456_000);
    }

    #[test]
    fn title_length_is_measured_after_trimming() {
        let title = "t".repeat(TITLE_MAX - 1);
        let map = object(json!({
            "title": format!("  {title}  "),
            "startDate": "2024-01-10T09:00:00Z",
        }));
        assert_eq!(new_event(&map).unwrap().title, title);

        let map = object(json!({
            "title": "t".repeat(TITLE_MAX + 1),
            "startDate": "2024-01-10T09:00:00Z",
        }));
        assert_eq!(field_names(new_event(&map).unwrap_err()), ["title"]);
    }

    #[test]
    fn password_is_capped_at_bcrypt_input_size() {
        let at_limit = "p".repeat(PASSWORD_MAX_BYTES);
        let map = object(json!({"username": "alice", "password": at_limit, "recoveryKey": "k"}));
        assert!(registration(&map).is_ok());

        // 37 two-byte characters: 74 bytes.
        let too_long = "é".repeat(37);
        let map = object(json!({"username": "alice", "password": too_long, "recoveryKey": "k"}));
        assert_eq!(field_names(registration(&map).unwrap_err()), ["password"]);
    }

    #[test]
    fn prefixed_field_names() {
        let map = object(json!({"startDate": "2024-01-01T00:00:00Z"}));
        let mut fields = Fields::with_prefix(&map, "events[3].");
        assert!(read_new_event(&mut fields).is_none());
        let errors = fields.into_errors();
        assert_eq!(errors[0].field, "events[3].title");
    }
}
