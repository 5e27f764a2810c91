use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use uuid::Uuid;

#[derive(Clone, Debug)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub password_hash: String,
    pub recovery_key: String,
    pub encryption_key: String,
    pub created_at: DateTime<Utc>,
}

/// Public view of a user, as returned by the auth endpoints.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: Uuid,
    pub username: String,
    pub encryption_key: String,
}

impl From<&User> for UserProfile {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            username: user.username.clone(),
            encryption_key: user.encryption_key.clone(),
        }
    }
}

/// Fields required to insert a user; the password is already hashed.
#[derive(Clone, Debug)]
pub struct NewUser {
    pub username: String,
    pub password_hash: String,
    pub recovery_key: String,
    pub encryption_key: String,
}

#[derive(Clone, Debug)]
pub struct Session {
    pub token: String,
    pub user_id: Uuid,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl Session {
    /// A session is live strictly before its expiry instant.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Work,
    #[default]
    Personal,
    Health,
    Finance,
}

impl Category {
    pub const ALL: [Category; 4] = [
        Category::Work,
        Category::Personal,
        Category::Health,
        Category::Finance,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Work => "work",
            Category::Personal => "personal",
            Category::Health => "health",
            Category::Finance => "finance",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Category::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| format!("unknown category '{}'", s))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecurringPattern {
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

impl RecurringPattern {
    pub const ALL: [RecurringPattern; 4] = [
        RecurringPattern::Daily,
        RecurringPattern::Weekly,
        RecurringPattern::Monthly,
        RecurringPattern::Yearly,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RecurringPattern::Daily => "daily",
            RecurringPattern::Weekly => "weekly",
            RecurringPattern::Monthly => "monthly",
            RecurringPattern::Yearly => "yearly",
        }
    }
}

impl FromStr for RecurringPattern {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RecurringPattern::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| format!("unknown recurring pattern '{}'", s))
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: Uuid,
    pub user_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub start_date: DateTime<Utc>,
    pub end_date: Option<DateTime<Utc>>,
    pub category: Category,
    pub is_recurring: bool,
    pub recurring_pattern: Option<RecurringPattern>,
    pub recurring_end_date: Option<DateTime<Utc>>,
    pub encrypted_data: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Validated input for a new event.
#[derive(Clone, Debug, PartialEq)]
pub struct NewEvent {
    pub title: String,
    pub description: Option<String>,
    pub start_date: DateTime<Utc>,
    pub end_date: Option<DateTime<Utc>>,
    pub category: Category,
    pub is_recurring: bool,
    pub recurring_pattern: Option<RecurringPattern>,
    pub recurring_end_date: Option<DateTime<Utc>>,
    pub encrypted_data: Option<String>,
}

impl NewEvent {
    pub fn new(title: impl Into<String>, start_date: DateTime<Utc>) -> Self {
        Self {
            title: title.into(),
            description: None,
            start_date,
            end_date: None,
            category: Category::default(),
            is_recurring: false,
            recurring_pattern: None,
            recurring_end_date: None,
            encrypted_data: None,
        }
    }
}

/// Partial update. Outer `None` leaves a field untouched; for nullable
/// columns `Some(None)` clears the value.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EventPatch {
    pub title: Option<String>,
    pub description: Option<Option<String>>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<Option<DateTime<Utc>>>,
    pub category: Option<Category>,
    pub is_recurring: Option<bool>,
    pub recurring_pattern: Option<Option<RecurringPattern>>,
    pub recurring_end_date: Option<Option<DateTime<Utc>>>,
    pub encrypted_data: Option<Option<String>>,
}

impl EventPatch {
    pub fn apply(&self, event: &mut Event) {
        if let Some(title) = &self.title {
            event.title = title.clone();
        }
        if let Some(description) = &self.description {
            event.description = description.clone();
        }
        if let Some(start_date) = self.start_date {
            event.start_date = start_date;
        }
        if let Some(end_date) = self.end_date {
            event.end_date = end_date;
        }
        if let Some(category) = self.category {
            event.category = category;
        }
        if let Some(is_recurring) = self.is_recurring {
            event.is_recurring = is_recurring;
        }
        if let Some(pattern) = self.recurring_pattern {
            event.recurring_pattern = pattern;
        }
        if let Some(recurring_end_date) = self.recurring_end_date {
            event.recurring_end_date = recurring_end_date;
        }
        if let Some(encrypted_data) = &self.encrypted_data {
            event.encrypted_data = encrypted_data.clone();
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Reminder {
    pub id: Uuid,
    pub event_id: Uuid,
    pub minutes_before: i32,
    pub is_triggered: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct CategoryCount {
    pub category: Category,
    pub count: i64,
}
