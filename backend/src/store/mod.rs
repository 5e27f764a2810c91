//! Persistence for users, sessions, events and reminders.
//!
//! Handlers talk to a [`Store`] trait object. Two implementations exist:
//! [`PgStore`] backed by Postgres and [`MemoryStore`] for development and
//! tests. Which one runs is decided once at startup.
//!
//! Event operations take the owning user id and never touch rows owned by
//! anyone else. Reminder operations are keyed by id only and trust the caller
//! to have checked ownership of the parent event first.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{Category, Event, EventPatch, NewEvent, NewUser, Reminder, Session, User};

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[derive(Debug, Error)]
pub enum StoreError {
    /// A uniqueness constraint was violated (duplicate username).
    #[error("record already exists")]
    Conflict,

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("stored value is malformed: {0}")]
    Corrupt(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Inclusive `[start, end]` filter on an event's start date.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DateRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl DateRange {
    /// Filtering applies only when both bounds are known; a single bound is
    /// treated the same as no bound at all.
    pub fn from_bounds(start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Option<Self> {
        match (start, end) {
            (Some(start), Some(end)) => Some(Self { start, end }),
            _ => None,
        }
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start <= at && at <= self.end
    }
}

#[async_trait]
pub trait Store: Send + Sync {
    /// Short label for logs.
    fn kind(&self) -> &'static str;

    /// Inserts a user. Fails with [`StoreError::Conflict`] when the username
    /// is taken; the check and the insert are a single atomic step.
    async fn create_user(&self, user: NewUser) -> StoreResult<User>;

    async fn find_user_by_username(&self, username: &str) -> StoreResult<Option<User>>;

    async fn find_user(&self, id: Uuid) -> StoreResult<Option<User>>;

    /// Returns false when the user does not exist.
    async fn update_password(&self, id: Uuid, password_hash: &str) -> StoreResult<bool>;

    async fn insert_session(&self, session: Session) -> StoreResult<()>;

    /// Returns the session only when it exists and `now < expires_at`.
    async fn resolve_session(&self, token: &str, now: DateTime<Utc>) -> StoreResult<Option<Session>>;

    /// Idempotent; removing an unknown token succeeds.
    async fn delete_session(&self, token: &str) -> StoreResult<()>;

    /// Owned events ordered by start date ascending.
    async fn list_events(&self, user_id: Uuid, range: Option<DateRange>) -> StoreResult<Vec<Event>>;

    async fn get_event(&self, id: Uuid, user_id: Uuid) -> StoreResult<Option<Event>>;

    async fn create_event(&self, user_id: Uuid, event: NewEvent) -> StoreResult<Event>;

    /// Applies the patch to an owned event and refreshes `updated_at`.
    async fn update_event(&self, id: Uuid, user_id: Uuid, patch: EventPatch) -> StoreResult<Option<Event>>;

    /// Returns whether an owned row was removed. Reminders go with it.
    async fn delete_event(&self, id: Uuid, user_id: Uuid) -> StoreResult<bool>;

    /// Event count per category; categories without events are absent.
    async fn count_by_category(&self, user_id: Uuid) -> StoreResult<BTreeMap<Category, i64>>;

    async fn list_reminders(&self, event_id: Uuid) -> StoreResult<Vec<Reminder>>;

    async fn get_reminder(&self, id: Uuid) -> StoreResult<Option<Reminder>>;

    async fn create_reminder(&self, event_id: Uuid, minutes_before: i32) -> StoreResult<Reminder>;

    async fn delete_reminder(&self, id: Uuid) -> StoreResult<bool>;
}

/// `updated_at` for a row being modified now. Never earlier than the
/// previous value, even if the wall clock steps back.
pub(crate) fn next_updated_at(previous: DateTime<Utc>, now: DateTime<Utc>) -> DateTime<Utc> {
    now.max(previous)
}
