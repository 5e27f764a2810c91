use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{
    postgres::{PgPoolOptions, PgRow},
    Executor, PgPool, Row,
};
use std::{collections::BTreeMap, time::Duration};
use uuid::Uuid;

use super::{DateRange, Store, StoreError, StoreResult};
use crate::models::{
    Category, Event, EventPatch, NewEvent, NewUser, RecurringPattern, Reminder, Session, User,
};

const UNIQUE_VIOLATION: &str = "23505";

/// Idempotent schema setup, run on every start.
const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS users (
        id UUID PRIMARY KEY,
        username TEXT NOT NULL UNIQUE,
        password_hash TEXT NOT NULL,
        recovery_key TEXT NOT NULL,
        encryption_key TEXT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )",
    "CREATE TABLE IF NOT EXISTS sessions (
        token TEXT PRIMARY KEY,
        user_id UUID NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        expires_at TIMESTAMPTZ NOT NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )",
    "CREATE TABLE IF NOT EXISTS events (
        id UUID PRIMARY KEY,
        user_id UUID NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        title TEXT NOT NULL,
        description TEXT,
        start_date TIMESTAMPTZ NOT NULL,
        end_date TIMESTAMPTZ,
        category TEXT NOT NULL DEFAULT 'personal',
        is_recurring BOOLEAN NOT NULL DEFAULT FALSE,
        recurring_pattern TEXT,
        recurring_end_date TIMESTAMPTZ,
        encrypted_data TEXT,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )",
    "CREATE TABLE IF NOT EXISTS reminders (
        id UUID PRIMARY KEY,
        event_id UUID NOT NULL REFERENCES events(id) ON DELETE CASCADE,
        minutes_before INTEGER NOT NULL,
        is_triggered BOOLEAN NOT NULL DEFAULT FALSE,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )",
    "CREATE INDEX IF NOT EXISTS idx_sessions_user_id ON sessions(user_id)",
    "CREATE INDEX IF NOT EXISTS idx_events_user_start ON events(user_id, start_date)",
    "CREATE INDEX IF NOT EXISTS idx_reminders_event_id ON reminders(event_id)",
];

const EVENT_COLUMNS: &str = "id, user_id, title, description, start_date, end_date, category, \
     is_recurring, recurring_pattern, recurring_end_date, encrypted_data, created_at, updated_at";

pub struct PgStore {
    db: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str, max_connections: u32) -> StoreResult<Self> {
        let db = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self { db })
    }

    pub fn from_pool(db: PgPool) -> Self {
        Self { db }
    }

    /// Connects with every table in a fresh `test_<uuid>` schema and runs
    /// the migration there. Concurrent runs against one database stay
    /// isolated from each other.
    pub async fn connect_isolated(database_url: &str) -> StoreResult<Self> {
        let schema = format!("test_{}", Uuid::new_v4().simple());

        let setup = PgPoolOptions::new()
            .max_connections(1)
            .connect(database_url)
            .await?;
        sqlx::query(&format!("CREATE SCHEMA IF NOT EXISTS {schema}"))
            .execute(&setup)
            .await?;
        setup.close().await;

        let search_path = format!("SET search_path TO {schema}");
        let db = PgPoolOptions::new()
            .max_connections(2)
            .acquire_timeout(Duration::from_secs(30))
            .after_connect(move |conn, _meta| {
                let search_path = search_path.clone();
                Box::pin(async move {
                    conn.execute(search_path.as_str()).await?;
                    Ok(())
                })
            })
            .connect(database_url)
            .await?;

        let store = Self::from_pool(db);
        store.migrate().await?;
        Ok(store)
    }

    pub async fn migrate(&self) -> StoreResult<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.db).await?;
        }
        log::info!("Database schema verified");
        Ok(())
    }
}

fn user_from_row(row: &PgRow) -> StoreResult<User> {
    Ok(User {
        id: row.try_get("id")?,
        username: row.try_get("username")?,
        password_hash: row.try_get("password_hash")?,
        recovery_key: row.try_get("recovery_key")?,
        encryption_key: row.try_get("encryption_key")?,
        created_at: row.try_get("created_at")?,
    })
}

fn session_from_row(row: &PgRow) -> StoreResult<Session> {
    Ok(Session {
        token: row.try_get("token")?,
        user_id: row.try_get("user_id")?,
        expires_at: row.try_get("expires_at")?,
        created_at: row.try_get("created_at")?,
    })
}

fn event_from_row(row: &PgRow) -> StoreResult<Event> {
    let category: String = row.try_get("category")?;
    let pattern: Option<String> = row.try_get("recurring_pattern")?;
    Ok(Event {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        start_date: row.try_get("start_date")?,
        end_date: row.try_get("end_date")?,
        category: category.parse().map_err(StoreError::Corrupt)?,
        is_recurring: row.try_get("is_recurring")?,
        recurring_pattern: pattern
            .map(|p| p.parse::<RecurringPattern>())
            .transpose()
            .map_err(StoreError::Corrupt)?,
        recurring_end_date: row.try_get("recurring_end_date")?,
        encrypted_data: row.try_get("encrypted_data")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn reminder_from_row(row: &PgRow) -> StoreResult<Reminder> {
    Ok(Reminder {
        id: row.try_get("id")?,
        event_id: row.try_get("event_id")?,
        minutes_before: row.try_get("minutes_before")?,
        is_triggered: row.try_get("is_triggered")?,
        created_at: row.try_get("created_at")?,
    })
}

fn map_unique_violation(err: sqlx::Error) -> StoreError {
    match &err {
        sqlx::Error::Database(db) if db.code().as_deref() == Some(UNIQUE_VIOLATION) => {
            StoreError::Conflict
        }
        _ => StoreError::Database(err),
    }
}

#[async_trait]
impl Store for PgStore {
    fn kind(&self) -> &'static str {
        "postgres"
    }

    async fn create_user(&self, user: NewUser) -> StoreResult<User> {
        let row = sqlx::query(
            "INSERT INTO users (id, username, password_hash, recovery_key, encryption_key)
             VALUES ($1, $2, $3, $4, $5)
             RETURNING id, username, password_hash, recovery_key, encryption_key, created_at",
        )
        .bind(Uuid::new_v4())
        .bind(&user.username)
        .bind(&user.password_hash)
        .bind(&user.recovery_key)
        .bind(&user.encryption_key)
        .fetch_one(&self.db)
        .await
        .map_err(map_unique_violation)?;
        user_from_row(&row)
    }

    async fn find_user_by_username(&self, username: &str) -> StoreResult<Option<User>> {
        sqlx::query(
            "SELECT id, username, password_hash, recovery_key, encryption_key, created_at
             FROM users WHERE username = $1",
        )
        .bind(username)
        .fetch_optional(&self.db)
        .await?
        .as_ref()
        .map(user_from_row)
        .transpose()
    }

    async fn find_user(&self, id: Uuid) -> StoreResult<Option<User>> {
        sqlx::query(
            "SELECT id, username, password_hash, recovery_key, encryption_key, created_at
             FROM users WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await?
        .as_ref()
        .map(user_from_row)
        .transpose()
    }

    async fn update_password(&self, id: Uuid, password_hash: &str) -> StoreResult<bool> {
        let result = sqlx::query("UPDATE users SET password_hash = $1 WHERE id = $2")
            .bind(password_hash)
            .bind(id)
            .execute(&self.db)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn insert_session(&self, session: Session) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO sessions (token, user_id, expires_at, created_at) VALUES ($1, $2, $3, $4)",
        )
        .bind(&session.token)
        .bind(session.user_id)
        .bind(session.expires_at)
        .bind(session.created_at)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn resolve_session(&self, token: &str, now: DateTime<Utc>) -> StoreResult<Option<Session>> {
        sqlx::query(
            "SELECT token, user_id, expires_at, created_at
             FROM sessions WHERE token = $1 AND expires_at > $2",
        )
        .bind(token)
        .bind(now)
        .fetch_optional(&self.db)
        .await?
        .as_ref()
        .map(session_from_row)
        .transpose()
    }

    async fn delete_session(&self, token: &str) -> StoreResult<()> {
        sqlx::query("DELETE FROM sessions WHERE token = $1")
            .bind(token)
            .execute(&self.db)
            .await?;
        Ok(())
    }

    async fn list_events(&self, user_id: Uuid, range: Option<DateRange>) -> StoreResult<Vec<Event>> {
        let rows = match range {
            Some(range) => {
                sqlx::query(&format!(
                    "SELECT {EVENT_COLUMNS} FROM events
                     WHERE user_id = $1 AND start_date >= $2 AND start_date <= $3
                     ORDER BY start_date ASC, created_at ASC, id ASC"
                ))
                .bind(user_id)
                .bind(range.start)
                .bind(range.end)
                .fetch_all(&self.db)
                .await?
            }
            None => {
                sqlx::query(&format!(
                    "SELECT {EVENT_COLUMNS} FROM events
                     WHERE user_id = $1
                     ORDER BY start_date ASC, created_at ASC, id ASC"
                ))
                .bind(user_id)
                .fetch_all(&self.db)
                .await?
            }
        };
        rows.iter().map(event_from_row).collect()
    }

    async fn get_event(&self, id: Uuid, user_id: Uuid) -> StoreResult<Option<Event>> {
        sqlx::query(&format!(
            "SELECT {EVENT_COLUMNS} FROM events WHERE id = $1 AND user_id = $2"
        ))
        .bind(id)
        .bind(user_id)
        .fetch_optional(&self.db)
        .await?
        .as_ref()
        .map(event_from_row)
        .transpose()
    }

    async fn create_event(&self, user_id: Uuid, event: NewEvent) -> StoreResult<Event> {
        let row = sqlx::query(&format!(
            "INSERT INTO events (id, user_id, title, description, start_date, end_date, category,
                                 is_recurring, recurring_pattern, recurring_end_date, encrypted_data)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
             RETURNING {EVENT_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(&event.title)
        .bind(&event.description)
        .bind(event.start_date)
        .bind(event.end_date)
        .bind(event.category.as_str())
        .bind(event.is_recurring)
        .bind(event.recurring_pattern.map(|p| p.as_str()))
        .bind(event.recurring_end_date)
        .bind(&event.encrypted_data)
        .fetch_one(&self.db)
        .await?;
        event_from_row(&row)
    }

    async fn update_event(&self, id: Uuid, user_id: Uuid, patch: EventPatch) -> StoreResult<Option<Event>> {
        // Nullable columns carry an explicit "set" flag so that null can
        // clear a value while an absent field leaves it alone.
        sqlx::query(&format!(
            "UPDATE events SET
                title = COALESCE($3, title),
                description = CASE WHEN $4 THEN $5 ELSE description END,
                start_date = COALESCE($6, start_date),
                end_date = CASE WHEN $7 THEN $8 ELSE end_date END,
                category = COALESCE($9, category),
                is_recurring = COALESCE($10, is_recurring),
                recurring_pattern = CASE WHEN $11 THEN $12 ELSE recurring_pattern END,
                recurring_end_date = CASE WHEN $13 THEN $14 ELSE recurring_end_date END,
                encrypted_data = CASE WHEN $15 THEN $16 ELSE encrypted_data END,
                updated_at = GREATEST(NOW(), updated_at)
             WHERE id = $1 AND user_id = $2
             RETURNING {EVENT_COLUMNS}"
        ))
        .bind(id)
        .bind(user_id)
        .bind(&patch.title)
        .bind(patch.description.is_some())
        .bind(patch.description.clone().flatten())
        .bind(patch.start_date)
        .bind(patch.end_date.is_some())
        .bind(patch.end_date.flatten())
        .bind(patch.category.map(|c| c.as_str()))
        .bind(patch.is_recurring)
        .bind(patch.recurring_pattern.is_some())
        .bind(patch.recurring_pattern.flatten().map(|p| p.as_str()))
        .bind(patch.recurring_end_date.is_some())
        .bind(patch.recurring_end_date.flatten())
        .bind(patch.encrypted_data.is_some())
        .bind(patch.encrypted_data.clone().flatten())
        .fetch_optional(&self.db)
        .await?
        .as_ref()
        .map(event_from_row)
        .transpose()
    }

    async fn delete_event(&self, id: Uuid, user_id: Uuid) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM events WHERE id = $1 AND user_id = $2")
            .bind(id)
            .bind(user_id)
            .execute(&self.db)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn count_by_category(&self, user_id: Uuid) -> StoreResult<BTreeMap<Category, i64>> {
        let rows = sqlx::query(
            "SELECT category, COUNT(*) AS count FROM events WHERE user_id = $1 GROUP BY category",
        )
        .bind(user_id)
        .fetch_all(&self.db)
        .await?;

        let mut counts = BTreeMap::new();
        for row in rows {
            let category: String = row.try_get("category")?;
            let category: Category = category.parse().map_err(StoreError::Corrupt)?;
            counts.insert(category, row.try_get::<i64, _>("count")?);
        }
        Ok(counts)
    }

    async fn list_reminders(&self, event_id: Uuid) -> StoreResult<Vec<Reminder>> {
        let rows = sqlx::query(
            "SELECT id, event_id, minutes_before, is_triggered, created_at
             FROM reminders WHERE event_id = $1 ORDER BY created_at ASC, id ASC",
        )
        .bind(event_id)
        .fetch_all(&self.db)
        .await?;
        rows.iter().map(reminder_from_row).collect()
    }

    async fn get_reminder(&self, id: Uuid) -> StoreResult<Option<Reminder>> {
        sqlx::query(
            "SELECT id, event_id, minutes_before, is_triggered, created_at
             FROM reminders WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await?
        .as_ref()
        .map(reminder_from_row)
        .transpose()
    }

    async fn create_reminder(&self, event_id: Uuid, minutes_before: i32) -> StoreResult<Reminder> {
        let row = sqlx::query(
            "INSERT INTO reminders (id, event_id, minutes_before) VALUES ($1, $2, $3)
             RETURNING id, event_id, minutes_before, is_triggered, created_at",
        )
        .bind(Uuid::new_v4())
        .bind(event_id)
        .bind(minutes_before)
        .fetch_one(&self.db)
        .await?;
        reminder_from_row(&row)
    }

    async fn delete_reminder(&self, id: Uuid) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM reminders WHERE id = $1")
            .bind(id)
            .execute(&self.db)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
