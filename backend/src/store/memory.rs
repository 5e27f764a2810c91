use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{next_updated_at, DateRange, Store, StoreError, StoreResult};
use crate::models::{Category, Event, EventPatch, NewEvent, NewUser, Reminder, Session, User};

#[derive(Default)]
struct Tables {
    users: HashMap<Uuid, User>,
    sessions: HashMap<String, Session>, // token -> session
    events: HashMap<Uuid, Event>,
    reminders: HashMap<Uuid, Reminder>,
}

/// Process-local store used when no database is configured. Contents are
/// lost on restart.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    fn kind(&self) -> &'static str {
        "memory"
    }

    async fn create_user(&self, new_user: NewUser) -> StoreResult<User> {
        let mut tables = self.tables.write().await;
        if tables.users.values().any(|u| u.username == new_user.username) {
            return Err(StoreError::Conflict);
        }

        let user = User {
            id: Uuid::new_v4(),
            username: new_user.username,
            password_hash: new_user.password_hash,
            recovery_key: new_user.recovery_key,
            encryption_key: new_user.encryption_key,
            created_at: Utc::now(),
        };
        tables.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn find_user_by_username(&self, username: &str) -> StoreResult<Option<User>> {
        let tables = self.tables.read().await;
        Ok(tables.users.values().find(|u| u.username == username).cloned())
    }

    async fn find_user(&self, id: Uuid) -> StoreResult<Option<User>> {
        Ok(self.tables.read().await.users.get(&id).cloned())
    }

    async fn update_password(&self, id: Uuid, password_hash: &str) -> StoreResult<bool> {
        let mut tables = self.tables.write().await;
        match tables.users.get_mut(&id) {
            Some(user) => {
                user.password_hash = password_hash.to_string();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn insert_session(&self, session: Session) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        tables.sessions.insert(session.token.clone(), session);
        Ok(())
    }

    async fn resolve_session(&self, token: &str, now: DateTime<Utc>) -> StoreResult<Option<Session>> {
        let tables = self.tables.read().await;
        Ok(tables
            .sessions
            .get(token)
            .filter(|s| s.is_valid_at(now))
            .cloned())
    }

    async fn delete_session(&self, token: &str) -> StoreResult<()> {
        self.tables.write().await.sessions.remove(token);
        Ok(())
    }

    async fn list_events(&self, user_id: Uuid, range: Option<DateRange>) -> StoreResult<Vec<Event>> {
        let tables = self.tables.read().await;
        let mut events: Vec<Event> = tables
            .events
            .values()
            .filter(|e| e.user_id == user_id)
            .filter(|e| range.map_or(true, |r| r.contains(e.start_date)))
            .cloned()
            .collect();
        events.sort_by(|a, b| {
            a.start_date
                .cmp(&b.start_date)
                .then(a.created_at.cmp(&b.created_at))
                .then(a.id.cmp(&b.id))
        });
        Ok(events)
    }

    async fn get_event(&self, id: Uuid, user_id: Uuid) -> StoreResult<Option<Event>> {
        let tables = self.tables.read().await;
        Ok(tables
            .events
            .get(&id)
            .filter(|e| e.user_id == user_id)
            .cloned())
    }

    async fn create_event(&self, user_id: Uuid, new_event: NewEvent) -> StoreResult<Event> {
        let now = Utc::now();
        let event = Event {
            id: Uuid::new_v4(),
            user_id,
            title: new_event.title,
            description: new_event.description,
            start_date: new_event.start_date,
            end_date: new_event.end_date,
            category: new_event.category,
            is_recurring: new_event.is_recurring,
            recurring_pattern: new_event.recurring_pattern,
            recurring_end_date: new_event.recurring_end_date,
            encrypted_data: new_event.encrypted_data,
            created_at: now,
            updated_at: now,
        };
        self.tables.write().await.events.insert(event.id, event.clone());
        Ok(event)
    }

    async fn update_event(&self, id: Uuid, user_id: Uuid, patch: EventPatch) -> StoreResult<Option<Event>> {
        let mut tables = self.tables.write().await;
        let Some(event) = tables.events.get_mut(&id).filter(|e| e.user_id == user_id) else {
            return Ok(None);
        };
        patch.apply(event);
        event.updated_at = next_updated_at(event.updated_at, Utc::now());
        Ok(Some(event.clone()))
    }

    async fn delete_event(&self, id: Uuid, user_id: Uuid) -> StoreResult<bool> {
        let mut tables = self.tables.write().await;
        let owned = tables.events.get(&id).is_some_and(|e| e.user_id == user_id);
        if !owned {
            return Ok(false);
        }
        tables.events.remove(&id);
        tables.reminders.retain(|_, r| r.event_id != id);
        Ok(true)
    }

    async fn count_by_category(&self, user_id: Uuid) -> StoreResult<BTreeMap<Category, i64>> {
        let tables = self.tables.read().await;
        let mut counts = BTreeMap::new();
        for event in tables.events.values().filter(|e| e.user_id == user_id) {
            *counts.entry(event.category).or_insert(0) += 1;
        }
        Ok(counts)
    }

    async fn list_reminders(&self, event_id: Uuid) -> StoreResult<Vec<Reminder>> {
        let tables = self.tables.read().await;
        let mut reminders: Vec<Reminder> = tables
            .reminders
            .values()
            .filter(|r| r.event_id == event_id)
            .cloned()
            .collect();
        reminders.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(reminders)
    }

    async fn get_reminder(&self, id: Uuid) -> StoreResult<Option<Reminder>> {
        Ok(self.tables.read().await.reminders.get(&id).cloned())
    }

    async fn create_reminder(&self, event_id: Uuid, minutes_before: i32) -> StoreResult<Reminder> {
        let reminder = Reminder {
            id: Uuid::new_v4(),
            event_id,
            minutes_before,
            is_triggered: false,
            created_at: Utc::now(),
        };
        self.tables
            .write()
            .await
            .reminders
            .insert(reminder.id, reminder.clone());
        Ok(reminder)
    }

    async fn delete_reminder(&self, id: Uuid) -> StoreResult<bool> {
        Ok(self.tables.write().await.reminders.remove(&id).is_some())
    }
}
