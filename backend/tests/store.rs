//! Store behavior, run against the backend chosen by `TEST_BACKEND`.

mod common;

use calendar_backend::{
    models::{Category, Event, EventPatch, NewEvent, NewUser, RecurringPattern, Session},
    store::{DateRange, Store, StoreError},
};
use chrono::{DateTime, Duration, TimeZone, Utc};
use common::test_store;
use std::sync::Arc;
use uuid::Uuid;

fn at(day: u32, hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, day, hour, 0, 0).unwrap()
}

fn new_user(name: &str) -> NewUser {
    NewUser {
        username: name.to_string(),
        password_hash: "hash".to_string(),
        recovery_key: "alpha-beta".to_string(),
        encryption_key: "00".repeat(32),
    }
}

async fn store_with_users() -> (Arc<dyn Store>, Uuid, Uuid) {
    let store = test_store().await;
    let alice = store.create_user(new_user("alice")).await.unwrap();
    let bob = store.create_user(new_user("bob")).await.unwrap();
    (store, alice.id, bob.id)
}

#[tokio::test]
async fn duplicate_username_conflicts() {
    let store = test_store().await;
    store.create_user(new_user("alice")).await.unwrap();
    let err = store.create_user(new_user("alice")).await.unwrap_err();
    assert!(matches!(err, StoreError::Conflict));
}

#[tokio::test]
async fn session_expiry_is_exclusive() {
    let (store, alice, _) = store_with_users().await;
    let expires_at = at(10, 12);
    store
        .insert_session(Session {
            token: "tok".to_string(),
            user_id: alice,
            expires_at,
            created_at: expires_at - Duration::days(7),
        })
        .await
        .unwrap();

    let before = expires_at - Duration::milliseconds(1);
    assert!(store.resolve_session("tok", before).await.unwrap().is_some());
    assert!(store.resolve_session("tok", expires_at).await.unwrap().is_none());
    assert!(store
        .resolve_session("tok", expires_at + Duration::days(1))
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn deleted_session_never_resolves() {
    let (store, alice, _) = store_with_users().await;
    let now = Utc::now();
    store
        .insert_session(Session {
            token: "tok".to_string(),
            user_id: alice,
            expires_at: now + Duration::days(7),
            created_at: now,
        })
        .await
        .unwrap();
    store.delete_session("tok").await.unwrap();
    store.delete_session("tok").await.unwrap();
    assert!(store.resolve_session("tok", now).await.unwrap().is_none());
}

#[tokio::test]
async fn events_are_scoped_to_owner() {
    let (store, alice, bob) = store_with_users().await;
    let event = store
        .create_event(alice, NewEvent::new("Dentist", at(3, 9)))
        .await
        .unwrap();

    assert!(store.list_events(bob, None).await.unwrap().is_empty());
    assert!(store.get_event(event.id, bob).await.unwrap().is_none());
    let patch = EventPatch {
        title: Some("Hijacked".to_string()),
        ..Default::default()
    };
    assert!(store.update_event(event.id, bob, patch).await.unwrap().is_none());
    assert!(!store.delete_event(event.id, bob).await.unwrap());

    let still_there = store.get_event(event.id, alice).await.unwrap().unwrap();
    assert_eq!(still_there.title, "Dentist");
}

#[tokio::test]
async fn list_filters_inclusively_and_orders_by_start() {
    let (store, alice, _) = store_with_users().await;
    for (title, day) in [("c", 20), ("a", 5), ("b", 10), ("d", 25)] {
        store
            .create_event(alice, NewEvent::new(title, at(day, 0)))
            .await
            .unwrap();
    }

    let all = store.list_events(alice, None).await.unwrap();
    let titles: Vec<_> = all.iter().map(|e| e.title.as_str()).collect();
    assert_eq!(titles, ["a", "b", "c", "d"]);

    let range = DateRange::from_bounds(Some(at(10, 0)), Some(at(20, 0)));
    let filtered = store.list_events(alice, range).await.unwrap();
    let titles: Vec<_> = filtered.iter().map(|e| e.title.as_str()).collect();
    assert_eq!(titles, ["b", "c"]);
}

#[tokio::test]
async fn update_applies_partial_fields() {
    let (store, alice, _) = store_with_users().await;
    let mut input = NewEvent::new("Gym", at(2, 7));
    input.description = Some("legs".to_string());
    let created = store.create_event(alice, input).await.unwrap();

    let patch = EventPatch {
        description: Some(None),
        category: Some(Category::Health),
        ..Default::default()
    };
    let updated = store
        .update_event(created.id, alice, patch.clone())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(updated.title, "Gym");
    assert_eq!(updated.description, None);
    assert_eq!(updated.category, Category::Health);
    assert!(updated.updated_at >= created.updated_at);

    let again = store
        .update_event(created.id, alice, patch)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        Event {
            updated_at: updated.updated_at,
            ..again.clone()
        },
        updated
    );
    assert!(again.updated_at >= updated.updated_at);
}

#[tokio::test]
async fn category_counts_omit_empty_categories() {
    let (store, alice, bob) = store_with_users().await;
    for category in [Category::Work, Category::Work, Category::Finance] {
        let mut input = NewEvent::new("x", at(1, 0));
        input.category = category;
        store.create_event(alice, input).await.unwrap();
    }
    store.create_event(bob, NewEvent::new("y", at(1, 0))).await.unwrap();

    let counts = store.count_by_category(alice).await.unwrap();
    assert_eq!(counts.len(), 2);
    assert_eq!(counts[&Category::Work], 2);
    assert_eq!(counts[&Category::Finance], 1);
    assert!(!counts.contains_key(&Category::Personal));
    assert_eq!(counts.values().sum::<i64>(), 3);
}

#[tokio::test]
async fn deleting_event_drops_its_reminders() {
    let (store, alice, _) = store_with_users().await;
    let event = store
        .create_event(alice, NewEvent::new("Flight", at(4, 6)))
        .await
        .unwrap();
    let reminder = store.create_reminder(event.id, 60).await.unwrap();
    assert!(!reminder.is_triggered);
    store.create_reminder(event.id, 60).await.unwrap();
    assert_eq!(store.list_reminders(event.id).await.unwrap().len(), 2);

    assert!(store.delete_event(event.id, alice).await.unwrap());
    assert!(store.list_reminders(event.id).await.unwrap().is_empty());
    assert!(store.get_reminder(reminder.id).await.unwrap().is_none());
    assert!(!store.delete_event(event.id, alice).await.unwrap());
}

#[tokio::test]
async fn update_sets_and_clears_nullable_columns() {
    let (store, alice, _) = store_with_users().await;
    let created = store
        .create_event(alice, NewEvent::new("Course", at(8, 18)))
        .await
        .unwrap();

    let set = EventPatch {
        end_date: Some(Some(at(8, 20))),
        is_recurring: Some(true),
        recurring_pattern: Some(Some(RecurringPattern::Weekly)),
        recurring_end_date: Some(Some(at(29, 20))),
        encrypted_data: Some(Some("b64:cipher".to_string())),
        ..Default::default()
    };
    let updated = store.update_event(created.id, alice, set).await.unwrap().unwrap();
    assert_eq!(updated.end_date, Some(at(8, 20)));
    assert!(updated.is_recurring);
    assert_eq!(updated.recurring_pattern, Some(RecurringPattern::Weekly));
    assert_eq!(updated.recurring_end_date, Some(at(29, 20)));
    assert_eq!(updated.encrypted_data.as_deref(), Some("b64:cipher"));

    // Absent fields stay, explicit nulls clear.
    let clear = EventPatch {
        recurring_pattern: Some(None),
        encrypted_data: Some(None),
        ..Default::default()
    };
    let cleared = store.update_event(created.id, alice, clear).await.unwrap().unwrap();
    assert_eq!(cleared.recurring_pattern, None);
    assert_eq!(cleared.encrypted_data, None);
    assert_eq!(cleared.end_date, Some(at(8, 20)));
    assert_eq!(cleared.recurring_end_date, Some(at(29, 20)));
    assert_eq!(cleared.title, "Course");

    let fetched = store.get_event(created.id, alice).await.unwrap().unwrap();
    assert_eq!(fetched, cleared);
}

#[tokio::test]
async fn sub_second_start_dates_survive_storage() {
    let (store, alice, _) = store_with_users().await;
    let start = at(10, 9) + Duration::microseconds(123_456);
    let created = store
        .create_event(alice, NewEvent::new("Standup", start))
        .await
        .unwrap();
    assert_eq!(created.start_date, start);
    let listed = store.list_events(alice, None).await.unwrap();
    assert_eq!(listed[0].start_date, start);
}

#[tokio::test]
async fn password_update_targets_one_user() {
    let (store, alice, bob) = store_with_users().await;
    assert!(store.update_password(alice, "new-hash").await.unwrap());
    assert!(!store.update_password(Uuid::new_v4(), "x").await.unwrap());

    let alice = store.find_user(alice).await.unwrap().unwrap();
    assert_eq!(alice.password_hash, "new-hash");
    let bob = store.find_user(bob).await.unwrap().unwrap();
    assert_eq!(bob.password_hash, "hash");

    let by_name = store.find_user_by_username("alice").await.unwrap().unwrap();
    assert_eq!(by_name.id, alice.id);
    assert!(store.find_user_by_username("carol").await.unwrap().is_none());
}

#[tokio::test]
async fn reminders_are_listed_and_deleted_individually() {
    let (store, alice, _) = store_with_users().await;
    let event = store
        .create_event(alice, NewEvent::new("Launch", at(12, 15)))
        .await
        .unwrap();
    let early = store.create_reminder(event.id, 1440).await.unwrap();
    let late = store.create_reminder(event.id, 10).await.unwrap();

    let fetched = store.get_reminder(early.id).await.unwrap().unwrap();
    assert_eq!(fetched.event_id, event.id);
    assert_eq!(fetched.minutes_before, 1440);

    assert!(store.delete_reminder(early.id).await.unwrap());
    assert!(!store.delete_reminder(early.id).await.unwrap());
    let remaining = store.list_reminders(event.id).await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].id, late.id);
}
