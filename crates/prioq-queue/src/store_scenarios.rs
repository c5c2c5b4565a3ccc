//! Behaviour every `TaskStore` backend must share.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde_json::json;

use crate::filter::{ClaimFilter, CountQuery, FilterKey};
use crate::store::TaskStore;
use crate::task::{Payload, StatusEntry, Task, TaskStatus};

fn payload(value: serde_json::Value) -> Payload {
    value.as_object().cloned().unwrap()
}

fn task_at(task_type: &str, priority: i64, at: DateTime<Utc>) -> Task {
    Task::new(
        task_type,
        priority,
        payload(json!({"to": "x"})),
        StatusEntry::new(TaskStatus::Enqueued, at),
    )
}

fn any_of(types: &[&str]) -> ClaimFilter {
    ClaimFilter::new(types.iter().copied(), 0).unwrap()
}

pub(crate) async fn insert_and_get(store: &dyn TaskStore) {
    let now = Utc::now();
    let task = task_at("email", 3, now);
    store.insert(&task).await.unwrap();

    let loaded = store.get(task.id).await.unwrap().unwrap();
    assert_eq!(loaded.task_type, "email");
    assert_eq!(loaded.priority, 3);
    assert_eq!(loaded.payload, task.payload);
    assert_eq!(loaded.status_history.len(), 1);
    assert_eq!(loaded.status(), TaskStatus::Enqueued);

    assert!(store.get(uuid::Uuid::new_v4()).await.unwrap().is_none());
}

pub(crate) async fn claim_prefers_priority(store: &dyn TaskStore) {
    let now = Utc::now();
    let low = task_at("email", 5, now - Duration::seconds(10));
    let high = task_at("email", 10, now);
    store.insert(&low).await.unwrap();
    store.insert(&high).await.unwrap();

    let first = store.claim(&any_of(&["email"]), now).await.unwrap().unwrap();
    assert_eq!(first.id, high.id);
    assert_eq!(first.status(), TaskStatus::Processing);

    let second = store.claim(&any_of(&["email"]), now).await.unwrap().unwrap();
    assert_eq!(second.id, low.id);

    assert!(store.claim(&any_of(&["email"]), now).await.unwrap().is_none());
}

pub(crate) async fn claim_breaks_ties_by_age(store: &dyn TaskStore) {
    let now = Utc::now();
    let newer = task_at("email", 1, now - Duration::seconds(1));
    let older = task_at("email", 1, now - Duration::seconds(5));
    store.insert(&newer).await.unwrap();
    store.insert(&older).await.unwrap();

    let first = store.claim(&any_of(&["email"]), now).await.unwrap().unwrap();
    assert_eq!(first.id, older.id);
}

pub(crate) async fn claim_breaks_equal_timestamps_by_insertion(store: &dyn TaskStore) {
    let now = Utc::now();
    let first_in = task_at("email", 1, now);
    let second_in = task_at("email", 1, now);
    store.insert(&first_in).await.unwrap();
    store.insert(&second_in).await.unwrap();

    let first = store.claim(&any_of(&["email"]), now).await.unwrap().unwrap();
    assert_eq!(first.id, first_in.id);
}

pub(crate) async fn claim_respects_filter(store: &dyn TaskStore) {
    let now = Utc::now();
    store.insert(&task_at("sms", 10, now)).await.unwrap();
    let email = task_at("email", 2, now);
    store.insert(&email).await.unwrap();

    let strict = ClaimFilter::new(["email"], 3).unwrap();
    assert!(store.claim(&strict, now).await.unwrap().is_none());

    let claimed = store.claim(&any_of(&["email", "push"]), now).await.unwrap().unwrap();
    assert_eq!(claimed.id, email.id);
}

pub(crate) async fn claim_waits_for_reevaluation(store: &dyn TaskStore) {
    let now = Utc::now();
    let later = now + Duration::seconds(60);
    let deferred = Task::new(
        "email",
        1,
        payload(json!({"to": "x"})),
        StatusEntry::new(TaskStatus::Enqueued, now).with_next_reevaluation(Some(later)),
    );
    store.insert(&deferred).await.unwrap();

    assert!(store.claim(&any_of(&["email"]), now).await.unwrap().is_none());
    assert!(
        store
            .claim(&any_of(&["email"]), now + Duration::seconds(59))
            .await
            .unwrap()
            .is_none()
    );

    let claimed = store.claim(&any_of(&["email"]), later).await.unwrap().unwrap();
    assert_eq!(claimed.id, deferred.id);
}

pub(crate) async fn transition_requires_expected_status(store: &dyn TaskStore) {
    let now = Utc::now();
    let task = task_at("email", 1, now);
    store.insert(&task).await.unwrap();

    let ack = vec![StatusEntry::new(TaskStatus::Processed, now)];
    let outcome = store
        .transition(task.id, TaskStatus::Processing, ack.clone())
        .await
        .unwrap();
    assert!(outcome.is_none());

    let unchanged = store.get(task.id).await.unwrap().unwrap();
    assert_eq!(unchanged.status_history.len(), 1);

    assert!(
        store
            .transition(uuid::Uuid::new_v4(), TaskStatus::Processing, ack)
            .await
            .unwrap()
            .is_none()
    );
}

pub(crate) async fn transition_records_history(store: &dyn TaskStore) {
    let now = Utc::now();
    let retry_at = now + Duration::seconds(30);
    let task = task_at("email", 1, now);
    store.insert(&task).await.unwrap();
    store.claim(&any_of(&["email"]), now).await.unwrap().unwrap();

    let updated = store
        .transition(
            task.id,
            TaskStatus::Processing,
            vec![
                StatusEntry::new(TaskStatus::Failed, now)
                    .with_message(Some("smtp down".to_string()))
                    .with_next_reevaluation(Some(retry_at)),
                StatusEntry::new(TaskStatus::Enqueued, now).with_next_reevaluation(Some(retry_at)),
            ],
        )
        .await
        .unwrap()
        .unwrap();

    let statuses: Vec<_> = updated.status_history.iter().map(|e| e.status).collect();
    assert_eq!(
        statuses,
        vec![
            TaskStatus::Enqueued,
            TaskStatus::Failed,
            TaskStatus::Processing,
            TaskStatus::Enqueued,
        ]
    );
    assert_eq!(updated.status_history[1].message.as_deref(), Some("smtp down"));

    let reloaded = store.get(task.id).await.unwrap().unwrap();
    assert_eq!(reloaded.status_history, updated.status_history);

    assert!(store.claim(&any_of(&["email"]), now).await.unwrap().is_none());
    assert!(store.claim(&any_of(&["email"]), retry_at).await.unwrap().is_some());
}

pub(crate) async fn count_filters(store: &dyn TaskStore) {
    let now = Utc::now();
    for (ty, to) in [("email", "x"), ("email", "y"), ("email", "x"), ("sms", "x")] {
        let task = Task::new(
            ty,
            0,
            payload(json!({"to": to, "attempt": 1})),
            StatusEntry::new(TaskStatus::Enqueued, now),
        );
        store.insert(&task).await.unwrap();
    }

    assert_eq!(store.count(&CountQuery::new()).await.unwrap(), 4);
    assert_eq!(store.count(&CountQuery::new().with_type("email")).await.unwrap(), 3);

    let to_x = CountQuery::new()
        .with_type("email")
        .with_payload_match(FilterKey::parse("to").unwrap(), json!("x"));
    assert_eq!(store.count(&to_x).await.unwrap(), 2);

    let attempt_number = CountQuery::new().with_payload_match(FilterKey::parse("attempt").unwrap(), json!(1));
    assert_eq!(store.count(&attempt_number).await.unwrap(), 4);

    let attempt_text = CountQuery::new().with_payload_match(FilterKey::parse("attempt").unwrap(), json!("1"));
    assert_eq!(store.count(&attempt_text).await.unwrap(), 0);

    let missing = CountQuery::new().with_payload_match(FilterKey::parse("cc").unwrap(), json!("x"));
    assert_eq!(store.count(&missing).await.unwrap(), 0);

    store.claim(&any_of(&["sms"]), now).await.unwrap().unwrap();
    assert_eq!(store.count(&CountQuery::new()).await.unwrap(), 3);
}

pub(crate) async fn purge_expired(store: &dyn TaskStore) {
    let now = Utc::now();
    let stale = task_at("email", 0, now - Duration::hours(25));
    let fresh = task_at("email", 0, now);
    store.insert(&stale).await.unwrap();
    store.insert(&fresh).await.unwrap();

    let purged = store.purge_expired(now - Duration::hours(24)).await.unwrap();
    assert_eq!(purged, 1);
    assert!(store.get(stale.id).await.unwrap().is_none());
    assert!(store.get(fresh.id).await.unwrap().is_some());
}

pub(crate) async fn concurrent_claims_are_exclusive(store: Arc<dyn TaskStore>) {
    let now = Utc::now();
    let task = task_at("email", 1, now);
    store.insert(&task).await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..16 {
        let store = Arc::clone(&store);
        handles.push(tokio::spawn(async move {
            store.claim(&any_of(&["email"]), now).await.unwrap()
        }));
    }

    let mut winners = 0;
    for handle in handles {
        if let Some(claimed) = handle.await.unwrap() {
            assert_eq!(claimed.id, task.id);
            winners += 1;
        }
    }
    assert_eq!(winners, 1);
}
