use super::*;

use std::collections::HashSet;

use serde_json::json;

use crate::notifier;
use crate::store::MemoryTaskStore;
use crate::task::{NewTask, Payload, TaskStatus};

struct Fixture {
    registry: Arc<WaiterRegistry>,
    queue: Arc<TaskQueue>,
    shutdown: CancellationToken,
}

impl Drop for Fixture {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

fn fixture_with_capacity(capacity: usize) -> Fixture {
    let (notifier, arrivals) = notifier::channel(capacity);
    let queue = Arc::new(TaskQueue::new(Arc::new(MemoryTaskStore::new()), notifier));
    let shutdown = CancellationToken::new();
    let registry = Arc::new(WaiterRegistry::new(Arc::clone(&queue), shutdown.clone()));
    tokio::spawn(Arc::clone(&registry).run(arrivals));
    Fixture {
        registry,
        queue,
        shutdown,
    }
}

fn fixture() -> Fixture {
    fixture_with_capacity(64)
}

fn payload(to: &str) -> Payload {
    json!({ "to": to }).as_object().cloned().unwrap()
}

fn filter(types: &[&str], min_priority: i64) -> ClaimFilter {
    ClaimFilter::new(types.iter().copied(), min_priority).unwrap()
}

async fn wait_for_waiters(registry: &WaiterRegistry, count: usize) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while registry.waiting() != count {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("waiters did not register in time");
}

#[tokio::test]
async fn test_dequeue_fast_path() {
    let f = fixture();
    let id = f.queue.enqueue(NewTask::new("email", payload("x"))).await.unwrap();

    let task = f
        .registry
        .dequeue(filter(&["email"], 0), Duration::from_secs(5))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(task.id, id);
    assert_eq!(f.registry.waiting(), 0);
}

#[tokio::test]
async fn test_blocked_dequeue_wakes_on_enqueue() {
    let f = fixture();
    let registry = Arc::clone(&f.registry);
    let waiter = tokio::spawn(async move {
        registry
            .dequeue(filter(&["email"], 0), Duration::from_secs(5))
            .await
    });
    wait_for_waiters(&f.registry, 1).await;

    let id = f.queue.enqueue(NewTask::new("email", payload("x"))).await.unwrap();

    let task = tokio::time::timeout(Duration::from_secs(1), waiter)
        .await
        .expect("waiter was not woken")
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(task.id, id);
    assert_eq!(task.document["queue_type"], json!("email"));
    assert_eq!(f.registry.waiting(), 0);
}

#[tokio::test]
async fn test_dequeue_times_out_without_task() {
    let f = fixture();
    let result = f
        .registry
        .dequeue(filter(&["email"], 0), Duration::from_millis(100))
        .await
        .unwrap();
    assert!(result.is_none());
    assert_eq!(f.registry.waiting(), 0);

    // An enqueue after the deadline stays in the queue.
    f.queue.enqueue(NewTask::new("email", payload("x"))).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    let waiting = f.queue.count(&crate::filter::CountQuery::new()).await.unwrap();
    assert_eq!(waiting, 1);
}

#[tokio::test]
async fn test_waiter_ignores_ineligible_tasks() {
    let f = fixture();
    let registry = Arc::clone(&f.registry);
    let waiter = tokio::spawn(async move {
        registry
            .dequeue(filter(&["email"], 5), Duration::from_secs(5))
            .await
    });
    wait_for_waiters(&f.registry, 1).await;

    f.queue
        .enqueue(NewTask::new("email", payload("low")).with_priority(3))
        .await
        .unwrap();
    f.queue
        .enqueue(NewTask::new("sms", payload("other")).with_priority(9))
        .await
        .unwrap();
    let wanted = f
        .queue
        .enqueue(NewTask::new("email", payload("high")).with_priority(7))
        .await
        .unwrap();

    let task = tokio::time::timeout(Duration::from_secs(1), waiter)
        .await
        .unwrap()
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(task.id, wanted);
}

#[tokio::test]
async fn test_first_registered_waiter_served_first() {
    let f = fixture();
    let mut first = f.registry.subscribe(filter(&["email"], 0));
    let mut second = f.registry.subscribe(filter(&["email"], 0));

    let id = f.queue.enqueue(NewTask::new("email", payload("x"))).await.unwrap();

    let delivered = tokio::time::timeout(Duration::from_secs(1), first.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(delivered.id, id);

    let nothing = tokio::time::timeout(Duration::from_millis(100), second.recv()).await;
    assert!(nothing.is_err());
    assert_eq!(f.registry.waiting(), 1);
}

#[tokio::test]
async fn test_signal_reaches_later_waiter_when_earlier_takes_other_type() {
    let f = fixture();
    let mut wide = f.registry.subscribe(filter(&["a", "b"], 0));
    let mut narrow = f.registry.subscribe(filter(&["a"], 0));

    let a = f.queue.enqueue(NewTask::new("a", payload("x"))).await.unwrap();
    let b = f
        .queue
        .enqueue(NewTask::new("b", payload("y")).with_priority(10))
        .await
        .unwrap();

    let first = tokio::time::timeout(Duration::from_secs(1), wide.recv())
        .await
        .unwrap()
        .unwrap();
    let second = tokio::time::timeout(Duration::from_secs(1), narrow.recv())
        .await
        .expect("narrow waiter was stranded")
        .unwrap();

    assert_eq!(first.id, b);
    assert_eq!(second.id, a);
    let waiting = f.queue.count(&crate::filter::CountQuery::new()).await.unwrap();
    assert_eq!(waiting, 0);
}

#[tokio::test]
async fn test_deferred_enqueue_wakes_blocked_dequeue() {
    let f = fixture();
    let registry = Arc::clone(&f.registry);
    let waiter = tokio::spawn(async move {
        registry
            .dequeue(filter(&["email"], 0), Duration::from_secs(10))
            .await
    });
    wait_for_waiters(&f.registry, 1).await;

    let id = f
        .queue
        .enqueue(NewTask::new("email", payload("later")).with_reevaluation(Duration::from_secs(1)))
        .await
        .unwrap();

    // Not claimable yet, the immediate signal finds nothing.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(f.registry.waiting(), 1);

    let task = tokio::time::timeout(Duration::from_secs(3), waiter)
        .await
        .expect("waiter was not woken at the reevaluation instant")
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(task.id, id);
}

#[tokio::test]
async fn test_failed_task_wakes_blocked_dequeue_after_retry_delay() {
    let f = fixture();
    let id = f.queue.enqueue(NewTask::new("email", payload("x"))).await.unwrap();
    let claimed = f
        .registry
        .dequeue(filter(&["email"], 0), Duration::from_secs(1))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(claimed.id, id);

    f.queue
        .fail(id, Some(Duration::from_secs(1)), Some("smtp down".to_string()))
        .await
        .unwrap();

    let registry = Arc::clone(&f.registry);
    let waiter = tokio::spawn(async move {
        registry
            .dequeue(filter(&["email"], 0), Duration::from_secs(10))
            .await
    });
    wait_for_waiters(&f.registry, 1).await;

    let task = tokio::time::timeout(Duration::from_secs(3), waiter)
        .await
        .expect("waiter was not woken after the retry delay")
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(task.id, id);
    assert_eq!(f.queue.get(id).await.unwrap().unwrap().status(), TaskStatus::Processing);
}

#[tokio::test]
async fn test_unsubscribe_is_idempotent() {
    let f = fixture();
    let mut subscription = f.registry.subscribe(filter(&["email"], 0));
    assert_eq!(f.registry.waiting(), 1);

    subscription.unsubscribe();
    subscription.unsubscribe();
    assert_eq!(f.registry.waiting(), 0);
    assert!(subscription.recv().await.is_none());
    drop(subscription);
    assert_eq!(f.registry.waiting(), 0);
}

#[tokio::test]
async fn test_unsubscribe_after_delivery_keeps_task() {
    let f = fixture();
    let mut subscription = f.registry.subscribe(filter(&["email"], 0));
    let id = f.queue.enqueue(NewTask::new("email", payload("x"))).await.unwrap();

    let delivered = tokio::time::timeout(Duration::from_secs(1), subscription.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(delivered.id, id);

    subscription.unsubscribe();
    subscription.unsubscribe();
    drop(subscription);

    tokio::time::sleep(Duration::from_millis(50)).await;
    let task = f.queue.get(id).await.unwrap().unwrap();
    assert_eq!(task.status(), TaskStatus::Processing);
}

#[tokio::test]
async fn test_dropped_subscription_returns_undelivered_task() {
    let f = fixture();
    let subscription = f.registry.subscribe(filter(&["email"], 0));
    let id = f.queue.enqueue(NewTask::new("email", payload("x"))).await.unwrap();

    // Delivered into the mailbox, never received.
    wait_for_waiters(&f.registry, 0).await;
    drop(subscription);

    tokio::time::timeout(Duration::from_secs(1), async {
        loop {
            let task = f.queue.get(id).await.unwrap().unwrap();
            if task.status() == TaskStatus::Enqueued {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("task was not returned to the queue");
}

#[tokio::test]
async fn test_overflow_rescan_serves_every_waiter() {
    let f = fixture_with_capacity(1);
    let mut subscriptions: Vec<_> = ["a", "b", "c"]
        .into_iter()
        .map(|ty| f.registry.subscribe(filter(&[ty], 0)))
        .collect();

    for ty in ["a", "b", "c"] {
        f.queue.enqueue(NewTask::new(ty, payload("x"))).await.unwrap();
    }

    for (subscription, ty) in subscriptions.iter_mut().zip(["a", "b", "c"]) {
        let task = tokio::time::timeout(Duration::from_secs(1), subscription.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(task.task_type, ty);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_dequeues_get_distinct_tasks() {
    let f = fixture();
    let mut handles = Vec::new();
    for _ in 0..8 {
        let registry = Arc::clone(&f.registry);
        handles.push(tokio::spawn(async move {
            registry
                .dequeue(filter(&["email"], 0), Duration::from_secs(5))
                .await
                .unwrap()
        }));
    }

    let mut enqueued = HashSet::new();
    for i in 0..8 {
        let id = f
            .queue
            .enqueue(NewTask::new("email", payload(&i.to_string())))
            .await
            .unwrap();
        enqueued.insert(id);
    }

    let mut received = HashSet::new();
    for handle in handles {
        let task = handle.await.unwrap().expect("every dequeuer gets a task");
        assert!(received.insert(task.id), "task {} delivered twice", task.id);
    }
    assert_eq!(received, enqueued);
    assert_eq!(f.registry.waiting(), 0);
}

#[tokio::test]
async fn test_email_round_trip() {
    let f = fixture();
    let id = f
        .queue
        .enqueue(NewTask::new("email", payload("x")).with_priority(3))
        .await
        .unwrap();

    let task = f
        .registry
        .dequeue(filter(&["email"], 0), Duration::from_secs(5))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(task.id, id);
    assert_eq!(task.document["to"], json!("x"));
    assert_eq!(task.document["id"], json!(id.to_string()));
    assert_eq!(task.document["queue_type"], json!("email"));

    f.queue.ack(id).await.unwrap();
    assert!(matches!(f.queue.ack(id).await, Err(QueueError::Conflict { .. })));
}

#[tokio::test]
async fn test_close_cancels_waiters() {
    let f = fixture();
    let registry = Arc::clone(&f.registry);
    let waiter = tokio::spawn(async move {
        registry
            .dequeue(filter(&["email"], 0), Duration::from_secs(5))
            .await
    });
    wait_for_waiters(&f.registry, 1).await;

    f.shutdown.cancel();
    let result = tokio::time::timeout(Duration::from_secs(1), waiter)
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(result, Err(QueueError::Cancelled)));
}
