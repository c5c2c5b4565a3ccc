use super::*;

use serde_json::json;

fn decode<R: ApiRequest>(body: Value) -> R {
    serde_json::from_value(body).unwrap()
}

#[test]
fn test_enqueue_request_valid() {
    let request: EnqueueRequest = decode(json!({
        "api_key": "k",
        "queue_type": "email",
        "priority": 3,
        "payload": {"to": "x"},
        "reevaluation": 60
    }));
    assert_eq!(request.api_key(), Some("k"));

    let task = request.validate().unwrap();
    assert_eq!(task.task_type, "email");
    assert_eq!(task.priority, 3);
    assert_eq!(task.payload["to"], json!("x"));
    assert_eq!(task.reevaluation, Some(Duration::from_secs(60)));
}

#[test]
fn test_enqueue_request_defaults() {
    let request: EnqueueRequest = decode(json!({"queue_type": "email", "payload": {"to": "x"}}));
    let task = request.validate().unwrap();
    assert_eq!(task.priority, 0);
    assert_eq!(task.reevaluation, None);
}

#[test]
fn test_enqueue_request_reports_every_problem() {
    let request: EnqueueRequest = decode(json!({"payload": {}}));
    let problems = request.validate().unwrap_err();
    assert_eq!(problems["queue_type"], "field queue_type is required");
    assert_eq!(problems["payload"], "field payload is required");
}

#[test]
fn test_enqueue_request_rejects_non_object_payload() {
    let request: EnqueueRequest = decode(json!({"queue_type": "email", "payload": [1, 2]}));
    let problems = request.validate().unwrap_err();
    assert_eq!(problems.len(), 1);
    assert!(problems.contains_key("payload"));
}

#[test]
fn test_dequeue_request_requires_types() {
    let request: DequeueRequest = decode(json!({"queue_types": []}));
    let problems = request.validate().unwrap_err();
    assert_eq!(problems["queue_types"], "field queue_types is required");

    let request: DequeueRequest = decode(json!({"queue_types": ["email", ""]}));
    assert!(request.validate().unwrap_err().contains_key("queue_types"));
}

#[test]
fn test_dequeue_request_valid() {
    let request: DequeueRequest = decode(json!({
        "queue_types": ["email", "sms"],
        "priority": 2,
        "timeout": 5
    }));
    let params = request.validate().unwrap();
    assert_eq!(params.filter.accepted_types(), ["email", "sms"]);
    assert_eq!(params.filter.min_priority(), 2);
    assert_eq!(params.timeout, Some(5));
}

#[test]
fn test_ack_request_id() {
    let id = Uuid::new_v4();
    let request: AckRequest = decode(json!({"id": id.to_string()}));
    assert_eq!(request.validate().unwrap(), id);

    let request: AckRequest = decode(json!({}));
    assert_eq!(request.validate().unwrap_err()["id"], "field id is required");

    let request: AckRequest = decode(json!({"id": "not-a-uuid"}));
    assert!(request.validate().unwrap_err()["id"].contains("not a task id"));
}

#[test]
fn test_fail_request_zero_delay_is_terminal() {
    let id = Uuid::new_v4();
    let request: FailRequest = decode(json!({"id": id.to_string(), "reevaluation": 0, "message": ""}));
    let params = request.validate().unwrap();
    assert_eq!(params.id, id);
    assert_eq!(params.reevaluation, None);
    assert_eq!(params.message, None);
}

#[test]
fn test_fail_request_with_retry() {
    let id = Uuid::new_v4();
    let request: FailRequest = decode(json!({
        "id": id.to_string(),
        "reevaluation": 30,
        "message": "smtp down"
    }));
    let params = request.validate().unwrap();
    assert_eq!(params.reevaluation, Some(Duration::from_secs(30)));
    assert_eq!(params.message.as_deref(), Some("smtp down"));
}

#[test]
fn test_count_request_requires_fields() {
    let request: CountRequest = decode(json!({"value": null}));
    let problems = request.validate().unwrap_err();
    assert_eq!(problems.len(), 3);
    assert_eq!(problems["value"], "field value is required");
}

#[test]
fn test_count_request_rejects_field_path_keys() {
    let request: CountRequest = decode(json!({"queue_type": "email", "key": "a.b", "value": 1}));
    let problems = request.validate().unwrap_err();
    assert!(problems.contains_key("key"));
}

#[test]
fn test_count_request_valid() {
    let request: CountRequest = decode(json!({"queue_type": "email", "key": "to", "value": "x"}));
    let query = request.validate().unwrap();
    assert_eq!(query.task_type.as_deref(), Some("email"));
    let (key, value) = query.payload_match.unwrap();
    assert_eq!(key.as_str(), "to");
    assert_eq!(value, json!("x"));
}
