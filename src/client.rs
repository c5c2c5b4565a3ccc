//! HTTP client for a running broker.

use reqwest::StatusCode;
use serde_json::{Map, Value, json};

use crate::cli::{ClientAction, ClientArgs};

/// Build the endpoint path and JSON body for a client action.
fn request_for(api_key: &str, action: ClientAction) -> Result<(&'static str, Value), Box<dyn std::error::Error>> {
    let mut body = Map::new();
    body.insert("api_key".to_string(), json!(api_key));

    let path = match action {
        ClientAction::Enqueue {
            queue_type,
            priority,
            payload,
            reevaluation,
        } => {
            let payload: Value = serde_json::from_str(&payload)?;
            if !payload.is_object() {
                return Err("payload must be a JSON object".into());
            }
            body.insert("queue_type".to_string(), json!(queue_type));
            body.insert("priority".to_string(), json!(priority));
            body.insert("payload".to_string(), payload);
            if let Some(secs) = reevaluation {
                body.insert("reevaluation".to_string(), json!(secs));
            }
            "/api/v1/enqueue"
        }
        ClientAction::Dequeue {
            queue_types,
            priority,
            timeout,
        } => {
            body.insert("queue_types".to_string(), json!(queue_types));
            body.insert("priority".to_string(), json!(priority));
            if let Some(secs) = timeout {
                body.insert("timeout".to_string(), json!(secs));
            }
            "/api/v1/dequeue"
        }
        ClientAction::Ack { id } => {
            body.insert("id".to_string(), json!(id));
            "/api/v1/ack"
        }
        ClientAction::Fail {
            id,
            reevaluation,
            message,
        } => {
            body.insert("id".to_string(), json!(id));
            if let Some(secs) = reevaluation {
                body.insert("reevaluation".to_string(), json!(secs));
            }
            if let Some(message) = message {
                body.insert("message".to_string(), json!(message));
            }
            "/api/v1/fail"
        }
        ClientAction::Count {
            queue_type,
            key,
            value,
        } => {
            // Bare words are sent as strings.
            let value = serde_json::from_str(&value).unwrap_or(Value::String(value));
            body.insert("queue_type".to_string(), json!(queue_type));
            body.insert("key".to_string(), json!(key));
            body.insert("value".to_string(), value);
            "/api/v1/count"
        }
    };

    Ok((path, Value::Object(body)))
}

/// Send one request and print the response body.
pub(crate) async fn run_client(args: ClientArgs) -> Result<(), Box<dyn std::error::Error>> {
    let (path, body) = request_for(&args.api_key, args.action)?;
    let url = format!("{}{}", args.url.trim_end_matches('/'), path);

    let response = reqwest::Client::new().post(&url).json(&body).send().await?;
    let status = response.status();

    if status == StatusCode::NO_CONTENT {
        println!("{}", json!({"status": status.as_u16(), "message": "no tasks"}));
        return Ok(());
    }

    let text = response.text().await?;
    let body: Value = serde_json::from_str(&text).unwrap_or(Value::String(text));
    println!("{}", serde_json::to_string_pretty(&json!({"status": status.as_u16(), "body": body}))?);

    if status.is_success() {
        Ok(())
    } else {
        Err(format!("request failed with status {status}").into())
    }
}
