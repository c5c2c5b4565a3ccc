//! Claim and count filters.

use serde_json::Value;

use crate::error::QueueError;

/// Characters that would let a payload key escape its field path.
const FORBIDDEN_KEY_CHARS: &[char] = &['.', '$', '[', ']', '"', '\\', '*'];

/// What a dequeuer will accept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimFilter {
    accepted_types: Vec<String>,
    min_priority: i64,
}

impl ClaimFilter {
    /// Build a filter; duplicate types are dropped, order is kept.
    pub fn new<I, S>(accepted_types: I, min_priority: i64) -> Result<Self, QueueError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut types: Vec<String> = Vec::new();
        for ty in accepted_types {
            let ty = ty.into();
            if ty.trim().is_empty() {
                return Err(QueueError::InvalidFilter("empty queue type".to_string()));
            }
            if !types.contains(&ty) {
                types.push(ty);
            }
        }
        if types.is_empty() {
            return Err(QueueError::InvalidFilter("no queue types".to_string()));
        }

        Ok(Self {
            accepted_types: types,
            min_priority,
        })
    }

    pub fn accepted_types(&self) -> &[String] {
        &self.accepted_types
    }

    pub fn min_priority(&self) -> i64 {
        self.min_priority
    }

    pub fn accepts(&self, task_type: &str, priority: i64) -> bool {
        priority >= self.min_priority && self.accepted_types.iter().any(|t| t == task_type)
    }
}

/// A payload key safe to embed in a field path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterKey(String);

impl FilterKey {
    pub fn parse(key: impl Into<String>) -> Result<Self, QueueError> {
        let key = key.into();
        if key.is_empty()
            || key.contains(FORBIDDEN_KEY_CHARS)
            || key.chars().any(char::is_control)
        {
            return Err(QueueError::InvalidFilterKey(key));
        }
        Ok(Self(key))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// SQLite JSON path selecting this key at the payload root.
    pub(crate) fn json_path(&self) -> String {
        format!("$.\"{}\"", self.0)
    }
}

/// Count of waiting tasks, optionally narrowed by type and one payload field.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CountQuery {
    pub task_type: Option<String>,
    pub payload_match: Option<(FilterKey, Value)>,
}

impl CountQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_type(mut self, task_type: impl Into<String>) -> Self {
        self.task_type = Some(task_type.into());
        self
    }

    pub fn with_payload_match(mut self, key: FilterKey, value: Value) -> Self {
        self.payload_match = Some((key, value));
        self
    }

    pub(crate) fn matches(&self, task_type: &str, payload: &crate::task::Payload) -> bool {
        if let Some(expected) = &self.task_type {
            if expected != task_type {
                return false;
            }
        }
        match &self.payload_match {
            Some((key, value)) => payload.get(key.as_str()) == Some(value),
            None => true,
        }
    }
}
