//! SQLite task store.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::types::{Type, Value as SqlValue};
use rusqlite::{OptionalExtension, TransactionBehavior, params, params_from_iter};
use tokio_rusqlite::Connection;
use tracing::{debug, error};
use uuid::Uuid;

use crate::error::QueueError;
use crate::filter::{ClaimFilter, CountQuery};
use crate::schema::init_schema;
use crate::store::TaskStore;
use crate::task::{Payload, StatusEntry, Task, TaskStatus};

const SELECT_CLAIMABLE: &str = "
    SELECT id FROM tasks
    WHERE current_status = 'Enqueued'
      AND task_type IN (SELECT value FROM json_each(?1))
      AND priority >= ?2
      AND (next_reevaluation IS NULL OR next_reevaluation <= ?3)
    ORDER BY priority DESC, current_at ASC, seq ASC
    LIMIT 1";

/// SQLite-backed task store.
///
/// Timestamps are stored as microseconds since the Unix epoch. Every status
/// change is an `UPDATE ... WHERE current_status = ?` inside an immediate
/// transaction, so brokers sharing the file never claim the same task twice.
pub struct SqliteTaskStore {
    conn: Connection,
}

impl SqliteTaskStore {
    /// Create a new in-memory database.
    pub async fn in_memory() -> Result<Self, QueueError> {
        let conn = Connection::open_in_memory()
            .await
            .map_err(|e| QueueError::Store(format!("open in-memory database: {e}")))?;
        Self::init(conn).await
    }

    /// Create a new file-backed database.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, QueueError> {
        let path = path.as_ref().to_path_buf();
        let conn = Connection::open(&path)
            .await
            .map_err(|e| QueueError::Store(format!("open {}: {e}", path.display())))?;
        debug!("SqliteTaskStore opened at {:?}", path);
        Self::init(conn).await
    }

    async fn init(conn: Connection) -> Result<Self, QueueError> {
        conn.call(|conn| init_schema(conn))
            .await
            .map_err(store_error("init_schema", String::new()))?;

        Ok(Self { conn })
    }
}

/// Log a failed store call with its operation and filter, then wrap it.
fn store_error(
    operation: &'static str,
    context: String,
) -> impl FnOnce(tokio_rusqlite::Error) -> QueueError {
    move |e| {
        error!(operation, context = %context, error = %e, "store operation failed");
        QueueError::Store(format!("{operation}: {e}"))
    }
}

fn micros(at: DateTime<Utc>) -> i64 {
    at.timestamp_micros()
}

fn from_micros(column: usize, value: i64) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::from_timestamp_micros(value)
        .ok_or(rusqlite::Error::IntegralValueOutOfRange(column, value))
}

fn conversion_error(
    column: usize,
    err: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(column, Type::Text, Box::new(err))
}

fn read_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<StatusEntry> {
    let status: String = row.get(0)?;
    let status = status
        .parse::<TaskStatus>()
        .map_err(|e| conversion_error(0, e))?;
    let timestamp = from_micros(1, row.get(1)?)?;
    let next_reevaluation = row
        .get::<_, Option<i64>>(2)?
        .map(|v| from_micros(2, v))
        .transpose()?;

    Ok(StatusEntry {
        status,
        timestamp,
        next_reevaluation,
        message: row.get(3)?,
    })
}

fn load_task(conn: &rusqlite::Connection, id: &str) -> rusqlite::Result<Option<Task>> {
    let row = conn
        .query_row(
            "SELECT task_type, priority, payload FROM tasks WHERE id = ?1",
            [id],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, String>(2)?,
                ))
            },
        )
        .optional()?;

    let Some((task_type, priority, payload)) = row else {
        return Ok(None);
    };
    let payload: Payload = serde_json::from_str(&payload).map_err(|e| conversion_error(2, e))?;
    let parsed_id = Uuid::parse_str(id).map_err(|e| conversion_error(0, e))?;

    let mut stmt = conn.prepare_cached(
        "SELECT status, at, next_reevaluation, message
         FROM task_statuses WHERE task_id = ?1 ORDER BY position DESC",
    )?;
    let status_history = stmt
        .query_map([id], read_entry)?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(Some(Task {
        id: parsed_id,
        task_type,
        priority,
        payload,
        status_history,
    }))
}

/// Append entries given oldest first.
fn append_entries(conn: &rusqlite::Connection, id: &str, entries: &[StatusEntry]) -> rusqlite::Result<()> {
    let mut position: i64 = conn.query_row(
        "SELECT COALESCE(MAX(position), 0) FROM task_statuses WHERE task_id = ?1",
        [id],
        |row| row.get(0),
    )?;

    let mut stmt = conn.prepare_cached(
        "INSERT INTO task_statuses (task_id, position, status, at, next_reevaluation, message)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
    )?;
    for entry in entries {
        position += 1;
        stmt.execute(params![
            id,
            position,
            entry.status.as_str(),
            micros(entry.timestamp),
            entry.next_reevaluation.map(micros),
            entry.message,
        ])?;
    }
    Ok(())
}

/// Compare-and-swap of the current status columns.
fn swap_current(
    conn: &rusqlite::Connection,
    id: &str,
    expected: TaskStatus,
    newest: &StatusEntry,
) -> rusqlite::Result<bool> {
    let changed = conn.execute(
        "UPDATE tasks SET current_status = ?1, current_at = ?2, next_reevaluation = ?3
         WHERE id = ?4 AND current_status = ?5",
        params![
            newest.status.as_str(),
            micros(newest.timestamp),
            newest.next_reevaluation.map(micros),
            id,
            expected.as_str(),
        ],
    )?;
    Ok(changed == 1)
}

#[async_trait]
impl TaskStore for SqliteTaskStore {
    async fn insert(&self, task: &Task) -> Result<(), QueueError> {
        let payload =
            serde_json::to_string(&task.payload).map_err(|e| QueueError::Store(e.to_string()))?;
        let context = format!("id={} type={}", task.id, task.task_type);
        let task = task.clone();

        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let id = task.id.to_string();
                let current = task.current();

                tx.execute(
                    "INSERT INTO tasks (id, task_type, priority, payload, current_status, current_at, next_reevaluation)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    params![
                        id,
                        task.task_type,
                        task.priority,
                        payload,
                        current.status.as_str(),
                        micros(current.timestamp),
                        current.next_reevaluation.map(micros),
                    ],
                )?;

                let oldest_first: Vec<StatusEntry> = task.status_history.iter().rev().cloned().collect();
                append_entries(&tx, &id, &oldest_first)?;

                tx.commit()?;
                Ok(())
            })
            .await
            .map_err(store_error("insert", context))
    }

    async fn claim(&self, filter: &ClaimFilter, now: DateTime<Utc>) -> Result<Option<Task>, QueueError> {
        let types = serde_json::to_string(filter.accepted_types())
            .map_err(|e| QueueError::Store(e.to_string()))?;
        let min_priority = filter.min_priority();
        let context = format!("types={:?} min_priority={}", filter.accepted_types(), min_priority);

        self.conn
            .call(move |conn| {
                // The immediate transaction holds the write lock from selection
                // to commit, so the selected row cannot be claimed elsewhere.
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

                let candidate: Option<String> = tx
                    .query_row(
                        SELECT_CLAIMABLE,
                        params![types, min_priority, micros(now)],
                        |row| row.get(0),
                    )
                    .optional()?;
                let Some(id) = candidate else {
                    return Ok(None);
                };

                let entry = StatusEntry::new(TaskStatus::Processing, now);
                if !swap_current(&tx, &id, TaskStatus::Enqueued, &entry)? {
                    return Ok(None);
                }
                append_entries(&tx, &id, std::slice::from_ref(&entry))?;
                let task = load_task(&tx, &id)?;
                tx.commit()?;
                Ok(task)
            })
            .await
            .map_err(store_error("claim", context))
    }

    async fn transition(
        &self,
        id: Uuid,
        expected: TaskStatus,
        entries: Vec<StatusEntry>,
    ) -> Result<Option<Task>, QueueError> {
        let Some(newest) = entries.last().cloned() else {
            return Err(QueueError::InvalidTask("transition without status entries".to_string()));
        };
        let context = format!("id={id} expected={expected} next={}", newest.status);
        let id = id.to_string();

        self.conn
            .call(move |conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                if !swap_current(&tx, &id, expected, &newest)? {
                    return Ok(None);
                }
                append_entries(&tx, &id, &entries)?;
                let task = load_task(&tx, &id)?;
                tx.commit()?;
                Ok(task)
            })
            .await
            .map_err(store_error("transition", context))
    }

    async fn count(&self, query: &CountQuery) -> Result<u64, QueueError> {
        let mut sql = String::from("SELECT COUNT(*) FROM tasks WHERE current_status = 'Enqueued'");
        let mut values: Vec<SqlValue> = Vec::new();

        if let Some(task_type) = &query.task_type {
            sql.push_str(" AND task_type = ?");
            values.push(SqlValue::Text(task_type.clone()));
        }
        if let Some((key, value)) = &query.payload_match {
            let path = key.json_path();
            let json = serde_json::to_string(value).map_err(|e| QueueError::Store(e.to_string()))?;
            sql.push_str(
                " AND json_type(payload, ?) = json_type(?) AND json_extract(payload, ?) IS json_extract(?, '$')",
            );
            values.extend([
                SqlValue::Text(path.clone()),
                SqlValue::Text(json.clone()),
                SqlValue::Text(path),
                SqlValue::Text(json),
            ]);
        }
        let context = format!("{query:?}");

        self.conn
            .call(move |conn| {
                let count: i64 = conn.query_row(&sql, params_from_iter(values), |row| row.get(0))?;
                Ok(count as u64)
            })
            .await
            .map_err(store_error("count", context))
    }

    async fn get(&self, id: Uuid) -> Result<Option<Task>, QueueError> {
        let context = format!("id={id}");
        let id = id.to_string();
        self.conn
            .call(move |conn| Ok(load_task(conn, &id)?))
            .await
            .map_err(store_error("get", context))
    }

    async fn purge_expired(&self, cutoff: DateTime<Utc>) -> Result<u64, QueueError> {
        let context = format!("cutoff={cutoff}");
        self.conn
            .call(move |conn| {
                let purged = conn.execute("DELETE FROM tasks WHERE current_at < ?1", [micros(cutoff)])?;
                Ok(purged as u64)
            })
            .await
            .map_err(store_error("purge_expired", context))
    }

    async fn ping(&self) -> Result<(), QueueError> {
        self.conn
            .call(|conn| {
                conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
                Ok(())
            })
            .await
            .map_err(store_error("ping", String::new()))
    }
}

#[cfg(test)]
#[path = "sqlite_tests.rs"]
mod tests;
