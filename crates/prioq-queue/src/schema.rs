//! Database schema management.

use rusqlite::Connection;
use tokio_rusqlite::Error;

/// Initialize the database schema.
pub fn init_schema(conn: &Connection) -> Result<(), Error> {
    conn.pragma_update(None, "foreign_keys", true)?;
    conn.busy_timeout(std::time::Duration::from_secs(5))?;
    conn.execute_batch(SCHEMA)?;
    Ok(())
}

const SCHEMA: &str = r#"
-- One row per task, mirroring its current status entry
CREATE TABLE IF NOT EXISTS tasks (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    id TEXT NOT NULL UNIQUE,
    task_type TEXT NOT NULL,
    priority INTEGER NOT NULL,
    payload TEXT NOT NULL,
    current_status TEXT NOT NULL,
    current_at INTEGER NOT NULL,
    next_reevaluation INTEGER
);

-- Append-only status history; highest position is newest
CREATE TABLE IF NOT EXISTS task_statuses (
    task_id TEXT NOT NULL,
    position INTEGER NOT NULL,
    status TEXT NOT NULL,
    at INTEGER NOT NULL,
    next_reevaluation INTEGER,
    message TEXT,
    PRIMARY KEY (task_id, position),
    FOREIGN KEY (task_id) REFERENCES tasks(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_tasks_dequeue
    ON tasks(task_type, priority DESC, current_status, next_reevaluation, current_at);
CREATE INDEX IF NOT EXISTS idx_tasks_expiry ON tasks(current_at);
"#;
