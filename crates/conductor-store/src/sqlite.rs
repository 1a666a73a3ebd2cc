use crate::store::{TaskMutation, TaskStore};
use async_trait::async_trait;
use conductor_core::{ConductorError, ConductorResult, StageRecord, Task, TaskStatus};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use tokio::sync::Mutex;
use uuid::Uuid;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS tasks (
    id          TEXT PRIMARY KEY,
    status      TEXT NOT NULL,
    revision    INTEGER NOT NULL,
    started_at  TEXT NOT NULL,
    body        TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status);
CREATE TABLE IF NOT EXISTS stage_records (
    seq         INTEGER PRIMARY KEY AUTOINCREMENT,
    task_id     TEXT NOT NULL,
    body        TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_stage_records_task ON stage_records(task_id, seq);
";

fn db_err(e: rusqlite::Error) -> ConductorError {
    ConductorError::Store(format!("sqlite: {e}"))
}

/// SQLite-backed task store.
///
/// Tasks are stored as JSON bodies next to the columns used for filtering.
/// Every mutation runs inside a transaction and is guarded by the stored
/// revision, so a second process writing the same database cannot silently
/// overwrite a newer task.
pub struct SqliteTaskStore {
    db: Mutex<Connection>,
}

impl SqliteTaskStore {
    pub fn open(path: &Path) -> ConductorResult<Self> {
        let conn = Connection::open(path).map_err(db_err)?;
        Self::with_connection(conn)
    }

    pub fn in_memory() -> ConductorResult<Self> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> ConductorResult<Self> {
        conn.execute_batch(SCHEMA).map_err(db_err)?;
        Ok(Self {
            db: Mutex::new(conn),
        })
    }

    fn decode(body: &str) -> ConductorResult<Task> {
        serde_json::from_str(body)
            .map_err(|e| ConductorError::Store(format!("corrupt task row: {e}")))
    }
}

#[async_trait]
impl TaskStore for SqliteTaskStore {
    async fn insert(&self, task: &Task) -> ConductorResult<()> {
        let db = self.db.lock().await;
        let body = serde_json::to_string(task)?;
        db.execute(
            "INSERT INTO tasks (id, status, revision, started_at, body) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                task.id.to_string(),
                task.status.as_str(),
                task.revision as i64,
                task.started_at.to_rfc3339(),
                body
            ],
        )
        .map_err(|e| match e {
            rusqlite::Error::SqliteFailure(f, _)
                if f.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                ConductorError::Store(format!("task {} already exists", task.id))
            }
            other => db_err(other),
        })?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> ConductorResult<Task> {
        let db = self.db.lock().await;
        let body: Option<String> = db
            .query_row(
                "SELECT body FROM tasks WHERE id = ?1",
                params![id.to_string()],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_err)?;
        match body {
            Some(body) => Self::decode(&body),
            None => Err(ConductorError::TaskNotFound(id)),
        }
    }

    async fn list(&self, status: Option<TaskStatus>) -> ConductorResult<Vec<Task>> {
        let db = self.db.lock().await;
        let bodies: Vec<String> = match status {
            Some(status) => {
                let mut stmt = db
                    .prepare("SELECT body FROM tasks WHERE status = ?1 ORDER BY started_at ASC")
                    .map_err(db_err)?;
                let rows = stmt
                    .query_map(params![status.as_str()], |row| row.get(0))
                    .map_err(db_err)?;
                rows.collect::<Result<_, _>>().map_err(db_err)?
            }
            None => {
                let mut stmt = db
                    .prepare("SELECT body FROM tasks ORDER BY started_at ASC")
                    .map_err(db_err)?;
                let rows = stmt.query_map([], |row| row.get(0)).map_err(db_err)?;
                rows.collect::<Result<_, _>>().map_err(db_err)?
            }
        };
        bodies.iter().map(|b| Self::decode(b)).collect()
    }

    async fn mutate(&self, id: Uuid, mutation: TaskMutation) -> ConductorResult<Task> {
        let mut db = self.db.lock().await;
        let tx = db.transaction().map_err(db_err)?;

        let body: Option<String> = tx
            .query_row(
                "SELECT body FROM tasks WHERE id = ?1",
                params![id.to_string()],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_err)?;
        let mut task = match body {
            Some(body) => Self::decode(&body)?,
            None => return Err(ConductorError::TaskNotFound(id)),
        };
        let expected = task.revision as i64;

        if !mutation.apply(&mut task)? {
            return Ok(task);
        }

        let updated = tx
            .execute(
                "UPDATE tasks SET status = ?1, revision = ?2, body = ?3 WHERE id = ?4 AND revision = ?5",
                params![
                    task.status.as_str(),
                    task.revision as i64,
                    serde_json::to_string(&task)?,
                    id.to_string(),
                    expected
                ],
            )
            .map_err(db_err)?;
        if updated == 0 {
            return Err(ConductorError::Store(format!(
                "task {id} was modified concurrently"
            )));
        }
        tx.commit().map_err(db_err)?;
        Ok(task)
    }

    async fn append_record(&self, record: &StageRecord) -> ConductorResult<()> {
        let db = self.db.lock().await;
        db.execute(
            "INSERT INTO stage_records (task_id, body) VALUES (?1, ?2)",
            params![record.task_id.to_string(), serde_json::to_string(record)?],
        )
        .map_err(db_err)?;
        Ok(())
    }

    async fn stage_log(&self, id: Uuid) -> ConductorResult<Vec<StageRecord>> {
        let db = self.db.lock().await;
        let mut stmt = db
            .prepare("SELECT body FROM stage_records WHERE task_id = ?1 ORDER BY seq ASC")
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![id.to_string()], |row| row.get::<_, String>(0))
            .map_err(db_err)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(serde_json::from_str(&row.map_err(db_err)?)?);
        }
        Ok(out)
    }
}
