use crate::store::{TaskMutation, TaskStore};
use async_trait::async_trait;
use conductor_core::{ConductorError, ConductorResult, StageRecord, Task, TaskStatus};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::warn;
use uuid::Uuid;

/// File-based task store.
///
/// Each task lives in `<id>.json`; its stage log is appended to
/// `<id>.stage_log.jsonl`. Task files are replaced through a temporary file
/// and a rename so a crash never leaves a half-written task behind.
pub struct FileTaskStore {
    dir: PathBuf,
    /// Serializes read-modify-write cycles within this process.
    write_lock: Mutex<()>,
}

impl FileTaskStore {
    pub async fn new(dir: PathBuf) -> ConductorResult<Self> {
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn task_path(&self, id: Uuid) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    fn log_path(&self, id: Uuid) -> PathBuf {
        self.dir.join(format!("{id}.stage_log.jsonl"))
    }

    async fn read_task(&self, id: Uuid) -> ConductorResult<Task> {
        let path = self.task_path(id);
        if !path.exists() {
            return Err(ConductorError::TaskNotFound(id));
        }
        let data = tokio::fs::read_to_string(&path).await?;
        serde_json::from_str(&data)
            .map_err(|e| ConductorError::Store(format!("Failed to parse task {id}: {e}")))
    }

    async fn write_task(&self, task: &Task) -> ConductorResult<()> {
        let path = self.task_path(task.id);
        let tmp = self.dir.join(format!("{}.json.tmp", task.id));
        let json = serde_json::to_string_pretty(task)?;
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }
}

#[async_trait]
impl TaskStore for FileTaskStore {
    async fn insert(&self, task: &Task) -> ConductorResult<()> {
        let _guard = self.write_lock.lock().await;
        if self.task_path(task.id).exists() {
            return Err(ConductorError::Store(format!(
                "task {} already exists",
                task.id
            )));
        }
        self.write_task(task).await
    }

    async fn get(&self, id: Uuid) -> ConductorResult<Task> {
        self.read_task(id).await
    }

    async fn list(&self, status: Option<TaskStatus>) -> ConductorResult<Vec<Task>> {
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        let mut tasks = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            let Some(stem) = name.strip_suffix(".json") else {
                continue;
            };
            let Ok(id) = Uuid::parse_str(stem) else {
                continue;
            };
            match self.read_task(id).await {
                Ok(task) if status.map_or(true, |s| task.status == s) => tasks.push(task),
                Ok(_) => {}
                Err(e) => warn!(task_id = %id, error = %e, "Skipping unreadable task file"),
            }
        }
        tasks.sort_by_key(|t| t.started_at);
        Ok(tasks)
    }

    async fn mutate(&self, id: Uuid, mutation: TaskMutation) -> ConductorResult<Task> {
        let _guard = self.write_lock.lock().await;
        let mut task = self.read_task(id).await?;
        if mutation.apply(&mut task)? {
            self.write_task(&task).await?;
        }
        Ok(task)
    }

    async fn append_record(&self, record: &StageRecord) -> ConductorResult<()> {
        let path = self.log_path(record.task_id);
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        let mut line = serde_json::to_string(record)?;
        line.push('\n');
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    async fn stage_log(&self, id: Uuid) -> ConductorResult<Vec<StageRecord>> {
        let path = self.log_path(id);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let data = tokio::fs::read_to_string(&path).await?;
        let records = data
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(serde_json::from_str)
            .collect::<Result<Vec<StageRecord>, _>>()?;
        Ok(records)
    }
}
