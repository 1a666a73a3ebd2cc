use crate::store::{TaskMutation, TaskStore};
use async_trait::async_trait;
use conductor_core::{ConductorError, ConductorResult, StageRecord, Task, TaskStatus};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// In-process task store. Nothing survives a restart.
pub struct MemoryTaskStore {
    tasks: RwLock<HashMap<Uuid, Task>>,
    logs: RwLock<HashMap<Uuid, Vec<StageRecord>>>,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self {
            tasks: RwLock::new(HashMap::new()),
            logs: RwLock::new(HashMap::new()),
        }
    }

    pub async fn task_count(&self) -> usize {
        self.tasks.read().await.len()
    }
}

impl Default for MemoryTaskStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn insert(&self, task: &Task) -> ConductorResult<()> {
        let mut tasks = self.tasks.write().await;
        if tasks.contains_key(&task.id) {
            return Err(ConductorError::Store(format!(
                "task {} already exists",
                task.id
            )));
        }
        tasks.insert(task.id, task.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> ConductorResult<Task> {
        self.tasks
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(ConductorError::TaskNotFound(id))
    }

    async fn list(&self, status: Option<TaskStatus>) -> ConductorResult<Vec<Task>> {
        let tasks = self.tasks.read().await;
        let mut out: Vec<Task> = tasks
            .values()
            .filter(|t| status.map_or(true, |s| t.status == s))
            .cloned()
            .collect();
        out.sort_by_key(|t| t.started_at);
        Ok(out)
    }

    async fn mutate(&self, id: Uuid, mutation: TaskMutation) -> ConductorResult<Task> {
        let mut tasks = self.tasks.write().await;
        let task = tasks.get_mut(&id).ok_or(ConductorError::TaskNotFound(id))?;
        // Work on a copy so a rejected mutation leaves the stored task untouched.
        let mut updated = task.clone();
        if mutation.apply(&mut updated)? {
            *task = updated.clone();
        }
        Ok(updated)
    }

    async fn append_record(&self, record: &StageRecord) -> ConductorResult<()> {
        self.logs
            .write()
            .await
            .entry(record.task_id)
            .or_default()
            .push(record.clone());
        Ok(())
    }

    async fn stage_log(&self, id: Uuid) -> ConductorResult<Vec<StageRecord>> {
        Ok(self
            .logs
            .read()
            .await
            .get(&id)
            .cloned()
            .unwrap_or_default())
    }
}
