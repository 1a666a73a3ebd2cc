use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// A connected progress-stream client.
#[derive(Debug, Clone, Serialize)]
pub struct Connection {
    pub id: Uuid,
    /// Only events of this task are forwarded; `None` forwards everything.
    pub task_filter: Option<Uuid>,
    pub connected_at: DateTime<Utc>,
}

/// Tracks active WebSocket progress streams.
pub struct ConnectionManager {
    connections: RwLock<HashMap<Uuid, Connection>>,
}

impl ConnectionManager {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn add(&self, task_filter: Option<Uuid>) -> Connection {
        let conn = Connection {
            id: Uuid::new_v4(),
            task_filter,
            connected_at: Utc::now(),
        };
        self.connections.write().await.insert(conn.id, conn.clone());
        tracing::info!(connection_id = %conn.id, task_id = ?task_filter, "Connection added");
        conn
    }

    pub async fn remove(&self, id: Uuid) {
        self.connections.write().await.remove(&id);
        tracing::info!(connection_id = %id, "Connection removed");
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Number of clients watching `task_id`, including unfiltered ones.
    pub async fn watchers_of(&self, task_id: Uuid) -> usize {
        self.connections
            .read()
            .await
            .values()
            .filter(|c| c.task_filter.map_or(true, |t| t == task_id))
            .count()
    }
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_add_remove_and_watchers() {
        let manager = ConnectionManager::new();
        let task = Uuid::new_v4();
        let filtered = manager.add(Some(task)).await;
        let _all = manager.add(None).await;
        let _other = manager.add(Some(Uuid::new_v4())).await;

        assert_eq!(manager.connection_count().await, 3);
        assert_eq!(manager.watchers_of(task).await, 2);

        manager.remove(filtered.id).await;
        assert_eq!(manager.watchers_of(task).await, 1);
    }
}
