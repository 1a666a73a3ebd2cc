use crate::api;
use crate::connection::ConnectionManager;
use crate::middleware::trace_requests;
use crate::ws::ws_handler;
use axum::{
    extract::State,
    middleware as axum_mw,
    routing::{get, post},
    Json, Router,
};
use conductor_orchestrator::{Orchestrator, WorkQueue};
use std::sync::Arc;
use std::time::Duration;

/// Longest a queue claim may block, whatever the client asks for.
pub const DEFAULT_MAX_CLAIM_WAIT: Duration = Duration::from_secs(30);

/// Shared application state.
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub queue: Arc<WorkQueue>,
    pub connections: Arc<ConnectionManager>,
    pub max_claim_wait: Duration,
}

/// The main gateway server.
pub struct GatewayServer;

impl GatewayServer {
    /// Build the gateway with the default claim wait cap.
    pub fn build(orchestrator: Arc<Orchestrator>, queue: Arc<WorkQueue>) -> Router {
        Self::build_with_claim_wait(orchestrator, queue, DEFAULT_MAX_CLAIM_WAIT)
    }

    pub fn build_with_claim_wait(
        orchestrator: Arc<Orchestrator>,
        queue: Arc<WorkQueue>,
        max_claim_wait: Duration,
    ) -> Router {
        let state = Arc::new(AppState {
            orchestrator,
            queue,
            connections: ConnectionManager::new(),
            max_claim_wait,
        });

        Router::new()
            .route("/health", get(health_handler))
            .route("/ws", get(ws_handler))
            .route("/tasks", post(api::submit_task).get(api::list_tasks))
            .route("/tasks/{id}", get(api::get_task))
            .route("/tasks/{id}/log", get(api::get_task_log))
            .route("/tasks/{id}/abort", post(api::abort_task))
            .route("/queues/results", post(api::submit_result))
            .route("/queues/{stage}/claim", post(api::claim_work))
            .route("/agents", get(api::list_agents))
            .route("/agents/heartbeat", post(api::heartbeat))
            .route("/agents/{agent_id}/register", post(api::register_agent))
            .route("/agents/{agent_id}/deregister", post(api::deregister_agent))
            .route(
                "/templates",
                get(api::list_templates).post(api::register_template),
            )
            .route("/templates/{name}", get(api::get_template))
            .route("/templates/{name}/deactivate", post(api::deactivate_template))
            .route("/plan", post(api::plan))
            .layer(axum_mw::from_fn(trace_requests))
            .with_state(state)
    }
}

async fn health_handler(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": "conductor",
        "running_tasks": state.orchestrator.running_count(),
        "pending_work": state.queue.pending_count(),
        "ws_connections": state.connections.connection_count().await,
        "templates": state.orchestrator.registry().len(),
    }))
}
