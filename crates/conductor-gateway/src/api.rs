use crate::error::{ApiError, ApiResult};
use crate::server::AppState;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use conductor_core::{
    AgentHealth, HealthSnapshot, QueryFeatures, StageRecord, StageResult, Task, TaskStatus,
    Template, TemplateDefinition,
};
use conductor_orchestrator::WorkItem;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

// --- Tasks ---

#[derive(Debug, Deserialize)]
pub struct SubmitRequest {
    pub user_id: String,
    pub query: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub task_id: Uuid,
    pub template: String,
    pub template_version: u32,
    pub status: TaskStatus,
}

pub async fn submit_task(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SubmitRequest>,
) -> ApiResult<impl IntoResponse> {
    if req.query.trim().is_empty() {
        return Err(ApiError::BadRequest("query must not be empty".into()));
    }
    let task = state.orchestrator.submit(&req.user_id, &req.query).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitResponse {
            task_id: task.id,
            template: task.template_name,
            template_version: task.template_version,
            status: task.status,
        }),
    ))
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub status: Option<String>,
}

pub async fn list_tasks(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<Vec<Task>>> {
    let status = match query.status.as_deref() {
        None | Some("") => None,
        Some(raw) => Some(
            TaskStatus::parse(raw)
                .ok_or_else(|| ApiError::BadRequest(format!("unknown task status '{raw}'")))?,
        ),
    };
    Ok(Json(state.orchestrator.list(status).await?))
}

pub async fn get_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Task>> {
    Ok(Json(state.orchestrator.get(id).await?))
}

pub async fn get_task_log(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Vec<StageRecord>>> {
    Ok(Json(state.orchestrator.stage_log(id).await?))
}

#[derive(Debug, Default, Deserialize)]
pub struct AbortRequest {
    pub reason: Option<String>,
}

pub async fn abort_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    body: Option<Json<AbortRequest>>,
) -> ApiResult<impl IntoResponse> {
    let reason = body
        .and_then(|Json(req)| req.reason)
        .unwrap_or_else(|| "aborted by request".to_string());
    let task = state.orchestrator.abort(id, &reason).await?;
    Ok((StatusCode::ACCEPTED, Json(task)))
}

// --- Stage work queue ---

#[derive(Debug, Deserialize)]
pub struct ClaimQuery {
    pub wait_ms: Option<u64>,
}

pub async fn claim_work(
    State(state): State<Arc<AppState>>,
    Path(stage): Path<String>,
    Query(query): Query<ClaimQuery>,
) -> Result<Json<WorkItem>, StatusCode> {
    let wait = Duration::from_millis(query.wait_ms.unwrap_or(0)).min(state.max_claim_wait);
    match state.queue.claim(&stage, wait).await {
        Some(item) => Ok(Json(item)),
        None => Err(StatusCode::NO_CONTENT),
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ResultSubmission {
    pub work_id: Uuid,
    pub result: StageResult,
}

pub async fn submit_result(
    State(state): State<Arc<AppState>>,
    Json(submission): Json<ResultSubmission>,
) -> ApiResult<impl IntoResponse> {
    if state.queue.complete(submission.work_id, submission.result) {
        Ok((
            StatusCode::ACCEPTED,
            Json(serde_json::json!({ "accepted": true })),
        ))
    } else {
        Err(ApiError::Gone(format!(
            "work item {} is no longer awaited",
            submission.work_id
        )))
    }
}

// --- Agents ---

#[derive(Debug, Deserialize)]
pub struct HeartbeatRequest {
    pub agent_id: String,
    #[serde(flatten)]
    pub snapshot: HealthSnapshot,
}

pub async fn heartbeat(
    State(state): State<Arc<AppState>>,
    Json(req): Json<HeartbeatRequest>,
) -> ApiResult<Json<AgentHealth>> {
    if req.agent_id.trim().is_empty() {
        return Err(ApiError::BadRequest("agent_id must not be empty".into()));
    }
    let record = state
        .orchestrator
        .publisher()
        .publish_heartbeat(&req.agent_id, &req.snapshot)
        .await;
    Ok(Json(record))
}

pub async fn list_agents(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(state.orchestrator.monitor().to_json().await)
}

pub async fn register_agent(
    State(state): State<Arc<AppState>>,
    Path(agent_id): Path<String>,
) -> Json<AgentHealth> {
    Json(state.orchestrator.monitor().register(&agent_id).await)
}

pub async fn deregister_agent(
    State(state): State<Arc<AppState>>,
    Path(agent_id): Path<String>,
) -> Result<Json<AgentHealth>, StatusCode> {
    state
        .orchestrator
        .monitor()
        .deregister(&agent_id)
        .await
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

// --- Templates and planning ---

pub async fn list_templates(State(state): State<Arc<AppState>>) -> Json<Vec<Template>> {
    let templates = state.orchestrator.registry().list();
    Json(templates.iter().map(|t| t.as_ref().clone()).collect())
}

pub async fn get_template(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> ApiResult<Json<Template>> {
    let template = state.orchestrator.registry().get(&name)?;
    Ok(Json(template.as_ref().clone()))
}

pub async fn register_template(
    State(state): State<Arc<AppState>>,
    Json(definition): Json<TemplateDefinition>,
) -> ApiResult<impl IntoResponse> {
    let template = state.orchestrator.registry().register(definition)?;
    Ok((StatusCode::CREATED, Json(template.as_ref().clone())))
}

pub async fn deactivate_template(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> ApiResult<Json<Template>> {
    let template = state.orchestrator.registry().deactivate(&name)?;
    Ok(Json(template.as_ref().clone()))
}

#[derive(Debug, Deserialize)]
pub struct PlanRequest {
    pub query: String,
    #[serde(default)]
    pub user_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PlanResponse {
    pub template: Template,
    pub features: QueryFeatures,
    /// Plan stages that no executor currently serves.
    pub missing_executors: Vec<String>,
}

pub async fn plan(
    State(state): State<Arc<AppState>>,
    Json(req): Json<PlanRequest>,
) -> ApiResult<Json<PlanResponse>> {
    let user_id = req.user_id.as_deref().unwrap_or("anonymous");
    let (template, features) = state.orchestrator.choose_plan(&req.query, user_id)?;
    let missing_executors = state
        .orchestrator
        .executors()
        .missing(&template.stages)
        .into_iter()
        .map(str::to_string)
        .collect();
    Ok(Json(PlanResponse {
        template: template.as_ref().clone(),
        features,
        missing_executors,
    }))
}
