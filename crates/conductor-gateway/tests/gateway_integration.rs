#![allow(clippy::unwrap_used, clippy::expect_used)]

use conductor_gateway::GatewayServer;
use conductor_orchestrator::{
    default_registry, ExecutorRegistry, Orchestrator, OrchestratorConfig, QueueExecutor,
    SelectionPolicy, WorkQueue,
};
use conductor_store::FileTaskStore;
use futures_util::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

const WIKI_QUERY: &str = "What is the SRE wiki URL?";

/// Helper: build a test server on a random port, returning the address.
///
/// Every stage is served through the HTTP work queue, so the tests play
/// the role of the remote agents.
async fn start_test_server() -> (String, tempfile::TempDir) {
    let tmp = tempfile::tempdir().unwrap();
    let store = Arc::new(FileTaskStore::new(tmp.path().join("tasks")).await.unwrap());
    let queue = Arc::new(WorkQueue::new());
    let mut executors = ExecutorRegistry::new();
    executors.set_fallback(Arc::new(QueueExecutor::new(queue.clone())));

    let config = OrchestratorConfig {
        backoff_base_ms: 1,
        backoff_max_ms: 5,
        ..Default::default()
    };
    let orchestrator = Orchestrator::new(
        &config,
        Arc::new(default_registry(SelectionPolicy::DeclaredOrder).unwrap()),
        Arc::new(executors),
        store,
    )
    .unwrap();
    let app = GatewayServer::build(Arc::new(orchestrator), queue);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let addr_str = format!("127.0.0.1:{}", addr.port());

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    // Small yield to let the server task start
    tokio::time::sleep(Duration::from_millis(50)).await;

    (addr_str, tmp)
}

async fn submit(client: &reqwest::Client, addr: &str, query: &str) -> serde_json::Value {
    let resp = client
        .post(format!("http://{addr}/tasks"))
        .json(&serde_json::json!({ "user_id": "alice", "query": query }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 202);
    resp.json().await.unwrap()
}

/// Claims one work item of `stage`, waiting up to two seconds.
async fn claim(client: &reqwest::Client, addr: &str, stage: &str) -> serde_json::Value {
    let resp = client
        .post(format!("http://{addr}/queues/{stage}/claim?wait_ms=2000"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200, "no work for {stage}");
    resp.json().await.unwrap()
}

async fn answer(client: &reqwest::Client, addr: &str, work_id: &serde_json::Value, output: &str) -> u16 {
    client
        .post(format!("http://{addr}/queues/results"))
        .json(&serde_json::json!({
            "work_id": work_id,
            "result": { "outcome": "success", "output": output },
        }))
        .send()
        .await
        .unwrap()
        .status()
        .as_u16()
}

async fn wait_for_status(
    client: &reqwest::Client,
    addr: &str,
    task_id: &str,
    status: &str,
) -> serde_json::Value {
    for _ in 0..100 {
        let task: serde_json::Value = client
            .get(format!("http://{addr}/tasks/{task_id}"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        if task["status"] == status {
            return task;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("task {task_id} never reached {status}");
}

#[tokio::test]
async fn test_health_endpoint() {
    let (addr, _tmp) = start_test_server().await;
    let resp = reqwest::get(format!("http://{addr}/health")).await.unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["service"], "conductor");
    assert_eq!(body["templates"], 4);
}

#[tokio::test]
async fn test_submit_and_serve_through_queue() {
    let (addr, _tmp) = start_test_server().await;
    let client = reqwest::Client::new();

    let accepted = submit(&client, &addr, WIKI_QUERY).await;
    assert_eq!(accepted["template"], "quick_answer");
    assert_eq!(accepted["status"], "in_progress");
    let task_id = accepted["task_id"].as_str().unwrap().to_string();

    for stage in ["embedding_lookup", "executor_reasoning", "response_packaging"] {
        let item = claim(&client, &addr, stage).await;
        assert_eq!(item["input"]["task_id"], task_id.as_str());
        assert_eq!(item["input"]["stage"], stage);
        assert_eq!(answer(&client, &addr, &item["work_id"], &format!("{stage} ok")).await, 202);
    }

    let task = wait_for_status(&client, &addr, &task_id, "complete").await;
    assert_eq!(task["progress_percentage"], 100);
    assert_eq!(task["response"]["answer"], "response_packaging ok");

    let log: Vec<serde_json::Value> = client
        .get(format!("http://{addr}/tasks/{task_id}/log"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(log.len(), 6);
    assert_eq!(log[0]["action"], "start");
    assert_eq!(log[5]["action"], "complete");

    let complete: Vec<serde_json::Value> = client
        .get(format!("http://{addr}/tasks?status=complete"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(complete.len(), 1);
}

#[tokio::test]
async fn test_abort_then_late_result_is_gone() {
    let (addr, _tmp) = start_test_server().await;
    let client = reqwest::Client::new();

    let accepted = submit(&client, &addr, WIKI_QUERY).await;
    let task_id = accepted["task_id"].as_str().unwrap().to_string();
    let item = claim(&client, &addr, "embedding_lookup").await;

    let resp = client
        .post(format!("http://{addr}/tasks/{task_id}/abort"))
        .json(&serde_json::json!({ "reason": "user left" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 202);
    let task: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(task["status"], "aborted");
    assert_eq!(task["abort_reason"], "user left");

    assert_eq!(answer(&client, &addr, &item["work_id"], "too late").await, 410);

    let again = client
        .post(format!("http://{addr}/tasks/{task_id}/abort"))
        .send()
        .await
        .unwrap();
    assert_eq!(again.status(), 409);

    let task = wait_for_status(&client, &addr, &task_id, "aborted").await;
    assert!(task["completed_stages"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_unknown_task_is_404() {
    let (addr, _tmp) = start_test_server().await;
    let id = uuid::Uuid::new_v4();
    let resp = reqwest::get(format!("http://{addr}/tasks/{id}")).await.unwrap();
    assert_eq!(resp.status(), 404);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["kind"], "task_not_found");

    let resp = reqwest::get(format!("http://{addr}/tasks/{id}/log")).await.unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn test_template_management() {
    let (addr, _tmp) = start_test_server().await;
    let client = reqwest::Client::new();

    let bad = client
        .post(format!("http://{addr}/templates"))
        .json(&serde_json::json!({ "name": "dup", "stages": ["web_search", "web_search"] }))
        .send()
        .await
        .unwrap();
    assert_eq!(bad.status(), 400);

    let created = client
        .post(format!("http://{addr}/templates"))
        .json(&serde_json::json!({
            "name": "search_only",
            "stages": ["web_search", "response_packaging"],
            "conditions": { "requires_live_data": true },
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(created.status(), 201);
    let template: serde_json::Value = created.json().await.unwrap();
    assert_eq!(template["version"], 1);
    assert_eq!(template["active"], true);

    let default = client
        .post(format!("http://{addr}/templates/standard_query/deactivate"))
        .send()
        .await
        .unwrap();
    assert_eq!(default.status(), 400);

    let missing = client
        .post(format!("http://{addr}/templates/nope/deactivate"))
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status(), 404);

    let deactivated: serde_json::Value = client
        .post(format!("http://{addr}/templates/search_only/deactivate"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(deactivated["active"], false);

    let all: Vec<serde_json::Value> = client
        .get(format!("http://{addr}/templates"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(all.len(), 5);
}

#[tokio::test]
async fn test_plan_dry_run() {
    let (addr, _tmp) = start_test_server().await;
    let client = reqwest::Client::new();
    let plan: serde_json::Value = client
        .post(format!("http://{addr}/plan"))
        .json(&serde_json::json!({ "query": WIKI_QUERY }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(plan["template"]["name"], "quick_answer");
    assert_eq!(plan["features"]["complexity"], "simple");
    assert_eq!(plan["features"]["needs_live_data"], false);
    assert!(plan["missing_executors"].as_array().unwrap().is_empty());

    let tasks: Vec<serde_json::Value> = client
        .get(format!("http://{addr}/tasks"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(tasks.is_empty());
}

#[tokio::test]
async fn test_heartbeat_and_agents() {
    let (addr, _tmp) = start_test_server().await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("http://{addr}/agents/heartbeat"))
        .json(&serde_json::json!({
            "agent_id": "embedder-1",
            "cpu_usage": 12.5,
            "memory_usage": 40.0,
            "queue_size": 2,
            "processed_tasks": 10,
            "failed_tasks": 1,
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let record: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(record["status"], "healthy");

    let agents: serde_json::Value = reqwest::get(format!("http://{addr}/agents"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(agents["agents"][0]["agent_id"], "embedder-1");
    assert_eq!(agents["agents"][0]["queue_size"], 2);
    assert_eq!(agents["summary"]["healthy"], 1);

    let gone = client
        .post(format!("http://{addr}/agents/ghost/deregister"))
        .send()
        .await
        .unwrap();
    assert_eq!(gone.status(), 404);
}

#[tokio::test]
async fn test_websocket_streams_task_progress() {
    let (addr, _tmp) = start_test_server().await;
    let client = reqwest::Client::new();

    let accepted = submit(&client, &addr, WIKI_QUERY).await;
    let task_id = accepted["task_id"].as_str().unwrap().to_string();

    let url = format!("ws://{addr}/ws?task_id={task_id}");
    let (mut ws, _) = tokio_tungstenite::connect_async(&url).await.unwrap();

    let next_json = |msg: tokio_tungstenite::tungstenite::Message| -> serde_json::Value {
        serde_json::from_str(&msg.into_text().unwrap()).unwrap()
    };
    let welcome = next_json(ws.next().await.unwrap().unwrap());
    assert_eq!(welcome["type"], "connected");
    assert_eq!(welcome["task_id"], task_id.as_str());
    let snapshot = next_json(ws.next().await.unwrap().unwrap());
    assert_eq!(snapshot["type"], "snapshot");
    assert_eq!(snapshot["task"]["status"], "in_progress");

    let agent = {
        let client = client.clone();
        let addr = addr.clone();
        tokio::spawn(async move {
            for stage in ["embedding_lookup", "executor_reasoning", "response_packaging"] {
                let item = claim(&client, &addr, stage).await;
                answer(&client, &addr, &item["work_id"], "ok").await;
            }
        })
    };

    let mut events = Vec::new();
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(10), ws.next())
            .await
            .unwrap();
        let Some(Ok(msg)) = msg else { break };
        if msg.is_close() {
            break;
        }
        let event = next_json(msg);
        let done = event["type"] == "task" && event["status"] == "complete";
        events.push(event);
        if done {
            break;
        }
    }
    agent.await.unwrap();

    assert!(events.iter().all(|e| e["task_id"] == task_id.as_str()));
    let completes = events
        .iter()
        .filter(|e| e["type"] == "stage" && e["action"] == "complete")
        .count();
    assert_eq!(completes, 3);
    assert_eq!(events.last().unwrap()["status"], "complete");
}
