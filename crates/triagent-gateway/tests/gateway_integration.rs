#![allow(clippy::unwrap_used, clippy::expect_used)]

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use triagent_core::{AgentCard, Payload};
use triagent_gateway::GatewayServer;
use triagent_orchestrator::{Orchestrator, OrchestratorConfig, TaskHandler};

/// Helper: serve the gateway on a random port, returning the address and
/// the backing orchestrator.
async fn start_test_server() -> (String, Arc<Orchestrator>) {
    let config = OrchestratorConfig::new(AgentCard::new(
        "triagent-orchestrator",
        "Orchestrator",
        "http://localhost:8080",
    ));
    let orch = Orchestrator::start(config, None).unwrap();
    let app = GatewayServer::build(orch.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let addr_str = format!("127.0.0.1:{}", addr.port());

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    // Small yield to let the server task start
    tokio::time::sleep(Duration::from_millis(50)).await;

    (addr_str, orch)
}

/// Handler that never finishes within a test, keeping tasks in flight.
struct StallingHandler;

#[async_trait]
impl TaskHandler for StallingHandler {
    async fn handle(&self, _task_type: &str, _payload: &Payload) -> Result<Payload, String> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(Payload::new())
    }
}

/// Registers an agent over HTTP and returns its API key.
async fn register_agent(addr: &str, card: &AgentCard) -> String {
    let resp = reqwest::Client::new()
        .post(format!("http://{addr}/agents/register"))
        .json(card)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);
    let body: serde_json::Value = resp.json().await.unwrap();
    body["api_key"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_health_endpoint() {
    let (addr, _orch) = start_test_server().await;
    let resp = reqwest::get(format!("http://{addr}/health")).await.unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["agent_id"], "triagent-orchestrator");
    assert!(body["timestamp"].is_string());
}

#[tokio::test]
async fn test_agent_card_endpoint() {
    let (addr, _orch) = start_test_server().await;
    let resp = reqwest::get(format!("http://{addr}/agent-card"))
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let card: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(card["agent_id"], "triagent-orchestrator");
    assert_eq!(card["endpoint"], "http://localhost:8080");
}

#[tokio::test]
async fn test_task_surface_requires_credentials() {
    let (addr, _orch) = start_test_server().await;
    let resp = reqwest::Client::new()
        .post(format!("http://{addr}/tasks"))
        .json(&serde_json::json!({
            "agent_from": "referrer",
            "task_type": "image_analysis",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("credentials"));
}

#[tokio::test]
async fn test_create_and_fetch_task_with_api_key() {
    let (addr, orch) = start_test_server().await;
    orch.register_handler("image_analysis", Arc::new(StallingHandler));
    let card = AgentCard::new("referrer", "Referrer", "http://localhost:9001");
    let api_key = register_agent(&addr, &card).await;

    let client = reqwest::Client::new();
    let resp = client
        .post(format!("http://{addr}/tasks"))
        .header("X-API-Key", &api_key)
        .header("X-Agent-ID", "referrer")
        .json(&serde_json::json!({
            "agent_from": "referrer",
            "task_type": "image_analysis",
            "payload": { "modality": "MRI" },
            "priority": "high",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);
    let created: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(created["status"], "pending");
    assert!(created["created_at"].is_string());
    let task_id = created["task_id"].as_str().unwrap().to_string();

    let resp = client
        .get(format!("http://{addr}/tasks/{task_id}"))
        .header("X-API-Key", &api_key)
        .header("X-Agent-ID", "referrer")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let task: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(task["task_id"], task_id.as_str());
    assert_eq!(task["priority"], "high");
    assert_eq!(task["task_type"], "image_analysis");
    assert_eq!(task["timeout_seconds"], 180);
}

#[tokio::test]
async fn test_blank_task_type_is_400() {
    let (addr, _orch) = start_test_server().await;
    let card = AgentCard::new("referrer", "Referrer", "http://localhost:9001");
    let api_key = register_agent(&addr, &card).await;

    let resp = reqwest::Client::new()
        .post(format!("http://{addr}/tasks"))
        .header("X-API-Key", &api_key)
        .header("X-Agent-ID", "referrer")
        .json(&serde_json::json!({
            "agent_from": "referrer",
            "task_type": "",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("task_type"));
}

#[tokio::test]
async fn test_unknown_task_is_404() {
    let (addr, _orch) = start_test_server().await;
    let card = AgentCard::new("referrer", "Referrer", "http://localhost:9001");
    let api_key = register_agent(&addr, &card).await;

    let resp = reqwest::Client::new()
        .get(format!(
            "http://{addr}/tasks/00000000-0000-0000-0000-000000000000"
        ))
        .header("X-API-Key", &api_key)
        .header("X-Agent-ID", "referrer")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn test_token_flow_and_capability_scoping() {
    let (addr, orch) = start_test_server().await;
    orch.register_handler("analyze", Arc::new(StallingHandler));
    let card = AgentCard::new("vision", "Vision", "http://localhost:9002")
        .with_capabilities(vec!["analyze".into()]);
    let api_key = register_agent(&addr, &card).await;

    let client = reqwest::Client::new();
    let resp = client
        .post(format!("http://{addr}/auth/token"))
        .json(&serde_json::json!({ "agent_id": "vision", "api_key": api_key }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let issued: serde_json::Value = resp.json().await.unwrap();
    let token = issued["token"].as_str().unwrap().to_string();
    assert_eq!(issued["expires_in"], 86_400);

    // Within scope: accepted.
    let resp = client
        .post(format!("http://{addr}/tasks"))
        .bearer_auth(&token)
        .json(&serde_json::json!({
            "agent_from": "vision",
            "task_type": "analyze",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);

    // Valid, unexpired token but out-of-scope capability: rejected.
    let resp = client
        .post(format!("http://{addr}/tasks"))
        .bearer_auth(&token)
        .json(&serde_json::json!({
            "agent_from": "vision",
            "task_type": "notify",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("capability"));
}

#[tokio::test]
async fn test_bad_token_is_rejected() {
    let (addr, _orch) = start_test_server().await;
    let resp = reqwest::Client::new()
        .post(format!("http://{addr}/tasks"))
        .bearer_auth("not-a-real.token")
        .json(&serde_json::json!({
            "agent_from": "x",
            "task_type": "analyze",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);
}

#[tokio::test]
async fn test_token_issuance_rejects_bad_key() {
    let (addr, _orch) = start_test_server().await;
    let card = AgentCard::new("vision", "Vision", "http://localhost:9002");
    let _api_key = register_agent(&addr, &card).await;

    let resp = reqwest::Client::new()
        .post(format!("http://{addr}/auth/token"))
        .json(&serde_json::json!({ "agent_id": "vision", "api_key": "wrong" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);
}

#[tokio::test]
async fn test_status_report_completes_task() {
    let (addr, orch) = start_test_server().await;
    orch.register_handler("report_generation", Arc::new(StallingHandler));
    let card = AgentCard::new("reporter", "Reporter", "http://localhost:9003");
    let api_key = register_agent(&addr, &card).await;

    let client = reqwest::Client::new();
    let resp = client
        .post(format!("http://{addr}/tasks"))
        .header("X-API-Key", &api_key)
        .header("X-Agent-ID", "reporter")
        .json(&serde_json::json!({
            "agent_from": "reporter",
            "task_type": "report_generation",
        }))
        .send()
        .await
        .unwrap();
    let task_id = resp.json::<serde_json::Value>().await.unwrap()["task_id"]
        .as_str()
        .unwrap()
        .to_string();

    let resp = client
        .put(format!("http://{addr}/tasks/{task_id}/status"))
        .header("X-API-Key", &api_key)
        .header("X-Agent-ID", "reporter")
        .json(&serde_json::json!({
            "status": "completed",
            "result": { "report": "unremarkable study" },
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let task: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(task["status"], "completed");
    assert_eq!(task["result"]["report"], "unremarkable study");
    assert!(task["completed_at"].is_string());
}

#[tokio::test]
async fn test_status_endpoint_reports_counts() {
    let (addr, orch) = start_test_server().await;
    orch.register_handler("image_analysis", Arc::new(StallingHandler));
    let card = AgentCard::new("referrer", "Referrer", "http://localhost:9001");
    let api_key = register_agent(&addr, &card).await;

    let client = reqwest::Client::new();
    client
        .post(format!("http://{addr}/tasks"))
        .header("X-API-Key", &api_key)
        .header("X-Agent-ID", "referrer")
        .json(&serde_json::json!({
            "agent_from": "referrer",
            "task_type": "image_analysis",
        }))
        .send()
        .await
        .unwrap();

    let resp = client
        .get(format!("http://{addr}/status"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let status: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(status["registered_agents"], 1);
    assert_eq!(status["total_tasks"], 1);
    assert_eq!(status["agent_card"]["agent_id"], "triagent-orchestrator");
}
