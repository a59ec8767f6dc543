//! HTTP API tests for organizations, runs and operational endpoints.

mod common;

use std::time::Duration;

use axum::http::StatusCode;
use serde_json::json;

use common::fixtures::{TEST_CREDITS, TEST_ORG};
use common::TestFixture;
use conveyor_core::Plan;

const TIMEOUT: Duration = Duration::from_secs(10);

fn runs_path() -> String {
    format!("/api/v1/orgs/{}/runs", TEST_ORG)
}

async fn create_summarize_run(fixture: &TestFixture) -> String {
    let response = fixture
        .post(
            &runs_path(),
            json!({
                "tool_id": "summarize",
                "text": "Revenue grew in every region this quarter."
            }),
        )
        .await;
    assert_status!(response, StatusCode::CREATED);
    response.body["id"].as_str().unwrap().to_string()
}

// =============================================================================
// Operational endpoints
// =============================================================================

#[tokio::test]
async fn test_health() {
    let fixture = TestFixture::new();
    let response = fixture.get("/api/v1/health").await;
    assert_status!(response, StatusCode::OK);
    assert_eq!(response.body["status"], "ok");
}

#[tokio::test]
async fn test_config_is_sanitized() {
    let fixture = TestFixture::new();
    let response = fixture.get("/api/v1/config").await;
    assert_status!(response, StatusCode::OK);
    assert_eq!(response.body["server"]["port"], 8080);
    assert!(response.body.get("organizations").is_none());
    assert!(response.body["pipelines"]
        .as_array()
        .unwrap()
        .iter()
        .any(|p| p["id"] == "digest"));
}

#[tokio::test]
async fn test_status_reports_queued_runs() {
    let fixture = TestFixture::new();
    create_summarize_run(&fixture).await;

    let response = fixture.get("/api/v1/status").await;
    assert_status!(response, StatusCode::OK);
    assert_eq!(response.body["running"], false);
    assert_eq!(response.body["queued_count"], 1);

    let queues = response.body["queues"].as_array().unwrap();
    let summarize = queues
        .iter()
        .find(|q| q["stage"] == "summarize")
        .unwrap();
    assert_eq!(summarize["depth"], 1);
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let fixture = TestFixture::new();
    fixture.get("/api/v1/health").await;

    let (status, body) = fixture.get_text("/metrics").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("conveyor_http_requests_total"));
    assert!(body.contains("conveyor_runs_by_status"));
}

// =============================================================================
// Organizations
// =============================================================================

#[tokio::test]
async fn test_get_org() {
    let fixture = TestFixture::new();
    let response = fixture.get(&format!("/api/v1/orgs/{}", TEST_ORG)).await;
    assert_status!(response, StatusCode::OK);
    assert_eq!(response.body["orgname"], TEST_ORG);
    assert_eq!(response.body["plan"], "standard");
    assert_eq!(response.body["credits"], TEST_CREDITS);
}

#[tokio::test]
async fn test_get_unknown_org() {
    let fixture = TestFixture::new();
    let response = fixture.get("/api/v1/orgs/initech").await;
    assert_status!(response, StatusCode::NOT_FOUND);
    assert!(response.body["error"].as_str().unwrap().contains("initech"));
}

// =============================================================================
// Run creation
// =============================================================================

#[tokio::test]
async fn test_create_tool_run() {
    let fixture = TestFixture::new();
    let response = fixture
        .post(
            &runs_path(),
            json!({ "tool_id": "summarize", "text": "Short text to summarize." }),
        )
        .await;

    assert_status!(response, StatusCode::CREATED);
    assert_eq!(response.body["orgname"], TEST_ORG);
    assert_eq!(response.body["kind"], "TOOL_RUN");
    assert_eq!(response.body["status"], "QUEUED");
    assert_eq!(response.body["stage_name"], "summarize");
    assert_eq!(response.body["inputs"].as_array().unwrap().len(), 1);
    assert!(response.body["credits_cost"].as_i64().unwrap() >= 1);
}

#[tokio::test]
async fn test_create_pipeline_run() {
    let fixture = TestFixture::new();
    let response = fixture
        .post(
            &runs_path(),
            json!({
                "kind": "PIPELINE_RUN",
                "pipeline_id": "digest",
                "url": "https://example.com/report.pdf"
            }),
        )
        .await;

    assert_status!(response, StatusCode::CREATED);
    assert_eq!(response.body["kind"], "PIPELINE_RUN");
    assert_eq!(response.body["stages"], json!(["extract-text", "summarize"]));
}

#[tokio::test]
async fn test_create_run_without_inputs_is_bad_request() {
    let fixture = TestFixture::new();
    let response = fixture
        .post(&runs_path(), json!({ "tool_id": "summarize" }))
        .await;
    assert_status!(response, StatusCode::BAD_REQUEST);
    assert!(response.body["error"].is_string());
}

#[tokio::test]
async fn test_create_run_with_unknown_kind_is_bad_request() {
    let fixture = TestFixture::new();
    let response = fixture
        .post(
            &runs_path(),
            json!({ "kind": "BATCH_RUN", "tool_id": "summarize", "text": "hi" }),
        )
        .await;
    assert_status!(response, StatusCode::BAD_REQUEST);
    assert!(response.body["error"].as_str().unwrap().contains("BATCH_RUN"));
    assert_eq!(fixture.get(&runs_path()).await.body["total"], 0);
}

#[tokio::test]
async fn test_create_run_with_malformed_json_is_bad_request() {
    let fixture = TestFixture::new();
    let response = fixture
        .post_raw(&runs_path(), r#"{"tool_id": "summarize", "text": "#)
        .await;
    assert_status!(response, StatusCode::BAD_REQUEST);
    assert!(response.body["error"].is_string());
}

#[tokio::test]
async fn test_create_run_with_unknown_tool_is_not_found() {
    let fixture = TestFixture::new();
    let response = fixture
        .post(&runs_path(), json!({ "tool_id": "translate", "text": "hola" }))
        .await;
    assert_status!(response, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_create_run_with_missing_content_is_not_found() {
    let fixture = TestFixture::new();
    let response = fixture
        .post(
            &runs_path(),
            json!({ "tool_id": "summarize", "content_ids": ["does-not-exist"] }),
        )
        .await;
    assert_status!(response, StatusCode::NOT_FOUND);

    let listed = fixture.get(&runs_path()).await;
    assert_eq!(listed.body["total"], 0);
}

#[tokio::test]
async fn test_create_run_without_credits_is_forbidden() {
    let fixture = TestFixture::new();
    fixture.harness.set_balance(Plan::Standard, 0);

    let response = fixture
        .post(&runs_path(), json!({ "tool_id": "summarize", "text": "hi" }))
        .await;
    assert_status!(response, StatusCode::FORBIDDEN);
    assert!(response.body["error"]
        .as_str()
        .unwrap()
        .contains("insufficient credits"));
}

#[tokio::test]
async fn test_create_run_for_unknown_org_is_not_found() {
    let fixture = TestFixture::new();
    let response = fixture
        .post(
            "/api/v1/orgs/initech/runs",
            json!({ "tool_id": "summarize", "text": "hi" }),
        )
        .await;
    assert_status!(response, StatusCode::NOT_FOUND);
}

// =============================================================================
// Run queries
// =============================================================================

#[tokio::test]
async fn test_get_run() {
    let fixture = TestFixture::new();
    let id = create_summarize_run(&fixture).await;

    let response = fixture.get(&format!("{}/{}", runs_path(), id)).await;
    assert_status!(response, StatusCode::OK);
    assert_eq!(response.body["id"], id.as_str());
}

#[tokio::test]
async fn test_get_run_of_other_org_is_not_found() {
    let fixture = TestFixture::new();
    let id = create_summarize_run(&fixture).await;

    let response = fixture
        .get(&format!("/api/v1/orgs/globex/runs/{}", id))
        .await;
    assert_status!(response, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_list_runs_with_status_filter() {
    let fixture = TestFixture::new();
    create_summarize_run(&fixture).await;
    create_summarize_run(&fixture).await;

    let response = fixture.get(&runs_path()).await;
    assert_status!(response, StatusCode::OK);
    assert_eq!(response.body["total"], 2);
    assert_eq!(response.body["runs"].as_array().unwrap().len(), 2);
    assert_eq!(response.body["limit"], 100);

    let queued = fixture
        .get(&format!("{}?status=queued&limit=1", runs_path()))
        .await;
    assert_status!(queued, StatusCode::OK);
    assert_eq!(queued.body["total"], 2);
    assert_eq!(queued.body["runs"].as_array().unwrap().len(), 1);

    let complete = fixture
        .get(&format!("{}?status=COMPLETE", runs_path()))
        .await;
    assert_eq!(complete.body["total"], 0);
}

#[tokio::test]
async fn test_list_runs_with_unknown_status_is_bad_request() {
    let fixture = TestFixture::new();
    let response = fixture
        .get(&format!("{}?status=paused", runs_path()))
        .await;
    assert_status!(response, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_completed_run_and_stage_runs() {
    let fixture = TestFixture::new();
    let id = create_summarize_run(&fixture).await;

    fixture.harness.orchestrator.start().await;
    fixture.harness.wait_for_terminal(&id, TIMEOUT).await;
    fixture.harness.orchestrator.stop().await;

    let run = fixture.get(&format!("{}/{}", runs_path(), id)).await;
    assert_eq!(run.body["status"], "COMPLETE");
    assert_eq!(run.body["progress"], 1.0);
    assert_eq!(run.body["outputs"].as_array().unwrap().len(), 1);

    let stages = fixture
        .get(&format!("{}/{}/stages", runs_path(), id))
        .await;
    assert_status!(stages, StatusCode::OK);
    let stages = stages.body.as_array().unwrap();
    assert_eq!(stages.len(), 1);
    assert_eq!(stages[0]["stage_name"], "summarize");
    assert_eq!(stages[0]["status"], "COMPLETE");

    let org = fixture.get(&format!("/api/v1/orgs/{}", TEST_ORG)).await;
    let used = run.body["credits_used"].as_i64().unwrap();
    assert_eq!(org.body["credits"], TEST_CREDITS - used);
}

// =============================================================================
// Cancellation
// =============================================================================

#[tokio::test]
async fn test_cancel_queued_run() {
    let fixture = TestFixture::new();
    let id = create_summarize_run(&fixture).await;

    let response = fixture.delete(&format!("{}/{}", runs_path(), id)).await;
    assert_status!(response, StatusCode::OK);
    assert_eq!(response.body["cancelled"], true);
    assert_eq!(response.body["queue"], "removed");
    assert_eq!(response.body["work_item"]["status"], "ERROR");
    assert_eq!(response.body["work_item"]["error"], "cancelled");

    let status = fixture.get("/api/v1/status").await;
    assert_eq!(status.body["queued_count"], 0);
}

#[tokio::test]
async fn test_cancel_unknown_run_is_not_found() {
    let fixture = TestFixture::new();
    let response = fixture
        .delete(&format!("{}/550e8400-e29b-41d4-a716-446655440000", runs_path()))
        .await;
    assert_status!(response, StatusCode::NOT_FOUND);
}
