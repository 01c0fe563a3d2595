mod test_harness;

use std::time::Duration;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

use fleet_distribute::dashboard::{router, DashboardState};
use fleet_distribute::distribution::JobStatus;
use test_harness::{assert_eventually, Gate, Script, ScriptedTransport, TestFleet};

fn create_test_app(fleet: &TestFleet) -> Router {
    router(DashboardState {
        distributor: fleet.distributor.clone(),
    })
}

async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json: Value = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body).unwrap()
    };
    (status, json)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn submit_body(nodes: &[&str]) -> Value {
    json!({
        "name": "web-release",
        "targets": nodes
            .iter()
            .map(|n| json!({ "node_id": n, "unit_id": "api" }))
            .collect::<Vec<_>>(),
        "policy": "sequential_continue_on_failure",
        "interval_secs": 0,
        "artifact": { "kind": "url", "location": "https://builds.example.com/web.zip" },
        "actor": "alice"
    })
}

#[tokio::test]
async fn test_list_jobs_empty() {
    let fleet = TestFleet::new(ScriptedTransport::new());
    let (status, json) = send(create_test_app(&fleet), get("/api/jobs")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json, json!([]));
}

#[tokio::test]
async fn test_submit_and_get_job() {
    let fleet = TestFleet::new(ScriptedTransport::new());

    let (status, json) = send(
        create_test_app(&fleet),
        post_json("/api/jobs", submit_body(&["n1", "n2"])),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["success"], true);
    let job_id: Uuid = json["job_id"].as_str().unwrap().parse().unwrap();

    assert_eventually(
        || async { fleet.distributor.job(&job_id).await.unwrap().status == JobStatus::Done },
        Duration::from_secs(5),
        "submitted job should finish",
    )
    .await;

    let (status, json) = send(create_test_app(&fleet), get(&format!("/api/jobs/{}", job_id))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["id"], job_id.to_string());
    assert_eq!(json["status"], "done");
    assert_eq!(json["status_code"], 2);
    assert_eq!(json["created_by"], "alice");
    assert_eq!(json["policy"], "sequential_continue_on_failure");
    let logs = json["target_logs"].as_array().unwrap();
    assert_eq!(logs.len(), 2);
    assert!(logs.iter().all(|l| l["status"] == "ok"));

    let (status, json) = send(create_test_app(&fleet), get("/api/jobs")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json.as_array().unwrap().len(), 1);
    assert_eq!(json[0]["targets"], 2);
}

#[tokio::test]
async fn test_submit_invalid_job() {
    let fleet = TestFleet::new(ScriptedTransport::new());
    let (status, json) = send(
        create_test_app(&fleet),
        post_json("/api/jobs", submit_body(&[])),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["success"], false);
    assert!(json["error"].as_str().unwrap().contains("no targets"));
}

#[tokio::test]
async fn test_get_unknown_job() {
    let fleet = TestFleet::new(ScriptedTransport::new());
    let (status, json) = send(
        create_test_app(&fleet),
        get(&format!("/api/jobs/{}", Uuid::new_v4())),
    )
    .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(json["error"].as_str().unwrap().contains("not found"));
}

#[tokio::test]
async fn test_cancel_job() {
    let gate = Gate::new();
    let fleet = TestFleet::new(ScriptedTransport::new().with("n1", Script::Gated(gate.clone())));

    let (_, json) = send(
        create_test_app(&fleet),
        post_json("/api/jobs", submit_body(&["n1", "n2"])),
    )
    .await;
    let job_id = json["job_id"].as_str().unwrap().to_string();

    let uri = format!("/api/jobs/{}/cancel?actor=bob", job_id);
    let (status, json) = send(create_test_app(&fleet), post_json(&uri, json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["success"], true);
    assert_eq!(json["cancelled"], true);

    let (_, json) = send(create_test_app(&fleet), post_json(&uri, json!({}))).await;
    assert_eq!(json["cancelled"], false);

    gate.open();
    let (_, json) = send(create_test_app(&fleet), get(&format!("/api/jobs/{}", job_id))).await;
    assert_eq!(json["status"], "cancelled");
    assert_eq!(json["modified_by"], "bob");
}

#[tokio::test]
async fn test_cancel_unknown_job() {
    let fleet = TestFleet::new(ScriptedTransport::new());
    let uri = format!("/api/jobs/{}/cancel", Uuid::new_v4());
    let (status, json) = send(create_test_app(&fleet), post_json(&uri, json!({}))).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["success"], false);
}
