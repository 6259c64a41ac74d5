//! Integration tests for the admin HTTP API.

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::{TEST_ADMIN_TOKEN, TestServer, deleted_backlog, insert_job};
use pacs_core::DeletionJobState;
use serde_json::Value;
use std::time::Duration;
use tower::ServiceExt;

/// Helper to make JSON requests.
async fn json_request(
    router: &axum::Router,
    method: &str,
    uri: &str,
    auth_token: Option<&str>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);

    if let Some(token) = auth_token {
        builder = builder.header("Authorization", format!("Bearer {}", token));
    }

    let request = builder.body(Body::empty()).unwrap();
    let response = router.clone().oneshot(request).await.unwrap();

    let status = response.status();
    let body_bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();

    let json: Value = if body_bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body_bytes).unwrap_or(Value::Null)
    };

    (status, json)
}

async fn admin(server: &TestServer, method: &str, uri: &str) -> (StatusCode, Value) {
    json_request(&server.router, method, uri, Some(TEST_ADMIN_TOKEN)).await
}

/// Poll the job endpoint until the job leaves the active states.
async fn wait_for_job(server: &TestServer, job_id: &str) -> Value {
    for _ in 0..200 {
        let (status, body) = admin(server, "GET", &format!("/v1/admin/deletion/jobs/{job_id}")).await;
        assert_eq!(status, StatusCode::OK);
        if body["state"] != "queued" && body["state"] != "running" {
            return body;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("deletion job {job_id} did not finish");
}

#[tokio::test]
async fn test_health_is_public() {
    let server = TestServer::new().await;

    let (status, body) = json_request(&server.router, "GET", "/v1/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["storage_backend"], "filesystem");
    assert!(body["version"].is_string());
}

#[tokio::test]
async fn test_admin_routes_require_token() {
    let server = TestServer::new().await;

    for (method, uri) in [
        ("POST", "/v1/admin/deletion/jobs"),
        ("GET", "/v1/admin/deletion/jobs"),
        ("GET", "/v1/admin/deletion/stats"),
    ] {
        let (status, body) = json_request(&server.router, method, uri, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED, "{method} {uri}");
        assert_eq!(body["code"], "unauthorized");

        let (status, _) = json_request(&server.router, method, uri, Some("wrong-token")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED, "{method} {uri}");
    }
}

#[tokio::test]
async fn test_trigger_job_runs_and_reports_progress() {
    let server = TestServer::new().await;
    deleted_backlog(server.metadata().as_ref(), &server.files(), "1", 15).await;

    let (status, body) = admin(&server, "POST", "/v1/admin/deletion/jobs").await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let job_id = body["job_id"].as_str().unwrap().to_string();

    let job = wait_for_job(&server, &job_id).await;
    assert_eq!(job["state"], "finished");
    assert_eq!(job["job_type"], "deleted_instance_cleanup");
    assert!(job["finished_at"].is_string());
    assert_eq!(job["stats"]["purged"], 15);
    assert_eq!(job["checkpoint"]["completed"]["start"], 1);
    assert_eq!(job["checkpoint"]["completed"]["end"], 15);

    let (status, body) = admin(&server, "GET", "/v1/admin/deletion/jobs").await;
    assert_eq!(status, StatusCode::OK);
    let jobs = body.as_array().unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0]["job_id"], job_id);
}

#[tokio::test]
async fn test_trigger_conflicts_with_active_job() {
    let server = TestServer::new().await;
    insert_job(server.metadata().as_ref(), DeletionJobState::Running, None).await;

    let (status, body) = admin(&server, "POST", "/v1/admin/deletion/jobs").await;

    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "conflict");
}

#[tokio::test]
async fn test_get_job_validates_id() {
    let server = TestServer::new().await;

    let (status, body) = admin(&server, "GET", "/v1/admin/deletion/jobs/not-a-uuid").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "bad_request");

    let missing = uuid::Uuid::new_v4();
    let (status, body) = admin(&server, "GET", &format!("/v1/admin/deletion/jobs/{missing}")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "not_found");
}

#[tokio::test]
async fn test_list_jobs_honors_limit() {
    let server = TestServer::new().await;
    for _ in 0..3 {
        insert_job(server.metadata().as_ref(), DeletionJobState::Finished, None).await;
    }

    let (status, body) = admin(&server, "GET", "/v1/admin/deletion/jobs?limit=2").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 2);

    // Zero is clamped up to one
    let (_, body) = admin(&server, "GET", "/v1/admin/deletion/jobs?limit=0").await;
    assert_eq!(body.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_stats_report_backlog() {
    let server = TestServer::new().await;
    deleted_backlog(server.metadata().as_ref(), &server.files(), "1", 3).await;

    let (status, body) = admin(&server, "GET", "/v1/admin/deletion/stats").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["exhausted_instances"], 0);
    assert_eq!(body["max_delete_retries"], 5);
    assert!(body["oldest_deleted"].is_string());
    assert!(body["backlog_age_seconds"].as_i64().unwrap() >= 0);
}

#[tokio::test]
async fn test_metrics_endpoint_exposes_deletion_metrics() {
    let server = TestServer::new().await;
    pacs_server::metrics::record_batch("ok");

    let request = Request::builder()
        .uri("/metrics")
        .body(Body::empty())
        .unwrap();
    let response = server.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("pacs_deletion_batches_total"));
    assert!(text.contains("pacs_deletion_jobs_active"));
}
