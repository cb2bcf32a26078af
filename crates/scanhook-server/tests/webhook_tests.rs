//! Integration tests exercising the webhook HTTP surface end to end: HMAC
//! verification, trigger classification, coalescing, and dispatch into a
//! stub execution backend.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum_test::TestServer;

use scanhook_core::config::{GitConfig, PlatformConfig, WebhookEndpointConfig};
use scanhook_core::crypto::hmac_sha256_hex;
use scanhook_core::error::Result;
use scanhook_core::executor::Executor;
use scanhook_core::models::ExecutionArgs;
use scanhook_server::coordinator::Coordinator;
use scanhook_server::managers::{GitHubManager, GitLabManager};

const GITHUB_SECRET: &str = "test-webhook-secret";
const BOT_EMAIL: &str = "renovate@example.com";

/// Records every batch handed to it instead of talking to a real cluster.
#[derive(Default)]
struct RecordingExecutor {
    calls: Mutex<Vec<ExecutionArgs>>,
}

#[async_trait]
impl Executor for RecordingExecutor {
    async fn execute(&self, args: ExecutionArgs) -> Result<()> {
        self.calls.lock().unwrap().push(args);
        Ok(())
    }
}

fn github_config() -> PlatformConfig {
    PlatformConfig {
        webhook: WebhookEndpointConfig {
            path: "/github/hook".to_string(),
            secret: GITHUB_SECRET.to_string(),
        },
        git: GitConfig {
            user: "renovate".to_string(),
            email: BOT_EMAIL.to_string(),
        },
        dashboard_issue_title: "Dependency Dashboard".to_string(),
        ..Default::default()
    }
}

fn gitlab_config() -> PlatformConfig {
    PlatformConfig {
        webhook: WebhookEndpointConfig {
            path: "/gitlab/hook".to_string(),
            secret: String::new(),
        },
        git: GitConfig {
            user: "renovate".to_string(),
            email: BOT_EMAIL.to_string(),
        },
        ..Default::default()
    }
}

async fn test_server(executor: Arc<RecordingExecutor>) -> TestServer {
    let github = vec![Arc::new(GitHubManager::new(github_config()))];
    let gitlab = vec![Arc::new(GitLabManager::new(gitlab_config()))];
    let coordinator = Coordinator::for_test(executor, github, gitlab, Duration::from_millis(20));
    TestServer::new(coordinator.test_router()).expect("failed to build test server")
}

fn sign(body: &str) -> String {
    format!("sha256={}", hmac_sha256_hex(GITHUB_SECRET.as_bytes(), body.as_bytes()))
}

#[tokio::test]
async fn github_push_dispatches_after_debounce() {
    let executor = Arc::new(RecordingExecutor::default());
    let server = test_server(executor.clone()).await;

    let body = r#"{"repository":{"full_name":"acme/widgets"}}"#;
    let response = server
        .post("/github/hook")
        .add_header("X-GitHub-Event", "push")
        .add_header("X-Hub-Signature-256", sign(body))
        .text(body)
        .await;

    response.assert_status_ok();
    assert_eq!(response.text(), "");

    tokio::time::sleep(Duration::from_millis(100)).await;
    let calls = executor.calls.lock().unwrap();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].repos, vec!["acme/widgets".to_string()]);
}

#[tokio::test]
async fn github_invalid_signature_is_rejected_without_scheduling() {
    let executor = Arc::new(RecordingExecutor::default());
    let server = test_server(executor.clone()).await;

    let body = r#"{"repository":{"full_name":"acme/widgets"}}"#;
    let response = server
        .post("/github/hook")
        .add_header("X-GitHub-Event", "push")
        .add_header("X-Hub-Signature-256", "sha256=deadbeef")
        .text(body)
        .await;

    response.assert_status_bad_request();

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(executor.calls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn github_burst_of_webhooks_coalesces_into_one_dispatch() {
    let executor = Arc::new(RecordingExecutor::default());
    let server = test_server(executor.clone()).await;

    for repo in ["acme/a", "acme/b"] {
        let body = format!(r#"{{"repository":{{"full_name":"{repo}"}}}}"#);
        let response = server
            .post("/github/hook")
            .add_header("X-GitHub-Event", "push")
            .add_header("X-Hub-Signature-256", sign(&body))
            .text(body)
            .await;
        response.assert_status_ok();
    }

    tokio::time::sleep(Duration::from_millis(100)).await;
    let calls = executor.calls.lock().unwrap();
    assert_eq!(calls.len(), 1, "same credential should coalesce into a single dispatch");
    assert_eq!(calls[0].repos, vec!["acme/a".to_string(), "acme/b".to_string()]);
}

#[tokio::test]
async fn gitlab_self_push_is_not_scheduled() {
    let executor = Arc::new(RecordingExecutor::default());
    let server = test_server(executor.clone()).await;

    let body = format!(r#"{{"user_email":"{BOT_EMAIL}","project":{{"path_with_namespace":"acme/widgets"}}}}"#);
    let response = server.post("/gitlab/hook").add_header("X-Gitlab-Event", "Push Hook").text(body).await;

    response.assert_status_ok();

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(executor.calls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn gitlab_issue_with_checked_box_dispatches() {
    let executor = Arc::new(RecordingExecutor::default());
    let server = test_server(executor.clone()).await;

    let body = r#"{"object_attributes":{"title":"anything","description":"- [x] bump foo"},
        "project":{"path_with_namespace":"acme/widgets"}}"#;
    let response = server.post("/gitlab/hook").add_header("X-Gitlab-Event", "Issue Hook").text(body).await;

    response.assert_status_ok();

    tokio::time::sleep(Duration::from_millis(50)).await;
    let calls = executor.calls.lock().unwrap();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].repos, vec!["acme/widgets".to_string()]);
}

#[tokio::test]
async fn unknown_webhook_path_returns_not_found() {
    let executor = Arc::new(RecordingExecutor::default());
    let server = test_server(executor).await;

    let response = server.post("/nonexistent").await;
    response.assert_status_not_found();
}
