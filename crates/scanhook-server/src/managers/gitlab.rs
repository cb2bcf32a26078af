//! GitLab platform manager: HTTP handler, repo enumeration, execution-args
//! factory.
//!
//! GitLab does not sign webhook payloads, so there is no signature check
//! here — authentication relies on network trust plus the self-push
//! suppression classification already applies.

use std::sync::Arc;

use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use serde::Deserialize;
use serde_json::json;

use scanhook_core::config::PlatformConfig;
use scanhook_core::crypto::MAX_WEBHOOK_SIZE;
use scanhook_core::error::Result;
use scanhook_core::models::{ExecutionArgs, PlatformKind};
use scanhook_core::webhook::gitlab::classify;

use crate::coordinator::Coordinator;
use crate::managers::PlatformManager;

pub struct GitLabManager {
    config: PlatformConfig,
    http: reqwest::Client,
    disabled_repo_name_match: Option<regex_lite::Regex>,
}

impl GitLabManager {
    pub fn new(config: PlatformConfig) -> Self {
        let disabled_repo_name_match = if config.disabled_repo_name_match.is_empty() {
            None
        } else {
            regex_lite::Regex::new(&config.disabled_repo_name_match).ok()
        };
        Self {
            config,
            http: reqwest::Client::new(),
            disabled_repo_name_match,
        }
    }

    pub fn webhook_path(&self) -> &str {
        &self.config.webhook.path
    }

    fn dashboard_title(&self, repo: &str) -> String {
        self.config
            .projects
            .iter()
            .find(|p| p.name == repo)
            .and_then(|p| p.dashboard_issue_title.clone())
            .unwrap_or_else(|| self.config.dashboard_issue_title.clone())
    }

    fn is_disabled(&self, repo: &str) -> bool {
        if let Some(project) = self.config.projects.iter().find(|p| p.name == repo) {
            if project.disabled {
                return true;
            }
        }
        self.disabled_repo_name_match.as_ref().is_some_and(|re| re.is_match(repo))
    }

    pub fn execution_args(&self, repos: Vec<String>) -> ExecutionArgs {
        ExecutionArgs {
            platform: PlatformKind::GitLab,
            api_url: self.config.api.base_url.clone(),
            api_token: self.config.api.oauth_token.clone(),
            repos,
            git_user: self.config.git.user.clone(),
            git_email: self.config.git.email.clone(),
        }
    }

    /// Enumerate active projects the token has membership in, excluding
    /// disabled ones.
    pub async fn list_repos(&self) -> Result<Vec<String>> {
        #[derive(Deserialize)]
        struct Project {
            path_with_namespace: String,
        }

        let url = format!("{}/projects", self.config.api.base_url.trim_end_matches('/'));
        let response = self
            .http
            .get(&url)
            .query(&[("membership", "true"), ("simple", "true"), ("per_page", "100")])
            .bearer_auth(&self.config.api.oauth_token)
            .send()
            .await?;
        let projects: Vec<Project> = response.json().await?;

        Ok(projects
            .into_iter()
            .map(|p| p.path_with_namespace)
            .filter(|name| !self.is_disabled(name))
            .collect())
    }
}

#[derive(Clone)]
pub struct GitLabHandlerState {
    pub manager: Arc<GitLabManager>,
    pub coordinator: Arc<Coordinator>,
}

/// `POST {webhook.path}` — GitLab webhook intake. Panics inside this
/// handler are caught by the router's `CatchPanicLayer`, not here.
pub async fn handle_webhook(
    State(GitLabHandlerState { manager, coordinator }): State<GitLabHandlerState>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    if body.len() > MAX_WEBHOOK_SIZE {
        return (StatusCode::BAD_REQUEST, Json(json!({"error": "payload too large"}))).into_response();
    }

    let event_type = headers
        .get("X-Gitlab-Event")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    let repo = match classify(event_type, &body, |repo: &str| manager.dashboard_title(repo), &manager.config.git.email) {
        Ok(repo) => repo,
        Err(e) => {
            tracing::info!("gitlab payload invalid: {e}");
            return (StatusCode::BAD_REQUEST, Json(json!({"error": "invalid webhook payload"}))).into_response();
        }
    };

    let Some(repo) = repo else {
        return (StatusCode::OK, "").into_response();
    };

    if manager.is_disabled(&repo) {
        tracing::info!(repo, "execution ignored: repo disabled");
        return (StatusCode::OK, "").into_response();
    }

    tracing::info!(repo, "scheduling execution");
    let args = manager.execution_args(vec![repo]);
    if let Err(e) = coordinator.schedule(args).await {
        tracing::warn!("failed to schedule execution: {e}");
        return (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"error": "failed to execute"}))).into_response();
    }

    (StatusCode::OK, "").into_response()
}

#[async_trait::async_trait]
impl PlatformManager for GitLabManager {
    fn webhook_path(&self) -> &str {
        self.webhook_path()
    }

    async fn list_repos(&self) -> Result<Vec<String>> {
        GitLabManager::list_repos(self).await
    }

    fn execution_args(&self, repos: Vec<String>) -> ExecutionArgs {
        GitLabManager::execution_args(self, repos)
    }
}
