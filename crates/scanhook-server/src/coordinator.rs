//! Composes the managers, the webhook listener, the delay queue, the
//! execution backend, and the optional cron job; enforces coalescing and
//! reschedule-on-failure.

use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::routing::post;
use axum::Router;
use tokio_util::sync::CancellationToken;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::limit::RequestBodyLimitLayer;

use scanhook_core::config::Config;
use scanhook_core::crypto::MAX_WEBHOOK_SIZE;
use scanhook_core::error::{Result, ScanhookError};
use scanhook_core::executor::{Executor, KubernetesExecutor};
use scanhook_core::models::ExecutionArgs;
use scanhook_core::queue::DelayQueue;

use crate::managers::github::{self, GitHubHandlerState, GitHubManager};
use crate::managers::gitlab::{self, GitLabHandlerState, GitLabManager};
use crate::managers::PlatformManager;

/// Owns every long-running piece of the orchestrator: the delay queue, the
/// platform managers, the execution backend, and (if configured) the cron
/// fleet walker.
pub struct Coordinator {
    queue: DelayQueue<String, ExecutionArgs>,
    executor: Arc<dyn Executor>,
    delay: Duration,
    github_managers: Vec<Arc<GitHubManager>>,
    gitlab_managers: Vec<Arc<GitLabManager>>,
    fleet: Vec<Arc<dyn PlatformManager>>,
}

impl Coordinator {
    /// Builds the executor and every configured platform manager, wires the
    /// delay queue's dispatch loop, but does not yet bind the HTTP listener
    /// or start the cron job — call [`Coordinator::serve`] for that.
    pub async fn new(config: &Config) -> Result<Arc<Self>> {
        let Some(kube_config) = &config.server.executor.kubernetes else {
            return Err(ScanhookError::ConfigInvalid("no executor configured".to_string()));
        };
        let namespace = std::env::var("SCANHOOK_NAMESPACE").unwrap_or_else(|_| "default".to_string());
        let executor: Arc<dyn Executor> = Arc::new(KubernetesExecutor::new(kube_config, namespace).await?);

        let github_managers: Vec<Arc<GitHubManager>> =
            config.github.iter().cloned().map(|c| Arc::new(GitHubManager::new(c))).collect();
        let gitlab_managers: Vec<Arc<GitLabManager>> =
            config.gitlab.iter().cloned().map(|c| Arc::new(GitLabManager::new(c))).collect();

        let fleet: Vec<Arc<dyn PlatformManager>> = github_managers
            .iter()
            .cloned()
            .map(|m| m as Arc<dyn PlatformManager>)
            .chain(gitlab_managers.iter().cloned().map(|m| m as Arc<dyn PlatformManager>))
            .collect();

        let (queue, rx) = DelayQueue::new();

        let coordinator = Arc::new(Self {
            queue,
            executor,
            delay: Duration::from_secs(config.server.scheduling.delay_seconds),
            github_managers,
            gitlab_managers,
            fleet,
        });

        coordinator.clone().spawn_dispatch_loop(rx);
        Ok(coordinator)
    }

    /// The coalescing contract: entries for the same `(api_url, api_token)`
    /// collapse into one pending delay-queue entry whose repo list is the
    /// union of every submitted repo list, most-recent intent first.
    pub async fn schedule(&self, args: ExecutionArgs) -> Result<()> {
        let key = args.coalesce_key();
        let merged = match self.queue.remove(&key).await {
            Some(existing) => merge_repos(args, existing),
            None => args,
        };
        self.queue.offer_with_delay(key, merged, self.delay).await
    }

    fn spawn_dispatch_loop(self: Arc<Self>, mut rx: tokio::sync::mpsc::Receiver<(String, ExecutionArgs)>) {
        tokio::spawn(async move {
            while let Some((_key, args)) = rx.recv().await {
                if let Err(e) = self.executor.execute(args.clone()).await {
                    tracing::warn!(error = %e, "execution failed, rescheduling");
                    if let Err(e2) = self.schedule(args).await {
                        tracing::error!(error = %e2, "failed to reschedule after execution failure");
                    }
                }
            }
        });
    }

    /// Cron tick: concurrently enumerate every manager's repos, attempt an
    /// immediate execute, and fall back to `schedule` (the debounce queue)
    /// if that immediate attempt fails. `list_repos` failures are logged
    /// and skipped for this tick — no retry within the same tick.
    pub async fn check_all_repos(self: Arc<Self>) {
        let mut tasks = tokio::task::JoinSet::new();
        for manager in self.fleet.iter().cloned() {
            let this = Arc::clone(&self);
            tasks.spawn(async move {
                let repos = match manager.list_repos().await {
                    Ok(repos) => repos,
                    Err(e) => {
                        tracing::warn!(error = %e, "list_repos failed for this tick");
                        return;
                    }
                };
                if repos.is_empty() {
                    return;
                }

                let args = manager.execution_args(repos);
                if let Err(e) = this.executor.execute(args.clone()).await {
                    tracing::warn!(error = %e, "cron immediate execute failed, falling back to delay queue");
                    if let Err(e2) = this.schedule(args).await {
                        tracing::error!(error = %e2, "failed to schedule after immediate execute failure");
                    }
                }
            });
        }
        while tasks.join_next().await.is_some() {}
    }

    pub(crate) fn router(self: Arc<Self>) -> Router {
        let mut router = Router::new();
        for manager in &self.github_managers {
            let state = GitHubHandlerState {
                manager: manager.clone(),
                coordinator: self.clone(),
            };
            router = router.route(manager.webhook_path(), post(github::handle_webhook).with_state(state));
        }
        for manager in &self.gitlab_managers {
            let state = GitLabHandlerState {
                manager: manager.clone(),
                coordinator: self.clone(),
            };
            router = router.route(manager.webhook_path(), post(gitlab::handle_webhook).with_state(state));
        }
        router
            .layer(RequestBodyLimitLayer::new(MAX_WEBHOOK_SIZE))
            .layer(CatchPanicLayer::new())
    }

    /// Binds the webhook listener (TLS-wrapped when configured), starts the
    /// cron job if one is configured, and blocks until `shutdown` fires.
    pub async fn serve(self: Arc<Self>, config: &Config, shutdown: CancellationToken) -> Result<()> {
        if let Some(cron_expr) = &config.server.scheduling.cron {
            self.clone().spawn_cron(cron_expr, &config.server.scheduling.timezone, shutdown.clone())?;
        }

        let app = self.clone().router();
        let addr: std::net::SocketAddr = parse_listen_addr(&config.server.webhook.listen)?;

        let serve_result = match &config.server.webhook.tls {
            Some(tls) => {
                let rustls_config = axum_server::tls_rustls::RustlsConfig::from_pem_file(&tls.cert_file, &tls.key_file)
                    .await
                    .map_err(|e| ScanhookError::ConfigInvalid(format!("failed to load webhook TLS material: {e}")))?;

                let handle = axum_server::Handle::new();
                let shutdown_task = {
                    let handle = handle.clone();
                    let shutdown = shutdown.clone();
                    tokio::spawn(async move {
                        shutdown.cancelled().await;
                        handle.graceful_shutdown(Some(Duration::from_secs(5)));
                    })
                };
                let result = axum_server::bind_rustls(addr, rustls_config)
                    .handle(handle)
                    .serve(app.into_make_service())
                    .await;
                shutdown_task.abort();
                result.map_err(|e| ScanhookError::Internal(format!("webhook server failed: {e}")))
            }
            None => {
                let listener = tokio::net::TcpListener::bind(addr)
                    .await
                    .map_err(|e| ScanhookError::Internal(format!("failed to bind webhook listener: {e}")))?;
                axum::serve(listener, app)
                    .with_graceful_shutdown(async move { shutdown.cancelled().await })
                    .await
                    .map_err(|e| ScanhookError::Internal(format!("webhook server failed: {e}")))
            }
        };

        self.queue.stop();
        serve_result
    }

    fn spawn_cron(self: Arc<Self>, expr: &str, timezone: &str, shutdown: CancellationToken) -> Result<()> {
        let normalized = normalize_cron_expr(expr);
        let schedule = cron::Schedule::from_str(&normalized).map_err(|e| ScanhookError::Cron(e.to_string()))?;
        let tz: chrono_tz::Tz = timezone
            .parse()
            .map_err(|_| ScanhookError::ConfigInvalid(format!("invalid scheduling timezone: {timezone}")))?;

        tokio::spawn(async move {
            let running = Arc::new(AtomicBool::new(false));
            loop {
                let Some(next) = schedule.upcoming(tz).next() else {
                    return;
                };
                let now = chrono::Utc::now().with_timezone(&tz);
                let sleep_for = (next - now).to_std().unwrap_or(Duration::ZERO);

                tokio::select! {
                    _ = shutdown.cancelled() => return,
                    _ = tokio::time::sleep(sleep_for) => {}
                }

                if running.swap(true, Ordering::SeqCst) {
                    tracing::debug!("cron tick skipped: previous tick still running");
                    continue;
                }

                let this = self.clone();
                let running = running.clone();
                tokio::spawn(async move {
                    this.check_all_repos().await;
                    running.store(false, Ordering::SeqCst);
                });
            }
        });
        Ok(())
    }

    /// Builds a `Coordinator` directly from its parts, bypassing
    /// `Coordinator::new`'s Kubernetes client construction. Only for
    /// integration tests exercising the webhook router and coalescing
    /// behavior against a stub [`Executor`].
    #[cfg(any(test, feature = "test-utils"))]
    pub fn for_test(
        executor: Arc<dyn Executor>,
        github_managers: Vec<Arc<GitHubManager>>,
        gitlab_managers: Vec<Arc<GitLabManager>>,
        delay: Duration,
    ) -> Arc<Self> {
        let fleet: Vec<Arc<dyn PlatformManager>> = github_managers
            .iter()
            .cloned()
            .map(|m| m as Arc<dyn PlatformManager>)
            .chain(gitlab_managers.iter().cloned().map(|m| m as Arc<dyn PlatformManager>))
            .collect();

        let (queue, rx) = DelayQueue::new();
        let coordinator = Arc::new(Self {
            queue,
            executor,
            delay,
            github_managers,
            gitlab_managers,
            fleet,
        });
        coordinator.clone().spawn_dispatch_loop(rx);
        coordinator
    }

    /// Exposes the webhook router for integration tests.
    #[cfg(any(test, feature = "test-utils"))]
    pub fn test_router(self: Arc<Self>) -> Router {
        self.router()
    }
}

/// Union the new args' repos with the old entry's, preserving the new
/// intent's order first and appending any older repos not already present.
fn merge_repos(new: ExecutionArgs, old: ExecutionArgs) -> ExecutionArgs {
    let mut repos = new.repos;
    for repo in old.repos {
        if !repos.contains(&repo) {
            repos.push(repo);
        }
    }
    ExecutionArgs { repos, ..new }
}

/// Accepts a 5-field cron expression (standard, no seconds) by prepending a
/// `0` seconds field, since the `cron` crate requires one.
fn normalize_cron_expr(expr: &str) -> String {
    if expr.split_whitespace().count() == 5 {
        format!("0 {expr}")
    } else {
        expr.to_string()
    }
}

fn parse_listen_addr(listen: &str) -> Result<std::net::SocketAddr> {
    let listen = if listen.starts_with(':') { format!("0.0.0.0{listen}") } else { listen.to_string() };
    listen
        .parse()
        .map_err(|e| ScanhookError::ConfigInvalid(format!("invalid webhook listen address {listen:?}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use scanhook_core::models::PlatformKind;

    fn args(api_url: &str, repos: Vec<&str>) -> ExecutionArgs {
        ExecutionArgs {
            platform: PlatformKind::GitHub,
            api_url: api_url.to_string(),
            api_token: "token".to_string(),
            repos: repos.into_iter().map(str::to_string).collect(),
            git_user: "renovate".to_string(),
            git_email: "renovate@example.com".to_string(),
        }
    }

    #[test]
    fn merge_preserves_new_order_then_appends_unseen_old_repos() {
        let new = args("https://api.github.com", vec!["A", "C"]);
        let old = args("https://api.github.com", vec!["A", "B"]);
        let merged = merge_repos(new, old);
        assert_eq!(merged.repos, vec!["A", "C", "B"]);
    }

    #[test]
    fn merge_deduplicates_repeated_repos() {
        let new = args("https://api.github.com", vec!["A"]);
        let old = args("https://api.github.com", vec!["A"]);
        let merged = merge_repos(new, old);
        assert_eq!(merged.repos, vec!["A"]);
    }

    #[test]
    fn normalizes_five_field_cron_to_six_fields() {
        assert_eq!(normalize_cron_expr("*/5 * * * *"), "0 */5 * * * *");
        assert_eq!(normalize_cron_expr("0 */5 * * * *"), "0 */5 * * * *");
    }

    #[test]
    fn listen_addr_expands_bare_port() {
        assert_eq!(parse_listen_addr(":3000").unwrap().port(), 3000);
    }

    struct NoopExecutor;

    #[async_trait::async_trait]
    impl scanhook_core::executor::Executor for NoopExecutor {
        async fn execute(&self, _args: ExecutionArgs) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn spawn_cron_rejects_unparsable_timezone() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let coordinator = Coordinator::for_test(Arc::new(NoopExecutor), Vec::new(), Vec::new(), Duration::ZERO);
            let result = coordinator.spawn_cron("* * * * *", "Not/AZone", CancellationToken::new());
            assert!(matches!(result, Err(ScanhookError::ConfigInvalid(_))));
        });
    }

    #[test]
    fn spawn_cron_accepts_configured_timezone() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let coordinator = Coordinator::for_test(Arc::new(NoopExecutor), Vec::new(), Vec::new(), Duration::ZERO);
            let result = coordinator.spawn_cron("* * * * *", "America/New_York", CancellationToken::new());
            assert!(result.is_ok());
        });
    }
}
