//! Platform managers: one per configured webhook endpoint, each owning
//! authentication, payload classification, repo enumeration, and
//! execution-args construction for its platform.

pub mod github;
pub mod gitlab;

use async_trait::async_trait;
use scanhook_core::error::Result;
use scanhook_core::models::ExecutionArgs;

pub use github::GitHubManager;
pub use gitlab::GitLabManager;

/// The capability set shared by both platform managers, used by the
/// coordinator's cron fleet walk to address either kind uniformly without
/// inspecting which platform it is.
#[async_trait]
pub trait PlatformManager: Send + Sync {
    fn webhook_path(&self) -> &str;

    /// Enumerate active repos via the platform API, excluding disabled ones.
    async fn list_repos(&self) -> Result<Vec<String>>;

    fn execution_args(&self, repos: Vec<String>) -> ExecutionArgs;
}
