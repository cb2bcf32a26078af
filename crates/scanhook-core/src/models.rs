//! Core data types shared between platform managers, the coordinator, and
//! the execution backend.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlatformKind {
    GitHub,
    GitLab,
}

impl PlatformKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlatformKind::GitHub => "github",
            PlatformKind::GitLab => "gitlab",
        }
    }
}

impl std::fmt::Display for PlatformKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The unit of work handed to the execution backend. Produced by a platform
/// manager, consumed by the coordinator and the execution backend, never
/// mutated after dispatch.
#[derive(Debug, Clone)]
pub struct ExecutionArgs {
    pub platform: PlatformKind,
    pub api_url: String,
    pub api_token: String,
    /// Ordered; non-empty at execution time; duplicates removed by coalescing.
    pub repos: Vec<String>,
    pub git_user: String,
    pub git_email: String,
}

impl ExecutionArgs {
    /// The coalescing key: same endpoint, same credential, same queue slot.
    pub fn coalesce_key(&self) -> String {
        format!("{}{}", self.api_url, self.api_token)
    }
}
