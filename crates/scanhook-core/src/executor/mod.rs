//! Execution backend abstraction: turns an [`ExecutionArgs`] into a running
//! isolated workload on some substrate.

pub mod kubernetes;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::ExecutionArgs;

#[async_trait]
pub trait Executor: Send + Sync {
    /// Ensures the credential secret exists, then creates a job. A no-op
    /// returning success when `args.repos` is empty — empty batches can
    /// arise from coalescing bugs upstream and must not be treated as an
    /// execution failure.
    async fn execute(&self, args: ExecutionArgs) -> Result<()>;
}

pub use kubernetes::KubernetesExecutor;
