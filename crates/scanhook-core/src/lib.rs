//! Core library: configuration, error types, crypto, webhook classification,
//! the delay queue, the Kubernetes execution backend, and shared utilities.

pub mod config;
pub mod crypto;
pub mod error;
pub mod executor;
pub mod models;
pub mod queue;
pub mod util;
pub mod webhook;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
