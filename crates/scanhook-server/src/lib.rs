//! Server binary's library half: the coordinator, platform managers, CLI,
//! logging, and signal handling. Split from `main.rs` so integration tests
//! can exercise the coordinator without spawning the real process.

pub mod cli;
pub mod coordinator;
pub mod logging;
pub mod managers;
pub mod signals;
