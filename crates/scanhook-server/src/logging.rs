//! Tracing subscriber initialization from the configured sink list.
//!
//! Each configured sink becomes one `fmt` layer, console or file, text or
//! JSON. File sinks use a non-blocking appender; the returned guards must
//! be held for the lifetime of the process or buffered lines are lost.

use scanhook_core::config::LogSinkConfig;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{Layer, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize global tracing from the configured sinks, returning the
/// worker guards for any file sinks. Falls back to a single info-level
/// console sink when none are configured.
pub fn init(sinks: &[LogSinkConfig]) -> Vec<WorkerGuard> {
    let default_level = sinks.first().map(|s| s.level.as_str()).unwrap_or("info");
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("scanhook_server={default_level},scanhook_core={default_level}").into());

    let mut guards = Vec::new();
    let sinks: Vec<LogSinkConfig> = if sinks.is_empty() { vec![LogSinkConfig::default()] } else { sinks.to_vec() };

    let layers: Vec<_> = sinks
        .into_iter()
        .map(|sink| {
            let json = sink.format == "json";
            match sink.file {
                Some(path) => {
                    let path = std::path::PathBuf::from(path);
                    let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or_else(|| std::path::Path::new("."));
                    let file_name = path.file_name().unwrap_or_default();
                    let appender = tracing_appender::rolling::never(dir, file_name);
                    let (writer, guard) = tracing_appender::non_blocking(appender);
                    guards.push(guard);

                    if json {
                        tracing_subscriber::fmt::layer().json().with_writer(writer).boxed()
                    } else {
                        tracing_subscriber::fmt::layer().with_writer(writer).boxed()
                    }
                }
                None if json => tracing_subscriber::fmt::layer().json().boxed(),
                None => tracing_subscriber::fmt::layer().boxed(),
            }
        })
        .collect();

    tracing_subscriber::registry().with(filter).with(layers).init();
    guards
}
