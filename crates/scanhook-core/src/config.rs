//! Configuration schema and loading.
//!
//! The config file is YAML (or JSON, selected by file extension) and is
//! pre-processed for `${VAR}` / `${VAR:-default}` environment variable
//! references before being deserialized into [`Config`].

use std::path::Path;

use serde::Deserialize;

use crate::error::{Result, ScanhookError};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub github: Vec<PlatformConfig>,
    pub gitlab: Vec<PlatformConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            github: Vec::new(),
            gitlab: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub log: Vec<LogSinkConfig>,
    pub webhook: WebhookListenConfig,
    pub executor: ExecutorConfig,
    pub scheduling: SchedulingConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            log: vec![LogSinkConfig::default()],
            webhook: WebhookListenConfig::default(),
            executor: ExecutorConfig::default(),
            scheduling: SchedulingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogSinkConfig {
    pub level: String,
    pub format: String,
    pub file: Option<String>,
}

impl Default for LogSinkConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
            file: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WebhookListenConfig {
    pub listen: String,
    pub tls: Option<TlsConfig>,
}

impl Default for WebhookListenConfig {
    fn default() -> Self {
        Self {
            listen: ":3000".to_string(),
            tls: None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TlsConfig {
    pub cert_file: String,
    pub key_file: String,
    pub ca_file: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    pub kubernetes: Option<KubernetesExecutorConfig>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self { kubernetes: None }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct KubernetesExecutorConfig {
    pub kube_client: KubeClientConfig,
    pub renovate_image: String,
    pub renovate_image_pull_policy: String,
    /// Wire name is `jobTTL`; accepted as a plain count of seconds rather
    /// than a parsed duration string, for schema simplicity.
    #[serde(rename = "jobTTL")]
    pub job_ttl_seconds: Option<i32>,
}

impl Default for KubernetesExecutorConfig {
    fn default() -> Self {
        Self {
            kube_client: KubeClientConfig::default(),
            renovate_image: String::new(),
            renovate_image_pull_policy: "never".to_string(),
            job_ttl_seconds: None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct KubeClientConfig {
    pub kubeconfig: Option<String>,
    pub rate_limit: Option<RateLimitConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub qps: Option<f32>,
    pub burst: Option<i32>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulingConfig {
    /// Coalescing debounce delay, in seconds. Zero means "at next dispatch
    /// tick". Wire name is `delay`; accepted as a plain count of seconds
    /// rather than a parsed duration string (e.g. `5m`), for schema
    /// simplicity.
    #[serde(rename = "delay")]
    pub delay_seconds: u64,
    pub cron: Option<String>,
    pub timezone: String,
}

impl Default for SchedulingConfig {
    fn default() -> Self {
        Self {
            delay_seconds: 0,
            cron: None,
            timezone: "UTC".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PlatformConfig {
    pub api: ApiConfig,
    pub git: GitConfig,
    pub webhook: WebhookEndpointConfig,
    pub dashboard_issue_title: String,
    pub disabled_repo_name_match: String,
    pub projects: Vec<ProjectOverride>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    #[serde(rename = "baseURL")]
    pub base_url: String,
    #[serde(rename = "oauthToken")]
    pub oauth_token: String,
    pub client: HttpClientConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct HttpClientConfig {
    pub proxy: Option<HttpProxyConfig>,
    pub tls: Option<TlsConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HttpProxyConfig {
    pub http: String,
    pub https: String,
    pub no_proxy: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct GitConfig {
    pub user: String,
    pub email: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct WebhookEndpointConfig {
    pub path: String,
    pub secret: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ProjectOverride {
    pub name: String,
    pub dashboard_issue_title: Option<String>,
    pub disabled: bool,
}

/// Expand `${VAR}` and `${VAR:-default}` references against the process
/// environment, leaving unresolved references with no default untouched.
fn expand_env(raw: &str) -> String {
    let re = regex_lite::Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(:-([^}]*))?\}").unwrap();
    re.replace_all(raw, |caps: &regex_lite::Captures| {
        let name = &caps[1];
        match std::env::var(name) {
            Ok(val) => val,
            Err(_) => caps.get(3).map(|m| m.as_str().to_string()).unwrap_or_else(|| caps[0].to_string()),
        }
    })
    .into_owned()
}

/// Load and parse the config file at `path`, expanding environment variable
/// references first. JSON is selected by a `.json` extension; YAML otherwise.
pub fn load(path: &Path) -> Result<Config> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| ScanhookError::ConfigInvalid(format!("failed to read {}: {e}", path.display())))?;
    let expanded = expand_env(&raw);

    let is_json = path.extension().is_some_and(|ext| ext == "json");
    let config: Config = if is_json {
        serde_json::from_str(&expanded)
            .map_err(|e| ScanhookError::ConfigInvalid(format!("invalid json config: {e}")))?
    } else {
        serde_yaml::from_str(&expanded)
            .map_err(|e| ScanhookError::ConfigInvalid(format!("invalid yaml config: {e}")))?
    };

    validate(&config)?;
    Ok(config)
}

/// Webhook paths must be unique across both platforms; a duplicate is
/// ConfigInvalid at startup.
fn validate(config: &Config) -> Result<()> {
    let mut seen = std::collections::HashSet::new();
    for platform in config.github.iter().chain(config.gitlab.iter()) {
        if !seen.insert(platform.webhook.path.clone()) {
            return Err(ScanhookError::ConfigInvalid(format!(
                "duplicate webhook path: {}",
                platform.webhook.path
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn expands_plain_reference() {
        temp_env::with_var("SCANHOOK_TEST_TOKEN", Some("abc123"), || {
            assert_eq!(expand_env("token: ${SCANHOOK_TEST_TOKEN}"), "token: abc123");
        });
    }

    #[test]
    fn expands_with_default_when_unset() {
        temp_env::with_var_unset("SCANHOOK_TEST_MISSING", || {
            assert_eq!(expand_env("level: ${SCANHOOK_TEST_MISSING:-info}"), "level: info");
        });
    }

    #[test]
    fn expands_default_is_overridden_when_var_is_set() {
        temp_env::with_var("SCANHOOK_TEST_LEVEL", Some("debug"), || {
            assert_eq!(expand_env("level: ${SCANHOOK_TEST_LEVEL:-info}"), "level: debug");
        });
    }

    #[test]
    fn rejects_duplicate_webhook_paths() {
        let mut config = Config::default();
        let mut p1 = PlatformConfig::default();
        p1.webhook.path = "/hooks/shared".to_string();
        let mut p2 = PlatformConfig::default();
        p2.webhook.path = "/hooks/shared".to_string();
        config.github.push(p1);
        config.gitlab.push(p2);

        assert!(validate(&config).is_err());
    }

    #[test]
    fn loads_yaml_config_from_disk_with_env_expansion() {
        temp_env::with_var("SCANHOOK_TEST_GH_TOKEN", Some("ghp_test123"), || {
            let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
            write!(
                file,
                r#"
server:
  webhook:
    listen: ":4000"
github:
  - api:
      baseURL: https://api.github.com
      oauthToken: ${{SCANHOOK_TEST_GH_TOKEN}}
    webhook:
      path: /github/hook
      secret: whsec
"#
            )
            .unwrap();

            let config = load(file.path()).unwrap();
            assert_eq!(config.server.webhook.listen, ":4000");
            assert_eq!(config.github.len(), 1);
            assert_eq!(config.github[0].api.oauth_token, "ghp_test123");
        });
    }

    #[test]
    fn load_rejects_malformed_yaml() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        write!(file, "server: [this is not: a valid map").unwrap();

        assert!(matches!(load(file.path()), Err(ScanhookError::ConfigInvalid(_))));
    }
}
