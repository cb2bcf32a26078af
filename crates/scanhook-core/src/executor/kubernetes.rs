//! Kubernetes execution backend: submits a batch as an isolated `Job` with
//! a credential `Secret`, field-for-field compatible with the original
//! scan-tool job spec this orchestrator replaces.

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::core::v1::{
    Capabilities, Container, EnvFromSource, EnvVar, PodSecurityContext, PodSpec, PodTemplateSpec, Secret,
    SecretEnvSource, SecurityContext,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, PostParams};
use kube::{Client, Config as KubeConfig};

use crate::config::KubernetesExecutorConfig;
use crate::crypto::md5_hex;
use crate::error::{Result, ScanhookError};
use crate::models::ExecutionArgs;
use crate::util::format_name_prefix;

use super::Executor;

const DEFAULT_RENOVATE_IMAGE: &str = "renovate/renovate:latest";
const SECRET_TOKEN_KEY: &str = "RENOVATE_TOKEN";
const REPO_LABEL: &str = "renovate-server.stack11.com/repo";
const REPOS_ANNOTATION: &str = "renovate-server.stack11.com/repos";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PullPolicy {
    Always,
    Never,
    IfNotPresent,
}

impl PullPolicy {
    fn parse(raw: &str) -> Result<Self> {
        match raw.to_lowercase().as_str() {
            "always" => Ok(PullPolicy::Always),
            "never" | "" => Ok(PullPolicy::Never),
            "ifnotpresent" | "if_not_present" => Ok(PullPolicy::IfNotPresent),
            other => Err(ScanhookError::ConfigInvalid(format!("unsupported image pull policy: {other}"))),
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            PullPolicy::Always => "Always",
            PullPolicy::Never => "Never",
            PullPolicy::IfNotPresent => "IfNotPresent",
        }
    }
}

pub struct KubernetesExecutor {
    client: Client,
    namespace: String,
    image: String,
    image_pull_policy: PullPolicy,
    job_ttl_seconds: Option<i32>,
}

impl KubernetesExecutor {
    pub async fn new(config: &KubernetesExecutorConfig, namespace: impl Into<String>) -> Result<Self> {
        let image_pull_policy = PullPolicy::parse(&config.renovate_image_pull_policy)?;
        let image = if config.renovate_image.is_empty() {
            DEFAULT_RENOVATE_IMAGE.to_string()
        } else {
            config.renovate_image.clone()
        };

        let kube_config = match &config.kube_client.kubeconfig {
            Some(path) => {
                let kubeconfig = kube::config::Kubeconfig::read_from(path)
                    .map_err(|e| ScanhookError::ConfigInvalid(format!("failed to read kubeconfig: {e}")))?;
                KubeConfig::from_custom_kubeconfig(kubeconfig, &Default::default())
                    .await
                    .map_err(|e| ScanhookError::ConfigInvalid(format!("failed to build kube config: {e}")))?
            }
            None => KubeConfig::infer()
                .await
                .map_err(|e| ScanhookError::ConfigInvalid(format!("failed to infer kube config: {e}")))?,
        };

        let client = Client::try_from(kube_config)
            .map_err(|e| ScanhookError::ConfigInvalid(format!("failed to create kubernetes client: {e}")))?;

        Ok(Self {
            client,
            namespace: namespace.into(),
            image,
            image_pull_policy,
            job_ttl_seconds: config.job_ttl_seconds,
        })
    }

    fn secret_api(&self) -> Api<Secret> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    fn job_api(&self) -> Api<Job> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    async fn ensure_secret(&self, token: &str) -> Result<String> {
        let secret_name = format!("renovate-{}", md5_hex(token.as_bytes()));
        let api = self.secret_api();

        match api.get(&secret_name).await {
            Ok(_) => {}
            Err(kube::Error::Api(err)) if err.code == 404 => {
                let mut data = BTreeMap::new();
                data.insert(SECRET_TOKEN_KEY.to_string(), k8s_openapi::ByteString(token.as_bytes().to_vec()));

                let secret = Secret {
                    metadata: ObjectMeta {
                        name: Some(secret_name.clone()),
                        namespace: Some(self.namespace.clone()),
                        ..Default::default()
                    },
                    type_: Some("Opaque".to_string()),
                    data: Some(data),
                    ..Default::default()
                };

                api.create(&PostParams::default(), &secret)
                    .await
                    .map_err(|e| ScanhookError::BackendFailure(format!("failed to create required secret: {e}")))?;
            }
            Err(e) => {
                return Err(ScanhookError::BackendFailure(format!("failed to check required secret: {e}")));
            }
        }

        Ok(secret_name)
    }

    fn build_job(&self, args: &ExecutionArgs, secret_name: &str) -> Job {
        let (generate_name_prefix, repo_label, repos_annotation) = if args.repos.len() == 1 {
            (
                format_name_prefix("renovate-", &args.repos[0]),
                args.repos[0].to_lowercase().replace('/', "-"),
                args.repos[0].clone(),
            )
        } else {
            (
                "renovate-batch-".to_string(),
                "batch".to_string(),
                serde_json::to_string(&args.repos).unwrap_or_default(),
            )
        };

        let mut labels = BTreeMap::new();
        labels.insert(REPO_LABEL.to_string(), repo_label);

        let mut annotations = BTreeMap::new();
        annotations.insert(REPOS_ANNOTATION.to_string(), repos_annotation);

        Job {
            metadata: ObjectMeta {
                generate_name: Some(generate_name_prefix),
                namespace: Some(self.namespace.clone()),
                annotations: Some(annotations),
                ..Default::default()
            },
            spec: Some(JobSpec {
                parallelism: Some(1),
                completions: Some(1),
                backoff_limit: Some(1),
                ttl_seconds_after_finished: self.job_ttl_seconds,
                template: PodTemplateSpec {
                    metadata: Some(ObjectMeta {
                        labels: Some(labels),
                        ..Default::default()
                    }),
                    spec: Some(PodSpec {
                        restart_policy: Some("Never".to_string()),
                        termination_grace_period_seconds: Some(0),
                        dns_policy: Some("ClusterFirst".to_string()),
                        security_context: Some(PodSecurityContext {
                            run_as_non_root: Some(true),
                            ..Default::default()
                        }),
                        containers: vec![Container {
                            name: "renovate".to_string(),
                            tty: Some(true),
                            image: Some(self.image.clone()),
                            image_pull_policy: Some(self.image_pull_policy.as_str().to_string()),
                            args: Some(args.repos.clone()),
                            env_from: Some(vec![EnvFromSource {
                                secret_ref: Some(SecretEnvSource {
                                    name: secret_name.to_string(),
                                    ..Default::default()
                                }),
                                ..Default::default()
                            }]),
                            env: Some(env_vars(args)),
                            security_context: Some(SecurityContext {
                                capabilities: Some(Capabilities {
                                    drop: Some(vec!["all".to_string()]),
                                    ..Default::default()
                                }),
                                run_as_non_root: Some(true),
                                read_only_root_filesystem: Some(false),
                                allow_privilege_escalation: Some(false),
                                ..Default::default()
                            }),
                            ..Default::default()
                        }],
                        ..Default::default()
                    }),
                    ..Default::default()
                },
                ..Default::default()
            }),
            ..Default::default()
        }
    }
}

/// Container environment, matching the original job spec. The duplicated
/// `RENOVATE_ONBOARDING` entry present upstream is a copy-paste artifact and
/// is emitted once here.
fn env_vars(args: &ExecutionArgs) -> Vec<EnvVar> {
    vec![
        env("LOG_LEVEL", "debug"),
        env("LOG_FORMAT", "json"),
        env("RENOVATE_PLATFORM", args.platform.as_str()),
        env("RENOVATE_GIT_AUTHOR", &format!("{} <{}>", args.git_user, args.git_email)),
        env("RENOVATE_ONBOARDING", "false"),
        env("RENOVATE_TRUST_LEVEL", "low"),
        env("RENOVATE_BASE_DIR", "/tmp/renovate"),
        env("RENOVATE_AUTODISCOVER", "false"),
        env("RENOVATE_ENDPOINT", &args.api_url),
        env("RENOVATE_BINARY_SOURCE", "global"),
    ]
}

fn env(name: &str, value: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.to_string()),
        ..Default::default()
    }
}

#[async_trait]
impl Executor for KubernetesExecutor {
    async fn execute(&self, args: ExecutionArgs) -> Result<()> {
        if args.repos.is_empty() {
            return Ok(());
        }

        let secret_name = self.ensure_secret(&args.api_token).await?;
        let job = self.build_job(&args, &secret_name);

        self.job_api()
            .create(&PostParams::default(), &job)
            .await
            .map_err(|e| ScanhookError::BackendFailure(format!("failed to create kubernetes job: {e}")))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PlatformKind;

    fn sample_args(repos: Vec<&str>) -> ExecutionArgs {
        ExecutionArgs {
            platform: PlatformKind::GitHub,
            api_url: "https://api.github.com".to_string(),
            api_token: "token".to_string(),
            repos: repos.into_iter().map(str::to_string).collect(),
            git_user: "renovate".to_string(),
            git_email: "renovate@example.com".to_string(),
        }
    }

    #[test]
    fn parses_known_pull_policies() {
        assert_eq!(PullPolicy::parse("always").unwrap(), PullPolicy::Always);
        assert_eq!(PullPolicy::parse("Never").unwrap(), PullPolicy::Never);
        assert_eq!(PullPolicy::parse("").unwrap(), PullPolicy::Never);
        assert_eq!(PullPolicy::parse("IfNotPresent").unwrap(), PullPolicy::IfNotPresent);
        assert_eq!(PullPolicy::parse("if_not_present").unwrap(), PullPolicy::IfNotPresent);
    }

    #[test]
    fn rejects_unknown_pull_policy() {
        assert!(PullPolicy::parse("sometimes").is_err());
    }

    #[test]
    fn env_vars_emit_onboarding_once() {
        let args = sample_args(vec!["foo/bar"]);
        let vars = env_vars(&args);
        let onboarding_count = vars.iter().filter(|v| v.name == "RENOVATE_ONBOARDING").count();
        assert_eq!(onboarding_count, 1);
    }
}
