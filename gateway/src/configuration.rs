//! Gateway configuration (spec §6), deserialized from YAML the way the teacher's
//! router configuration does, with `humantime_serde` for duration fields.

use std::time::Duration;

use serde::{Deserialize, Serialize};

fn default_retry_count() -> u32 {
    10
}

fn default_retry_interval() -> Duration {
    Duration::from_millis(3000)
}

fn default_true() -> bool {
    true
}

/// Top-level gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Configuration {
    pub services: Vec<ServiceDescriptor>,

    /// `None` disables polling; `Some` enables SDL polling at this cadence.
    #[serde(default, with = "humantime_serde::option")]
    pub polling_interval: Option<Duration>,

    #[serde(default = "default_retry_count")]
    pub retry_services_count: u32,

    #[serde(default = "default_retry_interval", with = "humantime_serde")]
    pub retry_services_interval: Duration,

    /// Enables planner-level Plan caching, keyed by (operation text, schema
    /// version) per the Open Question decision recorded in DESIGN.md.
    #[serde(default = "default_true")]
    pub cache: bool,

    /// How often to ask a [`ServicesProvider`] for the current service set
    /// (§6 "services: list or async provider"). `None` disables dynamic
    /// reconciliation; the static `services` list above is then fixed for
    /// the gateway's lifetime, reconciled only against retries/polling.
    #[serde(default, with = "humantime_serde::option")]
    pub services_refresh_interval: Option<Duration>,
}

impl Configuration {
    pub fn validate(&self) -> Result<(), crate::error::InvalidOpts> {
        let mut seen = std::collections::HashSet::new();
        for service in &self.services {
            if !seen.insert(service.name.clone()) {
                return Err(crate::error::InvalidOpts::DuplicateServiceName(
                    service.name.clone(),
                ));
            }
            if service.url.is_empty() {
                return Err(crate::error::InvalidOpts::EmptyEndpoints(service.name.clone()));
            }
        }
        Ok(())
    }
}

/// One subgraph descriptor (spec §3 "Subgraph descriptor").
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceDescriptor {
    pub name: String,

    /// One or more endpoint URLs; the client tries each in order until one
    /// succeeds (§4.1 "MUST succeed against the first reachable endpoint").
    #[serde(deserialize_with = "one_or_many", default)]
    pub url: Vec<url::Url>,

    pub ws_url: Option<url::Url>,

    #[serde(default)]
    pub mandatory: bool,

    #[serde(default)]
    pub allow_batched_queries: bool,

    #[serde(default)]
    pub collectors: Collectors,

    #[serde(default = "default_keep_alive", with = "humantime_serde")]
    pub keep_alive_timeout: Duration,

    #[serde(default, with = "humantime_serde::option")]
    pub keep_alive_max_timeout: Option<Duration>,

    /// An allowlist of inbound headers forwarded to this subgraph when no
    /// custom rewriter is installed at runtime (§4.1 "Contract: header
    /// forwarding").
    #[serde(default = "default_header_allowlist")]
    pub forwarded_headers: Vec<String>,
}

fn default_keep_alive() -> Duration {
    Duration::from_secs(60)
}

fn default_header_allowlist() -> Vec<String> {
    vec!["authorization".to_string(), "x-request-id".to_string()]
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Collectors {
    #[serde(default)]
    pub collect_status_codes: bool,
    #[serde(default)]
    pub collect_extensions: bool,
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<url::Url>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(url::Url),
        Many(Vec<url::Url>),
    }
    match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(u) => Ok(vec![u]),
        OneOrMany::Many(v) => Ok(v),
    }
}

/// A dynamic source of the service set, polled at `services_refresh_interval`
/// (§6 "services: list or async provider"). Mirrors the static `services`
/// list shape so either source feeds the same [`ServiceRegistry::reconcile`]
/// diff logic.
#[async_trait::async_trait]
pub trait ServicesProvider: Send + Sync {
    async fn services(&self) -> Vec<ServiceDescriptor>;
}

/// The default provider when the config only carries a static list: always
/// returns the same descriptors, so reconciliation against it is a no-op.
pub struct StaticServices(pub Vec<ServiceDescriptor>);

#[async_trait::async_trait]
impl ServicesProvider for StaticServices {
    async fn services(&self) -> Vec<ServiceDescriptor> {
        self.0.clone()
    }
}

/// CLI entry point, following the teacher's `clap::Parser` CLI pattern
/// (`apollo-federation/cli`) with env var fallback.
#[derive(Debug, clap::Parser)]
#[command(name = "gateway", about = "Federated GraphQL gateway")]
pub struct Args {
    /// Path to the YAML configuration file.
    #[arg(long, env = "GATEWAY_CONFIG")]
    pub config: std::path::PathBuf,

    /// Address to bind the HTTP listener to.
    #[arg(long, env = "GATEWAY_LISTEN", default_value = "127.0.0.1:4000")]
    pub listen: std::net::SocketAddr,
}

pub fn load(path: &std::path::Path) -> Result<Configuration, crate::error::ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| crate::error::ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let config: Configuration = serde_yaml::from_str(&text)?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_duplicate_service_names() {
        let config = Configuration {
            services: vec![
                ServiceDescriptor {
                    name: "user".into(),
                    url: vec!["http://localhost:4001".parse().unwrap()],
                    ws_url: None,
                    mandatory: true,
                    allow_batched_queries: false,
                    collectors: Collectors::default(),
                    keep_alive_timeout: default_keep_alive(),
                    keep_alive_max_timeout: None,
                    forwarded_headers: default_header_allowlist(),
                },
                ServiceDescriptor {
                    name: "user".into(),
                    url: vec!["http://localhost:4002".parse().unwrap()],
                    ws_url: None,
                    mandatory: false,
                    allow_batched_queries: false,
                    collectors: Collectors::default(),
                    keep_alive_timeout: default_keep_alive(),
                    keep_alive_max_timeout: None,
                    forwarded_headers: default_header_allowlist(),
                },
            ],
            polling_interval: None,
            retry_services_count: default_retry_count(),
            retry_services_interval: default_retry_interval(),
            cache: true,
            services_refresh_interval: None,
        };
        assert!(matches!(
            config.validate(),
            Err(crate::error::InvalidOpts::DuplicateServiceName(_))
        ));
    }
}
