//! Error taxonomy for the gateway binary and services, per spec §7.
//!
//! One `thiserror` enum per phase, the way the teacher's `apollo-router-error` crate
//! separates `FetchError`/`SchemaError`/`QueryPlannerError`. Every error that can
//! reach a client response carries a stable `extensions.code`.

use federation_core::{CompositionError, PlanningError};

/// Startup-fatal configuration problems.
#[derive(Debug, thiserror::Error)]
pub enum InvalidOpts {
    #[error("duplicate service name `{0}`")]
    DuplicateServiceName(String),

    #[error("service `{0}` has no url configured")]
    MissingUrl(String),

    #[error("service `{0}` has an empty endpoint list")]
    EmptyEndpoints(String),
}

/// Errors reading and parsing the configuration file, surfaced to the host's
/// plugin-registration site per §7 "Startup errors are surfaced to the host's
/// plugin-registration site."
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("could not read configuration file {path}: {source}")]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not parse configuration: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error(transparent)]
    InvalidOpts(#[from] InvalidOpts),
}

/// Per-subgraph transport or parsing failure (spec §4.1, §7 `FederatedError`).
#[derive(Debug, thiserror::Error)]
pub enum SubgraphError {
    #[error("service `{service}` is unreachable: {message}")]
    Transport { service: String, message: String },

    #[error("service `{service}` returned a response that is not valid JSON")]
    InvalidJson { service: String },

    #[error("service `{service}` response has no data._service.sdl")]
    SdlUnavailable { service: String },

    #[error("service `{service}` response JSON contained a prototype-polluting key `{key}`")]
    UnsafeJson { service: String, key: String },

    #[error("websocket to service `{service}` closed: {message}")]
    SubscriptionClosed { service: String, message: String },
}

impl SubgraphError {
    pub fn code(&self) -> &'static str {
        match self {
            SubgraphError::Transport { .. } => "SUBGRAPH_FETCH_ERROR",
            SubgraphError::InvalidJson { .. } => "SUBGRAPH_INVALID_JSON",
            SubgraphError::SdlUnavailable { .. } => "SUBGRAPH_SDL_UNAVAILABLE",
            SubgraphError::UnsafeJson { .. } => "SUBGRAPH_UNSAFE_JSON",
            SubgraphError::SubscriptionClosed { .. } => "SUBGRAPH_SUBSCRIPTION_CLOSED",
        }
    }
}

/// Gateway lifecycle errors (spec §4.6, §7).
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("invalid configuration: {0}")]
    InvalidOpts(#[from] InvalidOpts),

    #[error(transparent)]
    NoValidServiceSDLs(#[from] CompositionError),

    #[error("schema composition failed: {0}")]
    SchemaInitIssues(String),

    #[error("subgraph `{service}` refresh failed: {source}")]
    GatewayRefresh {
        service: String,
        #[source]
        source: SubgraphError,
    },

    #[error("hook `{hook}` failed: {message}")]
    HookError { hook: String, message: String },
}

impl GatewayError {
    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::InvalidOpts(_) => "INVALID_OPTS",
            GatewayError::NoValidServiceSDLs(_) => "NO_VALID_SERVICE_SDLS",
            GatewayError::SchemaInitIssues(_) => "SCHEMA_COMPOSITION_ERROR",
            GatewayError::GatewayRefresh { .. } => "GATEWAY_REFRESH_ERROR",
            GatewayError::HookError { .. } => "HOOK_ERROR",
        }
    }
}

/// A single error entry as it appears in a GraphQL response's top-level `errors`
/// array, carrying the path rewritten to the client-visible response path (§4.5).
#[derive(Debug, Clone, serde::Serialize)]
pub struct FederatedError {
    pub message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub path: Vec<serde_json::Value>,
    pub extensions: FederatedErrorExtensions,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct FederatedErrorExtensions {
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
}

impl FederatedError {
    pub fn from_subgraph(service: &str, err: &SubgraphError, path: Vec<serde_json::Value>) -> Self {
        FederatedError {
            message: err.to_string(),
            path,
            extensions: FederatedErrorExtensions {
                code: err.code().to_string(),
                service: Some(service.to_string()),
            },
        }
    }

    pub fn from_planning(err: &PlanningError) -> Self {
        FederatedError {
            message: err.to_string(),
            path: Vec::new(),
            extensions: FederatedErrorExtensions {
                code: "QUERY_PLANNING_ERROR".to_string(),
                service: None,
            },
        }
    }
}
