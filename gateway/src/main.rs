//! Gateway binary: loads configuration, brings up the [`Gateway`], and serves
//! `POST /graphql` with an `axum` router the way the teacher's `apollo-router`
//! binary wires its own HTTP entrypoint around its Tower stack.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use clap::Parser;
use serde_json::Value;
use tracing::{error, info};

use gateway::configuration::{self, Args};
use gateway::error::FederatedError;
use gateway::{execution, Gateway};

#[derive(Clone)]
struct AppState {
    gateway: Arc<Gateway>,
}

#[derive(Debug, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphQlRequest {
    query: String,
    #[serde(default)]
    variables: Value,
    #[serde(default)]
    operation_name: Option<String>,
}

#[derive(Debug, serde::Serialize)]
struct GraphQlResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    errors: Vec<FederatedError>,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .json()
        .init();

    let config = match configuration::load(&args.config) {
        Ok(config) => config,
        Err(err) => {
            error!(error = %err, "failed to load configuration");
            std::process::exit(1);
        }
    };

    let gateway = match Gateway::start(config).await {
        Ok(gateway) => gateway,
        Err(err) => {
            error!(error = %err, code = err.code(), "gateway failed to start");
            std::process::exit(1);
        }
    };
    gateway.spawn_background_loops();

    let state = AppState { gateway: gateway.clone() };
    let app = Router::new()
        .route("/graphql", post(handle_graphql))
        .with_state(state);

    info!(listen = %args.listen, "gateway listening");
    let listener = match tokio::net::TcpListener::bind(args.listen).await {
        Ok(listener) => listener,
        Err(err) => {
            error!(error = %err, "failed to bind listener");
            std::process::exit(1);
        }
    };

    let shutdown_gateway = gateway.clone();
    let serve = axum::serve(listener, app).with_graceful_shutdown(async move {
        let _ = tokio::signal::ctrl_c().await;
        shutdown_gateway.close().await;
    });

    if let Err(err) = serve.await {
        error!(error = %err, "gateway server exited with error");
    }
}

async fn handle_graphql(
    State(state): State<AppState>,
    Json(request): Json<GraphQlRequest>,
) -> (StatusCode, Json<GraphQlResponse>) {
    let schema = state.gateway.current_schema().await;

    let operation = match federation_core::parse_operation(
        &schema.schema,
        &request.query,
        request.operation_name.as_deref(),
    ) {
        Ok(op) => op,
        Err(err) => {
            return (
                StatusCode::OK,
                Json(GraphQlResponse {
                    data: None,
                    errors: vec![FederatedError::from_planning(&err)],
                }),
            );
        }
    };

    let plan = match federation_core::plan(&operation, &schema.type_map) {
        Ok(plan) => plan,
        Err(err) => {
            return (
                StatusCode::OK,
                Json(GraphQlResponse {
                    data: None,
                    errors: vec![FederatedError::from_planning(&err)],
                }),
            );
        }
    };

    let registry = state.gateway.registry().await;
    let result = execution::execute(&plan, &registry, &request.variables).await;

    if !result.collectors.status_codes.is_empty() || !result.collectors.extensions.is_empty() {
        // onResolution's context.collectors (§4.5); this binary only logs them,
        // an embedder wiring its own hook would forward them instead.
        info!(
            status_codes = ?result.collectors.status_codes,
            extensions = ?result.collectors.extensions,
            "collected subgraph response metadata"
        );
    }

    (
        StatusCode::OK,
        Json(GraphQlResponse {
            data: Some(result.data),
            errors: result.errors,
        }),
    )
}
