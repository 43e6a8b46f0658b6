//! Execution Engine (spec §4.5): runs a [`Plan`] concurrently, stitches partial
//! JSON results by path, resolves entity jumps via `_entities`, and aggregates
//! errors.

pub mod entity_cache;

use std::sync::Arc;

use federation_core::query_plan::{PathSegment, ResponsePath};
use federation_core::{Plan, Representation, Step, StepKind};
use indexmap::{IndexMap, IndexSet};
use serde_json::Value;

use crate::error::{FederatedError, SubgraphError};
use crate::json_ext::{null_out_paths, read_at_path, remove_field, write_at_path};
use crate::services::subgraph_client::GraphQlRequest;
use crate::services::{RegisteredService, ServiceRegistry, SubgraphClient};

use entity_cache::EntityCache;

pub struct ExecutionResult {
    pub data: Value,
    pub errors: Vec<FederatedError>,
    /// Context-scoped collector map (§4.5 "Optional collectors"): populated
    /// only for services configured with `collectors.collectStatusCodes` /
    /// `collectors.collectExtensions`, for the host to observe.
    pub collectors: Collectors,
}

#[derive(Debug, Clone, Default)]
pub struct Collectors {
    pub status_codes: Vec<CollectedStatusCode>,
    pub extensions: Vec<CollectedExtensions>,
}

#[derive(Debug, Clone)]
pub struct CollectedStatusCode {
    pub service: String,
    pub status: u16,
}

#[derive(Debug, Clone)]
pub struct CollectedExtensions {
    pub service: String,
    pub extensions: Value,
}

/// Executes `plan` against `registry`, with `variables` the full set of
/// operation-level variable values supplied by the client. Steps run wave by
/// wave (§5 "Scheduling model"): within a wave every Step's inputs are already
/// resolved, so representation synthesis for that wave is done synchronously
/// before firing the concurrent subgraph calls.
pub async fn execute(plan: &Plan, registry: &ServiceRegistry, variables: &Value) -> ExecutionResult {
    let mut response = Value::Null;
    let mut errors = Vec::new();
    let mut completed: IndexSet<usize> = IndexSet::new();
    let mut failed: IndexSet<usize> = IndexSet::new();
    let mut cache = EntityCache::new();
    // Where each Entities Step's data actually landed, so injected key/requires
    // fields recorded relative to that Step's own fetched subtree (§4.4) can be
    // stripped at their real location rather than at the Step's template path.
    let mut entity_anchor_roots: IndexMap<usize, Vec<ResponsePath>> = IndexMap::new();
    let mut collectors = Collectors::default();

    loop {
        let ready = plan.ready_steps(&completed);
        if ready.is_empty() {
            break;
        }

        let mut prepared = Vec::new();
        for id in ready {
            let step = plan.step(id).expect("ready_steps only returns valid ids");
            if step.depends_on.iter().any(|d| failed.contains(d)) {
                failed.insert(id);
                completed.insert(id);
                continue;
            }
            match prepare_step(step, &response, registry, variables, &cache) {
                Some(p) => prepared.push((id, step, p)),
                None => {
                    completed.insert(id);
                }
            }
        }

        if prepared.is_empty() {
            continue;
        }

        let futures = prepared.iter().map(|(_, _, p)| p.run());
        let results = futures::future::join_all(futures).await;

        for ((id, step, prepared), result) in prepared.iter().zip(results) {
            let service_collectors = registry.get(&step.service).map(|s| s.descriptor.collectors.clone());
            let step_failed = apply_outcome(
                &mut response,
                &mut errors,
                step,
                prepared,
                result,
                &mut cache,
                &mut entity_anchor_roots,
                service_collectors.as_ref(),
                &mut collectors,
            );
            if step_failed {
                failed.insert(*id);
            }
            completed.insert(*id);
        }
    }

    for step in &plan.steps {
        if step.injected_fields.is_empty() {
            continue;
        }
        match step.kind {
            StepKind::Entities => {
                if let Some(anchors) = entity_anchor_roots.get(&step.id) {
                    for anchor in anchors {
                        for (field_path, field_name) in &step.injected_fields {
                            let mut full = anchor.clone();
                            full.extend(field_path.iter().cloned());
                            remove_field(&mut response, &full, field_name);
                        }
                    }
                }
            }
            _ => {
                for (field_path, field_name) in &step.injected_fields {
                    remove_field(&mut response, field_path, field_name);
                }
            }
        }
    }

    ExecutionResult { data: response, errors, collectors }
}

enum Prepared {
    Root {
        client: Arc<SubgraphClient>,
        request: GraphQlRequest,
    },
    Entities {
        client: Arc<SubgraphClient>,
        request: Option<GraphQlRequest>,
        to_fetch: Vec<Representation>,
        cached: Vec<(ResponsePath, Value)>,
        field_names: Vec<String>,
    },
}

struct RootOutcome {
    data: Option<serde_json::Map<String, Value>>,
    errors: Vec<Value>,
    status: u16,
    extensions: Option<Value>,
}

struct EntitiesOutcome {
    entities: Vec<Value>,
    status: u16,
    extensions: Option<Value>,
}

enum RunResult {
    Root(Result<RootOutcome, SubgraphError>),
    /// `None` when every representation was served from cache and no request
    /// was actually sent, so there is no upstream status/extensions to collect.
    Entities(Result<Option<EntitiesOutcome>, SubgraphError>),
}

impl Prepared {
    fn run(&self) -> std::pin::Pin<Box<dyn std::future::Future<Output = RunResult> + Send + '_>> {
        match self {
            Prepared::Root { client, request } => Box::pin(async move {
                let response = client.execute(request).await;
                RunResult::Root(response.map(|r| RootOutcome {
                    data: r.data.and_then(|d| d.as_object().cloned()),
                    errors: r.errors,
                    status: r.status,
                    extensions: r.extensions,
                }))
            }),
            Prepared::Entities { client, request, .. } => Box::pin(async move {
                let Some(request) = request else {
                    return RunResult::Entities(Ok(None));
                };
                let response = client.execute(request).await;
                RunResult::Entities(response.map(|r| {
                    let entities = r
                        .data
                        .as_ref()
                        .and_then(|d| d.get("_entities"))
                        .and_then(|v| v.as_array().cloned())
                        .unwrap_or_default();
                    Some(EntitiesOutcome {
                        entities,
                        status: r.status,
                        extensions: r.extensions,
                    })
                }))
            }),
        }
    }
}

fn prepare_step(
    step: &Step,
    response: &Value,
    registry: &ServiceRegistry,
    variables: &Value,
    cache: &EntityCache,
) -> Option<Prepared> {
    let service: &RegisteredService = registry.get(&step.service)?;
    let client = service.client.clone();

    match step.kind {
        StepKind::Entities => {
            let entity_request = step.entity_request.as_ref()?;
            let anchors = collect_anchors(response, &step.path);
            if anchors.is_empty() {
                return None;
            }

            let mut merged: IndexMap<(String, Vec<(String, String)>), Representation> = IndexMap::new();
            for (anchor_path, anchor_value) in anchors {
                let mut key_values = IndexMap::new();
                let mut complete = true;
                for f in &entity_request.key_and_requires_fields {
                    match get_nested(&anchor_value, f) {
                        Some(v) => {
                            key_values.insert(f.clone(), v);
                        }
                        None => {
                            complete = false;
                            break;
                        }
                    }
                }
                if !complete {
                    continue;
                }
                let dummy = Representation {
                    type_name: entity_request.type_name.clone(),
                    key_values: key_values.clone(),
                    response_paths: Vec::new(),
                };
                let key = dummy.dedup_key();
                let entry = merged.entry(key).or_insert_with(|| Representation {
                    type_name: entity_request.type_name.clone(),
                    key_values,
                    response_paths: Vec::new(),
                });
                entry.response_paths.push(anchor_path);
            }

            let reps: Vec<Representation> = merged.into_values().collect();
            if reps.is_empty() {
                return None;
            }

            let mut to_fetch = Vec::new();
            let mut cached = Vec::new();
            let field_names = top_level_field_names(&step.selection);

            for rep in reps {
                if let Some(value) = cache.get(&rep) {
                    for anchor_path in &rep.response_paths {
                        cached.push((anchor_path.clone(), value.clone()));
                    }
                } else {
                    to_fetch.push(rep);
                }
            }

            let request = if to_fetch.is_empty() {
                None
            } else {
                let representations: Vec<Value> = to_fetch.iter().map(Representation::to_any_json).collect();
                let mut vars = select_variables(step, variables);
                if let Value::Object(map) = &mut vars {
                    map.insert("representations".to_string(), Value::Array(representations));
                }
                Some(GraphQlRequest {
                    query: step.operation_text(),
                    variables: Some(vars),
                    operation_name: None,
                })
            };

            Some(Prepared::Entities {
                client,
                request,
                to_fetch,
                cached,
                field_names,
            })
        }
        _ => Some(Prepared::Root {
            client,
            request: GraphQlRequest {
                query: step.operation_text(),
                variables: Some(select_variables(step, variables)),
                operation_name: None,
            },
        }),
    }
}

/// Applies one Step's result to the response tree; returns true if the Step
/// failed (so dependents are short-circuited per §4.5).
#[allow(clippy::too_many_arguments)]
fn apply_outcome(
    response: &mut Value,
    errors: &mut Vec<FederatedError>,
    step: &Step,
    prepared: &Prepared,
    result: RunResult,
    cache: &mut EntityCache,
    entity_anchor_roots: &mut IndexMap<usize, Vec<ResponsePath>>,
    service_collectors: Option<&crate::configuration::Collectors>,
    collectors: &mut Collectors,
) -> bool {
    match (prepared, result) {
        (Prepared::Root { .. }, RunResult::Root(Ok(outcome))) => {
            record_collectors(collectors, service_collectors, &step.service, outcome.status, outcome.extensions);
            match outcome.data {
                Some(data) => {
                    if let Value::Object(map) = response {
                        for (k, v) in data {
                            map.insert(k, v);
                        }
                    } else {
                        *response = Value::Object(data);
                    }
                    for e in &outcome.errors {
                        errors.push(json_error_to_federated(&step.service, e));
                    }
                    false
                }
                None => {
                    null_out_paths(response, &step.exports_paths);
                    for e in &outcome.errors {
                        errors.push(json_error_to_federated(&step.service, e));
                    }
                    true
                }
            }
        }
        (Prepared::Root { .. }, RunResult::Root(Err(err))) => {
            null_out_paths(response, &step.exports_paths);
            errors.push(FederatedError::from_subgraph(&step.service, &err, path_to_json(&step.path)));
            true
        }
        (Prepared::Entities { to_fetch, cached, field_names, .. }, RunResult::Entities(Ok(outcome))) => {
            let anchors = entity_anchor_roots.entry(step.id).or_default();
            for (anchor_path, value) in cached {
                write_entity_fields(response, anchor_path, value, field_names);
                anchors.push(anchor_path.clone());
            }
            if let Some(outcome) = outcome {
                record_collectors(collectors, service_collectors, &step.service, outcome.status, outcome.extensions);
                for (rep, resolved) in to_fetch.iter().zip(outcome.entities.into_iter()) {
                    cache.insert(rep, resolved.clone());
                    for anchor_path in &rep.response_paths {
                        write_entity_fields(response, anchor_path, &resolved, field_names);
                        anchors.push(anchor_path.clone());
                    }
                }
            }
            false
        }
        (Prepared::Entities { to_fetch, .. }, RunResult::Entities(Err(err))) => {
            let all_paths: Vec<ResponsePath> = to_fetch.iter().flat_map(|r| r.response_paths.clone()).collect();
            null_out_paths(response, &all_paths);
            errors.push(FederatedError::from_subgraph(&step.service, &err, path_to_json(&step.path)));
            true
        }
        _ => unreachable!("Prepared and RunResult variants are produced in lockstep"),
    }
}

fn record_collectors(
    collectors: &mut Collectors,
    config: Option<&crate::configuration::Collectors>,
    service: &str,
    status: u16,
    extensions: Option<Value>,
) {
    let Some(config) = config else { return };
    if config.collect_status_codes {
        collectors.status_codes.push(CollectedStatusCode {
            service: service.to_string(),
            status,
        });
    }
    if config.collect_extensions {
        if let Some(extensions) = extensions {
            collectors.extensions.push(CollectedExtensions {
                service: service.to_string(),
                extensions,
            });
        }
    }
}

fn write_entity_fields(response: &mut Value, anchor_path: &ResponsePath, entity: &Value, field_names: &[String]) {
    for name in field_names {
        let value = entity.get(name).cloned().unwrap_or(Value::Null);
        let mut path = anchor_path.clone();
        path.push(PathSegment::Field(name.clone()));
        write_at_path(response, &path, value);
    }
}

fn top_level_field_names(selection: &[federation_core::operation::Selection]) -> Vec<String> {
    selection
        .iter()
        .filter_map(|s| match s {
            federation_core::operation::Selection::Field(f) => Some(f.response_key.clone()),
            federation_core::operation::Selection::TypeConditioned(_) => None,
        })
        .collect()
}

fn collect_anchors(response: &Value, path: &ResponsePath) -> Vec<(ResponsePath, Value)> {
    match read_at_path(response, path) {
        Some(Value::Array(items)) => items
            .iter()
            .enumerate()
            .map(|(i, v)| {
                let mut p = path.clone();
                p.push(PathSegment::Index(i));
                (p, v.clone())
            })
            .collect(),
        Some(Value::Null) | None => Vec::new(),
        Some(other) => vec![(path.clone(), other.clone())],
    }
}

fn get_nested(value: &Value, dotted: &str) -> Option<Value> {
    let mut cursor = value;
    for part in dotted.split('.') {
        cursor = cursor.as_object()?.get(part)?;
    }
    Some(cursor.clone())
}

fn select_variables(step: &Step, variables: &Value) -> Value {
    let mut out = serde_json::Map::new();
    for name in step.variables_used.keys() {
        if let Some(v) = variables.get(name) {
            out.insert(name.clone(), v.clone());
        }
    }
    Value::Object(out)
}

fn path_to_json(path: &ResponsePath) -> Vec<Value> {
    path.iter()
        .map(|seg| match seg {
            PathSegment::Field(f) => Value::String(f.clone()),
            PathSegment::Index(i) => Value::Number((*i).into()),
        })
        .collect()
}

fn json_error_to_federated(service: &str, err: &Value) -> FederatedError {
    let message = err
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or("subgraph error")
        .to_string();
    FederatedError {
        message,
        path: err.get("path").and_then(Value::as_array).cloned().unwrap_or_default(),
        extensions: crate::error::FederatedErrorExtensions {
            code: "SUBGRAPH_GRAPHQL_ERROR".to_string(),
            service: Some(service.to_string()),
        },
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use federation_core::operation::{FieldSelection, Selection};
    use federation_core::{EntityRequest, StepKind};
    use indexmap::IndexSet;
    use serde_json::json;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::configuration::{Collectors as ServiceCollectors, ServiceDescriptor};
    use crate::services::ServiceRegistry;

    fn descriptor(name: &str, url: &str, collectors: ServiceCollectors) -> ServiceDescriptor {
        ServiceDescriptor {
            name: name.to_string(),
            url: vec![url.parse().unwrap()],
            ws_url: None,
            mandatory: true,
            allow_batched_queries: false,
            collectors,
            keep_alive_timeout: Duration::from_secs(60),
            keep_alive_max_timeout: None,
            forwarded_headers: Vec::new(),
        }
    }

    fn field(name: &str) -> Selection {
        Selection::Field(FieldSelection {
            name: name.to_string(),
            response_key: name.to_string(),
            arguments: IndexMap::new(),
            selection_set: Vec::new(),
        })
    }

    /// A root Step whose selection needed an `id` injected one level below the
    /// Step's own root (under the `user` field) to satisfy a downstream entity
    /// jump, plus the Entities Step doing that jump. Mirrors the case where
    /// `step.path` (always empty for a root Step) must not be confused with
    /// where the injected field actually landed.
    #[tokio::test]
    async fn strips_an_injected_key_field_nested_under_the_root_steps_own_data() {
        let users = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": { "user": { "name": "Ada", "id": "u1" } }
            })))
            .mount(&users)
            .await;

        let reviews = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": { "_entities": [ { "reviewCount": 5 } ] }
            })))
            .mount(&reviews)
            .await;

        let mut registry = ServiceRegistry::new();
        registry.upsert(descriptor("users", &users.uri(), ServiceCollectors::default()));
        registry.upsert(descriptor("reviews", &reviews.uri(), ServiceCollectors::default()));

        let root = Step {
            id: 0,
            service: "users".to_string(),
            kind: StepKind::RootQuery,
            path: vec![],
            selection: vec![Selection::Field(FieldSelection {
                name: "user".to_string(),
                response_key: "user".to_string(),
                arguments: IndexMap::new(),
                selection_set: vec![field("name"), field("id")],
            })],
            entity_request: None,
            depends_on: IndexSet::new(),
            exports_paths: vec![],
            injected_fields: IndexSet::from([(vec![PathSegment::Field("user".to_string())], "id".to_string())]),
            variables_used: IndexMap::new(),
        };

        let jump = Step {
            id: 1,
            service: "reviews".to_string(),
            kind: StepKind::Entities,
            path: vec![PathSegment::Field("user".to_string())],
            selection: vec![field("reviewCount")],
            entity_request: Some(EntityRequest {
                type_name: "User".to_string(),
                key_and_requires_fields: vec!["id".to_string()],
            }),
            depends_on: IndexSet::from([0]),
            exports_paths: vec![],
            injected_fields: IndexSet::new(),
            variables_used: IndexMap::new(),
        };

        let plan = Plan { steps: vec![root, jump] };
        let result = execute(&plan, &registry, &Value::Null).await;

        assert_eq!(result.data, json!({ "user": { "name": "Ada", "reviewCount": 5 } }));
        assert!(result.errors.is_empty());
    }

    #[tokio::test]
    async fn collects_status_codes_only_for_services_configured_to_report_them() {
        let users = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": { "user": { "name": "Ada" } }
            })))
            .mount(&users)
            .await;

        let mut registry = ServiceRegistry::new();
        registry.upsert(descriptor(
            "users",
            &users.uri(),
            ServiceCollectors {
                collect_status_codes: true,
                collect_extensions: false,
            },
        ));

        let root = Step {
            id: 0,
            service: "users".to_string(),
            kind: StepKind::RootQuery,
            path: vec![],
            selection: vec![Selection::Field(FieldSelection {
                name: "user".to_string(),
                response_key: "user".to_string(),
                arguments: IndexMap::new(),
                selection_set: vec![field("name")],
            })],
            entity_request: None,
            depends_on: IndexSet::new(),
            exports_paths: vec![],
            injected_fields: IndexSet::new(),
            variables_used: IndexMap::new(),
        };

        let plan = Plan { steps: vec![root] };
        let result = execute(&plan, &registry, &Value::Null).await;

        assert_eq!(result.collectors.status_codes.len(), 1);
        assert_eq!(result.collectors.status_codes[0].status, 200);
        assert!(result.collectors.extensions.is_empty());
    }

    #[tokio::test]
    async fn a_failed_mandatory_step_short_circuits_its_dependents() {
        let users = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&users)
            .await;

        let mut registry = ServiceRegistry::new();
        registry.upsert(descriptor("users", &users.uri(), ServiceCollectors::default()));
        registry.upsert(descriptor("reviews", "http://127.0.0.1:1", ServiceCollectors::default()));

        let root = Step {
            id: 0,
            service: "users".to_string(),
            kind: StepKind::RootQuery,
            path: vec![],
            selection: vec![field("user")],
            entity_request: None,
            depends_on: IndexSet::new(),
            exports_paths: vec![vec![PathSegment::Field("user".to_string())]],
            injected_fields: IndexSet::new(),
            variables_used: IndexMap::new(),
        };

        let jump = Step {
            id: 1,
            service: "reviews".to_string(),
            kind: StepKind::Entities,
            path: vec![PathSegment::Field("user".to_string())],
            selection: vec![field("reviewCount")],
            entity_request: Some(EntityRequest {
                type_name: "User".to_string(),
                key_and_requires_fields: vec!["id".to_string()],
            }),
            depends_on: IndexSet::from([0]),
            exports_paths: vec![],
            injected_fields: IndexSet::new(),
            variables_used: IndexMap::new(),
        };

        let plan = Plan { steps: vec![root, jump] };
        let result = execute(&plan, &registry, &Value::Null).await;

        assert_eq!(result.data, json!({ "user": null }));
        assert_eq!(result.errors.len(), 1);
    }
}
