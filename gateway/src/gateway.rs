//! Gateway Core (spec §4.6): lifecycle state machine, retry-on-startup, polling,
//! dynamic re-registration, hot-swap, and graceful shutdown.

use std::sync::Arc;
use std::time::Duration;

use federation_core::{compose, SubgraphSdl, TypeMap};
use sha1::{Digest, Sha1};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::configuration::{Configuration, ServicesProvider};
use crate::error::GatewayError;
use crate::services::registry::SubgraphStatus;
use crate::services::ServiceRegistry;

/// An immutable, hot-swappable composed schema (spec §3 "Composed Schema").
pub struct ComposedSchema {
    pub type_map: TypeMap,
    /// The executable schema client operations are parsed and validated against
    /// (spec §4.3 step 5); the planner itself only ever consults `type_map`.
    pub schema: federation_core::Valid<federation_core::Schema>,
}

/// A hook invoked after every recomposition that changes the schema (§6).
pub type ReplaceSchemaHook = Arc<dyn Fn(&ComposedSchema) + Send + Sync>;

pub struct Gateway {
    config: Configuration,
    registry: RwLock<ServiceRegistry>,
    /// Swapped atomically under a short-held write lock (§5 "Composed-schema
    /// references are swapped atomically"); in-flight queries clone the `Arc`
    /// they began with, so a swap never disturbs them (§4.6 "Hot-swap
    /// semantics").
    schema: RwLock<Arc<ComposedSchema>>,
    /// Digest of the `(service, sdl)` set the current schema was composed
    /// from, so `recompose` can tell whether a recomposition actually changed
    /// anything before firing `on_replace_schema` (§4.6).
    composed_from: RwLock<Option<String>>,
    on_replace_schema: Option<ReplaceSchemaHook>,
    services_provider: Option<Arc<dyn ServicesProvider>>,
    cancel: CancellationToken,
}

fn hash_sdl_set(sdls: &[SubgraphSdl]) -> String {
    let mut entries: Vec<(&str, &str)> = sdls.iter().map(|s| (s.service.as_str(), s.sdl.as_str())).collect();
    entries.sort_unstable();
    let mut hasher = Sha1::new();
    for (service, sdl) in entries {
        hasher.update(service.as_bytes());
        hasher.update([0u8]);
        hasher.update(sdl.as_bytes());
        hasher.update([0u8]);
    }
    hex::encode(hasher.finalize())
}

impl Gateway {
    /// Brings up every configured subgraph (Init state, §4.6), composes the
    /// initial schema, and returns a `Gateway` ready to plan and execute
    /// operations. Mandatory subgraphs that fail to respond are left `Errored`
    /// and a startup retry loop is the caller's responsibility to spawn via
    /// [`Gateway::spawn_background_loops`].
    pub async fn start(config: Configuration) -> Result<Arc<Self>, GatewayError> {
        config.validate().map_err(GatewayError::InvalidOpts)?;

        let mut registry = ServiceRegistry::new();
        for descriptor in &config.services {
            registry.upsert(descriptor.clone());
        }

        let mut sdls = Vec::new();
        for name in registry.names() {
            let service = registry.get(&name).expect("just upserted");
            match service.client.fetch_sdl().await {
                Ok(sdl) => {
                    info!(service = %name, "fetchSDL ok");
                    let hash = crate::services::registry::hash_sdl(&sdl);
                    sdls.push(SubgraphSdl { service: name.clone(), sdl: sdl.clone() });
                    if let Some(s) = registry.get_mut(&name) {
                        s.status = SubgraphStatus::Healthy;
                        s.last_sdl = Some(sdl);
                        s.last_sdl_hash = Some(hash);
                    }
                }
                Err(err) => {
                    let mandatory = service.descriptor.mandatory;
                    warn!(service = %name, error = %err, mandatory, "fetchSDL failed at startup");
                    if let Some(s) = registry.get_mut(&name) {
                        s.status = SubgraphStatus::Errored(err.to_string());
                    }
                }
            }
        }

        let composed_from = hash_sdl_set(&sdls);
        let output = compose(&sdls).map_err(GatewayError::NoValidServiceSDLs)?;
        let schema = ComposedSchema {
            type_map: output.type_map,
            schema: output.schema,
        };

        Ok(Arc::new(Gateway {
            config,
            registry: RwLock::new(registry),
            schema: RwLock::new(Arc::new(schema)),
            composed_from: RwLock::new(Some(composed_from)),
            on_replace_schema: None,
            services_provider: None,
            cancel: CancellationToken::new(),
        }))
    }

    pub fn with_replace_schema_hook(mut self: Arc<Self>, hook: ReplaceSchemaHook) -> Arc<Self> {
        Arc::get_mut(&mut self)
            .expect("hook must be attached before the gateway is shared")
            .on_replace_schema = Some(hook);
        self
    }

    /// Attaches a dynamic service-set provider, polled at
    /// `services_refresh_interval` once [`Gateway::spawn_background_loops`]
    /// runs (§6 "services: list or async provider").
    pub fn with_services_provider(mut self: Arc<Self>, provider: Arc<dyn ServicesProvider>) -> Arc<Self> {
        Arc::get_mut(&mut self)
            .expect("provider must be attached before the gateway is shared")
            .services_provider = Some(provider);
        self
    }

    pub async fn current_schema(&self) -> Arc<ComposedSchema> {
        self.schema.read().await.clone()
    }

    pub async fn registry(&self) -> tokio::sync::RwLockReadGuard<'_, ServiceRegistry> {
        self.registry.read().await
    }

    /// Spawns the retry-on-startup loop and the polling loop (§4.6), both
    /// cancellable via [`Gateway::close`].
    pub fn spawn_background_loops(self: &Arc<Self>) {
        let retry_handle = Arc::clone(self);
        tokio::spawn(async move { retry_handle.run_retry_loop().await });

        if let Some(interval) = self.config.polling_interval {
            let poll_handle = Arc::clone(self);
            tokio::spawn(async move { poll_handle.run_poll_loop(interval).await });
        } else {
            warn!("pollingInterval not configured; schema polling disabled");
        }

        match (self.config.services_refresh_interval, &self.services_provider) {
            (Some(interval), Some(_)) => {
                let refresh_handle = Arc::clone(self);
                tokio::spawn(async move { refresh_handle.run_services_refresh_loop(interval).await });
            }
            (Some(_), None) => {
                warn!("servicesRefreshInterval configured but no ServicesProvider attached; dynamic reconciliation disabled");
            }
            (None, _) => {}
        }
    }

    async fn run_services_refresh_loop(self: Arc<Self>, interval: Duration) {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = self.cancel.cancelled() => return,
            }
            let Some(provider) = &self.services_provider else { return };
            let desired = provider.services().await;
            self.reconcile_services(desired).await;
        }
    }

    async fn run_retry_loop(self: Arc<Self>) {
        let mut attempt = 0;
        loop {
            if self.cancel.is_cancelled() {
                return;
            }
            let any_mandatory_errored = {
                let registry = self.registry.read().await;
                registry
                    .snapshot()
                    .into_iter()
                    .any(|s| s.descriptor.mandatory && matches!(s.status, SubgraphStatus::Errored(_)))
            };
            if !any_mandatory_errored {
                return;
            }
            if attempt >= self.config.retry_services_count {
                error!(attempt, "GatewayRefresh: startup retries exhausted for mandatory services");
                return;
            }

            attempt += 1;
            tokio::select! {
                _ = tokio::time::sleep(self.config.retry_services_interval) => {}
                _ = self.cancel.cancelled() => return,
            }

            if self.retry_errored_services(attempt).await {
                return; // first success: stop retrying (§4.6)
            }
        }
    }

    /// Retries every `Errored` service's `fetchSDL`; on the first newly-healthy
    /// service, recomposes and fires the replace-schema hook. Returns true once
    /// any retry has succeeded.
    async fn retry_errored_services(&self, attempt: u32) -> bool {
        let errored: Vec<String> = {
            let registry = self.registry.read().await;
            registry
                .snapshot()
                .into_iter()
                .filter(|s| matches!(s.status, SubgraphStatus::Errored(_)))
                .map(|s| s.descriptor.name.clone())
                .collect()
        };

        let mut any_succeeded = false;
        for name in errored {
            let result = {
                let registry = self.registry.read().await;
                let Some(service) = registry.get(&name) else { continue };
                service.client.fetch_sdl().await
            };
            match result {
                Ok(sdl) => {
                    info!(service = %name, attempt, "retry fetchSDL ok");
                    let hash = crate::services::registry::hash_sdl(&sdl);
                    let mut registry = self.registry.write().await;
                    if let Some(s) = registry.get_mut(&name) {
                        s.status = SubgraphStatus::Healthy;
                        s.last_sdl = Some(sdl);
                        s.last_sdl_hash = Some(hash);
                    }
                    any_succeeded = true;
                }
                Err(err) => {
                    warn!(service = %name, attempt, error = %err, "retry fetchSDL failed");
                }
            }
        }

        if any_succeeded {
            self.recompose().await;
        }
        any_succeeded
    }

    async fn run_poll_loop(self: Arc<Self>, interval: Duration) {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = self.cancel.cancelled() => return,
            }

            let changed = {
                let registry = self.registry.read().await;
                let mut any_changed = false;
                for (name, result) in registry.fetch_healthy_sdls().await {
                    match result {
                        Ok(sdl) => {
                            let hash = crate::services::registry::hash_sdl(&sdl);
                            let previous_hash = registry.get(&name).and_then(|s| s.last_sdl_hash.clone());
                            if previous_hash.as_deref() != Some(hash.as_str()) {
                                any_changed = true;
                            }
                        }
                        Err(err) => {
                            warn!(service = %name, error = %err, "poll: keep previous SDL");
                        }
                    }
                }
                any_changed
            };

            if changed {
                self.apply_poll_results().await;
                self.recompose().await;
            }
        }
    }

    async fn apply_poll_results(&self) {
        let results = {
            let registry = self.registry.read().await;
            registry.fetch_healthy_sdls().await
        };
        let mut registry = self.registry.write().await;
        for (name, result) in results {
            if let Ok(sdl) = result {
                let hash = crate::services::registry::hash_sdl(&sdl);
                if let Some(s) = registry.get_mut(&name) {
                    s.last_sdl = Some(sdl);
                    s.last_sdl_hash = Some(hash);
                }
            }
        }
    }

    /// Recomposes from every `Healthy` service's last SDL, hot-swaps
    /// atomically, and fires the replace-schema hook if the schema changed.
    async fn recompose(&self) {
        let sdls: Vec<SubgraphSdl> = {
            let registry = self.registry.read().await;
            registry
                .snapshot()
                .into_iter()
                .filter(|s| matches!(s.status, SubgraphStatus::Healthy))
                .filter_map(|s| {
                    s.last_sdl.clone().map(|sdl| SubgraphSdl {
                        service: s.descriptor.name.clone(),
                        sdl,
                    })
                })
                .collect()
        };

        let new_hash = hash_sdl_set(&sdls);
        let unchanged = self.composed_from.read().await.as_deref() == Some(new_hash.as_str());
        if unchanged {
            return;
        }

        match compose(&sdls) {
            Ok(output) => {
                let new_schema = Arc::new(ComposedSchema {
                    type_map: output.type_map,
                    schema: output.schema,
                });
                *self.schema.write().await = new_schema.clone();
                *self.composed_from.write().await = Some(new_hash);
                if let Some(hook) = &self.on_replace_schema {
                    // Hook failures are advisory (§4.6 "If any hook invocation
                    // throws, log and keep the new schema").
                    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| hook(&new_schema)));
                    if result.is_err() {
                        error!("HookError: onGatewayReplaceSchema panicked");
                    }
                }
            }
            Err(err) => {
                error!(error = %err, "SchemaInitIssues: recomposition failed, keeping previous schema");
            }
        }
    }

    /// Dynamic service-set reconciliation (§4.2, §4.6): diffs `desired` against
    /// the registry, adds/removes services, brings newly-added ones up to
    /// `Healthy` the same way startup does, and recomposes if anything changed.
    pub async fn reconcile_services(&self, desired: Vec<crate::configuration::ServiceDescriptor>) {
        let changed = {
            let mut registry = self.registry.write().await;
            registry.reconcile(desired).await
        };
        if changed {
            self.bring_up_closed_services().await;
            self.recompose().await;
        }
    }

    /// Fetches SDL for every service `reconcile` just added (left `Closed`)
    /// so `recompose`'s `Healthy`-only filter can actually include them.
    async fn bring_up_closed_services(&self) {
        let closed: Vec<String> = {
            let registry = self.registry.read().await;
            registry
                .snapshot()
                .into_iter()
                .filter(|s| matches!(s.status, SubgraphStatus::Closed))
                .map(|s| s.descriptor.name.clone())
                .collect()
        };

        for name in closed {
            let result = {
                let registry = self.registry.read().await;
                let Some(service) = registry.get(&name) else { continue };
                service.client.fetch_sdl().await
            };
            match result {
                Ok(sdl) => {
                    info!(service = %name, "fetchSDL ok for newly reconciled service");
                    let hash = crate::services::registry::hash_sdl(&sdl);
                    let mut registry = self.registry.write().await;
                    if let Some(s) = registry.get_mut(&name) {
                        s.status = SubgraphStatus::Healthy;
                        s.last_sdl = Some(sdl);
                        s.last_sdl_hash = Some(hash);
                    }
                }
                Err(err) => {
                    warn!(service = %name, error = %err, "fetchSDL failed for newly reconciled service");
                    let mut registry = self.registry.write().await;
                    if let Some(s) = registry.get_mut(&name) {
                        s.status = SubgraphStatus::Errored(err.to_string());
                    }
                }
            }
        }
    }

    /// Graceful shutdown (§5, §7): cancels background loops and closes every
    /// subgraph client.
    pub async fn close(&self) {
        self.cancel.cancel();
        let registry = self.registry.read().await;
        for service in registry.snapshot() {
            service.client.close().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use serde_json::json;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::configuration::{Collectors, Configuration, ServiceDescriptor};

    fn descriptor(name: &str, url: &str, mandatory: bool) -> ServiceDescriptor {
        ServiceDescriptor {
            name: name.to_string(),
            url: vec![url.parse().unwrap()],
            ws_url: None,
            mandatory,
            allow_batched_queries: false,
            collectors: Collectors::default(),
            keep_alive_timeout: Duration::from_secs(60),
            keep_alive_max_timeout: None,
            forwarded_headers: Vec::new(),
        }
    }

    fn config(services: Vec<ServiceDescriptor>) -> Configuration {
        Configuration {
            services,
            polling_interval: None,
            retry_services_count: 3,
            retry_services_interval: Duration::from_millis(10),
            cache: true,
            services_refresh_interval: None,
        }
    }

    async fn mock_sdl_service(sdl: &'static str) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": { "_service": { "sdl": sdl } }
            })))
            .mount(&server)
            .await;
        server
    }

    const USER_SDL: &str = r#"
        type Query { me: User }
        type User @key(fields: "id") {
            id: ID!
            name: String
        }
    "#;

    const POST_SDL: &str = r#"
        type User @key(fields: "id") @extends {
            id: ID! @external
            posts(count: Int): [Post]
        }
        type Post {
            pid: ID!
        }
    "#;

    #[tokio::test]
    async fn start_composes_schema_from_every_healthy_service() {
        let users = mock_sdl_service(USER_SDL).await;
        let gateway = Gateway::start(config(vec![descriptor("user", &users.uri(), true)]))
            .await
            .expect("startup should succeed with a reachable mandatory service");

        let schema = gateway.current_schema().await;
        assert!(schema.type_map.type_info("User").is_some());

        let registry = gateway.registry().await;
        assert!(matches!(
            registry.get("user").unwrap().status,
            crate::services::registry::SubgraphStatus::Healthy
        ));
    }

    #[tokio::test]
    async fn reconcile_services_brings_a_newly_added_service_up_to_healthy_and_recomposes() {
        let users = mock_sdl_service(USER_SDL).await;
        let gateway = Gateway::start(config(vec![descriptor("user", &users.uri(), true)]))
            .await
            .expect("startup should succeed");

        let hook_calls = Arc::new(AtomicUsize::new(0));
        let counted = hook_calls.clone();
        let gateway = gateway.with_replace_schema_hook(Arc::new(move |_| {
            counted.fetch_add(1, Ordering::SeqCst);
        }));

        let posts = mock_sdl_service(POST_SDL).await;
        gateway
            .reconcile_services(vec![
                descriptor("user", &users.uri(), true),
                descriptor("post", &posts.uri(), false),
            ])
            .await;

        assert_eq!(hook_calls.load(Ordering::SeqCst), 1);
        let schema = gateway.current_schema().await;
        assert!(schema.type_map.type_info("Post").is_some());

        let registry = gateway.registry().await;
        assert!(matches!(
            registry.get("post").unwrap().status,
            crate::services::registry::SubgraphStatus::Healthy
        ));
    }

    #[tokio::test]
    async fn recompose_only_fires_the_hook_when_the_composed_schema_actually_changes() {
        let users = mock_sdl_service(USER_SDL).await;
        let gateway = Gateway::start(config(vec![descriptor("user", &users.uri(), true)]))
            .await
            .expect("startup should succeed");

        let hook_calls = Arc::new(AtomicUsize::new(0));
        let counted = hook_calls.clone();
        let gateway = gateway.with_replace_schema_hook(Arc::new(move |_| {
            counted.fetch_add(1, Ordering::SeqCst);
        }));

        // Nothing about the service set or its SDL changed, so this should be a no-op.
        gateway.recompose().await;
        assert_eq!(hook_calls.load(Ordering::SeqCst), 0);

        // Simulate a poll observing a new SDL for the same service.
        {
            let mut registry = gateway.registry.write().await;
            if let Some(service) = registry.get_mut("user") {
                service.last_sdl = Some(format!("{USER_SDL}\n# changed"));
            }
        }
        gateway.recompose().await;
        assert_eq!(hook_calls.load(Ordering::SeqCst), 1);
    }
}
