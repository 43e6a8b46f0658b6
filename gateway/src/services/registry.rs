//! Service Registry (spec §4.2): the live set of Subgraph Clients, keyed by
//! service name, each carrying metadata and runtime status.

use std::collections::HashMap;
use std::sync::Arc;

use indexmap::IndexMap;
use sha1::{Digest, Sha1};
use tracing::warn;

use crate::configuration::ServiceDescriptor;
use crate::error::SubgraphError;

use super::SubgraphClient;

/// Runtime state of one subgraph (spec §3 "Subgraph runtime state").
#[derive(Debug, Clone)]
pub enum SubgraphStatus {
    Healthy,
    Errored(String),
    Closed,
}

pub struct RegisteredService {
    pub descriptor: ServiceDescriptor,
    pub client: Arc<SubgraphClient>,
    pub status: SubgraphStatus,
    pub last_sdl: Option<String>,
    pub last_sdl_hash: Option<String>,
}

impl RegisteredService {
    fn new(descriptor: ServiceDescriptor) -> Self {
        let client = Arc::new(SubgraphClient::new(&descriptor));
        RegisteredService {
            descriptor,
            client,
            status: SubgraphStatus::Closed,
            last_sdl: None,
            last_sdl_hash: None,
        }
    }
}

pub fn hash_sdl(sdl: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(sdl.as_bytes());
    hex::encode(hasher.finalize())
}

/// Guarded only by the Gateway Core loop (§5 "Shared resources"): no internal
/// locking, callers serialize mutation through the refresh/retry paths.
#[derive(Default)]
pub struct ServiceRegistry {
    services: IndexMap<String, RegisteredService>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a service entry (§4.2 `upsert`).
    pub fn upsert(&mut self, descriptor: ServiceDescriptor) {
        let name = descriptor.name.clone();
        self.services.insert(name, RegisteredService::new(descriptor));
    }

    /// Removes a service, closing its client. Close failures are logged, not
    /// propagated (§4.2 "Removal is non-fatal even if `close()` errs").
    pub async fn remove(&mut self, name: &str) {
        if let Some(mut service) = self.services.shift_remove(name) {
            service.client.close().await;
            service.status = SubgraphStatus::Closed;
        }
    }

    /// An immutable view of the current registry contents (§4.2 `snapshot`).
    pub fn snapshot(&self) -> Vec<&RegisteredService> {
        self.services.values().collect()
    }

    pub fn get(&self, name: &str) -> Option<&RegisteredService> {
        self.services.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut RegisteredService> {
        self.services.get_mut(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.services.keys().cloned().collect()
    }

    pub fn set_status(&mut self, name: &str, status: SubgraphStatus) {
        if let Some(service) = self.services.get_mut(name) {
            service.status = status;
        }
    }

    /// Reconciles the registry against a dynamic services-provider's return
    /// value (§4.2 "diffs its return against the current set"): new services are
    /// added, removed ones closed.
    pub async fn reconcile(&mut self, desired: Vec<ServiceDescriptor>) -> bool {
        let desired_names: HashMap<String, ServiceDescriptor> =
            desired.into_iter().map(|d| (d.name.clone(), d)).collect();

        let mut changed = false;
        let current_names: Vec<String> = self.names();

        for name in &current_names {
            if !desired_names.contains_key(name) {
                self.remove(name).await;
                changed = true;
            }
        }
        for (name, descriptor) in desired_names {
            if !self.services.contains_key(&name) {
                self.upsert(descriptor);
                changed = true;
            }
        }
        changed
    }

    /// Fetches SDL for every service currently `Healthy`, per the polling loop
    /// (§4.6 "every `pollingInterval` ms fetch every Healthy service's SDL").
    pub async fn fetch_healthy_sdls(&self) -> Vec<(String, Result<String, SubgraphError>)> {
        let mut out = Vec::new();
        for service in self.services.values() {
            if matches!(service.status, SubgraphStatus::Healthy) {
                let result = service.client.fetch_sdl().await;
                if let Err(err) = &result {
                    warn!(service = %service.descriptor.name, error = %err, "poll fetchSDL failed");
                }
                out.push((service.descriptor.name.clone(), result));
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(name: &str) -> ServiceDescriptor {
        ServiceDescriptor {
            name: name.to_string(),
            url: vec!["http://localhost:4001".parse().unwrap()],
            ws_url: None,
            mandatory: true,
            allow_batched_queries: false,
            collectors: Default::default(),
            keep_alive_timeout: std::time::Duration::from_secs(60),
            keep_alive_max_timeout: None,
            forwarded_headers: vec![],
        }
    }

    #[tokio::test]
    async fn upsert_then_remove() {
        let mut registry = ServiceRegistry::new();
        registry.upsert(descriptor("user"));
        assert_eq!(registry.names(), vec!["user".to_string()]);
        registry.remove("user").await;
        assert!(registry.names().is_empty());
    }

    #[tokio::test]
    async fn reconcile_adds_and_removes() {
        let mut registry = ServiceRegistry::new();
        registry.upsert(descriptor("user"));
        let changed = registry.reconcile(vec![descriptor("user"), descriptor("post")]).await;
        assert!(changed);
        assert_eq!(registry.names().len(), 2);

        let changed = registry.reconcile(vec![descriptor("user")]).await;
        assert!(changed);
        assert_eq!(registry.names(), vec!["user".to_string()]);
    }
}
