//! Subgraph Client (§4.1) and Service Registry (§4.2).

pub mod batching;
pub mod registry;
pub mod subgraph_client;
pub mod subscription_client;

pub use registry::{RegisteredService, ServiceRegistry};
pub use subgraph_client::SubgraphClient;
