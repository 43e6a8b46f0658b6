//! Pure schema-composition and query-planning logic for a federated GraphQL
//! gateway, with no network or process concerns — those live in the `gateway`
//! crate. Mirrors the split between the teacher's `apollo-federation` (pure) and
//! `apollo-router` (service) crates.

pub mod composition;
pub mod error;
pub mod operation;
pub mod query_plan;
pub mod sdl;
pub mod type_map;

pub use composition::{compose, CompositionOutput, SubgraphSdl};
pub use error::{CompositionError, PlanningError, SubgraphSdlError};
pub use operation::{from_executable_document, parse_operation, Operation};
pub use query_plan::{plan, EntityRequest, Plan, Representation, Step, StepKind};
pub use type_map::TypeMap;

pub use apollo_compiler::validation::Valid;
pub use apollo_compiler::Schema;
