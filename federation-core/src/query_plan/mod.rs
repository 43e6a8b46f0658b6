//! The Plan/Step DAG (spec §3, §4.4) and its GraphQL-text printer.
//!
//! Step kinds are a closed, tagged variant rather than a trait object hierarchy,
//! per §9 "Dynamic dispatch": the Execution Engine switches on [`StepKind`] instead
//! of calling through a vtable.

pub mod planner;
mod print;
mod representation;

use indexmap::IndexSet;

use crate::operation::Selection;

pub use planner::plan;
pub use representation::{EntityRequest, Representation};

pub type StepId = usize;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PathSegment {
    Field(String),
    Index(usize),
}

pub type ResponsePath = Vec<PathSegment>;

pub fn path_to_string(path: &ResponsePath) -> String {
    path.iter()
        .map(|seg| match seg {
            PathSegment::Field(f) => f.clone(),
            PathSegment::Index(i) => i.to_string(),
        })
        .collect::<Vec<_>>()
        .join(".")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepKind {
    /// A request against a subgraph's `Query` root.
    RootQuery,
    /// A request against a subgraph's `Mutation` root; siblings run in source order.
    Mutation,
    /// A request against a subgraph's `Subscription` root.
    Subscription,
    /// An entity jump: `_entities(representations: [_Any!]!)`.
    Entities,
}

#[derive(Debug, Clone)]
pub struct Step {
    pub id: StepId,
    pub service: String,
    pub kind: StepKind,
    /// Response path prefix this Step writes under (empty for a root Step).
    pub path: ResponsePath,
    pub selection: Vec<Selection>,
    /// `Some` only for `Entities` Steps: what to resolve once the parent Step's
    /// data is available. The Execution Engine turns this template into concrete
    /// [`Representation`]s (spec §4.5 "Entity de-duplication").
    pub entity_request: Option<EntityRequest>,
    pub depends_on: IndexSet<StepId>,
    pub exports_paths: Vec<ResponsePath>,
    /// Fields injected into the selection purely to satisfy a downstream jump's
    /// key/requires needs, paired with the response path (relative to wherever
    /// this Step's own data lands) they were injected at, since a nested
    /// selection can inject a key field several levels below this Step's root.
    /// Stripped from the client-visible response (§4.4 "stripped before
    /// returning to the client").
    pub injected_fields: IndexSet<(ResponsePath, String)>,
    /// Variable names actually referenced by this Step's selection (§4.4: "only
    /// the variables actually referenced by that Step's selection"), mapped to
    /// their declared GraphQL type so the printed document can redeclare them.
    pub variables_used: indexmap::IndexMap<String, String>,
}

impl Step {
    pub fn operation_text(&self) -> String {
        print::print_step(self)
    }
}

#[derive(Debug, Clone, Default)]
pub struct Plan {
    pub steps: Vec<Step>,
}

impl Plan {
    pub fn step(&self, id: StepId) -> Option<&Step> {
        self.steps.get(id)
    }

    /// Steps with no unresolved dependency, in the order they should be started for
    /// the current wave (topological layering used by the Execution Engine).
    pub fn ready_steps(&self, completed: &IndexSet<StepId>) -> Vec<StepId> {
        self.steps
            .iter()
            .filter(|s| !completed.contains(&s.id))
            .filter(|s| s.depends_on.iter().all(|d| completed.contains(d)))
            .map(|s| s.id)
            .collect()
    }
}
