//! Error taxonomy for schema composition and query planning.
//!
//! Mirrors the style of the teacher's `apollo-federation-error` crate: one
//! `thiserror` enum per phase, carrying enough context to log and to surface to the
//! host without re-parsing the error message.

/// A single composition problem, tied to the subgraph that caused it.
#[derive(Debug, Clone, thiserror::Error)]
#[error("[{service}] {message}")]
pub struct SubgraphSdlError {
    pub service: String,
    pub message: String,
}

/// Errors raised while merging subgraph SDLs into a composed schema.
#[derive(Debug, thiserror::Error)]
pub enum CompositionError {
    /// No subgraph produced a usable SDL.
    #[error("no valid service SDLs: {0:?}")]
    NoValidServiceSDLs(Vec<SubgraphSdlError>),

    /// A subgraph's SDL failed to parse.
    #[error("failed to parse SDL for service `{service}`: {message}")]
    InvalidSdl { service: String, message: String },

    /// Two services declared the same field with incompatible signatures.
    #[error(
        "type `{type_name}` field `{field_name}` is defined with incompatible \
         signatures in `{service_a}` and `{service_b}`"
    )]
    FieldConflict {
        type_name: String,
        field_name: String,
        service_a: String,
        service_b: String,
    },

    /// A `@key` selection referenced a field that does not exist on its type.
    #[error("type `{type_name}` declares `@key(fields: \"{fields}\")` but field `{missing}` is not defined")]
    UnknownKeyField {
        type_name: String,
        fields: String,
        missing: String,
    },

    /// Composition otherwise produced a schema that could not be constructed.
    #[error("schema init issue: {0}")]
    SchemaInitIssues(String),
}

/// Errors raised while planning an operation against a composed schema.
#[derive(Debug, thiserror::Error)]
pub enum PlanningError {
    /// The operation selected a field that no subgraph owns or provides.
    #[error("field `{type_name}.{field_name}` is not served by any subgraph")]
    UnservedField { type_name: String, field_name: String },

    /// An entity jump was required but the target type has no `@key`.
    #[error("type `{type_name}` has no key fields; cannot resolve it across services")]
    NoKeyFields { type_name: String },

    /// The operation referenced a fragment or type condition the schema doesn't have.
    #[error("unknown type condition `{type_name}` in operation")]
    UnknownTypeCondition { type_name: String },

    /// Internal invariant violated while building the plan (a bug, not user error).
    #[error("planner invariant violated: {0}")]
    Invariant(String),

    /// The client operation failed to parse or validate against the composed schema.
    #[error("operation is invalid against the composed schema: {0}")]
    InvalidOperation(String),
}
