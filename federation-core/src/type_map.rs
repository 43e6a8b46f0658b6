//! The Type Map: for every type and field in the composed schema, which services own
//! or extend it, which key fields identify its entities, and which external/required
//! fields each resolver needs.
//!
//! Entities reference each other by name rather than by pointer (§9 "Schema graph
//! cycles") so the map has no lifetime tied to the schema AST and survives hot-swap
//! as a plain owned value.

use indexmap::{IndexMap, IndexSet};

/// A dot-free field path used in a `@key`/`@requires`/`@provides` selection, e.g.
/// `id` or `organization { id }` flattened to `organization.id`.
pub type FieldPath = String;

/// One argument's printed signature (`count: Int`), kept alongside
/// [`FieldInfo::argument_names`] so the composed SDL synthesized for client-operation
/// validation (§4.3 step 5) can re-declare arguments with their real types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgumentSignature {
    pub name: String,
    pub type_string: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldInfo {
    pub name: String,
    /// The named return type, stripped of list/non-null wrappers, so the planner
    /// can recurse into the right type when walking into this field's selections.
    pub type_name: String,
    /// The field's full GraphQL type text (`[Post]`, `ID!`, ...), preserving list and
    /// non-null wrappers lost by `type_name`; used to print the composed SDL.
    pub type_string: String,
    /// The service that defines this field non-externally. `None` for a value-type
    /// field defined identically by every contributing service.
    pub owner_service: Option<String>,
    /// Services that can return this field without an extra lookup: the owner,
    /// plus any service that `@provides` it from a parent field.
    pub provided_by: IndexSet<String>,
    /// Sibling field names the owner's resolver needs supplied via `@requires`.
    pub requires: IndexSet<FieldPath>,
    /// True if this service declared `@external` for this field (tracked per
    /// service, since externality is declaration-scoped, not global).
    pub external_in: IndexSet<String>,
    /// Argument names this field accepts. Used to merge sibling selections whose
    /// argument shapes match, per §4.4.
    pub argument_names: Vec<String>,
    /// Full argument signatures (name + type), used only to print the composed SDL.
    pub arguments: Vec<ArgumentSignature>,
}

impl FieldInfo {
    pub fn is_external_everywhere_but(&self, service: &str) -> bool {
        self.external_in.iter().any(|s| s != service)
    }
}

/// Whether a composed type prints as `type` or `interface` in the synthesized SDL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeKind {
    Object,
    Interface,
}

impl Default for TypeKind {
    fn default() -> Self {
        TypeKind::Object
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TypeInfo {
    pub name: String,
    pub is_entity: bool,
    pub kind: TypeKind,
    /// Interfaces this type declares with `implements`, carried through so the
    /// composed SDL keeps interface conformance (spec §8 scenario 6).
    pub implements: Vec<String>,
    /// Ordered set of key selection sets, one per `@key` declaration, preferring
    /// keys built only from already-owned scalars first (§4.3 step 6).
    pub key_fields: Vec<Vec<FieldPath>>,
    /// Services that contribute a definition (or extension) of this type.
    pub services: IndexSet<String>,
    pub fields: IndexMap<String, FieldInfo>,
}

impl TypeInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// The key selection preferred for representation synthesis: the first key
    /// whose fields are all owned (non-external) somewhere, as required by §4.3.
    pub fn preferred_key(&self) -> Option<&[FieldPath]> {
        self.key_fields.first().map(|v| v.as_slice())
    }
}

/// Immutable, hot-swappable companion to the composed executable schema.
#[derive(Debug, Clone, Default)]
pub struct TypeMap {
    pub types: IndexMap<String, TypeInfo>,
}

impl TypeMap {
    pub fn entity_names(&self) -> impl Iterator<Item = &str> {
        self.types
            .values()
            .filter(|t| t.is_entity)
            .map(|t| t.name.as_str())
    }

    pub fn field(&self, type_name: &str, field_name: &str) -> Option<&FieldInfo> {
        self.types.get(type_name)?.fields.get(field_name)
    }

    pub fn type_info(&self, type_name: &str) -> Option<&TypeInfo> {
        self.types.get(type_name)
    }

    /// Services that can serve `type_name.field_name` without an extra hop: the
    /// owner plus anything listed under `@provides`.
    pub fn servers_of(&self, type_name: &str, field_name: &str) -> IndexSet<String> {
        match self.field(type_name, field_name) {
            Some(info) => info.provided_by.clone(),
            None => IndexSet::new(),
        }
    }
}
