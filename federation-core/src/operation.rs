//! A planner-friendly operation IR, decoupled from `apollo-compiler`'s executable
//! document the way the teacher's own `apollo-federation/src/operation/mod.rs`
//! decouples its query-planning traversal from the raw parser AST. Fragment spreads
//! and inline fragments are flattened into concrete-type branches here so the
//! planner never has to re-resolve a fragment definition mid-walk.

use apollo_compiler::ast;
use apollo_compiler::executable::{Selection as ExecSelection, SelectionSet};
use apollo_compiler::validation::Valid;
use apollo_compiler::{ExecutableDocument, Schema};
use indexmap::IndexMap;

use crate::error::PlanningError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RootKind {
    Query,
    Mutation,
    Subscription,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArgumentValue {
    Variable(String),
    Literal(serde_json::Value),
}

#[derive(Debug, Clone)]
pub struct FieldSelection {
    pub name: String,
    pub response_key: String,
    pub arguments: IndexMap<String, ArgumentValue>,
    pub selection_set: Vec<Selection>,
}

#[derive(Debug, Clone)]
pub struct TypeConditionedSet {
    pub type_condition: String,
    pub selections: Vec<Selection>,
}

#[derive(Debug, Clone)]
pub enum Selection {
    Field(FieldSelection),
    /// An inline fragment or fragment spread, already flattened against its
    /// concrete type per §4.4 ("Inline fragments and fragment spreads are
    /// flattened against concrete types").
    TypeConditioned(TypeConditionedSet),
}

#[derive(Debug, Clone)]
pub struct Operation {
    pub root_kind: RootKind,
    pub selection_set: Vec<Selection>,
    /// Declared variable names, so the planner can forward only what each Step
    /// references (§4.4 "Variables are forwarded per-Step...").
    pub variable_names: Vec<String>,
    /// Variable name -> GraphQL type string (e.g. `"Int"`, `"[ID!]!"`), needed to
    /// re-declare only the referenced variables on each Step's printed document.
    pub variable_types: IndexMap<String, String>,
}

/// Parses and validates a client operation against the composed schema (spec §4.3
/// step 5, §4.4 "Parse and validate"), then lowers it into an [`Operation`] the
/// planner consumes.
pub fn parse_operation(
    schema: &Valid<Schema>,
    query: &str,
    operation_name: Option<&str>,
) -> Result<Operation, PlanningError> {
    let doc = ExecutableDocument::parse_and_validate(schema, query, "operation.graphql")
        .map_err(|diagnostics| PlanningError::InvalidOperation(diagnostics.to_string()))?;

    from_executable_document(&doc, operation_name)
        .ok_or_else(|| PlanningError::InvalidOperation("no matching operation in document".to_string()))
}

pub fn from_executable_document(
    doc: &ExecutableDocument,
    operation_name: Option<&str>,
) -> Option<Operation> {
    let op = match operation_name {
        Some(name) => doc.operations.get(name).ok()?,
        None => doc.operations.get(None).ok()?,
    };

    let root_kind = match op.operation_type {
        ast::OperationType::Query => RootKind::Query,
        ast::OperationType::Mutation => RootKind::Mutation,
        ast::OperationType::Subscription => RootKind::Subscription,
    };

    let variable_names: Vec<String> = op.variables.iter().map(|v| v.name.to_string()).collect();
    let variable_types = op
        .variables
        .iter()
        .map(|v| (v.name.to_string(), v.ty.to_string()))
        .collect();
    let selection_set = lower_selection_set(&op.selection_set, doc);

    Some(Operation {
        root_kind,
        selection_set,
        variable_names,
        variable_types,
    })
}

fn lower_selection_set(set: &SelectionSet, doc: &ExecutableDocument) -> Vec<Selection> {
    let mut out = Vec::new();
    for sel in &set.selections {
        match sel {
            ExecSelection::Field(field) => {
                let arguments = field
                    .arguments
                    .iter()
                    .map(|arg| {
                        let value = lower_value(&arg.value);
                        (arg.name.to_string(), value)
                    })
                    .collect();
                out.push(Selection::Field(FieldSelection {
                    name: field.name.to_string(),
                    response_key: field.response_key().to_string(),
                    arguments,
                    selection_set: lower_selection_set(&field.selection_set, doc),
                }));
            }
            ExecSelection::InlineFragment(frag) => {
                let type_condition = frag
                    .type_condition
                    .as_ref()
                    .map(|t| t.to_string())
                    .unwrap_or_default();
                out.push(Selection::TypeConditioned(TypeConditionedSet {
                    type_condition,
                    selections: lower_selection_set(&frag.selection_set, doc),
                }));
            }
            ExecSelection::FragmentSpread(spread) => {
                if let Some(def) = doc.fragments.get(&spread.fragment_name) {
                    out.push(Selection::TypeConditioned(TypeConditionedSet {
                        type_condition: def.type_condition().to_string(),
                        selections: lower_selection_set(&def.selection_set, doc),
                    }));
                }
            }
        }
    }
    out
}

fn lower_value(value: &ast::Value) -> ArgumentValue {
    match value {
        ast::Value::Variable(name) => ArgumentValue::Variable(name.to_string()),
        ast::Value::String(s) => ArgumentValue::Literal(serde_json::Value::String(s.clone())),
        ast::Value::Int(i) => ArgumentValue::Literal(serde_json::Value::from(i.to_i32().unwrap_or_default())),
        ast::Value::Float(f) => ArgumentValue::Literal(
            serde_json::Number::from_f64(f64::from(*f))
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
        ),
        ast::Value::Boolean(b) => ArgumentValue::Literal(serde_json::Value::Bool(*b)),
        ast::Value::Null => ArgumentValue::Literal(serde_json::Value::Null),
        ast::Value::Enum(e) => ArgumentValue::Literal(serde_json::Value::String(e.to_string())),
        ast::Value::List(items) => ArgumentValue::Literal(serde_json::Value::Array(
            items
                .iter()
                .map(|v| match lower_value(v) {
                    ArgumentValue::Literal(json) => json,
                    ArgumentValue::Variable(name) => serde_json::Value::String(format!("${name}")),
                })
                .collect(),
        )),
        ast::Value::Object(fields) => ArgumentValue::Literal(serde_json::Value::Object(
            fields
                .iter()
                .map(|(k, v)| {
                    let json = match lower_value(v) {
                        ArgumentValue::Literal(json) => json,
                        ArgumentValue::Variable(name) => serde_json::Value::String(format!("${name}")),
                    };
                    (k.to_string(), json)
                })
                .collect(),
        )),
    }
}
