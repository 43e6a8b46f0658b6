//! Thin wrapper around `apollo-compiler` for parsing subgraph SDL and extracting the
//! federation directives (`@key`, `@extends`, `@external`, `@requires`, `@provides`)
//! the Composer needs. Isolated in its own module so the rest of the crate works
//! against our own `TypeMap`/AST-light representation instead of the parser's types.

use apollo_compiler::ast::Value;
use apollo_compiler::schema::{Component, ExtendedType, FieldDefinition};
use apollo_compiler::{Node, Schema};

use crate::error::CompositionError;

/// One subgraph's parsed SDL, kept alive only for the duration of composition.
pub struct ParsedSubgraph {
    pub service: String,
    pub schema: Schema,
}

pub fn parse_sdl(service: &str, sdl: &str) -> Result<ParsedSubgraph, CompositionError> {
    let schema = Schema::parse(sdl, format!("{service}.graphql"))
        .map_err(|diagnostics| CompositionError::InvalidSdl {
            service: service.to_string(),
            message: diagnostics.to_string(),
        })?;
    Ok(ParsedSubgraph {
        service: service.to_string(),
        schema,
    })
}

/// Extracts the string value of `@directive(arg: "...")`.
pub fn directive_string_arg(directives: &[Node<apollo_compiler::ast::Directive>], name: &str, arg: &str) -> Option<String> {
    directives.iter().find(|d| d.name == name).and_then(|d| {
        d.arguments
            .iter()
            .find(|a| a.name == arg)
            .and_then(|a| match a.value.as_ref() {
                Value::String(s) => Some(s.clone()),
                _ => None,
            })
    })
}

pub fn has_directive(directives: &[Node<apollo_compiler::ast::Directive>], name: &str) -> bool {
    directives.iter().any(|d| d.name == name)
}

/// Flattens a `fields: "id organization { id }"` selection string into dotted field
/// paths (`["id", "organization.id"]`). Best-effort: the federation fixtures this
/// crate targets use shallow key selections, so a full selection-set grammar isn't
/// needed; nested braces are flattened one level.
pub fn flatten_field_selection(fields: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut tokens = fields.split_whitespace().peekable();
    let mut prefix: Vec<String> = Vec::new();
    while let Some(tok) = tokens.next() {
        match tok {
            "{" => continue,
            "}" => {
                prefix.pop();
            }
            name => {
                if tokens.peek() == Some(&"{") {
                    prefix.push(name.to_string());
                } else {
                    let path = if prefix.is_empty() {
                        name.to_string()
                    } else {
                        format!("{}.{}", prefix.join("."), name)
                    };
                    out.push(path);
                }
            }
        }
    }
    out
}

/// Returns the fields of an object or interface type, alongside whether each field
/// was declared directly in this service (`ComponentOrigin::Definition`) or merely
/// referenced via `extend` (`ComponentOrigin::Extension`).
pub fn extended_type_fields<'a>(
    ty: &'a ExtendedType,
) -> Option<Box<dyn Iterator<Item = (&'a apollo_compiler::Name, &'a Component<FieldDefinition>)> + 'a>> {
    match ty {
        ExtendedType::Object(o) => Some(Box::new(o.fields.iter())),
        ExtendedType::Interface(i) => Some(Box::new(i.fields.iter())),
        _ => None,
    }
}

pub fn type_directives(ty: &ExtendedType) -> Vec<Node<apollo_compiler::ast::Directive>> {
    match ty {
        ExtendedType::Object(o) => o.directives.iter().cloned().collect(),
        ExtendedType::Interface(i) => i.directives.iter().cloned().collect(),
        _ => Vec::new(),
    }
}

/// Interfaces a type declares via `implements`, used to keep interface conformance
/// in the synthesized composed SDL (spec §8 scenario 6).
pub fn implements_interfaces(ty: &ExtendedType) -> Vec<String> {
    match ty {
        ExtendedType::Object(o) => o.implements_interfaces.iter().map(|n| n.to_string()).collect(),
        ExtendedType::Interface(i) => i.implements_interfaces.iter().map(|n| n.to_string()).collect(),
        _ => Vec::new(),
    }
}

/// Printed `(name, type text)` pairs for a field's arguments, e.g. `[("count",
/// "Int")]`, preserving list/non-null wrappers for the synthesized composed SDL.
pub fn field_arguments(field: &FieldDefinition) -> Vec<(String, String)> {
    field
        .arguments
        .iter()
        .map(|a| (a.name.to_string(), a.ty.to_string()))
        .collect()
}
