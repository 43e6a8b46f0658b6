//! Schema Composer (spec §4.3): merges subgraph SDLs into a composed schema and a
//! [`TypeMap`](crate::type_map::TypeMap).
//!
//! Grounded on the teacher's `apollo-federation` merge pipeline
//! (`apollo-federation/src/merge.rs`, `apollo-federation/src/merger/merge_field.rs`):
//! parse each subgraph, classify types, union fields per-type, record ownership and
//! `@requires`/`@provides`, then build key-field selections. Unlike the teacher we
//! don't need satisfiability analysis or query-graph construction for composition
//! itself — that belongs to the planner, which consumes the `TypeMap` this module
//! produces.

mod merge;
mod schema_text;

use apollo_compiler::schema::ExtendedType;
use apollo_compiler::validation::Valid;
use indexmap::IndexSet;
use tracing::warn;

use crate::error::{CompositionError, SubgraphSdlError};
use crate::sdl::{self, parse_sdl};
use crate::type_map::{ArgumentSignature, FieldInfo, TypeInfo, TypeKind, TypeMap};

/// Input to composition: one `(service name, SDL text)` pair.
#[derive(Debug, Clone)]
pub struct SubgraphSdl {
    pub service: String,
    pub sdl: String,
}

/// The result of a successful composition: the executable schema clients' operations
/// are parsed and validated against, plus the companion [`TypeMap`] the planner
/// consumes (spec §3 "Composed Schema").
pub struct CompositionOutput {
    pub type_map: TypeMap,
    pub schema: Valid<apollo_compiler::Schema>,
    /// Names of services whose SDL failed to parse or was not supplied; still
    /// composed from the remainder per §4.3 "Failure" partial-success rule.
    pub failed_services: Vec<SubgraphSdlError>,
}

/// Composes a set of subgraph SDLs. Never fails outright unless *no* subgraph
/// produced parseable SDL (`NoValidServiceSDLs`), matching §4.3.
pub fn compose(subgraphs: &[SubgraphSdl]) -> Result<CompositionOutput, CompositionError> {
    let mut parsed = Vec::new();
    let mut failed = Vec::new();

    for sg in subgraphs {
        match parse_sdl(&sg.service, &sg.sdl) {
            Ok(p) => parsed.push(p),
            Err(CompositionError::InvalidSdl { service, message }) => {
                warn!(service = %service, error = %message, "subgraph SDL failed to parse, excluding from composition");
                failed.push(SubgraphSdlError { service, message });
            }
            Err(other) => return Err(other),
        }
    }

    if parsed.is_empty() {
        return Err(CompositionError::NoValidServiceSDLs(failed));
    }

    let mut type_map = TypeMap::default();

    for p in &parsed {
        for (name, extended) in p.schema.types.iter() {
            if name.as_str().starts_with("__") {
                continue; // introspection types are not federation-composed
            }
            let Some(fields) = sdl::extended_type_fields(extended) else {
                continue;
            };
            let type_directives = sdl::type_directives(extended);
            let is_entity = sdl::has_directive(&type_directives, "key");

            let entry = type_map
                .types
                .entry(name.to_string())
                .or_insert_with(|| TypeInfo::new(name.to_string()));
            entry.services.insert(p.service.clone());
            entry.is_entity |= is_entity;
            entry.kind = match extended {
                ExtendedType::Interface(_) => TypeKind::Interface,
                _ => TypeKind::Object,
            };
            for intf in sdl::implements_interfaces(extended) {
                if !entry.implements.contains(&intf) {
                    entry.implements.push(intf);
                }
            }

            if is_entity {
                for key_directive in type_directives.iter().filter(|d| d.name == "key") {
                    if let Some(fields_arg) = key_directive
                        .arguments
                        .iter()
                        .find(|a| a.name == "fields")
                        .and_then(|a| a.value.as_str())
                    {
                        let key_fields = sdl::flatten_field_selection(fields_arg);
                        if !entry.key_fields.contains(&key_fields) {
                            entry.key_fields.push(key_fields);
                        }
                    }
                }
            }

            for (field_name, field) in fields {
                if field_name.as_str().starts_with("__") {
                    continue;
                }
                let directives: Vec<_> = field.directives.iter().cloned().collect();
                let is_external = sdl::has_directive(&directives, "external");
                let requires_arg = sdl::directive_string_arg(&directives, "requires", "fields");
                let provides_arg = sdl::directive_string_arg(&directives, "provides", "fields");

                let field_entry = entry
                    .fields
                    .entry(field_name.to_string())
                    .or_insert_with(|| FieldInfo {
                        name: field_name.to_string(),
                        type_name: field.ty.inner_named_type().to_string(),
                        type_string: field.ty.to_string(),
                        owner_service: None,
                        provided_by: IndexSet::new(),
                        requires: IndexSet::new(),
                        external_in: IndexSet::new(),
                        argument_names: field
                            .arguments
                            .iter()
                            .map(|a| a.name.to_string())
                            .collect(),
                        arguments: sdl::field_arguments(field)
                            .into_iter()
                            .map(|(name, type_string)| ArgumentSignature { name, type_string })
                            .collect(),
                    });

                if is_external {
                    field_entry.external_in.insert(p.service.clone());
                } else {
                    merge::merge_field_ownership(field_entry, name.as_str(), &p.service, field)?;
                    field_entry.provided_by.insert(p.service.clone());
                }

                if let Some(req) = requires_arg {
                    for f in sdl::flatten_field_selection(&req) {
                        field_entry.requires.insert(f);
                    }
                }
                if provides_arg.is_some() {
                    field_entry.provided_by.insert(p.service.clone());
                }
            }
        }
    }

    order_keys_by_ownership(&mut type_map);
    validate_key_fields(&type_map)?;

    let schema = schema_text::build_schema(&type_map)?;

    Ok(CompositionOutput {
        type_map,
        schema,
        failed_services: failed,
    })
}

/// §4.3 step 6: prefer the key whose fields are all owned (non-external) by the
/// type's services, so representation synthesis never needs to resolve an
/// already-fetched value through another jump.
fn order_keys_by_ownership(type_map: &mut TypeMap) {
    for ty in type_map.types.values_mut() {
        ty.key_fields.sort_by_key(|key| {
            let all_owned = key
                .iter()
                .all(|f| ty.fields.get(f.split('.').next().unwrap_or(f)).is_some());
            !all_owned // `false` (all owned) sorts first
        });
    }
}

fn validate_key_fields(type_map: &TypeMap) -> Result<(), CompositionError> {
    for ty in type_map.types.values() {
        for key in &ty.key_fields {
            for field_path in key {
                let top = field_path.split('.').next().unwrap_or(field_path.as_str());
                if !ty.fields.contains_key(top) {
                    return Err(CompositionError::UnknownKeyField {
                        type_name: ty.name.clone(),
                        fields: key.join(" "),
                        missing: top.to_string(),
                    });
                }
            }
        }
    }
    Ok(())
}

/// True if the type carries a `@key` so entity semantics apply; exposed for the
/// planner to avoid re-deriving this from raw directives.
pub fn is_entity_type(type_map: &TypeMap, name: &str) -> bool {
    type_map.types.get(name).map(|t| t.is_entity).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sdl(s: &str) -> String {
        s.to_string()
    }

    #[test]
    fn composes_two_simple_services() {
        let user_sdl = sdl(r#"
            type Query { me: User }
            type User @key(fields: "id") {
                id: ID!
                name: String
            }
        "#);
        let post_sdl = sdl(r#"
            type User @key(fields: "id") @extends {
                id: ID! @external
                posts(count: Int): [Post]
            }
            type Post {
                pid: ID!
            }
        "#);

        let out = compose(&[
            SubgraphSdl { service: "user".into(), sdl: user_sdl },
            SubgraphSdl { service: "post".into(), sdl: post_sdl },
        ])
        .expect("composition should succeed");

        assert!(out.failed_services.is_empty());
        let user = out.type_map.type_info("User").expect("User composed");
        assert!(user.is_entity);
        assert_eq!(user.key_fields[0], vec!["id".to_string()]);
        assert_eq!(
            user.fields.get("posts").unwrap().owner_service.as_deref(),
            Some("post")
        );
        assert_eq!(
            user.fields.get("name").unwrap().owner_service.as_deref(),
            Some("user")
        );
    }

    #[test]
    fn no_valid_sdls_is_fatal() {
        let err = compose(&[SubgraphSdl {
            service: "broken".into(),
            sdl: "type Query { !!! not graphql".into(),
        }])
        .unwrap_err();
        assert!(matches!(err, CompositionError::NoValidServiceSDLs(_)));
    }

    #[test]
    fn partial_failure_still_composes() {
        let good = sdl("type Query { ping: String }");
        let out = compose(&[
            SubgraphSdl { service: "ok".into(), sdl: good },
            SubgraphSdl {
                service: "bad".into(),
                sdl: "not graphql at all {{{".into(),
            },
        ])
        .expect("partial composition should still succeed");
        assert_eq!(out.failed_services.len(), 1);
        assert_eq!(out.failed_services[0].service, "bad");
    }
}
