//! Prints the merged [`TypeMap`] back into SDL text and parses it into a real
//! `apollo_compiler::Schema` (spec §4.3 step 5 "Construct the executable schema").
//!
//! The federation directives (`@key`, `@requires`, `@provides`, `@external`,
//! `@extends`) have already been consumed into the [`TypeMap`] by the time this
//! runs, so the printed SDL carries plain field/argument/type declarations only —
//! exactly what's needed to parse and validate a client operation against the
//! composed schema. Federation-only types (`_Entity`, `_Any`, `_Service`) are not
//! part of this schema: those only appear on the wire to individual subgraphs
//! (spec §6), which the planner/printer synthesize directly without going through
//! this schema object.

use apollo_compiler::validation::Valid;
use apollo_compiler::Schema;

use crate::error::CompositionError;
use crate::type_map::{TypeInfo, TypeKind, TypeMap};

pub fn build_schema(type_map: &TypeMap) -> Result<Valid<Schema>, CompositionError> {
    let sdl = print_schema(type_map);
    Schema::parse_and_validate(&sdl, "composed.graphql")
        .map_err(|err| CompositionError::SchemaInitIssues(err.to_string()))
}

fn print_schema(type_map: &TypeMap) -> String {
    let mut out = String::new();
    for ty in type_map.types.values() {
        print_type(&mut out, ty);
    }
    out
}

fn print_type(out: &mut String, ty: &TypeInfo) {
    let keyword = match ty.kind {
        TypeKind::Object => "type",
        TypeKind::Interface => "interface",
    };
    out.push_str(keyword);
    out.push(' ');
    out.push_str(&ty.name);
    if !ty.implements.is_empty() {
        out.push_str(" implements ");
        out.push_str(&ty.implements.join(" & "));
    }
    out.push_str(" {\n");
    for field in ty.fields.values() {
        out.push_str("  ");
        out.push_str(&field.name);
        if !field.arguments.is_empty() {
            let args: Vec<String> = field
                .arguments
                .iter()
                .map(|a| format!("{}: {}", a.name, a.type_string))
                .collect();
            out.push('(');
            out.push_str(&args.join(", "));
            out.push(')');
        }
        out.push_str(": ");
        out.push_str(&field.type_string);
        out.push('\n');
    }
    out.push_str("}\n\n");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::composition::{compose, SubgraphSdl};

    #[test]
    fn composed_schema_parses_and_validates_client_operations() {
        let user_sdl = r#"
            type Query { me: User }
            type User @key(fields: "id") {
                id: ID!
                name: String
            }
        "#;
        let post_sdl = r#"
            type User @key(fields: "id") @extends {
                id: ID! @external
                posts(count: Int): [Post]
            }
            type Post {
                pid: ID!
            }
        "#;
        let output = compose(&[
            SubgraphSdl { service: "user".into(), sdl: user_sdl.into() },
            SubgraphSdl { service: "post".into(), sdl: post_sdl.into() },
        ])
        .expect("composition should succeed");

        let doc = apollo_compiler::ExecutableDocument::parse_and_validate(
            &output.schema,
            "{ user: me { id name posts(count: 1) { pid } } }",
            "op.graphql",
        )
        .expect("operation should validate against the composed schema");
        assert!(doc.operations.get(None).is_ok());
    }

    #[test]
    fn preserves_interface_conformance() {
        let catalog_sdl = r#"
            type Query { products: [Product] }
            interface Product { id: ID! name: String }
            type Book implements Product { id: ID! name: String }
        "#;
        let output = compose(&[SubgraphSdl { service: "catalog".into(), sdl: catalog_sdl.into() }])
            .expect("composition should succeed");
        apollo_compiler::ExecutableDocument::parse_and_validate(
            &output.schema,
            "{ products { id ... on Book { id name } } }",
            "op.graphql",
        )
        .expect("inline fragment on interface should validate");
    }

    #[test]
    fn synthesized_sdl_keeps_interface_conformance_line() {
        let catalog_sdl = r#"
            interface Product { id: ID! }
            type Book implements Product { id: ID! }
        "#;
        let type_map = crate::composition::compose(&[SubgraphSdl {
            service: "catalog".into(),
            sdl: catalog_sdl.into(),
        }])
        .expect("composition should succeed")
        .type_map;

        let book = type_map.type_info("Book").expect("Book composed");
        insta::assert_snapshot!(book.implements.join(" & "), @"Product");
    }
}
