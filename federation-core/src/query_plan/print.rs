//! Renders a [`Step`] back into GraphQL document text to send to its subgraph.
//! Entities Steps print the federation convention from spec §6:
//! `query($representations:[_Any!]!) { _entities(representations:$representations)
//! { ...on T { ... } } }`.

use crate::operation::{ArgumentValue, Selection};

use super::{Step, StepKind};

pub fn print_step(step: &Step) -> String {
    let type_condition = step.entity_request.as_ref().map(|e| e.type_name.as_str());
    let mut out = String::new();
    let var_decls: String = if step.variables_used.is_empty() {
        String::new()
    } else {
        let parts: Vec<String> = step
            .variables_used
            .iter()
            .map(|(name, ty)| format!("${name}: {ty}"))
            .collect();
        format!("({})", parts.join(", "))
    };

    match step.kind {
        StepKind::RootQuery => {
            out.push_str(&format!("query{var_decls} {{\n"));
            print_selection_set(&mut out, &step.selection, 1);
            out.push_str("}\n");
        }
        StepKind::Mutation => {
            out.push_str(&format!("mutation{var_decls} {{\n"));
            print_selection_set(&mut out, &step.selection, 1);
            out.push_str("}\n");
        }
        StepKind::Subscription => {
            out.push_str(&format!("subscription{var_decls} {{\n"));
            print_selection_set(&mut out, &step.selection, 1);
            out.push_str("}\n");
        }
        StepKind::Entities => {
            let extra_decls: String = step
                .variables_used
                .iter()
                .map(|(name, ty)| format!(", ${name}: {ty}"))
                .collect();
            out.push_str(&format!("query($representations: [_Any!]!{extra_decls}) {{\n"));
            out.push_str("  _entities(representations: $representations) {\n");
            if let Some(tc) = type_condition {
                out.push_str(&format!("    ... on {tc} {{\n"));
                print_selection_set(&mut out, &step.selection, 3);
                out.push_str("    }\n");
            } else {
                print_selection_set(&mut out, &step.selection, 2);
            }
            out.push_str("  }\n");
            out.push_str("}\n");
        }
    }
    out
}

fn print_selection_set(out: &mut String, selections: &[Selection], indent: usize) {
    let pad = "  ".repeat(indent);
    for sel in selections {
        match sel {
            Selection::Field(field) => {
                let alias = if field.response_key != field.name {
                    format!("{}: ", field.response_key)
                } else {
                    String::new()
                };
                let args = print_arguments(&field.arguments);
                if field.selection_set.is_empty() {
                    out.push_str(&format!("{pad}{alias}{}{args}\n", field.name));
                } else {
                    out.push_str(&format!("{pad}{alias}{}{args} {{\n", field.name));
                    print_selection_set(out, &field.selection_set, indent + 1);
                    out.push_str(&format!("{pad}}}\n"));
                }
            }
            Selection::TypeConditioned(tc) => {
                out.push_str(&format!("{pad}... on {} {{\n", tc.type_condition));
                print_selection_set(out, &tc.selections, indent + 1);
                out.push_str(&format!("{pad}}}\n"));
            }
        }
    }
}

fn print_arguments(args: &indexmap::IndexMap<String, ArgumentValue>) -> String {
    if args.is_empty() {
        return String::new();
    }
    let parts: Vec<String> = args
        .iter()
        .map(|(name, value)| match value {
            ArgumentValue::Variable(v) => format!("{name}: ${v}"),
            ArgumentValue::Literal(json) => format!("{name}: {}", print_literal(json)),
        })
        .collect();
    format!("({})", parts.join(", "))
}

fn print_literal(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => format!("{s:?}"),
        serde_json::Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use indexmap::{IndexMap, IndexSet};

    use super::*;
    use crate::operation::FieldSelection;
    use crate::query_plan::EntityRequest;

    #[test]
    fn entities_jump_prints_the_federation_convention() {
        let step = Step {
            id: 1,
            service: "post".to_string(),
            kind: StepKind::Entities,
            path: vec![],
            selection: vec![Selection::Field(FieldSelection {
                name: "posts".to_string(),
                response_key: "posts".to_string(),
                arguments: IndexMap::new(),
                selection_set: vec![Selection::Field(FieldSelection {
                    name: "pid".to_string(),
                    response_key: "pid".to_string(),
                    arguments: IndexMap::new(),
                    selection_set: vec![],
                })],
            })],
            entity_request: Some(EntityRequest {
                type_name: "User".to_string(),
                key_and_requires_fields: vec!["id".to_string()],
            }),
            depends_on: IndexSet::new(),
            exports_paths: vec![],
            injected_fields: IndexSet::new(),
            variables_used: IndexMap::new(),
        };

        let expected = [
            "query($representations: [_Any!]!) {",
            "  _entities(representations: $representations) {",
            "    ... on User {",
            "      posts {",
            "        pid",
            "      }",
            "    }",
            "  }",
            "}",
            "",
        ]
        .join("\n");

        assert_eq!(print_step(&step), expected);
    }
}
