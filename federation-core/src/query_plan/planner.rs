//! Query Planner (spec §4.4): walks a validated operation against the [`TypeMap`]
//! and produces a [`Plan`].

use indexmap::{IndexMap, IndexSet};

use crate::error::PlanningError;
use crate::operation::{ArgumentValue, FieldSelection, Operation, RootKind, Selection};
use crate::type_map::TypeMap;

use super::{EntityRequest, PathSegment, Plan, ResponsePath, Step, StepId, StepKind};

pub fn plan(operation: &Operation, type_map: &TypeMap) -> Result<Plan, PlanningError> {
    let mut builder = PlanBuilder {
        type_map,
        operation,
        steps: Vec::new(),
    };
    builder.build_root()?;
    Ok(Plan { steps: builder.steps })
}

struct StepContent {
    selection: Vec<Selection>,
    injected_fields: IndexSet<(ResponsePath, String)>,
    variables_used: IndexMap<String, String>,
}

struct PlanBuilder<'a> {
    type_map: &'a TypeMap,
    operation: &'a Operation,
    steps: Vec<Step>,
}

impl<'a> PlanBuilder<'a> {
    fn build_root(&mut self) -> Result<(), PlanningError> {
        let (root_type, kind, sequential) = match self.operation.root_kind {
            RootKind::Query => ("Query", StepKind::RootQuery, false),
            RootKind::Mutation => ("Mutation", StepKind::Mutation, true),
            RootKind::Subscription => ("Subscription", StepKind::Subscription, false),
        };

        if sequential {
            // Each mutation root selection becomes its own Step; Steps depend on
            // the previous one so they execute strictly in source order (§4.4/§5).
            let mut previous: Option<StepId> = None;
            for sel in &self.operation.selection_set {
                let field = match sel {
                    Selection::Field(f) => f,
                    Selection::TypeConditioned(_) => {
                        return Err(PlanningError::Invariant(
                            "type conditions are not valid at the Mutation root".into(),
                        ))
                    }
                };
                let owner = self.owning_service(root_type, &field.name, None)?;
                let id = self.steps.len();
                self.steps.push(Step {
                    id,
                    service: owner.clone(),
                    kind: kind.clone(),
                    path: Vec::new(),
                    selection: Vec::new(),
                    entity_request: None,
                    depends_on: previous.into_iter().collect(),
                    exports_paths: vec![vec![PathSegment::Field(field.response_key.clone())]],
                    injected_fields: IndexSet::new(),
                    variables_used: IndexMap::new(),
                });
                let content =
                    self.build_field_into_step(field, root_type, &owner, &Vec::new(), id)?;
                let step = &mut self.steps[id];
                step.selection = vec![Selection::Field(FieldSelection {
                    selection_set: content.selection,
                    ..field.clone()
                })];
                step.injected_fields = content.injected_fields;
                step.variables_used = content.variables_used;
                previous = Some(id);
            }
            return Ok(());
        }

        // Query/Subscription: group root-level fields by owning service into one
        // Step per service (sibling merge, §4.4).
        let mut step_by_service: IndexMap<String, StepId> = IndexMap::new();
        for sel in &self.operation.selection_set {
            let field = match sel {
                Selection::Field(f) => f,
                Selection::TypeConditioned(_) => {
                    return Err(PlanningError::Invariant(
                        "type conditions are not valid at the operation root".into(),
                    ))
                }
            };
            let owner = self.owning_service(root_type, &field.name, None)?;
            let id = *step_by_service.entry(owner.clone()).or_insert_with(|| {
                let id = self.steps.len();
                self.steps.push(Step {
                    id,
                    service: owner.clone(),
                    kind: kind.clone(),
                    path: Vec::new(),
                    selection: Vec::new(),
                    entity_request: None,
                    depends_on: IndexSet::new(),
                    exports_paths: Vec::new(),
                    injected_fields: IndexSet::new(),
                    variables_used: IndexMap::new(),
                });
                id
            });
            self.steps[id]
                .exports_paths
                .push(vec![PathSegment::Field(field.response_key.clone())]);

            let content = self.build_field_into_step(field, root_type, &owner, &Vec::new(), id)?;
            let step = &mut self.steps[id];
            step.selection.push(Selection::Field(FieldSelection {
                selection_set: content.selection,
                ..field.clone()
            }));
            step.injected_fields.extend(content.injected_fields);
            for (k, v) in content.variables_used {
                step.variables_used.insert(k, v);
            }
        }
        Ok(())
    }

    /// Builds the (possibly nested) selection for one field that stays local to
    /// `service`, recursing into its children and spawning entity-jump Steps for
    /// any child whose owner differs.
    fn build_field_into_step(
        &mut self,
        field: &FieldSelection,
        parent_type: &str,
        service: &str,
        path: &ResponsePath,
        owning_step: StepId,
    ) -> Result<StepContent, PlanningError> {
        let field_info = self
            .type_map
            .field(parent_type, &field.name)
            .ok_or_else(|| PlanningError::UnservedField {
                type_name: parent_type.to_string(),
                field_name: field.name.clone(),
            })?;
        let child_type = field_info.type_name.clone();
        let mut child_path = path.clone();
        child_path.push(PathSegment::Field(field.response_key.clone()));

        let mut variables_used = IndexMap::new();
        record_variables(&field.arguments, self.operation, &mut variables_used);

        self.build_selection_content(
            &field.selection_set,
            &child_type,
            service,
            &child_path,
            owning_step,
            variables_used,
        )
    }

    /// Builds the content (local selection + spawned jumps) for a selection set
    /// whose parent is `parent_type`, currently being served by `service`.
    fn build_selection_content(
        &mut self,
        selections: &[Selection],
        parent_type: &str,
        service: &str,
        path: &ResponsePath,
        owning_step: StepId,
        mut variables_used: IndexMap<String, String>,
    ) -> Result<StepContent, PlanningError> {
        let mut local_fields: Vec<&FieldSelection> = Vec::new();
        // Group fields that must jump, by target service.
        let mut jump_groups: IndexMap<String, Vec<&FieldSelection>> = IndexMap::new();
        let mut type_conditions = Vec::new();

        for sel in selections {
            match sel {
                Selection::Field(f) => {
                    let info = self.type_map.field(parent_type, &f.name).ok_or_else(|| {
                        PlanningError::UnservedField {
                            type_name: parent_type.to_string(),
                            field_name: f.name.clone(),
                        }
                    })?;
                    if info.provided_by.contains(service) {
                        local_fields.push(f);
                    } else {
                        let target = info
                            .owner_service
                            .clone()
                            .or_else(|| info.provided_by.get_index(0).cloned())
                            .ok_or_else(|| PlanningError::UnservedField {
                                type_name: parent_type.to_string(),
                                field_name: f.name.clone(),
                            })?;
                        jump_groups.entry(target).or_default().push(f);
                    }
                }
                Selection::TypeConditioned(tc) => type_conditions.push(tc),
            }
        }

        let mut out_selection = Vec::new();
        let mut injected_fields = IndexSet::new();

        for f in &local_fields {
            record_variables(&f.arguments, self.operation, &mut variables_used);
            let child_type = self
                .type_map
                .field(parent_type, &f.name)
                .map(|i| i.type_name.clone())
                .unwrap_or_default();
            let mut child_path = path.clone();
            child_path.push(PathSegment::Field(f.response_key.clone()));
            let content = self.build_selection_content(
                &f.selection_set,
                &child_type,
                service,
                &child_path,
                owning_step,
                IndexMap::new(),
            )?;
            for (k, v) in content.variables_used {
                variables_used.insert(k, v);
            }
            injected_fields.extend(content.injected_fields);
            out_selection.push(Selection::Field(FieldSelection {
                selection_set: content.selection,
                ..(*f).clone()
            }));
        }

        for tc in type_conditions {
            let content = self.build_selection_content(
                &tc.selections,
                &tc.type_condition,
                service,
                path,
                owning_step,
                IndexMap::new(),
            )?;
            for (k, v) in content.variables_used {
                variables_used.insert(k, v);
            }
            injected_fields.extend(content.injected_fields);
            out_selection.push(Selection::TypeConditioned(
                crate::operation::TypeConditionedSet {
                    type_condition: tc.type_condition.clone(),
                    selections: content.selection,
                },
            ));
        }

        for (target_service, fields) in jump_groups {
            let type_info = self
                .type_map
                .type_info(parent_type)
                .filter(|t| t.is_entity)
                .ok_or_else(|| PlanningError::NoKeyFields {
                    type_name: parent_type.to_string(),
                })?;
            let key_fields = type_info
                .preferred_key()
                .ok_or_else(|| PlanningError::NoKeyFields {
                    type_name: parent_type.to_string(),
                })?
                .to_vec();

            let mut key_and_requires: Vec<String> = key_fields.clone();
            for f in &fields {
                if let Some(info) = self.type_map.field(parent_type, &f.name) {
                    for r in &info.requires {
                        if !key_and_requires.contains(r) {
                            key_and_requires.push(r.clone());
                        }
                    }
                }
            }

            // Inject the key/requires fields into the parent's own selection so
            // the engine can read them from the parent Step's result (§4.4).
            // Recorded alongside `path`, the level they're injected at, so the
            // engine strips exactly that field at exactly that nesting depth
            // rather than only ever looking at the owning Step's own root.
            for field_path in &key_and_requires {
                let top = field_path.split('.').next().unwrap_or(field_path.as_str());
                let already_injected = injected_fields.iter().any(|(p, n)| p == path && n == top);
                if !local_fields.iter().any(|f| f.name == top) && !already_injected {
                    injected_fields.insert((path.clone(), top.to_string()));
                    out_selection.push(Selection::Field(FieldSelection {
                        name: top.to_string(),
                        response_key: top.to_string(),
                        arguments: IndexMap::new(),
                        selection_set: Vec::new(),
                    }));
                }
            }

            let jump_id = self.steps.len();
            self.steps.push(Step {
                id: jump_id,
                service: target_service.clone(),
                kind: StepKind::Entities,
                path: path.clone(),
                selection: Vec::new(),
                entity_request: Some(EntityRequest {
                    type_name: parent_type.to_string(),
                    key_and_requires_fields: key_and_requires,
                }),
                depends_on: IndexSet::from([owning_step]),
                exports_paths: fields
                    .iter()
                    .map(|f| {
                        let mut p = path.clone();
                        p.push(PathSegment::Field(f.response_key.clone()));
                        p
                    })
                    .collect(),
                injected_fields: IndexSet::new(),
                variables_used: IndexMap::new(),
            });

            let mut jump_selection = Vec::new();
            let mut jump_vars = IndexMap::new();
            let mut jump_injected = IndexSet::new();
            for f in &fields {
                record_variables(&f.arguments, self.operation, &mut jump_vars);
                let child_type = self
                    .type_map
                    .field(parent_type, &f.name)
                    .map(|i| i.type_name.clone())
                    .unwrap_or_default();
                let content = self.build_selection_content(
                    &f.selection_set,
                    &child_type,
                    &target_service,
                    &Vec::new(),
                    jump_id,
                    IndexMap::new(),
                )?;
                for (k, v) in content.variables_used {
                    jump_vars.insert(k, v);
                }
                jump_injected.extend(content.injected_fields);
                jump_selection.push(Selection::Field(FieldSelection {
                    selection_set: content.selection,
                    ..(*f).clone()
                }));
            }
            self.steps[jump_id].selection = jump_selection;
            self.steps[jump_id].variables_used = jump_vars;
            // A field nested inside this jump's own selection can itself need a
            // further jump, injecting a key field into this Step's selection
            // (relative to the entity's own fetched subtree, since that's what
            // `path` was reset to a few lines above). Keep it so it gets
            // stripped too, not just the outer jump's own injections.
            self.steps[jump_id].injected_fields = jump_injected;
        }

        Ok(StepContent {
            selection: out_selection,
            injected_fields,
            variables_used,
        })
    }

    fn owning_service(
        &self,
        type_name: &str,
        field_name: &str,
        prefer: Option<&str>,
    ) -> Result<String, PlanningError> {
        let info = self
            .type_map
            .field(type_name, field_name)
            .ok_or_else(|| PlanningError::UnservedField {
                type_name: type_name.to_string(),
                field_name: field_name.to_string(),
            })?;
        if let Some(p) = prefer {
            if info.provided_by.contains(p) {
                return Ok(p.to_string());
            }
        }
        info.owner_service
            .clone()
            .or_else(|| info.provided_by.get_index(0).cloned())
            .ok_or_else(|| PlanningError::UnservedField {
                type_name: type_name.to_string(),
                field_name: field_name.to_string(),
            })
    }
}

fn record_variables(
    arguments: &IndexMap<String, ArgumentValue>,
    operation: &Operation,
    out: &mut IndexMap<String, String>,
) {
    for value in arguments.values() {
        if let ArgumentValue::Variable(name) = value {
            if let Some(ty) = operation.variable_types.get(name) {
                out.insert(name.clone(), ty.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::composition::{compose, SubgraphSdl};

    fn build_type_map() -> TypeMap {
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
        compose(&[
            SubgraphSdl { service: "user".into(), sdl: user_sdl.into() },
            SubgraphSdl { service: "post".into(), sdl: post_sdl.into() },
        ])
        .unwrap()
        .type_map
    }

    fn parse_operation(src: &str) -> Operation {
        use apollo_compiler::ExecutableDocument;
        use apollo_compiler::Schema;
        let schema_sdl = r#"
            type Query { me: User }
            type User {
                id: ID!
                name: String
                posts(count: Int): [Post]
            }
            type Post { pid: ID! }
        "#;
        let schema = Schema::parse(schema_sdl, "schema.graphql").unwrap();
        let doc = ExecutableDocument::parse(&schema, src, "op.graphql").unwrap();
        crate::operation::from_executable_document(&doc, None).unwrap()
    }

    #[test]
    fn plans_two_service_join_with_entity_jump() {
        let type_map = build_type_map();
        let op = parse_operation(
            "{ user: me { id name posts(count: 1) { pid } } }",
        );
        let p = plan(&op, &type_map).expect("plan should succeed");
        assert_eq!(p.steps.len(), 2);
        let root = &p.steps[0];
        assert_eq!(root.service, "user");
        assert!(root.depends_on.is_empty());
        let jump = &p.steps[1];
        assert_eq!(jump.service, "post");
        assert_eq!(jump.kind, StepKind::Entities);
        assert!(jump.depends_on.contains(&root.id));
        let req = jump.entity_request.as_ref().unwrap();
        assert_eq!(req.type_name, "User");
        assert_eq!(req.key_and_requires_fields, vec!["id".to_string()]);
    }
}
