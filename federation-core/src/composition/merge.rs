//! Field merging rules, split out of `composition::compose` the way the teacher
//! splits `merger/merge_field.rs` out of `merger/merger.rs`.

use apollo_compiler::schema::FieldDefinition;

use crate::error::CompositionError;
use crate::type_map::FieldInfo;

/// Records `service` as the non-external owner of `field_entry`, or raises
/// `FieldConflict` if a different service already owns it with an incompatible
/// signature (different argument names — a stand-in for full type-signature
/// compatibility, matching the level of detail the spec's merge algorithm calls
/// for).
pub fn merge_field_ownership(
    field_entry: &mut FieldInfo,
    type_name: &str,
    service: &str,
    field: &FieldDefinition,
) -> Result<(), CompositionError> {
    let incoming_args: Vec<String> = field.arguments.iter().map(|a| a.name.to_string()).collect();

    match &field_entry.owner_service {
        None => {
            field_entry.owner_service = Some(service.to_string());
            field_entry.argument_names = incoming_args;
            Ok(())
        }
        Some(existing) if existing == service => Ok(()),
        Some(existing) => {
            if field_entry.argument_names == incoming_args {
                // Same shape declared by two services: treated as a value type,
                // (spec's "null ownerService" case) unless one of them is a key type
                // owner already recorded elsewhere; composition keeps the first
                // owner but clears it to signal "no single owner".
                field_entry.owner_service = None;
                Ok(())
            } else {
                Err(CompositionError::FieldConflict {
                    type_name: type_name.to_string(),
                    field_name: field_entry.name.clone(),
                    service_a: existing.clone(),
                    service_b: service.to_string(),
                })
            }
        }
    }
}
