//! Entity representations: `{__typename, ...keyFields}` synthesized for an
//! `_entities` jump (spec GLOSSARY, §4.4).

use indexmap::IndexMap;

use super::ResponsePath;

/// The static template a planned `Entities` [`super::Step`] carries: which type to
/// resolve and which field paths (read off the parent Step's result) become the
/// representation. Actual values are only known at execution time, which is why
/// this holds field *paths*, not values — see [`Representation`] for the runtime
/// counterpart the Execution Engine builds from this template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityRequest {
    pub type_name: String,
    pub key_and_requires_fields: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Representation {
    pub type_name: String,
    /// The key field values read off the parent Step's result, flattened to their
    /// dotted paths (e.g. `"id" -> json!("u1")`).
    pub key_values: IndexMap<String, serde_json::Value>,
    /// Every response path this representation must be written back to once
    /// resolved. More than one entry here is exactly the dedup case from §4.5/§8
    /// invariant 4: two paths referring to the same `(type, key)` share one entry.
    pub response_paths: Vec<ResponsePath>,
}

impl Representation {
    /// The `(type, key)` identity used for de-duplication within one operation
    /// (spec §3 "entity cache": `(typeName, keyTuple) → resolved fragment`).
    pub fn dedup_key(&self) -> (String, Vec<(String, String)>) {
        let mut kv: Vec<(String, String)> = self
            .key_values
            .iter()
            .map(|(k, v)| (k.clone(), v.to_string()))
            .collect();
        kv.sort();
        (self.type_name.clone(), kv)
    }

    pub fn to_any_json(&self) -> serde_json::Value {
        let mut obj = serde_json::Map::new();
        obj.insert(
            "__typename".to_string(),
            serde_json::Value::String(self.type_name.clone()),
        );
        for (k, v) in &self.key_values {
            obj.insert(k.clone(), v.clone());
        }
        serde_json::Value::Object(obj)
    }
}
