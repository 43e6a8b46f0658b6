//! Per-query entity cache (spec §3 "Execution state", §4.5 "Entity
//! de-duplication", §8 invariant 4): de-duplicates identical `(type, key)`
//! representations within one operation.

use std::collections::HashMap;

use federation_core::Representation;

#[derive(Default)]
pub struct EntityCache {
    resolved: HashMap<(String, Vec<(String, String)>), serde_json::Value>,
}

impl EntityCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, representation: &Representation) -> Option<&serde_json::Value> {
        self.resolved.get(&representation.dedup_key())
    }

    pub fn insert(&mut self, representation: &Representation, resolved: serde_json::Value) {
        self.resolved.insert(representation.dedup_key(), resolved);
    }

    /// Deduplicates a batch of representations destined for one `_entities`
    /// call, returning only those not already cached; callers fan the result
    /// back out to every `response_paths` entry of the original representations.
    pub fn dedup<'a>(&self, representations: &'a [Representation]) -> Vec<&'a Representation> {
        let mut seen = std::collections::HashSet::new();
        let mut out = Vec::new();
        for r in representations {
            if self.resolved.contains_key(&r.dedup_key()) {
                continue;
            }
            if seen.insert(r.dedup_key()) {
                out.push(r);
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::IndexMap;

    fn rep(id: &str) -> Representation {
        let mut key_values = IndexMap::new();
        key_values.insert("id".to_string(), serde_json::json!(id));
        Representation {
            type_name: "User".to_string(),
            key_values,
            response_paths: vec![],
        }
    }

    #[test]
    fn dedup_collapses_identical_keys() {
        let cache = EntityCache::new();
        let reps = vec![rep("u1"), rep("u1"), rep("u2")];
        let unique = cache.dedup(&reps);
        assert_eq!(unique.len(), 2);
    }

    #[test]
    fn insert_then_get_round_trips() {
        let mut cache = EntityCache::new();
        let r = rep("u1");
        cache.insert(&r, serde_json::json!({"id": "u1", "name": "John"}));
        assert_eq!(cache.get(&r), Some(&serde_json::json!({"id": "u1", "name": "John"})));
    }
}
