//! Response-tree path manipulation used by the execution engine to stitch Step
//! results by path (spec §4.5 "Root Steps' `data` is merged by path").

use federation_core::query_plan::{PathSegment, ResponsePath};
use serde_json::Value;

/// Writes `value` at `path` inside `root`, creating intermediate objects/arrays as
/// needed. A `None` `value` (nullable reference, §8 scenario 5) writes JSON `null`.
pub fn write_at_path(root: &mut Value, path: &ResponsePath, value: Value) {
    let mut cursor = root;
    for (i, segment) in path.iter().enumerate() {
        let is_last = i == path.len() - 1;
        cursor = match segment {
            PathSegment::Field(name) => {
                if !cursor.is_object() {
                    *cursor = Value::Object(serde_json::Map::new());
                }
                let map = cursor.as_object_mut().expect("just ensured object");
                if is_last {
                    map.insert(name.clone(), value);
                    return;
                }
                map.entry(name.clone()).or_insert(Value::Null)
            }
            PathSegment::Index(idx) => {
                if !cursor.is_array() {
                    *cursor = Value::Array(Vec::new());
                }
                let arr = cursor.as_array_mut().expect("just ensured array");
                while arr.len() <= *idx {
                    arr.push(Value::Null);
                }
                if is_last {
                    arr[*idx] = value;
                    return;
                }
                &mut arr[*idx]
            }
        };
    }
}

/// Reads the value at `path`, if every intermediate segment exists.
pub fn read_at_path<'a>(root: &'a Value, path: &ResponsePath) -> Option<&'a Value> {
    let mut cursor = root;
    for segment in path {
        cursor = match (segment, cursor) {
            (PathSegment::Field(name), Value::Object(map)) => map.get(name)?,
            (PathSegment::Index(idx), Value::Array(arr)) => arr.get(*idx)?,
            _ => return None,
        };
    }
    Some(cursor)
}

/// Sets every path in `paths` to `null`, used when a parent field is null and
/// dependent Steps at that path are skipped (§4.5).
pub fn null_out_paths(root: &mut Value, paths: &[ResponsePath]) {
    for path in paths {
        write_at_path(root, path, Value::Null);
    }
}

/// Removes `field_name` from the object(s) found by walking `path` from
/// `root`, used to strip key/requires fields the planner injected purely to
/// satisfy a downstream jump (§4.4 "stripped before returning to the
/// client"). `path` is a template built at plan time, before any concrete
/// list length is known, so it only ever contains `Field` segments; if the
/// response actually holds a list at some point along that walk, the field is
/// removed from every element rather than just the first.
pub fn remove_field(root: &mut Value, path: &ResponsePath, field_name: &str) {
    remove_field_at(root, path, field_name);
}

fn remove_field_at(value: &mut Value, path: &[PathSegment], field_name: &str) {
    if let Value::Array(items) = value {
        for item in items {
            remove_field_at(item, path, field_name);
        }
        return;
    }
    match path.split_first() {
        None => {
            if let Value::Object(map) = value {
                map.remove(field_name);
            }
        }
        Some((PathSegment::Field(name), rest)) => {
            if let Value::Object(map) = value {
                if let Some(child) = map.get_mut(name) {
                    remove_field_at(child, rest, field_name);
                }
            }
        }
        Some((PathSegment::Index(idx), rest)) => {
            if let Value::Array(arr) = value {
                if let Some(child) = arr.get_mut(*idx) {
                    remove_field_at(child, rest, field_name);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn writes_nested_path() {
        let mut root = Value::Null;
        write_at_path(
            &mut root,
            &vec![PathSegment::Field("user".into()), PathSegment::Field("id".into())],
            json!("u1"),
        );
        assert_eq!(root, json!({"user": {"id": "u1"}}));
    }

    #[test]
    fn writes_through_list_index() {
        let mut root = Value::Null;
        write_at_path(
            &mut root,
            &vec![
                PathSegment::Field("posts".into()),
                PathSegment::Index(0),
                PathSegment::Field("pid".into()),
            ],
            json!("p1"),
        );
        assert_eq!(root, json!({"posts": [{"pid": "p1"}]}));
    }

    #[test]
    fn nulls_out_paths() {
        let mut root = json!({"user": {"posts": [{"pid": "p1"}]}});
        null_out_paths(&mut root, &[vec![PathSegment::Field("user".into())]]);
        assert_eq!(root, json!({"user": null}));
    }

    #[test]
    fn removes_field_at_nested_path() {
        let mut root = json!({"user": {"id": "u1", "name": "Ada"}});
        remove_field(&mut root, &vec![PathSegment::Field("user".into())], "id");
        assert_eq!(root, json!({"user": {"name": "Ada"}}));
    }

    #[test]
    fn removes_field_from_every_element_of_a_list_along_the_path() {
        let mut root = json!({"user": {"posts": [
            {"pid": "p1", "authorId": "u1"},
            {"pid": "p2", "authorId": "u1"},
        ]}});
        remove_field(
            &mut root,
            &vec![PathSegment::Field("user".into()), PathSegment::Field("posts".into())],
            "authorId",
        );
        assert_eq!(
            root,
            json!({"user": {"posts": [{"pid": "p1"}, {"pid": "p2"}]}})
        );
    }

    #[test]
    fn missing_intermediate_path_is_a_no_op() {
        let mut root = json!({"user": null});
        remove_field(&mut root, &vec![PathSegment::Field("user".into())], "id");
        assert_eq!(root, json!({"user": null}));
    }
}
