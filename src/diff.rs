//! Leaf extraction and instruction application over nested JSON values.
//!
//! This is the algebra every event is built from: [`extract_instructions`]
//! flattens a payload into scalar-leaf change instructions, and
//! [`apply_instructions`] replays them onto a target value. Replaying the
//! instructions extracted from a payload onto an empty object reproduces
//! the payload.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One step in a property path: an object key or an array index.
///
/// Serialized untagged, so paths appear on the wire as plain JSON arrays of
/// strings and numbers (e.g. `["tags", 0]`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathSegment {
    /// An array index.
    Index(usize),
    /// An object key.
    Key(String),
}

impl From<&str> for PathSegment {
    fn from(key: &str) -> Self {
        Self::Key(key.to_owned())
    }
}

impl From<String> for PathSegment {
    fn from(key: String) -> Self {
        Self::Key(key)
    }
}

impl From<usize> for PathSegment {
    fn from(index: usize) -> Self {
        Self::Index(index)
    }
}

/// A single leaf change: assign `value` at `property_path`, or remove the
/// path when `value` is `None`.
///
/// Deletions serialize with the `value` field absent, so they round-trip
/// through JSON (where an explicit `null` also deserializes to `None`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeInstruction {
    /// Full key/index chain from the payload root to the leaf.
    pub property_path: Vec<PathSegment>,
    /// The leaf value, or `None` to delete the path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

/// Extract one [`ChangeInstruction`] per leaf of `data`.
///
/// A node is a leaf if it is a scalar (string, number, bool), an array
/// (recorded wholesale as a single instruction, whatever its length), or an
/// object with zero members. Non-empty objects are traversed and never
/// themselves recorded. A `null` leaf yields a deletion instruction.
///
/// Arrays are deliberately not traversed: element removal and key removal
/// inside arrays cannot be expressed by leaf-level index paths, so the
/// whole array value is replaced on every write. Empty objects being leaves
/// is equally deliberate: a field cleared to `{}` must survive replay.
pub fn extract_instructions(data: &Value) -> Vec<ChangeInstruction> {
    let mut out = Vec::new();
    walk(data, &mut Vec::new(), &mut out);
    out
}

fn walk(node: &Value, path: &mut Vec<PathSegment>, out: &mut Vec<ChangeInstruction>) {
    match node {
        Value::Object(map) if !map.is_empty() => {
            for (key, value) in map {
                path.push(PathSegment::Key(key.clone()));
                walk(value, path, out);
                path.pop();
            }
        }
        // The payload root itself is not addressable; only nested leaves
        // produce instructions.
        _ if path.is_empty() => {}
        Value::Null => out.push(ChangeInstruction {
            property_path: path.clone(),
            value: None,
        }),
        leaf => out.push(ChangeInstruction {
            property_path: path.clone(),
            value: Some(leaf.clone()),
        }),
    }
}

/// Replay `instructions` onto `target` in order.
///
/// Assignments create intermediate containers as needed: a key segment
/// coerces its slot to an object, an index segment to an array (padded with
/// `null` up to the index). Deletions remove the addressed key or element
/// and are a no-op when any part of the path is absent.
pub fn apply_instructions(instructions: &[ChangeInstruction], target: &mut Value) {
    for instruction in instructions {
        apply_one(instruction, target);
    }
}

fn apply_one(instruction: &ChangeInstruction, target: &mut Value) {
    let Some((last, parents)) = instruction.property_path.split_last() else {
        return;
    };

    match &instruction.value {
        Some(value) => {
            let mut node = target;
            for segment in parents {
                node = descend(node, segment);
            }
            set_slot(node, last, value.clone());
        }
        None => {
            if let Some(parent) = locate_mut(target, parents) {
                remove_slot(parent, last);
            }
        }
    }
}

/// Walk one segment down, coercing the slot to the container kind the
/// segment addresses.
fn descend<'a>(node: &'a mut Value, segment: &PathSegment) -> &'a mut Value {
    match segment {
        PathSegment::Key(key) => {
            if !node.is_object() {
                *node = Value::Object(Map::new());
            }
            node.as_object_mut()
                .expect("slot was just coerced to an object")
                .entry(key.clone())
                .or_insert(Value::Null)
        }
        PathSegment::Index(index) => {
            if !node.is_array() {
                *node = Value::Array(Vec::new());
            }
            let items = node
                .as_array_mut()
                .expect("slot was just coerced to an array");
            while items.len() <= *index {
                items.push(Value::Null);
            }
            &mut items[*index]
        }
    }
}

/// Walk the path without creating intermediates. `None` when any step is
/// absent or of the wrong container kind.
fn locate_mut<'a>(node: &'a mut Value, path: &[PathSegment]) -> Option<&'a mut Value> {
    let mut current = node;
    for segment in path {
        current = match (current, segment) {
            (Value::Object(map), PathSegment::Key(key)) => map.get_mut(key)?,
            (Value::Array(items), PathSegment::Index(index)) => items.get_mut(*index)?,
            _ => return None,
        };
    }
    Some(current)
}

fn set_slot(parent: &mut Value, segment: &PathSegment, value: Value) {
    match segment {
        PathSegment::Key(key) => {
            if !parent.is_object() {
                *parent = Value::Object(Map::new());
            }
            if let Some(map) = parent.as_object_mut() {
                map.insert(key.clone(), value);
            }
        }
        PathSegment::Index(index) => {
            if !parent.is_array() {
                *parent = Value::Array(Vec::new());
            }
            if let Some(items) = parent.as_array_mut() {
                while items.len() <= *index {
                    items.push(Value::Null);
                }
                items[*index] = value;
            }
        }
    }
}

fn remove_slot(parent: &mut Value, segment: &PathSegment) {
    match (parent, segment) {
        (Value::Object(map), PathSegment::Key(key)) => {
            map.remove(key);
        }
        (Value::Array(items), PathSegment::Index(index)) => {
            if *index < items.len() {
                items.remove(*index);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn roundtrip(data: Value) -> Value {
        let instructions = extract_instructions(&data);
        let mut out = json!({});
        apply_instructions(&instructions, &mut out);
        out
    }

    #[test]
    fn scalars_become_one_instruction_each() {
        let instructions = extract_instructions(&json!({"a": 1, "b": "two", "c": true}));
        assert_eq!(instructions.len(), 3);
        assert_eq!(instructions[0].property_path, vec![PathSegment::from("a")]);
        assert_eq!(instructions[0].value, Some(json!(1)));
    }

    #[test]
    fn nested_objects_are_traversed() {
        let instructions = extract_instructions(&json!({"outer": {"inner": {"leaf": 7}}}));
        assert_eq!(instructions.len(), 1);
        assert_eq!(
            instructions[0].property_path,
            vec![
                PathSegment::from("outer"),
                PathSegment::from("inner"),
                PathSegment::from("leaf")
            ]
        );
    }

    #[test]
    fn empty_array_roundtrips() {
        assert_eq!(
            roundtrip(json!({"foo": 1, "bar": [], "baz": "2"})),
            json!({"foo": 1, "bar": [], "baz": "2"})
        );
    }

    #[test]
    fn empty_object_roundtrips() {
        assert_eq!(
            roundtrip(json!({"foo": 1, "bar": {}, "baz": "2"})),
            json!({"foo": 1, "bar": {}, "baz": "2"})
        );
    }

    #[test]
    fn arrays_are_replaced_wholesale() {
        let instructions = extract_instructions(&json!({"arr": [{"foo": 1}, {"bar": 2}]}));
        assert_eq!(instructions.len(), 1);
        assert_eq!(instructions[0].value, Some(json!([{"foo": 1}, {"bar": 2}])));
    }

    #[test]
    fn array_element_removal_is_representable() {
        let mut state = json!({});
        apply_instructions(
            &extract_instructions(&json!({"arr": [{"foo": 1}, {"bar": 2}, {"baz": 3}]})),
            &mut state,
        );
        apply_instructions(
            &extract_instructions(&json!({"arr": [{"foo": 1}, {"baz": 3}]})),
            &mut state,
        );
        assert_eq!(state, json!({"arr": [{"foo": 1}, {"baz": 3}]}));
    }

    #[test]
    fn array_element_key_change_is_representable() {
        let mut state = json!({});
        apply_instructions(
            &extract_instructions(&json!({"arr": [{"foo": 1}, {"bar": 2}]})),
            &mut state,
        );
        apply_instructions(
            &extract_instructions(&json!({"arr": [{"foo": 1}, {"qux": "w"}]})),
            &mut state,
        );
        assert_eq!(state, json!({"arr": [{"foo": 1}, {"qux": "w"}]}));
    }

    #[test]
    fn null_leaf_deletes_the_path() {
        let mut state = json!({"keep": 1, "drop": 2});
        apply_instructions(&extract_instructions(&json!({"drop": null})), &mut state);
        assert_eq!(state, json!({"keep": 1}));
    }

    #[test]
    fn deleting_a_missing_path_is_a_noop() {
        let mut state = json!({"keep": 1});
        apply_instructions(
            &[ChangeInstruction {
                property_path: vec!["ghost".into(), "leaf".into()],
                value: None,
            }],
            &mut state,
        );
        assert_eq!(state, json!({"keep": 1}));
    }

    #[test]
    fn assignment_creates_intermediate_objects() {
        let mut state = json!({});
        apply_instructions(
            &[ChangeInstruction {
                property_path: vec!["a".into(), "b".into(), "c".into()],
                value: Some(json!(5)),
            }],
            &mut state,
        );
        assert_eq!(state, json!({"a": {"b": {"c": 5}}}));
    }

    #[test]
    fn index_segments_from_legacy_data_still_apply() {
        // Events produced by older writers may address array elements
        // directly; `apply_instructions` must still honor them.
        let mut state = json!({});
        apply_instructions(
            &[
                ChangeInstruction {
                    property_path: vec!["arr".into(), 0usize.into(), "foo".into()],
                    value: Some(json!(1)),
                },
                ChangeInstruction {
                    property_path: vec!["arr".into(), 2usize.into()],
                    value: Some(json!("tail")),
                },
            ],
            &mut state,
        );
        assert_eq!(state, json!({"arr": [{"foo": 1}, null, "tail"]}));
    }

    #[test]
    fn instruction_serde_omits_value_for_deletions() {
        let instruction = ChangeInstruction {
            property_path: vec!["gone".into()],
            value: None,
        };
        let encoded = serde_json::to_value(&instruction).unwrap();
        assert_eq!(encoded, json!({"propertyPath": ["gone"]}));

        let decoded: ChangeInstruction = serde_json::from_value(encoded).unwrap();
        assert_eq!(decoded, instruction);
    }

    #[test]
    fn path_segments_serialize_as_plain_strings_and_numbers() {
        let instruction = ChangeInstruction {
            property_path: vec!["tags".into(), 1usize.into()],
            value: Some(json!("b")),
        };
        let encoded = serde_json::to_value(&instruction).unwrap();
        assert_eq!(encoded["propertyPath"], json!(["tags", 1]));
    }
}
