//! JSON rendering of the address tree, and reading an emitted map back.
//!
//! Branches are objects keyed by their children's offsets as upper-case hex
//! (`"00"`, `"7F"`), in ascending numeric order, with an optional `"label"`.
//! Leaves are objects carrying at least `name` and `size_bytes`.

use std::collections::BTreeMap;

use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::MapFormatError;
use crate::records::ParameterRecord;
use crate::tree::{AddressNode, AddressTree};
use crate::values::{DefaultValue, ValueRange};

const LABEL_KEY: &str = "label";

/// Leaf object of the emitted map
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterEntry {
    pub name: String,
    pub size_bytes: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range: Option<ValueRange>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_range: Option<(i64, i64)>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<DefaultValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bits: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block: Option<String>,
}

impl From<&ParameterRecord> for ParameterEntry {
    fn from(record: &ParameterRecord) -> Self {
        Self {
            name: record.name.clone(),
            size_bytes: record.size_bytes,
            range: record.value_range.clone(),
            display_range: record.display_range,
            default: record.default.clone(),
            unit: record.unit.clone(),
            description: record.description.clone(),
            bits: record.bits,
            block: record.block.clone(),
        }
    }
}

/// Key of a child at `offset`
pub fn offset_key(offset: u32) -> String {
    format!("{:02X}", offset)
}

struct NodeJson<'a>(&'a AddressNode);

impl Serialize for NodeJson<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.0 {
            AddressNode::Leaf(record) => ParameterEntry::from(record).serialize(serializer),
            AddressNode::Branch { label, children } => {
                let mut map = serializer.serialize_map(Some(children.len() + usize::from(label.is_some())))?;
                if let Some(label) = label {
                    map.serialize_entry(LABEL_KEY, label)?;
                }
                for (offset, child) in children {
                    map.serialize_entry(&offset_key(*offset), &NodeJson(child))?;
                }
                map.end()
            }
        }
    }
}

struct TreeJson<'a>(&'a AddressTree);

impl Serialize for TreeJson<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry(&self.0.model, &NodeJson(&self.0.root))?;
        map.end()
    }
}

/// Render the tree as `{"<model>": {...}}`.
pub fn to_json(tree: &AddressTree, pretty: bool) -> Result<String, serde_json::Error> {
    if pretty {
        serde_json::to_string_pretty(&TreeJson(tree))
    } else {
        serde_json::to_string(&TreeJson(tree))
    }
}

/// An emitted map read back into flat form
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SysexMap {
    pub model: String,
    pub entries: BTreeMap<Vec<u32>, ParameterEntry>,
    pub labels: BTreeMap<Vec<u32>, String>,
}

/// Parse a document produced by [`to_json`].
pub fn parse_sysex_map(json: &str) -> Result<SysexMap, MapFormatError> {
    let value: Value = serde_json::from_str(json)?;
    let Value::Object(top) = value else {
        return Err(shape_error("$", "top level is not an object"));
    };
    if top.len() != 1 {
        return Err(shape_error("$", format!("expected one model key, found {}", top.len())));
    }
    let Some((model, root)) = top.into_iter().next() else {
        return Err(shape_error("$", "no model key"));
    };

    let mut map = SysexMap {
        model: model.clone(),
        ..SysexMap::default()
    };
    walk(&root, &mut Vec::new(), &model, &mut map)?;
    Ok(map)
}

fn shape_error(path: &str, message: impl Into<String>) -> MapFormatError {
    MapFormatError::Shape {
        path: path.to_string(),
        message: message.into(),
    }
}

fn walk(node: &Value, address: &mut Vec<u32>, path: &str, map: &mut SysexMap) -> Result<(), MapFormatError> {
    let Value::Object(object) = node else {
        return Err(shape_error(path, "expected an object"));
    };

    if object.contains_key("name") && object.contains_key("size_bytes") {
        let entry = ParameterEntry::deserialize(node)?;
        map.entries.insert(address.clone(), entry);
        return Ok(());
    }

    for (key, child) in object {
        if key == LABEL_KEY {
            let label = child
                .as_str()
                .ok_or_else(|| shape_error(path, "label is not a string"))?;
            map.labels.insert(address.clone(), label.to_string());
            continue;
        }
        let offset = u32::from_str_radix(key, 16)
            .map_err(|_| shape_error(path, format!("key {:?} is not a hex offset", key)))?;
        address.push(offset);
        walk(child, address, &format!("{}.{}", path, key), map)?;
        address.pop();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Diagnostics;
    use crate::tree::TreeBuilder;

    fn sample_tree() -> AddressTree {
        let mut builder = TreeBuilder::new("fa-06");
        let mut diagnostics = Diagnostics::new();
        let mut reverb = ParameterRecord::new(vec![0, 0, 0x0A], "Reverb Type");
        reverb.value_range = Some(ValueRange::Numeric(0, 7));
        reverb.default = Some(DefaultValue::Integer(4));
        builder.fold(reverb, &mut diagnostics).unwrap();
        let mut mode = ParameterRecord::new(vec![0, 0, 0x02], "Mode");
        mode.value_range = Some(ValueRange::Labels(vec!["OFF".into(), "ON".into()]));
        builder.fold(mode, &mut diagnostics).unwrap();
        builder.finish()
    }

    #[test]
    fn children_are_keyed_by_ascending_hex_offset() {
        let json = to_json(&sample_tree(), false).unwrap();
        assert_eq!(
            json,
            r#"{"fa-06":{"00":{"00":{"02":{"name":"Mode","size_bytes":1,"range":["OFF","ON"]},"0A":{"name":"Reverb Type","size_bytes":1,"range":[0,7],"default":4}}}}}"#
        );
    }

    #[test]
    fn parse_back_recovers_every_entry() {
        let tree = sample_tree();
        let map = parse_sysex_map(&to_json(&tree, true).unwrap()).unwrap();
        assert_eq!(map.model, "fa-06");
        assert_eq!(map.entries.len(), 2);
        let reverb = &map.entries[&vec![0, 0, 0x0A]];
        assert_eq!(reverb.range, Some(ValueRange::Numeric(0, 7)));
        assert_eq!(reverb.default, Some(DefaultValue::Integer(4)));
    }

    #[test]
    fn rejects_foreign_shapes() {
        assert!(matches!(parse_sysex_map("[1, 2]"), Err(MapFormatError::Shape { .. })));
        assert!(matches!(
            parse_sysex_map(r#"{"m": {"zz": {"name": "x", "size_bytes": 1}}}"#),
            Err(MapFormatError::Shape { .. })
        ));
        assert!(matches!(parse_sysex_map("{"), Err(MapFormatError::Json(_))));
    }
}
