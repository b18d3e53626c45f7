//! Items: the unit of data flowing along connections.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::NodeErrorInfo;

/// Reference to a binary attachment carried alongside an item.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BinaryRef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub mime_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_extension: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
    /// Inline base64 payload, when the data is not held by external storage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

/// Lineage link from an output item back to the input item that produced it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairedItem {
    pub item: usize,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub input: usize,
}

fn is_zero(value: &usize) -> bool {
    *value == 0
}

/// A single item: a JSON object plus optional binary attachments.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    #[serde(default)]
    pub json: Map<String, Value>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub binary: BTreeMap<String, BinaryRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<NodeErrorInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paired_item: Option<PairedItem>,
}

/// Ordered list of items carried by one output slot.
pub type ItemBatch = Vec<Item>;

/// One batch per output slot, as returned by a node's execute behavior.
pub type NodeOutput = Vec<ItemBatch>;

impl Item {
    pub fn new(json: Map<String, Value>) -> Self {
        Self {
            json,
            ..Default::default()
        }
    }

    /// Build an item from any JSON value.
    ///
    /// Objects become the item's json directly; anything else is wrapped
    /// under a `data` key.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(map) => Self::new(map),
            other => {
                let mut map = Map::new();
                map.insert("data".to_string(), other);
                Self::new(map)
            }
        }
    }

    /// Parse a seed batch: an array of items/objects or a single object.
    ///
    /// Entries already shaped like items (`{"json": {...}}`) are kept as
    /// items; plain objects are wrapped.
    pub fn batch_from_value(value: Value) -> ItemBatch {
        match value {
            Value::Array(values) => values.into_iter().map(Self::from_item_like).collect(),
            Value::Null => Vec::new(),
            other => vec![Self::from_item_like(other)],
        }
    }

    fn from_item_like(value: Value) -> Self {
        if value.get("json").map(Value::is_object).unwrap_or(false) {
            if let Ok(item) = serde_json::from_value::<Item>(value.clone()) {
                return item;
            }
        }
        Self::from_value(value)
    }

    pub fn with_paired_item(mut self, index: usize) -> Self {
        self.paired_item = Some(PairedItem {
            item: index,
            input: 0,
        });
        self
    }

    /// The item's json as an owned `Value::Object`.
    pub fn json_value(&self) -> Value {
        Value::Object(self.json.clone())
    }

    /// Full view of the item (`json`, `binary`, `pairedItem`) as expression data.
    pub fn to_view(&self) -> Value {
        let mut view = Map::new();
        view.insert("json".to_string(), self.json_value());
        let binary = serde_json::to_value(&self.binary).unwrap_or(Value::Null);
        view.insert("binary".to_string(), binary);
        if let Some(paired) = self.paired_item {
            view.insert(
                "pairedItem".to_string(),
                serde_json::json!({ "item": paired.item, "input": paired.input }),
            );
        }
        if let Some(error) = &self.error {
            view.insert(
                "error".to_string(),
                serde_json::to_value(error).unwrap_or(Value::Null),
            );
        }
        Value::Object(view)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_value_wraps_scalars() {
        let item = Item::from_value(json!(42));
        assert_eq!(item.json["data"], json!(42));

        let item = Item::from_value(json!({"name": "Ann"}));
        assert_eq!(item.json["name"], json!("Ann"));
    }

    #[test]
    fn test_batch_from_value_accepts_item_shapes() {
        let batch = Item::batch_from_value(json!([
            {"json": {"a": 1}, "pairedItem": {"item": 3}},
            {"b": 2}
        ]));
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].json["a"], json!(1));
        assert_eq!(batch[0].paired_item, Some(PairedItem { item: 3, input: 0 }));
        assert_eq!(batch[1].json["b"], json!(2));
    }

    #[test]
    fn test_item_serializes_without_empty_fields() {
        let item = Item::from_value(json!({"x": 1}));
        let value = serde_json::to_value(&item).unwrap();
        assert_eq!(value, json!({"json": {"x": 1}}));

        let value = serde_json::to_value(item.with_paired_item(2)).unwrap();
        assert_eq!(value["pairedItem"], json!({"item": 2}));
    }
}
