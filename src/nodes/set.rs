//! Set node - add or update typed fields on each item.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use super::context::ExecuteContext;
use super::parameters::ParameterSchema;
use super::types::{ExecuteNode, NodeGroup, NodeType, NodeTypeDescription};
use crate::error::{Error, Result};
use crate::expression::to_display;
use crate::workflow::{Item, NodeOutput};

/// Set node implementation.
pub struct SetNode {
    description: NodeTypeDescription,
}

impl SetNode {
    pub fn new() -> Self {
        Self {
            description: NodeTypeDescription::new("set", "Set", NodeGroup::Transform)
                .versions(&[1, 2])
                .describe("Set or update fields on items")
                .property(
                    ParameterSchema::json("fields")
                        .display_name("Fields to Set")
                        .default(json!([]))
                        .describe("List of {name, type, value}; type is string, number, boolean or json"),
                )
                .property(ParameterSchema::boolean("keepOnlySet", false).display_name("Keep Only Set"))
                .property(ParameterSchema::boolean("dotNotation", true).display_name("Dot Notation")),
        }
    }
}

impl Default for SetNode {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SetConfig {
    #[serde(default)]
    fields: Vec<SetField>,
    #[serde(default)]
    keep_only_set: bool,
    #[serde(default = "default_true")]
    dot_notation: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct SetField {
    name: String,
    #[serde(rename = "type", default)]
    kind: FieldKind,
    #[serde(default)]
    value: Value,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
enum FieldKind {
    #[default]
    String,
    Number,
    Boolean,
    Json,
}

impl FieldKind {
    fn convert(self, value: Value) -> std::result::Result<Value, String> {
        match self {
            Self::String => Ok(Value::String(to_display(&value))),
            Self::Number => match &value {
                Value::Number(_) => Ok(value),
                Value::String(s) => s
                    .trim()
                    .parse::<f64>()
                    .map(crate::expression::number_value)
                    .map_err(|_| format!("'{}' is not a valid number", s)),
                Value::Bool(b) => Ok(json!(if *b { 1 } else { 0 })),
                Value::Null => Ok(Value::Null),
                other => Err(format!("{} is not a valid number", other)),
            },
            Self::Boolean => match &value {
                Value::Bool(_) => Ok(value),
                Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                    "true" | "1" | "yes" => Ok(Value::Bool(true)),
                    "false" | "0" | "no" | "" => Ok(Value::Bool(false)),
                    _ => Err(format!("'{}' is not a valid boolean", s)),
                },
                Value::Number(n) => Ok(Value::Bool(n.as_f64().map(|f| f != 0.0).unwrap_or(false))),
                Value::Null => Ok(Value::Bool(false)),
                other => Err(format!("{} is not a valid boolean", other)),
            },
            Self::Json => match value {
                Value::String(s) => serde_json::from_str(&s)
                    .map_err(|e| format!("invalid JSON: {}", e)),
                other => Ok(other),
            },
        }
    }
}

impl NodeType for SetNode {
    fn description(&self) -> &NodeTypeDescription {
        &self.description
    }
}

#[async_trait]
impl ExecuteNode for SetNode {
    async fn execute(&self, ctx: &ExecuteContext<'_>) -> Result<NodeOutput> {
        let input = ctx.get_input_data(0);
        let mut output = Vec::with_capacity(input.len());

        for (index, item) in input.iter().enumerate() {
            match set_fields(ctx, item, index) {
                Ok(item) => output.push(item),
                Err(e) if ctx.continue_on_fail() => output.push(ctx.error_item(&e, index)),
                Err(e) => return Err(e),
            }
        }

        Ok(vec![output])
    }
}

fn set_fields(ctx: &ExecuteContext<'_>, item: &Item, index: usize) -> Result<Item> {
    let config: SetConfig = ctx.get_parameters_as(index)?;

    let mut json = if config.keep_only_set {
        Map::new()
    } else {
        item.json.clone()
    };

    for field in config.fields {
        if field.name.trim().is_empty() {
            return Err(ctx.node_error("Field name cannot be empty", index));
        }
        let value = field.kind.convert(field.value).map_err(|message| {
            Error::node_item(
                &ctx.node().name,
                format!("Field '{}': {}", field.name, message),
                index,
            )
        })?;
        if config.dot_notation {
            set_path_value(&mut json, &field.name, value);
        } else {
            json.insert(field.name, value);
        }
    }

    let mut out = Item::new(json).with_paired_item(index);
    if !config.keep_only_set {
        out.binary = item.binary.clone();
    }
    Ok(out)
}

/// Write `value` at a dotted path, creating or replacing intermediate objects.
fn set_path_value(root: &mut Map<String, Value>, path: &str, value: Value) {
    let segments: Vec<&str> = path.split('.').filter(|s| !s.is_empty()).collect();
    let Some((last, parents)) = segments.split_last() else {
        return;
    };

    let mut current = root;
    for segment in parents {
        let entry = current
            .entry((*segment).to_string())
            .or_insert_with(|| Value::Object(Map::new()));

        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }

        match entry.as_object_mut() {
            Some(map) => current = map,
            None => return,
        }
    }

    current.insert((*last).to_string(), value);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::context::testing::{items, Harness};
    use crate::workflow::NodeDefinition;

    async fn run(parameters: Value, input: Vec<Value>) -> Result<NodeOutput> {
        run_with(NodeDefinition::new("Set", "set").with_parameters(parameters), input).await
    }

    async fn run_with(definition: NodeDefinition, input: Vec<Value>) -> Result<NodeOutput> {
        let node = SetNode::new();
        let harness = Harness::new(definition);
        let ctx = harness.context(node.description(), vec![items(input)]);
        node.execute(&ctx).await
    }

    #[tokio::test]
    async fn test_set_expression_field() {
        let output = run(
            json!({"fields": [{"name": "x", "type": "number", "value": "={{ $json.y }}"}]}),
            vec![json!({"y": 5})],
        )
        .await
        .unwrap();
        let item = &output[0][0];
        assert_eq!(item.json.get("x"), Some(&json!(5)));
        assert_eq!(item.json.get("y"), Some(&json!(5)));
        assert_eq!(item.paired_item.unwrap().item, 0);
    }

    #[tokio::test]
    async fn test_set_nested_path_and_keep_only_set() {
        let output = run(
            json!({
                "keepOnlySet": true,
                "fields": [
                    {"name": "user.name", "value": "{{ $json.first }} {{ $json.last }}"},
                    {"name": "user.active", "type": "boolean", "value": "yes"},
                    {"name": "meta", "type": "json", "value": "{\"v\": 2}"}
                ]
            }),
            vec![json!({"first": "Ann", "last": "Lee"})],
        )
        .await
        .unwrap();
        assert_eq!(
            Value::Object(output[0][0].json.clone()),
            json!({"user": {"name": "Ann Lee", "active": true}, "meta": {"v": 2}})
        );
    }

    #[tokio::test]
    async fn test_dot_notation_disabled_keeps_literal_key() {
        let output = run(
            json!({"dotNotation": false, "fields": [{"name": "a.b", "value": 1}]}),
            vec![json!({})],
        )
        .await
        .unwrap();
        assert_eq!(output[0][0].json.get("a.b"), Some(&json!("1")));
    }

    #[tokio::test]
    async fn test_invalid_number_fails_or_becomes_error_item() {
        let parameters = json!({"fields": [{"name": "n", "type": "number", "value": "={{ $json.v }}"}]});
        let input = vec![json!({"v": "1"}), json!({"v": "abc"}), json!({"v": "3"})];

        let err = run(parameters.clone(), input.clone()).await.unwrap_err();
        assert_eq!(err.item_index(), Some(1));
        assert!(err.to_string().contains("Field 'n'"));

        let mut definition = NodeDefinition::new("Set", "set").with_parameters(parameters);
        definition.continue_on_fail = true;
        let output = run_with(definition, input).await.unwrap();
        assert_eq!(output[0].len(), 3);
        assert!(output[0][1].error.is_some());
        assert_eq!(output[0][2].json.get("n"), Some(&json!(3)));
    }

    #[test]
    fn test_set_path_value_replaces_scalars() {
        let mut root = Map::new();
        root.insert("a".into(), json!(1));
        set_path_value(&mut root, "a.b.c", json!(true));
        assert_eq!(Value::Object(root), json!({"a": {"b": {"c": true}}}));
    }
}
