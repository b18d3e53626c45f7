//! Code node - transform items with a Rhai script.

use async_trait::async_trait;
use rhai::{Dynamic, Engine, Scope};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use super::context::ExecuteContext;
use super::parameters::ParameterSchema;
use super::types::{ExecuteNode, NodeGroup, NodeType, NodeTypeDescription};
use crate::error::Result;
use crate::expression::number_value;
use crate::workflow::{Item, ItemBatch, NodeOutput};

const MAX_OPERATIONS: u64 = 500_000;
const MAX_STRING_SIZE: usize = 1_000_000;
const MAX_COLLECTION_SIZE: usize = 100_000;

/// Code node running Rhai scripts.
///
/// Scripts get no file, network or process access; the engine caps operations,
/// nesting and collection sizes.
pub struct CodeNode {
    description: NodeTypeDescription,
}

impl CodeNode {
    pub fn new() -> Self {
        Self {
            description: NodeTypeDescription::new("code", "Code", NodeGroup::Transform)
                .versions(&[1, 2])
                .describe("Transform items with a Rhai script")
                .property(ParameterSchema::options(
                    "mode",
                    &["runOnceForAllItems", "runOnceForEachItem"],
                ))
                .property(
                    ParameterSchema::string("code")
                        .required()
                        .describe("All items: `items` in scope, return an array. Each item: `json`, `item` and `item_index` in scope, return an object"),
                ),
        }
    }

    /// Create a configured Rhai engine.
    fn create_engine() -> Engine {
        let mut engine = Engine::new();
        engine.set_max_operations(MAX_OPERATIONS);
        engine.set_max_expr_depths(64, 32);
        engine.set_max_string_size(MAX_STRING_SIZE);
        engine.set_max_array_size(MAX_COLLECTION_SIZE);
        engine.set_max_map_size(MAX_COLLECTION_SIZE);

        engine.register_fn("to_json", |v: Dynamic| -> String {
            serde_json::to_string(&dynamic_to_json(v)).unwrap_or_default()
        });
        engine.register_fn("from_json", |s: &str| -> Dynamic {
            serde_json::from_str::<Value>(s)
                .map(json_to_dynamic)
                .unwrap_or(Dynamic::UNIT)
        });

        engine
    }
}

impl Default for CodeNode {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
enum Mode {
    #[default]
    RunOnceForAllItems,
    RunOnceForEachItem,
}

#[derive(Debug, Deserialize)]
struct CodeConfig {
    #[serde(default)]
    mode: Mode,
    code: String,
}

/// Convert rhai::Dynamic to serde_json::Value
fn dynamic_to_json(v: Dynamic) -> Value {
    if v.is_unit() {
        Value::Null
    } else if v.is_bool() {
        Value::Bool(v.as_bool().unwrap_or(false))
    } else if v.is_int() {
        json!(v.as_int().unwrap_or(0))
    } else if v.is_float() {
        number_value(v.as_float().unwrap_or(0.0))
    } else if v.is_string() {
        Value::String(v.into_string().unwrap_or_default())
    } else if v.is_array() {
        match v.into_array() {
            Ok(arr) => Value::Array(arr.into_iter().map(dynamic_to_json).collect()),
            Err(_) => Value::Null,
        }
    } else if v.is_map() {
        match v.try_cast::<rhai::Map>() {
            Some(map) => Value::Object(
                map.into_iter()
                    .map(|(k, v)| (k.to_string(), dynamic_to_json(v)))
                    .collect(),
            ),
            None => Value::Null,
        }
    } else {
        Value::String(v.to_string())
    }
}

/// Convert serde_json::Value to rhai::Dynamic
fn json_to_dynamic(value: Value) -> Dynamic {
    match value {
        Value::Null => Dynamic::UNIT,
        Value::Bool(b) => Dynamic::from(b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Dynamic::from(i)
            } else if let Some(f) = n.as_f64() {
                Dynamic::from(f)
            } else {
                Dynamic::UNIT
            }
        }
        Value::String(s) => Dynamic::from(s),
        Value::Array(arr) => {
            let vec: Vec<Dynamic> = arr.into_iter().map(json_to_dynamic).collect();
            Dynamic::from(vec)
        }
        Value::Object(obj) => {
            let mut map = rhai::Map::new();
            for (k, v) in obj {
                map.insert(k.into(), json_to_dynamic(v));
            }
            Dynamic::from(map)
        }
    }
}

/// Script-facing shape of an item: `#{ json: #{..} }`.
fn item_view(item: &Item) -> Dynamic {
    json_to_dynamic(json!({ "json": item.json_value() }))
}

/// Turn a script result into items. Objects with an object `json` key are
/// taken as items, other objects as item json.
fn result_items(result: Value, paired: Option<usize>) -> std::result::Result<ItemBatch, String> {
    let values = match result {
        Value::Null => Vec::new(),
        Value::Array(values) => values,
        other => vec![other],
    };
    values
        .into_iter()
        .enumerate()
        .map(|(position, value)| {
            let json = match value {
                Value::Object(mut map) => match map.remove("json") {
                    Some(Value::Object(inner)) => inner,
                    Some(other) => {
                        map.insert("json".to_string(), other);
                        map
                    }
                    None => map,
                },
                other => {
                    return Err(format!(
                        "Code must return objects, but element {} is {}",
                        position, other
                    ))
                }
            };
            let item = Item::new(json);
            Ok(match paired {
                Some(index) => item.with_paired_item(index),
                None => item.with_paired_item(position),
            })
        })
        .collect()
}

impl NodeType for CodeNode {
    fn description(&self) -> &NodeTypeDescription {
        &self.description
    }
}

#[async_trait]
impl ExecuteNode for CodeNode {
    async fn execute(&self, ctx: &ExecuteContext<'_>) -> Result<NodeOutput> {
        let input = ctx.get_input_data(0);
        let config: CodeConfig = ctx.get_parameters_as(0)?;
        let engine = Self::create_engine();
        let ast = engine
            .compile(&config.code)
            .map_err(|e| ctx.node_error(format!("Code does not compile: {}", e), 0))?;
        debug!(mode = ?config.mode, items = input.len(), "Running code node");

        match config.mode {
            Mode::RunOnceForAllItems => {
                let mut scope = Scope::new();
                let items: Vec<Dynamic> = input.iter().map(item_view).collect();
                scope.push("items", items);
                let outcome = engine
                    .eval_ast_with_scope::<Dynamic>(&mut scope, &ast)
                    .map_err(|e| format!("Code error: {}", e))
                    .and_then(|result| result_items(dynamic_to_json(result), None));
                match outcome {
                    Ok(items) => Ok(vec![items]),
                    Err(message) => {
                        let err = ctx.node_error(message, 0);
                        if ctx.continue_on_fail() {
                            Ok(vec![vec![ctx.error_item(&err, 0)]])
                        } else {
                            Err(err)
                        }
                    }
                }
            }
            Mode::RunOnceForEachItem => {
                let mut output = Vec::with_capacity(input.len());
                for (index, item) in input.iter().enumerate() {
                    let mut scope = Scope::new();
                    scope.push("item", item_view(item));
                    scope.push("json", json_to_dynamic(item.json_value()));
                    scope.push("item_index", index as i64);
                    let outcome = engine
                        .eval_ast_with_scope::<Dynamic>(&mut scope, &ast)
                        .map_err(|e| format!("Code error: {}", e))
                        .and_then(|result| result_items(dynamic_to_json(result), Some(index)));
                    match outcome {
                        Ok(items) => output.extend(items),
                        Err(message) => {
                            let err = ctx.node_error(message, index);
                            if ctx.continue_on_fail() {
                                output.push(ctx.error_item(&err, index));
                            } else {
                                return Err(err);
                            }
                        }
                    }
                }
                Ok(vec![output])
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::context::testing::{items, Harness};
    use crate::workflow::NodeDefinition;

    async fn run(parameters: Value, input: Vec<Value>, continue_on_fail: bool) -> Result<NodeOutput> {
        let mut definition = NodeDefinition::new("Code", "code").with_parameters(parameters);
        definition.continue_on_fail = continue_on_fail;
        let node = CodeNode::new();
        let harness = Harness::new(definition);
        let ctx = harness.context(node.description(), vec![items(input)]);
        node.execute(&ctx).await
    }

    #[tokio::test]
    async fn test_all_items_mode() {
        let code = r#"
            let out = [];
            for item in items {
                out.push(#{ doubled: item.json.n * 2 });
            }
            out
        "#;
        let output = run(json!({"code": code}), vec![json!({"n": 1}), json!({"n": 4})], false)
            .await
            .unwrap();
        let values: Vec<Value> = output[0].iter().map(Item::json_value).collect();
        assert_eq!(values, vec![json!({"doubled": 2}), json!({"doubled": 8})]);
    }

    #[tokio::test]
    async fn test_each_item_mode_keeps_lineage() {
        let code = r#"
            json.index = item_index;
            json.label = "n=" + json.n;
            json
        "#;
        let output = run(
            json!({"mode": "runOnceForEachItem", "code": code}),
            vec![json!({"n": 1}), json!({"n": 2})],
            false,
        )
        .await
        .unwrap();
        assert_eq!(output[0][1].json_value(), json!({"n": 2, "index": 1, "label": "n=2"}));
        assert_eq!(output[0][1].paired_item.unwrap().item, 1);
    }

    #[tokio::test]
    async fn test_item_shaped_results_and_floats() {
        let output = run(json!({"code": "[#{ json: #{ v: 2.0 } }, #{ v: 1.5 }]"}), vec![], false)
            .await
            .unwrap();
        assert_eq!(output[0][0].json_value(), json!({"v": 2}));
        assert_eq!(output[0][1].json_value(), json!({"v": 1.5}));
    }

    #[tokio::test]
    async fn test_errors_and_limits() {
        let err = run(json!({"code": "let x = ;"}), vec![], false).await.unwrap_err();
        assert!(err.to_string().contains("does not compile"));

        let err = run(json!({"code": "loop { }"}), vec![], false).await.unwrap_err();
        assert!(err.to_string().contains("Code error"));

        let err = run(json!({"code": "[1, 2]"}), vec![], false).await.unwrap_err();
        assert!(err.to_string().contains("must return objects"));

        let output = run(
            json!({"mode": "runOnceForEachItem", "code": "if json.bad { throw \"nope\" } json"}),
            vec![json!({"bad": false}), json!({"bad": true})],
            true,
        )
        .await
        .unwrap();
        assert_eq!(output[0].len(), 2);
        assert!(output[0][1].error.is_some());
    }
}
