//! IF node - route each item to the `true` or `false` output.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use super::context::ExecuteContext;
use super::parameters::ParameterSchema;
use super::types::{ExecuteNode, NodeGroup, NodeType, NodeTypeDescription};
use crate::error::Result;
use crate::expression::{compare_values, is_empty_value, loose_equals, to_display, truthy};
use crate::workflow::NodeOutput;

/// IF node implementation.
pub struct IfNode {
    description: NodeTypeDescription,
}

impl IfNode {
    pub fn new() -> Self {
        Self {
            description: NodeTypeDescription::new("if", "If", NodeGroup::Transform)
                .describe("Route items to true or false based on conditions")
                .outputs(&["true", "false"])
                .property(
                    ParameterSchema::json("conditions")
                        .default(json!([]))
                        .describe("List of {value1, operation, value2}"),
                )
                .property(
                    ParameterSchema::options("combineOperation", &["all", "any"])
                        .display_name("Combine"),
                )
                .property(ParameterSchema::boolean("ignoreCase", false).display_name("Ignore Case")),
        }
    }
}

impl Default for IfNode {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IfConfig {
    #[serde(default)]
    conditions: Vec<Condition>,
    #[serde(default)]
    combine_operation: Combine,
    #[serde(default)]
    ignore_case: bool,
}

#[derive(Debug, Default, Clone, Copy, Deserialize)]
#[serde(rename_all = "lowercase")]
enum Combine {
    #[default]
    All,
    Any,
}

#[derive(Debug, Deserialize)]
struct Condition {
    #[serde(default)]
    value1: Value,
    operation: Operation,
    #[serde(default)]
    value2: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
enum Operation {
    Equals,
    NotEquals,
    Contains,
    NotContains,
    StartsWith,
    EndsWith,
    Larger,
    LargerEqual,
    Smaller,
    SmallerEqual,
    Regex,
    NotRegex,
    IsEmpty,
    IsNotEmpty,
    #[serde(alias = "true")]
    IsTrue,
    #[serde(alias = "false")]
    IsFalse,
    IsNull,
    IsNotNull,
}

impl NodeType for IfNode {
    fn description(&self) -> &NodeTypeDescription {
        &self.description
    }
}

#[async_trait]
impl ExecuteNode for IfNode {
    async fn execute(&self, ctx: &ExecuteContext<'_>) -> Result<NodeOutput> {
        let mut true_items = Vec::new();
        let mut false_items = Vec::new();

        for (index, item) in ctx.get_input_data(0).iter().enumerate() {
            let decision = ctx
                .get_parameters_as::<IfConfig>(index)
                .and_then(|config| {
                    matches(&config).map_err(|message| ctx.node_error(message, index))
                });
            let routed = item.clone().with_paired_item(index);
            match decision {
                Ok(true) => true_items.push(routed),
                Ok(false) => false_items.push(routed),
                // Failed items go down the false branch as error items.
                Err(e) if ctx.continue_on_fail() => false_items.push(ctx.error_item(&e, index)),
                Err(e) => return Err(e),
            }
        }

        Ok(vec![true_items, false_items])
    }
}

fn matches(config: &IfConfig) -> std::result::Result<bool, String> {
    match config.combine_operation {
        Combine::All => {
            for condition in &config.conditions {
                if !evaluate_condition(condition, config.ignore_case)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        Combine::Any => {
            for condition in &config.conditions {
                if evaluate_condition(condition, config.ignore_case)? {
                    return Ok(true);
                }
            }
            // No conditions means nothing matched.
            Ok(false)
        }
    }
}

fn evaluate_condition(condition: &Condition, ignore_case: bool) -> std::result::Result<bool, String> {
    let left = &condition.value1;
    let right = &condition.value2;
    let text = |value: &Value| {
        let s = to_display(value);
        if ignore_case {
            s.to_lowercase()
        } else {
            s
        }
    };

    Ok(match condition.operation {
        Operation::Equals => equals(left, right, ignore_case),
        Operation::NotEquals => !equals(left, right, ignore_case),
        Operation::Contains => contains(left, right, ignore_case),
        Operation::NotContains => !contains(left, right, ignore_case),
        Operation::StartsWith => text(left).starts_with(&text(right)),
        Operation::EndsWith => text(left).ends_with(&text(right)),
        Operation::Larger => compare_values(left, right).map(|o| o.is_gt()).unwrap_or(false),
        Operation::LargerEqual => compare_values(left, right).map(|o| o.is_ge()).unwrap_or(false),
        Operation::Smaller => compare_values(left, right).map(|o| o.is_lt()).unwrap_or(false),
        Operation::SmallerEqual => compare_values(left, right).map(|o| o.is_le()).unwrap_or(false),
        Operation::Regex => build_regex(right, ignore_case)?.is_match(&to_display(left)),
        Operation::NotRegex => !build_regex(right, ignore_case)?.is_match(&to_display(left)),
        Operation::IsEmpty => is_empty_value(left),
        Operation::IsNotEmpty => !is_empty_value(left),
        Operation::IsTrue => truthy(left) && left != &Value::String("false".into()),
        Operation::IsFalse => !truthy(left) || left == &Value::String("false".into()),
        Operation::IsNull => left.is_null(),
        Operation::IsNotNull => !left.is_null(),
    })
}

fn equals(left: &Value, right: &Value, ignore_case: bool) -> bool {
    match (left, right) {
        (Value::String(a), Value::String(b)) if ignore_case => a.to_lowercase() == b.to_lowercase(),
        _ => loose_equals(left, right),
    }
}

fn contains(haystack: &Value, needle: &Value, ignore_case: bool) -> bool {
    match haystack {
        Value::Array(items) => items.iter().any(|item| equals(item, needle, ignore_case)),
        Value::Object(map) => map.contains_key(&to_display(needle)),
        other => {
            let (h, n) = (to_display(other), to_display(needle));
            if ignore_case {
                h.to_lowercase().contains(&n.to_lowercase())
            } else {
                h.contains(&n)
            }
        }
    }
}

/// Accepts a bare pattern or `/pattern/flags` with the `i` flag.
fn build_regex(pattern: &Value, ignore_case: bool) -> std::result::Result<regex_lite::Regex, String> {
    let raw = to_display(pattern);
    let (body, insensitive) = match raw.strip_prefix('/').and_then(|rest| rest.rsplit_once('/')) {
        Some((body, flags)) => (body.to_string(), flags.contains('i')),
        None => (raw.clone(), false),
    };
    let source = if insensitive || ignore_case {
        format!("(?i){}", body)
    } else {
        body
    };
    regex_lite::Regex::new(&source).map_err(|e| format!("Invalid regex '{}': {}", raw, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::context::testing::{items, Harness};
    use crate::workflow::NodeDefinition;

    async fn run(definition: NodeDefinition, input: Vec<Value>) -> Result<NodeOutput> {
        let node = IfNode::new();
        let harness = Harness::new(definition);
        let ctx = harness.context(node.description(), vec![items(input)]);
        node.execute(&ctx).await
    }

    fn condition(operation: &str, value1: Value, value2: Value) -> bool {
        let condition: Condition = serde_json::from_value(json!({
            "value1": value1,
            "operation": operation,
            "value2": value2,
        }))
        .unwrap();
        evaluate_condition(&condition, false).unwrap()
    }

    #[tokio::test]
    async fn test_partitions_every_item_exactly_once() {
        let definition = NodeDefinition::new("If", "if").with_parameters(json!({
            "conditions": [
                {"value1": "={{ $json.n }}", "operation": "larger", "value2": 2}
            ]
        }));
        let input: Vec<Value> = (0..7).map(|n| json!({"n": n})).collect();
        let output = run(definition, input).await.unwrap();

        assert_eq!(output.len(), 2);
        assert_eq!(output[0].len() + output[1].len(), 7);
        assert!(output[0].iter().all(|i| i.json["n"].as_i64().unwrap() > 2));
        assert!(output[1].iter().all(|i| i.json["n"].as_i64().unwrap() <= 2));
        let mut seen: Vec<usize> = output
            .iter()
            .flatten()
            .map(|i| i.paired_item.unwrap().item)
            .collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..7).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_any_combination() {
        let definition = NodeDefinition::new("If", "if").with_parameters(json!({
            "combineOperation": "any",
            "conditions": [
                {"value1": "={{ $json.name }}", "operation": "startsWith", "value2": "A"},
                {"value1": "={{ $json.tags }}", "operation": "contains", "value2": "vip"}
            ]
        }));
        let output = run(
            definition,
            vec![
                json!({"name": "Ann", "tags": []}),
                json!({"name": "Bo", "tags": ["vip"]}),
                json!({"name": "Cy", "tags": []}),
            ],
        )
        .await
        .unwrap();
        assert_eq!(output[0].len(), 2);
        assert_eq!(output[1].len(), 1);
        assert_eq!(output[1][0].json["name"], "Cy");
    }

    #[test]
    fn test_operators() {
        assert!(condition("equals", json!("5"), json!(5)));
        assert!(condition("notEquals", json!("a"), json!("b")));
        assert!(condition("contains", json!("hello"), json!("ell")));
        assert!(condition("notContains", json!([1, 2]), json!(3)));
        assert!(condition("endsWith", json!("file.txt"), json!(".txt")));
        assert!(condition("largerEqual", json!(3), json!(3)));
        assert!(condition("smaller", json!("2"), json!(10)));
        assert!(condition("smallerEqual", json!(1), json!(1)));
        assert!(condition("regex", json!("abc123"), json!("^[a-z]+\\d+$")));
        assert!(condition("regex", json!("ABC"), json!("/abc/i")));
        assert!(condition("notRegex", json!("abc"), json!("^\\d+$")));
        assert!(condition("isEmpty", json!(""), Value::Null));
        assert!(condition("isNotEmpty", json!({"a": 1}), Value::Null));
        assert!(condition("isTrue", json!(true), Value::Null));
        assert!(condition("isFalse", json!("false"), Value::Null));
        assert!(condition("isNull", Value::Null, Value::Null));
        assert!(condition("isNotNull", json!(0), Value::Null));
        assert!(!condition("larger", json!("x"), json!(1)));
    }

    #[tokio::test]
    async fn test_invalid_regex_with_continue_on_fail() {
        let mut definition = NodeDefinition::new("If", "if").with_parameters(json!({
            "conditions": [{"value1": "a", "operation": "regex", "value2": "("}]
        }));
        let err = run(definition.clone(), vec![json!({})]).await.unwrap_err();
        assert!(err.to_string().contains("Invalid regex"));

        definition.continue_on_fail = true;
        let output = run(definition, vec![json!({})]).await.unwrap();
        assert!(output[0].is_empty());
        assert!(output[1][0].error.is_some());
    }
}
