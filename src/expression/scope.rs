//! Variable scopes expressions are evaluated against.

use std::collections::HashMap;
use std::rc::Rc;

use chrono::{SecondsFormat, Utc};
use serde_json::Value;

use super::EvalResult;
use crate::workflow::Item;

/// Where a group of items comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemSource {
    /// The batch the current node is processing.
    Input,
    /// The last output of a named node.
    Node(String),
}

/// Read-only view the interpreter resolves `$`-variables and item data through.
///
/// Item groups are exposed as item views: objects with `json`, `binary` and
/// (when known) `pairedItem` keys.
pub trait Scope {
    /// Resolve a root variable such as `$json` or `$workflow`.
    ///
    /// `Ok(None)` means the variable is unknown to this scope.
    fn variable(&self, name: &str) -> EvalResult<Option<Value>>;

    /// Items of a source; `None` when the named node has not produced output.
    fn source_items(&self, source: &ItemSource) -> EvalResult<Option<Rc<Vec<Value>>>>;

    /// Whether a node with this name exists in the workflow.
    fn node_exists(&self, name: &str) -> bool;

    /// Name of the node that delivered the current input.
    fn previous_node(&self) -> Option<String>;

    /// Index of the item being processed.
    fn item_index(&self) -> usize;
}

/// Self-contained scope over an input batch and optional named node outputs.
///
/// Used by the CLI `eval` command and wherever no run context exists.
#[derive(Debug, Clone, Default)]
pub struct ItemScope {
    items: Rc<Vec<Value>>,
    item_index: usize,
    variables: HashMap<String, Value>,
    nodes: HashMap<String, Rc<Vec<Value>>>,
}

impl ItemScope {
    pub fn new(items: &[Item]) -> Self {
        Self {
            items: Rc::new(items.iter().map(Item::to_view).collect()),
            ..Default::default()
        }
    }

    /// Scope over a single item built from a JSON value.
    pub fn from_json(json: Value) -> Self {
        Self::new(&[Item::from_value(json)])
    }

    pub fn with_item_index(mut self, index: usize) -> Self {
        self.item_index = index;
        self
    }

    /// Register a root variable; the name includes the `$` prefix.
    pub fn with_variable(mut self, name: &str, value: Value) -> Self {
        self.variables.insert(name.to_string(), value);
        self
    }

    pub fn with_node_output(mut self, name: &str, items: &[Item]) -> Self {
        self.nodes.insert(
            name.to_string(),
            Rc::new(items.iter().map(Item::to_view).collect()),
        );
        self
    }

    fn current_field(&self, field: &str) -> Value {
        self.items
            .get(self.item_index)
            .and_then(|item| item.get(field))
            .cloned()
            .unwrap_or(Value::Null)
    }
}

impl Scope for ItemScope {
    fn variable(&self, name: &str) -> EvalResult<Option<Value>> {
        if let Some(value) = self.variables.get(name) {
            return Ok(Some(value.clone()));
        }
        let value = match name {
            "$json" => self.current_field("json"),
            "$binary" => self.current_field("binary"),
            "$itemIndex" => Value::from(self.item_index),
            "$runIndex" => Value::from(0),
            "$now" => Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)),
            "$today" => {
                let midnight = Utc::now().date_naive().and_hms_opt(0, 0, 0);
                match midnight {
                    Some(dt) => Value::String(
                        dt.and_utc().to_rfc3339_opts(SecondsFormat::Millis, true),
                    ),
                    None => Value::Null,
                }
            }
            _ => return Ok(None),
        };
        Ok(Some(value))
    }

    fn source_items(&self, source: &ItemSource) -> EvalResult<Option<Rc<Vec<Value>>>> {
        Ok(match source {
            ItemSource::Input => Some(Rc::clone(&self.items)),
            ItemSource::Node(name) => self.nodes.get(name).cloned(),
        })
    }

    fn node_exists(&self, name: &str) -> bool {
        self.nodes.contains_key(name)
    }

    fn previous_node(&self) -> Option<String> {
        None
    }

    fn item_index(&self) -> usize {
        self.item_index
    }
}
