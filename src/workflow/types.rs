//! Workflow type definitions.
//!
//! The definition is plain structured data: nodes keyed by unique name and
//! connections keyed by source node name and output slot kind.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use super::item::Item;

/// The connection kind that drives execution.
pub const MAIN_CONNECTION: &str = "main";

/// A complete workflow definition.
///
/// # Example YAML
///
/// ```yaml
/// name: greet
/// nodes:
///   - name: Start
///     type: manualTrigger
///   - name: Greet
///     type: set
///     parameters:
///       fields:
///         - name: greeting
///           value: "Hello {{ $json.name }}"
/// connections:
///   Start:
///     main:
///       - - node: Greet
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowDefinition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub active: bool,

    pub nodes: Vec<NodeDefinition>,

    /// `source node -> connection kind -> output index -> targets`
    #[serde(default)]
    pub connections: Connections,

    #[serde(default)]
    pub settings: WorkflowSettings,

    /// Initial contents of the workflow-scoped static data store.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub static_data: Option<Map<String, Value>>,

    /// Output items pinned per node; pinned nodes are not executed.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub pin_data: BTreeMap<String, Vec<Item>>,
}

/// Connections keyed by source node name, then by connection kind.
pub type Connections = BTreeMap<String, BTreeMap<String, Vec<Vec<ConnectionTarget>>>>;

/// One end of a connection as written in the definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionTarget {
    pub node: String,

    #[serde(rename = "type", default = "default_connection_kind")]
    pub kind: String,

    /// Input slot on the target node.
    #[serde(default)]
    pub index: usize,
}

fn default_connection_kind() -> String {
    MAIN_CONNECTION.to_string()
}

impl ConnectionTarget {
    pub fn main(node: &str, index: usize) -> Self {
        Self {
            node: node.to_string(),
            kind: default_connection_kind(),
            index,
        }
    }
}

/// A configured node instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeDefinition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Unique name within the workflow
    pub name: String,

    /// Registered node type name
    #[serde(rename = "type")]
    pub node_type: String,

    #[serde(default = "default_type_version", deserialize_with = "deserialize_version")]
    pub type_version: u32,

    /// Parameter values, possibly containing expressions
    #[serde(default)]
    pub parameters: Map<String, Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<[f64; 2]>,

    #[serde(default)]
    pub disabled: bool,

    #[serde(default)]
    pub continue_on_fail: bool,

    #[serde(default)]
    pub retry_on_fail: bool,

    #[serde(default = "default_max_tries")]
    pub max_tries: u32,

    /// Milliseconds to wait between retry attempts; unset uses the engine default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wait_between_tries: Option<u64>,

    /// Emit a single empty item when the node produces no output
    #[serde(default)]
    pub always_output_data: bool,

    /// Run only on the first input item
    #[serde(default)]
    pub execute_once: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,

    /// Credential references by credential type
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub credentials: BTreeMap<String, CredentialRef>,
}

fn default_type_version() -> u32 {
    1
}

fn default_max_tries() -> u32 {
    3
}

/// Accepts `2` as well as `2.1`; minor versions select the major behavior.
fn deserialize_version<'de, D>(deserializer: D) -> std::result::Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    let value = f64::deserialize(deserializer)?;
    if value < 0.0 || !value.is_finite() {
        return Err(serde::de::Error::custom(format!(
            "invalid typeVersion {}",
            value
        )));
    }
    Ok(value.floor() as u32)
}

impl NodeDefinition {
    /// Minimal node with default flags, mainly for programmatic construction.
    pub fn new(name: &str, node_type: &str) -> Self {
        Self {
            id: None,
            name: name.to_string(),
            node_type: node_type.to_string(),
            type_version: default_type_version(),
            parameters: Map::new(),
            position: None,
            disabled: false,
            continue_on_fail: false,
            retry_on_fail: false,
            max_tries: default_max_tries(),
            wait_between_tries: None,
            always_output_data: false,
            execute_once: false,
            notes: None,
            credentials: BTreeMap::new(),
        }
    }

    pub fn with_parameters(mut self, parameters: Value) -> Self {
        if let Value::Object(map) = parameters {
            self.parameters = map;
        }
        self
    }
}

/// Reference to a stored credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialRef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub name: String,
}

impl CredentialRef {
    /// Key used to look the credential up: the id when present, else the name.
    pub fn key(&self) -> &str {
        self.id.as_deref().unwrap_or(&self.name)
    }
}

/// Workflow-level settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowSettings {
    /// Run timeout in seconds; absent or non-positive uses the engine default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_timeout: Option<i64>,

    /// IANA timezone used for `$now` and `$today`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,

    /// Settings this engine does not interpret.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl WorkflowDefinition {
    /// Look up a node definition by name.
    pub fn get_node(&self, name: &str) -> Option<&NodeDefinition> {
        self.nodes.iter().find(|n| n.name == name)
    }

    /// Key identifying this workflow for workflow-scoped state.
    pub fn key(&self) -> &str {
        self.id.as_deref().unwrap_or(&self.name)
    }

    /// Add a `main` connection, creating intermediate entries as needed.
    pub fn connect(&mut self, source: &str, output: usize, target: &str, input: usize) {
        let slots = self
            .connections
            .entry(source.to_string())
            .or_default()
            .entry(MAIN_CONNECTION.to_string())
            .or_default();
        if slots.len() <= output {
            slots.resize_with(output + 1, Vec::new);
        }
        slots[output].push(ConnectionTarget::main(target, input));
    }
}
