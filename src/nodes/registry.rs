//! Node registry - maps type names to node implementations.

use std::collections::HashMap;
use std::sync::Arc;

use super::types::{ExecuteNode, NodeImplementation, NodeTypeDescription, TriggerNode, WebhookNode};
use super::{
    CodeNode, HttpRequestNode, IfNode, IntervalTrigger, ManualTrigger, NoOpNode, SetNode,
    VoiceCallNode, WebhookTrigger,
};
use crate::error::{Error, Result};
use crate::workflow::NodeDefinition;

/// Registry of available node types.
///
/// Read-only once built; share it behind an `Arc` across concurrent runs.
#[derive(Clone)]
pub struct NodeRegistry {
    types: HashMap<String, NodeImplementation>,
    aliases: HashMap<String, String>,
}

impl NodeRegistry {
    /// Create a new registry with the built-in nodes.
    pub fn new() -> Self {
        let mut registry = Self::empty();

        registry.register_execute(ManualTrigger::new());
        registry.register_execute(NoOpNode::new());
        registry.register_execute(SetNode::new());
        registry.register_execute(IfNode::new());
        registry.register_execute(CodeNode::new());
        registry.register_execute(HttpRequestNode::new());
        registry.register_execute(VoiceCallNode::new());
        registry.register_trigger(IntervalTrigger::new());
        registry.register_webhook(WebhookTrigger::new());

        registry.alias("start", "manualTrigger");
        registry
    }

    /// Create an empty registry (for testing).
    pub fn empty() -> Self {
        Self {
            types: HashMap::new(),
            aliases: HashMap::new(),
        }
    }

    /// Register an implementation under its description's name, replacing
    /// any previous one.
    pub fn register(&mut self, implementation: NodeImplementation) {
        let name = implementation.description().name.clone();
        self.types.insert(name, implementation);
    }

    pub fn register_execute<N: ExecuteNode + 'static>(&mut self, node: N) {
        self.register(NodeImplementation::Execute(Arc::new(node)));
    }

    pub fn register_trigger<N: TriggerNode + 'static>(&mut self, node: N) {
        self.register(NodeImplementation::Trigger(Arc::new(node)));
    }

    pub fn register_webhook<N: WebhookNode + 'static>(&mut self, node: N) {
        self.register(NodeImplementation::Webhook(Arc::new(node)));
    }

    /// Make `alias` resolve to the type registered as `target`.
    pub fn alias(&mut self, alias: &str, target: &str) {
        self.aliases.insert(alias.to_string(), target.to_string());
    }

    fn canonical<'a>(&'a self, node_type: &'a str) -> &'a str {
        self.aliases
            .get(node_type)
            .map(String::as_str)
            .unwrap_or(node_type)
    }

    /// Get an implementation by type name and version.
    pub fn get(&self, node_type: &str, version: u32) -> Option<&NodeImplementation> {
        self.types
            .get(self.canonical(node_type))
            .filter(|implementation| implementation.description().supports_version(version))
    }

    /// Implementation for a configured node, or the engine error explaining
    /// why there is none.
    pub fn resolve(&self, node: &NodeDefinition) -> Result<&NodeImplementation> {
        let Some(implementation) = self.types.get(self.canonical(&node.node_type)) else {
            return Err(Error::Engine(format!(
                "Node '{}' has unknown type '{}'",
                node.name, node.node_type
            )));
        };
        if !implementation.description().supports_version(node.type_version) {
            return Err(Error::Engine(format!(
                "Node '{}': type '{}' does not support version {}",
                node.name, node.node_type, node.type_version
            )));
        }
        Ok(implementation)
    }

    /// Check if a node type is registered.
    pub fn has(&self, node_type: &str) -> bool {
        self.types.contains_key(self.canonical(node_type))
    }

    /// Whether the type starts runs (trigger, schedule or webhook group).
    pub fn is_trigger_type(&self, node_type: &str) -> bool {
        self.types
            .get(self.canonical(node_type))
            .map(|implementation| implementation.description().group.is_trigger())
            .unwrap_or(false)
    }

    /// List all registered node types, sorted.
    pub fn list(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.types.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    /// Descriptions of all registered node types, sorted by name.
    pub fn descriptions(&self) -> Vec<&NodeTypeDescription> {
        let mut descriptions: Vec<&NodeTypeDescription> =
            self.types.values().map(NodeImplementation::description).collect();
        descriptions.sort_by(|a, b| a.name.cmp(&b.name));
        descriptions
    }
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_default_nodes() {
        let registry = NodeRegistry::new();

        for name in [
            "manualTrigger",
            "noOp",
            "set",
            "if",
            "code",
            "httpRequest",
            "voiceCall",
            "interval",
            "webhook",
        ] {
            assert!(registry.has(name), "missing {}", name);
        }
        assert!(registry.has("start"));
        assert!(!registry.has("nonexistent"));
        assert_eq!(registry.list().len(), 9);
    }

    #[test]
    fn test_trigger_groups() {
        let registry = NodeRegistry::new();
        assert!(registry.is_trigger_type("manualTrigger"));
        assert!(registry.is_trigger_type("start"));
        assert!(registry.is_trigger_type("webhook"));
        assert!(registry.is_trigger_type("interval"));
        assert!(!registry.is_trigger_type("set"));
        assert!(!registry.is_trigger_type("unknown"));
    }

    #[test]
    fn test_resolve_checks_type_and_version() {
        let registry = NodeRegistry::new();
        assert!(registry.resolve(&NodeDefinition::new("A", "set")).is_ok());

        let err = registry
            .resolve(&NodeDefinition::new("A", "nope"))
            .err()
            .unwrap();
        assert_eq!(err.code(), "ENGINE_ERROR");
        assert!(err.to_string().contains("unknown type 'nope'"));

        let mut versioned = NodeDefinition::new("B", "set");
        versioned.type_version = 42;
        assert!(registry.resolve(&versioned).is_err());
        assert!(registry.get("set", 42).is_none());
        assert!(registry.get("set", 1).is_some());
    }

    #[test]
    fn test_descriptions_sorted() {
        let registry = NodeRegistry::new();
        let names: Vec<&str> = registry
            .descriptions()
            .iter()
            .map(|d| d.name.as_str())
            .collect();
        let mut sorted = names.clone();
        sorted.sort_unstable();
        assert_eq!(names, sorted);
    }
}
