//! Manual trigger and no-op nodes.

use async_trait::async_trait;

use super::context::ExecuteContext;
use super::types::{ExecuteNode, NodeGroup, NodeType, NodeTypeDescription};
use crate::error::Result;
use crate::workflow::{Item, NodeOutput};

/// Start node for manually started runs. Emits the seed items, or a single
/// empty item when the run was started without any.
pub struct ManualTrigger {
    description: NodeTypeDescription,
}

impl ManualTrigger {
    pub fn new() -> Self {
        Self {
            description: NodeTypeDescription::new(
                "manualTrigger",
                "Manual Trigger",
                NodeGroup::Trigger,
            )
            .inputs(&[])
            .describe("Starts the workflow when it is run by hand"),
        }
    }
}

impl Default for ManualTrigger {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeType for ManualTrigger {
    fn description(&self) -> &NodeTypeDescription {
        &self.description
    }
}

#[async_trait]
impl ExecuteNode for ManualTrigger {
    async fn execute(&self, ctx: &ExecuteContext<'_>) -> Result<NodeOutput> {
        let seed = ctx.get_input_data(0);
        if seed.is_empty() {
            return Ok(vec![vec![Item::default()]]);
        }
        Ok(vec![seed.to_vec()])
    }
}

/// Passes its input through unchanged.
pub struct NoOpNode {
    description: NodeTypeDescription,
}

impl NoOpNode {
    pub fn new() -> Self {
        Self {
            description: NodeTypeDescription::new("noOp", "No Operation", NodeGroup::Transform)
                .describe("Does nothing; passes items through"),
        }
    }
}

impl Default for NoOpNode {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeType for NoOpNode {
    fn description(&self) -> &NodeTypeDescription {
        &self.description
    }
}

#[async_trait]
impl ExecuteNode for NoOpNode {
    async fn execute(&self, ctx: &ExecuteContext<'_>) -> Result<NodeOutput> {
        Ok(vec![ctx.get_input_data(0).to_vec()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::context::testing::{items, Harness};
    use crate::workflow::NodeDefinition;
    use serde_json::json;

    #[tokio::test]
    async fn test_manual_trigger_seeds_one_item() {
        let node = ManualTrigger::new();
        let harness = Harness::new(NodeDefinition::new("Start", "manualTrigger"));
        let output = node
            .execute(&harness.context(node.description(), vec![]))
            .await
            .unwrap();
        assert_eq!(output, vec![vec![Item::default()]]);

        let seeded = node
            .execute(&harness.context(node.description(), vec![items(vec![json!({"y": 5})])]))
            .await
            .unwrap();
        assert_eq!(seeded[0][0].json.get("y"), Some(&json!(5)));
    }

    #[tokio::test]
    async fn test_noop_passes_through() {
        let node = NoOpNode::new();
        let harness = Harness::new(NodeDefinition::new("Pass", "noOp"));
        let input = items(vec![json!({"a": 1}), json!({"a": 2})]);
        let output = node
            .execute(&harness.context(node.description(), vec![input.clone()]))
            .await
            .unwrap();
        assert_eq!(output, vec![input]);
    }
}
