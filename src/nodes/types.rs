//! Node type contract: declarative metadata plus one behavior.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::context::{ExecuteContext, TriggerContext, WebhookContext};
use super::parameters::ParameterSchema;
use crate::error::Result;
use crate::workflow::{ItemBatch, NodeOutput, MAIN_CONNECTION};

/// Broad category of a node type. Trigger-like groups start runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeGroup {
    Trigger,
    Schedule,
    Webhook,
    Transform,
    Action,
}

impl NodeGroup {
    pub fn is_trigger(self) -> bool {
        matches!(self, Self::Trigger | Self::Schedule | Self::Webhook)
    }
}

/// A credential type a node may use.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialRequirement {
    pub name: String,
    pub required: bool,
}

/// Metadata describing a node type.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeTypeDescription {
    pub name: String,
    pub display_name: String,
    pub group: NodeGroup,
    /// Supported `typeVersion`s; empty accepts any.
    pub versions: Vec<u32>,
    pub description: String,
    /// Named input slots
    pub inputs: Vec<String>,
    /// Named output slots, in slot order
    pub outputs: Vec<String>,
    pub properties: Vec<ParameterSchema>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub credentials: Vec<CredentialRequirement>,
}

impl NodeTypeDescription {
    /// Version 1 with one `main` input and one `main` output.
    pub fn new(name: &str, display_name: &str, group: NodeGroup) -> Self {
        Self {
            name: name.to_string(),
            display_name: display_name.to_string(),
            group,
            versions: vec![1],
            description: String::new(),
            inputs: vec![MAIN_CONNECTION.to_string()],
            outputs: vec![MAIN_CONNECTION.to_string()],
            properties: Vec::new(),
            credentials: Vec::new(),
        }
    }

    pub fn versions(mut self, versions: &[u32]) -> Self {
        self.versions = versions.to_vec();
        self
    }

    pub fn describe(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    pub fn inputs(mut self, inputs: &[&str]) -> Self {
        self.inputs = inputs.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn outputs(mut self, outputs: &[&str]) -> Self {
        self.outputs = outputs.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn property(mut self, schema: ParameterSchema) -> Self {
        self.properties.push(schema);
        self
    }

    pub fn credential(mut self, name: &str, required: bool) -> Self {
        self.credentials.push(CredentialRequirement {
            name: name.to_string(),
            required,
        });
        self
    }

    pub fn supports_version(&self, version: u32) -> bool {
        self.versions.is_empty() || self.versions.contains(&version)
    }
}

/// Common supertrait of every node behavior.
pub trait NodeType: Send + Sync {
    fn description(&self) -> &NodeTypeDescription;
}

/// Pull transform run by the scheduler: input batches in, one batch per
/// output slot out.
#[async_trait]
pub trait ExecuteNode: NodeType {
    async fn execute(&self, ctx: &ExecuteContext<'_>) -> Result<NodeOutput>;
}

/// Long-lived listener that starts a fresh run for every emitted batch.
#[async_trait]
pub trait TriggerNode: NodeType {
    async fn trigger(&self, ctx: TriggerContext) -> Result<TriggerHandle>;
}

/// Method and path a webhook node listens on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookRoute {
    pub method: String,
    pub path: String,
}

impl WebhookRoute {
    pub fn matches(&self, method: &str, path: &str) -> bool {
        self.method.eq_ignore_ascii_case(method)
            && self.path.trim_matches('/') == path.trim_matches('/')
    }
}

/// Node bound to inbound request/response pairs.
#[async_trait]
pub trait WebhookNode: NodeType {
    fn route(&self, ctx: &WebhookContext<'_>) -> Result<WebhookRoute>;

    async fn webhook(&self, ctx: &WebhookContext<'_>, request: &WebhookRequest)
        -> Result<WebhookReply>;
}

/// The behavior a registered node type provides.
#[derive(Clone)]
pub enum NodeImplementation {
    Execute(Arc<dyn ExecuteNode>),
    Trigger(Arc<dyn TriggerNode>),
    Webhook(Arc<dyn WebhookNode>),
}

impl NodeImplementation {
    pub fn description(&self) -> &NodeTypeDescription {
        match self {
            Self::Execute(node) => node.description(),
            Self::Trigger(node) => node.description(),
            Self::Webhook(node) => node.description(),
        }
    }
}

/// Running trigger listener. Dispose it to stop emitting.
pub struct TriggerHandle {
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl TriggerHandle {
    pub fn new(cancel: CancellationToken, task: Option<JoinHandle<()>>) -> Self {
        Self { cancel, task }
    }

    pub async fn dispose(self) {
        self.cancel.cancel();
        if let Some(task) = self.task {
            if let Err(e) = task.await {
                if e.is_panic() {
                    warn!(error = %e, "Trigger task panicked");
                }
            }
        }
    }
}

/// Inbound HTTP request handed to a webhook node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WebhookRequest {
    pub method: String,
    pub path: String,
    #[serde(default)]
    pub headers: serde_json::Map<String, Value>,
    #[serde(default)]
    pub query: serde_json::Map<String, Value>,
    #[serde(default)]
    pub body: Value,
}

/// When a webhook answers its caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum WebhookResponseMode {
    /// Answer as soon as the request is accepted.
    OnReceived,
    /// Answer with the first item of the last node that ran.
    LastNode,
}

/// What a webhook node decided to do with a request.
#[derive(Debug, Clone, PartialEq)]
pub struct WebhookReply {
    /// Items seeding a run; `None` answers without starting one.
    pub workflow_data: Option<ItemBatch>,
    pub response_mode: WebhookResponseMode,
    pub response_code: u16,
    /// Body sent back in `OnReceived` mode.
    pub response_body: Option<Value>,
}

/// Response returned to the webhook caller.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WebhookResponse {
    pub status: u16,
    pub body: Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_groups_flag_triggers() {
        assert!(NodeGroup::Trigger.is_trigger());
        assert!(NodeGroup::Schedule.is_trigger());
        assert!(NodeGroup::Webhook.is_trigger());
        assert!(!NodeGroup::Transform.is_trigger());
        assert!(!NodeGroup::Action.is_trigger());
    }

    #[test]
    fn test_description_builder() {
        let description = NodeTypeDescription::new("if", "If", NodeGroup::Transform)
            .versions(&[1, 2])
            .outputs(&["true", "false"])
            .property(ParameterSchema::boolean("ignoreCase", false));
        assert!(description.supports_version(2));
        assert!(!description.supports_version(3));
        assert_eq!(description.outputs, vec!["true", "false"]);

        let value = serde_json::to_value(&description).unwrap();
        assert_eq!(value["displayName"], "If");
        assert_eq!(value["group"], "transform");
        assert_eq!(value["properties"][0]["type"], "boolean");
    }

    #[test]
    fn test_route_matching_ignores_slashes_and_case() {
        let route = WebhookRoute {
            method: "POST".into(),
            path: "/hooks/new".into(),
        };
        assert!(route.matches("post", "hooks/new/"));
        assert!(!route.matches("GET", "hooks/new"));
        assert!(!route.matches("POST", "hooks/other"));
    }
}
