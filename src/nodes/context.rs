//! Contexts handed to node behaviors.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::{json, Map, Value};
use tokio::sync::{mpsc, MutexGuard};
use tokio_util::sync::CancellationToken;

use super::parameters::ParameterResolver;
use super::services::{CredentialData, Services};
use super::types::NodeTypeDescription;
use crate::engine::{DataProxy, ExecutionMode, RunView, StaticDataHandle};
use crate::error::{Error, NodeErrorInfo, Result};
use crate::expression::{render_template, ItemScope};
use crate::workflow::{Item, ItemBatch, NodeDefinition, WorkflowDefinition};

/// Everything an execute behavior may read during one activation.
pub struct ExecuteContext<'a> {
    run: RunView<'a>,
    node: &'a NodeDefinition,
    description: &'a NodeTypeDescription,
    inputs: Vec<ItemBatch>,
    previous_node: Option<String>,
    services: &'a Services,
    static_data: StaticDataHandle,
    cancel: CancellationToken,
}

impl<'a> ExecuteContext<'a> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        run: RunView<'a>,
        node: &'a NodeDefinition,
        description: &'a NodeTypeDescription,
        inputs: Vec<ItemBatch>,
        previous_node: Option<String>,
        services: &'a Services,
        static_data: StaticDataHandle,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            run,
            node,
            description,
            inputs,
            previous_node,
            services,
            static_data,
            cancel,
        }
    }

    /// Items delivered on an input slot; empty when nothing arrived.
    pub fn get_input_data(&self, input: usize) -> &[Item] {
        self.inputs.get(input).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn input_count(&self) -> usize {
        self.inputs.len()
    }

    fn proxy(&self, item_index: usize) -> DataProxy<'_> {
        DataProxy::new(self.run, self.get_input_data(0), item_index)
            .with_previous_node(self.previous_node.as_deref())
    }

    fn resolver(&self, item_index: usize) -> ParameterResolver<'_> {
        ParameterResolver::new(
            &self.node.name,
            &self.description.properties,
            &self.node.parameters,
            item_index,
        )
    }

    /// Resolve one parameter for an item.
    ///
    /// Hidden or unset parameters yield `fallback`; without one that is an error.
    pub fn get_node_parameter(
        &self,
        name: &str,
        item_index: usize,
        fallback: Option<Value>,
    ) -> Result<Value> {
        let resolved = self.resolver(item_index).resolve(name, &self.proxy(item_index))?;
        match resolved.or(fallback) {
            Some(value) => Ok(value),
            None => Err(Error::node_item(
                &self.node.name,
                format!("Could not get parameter '{}'", name),
                item_index,
            )),
        }
    }

    /// Every visible parameter resolved for an item.
    pub fn get_parameters(&self, item_index: usize) -> Result<Map<String, Value>> {
        self.resolver(item_index).resolve_all(&self.proxy(item_index))
    }

    /// Resolved parameters deserialized into a node's config struct.
    pub fn get_parameters_as<T: DeserializeOwned>(&self, item_index: usize) -> Result<T> {
        let parameters = self.get_parameters(item_index)?;
        serde_json::from_value(Value::Object(parameters)).map_err(|e| {
            Error::node_item(
                &self.node.name,
                format!("Invalid parameters: {}", e),
                item_index,
            )
        })
    }

    /// Render an ad hoc template against an item.
    pub fn evaluate_expression(&self, text: &str, item_index: usize) -> Result<Value> {
        render_template(text, &self.proxy(item_index))
    }

    pub fn continue_on_fail(&self) -> bool {
        self.node.continue_on_fail
    }

    /// Decrypted credential configured on this node for `credential_type`.
    pub async fn get_credentials(&self, credential_type: &str) -> Result<CredentialData> {
        let reference = self.node.credentials.get(credential_type).ok_or_else(|| {
            Error::Credential(format!(
                "Node '{}' has no credentials of type '{}' configured",
                self.node.name, credential_type
            ))
        })?;
        self.services
            .credentials
            .get(credential_type, reference.key())
            .await?
            .ok_or_else(|| {
                Error::Credential(format!(
                    "Credential '{}' of type '{}' not found",
                    reference.key(),
                    credential_type
                ))
            })
    }

    pub fn services(&self) -> &Services {
        self.services
    }

    /// Exclusive access to the workflow's static data for the guard's lifetime.
    pub async fn static_data(&self) -> MutexGuard<'_, Map<String, Value>> {
        self.static_data.lock().await
    }

    pub fn node(&self) -> &NodeDefinition {
        self.node
    }

    pub fn workflow(&self) -> &WorkflowDefinition {
        self.run.workflow
    }

    pub fn execution_id(&self) -> &str {
        self.run.execution_id
    }

    pub fn mode(&self) -> ExecutionMode {
        self.run.mode
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Shorthand for an error attributed to this node and an item.
    pub fn node_error(&self, message: impl Into<String>, item_index: usize) -> Error {
        Error::node_item(&self.node.name, message, item_index)
    }

    /// Output item standing in for an input item that failed.
    pub fn error_item(&self, err: &Error, item_index: usize) -> Item {
        error_item(&self.node.name, err, item_index)
    }
}

/// Item carrying `{error: message}` plus the error details for `node`.
pub(crate) fn error_item(node: &str, err: &Error, item_index: usize) -> Item {
    let mut item = Item::from_value(json!({ "error": err.message() }));
    item.error = Some(NodeErrorInfo::from_error(err).with_node(node));
    item.with_paired_item(item_index)
}

/// Resolve a parameter without any item data, for triggers and webhooks.
fn resolve_static(
    node: &NodeDefinition,
    workflow: &WorkflowDefinition,
    description: &NodeTypeDescription,
    name: &str,
    fallback: Option<Value>,
) -> Result<Value> {
    let scope = ItemScope::default().with_variable(
        "$workflow",
        json!({ "id": workflow.id, "name": workflow.name, "active": workflow.active }),
    );
    let resolved = ParameterResolver::new(&node.name, &description.properties, &node.parameters, 0)
        .resolve(name, &scope)?;
    resolved
        .or(fallback)
        .ok_or_else(|| Error::node(&node.name, format!("Could not get parameter '{}'", name)))
}

/// A batch emitted by a trigger node.
#[derive(Debug, Clone)]
pub struct TriggerEvent {
    pub node: String,
    pub items: ItemBatch,
}

/// Sending half trigger nodes emit through.
#[derive(Debug, Clone)]
pub struct TriggerEmitter {
    node: String,
    tx: mpsc::UnboundedSender<TriggerEvent>,
}

impl TriggerEmitter {
    pub fn new(node: &str, tx: mpsc::UnboundedSender<TriggerEvent>) -> Self {
        Self {
            node: node.to_string(),
            tx,
        }
    }

    /// Start a run with `items`. Returns false once the workflow is deactivated.
    pub fn emit(&self, items: ItemBatch) -> bool {
        self.tx
            .send(TriggerEvent {
                node: self.node.clone(),
                items,
            })
            .is_ok()
    }
}

/// Owned context a trigger listener keeps for its lifetime.
pub struct TriggerContext {
    pub node: NodeDefinition,
    pub workflow: Arc<WorkflowDefinition>,
    pub services: Arc<Services>,
    pub emitter: TriggerEmitter,
    pub cancel: CancellationToken,
}

impl TriggerContext {
    pub fn get_node_parameter(
        &self,
        description: &NodeTypeDescription,
        name: &str,
        fallback: Option<Value>,
    ) -> Result<Value> {
        resolve_static(&self.node, &self.workflow, description, name, fallback)
    }
}

/// Context for routing and answering one webhook request.
pub struct WebhookContext<'a> {
    pub node: &'a NodeDefinition,
    pub workflow: &'a WorkflowDefinition,
    pub services: &'a Services,
}

impl WebhookContext<'_> {
    pub fn get_node_parameter(
        &self,
        description: &NodeTypeDescription,
        name: &str,
        fallback: Option<Value>,
    ) -> Result<Value> {
        resolve_static(self.node, self.workflow, description, name, fallback)
    }
}

/// Owned run state for driving node behaviors in unit tests.
#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::engine::{RunData, StaticDataStore, TaskResult, TaskStatus};
    use crate::workflow::{parse_workflow, WorkflowGraph};

    pub(crate) struct Harness {
        pub workflow: WorkflowDefinition,
        pub graph: WorkflowGraph,
        pub run_data: RunData,
        pub services: Services,
        pub static_data: StaticDataStore,
        pub node_name: String,
    }

    impl Harness {
        /// Single-node workflow around `node`.
        pub fn new(node: NodeDefinition) -> Self {
            let mut workflow = parse_workflow("name: harness\nnodes: []\n").unwrap();
            workflow.nodes.push(node.clone());
            let graph = WorkflowGraph::from_definition(&workflow).unwrap();
            Self {
                workflow,
                graph,
                run_data: RunData::new(),
                services: Services::default(),
                static_data: StaticDataStore::new(),
                node_name: node.name,
            }
        }

        pub fn with_services(mut self, services: Services) -> Self {
            self.services = services;
            self
        }

        /// Record a finished upstream node so expressions can reference it.
        pub fn with_node_output(mut self, name: &str, items: ItemBatch) -> Self {
            self.workflow
                .nodes
                .push(NodeDefinition::new(name, "noOp"));
            self.graph = WorkflowGraph::from_definition(&self.workflow).unwrap();
            self.run_data.insert(
                name.to_string(),
                vec![TaskResult {
                    start_time: chrono::Utc::now(),
                    execution_time_ms: 0,
                    status: TaskStatus::Success,
                    data: Some(vec![items]),
                    error: None,
                    source: Vec::new(),
                    attempts: 1,
                    pinned: false,
                }],
            );
            self
        }

        pub fn context<'a>(
            &'a self,
            description: &'a NodeTypeDescription,
            inputs: Vec<ItemBatch>,
        ) -> ExecuteContext<'a> {
            let node = self.graph.get_node(&self.node_name).unwrap();
            ExecuteContext::new(
                RunView {
                    workflow: &self.workflow,
                    graph: &self.graph,
                    run_data: &self.run_data,
                    execution_id: "test-execution",
                    mode: ExecutionMode::Manual,
                    timezone: chrono_tz::Tz::UTC,
                },
                node,
                description,
                inputs,
                None,
                &self.services,
                self.static_data.handle(self.workflow.key(), None),
                CancellationToken::new(),
            )
        }
    }

    pub(crate) fn items(values: Vec<Value>) -> ItemBatch {
        values.into_iter().map(Item::from_value).collect()
    }
}
