//! Active workflows: trigger listeners and webhook routes that start runs.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde_json::{json, Value};
use tokio::sync::{broadcast, mpsc};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::executor::{RunOptions, WorkflowExecutor};
use super::run_data::{ExecutionMode, RunRecord};
use crate::error::{Error, Result};
use crate::metrics;
use crate::nodes::{
    NodeImplementation, TriggerContext, TriggerEmitter, TriggerEvent, TriggerHandle,
    WebhookContext, WebhookNode, WebhookRequest, WebhookResponse, WebhookResponseMode,
    WebhookRoute,
};
use crate::workflow::{WorkflowDefinition, WorkflowGraph};

const RUN_CHANNEL_CAPACITY: usize = 64;

static ACTIVE_WORKFLOWS: AtomicUsize = AtomicUsize::new(0);

struct WebhookBinding {
    node: String,
    route: WebhookRoute,
    behavior: Arc<dyn WebhookNode>,
}

/// A workflow whose trigger and webhook nodes are live.
///
/// Every trigger emission and webhook request starts an independent run
/// with a fresh run record. Finished records are published to subscribers.
pub struct ActiveWorkflow {
    workflow: Arc<WorkflowDefinition>,
    executor: Arc<WorkflowExecutor>,
    triggers: Vec<TriggerHandle>,
    webhooks: Vec<WebhookBinding>,
    webhook_runs: mpsc::UnboundedSender<TriggerEvent>,
    runs: broadcast::Sender<RunRecord>,
    cancel: CancellationToken,
    dispatcher: JoinHandle<()>,
}

impl ActiveWorkflow {
    /// Start every trigger listener and bind every webhook route.
    ///
    /// Fails without leaving listeners behind when the workflow is invalid
    /// or a trigger cannot start.
    pub async fn activate(
        executor: Arc<WorkflowExecutor>,
        workflow: WorkflowDefinition,
    ) -> Result<Self> {
        let graph = WorkflowGraph::from_definition(&workflow)?;
        let registry = Arc::clone(executor.registry());
        for (_, node) in graph.nodes() {
            registry.resolve(node)?;
        }

        let workflow = Arc::new(workflow);
        let cancel = CancellationToken::new();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (webhook_tx, webhook_rx) = mpsc::unbounded_channel();
        let (runs, _) = broadcast::channel(RUN_CHANNEL_CAPACITY);

        let mut triggers = Vec::new();
        let mut webhooks = Vec::new();
        for (_, node) in graph.nodes().filter(|(_, node)| !node.disabled) {
            match registry.resolve(node)? {
                NodeImplementation::Trigger(behavior) => {
                    let ctx = TriggerContext {
                        node: node.clone(),
                        workflow: Arc::clone(&workflow),
                        services: Arc::clone(executor.services()),
                        emitter: TriggerEmitter::new(&node.name, events_tx.clone()),
                        cancel: cancel.child_token(),
                    };
                    match behavior.trigger(ctx).await {
                        Ok(handle) => triggers.push(handle),
                        Err(e) => {
                            warn!(node = %node.name, error = %e, "Trigger failed to start");
                            dispose_all(triggers).await;
                            return Err(e);
                        }
                    }
                }
                NodeImplementation::Webhook(behavior) => {
                    let ctx = WebhookContext {
                        node,
                        workflow: &workflow,
                        services: executor.services(),
                    };
                    let route = match behavior.route(&ctx) {
                        Ok(route) => route,
                        Err(e) => {
                            dispose_all(triggers).await;
                            return Err(e);
                        }
                    };
                    debug!(node = %node.name, method = %route.method, path = %route.path, "Webhook registered");
                    webhooks.push(WebhookBinding {
                        node: node.name.clone(),
                        route,
                        behavior: Arc::clone(behavior),
                    });
                }
                NodeImplementation::Execute(_) => {}
            }
        }
        // Only listeners hold trigger senders now; the channel closes when they stop.
        drop(events_tx);

        let dispatcher = tokio::spawn(dispatch(
            Arc::clone(&executor),
            Arc::clone(&workflow),
            events_rx,
            webhook_rx,
            runs.clone(),
            cancel.clone(),
        ));

        let active = ACTIVE_WORKFLOWS.fetch_add(1, Ordering::SeqCst) + 1;
        metrics::set_active_workflows(active);
        info!(
            "Activated workflow '{}' with {} trigger(s) and {} webhook(s)",
            workflow.name,
            triggers.len(),
            webhooks.len()
        );

        Ok(Self {
            workflow,
            executor,
            triggers,
            webhooks,
            webhook_runs: webhook_tx,
            runs,
            cancel,
            dispatcher,
        })
    }

    pub fn workflow(&self) -> &WorkflowDefinition {
        &self.workflow
    }

    /// Receive the record of every run this workflow starts from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<RunRecord> {
        self.runs.subscribe()
    }

    pub fn routes(&self) -> Vec<&WebhookRoute> {
        self.webhooks.iter().map(|binding| &binding.route).collect()
    }

    /// Name of the webhook node bound to `method` and `path`.
    pub fn find_webhook(&self, method: &str, path: &str) -> Option<&str> {
        self.binding(method, path).map(|binding| binding.node.as_str())
    }

    fn binding(&self, method: &str, path: &str) -> Option<&WebhookBinding> {
        self.webhooks
            .iter()
            .find(|binding| binding.route.matches(method, path))
    }

    /// Answer an inbound request.
    ///
    /// In `onReceived` mode the run starts in the background and the
    /// configured body is returned at once. In `lastNode` mode the run is
    /// awaited and the first item of the last node that ran is returned.
    pub async fn handle_webhook(&self, request: WebhookRequest) -> Result<WebhookResponse> {
        let binding = self.binding(&request.method, &request.path).ok_or_else(|| {
            Error::Engine(format!(
                "No webhook registered for {} /{}",
                request.method.to_uppercase(),
                request.path.trim_matches('/')
            ))
        })?;
        let node = self
            .workflow
            .get_node(&binding.node)
            .ok_or_else(|| Error::Engine(format!("Webhook node '{}' not found", binding.node)))?;
        let ctx = WebhookContext {
            node,
            workflow: &self.workflow,
            services: self.executor.services(),
        };
        let reply = binding.behavior.webhook(&ctx, &request).await?;

        let Some(items) = reply.workflow_data else {
            return Ok(WebhookResponse {
                status: reply.response_code,
                body: reply.response_body.unwrap_or(Value::Null),
            });
        };
        metrics::record_trigger_emit(&node.node_type);
        let event = TriggerEvent {
            node: binding.node.clone(),
            items,
        };

        match reply.response_mode {
            WebhookResponseMode::OnReceived => {
                self.webhook_runs
                    .send(event)
                    .map_err(|_| Error::Engine("Workflow is being deactivated".to_string()))?;
                Ok(WebhookResponse {
                    status: reply.response_code,
                    body: reply.response_body.unwrap_or(Value::Null),
                })
            }
            WebhookResponseMode::LastNode => {
                let record = start_run(
                    &self.executor,
                    &self.workflow,
                    event,
                    ExecutionMode::Webhook,
                    &self.runs,
                    self.cancel.child_token(),
                )
                .await?;
                Ok(last_node_response(&record, reply.response_code))
            }
        }
    }

    /// Stop every listener and wait for runs in progress to wind down.
    pub async fn deactivate(self) {
        self.cancel.cancel();
        dispose_all(self.triggers).await;
        if let Err(e) = self.dispatcher.await {
            warn!(error = %e, "Run dispatcher stopped abnormally");
        }
        let active = ACTIVE_WORKFLOWS
            .fetch_sub(1, Ordering::SeqCst)
            .saturating_sub(1);
        metrics::set_active_workflows(active);
        info!("Deactivated workflow '{}'", self.workflow.name);
    }
}

async fn dispose_all(handles: Vec<TriggerHandle>) {
    for handle in handles {
        handle.dispose().await;
    }
}

/// Start a run for every trigger event and background webhook request.
async fn dispatch(
    executor: Arc<WorkflowExecutor>,
    workflow: Arc<WorkflowDefinition>,
    mut trigger_events: mpsc::UnboundedReceiver<TriggerEvent>,
    mut webhook_events: mpsc::UnboundedReceiver<TriggerEvent>,
    runs: broadcast::Sender<RunRecord>,
    cancel: CancellationToken,
) {
    let mut tasks = JoinSet::new();
    loop {
        let (event, mode) = tokio::select! {
            _ = cancel.cancelled() => break,
            Some(event) = trigger_events.recv() => (event, ExecutionMode::Trigger),
            Some(event) = webhook_events.recv() => (event, ExecutionMode::Webhook),
            Some(_) = tasks.join_next(), if !tasks.is_empty() => continue,
        };
        let executor = Arc::clone(&executor);
        let workflow = Arc::clone(&workflow);
        let runs = runs.clone();
        let cancel = cancel.child_token();
        tasks.spawn(async move {
            // Failures are logged inside; the record is published to subscribers.
            let _ = start_run(&executor, &workflow, event, mode, &runs, cancel).await;
        });
    }
    while tasks.join_next().await.is_some() {}
}

async fn start_run(
    executor: &WorkflowExecutor,
    workflow: &WorkflowDefinition,
    event: TriggerEvent,
    mode: ExecutionMode,
    runs: &broadcast::Sender<RunRecord>,
    cancel: CancellationToken,
) -> Result<RunRecord> {
    let options = RunOptions {
        start_nodes: vec![event.node.clone()],
        mode,
        cancel: Some(cancel),
        ..RunOptions::default()
    };
    match executor.execute(workflow, Some(event.items), options).await {
        Ok(record) => {
            // No subscribers is fine.
            let _ = runs.send(record.clone());
            Ok(record)
        }
        Err(e) => {
            error!(node = %event.node, error = %e, "Could not start run");
            Err(e)
        }
    }
}

fn last_node_response(record: &RunRecord, status: u16) -> WebhookResponse {
    match &record.error {
        Some(err) => WebhookResponse {
            status: 500,
            body: json!({ "message": "Error in workflow", "error": err.message }),
        },
        None => WebhookResponse {
            status,
            body: record
                .last_output()
                .first()
                .map(|item| item.json_value())
                .unwrap_or_else(|| json!({})),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::engine::ExecutionStatus;
    use crate::nodes::{NodeRegistry, Services};
    use crate::workflow::parse_workflow;
    use std::time::Duration;

    fn executor() -> Arc<WorkflowExecutor> {
        Arc::new(WorkflowExecutor::new(
            Arc::new(NodeRegistry::new()),
            Arc::new(Services::default()),
            EngineConfig::default(),
        ))
    }

    fn webhook_workflow(mode: &str) -> WorkflowDefinition {
        parse_workflow(&format!(
            r#"
name: orders
nodes:
  - name: Hook
    type: webhook
    parameters:
      path: orders
      httpMethod: POST
      responseMode: {mode}
  - name: Total
    type: set
    parameters:
      keepOnlySet: true
      fields:
        - name: total
          type: number
          value: "={{{{ $json.body.amount * 2 }}}}"
connections:
  Hook:
    main:
      - - node: Total
"#
        ))
        .unwrap()
    }

    fn order() -> WebhookRequest {
        WebhookRequest {
            method: "POST".into(),
            path: "/orders".into(),
            body: json!({"amount": 21}),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_webhook_last_node_mode_returns_output() {
        let active = ActiveWorkflow::activate(executor(), webhook_workflow("lastNode"))
            .await
            .unwrap();
        assert_eq!(active.find_webhook("post", "orders"), Some("Hook"));
        assert_eq!(active.find_webhook("GET", "orders"), None);

        let response = active.handle_webhook(order()).await.unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.body, json!({"total": 42}));
        active.deactivate().await;
    }

    #[tokio::test]
    async fn test_webhook_on_received_runs_in_background() {
        let active = ActiveWorkflow::activate(executor(), webhook_workflow("onReceived"))
            .await
            .unwrap();
        let mut runs = active.subscribe();

        let response = active.handle_webhook(order()).await.unwrap();
        assert_eq!(response.body, json!({"message": "Workflow was started"}));

        let record = tokio::time::timeout(Duration::from_secs(5), runs.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.mode, ExecutionMode::Webhook);
        assert_eq!(record.status, ExecutionStatus::Completed);
        assert_eq!(record.node_output("Total", 0)[0].json["total"], json!(42));
        active.deactivate().await;
    }

    #[tokio::test]
    async fn test_unknown_route_is_rejected() {
        let active = ActiveWorkflow::activate(executor(), webhook_workflow("lastNode"))
            .await
            .unwrap();
        let request = WebhookRequest {
            path: "missing".into(),
            ..order()
        };
        let err = active.handle_webhook(request).await.unwrap_err();
        assert!(err.to_string().contains("No webhook registered"));
        active.deactivate().await;
    }

    #[tokio::test]
    async fn test_interval_trigger_starts_runs_until_deactivated() {
        let workflow = parse_workflow(
            r#"
name: ticker
nodes:
  - name: Every
    type: interval
    parameters:
      interval: 20
      unit: milliseconds
  - name: Stamp
    type: set
    parameters:
      fields:
        - name: seen
          type: boolean
          value: true
connections:
  Every:
    main:
      - - node: Stamp
"#,
        )
        .unwrap();

        let active = ActiveWorkflow::activate(executor(), workflow).await.unwrap();
        let mut runs = active.subscribe();
        let record = tokio::time::timeout(Duration::from_secs(5), runs.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.mode, ExecutionMode::Trigger);
        let stamped = &record.node_output("Stamp", 0)[0];
        assert_eq!(stamped.json["seen"], json!(true));
        assert!(stamped.json.contains_key("timestamp"));

        active.deactivate().await;
        loop {
            match runs.recv().await {
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    #[tokio::test]
    async fn test_activation_fails_for_bad_trigger() {
        let workflow = parse_workflow(
            r#"
name: broken
nodes:
  - name: Every
    type: interval
    parameters:
      interval: 0
"#,
        )
        .unwrap();
        assert!(ActiveWorkflow::activate(executor(), workflow).await.is_err());
    }
}
