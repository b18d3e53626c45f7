//! Workflow executor.
//!
//! One call to [`WorkflowExecutor::execute`] is one run: the graph is
//! validated, every node type is resolved, and activations are popped from a
//! FIFO queue one at a time. A node is queued once every incoming connection
//! inside the run has delivered data or closed empty.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn, Span};

use super::proxy::RunView;
use super::run_data::{
    ExecutionMode, ExecutionStatus, RunData, RunError, RunRecord, SourceRef, TaskResult,
    TaskStatus,
};
use super::static_data::{StaticDataHandle, StaticDataStore};
use crate::config::EngineConfig;
use crate::error::{Error, NodeErrorInfo, Result};
use crate::metrics;
use crate::nodes::{error_item, ExecuteContext, ExecuteNode, NodeImplementation, NodeRegistry, Services};
use crate::workflow::{
    Item, ItemBatch, NodeDefinition, NodeId, NodeOutput, WorkflowDefinition, WorkflowGraph,
};

/// Upper bound on `maxTries`.
const MAX_TRIES: u32 = 5;
/// Upper bound on `waitBetweenTries` (ms).
const MAX_RETRY_WAIT_MS: u64 = 5_000;

/// Per-run options.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Run only this node and its ancestors.
    pub destination_node: Option<String>,
    /// Output to use instead of running a node, keyed by node name.
    /// Takes priority over the workflow's own pin data.
    pub pin_data: BTreeMap<String, ItemBatch>,
    /// Start from these nodes instead of the triggers or roots.
    pub start_nodes: Vec<String>,
    pub mode: ExecutionMode,
    /// Abort signal, checked between activations and visible to nodes.
    pub cancel: Option<CancellationToken>,
}

impl RunOptions {
    pub fn new(mode: ExecutionMode) -> Self {
        Self {
            mode,
            ..Self::default()
        }
    }

    pub fn with_destination(mut self, node: &str) -> Self {
        self.destination_node = Some(node.to_string());
        self
    }

    pub fn with_start_nodes(mut self, nodes: &[&str]) -> Self {
        self.start_nodes = nodes.iter().map(|n| n.to_string()).collect();
        self
    }

    pub fn with_pin_data(mut self, node: &str, items: ItemBatch) -> Self {
        self.pin_data.insert(node.to_string(), items);
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }
}

/// Outcome of running one node behavior.
struct NodeRun {
    output: Result<NodeOutput>,
    attempts: u32,
    pinned: bool,
}

/// Activation bookkeeping for one run, indexed by [`NodeId`].
struct Scheduler {
    in_run: Vec<bool>,
    /// In-run incoming connections that have not delivered yet.
    awaiting: Vec<usize>,
    scheduled: Vec<bool>,
    has_data: Vec<bool>,
    inputs: Vec<Vec<ItemBatch>>,
    sources: Vec<Vec<SourceRef>>,
    queue: VecDeque<NodeId>,
}

impl Scheduler {
    /// Plan a run from `start`, limited to `allowed` when set.
    fn new(
        graph: &WorkflowGraph,
        start: &[NodeId],
        allowed: Option<&HashSet<NodeId>>,
        seed: &ItemBatch,
    ) -> Self {
        let len = graph.len();
        let permitted = |id: NodeId| allowed.map_or(true, |set| set.contains(&id));

        let mut in_run = vec![false; len];
        let mut stack: Vec<NodeId> = start.to_vec();
        while let Some(id) = stack.pop() {
            if in_run[id.index()] || !permitted(id) {
                continue;
            }
            in_run[id.index()] = true;
            stack.extend(graph.outgoing(id).map(|c| c.target));
        }

        let mut awaiting = vec![0; len];
        for (id, _) in graph.nodes() {
            if in_run[id.index()] {
                awaiting[id.index()] = graph
                    .incoming(id)
                    .filter(|c| in_run[c.source.index()])
                    .count();
            }
        }

        let mut scheduler = Self {
            in_run,
            awaiting,
            scheduled: vec![false; len],
            has_data: vec![false; len],
            inputs: vec![Vec::new(); len],
            sources: vec![Vec::new(); len],
            queue: VecDeque::new(),
        };
        for &id in start {
            let index = id.index();
            scheduler.awaiting[index] = 0;
            scheduler.scheduled[index] = true;
            scheduler.has_data[index] = true;
            scheduler.inputs[index] = vec![seed.clone()];
            scheduler.queue.push_back(id);
        }
        scheduler
    }

    /// Hand a finished node's output to its children. Children left without
    /// any data are skipped and close their own outputs in turn.
    fn deliver(&mut self, graph: &WorkflowGraph, source: NodeId, output: &[ItemBatch]) {
        let mut skipped = Vec::new();
        self.deliver_from(graph, source, output, &mut skipped);
        while let Some(id) = skipped.pop() {
            debug!(node = %graph.node(id).name, "No input data, skipping node");
            self.deliver_from(graph, id, &[], &mut skipped);
        }
    }

    fn deliver_from(
        &mut self,
        graph: &WorkflowGraph,
        source: NodeId,
        output: &[ItemBatch],
        skipped: &mut Vec<NodeId>,
    ) {
        for connection in graph.outgoing(source) {
            let target = connection.target.index();
            if !self.in_run[target] || self.scheduled[target] {
                continue;
            }
            if let Some((batch, needed)) = output
                .get(connection.source_output)
                .filter(|batch| !batch.is_empty())
                .zip(connection.target_input.checked_add(1))
            {
                let slots = &mut self.inputs[target];
                if slots.len() < needed {
                    slots.resize_with(needed, Vec::new);
                }
                slots[connection.target_input].extend(batch.iter().cloned());
                self.has_data[target] = true;
                self.sources[target].push(SourceRef {
                    previous_node: graph.node(source).name.clone(),
                    previous_node_output: connection.source_output,
                    input: connection.target_input,
                });
            }

            self.awaiting[target] = self.awaiting[target].saturating_sub(1);
            if self.awaiting[target] == 0 {
                self.scheduled[target] = true;
                if self.has_data[target] {
                    self.queue.push_back(connection.target);
                } else {
                    skipped.push(connection.target);
                }
            }
        }
    }
}

/// Runs workflows against a node registry and shared services.
///
/// Cheap to share behind an `Arc`; concurrent runs only share the registry,
/// the services and the static data store.
pub struct WorkflowExecutor {
    registry: Arc<NodeRegistry>,
    services: Arc<Services>,
    config: EngineConfig,
    static_data: StaticDataStore,
}

impl WorkflowExecutor {
    pub fn new(registry: Arc<NodeRegistry>, services: Arc<Services>, config: EngineConfig) -> Self {
        Self {
            registry,
            services,
            config,
            static_data: StaticDataStore::new(),
        }
    }

    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.registry
    }

    pub fn services(&self) -> &Arc<Services> {
        &self.services
    }

    /// Static data of every workflow this executor has run.
    pub fn static_data(&self) -> &StaticDataStore {
        &self.static_data
    }

    /// Execute a workflow.
    ///
    /// Returns `Err` when the run cannot start (invalid graph, unknown node
    /// type, no start node). Failures during the run are reported in the
    /// returned record.
    #[instrument(
        name = "workflow.execute",
        skip(self, workflow, seed, options),
        fields(
            workflow_name = %workflow.name,
            mode = %options.mode,
            execution_id = tracing::field::Empty,
        )
    )]
    pub async fn execute(
        &self,
        workflow: &WorkflowDefinition,
        seed: Option<ItemBatch>,
        options: RunOptions,
    ) -> Result<RunRecord> {
        let graph = WorkflowGraph::from_definition(workflow).map_err(|e| {
            warn!(error = %e, "Workflow failed validation");
            e
        })?;
        let implementations = graph
            .nodes()
            .map(|(_, node)| self.registry.resolve(node).cloned())
            .collect::<Result<Vec<_>>>()?;
        let (start, allowed) = self.plan(&graph, &options)?;

        let execution_id = uuid::Uuid::new_v4().to_string();
        Span::current().record("execution_id", execution_id.as_str());
        info!(
            "Starting execution {} of workflow '{}' from {:?}",
            execution_id,
            workflow.name,
            start.iter().map(|id| graph.node(*id).name.as_str()).collect::<Vec<_>>()
        );

        let seed = seed.unwrap_or_else(|| vec![Item::default()]);
        let scheduler = Scheduler::new(&graph, &start, allowed.as_ref(), &seed);

        metrics::inc_active_runs();
        let started = Instant::now();
        let record = self
            .run(workflow, &graph, &implementations, scheduler, execution_id, options)
            .await;
        metrics::dec_active_runs();
        metrics::record_run(&record.status.to_string(), &record.mode.to_string());
        metrics::record_run_duration(started.elapsed(), &workflow.name);

        match &record.error {
            Some(err) => warn!(
                "Execution {} finished {}: {}",
                record.execution_id, record.status, err.message
            ),
            None => info!(
                "Execution {} finished {} in {:?}",
                record.execution_id,
                record.status,
                started.elapsed()
            ),
        }
        Ok(record)
    }

    /// Start nodes, plus the node set a destination run is limited to.
    fn plan(
        &self,
        graph: &WorkflowGraph,
        options: &RunOptions,
    ) -> Result<(Vec<NodeId>, Option<HashSet<NodeId>>)> {
        let allowed = match &options.destination_node {
            Some(name) => {
                let id = graph.node_id(name).ok_or_else(|| {
                    Error::Engine(format!("Destination node '{}' does not exist", name))
                })?;
                let mut set = graph.ancestor_ids(id);
                set.insert(id);
                Some(set)
            }
            None => None,
        };

        let candidates = if options.start_nodes.is_empty() {
            let triggers = graph.trigger_ids(&self.registry);
            if triggers.is_empty() {
                graph.root_ids()
            } else {
                triggers
            }
        } else {
            options
                .start_nodes
                .iter()
                .map(|name| {
                    graph.node_id(name).ok_or_else(|| {
                        Error::Engine(format!("Start node '{}' does not exist", name))
                    })
                })
                .collect::<Result<Vec<_>>>()?
        };

        let permitted = |id: &NodeId| allowed.as_ref().map_or(true, |set| set.contains(id));
        let mut start: Vec<NodeId> = candidates.into_iter().filter(permitted).collect();
        if start.is_empty() && allowed.is_some() {
            start = graph.root_ids().into_iter().filter(permitted).collect();
        }
        if start.is_empty() {
            return Err(Error::Engine(
                "Workflow has no node to start execution from".to_string(),
            ));
        }
        Ok((start, allowed))
    }

    /// Run timeout: the workflow setting when positive, else the engine default.
    fn timeout_seconds(&self, workflow: &WorkflowDefinition) -> Option<u64> {
        match workflow.settings.execution_timeout {
            Some(seconds) if seconds > 0 => Some(seconds as u64),
            _ => Some(self.config.execution_timeout_seconds).filter(|s| *s > 0),
        }
    }

    async fn run(
        &self,
        workflow: &WorkflowDefinition,
        graph: &WorkflowGraph,
        implementations: &[NodeImplementation],
        mut scheduler: Scheduler,
        execution_id: String,
        options: RunOptions,
    ) -> RunRecord {
        let started_at = Utc::now();
        let timezone = RunView::timezone_for(workflow);
        let static_data = self
            .static_data
            .handle(workflow.key(), workflow.static_data.as_ref());
        let cancel = options.cancel.clone().unwrap_or_else(CancellationToken::new);
        let deadline = self
            .timeout_seconds(workflow)
            .map(|secs| (tokio::time::Instant::now() + Duration::from_secs(secs), secs));

        let mut run_data = RunData::new();
        let mut last_node_executed = None;
        let mut activations = 0usize;

        let failure: Option<(Error, Option<String>)> = loop {
            let Some(id) = scheduler.queue.pop_front() else {
                break None;
            };
            if cancel.is_cancelled() {
                info!("Execution {} cancelled", execution_id);
                break Some((Error::Cancelled, None));
            }
            if let Some((at, secs)) = deadline {
                if tokio::time::Instant::now() >= at {
                    break Some((Error::Timeout(secs), None));
                }
            }
            activations += 1;
            if activations > self.config.max_activations {
                break Some((
                    Error::Engine(format!(
                        "Run exceeded the limit of {} node activations",
                        self.config.max_activations
                    )),
                    None,
                ));
            }

            let node = graph.node(id);
            let inputs = std::mem::take(&mut scheduler.inputs[id.index()]);
            let sources = std::mem::take(&mut scheduler.sources[id.index()]);
            let input_len = inputs.first().map_or(0, Vec::len);
            let previous_node = sources.first().map(|s| s.previous_node.clone());

            let run = RunView {
                workflow,
                graph,
                run_data: &run_data,
                execution_id: &execution_id,
                mode: options.mode,
                timezone,
            };
            let start_time = Utc::now();
            let node_started = Instant::now();
            let NodeRun {
                output,
                attempts,
                pinned,
            } = match with_deadline(
                deadline,
                self.run_node(
                    run,
                    node,
                    &implementations[id.index()],
                    inputs,
                    previous_node,
                    &options.pin_data,
                    &static_data,
                    &cancel,
                ),
            )
            .await
            {
                Ok(node_run) => node_run,
                Err(e) => NodeRun {
                    output: Err(e),
                    attempts: 1,
                    pinned: false,
                },
            };
            let elapsed = node_started.elapsed();
            metrics::record_node_duration(elapsed, &node.node_type);

            let mut task = TaskResult {
                start_time,
                execution_time_ms: elapsed.as_millis() as u64,
                status: TaskStatus::Success,
                data: None,
                error: None,
                source: sources,
                attempts,
                pinned,
            };
            last_node_executed = Some(node.name.clone());

            let output = match output {
                Ok(output) => output,
                Err(err) if node.continue_on_fail && !err.is_fatal_to_run() => {
                    warn!(node = %node.name, error = %err, "Node failed, continuing with error items");
                    let items = (0..input_len.max(1))
                        .map(|index| error_item(&node.name, &err, index))
                        .collect();
                    vec![items]
                }
                Err(err) => {
                    error!(node = %node.name, error = %err, "Node failed");
                    metrics::record_node_execution(&node.node_type, "error");
                    task.status = TaskStatus::Error;
                    task.error = Some(NodeErrorInfo::from_error(&err).with_node(&node.name));
                    run_data.entry(node.name.clone()).or_default().push(task);
                    break Some((err, Some(node.name.clone())));
                }
            };

            metrics::record_node_execution(&node.node_type, "success");
            debug!(
                node = %node.name,
                items = output.iter().map(Vec::len).sum::<usize>(),
                "Node completed"
            );
            scheduler.deliver(graph, id, &output);
            task.data = Some(output);
            run_data.entry(node.name.clone()).or_default().push(task);
        };

        let (status, error) = match failure {
            None => (ExecutionStatus::Completed, None),
            Some((err, node)) => {
                let status = match err {
                    Error::Cancelled => ExecutionStatus::Cancelled,
                    _ => ExecutionStatus::Failed,
                };
                (status, Some(RunError::from_error(&err, node.as_deref())))
            }
        };

        RunRecord {
            execution_id,
            workflow_id: workflow.id.clone(),
            workflow_name: workflow.name.clone(),
            mode: options.mode,
            status,
            run_data,
            last_node_executed,
            error,
            started_at,
            finished_at: Some(Utc::now()),
        }
    }

    #[allow(clippy::too_many_arguments)]
    #[instrument(
        name = "node.execute",
        skip_all,
        fields(node = %node.name, node_type = %node.node_type)
    )]
    async fn run_node(
        &self,
        run: RunView<'_>,
        node: &NodeDefinition,
        implementation: &NodeImplementation,
        mut inputs: Vec<ItemBatch>,
        previous_node: Option<String>,
        pin_data: &BTreeMap<String, ItemBatch>,
        static_data: &StaticDataHandle,
        cancel: &CancellationToken,
    ) -> Result<NodeRun> {
        if let Some(pinned) = pin_data
            .get(&node.name)
            .or_else(|| run.workflow.pin_data.get(&node.name))
        {
            debug!("Using pinned data for node '{}'", node.name);
            return Ok(NodeRun {
                output: Ok(vec![pinned.clone()]),
                attempts: 0,
                pinned: true,
            });
        }

        if node.disabled {
            debug!("Node '{}' is disabled, passing input through", node.name);
            return Ok(NodeRun {
                output: Ok(vec![inputs.into_iter().next().unwrap_or_default()]),
                attempts: 0,
                pinned: false,
            });
        }

        if node.execute_once {
            for batch in &mut inputs {
                batch.truncate(1);
            }
        }

        let (output, attempts) = match implementation {
            NodeImplementation::Execute(behavior) => {
                let ctx = ExecuteContext::new(
                    run,
                    node,
                    implementation.description(),
                    inputs,
                    previous_node,
                    &self.services,
                    Arc::clone(static_data),
                    cancel.clone(),
                );
                self.execute_with_retry(behavior.as_ref(), &ctx, node).await
            }
            // Triggers and webhooks start runs from outside; inside a run they
            // hand on the batch the run was seeded with.
            NodeImplementation::Trigger(_) | NodeImplementation::Webhook(_) => {
                let seed = inputs
                    .into_iter()
                    .next()
                    .filter(|batch| !batch.is_empty())
                    .unwrap_or_else(|| vec![Item::default()]);
                (Ok(vec![seed]), 1)
            }
        };

        let output = output.map(|output| {
            if node.always_output_data && output.iter().all(Vec::is_empty) {
                vec![vec![Item::default()]]
            } else {
                output
            }
        });
        Ok(NodeRun {
            output,
            attempts,
            pinned: false,
        })
    }

    async fn execute_with_retry(
        &self,
        behavior: &dyn ExecuteNode,
        ctx: &ExecuteContext<'_>,
        node: &NodeDefinition,
    ) -> (Result<NodeOutput>, u32) {
        let max_tries = if node.retry_on_fail {
            node.max_tries.clamp(1, MAX_TRIES)
        } else {
            1
        };
        let wait = Duration::from_millis(
            node.wait_between_tries
                .unwrap_or(self.config.default_retry_wait_ms)
                .min(MAX_RETRY_WAIT_MS),
        );

        let mut attempt = 1u32;
        loop {
            match behavior.execute(ctx).await {
                Ok(output) => return (Ok(output), attempt),
                Err(e) if attempt < max_tries && !e.is_fatal_to_run() => {
                    warn!(
                        "Node '{}' attempt {}/{} failed: {}. Retrying in {}ms",
                        node.name,
                        attempt,
                        max_tries,
                        e,
                        wait.as_millis()
                    );
                    metrics::record_node_retry(&node.node_type);
                    tokio::select! {
                        _ = ctx.cancellation().cancelled() => return (Err(Error::Cancelled), attempt),
                        _ = tokio::time::sleep(wait) => {}
                    }
                    attempt += 1;
                }
                Err(e) => return (Err(e), attempt),
            }
        }
    }
}

/// Await `future`, failing with a timeout once the run deadline passes.
async fn with_deadline<T>(
    deadline: Option<(tokio::time::Instant, u64)>,
    future: impl Future<Output = Result<T>>,
) -> Result<T> {
    match deadline {
        Some((at, secs)) => tokio::time::timeout_at(at, future)
            .await
            .unwrap_or(Err(Error::Timeout(secs))),
        None => future.await,
    }
}
