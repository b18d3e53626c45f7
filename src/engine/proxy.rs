//! Expression data context for one `(node, item index)` during a run.

use std::cell::{OnceCell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use chrono::{SecondsFormat, Utc};
use chrono_tz::Tz;
use serde_json::{json, Value};

use super::run_data::{ExecutionMode, RunData};
use crate::expression::{EvalResult, ItemSource, Scope};
use crate::workflow::{Item, WorkflowDefinition, WorkflowGraph};

/// Read-only view of a run in progress.
#[derive(Clone, Copy)]
pub struct RunView<'a> {
    pub workflow: &'a WorkflowDefinition,
    pub graph: &'a WorkflowGraph,
    pub run_data: &'a RunData,
    pub execution_id: &'a str,
    pub mode: ExecutionMode,
    pub timezone: Tz,
}

impl<'a> RunView<'a> {
    /// Timezone from the workflow settings, UTC when unset or unknown.
    pub fn timezone_for(workflow: &WorkflowDefinition) -> Tz {
        workflow
            .settings
            .timezone
            .as_deref()
            .and_then(|name| name.parse::<Tz>().ok())
            .unwrap_or(Tz::UTC)
    }
}

/// Scope handed to the interpreter while resolving one item's parameters.
///
/// Node outputs are turned into item views the first time an expression
/// reads them and cached for the proxy's lifetime. A proxy is never reused
/// across items.
pub struct DataProxy<'a> {
    run: RunView<'a>,
    input: &'a [Item],
    item_index: usize,
    previous_node: Option<&'a str>,
    input_views: OnceCell<Rc<Vec<Value>>>,
    node_views: RefCell<HashMap<String, Option<Rc<Vec<Value>>>>>,
}

impl<'a> DataProxy<'a> {
    pub fn new(run: RunView<'a>, input: &'a [Item], item_index: usize) -> Self {
        Self {
            run,
            input,
            item_index,
            previous_node: None,
            input_views: OnceCell::new(),
            node_views: RefCell::new(HashMap::new()),
        }
    }

    pub fn with_previous_node(mut self, previous_node: Option<&'a str>) -> Self {
        self.previous_node = previous_node;
        self
    }

    /// Names of nodes whose output has been materialized so far.
    pub fn materialized_nodes(&self) -> Vec<String> {
        let mut names: Vec<String> = self.node_views.borrow().keys().cloned().collect();
        names.sort();
        names
    }

    fn current_item(&self) -> Option<&Item> {
        self.input.get(self.item_index)
    }

    fn node_items(&self, name: &str) -> Option<Rc<Vec<Value>>> {
        if let Some(cached) = self.node_views.borrow().get(name) {
            return cached.clone();
        }
        let views = self
            .run
            .run_data
            .get(name)
            .and_then(|tasks| tasks.last())
            .and_then(|task| task.primary_output())
            .map(|items| Rc::new(items.iter().map(Item::to_view).collect::<Vec<_>>()));
        self.node_views
            .borrow_mut()
            .insert(name.to_string(), views.clone());
        views
    }

    fn now(&self) -> chrono::DateTime<Tz> {
        Utc::now().with_timezone(&self.run.timezone)
    }
}

impl Scope for DataProxy<'_> {
    fn variable(&self, name: &str) -> EvalResult<Option<Value>> {
        let value = match name {
            "$json" => self
                .current_item()
                .map(Item::json_value)
                .unwrap_or_else(|| json!({})),
            "$binary" => self
                .current_item()
                .and_then(|item| serde_json::to_value(&item.binary).ok())
                .unwrap_or_else(|| json!({})),
            "$itemIndex" => Value::from(self.item_index),
            "$runIndex" => Value::from(0),
            "$workflow" => json!({
                "id": self.run.workflow.id,
                "name": self.run.workflow.name,
                "active": self.run.workflow.active,
            }),
            "$execution" => json!({
                "id": self.run.execution_id,
                "mode": self.run.mode.to_string(),
            }),
            "$now" => Value::String(self.now().to_rfc3339_opts(SecondsFormat::Millis, true)),
            "$today" => {
                let now = self.now();
                let midnight = now
                    .date_naive()
                    .and_hms_opt(0, 0, 0)
                    .and_then(|naive| naive.and_local_timezone(self.run.timezone).earliest());
                match midnight {
                    Some(dt) => Value::String(dt.to_rfc3339_opts(SecondsFormat::Millis, true)),
                    None => Value::Null,
                }
            }
            _ => return Ok(None),
        };
        Ok(Some(value))
    }

    fn source_items(&self, source: &ItemSource) -> EvalResult<Option<Rc<Vec<Value>>>> {
        Ok(match source {
            ItemSource::Input => Some(Rc::clone(
                self.input_views
                    .get_or_init(|| Rc::new(self.input.iter().map(Item::to_view).collect())),
            )),
            ItemSource::Node(name) => self.node_items(name),
        })
    }

    fn node_exists(&self, name: &str) -> bool {
        self.run.graph.node_id(name).is_some()
    }

    fn previous_node(&self) -> Option<String> {
        self.previous_node.map(str::to_string)
    }

    fn item_index(&self) -> usize {
        self.item_index
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::run_data::{TaskResult, TaskStatus};
    use crate::expression::evaluate_str;
    use crate::workflow::parse_workflow;

    fn workflow() -> WorkflowDefinition {
        parse_workflow(
            r#"
id: wf-1
name: proxy
active: true
settings:
  timezone: Europe/Berlin
nodes:
  - name: Start
    type: manualTrigger
  - name: Fetch
    type: noOp
  - name: Other
    type: noOp
  - name: Current
    type: noOp
connections:
  Start:
    main:
      - - node: Fetch
  Fetch:
    main:
      - - node: Current
"#,
        )
        .unwrap()
    }

    fn task(values: Vec<Value>) -> TaskResult {
        TaskResult {
            start_time: Utc::now(),
            execution_time_ms: 0,
            status: TaskStatus::Success,
            data: Some(vec![values.into_iter().map(Item::from_value).collect()]),
            error: None,
            source: Vec::new(),
            attempts: 1,
            pinned: false,
        }
    }

    #[test]
    fn test_resolves_run_metadata_and_items() {
        let definition = workflow();
        let graph = WorkflowGraph::from_definition(&definition).unwrap();
        let mut run_data = RunData::new();
        run_data.insert("Fetch".into(), vec![task(vec![json!({"id": 1}), json!({"id": 2})])]);
        run_data.insert("Other".into(), vec![task(vec![json!({"big": true})])]);
        let view = RunView {
            workflow: &definition,
            graph: &graph,
            run_data: &run_data,
            execution_id: "exec-9",
            mode: ExecutionMode::Manual,
            timezone: RunView::timezone_for(&definition),
        };
        let input = vec![
            Item::from_value(json!({"name": "a"})),
            Item::from_value(json!({"name": "b"})),
        ];
        let proxy = DataProxy::new(view, &input, 1).with_previous_node(Some("Fetch"));

        assert_eq!(evaluate_str("$json.name", &proxy).unwrap(), json!("b"));
        assert_eq!(evaluate_str("$node[\"Fetch\"].json.id", &proxy).unwrap(), json!(2));
        assert_eq!(evaluate_str("$prevNode.name", &proxy).unwrap(), json!("Fetch"));
        assert_eq!(evaluate_str("$workflow.id", &proxy).unwrap(), json!("wf-1"));
        assert_eq!(evaluate_str("$execution.mode", &proxy).unwrap(), json!("manual"));
        assert_eq!(evaluate_str("$input.all().length", &proxy).unwrap(), json!(2));

        // Only the node actually referenced was materialized.
        assert_eq!(proxy.materialized_nodes(), vec!["Fetch".to_string()]);
    }

    #[test]
    fn test_unexecuted_and_unknown_nodes() {
        let definition = workflow();
        let graph = WorkflowGraph::from_definition(&definition).unwrap();
        let run_data = RunData::new();
        let view = RunView {
            workflow: &definition,
            graph: &graph,
            run_data: &run_data,
            execution_id: "exec-1",
            mode: ExecutionMode::Trigger,
            timezone: Tz::UTC,
        };
        let proxy = DataProxy::new(view, &[], 0);
        let err = evaluate_str("$('Other').first()", &proxy).unwrap_err();
        assert_eq!(err.message, "Node 'Other' has not been executed yet");
        let err = evaluate_str("$('Nope').first()", &proxy).unwrap_err();
        assert_eq!(err.message, "Referenced node 'Nope' does not exist");
        assert_eq!(evaluate_str("$('Other').isExecuted", &proxy).unwrap(), json!(false));
        assert_eq!(evaluate_str("$json", &proxy).unwrap(), json!({}));
    }

    #[test]
    fn test_now_uses_workflow_timezone() {
        let definition = workflow();
        let graph = WorkflowGraph::from_definition(&definition).unwrap();
        let run_data = RunData::new();
        let view = RunView {
            workflow: &definition,
            graph: &graph,
            run_data: &run_data,
            execution_id: "e",
            mode: ExecutionMode::Manual,
            timezone: RunView::timezone_for(&definition),
        };
        let proxy = DataProxy::new(view, &[], 0);
        let today = evaluate_str("$today", &proxy).unwrap();
        let text = today.as_str().unwrap();
        assert!(text.contains("T00:00:00.000"));
        assert!(text.ends_with("+01:00") || text.ends_with("+02:00"));
    }
}
