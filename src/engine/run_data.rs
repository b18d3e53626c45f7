//! Run records: what happened to every node during one execution.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, NodeErrorInfo};
use crate::workflow::{Item, NodeOutput};

/// Execution status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" | "canceled" => Ok(Self::Cancelled),
            _ => Err(format!("Unknown status: {}", s)),
        }
    }
}

/// How a run was started.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    #[default]
    Manual,
    Trigger,
    Webhook,
    Internal,
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Manual => write!(f, "manual"),
            Self::Trigger => write!(f, "trigger"),
            Self::Webhook => write!(f, "webhook"),
            Self::Internal => write!(f, "internal"),
        }
    }
}

/// Outcome of one node task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Success,
    Error,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// The connection that delivered a node's input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceRef {
    pub previous_node: String,
    #[serde(default)]
    pub previous_node_output: usize,
    #[serde(default)]
    pub input: usize,
}

/// One execution of one node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskResult {
    pub start_time: DateTime<Utc>,
    pub execution_time_ms: u64,
    pub status: TaskStatus,
    /// One batch per output slot; absent when the node failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<NodeOutput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<NodeErrorInfo>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub source: Vec<SourceRef>,
    /// Attempts made, counting retries.
    #[serde(default = "default_attempts")]
    pub attempts: u32,
    /// Output came from pinned data instead of running the node.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub pinned: bool,
}

fn default_attempts() -> u32 {
    1
}

impl TaskResult {
    /// Items of one output slot.
    pub fn output(&self, slot: usize) -> &[Item] {
        self.data
            .as_ref()
            .and_then(|data| data.get(slot))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// The slot expressions see as "the node's output": the first non-empty
    /// slot, falling back to slot 0.
    pub fn primary_output(&self) -> Option<&[Item]> {
        let data = self.data.as_ref()?;
        data.iter()
            .find(|batch| !batch.is_empty())
            .or_else(|| data.first())
            .map(Vec::as_slice)
    }
}

/// Task results per node name, in execution order.
pub type RunData = BTreeMap<String, Vec<TaskResult>>;

/// Run-level error attached to a failed or cancelled run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunError {
    pub message: String,
    pub code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node: Option<String>,
}

impl RunError {
    pub fn from_error(err: &Error, node: Option<&str>) -> Self {
        Self {
            message: err.to_string(),
            code: err.code().to_string(),
            node: node.map(str::to_string),
        }
    }
}

/// The recorded outcome of one workflow run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRecord {
    pub execution_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_id: Option<String>,
    pub workflow_name: String,
    pub mode: ExecutionMode,
    pub status: ExecutionStatus,
    pub run_data: RunData,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_node_executed: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RunError>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl RunRecord {
    /// Last task result recorded for a node.
    pub fn last_task(&self, node: &str) -> Option<&TaskResult> {
        self.run_data.get(node).and_then(|tasks| tasks.last())
    }

    /// Items a node produced on `slot` in its last task.
    pub fn node_output(&self, node: &str, slot: usize) -> &[Item] {
        self.last_task(node).map(|t| t.output(slot)).unwrap_or(&[])
    }

    /// Primary output of the last node that ran.
    pub fn last_output(&self) -> &[Item] {
        self.last_node_executed
            .as_deref()
            .and_then(|node| self.last_task(node))
            .and_then(TaskResult::primary_output)
            .unwrap_or(&[])
    }

    pub fn is_success(&self) -> bool {
        self.status == ExecutionStatus::Completed
    }
}
