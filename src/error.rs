//! Error types for nodeflow.
//!
//! Every variant carries a stable code so callers (and the CLI's JSON
//! output) can classify failures without parsing messages.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for nodeflow operations.
pub type Result<T> = std::result::Result<T, Error>;

/// nodeflow error types.
#[derive(Error, Debug)]
pub enum Error {
    /// Structural problems found while validating a workflow graph.
    #[error("Validation error: {}", .0.join("; "))]
    Validation(Vec<String>),

    /// An expression failed to parse or evaluate.
    #[error("Expression error in '{expression}' (item {item_index}): {message}")]
    Expression {
        expression: String,
        item_index: usize,
        message: String,
    },

    /// A node's own logic failed.
    #[error("Node '{node}' failed: {message}")]
    NodeExecution {
        node: String,
        message: String,
        item_index: Option<usize>,
    },

    /// Run-fatal problems that are not tied to a single node.
    #[error("Engine error: {0}")]
    Engine(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Credential error: {0}")]
    Credential(String),

    #[error("Execution cancelled")]
    Cancelled,

    #[error("Workflow timed out after {0} seconds")]
    Timeout(u64),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Shorthand for a node failure not tied to a particular item.
    pub fn node(node: impl Into<String>, message: impl Into<String>) -> Self {
        Error::NodeExecution {
            node: node.into(),
            message: message.into(),
            item_index: None,
        }
    }

    /// Shorthand for a node failure on a specific input item.
    pub fn node_item(node: impl Into<String>, message: impl Into<String>, item_index: usize) -> Self {
        Error::NodeExecution {
            node: node.into(),
            message: message.into(),
            item_index: Some(item_index),
        }
    }

    /// Get the error code for programmatic classification.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Validation(_) => "VALIDATION_ERROR",
            Error::Expression { .. } => "EXPRESSION_ERROR",
            Error::NodeExecution { .. } => "NODE_EXECUTION_ERROR",
            Error::Engine(_) => "ENGINE_ERROR",
            Error::Parse(_) => "PARSE_ERROR",
            Error::Config(_) => "CONFIG_ERROR",
            Error::Credential(_) => "CREDENTIAL_ERROR",
            Error::Cancelled => "CANCELLED",
            Error::Timeout(_) => "TIMEOUT",
            Error::Http(_) => "HTTP_ERROR",
            Error::Json(_) => "JSON_ERROR",
            Error::Yaml(_) => "YAML_ERROR",
            Error::Io(_) => "IO_ERROR",
        }
    }

    /// Errors that abort a whole run rather than a single node.
    ///
    /// Node-level failures are only fatal when the failing node does not
    /// continue on fail; the engine decides that separately.
    pub fn is_fatal_to_run(&self) -> bool {
        matches!(
            self,
            Error::Validation(_) | Error::Engine(_) | Error::Cancelled | Error::Timeout(_)
        )
    }

    /// Item index the error is attributed to, if any.
    pub fn item_index(&self) -> Option<usize> {
        match self {
            Error::Expression { item_index, .. } => Some(*item_index),
            Error::NodeExecution { item_index, .. } => *item_index,
            _ => None,
        }
    }

    /// Message without the variant prefix, used in error items.
    pub fn message(&self) -> String {
        match self {
            Error::NodeExecution { message, .. } => message.clone(),
            Error::Expression {
                expression,
                message,
                ..
            } => format!("{} [{}]", message, expression),
            other => other.to_string(),
        }
    }

    /// Convert to a JSON response for CLI and embedding callers.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "success": false,
            "error": NodeErrorInfo::from_error(self),
        })
    }
}

/// Serializable snapshot of an error, stored in task results and error items.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeErrorInfo {
    pub message: String,
    pub code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_index: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expression: Option<String>,
}

impl NodeErrorInfo {
    pub fn from_error(err: &Error) -> Self {
        let (node, expression) = match err {
            Error::NodeExecution { node, .. } => (Some(node.clone()), None),
            Error::Expression { expression, .. } => (None, Some(expression.clone())),
            _ => (None, None),
        };
        Self {
            message: err.message(),
            code: err.code().to_string(),
            node,
            item_index: err.item_index(),
            expression,
        }
    }

    /// Attach the failing node's name when the error did not carry one.
    pub fn with_node(mut self, node: &str) -> Self {
        if self.node.is_none() {
            self.node = Some(node.to_string());
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(Error::Validation(vec![]).code(), "VALIDATION_ERROR");
        assert_eq!(Error::Cancelled.code(), "CANCELLED");
        assert_eq!(Error::Timeout(3).code(), "TIMEOUT");
        assert_eq!(Error::node("A", "boom").code(), "NODE_EXECUTION_ERROR");
    }

    #[test]
    fn test_validation_message_joins_all_errors() {
        let err = Error::Validation(vec!["first".into(), "second".into()]);
        assert_eq!(err.to_string(), "Validation error: first; second");
    }

    #[test]
    fn test_fatal_classification() {
        assert!(Error::Engine("x".into()).is_fatal_to_run());
        assert!(Error::Cancelled.is_fatal_to_run());
        assert!(!Error::node("A", "boom").is_fatal_to_run());
        assert!(!Error::Credential("missing".into()).is_fatal_to_run());
    }

    #[test]
    fn test_error_info_from_expression_error() {
        let err = Error::Expression {
            expression: "$json.a.b(".into(),
            item_index: 2,
            message: "Unexpected end of expression".into(),
        };
        let info = NodeErrorInfo::from_error(&err).with_node("Set");
        assert_eq!(info.code, "EXPRESSION_ERROR");
        assert_eq!(info.item_index, Some(2));
        assert_eq!(info.expression.as_deref(), Some("$json.a.b("));
        assert_eq!(info.node.as_deref(), Some("Set"));
    }

    #[test]
    fn test_to_json_shape() {
        let json = Error::node_item("HTTP", "bad status", 1).to_json();
        assert_eq!(json["success"], false);
        assert_eq!(json["error"]["code"], "NODE_EXECUTION_ERROR");
        assert_eq!(json["error"]["message"], "bad status");
        assert_eq!(json["error"]["itemIndex"], 1);
    }
}
