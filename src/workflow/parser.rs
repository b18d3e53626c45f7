//! Workflow definition parser (YAML or JSON).

use std::path::Path;

use super::types::WorkflowDefinition;
use crate::error::{Error, Result};

/// Parse a workflow from a YAML or JSON string.
///
/// Text whose first non-whitespace character is `{` is treated as JSON.
pub fn parse_workflow(text: &str) -> Result<WorkflowDefinition> {
    let trimmed = text.trim_start();
    if trimmed.is_empty() {
        return Err(Error::Parse("Empty workflow definition".to_string()));
    }

    if trimmed.starts_with('{') {
        serde_json::from_str(trimmed).map_err(|e| describe("JSON", &e.to_string()))
    } else {
        serde_yaml::from_str(text).map_err(|e| describe("YAML", &e.to_string()))
    }
}

/// Parse a workflow from a file path.
pub fn parse_workflow_file(path: &Path) -> Result<WorkflowDefinition> {
    let content = std::fs::read_to_string(path)?;
    parse_workflow(&content)
}

fn describe(format: &str, msg: &str) -> Error {
    if let Some(field) = extract_missing_field(msg) {
        Error::Parse(format!("Missing required field: {}", field))
    } else {
        Error::Parse(format!("Invalid {}: {}", format, msg))
    }
}

fn extract_missing_field(error_message: &str) -> Option<&str> {
    let marker = "missing field `";
    let start = error_message.find(marker)? + marker.len();
    let rest = &error_message[start..];
    let end = rest.find('`')?;
    Some(&rest[..end])
}
