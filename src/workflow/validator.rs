//! Workflow validation.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use super::graph::WorkflowGraph;
use super::types::WorkflowDefinition;
use crate::error::{Error, Result};

/// Highest number of input slots a connection may address on its target.
pub const MAX_INPUT_SLOTS: usize = 16;

/// Outcome of validating a workflow: every problem found, not just the first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<String>,
}

impl ValidationReport {
    pub fn into_result(self) -> Result<()> {
        if self.valid {
            Ok(())
        } else {
            Err(Error::Validation(self.errors))
        }
    }
}

/// Validate a workflow definition.
///
/// Checks node names and types, duplicate names, connection endpoints, and
/// the absence of cycles over main connections.
pub fn validate_workflow(workflow: &WorkflowDefinition) -> ValidationReport {
    let mut errors = Vec::new();

    let mut names = HashSet::new();
    for (index, node) in workflow.nodes.iter().enumerate() {
        if node.name.trim().is_empty() {
            errors.push(format!("Node at position {} has an empty name", index));
        } else if !names.insert(node.name.as_str()) {
            errors.push(format!("Duplicate node name: '{}'", node.name));
        }

        if node.node_type.trim().is_empty() {
            errors.push(format!("Node '{}' has an empty type", node.name));
        }
    }

    for (source, kinds) in &workflow.connections {
        if !names.contains(source.as_str()) {
            errors.push(format!(
                "Connection source '{}' does not exist",
                source
            ));
        }
        for (kind, slots) in kinds {
            for targets in slots {
                for target in targets {
                    if target.node.trim().is_empty() {
                        errors.push(format!(
                            "Connection from '{}' has an empty target node",
                            source
                        ));
                    } else if !names.contains(target.node.as_str()) {
                        errors.push(format!(
                            "Connection from '{}' targets unknown node '{}'",
                            source, target.node
                        ));
                    }
                    if target.index >= MAX_INPUT_SLOTS {
                        errors.push(format!(
                            "Connection from '{}' to '{}' uses input index {}, the limit is {}",
                            source,
                            target.node,
                            target.index,
                            MAX_INPUT_SLOTS - 1
                        ));
                    }
                    if target.kind.trim().is_empty() {
                        errors.push(format!(
                            "Connection from '{}' ({}) to '{}' has an empty type",
                            source, kind, target.node
                        ));
                    }
                }
            }
        }
    }

    let graph = WorkflowGraph::build(workflow);
    if let Some(path) = graph.check_for_cycles() {
        errors.push(format!("Workflow contains a cycle: {}", path.join(" -> ")));
    }

    ValidationReport {
        valid: errors.is_empty(),
        errors,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::{parse_workflow, NodeDefinition};

    #[test]
    fn test_validate_valid_workflow() {
        let yaml = r#"
name: valid
nodes:
  - name: Start
    type: manualTrigger
  - name: Step
    type: noOp
connections:
  Start:
    main:
      - - node: Step
"#;
        let report = validate_workflow(&parse_workflow(yaml).unwrap());
        assert!(report.valid, "{:?}", report.errors);
        assert!(report.into_result().is_ok());
    }

    #[test]
    fn test_validate_duplicate_names() {
        let yaml = r#"
name: test
nodes:
  - name: a
    type: noOp
  - name: a
    type: noOp
"#;
        let report = validate_workflow(&parse_workflow(yaml).unwrap());
        assert!(!report.valid);
        assert!(report.errors[0].contains("Duplicate node name: 'a'"));
    }

    #[test]
    fn test_validate_dangling_endpoints() {
        let yaml = r#"
name: test
nodes:
  - name: a
    type: noOp
connections:
  ghost:
    main:
      - - node: a
  a:
    main:
      - - node: nonexistent
"#;
        let report = validate_workflow(&parse_workflow(yaml).unwrap());
        assert!(!report.valid);
        assert_eq!(report.errors.len(), 2);
        assert!(report.errors.iter().any(|e| e.contains("'ghost' does not exist")));
        assert!(report.errors.iter().any(|e| e.contains("unknown node 'nonexistent'")));
    }

    #[test]
    fn test_validate_cycle() {
        let yaml = r#"
name: test
nodes:
  - name: a
    type: noOp
  - name: b
    type: noOp
connections:
  a:
    main:
      - - node: b
  b:
    main:
      - - node: a
"#;
        let report = validate_workflow(&parse_workflow(yaml).unwrap());
        assert!(!report.valid);
        assert!(report.errors.iter().any(|e| e.contains("cycle")));
        let err = report.into_result().unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_validate_input_index_limit() {
        let yaml = r#"
name: test
nodes:
  - name: Start
    type: manualTrigger
  - name: b
    type: noOp
connections:
  Start:
    main:
      - - node: b
          index: 18446744073709551615
"#;
        let report = validate_workflow(&parse_workflow(yaml).unwrap());
        assert!(!report.valid);
        assert!(report.errors[0].contains("input index 18446744073709551615"));

        let within = yaml.replace("18446744073709551615", "15");
        assert!(validate_workflow(&parse_workflow(&within).unwrap()).valid);
    }

    #[test]
    fn test_validate_long_chain() {
        let mut workflow = WorkflowDefinition::default();
        for i in 0..10_000 {
            workflow.nodes.push(NodeDefinition::new(&format!("N{}", i), "noOp"));
            if i > 0 {
                workflow.connect(&format!("N{}", i - 1), 0, &format!("N{}", i), 0);
            }
        }
        assert!(validate_workflow(&workflow).valid);

        workflow.connect("N9999", 0, "N0", 0);
        let report = validate_workflow(&workflow);
        assert!(report.errors.iter().any(|e| e.contains("cycle")));
    }

    #[test]
    fn test_validate_collects_all_errors() {
        let yaml = r#"
name: test
nodes:
  - name: ""
    type: noOp
  - name: b
    type: ""
  - name: b
    type: noOp
"#;
        let report = validate_workflow(&parse_workflow(yaml).unwrap());
        assert_eq!(report.errors.len(), 3, "{:?}", report.errors);
    }
}
