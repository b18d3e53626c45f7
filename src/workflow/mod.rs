//! Workflow definition, graph model, parsing, and validation.
//!
//! A workflow is a set of named nodes plus `main` connections between their
//! output and input slots. Definitions are parsed from YAML or JSON, validated,
//! and turned into an immutable [`WorkflowGraph`] for execution.

mod graph;
mod item;
mod parser;
mod types;
mod validator;

pub use graph::{Connection, NodeId, WorkflowGraph};
pub use item::{BinaryRef, Item, ItemBatch, NodeOutput, PairedItem};
pub use parser::{parse_workflow, parse_workflow_file};
pub use types::*;
pub use validator::{validate_workflow, ValidationReport};
