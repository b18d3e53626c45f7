//! nodeflow - graph-based workflow automation engine
//!
//! A workflow is a set of named nodes joined by typed connections. The engine
//! runs nodes in dependency order, passing batches of JSON items along the
//! connections, and evaluates `{{ }}` expressions in node parameters against
//! the data produced so far.
//!
//! ## Example
//!
//! ```yaml
//! name: greet
//! nodes:
//!   - name: Start
//!     type: manualTrigger
//!   - name: Greeting
//!     type: set
//!     parameters:
//!       fields:
//!         - name: message
//!           value: "Hello {{ $json.name }}"
//! connections:
//!   Start:
//!     main:
//!       - - node: Greeting
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod expression;
pub mod metrics;
pub mod nodes;
pub mod telemetry;
pub mod workflow;

pub use engine::{ActiveWorkflow, RunOptions, RunRecord, WorkflowExecutor};
pub use error::{Error, Result};
pub use nodes::NodeRegistry;
pub use workflow::{parse_workflow, WorkflowDefinition};
