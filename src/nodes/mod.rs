//! Node implementations.
//!
//! Nodes are the building blocks of workflows. Each node type declares its
//! metadata and parameters and provides exactly one behavior: execute,
//! trigger or webhook.

mod code;
mod context;
mod http;
mod if_node;
mod interval;
mod manual;
pub mod parameters;
mod registry;
pub mod services;
mod set;
mod types;
mod voice_call;
mod webhook;

pub use code::CodeNode;
pub(crate) use context::error_item;
pub use context::{ExecuteContext, TriggerContext, TriggerEmitter, TriggerEvent, WebhookContext};
pub use http::HttpRequestNode;
pub use if_node::IfNode;
pub use interval::IntervalTrigger;
pub use manual::{ManualTrigger, NoOpNode};
pub use parameters::{DisplayOptions, ParameterKind, ParameterSchema, ParameterValue};
pub use registry::NodeRegistry;
pub use services::{
    CallRequest, CallStatus, CredentialData, CredentialProvider, HttpVoiceClient,
    InMemoryCredentials, Services, VoiceCallService,
};
pub use set::SetNode;
pub use types::{
    CredentialRequirement, ExecuteNode, NodeGroup, NodeImplementation, NodeType,
    NodeTypeDescription, TriggerHandle, TriggerNode, WebhookNode, WebhookReply, WebhookRequest,
    WebhookResponse, WebhookResponseMode, WebhookRoute,
};
pub use voice_call::VoiceCallNode;
pub use webhook::WebhookTrigger;
