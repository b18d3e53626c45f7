//! Webhook trigger - start runs from inbound HTTP requests.

use async_trait::async_trait;
use serde_json::{json, Value};

use super::context::WebhookContext;
use super::parameters::ParameterSchema;
use super::types::{
    NodeGroup, NodeType, NodeTypeDescription, WebhookNode, WebhookReply, WebhookRequest,
    WebhookResponseMode, WebhookRoute,
};
use crate::error::{Error, Result};
use crate::workflow::Item;

/// Webhook trigger implementation.
pub struct WebhookTrigger {
    description: NodeTypeDescription,
}

impl WebhookTrigger {
    pub fn new() -> Self {
        Self {
            description: NodeTypeDescription::new("webhook", "Webhook", NodeGroup::Webhook)
                .versions(&[1, 2])
                .inputs(&[])
                .describe("Starts the workflow when a request arrives")
                .property(ParameterSchema::string("path").required())
                .property(ParameterSchema::options(
                    "httpMethod",
                    &["POST", "GET", "PUT", "PATCH", "DELETE", "HEAD"],
                ))
                .property(ParameterSchema::options("responseMode", &["onReceived", "lastNode"]))
                .property(ParameterSchema::number("responseCode", 200.0))
                .property(
                    ParameterSchema::json("responseData")
                        .show_when("responseMode", &[json!("onReceived")])
                        .describe("Body sent back immediately; defaults to a short acknowledgement"),
                ),
        }
    }
}

impl Default for WebhookTrigger {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeType for WebhookTrigger {
    fn description(&self) -> &NodeTypeDescription {
        &self.description
    }
}

#[async_trait]
impl WebhookNode for WebhookTrigger {
    fn route(&self, ctx: &WebhookContext<'_>) -> Result<WebhookRoute> {
        let path = ctx.get_node_parameter(&self.description, "path", None)?;
        let method = ctx.get_node_parameter(&self.description, "httpMethod", None)?;
        Ok(WebhookRoute {
            method: method.as_str().unwrap_or("POST").to_uppercase(),
            path: path.as_str().unwrap_or_default().trim_matches('/').to_string(),
        })
    }

    async fn webhook(&self, ctx: &WebhookContext<'_>, request: &WebhookRequest) -> Result<WebhookReply> {
        let mode = ctx.get_node_parameter(&self.description, "responseMode", None)?;
        let response_mode = serde_json::from_value::<WebhookResponseMode>(mode)
            .map_err(|e| Error::node(&ctx.node.name, format!("Invalid response mode: {}", e)))?;
        let code = ctx
            .get_node_parameter(&self.description, "responseCode", None)?
            .as_f64()
            .unwrap_or(200.0);
        if !(100.0..=599.0).contains(&code) {
            return Err(Error::node(
                &ctx.node.name,
                format!("Invalid response code {}", code),
            ));
        }
        let response_body = match response_mode {
            WebhookResponseMode::OnReceived => {
                let data = ctx.get_node_parameter(&self.description, "responseData", Some(Value::Null))?;
                Some(if data.is_null() {
                    json!({ "message": "Workflow was started" })
                } else {
                    data
                })
            }
            WebhookResponseMode::LastNode => None,
        };

        let item = Item::from_value(json!({
            "headers": request.headers,
            "params": {},
            "query": request.query,
            "body": request.body,
            "method": request.method.to_uppercase(),
            "path": request.path,
        }));

        Ok(WebhookReply {
            workflow_data: Some(vec![item]),
            response_mode,
            response_code: code as u16,
            response_body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::services::Services;
    use crate::workflow::{NodeDefinition, WorkflowDefinition};

    fn request() -> WebhookRequest {
        WebhookRequest {
            method: "post".into(),
            path: "/orders".into(),
            body: json!({"id": 9}),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_route_and_immediate_reply() {
        let node = NodeDefinition::new("Hook", "webhook")
            .with_parameters(json!({"path": "/orders/", "responseCode": 202}));
        let workflow = WorkflowDefinition::default();
        let services = Services::default();
        let ctx = WebhookContext {
            node: &node,
            workflow: &workflow,
            services: &services,
        };
        let trigger = WebhookTrigger::new();

        let route = trigger.route(&ctx).unwrap();
        assert_eq!(route.path, "orders");
        assert_eq!(route.method, "POST");

        let reply = trigger.webhook(&ctx, &request()).await.unwrap();
        assert_eq!(reply.response_mode, WebhookResponseMode::OnReceived);
        assert_eq!(reply.response_code, 202);
        assert_eq!(reply.response_body, Some(json!({"message": "Workflow was started"})));
        let items = reply.workflow_data.unwrap();
        assert_eq!(items[0].json["body"], json!({"id": 9}));
        assert_eq!(items[0].json["method"], "POST");
    }

    #[tokio::test]
    async fn test_last_node_mode_and_bad_code() {
        let workflow = WorkflowDefinition::default();
        let services = Services::default();
        let trigger = WebhookTrigger::new();

        let node = NodeDefinition::new("Hook", "webhook")
            .with_parameters(json!({"path": "x", "responseMode": "lastNode"}));
        let ctx = WebhookContext { node: &node, workflow: &workflow, services: &services };
        let reply = trigger.webhook(&ctx, &request()).await.unwrap();
        assert_eq!(reply.response_mode, WebhookResponseMode::LastNode);
        assert!(reply.response_body.is_none());

        let node = NodeDefinition::new("Hook", "webhook")
            .with_parameters(json!({"path": "x", "responseCode": 42}));
        let ctx = WebhookContext { node: &node, workflow: &workflow, services: &services };
        assert!(trigger.webhook(&ctx, &request()).await.is_err());

        let node = NodeDefinition::new("Hook", "webhook");
        let ctx = WebhookContext { node: &node, workflow: &workflow, services: &services };
        assert!(trigger.route(&ctx).is_err());
    }
}
