//! Interval trigger - start a run on a fixed schedule.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use tokio::time::MissedTickBehavior;
use tracing::debug;

use super::context::TriggerContext;
use super::parameters::ParameterSchema;
use super::types::{NodeGroup, NodeType, NodeTypeDescription, TriggerHandle, TriggerNode};
use crate::error::{Error, Result};
use crate::metrics;
use crate::workflow::Item;

/// Interval trigger implementation.
pub struct IntervalTrigger {
    description: NodeTypeDescription,
}

impl IntervalTrigger {
    pub fn new() -> Self {
        Self {
            description: NodeTypeDescription::new("interval", "Interval", NodeGroup::Schedule)
                .inputs(&[])
                .describe("Starts the workflow every N units of time")
                .property(ParameterSchema::number("interval", 1.0))
                .property(ParameterSchema::options(
                    "unit",
                    &["seconds", "minutes", "hours", "milliseconds"],
                )),
        }
    }

    fn period(&self, ctx: &TriggerContext) -> Result<Duration> {
        let interval = ctx
            .get_node_parameter(&self.description, "interval", None)?
            .as_f64()
            .unwrap_or(1.0);
        let unit = ctx.get_node_parameter(&self.description, "unit", None)?;
        let millis = match unit.as_str().unwrap_or("seconds") {
            "milliseconds" => interval,
            "minutes" => interval * 60_000.0,
            "hours" => interval * 3_600_000.0,
            _ => interval * 1_000.0,
        };
        if !millis.is_finite() || millis < 1.0 {
            return Err(Error::node(
                &ctx.node.name,
                format!("Interval must be positive, got {}", interval),
            ));
        }
        Ok(Duration::from_millis(millis as u64))
    }
}

impl Default for IntervalTrigger {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeType for IntervalTrigger {
    fn description(&self) -> &NodeTypeDescription {
        &self.description
    }
}

#[async_trait]
impl TriggerNode for IntervalTrigger {
    async fn trigger(&self, ctx: TriggerContext) -> Result<TriggerHandle> {
        let period = self.period(&ctx)?;
        let cancel = ctx.cancel.clone();
        let node_type = self.description.name.clone();

        let task = tokio::spawn(async move {
            // The first tick completes immediately; runs start after one period.
            let start = tokio::time::Instant::now() + period;
            let mut ticker = tokio::time::interval_at(start, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ctx.cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let item = Item::from_value(json!({ "timestamp": Utc::now().to_rfc3339() }));
                        metrics::record_trigger_emit(&node_type);
                        if !ctx.emitter.emit(vec![item]) {
                            break;
                        }
                    }
                }
            }
            debug!(node = %ctx.node.name, "Interval trigger stopped");
        });

        Ok(TriggerHandle::new(cancel, Some(task)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::context::{TriggerEmitter, TriggerEvent};
    use crate::nodes::services::Services;
    use crate::workflow::{NodeDefinition, WorkflowDefinition};
    use std::sync::Arc;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    fn context(parameters: serde_json::Value) -> (TriggerContext, mpsc::UnboundedReceiver<TriggerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let ctx = TriggerContext {
            node: NodeDefinition::new("Every", "interval").with_parameters(parameters),
            workflow: Arc::new(WorkflowDefinition::default()),
            services: Arc::new(Services::default()),
            emitter: TriggerEmitter::new("Every", tx),
            cancel: CancellationToken::new(),
        };
        (ctx, rx)
    }

    #[tokio::test]
    async fn test_emits_until_disposed() {
        let (ctx, mut rx) = context(json!({"interval": 20, "unit": "milliseconds"}));
        let handle = IntervalTrigger::new().trigger(ctx).await.unwrap();

        let first = rx.recv().await.unwrap();
        assert_eq!(first.node, "Every");
        assert!(first.items[0].json.contains_key("timestamp"));
        let _second = rx.recv().await.unwrap();

        handle.dispose().await;
        // The listener is gone: buffered events drain, then the channel closes.
        while rx.recv().await.is_some() {}
        assert!(matches!(
            rx.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
    }

    #[tokio::test]
    async fn test_rejects_non_positive_interval() {
        let (ctx, _rx) = context(json!({"interval": 0}));
        assert!(IntervalTrigger::new().trigger(ctx).await.is_err());
    }
}
