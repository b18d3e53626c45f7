//! Voice Call node - place outbound calls through the voice service.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tokio::time::Instant;
use tracing::{debug, info};

use super::context::ExecuteContext;
use super::parameters::ParameterSchema;
use super::services::{CallRequest, CallStatus, VoiceCallService};
use super::types::{ExecuteNode, NodeGroup, NodeType, NodeTypeDescription};
use crate::error::{Error, Result};
use crate::workflow::{Item, NodeOutput};

/// Voice call node implementation.
pub struct VoiceCallNode {
    description: NodeTypeDescription,
}

impl VoiceCallNode {
    pub fn new() -> Self {
        Self {
            description: NodeTypeDescription::new("voiceCall", "Voice Call", NodeGroup::Action)
                .describe("Place an outbound phone call with a voice agent")
                .property(
                    ParameterSchema::string("phoneNumber")
                        .display_name("Phone Number")
                        .required()
                        .describe("Destination in E.164 format, e.g. +14155550123"),
                )
                .property(ParameterSchema::string("fromNumber").display_name("From Number"))
                .property(ParameterSchema::string("prompt").describe("Instructions the agent follows"))
                .property(ParameterSchema::string("firstMessage").display_name("First Message"))
                .property(ParameterSchema::string("voice"))
                .property(ParameterSchema::number("maxDurationSeconds", 0.0))
                .property(ParameterSchema::json("metadata").default(json!({})))
                .property(
                    ParameterSchema::boolean("waitForCompletion", false)
                        .describe("Poll until the call ends and return its transcript"),
                )
                .property(
                    ParameterSchema::number("maxWaitSeconds", 0.0)
                        .show_when("waitForCompletion", &[json!(true)])
                        .describe("0 uses the configured default"),
                ),
        }
    }
}

impl Default for VoiceCallNode {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VoiceCallConfig {
    phone_number: String,
    #[serde(default)]
    from_number: String,
    #[serde(default)]
    prompt: String,
    #[serde(default)]
    first_message: String,
    #[serde(default)]
    voice: String,
    #[serde(default)]
    max_duration_seconds: f64,
    #[serde(default)]
    metadata: Value,
    #[serde(default)]
    wait_for_completion: bool,
    #[serde(default)]
    max_wait_seconds: f64,
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// Strip formatting and check the result is E.164: `+` and 8 to 15 digits.
fn normalize_phone(raw: &str) -> std::result::Result<String, String> {
    let cleaned: String = raw
        .chars()
        .filter(|c| !matches!(c, ' ' | '-' | '(' | ')' | '.'))
        .collect();
    let digits = cleaned.strip_prefix('+').unwrap_or("");
    if digits.len() < 8
        || digits.len() > 15
        || digits.starts_with('0')
        || !digits.chars().all(|c| c.is_ascii_digit())
    {
        return Err(format!(
            "Phone number '{}' is not in E.164 format (e.g. +14155550123)",
            raw
        ));
    }
    Ok(cleaned)
}

impl VoiceCallConfig {
    fn into_request(self) -> std::result::Result<(CallRequest, bool, f64), String> {
        let metadata = match self.metadata {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => return Err(format!("metadata must be an object, got {}", other)),
        };
        let request = CallRequest {
            to: normalize_phone(&self.phone_number)?,
            from: non_empty(&self.from_number),
            prompt: non_empty(&self.prompt),
            first_message: non_empty(&self.first_message),
            voice: non_empty(&self.voice),
            max_duration_seconds: (self.max_duration_seconds > 0.0)
                .then_some(self.max_duration_seconds as u64),
            metadata,
        };
        Ok((request, self.wait_for_completion, self.max_wait_seconds))
    }
}

fn status_json(status: &CallStatus) -> Value {
    serde_json::to_value(status).unwrap_or_else(|_| json!({ "callId": status.call_id }))
}

impl NodeType for VoiceCallNode {
    fn description(&self) -> &NodeTypeDescription {
        &self.description
    }
}

#[async_trait]
impl ExecuteNode for VoiceCallNode {
    async fn execute(&self, ctx: &ExecuteContext<'_>) -> Result<NodeOutput> {
        let voice = ctx.services().voice.clone().ok_or_else(|| {
            Error::node(
                &ctx.node().name,
                "No voice service configured; set voice.endpoint in the config",
            )
        })?;

        let mut output = Vec::new();
        for index in 0..ctx.get_input_data(0).len() {
            match self.call_item(ctx, voice.as_ref(), index).await {
                Ok(value) => output.push(Item::from_value(value).with_paired_item(index)),
                Err(e) if ctx.continue_on_fail() => output.push(ctx.error_item(&e, index)),
                Err(e) => return Err(e),
            }
        }
        Ok(vec![output])
    }
}

impl VoiceCallNode {
    async fn call_item(
        &self,
        ctx: &ExecuteContext<'_>,
        voice: &dyn VoiceCallService,
        index: usize,
    ) -> Result<Value> {
        let config: VoiceCallConfig = ctx.get_parameters_as(index)?;
        let (request, wait, max_wait) = config
            .into_request()
            .map_err(|message| ctx.node_error(message, index))?;

        let placed = voice
            .place_call(&request)
            .await
            .map_err(|e| ctx.node_error(e.message(), index))?;
        info!(call_id = %placed.call_id, to = %request.to, "Call placed");

        if !wait || placed.is_terminal() {
            return Ok(status_json(&placed));
        }

        let settings = &ctx.services().voice_config;
        let max_wait = if max_wait > 0.0 {
            Duration::from_secs_f64(max_wait)
        } else {
            Duration::from_secs(settings.max_wait_seconds)
        };
        let poll = Duration::from_secs(settings.poll_interval_seconds.max(1));
        let final_status = wait_for_call(ctx, voice, &placed.call_id, poll, max_wait)
            .await
            .map_err(|e| match e {
                Error::Cancelled => Error::Cancelled,
                other => ctx.node_error(other.message(), index),
            })?;
        Ok(status_json(&final_status))
    }
}

/// Poll until the call reaches a terminal state, the deadline passes, or the
/// run is cancelled.
async fn wait_for_call(
    ctx: &ExecuteContext<'_>,
    voice: &dyn VoiceCallService,
    call_id: &str,
    poll: Duration,
    max_wait: Duration,
) -> Result<CallStatus> {
    let deadline = Instant::now() + max_wait;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(Error::node(
                &ctx.node().name,
                format!(
                    "Call {} did not finish within {} seconds",
                    call_id,
                    max_wait.as_secs()
                ),
            ));
        }
        tokio::select! {
            _ = ctx.cancellation().cancelled() => return Err(Error::Cancelled),
            _ = tokio::time::sleep(poll.min(remaining)) => {}
        }
        let status = voice.get_call(call_id).await?;
        debug!(call_id, status = %status.status, "Polled call status");
        if status.is_terminal() {
            return Ok(status);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VoiceConfig;
    use crate::nodes::context::testing::{items, Harness};
    use crate::nodes::services::Services;
    use crate::workflow::NodeDefinition;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    /// Voice service whose calls complete after a fixed number of polls.
    #[derive(Default)]
    struct FakeVoice {
        placed: Mutex<Vec<CallRequest>>,
        polls: AtomicUsize,
        polls_until_done: usize,
    }

    #[async_trait]
    impl VoiceCallService for FakeVoice {
        async fn place_call(&self, request: &CallRequest) -> Result<CallStatus> {
            self.placed.lock().unwrap().push(request.clone());
            Ok(CallStatus {
                call_id: "call-1".into(),
                status: "queued".into(),
                transcript: None,
                outcome: None,
                duration_seconds: None,
                extra: Map::new(),
            })
        }

        async fn get_call(&self, call_id: &str) -> Result<CallStatus> {
            let polls = self.polls.fetch_add(1, Ordering::SeqCst) + 1;
            let done = polls >= self.polls_until_done;
            Ok(CallStatus {
                call_id: call_id.to_string(),
                status: if done { "completed" } else { "in-progress" }.into(),
                transcript: done.then(|| "Hi, this is a reminder".to_string()),
                outcome: done.then(|| "confirmed".to_string()),
                duration_seconds: done.then_some(31.5),
                extra: Map::new(),
            })
        }
    }

    fn harness(parameters: Value, voice: Arc<FakeVoice>) -> Harness {
        let services = Services::default()
            .with_voice(voice)
            .with_voice_config(VoiceConfig {
                poll_interval_seconds: 1,
                max_wait_seconds: 30,
                ..VoiceConfig::default()
            });
        Harness::new(NodeDefinition::new("Call", "voiceCall").with_parameters(parameters))
            .with_services(services)
    }

    #[test]
    fn test_normalize_phone() {
        assert_eq!(normalize_phone("+1 (415) 555-0123").unwrap(), "+14155550123");
        assert!(normalize_phone("4155550123").is_err());
        assert!(normalize_phone("+0123456789").is_err());
        assert!(normalize_phone("+1415abc0123").is_err());
    }

    #[tokio::test]
    async fn test_places_call_per_item() {
        let voice = Arc::new(FakeVoice::default());
        let harness = harness(
            json!({
                "phoneNumber": "={{ $json.phone }}",
                "prompt": "Remind {{ $json.name }} about the appointment",
                "metadata": {"customer": "={{ $json.name }}"}
            }),
            Arc::clone(&voice),
        );
        let node = VoiceCallNode::new();
        let ctx = harness.context(
            node.description(),
            vec![items(vec![json!({"phone": "+14155550123", "name": "Ann"})])],
        );
        let output = node.execute(&ctx).await.unwrap();
        assert_eq!(output[0][0].json["callId"], "call-1");
        assert_eq!(output[0][0].json["status"], "queued");

        let placed = voice.placed.lock().unwrap();
        assert_eq!(placed[0].prompt.as_deref(), Some("Remind Ann about the appointment"));
        assert_eq!(placed[0].metadata.get("customer"), Some(&json!("Ann")));
    }

    #[tokio::test]
    async fn test_waits_for_completion() {
        let voice = Arc::new(FakeVoice {
            polls_until_done: 1,
            ..FakeVoice::default()
        });
        let harness = harness(
            json!({"phoneNumber": "+14155550123", "waitForCompletion": true}),
            Arc::clone(&voice),
        );
        let node = VoiceCallNode::new();
        let ctx = harness.context(node.description(), vec![items(vec![json!({})])]);
        let output = node.execute(&ctx).await.unwrap();
        let json = &output[0][0].json;
        assert_eq!(json["status"], "completed");
        assert_eq!(json["transcript"], "Hi, this is a reminder");
        assert_eq!(json["outcome"], "confirmed");
    }

    #[tokio::test]
    async fn test_invalid_number_and_missing_service() {
        let voice = Arc::new(FakeVoice::default());
        let harness = harness(json!({"phoneNumber": "555"}), voice);
        let node = VoiceCallNode::new();
        let ctx = harness.context(node.description(), vec![items(vec![json!({})])]);
        let err = node.execute(&ctx).await.unwrap_err();
        assert!(err.to_string().contains("E.164"));

        let bare = Harness::new(NodeDefinition::new("Call", "voiceCall"));
        let ctx = bare.context(node.description(), vec![items(vec![json!({})])]);
        let err = node.execute(&ctx).await.unwrap_err();
        assert!(err.to_string().contains("No voice service"));
    }
}
