//! External collaborators nodes depend on: credentials and the voice API.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::config::{Config, HttpConfig, VoiceConfig};
use crate::error::{Error, Result};

/// Decrypted credential fields (e.g. `user`/`password`, `token`).
pub type CredentialData = Map<String, Value>;

/// Source of decrypted credentials, looked up by type and id.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn get(&self, credential_type: &str, id: &str) -> Result<Option<CredentialData>>;
}

/// Credentials held in memory, keyed by `(type, id)`.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCredentials {
    entries: HashMap<(String, String), CredentialData>,
}

impl InMemoryCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a credential; `data` must be a JSON object.
    pub fn with_credential(mut self, credential_type: &str, id: &str, data: Value) -> Self {
        let data = match data {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        self.entries
            .insert((credential_type.to_string(), id.to_string()), data);
        self
    }
}

#[async_trait]
impl CredentialProvider for InMemoryCredentials {
    async fn get(&self, credential_type: &str, id: &str) -> Result<Option<CredentialData>> {
        Ok(self
            .entries
            .get(&(credential_type.to_string(), id.to_string()))
            .cloned())
    }
}

/// Outbound call request sent to the voice service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallRequest {
    /// Destination number in E.164 format
    pub to: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    /// Script or prompt the agent follows on the call
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_duration_seconds: Option<u64>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

/// Call state as reported by the voice service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallStatus {
    #[serde(alias = "id", alias = "call_id")]
    pub call_id: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcript: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<f64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl CallStatus {
    /// Whether the call has finished, successfully or not.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status.to_ascii_lowercase().as_str(),
            "completed" | "ended" | "failed" | "busy" | "no-answer" | "no_answer" | "canceled" | "cancelled"
        )
    }
}

/// External voice-calling API.
#[async_trait]
pub trait VoiceCallService: Send + Sync {
    async fn place_call(&self, request: &CallRequest) -> Result<CallStatus>;

    async fn get_call(&self, call_id: &str) -> Result<CallStatus>;
}

/// Voice service over HTTP: `POST {endpoint}/calls`, `GET {endpoint}/calls/{id}`.
pub struct HttpVoiceClient {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpVoiceClient {
    pub fn new(client: reqwest::Client, endpoint: &str, api_key: Option<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            api_key,
        }
    }

    /// Build a client from config; `None` when no endpoint is configured.
    pub fn from_config(client: reqwest::Client, config: &VoiceConfig) -> Option<Self> {
        config
            .endpoint
            .as_deref()
            .map(|endpoint| Self::new(client, endpoint, config.api_key()))
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }

    async fn read_status(response: reqwest::Response) -> Result<CallStatus> {
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(Error::node(
                "voiceCall",
                format!("Voice API returned {}: {}", status.as_u16(), truncate(&body, 500)),
            ));
        }
        serde_json::from_str(&body).map_err(|e| {
            Error::node("voiceCall", format!("Invalid voice API response: {}", e))
        })
    }
}

#[async_trait]
impl VoiceCallService for HttpVoiceClient {
    async fn place_call(&self, request: &CallRequest) -> Result<CallStatus> {
        debug!(to = %request.to, "Placing outbound call");
        let response = self
            .authorize(self.client.post(format!("{}/calls", self.endpoint)))
            .json(request)
            .send()
            .await?;
        Self::read_status(response).await
    }

    async fn get_call(&self, call_id: &str) -> Result<CallStatus> {
        let url = format!("{}/calls/{}", self.endpoint, urlencoding::encode(call_id));
        let response = self.authorize(self.client.get(url)).send().await?;
        Self::read_status(response).await
    }
}

fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((byte, _)) => &text[..byte],
        None => text,
    }
}

/// Shared collaborators handed to every node execution.
#[derive(Clone)]
pub struct Services {
    pub credentials: Arc<dyn CredentialProvider>,
    pub voice: Option<Arc<dyn VoiceCallService>>,
    pub http_client: reqwest::Client,
    pub http: HttpConfig,
    pub voice_config: VoiceConfig,
}

impl Services {
    /// Services from configuration: HTTP client, voice client if configured,
    /// and an empty credential store.
    pub fn from_config(config: &Config) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.http.timeout_seconds.max(1)))
            .build()?;
        let voice = HttpVoiceClient::from_config(http_client.clone(), &config.voice)
            .map(|client| Arc::new(client) as Arc<dyn VoiceCallService>);
        Ok(Self {
            credentials: Arc::new(InMemoryCredentials::new()),
            voice,
            http_client,
            http: config.http.clone(),
            voice_config: config.voice.clone(),
        })
    }

    pub fn with_credentials(mut self, credentials: Arc<dyn CredentialProvider>) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn with_voice(mut self, voice: Arc<dyn VoiceCallService>) -> Self {
        self.voice = Some(voice);
        self
    }

    pub fn with_http_config(mut self, http: HttpConfig) -> Self {
        self.http = http;
        self
    }

    pub fn with_voice_config(mut self, voice_config: VoiceConfig) -> Self {
        self.voice_config = voice_config;
        self
    }
}

impl Default for Services {
    fn default() -> Self {
        Self {
            credentials: Arc::new(InMemoryCredentials::new()),
            voice: None,
            http_client: reqwest::Client::new(),
            http: HttpConfig::default(),
            voice_config: VoiceConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_in_memory_credentials() {
        let store = InMemoryCredentials::new().with_credential(
            "httpBasicAuth",
            "cred-1",
            json!({"user": "ann", "password": "secret"}),
        );
        let found = store.get("httpBasicAuth", "cred-1").await.unwrap().unwrap();
        assert_eq!(found.get("user"), Some(&json!("ann")));
        assert!(store.get("httpBasicAuth", "other").await.unwrap().is_none());
        assert!(store.get("bearer", "cred-1").await.unwrap().is_none());
    }

    #[test]
    fn test_call_status_parsing() {
        let status: CallStatus = serde_json::from_value(json!({
            "id": "c1",
            "status": "completed",
            "transcript": "hello",
            "cost": 0.12
        }))
        .unwrap();
        assert_eq!(status.call_id, "c1");
        assert!(status.is_terminal());
        assert_eq!(status.extra.get("cost"), Some(&json!(0.12)));

        let ringing = CallStatus {
            status: "ringing".into(),
            ..status
        };
        assert!(!ringing.is_terminal());
    }

    #[test]
    fn test_voice_client_requires_endpoint() {
        let config = VoiceConfig::default();
        assert!(HttpVoiceClient::from_config(reqwest::Client::new(), &config).is_none());
        let config = VoiceConfig {
            endpoint: Some("https://voice.example.com/v1/".into()),
            ..VoiceConfig::default()
        };
        let client = HttpVoiceClient::from_config(reqwest::Client::new(), &config).unwrap();
        assert_eq!(client.endpoint, "https://voice.example.com/v1");
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "hé");
        assert_eq!(truncate("hi", 10), "hi");
    }
}
