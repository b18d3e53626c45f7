//! HTTP Request node - call an HTTP endpoint once per item.

use std::net::IpAddr;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use super::context::ExecuteContext;
use super::parameters::ParameterSchema;
use super::services::CredentialData;
use super::types::{ExecuteNode, NodeGroup, NodeType, NodeTypeDescription};
use crate::error::{Error, Result};
use crate::expression::to_display;
use crate::metrics;
use crate::workflow::{Item, NodeOutput};

/// Validate URL to prevent SSRF attacks.
/// Blocks access to localhost, private IP ranges, and non-http(s) schemes.
fn validate_url(url: &str, allow_internal: bool) -> std::result::Result<(), String> {
    let parsed = reqwest::Url::parse(url).map_err(|e| format!("Invalid URL '{}': {}", url, e))?;

    // Only allow http/https schemes
    match parsed.scheme() {
        "http" | "https" => {}
        scheme => {
            return Err(format!(
                "Unsupported URL scheme '{}'. Only http and https are allowed.",
                scheme
            ));
        }
    }

    if allow_internal {
        return Ok(());
    }

    if let Some(host) = parsed.host_str() {
        let host_lower = host.to_lowercase();
        if host_lower == "localhost"
            || host_lower == "127.0.0.1"
            || host_lower == "::1"
            || host_lower == "[::1]"
            || host_lower == "0.0.0.0"
        {
            warn!("Blocked SSRF attempt to localhost: {}", url);
            return Err("Access to localhost is not allowed for security reasons.".to_string());
        }

        let bare = host.trim_start_matches('[').trim_end_matches(']');
        if let Ok(ip) = bare.parse::<IpAddr>() {
            if is_private_or_special_ip(&ip) {
                warn!("Blocked SSRF attempt to private IP: {}", url);
                return Err(
                    "Access to private or internal IP addresses is not allowed for security reasons."
                        .to_string(),
                );
            }
        }

        if host_lower.ends_with(".local")
            || host_lower.ends_with(".internal")
            || host_lower.ends_with(".localhost")
        {
            warn!("Blocked SSRF attempt to internal host: {}", url);
            return Err("Access to internal hostnames is not allowed for security reasons.".to_string());
        }
    }

    Ok(())
}

/// Check if an IP address is private, loopback, or otherwise special.
fn is_private_or_special_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(ipv4) => {
            ipv4.is_loopback()
                || ipv4.is_private()
                || ipv4.is_link_local()
                || ipv4.is_broadcast()
                || ipv4.is_unspecified()
                // 100.64.0.0/10 (CGNAT)
                || ipv4.octets()[0] == 100 && (ipv4.octets()[1] & 0xc0) == 64
        }
        IpAddr::V6(ipv6) => {
            ipv6.is_loopback()
                || ipv6.is_unspecified()
                || ipv6
                    .to_ipv4_mapped()
                    .map(|v4| is_private_or_special_ip(&IpAddr::V4(v4)))
                    .unwrap_or(false)
        }
    }
}

/// HTTP request node.
pub struct HttpRequestNode {
    description: NodeTypeDescription,
}

impl HttpRequestNode {
    pub fn new() -> Self {
        let when_body = |schema: ParameterSchema| schema.show_when("sendBody", &[json!(true)]);
        Self {
            description: NodeTypeDescription::new("httpRequest", "HTTP Request", NodeGroup::Action)
                .versions(&[1, 2, 3, 4])
                .describe("Make HTTP requests and return the response")
                .property(ParameterSchema::options(
                    "method",
                    &["GET", "POST", "PUT", "PATCH", "DELETE", "HEAD"],
                ))
                .property(ParameterSchema::string("url").display_name("URL").required())
                .property(ParameterSchema::options(
                    "authentication",
                    &["none", "basicAuth", "bearerAuth", "headerAuth"],
                ))
                .property(ParameterSchema::boolean("sendQuery", false))
                .property(
                    ParameterSchema::json("queryParameters")
                        .default(json!({}))
                        .show_when("sendQuery", &[json!(true)]),
                )
                .property(ParameterSchema::boolean("sendHeaders", false))
                .property(
                    ParameterSchema::json("headers")
                        .default(json!({}))
                        .show_when("sendHeaders", &[json!(true)]),
                )
                .property(ParameterSchema::boolean("sendBody", false))
                .property(when_body(ParameterSchema::options(
                    "contentType",
                    &["json", "form", "raw"],
                )))
                .property(
                    when_body(ParameterSchema::json("body").default(json!({})))
                        .hide_when("contentType", &[json!("raw")]),
                )
                .property(
                    when_body(ParameterSchema::string("rawBody"))
                        .show_when("contentType", &[json!("raw")]),
                )
                .property(ParameterSchema::options(
                    "responseFormat",
                    &["autodetect", "json", "text"],
                ))
                .property(
                    ParameterSchema::boolean("fullResponse", false)
                        .describe("Return status code and headers along with the body"),
                )
                .property(
                    ParameterSchema::boolean("neverError", false)
                        .describe("Succeed even when the server answers with an error status"),
                )
                .property(
                    ParameterSchema::number("timeout", 0.0)
                        .describe("Request timeout in seconds; 0 uses the configured default"),
                )
                .credential("httpBasicAuth", false)
                .credential("httpBearerAuth", false)
                .credential("httpHeaderAuth", false),
        }
    }
}

impl Default for HttpRequestNode {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HttpConfig {
    #[serde(default = "default_method")]
    method: String,
    url: String,
    #[serde(default)]
    authentication: Authentication,
    #[serde(default)]
    query_parameters: Option<Value>,
    #[serde(default)]
    headers: Option<Value>,
    #[serde(default)]
    send_body: bool,
    #[serde(default)]
    content_type: ContentType,
    #[serde(default)]
    body: Option<Value>,
    #[serde(default)]
    raw_body: Option<String>,
    #[serde(default)]
    response_format: ResponseFormat,
    #[serde(default)]
    full_response: bool,
    #[serde(default)]
    never_error: bool,
    #[serde(default)]
    timeout: f64,
}

fn default_method() -> String {
    "GET".to_string()
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
enum Authentication {
    #[default]
    None,
    BasicAuth,
    BearerAuth,
    HeaderAuth,
}

impl Authentication {
    fn credential_type(self) -> Option<&'static str> {
        match self {
            Self::None => None,
            Self::BasicAuth => Some("httpBasicAuth"),
            Self::BearerAuth => Some("httpBearerAuth"),
            Self::HeaderAuth => Some("httpHeaderAuth"),
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
enum ContentType {
    #[default]
    Json,
    Form,
    Raw,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
enum ResponseFormat {
    #[default]
    Autodetect,
    Json,
    Text,
}

fn credential_field<'a>(credential: &'a CredentialData, field: &str, kind: &str) -> Result<&'a str> {
    credential
        .get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| Error::Credential(format!("{} credential is missing '{}'", kind, field)))
}

/// Apply authentication to a request based on the configured scheme.
fn apply_authentication(
    request: reqwest::RequestBuilder,
    authentication: Authentication,
    credential: &CredentialData,
) -> Result<reqwest::RequestBuilder> {
    Ok(match authentication {
        Authentication::None => request,
        Authentication::BasicAuth => {
            let user = credential_field(credential, "user", "Basic auth")?;
            let password = credential.get("password").and_then(Value::as_str);
            request.basic_auth(user, password)
        }
        Authentication::BearerAuth => {
            request.bearer_auth(credential_field(credential, "token", "Bearer auth")?)
        }
        Authentication::HeaderAuth => {
            let name = credential_field(credential, "name", "Header auth")?;
            let value = credential_field(credential, "value", "Header auth")?;
            request.header(name, value)
        }
    })
}

fn string_pairs(value: &Option<Value>, what: &str) -> std::result::Result<Vec<(String, String)>, String> {
    match value {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Object(map)) => Ok(map
            .iter()
            .map(|(k, v)| (k.clone(), to_display(v)))
            .collect()),
        Some(other) => Err(format!("{} must be an object, got {}", what, other)),
    }
}

fn build_request(
    client: &reqwest::Client,
    config: &HttpConfig,
    credential: Option<&CredentialData>,
    default_timeout: u64,
) -> std::result::Result<reqwest::RequestBuilder, Error> {
    let method = reqwest::Method::from_bytes(config.method.to_uppercase().as_bytes())
        .map_err(|_| Error::Parse(format!("Unknown HTTP method: {}", config.method)))?;

    let mut request = client.request(method, &config.url);

    let query = string_pairs(&config.query_parameters, "Query parameters").map_err(Error::Parse)?;
    if !query.is_empty() {
        request = request.query(&query);
    }
    for (name, value) in string_pairs(&config.headers, "Headers").map_err(Error::Parse)? {
        request = request.header(name, value);
    }

    if config.send_body {
        request = match config.content_type {
            ContentType::Json => request.json(config.body.as_ref().unwrap_or(&Value::Null)),
            ContentType::Form => {
                request.form(&string_pairs(&config.body, "Form body").map_err(Error::Parse)?)
            }
            ContentType::Raw => request.body(config.raw_body.clone().unwrap_or_default()),
        };
    }

    if let Some(credential) = credential {
        request = apply_authentication(request, config.authentication, credential)?;
    }

    let timeout = if config.timeout > 0.0 {
        Duration::from_secs_f64(config.timeout)
    } else {
        Duration::from_secs(default_timeout.max(1))
    };
    Ok(request.timeout(timeout))
}

/// Turn a response into output items.
fn shape_response(
    config: &HttpConfig,
    status: u16,
    headers: Map<String, Value>,
    content_type: &str,
    text: String,
) -> std::result::Result<Vec<Value>, String> {
    let parse_json = match config.response_format {
        ResponseFormat::Json => true,
        ResponseFormat::Text => false,
        ResponseFormat::Autodetect => content_type.contains("json"),
    };
    let body = if parse_json && !text.trim().is_empty() {
        serde_json::from_str(&text).map_err(|e| format!("Response is not valid JSON: {}", e))?
    } else if parse_json {
        Value::Null
    } else {
        json!({ "data": text })
    };

    if config.full_response {
        return Ok(vec![json!({
            "statusCode": status,
            "headers": headers,
            "body": body,
        })]);
    }
    Ok(match body {
        Value::Array(values) => values,
        Value::Null => vec![json!({})],
        other => vec![other],
    })
}

impl NodeType for HttpRequestNode {
    fn description(&self) -> &NodeTypeDescription {
        &self.description
    }
}

#[async_trait]
impl ExecuteNode for HttpRequestNode {
    async fn execute(&self, ctx: &ExecuteContext<'_>) -> Result<NodeOutput> {
        let mut output = Vec::new();
        let input_len = ctx.get_input_data(0).len().max(1);

        for index in 0..input_len {
            match self.request_item(ctx, index).await {
                Ok(values) => output.extend(
                    values
                        .into_iter()
                        .map(|value| Item::from_value(value).with_paired_item(index)),
                ),
                Err(e) if ctx.continue_on_fail() => output.push(ctx.error_item(&e, index)),
                Err(e) => return Err(e),
            }
        }

        Ok(vec![output])
    }
}

impl HttpRequestNode {
    async fn request_item(&self, ctx: &ExecuteContext<'_>, index: usize) -> Result<Vec<Value>> {
        let config: HttpConfig = ctx.get_parameters_as(index)?;
        let services = ctx.services();

        validate_url(&config.url, services.http.allow_internal_urls)
            .map_err(|message| ctx.node_error(message, index))?;

        let credential = match config.authentication.credential_type() {
            Some(kind) => Some(ctx.get_credentials(kind).await?),
            None => None,
        };
        let request = build_request(
            &services.http_client,
            &config,
            credential.as_ref(),
            services.http.timeout_seconds,
        )
        .map_err(|e| match e {
            Error::Parse(message) => ctx.node_error(message, index),
            other => other,
        })?;

        debug!("HTTP {} {}", config.method, config.url);
        let start = Instant::now();
        let response = request
            .send()
            .await
            .map_err(|e| ctx.node_error(format!("Request to {} failed: {}", config.url, e), index))?;

        let status = response.status().as_u16();
        let mut headers = Map::new();
        for (k, v) in response.headers() {
            headers.insert(k.to_string(), Value::String(v.to_str().unwrap_or("").to_string()));
        }
        let content_type = headers
            .get("content-type")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();
        let text = response.text().await.map_err(|e| {
            ctx.node_error(format!("Failed to read response body from {}: {}", config.url, e), index)
        })?;

        metrics::record_http_request(&config.method.to_uppercase(), status);
        metrics::record_http_duration(start.elapsed(), &config.method.to_uppercase());
        debug!(status, elapsed_ms = start.elapsed().as_millis() as u64, "HTTP response");

        if status >= 400 && !config.never_error {
            return Err(ctx.node_error(
                format!("Request failed with status {}: {}", status, truncate(&text, 300)),
                index,
            ));
        }

        shape_response(&config, status, headers, &content_type, text)
            .map_err(|message| ctx.node_error(message, index))
    }
}

fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((byte, _)) => &text[..byte],
        None => text,
    }
}
