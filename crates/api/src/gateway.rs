//! JSON/REST gateway provider.
//!
//! [`GatewayClient`] implements every capability trait against a single HTTP gateway
//! that fronts the deployment, workflow, function and log services. Routes:
//!
//! | Capability call | Route |
//! |---|---|
//! | create stack | `POST /stacks` |
//! | update stack | `PUT /stacks/{name}` |
//! | describe events | `GET /stacks/{name}/events?since=<rfc3339>` |
//! | describe status | `GET /stacks/{name}` |
//! | list resources | `GET /stacks/{name}/resources` |
//! | delete stack | `DELETE /stacks/{name}` |
//! | list executions | `GET /workflows/{id}/executions?status=<STATUS>` |
//! | start execution | `POST /workflows/{id}/executions` |
//! | describe execution | `GET /executions/{id}` |
//! | get definition | `GET /workflows/{id}/definition` |
//! | invoke async | `POST /functions/{id}/invocations` |
//! | list log groups | `GET /log-groups?prefix=<prefix>` |
//! | filter events | `GET /log-groups/{name}/events?start_time=<ms>` |
//! | delete log group | `DELETE /log-groups/{name}` |
//!
//! Identifiers are percent-encoded into single path segments. Error bodies are
//! either plain text or `{"message": "..."}`.

use std::{env, time::Duration};

use chrono::{DateTime, SecondsFormat, Utc};
use pipewatch_types::{DefinitionNode, ExecutionStatus, ExecutionSummary, LogEvent, StackDescriptor, StackEvent, StackResource, StackStatus};
use pipewatch_util::{block_on_future, build_path, redact_sensitive};
use reqwest::{Client, Method, RequestBuilder, Url, header};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::{Value, json};
use tracing::debug;

use crate::{DeploymentService, FunctionService, LogService, ServiceError, WorkflowService};

/// Hostnames allowed to use plain HTTP.
const LOCALHOST_DOMAINS: &[&str] = &["localhost", "127.0.0.1"];
/// Message the deployment service uses when an update changes nothing.
const NO_UPDATES_MESSAGE: &str = "no updates are to be performed";
/// Message fragment the deployment service uses for missing stacks.
const DOES_NOT_EXIST_MESSAGE: &str = "does not exist";

/// Connection settings for the gateway, read from the pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GatewaySettings {
    pub base_url: String,
    /// Environment variable holding the bearer token.
    #[serde(default = "default_token_env")]
    pub token_env: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_token_env() -> String {
    "PIPEWATCH_API_TOKEN".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:4566".to_string(),
            token_env: default_token_env(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Thin wrapper around a configured `reqwest::Client` for gateway access.
#[derive(Debug, Clone)]
pub struct GatewayClient {
    pub base_url: String,
    pub http: Client,
    pub user_agent: String,
}

#[derive(Debug)]
struct GatewayResponse {
    status: u16,
    body: String,
}

impl GatewayResponse {
    fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Error text from `{"message": ...}` bodies, falling back to the raw body.
    /// Inline credentials echoed back by the service are masked.
    fn message(&self) -> String {
        let message = serde_json::from_str::<Value>(&self.body)
            .ok()
            .and_then(|value| value.get("message").and_then(Value::as_str).map(str::to_string))
            .unwrap_or_else(|| self.body.trim().to_string());
        redact_sensitive(&message)
    }

    fn rejected(&self) -> ServiceError {
        ServiceError::Rejected {
            status: self.status,
            message: self.message(),
        }
    }

    fn decode<T: DeserializeOwned>(&self) -> Result<T, ServiceError> {
        serde_json::from_str(&self.body).map_err(|error| ServiceError::Decode(error.to_string()))
    }

    fn signals_absent_stack(&self) -> bool {
        self.status == 404 || self.message().to_lowercase().contains(DOES_NOT_EXIST_MESSAGE)
    }
}

#[derive(Debug, Deserialize)]
struct StatusBody {
    status: String,
}

impl GatewayClient {
    /// Construct a client from settings, reading the token from `settings.token_env`.
    ///
    /// Non-localhost base URLs must use HTTPS.
    pub fn new(settings: &GatewaySettings) -> anyhow::Result<Self> {
        validate_base_url(&settings.base_url)?;

        let mut default_headers = header::HeaderMap::new();
        if let Ok(token) = env::var(&settings.token_env)
            && !token.trim().is_empty()
        {
            let value = header::HeaderValue::from_str(&format!("Bearer {}", token.trim()))?;
            default_headers.insert(header::AUTHORIZATION, value);
        }
        default_headers.insert(header::ACCEPT, header::HeaderValue::from_static("application/json"));

        let http = Client::builder()
            .default_headers(default_headers)
            .timeout(Duration::from_secs(settings.timeout_secs.max(1)))
            .build()?;

        Ok(Self {
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            http,
            user_agent: format!("pipewatch/{}; {}", env!("CARGO_PKG_VERSION"), env::consts::OS),
        })
    }

    /// Build a request for a method and gateway-relative path.
    pub fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        debug!(%url, "building request");
        self.http.request(method, url).header(header::USER_AGENT, &self.user_agent)
    }

    fn send(&self, builder: RequestBuilder) -> Result<GatewayResponse, ServiceError> {
        block_on_future(async move {
            let response = builder.send().await?;
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            Ok(GatewayResponse { status, body })
        })
        .map_err(|error| ServiceError::Transport(redact_sensitive(&format!("{error:#}"))))
    }

    fn get(&self, path: &str, query: &[(&str, String)]) -> Result<GatewayResponse, ServiceError> {
        self.send(self.request(Method::GET, path).query(query))
    }
}

impl DeploymentService for GatewayClient {
    fn create_stack(&self, descriptor: &StackDescriptor) -> Result<(), ServiceError> {
        let response = self.send(self.request(Method::POST, "/stacks").json(descriptor))?;
        match response.status {
            _ if response.is_success() => Ok(()),
            409 => Err(ServiceError::AlreadyExists(descriptor.name.clone())),
            _ => Err(response.rejected()),
        }
    }

    fn update_stack(&self, descriptor: &StackDescriptor) -> Result<(), ServiceError> {
        let path = build_path("/stacks/{name}", &[("name", &descriptor.name)]);
        let response = self.send(self.request(Method::PUT, &path).json(descriptor))?;
        if response.is_success() {
            return Ok(());
        }
        if response.message().to_lowercase().contains(NO_UPDATES_MESSAGE) {
            return Err(ServiceError::NoUpdates(descriptor.name.clone()));
        }
        if response.status == 404 {
            return Err(ServiceError::StackAbsent(descriptor.name.clone()));
        }
        Err(response.rejected())
    }

    fn describe_events(&self, stack_name: &str, since: Option<DateTime<Utc>>) -> Result<Vec<StackEvent>, ServiceError> {
        let path = build_path("/stacks/{name}/events", &[("name", stack_name)]);
        let query: Vec<(&str, String)> = since
            .map(|since| vec![("since", since.to_rfc3339_opts(SecondsFormat::Millis, true))])
            .unwrap_or_default();
        let response = self.get(&path, &query)?;
        if response.is_success() {
            return response.decode();
        }
        if response.signals_absent_stack() {
            return Err(ServiceError::StackAbsent(stack_name.to_string()));
        }
        Err(response.rejected())
    }

    fn describe_status(&self, stack_name: &str) -> Result<StackStatus, ServiceError> {
        let path = build_path("/stacks/{name}", &[("name", stack_name)]);
        let response = self.get(&path, &[])?;
        if response.is_success() {
            let body: StatusBody = response.decode()?;
            return Ok(StackStatus::from_raw(&body.status));
        }
        if response.signals_absent_stack() {
            return Err(ServiceError::StackAbsent(stack_name.to_string()));
        }
        Err(response.rejected())
    }

    fn list_resources(&self, stack_name: &str) -> Result<Vec<StackResource>, ServiceError> {
        let path = build_path("/stacks/{name}/resources", &[("name", stack_name)]);
        let response = self.get(&path, &[])?;
        if response.is_success() {
            return response.decode();
        }
        if response.signals_absent_stack() {
            return Err(ServiceError::StackAbsent(stack_name.to_string()));
        }
        Err(response.rejected())
    }

    fn delete_stack(&self, stack_name: &str) -> Result<(), ServiceError> {
        let path = build_path("/stacks/{name}", &[("name", stack_name)]);
        let response = self.send(self.request(Method::DELETE, &path))?;
        match response.status {
            _ if response.is_success() => Ok(()),
            404 => Err(ServiceError::StackAbsent(stack_name.to_string())),
            _ => Err(response.rejected()),
        }
    }
}

impl WorkflowService for GatewayClient {
    fn list_executions(&self, workflow_id: &str, status: Option<ExecutionStatus>) -> Result<Vec<ExecutionSummary>, ServiceError> {
        let path = build_path("/workflows/{id}/executions", &[("id", workflow_id)]);
        let query: Vec<(&str, String)> = status.map(|status| vec![("status", status.to_string())]).unwrap_or_default();
        let response = self.get(&path, &query)?;
        match response.status {
            _ if response.is_success() => response.decode(),
            404 => Err(not_found("workflow", workflow_id)),
            _ => Err(response.rejected()),
        }
    }

    fn start_execution(&self, workflow_id: &str) -> Result<ExecutionSummary, ServiceError> {
        let path = build_path("/workflows/{id}/executions", &[("id", workflow_id)]);
        let response = self.send(self.request(Method::POST, &path).json(&json!({})))?;
        match response.status {
            _ if response.is_success() => response.decode(),
            404 => Err(not_found("workflow", workflow_id)),
            _ => Err(response.rejected()),
        }
    }

    fn describe_execution(&self, execution_id: &str) -> Result<ExecutionStatus, ServiceError> {
        let path = build_path("/executions/{id}", &[("id", execution_id)]);
        let response = self.get(&path, &[])?;
        match response.status {
            _ if response.is_success() => {
                let body: StatusBody = response.decode()?;
                serde_json::from_value(Value::String(body.status)).map_err(|error| ServiceError::Decode(error.to_string()))
            }
            404 => Err(not_found("execution", execution_id)),
            _ => Err(response.rejected()),
        }
    }

    fn get_definition(&self, workflow_id: &str) -> Result<DefinitionNode, ServiceError> {
        let path = build_path("/workflows/{id}/definition", &[("id", workflow_id)]);
        let response = self.get(&path, &[])?;
        match response.status {
            _ if response.is_success() => {
                let mut payload: Value = response.decode()?;
                if let Some(definition) = payload.get_mut("definition") {
                    return Ok(DefinitionNode::from_document(definition.take()));
                }
                Ok(DefinitionNode::from_document(payload))
            }
            404 => Err(not_found("workflow", workflow_id)),
            _ => Err(response.rejected()),
        }
    }
}

impl FunctionService for GatewayClient {
    fn invoke_async(&self, function_id: &str) -> Result<(), ServiceError> {
        let path = build_path("/functions/{id}/invocations", &[("id", function_id)]);
        let response = self.send(self.request(Method::POST, &path).json(&json!({ "invocation_type": "Event" })))?;
        match response.status {
            _ if response.is_success() => Ok(()),
            404 => Err(not_found("function", function_id)),
            _ => Err(response.rejected()),
        }
    }
}

impl LogService for GatewayClient {
    fn list_log_groups(&self, name_prefix: &str) -> Result<Vec<String>, ServiceError> {
        let response = self.get("/log-groups", &[("prefix", name_prefix.to_string())])?;
        if response.is_success() {
            return response.decode();
        }
        Err(response.rejected())
    }

    fn filter_events(&self, log_group: &str, start_time: i64) -> Result<Vec<LogEvent>, ServiceError> {
        let path = build_path("/log-groups/{name}/events", &[("name", log_group)]);
        let response = self.get(&path, &[("start_time", start_time.to_string())])?;
        match response.status {
            _ if response.is_success() => {
                let mut events: Vec<LogEvent> = response.decode()?;
                events.sort_by_key(|event| event.timestamp);
                Ok(events)
            }
            404 => Err(not_found("log group", log_group)),
            _ => Err(response.rejected()),
        }
    }

    fn delete_log_group(&self, log_group: &str) -> Result<(), ServiceError> {
        let path = build_path("/log-groups/{name}", &[("name", log_group)]);
        let response = self.send(self.request(Method::DELETE, &path))?;
        match response.status {
            _ if response.is_success() => Ok(()),
            404 => Err(not_found("log group", log_group)),
            _ => Err(response.rejected()),
        }
    }
}

fn not_found(kind: &'static str, id: &str) -> ServiceError {
    ServiceError::NotFound { kind, id: id.to_string() }
}

/// Validate that a base URL is acceptable for use by the client.
///
/// Rules:
/// - `localhost` or `127.0.0.1`: any scheme is allowed
/// - otherwise: scheme must be HTTPS
fn validate_base_url(base: &str) -> anyhow::Result<()> {
    let parsed = Url::parse(base).map_err(|error| anyhow::anyhow!("invalid gateway base URL '{}': {}", base, error))?;
    let host_name = parsed
        .host_str()
        .ok_or_else(|| anyhow::anyhow!("gateway base URL must include a host"))?;

    if LOCALHOST_DOMAINS.iter().any(|&allowed| host_name.eq_ignore_ascii_case(allowed)) {
        return Ok(());
    }
    if parsed.scheme() != "https" {
        anyhow::bail!("gateway base URL must use https for non-localhost hosts; got '{}://'", parsed.scheme());
    }
    Ok(())
}
