//! sw_fetch tool implementation.
//!
//! Delivers a fetch event. Requests the agent declines are sent to the
//! network by the host, as a browser would.

use std::collections::BTreeMap;

use http::header::{HeaderName, HeaderValue};
use http::Method;
use rmcp::{ErrorData as McpError, model::CallToolResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use outpost_core::net::{RequestCache, RequestMode};
use outpost_core::{Request, Response};

use crate::error::HostError;
use crate::host::AgentHost;
use crate::tools::json_result;

/// Input parameters for sw_fetch tool.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct FetchParams {
    /// Absolute URL, or a path resolved against the agent's scope.
    pub url: String,

    /// HTTP method (default: GET).
    #[serde(default)]
    pub method: Option<String>,

    /// Request headers.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    /// Id of the client issuing the request. Unknown ids are connected.
    #[serde(default)]
    pub client_id: Option<String>,

    /// Request mode: "navigate", "same-origin", "no-cors" or "cors" (default).
    #[serde(default)]
    pub mode: Option<String>,

    /// Cache directive, e.g. "only-if-cached" (default: "default").
    #[serde(default)]
    pub cache: Option<String>,

    /// Request body as text.
    #[serde(default)]
    pub body: Option<String>,

    /// Block until deferred work (cache writes, idle tasks) has finished.
    #[serde(default)]
    pub wait: bool,
}

/// Output structure for sw_fetch tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct FetchOutput {
    /// "agent" when the agent answered, "network" when it declined.
    pub served_by: String,
    pub status: u16,
    /// URL the response was served from, if known.
    pub url: Option<String>,
    pub opaque: bool,
    pub headers: BTreeMap<String, String>,
    pub body: String,
}

impl FetchOutput {
    fn from_response(res: &Response, served_by: &str) -> Self {
        Self {
            served_by: served_by.to_string(),
            status: res.status.as_u16(),
            url: res.url.clone(),
            opaque: res.is_opaque(),
            headers: res.header_pairs().into_iter().collect(),
            body: res.text(),
        }
    }
}

fn parse_kebab<T: serde::de::DeserializeOwned>(field: &str, value: &str) -> Result<T, HostError> {
    serde_json::from_value(serde_json::Value::String(value.to_string()))
        .map_err(|_| HostError::InvalidInput(format!("unsupported {field}: {value}")))
}

fn build_request(host: &AgentHost, params: FetchParams) -> Result<Request, HostError> {
    if params.url.trim().is_empty() {
        return Err(HostError::InvalidInput("url cannot be empty".into()));
    }
    let url = host.driver.scope().adapter.resolve(params.url.trim());

    let mode: RequestMode = match params.mode.as_deref() {
        Some(mode) => parse_kebab("mode", mode)?,
        None => RequestMode::default(),
    };
    let mut req = if mode == RequestMode::Navigate { Request::navigate(url) } else { Request::get(url) };
    req.mode = mode;
    if let Some(cache) = params.cache.as_deref() {
        req.cache = parse_kebab::<RequestCache>("cache", cache)?;
    }
    if let Some(method) = params.method.as_deref() {
        req.method = Method::from_bytes(method.to_ascii_uppercase().as_bytes())
            .map_err(|_| HostError::InvalidInput(format!("invalid method: {method}")))?;
    }
    for (name, value) in &params.headers {
        let name = HeaderName::try_from(name.as_str())
            .map_err(|_| HostError::InvalidInput(format!("invalid header name: {name}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|_| HostError::InvalidInput(format!("invalid value for header {name}")))?;
        req.headers.insert(name, value);
    }
    if let Some(client_id) = params.client_id {
        host.mailbox.connect(&client_id);
        req.client_id = Some(client_id);
    }
    if let Some(body) = params.body {
        req.body = Some(body.into());
    }
    Ok(req)
}

/// Implementation of the sw_fetch tool.
pub async fn fetch_impl(host: &AgentHost, params: FetchParams) -> Result<CallToolResult, McpError> {
    let wait = params.wait;
    let req = build_request(host, params)?;

    let outcome = host.driver.on_fetch(req.clone()).await;
    host.settle(outcome.background, wait).await;

    let output = match outcome.response? {
        Some(res) => FetchOutput::from_response(&res, "agent"),
        None => {
            tracing::debug!(url = %req.url, "agent declined request, going to the network");
            let res = host.fetcher.fetch(&req).await?;
            FetchOutput::from_response(&res, "network")
        }
    };
    json_result(&output)
}
