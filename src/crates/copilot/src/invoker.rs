//! HTTP invocation of catalog operations.

use crate::catalog::{OperationSummary, ParamLocation, BINARY_BODY_FIELD};
use crate::error::{CopilotError, Result};
use crate::executor::{BoundParameters, Headers, InvocationError, InvocationResponse, OperationInvoker};
use async_trait::async_trait;
use reqwest::{Client, Method};
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::debug;

/// Headers never forwarded to the target API.
const DROPPED_HEADERS: [&str; 6] = [
    "host",
    "content-length",
    "connection",
    "transfer-encoding",
    "accept-encoding",
    "x-app-name",
];

/// Calls operations over HTTP with reqwest.
#[derive(Clone)]
pub struct HttpOperationInvoker {
    client: Client,
    base_url: String,
}

impl HttpOperationInvoker {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CopilotError::Config(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

/// Split bound parameters by where the operation sends them.
#[derive(Debug, Default, PartialEq)]
struct RequestParts {
    path: String,
    query: Vec<(String, String)>,
    headers: Vec<(String, String)>,
    body: Option<Value>,
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn build_parts(
    op: &OperationSummary,
    params: &BoundParameters,
) -> std::result::Result<RequestParts, InvocationError> {
    let mut parts = RequestParts {
        path: op.path.clone(),
        ..Default::default()
    };
    let mut body = Map::new();

    for (name, value) in params {
        match op.parameter(name).map(|p| p.location) {
            Some(ParamLocation::Path) => {
                let placeholder = format!("{{{}}}", name);
                parts.path = parts.path.replace(&placeholder, &value_to_string(value));
            }
            Some(ParamLocation::Query) => parts.query.push((name.clone(), value_to_string(value))),
            Some(ParamLocation::Header) => parts.headers.push((name.clone(), value_to_string(value))),
            Some(ParamLocation::Cookie) => parts
                .headers
                .push(("cookie".to_string(), format!("{}={}", name, value_to_string(value)))),
            None => {
                body.insert(name.clone(), value.clone());
            }
        }
    }

    if parts.path.contains('{') {
        return Err(InvocationError::InvalidRequest(format!(
            "unbound path placeholder in {}",
            parts.path
        )));
    }

    if op.request_body.is_some() && !body.is_empty() {
        parts.body = Some(match body.remove(BINARY_BODY_FIELD) {
            Some(binary) => binary,
            None => Value::Object(body),
        });
    }
    Ok(parts)
}

#[async_trait]
impl OperationInvoker for HttpOperationInvoker {
    async fn call(
        &self,
        operation: &OperationSummary,
        params: &BoundParameters,
        headers: &Headers,
    ) -> std::result::Result<InvocationResponse, InvocationError> {
        let parts = build_parts(operation, params)?;
        let method = Method::from_bytes(operation.method.to_uppercase().as_bytes())
            .map_err(|e| InvocationError::InvalidRequest(e.to_string()))?;
        let url = format!("{}{}", self.base_url, parts.path);
        debug!(operation_id = %operation.id, method = %method, url = %url, "Invoking operation");

        let mut request = self.client.request(method, &url).query(&parts.query);
        for (name, value) in headers {
            if !DROPPED_HEADERS.contains(&name.to_lowercase().as_str()) {
                request = request.header(name.as_str(), value.as_str());
            }
        }
        for (name, value) in &parts.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &parts.body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                InvocationError::Timeout(e.to_string())
            } else {
                InvocationError::Transport(e.to_string())
            }
        })?;

        let status = response.status().as_u16();
        let text = response.text().await.map_err(|e| {
            if e.is_timeout() {
                InvocationError::Timeout(e.to_string())
            } else {
                InvocationError::Transport(e.to_string())
            }
        })?;
        let payload = if text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or_else(|_| Value::String(text))
        };

        Ok(InvocationResponse::new(status, payload))
    }
}
