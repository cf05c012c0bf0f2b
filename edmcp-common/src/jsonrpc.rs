//! JSON-RPC 2.0 envelope types used by every transport.
//!
//! The response type carries its payload as a flattened enum, so a response
//! serializes with exactly one of `result` or `error`.

use rmcp::ErrorData;
use rmcp::model::ErrorCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// JSON-RPC protocol version emitted on every response.
pub const JSONRPC_VERSION: &str = "2.0";

/// Longest body excerpt included in parse error diagnostics.
const BODY_EXCERPT_LEN: usize = 100;

/// Request ID - a string or a number, echoed back verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(serde_json::Number),
    String(String),
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestId::Number(n) => write!(f, "{}", n),
            RequestId::String(s) => write!(f, "{}", s),
        }
    }
}

impl From<i64> for RequestId {
    fn from(n: i64) -> Self {
        RequestId::Number(n.into())
    }
}

impl From<i32> for RequestId {
    fn from(n: i32) -> Self {
        RequestId::Number(n.into())
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        RequestId::String(s.to_string())
    }
}

fn default_version() -> String {
    JSONRPC_VERSION.to_string()
}

/// An inbound JSON-RPC request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    #[serde(default = "default_version")]
    pub jsonrpc: String,
    #[serde(default)]
    pub id: Option<RequestId>,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    /// Create a new request with the given method and optional params.
    pub fn new(id: impl Into<RequestId>, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: default_version(),
            id: Some(id.into()),
            method: method.into(),
            params,
        }
    }

    /// A notification carries no id and expects no response.
    pub fn is_notification(&self) -> bool {
        self.id.is_none() && self.method.starts_with("notifications/")
    }
}

/// Either side of a response. Never both, never neither.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponsePayload {
    Result(Value),
    Error(ErrorData),
}

/// An outbound JSON-RPC response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: Option<RequestId>,
    #[serde(flatten)]
    pub payload: ResponsePayload,
}

impl JsonRpcResponse {
    /// Create a successful response.
    pub fn success(id: Option<RequestId>, result: Value) -> Self {
        Self {
            jsonrpc: default_version(),
            id,
            payload: ResponsePayload::Result(result),
        }
    }

    /// Create an error response.
    pub fn error(id: Option<RequestId>, error: ErrorData) -> Self {
        Self {
            jsonrpc: default_version(),
            id,
            payload: ResponsePayload::Error(error),
        }
    }

    pub fn id(&self) -> Option<&RequestId> {
        self.id.as_ref()
    }

    pub fn is_error(&self) -> bool {
        matches!(self.payload, ResponsePayload::Error(_))
    }

    /// The error code, if this is an error response.
    pub fn error_code(&self) -> Option<i32> {
        match &self.payload {
            ResponsePayload::Error(err) => Some(err.code.0),
            ResponsePayload::Result(_) => None,
        }
    }
}

/// Parse error (-32700): the body is not JSON.
pub fn parse_error(data: Option<Value>) -> ErrorData {
    ErrorData::new(ErrorCode::PARSE_ERROR, "Parse error - Invalid JSON", data)
}

/// Invalid request (-32600): JSON, but not a usable request.
pub fn invalid_request(message: impl Into<String>) -> ErrorData {
    ErrorData::new(ErrorCode::INVALID_REQUEST, message.into(), None)
}

/// Method not found (-32601).
pub fn method_not_found(method: &str) -> ErrorData {
    ErrorData::new(
        ErrorCode::METHOD_NOT_FOUND,
        format!("Method not found: {}", method),
        None,
    )
}

/// Invalid params (-32602).
pub fn invalid_params(message: impl Into<String>) -> ErrorData {
    ErrorData::new(ErrorCode::INVALID_PARAMS, message.into(), None)
}

/// Internal error (-32603) with diagnostic data.
pub fn internal_error(detail: impl Into<String>) -> ErrorData {
    ErrorData::new(
        ErrorCode::INTERNAL_ERROR,
        "Internal error",
        Some(Value::String(detail.into())),
    )
}

fn excerpt(body: &str) -> String {
    if body.chars().count() > BODY_EXCERPT_LEN {
        let head: String = body.chars().take(BODY_EXCERPT_LEN).collect();
        format!("{}...", head)
    } else {
        body.to_string()
    }
}

/// Parse a raw message body into a request.
///
/// On failure, returns the error response the transport should send back.
/// The request id is echoed whenever it can be recovered from the body.
pub fn parse_request(body: &str) -> Result<JsonRpcRequest, JsonRpcResponse> {
    if body.trim().is_empty() {
        return Err(JsonRpcResponse::error(
            None,
            invalid_request("Invalid Request: empty body"),
        ));
    }

    let value: Value = serde_json::from_str(body).map_err(|e| {
        let data = format!("Error: {}. Body received: {}", e, excerpt(body));
        JsonRpcResponse::error(None, parse_error(Some(Value::String(data))))
    })?;

    let id = value
        .get("id")
        .and_then(|id| serde_json::from_value::<RequestId>(id.clone()).ok());

    let request: JsonRpcRequest = serde_json::from_value(value).map_err(|e| {
        JsonRpcResponse::error(id.clone(), invalid_request(format!("Invalid Request: {}", e)))
    })?;

    if request.method.trim().is_empty() {
        return Err(JsonRpcResponse::error(
            id,
            invalid_request("Invalid Request: method must not be empty"),
        ));
    }

    Ok(request)
}
