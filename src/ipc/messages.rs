//! Wire messages of the tool transport.
//!
//! Every line on the wire is one JSON object: a `ToolRequest` going to the
//! tool server or a `ToolResponse` coming back, paired by `id`. The field
//! names echo JSON-RPC, but there is no `jsonrpc` member and no batching.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::tools::ToolSpec;

/// One call from a client to the tool server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolRequest {
    /// Chosen by the client; echoed back on the matching response.
    pub id: u64,
    /// One of [`Methods`].
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

impl ToolRequest {
    pub fn new(id: u64, method: impl Into<String>, params: Value) -> Self {
        Self {
            id,
            method: method.into(),
            params,
        }
    }
}

/// Exactly one of `result` or `error` is set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResponse {
    /// Id of the answered request, or 0 when the line could not be read as one.
    pub id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ProtocolError>,
}

impl ToolResponse {
    pub fn success(id: u64, result: Value) -> Self {
        Self {
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: u64, error: ProtocolError) -> Self {
        Self {
            id,
            result: None,
            error: Some(error),
        }
    }

    /// Split into the call's outcome. A response with neither member
    /// answers with `null`.
    pub fn into_result(self) -> Result<Value, ProtocolError> {
        match (self.result, self.error) {
            (_, Some(error)) => Err(error),
            (result, None) => Ok(result.unwrap_or(Value::Null)),
        }
    }
}

/// Failure of a request as a whole, as opposed to a tool that ran and
/// reported `is_error`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolError {
    /// See [`ErrorCode`].
    pub code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ProtocolError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn parse_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::PARSE_ERROR, message)
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::INVALID_REQUEST, message)
    }

    pub fn method_not_found(method: impl Into<String>) -> Self {
        Self::new(ErrorCode::METHOD_NOT_FOUND, format!("Unknown method: {}", method.into()))
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::INVALID_PARAMS, message)
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::INTERNAL_ERROR, message)
    }

    /// The missing name is repeated in `data.name` for clients that match on it.
    pub fn unknown_tool(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            code: ErrorCode::UNKNOWN_TOOL,
            message: format!("Unknown tool: {}", name),
            data: Some(json!({ "name": name })),
        }
    }
}

/// Numeric codes carried in [`ProtocolError::code`].
pub struct ErrorCode;

impl ErrorCode {
    /// Line was not JSON.
    pub const PARSE_ERROR: i32 = -32700;
    /// JSON, but not shaped like a request.
    pub const INVALID_REQUEST: i32 = -32600;
    pub const METHOD_NOT_FOUND: i32 = -32601;
    /// `params` did not fit the method.
    pub const INVALID_PARAMS: i32 = -32602;
    pub const INTERNAL_ERROR: i32 = -32603;
    /// `tools/call` named a tool the registry does not hold.
    pub const UNKNOWN_TOOL: i32 = 1001;
}

/// Method names the server answers.
pub struct Methods;

impl Methods {
    pub const INITIALIZE: &'static str = "initialize";
    pub const PING: &'static str = "ping";
    pub const TOOLS_LIST: &'static str = "tools/list";
    pub const TOOLS_CALL: &'static str = "tools/call";
}

/// Params of `tools/call`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallToolParams {
    pub name: String,
    /// Dispatched as sent. Callers normalize before sending.
    #[serde(default)]
    pub arguments: Map<String, Value>,
}

/// Result of `initialize`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitializeResult {
    pub name: String,
    pub version: String,
    pub tools: Vec<ToolSpec>,
}

/// Result of `tools/list`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListToolsResult {
    pub tools: Vec<ToolSpec>,
}
