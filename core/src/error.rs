use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Prefix carried by every decode-stage failure message.
pub const DECODE_ERROR_PREFIX: &str = "解析MCP响应失败";
/// Prefix carried by protocol-level (`error` envelope) failure messages.
pub const PROTOCOL_ERROR_PREFIX: &str = "MCP错误";

/// Failure taxonomy of the tool test pipeline.
///
/// None of these escape `ToolTestService::test_tool`: every variant is folded
/// into an `Outcome` at that boundary.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ToolTestError {
    /// Missing/blank session or a reference that is not a tool identifier.
    #[error("{message}")]
    Validation { message: String },
    /// Every resolution strategy came back empty.
    #[error("工具不存在，toolNum: {reference}")]
    NotFound { reference: i64 },
    /// Connection failure, timeout, or a non-success transport status.
    #[error("MCP客户端调用失败: {message}")]
    Transport {
        message: String,
        status: Option<u16>,
    },
    /// The backend answered with a well-formed `error` envelope.
    #[error("MCP错误: {message}")]
    Protocol { code: Option<i64>, message: String },
    /// Malformed or unexpected JSON at either decoding stage.
    #[error("解析MCP响应失败: {message}")]
    Decode { message: String },
}

impl ToolTestError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            status: None,
        }
    }

    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation { .. } => ErrorKind::Validation,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Transport { .. } => ErrorKind::Transport,
            Self::Protocol { .. } => ErrorKind::Protocol,
            Self::Decode { .. } => ErrorKind::Decode,
        }
    }
}

/// Stage that produced an error outcome.
///
/// `Tool` is the business failure reported by the tool itself through a
/// non-zero `mcp_tool_error_code`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    NotFound,
    Transport,
    Protocol,
    Decode,
    Tool,
}

/// Structured error response body used by the HTTP surface.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ApiError {
    /// Machine-readable error code (e.g. "validation_failed", "not_found")
    pub error: String,
    /// Human-readable description of what went wrong
    pub message: String,
    /// Which field caused the error (if applicable)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    /// The value that was received (if applicable)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub received: Option<serde_json::Value>,
    /// Request ID for tracing and debugging
    pub request_id: String,
    /// Hint about what the correct usage looks like
    #[serde(skip_serializing_if = "Option::is_none")]
    pub docs_hint: Option<String>,
}

/// Error codes used across the API
pub mod codes {
    pub const VALIDATION_FAILED: &str = "validation_failed";
    pub const NOT_FOUND: &str = "not_found";
    pub const INTERNAL_ERROR: &str = "internal_error";
}
