use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

use crate::error::{ErrorKind, ToolTestError};

/// Normalized result of a tool test invocation.
///
/// `is_error` is always set. On success only `business_data` is meaningful;
/// on a tool or protocol failure `error_code`/`error_message` are populated;
/// every other failure carries a single `error` string. `content` and
/// `tool_response` are raw protocol traces kept for display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Outcome {
    pub is_error: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub business_data: Option<Value>,
    /// Raw `result.content` array of the envelope
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<Value>,
    /// Parsed inner payload
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_response: Option<Value>,
}

impl Outcome {
    fn blank(is_error: bool) -> Self {
        Self {
            is_error,
            error_kind: None,
            error_code: None,
            error_message: None,
            error: None,
            business_data: None,
            content: None,
            tool_response: None,
        }
    }

    pub fn success(business_data: Option<Value>) -> Self {
        Self {
            business_data,
            ..Self::blank(false)
        }
    }

    /// Business failure reported by the tool through a non-zero error code.
    /// A missing or blank message is replaced by one naming the code.
    pub fn tool_error(code: i64, message: Option<String>) -> Self {
        let message = message
            .filter(|msg| !msg.trim().is_empty())
            .unwrap_or_else(|| tool_failure(code));
        Self {
            error_kind: Some(ErrorKind::Tool),
            error_code: Some(code),
            error_message: Some(message),
            ..Self::blank(true)
        }
    }

    pub fn with_trace(mut self, content: Option<Value>, tool_response: Option<Value>) -> Self {
        self.content = content;
        self.tool_response = tool_response;
        self
    }

    /// Single human-readable message for error outcomes.
    pub fn message(&self) -> Option<String> {
        if !self.is_error {
            return None;
        }
        if let Some(error) = &self.error {
            return Some(error.clone());
        }
        match (&self.error_message, self.error_code) {
            (Some(msg), Some(code))
                if self.error_kind == Some(ErrorKind::Tool) && *msg != tool_failure(code) =>
            {
                Some(format!("工具执行失败: {msg} (错误代码: {code})"))
            }
            (Some(msg), _) => Some(msg.clone()),
            (None, Some(code)) => Some(tool_failure(code)),
            (None, None) => None,
        }
    }
}

fn tool_failure(code: i64) -> String {
    format!("工具执行失败 (错误代码: {code})")
}

impl From<ToolTestError> for Outcome {
    fn from(err: ToolTestError) -> Self {
        let kind = err.kind();
        match err {
            ToolTestError::Protocol { code, .. } => Self {
                error_kind: Some(kind),
                error_code: code,
                error_message: Some(err.to_string()),
                ..Self::blank(true)
            },
            other => Self {
                error_kind: Some(kind),
                error: Some(other.to_string()),
                ..Self::blank(true)
            },
        }
    }
}
