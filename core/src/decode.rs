//! Two-stage decoding of the execution backend's response.
//!
//! Stage one is the JSON-RPC envelope (`result.content[]` or `error`). Stage
//! two is the tool payload, a second JSON document carried as a string in the
//! first `text` content element:
//!
//! ```json
//! {"result":{"content":[{"type":"text","text":"{\"mcp_tool_error_code\":0,\"mcp_tool_data\":{...}}"}]}}
//! ```

use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use crate::error::ToolTestError;
use crate::outcome::Outcome;

static TIMESTAMP: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[0-9]{4}-[0-9]{2}-[0-9]{2} [0-9]{2}:[0-9]{2}:[0-9]{2}$").expect("timestamp pattern is valid")
});

const UNPARSEABLE_TOOL_DATA: &str = "数据解析失败";

#[derive(Debug, Deserialize)]
struct WireEnvelope {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct WireResult {
    #[serde(default)]
    content: Option<Vec<Value>>,
}

/// Code and message of an `error` envelope. Only integer codes are kept; any
/// error value, whatever its shape, yields a message.
fn protocol_parts(error: Value) -> (Option<i64>, Option<String>) {
    match error {
        Value::Object(mut fields) => (
            fields.get("code").and_then(integer),
            fields.remove("message").and_then(|m| match m {
                Value::Null => None,
                Value::String(s) => Some(s),
                other => Some(other.to_string()),
            }),
        ),
        Value::String(message) => (None, Some(message)),
        other => (None, Some(other.to_string())),
    }
}

/// Integer from a JSON number or numeric string.
fn integer(value: &Value) -> Option<i64> {
    value
        .as_i64()
        .or_else(|| value.as_str()?.trim().parse().ok())
}

/// Deserialize `value` into `T` only when it is a JSON object. Derived struct
/// visitors would otherwise accept arrays positionally.
fn from_object<T: DeserializeOwned>(value: Value, stage: &str) -> Result<T, ToolTestError> {
    if !value.is_object() {
        return Err(ToolTestError::decode(format!("{stage}不是JSON对象: {value}")));
    }
    T::deserialize(value).map_err(|e| ToolTestError::decode(format!("{stage}结构不符合预期: {e}")))
}

#[derive(Debug, Deserialize)]
struct ContentItem {
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WireCode {
    Number(i64),
    Text(String),
}

#[derive(Debug, Deserialize)]
struct InnerPayload {
    #[serde(default)]
    mcp_tool_error_code: Option<WireCode>,
    #[serde(default)]
    mcp_tool_error_msg: Option<Value>,
    #[serde(default)]
    mcp_tool_data: Option<Value>,
}

impl InnerPayload {
    fn error_code(&self) -> Result<i64, ToolTestError> {
        match &self.mcp_tool_error_code {
            None => Ok(0),
            Some(WireCode::Number(code)) => Ok(*code),
            Some(WireCode::Text(raw)) => raw.trim().parse().map_err(|_| {
                ToolTestError::decode(format!("mcp_tool_error_code 不是整数: '{raw}'"))
            }),
        }
    }

    fn error_message(&self) -> Option<String> {
        match &self.mcp_tool_error_msg {
            None | Some(Value::Null) => None,
            Some(Value::String(msg)) => Some(msg.clone()),
            Some(other) => Some(other.to_string()),
        }
    }
}

/// Turns a raw response body into an [`Outcome`]. Never fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResponseDecoder;

impl ResponseDecoder {
    pub fn decode(&self, raw_response_body: &str) -> Outcome {
        let mut content = None;
        match decode_envelope(raw_response_body, &mut content) {
            Ok(outcome) => outcome,
            Err(err) => {
                tracing::warn!(error = %err, body = raw_response_body, "failed to decode MCP response");
                Outcome::from(err).with_trace(content, None)
            }
        }
    }
}

fn decode_envelope(raw: &str, content_trace: &mut Option<Value>) -> Result<Outcome, ToolTestError> {
    let raw_value: Value = serde_json::from_str(raw.trim())
        .map_err(|e| ToolTestError::decode(format!("响应不是合法的JSON对象: {e}")))?;
    let envelope: WireEnvelope = from_object(raw_value, "响应")?;

    if let Some(error) = envelope.error.filter(|e| !e.is_null()) {
        let (code, message) = protocol_parts(error);
        let message = message.unwrap_or_else(|| "unknown error".to_string());
        tracing::warn!(code = ?code, message = %message, "MCP backend returned an error envelope");
        return Err(ToolTestError::Protocol { code, message });
    }

    let result: WireResult = match envelope.result {
        Some(result) => from_object(result, "result")?,
        None => return Err(ToolTestError::decode("响应缺少 result.content")),
    };
    let content = result
        .content
        .ok_or_else(|| ToolTestError::decode("响应缺少 result.content"))?;
    *content_trace = Some(Value::Array(content.clone()));

    let text = content
        .iter()
        .filter(|item| item.is_object())
        .filter_map(|item| ContentItem::deserialize(item).ok())
        .find(|item| item.kind.as_deref() == Some("text"))
        .ok_or_else(|| ToolTestError::decode("result.content 中没有 text 元素"))?
        .text
        .filter(|text| !text.trim().is_empty())
        .ok_or_else(|| ToolTestError::decode("text 内容为空"))?;

    let inner_value: Value = serde_json::from_str(&text)
        .map_err(|e| ToolTestError::decode(format!("工具响应不是合法的JSON: {e}")))?;
    let inner: InnerPayload = from_object(inner_value.clone(), "工具响应")?;

    let code = inner.error_code()?;
    let outcome = if code != 0 {
        tracing::info!(code, message = ?inner.error_message(), "tool reported an error");
        Outcome::tool_error(code, inner.error_message())
    } else {
        Outcome::success(normalize_tool_data(inner.mcp_tool_data))
    };

    Ok(outcome.with_trace(content_trace.take(), Some(inner_value)))
}

/// Shape `mcp_tool_data` into structured business data.
fn normalize_tool_data(data: Option<Value>) -> Option<Value> {
    match data? {
        Value::Null => None,
        Value::String(raw) => {
            if TIMESTAMP.is_match(&raw) {
                return Some(json!({ "currentTime": raw }));
            }
            if raw.trim().is_empty() {
                return None;
            }
            match serde_json::from_str::<Value>(&raw) {
                Ok(parsed @ (Value::Object(_) | Value::Array(_))) => Some(parsed),
                _ => {
                    tracing::warn!(tool_data = %raw, "mcp_tool_data string is not a JSON document");
                    Some(json!({ "error": UNPARSEABLE_TOOL_DATA }))
                }
            }
        }
        other => Some(other),
    }
}
