use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use reqwest::header::{ACCEPT, CACHE_CONTROL, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use serde_json::{Map, Value, json};

use crate::config::McpClientConfig;
use crate::error::ToolTestError;
use crate::session::{LEGACY_SESSION_ID_KEY, SESSION_ID_KEY, current_session_id_from_context};
use crate::tools::ToolDescriptor;

pub const CLIENT_NAME_HEADER: &str = "x-wind-clientname";
pub const PROTOCOL_VERSION: &str = "2025-03-26";

const ACCEPT_VALUE: &str = "application/json, text/event-stream";
const LIVENESS_TIMEOUT: Duration = Duration::from_secs(5);

/// JSON-RPC client for the MCP execution backend.
///
/// Every call is a blocking round trip bounded by the configured connect and
/// read timeouts; there is no retry.
#[derive(Debug)]
pub struct RemoteInvoker {
    config: McpClientConfig,
    client: reqwest::Client,
    next_request_id: AtomicU64,
    initialized: AtomicBool,
}

impl RemoteInvoker {
    pub fn new(config: McpClientConfig) -> Result<Self, ToolTestError> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .read_timeout(config.read_timeout)
            .build()
            .map_err(|e| ToolTestError::transport(format!("无法创建HTTP客户端: {e}")))?;

        Ok(Self {
            config,
            client,
            next_request_id: AtomicU64::new(0),
            initialized: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &McpClientConfig {
        &self.config
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// Call `tools/call` for `descriptor` and return the raw response body.
    ///
    /// `None` arguments are sent as an empty object.
    pub async fn invoke(
        &self,
        descriptor: &ToolDescriptor,
        arguments: Option<Map<String, Value>>,
        session_id: &str,
    ) -> Result<String, ToolTestError> {
        if HeaderValue::from_str(session_id).is_err() {
            return Err(ToolTestError::validation("sessionId 含有非法字符"));
        }
        if !self.is_initialized() {
            self.initialize(session_id).await;
        }

        let request = json!({
            "jsonrpc": "2.0",
            "id": self.next_request_id.fetch_add(1, Ordering::Relaxed) + 1,
            "method": "tools/call",
            "params": {
                "name": descriptor.tool_name,
                "arguments": Value::Object(arguments.unwrap_or_default()),
            }
        });

        tracing::info!(
            url = %self.config.server_url,
            tool_name = %descriptor.tool_name,
            tool_num = descriptor.tool_num,
            session_id,
            "calling MCP tool"
        );

        let body = self.post(&request, session_id).await?;
        if body.trim().is_empty() {
            tracing::error!(tool_name = %descriptor.tool_name, "MCP backend returned an empty response");
            return Err(ToolTestError::transport("MCP服务器无响应"));
        }

        tracing::info!(response = %body, "received MCP response");
        Ok(body)
    }

    /// Best-effort liveness check; any failure reads as "not connected".
    pub async fn is_connected(&self) -> bool {
        if self.config.server_url.trim().is_empty() {
            return false;
        }

        let session_id = current_session_id_from_context();
        let result = self
            .client
            .get(&self.config.server_url)
            .headers(self.headers(session_id.as_deref()))
            .timeout(self.liveness_timeout())
            .send()
            .await;

        match result {
            Ok(response) => {
                tracing::info!(status = response.status().as_u16(), "MCP connectivity check");
                response.status() == reqwest::StatusCode::OK
            }
            Err(e) => {
                tracing::error!(error = %e, "MCP connectivity check failed");
                false
            }
        }
    }

    /// Upper bound for one round trip, including a backend that accepts the
    /// connection and never answers.
    fn request_timeout(&self) -> Duration {
        self.config.connect_timeout + self.config.read_timeout
    }

    fn liveness_timeout(&self) -> Duration {
        LIVENESS_TIMEOUT.min(self.request_timeout())
    }

    /// `initialize` + `notifications/initialized` handshake. Failures are
    /// logged and retried on the next call.
    async fn initialize(&self, session_id: &str) {
        let request = json!({
            "jsonrpc": "2.0",
            "id": 0,
            "method": "initialize",
            "params": {
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": {"tools": {"listChanged": true}},
                "clientInfo": {"name": "mcp-tool-caller", "version": "1.0.0"}
            }
        });

        match self.post(&request, session_id).await {
            Ok(body) if body.contains("result") => {
                let notification = json!({
                    "jsonrpc": "2.0",
                    "method": "notifications/initialized"
                });
                if let Err(e) = self.post(&notification, session_id).await {
                    tracing::warn!(error = %e, "initialized notification failed");
                }
                self.initialized.store(true, Ordering::Release);
                tracing::info!(session_id, "MCP session initialized");
            }
            Ok(body) => {
                tracing::warn!(response = %body, "MCP initialize returned no result");
            }
            Err(e) => {
                tracing::error!(error = %e, "MCP initialize failed");
            }
        }
    }

    async fn post(&self, payload: &Value, session_id: &str) -> Result<String, ToolTestError> {
        let response = self
            .client
            .post(&self.config.server_url)
            .headers(self.headers(Some(session_id)))
            .header(CONTENT_TYPE, "application/json")
            .timeout(self.request_timeout())
            .json(payload)
            .send()
            .await
            .map_err(|e| ToolTestError::transport(format!("请求MCP服务器失败: {e}")))?;

        let status = response.status();
        if status != reqwest::StatusCode::OK && status != reqwest::StatusCode::ACCEPTED {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = status.as_u16(), body = %body, "MCP request rejected");
            return Err(ToolTestError::Transport {
                message: format!("MCP服务器返回状态码 {}: {}", status.as_u16(), body),
                status: Some(status.as_u16()),
            });
        }

        let is_event_stream = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.contains("text/event-stream"));

        let read = if is_event_stream {
            read_event_stream(response).await
        } else {
            response.text().await
        };

        read.map_err(|e| ToolTestError::transport(format!("读取MCP响应失败: {e}")))
    }

    fn headers(&self, session_id: Option<&str>) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static(ACCEPT_VALUE));
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));

        match session_id.map(HeaderValue::from_str) {
            Some(Ok(value)) => {
                headers.insert(HeaderName::from_static(LEGACY_SESSION_ID_KEY), value.clone());
                headers.insert(HeaderName::from_static(SESSION_ID_KEY), value);
            }
            Some(Err(_)) => tracing::warn!("session id is not a valid header value; sending without it"),
            None => tracing::warn!("no session id; the MCP backend may reject the request"),
        }

        if let Ok(value) = HeaderValue::from_str(self.config.effective_client_name()) {
            headers.insert(HeaderName::from_static(CLIENT_NAME_HEADER), value);
        }
        headers
    }
}

/// Collects `data:` payloads of an SSE body until one carries a JSON-RPC
/// `result` or `error`.
#[derive(Debug, Default)]
struct EventStreamCollector {
    collected: String,
}

impl EventStreamCollector {
    /// Returns true once the response is complete.
    fn push_line(&mut self, line: &str) -> bool {
        let Some(data) = line.strip_prefix("data:") else {
            return false;
        };
        let data = data.strip_prefix(' ').unwrap_or(data);
        self.collected.push_str(data);
        data.contains("\"result\"") || data.contains("\"error\"")
    }

    fn finish(self) -> String {
        self.collected
    }
}

async fn read_event_stream(mut response: reqwest::Response) -> Result<String, reqwest::Error> {
    let mut collector = EventStreamCollector::default();
    let mut pending: Vec<u8> = Vec::new();

    while let Some(chunk) = response.chunk().await? {
        pending.extend_from_slice(&chunk);
        while let Some(pos) = pending.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = pending.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw);
            if collector.push_line(line.trim_end_matches(['\r', '\n'])) {
                return Ok(collector.finish());
            }
        }
    }

    if !pending.is_empty() {
        let line = String::from_utf8_lossy(&pending);
        collector.push_line(line.trim_end_matches('\r'));
    }
    Ok(collector.finish())
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use axum::Router;
    use axum::http::{HeaderMap, StatusCode};
    use axum::response::{IntoResponse, Response};
    use axum::routing::post;
    use serde_json::Value;

    /// What the fake backend answers to `tools/call`.
    #[derive(Clone)]
    pub(crate) enum Reply {
        Json(String),
        EventStream(String),
        Status(StatusCode, String),
        /// Hold every request, including the GET liveness check, before answering.
        Stall(Duration),
    }

    #[derive(Clone, Default)]
    pub(crate) struct Recorded {
        pub(crate) requests: Arc<Mutex<Vec<(HeaderMap, Value)>>>,
    }

    impl Recorded {
        pub(crate) fn methods(&self) -> Vec<String> {
            self.requests
                .lock()
                .unwrap()
                .iter()
                .map(|(_, body)| body["method"].as_str().unwrap_or_default().to_string())
                .collect()
        }
    }

    /// Spawn a throwaway MCP backend on an ephemeral port; returns its URL.
    pub(crate) async fn spawn_backend(reply: Reply) -> (String, Recorded) {
        let recorded = Recorded::default();
        let sink = recorded.clone();
        let get_reply = reply.clone();

        let app = Router::new().route(
            "/mcp",
            post(move |headers: HeaderMap, body: String| {
                let reply = reply.clone();
                let sink = sink.clone();
                async move {
                    let value: Value = serde_json::from_str(&body).unwrap_or(Value::Null);
                    let method = value["method"].as_str().unwrap_or_default().to_string();
                    sink.requests.lock().unwrap().push((headers, value));
                    stall(&reply).await;
                    respond(&method, reply)
                }
            })
            .get(move || {
                let reply = get_reply.clone();
                async move {
                    stall(&reply).await;
                    StatusCode::OK
                }
            }),
        );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        (format!("http://{addr}/mcp"), recorded)
    }

    async fn stall(reply: &Reply) {
        if let Reply::Stall(delay) = reply {
            tokio::time::sleep(*delay).await;
        }
    }

    fn respond(method: &str, reply: Reply) -> Response {
        match method {
            "initialize" => (
                [("content-type", "application/json")],
                r#"{"jsonrpc":"2.0","id":0,"result":{"protocolVersion":"2025-03-26"}}"#,
            )
                .into_response(),
            "notifications/initialized" => StatusCode::ACCEPTED.into_response(),
            _ => match reply {
                Reply::Json(body) => ([("content-type", "application/json")], body).into_response(),
                Reply::EventStream(body) => {
                    ([("content-type", "text/event-stream")], body).into_response()
                }
                Reply::Status(status, body) => (status, body).into_response(),
                Reply::Stall(_) => (
                    [("content-type", "application/json")],
                    r#"{"result":{"content":[]}}"#,
                )
                    .into_response(),
            },
        }
    }
}
