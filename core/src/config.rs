use std::time::Duration;

pub const DEFAULT_CLIENT_NAME: &str = "aimarket-backend";
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// Settings for talking to the MCP execution backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct McpClientConfig {
    /// Base URL every JSON-RPC request is posted to
    pub server_url: String,
    /// Sent as `x-wind-clientname`
    pub client_name: String,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
}

impl McpClientConfig {
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            client_name: DEFAULT_CLIENT_NAME.to_string(),
            connect_timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            read_timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
        }
    }

    pub fn with_client_name(mut self, client_name: impl Into<String>) -> Self {
        self.client_name = client_name.into();
        self
    }

    pub fn with_timeouts(mut self, connect: Duration, read: Duration) -> Self {
        self.connect_timeout = connect;
        self.read_timeout = read;
        self
    }

    /// Reads `MCP_SERVER_URL`, `MCP_CLIENT_NAME`, `MCP_CLIENT_TIMEOUT_MS`,
    /// `MCP_CONNECT_TIMEOUT_MS` and `MCP_READ_TIMEOUT_MS`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let server_url = lookup("MCP_SERVER_URL").unwrap_or_default();
        if server_url.trim().is_empty() {
            tracing::warn!("MCP_SERVER_URL is not set; tool tests will fail to connect");
        }

        let shared = millis(&lookup, "MCP_CLIENT_TIMEOUT_MS").unwrap_or(DEFAULT_TIMEOUT_MS);
        let connect = millis(&lookup, "MCP_CONNECT_TIMEOUT_MS").unwrap_or(shared);
        let read = millis(&lookup, "MCP_READ_TIMEOUT_MS").unwrap_or(shared);

        Self::new(server_url.trim())
            .with_client_name(lookup("MCP_CLIENT_NAME").unwrap_or_default())
            .with_timeouts(Duration::from_millis(connect), Duration::from_millis(read))
    }

    /// Configured client name, or the default when blank.
    pub fn effective_client_name(&self) -> &str {
        let trimmed = self.client_name.trim();
        if trimmed.is_empty() {
            DEFAULT_CLIENT_NAME
        } else {
            trimmed
        }
    }
}

fn millis(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<u64> {
    let raw = lookup(key)?;
    match raw.trim().parse::<u64>() {
        Ok(value) if value > 0 => Some(value),
        _ => {
            tracing::warn!(key, value = %raw, "ignoring invalid timeout");
            None
        }
    }
}
