use crate::util::{ApiCall, api_request};

/// Reachability of the MCP execution backend, as seen by the API.
pub async fn run(api_url: &str) -> i32 {
    api_request(api_url, ApiCall::get("/v1/mcp/status")).await
}
