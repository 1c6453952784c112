use axum::extract::State;
use axum::{Json, Router, routing::get};
use serde::Serialize;
use utoipa::ToSchema;

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/v1/mcp/status", get(mcp_status))
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct McpStatusResponse {
    /// True when the execution backend answered the liveness check with 200
    pub connected: bool,
    pub server_url: String,
}

/// Reachability of the MCP execution backend
#[utoipa::path(
    get,
    path = "/v1/mcp/status",
    responses(
        (status = 200, description = "Connectivity result", body = McpStatusResponse)
    ),
    tag = "mcp"
)]
pub async fn mcp_status(State(state): State<AppState>) -> Json<McpStatusResponse> {
    let connected = state.tool_tests.is_connected().await;
    tracing::info!(connected, "MCP backend checked");

    Json(McpStatusResponse {
        connected,
        server_url: state.tool_tests.invoker().config().server_url.clone(),
    })
}
