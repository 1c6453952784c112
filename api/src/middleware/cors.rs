use axum::http::{HeaderName, HeaderValue, Method};
use mcp_registry_core::session::{GENERIC_SESSION_HEADER, LEGACY_SESSION_ID_KEY, SESSION_ID_KEY};
use tower_http::cors::CorsLayer;

const DEFAULT_ORIGINS: &str = "http://localhost:3000";

/// Build a CORS layer from the `MCP_REGISTRY_CORS_ORIGINS` env var.
///
/// - Origins: comma-separated list (default: `http://localhost:3000`)
/// - Headers: Content-Type plus the session headers
/// - Credentials: allowed (the session may travel as a cookie)
pub fn build_cors_layer() -> CorsLayer {
    let origins_str = std::env::var("MCP_REGISTRY_CORS_ORIGINS")
        .unwrap_or_else(|_| DEFAULT_ORIGINS.to_string());
    cors_layer_for(&origins_str)
}

fn parse_origins(origins_str: &str) -> Vec<HeaderValue> {
    origins_str
        .split(',')
        .map(str::trim)
        .filter(|origin| !origin.is_empty())
        .filter_map(|origin| origin.parse::<HeaderValue>().ok())
        .collect()
}

fn cors_layer_for(origins_str: &str) -> CorsLayer {
    CorsLayer::new()
        .allow_origin(parse_origins(origins_str))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            HeaderName::from_static("content-type"),
            HeaderName::from_static(SESSION_ID_KEY),
            HeaderName::from_static(LEGACY_SESSION_ID_KEY),
            HeaderName::from_static(GENERIC_SESSION_HEADER),
        ])
        .allow_credentials(true)
        .max_age(std::time::Duration::from_secs(3600))
}
