use std::net::SocketAddr;

use axum::Router;
use mcp_registry_core::config::McpClientConfig;
use mcp_registry_core::invoker::RemoteInvoker;
use mcp_registry_core::service::ToolTestService;
use serde::Serialize;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

mod config;
mod error;
mod extract;
mod middleware;
mod routes;
mod state;
mod store;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "MCP Registry API",
        version = "0.1.0",
        description = "Resolve registered MCP tools and test them against the MCP execution backend."
    ),
    paths(
        routes::health::health_check,
        routes::mcp::mcp_status,
        routes::tools::list_tools,
        routes::tools::get_tool,
        routes::tools::test_tool,
        routes::tools::save_test_record,
    ),
    components(schemas(
        HealthResponse,
        routes::mcp::McpStatusResponse,
        routes::tools::SaveTestRecordRequest,
        routes::tools::SaveTestRecordResponse,
        mcp_registry_core::error::ApiError,
        mcp_registry_core::error::ErrorKind,
        mcp_registry_core::outcome::Outcome,
        mcp_registry_core::tools::ToolDescriptor,
    ))
)]
struct ApiDoc;

#[derive(Serialize, utoipa::ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    /// Reader store answered a ping
    pub reader: bool,
    /// Writer store answered a ping
    pub writer: bool,
}

fn app(app_state: state::AppState) -> Router {
    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .merge(routes::health::router())
        .merge(routes::mcp::router())
        .merge(routes::tools::read_router())
        .merge(routes::tools::write_router())
        .layer(middleware::unit_of_work::UnitOfWorkLayer)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(middleware::cors::build_cors_layer()),
        )
        .with_state(app_state)
}

#[tokio::main]
async fn main() {
    // Load .env if present (dev only)
    let _ = dotenvy::dotenv();

    // Structured JSON logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "mcp_registry_api=debug,mcp_registry_core=debug,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    let db_config = config::DatabaseConfig::from_env().expect("Invalid database configuration");
    let stores = store::Stores::connect(&db_config)
        .await
        .expect("Failed to connect to database");

    stores.migrate().await.expect("Failed to run migrations");

    let mcp_config = McpClientConfig::from_env();
    tracing::info!(
        server_url = %mcp_config.server_url,
        client_name = mcp_config.effective_client_name(),
        "MCP client configured"
    );
    let invoker = RemoteInvoker::new(mcp_config).expect("Failed to build MCP client");
    let tool_tests = ToolTestService::new(store::PgToolStore::new(stores.clone()), invoker);

    let app = app(state::AppState::new(stores, tool_tests));

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(3000);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("MCP Registry API listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    axum::serve(listener, app).await.unwrap();
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    use super::*;
    use crate::routes::testing::{body_json, offline_state};

    #[tokio::test]
    async fn openapi_document_lists_tool_routes() {
        let response = app(offline_state("http://127.0.0.1:1/mcp"))
            .oneshot(
                Request::builder()
                    .uri("/api-doc/openapi.json")
                    .body(Body::empty())
                    .expect("request should build"),
            )
            .await
            .expect("openapi request");

        assert_eq!(response.status(), StatusCode::OK);
        let doc = body_json(response).await;
        for path in [
            "/health",
            "/v1/mcp/status",
            "/v1/tools",
            "/v1/tools/{reference}",
            "/v1/tools/{reference}/test",
            "/v1/tools/{reference}/test/save",
        ] {
            assert!(doc["paths"].get(path).is_some(), "missing {path}");
        }
    }

    #[tokio::test]
    async fn session_header_reaches_tool_test() {
        // Header session passes validation, so the failure comes from the
        // unreachable store instead.
        let response = app(offline_state("http://127.0.0.1:1/mcp"))
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/v1/tools/100/test")
                    .header("windsessionid", "header-session")
                    .body(Body::empty())
                    .expect("request should build"),
            )
            .await
            .expect("test request");

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["isError"], true);
        assert_eq!(body["errorKind"], "not_found");
    }
}
