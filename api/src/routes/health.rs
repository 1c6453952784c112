use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::{Json, Router, routing::get};
use mcp_registry_core::routing::DataStoreKey;
use sqlx::PgPool;

use crate::HealthResponse;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}

async fn ping(pool: &PgPool, key: DataStoreKey) -> bool {
    match sqlx::query_scalar::<_, i32>("SELECT 1").fetch_one(pool).await {
        Ok(_) => true,
        Err(err) => {
            tracing::warn!(data_store = %key, error = %err, "health check failed");
            false
        }
    }
}

/// Health check endpoint: verifies the API and both data stores are operational
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse),
        (status = 503, description = "A data store is unreachable", body = HealthResponse)
    ),
    tag = "system"
)]
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let (reader_ok, writer_ok) = tokio::join!(
        ping(state.stores.pool(DataStoreKey::Reader), DataStoreKey::Reader),
        ping(state.stores.pool(DataStoreKey::Writer), DataStoreKey::Writer),
    );

    let healthy = reader_ok && writer_ok;
    let http_status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        http_status,
        Json(HealthResponse {
            status: if healthy { "ok" } else { "degraded" }.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            reader: reader_ok,
            writer: writer_ok,
        }),
    )
}
