use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use mcp_registry_core::error::ToolTestError;
use mcp_registry_core::outcome::Outcome;
use mcp_registry_core::session::{SessionResolver, current_session_id_from_context};
use mcp_registry_core::tools::{ToolDescriptor, ToolReference, ToolStore};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use utoipa::ToSchema;

use crate::error::AppError;
use crate::extract::{AppJson, JsonObject};
use crate::middleware::routing::RoutingLayer;
use crate::state::AppState;
use crate::store::NewTestRecord;

const SESSION_ID_FIELD: &str = "sessionId";
const SUCCESS_SUMMARY: &str = "测试成功";

/// Lookups and test runs; nothing here writes.
pub fn read_router() -> Router<AppState> {
    Router::new()
        .route("/v1/tools", get(list_tools))
        .route("/v1/tools/{reference}", get(get_tool))
        .route("/v1/tools/{reference}/test", post(test_tool))
        .layer(RoutingLayer::reader())
}

pub fn write_router() -> Router<AppState> {
    Router::new()
        .route("/v1/tools/{reference}/test/save", post(save_test_record))
        .layer(RoutingLayer::writer())
}

/// Body session id when present and non-blank, otherwise the session of the
/// inbound request (headers, query, cookies).
fn effective_session(explicit: Option<String>) -> Option<String> {
    explicit
        .filter(|s| !s.trim().is_empty())
        .or_else(current_session_id_from_context)
}

/// Splits a test body into the session id and the tool arguments.
fn split_test_body(mut body: Map<String, Value>) -> (Option<String>, Option<Map<String, Value>>) {
    let session_id = match body.remove(SESSION_ID_FIELD) {
        Some(Value::String(s)) => Some(s),
        Some(Value::Null) | None => None,
        Some(other) => Some(other.to_string()),
    };
    let arguments = (!body.is_empty()).then_some(body);
    (session_id, arguments)
}

/// List registered tools
#[utoipa::path(
    get,
    path = "/v1/tools",
    responses(
        (status = 200, description = "All registered tools", body = Vec<ToolDescriptor>),
        (status = 500, description = "Store unavailable", body = mcp_registry_core::error::ApiError)
    ),
    tag = "tools"
)]
pub async fn list_tools(State(state): State<AppState>) -> Result<Json<Vec<ToolDescriptor>>, AppError> {
    let tools = state
        .tools
        .list_all()
        .await
        .map_err(|e| AppError::Internal(e.to_string()))?;
    Ok(Json(tools))
}

/// Resolve a tool reference (business number or primary key) to a valid tool
#[utoipa::path(
    get,
    path = "/v1/tools/{reference}",
    params(("reference" = i64, Path, description = "toolNum or primary key")),
    responses(
        (status = 200, description = "Resolved tool", body = ToolDescriptor),
        (status = 400, description = "Malformed reference", body = mcp_registry_core::error::ApiError),
        (status = 404, description = "No valid tool matches", body = mcp_registry_core::error::ApiError)
    ),
    tag = "tools"
)]
pub async fn get_tool(
    State(state): State<AppState>,
    Path(reference): Path<String>,
) -> Result<Json<ToolDescriptor>, AppError> {
    let reference = ToolReference::parse(&reference)?;
    let tool = state.tool_tests.resolver().resolve(reference, true).await?;
    Ok(Json(tool))
}

/// Run a tool against the MCP execution backend
///
/// The body is the tool's argument object; a `sessionId` key is taken out and
/// used as the caller session. Failures are reported inside the outcome, so
/// the response status is always 200.
#[utoipa::path(
    post,
    path = "/v1/tools/{reference}/test",
    params(("reference" = i64, Path, description = "toolNum or primary key")),
    request_body(content = Object, description = "Tool arguments plus optional sessionId"),
    responses(
        (status = 200, description = "Normalized invocation outcome", body = Outcome)
    ),
    tag = "tools"
)]
pub async fn test_tool(
    State(state): State<AppState>,
    Path(reference): Path<String>,
    JsonObject(body): JsonObject,
) -> Json<Outcome> {
    let reference = match ToolReference::parse(&reference) {
        Ok(reference) => reference,
        Err(err) => return Json(Outcome::from(err)),
    };

    let (session_id, arguments) = split_test_body(body);
    let session_id = effective_session(session_id);

    Json(
        state
            .tool_tests
            .test_tool(reference, arguments, session_id.as_deref())
            .await,
    )
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SaveTestRecordRequest {
    /// Arguments the test was run with
    #[serde(default)]
    pub test_parameters: Option<Value>,
    /// Outcome returned by the test endpoint
    pub test_result: Value,
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SaveTestRecordResponse {
    pub id: i64,
    pub tool_num: i64,
    pub summary: String,
}

/// Human-readable summary stored with a test record.
///
/// A result that passed but still carries a non-zero tool code gets a warning
/// suffix with the tool's message.
fn summarize(test_result: &Value) -> String {
    let payload = test_result.get("toolResponse").unwrap_or(test_result);
    let code = payload
        .get("mcp_tool_error_code")
        .and_then(|c| c.as_i64().or_else(|| c.as_str()?.trim().parse().ok()))
        .unwrap_or(0);

    if code == 0 {
        return SUCCESS_SUMMARY.to_string();
    }

    let message = payload
        .get("mcp_tool_error_msg")
        .and_then(Value::as_str)
        .filter(|m| !m.trim().is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| format!("错误代码 {code}"));
    format!("{SUCCESS_SUMMARY} (警告: {message})")
}

/// Persist a successful test run
#[utoipa::path(
    post,
    path = "/v1/tools/{reference}/test/save",
    params(("reference" = i64, Path, description = "toolNum or primary key")),
    request_body = SaveTestRecordRequest,
    responses(
        (status = 201, description = "Record stored", body = SaveTestRecordResponse),
        (status = 400, description = "Missing session or failed result", body = mcp_registry_core::error::ApiError),
        (status = 404, description = "No valid tool matches", body = mcp_registry_core::error::ApiError)
    ),
    tag = "tools"
)]
pub async fn save_test_record(
    State(state): State<AppState>,
    Path(reference): Path<String>,
    AppJson(req): AppJson<SaveTestRecordRequest>,
) -> Result<(StatusCode, Json<SaveTestRecordResponse>), AppError> {
    let reference = ToolReference::parse(&reference)?;
    let operator = SessionResolver.resolve(effective_session(req.session_id).as_deref())?;

    if req.test_result.get("isError").and_then(Value::as_bool) == Some(true) {
        return Err(AppError::Validation {
            message: "只能保存成功的测试结果".to_string(),
            field: Some("testResult.isError".to_string()),
            received: Some(Value::Bool(true)),
            docs_hint: None,
        });
    }

    let tool = state
        .tool_tests
        .resolver()
        .resolve(reference, true)
        .await
        .map_err(|err| match err {
            ToolTestError::NotFound { .. } => AppError::from(err),
            other => AppError::Internal(other.to_string()),
        })?;

    let summary = summarize(&req.test_result);
    let record = NewTestRecord {
        tool,
        test_parameters: req.test_parameters.unwrap_or_else(|| Value::Object(Map::new())),
        test_result: req.test_result,
        summary: summary.clone(),
        operator,
    };
    let id = state.records.insert(&record).await?;

    tracing::info!(
        record_id = id,
        tool_num = record.tool.tool_num,
        operator = %record.operator,
        "test record saved"
    );

    Ok((
        StatusCode::CREATED,
        Json(SaveTestRecordResponse {
            id,
            tool_num: record.tool.tool_num,
            summary,
        }),
    ))
}
