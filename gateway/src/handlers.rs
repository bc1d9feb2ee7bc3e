//! Handler模块

use axum::{
    extract::{Path, State},
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info, warn};
use utoipa::ToSchema;
use validator::Validate;

use common::errors::AppError;
use common::models::{
    ConnectionRequest, ConnectionStatus, ConnectionTestResult, DriverDescriptor, ExecuteRequest,
    QueryNode, ResultTable,
};
use common::response::ApiResponse;
use connectivity::session::redact_url;

use crate::catalog;
use crate::state::AppState;

const SERVICE_NAME: &str = "gateway";

/// 列出驱动目录中可用的数据库驱动
#[utoipa::path(
    get,
    path = "/api/connection/drivers",
    tag = "connection",
    responses(
        (status = 200, description = "驱动列表", body = ApiResponse<Vec<DriverDescriptor>>)
    )
)]
pub async fn list_drivers(State(state): State<AppState>) -> Json<ApiResponse<Vec<DriverDescriptor>>> {
    let drivers = state.registry.list_drivers().await;
    info!(count = drivers.len(), "Listed available drivers");
    Json(ApiResponse::ok_with_service(drivers, SERVICE_NAME))
}

/// 切换当前活动连接
#[utoipa::path(
    post,
    path = "/api/connection/connect",
    tag = "connection",
    request_body = ConnectionRequest,
    responses(
        (status = 200, description = "已连接", body = ApiResponse<ConnectionStatus>),
        (status = 400, description = "请求参数无效"),
        (status = 422, description = "驱动不可用"),
        (status = 502, description = "连接或隧道失败")
    )
)]
pub async fn connect(
    State(state): State<AppState>,
    Json(req): Json<ConnectionRequest>,
) -> Result<Json<ApiResponse<ConnectionStatus>>, AppError> {
    req.validate()?;
    let spec = req.into_spec();
    let url = redact_url(&spec.url);
    info!(url = %url, tunneled = spec.use_tunnel, "Connecting to database");

    if let Err(e) = state.connections.connect(&spec).await {
        error!(url = %url, error = %e, "Failed to connect to database");
        return Err(e);
    }

    let status = state.connections.status().await;
    Ok(Json(ApiResponse::ok_with_service(status, SERVICE_NAME)))
}

/// 测试连接参数，不影响当前活动连接
#[utoipa::path(
    post,
    path = "/api/connection/test",
    tag = "connection",
    request_body = ConnectionRequest,
    responses(
        (status = 200, description = "连接测试结果", body = ApiResponse<ConnectionTestResult>),
        (status = 400, description = "请求参数无效")
    )
)]
pub async fn test_connection(
    State(state): State<AppState>,
    Json(req): Json<ConnectionRequest>,
) -> Result<Json<ApiResponse<ConnectionTestResult>>, AppError> {
    req.validate()?;
    let spec = req.into_spec();
    let url = redact_url(&spec.url);
    info!(url = %url, "Testing connection");

    let result = match state.connections.test(&spec).await {
        Ok(latency) => {
            info!(url = %url, latency_ms = latency.as_millis() as u64, "Connection test successful");
            ConnectionTestResult {
                success: true,
                message: "Connection successful".to_string(),
                latency_ms: Some(latency.as_millis() as u64),
                error: None,
                error_type: None,
            }
        }
        Err(e @ AppError::ConnectionInvalid(_)) => {
            warn!(url = %url, error = %e, "Connection test failed - connection invalid");
            ConnectionTestResult {
                success: false,
                message: "Connection invalid".to_string(),
                latency_ms: None,
                error: Some(e.message_or_category()),
                error_type: Some(e.category().to_string()),
            }
        }
        Err(e) => {
            warn!(url = %url, error = %e, category = e.category(), "Connection test failed");
            ConnectionTestResult {
                success: false,
                message: "Connection test failed".to_string(),
                latency_ms: None,
                error: Some(e.message_or_category()),
                error_type: Some(e.category().to_string()),
            }
        }
    };

    Ok(Json(ApiResponse::ok_with_service(result, SERVICE_NAME)))
}

/// 关闭当前活动连接
#[utoipa::path(
    post,
    path = "/api/connection/disconnect",
    tag = "connection",
    responses(
        (status = 200, description = "是否存在被关闭的连接", body = ApiResponse<bool>)
    )
)]
pub async fn disconnect(State(state): State<AppState>) -> Json<ApiResponse<bool>> {
    let closed = state.connections.disconnect().await;
    Json(ApiResponse::ok_with_service(closed, SERVICE_NAME))
}

/// 获取当前活动连接状态
#[utoipa::path(
    get,
    path = "/api/connection/status",
    tag = "connection",
    responses(
        (status = 200, description = "连接状态", body = ApiResponse<ConnectionStatus>)
    )
)]
pub async fn connection_status(State(state): State<AppState>) -> Json<ApiResponse<ConnectionStatus>> {
    let status = state.connections.status().await;
    Json(ApiResponse::ok_with_service(status, SERVICE_NAME))
}

/// 在当前活动连接上执行 SQL
///
/// 执行失败同样返回 200，错误信息写在结果表中。
#[utoipa::path(
    post,
    path = "/api/execute",
    tag = "query",
    request_body = ExecuteRequest,
    responses(
        (status = 200, description = "执行结果", body = ResultTable)
    )
)]
pub async fn execute(
    State(state): State<AppState>,
    Json(req): Json<ExecuteRequest>,
) -> Json<ResultTable> {
    if let Err(e) = req.validate() {
        return Json(ResultTable::failure(AppError::from(e).to_string(), 0));
    }
    Json(state.executor.execute(&req.sql).await)
}

/// 获取诊断查询目录
#[utoipa::path(
    get,
    path = "/api/queries",
    tag = "query",
    responses(
        (status = 200, description = "查询目录", body = Vec<QueryNode>)
    )
)]
pub async fn list_queries(State(state): State<AppState>) -> Json<Vec<QueryNode>> {
    Json(state.catalog.as_ref().clone())
}

/// 根据 ID 获取目录节点
#[utoipa::path(
    get,
    path = "/api/queries/{id}",
    tag = "query",
    params(
        ("id" = String, Path, description = "节点 ID")
    ),
    responses(
        (status = 200, description = "目录节点", body = ApiResponse<QueryNode>),
        (status = 404, description = "节点未找到")
    )
)]
pub async fn get_query(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<QueryNode>>, AppError> {
    let node = catalog::find(&state.catalog, &id)
        .cloned()
        .ok_or_else(|| AppError::NotFound(format!("query {}", id)))?;
    Ok(Json(ApiResponse::ok_with_service(node, SERVICE_NAME)))
}

/// 健康检查端点
#[utoipa::path(
    get,
    path = "/api/health",
    tag = "health",
    responses(
        (status = 200, description = "服务运行正常", body = HealthResponse)
    )
)]
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: state.config.service_name.clone(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now(),
        connected: state.connections.is_connected().await,
    })
}

/// 健康检查响应
#[derive(Serialize, ToSchema)]
pub struct HealthResponse {
    /// 服务状态
    pub status: String,
    /// 服务名称
    pub service: String,
    /// 服务版本
    pub version: String,
    /// 当前时间戳
    pub timestamp: DateTime<Utc>,
    /// 是否存在活动连接
    pub connected: bool,
}
