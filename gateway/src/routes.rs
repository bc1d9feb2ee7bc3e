//! 网关路由模块

use axum::{
    routing::{get, post},
    Router,
};

use crate::handlers::{
    connect, connection_status, disconnect, execute, get_query, health_check, list_drivers,
    list_queries, test_connection,
};
use crate::state::AppState;

/// 创建 API 路由
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/connection/drivers", get(list_drivers))
        .route("/api/connection/connect", post(connect))
        .route("/api/connection/test", post(test_connection))
        .route("/api/connection/disconnect", post(disconnect))
        .route("/api/connection/status", get(connection_status))
        .route("/api/execute", post(execute))
        .route("/api/queries", get(list_queries))
        .route("/api/queries/{id}", get(get_query))
        .route("/api/health", get(health_check))
}
