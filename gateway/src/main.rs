//! 数据库连接网关
//!
//! 对外提供以下功能：
//! - 从驱动目录发现并加载数据库驱动
//! - 维护单个活动连接（可经 SSH 隧道）
//! - 在活动连接上执行 SQL 并返回 JSON 结果表
//! - 内置诊断查询目录

mod catalog;
mod handlers;
mod routes;
mod state;

use anyhow::Context;
use axum::{http::HeaderValue, middleware, routing::get, Json, Router};
use common::config::{self, AppConfig};
use common::middleware::request_id::request_id_middleware;
use common::models::{
    ConnectionRequest, ConnectionSpec, ConnectionStatus, ConnectionTestResult, DatabaseFamily,
    DriverDescriptor, ExecuteRequest, QueryNode, QueryNodeType, ResultTable,
};
use common::response::{ApiError, ResponseMeta};
use common::telemetry;
use connectivity::session::redact_url;
use state::AppState;
use tokio::net::TcpListener;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use utoipa::OpenApi;

const SERVICE_NAME: &str = "gateway";

#[derive(OpenApi)]
#[openapi(
    info(
        title = "数据库连接网关 API",
        version = "0.1.0",
        description = "驱动发现、连接管理与 SQL 执行"
    ),
    paths(
        handlers::list_drivers,
        handlers::connect,
        handlers::test_connection,
        handlers::disconnect,
        handlers::connection_status,
        handlers::execute,
        handlers::list_queries,
        handlers::get_query,
        handlers::health_check,
    ),
    components(schemas(
        ApiError,
        ResponseMeta,
        ConnectionRequest,
        ConnectionStatus,
        ConnectionTestResult,
        DatabaseFamily,
        DriverDescriptor,
        ExecuteRequest,
        ResultTable,
        QueryNode,
        QueryNodeType,
        handlers::HealthResponse,
    )),
    tags(
        (name = "connection", description = "驱动与连接管理"),
        (name = "query", description = "SQL 执行与诊断查询"),
        (name = "health", description = "健康检查端点")
    )
)]
struct ApiDoc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 加载 .env 与配置
    config::load_dotenv();
    let config = AppConfig::load_with_service(SERVICE_NAME);

    // 初始化日志追踪
    telemetry::init_tracing(config.log_format);

    // 创建应用状态
    let state = AppState::new(config.clone());
    info!(
        drivers_dir = %state.registry.plugin_dir().display(),
        "Driver directory configured"
    );

    // 启动时的默认连接，失败不影响服务启动
    if let Some(default) = &config.default_connection {
        let spec = ConnectionSpec::from_url(default.url.clone())
            .with_credentials(default.username.clone(), default.password.clone());
        match state.connections.connect(&spec).await {
            Ok(()) => info!(url = %redact_url(&default.url), "Default connection established"),
            Err(e) => warn!(url = %redact_url(&default.url), error = %e, "Default connection failed"),
        }
    }

    // 创建路由
    let app = create_router(state.clone(), &config);

    // 启动服务
    let addr = config.bind_address();
    info!(service = SERVICE_NAME, address = %addr, "启动数据库连接网关");

    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("绑定地址失败: {}", addr))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("服务运行失败")?;

    state.connections.disconnect().await;
    info!("网关已停止");
    Ok(())
}

fn create_router(state: AppState, config: &AppConfig) -> Router {
    let origin = match config
        .cors_allowed_origin
        .as_deref()
        .and_then(|o| HeaderValue::from_str(o).ok())
    {
        Some(origin) => AllowOrigin::exact(origin),
        None => AllowOrigin::any(),
    };
    let cors = CorsLayer::new()
        .allow_origin(origin)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(routes::router())
        .route("/api-docs/openapi.json", get(openapi_json))
        .layer(CompressionLayer::new())
        .layer(middleware::from_fn(request_id_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "无法监听关闭信号");
        std::future::pending::<()>().await;
    }
    info!("收到关闭信号");
}
