//! 数据库连接网关公共模块
//!
//! 包含配置加载、错误类型、统一响应结构、请求中间件与共享数据模型。

pub mod config;
pub mod errors;
pub mod middleware;
pub mod models;
pub mod response;
pub mod telemetry;
