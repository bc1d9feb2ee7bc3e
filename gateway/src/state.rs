//! 网关应用状态

use std::sync::Arc;
use std::time::Duration;

use common::config::AppConfig;
use common::models::QueryNode;
use connectivity::{
    ConnectionManager, ConverterRegistry, DriverRegistry, QueryExecutor, SshTunnelOpener,
    TunnelOpener,
};

use crate::catalog;

/// 各处理器共享的应用状态
#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub registry: Arc<DriverRegistry>,
    pub connections: Arc<ConnectionManager>,
    pub executor: Arc<QueryExecutor>,
    pub catalog: Arc<Vec<QueryNode>>,
}

impl AppState {
    /// 使用 SSH 隧道创建应用状态
    pub fn new(config: AppConfig) -> Self {
        let tunnels = Arc::new(SshTunnelOpener::new(Duration::from_secs(
            config.connect_timeout_secs,
        )));
        Self::with_tunnel_opener(config, tunnels)
    }

    pub fn with_tunnel_opener(config: AppConfig, tunnels: Arc<dyn TunnelOpener>) -> Self {
        let registry = Arc::new(DriverRegistry::new(config.drivers_dir.clone()));
        let connections = Arc::new(ConnectionManager::new(
            registry.clone(),
            tunnels,
            Duration::from_secs(config.connect_timeout_secs),
            Duration::from_secs(config.liveness_timeout_secs),
        ));
        let executor = Arc::new(QueryExecutor::new(
            connections.clone(),
            Arc::new(ConverterRegistry::with_defaults()),
        ));

        Self {
            config,
            registry,
            connections,
            executor,
            catalog: Arc::new(catalog::diagnostics()),
        }
    }
}
