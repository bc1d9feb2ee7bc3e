//! Single active session management.
//!
//! [`ConnectionManager`] owns at most one [`ActiveSession`]. `connect` builds
//! the replacement completely before swapping it in under the write lock, so
//! a failed connect leaves the previous session untouched. `test` goes
//! through the same steps on a throwaway session and never touches the
//! active one.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use common::errors::{AppError, AppResult};
use common::models::{ConnectionSpec, ConnectionStatus, DatabaseFamily};
use tokio::sync::RwLock;

use crate::engines::{Credentials, DriverHandle, Session, MARIADB_DRIVER, MYSQL_DRIVER, POSTGRES_DRIVER, SQLITE_DRIVER};
use crate::registry::DriverRegistry;
use crate::tunnel::{self, Tunnel, TunnelOpener};

/// The live session plus the tunnel it runs through, if any.
pub struct ActiveSession {
    pub driver: DriverHandle,
    pub session: Box<dyn Session>,
    pub tunnel: Option<Tunnel>,
    /// URL actually dialed, after tunnel rewriting.
    pub effective_url: String,
    pub connected_at: DateTime<Utc>,
}

impl ActiveSession {
    /// Closes the session, then the tunnel.
    pub async fn close(&self) {
        self.session.close().await;
        if let Some(tunnel) = &self.tunnel {
            tunnel.close();
        }
    }

    fn status(&self) -> ConnectionStatus {
        ConnectionStatus {
            connected: true,
            driver: Some(self.driver.name().to_string()),
            url: Some(redact_url(&self.effective_url)),
            tunneled: self.tunnel.is_some(),
            local_port: self.tunnel.as_ref().map(Tunnel::local_port),
            connected_at: Some(self.connected_at),
        }
    }
}

pub struct ConnectionManager {
    registry: Arc<DriverRegistry>,
    tunnels: Arc<dyn TunnelOpener>,
    active: RwLock<Option<Arc<ActiveSession>>>,
    connect_timeout: Duration,
    liveness_timeout: Duration,
}

impl ConnectionManager {
    pub fn new(
        registry: Arc<DriverRegistry>,
        tunnels: Arc<dyn TunnelOpener>,
        connect_timeout: Duration,
        liveness_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            tunnels,
            active: RwLock::new(None),
            connect_timeout,
            liveness_timeout,
        }
    }

    /// Replaces the active session with one built from `spec`.
    pub async fn connect(&self, spec: &ConnectionSpec) -> AppResult<()> {
        let next = Arc::new(self.establish(spec).await?);
        let driver = next.driver.name().to_string();
        let tunneled = next.tunnel.is_some();

        let previous = self.active.write().await.replace(next);
        if let Some(previous) = previous {
            retire(previous).await;
        }

        tracing::info!(driver = %driver, tunneled, "Active connection switched");
        Ok(())
    }

    /// Validates `spec` on a throwaway session and returns the ping latency.
    pub async fn test(&self, spec: &ConnectionSpec) -> AppResult<Duration> {
        let candidate = self.establish(spec).await?;

        let started = Instant::now();
        let outcome = tokio::time::timeout(self.liveness_timeout, candidate.session.ping()).await;
        let latency = started.elapsed();
        candidate.close().await;

        match outcome {
            Ok(Ok(())) => Ok(latency),
            Ok(Err(e)) => Err(match e {
                AppError::ConnectionInvalid(_) => e,
                other => AppError::ConnectionInvalid(other.message_or_category()),
            }),
            Err(_) => Err(AppError::ConnectionInvalid(format!(
                "no response within {}s",
                self.liveness_timeout.as_secs()
            ))),
        }
    }

    /// Drops the active session. Returns whether one existed.
    pub async fn disconnect(&self) -> bool {
        let previous = self.active.write().await.take();
        match previous {
            Some(previous) => {
                retire(previous).await;
                tracing::info!("Active connection closed");
                true
            }
            None => false,
        }
    }

    /// The current session, if any. Holders keep it alive across a switch.
    pub async fn active(&self) -> Option<Arc<ActiveSession>> {
        self.active.read().await.clone()
    }

    pub async fn is_connected(&self) -> bool {
        self.active.read().await.is_some()
    }

    pub async fn status(&self) -> ConnectionStatus {
        match self.active.read().await.as_ref() {
            Some(active) => active.status(),
            None => ConnectionStatus::disconnected(),
        }
    }

    /// Tunnel, driver and session, in that order. Anything opened before a
    /// failing step is released when it goes out of scope.
    async fn establish(&self, spec: &ConnectionSpec) -> AppResult<ActiveSession> {
        let family = spec.db_type.unwrap_or_else(|| {
            infer_driver_name(&spec.url)
                .map(DatabaseFamily::infer)
                .unwrap_or_else(|_| DatabaseFamily::infer(&spec.url))
        });

        let (effective_url, tunnel) = if spec.use_tunnel {
            let tunnel_spec = spec.tunnel.as_ref().ok_or_else(|| {
                AppError::Validation("tunnel settings are required when the tunnel is enabled".into())
            })?;
            let (host, port) = tunnel::resolve_target(
                &spec.url,
                spec.host.as_deref(),
                spec.port,
                family.default_port(),
            )?;
            let tunnel = self.tunnels.open(tunnel_spec, &host, port).await?;
            let url = tunnel::rewrite_url(&spec.url, &host, port, tunnel.local_port(), family.default_port())?;
            (url, Some(tunnel))
        } else {
            (spec.url.clone(), None)
        };

        let driver = self.resolve_driver(spec).await?;
        let credentials = Credentials {
            username: spec.username.clone(),
            password: spec.password.clone(),
        };

        let session = tokio::time::timeout(self.connect_timeout, driver.open(&effective_url, &credentials))
            .await
            .map_err(|_| AppError::ConnectionFailed(format!(
                "connection not established within {}s",
                self.connect_timeout.as_secs()
            )))??;

        Ok(ActiveSession {
            driver,
            session,
            tunnel,
            effective_url,
            connected_at: Utc::now(),
        })
    }

    async fn resolve_driver(&self, spec: &ConnectionSpec) -> AppResult<DriverHandle> {
        let name = match spec.driver_class_name.as_deref() {
            Some(name) => name,
            None => match infer_driver_name(&spec.url) {
                Ok(name) => name,
                Err(e) => spec.db_type.and_then(builtin_driver_for).ok_or(e)?,
            },
        };
        self.registry.load_driver(name).await
    }
}

/// Closes a replaced session once nothing uses it.
///
/// Executions that grabbed the session before the switch keep their `Arc`
/// and finish on it; the last holder drops it, which closes the connection
/// and the tunnel.
async fn retire(previous: Arc<ActiveSession>) {
    match Arc::try_unwrap(previous) {
        Ok(previous) => previous.close().await,
        Err(shared) => {
            tracing::debug!(
                holders = Arc::strong_count(&shared) - 1,
                "Previous session still in use, closing on release"
            );
        }
    }
}

fn builtin_driver_for(family: DatabaseFamily) -> Option<&'static str> {
    match family {
        DatabaseFamily::PostgreSQL => Some(POSTGRES_DRIVER),
        DatabaseFamily::MySQL => Some(MYSQL_DRIVER),
        DatabaseFamily::MariaDB => Some(MARIADB_DRIVER),
        DatabaseFamily::SQLite => Some(SQLITE_DRIVER),
        _ => None,
    }
}

/// Maps a URL to the driver that serves it.
pub fn infer_driver_name(url: &str) -> AppResult<&'static str> {
    let lower = url.to_lowercase();
    if lower.contains("postgres") {
        Ok(POSTGRES_DRIVER)
    } else if lower.contains("mariadb") {
        Ok(MARIADB_DRIVER)
    } else if lower.contains("mysql") {
        Ok(MYSQL_DRIVER)
    } else if lower.contains("sqlite") {
        Ok(SQLITE_DRIVER)
    } else if lower.contains("h2") {
        Err(AppError::DriverNotAvailable("h2::Driver (no H2 engine in this build)".into()))
    } else {
        Err(AppError::DriverNotFound(redact_url(url)))
    }
}

/// Removes the password from a URL for display.
pub fn redact_url(url: &str) -> String {
    match url::Url::parse(url) {
        Ok(mut parsed) if parsed.password().is_some() => {
            if parsed.set_password(Some("***")).is_ok() {
                parsed.to_string()
            } else {
                url.to_string()
            }
        }
        _ => url.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use common::models::TunnelSpec;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::tunnel::TunnelHandle;

    #[derive(Default)]
    struct FakeOpener {
        opened: AtomicUsize,
        closed: Arc<AtomicUsize>,
    }

    struct FakeHandle(Arc<AtomicUsize>);

    impl TunnelHandle for FakeHandle {
        fn shutdown(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl TunnelOpener for FakeOpener {
        async fn open(&self, _: &TunnelSpec, _: &str, _: u16) -> AppResult<Tunnel> {
            let n = self.opened.fetch_add(1, Ordering::SeqCst);
            Ok(Tunnel::new(45000 + n as u16, Box::new(FakeHandle(self.closed.clone()))))
        }
    }

    fn manager(opener: Arc<FakeOpener>) -> (ConnectionManager, tempfile::TempDir) {
        let plugins = tempfile::tempdir().unwrap();
        let manager = ConnectionManager::new(
            Arc::new(DriverRegistry::new(plugins.path())),
            opener,
            Duration::from_secs(5),
            Duration::from_secs(5),
        );
        (manager, plugins)
    }

    fn tunneled_spec(url: &str) -> ConnectionSpec {
        ConnectionSpec {
            url: url.to_string(),
            use_tunnel: true,
            tunnel: Some(TunnelSpec {
                host: "bastion".into(),
                port: 22,
                user: "ops".into(),
                password: "pw".into(),
            }),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn untunneled_connect_never_opens_a_tunnel() {
        let opener = Arc::new(FakeOpener::default());
        let (manager, _plugins) = manager(opener.clone());

        manager.connect(&ConnectionSpec::from_url("sqlite::memory:")).await.unwrap();
        manager.test(&ConnectionSpec::from_url("sqlite::memory:")).await.unwrap();

        assert_eq!(opener.opened.load(Ordering::SeqCst), 0);
        let status = manager.status().await;
        assert!(status.connected);
        assert!(!status.tunneled);
        assert_eq!(status.driver.as_deref(), Some(SQLITE_DRIVER));
    }

    #[tokio::test]
    async fn connect_replaces_the_active_session() {
        let (manager, _plugins) = manager(Arc::new(FakeOpener::default()));

        manager.connect(&ConnectionSpec::from_url("sqlite::memory:")).await.unwrap();
        let first = manager.active().await.unwrap();
        first.session.query("CREATE TABLE marker (id INTEGER)").await.unwrap();

        manager.connect(&ConnectionSpec::from_url("sqlite::memory:")).await.unwrap();
        let second = manager.active().await.unwrap();
        assert!(!Arc::ptr_eq(&first, &second));

        // The new in-memory database does not have the table.
        assert!(second.session.query("SELECT * FROM marker").await.is_err());
        // A holder from before the switch finishes on the old session.
        first.session.query("SELECT * FROM marker").await.unwrap();

        let released = Arc::downgrade(&first);
        drop(first);
        assert!(released.upgrade().is_none());
    }

    #[tokio::test]
    async fn unused_previous_session_is_closed_on_switch() {
        let (manager, _plugins) = manager(Arc::new(FakeOpener::default()));

        manager.connect(&ConnectionSpec::from_url("sqlite::memory:")).await.unwrap();
        let first = Arc::downgrade(&manager.active().await.unwrap());
        manager.connect(&ConnectionSpec::from_url("sqlite::memory:")).await.unwrap();
        assert!(first.upgrade().is_none());
    }

    #[tokio::test]
    async fn db_type_selects_engine_when_url_has_no_hint() {
        let (manager, _plugins) = manager(Arc::new(FakeOpener::default()));

        let err = manager.connect(&ConnectionSpec::from_url(":memory:")).await.unwrap_err();
        assert_eq!(err.category(), "DriverNotFound");

        let hinted = ConnectionSpec {
            db_type: Some(DatabaseFamily::SQLite),
            ..ConnectionSpec::from_url(":memory:")
        };
        manager.connect(&hinted).await.unwrap();
        assert_eq!(manager.status().await.driver.as_deref(), Some(SQLITE_DRIVER));
    }

    #[tokio::test]
    async fn failed_test_leaves_active_session_intact() {
        let (manager, _plugins) = manager(Arc::new(FakeOpener::default()));
        manager.connect(&ConnectionSpec::from_url("sqlite::memory:")).await.unwrap();
        let before = manager.active().await.unwrap();

        let err = manager
            .test(&ConnectionSpec::from_url("oracle://db.internal:1521/XE"))
            .await
            .unwrap_err();
        assert_eq!(err.category(), "DriverNotFound");

        let after = manager.active().await.unwrap();
        assert!(Arc::ptr_eq(&before, &after));
        after.session.query("SELECT 1").await.unwrap();
    }

    #[tokio::test]
    async fn failed_connect_leaves_active_session_intact() {
        let (manager, _plugins) = manager(Arc::new(FakeOpener::default()));
        manager.connect(&ConnectionSpec::from_url("sqlite::memory:")).await.unwrap();
        let before = manager.active().await.unwrap();

        let missing = ConnectionSpec {
            driver_class_name: Some("com::nowhere::jdbc::GhostDriver".into()),
            ..ConnectionSpec::from_url("sqlite::memory:")
        };
        let err = manager.connect(&missing).await.unwrap_err();
        assert!(matches!(err, AppError::DriverNotAvailable(_)));

        let after = manager.active().await.unwrap();
        assert!(Arc::ptr_eq(&before, &after));
    }

    #[tokio::test]
    async fn tunnel_is_released_when_a_later_step_fails() {
        let opener = Arc::new(FakeOpener::default());
        let (manager, _plugins) = manager(opener.clone());

        // Tunnel opens, then the URL does not reference the resolved target.
        let spec = ConnectionSpec {
            host: Some("elsewhere".into()),
            port: Some(5432),
            ..tunneled_spec("postgres://db.internal:5432/app")
        };
        let err = manager.connect(&spec).await.unwrap_err();
        assert_eq!(err.category(), "TunnelFailed");
        assert_eq!(opener.opened.load(Ordering::SeqCst), 1);
        assert_eq!(opener.closed.load(Ordering::SeqCst), 1);
        assert!(!manager.is_connected().await);
    }

    #[tokio::test]
    async fn test_always_tears_down_its_tunnel() {
        let opener = Arc::new(FakeOpener::default());
        let (manager, _plugins) = manager(opener.clone());

        // Driver resolution fails after the tunnel is up.
        let err = manager
            .test(&tunneled_spec("oracle://db.internal:1521/XE"))
            .await
            .unwrap_err();
        assert_eq!(err.category(), "DriverNotFound");
        assert_eq!(opener.opened.load(Ordering::SeqCst), 1);
        assert_eq!(opener.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn disconnect_clears_the_session() {
        let (manager, _plugins) = manager(Arc::new(FakeOpener::default()));
        assert!(!manager.disconnect().await);
        manager.connect(&ConnectionSpec::from_url("sqlite::memory:")).await.unwrap();
        assert!(manager.disconnect().await);
        assert!(!manager.status().await.connected);
    }

    #[test]
    fn driver_inference_from_url() {
        assert_eq!(infer_driver_name("jdbc:postgresql://db/app").unwrap(), POSTGRES_DRIVER);
        assert_eq!(infer_driver_name("mariadb://db/app").unwrap(), MARIADB_DRIVER);
        assert_eq!(infer_driver_name("mysql://db/app").unwrap(), MYSQL_DRIVER);
        assert_eq!(infer_driver_name("sqlite::memory:").unwrap(), SQLITE_DRIVER);
        assert_eq!(infer_driver_name("jdbc:h2:mem:test").unwrap_err().category(), "DriverNotAvailable");
        assert_eq!(infer_driver_name("oracle://db/XE").unwrap_err().category(), "DriverNotFound");
    }

    #[test]
    fn redaction_hides_password() {
        assert_eq!(redact_url("postgres://app:secret@db:5432/app"), "postgres://app:***@db:5432/app");
        assert_eq!(redact_url("sqlite::memory:"), "sqlite::memory:");
    }
}
