//! Connection models.
//!
//! [`ConnectionRequest`] is the wire shape accepted by the HTTP layer;
//! [`ConnectionSpec`] is the validated form the connection manager works with.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::{Validate, ValidationError};

use super::DatabaseFamily;

const DEFAULT_SSH_PORT: u16 = 22;

/// Request body for connecting or testing a connection.
#[derive(Debug, Clone, Default, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
#[validate(schema(function = "validate_tunnel_fields"))]
pub struct ConnectionRequest {
    #[validate(length(min = 1, message = "URL is required"))]
    pub url: String,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Explicit driver name; inferred from the URL when absent.
    pub driver_class_name: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    /// Family hint (`postgresql`, `mysql`...) used when the URL names no known driver.
    pub db_type: Option<String>,
    #[serde(default)]
    pub use_ssh: bool,
    pub ssh_host: Option<String>,
    pub ssh_port: Option<u16>,
    pub ssh_user: Option<String>,
    pub ssh_password: Option<String>,
}

fn validate_tunnel_fields(req: &ConnectionRequest) -> Result<(), ValidationError> {
    if !req.use_ssh {
        return Ok(());
    }
    let missing = |v: &Option<String>| v.as_deref().map_or(true, |s| s.trim().is_empty());
    if missing(&req.ssh_host) || missing(&req.ssh_user) {
        let mut err = ValidationError::new("ssh_fields");
        err.message = Some("sshHost and sshUser are required when useSsh is set".into());
        return Err(err);
    }
    Ok(())
}

impl ConnectionRequest {
    pub fn into_spec(self) -> ConnectionSpec {
        let tunnel = if self.use_ssh {
            Some(TunnelSpec {
                host: self.ssh_host.unwrap_or_default(),
                port: self.ssh_port.unwrap_or(DEFAULT_SSH_PORT),
                user: self.ssh_user.unwrap_or_default(),
                password: self.ssh_password.unwrap_or_default(),
            })
        } else {
            None
        };

        ConnectionSpec {
            url: self.url,
            username: self.username.filter(|u| !u.is_empty()),
            password: self.password,
            driver_class_name: self.driver_class_name.filter(|d| !d.trim().is_empty()),
            host: self.host.filter(|h| !h.trim().is_empty()),
            port: self.port,
            db_type: self.db_type.as_deref().and_then(DatabaseFamily::parse),
            use_tunnel: self.use_ssh,
            tunnel,
        }
    }
}

/// SSH endpoint used for port forwarding.
#[derive(Clone, PartialEq, Eq)]
pub struct TunnelSpec {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
}

impl std::fmt::Debug for TunnelSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TunnelSpec")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .finish_non_exhaustive()
    }
}

/// Everything needed to open one database session.
#[derive(Clone, Default)]
pub struct ConnectionSpec {
    pub url: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub driver_class_name: Option<String>,
    /// Target host as seen from the SSH server; taken from the URL when absent.
    pub host: Option<String>,
    pub port: Option<u16>,
    pub db_type: Option<DatabaseFamily>,
    pub use_tunnel: bool,
    pub tunnel: Option<TunnelSpec>,
}

impl ConnectionSpec {
    pub fn from_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn with_credentials(mut self, username: Option<String>, password: Option<String>) -> Self {
        self.username = username;
        self.password = password;
        self
    }
}

impl std::fmt::Debug for ConnectionSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionSpec")
            .field("url", &self.url)
            .field("username", &self.username)
            .field("driver_class_name", &self.driver_class_name)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("use_tunnel", &self.use_tunnel)
            .field("tunnel", &self.tunnel)
            .finish_non_exhaustive()
    }
}

/// Snapshot of the active session for status endpoints.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStatus {
    pub connected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub driver: Option<String>,
    /// Effective URL, with the password removed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub tunneled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connected_at: Option<DateTime<Utc>>,
}

impl ConnectionStatus {
    pub fn disconnected() -> Self {
        Self {
            connected: false,
            driver: None,
            url: None,
            tunneled: false,
            local_port: None,
            connected_at: None,
        }
    }
}

/// Outcome of a connection test. Failures are reported in the body, not as HTTP errors.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionTestResult {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
}
