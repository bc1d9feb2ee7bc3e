//! Application configuration.
//!
//! Values come from environment variables, optionally seeded from a `.env`
//! file in the working directory.

use std::path::PathBuf;

use crate::telemetry::LogFormat;

const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 8080;
const DEFAULT_DRIVERS_DIR: &str = "drivers";
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
const DEFAULT_LIVENESS_TIMEOUT_SECS: u64 = 5;

/// Connection opened at startup when `GATEWAY_DEFAULT_URL` is set.
#[derive(Clone)]
pub struct DefaultConnection {
    pub url: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl std::fmt::Debug for DefaultConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DefaultConnection")
            .field("url", &self.url)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .finish()
    }
}

/// Runtime configuration shared by every component.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub service_name: String,
    pub host: String,
    pub port: u16,
    /// Flat directory scanned for driver plugin archives.
    pub drivers_dir: PathBuf,
    pub connect_timeout_secs: u64,
    /// Upper bound for the liveness ping issued by connection tests.
    pub liveness_timeout_secs: u64,
    pub log_format: LogFormat,
    pub cors_allowed_origin: Option<String>,
    pub default_connection: Option<DefaultConnection>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            service_name: "gateway".to_string(),
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            drivers_dir: PathBuf::from(DEFAULT_DRIVERS_DIR),
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            liveness_timeout_secs: DEFAULT_LIVENESS_TIMEOUT_SECS,
            log_format: LogFormat::Compact,
            cors_allowed_origin: None,
            default_connection: None,
        }
    }
}

impl AppConfig {
    /// Loads configuration from the environment, tagging it with the service name.
    pub fn load_with_service(service_name: &str) -> Self {
        let defaults = Self::default();

        let default_connection = env_string("GATEWAY_DEFAULT_URL").map(|url| DefaultConnection {
            url,
            username: env_string("GATEWAY_DEFAULT_USERNAME"),
            password: env_string("GATEWAY_DEFAULT_PASSWORD"),
        });

        Self {
            service_name: service_name.to_string(),
            host: env_string("SERVER_HOST").unwrap_or(defaults.host),
            port: env_parse("SERVER_PORT").unwrap_or(defaults.port),
            drivers_dir: env_string("GATEWAY_DRIVERS_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.drivers_dir),
            connect_timeout_secs: env_parse("GATEWAY_CONNECT_TIMEOUT_SECS")
                .unwrap_or(defaults.connect_timeout_secs),
            liveness_timeout_secs: env_parse("GATEWAY_LIVENESS_TIMEOUT_SECS")
                .unwrap_or(defaults.liveness_timeout_secs),
            log_format: env_string("LOG_FORMAT")
                .map(|v| LogFormat::parse(&v))
                .unwrap_or(defaults.log_format),
            cors_allowed_origin: env_string("CORS_ALLOWED_ORIGIN"),
            default_connection,
        }
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = env_string(key)?;
    match raw.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key, value = %raw, "Ignoring unparsable environment value");
            None
        }
    }
}

/// Load .env file from the working directory (best-effort, no error if missing).
///
/// Variables already present in the environment win over the file.
pub fn load_dotenv() {
    let env_path = std::path::Path::new(".env");
    let Ok(content) = std::fs::read_to_string(env_path) else {
        return;
    };
    for (key, value) in parse_dotenv(&content) {
        if std::env::var(key).is_err() {
            std::env::set_var(key, value);
        }
    }
}

fn parse_dotenv(content: &str) -> Vec<(&str, &str)> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_once('='))
        .map(|(k, v)| (k.trim(), v.trim().trim_matches('"')))
        .filter(|(k, _)| !k.is_empty())
        .collect()
}
