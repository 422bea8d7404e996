//! Configuration management.
//!
//! Resolution order, later wins:
//!
//! 1. Built-in defaults
//! 2. `config.toml` (explicit path, else `<config dir>/fingerlink/config.toml`)
//! 3. `FINGERLINK_*` environment variables
//!
//! ```toml
//! active_scheme = "v1"
//!
//! [server]
//! listen = "0.0.0.0:3000"
//! api_key = "change-me"
//!
//! [storage]
//! vector_backend = "redis"
//! redis_url = "redis://127.0.0.1:6379"
//! sqlite_path = "/var/lib/fingerlink/identity.db"
//!
//! [mqtt]
//! broker_url = "mqtt://broker.local:1883"
//! topic_prefix = "fingerprint"
//!
//! [logging]
//! format = "json"
//! filter = "fingerlink=info"
//!
//! [metrics]
//! enabled = true
//! port = 9090
//! ```

use crate::models::SchemeId;
use crate::{Error, Result};
use secrecy::SecretString;
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable prefix for overrides.
pub const ENV_PREFIX: &str = "FINGERLINK_";

/// Main configuration for fingerlink.
#[derive(Debug, Clone)]
pub struct FingerlinkConfig {
    /// Scheme used by the unversioned routes and CLI defaults.
    pub active_scheme: SchemeId,
    /// HTTP server settings.
    pub server: ServerConfig,
    /// Vector and identity store settings.
    pub storage: StorageConfig,
    /// Device command channel settings.
    pub mqtt: MqttConfig,
    /// Log output settings.
    pub logging: LoggingSettings,
    /// Prometheus exporter settings.
    pub metrics: MetricsSettings,
}

/// HTTP server settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address to bind.
    pub listen: String,
    /// Key expected in `X-API-Key` on `/api` routes. `None` rejects every
    /// `/api` request.
    pub api_key: Option<SecretString>,
}

/// Which vector backend to construct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VectorBackendKind {
    /// Redis Stack with `RediSearch`.
    Redis,
    /// In-process brute force.
    Memory,
}

impl VectorBackendKind {
    /// Parses a backend name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OperationFailed`] for an unrecognized name.
    pub fn parse(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "redis" => Ok(Self::Redis),
            "memory" | "in-memory" => Ok(Self::Memory),
            other => Err(Error::operation(
                "parse_vector_backend",
                format!("unknown vector backend '{other}'"),
            )),
        }
    }

    /// Returns the backend name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Redis => "redis",
            Self::Memory => "memory",
        }
    }
}

/// Vector and identity store settings.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Vector backend.
    pub vector_backend: VectorBackendKind,
    /// Redis connection URL.
    pub redis_url: String,
    /// Redis read/write timeout.
    pub redis_timeout: Duration,
    /// `SQLite` identity database. `None` uses the user data directory.
    pub sqlite_path: Option<PathBuf>,
}

/// Device command channel settings.
#[derive(Debug, Clone)]
pub struct MqttConfig {
    /// Broker URL (`mqtt://host:port`). `None` disables publishing.
    pub broker_url: Option<String>,
    /// Broker username.
    pub username: Option<String>,
    /// Broker password.
    pub password: Option<SecretString>,
    /// Topic prefix; commands go to `<prefix>/<device>`.
    pub topic_prefix: String,
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable multi-line output.
    #[default]
    Pretty,
    /// One JSON object per event.
    Json,
}

impl LogFormat {
    /// Parses a format name, defaulting to pretty.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "json" => Self::Json,
            _ => Self::Pretty,
        }
    }
}

/// Log output settings.
#[derive(Debug, Clone)]
pub struct LoggingSettings {
    /// Output format.
    pub format: LogFormat,
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub filter: String,
    /// Append logs to this file instead of stderr.
    pub file: Option<PathBuf>,
}

/// Prometheus exporter settings.
#[derive(Debug, Clone, Copy)]
pub struct MetricsSettings {
    /// Whether to install the exporter.
    pub enabled: bool,
    /// Exporter listen port.
    pub port: u16,
}

impl Default for FingerlinkConfig {
    fn default() -> Self {
        Self {
            active_scheme: SchemeId::Normalized16,
            server: ServerConfig {
                listen: "0.0.0.0:3000".to_string(),
                api_key: None,
            },
            storage: StorageConfig {
                vector_backend: if cfg!(feature = "redis") {
                    VectorBackendKind::Redis
                } else {
                    VectorBackendKind::Memory
                },
                redis_url: "redis://127.0.0.1:6379".to_string(),
                redis_timeout: Duration::from_secs(5),
                sqlite_path: None,
            },
            mqtt: MqttConfig {
                broker_url: None,
                username: None,
                password: None,
                topic_prefix: "fingerprint".to_string(),
            },
            logging: LoggingSettings {
                format: LogFormat::Pretty,
                filter: "fingerlink=info".to_string(),
                file: None,
            },
            metrics: MetricsSettings {
                enabled: false,
                port: 9090,
            },
        }
    }
}

/// Configuration file structure (for TOML parsing).
#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    /// Active scheme name or API version alias.
    pub active_scheme: Option<String>,
    /// `[server]` section.
    pub server: Option<ConfigFileServer>,
    /// `[storage]` section.
    pub storage: Option<ConfigFileStorage>,
    /// `[mqtt]` section.
    pub mqtt: Option<ConfigFileMqtt>,
    /// `[logging]` section.
    pub logging: Option<ConfigFileLogging>,
    /// `[metrics]` section.
    pub metrics: Option<ConfigFileMetrics>,
}

/// `[server]` section in config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileServer {
    /// Listen address.
    pub listen: Option<String>,
    /// API key.
    pub api_key: Option<String>,
}

/// `[storage]` section in config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileStorage {
    /// `redis` or `memory`.
    pub vector_backend: Option<String>,
    /// Redis URL.
    pub redis_url: Option<String>,
    /// Redis timeout in milliseconds.
    pub redis_timeout_ms: Option<u64>,
    /// `SQLite` path.
    pub sqlite_path: Option<String>,
}

/// `[mqtt]` section in config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileMqtt {
    /// Broker URL.
    pub broker_url: Option<String>,
    /// Username.
    pub username: Option<String>,
    /// Password.
    pub password: Option<String>,
    /// Topic prefix.
    pub topic_prefix: Option<String>,
}

/// `[logging]` section in config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileLogging {
    /// `pretty` or `json`.
    pub format: Option<String>,
    /// Filter directive.
    pub filter: Option<String>,
    /// Log file path.
    pub file: Option<String>,
}

/// `[metrics]` section in config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileMetrics {
    /// Enable the exporter.
    pub enabled: Option<bool>,
    /// Exporter port.
    pub port: Option<u16>,
}

impl FingerlinkConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration: explicit file or default location, then
    /// environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if an explicit file cannot be read, or if any file
    /// or environment value is invalid.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::load_from_file(path)?,
            None => match Self::default_path().filter(|p| p.exists()) {
                Some(path) => Self::load_from_file(&path)?,
                None => Self::default(),
            },
        };
        config.apply_env()?;
        Ok(config)
    }

    /// Platform config location (`<config dir>/fingerlink/config.toml`).
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        directories::BaseDirs::new()
            .map(|dirs| dirs.config_dir().join("fingerlink").join("config.toml"))
    }

    /// Loads configuration from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::operation("read_config_file", format!("{}: {e}", path.display())))?;
        Self::from_toml(&contents)
    }

    /// Parses configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not valid TOML for [`ConfigFile`] or
    /// names an unknown scheme or backend.
    pub fn from_toml(contents: &str) -> Result<Self> {
        let file: ConfigFile =
            toml::from_str(contents).map_err(|e| Error::operation("parse_config_file", e))?;
        Self::from_config_file(file)
    }

    fn from_config_file(file: ConfigFile) -> Result<Self> {
        let mut config = Self::default();

        if let Some(scheme) = file.active_scheme {
            config.active_scheme = SchemeId::parse(&scheme)?;
        }
        if let Some(server) = file.server {
            if let Some(listen) = server.listen {
                config.server.listen = listen;
            }
            if let Some(key) = server.api_key {
                config.server.api_key = Some(SecretString::from(key));
            }
        }
        if let Some(storage) = file.storage {
            if let Some(kind) = storage.vector_backend {
                config.storage.vector_backend = VectorBackendKind::parse(&kind)?;
            }
            if let Some(url) = storage.redis_url {
                config.storage.redis_url = url;
            }
            if let Some(ms) = storage.redis_timeout_ms {
                config.storage.redis_timeout = Duration::from_millis(ms);
            }
            config.storage.sqlite_path = storage.sqlite_path.map(PathBuf::from);
        }
        if let Some(mqtt) = file.mqtt {
            config.mqtt.broker_url = mqtt.broker_url;
            config.mqtt.username = mqtt.username;
            config.mqtt.password = mqtt.password.map(SecretString::from);
            if let Some(prefix) = mqtt.topic_prefix {
                config.mqtt.topic_prefix = prefix;
            }
        }
        if let Some(logging) = file.logging {
            if let Some(format) = logging.format {
                config.logging.format = LogFormat::parse(&format);
            }
            if let Some(filter) = logging.filter {
                config.logging.filter = filter;
            }
            config.logging.file = logging.file.map(PathBuf::from);
        }
        if let Some(metrics) = file.metrics {
            if let Some(enabled) = metrics.enabled {
                config.metrics.enabled = enabled;
            }
            if let Some(port) = metrics.port {
                config.metrics.port = port;
            }
        }

        Ok(config)
    }

    /// Applies `FINGERLINK_*` overrides from the process environment.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable holds an invalid value.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_env_with(|name| std::env::var(name).ok())
    }

    /// Applies overrides from an arbitrary variable lookup.
    ///
    /// | Variable | Field |
    /// |----------|-------|
    /// | `FINGERLINK_ACTIVE_SCHEME` | `active_scheme` |
    /// | `FINGERLINK_LISTEN` | `server.listen` |
    /// | `FINGERLINK_API_KEY` | `server.api_key` |
    /// | `FINGERLINK_VECTOR_BACKEND` | `storage.vector_backend` |
    /// | `FINGERLINK_REDIS_URL` | `storage.redis_url` |
    /// | `FINGERLINK_SQLITE_PATH` | `storage.sqlite_path` |
    /// | `FINGERLINK_MQTT_BROKER_URL` | `mqtt.broker_url` |
    /// | `FINGERLINK_MQTT_USERNAME` | `mqtt.username` |
    /// | `FINGERLINK_MQTT_PASSWORD` | `mqtt.password` |
    /// | `FINGERLINK_MQTT_TOPIC_PREFIX` | `mqtt.topic_prefix` |
    /// | `FINGERLINK_LOG_FORMAT` | `logging.format` |
    /// | `FINGERLINK_LOG_FILE` | `logging.file` |
    /// | `FINGERLINK_METRICS_ENABLED` | `metrics.enabled` |
    /// | `FINGERLINK_METRICS_PORT` | `metrics.port` |
    ///
    /// # Errors
    ///
    /// Returns an error if a variable holds an invalid value.
    pub fn apply_env_with(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        let var = |name: &str| {
            lookup(&format!("{ENV_PREFIX}{name}")).filter(|v| !v.trim().is_empty())
        };

        if let Some(v) = var("ACTIVE_SCHEME") {
            self.active_scheme = SchemeId::parse(&v)?;
        }
        if let Some(v) = var("LISTEN") {
            self.server.listen = v;
        }
        if let Some(v) = var("API_KEY") {
            self.server.api_key = Some(SecretString::from(v));
        }
        if let Some(v) = var("VECTOR_BACKEND") {
            self.storage.vector_backend = VectorBackendKind::parse(&v)?;
        }
        if let Some(v) = var("REDIS_URL") {
            self.storage.redis_url = v;
        }
        if let Some(v) = var("SQLITE_PATH") {
            self.storage.sqlite_path = Some(PathBuf::from(v));
        }
        if let Some(v) = var("MQTT_BROKER_URL") {
            self.mqtt.broker_url = Some(v);
        }
        if let Some(v) = var("MQTT_USERNAME") {
            self.mqtt.username = Some(v);
        }
        if let Some(v) = var("MQTT_PASSWORD") {
            self.mqtt.password = Some(SecretString::from(v));
        }
        if let Some(v) = var("MQTT_TOPIC_PREFIX") {
            self.mqtt.topic_prefix = v;
        }
        if let Some(v) = var("LOG_FORMAT") {
            self.logging.format = LogFormat::parse(&v);
        }
        if let Some(v) = var("LOG_FILE") {
            self.logging.file = Some(PathBuf::from(v));
        }
        if let Some(v) = var("METRICS_ENABLED") {
            self.metrics.enabled = parse_bool(&v);
        }
        if let Some(v) = var("METRICS_PORT") {
            self.metrics.port = v
                .trim()
                .parse()
                .map_err(|e| Error::operation("parse_metrics_port", format!("'{v}': {e}")))?;
        }
        Ok(())
    }

    /// Resolved `SQLite` path.
    ///
    /// # Errors
    ///
    /// Returns an error if no path is configured and the user data directory
    /// cannot be determined.
    pub fn sqlite_path(&self) -> Result<PathBuf> {
        match &self.storage.sqlite_path {
            Some(path) => Ok(path.clone()),
            None => crate::storage::get_user_data_dir().map(|dir| dir.join("identity.db")),
        }
    }

    /// Sets the active scheme.
    #[must_use]
    pub const fn with_active_scheme(mut self, scheme: SchemeId) -> Self {
        self.active_scheme = scheme;
        self
    }

    /// Sets the vector backend.
    #[must_use]
    pub const fn with_vector_backend(mut self, kind: VectorBackendKind) -> Self {
        self.storage.vector_backend = kind;
        self
    }

    /// Sets the `SQLite` path.
    #[must_use]
    pub fn with_sqlite_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.storage.sqlite_path = Some(path.into());
        self
    }

    /// Sets the API key.
    #[must_use]
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.server.api_key = Some(SecretString::from(key.into()));
        self
    }
}

fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

const fn redact<T>(secret: Option<&T>) -> &'static str {
    if secret.is_some() { "[redacted]" } else { "(unset)" }
}

impl fmt::Display for FingerlinkConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "active_scheme = {}", self.active_scheme)?;
        writeln!(f, "server.listen = {}", self.server.listen)?;
        writeln!(f, "server.api_key = {}", redact(self.server.api_key.as_ref()))?;
        writeln!(f, "storage.vector_backend = {}", self.storage.vector_backend.as_str())?;
        writeln!(f, "storage.redis_url = {}", self.storage.redis_url)?;
        writeln!(
            f,
            "storage.sqlite_path = {}",
            self.sqlite_path()
                .map_or_else(|_| "(unresolved)".to_string(), |p| p.display().to_string())
        )?;
        writeln!(
            f,
            "mqtt.broker_url = {}",
            self.mqtt.broker_url.as_deref().unwrap_or("(unset)")
        )?;
        writeln!(f, "mqtt.password = {}", redact(self.mqtt.password.as_ref()))?;
        writeln!(f, "mqtt.topic_prefix = {}", self.mqtt.topic_prefix)?;
        writeln!(f, "logging.format = {:?}", self.logging.format)?;
        writeln!(f, "logging.filter = {}", self.logging.filter)?;
        writeln!(f, "metrics.enabled = {}", self.metrics.enabled)?;
        write!(f, "metrics.port = {}", self.metrics.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = FingerlinkConfig::default();
        assert_eq!(config.active_scheme, SchemeId::Normalized16);
        assert_eq!(config.server.listen, "0.0.0.0:3000");
        assert_eq!(config.mqtt.topic_prefix, "fingerprint");
        assert!(config.server.api_key.is_none());
        assert!(!config.metrics.enabled);
    }

    #[test]
    fn test_from_toml() {
        let config = FingerlinkConfig::from_toml(
            r#"
            active_scheme = "v2"

            [server]
            listen = "127.0.0.1:8080"
            api_key = "s3cret"

            [storage]
            vector_backend = "memory"
            sqlite_path = "/tmp/fl.db"

            [mqtt]
            broker_url = "mqtt://localhost:1883"
            topic_prefix = "devices"

            [logging]
            format = "json"

            [metrics]
            enabled = true
            port = 9100
            "#,
        )
        .unwrap();

        assert_eq!(config.active_scheme, SchemeId::Normalized512);
        assert_eq!(config.server.listen, "127.0.0.1:8080");
        assert_eq!(
            config.server.api_key.as_ref().map(ExposeSecret::expose_secret),
            Some("s3cret")
        );
        assert_eq!(config.storage.vector_backend, VectorBackendKind::Memory);
        assert_eq!(config.sqlite_path().unwrap(), PathBuf::from("/tmp/fl.db"));
        assert_eq!(config.mqtt.topic_prefix, "devices");
        assert_eq!(config.logging.format, LogFormat::Json);
        assert!(config.metrics.enabled);
        assert_eq!(config.metrics.port, 9100);
    }

    #[test]
    fn test_invalid_values_are_errors() {
        assert!(matches!(
            FingerlinkConfig::from_toml("active_scheme = \"v9\""),
            Err(Error::UnknownScheme(_))
        ));
        assert!(FingerlinkConfig::from_toml("[storage]\nvector_backend = \"disk\"").is_err());
        assert!(FingerlinkConfig::from_toml("unknown_key = 1").is_err());
    }

    #[test]
    fn test_env_overrides_file() {
        let mut config = FingerlinkConfig::from_toml("active_scheme = \"v1\"").unwrap();
        let env: HashMap<&str, &str> = HashMap::from([
            ("FINGERLINK_ACTIVE_SCHEME", "legacy"),
            ("FINGERLINK_API_KEY", "from-env"),
            ("FINGERLINK_METRICS_ENABLED", "yes"),
            ("FINGERLINK_METRICS_PORT", "9200"),
            ("FINGERLINK_MQTT_BROKER_URL", ""),
        ]);
        config
            .apply_env_with(|name| env.get(name).map(ToString::to_string))
            .unwrap();

        assert_eq!(config.active_scheme, SchemeId::LegacyHash);
        assert!(config.metrics.enabled);
        assert_eq!(config.metrics.port, 9200);
        assert!(config.mqtt.broker_url.is_none());
    }

    #[test]
    fn test_bad_env_port() {
        let mut config = FingerlinkConfig::default();
        let result = config.apply_env_with(|name| {
            (name == "FINGERLINK_METRICS_PORT").then(|| "ninety".to_string())
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[server]\nlisten = \"127.0.0.1:4000\"").unwrap();
        let config = FingerlinkConfig::load_from_file(file.path()).unwrap();
        assert_eq!(config.server.listen, "127.0.0.1:4000");
    }

    #[test]
    fn test_display_redacts_secrets() {
        let config = FingerlinkConfig::default()
            .with_api_key("top-secret")
            .with_sqlite_path("/tmp/x.db");
        let shown = config.to_string();
        assert!(shown.contains("server.api_key = [redacted]"));
        assert!(!shown.contains("top-secret"));
    }
}
