use crate::error::{EngineError, Result};
use crate::io;
use crate::paths;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// RetryConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_delay_secs")]
    pub delay_secs: u64,
}

fn default_max_retries() -> u32 {
    3
}

fn default_delay_secs() -> u64 {
    3
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_retries: default_max_retries(),
            delay_secs: default_delay_secs(),
        }
    }
}

impl RetryConfig {
    /// Attempts per action: `max_retries` when enabled, otherwise exactly one.
    pub fn max_attempts(&self) -> u32 {
        if self.enabled {
            self.max_retries.max(1)
        } else {
            1
        }
    }

    pub fn delay(&self) -> Duration {
        if self.enabled {
            Duration::from_secs(self.delay_secs)
        } else {
            Duration::ZERO
        }
    }
}

// ---------------------------------------------------------------------------
// DispatchMode
// ---------------------------------------------------------------------------

/// How actions reach the processing services.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchMode {
    /// Direct service invocation; the response body is the result.
    #[default]
    Sync,
    /// Publish to a topic; the result arrives later as a correlated event.
    Async,
}

impl DispatchMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sync => "sync",
            Self::Async => "async",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DispatchConfig {
    #[serde(default)]
    pub mode: DispatchMode,
}

// ---------------------------------------------------------------------------
// SidecarConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SidecarConfig {
    #[serde(default = "default_sidecar_host")]
    pub host: String,
    #[serde(default = "default_sidecar_port")]
    pub http_port: u16,
    /// Method name invoked on the target service.
    #[serde(default = "default_method")]
    pub method: String,
    /// Pub/sub component used for asynchronous dispatch.
    #[serde(default = "default_pubsub")]
    pub pubsub: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_sidecar_host() -> String {
    "localhost".to_string()
}

fn default_sidecar_port() -> u16 {
    3500
}

fn default_method() -> String {
    "process".to_string()
}

fn default_pubsub() -> String {
    "pubsub".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

impl Default for SidecarConfig {
    fn default() -> Self {
        Self {
            host: default_sidecar_host(),
            http_port: default_sidecar_port(),
            method: default_method(),
            pubsub: default_pubsub(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl SidecarConfig {
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.http_port)
    }
}

// ---------------------------------------------------------------------------
// ServerConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_server_port")]
    pub port: u16,
}

fn default_server_port() -> u16 {
    8100
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_server_port(),
        }
    }
}

// ---------------------------------------------------------------------------
// Overrides
// ---------------------------------------------------------------------------

/// Values supplied from the environment or command line, applied on top of
/// the file config.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub use_retries: Option<bool>,
    pub sidecar_http_port: Option<u16>,
    pub server_port: Option<u16>,
}

// ---------------------------------------------------------------------------
// EngineConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub sidecar: SidecarConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default = "default_database")]
    pub database: PathBuf,
}

fn default_database() -> PathBuf {
    PathBuf::from(paths::STEPWISE_DIR).join(paths::DEFAULT_DB_FILE)
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            dispatch: DispatchConfig::default(),
            sidecar: SidecarConfig::default(),
            server: ServerConfig::default(),
            database: default_database(),
        }
    }
}

impl EngineConfig {
    /// Load `.stepwise/config.yaml` under `root`. A missing file yields the
    /// default config.
    pub fn load(root: &Path) -> Result<Self> {
        let path = paths::config_path(root);
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = std::fs::read_to_string(&path)?;
        let cfg: EngineConfig = serde_yaml::from_str(&data)?;
        Ok(cfg)
    }

    pub fn save(&self, root: &Path) -> Result<()> {
        let path = paths::config_path(root);
        let data = serde_yaml::to_string(self)?;
        io::atomic_write(&path, data.as_bytes())
    }

    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        if let Some(enabled) = overrides.use_retries {
            self.retry.enabled = enabled;
        }
        if let Some(port) = overrides.sidecar_http_port {
            self.sidecar.http_port = port;
        }
        if let Some(port) = overrides.server_port {
            self.server.port = port;
        }
    }

    pub fn db_path(&self, root: &Path) -> PathBuf {
        paths::db_path(root, &self.database)
    }

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        if self.retry.max_retries == 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "retry.max_retries must be at least 1".to_string(),
            });
        }

        if self.retry.enabled && self.retry.delay_secs == 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: "retries are enabled with a zero delay; failing services will be hit back-to-back"
                    .to_string(),
            });
        }

        if self.retry.max_retries > 10 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: format!(
                    "retry.max_retries={} (>10 is unusual)",
                    self.retry.max_retries
                ),
            });
        }

        if self.sidecar.host.trim().is_empty() {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "sidecar.host is empty".to_string(),
            });
        }

        if self.sidecar.method.trim().is_empty() {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "sidecar.method is empty".to_string(),
            });
        }

        if self.dispatch.mode == DispatchMode::Async && self.sidecar.pubsub.trim().is_empty() {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "dispatch.mode is async but sidecar.pubsub is empty".to_string(),
            });
        }

        warnings
    }

    /// Fail on any `Error`-level warning.
    pub fn ensure_valid(&self) -> Result<()> {
        let errors: Vec<String> = self
            .validate()
            .into_iter()
            .filter(|w| w.level == WarnLevel::Error)
            .map(|w| w.message)
            .collect();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(EngineError::InvalidConfig(errors.join("; ")))
        }
    }
}
