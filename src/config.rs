//! Configuration loader and validator for the survey sync service.
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema exactly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub app: App,
    pub webhook: Webhook,
    pub arcgis: ArcGis,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
    pub bind_addr: String,
    pub retry_interval_secs: u64,
    pub retry_batch_size: u32,
}

/// Inbound webhook settings. An empty secret disables secret and signature checks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Webhook {
    #[serde(default)]
    pub secret: String,
}

/// Remote feature service credentials and endpoints.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ArcGis {
    pub username: String,
    pub password: String,
    pub service_url: String,
    pub token_url: String,
    pub portal_url: String,
    #[serde(default)]
    pub timeouts: Timeouts,
}

impl std::fmt::Debug for ArcGis {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArcGis")
            .field("username", &self.username)
            .field("service_url", &self.service_url)
            .field("token_url", &self.token_url)
            .field("portal_url", &self.portal_url)
            .field("timeouts", &self.timeouts)
            .finish_non_exhaustive()
    }
}

/// Per-call-type timeouts for the remote platform, in seconds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Timeouts {
    pub token_secs: u64,
    pub query_secs: u64,
    pub edit_secs: u64,
    pub bulk_secs: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            token_secs: 15,
            query_secs: 30,
            edit_secs: 30,
            bulk_secs: 120,
        }
    }
}

impl Timeouts {
    pub fn token(&self) -> Duration {
        Duration::from_secs(self.token_secs)
    }

    pub fn query(&self) -> Duration {
        Duration::from_secs(self.query_secs)
    }

    pub fn edit(&self) -> Duration {
        Duration::from_secs(self.edit_secs)
    }

    pub fn bulk(&self) -> Duration {
        Duration::from_secs(self.bulk_secs)
    }
}

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        if self.app.data_dir.trim().is_empty() {
            return Ok(());
        }
        fs::create_dir_all(&self.app.data_dir)
    }

    /// Default SQLite URL inside the data directory; `DATABASE_URL` takes precedence.
    pub fn database_url(&self) -> String {
        std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| format!("sqlite://{}/poi-sync.db", self.app.data_dir))
    }

    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.app
            .bind_addr
            .parse()
            .map_err(|_| ConfigError::Invalid("app.bind_addr must be a socket address"))
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.app.retry_interval_secs)
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
pub fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }
    cfg.bind_addr()?;
    if cfg.app.retry_interval_secs == 0 {
        return Err(ConfigError::Invalid("app.retry_interval_secs must be > 0"));
    }
    if cfg.app.retry_batch_size == 0 {
        return Err(ConfigError::Invalid("app.retry_batch_size must be > 0"));
    }

    let a = &cfg.arcgis;
    if a.username.trim().is_empty() {
        return Err(ConfigError::Invalid("arcgis.username must be non-empty"));
    }
    if a.password.is_empty() {
        return Err(ConfigError::Invalid("arcgis.password must be non-empty"));
    }
    if a.service_url.trim().is_empty() {
        return Err(ConfigError::Invalid("arcgis.service_url must be non-empty"));
    }
    if a.token_url.trim().is_empty() {
        return Err(ConfigError::Invalid("arcgis.token_url must be non-empty"));
    }
    if a.portal_url.trim().is_empty() {
        return Err(ConfigError::Invalid("arcgis.portal_url must be non-empty"));
    }

    let t = &a.timeouts;
    if t.token_secs == 0 || t.query_secs == 0 || t.edit_secs == 0 || t.bulk_secs == 0 {
        return Err(ConfigError::Invalid("arcgis.timeouts must all be > 0"));
    }

    Ok(())
}

/// Returns the documented example YAML content.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"
  bind_addr: "0.0.0.0:3000"
  retry_interval_secs: 300
  retry_batch_size: 20

webhook:
  secret: "CHANGE_ME"

arcgis:
  username: "YOUR_ARCGIS_USERNAME"
  password: "YOUR_ARCGIS_PASSWORD"
  service_url: "https://services.arcgis.com/ORG/arcgis/rest/services/survey123_poi/FeatureServer/0"
  token_url: "https://www.arcgis.com/sharing/rest/generateToken"
  portal_url: "https://www.arcgis.com"
  timeouts:
    token_secs: 15
    query_secs: 30
    edit_secs: 30
    bulk_secs: 120
"#
}
