//! # Engine Configuration
//!
//! Every feature toggle and secret the engine reads, in one struct passed
//! to constructors. Nothing is read from the environment after startup.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  1. Environment Variables (highest priority)                            │
//! │     SALELEDGER_DATABASE_PATH=/var/lib/saleledger/ledger.db              │
//! │     SALELEDGER_WEBHOOK_SECRET=whsec_...                                 │
//! │                                                                         │
//! │  2. TOML Config File                                                    │
//! │     ~/.config/saleledger/saleledger.toml (Linux)                        │
//! │     ~/Library/Application Support/com.saleledger.saleledger/...         │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! [database]
//! path = "ledger.db"
//! max_connections = 8
//!
//! [security]
//! master_secret = "change-me"
//!
//! [tokens]
//! secret = "dedicated-confirmation-secret"
//! default_ttl_secs = 900
//!
//! [webhook]
//! signing_secret = "whsec_..."
//! tolerance_secs = 300
//!
//! [inventory]
//! consume_lots = false
//!
//! [ledger]
//! pending_timeout_secs = 86400
//!
//! [server]
//! bind_addr = "0.0.0.0"
//! port = 8080
//! trusted_proxy_headers = ["x-forwarded-for", "x-real-ip"]
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use saleledger_core::webhook::DEFAULT_TOLERANCE_SECS;
use saleledger_db::DbConfig;

// =============================================================================
// Errors
// =============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load config: {0}")]
    LoadFailed(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::LoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(err: toml::de::Error) -> Self {
        ConfigError::LoadFailed(err.to_string())
    }
}

pub type ConfigResult<T> = Result<T, ConfigError>;

// =============================================================================
// Sections
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSettings {
    #[serde(default = "default_database_path")]
    pub path: PathBuf,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Milliseconds a writer waits for the lock before failing as busy.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

fn default_database_path() -> PathBuf {
    PathBuf::from("saleledger.db")
}

fn default_max_connections() -> u32 {
    5
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        DatabaseSettings {
            path: default_database_path(),
            max_connections: default_max_connections(),
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }
}

/// Application-wide secrets.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct SecuritySettings {
    /// General application secret. Last-resort key for confirmation tokens.
    #[serde(default)]
    pub master_secret: String,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct TokenSettings {
    /// Dedicated confirmation-token key.
    #[serde(default)]
    pub secret: Option<String>,

    #[serde(default = "default_token_ttl")]
    pub default_ttl_secs: i64,
}

fn default_token_ttl() -> i64 {
    900
}

impl Default for TokenSettings {
    fn default() -> Self {
        TokenSettings {
            secret: None,
            default_ttl_secs: default_token_ttl(),
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct WebhookSettings {
    /// Provider signing secret.
    #[serde(default)]
    pub signing_secret: String,

    #[serde(default = "default_tolerance")]
    pub tolerance_secs: i64,
}

fn default_tolerance() -> i64 {
    DEFAULT_TOLERANCE_SECS
}

impl Default for WebhookSettings {
    fn default() -> Self {
        WebhookSettings {
            signing_secret: String::new(),
            tolerance_secs: default_tolerance(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InventorySettings {
    /// Consume lots (FEFO) in the same transaction as the stock reservation.
    #[serde(default)]
    pub consume_lots: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LedgerSettings {
    /// PENDING transactions older than this are cancelled by the sweep.
    /// Unset disables the sweep.
    #[serde(default)]
    pub pending_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Headers consulted for the client IP, in order. Only list headers set
    /// by a proxy you control.
    #[serde(default)]
    pub trusted_proxy_headers: Vec<String>,
}

fn default_bind_addr() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for ServerSettings {
    fn default() -> Self {
        ServerSettings {
            bind_addr: default_bind_addr(),
            port: default_port(),
            trusted_proxy_headers: Vec::new(),
        }
    }
}

impl ServerSettings {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.bind_addr, self.port)
    }
}

// =============================================================================
// EngineConfig
// =============================================================================

#[derive(Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub database: DatabaseSettings,

    #[serde(default)]
    pub security: SecuritySettings,

    #[serde(default)]
    pub tokens: TokenSettings,

    #[serde(default)]
    pub webhook: WebhookSettings,

    #[serde(default)]
    pub inventory: InventorySettings,

    #[serde(default)]
    pub ledger: LedgerSettings,

    #[serde(default)]
    pub server: ServerSettings,
}

impl std::fmt::Debug for EngineConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineConfig")
            .field("database", &self.database)
            .field("inventory", &self.inventory)
            .field("ledger", &self.ledger)
            .field("server", &self.server)
            .field("secrets", &"<redacted>")
            .finish()
    }
}

impl EngineConfig {
    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (explicit path, else the platform config dir)
    /// 3. `SALELEDGER_*` environment variables
    pub fn load(config_path: Option<PathBuf>) -> ConfigResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading config from file");
                config = Self::from_file(&path)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> ConfigResult<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Rejects configurations the engine cannot run safely with.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.webhook.signing_secret.is_empty() {
            return Err(ConfigError::Invalid(
                "webhook.signing_secret must be set".into(),
            ));
        }

        if self.tokens.secret.as_deref().unwrap_or("").is_empty()
            && self.security.master_secret.is_empty()
        {
            return Err(ConfigError::Invalid(
                "either tokens.secret or security.master_secret must be set".into(),
            ));
        }

        if self.tokens.default_ttl_secs <= 0 {
            return Err(ConfigError::Invalid(
                "tokens.default_ttl_secs must be positive".into(),
            ));
        }

        if self.webhook.tolerance_secs <= 0 {
            return Err(ConfigError::Invalid(
                "webhook.tolerance_secs must be positive".into(),
            ));
        }

        if self.database.max_connections == 0 {
            return Err(ConfigError::Invalid(
                "database.max_connections must be greater than 0".into(),
            ));
        }

        if self.ledger.pending_timeout_secs == Some(0) {
            return Err(ConfigError::Invalid(
                "ledger.pending_timeout_secs must be greater than 0 when set".into(),
            ));
        }

        Ok(())
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var("SALELEDGER_DATABASE_PATH") {
            debug!(path = %path, "Overriding database path from environment");
            self.database.path = PathBuf::from(path);
        }

        if let Ok(max) = std::env::var("SALELEDGER_DATABASE_MAX_CONNECTIONS") {
            match max.parse::<u32>() {
                Ok(max) => self.database.max_connections = max,
                Err(_) => warn!(value = %max, "Ignoring invalid SALELEDGER_DATABASE_MAX_CONNECTIONS"),
            }
        }

        if let Ok(secret) = std::env::var("SALELEDGER_MASTER_SECRET") {
            self.security.master_secret = secret;
        }

        if let Ok(secret) = std::env::var("SALELEDGER_TOKEN_SECRET") {
            self.tokens.secret = Some(secret);
        }

        if let Ok(secret) = std::env::var("SALELEDGER_WEBHOOK_SECRET") {
            self.webhook.signing_secret = secret;
        }

        if let Ok(flag) = std::env::var("SALELEDGER_CONSUME_LOTS") {
            match flag.to_lowercase().as_str() {
                "1" | "true" | "yes" => self.inventory.consume_lots = true,
                "0" | "false" | "no" => self.inventory.consume_lots = false,
                _ => warn!(value = %flag, "Ignoring invalid SALELEDGER_CONSUME_LOTS"),
            }
        }

        if let Ok(secs) = std::env::var("SALELEDGER_PENDING_TIMEOUT_SECS") {
            match secs.parse::<u64>() {
                Ok(secs) => self.ledger.pending_timeout_secs = Some(secs),
                Err(_) => warn!(value = %secs, "Ignoring invalid SALELEDGER_PENDING_TIMEOUT_SECS"),
            }
        }

        if let Ok(port) = std::env::var("SALELEDGER_PORT") {
            if let Ok(p) = port.parse::<u16>() {
                debug!(port = p, "Overriding port from environment");
                self.server.port = p;
            }
        }

        if let Ok(headers) = std::env::var("SALELEDGER_TRUSTED_PROXY_HEADERS") {
            self.server.trusted_proxy_headers = headers
                .split(',')
                .map(|h| h.trim().to_ascii_lowercase())
                .filter(|h| !h.is_empty())
                .collect();
        }
    }

    fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "saleledger", "saleledger")
            .map(|dirs| dirs.config_dir().join("saleledger.toml"))
    }

    // =========================================================================
    // Derived Values
    // =========================================================================

    /// Key for confirmation tokens.
    ///
    /// Falls back to the master secret when no dedicated key is configured;
    /// tokens then share a key with everything else the master secret signs.
    pub fn confirmation_secret(&self) -> &[u8] {
        match self.tokens.secret.as_deref() {
            Some(secret) if !secret.is_empty() => secret.as_bytes(),
            _ => {
                warn!("No dedicated confirmation token secret; falling back to the master secret");
                self.security.master_secret.as_bytes()
            }
        }
    }

    pub fn token_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.tokens.default_ttl_secs)
    }

    pub fn pending_timeout(&self) -> Option<Duration> {
        self.ledger.pending_timeout_secs.map(Duration::from_secs)
    }

    pub fn db_config(&self) -> DbConfig {
        DbConfig::new(&self.database.path)
            .max_connections(self.database.max_connections)
            .busy_timeout(Duration::from_millis(self.database.busy_timeout_ms))
    }

    /// Minimal valid configuration for tests.
    pub fn for_tests() -> Self {
        let mut config = EngineConfig::default();
        config.security.master_secret = "test-master-secret".into();
        config.tokens.secret = Some("test-confirmation-secret".into());
        config.webhook.signing_secret = "whsec_test".into();
        config
    }
}
