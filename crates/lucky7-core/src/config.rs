// Configuration loading and parsing (client.toml, credentials.toml).

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::channel::{ReconnectPolicy, SessionToken};
use crate::gate::StakeLimits;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("validation error for field `{field}`: {message}")]
    ValidationError { field: String, message: String },

    #[error("failed to initialize config from defaults: {message}")]
    DefaultsCopyError { message: String },
}

// ---------------------------------------------------------------------------
// Top-level assembled Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Config {
    pub client: ClientConfig,
    pub credentials: CredentialsConfig,
}

// ---------------------------------------------------------------------------
// client.toml structs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    pub server: ServerSection,
    #[serde(default)]
    pub reconnect: ReconnectSection,
    #[serde(default)]
    pub countdown: CountdownSection,
    #[serde(default)]
    pub notifier: NotifierSection,
    #[serde(default)]
    pub stakes: StakesSection,
    #[serde(default)]
    pub wallet: WalletSection,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerSection {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReconnectSection {
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: u32,
}

impl Default for ReconnectSection {
    fn default() -> Self {
        ReconnectSection {
            initial_delay_ms: 500,
            max_delay_ms: 30_000,
            multiplier: 2,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CountdownSection {
    pub tick_ms: u64,
}

impl Default for CountdownSection {
    fn default() -> Self {
        CountdownSection { tick_ms: 1000 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NotifierSection {
    pub visible_ms: u64,
}

impl Default for NotifierSection {
    fn default() -> Self {
        NotifierSection { visible_ms: 3000 }
    }
}

/// Stake bounds and BetSlip quick-stake buttons, in minor currency units.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StakesSection {
    pub min: u64,
    pub max: u64,
    pub presets: Vec<u64>,
}

impl Default for StakesSection {
    fn default() -> Self {
        StakesSection {
            min: 1,
            max: 1_000_000,
            presets: vec![100, 500, 1000],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WalletSection {
    pub starting_balance: u64,
}

impl Default for WalletSection {
    fn default() -> Self {
        WalletSection {
            starting_balance: 10_000,
        }
    }
}

// ---------------------------------------------------------------------------
// credentials.toml structs
// ---------------------------------------------------------------------------

#[derive(Clone, Deserialize, Default)]
pub struct CredentialsConfig {
    pub session_token: Option<String>,
}

impl std::fmt::Debug for CredentialsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialsConfig")
            .field("session_token", &self.session_token.as_ref().map(|_| "***"))
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Derived runtime settings
// ---------------------------------------------------------------------------

impl Config {
    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        let r = &self.client.reconnect;
        ReconnectPolicy {
            initial_delay: Duration::from_millis(r.initial_delay_ms),
            max_delay: Duration::from_millis(r.max_delay_ms),
            multiplier: r.multiplier,
        }
    }

    pub fn stake_limits(&self) -> StakeLimits {
        StakeLimits {
            min: self.client.stakes.min,
            max: self.client.stakes.max,
        }
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.client.countdown.tick_ms)
    }

    pub fn toast_duration(&self) -> Duration {
        Duration::from_millis(self.client.notifier.visible_ms)
    }

    pub fn session_token(&self) -> SessionToken {
        SessionToken::new(self.credentials.session_token.clone().unwrap_or_default())
    }
}

// ---------------------------------------------------------------------------
// Loading logic
// ---------------------------------------------------------------------------

/// Load and validate configuration from `config/client.toml` and (optionally)
/// `config/credentials.toml`, relative to `base_dir`.
///
/// Does not copy defaults; `load_config()` does.
pub fn load_config_from(base_dir: &Path) -> Result<Config, ConfigError> {
    let config_dir = base_dir.join("config");

    // --- client.toml (required) ---
    let client_path = config_dir.join("client.toml");
    let client_text = read_file(&client_path)?;
    let client: ClientConfig =
        toml::from_str(&client_text).map_err(|e| ConfigError::ParseError {
            path: client_path.clone(),
            source: e,
        })?;

    // --- credentials.toml (optional) ---
    let credentials_path = config_dir.join("credentials.toml");
    let credentials = if credentials_path.exists() {
        let cred_text = read_file(&credentials_path)?;
        toml::from_str(&cred_text).map_err(|e| ConfigError::ParseError {
            path: credentials_path.clone(),
            source: e,
        })?
    } else {
        CredentialsConfig::default()
    };

    let config = Config {
        client,
        credentials,
    };

    validate(&config)?;

    Ok(config)
}

/// Files seeded into `config/` from `defaults/` on first run. Credentials are
/// never seeded; `credentials.toml.example` is a template for the user.
const SEEDED_FILES: &[&str] = &["client.toml"];

/// Seed `config/` with any missing default files. Returns the paths written.
/// Existing files in `config/` are never overwritten.
pub fn ensure_config_files(base_dir: &Path) -> Result<Vec<PathBuf>, ConfigError> {
    let defaults_dir = base_dir.join("defaults");
    let config_dir = base_dir.join("config");

    if !defaults_dir.is_dir() {
        if config_dir.is_dir() {
            return Ok(Vec::new());
        }
        return Err(copy_error(format!(
            "neither defaults/ nor config/ directory found in {}; \
             run from the project root or ensure defaults/ is present",
            base_dir.display()
        )));
    }

    std::fs::create_dir_all(&config_dir)
        .map_err(|e| copy_error(format!("failed to create {}: {e}", config_dir.display())))?;

    let mut seeded = Vec::new();
    for name in SEEDED_FILES {
        let source = defaults_dir.join(name);
        let target = config_dir.join(name);
        if target.exists() || !source.is_file() {
            continue;
        }
        std::fs::copy(&source, &target).map_err(|e| {
            copy_error(format!(
                "failed to copy {} to {}: {e}",
                source.display(),
                target.display()
            ))
        })?;
        seeded.push(target);
    }

    Ok(seeded)
}

/// Loads config relative to the current working directory, copying defaults
/// first.
pub fn load_config() -> Result<Config, ConfigError> {
    let cwd = std::env::current_dir().map_err(|_| ConfigError::FileNotFound {
        path: PathBuf::from("."),
    })?;
    ensure_config_files(&cwd)?;
    load_config_from(&cwd)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn read_file(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound {
        path: path.to_path_buf(),
    })
}

fn copy_error(message: String) -> ConfigError {
    ConfigError::DefaultsCopyError { message }
}

fn invalid(field: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::ValidationError {
        field: field.into(),
        message: message.into(),
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

fn validate(config: &Config) -> Result<(), ConfigError> {
    let c = &config.client;

    let url = c.server.url.trim();
    if !(url.starts_with("ws://") || url.starts_with("wss://")) {
        return Err(invalid(
            "server.url",
            format!("must be a ws:// or wss:// URL, got {:?}", c.server.url),
        ));
    }

    if c.reconnect.initial_delay_ms == 0 {
        return Err(invalid("reconnect.initial_delay_ms", "must be greater than 0"));
    }
    if c.reconnect.max_delay_ms < c.reconnect.initial_delay_ms {
        return Err(invalid(
            "reconnect.max_delay_ms",
            format!(
                "must be at least initial_delay_ms ({}), got {}",
                c.reconnect.initial_delay_ms, c.reconnect.max_delay_ms
            ),
        ));
    }
    if c.reconnect.multiplier == 0 {
        return Err(invalid("reconnect.multiplier", "must be at least 1"));
    }

    if c.countdown.tick_ms == 0 {
        return Err(invalid("countdown.tick_ms", "must be greater than 0"));
    }
    if c.notifier.visible_ms == 0 {
        return Err(invalid("notifier.visible_ms", "must be greater than 0"));
    }

    if c.stakes.min == 0 {
        return Err(invalid("stakes.min", "must be greater than 0"));
    }
    if c.stakes.max < c.stakes.min {
        return Err(invalid(
            "stakes.max",
            format!("must be at least stakes.min ({}), got {}", c.stakes.min, c.stakes.max),
        ));
    }
    if let Some(p) = c
        .stakes
        .presets
        .iter()
        .find(|p| !(c.stakes.min..=c.stakes.max).contains(*p))
    {
        return Err(invalid(
            "stakes.presets",
            format!(
                "preset {p} is outside [{}, {}]",
                c.stakes.min, c.stakes.max
            ),
        ));
    }

    Ok(())
}
