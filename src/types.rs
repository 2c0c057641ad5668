use std::fs;
use std::path::PathBuf;

use anyhow::Context;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RedisConfig {
    pub url: String,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DocstoreBackend {
    Http,
    Memory,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DocstoreConfig {
    pub backend: DocstoreBackend,
    #[serde(default)]
    pub base_url: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Identity-service endpoint tokens are posted to.
    pub verify_url: String,
    /// Hex SHA-256 digest of the admin credential.
    pub admin_sha256: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuditConfig {
    pub database_path: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DataConfig {
    /// Directory holding the market universe files, seed states and the
    /// bot's belief vectors.
    pub dir: PathBuf,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LogsConfig {
    pub dir: PathBuf,
}

fn default_budget_factor() -> f64 {
    0.01
}

fn default_trade_noise() -> bool {
    true
}

fn default_noise_level() -> f64 {
    0.05
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BotConfig {
    /// Per-trade budget as a fraction of the market's liquidity parameter.
    #[serde(default = "default_budget_factor")]
    pub budget_factor: f64,
    #[serde(default = "default_trade_noise")]
    pub trade_noise: bool,
    /// Gaussian sigma applied to player beliefs.
    #[serde(default = "default_noise_level")]
    pub noise_level: f64,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            budget_factor: default_budget_factor(),
            trade_noise: default_trade_noise(),
            noise_level: default_noise_level(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub redis: RedisConfig,
    pub docstore: DocstoreConfig,
    pub auth: AuthConfig,
    pub audit: AuditConfig,
    pub data: DataConfig,
    pub logs: LogsConfig,
    #[serde(default)]
    pub bot: BotConfig,
}

impl AppConfig {
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file at {path}"))?;
        let cfg: Self = toml::from_str(&contents)
            .with_context(|| format!("failed to deserialize TOML config at {path}"))?;
        Ok(cfg)
    }
}
