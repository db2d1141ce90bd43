use std::collections::HashMap;
use std::fs;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use crate::fee::FeeSchedule;
use crate::payment::WorkerConfig;
use crate::rail::RailKind;
use crate::withdrawal::WithdrawalConfig;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    pub log_level: String,
    pub log_dir: String,
    pub log_file: String,
    pub use_json: bool,
    pub rotation: String,
    pub gateway: GatewayConfig,
    pub store: StoreConfig,
    /// HS256 secret for bearer tokens
    pub jwt_secret: String,
    #[serde(default)]
    pub fees: FeeSchedule,
    /// One entry per enabled rail, keyed `card` / `bank` / `wallet`
    pub rails: HashMap<RailKind, RailConfig>,
    /// Rail used for profiles, payouts and partner settlement
    #[serde(default)]
    pub withdrawal_rail: RailKind,
    pub webhook: WebhookConfig,
    #[serde(default)]
    pub reconciler: ReconcilerConfig,
    #[serde(default = "default_lease_secs")]
    pub processing_lease_secs: u64,
}

fn default_lease_secs() -> u64 {
    120
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Postgres,
    Memory,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    #[serde(default)]
    pub postgres_url: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RailProvider {
    Http,
    Mock,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RailConfig {
    pub provider: RailProvider,
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_rail_timeout_ms")]
    pub timeout_ms: u64,
    /// Where hosted onboarding sends the payee back to
    #[serde(default)]
    pub onboarding_return_url: Option<String>,
}

fn default_rail_timeout_ms() -> u64 {
    10_000
}

impl RailConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct WebhookConfig {
    pub secret: String,
    #[serde(default = "default_tolerance_secs")]
    pub tolerance_secs: i64,
}

fn default_tolerance_secs() -> i64 {
    300
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ReconcilerConfig {
    pub enabled: bool,
    pub scan_interval_secs: u64,
    pub stale_threshold_secs: u64,
    pub batch_size: usize,
    pub expire_after_secs: u64,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            scan_interval_secs: 30,
            stale_threshold_secs: 60,
            batch_size: 100,
            expire_after_secs: 86_400,
        }
    }
}

impl ReconcilerConfig {
    pub fn worker_config(&self) -> WorkerConfig {
        WorkerConfig {
            scan_interval: Duration::from_secs(self.scan_interval_secs),
            stale_threshold: Duration::from_secs(self.stale_threshold_secs),
            batch_size: self.batch_size,
            expire_after: Duration::from_secs(self.expire_after_secs),
        }
    }
}

impl AppConfig {
    pub fn load(env: &str) -> Result<Self> {
        let config_path = format!("config/{}.yaml", env);
        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path))?;
        let mut config = Self::from_yaml(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path))?;

        if let Ok(url) = std::env::var("DATABASE_URL") {
            config.store.postgres_url = Some(url);
        }
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    pub fn validate(&self) -> Result<()> {
        if self.store.backend == StoreBackend::Postgres && self.store.postgres_url.is_none() {
            bail!("store.postgres_url (or DATABASE_URL) is required for the postgres backend");
        }
        if !self.rails.contains_key(&self.withdrawal_rail) {
            bail!("withdrawal_rail '{}' has no entry under rails", self.withdrawal_rail);
        }
        for (kind, rail) in &self.rails {
            if rail.provider == RailProvider::Http && rail.base_url.is_empty() {
                bail!("rails.{}.base_url is required for the http provider", kind);
            }
        }
        if self.jwt_secret.is_empty() {
            bail!("jwt_secret must not be empty");
        }
        Ok(())
    }

    pub fn withdrawal_config(&self) -> WithdrawalConfig {
        WithdrawalConfig {
            rail: self.withdrawal_rail,
            processing_lease: Duration::from_secs(self.processing_lease_secs),
        }
    }
}
