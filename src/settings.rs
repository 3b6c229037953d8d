use crate::chain_client::MULTICALL3_ADDRESS;
use crate::contracts::BALANCER_VAULT_ADDRESS;
use crate::multicall::default_batch_size_for_chain;
use config::{Config, ConfigError, File};
use ethers::types::Address;
use serde::Deserialize;
use std::env;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Chain {
    /// Chain name as used in cursor keys and batch-size defaults (e.g. `mainnet`)
    pub name: String,
    #[serde(default)]
    pub chain_id: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Rpc {
    pub http_urls: Vec<String>,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_qps_limit")]
    pub qps_limit: u32,
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
}

fn default_request_timeout_ms() -> u64 {
    10_000
}
fn default_qps_limit() -> u32 {
    25
}
fn default_max_concurrency() -> usize {
    8
}

impl Rpc {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Contracts {
    #[serde(default = "default_vault")]
    pub vault: Address,
    #[serde(default = "default_multicall")]
    pub multicall: Address,
}

fn default_vault() -> Address {
    BALANCER_VAULT_ADDRESS
}
fn default_multicall() -> Address {
    MULTICALL3_ADDRESS
}

impl Default for Contracts {
    fn default() -> Self {
        Self {
            vault: default_vault(),
            multicall: default_multicall(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Multicall {
    /// Overrides the per-chain default when set
    #[serde(default)]
    pub batch_size: Option<usize>,
    #[serde(default = "default_max_concurrent_chunks")]
    pub max_concurrent_chunks: usize,
    #[serde(default = "default_multicall_timeout_seconds")]
    pub timeout_seconds: u64,
}

fn default_max_concurrent_chunks() -> usize {
    4
}
fn default_multicall_timeout_seconds() -> u64 {
    10
}

impl Default for Multicall {
    fn default() -> Self {
        Self {
            batch_size: None,
            max_concurrent_chunks: default_max_concurrent_chunks(),
            timeout_seconds: default_multicall_timeout_seconds(),
        }
    }
}

impl Multicall {
    pub fn batch_size_for(&self, chain: &str) -> usize {
        self.batch_size
            .unwrap_or_else(|| default_batch_size_for_chain(chain))
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Subgraph {
    #[serde(default)]
    pub urls: Vec<String>,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    #[serde(default = "default_subgraph_timeout_seconds")]
    pub timeout_seconds: u64,
    #[serde(default)]
    pub retry_delay_ms: u64,
}

fn default_max_attempts() -> usize {
    3
}
fn default_page_size() -> usize {
    crate::subgraph::DEFAULT_PAGE_SIZE
}
fn default_subgraph_timeout_seconds() -> u64 {
    30
}

impl Default for Subgraph {
    fn default() -> Self {
        Self {
            urls: Vec::new(),
            max_attempts: default_max_attempts(),
            page_size: default_page_size(),
            timeout_seconds: default_subgraph_timeout_seconds(),
            retry_delay_ms: 0,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SyncSettings {
    #[serde(default = "default_category")]
    pub category: String,
    #[serde(default = "default_interval_seconds")]
    pub interval_seconds: u64,
    /// Blocks kept between the chain head and the scanned range
    #[serde(default)]
    pub confirmation_depth: u64,
}

fn default_category() -> String {
    "pools".to_string()
}
fn default_interval_seconds() -> u64 {
    60
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            category: default_category(),
            interval_seconds: default_interval_seconds(),
            confirmation_depth: 0,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Logging {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Logging {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Metrics {
    /// Prometheus listen address, e.g. `0.0.0.0:9000`. Only used with the
    /// `observability` feature.
    #[serde(default)]
    pub listen_addr: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub chain: Chain,
    pub rpc: Rpc,
    #[serde(default)]
    pub contracts: Contracts,
    #[serde(default)]
    pub multicall: Multicall,
    #[serde(default)]
    pub subgraph: Subgraph,
    #[serde(default)]
    pub sync: SyncSettings,
    #[serde(default)]
    pub log: Logging,
    #[serde(default)]
    pub metrics: Metrics,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::with_name("Config.toml"))
            .build()?;
        Self::finish(s)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::from(path.as_ref()))
            .build()?;
        Self::finish(s)
    }

    fn finish(s: Config) -> Result<Self, ConfigError> {
        let mut settings: Self = s.try_deserialize()?;
        apply_env_overrides(&mut settings, |key| env::var(key).ok());
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.rpc.http_urls.is_empty() {
            return Err(ConfigError::Message(
                "rpc.http_urls must list at least one endpoint".to_string(),
            ));
        }
        if self.rpc.qps_limit == 0 {
            return Err(ConfigError::Message("rpc.qps_limit must be non-zero".to_string()));
        }
        Ok(())
    }
}

/// Environment overrides for endpoint lists (comma separated or JSON array).
fn apply_env_overrides(settings: &mut Settings, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(list) = lookup("SYNC_RPC_HTTP_URLS").and_then(|raw| parse_string_list(&raw)) {
        if !list.is_empty() {
            settings.rpc.http_urls = list;
        }
    }
    if let Some(list) = lookup("SYNC_SUBGRAPH_URLS").and_then(|raw| parse_string_list(&raw)) {
        if !list.is_empty() {
            settings.subgraph.urls = list;
        }
    }
}

fn parse_string_list(input: &str) -> Option<Vec<String>> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Some(vec![]);
    }
    if trimmed.starts_with('[') {
        return serde_json::from_str::<Vec<String>>(trimmed).ok();
    }
    Some(
        trimmed
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
    )
}
