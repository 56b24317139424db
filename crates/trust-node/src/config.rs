// serde derive visitors mention `f32`/`f64` even though none of these structs do.
#![allow(clippy::disallowed_types)]

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use kupo_rpc::KupoConfig;
use serde::Deserialize;
use thiserror::Error;
use trust_core::{AssetName, PolicyId, TokenSelector, TRUSTED_TOKEN_NAME};
use trust_indexer::{is_safe_name, ContractPoller, ContractSpec, DocumentStore, KupoUtxoSource};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("{0}")]
    EnvRef(String),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct NodeConfig {
    #[serde(default)]
    pub kupo: KupoSection,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub poller: PollerConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub contracts: Vec<ContractConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct KupoSection {
    #[serde(default = "default_kupo_protocol")]
    pub protocol: String,
    #[serde(default = "default_kupo_host")]
    pub host: String,
    #[serde(default = "default_kupo_port")]
    pub port: u16,
    #[serde(default = "default_kupo_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_kupo_retry_max")]
    pub retry_max: u32,
}

fn default_kupo_protocol() -> String {
    KupoConfig::DEFAULT_PROTOCOL.to_string()
}

fn default_kupo_host() -> String {
    KupoConfig::DEFAULT_HOST.to_string()
}

fn default_kupo_port() -> u16 {
    KupoConfig::DEFAULT_PORT
}

fn default_kupo_timeout_ms() -> u64 {
    KupoConfig::DEFAULT_TIMEOUT_MS
}

fn default_kupo_retry_max() -> u32 {
    KupoConfig::DEFAULT_RETRY_MAX
}

impl Default for KupoSection {
    fn default() -> Self {
        Self {
            protocol: default_kupo_protocol(),
            host: default_kupo_host(),
            port: default_kupo_port(),
            timeout_ms: default_kupo_timeout_ms(),
            retry_max: default_kupo_retry_max(),
        }
    }
}

impl KupoSection {
    pub fn client_config(&self) -> KupoConfig {
        let mut cfg = KupoConfig::from_parts(&self.protocol, &self.host, self.port);
        cfg.timeout_ms = self.timeout_ms;
        cfg.retry_max = self.retry_max;
        cfg
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PollerConfig {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
}

fn default_interval_secs() -> u64 {
    20
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
        }
    }
}

impl PollerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// Zero disables the response cache.
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
}

fn default_listen_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_cache_ttl_secs() -> u64 {
    20
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            cache_ttl_secs: default_cache_ttl_secs(),
        }
    }
}

impl ServerConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// `json` or `compact`.
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// One `[[contracts]]` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct ContractConfig {
    pub name: String,
    /// Hex, 28 bytes.
    pub policy_id: String,
    /// UTF-8 text of the asset name.
    #[serde(default = "default_asset_name")]
    pub asset_name: String,
    pub address: String,
}

fn default_asset_name() -> String {
    String::from_utf8_lossy(TRUSTED_TOKEN_NAME).into_owned()
}

impl ContractConfig {
    pub fn to_spec(&self) -> Result<ContractSpec, ConfigError> {
        let policy_id = PolicyId::from_hex(self.policy_id.trim()).map_err(|e| {
            ConfigError::Invalid(format!("contract `{}`: policy_id: {e}", self.name))
        })?;
        let asset_name = AssetName::new(self.asset_name.as_bytes()).map_err(|e| {
            ConfigError::Invalid(format!("contract `{}`: asset_name: {e}", self.name))
        })?;
        Ok(ContractSpec {
            name: self.name.clone(),
            address: self.address.trim().to_string(),
            selector: TokenSelector::new(policy_id, asset_name),
        })
    }
}

/// Values taken from CLI flags or their environment variables; each one that
/// is set wins over the file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub kupo_protocol: Option<String>,
    pub kupo_host: Option<String>,
    pub kupo_port: Option<u16>,
    pub data_dir: Option<PathBuf>,
    pub poll_interval_secs: Option<u64>,
    pub listen_addr: Option<String>,
    pub cache_ttl_secs: Option<u64>,
    pub log_format: Option<String>,
}

impl NodeConfig {
    pub fn apply(&mut self, overrides: Overrides) {
        if let Some(v) = overrides.kupo_protocol {
            self.kupo.protocol = v;
        }
        if let Some(v) = overrides.kupo_host {
            self.kupo.host = v;
        }
        if let Some(v) = overrides.kupo_port {
            self.kupo.port = v;
        }
        if let Some(v) = overrides.data_dir {
            self.storage.data_dir = v;
        }
        if let Some(v) = overrides.poll_interval_secs {
            self.poller.interval_secs = v;
        }
        if let Some(v) = overrides.listen_addr {
            self.server.listen_addr = v;
        }
        if let Some(v) = overrides.cache_ttl_secs {
            self.server.cache_ttl_secs = v;
        }
        if let Some(v) = overrides.log_format {
            self.logging.format = v;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !matches!(self.kupo.protocol.as_str(), "http" | "https") {
            return Err(ConfigError::Invalid(format!(
                "kupo.protocol must be http or https, got `{}`",
                self.kupo.protocol
            )));
        }
        if self.kupo.host.trim().is_empty() {
            return Err(ConfigError::Invalid("kupo.host is empty".to_string()));
        }
        if self.poller.interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "poller.interval_secs must be at least 1".to_string(),
            ));
        }
        if !matches!(self.logging.format.to_ascii_lowercase().as_str(), "json" | "compact") {
            return Err(ConfigError::Invalid(format!(
                "logging.format must be json or compact, got `{}`",
                self.logging.format
            )));
        }
        if self.contracts.is_empty() {
            return Err(ConfigError::Invalid("no [[contracts]] configured".to_string()));
        }

        let mut seen = HashSet::new();
        for contract in &self.contracts {
            if !is_safe_name(&contract.name) {
                return Err(ConfigError::Invalid(format!(
                    "contract name `{}` must be non-empty and use only ASCII letters, digits, `_` or `-`",
                    contract.name
                )));
            }
            if !seen.insert(contract.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate contract name `{}`",
                    contract.name
                )));
            }
            if contract.address.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "contract `{}`: address is empty",
                    contract.name
                )));
            }
            contract.to_spec()?;
        }
        Ok(())
    }

    /// Contracts in file order.
    pub fn contract_specs(&self) -> Result<Vec<ContractSpec>, ConfigError> {
        self.contracts.iter().map(ContractConfig::to_spec).collect()
    }

    pub fn contract_names(&self) -> Vec<String> {
        self.contracts.iter().map(|c| c.name.clone()).collect()
    }

    /// One poller per contract, each with its own Kupo client.
    pub fn pollers(&self, store: &DocumentStore) -> Result<Vec<ContractPoller>, ConfigError> {
        let interval = self.poller.interval();
        self.contract_specs()?
            .into_iter()
            .map(|spec| {
                let source = KupoUtxoSource::from_config(self.kupo.client_config()).map_err(
                    |e| ConfigError::Invalid(format!("kupo client for {}: {e}", spec.name)),
                )?;
                Ok(ContractPoller::new(spec, Arc::new(source), store.clone(), interval))
            })
            .collect()
    }
}

/// Replaces every string of the form `env:VAR` with the variable's value.
fn resolve_env_refs(mut v: toml::Value) -> Result<toml::Value, ConfigError> {
    fn walk(v: &mut toml::Value) -> Result<(), ConfigError> {
        match v {
            toml::Value::String(s) => {
                if let Some(var) = s.strip_prefix("env:") {
                    let var = var.trim();
                    if var.is_empty() {
                        return Err(ConfigError::EnvRef(
                            "invalid env: reference (empty var name)".to_string(),
                        ));
                    }
                    let val = std::env::var(var).map_err(|_| {
                        ConfigError::EnvRef(format!("missing required environment variable: {var}"))
                    })?;
                    *s = val;
                }
            }
            toml::Value::Array(arr) => {
                for x in arr {
                    walk(x)?;
                }
            }
            toml::Value::Table(map) => {
                for (_, x) in map.iter_mut() {
                    walk(x)?;
                }
            }
            _ => {}
        }
        Ok(())
    }

    walk(&mut v)?;
    Ok(v)
}

pub fn parse_config(raw: &str) -> Result<NodeConfig, ConfigError> {
    let parsed: toml::Value = toml::from_str(raw)?;
    let resolved = resolve_env_refs(parsed)?;
    Ok(resolved.try_into::<NodeConfig>()?)
}

pub fn load_config(path: &Path) -> Result<NodeConfig, ConfigError> {
    let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse_config(&raw)
}
