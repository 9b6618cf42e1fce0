//! Orchestrator configuration and the contract configuration store

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::info;

use crate::error::{OrchestratorError, Result};
use crate::models::Address;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub contracts: ContractsConfig,
    #[serde(default)]
    pub payment: PaymentConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Read a TOML file, falling back to defaults when it does not exist
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            Ok(toml::from_str(&content)?)
        } else {
            info!(path = %path.display(), "Config file not found, using defaults");
            Ok(Config::default())
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// Connection endpoint handed to the ledger client
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// State file backing the in-memory ledger
    #[serde(default = "default_state_file")]
    pub state_file: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContractsConfig {
    /// JSON contract configuration (registry, certificate and token addresses)
    #[serde(default = "default_contracts_path")]
    pub path: PathBuf,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PaymentConfig {
    #[serde(default)]
    pub spender: SpenderPolicy,
}

/// Who the buyer's allowance is granted to
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SpenderPolicy {
    /// Current certificate owner
    #[default]
    Seller,
    /// The certificate logic contract
    CertificateContract,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default tracing directive, overridden by RUST_LOG
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

// Defaults
fn default_endpoint() -> String { "http://localhost:8545".to_string() }
fn default_state_file() -> PathBuf { PathBuf::from("ledger-state.json") }
fn default_contracts_path() -> PathBuf { PathBuf::from("contractConfig.json") }
fn default_log_filter() -> String { "rec_orchestrator=info".to_string() }

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            state_file: default_state_file(),
        }
    }
}

impl Default for ContractsConfig {
    fn default() -> Self {
        Self { path: default_contracts_path() }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { filter: default_log_filter() }
    }
}

//=============================================================================
// CONTRACT CONFIGURATION STORE
//=============================================================================

/// Deployed contract addresses
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ContractConfig {
    pub asset_producing_registry_logic: Address,
    pub asset_consuming_registry_logic: Address,
    pub certificate_logic: Address,
    pub origin_contract_lookup: Address,
    /// Settlement token persisted by SET_ERC20_CERTIFICATE
    #[serde(rename = "ERC20Address", default, skip_serializing_if = "Option::is_none")]
    pub erc20_address: Option<Address>,
    /// Entries written by other tools, preserved on persist
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Source of contract addresses; accepts settlement token updates
#[async_trait]
pub trait ConfigStore: Send + Sync {
    async fn contracts(&self) -> Result<ContractConfig>;

    async fn persist_settlement_token(&self, token: &Address) -> Result<()>;
}

/// JSON file store, rewritten in full on every update
pub struct FileConfigStore {
    path: PathBuf,
    contracts: RwLock<ContractConfig>,
}

impl FileConfigStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let content = std::fs::read_to_string(&path).map_err(|e| {
            OrchestratorError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        let contracts = serde_json::from_str(&content)?;
        Ok(Self {
            path,
            contracts: RwLock::new(contracts),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ConfigStore for FileConfigStore {
    async fn contracts(&self) -> Result<ContractConfig> {
        Ok(self.contracts.read().await.clone())
    }

    async fn persist_settlement_token(&self, token: &Address) -> Result<()> {
        let mut contracts = self.contracts.write().await;
        let mut updated = contracts.clone();
        updated.erc20_address = Some(token.clone());

        let json = serde_json::to_string_pretty(&updated)?;
        std::fs::write(&self.path, json).map_err(|e| {
            OrchestratorError::Config(format!("cannot write {}: {}", self.path.display(), e))
        })?;

        *contracts = updated;
        info!(path = %self.path.display(), token = %token, "Settlement token persisted");
        Ok(())
    }
}

/// Volatile store for tests and embedding
pub struct MemoryConfigStore {
    contracts: RwLock<ContractConfig>,
}

impl MemoryConfigStore {
    pub fn new(contracts: ContractConfig) -> Self {
        Self {
            contracts: RwLock::new(contracts),
        }
    }
}

#[async_trait]
impl ConfigStore for MemoryConfigStore {
    async fn contracts(&self) -> Result<ContractConfig> {
        Ok(self.contracts.read().await.clone())
    }

    async fn persist_settlement_token(&self, token: &Address) -> Result<()> {
        self.contracts.write().await.erc20_address = Some(token.clone());
        Ok(())
    }
}
