use eyre::{eyre, Result, WrapErr};
use std::env;
use std::fmt;
use std::path::Path;

/// Main configuration for the indexer.
#[derive(Debug, Clone)]
pub struct Config {
    pub database: DatabaseConfig,
    pub l1: ChainEndpoint,
    pub l2: ChainEndpoint,
    pub contracts: ContractsConfig,
    pub indexer: IndexerConfig,
    pub bridge: BridgeConfig,
    pub api: ApiConfig,
}

/// Database configuration.
#[derive(Clone)]
pub struct DatabaseConfig {
    pub url: String,
}

/// Custom Debug that redacts the database URL (may contain credentials).
impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("url", &"<redacted>")
            .finish()
    }
}

/// RPC endpoint for one chain.
#[derive(Debug, Clone)]
pub struct ChainEndpoint {
    pub rpc_url: String,
    pub chain_id: u64,
}

/// Contract addresses the indexer filters logs by.
#[derive(Debug, Clone)]
pub struct ContractsConfig {
    pub market_l1: String,
    pub bridge_l1: String,
    pub points_l1: String,
    pub market_l2: String,
    pub bridge_l2: String,
}

/// Polling and retry configuration.
#[derive(Debug, Clone)]
pub struct IndexerConfig {
    pub poll_interval_ms: u64,
    pub max_block_retries: u32,
}

/// Bridge/minter configuration.
#[derive(Clone)]
pub struct BridgeConfig {
    pub minter_private_key: String,
    /// Optional external provenance API base URL. When unset, verification
    /// relies on the recorded sha alone.
    pub provenance_url: Option<String>,
}

/// Custom Debug that redacts the minter key to prevent accidental log leakage.
impl fmt::Debug for BridgeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BridgeConfig")
            .field("minter_private_key", &"<redacted>")
            .field("provenance_url", &self.provenance_url)
            .finish()
    }
}

/// Admin API configuration.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub bind_address: String,
    pub port: u16,
}

fn default_poll_interval() -> u64 {
    4000
}

fn default_max_block_retries() -> u32 {
    5
}

impl Config {
    /// Load configuration from environment variables.
    /// Loads a .env file if present, then reads from the environment.
    pub fn load() -> Result<Self> {
        Self::load_from_file(".env").or_else(|_| Self::load_from_env())
    }

    /// Load from a specific .env file path.
    pub fn load_from_file(path: &str) -> Result<Self> {
        if Path::new(path).exists() {
            dotenvy::from_filename(path)
                .wrap_err_with(|| format!("Failed to load .env file from {}", path))?;
        }
        Self::load_from_env()
    }

    fn load_from_env() -> Result<Self> {
        let database = DatabaseConfig {
            url: env::var("DATABASE_URL")
                .map_err(|_| eyre!("DATABASE_URL environment variable is required"))?,
        };

        let l1 = ChainEndpoint {
            rpc_url: env::var("L1_RPC_URL")
                .map_err(|_| eyre!("L1_RPC_URL environment variable is required"))?,
            chain_id: env::var("L1_CHAIN_ID")
                .map_err(|_| eyre!("L1_CHAIN_ID environment variable is required"))?
                .parse()
                .wrap_err("L1_CHAIN_ID must be a valid u64")?,
        };

        let l2 = ChainEndpoint {
            rpc_url: env::var("L2_RPC_URL")
                .map_err(|_| eyre!("L2_RPC_URL environment variable is required"))?,
            chain_id: env::var("L2_CHAIN_ID")
                .map_err(|_| eyre!("L2_CHAIN_ID environment variable is required"))?
                .parse()
                .wrap_err("L2_CHAIN_ID must be a valid u64")?,
        };

        let contracts = ContractsConfig {
            market_l1: env::var("MARKET_ADDRESS_L1")
                .map_err(|_| eyre!("MARKET_ADDRESS_L1 environment variable is required"))?,
            bridge_l1: env::var("BRIDGE_ADDRESS_L1")
                .map_err(|_| eyre!("BRIDGE_ADDRESS_L1 environment variable is required"))?,
            points_l1: env::var("POINTS_ADDRESS_L1")
                .map_err(|_| eyre!("POINTS_ADDRESS_L1 environment variable is required"))?,
            market_l2: env::var("MARKET_ADDRESS_L2")
                .map_err(|_| eyre!("MARKET_ADDRESS_L2 environment variable is required"))?,
            bridge_l2: env::var("BRIDGE_ADDRESS_L2")
                .map_err(|_| eyre!("BRIDGE_ADDRESS_L2 environment variable is required"))?,
        };

        let indexer = IndexerConfig {
            poll_interval_ms: env::var("POLL_INTERVAL_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(default_poll_interval),
            max_block_retries: env::var("MAX_BLOCK_RETRIES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(default_max_block_retries),
        };

        let bridge = BridgeConfig {
            minter_private_key: env::var("MINTER_PRIVATE_KEY")
                .map_err(|_| eyre!("MINTER_PRIVATE_KEY environment variable is required"))?,
            provenance_url: env::var("PROVENANCE_API_URL").ok(),
        };

        let api = ApiConfig {
            bind_address: env::var("API_BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env::var("API_PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(3100),
        };

        let config = Config {
            database,
            l1,
            l2,
            contracts,
            indexer,
            bridge,
            api,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    fn validate(&self) -> Result<()> {
        if self.database.url.is_empty() {
            return Err(eyre!("database.url cannot be empty"));
        }

        if self.l1.rpc_url.is_empty() {
            return Err(eyre!("l1.rpc_url cannot be empty"));
        }
        if self.l2.rpc_url.is_empty() {
            return Err(eyre!("l2.rpc_url cannot be empty"));
        }

        for (name, addr) in [
            ("MARKET_ADDRESS_L1", &self.contracts.market_l1),
            ("BRIDGE_ADDRESS_L1", &self.contracts.bridge_l1),
            ("POINTS_ADDRESS_L1", &self.contracts.points_l1),
            ("MARKET_ADDRESS_L2", &self.contracts.market_l2),
            ("BRIDGE_ADDRESS_L2", &self.contracts.bridge_l2),
        ] {
            if addr.len() != 42 || !addr.starts_with("0x") {
                return Err(eyre!(
                    "{} must be a valid hex address (42 chars with 0x prefix)",
                    name
                ));
            }
        }

        if self.bridge.minter_private_key.len() != 66
            || !self.bridge.minter_private_key.starts_with("0x")
        {
            return Err(eyre!(
                "bridge.minter_private_key must be 66 chars (0x + 64 hex chars)"
            ));
        }

        Ok(())
    }
}
