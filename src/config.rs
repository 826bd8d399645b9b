use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub database: DatabaseConfig,
    pub chain: ChainConfig,
    pub contracts: ContractsConfig,
    #[serde(default)]
    pub oracle: OracleConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChainConfig {
    pub name: String,
    pub chain_id: u64,
    pub rpc_http: String,
    pub rpc_ws: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_batch_size() -> u64 {
    100
}

fn default_poll_interval_ms() -> u64 {
    2000
}

/// The four tracked contracts. They share one start block (the pool and its
/// staking venues went live in the same deployment window).
#[derive(Debug, Deserialize, Clone)]
pub struct ContractsConfig {
    pub start_block: u64,
    pub pool: PoolConfig,
    pub stakedao_gauge: GaugeConfig,
    pub curve_gauge: GaugeConfig,
    pub booster: BoosterConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PoolConfig {
    pub address: String,
    #[serde(default = "default_decimals")]
    pub decimals: u8,
    pub reserves: Vec<ReserveConfig>,
}

fn default_decimals() -> u8 {
    18
}

/// One asset held by the pool, identified by its index in the pool's
/// `balances(i)` array. Used for USD valuation of LP positions.
#[derive(Debug, Deserialize, Clone)]
pub struct ReserveConfig {
    pub symbol: String,
    pub address: String,
    pub index: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GaugeConfig {
    pub address: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BoosterConfig {
    pub address: String,
    /// Booster pool id this indexer tracks; events for other pools are ignored.
    pub pool_id: u64,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct OracleConfig {
    /// Base URL of the price API. When unset, every lookup resolves to None
    /// and holder USD values are recorded as zero.
    pub base_url: Option<String>,
    #[serde(default = "default_oracle_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_oracle_timeout_ms() -> u64 {
    5000
}

impl Config {
    pub fn load(path: &str) -> eyre::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| eyre::eyre!("Failed to read config file '{}': {}", path, e))?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| eyre::eyre!("Failed to parse config file '{}': {}", path, e))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> eyre::Result<()> {
        let addresses = [
            ("pool", &self.contracts.pool.address),
            ("stakedao_gauge", &self.contracts.stakedao_gauge.address),
            ("curve_gauge", &self.contracts.curve_gauge.address),
            ("booster", &self.contracts.booster.address),
        ];
        for (name, addr) in addresses {
            validate_address(name, addr)?;
        }
        if self.contracts.pool.reserves.is_empty() {
            return Err(eyre::eyre!(
                "Pool must have at least one reserve configured for USD valuation"
            ));
        }
        for reserve in &self.contracts.pool.reserves {
            validate_address(&reserve.symbol, &reserve.address)?;
        }
        Ok(())
    }
}

fn validate_address(name: &str, addr: &str) -> eyre::Result<()> {
    if !addr.starts_with("0x") || addr.len() != 42 {
        return Err(eyre::eyre!("Invalid address '{}' for '{}'", addr, name));
    }
    Ok(())
}
