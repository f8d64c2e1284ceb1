//! Configuration management for the bridge orchestrator
//!
//! Loads configuration from TOML files with environment variable substitution.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::env;
use std::path::{Path, PathBuf};

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub bridge: BridgeConfig,
    pub consensus: ConsensusConfig,
    pub liquidity: LiquidityConfig,
    pub monitoring: MonitoringConfig,
    pub metrics: MetricsConfig,
    /// Postgres persistence; transactions are kept in memory when absent
    pub database: Option<DatabaseConfig>,
    pub chains: HashMap<String, ChainConfig>,
    #[serde(default)]
    pub pools: Vec<PoolConfig>,
    #[serde(default)]
    pub validators: Vec<ValidatorConfig>,
    #[serde(default)]
    pub routes: Vec<RouteConfig>,
    #[serde(default)]
    pub yields: YieldConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BridgeConfig {
    pub instance_id: String,
    pub settlement_timeout_ms: u64,
    /// Estimate used for chain pairs missing from the route table
    #[serde(default = "default_estimate_secs")]
    pub default_estimate_secs: u64,
    #[serde(default = "default_fee_bps")]
    pub default_fee_bps: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConsensusConfig {
    #[serde(default)]
    pub quorum: QuorumPolicy,
    pub timeout_ms: u64,
}

/// How many active validators must attest before a transfer may settle
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum QuorumPolicy {
    #[default]
    Majority,
    TwoThirds,
    Fixed(usize),
}

impl QuorumPolicy {
    /// Required attestations for an active set of `active` validators (never zero)
    pub fn required(&self, active: usize) -> usize {
        let required = match self {
            QuorumPolicy::Majority => active / 2 + 1,
            QuorumPolicy::TwoThirds => (active * 2).div_ceil(3),
            QuorumPolicy::Fixed(n) => *n,
        };
        required.max(1)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LiquidityConfig {
    pub optimize_interval_secs: u64,
    /// Share of a pool's funds that should sit on the destination side
    pub target_utilization: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MonitoringConfig {
    pub report_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    pub chain_id: u64,
    pub name: String,
    /// Overrides the family's default finality time
    pub confirmation_secs: Option<u64>,
    #[serde(default)]
    pub network_fee: u128,
    pub enabled: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PoolConfig {
    pub source_chain: u64,
    pub destination_chain: u64,
    pub token: String,
    pub source_balance: u128,
    pub destination_balance: u128,
    #[serde(default = "default_true")]
    pub active: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ValidatorConfig {
    pub id: String,
    pub address: String,
    pub secret: String,
    #[serde(default = "default_true")]
    pub active: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RouteConfig {
    pub source_chain: u64,
    pub destination_chain: u64,
    pub fee_bps: u32,
    pub estimated_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct YieldConfig {
    pub default_apy_bps: u32,
    #[serde(default)]
    pub tokens: HashMap<String, u32>,
}

impl Default for YieldConfig {
    fn default() -> Self {
        Self {
            default_apy_bps: 0,
            tokens: HashMap::new(),
        }
    }
}

fn default_estimate_secs() -> u64 {
    300
}

fn default_fee_bps() -> u32 {
    10
}

fn default_true() -> bool {
    true
}

impl Settings {
    /// Load settings from the file named by `BRIDGE_CONFIG` (default `config/default.toml`)
    pub fn load() -> Result<Self> {
        let config_path = env::var("BRIDGE_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/default.toml"));

        Self::load_from(&config_path)
    }

    /// Load settings from a specific file
    pub fn load_from(config_path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

        Self::parse(&config_str)
    }

    /// Parse settings from TOML text
    pub fn parse(config_str: &str) -> Result<Self> {
        // Substitute environment variables
        let config_str = substitute_env_vars(config_str);

        let settings: Settings =
            toml::from_str(&config_str).with_context(|| "Failed to parse configuration")?;

        settings.validate()?;

        Ok(settings)
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        if self.enabled_chains().is_empty() {
            anyhow::bail!("At least one chain must be enabled");
        }

        if self.bridge.default_fee_bps >= 10_000 {
            anyhow::bail!("bridge.default_fee_bps must be below 10000");
        }

        let known: HashSet<u64> = self.chains.values().map(|c| c.chain_id).collect();

        for pool in &self.pools {
            for chain_id in [pool.source_chain, pool.destination_chain] {
                if !known.contains(&chain_id) {
                    anyhow::bail!(
                        "Pool {}->{} ({}) references unknown chain {}",
                        pool.source_chain,
                        pool.destination_chain,
                        pool.token,
                        chain_id
                    );
                }
            }
            if pool.source_chain == pool.destination_chain {
                anyhow::bail!("Pool for {} must connect two distinct chains", pool.token);
            }
        }

        for route in &self.routes {
            if !known.contains(&route.source_chain) || !known.contains(&route.destination_chain) {
                anyhow::bail!(
                    "Route {}->{} references an unknown chain",
                    route.source_chain,
                    route.destination_chain
                );
            }
            if route.fee_bps >= 10_000 {
                anyhow::bail!(
                    "Route {}->{} fee must be below 10000 bps",
                    route.source_chain,
                    route.destination_chain
                );
            }
        }

        let mut ids = HashSet::new();
        for validator in &self.validators {
            if !ids.insert(validator.id.as_str()) {
                anyhow::bail!("Duplicate validator id {}", validator.id);
            }
        }
        if self.validators.iter().all(|v| !v.active) {
            tracing::warn!("No active validators configured - consensus will never be reached");
        }

        if let QuorumPolicy::Fixed(0) = self.consensus.quorum {
            anyhow::bail!("Fixed quorum must require at least one validator");
        }

        if !(self.liquidity.target_utilization > 0.0 && self.liquidity.target_utilization <= 1.0)
        {
            anyhow::bail!("liquidity.target_utilization must be in (0, 1]");
        }

        if self.liquidity.optimize_interval_secs == 0 || self.monitoring.report_interval_secs == 0 {
            anyhow::bail!("Background intervals must be at least one second");
        }

        Ok(())
    }

    /// Get list of enabled chains
    pub fn enabled_chains(&self) -> Vec<(&String, &ChainConfig)> {
        self.chains.iter().filter(|(_, c)| c.enabled).collect()
    }

    /// Get chain config by chain ID
    pub fn get_chain_by_id(&self, chain_id: u64) -> Option<&ChainConfig> {
        self.chains.values().find(|c| c.chain_id == chain_id)
    }
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(input: &str) -> String {
    lazy_static::lazy_static! {
        static ref ENV_VAR: regex::Regex =
            regex::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").expect("valid env var pattern");
    }

    let mut result = input.to_string();
    for cap in ENV_VAR.captures_iter(input) {
        let var_name = &cap[1];
        let var_value = env::var(var_name).unwrap_or_default();
        result = result.replace(&cap[0], &var_value);
    }

    result
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Write;

    pub(crate) const SAMPLE: &str = r#"
[bridge]
instance_id = "bridge-test"
settlement_timeout_ms = 2000

[consensus]
quorum = "majority"
timeout_ms = 500

[liquidity]
optimize_interval_secs = 60
target_utilization = 0.5

[monitoring]
report_interval_secs = 30

[metrics]
enabled = false
port = 9100

[chains.ethereum]
chain_id = 1
name = "Ethereum"
network_fee = 5
enabled = true

[chains.polygon]
chain_id = 137
name = "Polygon"
enabled = true

[[pools]]
source_chain = 1
destination_chain = 137
token = "USDC"
source_balance = 0
destination_balance = 1000000

[[validators]]
id = "v1"
address = "0x01"
secret = "${BRIDGE_TEST_SECRET}"

[[routes]]
source_chain = 1
destination_chain = 137
fee_bps = 30
estimated_secs = 600

[yields]
default_apy_bps = 400

[yields.tokens]
USDC = 500
"#;

    #[test]
    fn test_env_var_substitution() {
        env::set_var("TEST_VAR", "test_value");
        let input = "url = \"https://api.example.com/${TEST_VAR}/endpoint\"";
        let result = substitute_env_vars(input);
        assert_eq!(result, "url = \"https://api.example.com/test_value/endpoint\"");
    }

    #[test]
    fn test_load_from_file() {
        env::set_var("BRIDGE_TEST_SECRET", "s3cret");
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let settings = Settings::load_from(file.path()).unwrap();
        assert_eq!(settings.bridge.instance_id, "bridge-test");
        assert_eq!(settings.bridge.default_estimate_secs, 300);
        assert_eq!(settings.consensus.quorum, QuorumPolicy::Majority);
        assert_eq!(settings.validators[0].secret, "s3cret");
        assert!(settings.validators[0].active);
        assert_eq!(settings.pools[0].destination_balance, 1_000_000);
        assert_eq!(settings.yields.tokens.get("USDC"), Some(&500));
        assert_eq!(settings.get_chain_by_id(137).unwrap().name, "Polygon");
        assert!(settings.database.is_none());
    }

    #[test]
    fn test_rejects_pool_on_unknown_chain() {
        let broken = SAMPLE.replace("destination_chain = 137\ntoken", "destination_chain = 999\ntoken");
        let err = Settings::parse(&broken).unwrap_err();
        assert!(err.to_string().contains("unknown chain 999"));
    }

    #[test]
    fn test_rejects_default_fee_of_whole_amount() {
        let broken = SAMPLE.replace(
            "settlement_timeout_ms = 2000",
            "settlement_timeout_ms = 2000\ndefault_fee_bps = 10000",
        );
        let err = Settings::parse(&broken).unwrap_err();
        assert!(err.to_string().contains("default_fee_bps"));
    }

    #[test]
    fn test_quorum_defaults_to_majority() {
        let implicit = SAMPLE.replace("quorum = \"majority\"\n", "");
        let settings = Settings::parse(&implicit).unwrap();
        assert_eq!(settings.consensus.quorum, QuorumPolicy::Majority);
    }

    #[test]
    fn test_fixed_quorum_parses() {
        let fixed = SAMPLE.replace("quorum = \"majority\"", "quorum = { fixed = 3 }");
        let settings = Settings::parse(&fixed).unwrap();
        assert_eq!(settings.consensus.quorum, QuorumPolicy::Fixed(3));
    }

    #[test]
    fn test_quorum_required_counts() {
        assert_eq!(QuorumPolicy::Majority.required(3), 2);
        assert_eq!(QuorumPolicy::Majority.required(4), 3);
        assert_eq!(QuorumPolicy::TwoThirds.required(3), 2);
        assert_eq!(QuorumPolicy::TwoThirds.required(4), 3);
        assert_eq!(QuorumPolicy::Fixed(3).required(5), 3);
        assert_eq!(QuorumPolicy::Majority.required(0), 1);
    }
}
