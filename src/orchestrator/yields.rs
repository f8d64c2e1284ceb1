//! In-transit yield rates

use crate::chain::apply_bps;
use crate::config::YieldConfig;

use std::collections::HashMap;

pub const SECONDS_PER_YEAR: u64 = 365 * 24 * 60 * 60;

/// Supplies the annual yield earned by funds while they are in transit
pub trait YieldSource: Send + Sync {
    /// APY in basis points for `token`, or the default rate when `None`
    fn apy_bps(&self, token: Option<&str>) -> u32;
}

/// Rates read from configuration
#[derive(Debug, Clone, Default)]
pub struct FixedYieldSource {
    default_apy_bps: u32,
    tokens: HashMap<String, u32>,
}

impl FixedYieldSource {
    pub fn new(default_apy_bps: u32) -> Self {
        Self {
            default_apy_bps,
            tokens: HashMap::new(),
        }
    }

    pub fn from_config(config: &YieldConfig) -> Self {
        Self {
            default_apy_bps: config.default_apy_bps,
            tokens: config
                .tokens
                .iter()
                .map(|(token, bps)| (token.to_ascii_uppercase(), *bps))
                .collect(),
        }
    }

    pub fn with_token(mut self, token: &str, apy_bps: u32) -> Self {
        self.tokens.insert(token.to_ascii_uppercase(), apy_bps);
        self
    }
}

impl YieldSource for FixedYieldSource {
    fn apy_bps(&self, token: Option<&str>) -> u32 {
        token
            .and_then(|t| self.tokens.get(&t.to_ascii_uppercase()).copied())
            .unwrap_or(self.default_apy_bps)
    }
}

/// Simple interest on `amount` at `apy_bps` over `elapsed_secs`
pub fn accrued_yield(amount: u128, apy_bps: u32, elapsed_secs: u64) -> u128 {
    let annual = apply_bps(amount, apy_bps);
    let year = SECONDS_PER_YEAR as u128;
    let secs = elapsed_secs as u128;
    (annual / year).saturating_mul(secs) + annual % year * secs / year
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_rate_overrides_default() {
        let source = FixedYieldSource::new(400).with_token("usdc", 500);
        assert_eq!(source.apy_bps(Some("USDC")), 500);
        assert_eq!(source.apy_bps(Some("DAI")), 400);
        assert_eq!(source.apy_bps(None), 400);
    }

    #[test]
    fn test_accrued_yield_scales_with_time() {
        assert_eq!(accrued_yield(1_000_000, 500, SECONDS_PER_YEAR), 50_000);
        assert_eq!(accrued_yield(1_000_000, 500, SECONDS_PER_YEAR / 2), 25_000);
        assert_eq!(accrued_yield(1_000_000, 500, 0), 0);
        assert_eq!(accrued_yield(1_000, 0, SECONDS_PER_YEAR), 0);
    }
}
