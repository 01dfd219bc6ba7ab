use num_bigint::BigUint;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{info, warn};

use crate::account::types::{Address, TokenId};
use crate::error::{LedgerError, LedgerResult};

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct LedgerConfig {
    #[serde(default)]
    pub locks: LockConfig,
    #[serde(default)]
    pub staking: StakingConfig,
    #[serde(default)]
    pub governance: GovernanceConfig,
    #[serde(default)]
    pub events: EventsConfig,
    #[serde(default)]
    pub tokens: Vec<TokenConfig>,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LockConfig {
    /// Upper bound on any single lock wait.
    pub timeout_ms: u64,
    /// First backoff step between `try_lock` attempts; doubles up to 1ms.
    pub backoff_us: u64,
}

impl LockConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn backoff(&self) -> Duration {
        Duration::from_micros(self.backoff_us.max(1))
    }
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 250,
            backoff_us: 50,
        }
    }
}

/// Where staking rewards come from when a position is closed.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum RewardSource {
    /// New issuance through the supply controller (cap applies).
    Mint,
    /// Transfer out of a pre-funded pool account.
    Pool(Address),
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct StakingConfig {
    pub reward_source: RewardSource,
    /// Fraction of the locked amount burned on emergency withdrawal.
    pub emergency_penalty: Decimal,
    pub forfeit_rewards_on_emergency: bool,
    /// Highest annual rate a position may be opened with.
    pub max_reward_rate: Decimal,
}

impl Default for StakingConfig {
    fn default() -> Self {
        Self {
            reward_source: RewardSource::Mint,
            emergency_penalty: Decimal::new(10, 2),
            forfeit_rewards_on_emergency: true,
            max_reward_rate: Decimal::ONE,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum MajorityRule {
    /// votes for > votes against
    Simple,
    /// votes for must reach this fraction of votes cast
    Supermajority(Decimal),
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct GovernanceConfig {
    /// Fraction of circulating supply that must participate.
    pub quorum: Decimal,
    pub majority: MajorityRule,
    #[serde(with = "crate::encoding::amount")]
    pub min_proposer_balance: BigUint,
    pub voting_period_secs: u64,
}

impl Default for GovernanceConfig {
    fn default() -> Self {
        Self {
            quorum: Decimal::new(4, 2),
            majority: MajorityRule::Simple,
            min_proposer_balance: BigUint::default(),
            voting_period_secs: 3 * 24 * 60 * 60,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum EventBackend {
    Memory,
    Sled,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct EventsConfig {
    pub backend: EventBackend,
    #[serde(default = "default_events_path")]
    pub path: String,
}

fn default_events_path() -> String {
    "./data/events".to_string()
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            backend: EventBackend::Memory,
            path: default_events_path(),
        }
    }
}

/// Token registered when the ledger boots.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct TokenConfig {
    pub id: TokenId,
    pub admin: Address,
    #[serde(with = "crate::encoding::amount_opt", default)]
    pub max_supply: Option<BigUint>,
}

impl LedgerConfig {
    pub fn from_toml_str(s: &str) -> LedgerResult<Self> {
        let config: Self = toml::from_str(s)
            .map_err(|e| LedgerError::InvalidArgument(format!("config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path`, falling back to defaults when the file is missing or unreadable.
    pub fn load_or_default(path: &str) -> Self {
        if !std::path::Path::new(path).exists() {
            info!("Config file not found at '{}'. Using defaults.", path);
            return Self::default();
        }
        match std::fs::read_to_string(path) {
            Ok(s) => match Self::from_toml_str(&s) {
                Ok(c) => {
                    info!("Config loaded from {}", path);
                    c
                }
                Err(e) => {
                    warn!("Error parsing config: {}. Using defaults.", e);
                    Self::default()
                }
            },
            Err(e) => {
                warn!("Error reading config: {}. Using defaults.", e);
                Self::default()
            }
        }
    }

    fn validate(&self) -> LedgerResult<()> {
        if self.governance.quorum < Decimal::ZERO || self.governance.quorum > Decimal::ONE {
            return Err(LedgerError::InvalidArgument(
                "governance.quorum must be within [0, 1]".to_string(),
            ));
        }
        if let MajorityRule::Supermajority(f) = &self.governance.majority {
            if *f <= Decimal::ZERO || *f > Decimal::ONE {
                return Err(LedgerError::InvalidArgument(
                    "governance.majority must be within (0, 1]".to_string(),
                ));
            }
        }
        let penalty = self.staking.emergency_penalty;
        if penalty < Decimal::ZERO || penalty > Decimal::ONE {
            return Err(LedgerError::InvalidArgument(
                "staking.emergency_penalty must be within [0, 1]".to_string(),
            ));
        }
        if self.staking.max_reward_rate < Decimal::ZERO {
            return Err(LedgerError::InvalidArgument(
                "staking.max_reward_rate must not be negative".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let raw = r#"
            log_level = "debug"

            [locks]
            timeout_ms = 100
            backoff_us = 10

            [staking]
            reward_source = { pool = "treasury" }
            emergency_penalty = 0.25
            forfeit_rewards_on_emergency = false
            max_reward_rate = 0.5

            [governance]
            quorum = 0.1
            majority = { supermajority = 0.6667 }
            min_proposer_balance = "1000"
            voting_period_secs = 60

            [events]
            backend = "sled"
            path = "/tmp/ledger-events"

            [[tokens]]
            id = "T1"
            admin = "root"
            max_supply = "1000000"

            [[tokens]]
            id = "POINTS"
            admin = "root"
        "#;
        let cfg = LedgerConfig::from_toml_str(raw).unwrap();
        assert_eq!(cfg.locks.timeout(), Duration::from_millis(100));
        assert_eq!(cfg.staking.reward_source, RewardSource::Pool("treasury".to_string()));
        assert_eq!(cfg.staking.emergency_penalty, Decimal::new(25, 2));
        assert_eq!(cfg.governance.majority, MajorityRule::Supermajority(Decimal::new(6667, 4)));
        assert_eq!(cfg.governance.min_proposer_balance, BigUint::from(1000u32));
        assert_eq!(cfg.events.backend, EventBackend::Sled);
        assert_eq!(cfg.tokens.len(), 2);
        assert_eq!(cfg.tokens[0].max_supply, Some(BigUint::from(1_000_000u32)));
        assert_eq!(cfg.tokens[1].max_supply, None);
    }

    #[test]
    fn test_defaults_fill_missing_sections() {
        let cfg = LedgerConfig::from_toml_str("").unwrap();
        assert_eq!(cfg.locks.timeout_ms, 250);
        assert_eq!(cfg.staking.reward_source, RewardSource::Mint);
        assert_eq!(cfg.governance.majority, MajorityRule::Simple);
        assert_eq!(cfg.events.backend, EventBackend::Memory);
    }

    #[test]
    fn test_rejects_out_of_range_quorum() {
        let err = LedgerConfig::from_toml_str("[governance]\nquorum = 1.5\nmajority = \"simple\"\nmin_proposer_balance = \"0\"\nvoting_period_secs = 1\n")
            .unwrap_err();
        assert_eq!(err.kind(), "InvalidArgument");
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let cfg = LedgerConfig::load_or_default("/nonexistent/ledger.toml");
        assert!(cfg.tokens.is_empty());
    }
}
