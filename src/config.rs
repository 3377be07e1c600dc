//! Process configuration: signing secret, token TTL, risk weight/threshold
//! overrides, and store backend selection (spec §6 "Configuration").
//!
//! Grounded on the teacher's `model_catalog::ModelCatalog::load_from_str`
//! (TOML via the `toml` crate, parsed into a raw struct and then validated)
//! but without the teacher's multi-location filesystem search: this crate
//! has no Tauri app bundle to hunt a config file across, so callers load
//! from an explicit path or construct a `Config` programmatically for tests.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::policy::PolicyThresholds;
use crate::scorer::{Thresholds, Weights};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    Memory,
    /// `postgres+<dsn>` in spec §6; this crate's relational backend is
    /// SQLite (DESIGN.md records the substitution), so the DSN names a
    /// SQLite file path instead.
    Sqlite { dsn: String },
}

#[derive(Debug, Clone, Deserialize)]
struct RawConfig {
    signing_secret: String,
    #[serde(default = "default_token_ttl_secs")]
    token_ttl_secs: u64,
    #[serde(default)]
    risk_weights: Option<RawWeights>,
    #[serde(default)]
    risk_thresholds: Option<RawThresholds>,
    #[serde(default)]
    policy_thresholds: Option<RawPolicyThresholds>,
    #[serde(default = "default_store_backend")]
    store_backend: String,
}

#[derive(Debug, Clone, Deserialize)]
struct RawWeights {
    grounding: f64,
    self_consistency: f64,
    verifier: f64,
    numeric: f64,
    tool_mismatch: f64,
    drift: f64,
}

#[derive(Debug, Clone, Deserialize)]
struct RawThresholds {
    low: f64,
    medium: f64,
}

#[derive(Debug, Clone, Deserialize)]
struct RawPolicyThresholds {
    high_block: f64,
    high_review: f64,
    medium_review: f64,
}

fn default_token_ttl_secs() -> u64 {
    120
}

fn default_store_backend() -> String {
    "memory".to_string()
}

/// Fully-resolved, validated process configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub signing_secret: Vec<u8>,
    pub token_ttl: Duration,
    pub risk_weights: Weights,
    pub risk_thresholds: Thresholds,
    pub policy_thresholds: PolicyThresholds,
    pub store_backend: StoreBackend,
}

impl Config {
    pub fn from_toml_str(toml_str: &str) -> Result<Self> {
        let raw: RawConfig =
            toml::from_str(toml_str).map_err(|err| Error::Config(err.to_string()))?;
        Config::from_raw(raw)
    }

    fn from_raw(raw: RawConfig) -> Result<Self> {
        if raw.signing_secret.len() < 32 {
            return Err(Error::Config(format!(
                "signing_secret must be at least 32 bytes, got {}",
                raw.signing_secret.len()
            )));
        }

        let risk_weights = match raw.risk_weights {
            Some(w) => Weights {
                grounding: w.grounding,
                self_consistency: w.self_consistency,
                verifier: w.verifier,
                numeric: w.numeric,
                tool_mismatch: w.tool_mismatch,
                drift: w.drift,
            },
            None => Weights::default(),
        };

        let risk_thresholds = match raw.risk_thresholds {
            Some(t) => Thresholds {
                low: t.low,
                medium: t.medium,
            },
            None => Thresholds::default(),
        };

        let policy_thresholds = match raw.policy_thresholds {
            Some(t) => PolicyThresholds {
                high_block: t.high_block,
                high_review: t.high_review,
                medium_review: t.medium_review,
            },
            None => PolicyThresholds::default(),
        };

        let store_backend = parse_store_backend(&raw.store_backend)?;

        Ok(Config {
            signing_secret: raw.signing_secret.into_bytes(),
            token_ttl: Duration::from_secs(raw.token_ttl_secs),
            risk_weights,
            risk_thresholds,
            policy_thresholds,
            store_backend,
        })
    }

    /// Builds a config programmatically (tests, embedders that don't keep a
    /// TOML file around) using every default except the signing secret.
    pub fn with_secret(signing_secret: impl Into<Vec<u8>>) -> Result<Self> {
        let signing_secret = signing_secret.into();
        if signing_secret.len() < 32 {
            return Err(Error::Config(format!(
                "signing_secret must be at least 32 bytes, got {}",
                signing_secret.len()
            )));
        }
        Ok(Config {
            signing_secret,
            token_ttl: Duration::from_secs(default_token_ttl_secs()),
            risk_weights: Weights::default(),
            risk_thresholds: Thresholds::default(),
            policy_thresholds: PolicyThresholds::default(),
            store_backend: StoreBackend::Memory,
        })
    }
}

fn parse_store_backend(raw: &str) -> Result<StoreBackend> {
    if raw == "memory" {
        return Ok(StoreBackend::Memory);
    }
    if let Some(dsn) = raw.strip_prefix("sqlite+") {
        return Ok(StoreBackend::Sqlite {
            dsn: dsn.to_string(),
        });
    }
    Err(Error::Config(format!(
        "unrecognized store_backend {raw:?}; expected \"memory\" or \"sqlite+<path>\""
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_minimal_config_with_defaults() {
        let toml_str = format!("signing_secret = \"{}\"\n", "k".repeat(32));
        let config = Config::from_toml_str(&toml_str).unwrap();
        assert_eq!(config.token_ttl, Duration::from_secs(120));
        assert_eq!(config.store_backend, StoreBackend::Memory);
    }

    #[test]
    fn rejects_short_secret() {
        let toml_str = "signing_secret = \"short\"\n";
        assert!(Config::from_toml_str(toml_str).is_err());
    }

    #[test]
    fn parses_sqlite_backend_dsn() {
        let toml_str = format!(
            "signing_secret = \"{}\"\nstore_backend = \"sqlite+/tmp/agentgate.db\"\n",
            "k".repeat(32)
        );
        let config = Config::from_toml_str(&toml_str).unwrap();
        assert_eq!(
            config.store_backend,
            StoreBackend::Sqlite {
                dsn: "/tmp/agentgate.db".to_string()
            }
        );
    }

    #[test]
    fn overrides_risk_weights() {
        let toml_str = format!(
            "signing_secret = \"{}\"\n[risk_weights]\ngrounding = 0.5\nself_consistency = 0.1\nverifier = 0.1\nnumeric = 0.1\ntool_mismatch = 0.1\ndrift = 0.1\n",
            "k".repeat(32)
        );
        let config = Config::from_toml_str(&toml_str).unwrap();
        assert_eq!(config.risk_weights.grounding, 0.5);
    }
}
