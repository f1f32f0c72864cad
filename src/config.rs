//! Configuration loaded from `bidflow.toml`.
//!
//! [`BidflowConfig`] holds every tunable the engine and its clients need.
//! Fields absent from the file fall back to defaults. The environment
//! variables `STRIPE_API_KEY` and `FIRESTORE_TOKEN` take precedence over the
//! file for their credentials.

use std::path::Path;

use anyhow::Result;
use serde::Deserialize;

/// Top-level configuration loaded from `bidflow.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct BidflowConfig {
    /// Payment gateway secret key.
    #[serde(default)]
    pub stripe_api_key: String,

    /// Document store project identifier.
    #[serde(default)]
    pub firestore_project: String,

    /// OAuth access token for the document store.
    #[serde(default)]
    pub firestore_token: String,

    /// ISO currency code used for all fee charges.
    #[serde(default = "default_currency")]
    pub currency: String,

    /// Per-side commission percentage on completed jobs.
    #[serde(default = "default_fee_percent")]
    pub fee_percent: u32,

    /// Attempt ceiling for the settlement retry sweep.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Hours between retry sweeps.
    #[serde(default = "default_sweep_interval_hours")]
    pub sweep_interval_hours: u64,
}

// Default currency: "usd".
fn default_currency() -> String {
    "usd".to_string()
}

// Default per-side commission: 10%.
fn default_fee_percent() -> u32 {
    10
}

// Default attempt ceiling: 3.
fn default_max_attempts() -> u32 {
    3
}

// Default sweep interval: every 6 hours.
fn default_sweep_interval_hours() -> u64 {
    6
}

impl Default for BidflowConfig {
    fn default() -> Self {
        Self {
            stripe_api_key: String::new(),
            firestore_project: String::new(),
            firestore_token: String::new(),
            currency: default_currency(),
            fee_percent: default_fee_percent(),
            max_attempts: default_max_attempts(),
            sweep_interval_hours: default_sweep_interval_hours(),
        }
    }
}

impl BidflowConfig {
    /// Load configuration from `bidflow.toml` in the current directory.
    /// Uses defaults if the file does not exist.
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new("bidflow.toml"))
    }

    /// Load configuration from an explicit path, applying environment
    /// overrides for credentials.
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            toml::from_str::<BidflowConfig>(&contents)?
        } else {
            Self::default()
        };

        if let Ok(key) = std::env::var("STRIPE_API_KEY")
            && !key.is_empty()
        {
            config.stripe_api_key = key;
        }
        if let Ok(token) = std::env::var("FIRESTORE_TOKEN")
            && !token.is_empty()
        {
            config.firestore_token = token;
        }

        Ok(config)
    }
}
