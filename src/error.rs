use thiserror::Error;

use crate::payments::PaymentError;
use crate::store::StoreError;

/// Crate-level error: everything a reaction handler or the binary can
/// surface. Payment declines never reach this type — the settlement routine
/// folds them into a `failed` fee record; what propagates here is
/// infrastructure (store access) and configuration.
#[derive(Debug, Error)]
pub enum BidflowError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("payment error: {0}")]
    Payment(#[from] PaymentError),

    #[error("config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}
