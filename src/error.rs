//! Error types for the bridge orchestrator

use crate::liquidity::LiquidityAvailability;

use thiserror::Error;

/// Main error type for bridge operations
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Chain {chain_id} is not supported")]
    UnsupportedChain { chain_id: u64 },

    #[error("Liquidity unavailable: {}", .0.reason.as_deref().unwrap_or("unavailable"))]
    InsufficientLiquidity(LiquidityAvailability),

    #[error("Validator consensus not reached for {tx_id}: {responded}/{required} validators")]
    ConsensusNotReached {
        tx_id: String,
        responded: usize,
        required: usize,
    },

    #[error("Destination settlement failed for {tx_id}: {reason}")]
    SettlementFailed { tx_id: String, reason: String },

    #[error("Timeout waiting for {operation}")]
    Timeout { operation: String },

    #[error("Transaction {tx_id} not found")]
    TransactionNotFound { tx_id: String },

    #[error("Invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Chain adapter error for chain {chain_id}: {message}")]
    Adapter { chain_id: u64, message: String },

    #[error("Validator {validator_id} error: {message}")]
    Validator {
        validator_id: String,
        message: String,
    },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl BridgeError {
    /// Check if the failed operation may succeed on a later `retry` or `process`
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BridgeError::ConsensusNotReached { .. }
                | BridgeError::SettlementFailed { .. }
                | BridgeError::Timeout { .. }
                | BridgeError::Adapter { .. }
                | BridgeError::Database(_)
                | BridgeError::Store(_)
        )
    }

    /// Check if the error is an infrastructure fault (store or adapter unavailable)
    pub fn is_infrastructure(&self) -> bool {
        matches!(
            self,
            BridgeError::Adapter { .. } | BridgeError::Database(_) | BridgeError::Store(_)
        )
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(err: serde_json::Error) -> Self {
        BridgeError::Internal(format!("Serialization error: {}", err))
    }
}

/// Result type for bridge operations
pub type BridgeResult<T> = Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_is_not_retryable() {
        let err = BridgeError::Validation("amount must be positive".to_string());
        assert!(!err.is_retryable());
        assert!(!err.is_infrastructure());
    }

    #[test]
    fn test_consensus_failure_is_retryable() {
        let err = BridgeError::ConsensusNotReached {
            tx_id: "tx-1".to_string(),
            responded: 1,
            required: 2,
        };
        assert!(err.is_retryable());
        assert_eq!(
            err.to_string(),
            "Validator consensus not reached for tx-1: 1/2 validators"
        );
    }

    #[test]
    fn test_insufficient_liquidity_message() {
        let err = BridgeError::InsufficientLiquidity(LiquidityAvailability::unavailable(
            "Insufficient liquidity",
            500,
            None,
        ));
        assert_eq!(err.to_string(), "Liquidity unavailable: Insufficient liquidity");
    }
}
