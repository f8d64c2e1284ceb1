//! Bridge transaction data model and status graph

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Status of a bridge transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BridgeStatus {
    Initiated,
    BridgePending,
    SourceConfirmed,
    Completed,
    Failed,
    Refunded,
}

impl BridgeStatus {
    /// `COMPLETED`, `FAILED` and `REFUNDED` are terminal
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BridgeStatus::Completed | BridgeStatus::Failed | BridgeStatus::Refunded
        )
    }

    /// Cancellation is only allowed before the source side is confirmed
    pub fn is_cancellable(&self) -> bool {
        matches!(self, BridgeStatus::Initiated | BridgeStatus::BridgePending)
    }

    /// Check whether `self -> next` is an edge of the status graph
    pub fn can_transition_to(&self, next: BridgeStatus) -> bool {
        use BridgeStatus::*;
        matches!(
            (self, next),
            (Initiated, BridgePending)
                | (Initiated, Failed)
                | (BridgePending, SourceConfirmed)
                | (BridgePending, Failed)
                | (SourceConfirmed, Completed)
                | (SourceConfirmed, Failed)
                | (Failed, BridgePending)
                | (Failed, Refunded)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BridgeStatus::Initiated => "INITIATED",
            BridgeStatus::BridgePending => "BRIDGE_PENDING",
            BridgeStatus::SourceConfirmed => "SOURCE_CONFIRMED",
            BridgeStatus::Completed => "COMPLETED",
            BridgeStatus::Failed => "FAILED",
            BridgeStatus::Refunded => "REFUNDED",
        }
    }
}

impl fmt::Display for BridgeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BridgeStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "INITIATED" => Ok(BridgeStatus::Initiated),
            "BRIDGE_PENDING" => Ok(BridgeStatus::BridgePending),
            "SOURCE_CONFIRMED" => Ok(BridgeStatus::SourceConfirmed),
            "COMPLETED" => Ok(BridgeStatus::Completed),
            "FAILED" => Ok(BridgeStatus::Failed),
            "REFUNDED" => Ok(BridgeStatus::Refunded),
            other => Err(format!("Unknown bridge status: {}", other)),
        }
    }
}

/// One entry of the append-only status audit trail
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusChange {
    pub from: Option<BridgeStatus>,
    pub to: BridgeStatus,
    pub at: DateTime<Utc>,
    pub reason: Option<String>,
}

/// A single cross-chain transfer and its tracked lifecycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeTransaction {
    pub id: String,
    pub source_chain: u64,
    pub destination_chain: u64,
    pub token: String,
    /// Amount locked on the source chain, in token base units
    pub source_amount: u128,
    /// Amount paid out on the destination chain (net of fee)
    pub destination_amount: u128,
    pub bridge_fee: u128,
    pub estimated_yield: u128,
    pub actual_yield: Option<u128>,
    pub sender: String,
    pub recipient: String,
    pub payment_id: Option<String>,
    pub status: BridgeStatus,
    pub destination_tx_hash: Option<String>,
    pub failure_reason: Option<String>,
    pub retry_count: u32,
    /// Bumped on every stored transition; guards compare-and-set writes
    #[serde(default)]
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub source_confirmed_at: Option<DateTime<Utc>>,
    pub destination_confirmed_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub history: Vec<StatusChange>,
}

impl BridgeTransaction {
    /// Duration from creation to the last update, in milliseconds
    pub fn elapsed_ms(&self) -> u64 {
        (self.updated_at - self.created_at)
            .num_milliseconds()
            .max(0) as u64
    }
}

/// Fields validators attest to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferDetails {
    pub source_chain: u64,
    pub destination_chain: u64,
    pub token: String,
    pub amount: u128,
    pub sender: String,
    pub recipient: String,
}

impl From<&BridgeTransaction> for TransferDetails {
    fn from(tx: &BridgeTransaction) -> Self {
        Self {
            source_chain: tx.source_chain,
            destination_chain: tx.destination_chain,
            token: tx.token.clone(),
            amount: tx.source_amount,
            sender: tx.sender.clone(),
            recipient: tx.recipient.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_completion_requires_bridge_pending() {
        assert!(!BridgeStatus::Initiated.can_transition_to(BridgeStatus::Completed));
        assert!(!BridgeStatus::Initiated.can_transition_to(BridgeStatus::SourceConfirmed));
        assert!(!BridgeStatus::BridgePending.can_transition_to(BridgeStatus::Completed));
        assert!(BridgeStatus::SourceConfirmed.can_transition_to(BridgeStatus::Completed));
    }

    #[test]
    fn test_terminal_states_have_no_forward_edges() {
        for next in [
            BridgeStatus::Initiated,
            BridgeStatus::BridgePending,
            BridgeStatus::SourceConfirmed,
            BridgeStatus::Failed,
        ] {
            assert!(!BridgeStatus::Completed.can_transition_to(next));
            assert!(!BridgeStatus::Refunded.can_transition_to(next));
        }
        // Only explicit retry/refund leave FAILED
        assert!(BridgeStatus::Failed.can_transition_to(BridgeStatus::BridgePending));
        assert!(BridgeStatus::Failed.can_transition_to(BridgeStatus::Refunded));
        assert!(!BridgeStatus::Failed.can_transition_to(BridgeStatus::Completed));
    }

    #[test]
    fn test_status_string_round_trip_and_serde_form() {
        let status: BridgeStatus = "SOURCE_CONFIRMED".parse().unwrap();
        assert_eq!(status, BridgeStatus::SourceConfirmed);
        assert_eq!(
            serde_json::to_string(&BridgeStatus::BridgePending).unwrap(),
            "\"BRIDGE_PENDING\""
        );
        assert!("pending".parse::<BridgeStatus>().is_err());
    }
}
