//! Bridge orchestrator
//!
//! Drives each bridge transaction through its lifecycle:
//! - Initiation with a liquidity reservation
//! - Validator consensus before any destination-side commitment
//! - Destination settlement through the chain's adapter
//! - Cancellation, retry and refund of stalled transfers

pub mod engine;
pub mod yields;

pub use engine::{
    BridgeEstimate, BridgeOrchestrator, InitiateRequest, OrchestratorParts,
    TransactionStatusReport,
};
pub use yields::{accrued_yield, FixedYieldSource, YieldSource};
