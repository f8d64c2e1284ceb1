//! Tesseract Bridge - cross-chain bridge transaction orchestration
//!
//! Moves value between independently operated chains: reserves pool
//! liquidity, gathers validator attestations, settles on the destination
//! chain and streams status to subscribers.

pub mod chain;
pub mod config;
pub mod consensus;
pub mod error;
pub mod ledger;
pub mod liquidity;
pub mod metrics;
pub mod monitoring;
pub mod orchestrator;
pub mod subscription;
pub mod types;

pub use error::{BridgeError, BridgeResult};
pub use orchestrator::{BridgeEstimate, BridgeOrchestrator, InitiateRequest};
pub use types::{BridgeStatus, BridgeTransaction};
