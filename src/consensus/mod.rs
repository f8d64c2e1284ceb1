//! Validator consensus for bridge transfers
//!
//! The coordinator fans out to every active validator, waits a bounded time
//! and records whether the required number of attestations came back.

pub mod coordinator;
pub mod validator;

pub use coordinator::{ConsensusCoordinator, ConsensusResult};
pub use validator::{
    transfer_digest, Attestation, LocalValidatorClient, Validator, ValidatorClient,
};

#[cfg(test)]
pub use validator::MockValidatorClient;
