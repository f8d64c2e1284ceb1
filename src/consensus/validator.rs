//! Validators, attestations and the client used to solicit them

use crate::config::ValidatorConfig;
use crate::error::{BridgeError, BridgeResult};
use crate::types::TransferDetails;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};
use std::collections::HashMap;

/// A registered attestor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Validator {
    pub id: String,
    pub address: String,
    pub is_active: bool,
}

impl From<&ValidatorConfig> for Validator {
    fn from(config: &ValidatorConfig) -> Self {
        Self {
            id: config.id.clone(),
            address: config.address.clone(),
            is_active: config.active,
        }
    }
}

/// A validator's signed statement that a transfer is legitimate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attestation {
    pub validator_id: String,
    pub signature: String,
    pub timestamp: DateTime<Utc>,
}

/// Transport used to ask one validator for an attestation
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ValidatorClient: Send + Sync {
    async fn attest(
        &self,
        validator: &Validator,
        tx_id: &str,
        digest: &[u8; 32],
    ) -> BridgeResult<Attestation>;
}

/// Keccak-256 digest over the attested transfer fields
pub fn transfer_digest(tx_id: &str, details: &TransferDetails) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    for field in [
        tx_id.as_bytes(),
        details.token.as_bytes(),
        details.sender.as_bytes(),
        details.recipient.as_bytes(),
    ] {
        hasher.update((field.len() as u32).to_be_bytes());
        hasher.update(field);
    }
    hasher.update(details.source_chain.to_be_bytes());
    hasher.update(details.destination_chain.to_be_bytes());
    hasher.update(details.amount.to_be_bytes());
    hasher.finalize().into()
}

/// In-process validator set signing with per-validator secrets
pub struct LocalValidatorClient {
    secrets: HashMap<String, String>,
}

impl LocalValidatorClient {
    pub fn new(validators: &[ValidatorConfig]) -> Self {
        Self {
            secrets: validators
                .iter()
                .map(|v| (v.id.clone(), v.secret.clone()))
                .collect(),
        }
    }

    /// Signature a validator holding `secret` produces over `digest`
    pub fn sign(secret: &str, digest: &[u8; 32]) -> String {
        let mut hasher = Keccak256::new();
        hasher.update(secret.as_bytes());
        hasher.update(digest);
        format!("0x{}", hex::encode(hasher.finalize()))
    }
}

#[async_trait]
impl ValidatorClient for LocalValidatorClient {
    async fn attest(
        &self,
        validator: &Validator,
        _tx_id: &str,
        digest: &[u8; 32],
    ) -> BridgeResult<Attestation> {
        let secret = self
            .secrets
            .get(&validator.id)
            .ok_or_else(|| BridgeError::Validator {
                validator_id: validator.id.clone(),
                message: "No signing key configured".to_string(),
            })?;

        Ok(Attestation {
            validator_id: validator.id.clone(),
            signature: Self::sign(secret, digest),
            timestamp: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn details() -> TransferDetails {
        TransferDetails {
            source_chain: 1,
            destination_chain: 137,
            token: "USDC".to_string(),
            amount: 1_000,
            sender: "0xsender".to_string(),
            recipient: "0xrecipient".to_string(),
        }
    }

    #[test]
    fn test_digest_binds_every_field() {
        let base = transfer_digest("tx-1", &details());
        assert_eq!(base, transfer_digest("tx-1", &details()));
        assert_ne!(base, transfer_digest("tx-2", &details()));

        let mut changed = details();
        changed.amount = 1_001;
        assert_ne!(base, transfer_digest("tx-1", &changed));
    }

    #[tokio::test]
    async fn test_local_client_signs_with_secret() {
        let config = ValidatorConfig {
            id: "v1".to_string(),
            address: "0x01".to_string(),
            secret: "alpha".to_string(),
            active: true,
        };
        let client = LocalValidatorClient::new(std::slice::from_ref(&config));
        let validator = Validator::from(&config);
        let digest = transfer_digest("tx-1", &details());

        let attestation = client.attest(&validator, "tx-1", &digest).await.unwrap();
        assert_eq!(attestation.validator_id, "v1");
        assert_eq!(attestation.signature, LocalValidatorClient::sign("alpha", &digest));

        let stranger = Validator {
            id: "v9".to_string(),
            address: "0x09".to_string(),
            is_active: true,
        };
        assert!(client.attest(&stranger, "tx-1", &digest).await.is_err());
    }
}
