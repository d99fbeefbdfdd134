use alloy_primitives::{Address, Bytes, B256, U256};
use safe_tx_types::{GasParams, Operation, SafeDomain, SafeTx};
use thiserror::Error;

use crate::digest::safe_tx_hash;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DescriptorError {
    /// Zero target without an explicit opt-in.
    #[error("target is the zero address")]
    InvalidTarget,
    /// A reported identifier disagrees with the canonical digest.
    #[error("identifier mismatch: computed {computed}, reported {reported}")]
    IdentifierMismatch { computed: B256, reported: B256 },
}

/// Immutable description of one proposed Safe operation plus its `safeTxHash`.
///
/// The identifier is always derived from the fields via [`safe_tx_hash`]; there is no
/// constructor that accepts it from outside.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransactionDescriptor {
    domain: SafeDomain,
    tx: SafeTx,
    safe_tx_hash: B256,
}

impl TransactionDescriptor {
    pub fn new(domain: SafeDomain, tx: SafeTx) -> Self {
        let safe_tx_hash = safe_tx_hash(&domain, &tx);
        Self {
            domain,
            tx,
            safe_tx_hash,
        }
    }

    /// Like [`Self::new`] but rejects a zero `to` unless `allow_null_target` is set.
    pub fn checked(
        domain: SafeDomain,
        tx: SafeTx,
        allow_null_target: bool,
    ) -> Result<Self, DescriptorError> {
        if tx.to == Address::ZERO && !allow_null_target {
            return Err(DescriptorError::InvalidTarget);
        }
        Ok(Self::new(domain, tx))
    }

    /// Rebuild from externally reported fields and require the reported hash to match.
    pub fn from_reported(
        domain: SafeDomain,
        tx: SafeTx,
        reported: B256,
    ) -> Result<Self, DescriptorError> {
        let descriptor = Self::new(domain, tx);
        descriptor.verify_identifier(reported)?;
        Ok(descriptor)
    }

    pub fn verify_identifier(&self, reported: B256) -> Result<(), DescriptorError> {
        if reported != self.safe_tx_hash {
            return Err(DescriptorError::IdentifierMismatch {
                computed: self.safe_tx_hash,
                reported,
            });
        }
        Ok(())
    }

    pub fn safe_tx_hash(&self) -> B256 {
        self.safe_tx_hash
    }

    pub fn domain(&self) -> &SafeDomain {
        &self.domain
    }

    pub fn safe(&self) -> Address {
        self.domain.safe
    }

    pub fn chain_id(&self) -> u64 {
        self.domain.chain_id
    }

    pub fn tx(&self) -> &SafeTx {
        &self.tx
    }

    pub fn to(&self) -> Address {
        self.tx.to
    }

    pub fn value(&self) -> U256 {
        self.tx.value
    }

    pub fn data(&self) -> &Bytes {
        &self.tx.data
    }

    pub fn operation(&self) -> Operation {
        self.tx.operation
    }

    pub fn gas(&self) -> &GasParams {
        &self.tx.gas
    }

    pub fn nonce(&self) -> U256 {
        self.tx.nonce
    }
}
