use std::collections::BTreeMap;

use alloy_primitives::{Address, Bytes, B256};
use thiserror::Error;

use crate::packing::pack_sorted;
use crate::signature::{SafeSignature, SignatureError, SignatureKind};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AggregateError {
    #[error("threshold must be at least 1")]
    ZeroThreshold,
}

/// Signatures collected for one `safeTxHash`, keyed by the recovered signer.
///
/// Keys are always derived from the signature; a second signature from the same signer
/// replaces the first.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SignatureAggregate {
    safe_tx_hash: B256,
    required_threshold: u64,
    signatures: BTreeMap<Address, SafeSignature>,
}

impl SignatureAggregate {
    pub fn new(safe_tx_hash: B256, required_threshold: u64) -> Result<Self, AggregateError> {
        if required_threshold == 0 {
            return Err(AggregateError::ZeroThreshold);
        }
        Ok(Self {
            safe_tx_hash,
            required_threshold,
            signatures: BTreeMap::new(),
        })
    }

    /// Add a signature and return the signer it recovers to.
    pub fn add_signature(&mut self, signature: SafeSignature) -> Result<Address, SignatureError> {
        // Contract signatures carry a dynamic part the fixed-width packing cannot express.
        if signature.kind()? == SignatureKind::Contract {
            return Err(SignatureError::UnsupportedKind(signature.v()));
        }
        let signer = signature.recover_signer(self.safe_tx_hash)?;
        self.signatures.insert(signer, signature);
        Ok(signer)
    }

    /// Add a signature whose owner was asserted by someone else; the recovered signer
    /// must equal `reported`.
    pub fn add_reported(
        &mut self,
        reported: Address,
        signature: &[u8],
    ) -> Result<Address, SignatureError> {
        let signature = SafeSignature::from_slice(signature)?;
        if signature.kind()? == SignatureKind::Contract {
            return Err(SignatureError::UnsupportedKind(signature.v()));
        }
        let recovered = signature.recover_signer(self.safe_tx_hash)?;
        if recovered != reported {
            return Err(SignatureError::SignerMismatch {
                reported,
                recovered,
            });
        }
        self.signatures.insert(recovered, signature);
        Ok(recovered)
    }

    pub fn safe_tx_hash(&self) -> B256 {
        self.safe_tx_hash
    }

    pub fn required_threshold(&self) -> u64 {
        self.required_threshold
    }

    /// Re-target the aggregate at a freshly read threshold.
    pub fn set_threshold(&mut self, required_threshold: u64) -> Result<(), AggregateError> {
        if required_threshold == 0 {
            return Err(AggregateError::ZeroThreshold);
        }
        self.required_threshold = required_threshold;
        Ok(())
    }

    pub fn signer_count(&self) -> usize {
        self.signatures.len()
    }

    pub fn is_quorum_reached(&self) -> bool {
        self.signatures.len() as u64 >= self.required_threshold
    }

    pub fn contains(&self, signer: Address) -> bool {
        self.signatures.contains_key(&signer)
    }

    /// Signers in ascending order.
    pub fn signers(&self) -> impl Iterator<Item = Address> + '_ {
        self.signatures.keys().copied()
    }

    pub fn signature_of(&self, signer: Address) -> Option<&SafeSignature> {
        self.signatures.get(&signer)
    }

    /// Drop every signer for which `keep` is false; returns the dropped signers.
    pub fn retain_signers<F>(&mut self, mut keep: F) -> Vec<Address>
    where
        F: FnMut(Address) -> bool,
    {
        let mut dropped = Vec::new();
        self.signatures.retain(|signer, _| {
            let kept = keep(*signer);
            if !kept {
                dropped.push(*signer);
            }
            kept
        });
        dropped
    }

    /// Packed `execTransaction` signatures, ascending by signer.
    pub fn packed(&self) -> Bytes {
        pack_sorted(&self.signatures)
    }
}
