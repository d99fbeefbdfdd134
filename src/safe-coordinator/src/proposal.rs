//! Proposal submission to the coordination service.
//!
//! Submission is not retried here: a blind retry can create a duplicate proposal.
//! [`ProposalSubmitter::submit_or_resume`] is the safe way to retry.

use std::sync::Arc;

use alloy_primitives::{Address, B256};
use safe_tx_encoder::{LocalSigner, SafeSignature, TransactionDescriptor};
use tracing::{info, warn};

use crate::errors::{CoordinatorError, StateConflictError, ValidationError};
use crate::ports::CoordinationService;
use crate::service::{ProposalRequest, ServiceTransaction};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubmissionKind {
    /// A new proposal was created.
    Created,
    /// The proposal existed; the local signature was added to it.
    Confirmed,
    /// The proposal existed and already carried the local signature.
    AlreadyConfirmed,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Submission {
    pub safe_tx_hash: B256,
    pub kind: SubmissionKind,
}

#[derive(Clone)]
pub struct ProposalSubmitter {
    service: Arc<dyn CoordinationService>,
    origin: Option<String>,
}

impl ProposalSubmitter {
    pub fn new(service: Arc<dyn CoordinationService>, origin: Option<String>) -> Self {
        Self { service, origin }
    }

    /// Post `descriptor` with one owner signature. Returns the verified identifier.
    pub async fn submit(
        &self,
        descriptor: &TransactionDescriptor,
        signature: &SafeSignature,
        sender: Address,
    ) -> Result<B256, CoordinatorError> {
        let local = descriptor.safe_tx_hash();
        let recovered = signature.recover_signer(local)?;
        if recovered != sender {
            return Err(ValidationError::Confirmation {
                owner: sender,
                source: safe_tx_encoder::SignatureError::SignerMismatch {
                    reported: sender,
                    recovered,
                },
            }
            .into());
        }

        let request = ProposalRequest::new(descriptor, sender, signature, self.origin.clone());
        match self.service.propose(descriptor.safe(), &request).await? {
            Some(echoed) => descriptor.verify_identifier(echoed)?,
            None => {
                // Nothing echoed: read the record back and check it instead.
                let record = self
                    .service
                    .transaction(local)
                    .await?
                    .ok_or(ValidationError::UnknownTransaction(local))?;
                verify_record(descriptor, &record)?;
            }
        }
        info!(safe_tx_hash = %local, nonce = %descriptor.nonce(), %sender, "proposal submitted");
        Ok(local)
    }

    /// Retry-safe submission: reuse an existing proposal with this identifier and only add
    /// the local confirmation when it is missing.
    pub async fn submit_or_resume(
        &self,
        descriptor: &TransactionDescriptor,
        signer: &LocalSigner,
    ) -> Result<Submission, CoordinatorError> {
        let local = descriptor.safe_tx_hash();
        let Some(record) = self.service.transaction(local).await? else {
            let signature = signer.sign_descriptor(descriptor)?;
            let safe_tx_hash = self.submit(descriptor, &signature, signer.address()).await?;
            return Ok(Submission {
                safe_tx_hash,
                kind: SubmissionKind::Created,
            });
        };

        verify_record(descriptor, &record)?;
        if record.is_executed {
            return Err(StateConflictError::AlreadyExecuted(local).into());
        }
        if record.is_confirmed_by(signer.address()) {
            info!(safe_tx_hash = %local, "proposal exists and is already confirmed locally");
            return Ok(Submission {
                safe_tx_hash: local,
                kind: SubmissionKind::AlreadyConfirmed,
            });
        }

        warn!(safe_tx_hash = %local, "proposal already exists, adding confirmation");
        let signature = signer.sign_descriptor(descriptor)?;
        self.service.confirm(local, &signature).await?;
        Ok(Submission {
            safe_tx_hash: local,
            kind: SubmissionKind::Confirmed,
        })
    }
}

/// The record must describe exactly `descriptor`: same reported identifier, and the
/// reported fields must hash to it.
pub fn verify_record(
    descriptor: &TransactionDescriptor,
    record: &ServiceTransaction,
) -> Result<(), CoordinatorError> {
    descriptor.verify_identifier(record.safe_tx_hash)?;
    let rebuilt = TransactionDescriptor::new(*descriptor.domain(), record.to_safe_tx()?);
    descriptor.verify_identifier(rebuilt.safe_tx_hash())?;
    Ok(())
}
