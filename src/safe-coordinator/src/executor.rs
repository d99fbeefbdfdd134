//! Final validation and on-chain execution.

use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::Bytes;
use safe_tx_encoder::{SignatureAggregate, TransactionDescriptor};
use safe_tx_types::{Confirmation, SafeConfig};
use tracing::{info, warn};

use crate::errors::{CoordinatorError, StateConflictError, ValidationError};
use crate::ports::{ChainReceipt, SafeWallet};

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct Executor {
    wallet: Arc<dyn SafeWallet>,
    initial_backoff: Duration,
    max_backoff: Duration,
}

impl Executor {
    pub fn new(wallet: Arc<dyn SafeWallet>) -> Self {
        Self {
            wallet,
            initial_backoff: INITIAL_BACKOFF,
            max_backoff: MAX_BACKOFF,
        }
    }

    pub fn with_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_backoff = initial;
        self.max_backoff = max;
        self
    }

    /// The descriptor nonce must equal the wallet's current nonce.
    pub async fn check_sequence(
        &self,
        descriptor: &TransactionDescriptor,
    ) -> Result<(), CoordinatorError> {
        let current = self.wallet.nonce().await?;
        let expected = descriptor.nonce();
        if current > expected {
            return Err(StateConflictError::SequenceNumberStale { expected, current }.into());
        }
        if current < expected {
            return Err(StateConflictError::SequenceNumberAhead { expected, current }.into());
        }
        Ok(())
    }

    /// Recover every reported confirmation, keep current owners only and require the
    /// current threshold.
    pub fn validated_aggregate(
        &self,
        descriptor: &TransactionDescriptor,
        confirmations: &[Confirmation],
        config: &SafeConfig,
    ) -> Result<SignatureAggregate, CoordinatorError> {
        let mut aggregate = SignatureAggregate::new(descriptor.safe_tx_hash(), config.threshold)
            .map_err(ValidationError::from)?;
        for confirmation in confirmations {
            aggregate
                .add_reported(confirmation.owner, &confirmation.signature)
                .map_err(|source| ValidationError::Confirmation {
                    owner: confirmation.owner,
                    source,
                })?;
        }

        let dropped = aggregate.retain_signers(|signer| config.is_owner(signer));
        for signer in &dropped {
            warn!(safe_tx_hash = %descriptor.safe_tx_hash(), %signer, "ignoring signature from non-owner");
        }

        if !aggregate.is_quorum_reached() {
            return Err(StateConflictError::InsufficientSignatures {
                valid: aggregate.signer_count() as u64,
                threshold: config.threshold,
            }
            .into());
        }
        Ok(aggregate)
    }

    /// Validate against fresh wallet state, simulate, then broadcast.
    pub async fn execute(
        &self,
        descriptor: &TransactionDescriptor,
        confirmations: &[Confirmation],
    ) -> Result<ChainReceipt, CoordinatorError> {
        self.check_sequence(descriptor).await?;
        // Never the cached config: owners or threshold may have changed while polling.
        let config = self.wallet.config().await?;
        let aggregate = self.validated_aggregate(descriptor, confirmations, &config)?;
        let signatures: Bytes = aggregate.packed();

        self.wallet.simulate(descriptor.tx(), &signatures).await?;
        info!(
            safe_tx_hash = %descriptor.safe_tx_hash(),
            nonce = %descriptor.nonce(),
            signers = aggregate.signer_count(),
            "executing"
        );
        let receipt = self.wallet.execute(descriptor.tx(), &signatures).await?;
        info!(
            safe_tx_hash = %descriptor.safe_tx_hash(),
            tx_hash = %receipt.tx_hash,
            block = ?receipt.block_number,
            gas_used = %receipt.gas_used,
            "executed"
        );
        Ok(receipt)
    }

    /// [`Self::execute`], retrying transport failures up to `retries` times. Every retry
    /// re-checks the nonce, so a transaction that landed despite the error is not sent twice.
    pub async fn execute_retrying(
        &self,
        descriptor: &TransactionDescriptor,
        confirmations: &[Confirmation],
        retries: u32,
    ) -> Result<ChainReceipt, CoordinatorError> {
        let mut backoff = self.initial_backoff;
        let mut attempt = 0u32;
        loop {
            match self.execute(descriptor, confirmations).await {
                Err(err) if err.is_transport() && attempt < retries => {
                    attempt += 1;
                    warn!(
                        safe_tx_hash = %descriptor.safe_tx_hash(),
                        attempt,
                        error = %err,
                        ?backoff,
                        "execution failed, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = std::cmp::min(backoff * 2, self.max_backoff);
                }
                other => return other,
            }
        }
    }
}
