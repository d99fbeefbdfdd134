//! Co-signing bot: walks the wallet's open proposals, confirms the ones the local owner
//! has not signed yet and executes those that are ready.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::{Address, Bytes, B256, U256};
use safe_tx_encoder::TransactionDescriptor;
use safe_tx_types::{Confirmation, SafeConfig};
use tracing::{debug, info, warn};

use crate::cancel::CancelToken;
use crate::errors::{AuthorizationError, CoordinatorError};
use crate::executor::Executor;
use crate::lifecycle::CoordinatorContext;
use crate::service::{PageRequest, ServiceTransaction};

const PAGE_SIZE: u32 = 50;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ScanOutcome {
    /// Nonce below the wallet's current nonce; can never execute.
    Stale,
    /// Another lifecycle is working on this identifier.
    Busy,
    Waiting { confirmations: usize, threshold: u64 },
    /// Enough confirmations, but an earlier nonce has to go first.
    Queued,
    Executed { tx_hash: B256 },
    Failed(CoordinatorError),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScanEntry {
    pub safe_tx_hash: B256,
    pub nonce: U256,
    /// The local owner confirmed it during this pass.
    pub cosigned: bool,
    pub outcome: ScanOutcome,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ScanReport {
    pub starting_nonce: U256,
    pub entries: Vec<ScanEntry>,
}

impl ScanReport {
    pub fn executed(&self) -> usize {
        self.count(|o| matches!(o, ScanOutcome::Executed { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, ScanOutcome::Failed(_)))
    }

    pub fn cosigned(&self) -> usize {
        self.entries.iter().filter(|e| e.cosigned).count()
    }

    fn count(&self, f: impl Fn(&ScanOutcome) -> bool) -> usize {
        self.entries.iter().filter(|e| f(&e.outcome)).count()
    }
}

pub struct PendingScanner {
    ctx: Arc<CoordinatorContext>,
    page_size: u32,
}

impl PendingScanner {
    pub fn new(ctx: Arc<CoordinatorContext>) -> Self {
        Self {
            ctx,
            page_size: PAGE_SIZE,
        }
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// The acting identity must hold the allow-list permission and own the wallet.
    pub async fn start_check(&self) -> Result<(), CoordinatorError> {
        self.ctx.ensure_permission().await?;
        let owner = self.ctx.executor();
        let config = self.ctx.config_cache.get(self.ctx.wallet.as_ref()).await?;
        if !config.is_owner(owner) {
            return Err(AuthorizationError::NotAnOwner(owner).into());
        }
        Ok(())
    }

    /// All open proposals, every page.
    pub async fn pending(&self) -> Result<Vec<ServiceTransaction>, CoordinatorError> {
        let safe = self.ctx.domain.safe;
        let mut out = Vec::new();
        let mut offset = 0u32;
        loop {
            let page = self
                .ctx
                .service
                .pending(
                    safe,
                    PageRequest {
                        limit: self.page_size,
                        offset,
                    },
                )
                .await?;
            let fetched = page.results.len() as u32;
            out.extend(page.results);
            if page.next.is_none() || fetched == 0 {
                break;
            }
            offset += fetched;
        }
        Ok(out)
    }

    /// One pass over the open proposals, lowest nonce first. A failing proposal is
    /// recorded and the pass moves on.
    pub async fn scan_once(&self) -> Result<ScanReport, CoordinatorError> {
        let mut records: Vec<ServiceTransaction> = self
            .pending()
            .await?
            .into_iter()
            .filter(|r| !r.is_executed)
            .collect();
        records.sort_by(|a, b| a.nonce.cmp(&b.nonce).then(a.safe_tx_hash.cmp(&b.safe_tx_hash)));

        let mut current = self.ctx.wallet.nonce().await?;
        let config = self.ctx.config_cache.get(self.ctx.wallet.as_ref()).await?;
        let mut report = ScanReport {
            starting_nonce: current,
            entries: Vec::with_capacity(records.len()),
        };

        for record in records {
            let entry = self.process(record, &mut current, &config).await;
            if let ScanOutcome::Failed(err) = &entry.outcome {
                warn!(safe_tx_hash = %entry.safe_tx_hash, nonce = %entry.nonce, error = %err, "proposal failed");
            }
            report.entries.push(entry);
        }
        info!(
            proposals = report.entries.len(),
            cosigned = report.cosigned(),
            executed = report.executed(),
            failed = report.failed(),
            "scan complete"
        );
        Ok(report)
    }

    async fn process(
        &self,
        record: ServiceTransaction,
        current: &mut U256,
        config: &SafeConfig,
    ) -> ScanEntry {
        let mut entry = ScanEntry {
            safe_tx_hash: record.safe_tx_hash,
            nonce: record.nonce,
            cosigned: false,
            outcome: ScanOutcome::Stale,
        };
        let descriptor = match record
            .to_safe_tx()
            .map_err(CoordinatorError::from)
            .and_then(|tx| {
                TransactionDescriptor::from_reported(self.ctx.domain, tx, record.safe_tx_hash)
                    .map_err(CoordinatorError::from)
            }) {
            Ok(descriptor) => descriptor,
            Err(err) => {
                entry.outcome = ScanOutcome::Failed(err);
                return entry;
            }
        };
        if record.nonce < *current {
            debug!(safe_tx_hash = %record.safe_tx_hash, nonce = %record.nonce, "stale proposal");
            entry.outcome = ScanOutcome::Stale;
            return entry;
        }
        entry.outcome = match self
            .advance(&record, &descriptor, current, config, &mut entry.cosigned)
            .await
        {
            Ok(outcome) => outcome,
            Err(err) => ScanOutcome::Failed(err),
        };
        entry
    }

    async fn advance(
        &self,
        record: &ServiceTransaction,
        descriptor: &TransactionDescriptor,
        current: &mut U256,
        config: &SafeConfig,
        cosigned: &mut bool,
    ) -> Result<ScanOutcome, CoordinatorError> {
        let ctx = &self.ctx;
        let hash = descriptor.safe_tx_hash();
        let Ok(_session) = ctx.sessions.try_acquire(hash) else {
            return Ok(ScanOutcome::Busy);
        };

        let mut confirmations = record.confirmations();
        let owner = ctx.executor();
        if config.is_owner(owner) && !record.is_confirmed_by(owner) {
            let signature = ctx.signer.sign_descriptor(descriptor)?;
            ctx.service.confirm(hash, &signature).await?;
            info!(safe_tx_hash = %hash, nonce = %descriptor.nonce(), "co-signed proposal");
            confirmations.push(Confirmation::new(owner, Bytes::from(signature.to_bytes().to_vec())));
            *cosigned = true;
        }

        let threshold = ctx.settings.collection_threshold(config.threshold);
        let distinct: BTreeSet<Address> = confirmations.iter().map(|c| c.owner).collect();
        if (distinct.len() as u64) < threshold {
            return Ok(ScanOutcome::Waiting {
                confirmations: distinct.len(),
                threshold,
            });
        }
        if descriptor.nonce() != *current {
            return Ok(ScanOutcome::Queued);
        }

        let receipt = Executor::new(ctx.wallet.clone())
            .execute_retrying(descriptor, &confirmations, ctx.settings.execution_retries)
            .await?;
        *current += U256::from(1u64);
        Ok(ScanOutcome::Executed {
            tx_hash: receipt.tx_hash,
        })
    }

    /// Scan every `interval` until cancelled. Returns the number of completed passes.
    pub async fn run(&self, interval: Duration, cancel: &CancelToken) -> Result<u64, CoordinatorError> {
        self.start_check().await?;
        info!(safe = %self.ctx.domain.safe, owner = %self.ctx.executor(), ?interval, "scanner started");
        let mut passes = 0u64;
        while !cancel.is_cancelled() {
            match self.scan_once().await {
                Ok(_) => passes += 1,
                Err(err) => warn!(error = %err, "scan failed"),
            }
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = cancel.cancelled() => break,
            }
        }
        info!(passes, "scanner stopped");
        Ok(passes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ValidationError;
    use crate::lifecycle::LifecycleSettings;
    use crate::testing::{signer, FakePermissions, FakeService, FakeWallet, CHAIN_ID};
    use alloy_primitives::{address, FixedBytes};
    use safe_tx_types::{SafeDomain, SafeTx};

    const SAFE: Address = address!("5afe00000000000000000000000000000000cafe");

    struct Harness {
        wallet: Arc<FakeWallet>,
        permissions: Arc<FakePermissions>,
        service: Arc<FakeService>,
        scanner: PendingScanner,
    }

    fn harness(threshold: u64) -> Harness {
        harness_with(threshold, LifecycleSettings::default())
    }

    fn harness_with(threshold: u64, settings: LifecycleSettings) -> Harness {
        let owners = (1..=3).map(|s| signer(s).address()).collect();
        let wallet = Arc::new(FakeWallet::new(SAFE, owners, threshold));
        wallet.set_nonce(7);
        let bot = signer(1);
        let permissions = Arc::new(FakePermissions::new(bot.address(), bot.address()));
        let service = Arc::new(FakeService::new(SAFE));
        let ctx = CoordinatorContext::new(
            wallet.clone(),
            permissions.clone(),
            service.clone(),
            Arc::new(bot),
            SafeDomain::new(CHAIN_ID, SAFE),
            settings,
        );
        Harness {
            wallet,
            permissions,
            service,
            scanner: PendingScanner::new(Arc::new(ctx)),
        }
    }

    fn proposal(h: &Harness, nonce: u64, value: u64, by: u8) -> TransactionDescriptor {
        let d = TransactionDescriptor::new(
            SafeDomain::new(CHAIN_ID, SAFE),
            SafeTx::call(
                address!("7e5f4552091a69125d5dfcb7b8c2659029395bdf"),
                U256::from(value),
                Bytes::new(),
                U256::from(nonce),
            ),
        );
        h.service.insert_proposal(&d, &signer(by));
        d
    }

    #[tokio::test]
    async fn cosigns_and_executes_ready_proposal() {
        let h = harness(2);
        let d = proposal(&h, 7, 1, 2);

        let report = h.scanner.scan_once().await.unwrap();
        assert_eq!(
            report.entries,
            vec![ScanEntry {
                safe_tx_hash: d.safe_tx_hash(),
                nonce: U256::from(7u64),
                cosigned: true,
                outcome: ScanOutcome::Executed {
                    tx_hash: B256::from(U256::from(0x1001u64)),
                },
            }]
        );
        assert_eq!(h.service.confirms(), 1);
        assert_eq!(h.wallet.current_nonce(), U256::from(8u64));
    }

    #[tokio::test]
    async fn stale_and_waiting_proposals() {
        let h = harness(3);
        proposal(&h, 5, 1, 2);
        let waiting = proposal(&h, 7, 1, 2);

        let report = h.scanner.scan_once().await.unwrap();
        assert_eq!(report.entries.len(), 2);
        assert_eq!(report.entries[0].outcome, ScanOutcome::Stale);
        assert!(!report.entries[0].cosigned);
        assert_eq!(report.entries[1].safe_tx_hash, waiting.safe_tx_hash());
        assert_eq!(
            report.entries[1].outcome,
            ScanOutcome::Waiting {
                confirmations: 2,
                threshold: 3,
            }
        );

        // Already confirmed locally: no second confirmation.
        let again = h.scanner.scan_once().await.unwrap();
        assert!(!again.entries[1].cosigned);
        assert_eq!(h.service.confirms(), 1);
    }

    #[tokio::test]
    async fn executes_in_nonce_order_and_skips_the_losers() {
        let h = harness(2);
        proposal(&h, 8, 1, 2);
        proposal(&h, 7, 1, 2);
        proposal(&h, 7, 2, 3);

        let report = h.scanner.scan_once().await.unwrap();
        assert_eq!(report.executed(), 2);
        let stale = report
            .entries
            .iter()
            .filter(|e| e.outcome == ScanOutcome::Stale)
            .count();
        assert_eq!(stale, 1);
        let nonces: Vec<U256> = h.wallet.executed().iter().map(|(tx, _)| tx.nonce).collect();
        assert_eq!(nonces, vec![U256::from(7u64), U256::from(8u64)]);
    }

    #[tokio::test]
    async fn ready_but_not_next_is_queued() {
        let h = harness(2);
        proposal(&h, 9, 1, 2);
        let report = h.scanner.scan_once().await.unwrap();
        assert_eq!(report.entries[0].outcome, ScanOutcome::Queued);
        assert!(h.wallet.executed().is_empty());
    }

    #[tokio::test]
    async fn one_bad_proposal_does_not_stop_the_pass() {
        let h = harness(2);
        let bad = proposal(&h, 7, 1, 2);
        h.service.corrupt_reported_hash(bad.safe_tx_hash(), B256::repeat_byte(0xee));
        proposal(&h, 7, 2, 2);

        let report = h.scanner.scan_once().await.unwrap();
        assert_eq!(report.failed(), 1);
        assert_eq!(report.executed(), 1);
        let failure = report
            .entries
            .iter()
            .find_map(|e| match &e.outcome {
                ScanOutcome::Failed(err) => Some(err.clone()),
                _ => None,
            })
            .unwrap();
        assert!(matches!(
            failure,
            CoordinatorError::Validation(ValidationError::IdentifierMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn tampered_record_is_never_reported_stale() {
        let h = harness(2);
        let old = proposal(&h, 5, 1, 2);
        h.service.corrupt_reported_hash(old.safe_tx_hash(), B256::repeat_byte(0xee));

        let report = h.scanner.scan_once().await.unwrap();
        assert_eq!(report.entries.len(), 1);
        assert_eq!(report.entries[0].safe_tx_hash, B256::repeat_byte(0xee));
        assert!(matches!(
            report.entries[0].outcome,
            ScanOutcome::Failed(CoordinatorError::Validation(
                ValidationError::IdentifierMismatch { .. }
            ))
        ));
        assert_eq!(h.service.confirms(), 0);
    }

    #[tokio::test]
    async fn lower_threshold_override_still_waits_for_onchain_quorum() {
        let settings = LifecycleSettings {
            threshold_override: Some(1),
            ..LifecycleSettings::default()
        };
        let h = harness_with(3, settings);
        proposal(&h, 7, 1, 2);

        let report = h.scanner.scan_once().await.unwrap();
        assert_eq!(
            report.entries[0].outcome,
            ScanOutcome::Waiting {
                confirmations: 2,
                threshold: 3,
            }
        );
        assert!(h.wallet.executed().is_empty());
    }

    #[tokio::test]
    async fn busy_identifiers_are_left_alone() {
        let h = harness(2);
        let d = proposal(&h, 7, 1, 2);
        let _held = h.scanner.ctx.sessions.try_acquire(d.safe_tx_hash()).unwrap();

        let report = h.scanner.scan_once().await.unwrap();
        assert_eq!(report.entries[0].outcome, ScanOutcome::Busy);
        assert_eq!(h.service.confirms(), 0);
    }

    #[tokio::test]
    async fn reads_every_page() {
        let h = harness(3);
        for nonce in 7..12 {
            proposal(&h, nonce, 1, 2);
        }
        let scanner = PendingScanner::new(h.scanner.ctx.clone()).with_page_size(2);
        assert_eq!(scanner.pending().await.unwrap().len(), 5);
        let report = scanner.scan_once().await.unwrap();
        let nonces: Vec<U256> = report.entries.iter().map(|e| e.nonce).collect();
        assert_eq!(nonces, (7u64..12).map(U256::from).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn refuses_to_start_without_permission() {
        let h = harness(2);
        assert!(matches!(
            h.scanner.start_check().await,
            Err(CoordinatorError::Authorization(AuthorizationError::PermissionDenied { .. }))
        ));

        h.permissions.set_unavailable(true);
        assert!(matches!(
            h.scanner.run(Duration::from_secs(1), &CancelToken::new()).await,
            Err(CoordinatorError::Authorization(
                AuthorizationError::PermissionCheckUnavailable(_)
            ))
        ));

        h.permissions.set_unavailable(false);
        h.permissions.allow(signer(1).address(), SAFE, FixedBytes::ZERO);
        assert_eq!(h.scanner.start_check().await, Ok(()));
    }

    #[tokio::test(start_paused = true)]
    async fn run_until_cancelled() {
        let h = harness(2);
        h.permissions.allow(signer(1).address(), SAFE, FixedBytes::ZERO);
        let cancel = CancelToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(25)).await;
            trigger.cancel();
        });

        // Passes at 0s, 10s and 20s.
        let passes = h.scanner.run(Duration::from_secs(10), &cancel).await.unwrap();
        assert_eq!(passes, 3);
    }
}
