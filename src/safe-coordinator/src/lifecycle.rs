//! End-to-end orchestration: permission → build → sign → propose → collect → execute.
//!
//! Every dependency travels in [`CoordinatorContext`]; there is no process-global state.
//! Stages run strictly in order and every terminal failure is reported as a
//! [`LifecycleError`] carrying the stage and, once known, the `safeTxHash`.

use std::sync::Arc;

use alloy_primitives::{Address, FixedBytes, B256, U256};
use safe_tx_encoder::{LocalSigner, TransactionDescriptor};
use safe_tx_types::SafeDomain;
use serde::Serialize;
use tracing::{info, warn};

use crate::builder::{build_descriptor, verify_identifier_onchain, BuildRequest};
use crate::cancel::CancelToken;
use crate::collector::{PollPolicy, SignatureCollector};
use crate::config::CoordinatorConfig;
use crate::contracts::{ChainClient, RpcAuthorizer, RpcSafe};
use crate::errors::{
    AuthorizationError, CoordinatorError, LifecycleError, Stage, StateConflictError,
    ValidationError,
};
use crate::executor::Executor;
use crate::permission::{PermissionGate, PermissionPolicy};
use crate::ports::{ChainReceipt, CoordinationService, PermissionRegistry, SafeWallet};
use crate::proposal::{ProposalSubmitter, SubmissionKind};
use crate::service::SafeServiceClient;
use crate::sessions::{SafeConfigCache, SessionRegistry};

const ORIGIN: &str = "safe-coordinator";

/// Knobs of one lifecycle, lifted out of [`CoordinatorConfig`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LifecycleSettings {
    pub permission_selector: FixedBytes<4>,
    pub permission_policy: PermissionPolicy,
    pub auto_grant_permission: bool,
    pub poll: PollPolicy,
    pub threshold_override: Option<u64>,
    pub execution_retries: u32,
    pub verify_hash_onchain: bool,
    pub origin: Option<String>,
}

impl LifecycleSettings {
    /// Confirmations to wait for: the override can raise the on-chain threshold, never lower it.
    pub fn collection_threshold(&self, onchain: u64) -> u64 {
        self.threshold_override.map_or(onchain, |o| o.max(onchain))
    }

    pub fn from_config(config: &CoordinatorConfig) -> Self {
        Self {
            permission_selector: config.permission_selector,
            permission_policy: config.permission_policy,
            auto_grant_permission: config.auto_grant_permission,
            poll: config.poll_policy(),
            threshold_override: config.threshold_override,
            execution_retries: config.execution_retries,
            verify_hash_onchain: config.verify_hash_onchain,
            origin: Some(ORIGIN.to_string()),
        }
    }
}

impl Default for LifecycleSettings {
    fn default() -> Self {
        Self {
            permission_selector: FixedBytes::ZERO,
            permission_policy: PermissionPolicy::FailClosed,
            auto_grant_permission: false,
            poll: PollPolicy::default(),
            threshold_override: None,
            execution_retries: 3,
            verify_hash_onchain: false,
            origin: Some(ORIGIN.to_string()),
        }
    }
}

/// Handles shared by every lifecycle of one wallet.
#[derive(Clone)]
pub struct CoordinatorContext {
    pub wallet: Arc<dyn SafeWallet>,
    pub permissions: Arc<dyn PermissionRegistry>,
    pub service: Arc<dyn CoordinationService>,
    pub signer: Arc<LocalSigner>,
    pub domain: SafeDomain,
    pub settings: LifecycleSettings,
    pub sessions: SessionRegistry,
    pub config_cache: SafeConfigCache,
}

impl CoordinatorContext {
    pub fn new(
        wallet: Arc<dyn SafeWallet>,
        permissions: Arc<dyn PermissionRegistry>,
        service: Arc<dyn CoordinationService>,
        signer: Arc<LocalSigner>,
        domain: SafeDomain,
        settings: LifecycleSettings,
    ) -> Self {
        Self {
            wallet,
            permissions,
            service,
            signer,
            domain,
            settings,
            sessions: SessionRegistry::new(),
            config_cache: SafeConfigCache::new(std::time::Duration::from_secs(30)),
        }
    }

    pub fn with_config_cache(mut self, cache: SafeConfigCache) -> Self {
        self.config_cache = cache;
        self
    }

    /// Build the RPC and HTTP adapters described by `config`.
    pub async fn connect(config: &CoordinatorConfig) -> Result<Self, CoordinatorError> {
        let chain = ChainClient::connect(
            &config.rpc_url,
            config.bot_private_key.expose(),
            config.chain_id,
            config.rpc_timeout,
            config.receipt_timeout,
        )
        .await?;
        let signer = LocalSigner::from_hex(config.bot_private_key.expose())?;
        let domain = SafeDomain::new(chain.chain_id(), config.safe_address);
        let service = SafeServiceClient::new(&config.service_url, config.service_timeout)?;
        info!(
            safe = %config.safe_address,
            chain_id = domain.chain_id,
            owner = %signer.address(),
            service = %config.service_url,
            "coordinator context ready"
        );

        Ok(Self::new(
            Arc::new(RpcSafe::new(chain.clone(), config.safe_address)),
            Arc::new(RpcAuthorizer::new(chain, config.auth_address)),
            Arc::new(service),
            Arc::new(signer),
            domain,
            LifecycleSettings::from_config(config),
        )
        .with_config_cache(SafeConfigCache::new(config.config_cache_ttl)))
    }

    /// Acting identity: the local owner key.
    pub fn executor(&self) -> Address {
        self.signer.address()
    }

    pub fn gate(&self) -> PermissionGate {
        PermissionGate::new(self.permissions.clone(), self.settings.permission_policy)
    }

    /// Allow-list check for the acting identity on this wallet.
    pub async fn check_permission(&self) -> Result<bool, CoordinatorError> {
        self.gate()
            .check_permission(self.executor(), self.domain.safe, self.settings.permission_selector)
            .await
    }

    pub async fn grant_permission(&self) -> Result<ChainReceipt, CoordinatorError> {
        self.gate()
            .grant_permission(self.executor(), self.domain.safe, self.settings.permission_selector)
            .await
    }

    pub async fn ensure_permission(&self) -> Result<(), CoordinatorError> {
        self.gate()
            .ensure_permission(
                self.executor(),
                self.domain.safe,
                self.settings.permission_selector,
                self.settings.auto_grant_permission,
            )
            .await
    }

    /// Snapshot of the wallet, read fresh.
    pub async fn status(&self) -> Result<WalletStatus, CoordinatorError> {
        let config = self.wallet.config().await?;
        Ok(WalletStatus {
            address: self.wallet.address(),
            chain_id: self.domain.chain_id,
            owners: config.owners,
            threshold: config.threshold,
            nonce: self.wallet.nonce().await?,
            balance: self.wallet.balance().await?,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct WalletStatus {
    pub address: Address,
    pub chain_id: u64,
    pub owners: Vec<Address>,
    pub threshold: u64,
    pub nonce: U256,
    pub balance: U256,
}

/// Outcome of a successful lifecycle.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LifecycleReport {
    pub safe_tx_hash: B256,
    pub nonce: U256,
    /// `None` when resumed from an existing proposal.
    pub submission: Option<SubmissionKind>,
    pub signers: usize,
    pub poll_attempts: u32,
    pub receipt: ChainReceipt,
}

pub struct Lifecycle {
    ctx: Arc<CoordinatorContext>,
}

impl Lifecycle {
    pub fn new(ctx: Arc<CoordinatorContext>) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &CoordinatorContext {
        &self.ctx
    }

    /// Drive a new transaction from permission check to execution.
    pub async fn run(
        &self,
        request: BuildRequest,
        cancel: &CancelToken,
    ) -> Result<LifecycleReport, LifecycleError> {
        let ctx = &self.ctx;

        stage(Stage::Permission, None, cancel)?;
        ctx.ensure_permission()
            .await
            .map_err(|e| LifecycleError::new(Stage::Permission, None, e))?;

        stage(Stage::Build, None, cancel)?;
        let descriptor = build_descriptor(ctx.wallet.as_ref(), ctx.domain, request)
            .await
            .map_err(|e| LifecycleError::new(Stage::Build, None, e))?;
        let hash = descriptor.safe_tx_hash();
        if ctx.settings.verify_hash_onchain {
            verify_identifier_onchain(ctx.wallet.as_ref(), &descriptor)
                .await
                .map_err(|e| LifecycleError::new(Stage::Build, Some(hash), e))?;
        }
        info!(safe_tx_hash = %hash, nonce = %descriptor.nonce(), to = %descriptor.to(), "descriptor ready");

        stage(Stage::Sign, Some(hash), cancel)?;
        let owner = ctx.executor();
        let config = ctx
            .config_cache
            .get(ctx.wallet.as_ref())
            .await
            .map_err(|e| LifecycleError::new(Stage::Sign, Some(hash), e))?;
        if !config.is_owner(owner) {
            return Err(LifecycleError::new(
                Stage::Sign,
                Some(hash),
                AuthorizationError::NotAnOwner(owner).into(),
            ));
        }

        stage(Stage::Propose, Some(hash), cancel)?;
        let submitter = ProposalSubmitter::new(ctx.service.clone(), ctx.settings.origin.clone());
        let submission = submitter
            .submit_or_resume(&descriptor, &ctx.signer)
            .await
            .map_err(|e| LifecycleError::new(Stage::Propose, Some(hash), e))?;

        let mut report = self.collect_and_execute(&descriptor, cancel).await?;
        report.submission = Some(submission.kind);
        Ok(report)
    }

    /// Pick up an existing proposal by identifier and run collect → execute. The path
    /// back after a collection timeout.
    pub async fn resume(
        &self,
        safe_tx_hash: B256,
        cancel: &CancelToken,
    ) -> Result<LifecycleReport, LifecycleError> {
        let ctx = &self.ctx;
        let fail = |e: CoordinatorError| LifecycleError::new(Stage::Collect, Some(safe_tx_hash), e);

        stage(Stage::Collect, Some(safe_tx_hash), cancel)?;
        let record = ctx
            .service
            .transaction(safe_tx_hash)
            .await
            .map_err(fail)?
            .ok_or_else(|| fail(ValidationError::UnknownTransaction(safe_tx_hash).into()))?;
        if record.safe != ctx.domain.safe {
            return Err(fail(
                ValidationError::MalformedResponse(format!(
                    "proposal belongs to {}, not {}",
                    record.safe, ctx.domain.safe
                ))
                .into(),
            ));
        }
        if record.is_executed {
            return Err(fail(StateConflictError::AlreadyExecuted(safe_tx_hash).into()));
        }
        let tx = record.to_safe_tx().map_err(|e| fail(e.into()))?;
        let descriptor = TransactionDescriptor::from_reported(ctx.domain, tx, safe_tx_hash)
            .map_err(|e| fail(e.into()))?;
        info!(safe_tx_hash = %safe_tx_hash, nonce = %descriptor.nonce(), "resuming proposal");

        self.collect_and_execute(&descriptor, cancel).await
    }

    async fn collect_and_execute(
        &self,
        descriptor: &TransactionDescriptor,
        cancel: &CancelToken,
    ) -> Result<LifecycleReport, LifecycleError> {
        let ctx = &self.ctx;
        let hash = descriptor.safe_tx_hash();

        stage(Stage::Collect, Some(hash), cancel)?;
        let _session = ctx
            .sessions
            .try_acquire(hash)
            .map_err(|e| LifecycleError::new(Stage::Collect, Some(hash), e.into()))?;
        let onchain = ctx
            .config_cache
            .get(ctx.wallet.as_ref())
            .await
            .map_err(|e| LifecycleError::new(Stage::Collect, Some(hash), e))?
            .threshold;
        let threshold = ctx.settings.collection_threshold(onchain);
        let mut collector = SignatureCollector::new(
            ctx.service.clone(),
            hash,
            threshold,
            ctx.settings.poll.clone(),
        );
        let collected = collector
            .run(cancel)
            .await
            .map_err(|e| LifecycleError::new(Stage::Collect, Some(hash), e))?;

        stage(Stage::Execute, Some(hash), cancel)?;
        let executor = Executor::new(ctx.wallet.clone());
        let receipt = executor
            .execute_retrying(descriptor, &collected.confirmations, ctx.settings.execution_retries)
            .await
            .map_err(|e| {
                if matches!(e, CoordinatorError::StateConflict(_)) {
                    // Owners, threshold or nonce moved under us.
                    ctx.config_cache.invalidate();
                }
                warn!(safe_tx_hash = %hash, error = %e, "execution failed");
                LifecycleError::new(Stage::Execute, Some(hash), e)
            })?;

        info!(safe_tx_hash = %hash, tx_hash = %receipt.tx_hash, "lifecycle complete");
        Ok(LifecycleReport {
            safe_tx_hash: hash,
            nonce: descriptor.nonce(),
            submission: None,
            signers: collected.confirmations.len(),
            poll_attempts: collected.attempts,
            receipt,
        })
    }
}

fn stage(stage: Stage, hash: Option<B256>, cancel: &CancelToken) -> Result<(), LifecycleError> {
    if cancel.is_cancelled() {
        return Err(LifecycleError::new(stage, hash, CoordinatorError::Cancelled));
    }
    info!(%stage, safe_tx_hash = ?hash, "stage");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::TimeoutError;
    use crate::testing::{signer, FakePermissions, FakeService, FakeWallet, CHAIN_ID};
    use alloy_primitives::{address, Bytes};
    use std::time::Duration;

    const SAFE: Address = address!("5afe00000000000000000000000000000000cafe");
    const TO: Address = address!("7e5f4552091a69125d5dfcb7b8c2659029395bdf");

    struct Harness {
        wallet: Arc<FakeWallet>,
        permissions: Arc<FakePermissions>,
        service: Arc<FakeService>,
        lifecycle: Lifecycle,
    }

    fn harness(max_attempts: u32) -> Harness {
        harness_with(max_attempts, None)
    }

    fn harness_with(max_attempts: u32, threshold_override: Option<u64>) -> Harness {
        let owners = (1..=3).map(|s| signer(s).address()).collect();
        let wallet = Arc::new(FakeWallet::new(SAFE, owners, 2));
        wallet.set_nonce(7);
        let bot = signer(1);
        let permissions = Arc::new(FakePermissions::new(bot.address(), bot.address()));
        let service = Arc::new(FakeService::new(SAFE));
        let settings = LifecycleSettings {
            poll: PollPolicy {
                interval: Duration::from_secs(5),
                max_attempts,
                max_consecutive_errors: 3,
                fetch_timeout: Duration::from_secs(2),
                deadline: None,
            },
            threshold_override,
            execution_retries: 1,
            verify_hash_onchain: true,
            ..LifecycleSettings::default()
        };
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
            lifecycle: Lifecycle::new(Arc::new(ctx)),
        }
    }

    fn request() -> BuildRequest {
        BuildRequest::call(TO, U256::from(1_000_000_000_000_000u64), Bytes::new())
    }

    fn expected_hash() -> B256 {
        alloy_primitives::b256!("1e2f01c1244f61ecbecd6f9d60b142ca0249d2ef18357d6a0c96e6e9f292bcd2")
    }

    #[tokio::test(start_paused = true)]
    async fn happy_path_two_of_three() {
        let h = harness(10);
        h.permissions.allow(signer(1).address(), SAFE, FixedBytes::ZERO);
        // Second owner signs after the collector's first poll.
        h.service.confirm_after_fetch(2, expected_hash(), &signer(2));

        let report = h.lifecycle.run(request(), &CancelToken::new()).await.unwrap();
        assert_eq!(report.safe_tx_hash, expected_hash());
        assert_eq!(report.nonce, U256::from(7u64));
        assert_eq!(report.submission, Some(SubmissionKind::Created));
        assert_eq!(report.signers, 2);
        assert_eq!(h.wallet.executed().len(), 1);
        assert_eq!(h.wallet.current_nonce(), U256::from(8u64));
        assert!(!h.lifecycle.context().sessions.is_active(expected_hash()));
    }

    #[tokio::test(start_paused = true)]
    async fn lower_threshold_override_waits_for_onchain_quorum() {
        let h = harness_with(10, Some(1));
        h.permissions.allow(signer(1).address(), SAFE, FixedBytes::ZERO);
        h.service.confirm_after_fetch(3, expected_hash(), &signer(2));

        let report = h.lifecycle.run(request(), &CancelToken::new()).await.unwrap();
        assert!(report.poll_attempts >= 2);
        assert_eq!(report.signers, 2);
        assert_eq!(h.wallet.executed().len(), 1);
    }

    #[test]
    fn threshold_override_only_raises() {
        let mut settings = LifecycleSettings::default();
        assert_eq!(settings.collection_threshold(2), 2);
        settings.threshold_override = Some(1);
        assert_eq!(settings.collection_threshold(2), 2);
        settings.threshold_override = Some(3);
        assert_eq!(settings.collection_threshold(2), 3);
    }

    #[tokio::test]
    async fn permission_denied_stops_before_building() {
        let h = harness(10);
        let err = h.lifecycle.run(request(), &CancelToken::new()).await.unwrap_err();
        assert_eq!(err.stage, Stage::Permission);
        assert_eq!(err.safe_tx_hash, None);
        assert!(matches!(
            err.source,
            CoordinatorError::Authorization(AuthorizationError::PermissionDenied { .. })
        ));
        assert_eq!(h.service.proposals(), 0);
        assert!(h.wallet.calls().is_empty());
    }

    #[tokio::test]
    async fn unavailable_allow_list_fails_closed() {
        let h = harness(10);
        h.permissions.set_unavailable(true);
        let err = h.lifecycle.run(request(), &CancelToken::new()).await.unwrap_err();
        assert!(matches!(
            err.source,
            CoordinatorError::Authorization(AuthorizationError::PermissionCheckUnavailable(_))
        ));
        assert_eq!(h.service.proposals(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_then_resume() {
        let h = harness(2);
        h.permissions.allow(signer(1).address(), SAFE, FixedBytes::ZERO);

        let err = h.lifecycle.run(request(), &CancelToken::new()).await.unwrap_err();
        assert_eq!(err.stage, Stage::Collect);
        assert_eq!(err.safe_tx_hash, Some(expected_hash()));
        assert!(matches!(
            err.source,
            CoordinatorError::Timeout(TimeoutError::PollExhausted { attempts: 2, .. })
        ));
        assert!(err.is_retryable());

        let late = signer(3).sign_hash(expected_hash()).unwrap();
        h.service.confirm(expected_hash(), &late).await.unwrap();

        let report = h.lifecycle.resume(expected_hash(), &CancelToken::new()).await.unwrap();
        assert_eq!(report.submission, None);
        assert_eq!(report.poll_attempts, 1);
        assert_eq!(h.wallet.executed().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn competing_execution_surfaces_stale_nonce() {
        let h = harness(10);
        h.permissions.allow(signer(1).address(), SAFE, FixedBytes::ZERO);
        h.service.confirm_after_fetch(1, expected_hash(), &signer(2));

        // Another proposal at nonce 7 lands first.
        let cancel = CancelToken::new();
        let wallet = h.wallet.clone();
        let run = h.lifecycle.run(request(), &cancel);
        tokio::pin!(run);
        tokio::select! {
            _ = &mut run => panic!("lifecycle finished before the competing execution"),
            _ = tokio::time::sleep(Duration::from_secs(1)) => wallet.set_nonce(8),
        }
        let err = run.await.unwrap_err();
        assert_eq!(err.stage, Stage::Execute);
        assert_eq!(
            err.source,
            CoordinatorError::StateConflict(StateConflictError::SequenceNumberStale {
                expected: U256::from(7u64),
                current: U256::from(8u64),
            })
        );
        assert!(h.wallet.executed().is_empty());
    }

    #[tokio::test]
    async fn resume_rejects_unknown_and_busy_identifiers() {
        let h = harness(10);
        let err = h
            .lifecycle
            .resume(B256::repeat_byte(4), &CancelToken::new())
            .await
            .unwrap_err();
        assert_eq!(
            err.source,
            CoordinatorError::Validation(ValidationError::UnknownTransaction(B256::repeat_byte(4)))
        );

        let d = TransactionDescriptor::new(
            SafeDomain::new(CHAIN_ID, SAFE),
            safe_tx_types::SafeTx::call(TO, U256::from(1u64), Bytes::new(), U256::from(7u64)),
        );
        h.service.insert_proposal(&d, &signer(2));
        let _busy = h.lifecycle.context().sessions.try_acquire(d.safe_tx_hash()).unwrap();
        let err = h
            .lifecycle
            .resume(d.safe_tx_hash(), &CancelToken::new())
            .await
            .unwrap_err();
        assert_eq!(
            err.source,
            CoordinatorError::StateConflict(StateConflictError::SessionActive(d.safe_tx_hash()))
        );
    }

    #[tokio::test]
    async fn non_owner_key_cannot_propose() {
        let h = harness(10);
        h.wallet.set_owners(vec![signer(2).address(), signer(3).address()]);
        h.permissions.allow(signer(1).address(), SAFE, FixedBytes::ZERO);

        let err = h.lifecycle.run(request(), &CancelToken::new()).await.unwrap_err();
        assert_eq!(err.stage, Stage::Sign);
        assert_eq!(
            err.source,
            CoordinatorError::Authorization(AuthorizationError::NotAnOwner(signer(1).address()))
        );
        assert_eq!(h.service.proposals(), 0);
    }

    #[tokio::test]
    async fn status_reads_the_wallet() {
        let h = harness(10);
        let status = h.lifecycle.context().status().await.unwrap();
        assert_eq!(status.address, SAFE);
        assert_eq!(status.chain_id, CHAIN_ID);
        assert_eq!(status.threshold, 2);
        assert_eq!(status.owners.len(), 3);
        assert_eq!(status.nonce, U256::from(7u64));
    }

    #[tokio::test]
    async fn cancelled_before_start() {
        let h = harness(10);
        let cancel = CancelToken::new();
        cancel.cancel();
        let err = h.lifecycle.run(request(), &cancel).await.unwrap_err();
        assert_eq!(err.source, CoordinatorError::Cancelled);
        assert_eq!(err.stage, Stage::Permission);
    }
}
