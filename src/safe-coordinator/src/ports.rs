//! Outbound ports: the wallet contract, the allow-list contract and the coordination
//! service. Adapters live in [`crate::contracts`] and [`crate::service`]; in-memory
//! versions in `testing`.

use alloy_primitives::{Address, Bytes, FixedBytes, B256, U256};
use async_trait::async_trait;
use safe_tx_encoder::SafeSignature;
use safe_tx_types::{SafeConfig, SafeTx};

use crate::errors::CoordinatorError;
use crate::service::{Page, PageRequest, ProposalRequest, ServiceTransaction};

/// Mined transaction summary.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChainReceipt {
    pub tx_hash: B256,
    pub block_number: Option<u64>,
    pub gas_used: U256,
    pub effective_gas_price: Option<U256>,
}

/// The Safe contract.
#[async_trait]
pub trait SafeWallet: Send + Sync {
    fn address(&self) -> Address;

    async fn chain_id(&self) -> Result<u64, CoordinatorError>;

    /// Current on-chain nonce.
    async fn nonce(&self) -> Result<U256, CoordinatorError>;

    async fn owners(&self) -> Result<Vec<Address>, CoordinatorError>;

    async fn threshold(&self) -> Result<u64, CoordinatorError>;

    async fn balance(&self) -> Result<U256, CoordinatorError>;

    /// `getTransactionHash` as computed by the contract.
    async fn transaction_hash(&self, tx: &SafeTx) -> Result<B256, CoordinatorError>;

    /// Dry-run `execTransaction` without broadcasting.
    async fn simulate(&self, tx: &SafeTx, signatures: &Bytes) -> Result<(), CoordinatorError>;

    /// Broadcast `execTransaction` and wait for the receipt.
    async fn execute(&self, tx: &SafeTx, signatures: &Bytes)
        -> Result<ChainReceipt, CoordinatorError>;

    /// Owners and threshold, read fresh.
    async fn config(&self) -> Result<SafeConfig, CoordinatorError> {
        let owners = self.owners().await?;
        let threshold = self.threshold().await?;
        Ok(SafeConfig { owners, threshold })
    }
}

/// The allow-list contract gating which executor may act on which target and selector.
#[async_trait]
pub trait PermissionRegistry: Send + Sync {
    async fn can_execute(
        &self,
        executor: Address,
        target: Address,
        selector: FixedBytes<4>,
    ) -> Result<bool, CoordinatorError>;

    async fn admin(&self) -> Result<Address, CoordinatorError>;

    async fn set_permission(
        &self,
        executor: Address,
        target: Address,
        selector: FixedBytes<4>,
        allowed: bool,
    ) -> Result<ChainReceipt, CoordinatorError>;

    /// Account that signs `set_permission` transactions.
    fn sender(&self) -> Address;
}

/// The off-chain coordination service (Safe Transaction Service).
#[async_trait]
pub trait CoordinationService: Send + Sync {
    /// Create a proposal; returns the identifier echoed by the service, if any.
    async fn propose(
        &self,
        safe: Address,
        proposal: &ProposalRequest,
    ) -> Result<Option<B256>, CoordinatorError>;

    /// `None` when the service does not know the identifier (yet).
    async fn transaction(
        &self,
        safe_tx_hash: B256,
    ) -> Result<Option<ServiceTransaction>, CoordinatorError>;

    async fn pending(
        &self,
        safe: Address,
        page: PageRequest,
    ) -> Result<Page<ServiceTransaction>, CoordinatorError>;

    /// Add one owner signature to an existing proposal.
    async fn confirm(
        &self,
        safe_tx_hash: B256,
        signature: &SafeSignature,
    ) -> Result<(), CoordinatorError>;
}
