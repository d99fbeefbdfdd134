//! In-memory wallet, allow-list and coordination service for tests.
//!
//! Locks are never held across an `.await`.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::time::Duration;

use alloy_primitives::{Address, Bytes, FixedBytes, B256, U256};
use async_trait::async_trait;
use parking_lot::Mutex;
use safe_tx_encoder::{safe_tx_hash, LocalSigner, SafeSignature, TransactionDescriptor};
use safe_tx_types::{SafeDomain, SafeTx};

use crate::errors::{CoordinatorError, ExecutionError, TransportError, ValidationError};
use crate::ports::{ChainReceipt, CoordinationService, PermissionRegistry, SafeWallet};
use crate::service::{Page, PageRequest, ProposalRequest, ServiceConfirmation, ServiceTransaction};

pub const CHAIN_ID: u64 = 11_155_111;

/// Deterministic owner key: private key `seed` left-padded to 32 bytes.
pub fn signer(seed: u8) -> LocalSigner {
    match LocalSigner::from_hex(&format!("{seed:064x}")) {
        Ok(signer) => signer,
        Err(err) => panic!("seed {seed} is not a valid key: {err}"),
    }
}

fn receipt(n: usize) -> ChainReceipt {
    ChainReceipt {
        tx_hash: B256::from(U256::from(0x1000u64 + n as u64)),
        block_number: Some(n as u64),
        gas_used: U256::from(21_000u64),
        effective_gas_price: Some(U256::from(1_000_000_000u64)),
    }
}

struct QueuedFailure {
    error: CoordinatorError,
    /// The transaction was mined before the error surfaced.
    landed: bool,
}

struct WalletState {
    nonce: U256,
    owners: Vec<Address>,
    threshold: u64,
    balance: U256,
    calls: Vec<&'static str>,
    executed: Vec<(SafeTx, Bytes)>,
    execute_failures: VecDeque<QueuedFailure>,
    simulate_error: Option<CoordinatorError>,
}

pub struct FakeWallet {
    address: Address,
    state: Mutex<WalletState>,
}

impl FakeWallet {
    pub fn new(address: Address, owners: Vec<Address>, threshold: u64) -> Self {
        Self {
            address,
            state: Mutex::new(WalletState {
                nonce: U256::ZERO,
                owners,
                threshold,
                balance: U256::from(10u64).pow(U256::from(18u64)),
                calls: Vec::new(),
                executed: Vec::new(),
                execute_failures: VecDeque::new(),
                simulate_error: None,
            }),
        }
    }

    pub fn set_nonce(&self, nonce: u64) {
        self.state.lock().nonce = U256::from(nonce);
    }

    pub fn current_nonce(&self) -> U256 {
        self.state.lock().nonce
    }

    pub fn set_threshold(&self, threshold: u64) {
        self.state.lock().threshold = threshold;
    }

    pub fn set_owners(&self, owners: Vec<Address>) {
        self.state.lock().owners = owners;
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.state.lock().calls.clone()
    }

    pub fn executed(&self) -> Vec<(SafeTx, Bytes)> {
        self.state.lock().executed.clone()
    }

    pub fn queue_execute_error(&self, error: CoordinatorError) {
        self.state.lock().execute_failures.push_back(QueuedFailure {
            error,
            landed: false,
        });
    }

    /// Next execute mines the transaction, then reports `error`.
    pub fn queue_execute_error_after_landing(&self, error: CoordinatorError) {
        self.state.lock().execute_failures.push_back(QueuedFailure {
            error,
            landed: true,
        });
    }

    pub fn set_simulate_error(&self, error: Option<CoordinatorError>) {
        self.state.lock().simulate_error = error;
    }

    fn record(&self, call: &'static str) {
        self.state.lock().calls.push(call);
    }
}

#[async_trait]
impl SafeWallet for FakeWallet {
    fn address(&self) -> Address {
        self.address
    }

    async fn chain_id(&self) -> Result<u64, CoordinatorError> {
        Ok(CHAIN_ID)
    }

    async fn nonce(&self) -> Result<U256, CoordinatorError> {
        self.record("nonce");
        Ok(self.state.lock().nonce)
    }

    async fn owners(&self) -> Result<Vec<Address>, CoordinatorError> {
        self.record("owners");
        Ok(self.state.lock().owners.clone())
    }

    async fn threshold(&self) -> Result<u64, CoordinatorError> {
        self.record("threshold");
        Ok(self.state.lock().threshold)
    }

    async fn balance(&self) -> Result<U256, CoordinatorError> {
        Ok(self.state.lock().balance)
    }

    async fn transaction_hash(&self, tx: &SafeTx) -> Result<B256, CoordinatorError> {
        self.record("transaction_hash");
        Ok(safe_tx_hash(&SafeDomain::new(CHAIN_ID, self.address), tx))
    }

    async fn simulate(&self, _tx: &SafeTx, _signatures: &Bytes) -> Result<(), CoordinatorError> {
        self.record("simulate");
        match self.state.lock().simulate_error.clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn execute(
        &self,
        tx: &SafeTx,
        signatures: &Bytes,
    ) -> Result<ChainReceipt, CoordinatorError> {
        self.record("execute");
        let mut state = self.state.lock();
        if tx.nonce != state.nonce {
            return Err(ExecutionError::Reverted {
                code: Some("GS026".into()),
                reason: "invalid nonce".into(),
            }
            .into());
        }
        match state.execute_failures.pop_front() {
            Some(QueuedFailure { error, landed }) => {
                if landed {
                    state.executed.push((tx.clone(), signatures.clone()));
                    state.nonce += U256::from(1u64);
                }
                Err(error)
            }
            None => {
                state.executed.push((tx.clone(), signatures.clone()));
                state.nonce += U256::from(1u64);
                Ok(receipt(state.executed.len()))
            }
        }
    }
}

struct PermissionState {
    allowed: HashSet<(Address, Address, FixedBytes<4>)>,
    unavailable: bool,
    grants: usize,
}

pub struct FakePermissions {
    admin: Address,
    sender: Address,
    state: Mutex<PermissionState>,
}

impl FakePermissions {
    pub fn new(admin: Address, sender: Address) -> Self {
        Self {
            admin,
            sender,
            state: Mutex::new(PermissionState {
                allowed: HashSet::new(),
                unavailable: false,
                grants: 0,
            }),
        }
    }

    pub fn allow(&self, executor: Address, target: Address, selector: FixedBytes<4>) {
        self.state.lock().allowed.insert((executor, target, selector));
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.state.lock().unavailable = unavailable;
    }

    /// Permission transactions sent so far.
    pub fn grants(&self) -> usize {
        self.state.lock().grants
    }

    fn available(&self) -> Result<(), CoordinatorError> {
        if self.state.lock().unavailable {
            return Err(TransportError::Rpc("allow-list unreachable".into()).into());
        }
        Ok(())
    }
}

#[async_trait]
impl PermissionRegistry for FakePermissions {
    async fn can_execute(
        &self,
        executor: Address,
        target: Address,
        selector: FixedBytes<4>,
    ) -> Result<bool, CoordinatorError> {
        self.available()?;
        Ok(self.state.lock().allowed.contains(&(executor, target, selector)))
    }

    async fn admin(&self) -> Result<Address, CoordinatorError> {
        self.available()?;
        Ok(self.admin)
    }

    async fn set_permission(
        &self,
        executor: Address,
        target: Address,
        selector: FixedBytes<4>,
        allowed: bool,
    ) -> Result<ChainReceipt, CoordinatorError> {
        self.available()?;
        let mut state = self.state.lock();
        state.grants += 1;
        if self.sender != self.admin {
            return Err(ExecutionError::Reverted {
                code: None,
                reason: "not admin".into(),
            }
            .into());
        }
        if allowed {
            state.allowed.insert((executor, target, selector));
        } else {
            state.allowed.remove(&(executor, target, selector));
        }
        Ok(receipt(state.grants))
    }

    fn sender(&self) -> Address {
        self.sender
    }
}

/// How the fake service answers a proposal.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum EchoMode {
    /// Store the proposal and echo its identifier.
    #[default]
    Hash,
    /// Store the proposal and echo this identifier instead.
    Fixed(B256),
    /// Store the proposal, echo nothing.
    Silent,
    /// Accept the request but store nothing.
    Drop,
}

struct ScheduledConfirmation {
    after_fetch: u32,
    safe_tx_hash: B256,
    owner: Address,
    signature: SafeSignature,
}

#[derive(Default)]
struct ServiceState {
    records: BTreeMap<B256, ServiceTransaction>,
    echo: EchoMode,
    proposals: usize,
    confirms: usize,
    fetches: u32,
    failing_fetches: u32,
    fetch_delay: Option<Duration>,
    unavailable: bool,
    scheduled: Vec<ScheduledConfirmation>,
}

pub struct FakeService {
    safe: Address,
    state: Mutex<ServiceState>,
}

impl FakeService {
    pub fn new(safe: Address) -> Self {
        Self {
            safe,
            state: Mutex::new(ServiceState::default()),
        }
    }

    pub fn set_echo(&self, echo: EchoMode) {
        self.state.lock().echo = echo;
    }

    /// Proposals accepted so far, including dropped ones.
    pub fn proposals(&self) -> usize {
        self.state.lock().proposals
    }

    /// Confirmations posted through [`CoordinationService::confirm`].
    pub fn confirms(&self) -> usize {
        self.state.lock().confirms
    }

    /// Calls to [`CoordinationService::transaction`], failed ones included.
    pub fn fetches(&self) -> u32 {
        self.state.lock().fetches
    }

    pub fn record(&self, safe_tx_hash: B256) -> Option<ServiceTransaction> {
        self.state.lock().records.get(&safe_tx_hash).cloned()
    }

    pub fn fail_next_fetches(&self, count: u32) {
        self.state.lock().failing_fetches = count;
    }

    pub fn set_fetch_delay(&self, delay: Duration) {
        self.state.lock().fetch_delay = Some(delay);
    }

    /// Every call fails with a transport error.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.state.lock().unavailable = unavailable;
    }

    pub fn mark_executed(&self, safe_tx_hash: B256) {
        if let Some(record) = self.state.lock().records.get_mut(&safe_tx_hash) {
            record.is_executed = true;
            record.is_successful = Some(true);
        }
    }

    /// Make the stored record report `reported` as its identifier.
    pub fn corrupt_reported_hash(&self, safe_tx_hash: B256, reported: B256) {
        if let Some(record) = self.state.lock().records.get_mut(&safe_tx_hash) {
            record.safe_tx_hash = reported;
        }
    }

    /// Store a proposal signed by `proposer`, bypassing the request path.
    pub fn insert_proposal(&self, descriptor: &TransactionDescriptor, proposer: &LocalSigner) {
        let signature = match proposer.sign_descriptor(descriptor) {
            Ok(signature) => signature,
            Err(err) => panic!("signing failed: {err}"),
        };
        let tx = descriptor.tx();
        let record = ServiceTransaction {
            safe: descriptor.safe(),
            to: tx.to,
            value: tx.value,
            data: (!tx.data.is_empty()).then(|| tx.data.clone()),
            operation: tx.operation.as_u8(),
            safe_tx_gas: tx.gas.safe_tx_gas,
            base_gas: tx.gas.base_gas,
            gas_price: tx.gas.gas_price,
            gas_token: Some(tx.gas.gas_token),
            refund_receiver: Some(tx.gas.refund_receiver),
            nonce: tx.nonce,
            safe_tx_hash: descriptor.safe_tx_hash(),
            is_executed: false,
            is_successful: None,
            transaction_hash: None,
            confirmations_required: None,
            confirmations: vec![confirmation(proposer.address(), &signature)],
        };
        self.state.lock().records.insert(record.safe_tx_hash, record);
    }

    /// Add `owner`'s confirmation right after the `fetch`-th fetch completes.
    pub fn confirm_after_fetch(&self, fetch: u32, safe_tx_hash: B256, owner: &LocalSigner) {
        let signature = match owner.sign_hash(safe_tx_hash) {
            Ok(signature) => signature,
            Err(err) => panic!("signing failed: {err}"),
        };
        self.state.lock().scheduled.push(ScheduledConfirmation {
            after_fetch: fetch,
            safe_tx_hash,
            owner: owner.address(),
            signature,
        });
    }

    fn available(&self) -> Result<(), CoordinatorError> {
        if self.state.lock().unavailable {
            return Err(transport_503());
        }
        Ok(())
    }
}

fn transport_503() -> CoordinatorError {
    TransportError::Http {
        status: 503,
        url: "fake://service".into(),
        body: "unavailable".into(),
    }
    .into()
}

fn rejected(status: u16, body: &str) -> CoordinatorError {
    ValidationError::ServiceRejected {
        status,
        body: body.into(),
    }
    .into()
}

fn confirmation(owner: Address, signature: &SafeSignature) -> ServiceConfirmation {
    ServiceConfirmation {
        owner,
        signature: Bytes::from(signature.to_bytes().to_vec()),
        signature_type: Some("EOA".into()),
        submission_date: None,
    }
}

fn add_confirmation(record: &mut ServiceTransaction, owner: Address, signature: &SafeSignature) {
    if !record.is_confirmed_by(owner) {
        record.confirmations.push(confirmation(owner, signature));
    }
}

#[async_trait]
impl CoordinationService for FakeService {
    async fn propose(
        &self,
        safe: Address,
        proposal: &ProposalRequest,
    ) -> Result<Option<B256>, CoordinatorError> {
        self.available()?;
        if safe != self.safe {
            return Err(rejected(404, "unknown safe"));
        }
        let tx = SafeTx {
            to: proposal.to,
            value: proposal.value,
            data: proposal.data.clone().unwrap_or_default(),
            operation: safe_tx_types::Operation::try_from(proposal.operation)
                .map_err(|_| rejected(400, "bad operation"))?,
            gas: safe_tx_types::GasParams {
                safe_tx_gas: proposal.safe_tx_gas,
                base_gas: proposal.base_gas,
                gas_price: proposal.gas_price,
                gas_token: proposal.gas_token,
                refund_receiver: proposal.refund_receiver,
            },
            nonce: proposal.nonce,
        };
        let descriptor = TransactionDescriptor::new(SafeDomain::new(CHAIN_ID, safe), tx);
        if descriptor.safe_tx_hash() != proposal.contract_transaction_hash {
            return Err(rejected(422, "contractTransactionHash does not match"));
        }
        let signature =
            SafeSignature::from_hex(&proposal.signature).map_err(|_| rejected(400, "bad signature"))?;
        match signature.recover_signer(descriptor.safe_tx_hash()) {
            Ok(owner) if owner == proposal.sender => {}
            _ => return Err(rejected(422, "signature does not match sender")),
        }

        let mut state = self.state.lock();
        state.proposals += 1;
        let echo = state.echo;
        if echo != EchoMode::Drop {
            let hash = descriptor.safe_tx_hash();
            let tx = descriptor.tx();
            let record = state.records.entry(hash).or_insert_with(|| ServiceTransaction {
                safe,
                to: tx.to,
                value: tx.value,
                data: proposal.data.clone(),
                operation: proposal.operation,
                safe_tx_gas: tx.gas.safe_tx_gas,
                base_gas: tx.gas.base_gas,
                gas_price: tx.gas.gas_price,
                gas_token: Some(tx.gas.gas_token),
                refund_receiver: Some(tx.gas.refund_receiver),
                nonce: tx.nonce,
                safe_tx_hash: hash,
                is_executed: false,
                is_successful: None,
                transaction_hash: None,
                confirmations_required: None,
                confirmations: Vec::new(),
            });
            add_confirmation(record, proposal.sender, &signature);
        }
        Ok(match echo {
            EchoMode::Hash => Some(descriptor.safe_tx_hash()),
            EchoMode::Fixed(hash) => Some(hash),
            EchoMode::Silent | EchoMode::Drop => None,
        })
    }

    async fn transaction(
        &self,
        safe_tx_hash: B256,
    ) -> Result<Option<ServiceTransaction>, CoordinatorError> {
        let delay = {
            let mut state = self.state.lock();
            state.fetches += 1;
            state.fetch_delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.available()?;

        let mut state = self.state.lock();
        let fetch = state.fetches;
        if state.failing_fetches > 0 {
            state.failing_fetches -= 1;
            return Err(transport_503());
        }
        let found = state.records.get(&safe_tx_hash).cloned();

        // Confirmations for records that do not exist yet stay scheduled.
        let scheduled = std::mem::take(&mut state.scheduled);
        let (due, later): (Vec<ScheduledConfirmation>, Vec<ScheduledConfirmation>) = scheduled
            .into_iter()
            .partition(|s| s.after_fetch <= fetch && state.records.contains_key(&s.safe_tx_hash));
        state.scheduled = later;
        for scheduled in due {
            if let Some(record) = state.records.get_mut(&scheduled.safe_tx_hash) {
                add_confirmation(record, scheduled.owner, &scheduled.signature);
            }
        }
        Ok(found)
    }

    async fn pending(
        &self,
        safe: Address,
        page: PageRequest,
    ) -> Result<Page<ServiceTransaction>, CoordinatorError> {
        self.available()?;
        let state = self.state.lock();
        let mut open: Vec<ServiceTransaction> = state
            .records
            .values()
            .filter(|r| r.safe == safe && !r.is_executed)
            .cloned()
            .collect();
        // Newest first, like the real listing.
        open.sort_by(|a, b| b.nonce.cmp(&a.nonce));

        let total = open.len();
        let start = (page.offset as usize).min(total);
        let end = start.saturating_add(page.limit as usize).min(total);
        Ok(Page {
            count: total as u64,
            next: (end < total).then(|| format!("?limit={}&offset={end}", page.limit)),
            previous: None,
            results: open[start..end].to_vec(),
        })
    }

    async fn confirm(
        &self,
        safe_tx_hash: B256,
        signature: &SafeSignature,
    ) -> Result<(), CoordinatorError> {
        self.available()?;
        let owner = signature
            .recover_signer(safe_tx_hash)
            .map_err(|_| rejected(400, "signature does not recover"))?;
        let mut state = self.state.lock();
        let record = state
            .records
            .get_mut(&safe_tx_hash)
            .ok_or_else(|| rejected(404, "unknown transaction"))?;
        add_confirmation(record, owner, signature);
        state.confirms += 1;
        Ok(())
    }
}
