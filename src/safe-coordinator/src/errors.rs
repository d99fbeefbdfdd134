//! Error taxonomy of the coordinator.
//!
//! Every fallible operation returns [`CoordinatorError`]. Orchestrated lifecycles wrap
//! terminal failures in [`LifecycleError`] so the failing stage and the transaction
//! identifier always travel with the cause.

use std::fmt;
use std::time::Duration;

use alloy_primitives::{Address, FixedBytes, B256, U256};
use safe_tx_encoder::{AggregateError, DescriptorError, SignatureError};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoordinatorError {
    /// Network or service layer failure; retryable.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Malformed or mismatched data; fatal.
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    /// The acting identity may not perform the operation; fatal for that identity.
    #[error("authorization error: {0}")]
    Authorization(#[from] AuthorizationError),

    /// Expected race with another party (nonce moved, threshold changed).
    #[error("state conflict: {0}")]
    StateConflict(#[from] StateConflictError),

    /// Bounded wait elapsed; the caller may resume with the same identifier.
    #[error("timeout: {0}")]
    Timeout(#[from] TimeoutError),

    /// The Safe transaction itself failed.
    #[error("execution error: {0}")]
    Execution(#[from] ExecutionError),

    #[error("cancelled")]
    Cancelled,
}

impl CoordinatorError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Timeout(_))
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

impl From<SignatureError> for CoordinatorError {
    fn from(err: SignatureError) -> Self {
        Self::Validation(ValidationError::Signature(err))
    }
}

impl From<DescriptorError> for CoordinatorError {
    fn from(err: DescriptorError) -> Self {
        Self::Validation(err.into())
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("{endpoint} did not answer within {after:?}")]
    TimedOut {
        endpoint: &'static str,
        after: Duration,
    },

    #[error("http {status} from {url}: {body}")]
    Http { status: u16, url: String, body: String },

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("rpc failure: {0}")]
    Rpc(String),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("target is the zero address")]
    InvalidTarget,

    #[error("identifier mismatch: computed {computed}, reported {reported}")]
    IdentifierMismatch { computed: B256, reported: B256 },

    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("service rejected request ({status}): {body}")]
    ServiceRejected { status: u16, body: String },

    #[error("transaction {0} is unknown to the coordination service")]
    UnknownTransaction(B256),

    #[error("invalid signature: {0}")]
    Signature(SignatureError),

    #[error("invalid confirmation from {owner}: {source}")]
    Confirmation {
        owner: Address,
        source: SignatureError,
    },

    #[error("invalid wallet configuration: {0}")]
    WalletConfig(#[from] AggregateError),
}

impl From<DescriptorError> for ValidationError {
    fn from(err: DescriptorError) -> Self {
        match err {
            DescriptorError::InvalidTarget => Self::InvalidTarget,
            DescriptorError::IdentifierMismatch { computed, reported } => {
                Self::IdentifierMismatch { computed, reported }
            }
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthorizationError {
    #[error("{executor} may not execute selector {selector} on {target}")]
    PermissionDenied {
        executor: Address,
        target: Address,
        selector: FixedBytes<4>,
    },

    /// The allow-list could not be queried; treated as a denial unless fail-open is configured.
    #[error("permission check unavailable: {0}")]
    PermissionCheckUnavailable(String),

    #[error("{account} is not authorized: {reason}")]
    Unauthorized { account: Address, reason: String },

    #[error("{0} is not an owner of the wallet")]
    NotAnOwner(Address),

    /// Safe rejected the signature set (`GS020`..`GS026`).
    #[error("signatures rejected by the wallet ({code})")]
    SignaturesRejected { code: String },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StateConflictError {
    #[error("nonce {expected} is stale, wallet is at {current}")]
    SequenceNumberStale { expected: U256, current: U256 },

    #[error("nonce {expected} is not current yet, wallet is at {current}")]
    SequenceNumberAhead { expected: U256, current: U256 },

    #[error("{valid} valid owner signatures, threshold is {threshold}")]
    InsufficientSignatures { valid: u64, threshold: u64 },

    #[error("transaction {0} was already executed")]
    AlreadyExecuted(B256),

    #[error("transaction {0} is already being coordinated")]
    SessionActive(B256),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TimeoutError {
    #[error("no quorum after {attempts} polls ({observed}/{threshold} confirmations)")]
    PollExhausted {
        attempts: u32,
        observed: usize,
        threshold: u64,
    },

    #[error("no quorum within {elapsed:?} ({attempts} polls)")]
    DeadlineElapsed { attempts: u32, elapsed: Duration },

    #[error("no receipt for {tx_hash} within {after:?}")]
    Receipt { tx_hash: B256, after: Duration },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExecutionError {
    #[error("execution reverted{}: {reason}", display_code(.code))]
    Reverted { code: Option<String>, reason: String },

    #[error("transaction {tx_hash} was mined but the Safe call failed")]
    FailedOnChain { tx_hash: B256 },
}

/// Stage of a transaction lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Stage {
    Permission,
    Build,
    Sign,
    Propose,
    Collect,
    Execute,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Permission => "permission",
            Stage::Build => "build",
            Stage::Sign => "sign",
            Stage::Propose => "propose",
            Stage::Collect => "collect",
            Stage::Execute => "execute",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal failure of an orchestrated lifecycle.
///
/// `safe_tx_hash` is `None` only for failures before the descriptor exists.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{stage} stage failed for {}: {source}", display_hash(.safe_tx_hash))]
pub struct LifecycleError {
    pub stage: Stage,
    pub safe_tx_hash: Option<B256>,
    #[source]
    pub source: CoordinatorError,
}

impl LifecycleError {
    pub fn new(stage: Stage, safe_tx_hash: Option<B256>, source: CoordinatorError) -> Self {
        Self {
            stage,
            safe_tx_hash,
            source,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.source.is_retryable()
    }
}

fn display_code(code: &Option<String>) -> String {
    code.as_deref().map(|c| format!(" ({c})")).unwrap_or_default()
}

fn display_hash(hash: &Option<B256>) -> String {
    match hash {
        Some(h) => h.to_string(),
        None => "<no identifier>".to_string(),
    }
}
