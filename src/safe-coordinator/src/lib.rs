//! Lifecycle coordinator for Safe multisig transactions: check the allow-list, build and
//! sign a descriptor, propose it to the Safe Transaction Service, collect owner
//! confirmations and execute once the threshold is met.

pub mod builder;
pub mod cancel;
pub mod collector;
pub mod config;
pub mod contracts;
pub mod errors;
pub mod executor;
pub mod lifecycle;
pub mod permission;
pub mod ports;
pub mod proposal;
pub mod scanner;
pub mod service;
pub mod sessions;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use builder::{build_descriptor, verify_identifier_onchain, BuildRequest};
pub use cancel::CancelToken;
pub use collector::{Collected, CollectorState, PollPolicy, SignatureCollector};
pub use config::{ConfigError, CoordinatorConfig, Secret};
pub use errors::{
    AuthorizationError, CoordinatorError, ExecutionError, LifecycleError, Stage,
    StateConflictError, TimeoutError, TransportError, ValidationError,
};
pub use executor::Executor;
pub use lifecycle::{CoordinatorContext, Lifecycle, LifecycleReport, LifecycleSettings, WalletStatus};
pub use permission::{PermissionGate, PermissionPolicy};
pub use ports::{ChainReceipt, CoordinationService, PermissionRegistry, SafeWallet};
pub use proposal::{ProposalSubmitter, Submission, SubmissionKind};
pub use scanner::{PendingScanner, ScanEntry, ScanOutcome, ScanReport};
pub use sessions::{SafeConfigCache, SessionGuard, SessionRegistry};
