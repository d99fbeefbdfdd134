//! Signature collector: polls the coordination service for one `safeTxHash` until the
//! reported confirmations reach the threshold.
//!
//! ```text
//!            fetch ok, count < threshold
//!            transient error (< max in a row)
//!                 +---------+
//!                 v         |
//!   start --> POLLING ------+
//!               |  |  \
//!  count >= thr |  |   \ attempts exhausted / deadline
//!               v  |    v
//!   QUORUM_REACHED |   TIMED_OUT
//!                  v
//!                FAILED  (errors in a row, malformed, mismatched, executed)
//! ```
//!
//! The collector does not validate signatures; the executor does. Cancellation is
//! observed between ticks only, never during a fetch.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::{Address, B256};
use safe_tx_types::Confirmation;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::cancel::CancelToken;
use crate::errors::{
    CoordinatorError, StateConflictError, TimeoutError, TransportError, ValidationError,
};
use crate::ports::CoordinationService;
use crate::service::ServiceTransaction;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
    /// Transient fetch failures absorbed in a row before giving up.
    pub max_consecutive_errors: u32,
    /// Bound on a single fetch.
    pub fetch_timeout: Duration,
    /// Optional wall-clock bound on the whole session.
    pub deadline: Option<Duration>,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            max_attempts: 120,
            max_consecutive_errors: 5,
            fetch_timeout: Duration::from_secs(10),
            deadline: None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CollectorState {
    Polling,
    QuorumReached,
    TimedOut,
    Failed,
}

impl CollectorState {
    pub fn is_terminal(self) -> bool {
        self != CollectorState::Polling
    }
}

/// Result of a session that reached quorum.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Collected {
    /// Last record fetched.
    pub record: ServiceTransaction,
    /// Confirmations exactly as reported.
    pub confirmations: Vec<Confirmation>,
    pub attempts: u32,
}

pub struct SignatureCollector {
    service: Arc<dyn CoordinationService>,
    safe_tx_hash: B256,
    threshold: u64,
    policy: PollPolicy,
    state: CollectorState,
    attempts: u32,
    consecutive_errors: u32,
    seen: BTreeSet<Address>,
    started: Option<Instant>,
}

impl SignatureCollector {
    pub fn new(
        service: Arc<dyn CoordinationService>,
        safe_tx_hash: B256,
        threshold: u64,
        policy: PollPolicy,
    ) -> Self {
        Self {
            service,
            safe_tx_hash,
            threshold: threshold.max(1),
            policy,
            state: CollectorState::Polling,
            attempts: 0,
            consecutive_errors: 0,
            seen: BTreeSet::new(),
            started: None,
        }
    }

    pub fn state(&self) -> CollectorState {
        self.state
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Distinct owners seen on the last successful fetch.
    pub fn observed(&self) -> &BTreeSet<Address> {
        &self.seen
    }

    /// Drive the session to a terminal state.
    pub async fn run(&mut self, cancel: &CancelToken) -> Result<Collected, CoordinatorError> {
        info!(
            safe_tx_hash = %self.safe_tx_hash,
            threshold = self.threshold,
            max_attempts = self.policy.max_attempts,
            "collecting confirmations"
        );
        loop {
            if cancel.is_cancelled() {
                info!(safe_tx_hash = %self.safe_tx_hash, attempts = self.attempts, "collection cancelled");
                return Err(CoordinatorError::Cancelled);
            }
            if let Some(outcome) = self.tick().await {
                return outcome;
            }
            tokio::select! {
                _ = tokio::time::sleep(self.policy.interval) => {}
                _ = cancel.cancelled() => {
                    info!(safe_tx_hash = %self.safe_tx_hash, attempts = self.attempts, "collection cancelled");
                    return Err(CoordinatorError::Cancelled);
                }
            }
        }
    }

    /// One fetch and the resulting transition. `None` while still polling.
    pub async fn tick(&mut self) -> Option<Result<Collected, CoordinatorError>> {
        if self.state.is_terminal() {
            return Some(Err(CoordinatorError::Validation(
                ValidationError::MalformedResponse("collector already finished".into()),
            )));
        }
        let started = *self.started.get_or_insert_with(Instant::now);
        self.attempts += 1;
        let attempt = self.attempts;

        let fetched = match tokio::time::timeout(
            self.policy.fetch_timeout,
            self.service.transaction(self.safe_tx_hash),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(TransportError::TimedOut {
                endpoint: "transaction",
                after: self.policy.fetch_timeout,
            }
            .into()),
        };

        match fetched {
            Ok(Some(record)) => {
                self.consecutive_errors = 0;
                if let Some(outcome) = self.observe(record, attempt) {
                    return Some(outcome);
                }
            }
            Ok(None) => {
                self.consecutive_errors = 0;
                debug!(safe_tx_hash = %self.safe_tx_hash, attempt, "not indexed yet");
            }
            Err(err) if err.is_transport() => {
                self.consecutive_errors += 1;
                warn!(
                    safe_tx_hash = %self.safe_tx_hash,
                    attempt,
                    consecutive = self.consecutive_errors,
                    error = %err,
                    "poll failed"
                );
                if self.consecutive_errors >= self.policy.max_consecutive_errors {
                    return Some(self.fail(err));
                }
            }
            Err(err) => return Some(self.fail(err)),
        }

        if attempt >= self.policy.max_attempts {
            return Some(self.time_out(
                TimeoutError::PollExhausted {
                    attempts: attempt,
                    observed: self.seen.len(),
                    threshold: self.threshold,
                }
                .into(),
            ));
        }
        if let Some(deadline) = self.policy.deadline {
            let elapsed = started.elapsed();
            if elapsed >= deadline {
                return Some(self.time_out(
                    TimeoutError::DeadlineElapsed {
                        attempts: attempt,
                        elapsed,
                    }
                    .into(),
                ));
            }
        }
        None
    }

    fn observe(
        &mut self,
        record: ServiceTransaction,
        attempt: u32,
    ) -> Option<Result<Collected, CoordinatorError>> {
        if record.safe_tx_hash != self.safe_tx_hash {
            return Some(self.fail(
                ValidationError::IdentifierMismatch {
                    computed: self.safe_tx_hash,
                    reported: record.safe_tx_hash,
                }
                .into(),
            ));
        }
        if record.is_executed {
            return Some(self.fail(StateConflictError::AlreadyExecuted(self.safe_tx_hash).into()));
        }

        // The service may reorder confirmations between polls; compare as sets.
        let current: BTreeSet<Address> = record.confirmations.iter().map(|c| c.owner).collect();
        if current != self.seen {
            let added: Vec<Address> = current.difference(&self.seen).copied().collect();
            let removed: Vec<Address> = self.seen.difference(&current).copied().collect();
            info!(
                safe_tx_hash = %self.safe_tx_hash,
                attempt,
                confirmations = current.len(),
                threshold = self.threshold,
                ?added,
                ?removed,
                "confirmations changed"
            );
            self.seen = current;
        } else {
            debug!(safe_tx_hash = %self.safe_tx_hash, attempt, confirmations = self.seen.len(), "no change");
        }

        if self.seen.len() as u64 >= self.threshold {
            self.state = CollectorState::QuorumReached;
            info!(safe_tx_hash = %self.safe_tx_hash, attempt, "quorum reached");
            let confirmations = record.confirmations();
            return Some(Ok(Collected {
                record,
                confirmations,
                attempts: attempt,
            }));
        }
        None
    }

    fn fail(&mut self, err: CoordinatorError) -> Result<Collected, CoordinatorError> {
        self.state = CollectorState::Failed;
        warn!(safe_tx_hash = %self.safe_tx_hash, attempts = self.attempts, error = %err, "collection failed");
        Err(err)
    }

    fn time_out(&mut self, err: CoordinatorError) -> Result<Collected, CoordinatorError> {
        self.state = CollectorState::TimedOut;
        warn!(safe_tx_hash = %self.safe_tx_hash, attempts = self.attempts, error = %err, "collection timed out");
        Err(err)
    }
}
