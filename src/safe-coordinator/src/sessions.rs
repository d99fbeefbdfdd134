//! State shared between concurrent lifecycles: the set of identifiers currently being
//! polled or executed, and a read-only wallet configuration cache.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::B256;
use parking_lot::Mutex;
use safe_tx_types::SafeConfig;
use tokio::time::Instant;
use tracing::debug;

use crate::errors::{CoordinatorError, StateConflictError};
use crate::ports::SafeWallet;

/// At most one session per `safeTxHash`.
#[derive(Clone, Debug, Default)]
pub struct SessionRegistry {
    active: Arc<Mutex<HashSet<B256>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_acquire(&self, safe_tx_hash: B256) -> Result<SessionGuard, StateConflictError> {
        let mut active = self.active.lock();
        if !active.insert(safe_tx_hash) {
            return Err(StateConflictError::SessionActive(safe_tx_hash));
        }
        Ok(SessionGuard {
            registry: self.active.clone(),
            safe_tx_hash,
        })
    }

    pub fn is_active(&self, safe_tx_hash: B256) -> bool {
        self.active.lock().contains(&safe_tx_hash)
    }
}

/// Releases the identifier on drop.
#[derive(Debug)]
pub struct SessionGuard {
    registry: Arc<Mutex<HashSet<B256>>>,
    safe_tx_hash: B256,
}

impl SessionGuard {
    pub fn safe_tx_hash(&self) -> B256 {
        self.safe_tx_hash
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.registry.lock().remove(&self.safe_tx_hash);
    }
}

/// Owners and threshold, re-read after `ttl`. Never used for the final pre-execution check.
#[derive(Clone, Debug)]
pub struct SafeConfigCache {
    ttl: Duration,
    entry: Arc<Mutex<Option<(SafeConfig, Instant)>>>,
}

impl SafeConfigCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entry: Arc::new(Mutex::new(None)),
        }
    }

    pub async fn get(&self, wallet: &dyn SafeWallet) -> Result<SafeConfig, CoordinatorError> {
        if let Some(config) = self.fresh() {
            return Ok(config);
        }
        let config = wallet.config().await?;
        debug!(threshold = config.threshold, owners = config.owners.len(), "wallet config refreshed");
        *self.entry.lock() = Some((config.clone(), Instant::now()));
        Ok(config)
    }

    pub fn invalidate(&self) {
        *self.entry.lock() = None;
    }

    fn fresh(&self) -> Option<SafeConfig> {
        let entry = self.entry.lock();
        match entry.as_ref() {
            Some((config, at)) if at.elapsed() < self.ttl => Some(config.clone()),
            _ => None,
        }
    }
}
