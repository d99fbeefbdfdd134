//! Permission gate over the external allow-list.

use std::sync::Arc;

use alloy_primitives::{Address, FixedBytes};
use tracing::{info, warn};

use crate::errors::{AuthorizationError, CoordinatorError};
use crate::ports::{ChainReceipt, PermissionRegistry};

/// What to do when the allow-list cannot be queried.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PermissionPolicy {
    /// Unavailable means denied.
    #[default]
    FailClosed,
    /// Unavailable means allowed. Explicit opt-in for non-critical flows only.
    FailOpen,
}

#[derive(Clone)]
pub struct PermissionGate {
    registry: Arc<dyn PermissionRegistry>,
    policy: PermissionPolicy,
}

impl PermissionGate {
    pub fn new(registry: Arc<dyn PermissionRegistry>, policy: PermissionPolicy) -> Self {
        Self { registry, policy }
    }

    pub fn policy(&self) -> PermissionPolicy {
        self.policy
    }

    /// Raw allow-list answer. `Ok(false)` is a normal result; any failure to ask becomes
    /// [`AuthorizationError::PermissionCheckUnavailable`].
    pub async fn check_permission(
        &self,
        executor: Address,
        target: Address,
        selector: FixedBytes<4>,
    ) -> Result<bool, CoordinatorError> {
        self.registry
            .can_execute(executor, target, selector)
            .await
            .map_err(|e| AuthorizationError::PermissionCheckUnavailable(e.to_string()).into())
    }

    /// Check and apply the policy: denied is an error, unavailable is an error unless
    /// the gate is fail-open.
    pub async fn authorize(
        &self,
        executor: Address,
        target: Address,
        selector: FixedBytes<4>,
    ) -> Result<(), CoordinatorError> {
        match self.check_permission(executor, target, selector).await {
            Ok(true) => Ok(()),
            Ok(false) => Err(AuthorizationError::PermissionDenied {
                executor,
                target,
                selector,
            }
            .into()),
            Err(err) if self.policy == PermissionPolicy::FailOpen => {
                warn!(%executor, %target, %selector, error = %err, "permission check unavailable, continuing (fail-open)");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    /// Grant `executor` on `target`/`selector`. The sending account must be the allow-list
    /// admin; this is checked before any transaction is sent.
    pub async fn grant_permission(
        &self,
        executor: Address,
        target: Address,
        selector: FixedBytes<4>,
    ) -> Result<ChainReceipt, CoordinatorError> {
        let sender = self.registry.sender();
        let admin = self.registry.admin().await?;
        if admin != sender {
            return Err(AuthorizationError::Unauthorized {
                account: sender,
                reason: format!("allow-list admin is {admin}"),
            }
            .into());
        }
        match self
            .registry
            .set_permission(executor, target, selector, true)
            .await
        {
            Ok(receipt) => {
                info!(%executor, %target, %selector, tx_hash = %receipt.tx_hash, "permission granted");
                Ok(receipt)
            }
            Err(CoordinatorError::Execution(err)) => Err(AuthorizationError::Unauthorized {
                account: sender,
                reason: err.to_string(),
            }
            .into()),
            Err(err) => Err(err),
        }
    }

    /// [`Self::authorize`], optionally granting and re-checking once when denied.
    pub async fn ensure_permission(
        &self,
        executor: Address,
        target: Address,
        selector: FixedBytes<4>,
        auto_grant: bool,
    ) -> Result<(), CoordinatorError> {
        match self.authorize(executor, target, selector).await {
            Err(CoordinatorError::Authorization(AuthorizationError::PermissionDenied { .. }))
                if auto_grant =>
            {
                info!(%executor, %target, %selector, "permission denied, requesting grant");
                self.grant_permission(executor, target, selector).await?;
                self.authorize(executor, target, selector).await
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakePermissions;

    const SELECTOR: FixedBytes<4> = FixedBytes::ZERO;

    fn parties() -> (Address, Address, Address) {
        (
            Address::repeat_byte(0xad),
            Address::repeat_byte(0xb0),
            Address::repeat_byte(0x5a),
        )
    }

    #[tokio::test]
    async fn denial_is_a_value_not_an_error() {
        let (admin, bot, safe) = parties();
        let registry = Arc::new(FakePermissions::new(admin, admin));
        let gate = PermissionGate::new(registry, PermissionPolicy::FailClosed);
        assert_eq!(gate.check_permission(bot, safe, SELECTOR).await, Ok(false));
        assert!(matches!(
            gate.authorize(bot, safe, SELECTOR).await,
            Err(CoordinatorError::Authorization(AuthorizationError::PermissionDenied { .. }))
        ));
    }

    #[tokio::test]
    async fn unavailable_check_fails_closed_by_default() {
        let (admin, bot, safe) = parties();
        let registry = Arc::new(FakePermissions::new(admin, admin));
        registry.set_unavailable(true);

        let closed = PermissionGate::new(registry.clone(), PermissionPolicy::FailClosed);
        assert!(matches!(
            closed.authorize(bot, safe, SELECTOR).await,
            Err(CoordinatorError::Authorization(
                AuthorizationError::PermissionCheckUnavailable(_)
            ))
        ));

        let open = PermissionGate::new(registry, PermissionPolicy::FailOpen);
        assert_eq!(open.authorize(bot, safe, SELECTOR).await, Ok(()));
    }

    #[tokio::test]
    async fn grant_then_recheck() {
        let (admin, bot, safe) = parties();
        let registry = Arc::new(FakePermissions::new(admin, admin));
        let gate = PermissionGate::new(registry.clone(), PermissionPolicy::FailClosed);

        gate.ensure_permission(bot, safe, SELECTOR, true).await.unwrap();
        assert_eq!(registry.grants(), 1);
        assert_eq!(gate.check_permission(bot, safe, SELECTOR).await, Ok(true));
    }

    #[tokio::test]
    async fn grant_requires_admin_and_sends_nothing_otherwise() {
        let (admin, bot, safe) = parties();
        let registry = Arc::new(FakePermissions::new(admin, bot));
        let gate = PermissionGate::new(registry.clone(), PermissionPolicy::FailClosed);

        assert!(matches!(
            gate.grant_permission(bot, safe, SELECTOR).await,
            Err(CoordinatorError::Authorization(AuthorizationError::Unauthorized { .. }))
        ));
        assert_eq!(registry.grants(), 0);
        assert!(matches!(
            gate.ensure_permission(bot, safe, SELECTOR, false).await,
            Err(CoordinatorError::Authorization(AuthorizationError::PermissionDenied { .. }))
        ));
    }
}
