//! Transaction descriptor construction.

use alloy_primitives::{Address, Bytes, U256};
use safe_tx_encoder::TransactionDescriptor;
use safe_tx_types::{GasParams, Operation, SafeDomain, SafeTx};
use tracing::debug;

use crate::errors::{CoordinatorError, ValidationError};
use crate::ports::SafeWallet;

/// What the caller wants executed; the nonce comes from the wallet.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BuildRequest {
    pub to: Address,
    pub value: U256,
    pub data: Bytes,
    pub operation: Operation,
    pub gas: GasParams,
    /// Permit `to == 0x0` (contract creation style calls).
    pub allow_null_target: bool,
}

impl BuildRequest {
    pub fn call(to: Address, value: U256, data: Bytes) -> Self {
        Self {
            to,
            value,
            data,
            operation: Operation::Call,
            gas: GasParams::neutral(),
            allow_null_target: false,
        }
    }

    pub fn with_operation(mut self, operation: Operation) -> Self {
        self.operation = operation;
        self
    }

    pub fn with_gas(mut self, gas: GasParams) -> Self {
        self.gas = gas;
        self
    }

    pub fn allow_null_target(mut self) -> Self {
        self.allow_null_target = true;
        self
    }
}

/// Read the current nonce and derive the descriptor. The zero-target check runs before
/// any network read.
pub async fn build_descriptor(
    wallet: &dyn SafeWallet,
    domain: SafeDomain,
    request: BuildRequest,
) -> Result<TransactionDescriptor, CoordinatorError> {
    if request.to == Address::ZERO && !request.allow_null_target {
        return Err(ValidationError::InvalidTarget.into());
    }
    let nonce = wallet.nonce().await?;
    let tx = SafeTx {
        to: request.to,
        value: request.value,
        data: request.data,
        operation: request.operation,
        gas: request.gas,
        nonce,
    };
    let descriptor = TransactionDescriptor::checked(domain, tx, request.allow_null_target)?;
    debug!(safe_tx_hash = %descriptor.safe_tx_hash(), %nonce, "descriptor built");
    Ok(descriptor)
}

/// Compare the local identifier with the wallet's own `getTransactionHash`.
pub async fn verify_identifier_onchain(
    wallet: &dyn SafeWallet,
    descriptor: &TransactionDescriptor,
) -> Result<(), CoordinatorError> {
    let reported = wallet.transaction_hash(descriptor.tx()).await?;
    descriptor.verify_identifier(reported)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeWallet;
    use alloy_primitives::{address, b256};

    const SAFE: Address = address!("5afe00000000000000000000000000000000cafe");
    const TO: Address = address!("7e5f4552091a69125d5dfcb7b8c2659029395bdf");

    fn wallet() -> FakeWallet {
        let wallet = FakeWallet::new(SAFE, vec![TO], 1);
        wallet.set_nonce(7);
        wallet
    }

    #[tokio::test]
    async fn uses_current_nonce_and_canonical_hash() {
        let wallet = wallet();
        let domain = SafeDomain::new(11_155_111, SAFE);
        let request = BuildRequest::call(TO, U256::from(1_000_000_000_000_000u64), Bytes::new());

        let descriptor = build_descriptor(&wallet, domain, request.clone()).await.unwrap();
        assert_eq!(descriptor.nonce(), U256::from(7u64));
        assert_eq!(
            descriptor.safe_tx_hash(),
            b256!("1e2f01c1244f61ecbecd6f9d60b142ca0249d2ef18357d6a0c96e6e9f292bcd2")
        );

        let again = build_descriptor(&wallet, domain, request).await.unwrap();
        assert_eq!(again.safe_tx_hash(), descriptor.safe_tx_hash());
        verify_identifier_onchain(&wallet, &descriptor).await.unwrap();
    }

    #[tokio::test]
    async fn zero_target_is_rejected_without_reading_the_wallet() {
        let wallet = wallet();
        let domain = SafeDomain::new(11_155_111, SAFE);
        let request = BuildRequest::call(Address::ZERO, U256::ZERO, Bytes::new());

        assert_eq!(
            build_descriptor(&wallet, domain, request.clone()).await,
            Err(CoordinatorError::Validation(ValidationError::InvalidTarget))
        );
        assert!(wallet.calls().is_empty());

        let allowed = build_descriptor(&wallet, domain, request.allow_null_target()).await;
        assert!(allowed.is_ok());
    }
}
