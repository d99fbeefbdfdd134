use alloy_primitives::{Address, FixedBytes};
use alloy_sol_types::SolCall;
use async_trait::async_trait;
use tracing::info;

use super::interfaces::IAuthorizer;
use super::{from_h256, receipt_succeeded, receipt_summary, ChainClient};
use crate::errors::{CoordinatorError, ExecutionError, ValidationError};
use crate::ports::{ChainReceipt, PermissionRegistry};

/// [`PermissionRegistry`] over JSON-RPC.
#[derive(Clone, Debug)]
pub struct RpcAuthorizer {
    chain: ChainClient,
    address: Address,
}

impl RpcAuthorizer {
    pub fn new(chain: ChainClient, address: Address) -> Self {
        Self { chain, address }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    async fn view<C: SolCall>(&self, call: C) -> Result<C::Return, CoordinatorError> {
        let out = self.chain.call(self.address, call.abi_encode()).await?;
        C::abi_decode_returns(&out, true).map_err(|e| {
            ValidationError::MalformedResponse(format!("{}: {e}", C::SIGNATURE)).into()
        })
    }
}

#[async_trait]
impl PermissionRegistry for RpcAuthorizer {
    async fn can_execute(
        &self,
        executor: Address,
        target: Address,
        selector: FixedBytes<4>,
    ) -> Result<bool, CoordinatorError> {
        let call = IAuthorizer::canExecuteCall {
            executor,
            target,
            selector,
        };
        Ok(self.view(call).await?._0)
    }

    async fn admin(&self) -> Result<Address, CoordinatorError> {
        Ok(self.view(IAuthorizer::adminCall {}).await?._0)
    }

    async fn set_permission(
        &self,
        executor: Address,
        target: Address,
        selector: FixedBytes<4>,
        allowed: bool,
    ) -> Result<ChainReceipt, CoordinatorError> {
        let call = IAuthorizer::setPermissionCall {
            executor,
            target,
            selector,
            allowed,
        };
        let receipt = self.chain.send(self.address, call.abi_encode()).await?;
        if !receipt_succeeded(&receipt) {
            return Err(ExecutionError::FailedOnChain {
                tx_hash: from_h256(receipt.transaction_hash),
            }
            .into());
        }
        let summary = receipt_summary(&receipt);
        info!(%executor, %target, %selector, allowed, tx_hash = %summary.tx_hash, "permission updated");
        Ok(summary)
    }

    fn sender(&self) -> Address {
        self.chain.sender()
    }
}
