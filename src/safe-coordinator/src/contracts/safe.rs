use alloy_primitives::{Address, Bytes, B256, U256};
use alloy_sol_types::{SolCall, SolEvent};
use async_trait::async_trait;
use safe_tx_types::SafeTx;
use tracing::{info, warn};

use super::interfaces::ISafe;
use super::{from_h160, from_h256, receipt_succeeded, receipt_summary, ChainClient};
use crate::errors::{CoordinatorError, ExecutionError, ValidationError};
use crate::ports::{ChainReceipt, SafeWallet};

/// [`SafeWallet`] over JSON-RPC.
#[derive(Clone, Debug)]
pub struct RpcSafe {
    chain: ChainClient,
    address: Address,
}

impl RpcSafe {
    pub fn new(chain: ChainClient, address: Address) -> Self {
        Self { chain, address }
    }

    async fn view<C: SolCall>(&self, call: C) -> Result<C::Return, CoordinatorError> {
        let out = self.chain.call(self.address, call.abi_encode()).await?;
        C::abi_decode_returns(&out, true).map_err(|e| {
            ValidationError::MalformedResponse(format!("{}: {e}", C::SIGNATURE)).into()
        })
    }
}

fn exec_call(tx: &SafeTx, signatures: &Bytes) -> ISafe::execTransactionCall {
    ISafe::execTransactionCall {
        to: tx.to,
        value: tx.value,
        data: tx.data.clone(),
        operation: tx.operation.as_u8(),
        safeTxGas: tx.gas.safe_tx_gas,
        baseGas: tx.gas.base_gas,
        gasPrice: tx.gas.gas_price,
        gasToken: tx.gas.gas_token,
        refundReceiver: tx.gas.refund_receiver,
        signatures: signatures.clone(),
    }
}

fn to_u64(value: U256, what: &str) -> Result<u64, CoordinatorError> {
    u64::try_from(value)
        .map_err(|_| ValidationError::MalformedResponse(format!("{what} out of range: {value}")).into())
}

#[async_trait]
impl SafeWallet for RpcSafe {
    fn address(&self) -> Address {
        self.address
    }

    async fn chain_id(&self) -> Result<u64, CoordinatorError> {
        Ok(self.chain.chain_id())
    }

    async fn nonce(&self) -> Result<U256, CoordinatorError> {
        Ok(self.view(ISafe::nonceCall {}).await?._0)
    }

    async fn owners(&self) -> Result<Vec<Address>, CoordinatorError> {
        Ok(self.view(ISafe::getOwnersCall {}).await?._0)
    }

    async fn threshold(&self) -> Result<u64, CoordinatorError> {
        to_u64(self.view(ISafe::getThresholdCall {}).await?._0, "threshold")
    }

    async fn balance(&self) -> Result<U256, CoordinatorError> {
        self.chain.balance(self.address).await
    }

    async fn transaction_hash(&self, tx: &SafeTx) -> Result<B256, CoordinatorError> {
        let call = ISafe::getTransactionHashCall {
            to: tx.to,
            value: tx.value,
            data: tx.data.clone(),
            operation: tx.operation.as_u8(),
            safeTxGas: tx.gas.safe_tx_gas,
            baseGas: tx.gas.base_gas,
            gasPrice: tx.gas.gas_price,
            gasToken: tx.gas.gas_token,
            refundReceiver: tx.gas.refund_receiver,
            _nonce: tx.nonce,
        };
        Ok(self.view(call).await?._0)
    }

    async fn simulate(&self, tx: &SafeTx, signatures: &Bytes) -> Result<(), CoordinatorError> {
        let ret = self.view(exec_call(tx, signatures)).await?;
        if !ret.success {
            return Err(ExecutionError::Reverted {
                code: None,
                reason: "execTransaction returned false".into(),
            }
            .into());
        }
        Ok(())
    }

    async fn execute(
        &self,
        tx: &SafeTx,
        signatures: &Bytes,
    ) -> Result<ChainReceipt, CoordinatorError> {
        let call = exec_call(tx, signatures);
        let receipt = self.chain.send(self.address, call.abi_encode()).await?;
        let tx_hash = from_h256(receipt.transaction_hash);

        let failure_logged = receipt.logs.iter().any(|log| {
            from_h160(log.address) == self.address
                && log
                    .topics
                    .first()
                    .map(|t| from_h256(*t) == ISafe::ExecutionFailure::SIGNATURE_HASH)
                    .unwrap_or(false)
        });
        if !receipt_succeeded(&receipt) || failure_logged {
            warn!(%tx_hash, failure_logged, "execTransaction failed on chain");
            return Err(ExecutionError::FailedOnChain { tx_hash }.into());
        }

        let summary = receipt_summary(&receipt);
        info!(%tx_hash, block = ?summary.block_number, gas_used = %summary.gas_used, "execTransaction mined");
        Ok(summary)
    }
}
