//! On-chain adapters over an ethers `SignerMiddleware`.
//!
//! Calldata is encoded and decoded with the alloy `sol!` interfaces in [`interfaces`];
//! ethers only moves bytes (eth_call, signing, broadcasting, receipts). Every call is
//! bounded by a timeout.

pub mod authorizer;
pub mod interfaces;
pub mod revert;
pub mod safe;

use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::{Address, Bytes, B256, U256};
use ethers::middleware::SignerMiddleware;
use ethers::providers::{Http, Middleware, Provider};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{TransactionReceipt, TransactionRequest, H160, H256, U256 as EthU256};
use tracing::{debug, info};

use crate::errors::{CoordinatorError, TimeoutError, TransportError, ValidationError};
use crate::ports::ChainReceipt;

pub use authorizer::RpcAuthorizer;
pub use safe::RpcSafe;

pub type EthClient = SignerMiddleware<Provider<Http>, LocalWallet>;

/// Shared JSON-RPC handle with per-call and receipt timeouts.
#[derive(Clone)]
pub struct ChainClient {
    client: Arc<EthClient>,
    rpc_timeout: Duration,
    receipt_timeout: Duration,
}

impl ChainClient {
    /// Connect and bind the signing key. `chain_id` is fetched when not given.
    pub async fn connect(
        rpc_url: &str,
        private_key: &str,
        chain_id: Option<u64>,
        rpc_timeout: Duration,
        receipt_timeout: Duration,
    ) -> Result<Self, CoordinatorError> {
        let provider = Provider::<Http>::try_from(rpc_url)
            .map_err(|e| TransportError::Connection(format!("bad RPC url: {e}")))?
            .interval(Duration::from_secs(2));

        let chain_id = match chain_id {
            Some(id) => id,
            None => bounded(rpc_timeout, "eth_chainId", provider.get_chainid())
                .await?
                .map_err(|e| revert::from_middleware(&e))?
                .as_u64(),
        };

        let key = private_key.trim();
        let wallet = LocalWallet::from_str(key.strip_prefix("0x").unwrap_or(key))
            .map_err(|_| ValidationError::Signature(safe_tx_encoder::SignatureError::InvalidKey))?
            .with_chain_id(chain_id);
        info!(chain_id, sender = ?wallet.address(), "rpc client ready");

        Ok(Self {
            client: Arc::new(SignerMiddleware::new(provider, wallet)),
            rpc_timeout,
            receipt_timeout,
        })
    }

    pub fn sender(&self) -> Address {
        from_h160(self.client.address())
    }

    pub fn chain_id(&self) -> u64 {
        self.client.signer().chain_id()
    }

    pub async fn balance(&self, account: Address) -> Result<U256, CoordinatorError> {
        let balance = bounded(
            self.rpc_timeout,
            "eth_getBalance",
            self.client.get_balance(to_h160(account), None),
        )
        .await?
        .map_err(|e| revert::from_middleware(&e))?;
        Ok(from_eth_u256(balance))
    }

    /// `eth_call` from the signing account.
    pub async fn call(&self, to: Address, data: Vec<u8>) -> Result<Bytes, CoordinatorError> {
        let tx: TypedTransaction = TransactionRequest::new()
            .from(self.client.address())
            .to(to_h160(to))
            .data(data)
            .into();
        let out = bounded(self.rpc_timeout, "eth_call", self.client.call(&tx, None))
            .await?
            .map_err(|e| revert::from_middleware(&e))?;
        Ok(Bytes::from(out.to_vec()))
    }

    /// Sign, broadcast and wait for the receipt. A receipt with status 0 is returned as is;
    /// callers decide what failure means for their contract.
    pub async fn send(
        &self,
        to: Address,
        data: Vec<u8>,
    ) -> Result<TransactionReceipt, CoordinatorError> {
        let tx: TypedTransaction = TransactionRequest::new()
            .from(self.client.address())
            .to(to_h160(to))
            .data(data)
            .into();
        let pending = bounded(
            self.rpc_timeout,
            "eth_sendRawTransaction",
            self.client.send_transaction(tx, None),
        )
        .await?
        .map_err(|e| revert::from_middleware(&e))?;

        let tx_hash = from_h256(pending.tx_hash());
        debug!(%tx_hash, "transaction broadcast");

        match tokio::time::timeout(self.receipt_timeout, pending).await {
            Err(_) => Err(TimeoutError::Receipt {
                tx_hash,
                after: self.receipt_timeout,
            }
            .into()),
            Ok(Err(e)) => Err(revert::from_middleware(&e)),
            Ok(Ok(None)) => Err(TransportError::Rpc(format!("{tx_hash} dropped from mempool")).into()),
            Ok(Ok(Some(receipt))) => Ok(receipt),
        }
    }
}

impl fmt::Debug for ChainClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChainClient")
            .field("sender", &self.sender())
            .field("rpc_timeout", &self.rpc_timeout)
            .field("receipt_timeout", &self.receipt_timeout)
            .finish_non_exhaustive()
    }
}

async fn bounded<F: Future>(
    limit: Duration,
    endpoint: &'static str,
    fut: F,
) -> Result<F::Output, CoordinatorError> {
    tokio::time::timeout(limit, fut).await.map_err(|_| {
        TransportError::TimedOut {
            endpoint,
            after: limit,
        }
        .into()
    })
}

pub(crate) fn receipt_summary(receipt: &TransactionReceipt) -> ChainReceipt {
    ChainReceipt {
        tx_hash: from_h256(receipt.transaction_hash),
        block_number: receipt.block_number.map(|b| b.as_u64()),
        gas_used: receipt.gas_used.map(from_eth_u256).unwrap_or_default(),
        effective_gas_price: receipt.effective_gas_price.map(from_eth_u256),
    }
}

pub(crate) fn receipt_succeeded(receipt: &TransactionReceipt) -> bool {
    receipt.status.map(|s| s.as_u64() == 1).unwrap_or(false)
}

pub(crate) fn to_h160(address: Address) -> H160 {
    H160::from_slice(address.as_slice())
}

pub(crate) fn from_h160(address: H160) -> Address {
    Address::from_slice(address.as_bytes())
}

pub(crate) fn from_h256(hash: H256) -> B256 {
    B256::from(hash.0)
}

pub(crate) fn from_eth_u256(value: EthU256) -> U256 {
    let mut buf = [0u8; 32];
    value.to_big_endian(&mut buf);
    U256::from_be_bytes(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::address;
    use ethers::types::{Log, U64};

    #[test]
    fn converts_between_type_families() {
        let a = address!("7e5f4552091a69125d5dfcb7b8c2659029395bdf");
        assert_eq!(from_h160(to_h160(a)), a);
        assert_eq!(
            from_eth_u256(EthU256::from(1_000_000_000_000_000u64)),
            U256::from(1_000_000_000_000_000u64)
        );
        assert_eq!(from_h256(H256::repeat_byte(7)), B256::repeat_byte(7));
    }

    #[test]
    fn receipt_status_and_summary() {
        let receipt = TransactionReceipt {
            transaction_hash: H256::repeat_byte(1),
            block_number: Some(U64::from(42u64)),
            gas_used: Some(EthU256::from(21_000u64)),
            status: Some(U64::from(1u64)),
            logs: Vec::<Log>::new(),
            ..Default::default()
        };
        assert!(receipt_succeeded(&receipt));
        let summary = receipt_summary(&receipt);
        assert_eq!(summary.block_number, Some(42));
        assert_eq!(summary.gas_used, U256::from(21_000u64));

        let failed = TransactionReceipt {
            status: Some(U64::zero()),
            ..receipt
        };
        assert!(!receipt_succeeded(&failed));
    }
}
