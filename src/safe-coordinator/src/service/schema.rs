//! Wire shapes of the Safe Transaction Service.
//!
//! Responses are validated here: a missing required field fails deserialization and is
//! reported as a malformed response instead of surfacing deep in the coordinator.

use alloy_primitives::{Address, Bytes, B256, U256};
use safe_tx_encoder::{SafeSignature, TransactionDescriptor};
use safe_tx_types::{Confirmation, GasParams, Operation, SafeTx};
use serde::{Deserialize, Serialize, Serializer};

use crate::errors::ValidationError;

/// One multisig transaction record (`/multisig-transactions/{safeTxHash}/`).
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceTransaction {
    pub safe: Address,
    pub to: Address,
    #[serde(deserialize_with = "flex::u256")]
    pub value: U256,
    #[serde(default)]
    pub data: Option<Bytes>,
    pub operation: u8,
    #[serde(default, deserialize_with = "flex::u256")]
    pub safe_tx_gas: U256,
    #[serde(default, deserialize_with = "flex::u256")]
    pub base_gas: U256,
    #[serde(default, deserialize_with = "flex::u256")]
    pub gas_price: U256,
    #[serde(default)]
    pub gas_token: Option<Address>,
    #[serde(default)]
    pub refund_receiver: Option<Address>,
    #[serde(deserialize_with = "flex::u256")]
    pub nonce: U256,
    pub safe_tx_hash: B256,
    #[serde(default)]
    pub is_executed: bool,
    #[serde(default)]
    pub is_successful: Option<bool>,
    #[serde(default)]
    pub transaction_hash: Option<B256>,
    #[serde(default, deserialize_with = "flex::opt_u64")]
    pub confirmations_required: Option<u64>,
    #[serde(default)]
    pub confirmations: Vec<ServiceConfirmation>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceConfirmation {
    pub owner: Address,
    pub signature: Bytes,
    #[serde(default)]
    pub signature_type: Option<String>,
    #[serde(default)]
    pub submission_date: Option<String>,
}

impl ServiceTransaction {
    /// Raw Safe transaction fields as reported.
    pub fn to_safe_tx(&self) -> Result<SafeTx, ValidationError> {
        let operation = Operation::try_from(self.operation).map_err(|op| {
            ValidationError::MalformedResponse(format!("unknown operation {op}"))
        })?;
        Ok(SafeTx {
            to: self.to,
            value: self.value,
            data: self.data.clone().unwrap_or_default(),
            operation,
            gas: GasParams {
                safe_tx_gas: self.safe_tx_gas,
                base_gas: self.base_gas,
                gas_price: self.gas_price,
                gas_token: self.gas_token.unwrap_or(Address::ZERO),
                refund_receiver: self.refund_receiver.unwrap_or(Address::ZERO),
            },
            nonce: self.nonce,
        })
    }

    /// Confirmations exactly as reported, in service order.
    pub fn confirmations(&self) -> Vec<Confirmation> {
        self.confirmations
            .iter()
            .map(|c| Confirmation::new(c.owner, c.signature.clone()))
            .collect()
    }

    pub fn is_confirmed_by(&self, owner: Address) -> bool {
        self.confirmations.iter().any(|c| c.owner == owner)
    }
}

/// Paginated list response.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct Page<T> {
    #[serde(default)]
    pub count: u64,
    #[serde(default)]
    pub next: Option<String>,
    #[serde(default)]
    pub previous: Option<String>,
    pub results: Vec<T>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PageRequest {
    pub limit: u32,
    pub offset: u32,
}

/// Body of `POST /safes/{safe}/multisig-transactions/`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposalRequest {
    #[serde(serialize_with = "wire::address")]
    pub to: Address,
    #[serde(serialize_with = "wire::decimal")]
    pub value: U256,
    #[serde(serialize_with = "wire::opt_bytes")]
    pub data: Option<Bytes>,
    pub operation: u8,
    #[serde(serialize_with = "wire::decimal")]
    pub safe_tx_gas: U256,
    #[serde(serialize_with = "wire::decimal")]
    pub base_gas: U256,
    #[serde(serialize_with = "wire::decimal")]
    pub gas_price: U256,
    #[serde(serialize_with = "wire::address")]
    pub gas_token: Address,
    #[serde(serialize_with = "wire::address")]
    pub refund_receiver: Address,
    #[serde(serialize_with = "wire::decimal")]
    pub nonce: U256,
    pub contract_transaction_hash: B256,
    #[serde(serialize_with = "wire::address")]
    pub sender: Address,
    pub signature: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
}

impl ProposalRequest {
    pub fn new(
        descriptor: &TransactionDescriptor,
        sender: Address,
        signature: &SafeSignature,
        origin: Option<String>,
    ) -> Self {
        let tx = descriptor.tx();
        Self {
            to: tx.to,
            value: tx.value,
            data: (!tx.data.is_empty()).then(|| tx.data.clone()),
            operation: tx.operation.as_u8(),
            safe_tx_gas: tx.gas.safe_tx_gas,
            base_gas: tx.gas.base_gas,
            gas_price: tx.gas.gas_price,
            gas_token: tx.gas.gas_token,
            refund_receiver: tx.gas.refund_receiver,
            nonce: tx.nonce,
            contract_transaction_hash: descriptor.safe_tx_hash(),
            sender,
            signature: signature.to_hex(),
            origin,
        }
    }
}

/// Body of `POST /multisig-transactions/{safeTxHash}/confirmations/`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ConfirmationRequest {
    pub signature: String,
}

/// Whatever the service echoes after a proposal; usually empty.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ProposalEcho {
    #[serde(default)]
    pub safe_tx_hash: Option<B256>,
    #[serde(default)]
    pub contract_transaction_hash: Option<B256>,
}

impl ProposalEcho {
    pub(crate) fn identifier(&self) -> Option<B256> {
        self.safe_tx_hash.or(self.contract_transaction_hash)
    }
}

mod flex {
    use alloy_primitives::U256;
    use serde::{de::Error, Deserialize, Deserializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Numeric {
        Int(u64),
        Text(String),
    }

    pub fn u256<'de, D: Deserializer<'de>>(d: D) -> Result<U256, D::Error> {
        match Numeric::deserialize(d)? {
            Numeric::Int(n) => Ok(U256::from(n)),
            Numeric::Text(s) => s.trim().parse::<U256>().map_err(D::Error::custom),
        }
    }

    pub fn opt_u64<'de, D: Deserializer<'de>>(d: D) -> Result<Option<u64>, D::Error> {
        match Option::<Numeric>::deserialize(d)? {
            None => Ok(None),
            Some(Numeric::Int(n)) => Ok(Some(n)),
            Some(Numeric::Text(s)) => s.trim().parse::<u64>().map(Some).map_err(D::Error::custom),
        }
    }
}

mod wire {
    use super::*;

    pub fn address<S: Serializer>(a: &Address, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&a.to_checksum(None))
    }

    pub fn decimal<S: Serializer>(v: &U256, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&v.to_string())
    }

    pub fn opt_bytes<S: Serializer>(b: &Option<Bytes>, s: S) -> Result<S::Ok, S::Error> {
        match b {
            Some(b) => s.serialize_str(&format!("0x{}", hex::encode(b))),
            None => s.serialize_none(),
        }
    }
}
