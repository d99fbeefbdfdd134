//! EIP-712 digest of a Safe transaction (`safeTxHash`).
//!
//! Must match `Safe.getTransactionHash` byte for byte: owners sign this value, and the
//! wallet recomputes it from the execution arguments before checking signatures.

use alloy_primitives::{Address, B256, U256};
use safe_tx_types::{SafeDomain, SafeTx};
use sha3::{Digest, Keccak256};

/// Domain type of Safe >= 1.3.0 (no name/version fields).
pub const DOMAIN_TYPE: &[u8] = b"EIP712Domain(uint256 chainId,address verifyingContract)";

pub const SAFE_TX_TYPE: &[u8] = b"SafeTx(address to,uint256 value,bytes data,uint8 operation,uint256 safeTxGas,uint256 baseGas,uint256 gasPrice,address gasToken,address refundReceiver,uint256 nonce)";

pub fn keccak256_bytes(bytes: &[u8]) -> B256 {
    let mut h = Keccak256::new();
    h.update(bytes);
    B256::from_slice(&h.finalize())
}

fn address_word(address: Address) -> [u8; 32] {
    let mut padded = [0u8; 32];
    padded[12..32].copy_from_slice(address.as_slice());
    padded
}

pub fn domain_separator(domain: &SafeDomain) -> B256 {
    let mut buf = Vec::with_capacity(32 * 3);
    buf.extend_from_slice(keccak256_bytes(DOMAIN_TYPE).as_slice());
    buf.extend_from_slice(&U256::from(domain.chain_id).to_be_bytes::<32>());
    buf.extend_from_slice(&address_word(domain.safe));
    keccak256_bytes(&buf)
}

/// `hashStruct(SafeTx)`; `data` enters as its keccak, `operation` as a uint8 word.
pub fn safe_tx_struct_hash(tx: &SafeTx) -> B256 {
    let mut buf = Vec::with_capacity(32 * 11);
    buf.extend_from_slice(keccak256_bytes(SAFE_TX_TYPE).as_slice());
    buf.extend_from_slice(&address_word(tx.to));
    buf.extend_from_slice(&tx.value.to_be_bytes::<32>());
    buf.extend_from_slice(keccak256_bytes(&tx.data).as_slice());
    buf.extend_from_slice(&U256::from(tx.operation.as_u8()).to_be_bytes::<32>());
    buf.extend_from_slice(&tx.gas.safe_tx_gas.to_be_bytes::<32>());
    buf.extend_from_slice(&tx.gas.base_gas.to_be_bytes::<32>());
    buf.extend_from_slice(&tx.gas.gas_price.to_be_bytes::<32>());
    buf.extend_from_slice(&address_word(tx.gas.gas_token));
    buf.extend_from_slice(&address_word(tx.gas.refund_receiver));
    buf.extend_from_slice(&tx.nonce.to_be_bytes::<32>());
    keccak256_bytes(&buf)
}

/// Compute the `safeTxHash` for `tx` executed by the Safe in `domain`.
pub fn safe_tx_hash(domain: &SafeDomain, tx: &SafeTx) -> B256 {
    let mut final_buf = Vec::with_capacity(2 + 32 + 32);
    final_buf.extend_from_slice(b"\x19\x01");
    final_buf.extend_from_slice(domain_separator(domain).as_slice());
    final_buf.extend_from_slice(safe_tx_struct_hash(tx).as_slice());
    keccak256_bytes(&final_buf)
}

/// `personal_sign` digest of a 32-byte hash, used by `eth_sign` style Safe signatures.
pub fn eth_signed_message_hash(hash: B256) -> B256 {
    let mut buf = Vec::with_capacity(28 + 32);
    buf.extend_from_slice(b"\x19Ethereum Signed Message:\n32");
    buf.extend_from_slice(hash.as_slice());
    keccak256_bytes(&buf)
}
