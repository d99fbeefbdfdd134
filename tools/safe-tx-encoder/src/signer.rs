use std::fmt;

use alloy_primitives::{Address, B256};
use k256::ecdsa::SigningKey;

use crate::descriptor::TransactionDescriptor;
use crate::signature::{address_of, SafeSignature, SignatureError};

/// An owner key held by this process.
pub struct LocalSigner {
    key: SigningKey,
    address: Address,
}

impl LocalSigner {
    pub fn new(key: SigningKey) -> Self {
        let address = address_of(key.verifying_key());
        Self { key, address }
    }

    /// Load from a hex private key (with or without `0x`).
    pub fn from_hex(private_key: &str) -> Result<Self, SignatureError> {
        let raw = private_key.trim();
        let raw = raw.strip_prefix("0x").unwrap_or(raw);
        let bytes = hex::decode(raw).map_err(|_| SignatureError::InvalidKey)?;
        let key = SigningKey::from_slice(&bytes).map_err(|_| SignatureError::InvalidKey)?;
        Ok(Self::new(key))
    }

    pub fn address(&self) -> Address {
        self.address
    }

    /// Sign a `safeTxHash` directly (EIP-712 style, `v` in {27, 28}).
    pub fn sign_hash(&self, hash: B256) -> Result<SafeSignature, SignatureError> {
        let (signature, recovery_id) = self
            .key
            .sign_prehash_recoverable(hash.as_slice())
            .map_err(|e| SignatureError::Signing(e.to_string()))?;
        let (r, s) = signature.split_bytes();
        Ok(SafeSignature::from_parts(
            B256::from_slice(&r),
            B256::from_slice(&s),
            27 + recovery_id.to_byte(),
        ))
    }

    pub fn sign_descriptor(
        &self,
        descriptor: &TransactionDescriptor,
    ) -> Result<SafeSignature, SignatureError> {
        self.sign_hash(descriptor.safe_tx_hash())
    }
}

impl fmt::Debug for LocalSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalSigner")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}
