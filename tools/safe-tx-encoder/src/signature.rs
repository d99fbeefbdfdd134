//! Safe signature blocks and signer recovery.
//!
//! Every block is a fixed 65 bytes `r || s || v`; `v` selects how the Safe interprets it:
//! - `v = 0`: contract signature (EIP-1271), needs a dynamic part
//! - `v = 1`: pre-approved hash, signer in the low 20 bytes of `r`
//! - `v = 27 | 28`: ECDSA over the `safeTxHash`
//! - `v = 31 | 32`: `eth_sign` over the prefixed `safeTxHash`, `v` offset by 4

use alloy_primitives::{Address, B256};
use k256::ecdsa::{RecoveryId, Signature, VerifyingKey};
use thiserror::Error;

use crate::bytes::{read_b32, read_u8};
use crate::digest::{eth_signed_message_hash, keccak256_bytes};

pub const SIGNATURE_LEN: usize = 65;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SignatureError {
    #[error("signature must be {SIGNATURE_LEN} bytes, got {0}")]
    InvalidLength(usize),
    #[error("signature is not valid hex: {0}")]
    InvalidHex(String),
    #[error("unsupported signature type v={0}")]
    UnsupportedKind(u8),
    #[error("signature does not recover to a public key")]
    Unrecoverable,
    #[error("signer mismatch: reported {reported}, recovered {recovered}")]
    SignerMismatch { reported: Address, recovered: Address },
    #[error("invalid private key")]
    InvalidKey,
    #[error("signing failed: {0}")]
    Signing(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SignatureKind {
    Contract,
    ApprovedHash,
    Ecdsa,
    EthSign,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SafeSignature {
    r: B256,
    s: B256,
    v: u8,
}

impl SafeSignature {
    pub fn from_parts(r: B256, s: B256, v: u8) -> Self {
        Self { r, s, v }
    }

    /// Parse exactly one 65-byte block.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, SignatureError> {
        if bytes.len() != SIGNATURE_LEN {
            return Err(SignatureError::InvalidLength(bytes.len()));
        }
        let mut i = 0usize;
        let r = read_b32(bytes, &mut i).ok_or(SignatureError::InvalidLength(bytes.len()))?;
        let s = read_b32(bytes, &mut i).ok_or(SignatureError::InvalidLength(bytes.len()))?;
        let v = read_u8(bytes, &mut i).ok_or(SignatureError::InvalidLength(bytes.len()))?;
        Ok(Self { r, s, v })
    }

    /// Parse a `0x`-prefixed (or bare) hex string holding one block.
    pub fn from_hex(s: &str) -> Result<Self, SignatureError> {
        let raw = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(raw).map_err(|e| SignatureError::InvalidHex(e.to_string()))?;
        Self::from_slice(&bytes)
    }

    /// Pre-approved hash marker for `owner` (`approveHash` or `msg.sender == owner`).
    pub fn approved_hash(owner: Address) -> Self {
        let mut r = [0u8; 32];
        r[12..32].copy_from_slice(owner.as_slice());
        Self {
            r: B256::from(r),
            s: B256::ZERO,
            v: 1,
        }
    }

    pub fn v(&self) -> u8 {
        self.v
    }

    pub fn kind(&self) -> Result<SignatureKind, SignatureError> {
        match self.v {
            0 => Ok(SignatureKind::Contract),
            1 => Ok(SignatureKind::ApprovedHash),
            27 | 28 => Ok(SignatureKind::Ecdsa),
            31 | 32 => Ok(SignatureKind::EthSign),
            other => Err(SignatureError::UnsupportedKind(other)),
        }
    }

    pub fn to_bytes(&self) -> [u8; SIGNATURE_LEN] {
        let mut out = [0u8; SIGNATURE_LEN];
        out[0..32].copy_from_slice(self.r.as_slice());
        out[32..64].copy_from_slice(self.s.as_slice());
        out[64] = self.v;
        out
    }

    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.to_bytes()))
    }

    /// Derive the signer the Safe would attribute this block to for `safe_tx_hash`.
    pub fn recover_signer(&self, safe_tx_hash: B256) -> Result<Address, SignatureError> {
        match self.kind()? {
            SignatureKind::Ecdsa => recover_ecdsa(safe_tx_hash, &self.r, &self.s, self.v - 27),
            SignatureKind::EthSign => recover_ecdsa(
                eth_signed_message_hash(safe_tx_hash),
                &self.r,
                &self.s,
                self.v - 31,
            ),
            SignatureKind::ApprovedHash => Ok(Address::from_slice(&self.r[12..32])),
            SignatureKind::Contract => Err(SignatureError::UnsupportedKind(self.v)),
        }
    }
}

fn recover_ecdsa(digest: B256, r: &B256, s: &B256, parity: u8) -> Result<Address, SignatureError> {
    let mut rs = [0u8; 64];
    rs[0..32].copy_from_slice(r.as_slice());
    rs[32..64].copy_from_slice(s.as_slice());
    let signature = Signature::from_slice(&rs).map_err(|_| SignatureError::Unrecoverable)?;
    let mut recovery_id = RecoveryId::from_byte(parity).ok_or(SignatureError::Unrecoverable)?;

    // ecrecover accepts high-s; k256 only verifies the normalised form.
    let signature = match signature.normalize_s() {
        Some(normalised) => {
            recovery_id = RecoveryId::new(!recovery_id.is_y_odd(), recovery_id.is_x_reduced());
            normalised
        }
        None => signature,
    };

    let key = VerifyingKey::recover_from_prehash(digest.as_slice(), &signature, recovery_id)
        .map_err(|_| SignatureError::Unrecoverable)?;
    Ok(address_of(&key))
}

/// Ethereum address of a secp256k1 public key.
pub fn address_of(key: &VerifyingKey) -> Address {
    let point = key.to_encoded_point(false);
    let hash = keccak256_bytes(&point.as_bytes()[1..]);
    Address::from_slice(&hash[12..32])
}
