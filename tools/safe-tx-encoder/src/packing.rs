//! Signature packing for `execTransaction`.
//!
//! Layout: `n` fixed-width blocks of [`SIGNATURE_LEN`] bytes (`r || s || v`), sorted
//! strictly ascending by signer address. The Safe walks the blocks in order and rejects
//! the whole payload (`GS026`) when an owner is not greater than the previous one, so the
//! order is part of the contract, not a presentation detail.

use std::collections::BTreeMap;

use alloy_primitives::{Address, Bytes};

use crate::signature::{SafeSignature, SIGNATURE_LEN};

/// Pack `(signer, signature)` pairs; input order is irrelevant and a repeated signer
/// keeps its last signature.
pub fn pack_signatures<I>(entries: I) -> Bytes
where
    I: IntoIterator<Item = (Address, SafeSignature)>,
{
    let sorted: BTreeMap<Address, SafeSignature> = entries.into_iter().collect();
    pack_sorted(&sorted)
}

pub(crate) fn pack_sorted(sorted: &BTreeMap<Address, SafeSignature>) -> Bytes {
    let mut buf = Vec::with_capacity(sorted.len() * SIGNATURE_LEN);
    for signature in sorted.values() {
        buf.extend_from_slice(&signature.to_bytes());
    }
    Bytes::from(buf)
}
