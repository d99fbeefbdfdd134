//! Network-free codec for Safe transactions: the canonical `safeTxHash`, owner
//! signatures, and the packed signature layout `execTransaction` expects.

pub mod aggregate;
pub mod bytes;
pub mod descriptor;
pub mod digest;
pub mod packing;
pub mod signature;
pub mod signer;

mod tests;

pub use aggregate::{AggregateError, SignatureAggregate};
pub use descriptor::{DescriptorError, TransactionDescriptor};
pub use digest::{domain_separator, eth_signed_message_hash, keccak256_bytes, safe_tx_hash};
pub use packing::pack_signatures;
pub use signature::{address_of, SafeSignature, SignatureError, SignatureKind, SIGNATURE_LEN};
pub use signer::LocalSigner;
