//! Plain Safe transaction types shared by the encoder, the coordinator and the CLI.

pub mod confirmation;
pub mod transaction;

pub use confirmation::{Confirmation, SafeConfig};
pub use transaction::{GasParams, Operation, SafeDomain, SafeTx};
