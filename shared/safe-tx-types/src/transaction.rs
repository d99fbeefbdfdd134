use alloy_primitives::{Address, Bytes, U256};

/// Execution semantics at the target.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Operation {
    #[default]
    Call = 0x00,
    DelegateCall = 0x01,
}

impl Operation {
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for Operation {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(Operation::Call),
            0x01 => Ok(Operation::DelegateCall),
            other => Err(other),
        }
    }
}

/// Refund/gas parameters of a Safe transaction.
///
/// All five fields take part in the `safeTxHash` even when zero.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct GasParams {
    pub safe_tx_gas: U256,
    pub base_gas: U256,
    pub gas_price: U256,
    pub gas_token: Address,
    pub refund_receiver: Address,
}

impl GasParams {
    /// No refund: zero gas allowances, native token, no receiver.
    pub fn neutral() -> Self {
        Self::default()
    }

    pub fn is_neutral(&self) -> bool {
        *self == Self::default()
    }
}

/// Raw fields of a proposed Safe operation (everything except the domain).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SafeTx {
    /// Destination of the inner call.
    pub to: Address,
    /// Native value forwarded with the call (wei).
    pub value: U256,
    /// Calldata; empty for a plain transfer.
    pub data: Bytes,
    pub operation: Operation,
    pub gas: GasParams,
    /// Wallet nonce this transaction is bound to.
    pub nonce: U256,
}

impl SafeTx {
    /// Plain call with neutral gas parameters.
    pub fn call(to: Address, value: U256, data: Bytes, nonce: U256) -> Self {
        Self {
            to,
            value,
            data,
            operation: Operation::Call,
            gas: GasParams::neutral(),
            nonce,
        }
    }

    /// First four bytes of the calldata, or the zero selector for plain transfers.
    pub fn selector(&self) -> [u8; 4] {
        let mut out = [0u8; 4];
        if self.data.len() >= 4 {
            out.copy_from_slice(&self.data[..4]);
        }
        out
    }
}

/// EIP-712 domain of a Safe (v1.3.0+): chain id and the wallet's own address.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SafeDomain {
    pub chain_id: u64,
    pub safe: Address,
}

impl SafeDomain {
    pub fn new(chain_id: u64, safe: Address) -> Self {
        Self { chain_id, safe }
    }
}
