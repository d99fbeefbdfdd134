use alloy_primitives::{Address, Bytes};

/// One owner's signature as reported by the coordination service.
///
/// `owner` is asserted by the service, not derived; consumers that need the signer
/// identity must recover it from `signature`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Confirmation {
    pub owner: Address,
    pub signature: Bytes,
}

impl Confirmation {
    pub fn new(owner: Address, signature: Bytes) -> Self {
        Self { owner, signature }
    }
}

/// Current wallet configuration as read from chain.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SafeConfig {
    pub owners: Vec<Address>,
    pub threshold: u64,
}

impl SafeConfig {
    pub fn is_owner(&self, account: Address) -> bool {
        self.owners.contains(&account)
    }
}
