//! Solidity ABI of the contracts the coordinator calls into.

use alloy_sol_types::sol;

sol! {
    /// Safe (v1.3.0+) surface used by the coordinator.
    interface ISafe {
        event ExecutionSuccess(bytes32 txHash, uint256 payment);
        event ExecutionFailure(bytes32 txHash, uint256 payment);

        function nonce() external view returns (uint256);
        function getThreshold() external view returns (uint256);
        function getOwners() external view returns (address[] memory);

        function getTransactionHash(
            address to,
            uint256 value,
            bytes calldata data,
            uint8 operation,
            uint256 safeTxGas,
            uint256 baseGas,
            uint256 gasPrice,
            address gasToken,
            address refundReceiver,
            uint256 _nonce
        ) external view returns (bytes32);

        function execTransaction(
            address to,
            uint256 value,
            bytes calldata data,
            uint8 operation,
            uint256 safeTxGas,
            uint256 baseGas,
            uint256 gasPrice,
            address gasToken,
            address refundReceiver,
            bytes memory signatures
        ) external payable returns (bool success);
    }

    /// Allow-list restricting which executor may act on which target and selector.
    interface IAuthorizer {
        event PermissionSet(address indexed executor, address indexed target, bytes4 indexed selector, bool allowed);

        function admin() external view returns (address);
        function canExecute(address executor, address target, bytes4 selector) external view returns (bool);
        function setPermission(address executor, address target, bytes4 selector, bool allowed) external;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_sol_types::SolCall;

    #[test]
    fn safe_selectors_match_deployed_abi() {
        assert_eq!(ISafe::execTransactionCall::SELECTOR, [0x6a, 0x76, 0x12, 0x02]);
        assert_eq!(ISafe::getTransactionHashCall::SELECTOR, [0xd8, 0xd1, 0x1f, 0x78]);
        assert_eq!(ISafe::nonceCall::SELECTOR, [0xaf, 0xfe, 0xd0, 0xe0]);
        assert_eq!(ISafe::getOwnersCall::SELECTOR, [0xa0, 0xe6, 0x7e, 0x2b]);
        assert_eq!(ISafe::getThresholdCall::SELECTOR, [0xe7, 0x52, 0x35, 0xb8]);
    }
}
