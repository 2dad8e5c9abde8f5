//! Solidity interfaces of the external programs this crate talks to.
#![allow(missing_docs, dead_code, clippy::pedantic, clippy::nursery)]

use alloy_sol_types::sol;

sol! {
    /// Zodiac Delay module. `execTransactionFromModule` queues, `executeNextTx` executes.
    interface IDelayModule {
        function setUp(bytes initializeParams) external;
        function enableModule(address module) external;
        function execTransactionFromModule(address to, uint256 value, bytes data, uint8 operation) external returns (bool success);
        function executeNextTx(address to, uint256 value, bytes data, uint8 operation) external;
        function skipExpired() external;
        function txNonce() external view returns (uint256);
        function queueNonce() external view returns (uint256);
        function getTxHash(uint256 nonce) external view returns (bytes32);
        function getTxCreatedAt(uint256 nonce) external view returns (uint256);
    }

    interface IModuleProxyFactory {
        function deployModule(address masterCopy, bytes initializer, uint256 saltNonce) external returns (address proxy);
    }

    interface ISafe {
        function enableModule(address module) external;
        function changeThreshold(uint256 _threshold) external;
        function getOwners() external view returns (address[] memory);
        function getThreshold() external view returns (uint256);
        function isModuleEnabled(address module) external view returns (bool);
    }

    interface ISafe4337Module {
        function executeUserOpWithErrorString(address to, uint256 value, bytes data, uint8 operation) external;
    }

    interface IMultiSend {
        function multiSend(bytes transactions) external payable;
    }

    interface IEntryPoint {
        function getNonce(address sender, uint192 key) external view returns (uint256 nonce);
    }

    interface IERC20 {
        function transfer(address to, uint256 value) external returns (bool);
        function approve(address spender, uint256 value) external returns (bool);
        function balanceOf(address owner) external view returns (uint256);
    }

    interface IFundProvider {
        function getWithdrawalHash(address to, uint256 amount) external view returns (bytes32);
        function withdraw(address to, uint256 amount, bytes signature) external;
    }

    /// Typed data the Safe 4337 module (v0.3.0) checks owner signatures against.
    struct SafeOp {
        address safe;
        uint256 nonce;
        bytes initCode;
        bytes callData;
        uint128 verificationGasLimit;
        uint128 callGasLimit;
        uint256 preVerificationGas;
        uint128 maxPriorityFeePerGas;
        uint128 maxFeePerGas;
        bytes paymasterAndData;
        uint48 validAfter;
        uint48 validUntil;
        address entryPoint;
    }
}
