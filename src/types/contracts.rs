//! Contract interfaces the operator talks to.

use alloy::{primitives::Address, sol};
use serde::{Deserialize, Serialize};

sol! {
    /// Slots and bond of one agent id in a service.
    #[derive(Debug, Default, PartialEq, Eq)]
    struct AgentParams {
        uint32 slots;
        uint96 bond;
    }

    /// Service record of the service registry.
    #[derive(Debug, Default, PartialEq, Eq)]
    struct ServiceRecord {
        uint96 securityDeposit;
        address multisig;
        bytes32 configHash;
        uint32 threshold;
        uint32 maxNumAgentInstances;
        uint32 numAgentInstances;
        uint8 state;
        uint32[] agentIds;
    }

    /// Staking record of a service in a staking contract.
    #[derive(Debug, Default, PartialEq, Eq)]
    struct StakingServiceInfo {
        address multisig;
        address owner;
        uint256[] nonces;
        uint256 tsStart;
        uint256 reward;
        uint256 inactivity;
    }

    /// Service registry (ERC-721 service tokens).
    #[derive(Debug)]
    interface IServiceRegistry {
        function getService(uint256 serviceId) external view returns (ServiceRecord memory service);
        function getAgentInstances(
            uint256 serviceId
        ) external view returns (uint256 numAgentInstances, address[] memory agentInstances);
        function ownerOf(uint256 id) external view returns (address owner);
        function exists(uint256 unitId) external view returns (bool);
        function totalSupply() external view returns (uint256);
        function approve(address spender, uint256 id) external;
        function getApproved(uint256 id) external view returns (address);
    }

    /// Service manager, the write entry point of the service registry.
    #[derive(Debug)]
    interface IServiceManager {
        function create(
            address serviceOwner,
            address token,
            bytes32 configHash,
            uint32[] memory agentIds,
            AgentParams[] memory agentParams,
            uint32 threshold
        ) external returns (uint256 serviceId);
        function update(
            address token,
            bytes32 configHash,
            uint32[] memory agentIds,
            AgentParams[] memory agentParams,
            uint32 threshold,
            uint256 serviceId
        ) external returns (bool success);
        function activateRegistration(uint256 serviceId) external payable returns (bool success);
        function registerAgents(
            uint256 serviceId,
            address[] memory agentInstances,
            uint32[] memory agentIds
        ) external payable returns (bool success);
        function deploy(
            uint256 serviceId,
            address multisigImplementation,
            bytes memory data
        ) external returns (address multisig);
        function terminate(uint256 serviceId) external returns (bool success, uint256 refund);
        function unbond(uint256 serviceId) external returns (bool success, uint256 refund);
    }

    /// Token utility holding ERC-20 denominated bonds.
    #[derive(Debug)]
    interface IServiceRegistryTokenUtility {
        function mapServiceIdTokenDeposit(
            uint256 serviceId
        ) external view returns (address token, uint96 securityDeposit);
        function getAgentBond(
            uint256 serviceId,
            uint256 agentId
        ) external view returns (uint256 bond);
        function getOperatorBalance(
            address operator,
            uint256 serviceId
        ) external view returns (uint256 balance);
    }

    /// Staking contract of a staking program.
    #[derive(Debug)]
    interface IStaking {
        function stake(uint256 serviceId) external;
        function unstake(uint256 serviceId) external returns (uint256 reward);
        function getStakingState(uint256 serviceId) external view returns (uint8 stakingState);
        function maxNumServices() external view returns (uint256);
        function getServiceIds() external view returns (uint256[] memory);
        function availableRewards() external view returns (uint256);
        function minStakingDeposit() external view returns (uint256);
        function minStakingDuration() external view returns (uint256);
        function getAgentIds() external view returns (uint256[] memory);
        function serviceRegistry() external view returns (address);
        function stakingToken() external view returns (address);
        function activityChecker() external view returns (address);
        function getServiceInfo(
            uint256 serviceId
        ) external view returns (StakingServiceInfo memory info);
    }

    /// Safe smart account.
    #[derive(Debug)]
    interface ISafe {
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
        function addOwnerWithThreshold(address owner, uint256 _threshold) external;
        function removeOwner(address prevOwner, address owner, uint256 _threshold) external;
        function changeThreshold(uint256 _threshold) external;
        function approveHash(bytes32 hashToApprove) external;
        function getOwners() external view returns (address[] memory);
        function getThreshold() external view returns (uint256);
        function nonce() external view returns (uint256);
    }

    /// Batches several calls into one Safe transaction.
    #[derive(Debug)]
    interface IMultiSend {
        function multiSend(bytes memory transactions) external payable;
    }

    /// ERC-20 token.
    #[derive(Debug)]
    interface IERC20 {
        function balanceOf(address account) external view returns (uint256);
        function allowance(address owner, address spender) external view returns (uint256);
        function approve(address spender, uint256 amount) external returns (bool);
        function transfer(address to, uint256 amount) external returns (bool);
        function transferFrom(address from, address to, uint256 amount) external returns (bool);
    }
}

/// Addresses of the contracts the operator uses on one chain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainContracts {
    /// Service manager, entry point for registry writes.
    pub service_manager: Address,
    /// Service registry.
    pub service_registry: Address,
    /// Token utility of the service registry.
    pub service_registry_token_utility: Address,
    /// Multisig implementation deploying a fresh Safe.
    pub gnosis_safe_proxy_factory: Address,
    /// Multisig implementation reusing an existing Safe.
    pub gnosis_safe_same_address_multisig: Address,
    /// Multi-send contract used for Safe batches.
    pub multisend: Address,
    /// Fallback handler installed on fresh Safes.
    #[serde(default)]
    pub safe_fallback_handler: Address,
}

impl ChainContracts {
    /// Checks that every required contract is set and that no two roles share an address.
    pub fn validate(&self) -> eyre::Result<()> {
        let required = [
            ("service_manager", self.service_manager),
            ("service_registry", self.service_registry),
            ("service_registry_token_utility", self.service_registry_token_utility),
            ("gnosis_safe_proxy_factory", self.gnosis_safe_proxy_factory),
            ("gnosis_safe_same_address_multisig", self.gnosis_safe_same_address_multisig),
            ("multisend", self.multisend),
        ];

        for (idx, (name, address)) in required.iter().enumerate() {
            if address.is_zero() {
                eyre::bail!("contract address {name} is not set");
            }
            if let Some((other, _)) = required[..idx].iter().find(|(_, other)| other == address) {
                eyre::bail!("contracts {other} and {name} share address {address}");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contracts() -> ChainContracts {
        ChainContracts {
            service_manager: Address::repeat_byte(1),
            service_registry: Address::repeat_byte(2),
            service_registry_token_utility: Address::repeat_byte(3),
            gnosis_safe_proxy_factory: Address::repeat_byte(4),
            gnosis_safe_same_address_multisig: Address::repeat_byte(5),
            multisend: Address::repeat_byte(6),
            safe_fallback_handler: Address::ZERO,
        }
    }

    #[test]
    fn validates_addresses() {
        assert!(contracts().validate().is_ok());

        let missing = ChainContracts { multisend: Address::ZERO, ..contracts() };
        assert!(missing.validate().unwrap_err().to_string().contains("multisend"));

        let shared = ChainContracts { service_registry: Address::repeat_byte(1), ..contracts() };
        assert!(shared.validate().is_err());
    }
}
