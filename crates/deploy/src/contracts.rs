//! Solidity entry points invoked after deployment, and the reads built on them.

use alloy_core::{
    primitives::{Address, U256},
    sol,
    sol_types::SolCall,
};

use crate::{error::DeployError, network::NetworkClient};

sol! {
    /// Reward farm pool registration.
    interface ISnackShack {
        function add(uint256 allocPoint, uint8 farmType, address lpToken, address rewarder, address controller) external;
        function poolLength() external view returns (uint256);
        function poolInfo(uint256 pid) external view returns (address lpToken, uint256 allocPoint, uint8 farmType, address rewarder, address controller);
    }

    interface IOwnable {
        function transferOwnership(address newOwner) external;
    }

    /// Mock ERC-20 allocation mint.
    interface IMintableToken {
        function mint(address to, uint256 amount) external;
    }

    /// NFT collection self-mint.
    interface IMintableCollection {
        function mint() external;
    }

    interface IERC20Metadata {
        function name() external view returns (string);
    }
}

/// Perform a read-only call and decode its single return value.
async fn read<C, Call>(client: &C, address: Address, method: &'static str, call: Call) -> Result<Call::Return, DeployError>
where
    C: NetworkClient,
    Call: SolCall,
{
    let read_error = |reason: String| DeployError::Read {
        address,
        method,
        reason,
    };

    let data = client
        .call(address, call.abi_encode().into())
        .await
        .map_err(|e| read_error(e.to_string()))?;
    Call::abi_decode_returns(&data, true).map_err(|e| read_error(e.to_string()))
}

/// `name()` of an ERC-20 style contract.
pub async fn read_name<C: NetworkClient>(client: &C, address: Address) -> Result<String, DeployError> {
    Ok(read(client, address, "name", IERC20Metadata::nameCall {}).await?._0)
}

/// `poolLength()` of the farm.
pub async fn read_pool_length<C: NetworkClient>(client: &C, farm: Address) -> Result<U256, DeployError> {
    Ok(read(client, farm, "poolLength", ISnackShack::poolLengthCall {}).await?._0)
}

/// `poolInfo(pid)` of the farm.
pub async fn read_pool_info<C: NetworkClient>(
    client: &C,
    farm: Address,
    pid: usize,
) -> Result<ISnackShack::poolInfoReturn, DeployError> {
    read(client, farm, "poolInfo", ISnackShack::poolInfoCall { pid: U256::from(pid) }).await
}
