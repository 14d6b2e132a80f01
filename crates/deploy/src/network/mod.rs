//! Boundary to the remote chain.
//!
//! The orchestrator only needs four things from a node: submit a contract creation,
//! submit a call, wait for a submitted transaction to confirm, and read contract
//! state. [`NetworkClient`] captures exactly that; [`RpcClient`] implements it over
//! Ethereum JSON-RPC with node-side signing.

use std::{collections::BTreeMap, future::Future};

use alloy_core::primitives::{Address, B256, Bytes};
use serde::{Deserialize, Serialize};

use crate::error::NetworkError;

mod rpc;
pub use rpc::{ConfirmationPolicy, RpcClient, json_rpc_call};

/// A contract creation ready to submit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployRequest {
    /// Instance name from the topology.
    pub contract: String,
    /// Artifact the init code was built from.
    pub artifact: String,
    /// Linked creation bytecode followed by the ABI-encoded constructor arguments.
    pub init_code: Bytes,
    /// Library links already substituted into `init_code`.
    pub libraries: BTreeMap<String, Address>,
}

/// Handle to a submitted, not yet confirmed transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PendingTx {
    pub tx_hash: B256,
}

/// A confirmed transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxReceipt {
    pub tx_hash: B256,
    pub block_number: u64,
    /// Set for contract creations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contract_address: Option<Address>,
    /// `false` if the transaction was included but reverted.
    pub success: bool,
    pub gas_used: u64,
}

/// A remote chain endpoint acting on behalf of a single signing account.
pub trait NetworkClient: Send + Sync {
    /// The account every transaction is sent from.
    fn sender(&self) -> Address;

    /// Submit a contract creation transaction.
    fn deploy(
        &self,
        request: &DeployRequest,
    ) -> impl Future<Output = Result<PendingTx, NetworkError>> + Send;

    /// Submit a state-mutating call.
    fn send(
        &self,
        to: Address,
        calldata: Bytes,
    ) -> impl Future<Output = Result<PendingTx, NetworkError>> + Send;

    /// Perform a read-only call against the latest state.
    fn call(
        &self,
        to: Address,
        calldata: Bytes,
    ) -> impl Future<Output = Result<Bytes, NetworkError>> + Send;

    /// Block until the transaction is confirmed, or fail with [`NetworkError::Timeout`].
    fn wait_for_confirmation(
        &self,
        pending: &PendingTx,
    ) -> impl Future<Output = Result<TxReceipt, NetworkError>> + Send;
}
