//! Ethereum JSON-RPC implementation of [`NetworkClient`].

use std::time::Duration;

use alloy_core::primitives::{Address, B256, Bytes, U64};
use anyhow::Context;
use backon::{ExponentialBuilder, Retryable};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;
use url::Url;

use super::{DeployRequest, NetworkClient, PendingTx, TxReceipt};
use crate::error::{ConfigError, DeployError, NetworkError};

/// Default timeout for a single RPC request.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// How long and how eagerly to wait for a transaction to confirm.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmationPolicy {
    /// Upper bound on the wait for one transaction.
    pub timeout_secs: u64,
    /// Blocks that must exist on top of (and including) the receipt's block.
    pub confirmations: u64,
    /// First receipt poll delay; doubles up to `poll_max_millis`.
    pub poll_min_millis: u64,
    pub poll_max_millis: u64,
}

impl Default for ConfirmationPolicy {
    fn default() -> Self {
        Self {
            timeout_secs: 300,
            confirmations: 1,
            poll_min_millis: 500,
            poll_max_millis: 8_000,
        }
    }
}

impl ConfirmationPolicy {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    fn backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(self.poll_min_millis))
            .with_max_delay(Duration::from_millis(self.poll_max_millis))
            .with_max_times(usize::MAX)
    }
}

/// Make a JSON-RPC call and deserialize the result.
///
/// An `error` member in the response is reported as [`NetworkError::Rejected`];
/// anything that prevents reading a response is [`NetworkError::Transport`].
pub async fn json_rpc_call<T: DeserializeOwned>(
    client: &reqwest::Client,
    url: &Url,
    method: &str,
    params: Vec<Value>,
) -> Result<T, NetworkError> {
    let response = client
        .post(url.clone())
        .json(&serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1
        }))
        .send()
        .await
        .map_err(|e| NetworkError::Transport(format!("failed to send {method} request: {e}")))?;

    let result: Value = response
        .json()
        .await
        .map_err(|e| NetworkError::Transport(format!("failed to parse {method} response: {e}")))?;

    if let Some(error) = result.get("error") {
        return Err(NetworkError::Rejected(
            error
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("unknown")
                .to_string(),
        ));
    }

    let result_value = result
        .get("result")
        .cloned()
        .ok_or_else(|| NetworkError::Transport(format!("no result in {method} response")))?;

    serde_json::from_value(result_value)
        .map_err(|e| NetworkError::Transport(format!("failed to deserialize {method} result: {e}")))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcReceipt {
    transaction_hash: B256,
    block_number: U64,
    #[serde(default)]
    contract_address: Option<Address>,
    /// Absent on pre-Byzantium chains.
    #[serde(default)]
    status: Option<U64>,
    gas_used: U64,
}

impl From<RpcReceipt> for TxReceipt {
    fn from(receipt: RpcReceipt) -> Self {
        Self {
            tx_hash: receipt.transaction_hash,
            block_number: receipt.block_number.to::<u64>(),
            contract_address: receipt.contract_address,
            success: receipt.status.is_none_or(|s| s == U64::from(1)),
            gas_used: receipt.gas_used.to::<u64>(),
        }
    }
}

/// Why a receipt poll has to be retried.
#[derive(Debug)]
enum PollError {
    NotIncluded,
    AwaitingConfirmations { have: u64, want: u64 },
    Network(NetworkError),
}

impl std::fmt::Display for PollError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PollError::NotIncluded => write!(f, "not included yet"),
            PollError::AwaitingConfirmations { have, want } => {
                write!(f, "{have}/{want} confirmations")
            }
            PollError::Network(e) => write!(f, "{e}"),
        }
    }
}

/// JSON-RPC client sending transactions from a node-managed account.
///
/// Transactions go through `eth_sendTransaction`, so the node (or a signer proxy
/// in front of it) holds the key for `from`.
#[derive(Debug, Clone)]
pub struct RpcClient {
    client: reqwest::Client,
    url: Url,
    from: Address,
    policy: ConfirmationPolicy,
}

impl RpcClient {
    pub fn new(url: &str, from: Address, policy: ConfirmationPolicy) -> anyhow::Result<Self> {
        let url = Url::parse(url).with_context(|| format!("Invalid RPC URL: {url}"))?;
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            url,
            from,
            policy,
        })
    }

    pub fn policy(&self) -> &ConfirmationPolicy {
        &self.policy
    }

    async fn request<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Vec<Value>,
    ) -> Result<T, NetworkError> {
        json_rpc_call(&self.client, &self.url, method, params).await
    }

    pub async fn chain_id(&self) -> Result<u64, NetworkError> {
        let id: U64 = self.request("eth_chainId", vec![]).await?;
        Ok(id.to::<u64>())
    }

    /// Fail unless the endpoint serves the expected chain.
    pub async fn ensure_chain_id(&self, expected: u64) -> Result<(), DeployError> {
        let actual = self.chain_id().await.map_err(|source| DeployError::Connection {
            url: self.url.to_string(),
            source,
        })?;
        if actual != expected {
            return Err(ConfigError::ChainMismatch { expected, actual }.into());
        }
        tracing::debug!(chain_id = actual, url = %self.url, "Connected to RPC endpoint");
        Ok(())
    }

    async fn block_number(&self) -> Result<u64, NetworkError> {
        let number: U64 = self.request("eth_blockNumber", vec![]).await?;
        Ok(number.to::<u64>())
    }

    async fn poll_receipt(&self, tx_hash: B256) -> Result<TxReceipt, PollError> {
        let receipt: Option<RpcReceipt> = self
            .request("eth_getTransactionReceipt", vec![serde_json::json!(tx_hash)])
            .await
            .map_err(PollError::Network)?;
        let receipt = TxReceipt::from(receipt.ok_or(PollError::NotIncluded)?);

        if self.policy.confirmations > 1 {
            let head = self.block_number().await.map_err(PollError::Network)?;
            let have = (head + 1).saturating_sub(receipt.block_number);
            if have < self.policy.confirmations {
                return Err(PollError::AwaitingConfirmations {
                    have,
                    want: self.policy.confirmations,
                });
            }
        }

        Ok(receipt)
    }

    async fn send_transaction(&self, tx: Value) -> Result<PendingTx, NetworkError> {
        let tx_hash: B256 = self.request("eth_sendTransaction", vec![tx]).await?;
        Ok(PendingTx { tx_hash })
    }
}

impl NetworkClient for RpcClient {
    fn sender(&self) -> Address {
        self.from
    }

    async fn deploy(&self, request: &DeployRequest) -> Result<PendingTx, NetworkError> {
        tracing::debug!(
            contract = %request.contract,
            artifact = %request.artifact,
            init_code_len = request.init_code.len(),
            "Sending contract creation"
        );
        self.send_transaction(serde_json::json!({
            "from": self.from,
            "data": request.init_code,
        }))
        .await
    }

    async fn send(&self, to: Address, calldata: Bytes) -> Result<PendingTx, NetworkError> {
        self.send_transaction(serde_json::json!({
            "from": self.from,
            "to": to,
            "data": calldata,
        }))
        .await
    }

    async fn call(&self, to: Address, calldata: Bytes) -> Result<Bytes, NetworkError> {
        self.request(
            "eth_call",
            vec![
                serde_json::json!({ "from": self.from, "to": to, "data": calldata }),
                serde_json::json!("latest"),
            ],
        )
        .await
    }

    async fn wait_for_confirmation(&self, pending: &PendingTx) -> Result<TxReceipt, NetworkError> {
        let tx_hash = pending.tx_hash;
        let timeout = self.policy.timeout();

        let poll = (|| self.poll_receipt(tx_hash))
            .retry(self.policy.backoff())
            .notify(|err: &PollError, after: Duration| {
                tracing::trace!(%tx_hash, status = %err, retry_in = ?after, "Waiting for confirmation");
            });

        match tokio::time::timeout(timeout, poll).await {
            Ok(Ok(receipt)) => Ok(receipt),
            Ok(Err(PollError::Network(e))) => Err(e),
            Ok(Err(_)) | Err(_) => Err(NetworkError::Timeout {
                tx_hash,
                waited: timeout,
            }),
        }
    }
}
