//! Serializes state-mutating calls from the signing account.
//!
//! Every write goes through [`ConfirmationGate::execute`], which submits it, blocks
//! until it confirms and then holds the gate closed for a fixed quiescence interval,
//! so the next write (or a read of what this one wrote) never races it.

use std::{future::Future, time::Duration};

use tokio::time::Instant;

use crate::{
    error::{DeployError, NetworkError},
    network::{NetworkClient, PendingTx, TxReceipt},
};

/// Default pause after each confirmed write.
pub const DEFAULT_QUIESCENCE: Duration = Duration::from_secs(10);

#[derive(Debug)]
pub struct ConfirmationGate {
    quiescence: Duration,
    last_confirmed: Option<Instant>,
    submitted: usize,
}

impl Default for ConfirmationGate {
    fn default() -> Self {
        Self::new(DEFAULT_QUIESCENCE)
    }
}

impl ConfirmationGate {
    pub fn new(quiescence: Duration) -> Self {
        Self {
            quiescence,
            last_confirmed: None,
            submitted: 0,
        }
    }

    pub fn quiescence(&self) -> Duration {
        self.quiescence
    }

    /// Number of transactions submitted through the gate.
    pub fn submitted(&self) -> usize {
        self.submitted
    }

    /// Wait until the quiescence interval since the last confirmation has elapsed.
    pub async fn settle(&self) {
        if let Some(last) = self.last_confirmed {
            let ready_at = last + self.quiescence;
            if Instant::now() < ready_at {
                tracing::trace!(remaining = ?(ready_at - Instant::now()), "Waiting for quiescence");
                tokio::time::sleep_until(ready_at).await;
            }
        }
    }

    /// Submit one write and wait for it to confirm.
    ///
    /// Taking `&mut self` keeps at most one write in flight per gate. The quiescence
    /// interval since the previous confirmation is awaited before `submit` is called.
    ///
    /// # Arguments
    /// * `client` - Client used to wait for the receipt
    /// * `action` - Description of the write, used in logs and errors
    /// * `submit` - Sends the transaction
    ///
    /// # Returns
    /// The successful receipt, or a submission, timeout or revert error.
    pub async fn execute<C, F, Fut>(
        &mut self,
        client: &C,
        action: &str,
        submit: F,
    ) -> Result<TxReceipt, DeployError>
    where
        C: NetworkClient,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<PendingTx, NetworkError>>,
    {
        self.settle().await;

        self.submitted += 1;
        let pending = submit().await.map_err(|source| DeployError::Submission {
            action: action.to_string(),
            source,
        })?;
        tracing::debug!(action, tx_hash = %pending.tx_hash, "Transaction submitted, awaiting confirmation");

        let receipt = client
            .wait_for_confirmation(&pending)
            .await
            .map_err(|source| DeployError::ConfirmationTimeout {
                action: action.to_string(),
                source,
            })?;
        self.last_confirmed = Some(Instant::now());

        if !receipt.success {
            return Err(DeployError::Reverted {
                action: action.to_string(),
                tx_hash: receipt.tx_hash,
            });
        }

        tracing::debug!(
            action,
            tx_hash = %receipt.tx_hash,
            block = receipt.block_number,
            gas_used = receipt.gas_used,
            "Transaction confirmed"
        );

        self.settle().await;
        Ok(receipt)
    }
}
