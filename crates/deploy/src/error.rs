//! Error taxonomy for a deployment run.
//!
//! Every variant of [`DeployError`] except [`DeployError::Read`] is fatal for the run.

use std::time::Duration;

use alloy_core::primitives::{Address, B256};
use thiserror::Error;

/// Errors detected while planning, before any network call is made.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// Two specs share the same name.
    #[error("contract `{0}` is declared more than once")]
    DuplicateContract(String),

    /// A spec references a name that is not declared anywhere in the topology.
    #[error("`{contract}` references undeclared contract `{dependency}`")]
    UnknownDependency { contract: String, dependency: String },

    /// A spec references a contract declared after it.
    #[error("`{contract}` references `{dependency}`, which is declared later in the topology")]
    ForwardReference { contract: String, dependency: String },

    /// A pool registration references an undeclared contract.
    #[error("pool {index} references undeclared contract `{dependency}`")]
    UnknownPoolDependency { index: usize, dependency: String },

    /// No artifact is available for the given contract type.
    #[error("no artifact found for `{0}`")]
    MissingArtifact(String),

    /// The artifact expects a library link that the spec does not provide.
    #[error("`{contract}` requires library `{symbol}` but no link was provided")]
    UnlinkedLibrary { contract: String, symbol: String },

    /// The spec provides a library link that the artifact does not reference.
    #[error("`{contract}` links `{symbol}`, which its artifact does not reference")]
    UnexpectedLibrary { contract: String, symbol: String },

    /// A library link resolved to a contract that has not been recorded yet.
    #[error("`{contract}` links `{symbol}` to `{dependency}`, which has no address yet")]
    UnresolvedLink {
        contract: String,
        symbol: String,
        dependency: String,
    },

    /// An attach override names a contract that is not part of the topology.
    #[error("attach override names unknown contract `{0}`")]
    UnknownAttachTarget(String),

    /// The ledger and the attach overrides disagree on an address.
    #[error("`{contract}` is recorded at {recorded} but configured to attach at {configured}")]
    ConflictingAddress {
        contract: String,
        recorded: Address,
        configured: Address,
    },

    /// The spec of an already-recorded contract changed since it was recorded.
    #[error("`{0}` was recorded with a different spec; remove its ledger entry to redeploy it")]
    SpecDrift(String),

    /// A recorded pool registration does not match the configured one.
    #[error("pool {0} is recorded with different parameters than configured")]
    PoolDrift(usize),

    /// The farm reports a pool count that does not match the next expected index.
    #[error("farm reports {actual} pools but pool {expected} is next to register")]
    PoolIndexMismatch { expected: usize, actual: u64 },

    /// The farm already holds the pool but its entry could not be read back.
    #[error("farm already holds pool {index} but it could not be verified: {reason}")]
    UnverifiablePool { index: usize, reason: String },

    /// The endpoint or the ledger belongs to a different chain.
    #[error("expected chain id {expected}, found {actual}")]
    ChainMismatch { expected: u64, actual: u64 },

    /// A required environment value is missing.
    #[error("environment is missing `{0}`")]
    MissingEnvironmentValue(&'static str),

    /// Any other invalid configuration value.
    #[error("{0}")]
    Invalid(String),
}

/// Errors returned by a [`crate::NetworkClient`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NetworkError {
    /// The node refused the transaction.
    #[error("transaction rejected: {0}")]
    Rejected(String),

    /// The transaction was not confirmed within the bound.
    #[error("transaction {tx_hash} not confirmed after {waited:?}")]
    Timeout { tx_hash: B256, waited: Duration },

    /// The request did not reach the node or the response was malformed.
    #[error("transport error: {0}")]
    Transport(String),
}

/// Errors that end (or, for reads, annotate) a deployment run.
#[derive(Debug, Error)]
pub enum DeployError {
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("submission of {action} failed: {source}")]
    Submission {
        action: String,
        #[source]
        source: NetworkError,
    },

    #[error("confirmation of {action} failed: {source}")]
    ConfirmationTimeout {
        action: String,
        #[source]
        source: NetworkError,
    },

    #[error("{action} reverted in transaction {tx_hash}")]
    Reverted { action: String, tx_hash: B256 },

    #[error("{action} confirmed without creating a contract (tx {tx_hash})")]
    MissingContractAddress { action: String, tx_hash: B256 },

    #[error("read of {method} on {address} failed: {reason}")]
    Read {
        address: Address,
        method: &'static str,
        reason: String,
    },

    #[error("could not reach {url}: {source}")]
    Connection {
        url: String,
        #[source]
        source: NetworkError,
    },

    #[error("ledger error: {0:#}")]
    Ledger(anyhow::Error),
}

impl DeployError {
    /// Whether the run must stop on this error.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, DeployError::Read { .. })
    }
}

pub type Result<T, E = DeployError> = std::result::Result<T, E>;
