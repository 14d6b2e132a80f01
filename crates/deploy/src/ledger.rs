//! The run ledger: an append-only record of confirmed steps.
//!
//! The ledger is written after every confirmed step and read back at startup, so a
//! failed run can be resumed by simply running again. Contracts found in the ledger
//! are reused instead of redeployed, completed configuration calls and pool
//! registrations are skipped.

use std::{
    fs::File,
    path::{Path, PathBuf},
};

use alloy_core::primitives::{Address, B256};
use anyhow::Context;
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{
    error::{ConfigError, DeployError},
    network::TxReceipt,
    topology::{BehaviorType, ContractSpec, Param},
};

/// The parts of a spec that determine the deployed bytecode and constructor state.
#[derive(Debug, Serialize)]
struct SpecFingerprint<'a> {
    artifact: &'a str,
    constructor: &'a [Param],
    libraries: Vec<(&'a str, &'a str)>,
}

impl<'a> SpecFingerprint<'a> {
    fn from_spec(spec: &'a ContractSpec) -> Self {
        Self {
            artifact: &spec.artifact,
            constructor: &spec.constructor,
            libraries: spec
                .libraries
                .iter()
                .map(|(symbol, contract)| (symbol.as_str(), contract.as_str()))
                .collect(),
        }
    }

    fn compute_hash(&self) -> String {
        let json = serde_json::to_string(self).expect("SpecFingerprint serialization should never fail");

        let mut hasher = Sha256::new();
        hasher.update(json.as_bytes());
        hex::encode(hasher.finalize())
    }
}

/// SHA-256 fingerprint of a spec's deployment-relevant fields.
pub fn spec_fingerprint(spec: &ContractSpec) -> String {
    SpecFingerprint::from_spec(spec).compute_hash()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ContractOrigin {
    /// Created by a run through this ledger.
    Deployed,
    /// Bound to an address supplied by the operator.
    Attached,
}

/// A contract whose address is known to the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployedContract {
    pub name: String,
    pub artifact: String,
    pub address: Address,
    pub origin: ContractOrigin,
    /// Creation receipt, absent for attached contracts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receipt: Option<TxReceipt>,
    pub fingerprint: String,
    /// Unix timestamp of the record.
    pub recorded_at: i64,
}

impl DeployedContract {
    pub fn deployed(spec: &ContractSpec, address: Address, receipt: TxReceipt) -> Self {
        Self {
            name: spec.name.clone(),
            artifact: spec.artifact.clone(),
            address,
            origin: ContractOrigin::Deployed,
            receipt: Some(receipt),
            fingerprint: spec_fingerprint(spec),
            recorded_at: chrono::Utc::now().timestamp(),
        }
    }

    pub fn attached(spec: &ContractSpec, address: Address) -> Self {
        Self {
            name: spec.name.clone(),
            artifact: spec.artifact.clone(),
            address,
            origin: ContractOrigin::Attached,
            receipt: None,
            fingerprint: spec_fingerprint(spec),
            recorded_at: chrono::Utc::now().timestamp(),
        }
    }
}

/// A confirmed farm pool registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisteredPool {
    pub index: usize,
    pub weight: u64,
    pub behavior: BehaviorType,
    pub lp_token: Address,
    pub secondary_reward: Address,
    pub controller: Address,
    /// Absent for pools found on the farm rather than registered by a recorded run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<B256>,
}

/// Exclusive handle on the ledger file.
#[derive(Debug)]
struct LedgerFile {
    path: PathBuf,
    _lock: File,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Ledger {
    pub network: String,
    pub chain_id: u64,
    #[serde(default)]
    contracts: Vec<DeployedContract>,
    /// Keys of completed configuration calls, see [`Ledger::config_key`].
    #[serde(default)]
    configured: Vec<String>,
    #[serde(default)]
    pools: Vec<RegisteredPool>,
    #[serde(skip)]
    file: Option<LedgerFile>,
}

impl Ledger {
    /// An in-memory ledger that is never persisted.
    pub fn new(network: impl Into<String>, chain_id: u64) -> Self {
        Self {
            network: network.into(),
            chain_id,
            contracts: Vec::new(),
            configured: Vec::new(),
            pools: Vec::new(),
            file: None,
        }
    }

    /// Lock and load the ledger at `path`, creating it if missing.
    ///
    /// Attached entries of a previous run are dropped: attach addresses always come
    /// from the current configuration.
    ///
    /// # Arguments
    /// * `path` - Path of the JSON ledger; a `.lock` file is created next to it
    /// * `network` - Network name stored in a new ledger
    /// * `chain_id` - Chain the ledger must belong to
    ///
    /// # Returns
    /// The locked ledger, or an error if it is locked by another run, unreadable or
    /// recorded for another chain.
    pub fn open(path: &Path, network: &str, chain_id: u64) -> Result<Self, DeployError> {
        Self::open_inner(path, network, chain_id).map_err(|e| match e.downcast::<ConfigError>() {
            Ok(config) => DeployError::Configuration(config),
            Err(other) => DeployError::Ledger(other),
        })
    }

    fn open_inner(path: &Path, network: &str, chain_id: u64) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create ledger directory {}", parent.display()))?;
        }

        let lock_path = path.with_extension("lock");
        let lock = File::create(&lock_path)
            .with_context(|| format!("Failed to create lock file {}", lock_path.display()))?;
        lock.try_lock_exclusive().with_context(|| {
            format!(
                "Ledger {} is locked by another run ({})",
                path.display(),
                lock_path.display()
            )
        })?;

        let mut ledger = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read ledger from {}", path.display()))?;
            let mut ledger: Self =
                serde_json::from_str(&content).context("Failed to parse ledger JSON")?;

            if ledger.chain_id != chain_id {
                return Err(ConfigError::ChainMismatch {
                    expected: chain_id,
                    actual: ledger.chain_id,
                }
                .into());
            }
            ledger.contracts.retain(|c| c.origin == ContractOrigin::Deployed);

            tracing::info!(
                path = %path.display(),
                contracts = ledger.contracts.len(),
                configured = ledger.configured.len(),
                pools = ledger.pools.len(),
                "Resuming from ledger"
            );
            ledger
        } else {
            tracing::info!(path = %path.display(), "Starting new ledger");
            Self::new(network, chain_id)
        };

        ledger.network = network.to_string();
        ledger.file = Some(LedgerFile {
            path: path.to_path_buf(),
            _lock: lock,
        });
        ledger.persist()?;
        Ok(ledger)
    }

    /// Read a ledger file without locking it.
    pub fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            anyhow::bail!("Ledger file does not exist: {}", path.display());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read ledger from {}", path.display()))?;
        serde_json::from_str(&content).context("Failed to parse ledger JSON")
    }

    pub fn path(&self) -> Option<&Path> {
        self.file.as_ref().map(|f| f.path.as_path())
    }

    pub fn contracts(&self) -> &[DeployedContract] {
        &self.contracts
    }

    pub fn pools(&self) -> &[RegisteredPool] {
        &self.pools
    }

    pub fn contract(&self, name: &str) -> Option<&DeployedContract> {
        self.contracts.iter().find(|c| c.name == name)
    }

    pub fn address_of(&self, name: &str) -> Option<Address> {
        self.contract(name).map(|c| c.address)
    }

    /// Number of contracts created (not attached) through this ledger.
    pub fn deployed_count(&self) -> usize {
        self.contracts
            .iter()
            .filter(|c| c.origin == ContractOrigin::Deployed)
            .count()
    }

    /// Append a contract. Each name is recorded at most once.
    pub fn record_contract(&mut self, contract: DeployedContract) -> Result<(), DeployError> {
        if self.contract(&contract.name).is_some() {
            return Err(DeployError::Ledger(anyhow::anyhow!(
                "contract `{}` is already recorded",
                contract.name
            )));
        }
        self.contracts.push(contract);
        self.persist_or_fail()
    }

    /// Key identifying a configuration call across runs.
    pub fn config_key(owner: &str, call: usize) -> String {
        format!("{owner}#{call}")
    }

    pub fn is_configured(&self, key: &str) -> bool {
        self.configured.iter().any(|k| k == key)
    }

    pub fn record_configured(&mut self, key: String) -> Result<(), DeployError> {
        if self.is_configured(&key) {
            return Err(DeployError::Ledger(anyhow::anyhow!(
                "configuration call `{key}` is already recorded"
            )));
        }
        self.configured.push(key);
        self.persist_or_fail()
    }

    pub fn pool(&self, index: usize) -> Option<&RegisteredPool> {
        self.pools.get(index)
    }

    /// Append a pool. Indices are dense and start at zero.
    pub fn record_pool(&mut self, pool: RegisteredPool) -> Result<(), DeployError> {
        if pool.index != self.pools.len() {
            return Err(DeployError::Ledger(anyhow::anyhow!(
                "pool {} recorded out of order, next index is {}",
                pool.index,
                self.pools.len()
            )));
        }
        self.pools.push(pool);
        self.persist_or_fail()
    }

    fn persist_or_fail(&self) -> Result<(), DeployError> {
        self.persist().map_err(DeployError::Ledger)
    }

    /// Write the ledger next to its final path, then rename it into place.
    fn persist(&self) -> anyhow::Result<()> {
        let Some(file) = &self.file else {
            return Ok(());
        };

        let json = serde_json::to_string_pretty(self).context("Failed to serialize ledger")?;
        let tmp = file.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)
            .with_context(|| format!("Failed to write ledger to {}", tmp.display()))?;
        std::fs::rename(&tmp, &file.path)
            .with_context(|| format!("Failed to move ledger into {}", file.path.display()))?;

        tracing::trace!(path = %file.path.display(), "Ledger saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::{ContractSpec, Param};
    use tempdir::TempDir;

    fn receipt(n: u8) -> TxReceipt {
        TxReceipt {
            tx_hash: B256::with_last_byte(n),
            block_number: n as u64,
            contract_address: Some(Address::with_last_byte(n)),
            success: true,
            gas_used: 100_000,
        }
    }

    #[test]
    fn test_fingerprint_determinism() {
        let spec = ContractSpec::deploy("farm", "SnackShack")
            .arg(Param::contract("snack_token"))
            .arg(Param::uint(5));

        let hash1 = spec_fingerprint(&spec);
        let hash2 = spec_fingerprint(&spec.clone());
        assert_eq!(hash1, hash2, "Hash should be deterministic");
        assert_eq!(hash1.len(), 64, "SHA-256 hash should be 64 hex characters");
    }

    #[test]
    fn test_fingerprint_changes_with_constructor() {
        let spec = ContractSpec::deploy("farm", "SnackShack").arg(Param::uint(5));
        let changed = ContractSpec::deploy("farm", "SnackShack").arg(Param::uint(6));
        assert_ne!(spec_fingerprint(&spec), spec_fingerprint(&changed));
    }

    #[test]
    fn test_fingerprint_ignores_mode_and_config_calls() {
        let spec = ContractSpec::deploy("snack_token", "SnackToken");
        let attached = ContractSpec::attach("snack_token", "SnackToken", Address::with_last_byte(9))
            .then(crate::topology::ConfigCall::mint("snack_token"));
        assert_eq!(spec_fingerprint(&spec), spec_fingerprint(&attached));
    }

    #[test]
    fn test_contracts_are_recorded_once() {
        let mut ledger = Ledger::new("rinkeby", 4);
        let spec = ContractSpec::deploy("snack_token", "SnackToken");

        ledger
            .record_contract(DeployedContract::deployed(&spec, Address::with_last_byte(1), receipt(1)))
            .unwrap();
        let err = ledger
            .record_contract(DeployedContract::deployed(&spec, Address::with_last_byte(2), receipt(2)))
            .unwrap_err();

        assert!(matches!(err, DeployError::Ledger(_)));
        assert_eq!(ledger.address_of("snack_token"), Some(Address::with_last_byte(1)));
    }

    #[test]
    fn test_pools_must_be_recorded_in_order() {
        let mut ledger = Ledger::new("rinkeby", 4);
        let pool = |index| RegisteredPool {
            index,
            weight: 1000,
            behavior: BehaviorType::Standard,
            lp_token: Address::with_last_byte(1),
            secondary_reward: Address::ZERO,
            controller: Address::with_last_byte(2),
            tx_hash: Some(B256::ZERO),
        };

        assert!(ledger.record_pool(pool(1)).is_err());
        ledger.record_pool(pool(0)).unwrap();
        ledger.record_pool(pool(1)).unwrap();
        assert_eq!(ledger.pools().len(), 2);
    }

    #[test]
    fn test_open_persists_and_resumes() {
        let dir = TempDir::new("shack-test").expect("Failed to create temp dir");
        let path = dir.path().join("ledger.json");
        let token = ContractSpec::deploy("snack_token", "SnackToken");
        let nft = ContractSpec::attach("nft", "SudoInu", Address::with_last_byte(5));

        {
            let mut ledger = Ledger::open(&path, "rinkeby", 4).unwrap();
            ledger
                .record_contract(DeployedContract::deployed(&token, Address::with_last_byte(1), receipt(1)))
                .unwrap();
            ledger
                .record_contract(DeployedContract::attached(&nft, Address::with_last_byte(5)))
                .unwrap();
            ledger.record_configured(Ledger::config_key("farm", 0)).unwrap();
        }

        let ledger = Ledger::open(&path, "rinkeby", 4).unwrap();
        assert_eq!(ledger.contracts().len(), 1, "Attached entries are not resumed");
        assert_eq!(ledger.address_of("snack_token"), Some(Address::with_last_byte(1)));
        assert!(ledger.is_configured("farm#0"));
    }

    #[test]
    fn test_open_rejects_other_chain() {
        let dir = TempDir::new("shack-test").expect("Failed to create temp dir");
        let path = dir.path().join("ledger.json");
        drop(Ledger::open(&path, "rinkeby", 4).unwrap());

        let err = Ledger::open(&path, "mainnet", 1).unwrap_err();
        assert!(matches!(
            err,
            DeployError::Configuration(ConfigError::ChainMismatch { expected: 1, actual: 4 })
        ));
    }

    #[test]
    fn test_open_is_exclusive() {
        let dir = TempDir::new("shack-test").expect("Failed to create temp dir");
        let path = dir.path().join("ledger.json");

        let _held = Ledger::open(&path, "rinkeby", 4).unwrap();
        assert!(matches!(
            Ledger::open(&path, "rinkeby", 4),
            Err(DeployError::Ledger(_))
        ));
    }

    #[test]
    fn test_load_corrupted_file() {
        let dir = TempDir::new("shack-test").expect("Failed to create temp dir");
        let path = dir.path().join("ledger.json");
        std::fs::write(&path, "{ invalid json }").expect("Failed to write corrupted file");

        assert!(Ledger::load_from_file(&path).is_err());
        assert!(Ledger::load_from_file(&dir.path().join("missing.json")).is_err());
    }
}
