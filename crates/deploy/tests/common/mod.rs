//! In-memory chain used by the integration tests.

#![allow(dead_code)]

use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, Mutex},
    time::Duration,
};

use alloy_core::{
    dyn_abi::DynSolValue,
    primitives::{Address, B256, Bytes, U256},
    sol_types::SolCall,
};
use shack_deploy::{
    Artifact, ArtifactStore, DeployRequest, LinkOffset, NetworkClient, NetworkError, PendingTx,
    SQRT_MATH_SYMBOL, TxReceipt, contracts::ISnackShack,
};

pub const DEPLOYER: Address = Address::new([0xd0; 20]);

/// How the nth write fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    Reject,
    Timeout,
    Revert,
}

/// A write as the chain saw it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Write {
    Deploy {
        contract: String,
        address: Address,
        init_code: Bytes,
    },
    Send {
        to: Address,
        calldata: Bytes,
    },
}

impl Write {
    pub fn deployed(&self) -> Option<&str> {
        match self {
            Write::Deploy { contract, .. } => Some(contract),
            Write::Send { .. } => None,
        }
    }
}

#[derive(Default)]
struct ChainState {
    writes: Vec<Write>,
    reads: usize,
    block: u64,
    next_address: u64,
    /// Transaction hash -> (write number, created contract).
    pending: HashMap<B256, (usize, Option<Address>)>,
    names: HashMap<Address, String>,
    /// Farm address -> registered `add` calls.
    farm_pools: HashMap<Address, Vec<ISnackShack::addCall>>,
    fail_at: Option<(usize, Failure)>,
    failing_reads: bool,
    pool_length_offset: u64,
}

/// Shared handle to an in-memory chain. Clones observe the same state.
#[derive(Clone, Default)]
pub struct MockNetwork {
    state: Arc<Mutex<ChainState>>,
}

impl MockNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the `nth` write (1-based, counted over the chain's lifetime).
    pub fn fail_at(self, nth: usize, failure: Failure) -> Self {
        self.state.lock().unwrap().fail_at = Some((nth, failure));
        self
    }

    pub fn clear_failure(&self) {
        self.state.lock().unwrap().fail_at = None;
    }

    pub fn failing_reads(self) -> Self {
        self.state.lock().unwrap().failing_reads = true;
        self
    }

    /// Make `poolLength()` report `offset` more pools than registered.
    pub fn pool_length_offset(self, offset: u64) -> Self {
        self.state.lock().unwrap().pool_length_offset = offset;
        self
    }

    pub fn writes(&self) -> Vec<Write> {
        self.state.lock().unwrap().writes.clone()
    }

    pub fn reads(&self) -> usize {
        self.state.lock().unwrap().reads
    }

    pub fn deployed(&self) -> Vec<String> {
        self.writes()
            .iter()
            .filter_map(|w| w.deployed().map(str::to_string))
            .collect()
    }

    pub fn address_of(&self, contract: &str) -> Option<Address> {
        self.writes().iter().find_map(|w| match w {
            Write::Deploy { contract: c, address, .. } if c == contract => Some(*address),
            _ => None,
        })
    }

    pub fn farm_pools(&self, farm: Address) -> Vec<ISnackShack::addCall> {
        self.state
            .lock()
            .unwrap()
            .farm_pools
            .get(&farm)
            .cloned()
            .unwrap_or_default()
    }

    fn submit(&self, write: Write, created: Option<Address>) -> Result<PendingTx, NetworkError> {
        let mut state = self.state.lock().unwrap();
        let number = state.writes.len() + 1;
        if state.fail_at == Some((number, Failure::Reject)) {
            return Err(NetworkError::Rejected("nonce too low".to_string()));
        }

        if let Write::Send { to, calldata } = &write {
            if let Ok(add) = ISnackShack::addCall::abi_decode(calldata, true) {
                state.farm_pools.entry(*to).or_default().push(add);
            }
        }
        state.writes.push(write);

        let tx_hash = B256::from(U256::from(number));
        state.pending.insert(tx_hash, (number, created));
        Ok(PendingTx { tx_hash })
    }
}

impl NetworkClient for MockNetwork {
    fn sender(&self) -> Address {
        DEPLOYER
    }

    async fn deploy(&self, request: &DeployRequest) -> Result<PendingTx, NetworkError> {
        let address = {
            let mut state = self.state.lock().unwrap();
            state.next_address += 1;
            let address = Address::left_padding_from(&(0xc0_0000 + state.next_address).to_be_bytes());
            state.names.insert(address, format!("{} token", request.contract));
            address
        };

        self.submit(
            Write::Deploy {
                contract: request.contract.clone(),
                address,
                init_code: request.init_code.clone(),
            },
            Some(address),
        )
    }

    async fn send(&self, to: Address, calldata: Bytes) -> Result<PendingTx, NetworkError> {
        self.submit(Write::Send { to, calldata }, None)
    }

    async fn call(&self, to: Address, calldata: Bytes) -> Result<Bytes, NetworkError> {
        let mut state = self.state.lock().unwrap();
        state.reads += 1;
        if state.failing_reads {
            return Err(NetworkError::Transport("connection reset".to_string()));
        }

        if let Ok(info) = ISnackShack::poolInfoCall::abi_decode(&calldata, true) {
            let add = state
                .farm_pools
                .get(&to)
                .and_then(|pools| pools.get(info.pid.saturating_to::<usize>()))
                .ok_or_else(|| NetworkError::Rejected("execution reverted".to_string()))?;
            return Ok(DynSolValue::Tuple(vec![
                DynSolValue::Address(add.lpToken),
                DynSolValue::Uint(add.allocPoint, 256),
                DynSolValue::Uint(U256::from(add.farmType), 8),
                DynSolValue::Address(add.rewarder),
                DynSolValue::Address(add.controller),
            ])
            .abi_encode_params()
            .into());
        }

        let value = if calldata.starts_with(&ISnackShack::poolLengthCall::SELECTOR) {
            let registered = state.farm_pools.get(&to).map_or(0, Vec::len) as u64;
            DynSolValue::Uint(U256::from(registered + state.pool_length_offset), 256)
        } else {
            let name = state
                .names
                .get(&to)
                .cloned()
                .ok_or_else(|| NetworkError::Rejected("execution reverted".to_string()))?;
            DynSolValue::String(name)
        };
        Ok(DynSolValue::Tuple(vec![value]).abi_encode_params().into())
    }

    async fn wait_for_confirmation(&self, pending: &PendingTx) -> Result<TxReceipt, NetworkError> {
        let mut state = self.state.lock().unwrap();
        let (number, created) = state
            .pending
            .remove(&pending.tx_hash)
            .ok_or_else(|| NetworkError::Transport("unknown transaction".to_string()))?;

        match state.fail_at {
            Some((n, Failure::Timeout)) if n == number => {
                return Err(NetworkError::Timeout {
                    tx_hash: pending.tx_hash,
                    waited: Duration::from_secs(300),
                });
            }
            _ => {}
        }

        state.block += 1;
        Ok(TxReceipt {
            tx_hash: pending.tx_hash,
            block_number: state.block,
            contract_address: created,
            success: state.fail_at != Some((number, Failure::Revert)),
            gas_used: 21_000,
        })
    }
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// An artifact without library links.
pub fn artifact(name: &str) -> Artifact {
    Artifact {
        contract_name: name.to_string(),
        source_name: format!("contracts/{name}.sol"),
        bytecode: "0x6080604052".to_string(),
        link_references: BTreeMap::new(),
    }
}

/// An artifact with one `SqrtMath` placeholder after two bytes of code.
pub fn linked_artifact(name: &str) -> Artifact {
    let (source, library) = SQRT_MATH_SYMBOL
        .split_once(':')
        .expect("symbol is qualified");
    Artifact {
        contract_name: name.to_string(),
        source_name: format!("contracts/{name}.sol"),
        bytecode: "0x6080__$0123456789abcdef0123456789abcdef01$__00".to_string(),
        link_references: BTreeMap::from([(
            source.to_string(),
            BTreeMap::from([(
                library.to_string(),
                vec![LinkOffset { start: 2, length: 20 }],
            )]),
        )]),
    }
}

pub fn store(artifacts: impl IntoIterator<Item = Artifact>) -> ArtifactStore {
    let mut store = ArtifactStore::new();
    for artifact in artifacts {
        store.insert(artifact);
    }
    store
}

/// Artifacts for every contract type of the protocol topology.
pub fn protocol_artifacts() -> ArtifactStore {
    store([
        artifact("MockERC20"),
        artifact("SnackToken"),
        artifact("SudoInu"),
        artifact("WrappedXminu"),
        artifact("SudoInuLP"),
        artifact("SqrtMath"),
        linked_artifact("SnackShack"),
        artifact("DefaultController"),
        linked_artifact("SudoController"),
    ])
}
