//! Drives a [`DeploymentPlan`] against a [`NetworkClient`].
//!
//! Steps run strictly in plan order. Every write goes through the [`ConfirmationGate`]
//! and every confirmed step is appended to the [`Ledger`] before the next one starts,
//! so a failed run leaves behind exactly the prefix that made it on chain.

use std::{collections::BTreeMap, time::Duration};

use alloy_core::{
    dyn_abi::DynSolValue,
    primitives::{Address, Bytes},
    sol_types::SolCall,
};

use crate::{
    artifact::ArtifactStore,
    contracts::{IMintableCollection, IMintableToken, IOwnable, read_name},
    error::{ConfigError, DeployError},
    gate::{ConfirmationGate, DEFAULT_QUIESCENCE},
    ledger::{DeployedContract, Ledger, RegisteredPool, spec_fingerprint},
    network::{DeployRequest, NetworkClient},
    pools::{PoolRegistrationSequencer, Registration, ResolvedPool},
    resolver::{DeploymentPlan, PlanStep},
    topology::{
        AddressRef, ConfigAction, ConfigCall, ContractSpec, DeployMode, FARM, Param, PoolRegistration,
        Topology,
    },
};

/// Lifecycle of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunState {
    Planning,
    Executing { step: usize },
    RegisteringPools { entry: usize },
    Complete,
    Failed { reason: String },
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Complete | RunState::Failed { .. })
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunState::Planning => write!(f, "planning"),
            RunState::Executing { step } => write!(f, "executing step {step}"),
            RunState::RegisteringPools { entry } => write!(f, "registering pool {entry}"),
            RunState::Complete => write!(f, "complete"),
            RunState::Failed { reason } => write!(f, "failed: {reason}"),
        }
    }
}

/// Summary of a completed run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    /// Every contract known to the run, in plan order.
    pub contracts: Vec<DeployedContract>,
    pub pools: Vec<RegisteredPool>,
    /// Transactions submitted by this run.
    pub writes: usize,
    /// Steps found already completed in the ledger.
    pub skipped: usize,
}

impl RunReport {
    pub fn address_of(&self, name: &str) -> Option<Address> {
        self.contracts.iter().find(|c| c.name == name).map(|c| c.address)
    }
}

/// Builder for an [`Orchestrator`].
#[derive(Debug)]
pub struct OrchestratorBuilder<C> {
    client: C,
    artifacts: ArtifactStore,
    quiescence: Duration,
    ledger: Option<Ledger>,
}

impl<C: NetworkClient> OrchestratorBuilder<C> {
    pub fn new(client: C) -> Self {
        Self {
            client,
            artifacts: ArtifactStore::default(),
            quiescence: DEFAULT_QUIESCENCE,
            ledger: None,
        }
    }

    /// Set the compiled artifacts to deploy from.
    pub fn artifacts(mut self, artifacts: ArtifactStore) -> Self {
        self.artifacts = artifacts;
        self
    }

    /// Set the pause enforced after each confirmed write.
    pub fn quiescence(mut self, quiescence: Duration) -> Self {
        self.quiescence = quiescence;
        self
    }

    /// Resume from (and record into) the given ledger.
    ///
    /// Without one the run keeps an in-memory ledger only.
    pub fn ledger(mut self, ledger: Ledger) -> Self {
        self.ledger = Some(ledger);
        self
    }

    pub fn build(self) -> Orchestrator<C> {
        Orchestrator {
            client: self.client,
            artifacts: self.artifacts,
            gate: ConfirmationGate::new(self.quiescence),
            ledger: self.ledger.unwrap_or_else(|| Ledger::new("unnamed", 0)),
            state: RunState::Planning,
        }
    }
}

/// Executes deployment plans for a single signing account.
#[derive(Debug)]
pub struct Orchestrator<C> {
    client: C,
    artifacts: ArtifactStore,
    gate: ConfirmationGate,
    ledger: Ledger,
    state: RunState,
}

impl<C: NetworkClient> Orchestrator<C> {
    pub fn builder(client: C) -> OrchestratorBuilder<C> {
        OrchestratorBuilder::new(client)
    }

    pub fn state(&self) -> &RunState {
        &self.state
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn into_ledger(self) -> Ledger {
        self.ledger
    }

    /// Execute `plan` to completion or to the first fatal error.
    ///
    /// Artifacts and the ledger are checked against the plan before any network call.
    /// Steps already recorded in the ledger are skipped. Nothing is rolled back on failure:
    /// the ledger keeps every confirmed step and the state becomes [`RunState::Failed`].
    ///
    /// # Arguments
    /// * `plan` - A plan produced by [`crate::DependencyResolver::resolve`]
    ///
    /// # Returns
    /// A report of every known contract and pool, or the error that stopped the run.
    pub async fn run(&mut self, plan: &DeploymentPlan) -> Result<RunReport, DeployError> {
        self.state = RunState::Planning;
        let submitted_before = self.gate.submitted();

        match self.execute(plan).await {
            Ok(skipped) => {
                self.state = RunState::Complete;
                let report = self.report(plan.topology(), submitted_before, skipped);
                tracing::info!(
                    contracts = report.contracts.len(),
                    pools = report.pools.len(),
                    writes = report.writes,
                    skipped = report.skipped,
                    "Deployment complete"
                );
                Ok(report)
            }
            Err(e) => {
                tracing::error!(state = %self.state, error = %e, "Deployment failed");
                self.state = RunState::Failed { reason: e.to_string() };
                Err(e)
            }
        }
    }

    async fn execute(&mut self, plan: &DeploymentPlan) -> Result<usize, DeployError> {
        let topology = plan.topology();
        self.artifacts.verify(topology)?;
        self.check_ledger(topology)?;

        tracing::info!(
            steps = plan.len(),
            sender = %self.client.sender(),
            recorded = self.ledger.contracts().len(),
            "Starting deployment"
        );

        let mut skipped = 0;
        for (step_index, step) in plan.iter().enumerate() {
            let done = match *step {
                PlanStep::Attach { contract } => {
                    self.state = RunState::Executing { step: step_index };
                    self.attach(&topology.contracts[contract])?
                }
                PlanStep::Deploy { contract } => {
                    self.state = RunState::Executing { step: step_index };
                    self.deploy(&topology.contracts[contract]).await?
                }
                PlanStep::Configure { contract, call } => {
                    self.state = RunState::Executing { step: step_index };
                    let owner = &topology.contracts[contract];
                    self.configure(owner, call, &owner.post_deploy[call]).await?
                }
                PlanStep::RegisterPool { index } => {
                    self.state = RunState::RegisteringPools { entry: index };
                    self.register_pool(index, &topology.pools[index]).await?
                }
            };
            if !done {
                skipped += 1;
            }
        }

        Ok(skipped)
    }

    /// Reject a ledger that contradicts the topology, before any network call.
    fn check_ledger(&self, topology: &Topology) -> Result<(), DeployError> {
        for recorded in self.ledger.contracts() {
            let Some(spec) = topology.get(&recorded.name) else {
                tracing::warn!(contract = %recorded.name, "Ledger entry is not part of the topology");
                continue;
            };
            match spec.mode {
                DeployMode::AttachExisting { address } if address != recorded.address => {
                    return Err(ConfigError::ConflictingAddress {
                        contract: spec.name.clone(),
                        recorded: recorded.address,
                        configured: address,
                    }
                    .into());
                }
                DeployMode::AttachExisting { .. } => {}
                DeployMode::DeployNew if recorded.fingerprint != spec_fingerprint(spec) => {
                    return Err(ConfigError::SpecDrift(spec.name.clone()).into());
                }
                DeployMode::DeployNew => {}
            }
        }
        Ok(())
    }

    /// Bind an attached spec. Returns `false` if it was already known.
    fn attach(&mut self, spec: &ContractSpec) -> Result<bool, DeployError> {
        let DeployMode::AttachExisting { address } = spec.mode else {
            return Err(ConfigError::Invalid(format!("`{}` is not an attached contract", spec.name)).into());
        };

        if self.ledger.contract(&spec.name).is_some() {
            tracing::info!(contract = %spec.name, %address, "Using recorded contract");
            return Ok(false);
        }

        self.ledger.record_contract(DeployedContract::attached(spec, address))?;
        tracing::info!(contract = %spec.name, artifact = %spec.artifact, %address, "Attached existing contract");
        Ok(true)
    }

    /// Deploy a spec. Returns `false` if the ledger already holds it.
    async fn deploy(&mut self, spec: &ContractSpec) -> Result<bool, DeployError> {
        if let Some(recorded) = self.ledger.contract(&spec.name) {
            tracing::info!(contract = %spec.name, address = %recorded.address, "Already deployed, reusing");
            return Ok(false);
        }

        let request = self.deploy_request(spec)?;
        let action = format!("deploy {}", spec.name);
        let client = &self.client;

        let receipt = self
            .gate
            .execute(client, &action, || client.deploy(&request))
            .await?;
        let address = receipt
            .contract_address
            .ok_or_else(|| DeployError::MissingContractAddress {
                action: action.clone(),
                tx_hash: receipt.tx_hash,
            })?;

        tracing::info!(
            contract = %spec.name,
            artifact = %spec.artifact,
            %address,
            tx_hash = %receipt.tx_hash,
            "{}: {address}",
            spec.name
        );
        self.ledger
            .record_contract(DeployedContract::deployed(spec, address, receipt))?;
        Ok(true)
    }

    /// Link and encode the init code of `spec`.
    fn deploy_request(&self, spec: &ContractSpec) -> Result<DeployRequest, DeployError> {
        let libraries = spec
            .libraries
            .iter()
            .map(|(symbol, dependency)| {
                self.ledger
                    .address_of(dependency)
                    .map(|address| (symbol.clone(), address))
                    .ok_or_else(|| ConfigError::UnresolvedLink {
                        contract: spec.name.clone(),
                        symbol: symbol.clone(),
                        dependency: dependency.clone(),
                    })
            })
            .collect::<Result<BTreeMap<_, _>, _>>()?;

        let bytecode = self.artifacts.get(&spec.artifact)?.link(&spec.name, &libraries)?;

        let args = spec
            .constructor
            .iter()
            .map(|param| self.encode_param(&spec.name, param))
            .collect::<Result<Vec<_>, _>>()?;
        let encoded_args = DynSolValue::Tuple(args).abi_encode_params();

        let mut init_code = bytecode.to_vec();
        init_code.extend_from_slice(&encoded_args);

        Ok(DeployRequest {
            contract: spec.name.clone(),
            artifact: spec.artifact.clone(),
            init_code: Bytes::from(init_code),
            libraries,
        })
    }

    fn encode_param(&self, owner: &str, param: &Param) -> Result<DynSolValue, DeployError> {
        Ok(match param {
            Param::Address(address) => DynSolValue::Address(self.resolve(owner, address)?),
            Param::Uint(value) => DynSolValue::Uint(*value, 256),
            Param::Bool(value) => DynSolValue::Bool(*value),
            Param::String(value) => DynSolValue::String(value.clone()),
            Param::Tuple(fields) => DynSolValue::Tuple(
                fields
                    .iter()
                    .map(|field| self.encode_param(owner, field))
                    .collect::<Result<_, _>>()?,
            ),
        })
    }

    fn resolve(&self, owner: &str, address: &AddressRef) -> Result<Address, DeployError> {
        match address {
            AddressRef::Contract(name) => self.ledger.address_of(name).ok_or_else(|| {
                ConfigError::UnknownDependency {
                    contract: owner.to_string(),
                    dependency: name.clone(),
                }
                .into()
            }),
            AddressRef::Deployer => Ok(self.client.sender()),
            AddressRef::Zero => Ok(Address::ZERO),
            AddressRef::Literal(address) => Ok(*address),
        }
    }

    /// Run one post-deploy call. Returns `false` if the ledger already holds it.
    async fn configure(&mut self, owner: &ContractSpec, index: usize, call: &ConfigCall) -> Result<bool, DeployError> {
        let key = Ledger::config_key(&owner.name, index);
        let action = call.describe();
        if self.ledger.is_configured(&key) {
            tracing::info!(contract = %owner.name, %action, "Already configured, skipping");
            return Ok(false);
        }

        let target = self.resolve(&owner.name, &AddressRef::Contract(call.target.clone()))?;
        let calldata = match &call.action {
            ConfigAction::TransferOwnership { new_owner } => IOwnable::transferOwnershipCall {
                newOwner: self.resolve(&owner.name, new_owner)?,
            }
            .abi_encode(),
            ConfigAction::MintTo { to, amount } => IMintableToken::mintCall {
                to: self.resolve(&owner.name, to)?,
                amount: *amount,
            }
            .abi_encode(),
            ConfigAction::Mint => IMintableCollection::mintCall {}.abi_encode(),
        };

        let client = &self.client;
        let receipt = self
            .gate
            .execute(client, &action, || client.send(target, calldata.into()))
            .await?;
        self.ledger.record_configured(key)?;
        tracing::info!(%action, %target, tx_hash = %receipt.tx_hash, "Configuration call confirmed");

        if matches!(call.action, ConfigAction::MintTo { .. } | ConfigAction::Mint) {
            match read_name(&self.client, target).await {
                Ok(name) => tracing::info!(%target, "Minted: {name}"),
                Err(e) => tracing::warn!(%target, error = %e, "Minted, but could not read name"),
            }
        }
        Ok(true)
    }

    async fn register_pool(&mut self, index: usize, pool: &PoolRegistration) -> Result<bool, DeployError> {
        let farm = self.farm_address(index)?;
        let context = format!("pool {index}");
        let resolved = ResolvedPool {
            index,
            weight: pool.weight,
            behavior: pool.behavior,
            lp_token: self.resolve(&context, &pool.lp_token)?,
            secondary_reward: match &pool.secondary_reward {
                Some(reward) => self.resolve(&context, reward)?,
                None => Address::ZERO,
            },
            controller: self.resolve(&context, &pool.controller)?,
            label: pool.label.clone(),
        };

        let mut sequencer = PoolRegistrationSequencer::new(&self.client, &mut self.gate, &mut self.ledger, farm);
        Ok(matches!(sequencer.register(&resolved).await?, Registration::Registered(_)))
    }

    fn farm_address(&self, index: usize) -> Result<Address, DeployError> {
        self.ledger.address_of(FARM).ok_or_else(|| {
            ConfigError::UnknownPoolDependency {
                index,
                dependency: FARM.to_string(),
            }
            .into()
        })
    }

    fn report(&self, topology: &Topology, submitted_before: usize, skipped: usize) -> RunReport {
        let contracts = topology
            .contracts
            .iter()
            .filter_map(|spec| self.ledger.contract(&spec.name).cloned())
            .collect();

        RunReport {
            contracts,
            pools: self.ledger.pools().to_vec(),
            writes: self.gate.submitted() - submitted_before,
            skipped,
        }
    }
}
