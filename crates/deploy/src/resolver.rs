//! Dependency resolution: validates a topology and turns it into an ordered plan.
//!
//! The topology is declared in deployment order. Resolution does not reorder it;
//! it checks that every reference points strictly backwards and fails fast otherwise,
//! before anything touches the network.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use derive_more::Deref;

use crate::{
    error::ConfigError,
    topology::{DeployMode, FARM, Topology},
};

/// One unit of work in a deployment run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlanStep {
    /// Deploy `topology.contracts[contract]`.
    Deploy { contract: usize },
    /// Bind `topology.contracts[contract]` to its known address.
    Attach { contract: usize },
    /// Run `topology.contracts[contract].post_deploy[call]`.
    Configure { contract: usize, call: usize },
    /// Register `topology.pools[index]` in the farm.
    RegisterPool { index: usize },
}

impl PlanStep {
    /// Whether the step sends a transaction.
    pub fn is_write(&self) -> bool {
        !matches!(self, PlanStep::Attach { .. })
    }
}

/// A validated, totally ordered execution plan.
#[derive(Debug, Clone, Deref)]
pub struct DeploymentPlan {
    #[deref]
    steps: Vec<PlanStep>,
    topology: Topology,
}

impl DeploymentPlan {
    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn steps(&self) -> &[PlanStep] {
        &self.steps
    }

    /// Human-readable description of a step.
    pub fn describe(&self, step: &PlanStep) -> String {
        let contracts = &self.topology.contracts;
        match *step {
            PlanStep::Deploy { contract } => {
                let spec = &contracts[contract];
                format!("deploy {} ({})", spec.name, spec.artifact)
            }
            PlanStep::Attach { contract } => {
                let spec = &contracts[contract];
                match spec.mode {
                    DeployMode::AttachExisting { address } => {
                        format!("attach {} ({}) at {address}", spec.name, spec.artifact)
                    }
                    DeployMode::DeployNew => format!("attach {}", spec.name),
                }
            }
            PlanStep::Configure { contract, call } => {
                contracts[contract].post_deploy[call].describe()
            }
            PlanStep::RegisterPool { index } => {
                let pool = &self.topology.pools[index];
                format!(
                    "register pool {index} (weight {}, {})",
                    pool.weight, pool.behavior
                )
            }
        }
    }
}

/// Orders and validates a [`Topology`].
pub struct DependencyResolver;

impl DependencyResolver {
    /// Validate the topology and build its plan.
    pub fn resolve(topology: Topology) -> Result<DeploymentPlan, ConfigError> {
        let positions = Self::index(&topology)?;

        for (i, spec) in topology.contracts.iter().enumerate() {
            for dependency in spec.dependencies() {
                Self::check_backward(&positions, &spec.name, dependency, |j| j < i)?;
            }
            for call in &spec.post_deploy {
                for dependency in call.dependencies() {
                    Self::check_backward(&positions, &spec.name, dependency, |j| j <= i)?;
                }
            }
        }

        for (index, pool) in topology.pools.iter().enumerate() {
            if let Some(dependency) = pool
                .dependencies()
                .into_iter()
                .chain([FARM])
                .find(|d| !positions.contains_key(d))
            {
                return Err(ConfigError::UnknownPoolDependency {
                    index,
                    dependency: dependency.to_string(),
                });
            }
        }

        let mut steps = Vec::new();
        for (contract, spec) in topology.contracts.iter().enumerate() {
            if spec.is_attached() {
                if !spec.post_deploy.is_empty() {
                    tracing::debug!(
                        contract = %spec.name,
                        calls = spec.post_deploy.len(),
                        "Attached contract keeps its existing configuration"
                    );
                }
                steps.push(PlanStep::Attach { contract });
                continue;
            }
            steps.push(PlanStep::Deploy { contract });
            steps.extend((0..spec.post_deploy.len()).map(|call| PlanStep::Configure { contract, call }));
        }
        steps.extend((0..topology.pools.len()).map(|index| PlanStep::RegisterPool { index }));

        tracing::debug!(
            contracts = topology.contracts.len(),
            pools = topology.pools.len(),
            steps = steps.len(),
            "Deployment plan resolved"
        );

        Ok(DeploymentPlan { steps, topology })
    }

    /// Direct dependencies of every contract, as an explicit DAG.
    pub fn dependency_graph(topology: &Topology) -> BTreeMap<String, BTreeSet<String>> {
        topology
            .contracts
            .iter()
            .map(|spec| {
                let deps = spec
                    .dependencies()
                    .into_iter()
                    .chain(spec.post_deploy.iter().flat_map(|c| c.dependencies()))
                    .filter(|d| *d != spec.name)
                    .map(str::to_string)
                    .collect();
                (spec.name.clone(), deps)
            })
            .collect()
    }

    fn index(topology: &Topology) -> Result<HashMap<&str, usize>, ConfigError> {
        let mut positions = HashMap::with_capacity(topology.contracts.len());
        for (i, spec) in topology.contracts.iter().enumerate() {
            if positions.insert(spec.name.as_str(), i).is_some() {
                return Err(ConfigError::DuplicateContract(spec.name.clone()));
            }
        }
        Ok(positions)
    }

    fn check_backward(
        positions: &HashMap<&str, usize>,
        contract: &str,
        dependency: &str,
        allowed: impl Fn(usize) -> bool,
    ) -> Result<(), ConfigError> {
        match positions.get(dependency) {
            None => Err(ConfigError::UnknownDependency {
                contract: contract.to_string(),
                dependency: dependency.to_string(),
            }),
            Some(&j) if !allowed(j) => Err(ConfigError::ForwardReference {
                contract: contract.to_string(),
                dependency: dependency.to_string(),
            }),
            Some(_) => Ok(()),
        }
    }
}
