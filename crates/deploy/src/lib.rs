//! shack-deploy - Deployment library for the Snack Shack protocol.
//!
//! This crate provides the deployment engine: it resolves the contract topology into an
//! ordered plan, links and deploys contracts, runs their configuration calls and
//! registers the farm pools, one confirmed transaction at a time, recording every
//! confirmed step in a resumable ledger.

mod error;
pub use error::{ConfigError, DeployError, NetworkError, Result};

pub mod contracts;

mod topology;
pub use topology::{
    AddressRef, BehaviorType, ConfigAction, ConfigCall, ContractSpec, ControllerConfig, DeployMode,
    FARM, Param, PoolRegistration, Topology,
};

mod artifact;
pub use artifact::{Artifact, ArtifactStore, LinkOffset};

mod resolver;
pub use resolver::{DependencyResolver, DeploymentPlan, PlanStep};

pub mod network;
pub use network::{ConfirmationPolicy, DeployRequest, NetworkClient, PendingTx, RpcClient, TxReceipt};

mod gate;
pub use gate::{ConfirmationGate, DEFAULT_QUIESCENCE};

mod ledger;
pub use ledger::{ContractOrigin, DeployedContract, Ledger, RegisteredPool, spec_fingerprint};

mod pools;
pub use pools::{PoolRegistrationSequencer, Registration, ResolvedPool};

mod orchestrator;
pub use orchestrator::{Orchestrator, OrchestratorBuilder, RunReport, RunState};

mod registry;
pub use registry::{Environment, Network, SQRT_MATH_SYMBOL, protocol_topology};
