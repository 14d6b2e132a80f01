//! Contract specs and the protocol topology they form.

use std::collections::BTreeMap;

use alloy_core::primitives::{Address, U256};
use derive_more::From;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Name of the farm contract that pools are registered in.
pub const FARM: &str = "farm";

/// An address that is resolved at execution time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum AddressRef {
    /// The address another contract in the topology ends up at.
    Contract(String),
    /// The signing account of the run.
    Deployer,
    /// The zero address.
    Zero,
    /// A fixed address.
    Literal(Address),
}

impl AddressRef {
    pub fn contract(name: impl Into<String>) -> Self {
        AddressRef::Contract(name.into())
    }

    /// The contract name this reference depends on, if any.
    pub fn dependency(&self) -> Option<&str> {
        match self {
            AddressRef::Contract(name) => Some(name),
            _ => None,
        }
    }
}

/// A typed constructor parameter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, From)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Param {
    Address(AddressRef),
    Uint(U256),
    Bool(bool),
    String(String),
    /// A struct argument, encoded as an ABI tuple.
    Tuple(Vec<Param>),
}

impl Param {
    pub fn contract(name: impl Into<String>) -> Self {
        Param::Address(AddressRef::contract(name))
    }

    pub fn uint(value: u64) -> Self {
        Param::Uint(U256::from(value))
    }

    fn collect_dependencies<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Param::Address(address) => out.extend(address.dependency()),
            Param::Tuple(fields) => fields.iter().for_each(|f| f.collect_dependencies(out)),
            Param::Uint(_) | Param::Bool(_) | Param::String(_) => {}
        }
    }
}

/// How a spec obtains its on-chain instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum DeployMode {
    DeployNew,
    AttachExisting { address: Address },
}

/// A state-mutating call performed right after its owning spec is deployed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ConfigAction {
    TransferOwnership { new_owner: AddressRef },
    MintTo { to: AddressRef, amount: U256 },
    Mint,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConfigCall {
    /// Name of the contract the call is sent to.
    pub target: String,
    #[serde(flatten)]
    pub action: ConfigAction,
}

impl ConfigCall {
    pub fn transfer_ownership(target: impl Into<String>, new_owner: AddressRef) -> Self {
        Self {
            target: target.into(),
            action: ConfigAction::TransferOwnership { new_owner },
        }
    }

    pub fn mint_to(target: impl Into<String>, to: AddressRef, amount: U256) -> Self {
        Self {
            target: target.into(),
            action: ConfigAction::MintTo { to, amount },
        }
    }

    pub fn mint(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            action: ConfigAction::Mint,
        }
    }

    /// Contract names this call needs addresses for, target included.
    pub fn dependencies(&self) -> Vec<&str> {
        let mut deps = vec![self.target.as_str()];
        match &self.action {
            ConfigAction::TransferOwnership { new_owner } => deps.extend(new_owner.dependency()),
            ConfigAction::MintTo { to, .. } => deps.extend(to.dependency()),
            ConfigAction::Mint => {}
        }
        deps
    }

    /// Human-readable label used in logs and errors.
    pub fn describe(&self) -> String {
        match &self.action {
            ConfigAction::TransferOwnership { .. } => format!("{}.transferOwnership", self.target),
            ConfigAction::MintTo { .. } => format!("{}.mint(to, amount)", self.target),
            ConfigAction::Mint => format!("{}.mint()", self.target),
        }
    }
}

/// Static description of one contract instance in the topology.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContractSpec {
    /// Unique instance name.
    pub name: String,
    /// Name of the compiled artifact (contract type).
    pub artifact: String,
    #[serde(default)]
    pub constructor: Vec<Param>,
    /// Fully qualified library symbol (`path/File.sol:Lib`) to contract name.
    #[serde(default)]
    pub libraries: BTreeMap<String, String>,
    pub mode: DeployMode,
    #[serde(default)]
    pub post_deploy: Vec<ConfigCall>,
}

impl ContractSpec {
    /// A spec deployed fresh by the run.
    pub fn deploy(name: impl Into<String>, artifact: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            artifact: artifact.into(),
            constructor: Vec::new(),
            libraries: BTreeMap::new(),
            mode: DeployMode::DeployNew,
            post_deploy: Vec::new(),
        }
    }

    /// A spec bound to an existing on-chain instance.
    pub fn attach(name: impl Into<String>, artifact: impl Into<String>, address: Address) -> Self {
        Self {
            mode: DeployMode::AttachExisting { address },
            ..Self::deploy(name, artifact)
        }
    }

    pub fn arg(mut self, param: impl Into<Param>) -> Self {
        self.constructor.push(param.into());
        self
    }

    pub fn args(mut self, params: impl IntoIterator<Item = Param>) -> Self {
        self.constructor.extend(params);
        self
    }

    pub fn link(mut self, symbol: impl Into<String>, contract: impl Into<String>) -> Self {
        self.libraries.insert(symbol.into(), contract.into());
        self
    }

    /// Chain a configuration call after this spec's deployment.
    pub fn then(mut self, call: ConfigCall) -> Self {
        self.post_deploy.push(call);
        self
    }

    pub fn is_attached(&self) -> bool {
        matches!(self.mode, DeployMode::AttachExisting { .. })
    }

    /// Contract names needed to deploy this spec (constructor and library links).
    pub fn dependencies(&self) -> Vec<&str> {
        let mut deps = Vec::new();
        for param in &self.constructor {
            param.collect_dependencies(&mut deps);
        }
        deps.extend(self.libraries.values().map(String::as_str));
        deps
    }
}

/// Farm behavior type of a registered pool.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[repr(u8)]
pub enum BehaviorType {
    Standard = 0,
    Scaled = 1,
}

impl BehaviorType {
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// One farm entry. Its index is its position in the registration list.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PoolRegistration {
    /// Allocation points.
    pub weight: u64,
    pub behavior: BehaviorType,
    pub lp_token: AddressRef,
    /// Secondary reward; `None` registers the zero address.
    #[serde(default)]
    pub secondary_reward: Option<AddressRef>,
    pub controller: AddressRef,
    /// Suffix appended to the progress log line.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl PoolRegistration {
    pub fn new(weight: u64, behavior: BehaviorType, lp_token: AddressRef, controller: AddressRef) -> Self {
        Self {
            weight,
            behavior,
            lp_token,
            secondary_reward: None,
            controller,
            label: None,
        }
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn secondary_reward(mut self, reward: AddressRef) -> Self {
        self.secondary_reward = Some(reward);
        self
    }

    pub fn dependencies(&self) -> Vec<&str> {
        let mut deps = Vec::new();
        deps.extend(self.lp_token.dependency());
        deps.extend(self.secondary_reward.as_ref().and_then(AddressRef::dependency));
        deps.extend(self.controller.dependency());
        deps
    }
}

/// Constructor configuration of a scaled-reward controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerConfig {
    pub farm: AddressRef,
    /// The liquidity pool the controller scales rewards for.
    pub pool: AddressRef,
    /// 1e18-scaled fee rate.
    pub fee: U256,
    pub delta: U256,
    pub initial_spot_price: U256,
    pub delta_per_unit_liquidity: U256,
}

impl ControllerConfig {
    /// Constructor parameters in declaration order.
    pub fn into_params(self) -> Vec<Param> {
        vec![
            Param::Address(self.farm),
            Param::Address(self.pool),
            Param::Uint(self.fee),
            Param::Uint(self.delta),
            Param::Uint(self.initial_spot_price),
            Param::Uint(self.delta_per_unit_liquidity),
        ]
    }
}

/// The full set of specs, in declared deployment order, plus the farm pools.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topology {
    pub contracts: Vec<ContractSpec>,
    #[serde(default)]
    pub pools: Vec<PoolRegistration>,
}

impl Topology {
    pub fn new(contracts: Vec<ContractSpec>, pools: Vec<PoolRegistration>) -> Self {
        Self { contracts, pools }
    }

    pub fn get(&self, name: &str) -> Option<&ContractSpec> {
        self.contracts.iter().find(|spec| spec.name == name)
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.contracts.iter().position(|spec| spec.name == name)
    }

    /// Switch the named specs to attach mode at the given addresses.
    pub fn apply_attach_overrides(
        &mut self,
        overrides: &BTreeMap<String, Address>,
    ) -> Result<(), ConfigError> {
        for (name, address) in overrides {
            let spec = self
                .contracts
                .iter_mut()
                .find(|spec| &spec.name == name)
                .ok_or_else(|| ConfigError::UnknownAttachTarget(name.clone()))?;

            tracing::debug!(contract = %name, %address, "Attaching to existing contract");
            spec.mode = DeployMode::AttachExisting { address: *address };
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dependencies_include_tuple_fields_and_links() {
        let spec = ContractSpec::deploy("lp", "SudoInuLP")
            .arg(Param::Tuple(vec![
                Param::contract("nft"),
                Param::contract("factory"),
                Param::uint(0),
                Param::Bool(true),
            ]))
            .link("contracts/lib/SqrtMath.sol:SqrtMath", "sqrt_math");

        assert_eq!(spec.dependencies(), vec!["nft", "factory", "sqrt_math"]);
    }

    #[test]
    fn test_config_call_dependencies_include_target() {
        let call = ConfigCall::transfer_ownership("snack_token", AddressRef::contract("farm"));
        assert_eq!(call.dependencies(), vec!["snack_token", "farm"]);

        let mint = ConfigCall::mint_to("lp", AddressRef::Deployer, U256::from(10));
        assert_eq!(mint.dependencies(), vec!["lp"]);
    }

    #[test]
    fn test_attach_override_switches_mode() {
        let mut topology = Topology::new(vec![ContractSpec::deploy("snack_token", "SnackToken")], vec![]);
        let address = Address::with_last_byte(7);

        topology
            .apply_attach_overrides(&BTreeMap::from([("snack_token".to_string(), address)]))
            .unwrap();
        assert_eq!(
            topology.get("snack_token").unwrap().mode,
            DeployMode::AttachExisting { address }
        );

        let err = topology
            .apply_attach_overrides(&BTreeMap::from([("farm".to_string(), address)]))
            .unwrap_err();
        assert_eq!(err, ConfigError::UnknownAttachTarget("farm".to_string()));
    }

    #[test]
    fn test_behavior_type_parses_and_encodes() {
        assert_eq!("SCALED".parse::<BehaviorType>().unwrap(), BehaviorType::Scaled);
        assert_eq!(BehaviorType::Standard.as_u8(), 0);
        assert_eq!(BehaviorType::Scaled.as_u8(), 1);
        assert_eq!(BehaviorType::Scaled.to_string(), "SCALED");
    }

    #[test]
    fn test_pool_dependencies_skip_missing_secondary_reward() {
        let pool = PoolRegistration::new(
            1000,
            BehaviorType::Standard,
            AddressRef::contract("lp"),
            AddressRef::contract("controller"),
        );
        assert_eq!(pool.dependencies(), vec!["lp", "controller"]);
    }
}
