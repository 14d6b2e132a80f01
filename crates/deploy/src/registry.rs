//! The Snack Shack protocol: network presets and the fixed deployment topology.

use alloy_core::primitives::{Address, U256, address, utils::parse_ether};
use serde::{Deserialize, Serialize};

use crate::{
    error::ConfigError,
    topology::{
        AddressRef, BehaviorType, ConfigCall, ContractSpec, ControllerConfig, FARM, Param,
        PoolRegistration, Topology,
    },
};

/// Link symbol of the square-root library used by the farm and the sudo controllers.
pub const SQRT_MATH_SYMBOL: &str = "contracts/lib/SqrtMath.sol:SqrtMath";

/// Tokens minted to the deployer by the mock LP token.
const MOCK_LP_ALLOCATION: &str = "10";
/// Controller delta added per unit of pool liquidity.
const DELTA_PER_UNIT_LIQUIDITY: &str = "0.0000001";

/// Sudo pair pool type, as passed in the LP token constructor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum PoolType {
    Token = 0,
    Trade = 2,
}

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
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum Network {
    Mainnet,
    Rinkeby,
    /// Any other chain; every address must be configured.
    Custom,
}

impl Network {
    /// Chain id of a known network.
    pub fn chain_id(&self) -> Option<u64> {
        match self {
            Network::Mainnet => Some(1),
            Network::Rinkeby => Some(4),
            Network::Custom => None,
        }
    }

    /// Default per-transaction confirmation timeout, in seconds.
    pub fn confirmation_timeout_secs(&self) -> u64 {
        match self {
            Network::Mainnet => 100,
            Network::Rinkeby | Network::Custom => 300,
        }
    }

    /// The preset environment of this network.
    pub fn environment(&self) -> Environment {
        match self {
            Network::Mainnet => Environment::mainnet(),
            Network::Rinkeby => Environment::rinkeby(),
            Network::Custom => Environment::custom(),
        }
    }
}

/// Everything about the target chain that the topology depends on.
///
/// Addresses left empty for the optional protocol tokens are deployed by the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Environment {
    pub network: Network,
    pub chain_id: u64,
    /// Sudo pair factory.
    pub pair_factory: Option<Address>,
    pub linear_curve: Option<Address>,
    pub exponential_curve: Option<Address>,
    /// NFT collection the sudo LP tokens trade.
    pub pool_nft: Option<Address>,
    /// Existing SNACK token.
    pub snack_token: Option<Address>,
    /// Existing XMON/SNACK liquidity token. Without one, mock tokens are deployed.
    pub xmon_snack_lp: Option<Address>,
    /// Existing XMINU collection.
    pub xminu_nft: Option<Address>,
    /// Buy-wall spot price, in ether.
    pub buy_spot_price: String,
    /// High-fee trade spot price, in ether.
    pub sell_spot_price: String,
}

impl Environment {
    pub fn rinkeby() -> Self {
        Self {
            network: Network::Rinkeby,
            chain_id: 4,
            pair_factory: Some(address!("cB1514FE29db064fa595628E0BFFD10cdf998F33")),
            linear_curve: Some(address!("3764b9FE584719C4570725A2b5A2485d418A186E")),
            exponential_curve: Some(address!("Bc6760B11e433D25aAf5c8fCBC6cE99b14aC5D52")),
            pool_nft: Some(address!("09972358feEb111C0E1388161C3FA5e0Cd220A6B")),
            snack_token: None,
            xmon_snack_lp: None,
            xminu_nft: None,
            ..Self::custom()
        }
    }

    pub fn mainnet() -> Self {
        let sudo_inu = address!("a78c124b4f7368adde6a74d32ed9c369fe016f20");
        Self {
            network: Network::Mainnet,
            chain_id: 1,
            pair_factory: Some(address!("b16c1342E617A5B6E4b631EB114483FDB289c0A4")),
            linear_curve: Some(address!("5B6aC51d9B1CeDE0068a1B26533CAce807f883Ee")),
            exponential_curve: Some(address!("432f962D8209781da23fB37b6B59ee15dE7d9841")),
            pool_nft: Some(sudo_inu),
            snack_token: Some(address!("2b8a8845b9bbb8b5beef1d95ef6a60701d867142")),
            xmon_snack_lp: Some(address!("096c24c5bc54a2714d5db90ea46d8c4140aebe5d")),
            xminu_nft: Some(sudo_inu),
            ..Self::custom()
        }
    }

    /// An environment with no known addresses.
    pub fn custom() -> Self {
        Self {
            network: Network::Custom,
            chain_id: 0,
            pair_factory: None,
            linear_curve: None,
            exponential_curve: None,
            pool_nft: None,
            snack_token: None,
            xmon_snack_lp: None,
            xminu_nft: None,
            buy_spot_price: "0.05".to_string(),
            sell_spot_price: "0.1".to_string(),
        }
    }

    fn require(value: Option<Address>, name: &'static str) -> Result<Address, ConfigError> {
        value.ok_or(ConfigError::MissingEnvironmentValue(name))
    }
}

fn ether(value: &str) -> Result<U256, ConfigError> {
    parse_ether(value).map_err(|e| ConfigError::Invalid(format!("invalid ether amount `{value}`: {e}")))
}

/// Either attach to `address` or deploy `spec`.
fn deploy_or_attach(spec: ContractSpec, address: Option<Address>) -> ContractSpec {
    match address {
        Some(address) => ContractSpec::attach(spec.name, spec.artifact, address),
        None => spec,
    }
}

/// A sudo pair LP token over the pool NFT.
fn sudo_lp(name: &str, env: &Environment, curve: Address, pool_type: PoolType, spot_price: U256) -> Result<ContractSpec, ConfigError> {
    Ok(ContractSpec::deploy(name, "SudoInuLP").arg(Param::Tuple(vec![
        AddressRef::Literal(Environment::require(env.pool_nft, "pool_nft")?).into(),
        AddressRef::Literal(Environment::require(env.pair_factory, "pair_factory")?).into(),
        AddressRef::Literal(curve).into(),
        Param::uint(pool_type as u64),
        spot_price.into(),
        true.into(),
    ])))
}

/// Build the Snack Shack topology for `env`.
///
/// Contracts are declared in deployment order. Any spec can still be switched to an
/// existing address afterwards with [`Topology::apply_attach_overrides`].
pub fn protocol_topology(env: &Environment) -> Result<Topology, ConfigError> {
    let buy_spot_price = ether(&env.buy_spot_price)?;
    let sell_spot_price = ether(&env.sell_spot_price)?;
    let delta_per_unit_liquidity = ether(DELTA_PER_UNIT_LIQUIDITY)?;
    let linear_curve = Environment::require(env.linear_curve, "linear_curve")?;
    let exponential_curve = Environment::require(env.exponential_curve, "exponential_curve")?;

    let mut contracts = Vec::new();

    match env.xmon_snack_lp {
        Some(address) => contracts.push(ContractSpec::attach("xmon_snack_lp", "MockERC20", address)),
        None => {
            contracts.push(
                ContractSpec::deploy("xmon_snack_lp", "MockERC20")
                    .arg(Param::String("XMON/SNACK LP".to_string()))
                    .arg(Param::String("UNI-V2".to_string()))
                    .then(ConfigCall::mint_to(
                        "xmon_snack_lp",
                        AddressRef::Deployer,
                        ether(MOCK_LP_ALLOCATION)?,
                    )),
            );
            contracts.push(
                ContractSpec::deploy("xmon", "MockERC20")
                    .arg(Param::String("XMON".to_string()))
                    .arg(Param::String("XMON".to_string())),
            );
        }
    }

    contracts.push(deploy_or_attach(
        ContractSpec::deploy("snack_token", "SnackToken"),
        env.snack_token,
    ));
    contracts.push(match env.xminu_nft {
        Some(address) => ContractSpec::attach("xminu_nft", "SudoInu", address),
        None => ContractSpec::deploy("xminu_nft", "SudoInu").then(ConfigCall::mint("xminu_nft")),
    });
    contracts.push(ContractSpec::deploy("wrapped_xminu", "WrappedXminu").arg(Param::contract("xminu_nft")));

    contracts.push(sudo_lp("buy_wall_lp", env, linear_curve, PoolType::Token, buy_spot_price)?);
    contracts.push(sudo_lp(
        "high_fee_trade_lp",
        env,
        exponential_curve,
        PoolType::Trade,
        sell_spot_price,
    )?);

    contracts.push(ContractSpec::deploy("sqrt_math", "SqrtMath"));
    contracts.push(
        ContractSpec::deploy(FARM, "SnackShack")
            .arg(Param::contract("snack_token"))
            .arg(AddressRef::Deployer)
            .link(SQRT_MATH_SYMBOL, "sqrt_math")
            .then(ConfigCall::transfer_ownership("snack_token", AddressRef::contract(FARM))),
    );

    contracts.push(ContractSpec::deploy("default_controller", "DefaultController").arg(Param::contract(FARM)));
    contracts.push(
        ContractSpec::deploy("buy_wall_controller", "SudoController")
            .args(
                ControllerConfig {
                    farm: AddressRef::contract(FARM),
                    pool: AddressRef::contract("buy_wall_lp"),
                    fee: U256::ZERO,
                    delta: U256::ZERO,
                    initial_spot_price: buy_spot_price,
                    delta_per_unit_liquidity,
                }
                .into_params(),
            )
            .link(SQRT_MATH_SYMBOL, "sqrt_math"),
    );
    contracts.push(
        ContractSpec::deploy("high_fee_trade_controller", "SudoController")
            .args(
                ControllerConfig {
                    farm: AddressRef::contract(FARM),
                    pool: AddressRef::contract("high_fee_trade_lp"),
                    fee: ether("0.06")?,
                    delta: ether("1.05")?,
                    initial_spot_price: sell_spot_price,
                    delta_per_unit_liquidity,
                }
                .into_params(),
            )
            .link(SQRT_MATH_SYMBOL, "sqrt_math"),
    );

    let default_controller = || AddressRef::contract("default_controller");
    let pools = vec![
        PoolRegistration::new(
            1000,
            BehaviorType::Standard,
            AddressRef::contract("xmon_snack_lp"),
            default_controller(),
        ),
        PoolRegistration::new(
            150,
            BehaviorType::Standard,
            AddressRef::contract("wrapped_xminu"),
            default_controller(),
        ),
        PoolRegistration::new(
            150,
            BehaviorType::Standard,
            AddressRef::contract("snack_token"),
            default_controller(),
        ),
        PoolRegistration::new(
            250,
            BehaviorType::Scaled,
            AddressRef::contract("buy_wall_lp"),
            AddressRef::contract("buy_wall_controller"),
        )
        .label("BUY"),
        PoolRegistration::new(
            100,
            BehaviorType::Scaled,
            AddressRef::contract("high_fee_trade_lp"),
            AddressRef::contract("high_fee_trade_controller"),
        )
        .label("SELL"),
    ];

    Ok(Topology::new(contracts, pools))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        resolver::{DependencyResolver, PlanStep},
        topology::DeployMode,
    };

    fn names(topology: &Topology) -> Vec<&str> {
        topology.contracts.iter().map(|c| c.name.as_str()).collect()
    }

    #[test]
    fn test_rinkeby_deploys_mocks_and_protocol_tokens() {
        let topology = protocol_topology(&Environment::rinkeby()).unwrap();
        assert_eq!(
            names(&topology),
            vec![
                "xmon_snack_lp",
                "xmon",
                "snack_token",
                "xminu_nft",
                "wrapped_xminu",
                "buy_wall_lp",
                "high_fee_trade_lp",
                "sqrt_math",
                "farm",
                "default_controller",
                "buy_wall_controller",
                "high_fee_trade_controller",
            ]
        );
        assert!(topology.contracts.iter().all(|c| !c.is_attached()));
        assert_eq!(topology.get("xminu_nft").unwrap().post_deploy, vec![ConfigCall::mint("xminu_nft")]);
    }

    #[test]
    fn test_mainnet_attaches_existing_tokens() {
        let topology = protocol_topology(&Environment::mainnet()).unwrap();
        assert!(!names(&topology).contains(&"xmon"));
        for name in ["xmon_snack_lp", "snack_token", "xminu_nft"] {
            assert!(topology.get(name).unwrap().is_attached(), "{name} should be attached");
        }
        assert_eq!(
            topology.get("snack_token").unwrap().mode,
            DeployMode::AttachExisting {
                address: address!("2b8a8845b9bbb8b5beef1d95ef6a60701d867142")
            }
        );
    }

    #[test]
    fn test_mainnet_plan_still_transfers_snack_ownership() {
        let topology = protocol_topology(&Environment::mainnet()).unwrap();
        let farm = topology.position(FARM).unwrap();
        let plan = DependencyResolver::resolve(topology).unwrap();

        let configure = plan
            .iter()
            .position(|s| *s == PlanStep::Configure { contract: farm, call: 0 })
            .expect("ownership transfer should be planned");
        assert_eq!(plan[configure - 1], PlanStep::Deploy { contract: farm });
        assert_eq!(plan.describe(&plan[configure]), "snack_token.transferOwnership");
    }

    #[test]
    fn test_pools_are_fixed() {
        let topology = protocol_topology(&Environment::rinkeby()).unwrap();
        let summary: Vec<_> = topology
            .pools
            .iter()
            .map(|p| (p.weight, p.behavior, p.label.as_deref()))
            .collect();
        assert_eq!(
            summary,
            vec![
                (1000, BehaviorType::Standard, None),
                (150, BehaviorType::Standard, None),
                (150, BehaviorType::Standard, None),
                (250, BehaviorType::Scaled, Some("BUY")),
                (100, BehaviorType::Scaled, Some("SELL")),
            ]
        );
        assert!(topology.pools.iter().all(|p| p.secondary_reward.is_none()));
    }

    #[test]
    fn test_controller_parameters() {
        let topology = protocol_topology(&Environment::rinkeby()).unwrap();
        let trade = topology.get("high_fee_trade_controller").unwrap();
        assert_eq!(trade.constructor[2], Param::Uint(parse_ether("0.06").unwrap()));
        assert_eq!(trade.constructor[3], Param::Uint(parse_ether("1.05").unwrap()));
        assert_eq!(trade.constructor[4], Param::Uint(parse_ether("0.1").unwrap()));
        assert_eq!(trade.constructor[5], Param::Uint(U256::from(100_000_000_000u64)));
        assert_eq!(trade.libraries[SQRT_MATH_SYMBOL], "sqrt_math");
    }

    #[test]
    fn test_custom_network_requires_addresses() {
        assert_eq!(
            protocol_topology(&Environment::custom()).unwrap_err(),
            ConfigError::MissingEnvironmentValue("linear_curve")
        );
    }

    #[test]
    fn test_invalid_spot_price_is_rejected() {
        let env = Environment {
            buy_spot_price: "cheap".to_string(),
            ..Environment::rinkeby()
        };
        assert!(matches!(protocol_topology(&env), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_network_parses_from_kebab_case() {
        assert_eq!("rinkeby".parse::<Network>().unwrap(), Network::Rinkeby);
        assert_eq!(Network::Mainnet.chain_id(), Some(1));
        assert_eq!(Network::Custom.environment().chain_id, 0);
    }
}
