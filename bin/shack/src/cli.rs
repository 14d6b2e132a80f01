use std::path::PathBuf;

use alloy_core::primitives::Address;
use clap::{Parser, Subcommand};
use shack_deploy::Network;
use tracing::level_filters::LevelFilter;

/// The default configuration file, looked up in the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "Shack.toml";

#[derive(Parser)]
#[command(name = "shack")]
#[command(
    author,
    version,
    about = "Deploy and configure the Snack Shack farm, one confirmed transaction at a time"
)]
pub struct Cli {
    /// The verbosity level.
    #[arg(short, long, global = true, env = "SHACK_VERBOSITY", default_value_t = LevelFilter::INFO)]
    pub verbosity: LevelFilter,

    /// Path to the configuration file.
    ///
    /// A missing file is not an error: network presets and environment variables apply.
    #[arg(short, long, global = true, alias = "conf", env = "SHACK_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// The target network (mainnet, rinkeby or custom).
    ///
    /// Overrides the network of the configuration file.
    #[arg(short, long, global = true, env = "SHACK_NETWORK")]
    pub network: Option<Network>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Deploy the protocol, resuming from the ledger if one exists.
    Deploy(DeployArgs),

    /// Validate the configuration and print the deployment plan. Makes no network calls.
    Plan(PlanArgs),

    /// Print the contracts and pools recorded in the ledger.
    Status {
        /// Path to the ledger. Defaults to the configured one.
        #[arg(long, env = "SHACK_LEDGER")]
        ledger: Option<PathBuf>,
    },

    /// Write a starter configuration file for the selected network.
    Init {
        /// Overwrite an existing configuration file.
        #[arg(long)]
        force: bool,
    },
}

#[derive(Debug, Clone, Parser)]
pub struct DeployArgs {
    /// The URL of the JSON-RPC endpoint. The node must manage the key of `--from`.
    #[arg(long, alias = "rpc", env = "SHACK_RPC_URL")]
    pub rpc_url: Option<String>,

    /// The account every transaction is sent from.
    #[arg(long, env = "SHACK_FROM")]
    pub from: Option<Address>,

    /// Pause after each confirmed transaction, in seconds.
    #[arg(long, env = "SHACK_QUIESCENCE_SECS")]
    pub quiescence_secs: Option<u64>,

    #[command(flatten)]
    pub plan: PlanArgs,
}

#[derive(Debug, Clone, Parser)]
pub struct PlanArgs {
    /// Directory of compiled contract artifacts.
    #[arg(long, env = "SHACK_ARTIFACTS")]
    pub artifacts: Option<PathBuf>,

    /// Path to the run ledger.
    #[arg(long, env = "SHACK_LEDGER")]
    pub ledger: Option<PathBuf>,

    /// Use an existing contract instead of deploying it: `<name>=<address>`.
    ///
    /// May be repeated.
    #[arg(long = "attach", value_name = "NAME=ADDRESS", value_parser = parse_attach)]
    pub attach: Vec<(String, Address)>,
}

fn parse_attach(value: &str) -> Result<(String, Address), String> {
    let (name, address) = value
        .split_once('=')
        .ok_or_else(|| format!("expected <name>=<address>, got `{value}`"))?;
    let address = address
        .trim()
        .parse::<Address>()
        .map_err(|e| format!("invalid address for `{name}`: {e}"))?;
    Ok((name.trim().to_string(), address))
}
