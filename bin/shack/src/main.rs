//! shack is a CLI tool to deploy and configure the Snack Shack farm.

mod cli;
mod config;

use std::path::Path;

use anyhow::{Context, Result};
use clap::Parser;
use comfy_table::{Table, presets::UTF8_FULL};

use cli::{Cli, Command};
use config::ShackConfig;
use shack_deploy::{
    ArtifactStore, DependencyResolver, DeploymentPlan, Ledger, Network, Orchestrator, RpcClient,
    protocol_topology,
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize the logger.
    tracing_subscriber::fmt()
        .with_max_level(cli.verbosity)
        .init();

    match cli.command {
        Command::Init { force } => {
            let network = cli.network.unwrap_or(Network::Rinkeby);
            if cli.config.exists() && !force {
                anyhow::bail!(
                    "{} already exists, pass --force to overwrite it",
                    cli.config.display()
                );
            }
            ShackConfig::preset(network).save(&cli.config)?;
            tracing::info!(path = %cli.config.display(), %network, "Configuration written");
        }
        Command::Plan(args) => {
            let mut config = ShackConfig::load(&cli.config, cli.network)?;
            config.apply_plan_args(&args);

            let plan = build_plan(&config)?;
            let artifacts = ArtifactStore::load_dir(&config.artifacts)?;
            artifacts.verify(plan.topology())?;

            print_plan(&plan);
        }
        Command::Status { ledger } => {
            let path = match ledger {
                Some(path) => path,
                None => ShackConfig::load(&cli.config, cli.network)?.ledger,
            };
            print_status(&path)?;
        }
        Command::Deploy(args) => {
            let mut config = ShackConfig::load(&cli.config, cli.network)?;
            config.apply_deploy_args(&args);
            deploy(&config).await?;
        }
    }

    Ok(())
}

/// Build the topology from the configuration and resolve it.
fn build_plan(config: &ShackConfig) -> Result<DeploymentPlan> {
    let mut topology = protocol_topology(&config.environment)?;
    topology.apply_attach_overrides(&config.attach)?;
    Ok(DependencyResolver::resolve(topology)?)
}

async fn deploy(config: &ShackConfig) -> Result<()> {
    let rpc_url = config
        .rpc_url
        .as_deref()
        .context("No RPC URL configured, set rpc_url or pass --rpc-url")?;
    let from = config
        .from
        .context("No sender configured, set from or pass --from")?;

    // Everything that can be checked offline is checked before connecting.
    let plan = build_plan(config)?;
    let artifacts = ArtifactStore::load_dir(&config.artifacts)?;
    artifacts.verify(plan.topology())?;

    let client = RpcClient::new(rpc_url, from, config.confirmation.clone())?;
    let chain_id = match config.network.chain_id() {
        Some(chain_id) => chain_id,
        None => config.environment.chain_id,
    };
    client.ensure_chain_id(chain_id).await?;

    let ledger = Ledger::open(&config.ledger, &config.network.to_string(), chain_id)?;

    tracing::info!(
        network = %config.network,
        chain_id,
        %from,
        artifacts = artifacts.len(),
        ledger = %config.ledger.display(),
        steps = plan.len(),
        "Deploying Snack Shack..."
    );

    let mut orchestrator = Orchestrator::builder(client)
        .artifacts(artifacts)
        .quiescence(config.quiescence())
        .ledger(ledger)
        .build();
    let report = orchestrator.run(&plan).await?;

    let mut table = Table::new();
    table.load_preset(UTF8_FULL).set_header(vec!["Contract", "Address"]);
    for contract in &report.contracts {
        table.add_row(vec![contract.name.clone(), contract.address.to_string()]);
    }
    println!("{table}");

    tracing::info!(
        writes = report.writes,
        skipped = report.skipped,
        pools = report.pools.len(),
        "Snack Shack deployed"
    );
    Ok(())
}

fn print_plan(plan: &DeploymentPlan) {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL).set_header(vec!["#", "Step", "Writes"]);
    for (i, step) in plan.iter().enumerate() {
        table.add_row(vec![
            i.to_string(),
            plan.describe(step),
            if step.is_write() { "yes" } else { "no" }.to_string(),
        ]);
    }
    println!("{table}");
}

fn print_status(path: &Path) -> Result<()> {
    let ledger = Ledger::load_from_file(path)
        .with_context(|| format!("Failed to read ledger {}", path.display()))?;

    println!("Network: {} (chain {})", ledger.network, ledger.chain_id);

    let mut contracts = Table::new();
    contracts
        .load_preset(UTF8_FULL)
        .set_header(vec!["Contract", "Artifact", "Origin", "Address", "Block"]);
    for contract in ledger.contracts() {
        contracts.add_row(vec![
            contract.name.clone(),
            contract.artifact.clone(),
            contract.origin.to_string(),
            contract.address.to_string(),
            contract
                .receipt
                .as_ref()
                .map(|r| r.block_number.to_string())
                .unwrap_or_default(),
        ]);
    }
    println!("{contracts}");

    let mut pools = Table::new();
    pools
        .load_preset(UTF8_FULL)
        .set_header(vec!["PID", "Weight", "Behavior", "LP token", "Controller"]);
    for pool in ledger.pools() {
        pools.add_row(vec![
            pool.index.to_string(),
            pool.weight.to_string(),
            pool.behavior.to_string(),
            pool.lp_token.to_string(),
            pool.controller.to_string(),
        ]);
    }
    println!("{pools}");

    Ok(())
}
