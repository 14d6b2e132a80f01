//! Layered run configuration.
//!
//! Values are merged in increasing priority: the network preset, the configuration
//! file, `SHACK_`-prefixed environment variables (`__` separates nested keys, e.g.
//! `SHACK_ENVIRONMENT__SNACK_TOKEN`) and finally command-line flags.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    time::Duration,
};

use alloy_core::primitives::Address;
use anyhow::Context;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use shack_deploy::{ConfirmationPolicy, Environment, Network};

use crate::cli::{DeployArgs, PlanArgs};

/// Environment variables consumed by the CLI itself.
const CLI_ONLY_VARS: [&str; 3] = ["verbosity", "config", "network"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShackConfig {
    pub network: Network,
    /// JSON-RPC endpoint of a node that manages the key of `from`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rpc_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<Address>,
    pub artifacts: PathBuf,
    pub ledger: PathBuf,
    /// Pause after each confirmed transaction.
    pub quiescence_secs: u64,
    pub confirmation: ConfirmationPolicy,
    pub environment: Environment,
    /// Contract name to the existing address it is bound to.
    #[serde(default)]
    pub attach: BTreeMap<String, Address>,
}

impl ShackConfig {
    /// Defaults for `network`.
    pub fn preset(network: Network) -> Self {
        Self {
            network,
            rpc_url: None,
            from: None,
            artifacts: PathBuf::from("artifacts"),
            ledger: PathBuf::from(format!("deployments/{network}.json")),
            quiescence_secs: 10,
            confirmation: ConfirmationPolicy {
                timeout_secs: network.confirmation_timeout_secs(),
                ..Default::default()
            },
            environment: network.environment(),
            attach: BTreeMap::new(),
        }
    }

    /// Load the configuration for `network` (or the file's network, or rinkeby).
    pub fn load(path: &Path, network: Option<Network>) -> anyhow::Result<Self> {
        let layers = Figment::new().merge(Toml::file(path)).merge(env_provider());

        let network = match network {
            Some(network) => network,
            None if layers.contains("network") => layers
                .extract_inner("network")
                .context("Invalid network in configuration")?,
            None => Network::Rinkeby,
        };

        let config: Self = Figment::from(Serialized::defaults(Self::preset(network)))
            .merge(layers)
            .merge(Serialized::default("network", network))
            .extract()
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?;

        if config.environment.network != config.network {
            tracing::warn!(
                network = %config.network,
                environment = %config.environment.network,
                "Environment belongs to a different network"
            );
        }
        Ok(config)
    }

    /// Apply planning flags.
    pub fn apply_plan_args(&mut self, args: &PlanArgs) {
        if let Some(artifacts) = &args.artifacts {
            self.artifacts = artifacts.clone();
        }
        if let Some(ledger) = &args.ledger {
            self.ledger = ledger.clone();
        }
        self.attach.extend(args.attach.iter().cloned());
    }

    /// Apply deployment flags.
    pub fn apply_deploy_args(&mut self, args: &DeployArgs) {
        self.apply_plan_args(&args.plan);
        if let Some(rpc_url) = &args.rpc_url {
            self.rpc_url = Some(rpc_url.clone());
        }
        if let Some(from) = args.from {
            self.from = Some(from);
        }
        if let Some(secs) = args.quiescence_secs {
            self.quiescence_secs = secs;
        }
    }

    pub fn quiescence(&self) -> Duration {
        Duration::from_secs(self.quiescence_secs)
    }

    /// Write the configuration as TOML.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write configuration to {}", path.display()))?;
        Ok(())
    }
}

fn env_provider() -> Env {
    Env::prefixed("SHACK_").split("__").ignore(&CLI_ONLY_VARS)
}
