//! Farm pool registration.
//!
//! Pools are identified by the order in which they are added to the farm, so they are
//! registered strictly one after another and each registration is checked against the
//! farm's own pool count first. A pool the farm already holds at the expected index is
//! read back and adopted instead of being added twice.

use alloy_core::{
    primitives::{Address, B256, U256},
    sol_types::SolCall,
};

use crate::{
    contracts::{ISnackShack, read_name, read_pool_info, read_pool_length},
    error::{ConfigError, DeployError},
    gate::ConfirmationGate,
    ledger::{Ledger, RegisteredPool},
    network::NetworkClient,
    topology::BehaviorType,
};

/// A pool registration with every reference resolved to an address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPool {
    pub index: usize,
    pub weight: u64,
    pub behavior: BehaviorType,
    pub lp_token: Address,
    /// Zero when the pool has no secondary reward.
    pub secondary_reward: Address,
    pub controller: Address,
    pub label: Option<String>,
}

impl ResolvedPool {
    /// Whether a ledger entry describes this registration.
    fn matches(&self, recorded: &RegisteredPool) -> bool {
        recorded.index == self.index
            && recorded.weight == self.weight
            && recorded.behavior == self.behavior
            && recorded.lp_token == self.lp_token
            && recorded.secondary_reward == self.secondary_reward
            && recorded.controller == self.controller
    }

    /// Whether the farm's own entry describes this registration.
    fn matches_farm(&self, info: &ISnackShack::poolInfoReturn) -> bool {
        info.allocPoint == U256::from(self.weight)
            && info.farmType == self.behavior.as_u8()
            && info.lpToken == self.lp_token
            && info.rewarder == self.secondary_reward
            && info.controller == self.controller
    }

    fn registered(&self, tx_hash: Option<B256>) -> RegisteredPool {
        RegisteredPool {
            index: self.index,
            weight: self.weight,
            behavior: self.behavior,
            lp_token: self.lp_token,
            secondary_reward: self.secondary_reward,
            controller: self.controller,
            tx_hash,
        }
    }

    fn calldata(&self) -> Vec<u8> {
        ISnackShack::addCall {
            allocPoint: U256::from(self.weight),
            farmType: self.behavior.as_u8(),
            lpToken: self.lp_token,
            rewarder: self.secondary_reward,
            controller: self.controller,
        }
        .abi_encode()
    }
}

/// Outcome of one registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Registration {
    Registered(RegisteredPool),
    /// Already in the ledger, or already on the farm, with identical parameters.
    Skipped(RegisteredPool),
}

/// Registers farm pools through the confirmation gate.
pub struct PoolRegistrationSequencer<'a, C> {
    client: &'a C,
    gate: &'a mut ConfirmationGate,
    ledger: &'a mut Ledger,
    farm: Address,
}

impl<'a, C: NetworkClient> PoolRegistrationSequencer<'a, C> {
    pub fn new(client: &'a C, gate: &'a mut ConfirmationGate, ledger: &'a mut Ledger, farm: Address) -> Self {
        Self {
            client,
            gate,
            ledger,
            farm,
        }
    }

    pub fn farm(&self) -> Address {
        self.farm
    }

    /// Register one pool, or skip it if it is already registered.
    ///
    /// Pools must be passed in index order. A pool the ledger does not know about but the
    /// farm already holds (an earlier run on an attached farm, or an `add` whose
    /// confirmation timed out) is compared with the farm's entry and recorded as skipped.
    ///
    /// # Arguments
    /// * `pool` - The registration, with `index` equal to the number of pools before it
    ///
    /// # Returns
    /// Whether a transaction was sent, or an error if the farm disagrees with the pool.
    pub async fn register(&mut self, pool: &ResolvedPool) -> Result<Registration, DeployError> {
        if let Some(recorded) = self.ledger.pool(pool.index) {
            if !pool.matches(recorded) {
                return Err(ConfigError::PoolDrift(pool.index).into());
            }
            tracing::info!(pid = pool.index, lp_token = %pool.lp_token, "Pool already registered, skipping");
            return Ok(Registration::Skipped(recorded.clone()));
        }

        if self.farm_holds(pool.index).await? {
            return self.adopt(pool).await;
        }

        let client = self.client;
        let farm = self.farm;
        let calldata = pool.calldata();
        let action = format!("farm.add(pid {})", pool.index);

        let receipt = self
            .gate
            .execute(client, &action, || client.send(farm, calldata.into()))
            .await?;

        let registered = pool.registered(Some(receipt.tx_hash));
        self.ledger.record_pool(registered.clone())?;

        self.log_registered(pool).await;
        Ok(Registration::Registered(registered))
    }

    /// Whether the farm already has a pool at `index`.
    ///
    /// Fails if the farm has fewer pools than `index`. A failed read is logged and the
    /// pool is treated as missing.
    async fn farm_holds(&self, index: usize) -> Result<bool, DeployError> {
        match read_pool_length(self.client, self.farm).await {
            Ok(length) if length == U256::from(index) => Ok(false),
            Ok(length) if length > U256::from(index) => Ok(true),
            Ok(length) => Err(ConfigError::PoolIndexMismatch {
                expected: index,
                actual: length.saturating_to::<u64>(),
            }
            .into()),
            Err(e) => {
                tracing::warn!(pid = index, error = %e, "Could not read farm pool count");
                Ok(false)
            }
        }
    }

    /// Record a pool the farm already holds, after checking it matches.
    async fn adopt(&mut self, pool: &ResolvedPool) -> Result<Registration, DeployError> {
        let info = read_pool_info(self.client, self.farm, pool.index)
            .await
            .map_err(|e| ConfigError::UnverifiablePool {
                index: pool.index,
                reason: e.to_string(),
            })?;
        if !pool.matches_farm(&info) {
            return Err(ConfigError::PoolDrift(pool.index).into());
        }

        let registered = pool.registered(None);
        self.ledger.record_pool(registered.clone())?;
        tracing::info!(pid = pool.index, lp_token = %pool.lp_token, "Pool already on the farm, recorded");
        Ok(Registration::Skipped(registered))
    }

    async fn log_registered(&self, pool: &ResolvedPool) {
        let suffix = pool
            .label
            .as_deref()
            .map(|label| format!(" {label}"))
            .unwrap_or_default();

        match read_name(self.client, pool.lp_token).await {
            Ok(name) => tracing::info!(
                pid = pool.index,
                weight = pool.weight,
                behavior = %pool.behavior,
                "PID {}: {name}{suffix}",
                pool.index
            ),
            Err(e) => tracing::warn!(
                pid = pool.index,
                lp_token = %pool.lp_token,
                error = %e,
                "PID {}: registered{suffix}",
                pool.index
            ),
        }
    }
}
