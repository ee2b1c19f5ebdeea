//! Event-sourced replica of the asset manager's on-chain state.
//!
//! ```text
//!   native chain ──past_events──▶ read_unhandled_events ──▶ apply_event
//!                                        │                      │
//!                                 watermark advance       settings / prices /
//!                                                         collaterals / agents
//! ```
//!
//! The replica is initialized from a live snapshot and then driven forward
//! exclusively by contract events, applied in chain order. Agents emitting
//! events before their creation event was seen (node started mid-history)
//! are trigger-added from a fresh on-chain snapshot.

use std::collections::HashMap;

use alloy_primitives::{Address, U256};
use tracing::{debug, info, warn};

use crate::clients::{AssetManagerClient, LedgerClient};
use crate::error::{WatcherError, WatcherResult};
use crate::events::{sort_chain_order, LedgerEvent, LedgerEventEnvelope};
use crate::state::agent::TrackedAgentState;
use crate::state::collateral::{CollateralClass, CollateralRegistry, PriceSnapshot};
use crate::state::settings::AssetSettings;
use crate::types::AgentStatus;

pub struct TrackedState {
    pub settings: AssetSettings,
    pub collaterals: CollateralRegistry,
    pub prices: PriceSnapshot,
    pub trusted_prices: PriceSnapshot,
    /// Total fasset supply in UBA.
    pub fasset_supply: U256,
    agents: HashMap<Address, TrackedAgentState>,
    agents_by_underlying: HashMap<String, Address>,
    /// Last native block whose events have been applied.
    pub last_event_block_handled: u64,
    /// Asset manager contract address, the only emitter we track.
    pub contract: Address,
}

impl TrackedState {
    /// Snapshot-initialize from the live contract. Events from blocks after
    /// `start_block` will be replayed on top.
    pub async fn initialize(
        asset_manager: &dyn AssetManagerClient,
        contract: Address,
        start_block: u64,
    ) -> WatcherResult<Self> {
        let settings = asset_manager.settings().await?;
        settings.validate()?;
        let collaterals = CollateralRegistry::new(asset_manager.collateral_types().await?);
        let (prices, trusted_prices) = asset_manager.current_prices().await?;
        // Agents minted before `start_block` are only trigger-added later,
        // so the supply must start from the chain total rather than zero.
        // A trigger-added agent's minted UBA is already inside this total.
        let fasset_supply = asset_manager.total_supply().await?;
        info!(
            %contract,
            start_block,
            collateral_kinds = collaterals.len(),
            supply = %fasset_supply,
            "tracked state initialized"
        );
        Ok(Self {
            settings,
            collaterals,
            prices,
            trusted_prices,
            fasset_supply,
            agents: HashMap::new(),
            agents_by_underlying: HashMap::new(),
            last_event_block_handled: start_block,
            contract,
        })
    }

    pub fn agent(&self, vault: &Address) -> Option<&TrackedAgentState> {
        self.agents.get(vault)
    }

    pub fn agent_by_underlying(&self, address: &str) -> Option<&TrackedAgentState> {
        self.agents_by_underlying
            .get(address)
            .and_then(|vault| self.agents.get(vault))
    }

    #[cfg(test)]
    pub(crate) fn agent_mut(&mut self, vault: &Address) -> Option<&mut TrackedAgentState> {
        self.agents.get_mut(vault)
    }

    pub fn agents(&self) -> impl Iterator<Item = &TrackedAgentState> {
        self.agents.values()
    }

    pub fn agent_count(&self) -> usize {
        self.agents.len()
    }

    /// Fetch events past the watermark, apply them in chain order, and
    /// return them for the caller's own indexing. Scans in bounded chunks
    /// and advances the watermark per chunk, so a transport failure halfway
    /// resumes where it stopped.
    pub async fn read_unhandled_events(
        &mut self,
        ledger: &dyn LedgerClient,
        asset_manager: &dyn AssetManagerClient,
        max_block_range: u64,
    ) -> WatcherResult<Vec<LedgerEventEnvelope>> {
        let height = ledger.block_height().await?;
        // A zero range would never advance the watermark.
        let max_block_range = max_block_range.max(1);
        let mut handled = Vec::new();
        while self.last_event_block_handled < height {
            let from = self.last_event_block_handled + 1;
            let to = height.min(from + max_block_range - 1);
            let mut events = ledger.past_events(self.contract, from, to).await?;
            sort_chain_order(&mut events);
            for envelope in events {
                self.apply_event(asset_manager, &envelope).await?;
                handled.push(envelope);
            }
            self.last_event_block_handled = to;
        }
        Ok(handled)
    }

    /// Apply a single event to the replica.
    pub async fn apply_event(
        &mut self,
        asset_manager: &dyn AssetManagerClient,
        envelope: &LedgerEventEnvelope,
    ) -> WatcherResult<()> {
        debug!(
            block = envelope.block_number,
            log_index = envelope.log_index,
            event = envelope.event.name(),
            "applying event"
        );
        match &envelope.event {
            LedgerEvent::SettingChanged { name, value } => {
                self.settings.apply_setting_changed(name, *value)?;
            }
            LedgerEvent::CollateralTypeAdded(collateral) => {
                self.collaterals.add(collateral.clone());
            }
            LedgerEvent::CollateralRatiosChanged {
                class,
                token,
                min_cr_bips,
                ccb_cr_bips,
                safety_cr_bips,
            } => {
                self.collaterals
                    .update_ratios(*class, token, *min_cr_bips, *ccb_cr_bips, *safety_cr_bips);
            }
            LedgerEvent::CollateralTypeDeprecated {
                class,
                token,
                valid_until,
            } => {
                self.collaterals.deprecate(*class, token, *valid_until);
            }
            LedgerEvent::PricesPublished {
                prices,
                trusted_prices,
            } => {
                self.prices = prices.clone();
                self.trusted_prices = trusted_prices.clone();
            }
            LedgerEvent::AgentVaultCreated {
                agent_vault,
                underlying_address,
                vault_collateral_token,
            } => {
                let agent = TrackedAgentState::new(
                    *agent_vault,
                    underlying_address.clone(),
                    *vault_collateral_token,
                );
                self.agents_by_underlying
                    .insert(underlying_address.clone(), *agent_vault);
                self.agents.insert(*agent_vault, agent);
            }
            LedgerEvent::AgentDestroyAnnounced {
                agent_vault,
                timestamp,
            } => {
                if let Some(agent) = self.ensure_agent(asset_manager, *agent_vault).await? {
                    agent.handle_status_change(AgentStatus::Destroying, *timestamp);
                }
            }
            LedgerEvent::AgentDestroyed { agent_vault } => {
                if let Some(agent) = self.agents.remove(agent_vault) {
                    self.agents_by_underlying.remove(&agent.underlying_address);
                }
            }
            LedgerEvent::CollateralReserved {
                agent_vault,
                value_uba,
                ..
            } => {
                if let Some(agent) = self.ensure_agent(asset_manager, *agent_vault).await? {
                    agent.handle_collateral_reserved(*value_uba);
                }
            }
            LedgerEvent::MintingExecuted {
                agent_vault,
                minted_uba,
                agent_fee_uba,
                ..
            } => {
                self.fasset_supply = self.fasset_supply.saturating_add(*minted_uba);
                if let Some(agent) = self.ensure_agent(asset_manager, *agent_vault).await? {
                    agent.handle_minting_executed(*minted_uba, *agent_fee_uba);
                }
            }
            LedgerEvent::MintingPaymentDefault {
                agent_vault,
                reserved_uba,
                ..
            }
            | LedgerEvent::CollateralReservationDeleted {
                agent_vault,
                reserved_uba,
                ..
            } => {
                if let Some(agent) = self.ensure_agent(asset_manager, *agent_vault).await? {
                    agent.handle_minting_released(*reserved_uba);
                }
            }
            LedgerEvent::SelfClose {
                agent_vault,
                value_uba,
            } => {
                self.fasset_supply = self.fasset_supply.saturating_sub(*value_uba);
                if let Some(agent) = self.ensure_agent(asset_manager, *agent_vault).await? {
                    agent.handle_self_close(*value_uba);
                }
            }
            LedgerEvent::RedemptionRequested {
                agent_vault,
                value_uba,
                ..
            } => {
                self.fasset_supply = self.fasset_supply.saturating_sub(*value_uba);
                if let Some(agent) = self.ensure_agent(asset_manager, *agent_vault).await? {
                    agent.handle_redemption_requested(*value_uba);
                }
            }
            LedgerEvent::RedemptionPerformed {
                agent_vault,
                value_uba,
                spent_uba,
                ..
            } => {
                if let Some(agent) = self.ensure_agent(asset_manager, *agent_vault).await? {
                    agent.handle_redemption_performed(*value_uba, *spent_uba);
                }
            }
            LedgerEvent::RedemptionPaymentBlocked {
                agent_vault,
                value_uba,
                ..
            }
            | LedgerEvent::RedemptionPaymentFailed {
                agent_vault,
                value_uba,
                ..
            } => {
                if let Some(agent) = self.ensure_agent(asset_manager, *agent_vault).await? {
                    agent.handle_redemption_not_performed(*value_uba);
                }
            }
            LedgerEvent::RedemptionDefault {
                agent_vault,
                value_uba,
                ..
            } => {
                if let Some(agent) = self.ensure_agent(asset_manager, *agent_vault).await? {
                    agent.handle_redemption_defaulted(*value_uba);
                }
            }
            LedgerEvent::DustChanged {
                agent_vault,
                dust_uba,
            } => {
                if let Some(agent) = self.ensure_agent(asset_manager, *agent_vault).await? {
                    agent.handle_dust_changed(*dust_uba);
                }
            }
            LedgerEvent::AgentInCcb {
                agent_vault,
                timestamp,
            } => {
                if let Some(agent) = self.ensure_agent(asset_manager, *agent_vault).await? {
                    agent.handle_status_change(AgentStatus::Ccb, *timestamp);
                }
            }
            LedgerEvent::LiquidationStarted {
                agent_vault,
                timestamp,
            } => {
                if let Some(agent) = self.ensure_agent(asset_manager, *agent_vault).await? {
                    agent.handle_status_change(AgentStatus::Liquidation, *timestamp);
                }
            }
            LedgerEvent::FullLiquidationStarted {
                agent_vault,
                timestamp,
            } => {
                if let Some(agent) = self.ensure_agent(asset_manager, *agent_vault).await? {
                    agent.handle_status_change(AgentStatus::FullLiquidation, *timestamp);
                }
            }
            LedgerEvent::LiquidationEnded { agent_vault } => {
                if let Some(agent) = self.ensure_agent(asset_manager, *agent_vault).await? {
                    agent.handle_status_change(AgentStatus::Normal, 0);
                }
            }
            LedgerEvent::LiquidationPerformed {
                agent_vault,
                value_uba,
            } => {
                self.fasset_supply = self.fasset_supply.saturating_sub(*value_uba);
                if let Some(agent) = self.ensure_agent(asset_manager, *agent_vault).await? {
                    agent.handle_liquidation_performed(*value_uba);
                }
            }
            LedgerEvent::UnderlyingWithdrawalAnnounced {
                agent_vault,
                announcement_id,
                ..
            } => {
                if let Some(agent) = self.ensure_agent(asset_manager, *agent_vault).await? {
                    agent.handle_withdrawal_announced(*announcement_id);
                }
            }
            LedgerEvent::UnderlyingWithdrawalConfirmed {
                agent_vault,
                spent_uba,
                ..
            } => {
                if let Some(agent) = self.ensure_agent(asset_manager, *agent_vault).await? {
                    agent.handle_withdrawal_confirmed(*spent_uba);
                }
            }
            LedgerEvent::UnderlyingWithdrawalCancelled { agent_vault, .. } => {
                if let Some(agent) = self.ensure_agent(asset_manager, *agent_vault).await? {
                    agent.handle_withdrawal_cancelled();
                }
            }
            LedgerEvent::UnderlyingBalanceToppedUp {
                agent_vault,
                deposited_uba,
                ..
            } => {
                if let Some(agent) = self.ensure_agent(asset_manager, *agent_vault).await? {
                    agent.handle_balance_topped_up(*deposited_uba);
                }
            }
            LedgerEvent::CollateralDeposited {
                agent_vault,
                token,
                amount_wei,
            } => {
                let class = self.collateral_class_of(token);
                if let Some(agent) = self.ensure_agent(asset_manager, *agent_vault).await? {
                    agent.handle_collateral_deposited(class, *amount_wei);
                }
            }
            LedgerEvent::CollateralWithdrawn {
                agent_vault,
                token,
                amount_wei,
            } => {
                let class = self.collateral_class_of(token);
                if let Some(agent) = self.ensure_agent(asset_manager, *agent_vault).await? {
                    agent.handle_collateral_withdrawn(class, *amount_wei);
                }
            }
        }
        Ok(())
    }

    fn collateral_class_of(&self, token: &Address) -> CollateralClass {
        if self
            .collaterals
            .get(CollateralClass::Pool, token)
            .is_some()
        {
            CollateralClass::Pool
        } else {
            CollateralClass::Vault
        }
    }

    /// Look up an agent, trigger-adding it from a live snapshot when the
    /// node started after the agent's creation event. `None` for agents the
    /// contract does not know either (stale event after destruction).
    async fn ensure_agent(
        &mut self,
        asset_manager: &dyn AssetManagerClient,
        vault: Address,
    ) -> WatcherResult<Option<&mut TrackedAgentState>> {
        if !self.agents.contains_key(&vault) {
            match asset_manager.agent_info(vault).await {
                Ok(info) => {
                    info!(%vault, "trigger-adding agent from snapshot");
                    self.agents_by_underlying
                        .insert(info.underlying_address.clone(), vault);
                    self.agents.insert(vault, TrackedAgentState::from_info(&info));
                }
                Err(WatcherError::ContractRevert(reason)) => {
                    warn!(%vault, %reason, "event for unknown agent, skipping");
                    return Ok(None);
                }
                Err(err) => return Err(err),
            }
        }
        Ok(self.agents.get_mut(&vault))
    }
}
