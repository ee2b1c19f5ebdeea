//! Liquidation execution against undercollateralized agents.
//!
//! Watches the replica for events that can worsen an agent's collateral
//! ratio and, when the computed transition says liquidation, starts it and
//! bids. The contract is authoritative about the actual transition, so a
//! lost race against another liquidator is expected and benign.

use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::{Address, U256};
use tokio::sync::RwLock;
use tracing::info;

use crate::actors::{Actor, ActorClients};
use crate::error::{ErrorMatcher, WatcherResult};
use crate::events::LedgerEvent;
use crate::metrics::WatcherMetrics;
use crate::scope::{EventScope, ScopedRunner};
use crate::state::tracked::TrackedState;
use crate::types::AgentStatus;

const LIQUIDATION_EXPECTED: &[ErrorMatcher] = &[
    ErrorMatcher::Contains("liquidation already started"),
    ErrorMatcher::Contains("not in liquidation"),
];

/// Events after which collateral ratios must be re-evaluated.
fn affects_ratios(event: &LedgerEvent) -> bool {
    matches!(
        event,
        LedgerEvent::PricesPublished { .. }
            | LedgerEvent::MintingExecuted { .. }
            | LedgerEvent::CollateralWithdrawn { .. }
    )
}

pub struct Liquidator {
    clients: ActorClients,
    state: Arc<RwLock<TrackedState>>,
    runner: ScopedRunner,
    poll_interval: Duration,
    max_block_range: u64,
    metrics: Arc<WatcherMetrics>,
}

impl Liquidator {
    pub fn new(
        clients: ActorClients,
        state: Arc<RwLock<TrackedState>>,
        poll_interval: Duration,
        max_block_range: u64,
        metrics: Arc<WatcherMetrics>,
    ) -> Self {
        Self {
            clients,
            state,
            runner: ScopedRunner::new(Some(metrics.clone())),
            poll_interval,
            max_block_range,
            metrics,
        }
    }

    pub async fn wait_for_idle(&self) {
        self.runner.wait_for_idle().await;
    }

    pub fn take_uncaught_errors(&self) -> Vec<crate::error::WatcherError> {
        self.runner.take_uncaught_errors()
    }

    /// Agents whose computed transition enters liquidation, with the amount
    /// still backed (the liquidation bid ceiling).
    async fn liquidation_candidates(&self, timestamp: u64) -> Vec<(Address, AgentStatus, U256)> {
        let state = self.state.read().await;
        state
            .agents()
            .filter_map(|agent| {
                let transition = agent.possible_liquidation_transition(
                    timestamp,
                    &state.settings,
                    &state.collaterals,
                    &state.prices,
                );
                let entering = matches!(
                    transition,
                    AgentStatus::Liquidation | AgentStatus::FullLiquidation
                );
                (entering && !agent.minted_uba.is_zero())
                    .then(|| (agent.vault_address, agent.status, agent.minted_uba))
            })
            .collect()
    }

    async fn liquidate_agent(
        clients: ActorClients,
        metrics: Arc<WatcherMetrics>,
        scope: Arc<EventScope>,
        agent_vault: Address,
        current_status: AgentStatus,
        max_amount_uba: U256,
    ) -> WatcherResult<()> {
        // Not yet in liquidation on-chain: start it first.
        if !matches!(
            current_status,
            AgentStatus::Liquidation | AgentStatus::FullLiquidation
        ) {
            clients
                .asset_manager
                .start_liquidation(agent_vault)
                .await
                .or_else(|e| scope.exit_on_expected_error(e, LIQUIDATION_EXPECTED))?;
            metrics.liquidations_started.inc();
            info!(%agent_vault, "liquidation started");
        }
        let liquidated = clients
            .asset_manager
            .liquidate(agent_vault, max_amount_uba)
            .await
            .or_else(|e| scope.exit_on_expected_error(e, LIQUIDATION_EXPECTED))?;
        info!(%agent_vault, %liquidated, "liquidation bid executed");
        Ok(())
    }
}

#[async_trait::async_trait]
impl Actor for Liquidator {
    fn name(&self) -> &'static str {
        "liquidator"
    }

    fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    async fn step(&mut self) -> WatcherResult<()> {
        let events = {
            let mut state = self.state.write().await;
            state
                .read_unhandled_events(
                    self.clients.ledger.as_ref(),
                    self.clients.asset_manager.as_ref(),
                    self.max_block_range,
                )
                .await?
        };
        if !events.iter().any(|e| affects_ratios(&e.event)) {
            return Ok(());
        }

        let timestamp = self.clients.ledger.block_timestamp().await?;
        for (agent_vault, current_status, max_amount) in
            self.liquidation_candidates(timestamp).await
        {
            let clients = self.clients.clone();
            let metrics = self.metrics.clone();
            self.runner.start_thread(move |scope| {
                Self::liquidate_agent(clients, metrics, scope, agent_vault, current_status, max_amount)
            });
        }
        Ok(())
    }
}
