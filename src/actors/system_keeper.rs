//! Protocol upkeep: moves agents in and out of liquidation on the contract
//! so their on-chain status tracks reality.
//!
//! Unlike the liquidator it never bids; it only pushes status transitions,
//! in both directions. Many keepers run concurrently, so lost races on both
//! entry points are expected.

use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::Address;
use tokio::sync::RwLock;
use tracing::info;

use crate::actors::{Actor, ActorClients};
use crate::error::{ErrorMatcher, WatcherResult};
use crate::events::LedgerEvent;
use crate::metrics::WatcherMetrics;
use crate::scope::{EventScope, ScopedRunner};
use crate::state::tracked::TrackedState;
use crate::types::AgentStatus;

const START_EXPECTED: &[ErrorMatcher] = &[ErrorMatcher::Contains("liquidation already started")];

const END_EXPECTED: &[ErrorMatcher] = &[
    ErrorMatcher::Contains("liquidation not started"),
    ErrorMatcher::Contains("not in liquidation"),
];

fn affects_ratios(event: &LedgerEvent) -> bool {
    matches!(
        event,
        LedgerEvent::PricesPublished { .. }
            | LedgerEvent::MintingExecuted { .. }
            | LedgerEvent::CollateralWithdrawn { .. }
            | LedgerEvent::CollateralDeposited { .. }
            | LedgerEvent::RedemptionPerformed { .. }
            | LedgerEvent::SelfClose { .. }
            | LedgerEvent::LiquidationPerformed { .. }
    )
}

enum KeeperAction {
    StartLiquidation,
    EndLiquidation,
}

pub struct SystemKeeper {
    clients: ActorClients,
    state: Arc<RwLock<TrackedState>>,
    runner: ScopedRunner,
    poll_interval: Duration,
    max_block_range: u64,
    metrics: Arc<WatcherMetrics>,
}

impl SystemKeeper {
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

    /// Pending status pushes: entries whose computed transition disagrees
    /// with the replica status in an actionable direction.
    async fn pending_actions(&self, timestamp: u64) -> Vec<(Address, KeeperAction)> {
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
                let worsening = transition.rank() > agent.status.rank()
                    && matches!(transition, AgentStatus::Ccb | AgentStatus::Liquidation);
                let recovering = matches!(
                    agent.status,
                    AgentStatus::Ccb | AgentStatus::Liquidation
                ) && transition == AgentStatus::Normal;
                if worsening {
                    Some((agent.vault_address, KeeperAction::StartLiquidation))
                } else if recovering {
                    Some((agent.vault_address, KeeperAction::EndLiquidation))
                } else {
                    None
                }
            })
            .collect()
    }

    async fn push_transition(
        clients: ActorClients,
        metrics: Arc<WatcherMetrics>,
        scope: Arc<EventScope>,
        agent_vault: Address,
        action: KeeperAction,
    ) -> WatcherResult<()> {
        match action {
            KeeperAction::StartLiquidation => {
                clients
                    .asset_manager
                    .start_liquidation(agent_vault)
                    .await
                    .or_else(|e| scope.exit_on_expected_error(e, START_EXPECTED))?;
                metrics.liquidations_started.inc();
                info!(%agent_vault, "pushed liquidation start");
            }
            KeeperAction::EndLiquidation => {
                clients
                    .asset_manager
                    .end_liquidation(agent_vault)
                    .await
                    .or_else(|e| scope.exit_on_expected_error(e, END_EXPECTED))?;
                metrics.liquidations_ended.inc();
                info!(%agent_vault, "pushed liquidation end");
            }
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl Actor for SystemKeeper {
    fn name(&self) -> &'static str {
        "system_keeper"
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
        for (agent_vault, action) in self.pending_actions(timestamp).await {
            let clients = self.clients.clone();
            let metrics = self.metrics.clone();
            self.runner.start_thread(move |scope| {
                Self::push_transition(clients, metrics, scope, agent_vault, action)
            });
        }
        Ok(())
    }
}
