//! Fraud detection over the underlying chain.
//!
//! ```text
//!   native events ──▶ redemption / withdrawal indices
//!                                │
//!   underlying txs ──▶ examine ──┼─▶ illegal payment challenge
//!                                ├─▶ double payment challenge
//!                                └─▶ negative free balance challenge
//! ```
//!
//! Each challenge runs as a scoped background task so a slow attestation
//! round never stalls the scan loop. A per-agent advisory lock serializes
//! challenges against the same agent; benign lost races (someone else
//! challenged first, the payment turned out to be a confirmation) are
//! converted into scope exits.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::{Address, B256, U256};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use crate::actors::{Actor, ActorClients};
use crate::config::ChallengerConfig;
use crate::error::{ErrorKind, ErrorMatcher, WatcherResult};
use crate::events::LedgerEvent;
use crate::metrics::WatcherMetrics;
use crate::payment_reference::{self, ReferenceType};
use crate::scope::{EventScope, ScopedRunner};
use crate::state::tracked::TrackedState;
use crate::types::{AgentStatus, UnderlyingTransaction};

/// Revert reasons that mean the illegal-payment race was lost benignly.
const ILLEGAL_PAYMENT_EXPECTED: &[ErrorMatcher] = &[
    ErrorMatcher::Contains("chlg: already liquidating"),
    ErrorMatcher::Contains("chlg: transaction confirmed"),
    ErrorMatcher::Contains("matching redemption active"),
    ErrorMatcher::Contains("matching ongoing announced pmt"),
    ErrorMatcher::Kind(ErrorKind::AttestationNotReady),
];

const DOUBLE_PAYMENT_EXPECTED: &[ErrorMatcher] = &[
    ErrorMatcher::Contains("chlg dbl: already liquidating"),
    ErrorMatcher::Kind(ErrorKind::AttestationNotReady),
];

const NEGATIVE_BALANCE_EXPECTED: &[ErrorMatcher] = &[
    ErrorMatcher::Contains("mult chlg: already liquidating"),
    ErrorMatcher::Contains("mult chlg: enough balance"),
    ErrorMatcher::Kind(ErrorKind::AttestationNotReady),
];

/// A redemption whose payment the agent may legitimately make.
#[derive(Debug, Clone)]
struct ActiveRedemption {
    agent_vault: Address,
    value_uba: U256,
}

/// State shared between the scan loop and its spawned challenge tasks.
struct ChallengerShared {
    clients: ActorClients,
    state: Arc<RwLock<TrackedState>>,
    config: ChallengerConfig,
    metrics: Arc<WatcherMetrics>,
    /// payment reference → redemption it belongs to.
    active_redemptions: RwLock<HashMap<B256, ActiveRedemption>>,
    /// agent vault → txs seen on the underlying chain but not yet confirmed
    /// on the native side.
    unconfirmed_transactions: RwLock<HashMap<Address, HashMap<B256, UnderlyingTransaction>>>,
    /// payment reference → first underlying tx hash carrying it.
    transaction_for_reference: RwLock<HashMap<B256, B256>>,
    /// Advisory lock: agents with a challenge currently in flight.
    challenged_agents: Mutex<HashSet<Address>>,
}

impl ChallengerShared {
    /// Acquire the per-agent challenge lock, bounded retry. Gives up the
    /// scope when the lock stays contended, the other challenge covers the
    /// same misbehavior.
    async fn lock_agent(&self, scope: &EventScope, agent: Address) -> WatcherResult<()> {
        for _ in 0..self.config.max_lock_retries {
            if self.challenged_agents.lock().await.insert(agent) {
                return Ok(());
            }
            tokio::time::sleep(self.config.lock_retry_interval).await;
        }
        debug!(%agent, "challenge lock contended, giving up check");
        scope.exit()
    }

    async fn unlock_agent(&self, agent: Address) {
        self.challenged_agents.lock().await.remove(&agent);
    }

    /// Route a challenge result: expected races count and exit the scope,
    /// anything else propagates.
    fn settle(
        &self,
        scope: &EventScope,
        result: WatcherResult<()>,
        expected: &[ErrorMatcher],
    ) -> WatcherResult<()> {
        match result {
            Ok(()) => Ok(()),
            Err(err) => {
                if expected.iter().any(|m| m.matches(&err)) {
                    self.metrics.expected_races_swallowed.inc();
                }
                scope.exit_on_expected_error(err, expected)
            }
        }
    }

    /// Whether the agent was allowed to make this payment: it either covers
    /// an active redemption assigned to this agent, or it matches the
    /// agent's announced withdrawal.
    async fn transaction_legitimate(
        &self,
        tx: &UnderlyingTransaction,
        agent_vault: Address,
        announced_withdrawal_id: u64,
    ) -> bool {
        let Some(reference) = tx.reference else {
            return false;
        };
        if !payment_reference::is_valid(&reference) {
            return false;
        }
        match payment_reference::decode_type(&reference) {
            Some(ReferenceType::Redemption) => self
                .active_redemptions
                .read()
                .await
                .get(&reference)
                .is_some_and(|r| r.agent_vault == agent_vault),
            Some(ReferenceType::AnnouncedWithdrawal) => {
                announced_withdrawal_id != 0
                    && payment_reference::decode_id(&reference)
                        == U256::from(announced_withdrawal_id)
            }
            _ => false,
        }
    }

    async fn discard_unconfirmed(&self, agent_vault: Address, tx_hash: B256) {
        if let Some(txs) = self.unconfirmed_transactions.write().await.get_mut(&agent_vault) {
            txs.remove(&tx_hash);
        }
    }

    // ========== Challenge tasks ==========

    async fn illegal_payment_challenge(
        self: Arc<Self>,
        scope: Arc<EventScope>,
        agent_vault: Address,
        underlying_address: String,
        tx_hash: B256,
    ) -> WatcherResult<()> {
        self.lock_agent(&scope, agent_vault).await?;
        let result = self
            .illegal_payment_challenge_locked(agent_vault, &underlying_address, tx_hash)
            .await;
        self.unlock_agent(agent_vault).await;
        self.settle(&scope, result, ILLEGAL_PAYMENT_EXPECTED)
    }

    async fn illegal_payment_challenge_locked(
        &self,
        agent_vault: Address,
        underlying_address: &str,
        tx_hash: B256,
    ) -> WatcherResult<()> {
        // The payment may have been confirmed while we waited for the lock.
        let still_unconfirmed = self
            .unconfirmed_transactions
            .read()
            .await
            .get(&agent_vault)
            .is_some_and(|txs| txs.contains_key(&tx_hash));
        if !still_unconfirmed {
            return Ok(());
        }
        let proof = self
            .clients
            .attestation
            .prove_balance_decreasing_transaction(tx_hash, underlying_address)
            .await?;
        let events = self
            .clients
            .asset_manager
            .illegal_payment_challenge(agent_vault, proof)
            .await?;
        self.report_challenge_outcome("illegal_payment", agent_vault, &events);
        Ok(())
    }

    async fn double_payment_challenge(
        self: Arc<Self>,
        scope: Arc<EventScope>,
        agent_vault: Address,
        underlying_address: String,
        tx_hash1: B256,
        tx_hash2: B256,
    ) -> WatcherResult<()> {
        self.lock_agent(&scope, agent_vault).await?;
        let result = self
            .double_payment_challenge_locked(agent_vault, &underlying_address, tx_hash1, tx_hash2)
            .await;
        self.unlock_agent(agent_vault).await;
        self.settle(&scope, result, DOUBLE_PAYMENT_EXPECTED)
    }

    async fn double_payment_challenge_locked(
        &self,
        agent_vault: Address,
        underlying_address: &str,
        tx_hash1: B256,
        tx_hash2: B256,
    ) -> WatcherResult<()> {
        let proof1 = self
            .clients
            .attestation
            .prove_balance_decreasing_transaction(tx_hash1, underlying_address)
            .await?;
        let proof2 = self
            .clients
            .attestation
            .prove_balance_decreasing_transaction(tx_hash2, underlying_address)
            .await?;
        let events = self
            .clients
            .asset_manager
            .double_payment_challenge(agent_vault, proof1, proof2)
            .await?;
        self.report_challenge_outcome("double_payment", agent_vault, &events);
        Ok(())
    }

    async fn negative_balance_challenge(
        self: Arc<Self>,
        scope: Arc<EventScope>,
        agent_vault: Address,
        underlying_address: String,
    ) -> WatcherResult<()> {
        self.lock_agent(&scope, agent_vault).await?;
        let result = self
            .negative_balance_challenge_locked(agent_vault, &underlying_address)
            .await;
        self.unlock_agent(agent_vault).await;
        self.settle(&scope, result, NEGATIVE_BALANCE_EXPECTED)
    }

    async fn negative_balance_challenge_locked(
        &self,
        agent_vault: Address,
        underlying_address: &str,
    ) -> WatcherResult<()> {
        let free_balance = {
            let state = self.state.read().await;
            match state.agent(&agent_vault) {
                Some(agent) => agent.free_underlying_balance_uba,
                None => return Ok(()),
            }
        };

        // Unaccounted spending per unconfirmed tx: what the agent spent
        // minus whatever an active redemption entitles it to.
        let mut candidates: Vec<(B256, U256)> = Vec::new();
        {
            let unconfirmed = self.unconfirmed_transactions.read().await;
            let redemptions = self.active_redemptions.read().await;
            let Some(txs) = unconfirmed.get(&agent_vault) else {
                return Ok(());
            };
            for (hash, tx) in txs {
                let spent = tx.spent_by(underlying_address);
                let accounted = tx
                    .reference
                    .and_then(|r| redemptions.get(&r))
                    .filter(|r| r.agent_vault == agent_vault)
                    .map(|r| r.value_uba)
                    .unwrap_or(U256::ZERO);
                let unaccounted = spent.saturating_sub(accounted);
                if !unaccounted.is_zero() {
                    candidates.push((*hash, unaccounted));
                }
            }
        }

        let total: U256 = candidates
            .iter()
            .fold(U256::ZERO, |acc, (_, v)| acc.saturating_add(*v));
        if total <= free_balance {
            return Ok(());
        }

        // Report the most expensive ones, bounded by the contract's
        // per-challenge limit.
        candidates.sort_by(|a, b| b.1.cmp(&a.1));
        candidates.truncate(self.config.max_reported_transactions);

        let mut proofs = Vec::with_capacity(candidates.len());
        for (hash, _) in &candidates {
            proofs.push(
                self.clients
                    .attestation
                    .prove_balance_decreasing_transaction(*hash, underlying_address)
                    .await?,
            );
        }
        let events = self
            .clients
            .asset_manager
            .free_balance_negative_challenge(agent_vault, proofs)
            .await?;
        self.report_challenge_outcome("negative_balance", agent_vault, &events);
        Ok(())
    }

    fn report_challenge_outcome(&self, kind: &str, agent_vault: Address, events: &[LedgerEvent]) {
        self.metrics.challenges_submitted.with_label_values(&[kind]).inc();
        let triggered_liquidation = events
            .iter()
            .any(|e| matches!(e, LedgerEvent::FullLiquidationStarted { .. }));
        info!(
            %agent_vault,
            kind,
            triggered_liquidation,
            "challenge submitted"
        );
    }
}

pub struct Challenger {
    shared: Arc<ChallengerShared>,
    runner: ScopedRunner,
    /// (agent vault, request id) → payment reference, so redemption-closing
    /// events (which carry the id, not the reference) can clean the index.
    reference_by_request: HashMap<(Address, u64), B256>,
    /// Underlying scan watermark; zero until the first cycle anchors it.
    last_underlying_block: u64,
}

impl Challenger {
    pub fn new(
        clients: ActorClients,
        state: Arc<RwLock<TrackedState>>,
        config: ChallengerConfig,
        metrics: Arc<WatcherMetrics>,
    ) -> Self {
        let shared = Arc::new(ChallengerShared {
            clients,
            state,
            config,
            metrics: metrics.clone(),
            active_redemptions: RwLock::new(HashMap::new()),
            unconfirmed_transactions: RwLock::new(HashMap::new()),
            transaction_for_reference: RwLock::new(HashMap::new()),
            challenged_agents: Mutex::new(HashSet::new()),
        });
        Self {
            shared,
            runner: ScopedRunner::new(Some(metrics)),
            reference_by_request: HashMap::new(),
            last_underlying_block: 0,
        }
    }

    /// Test and shutdown aid: wait for in-flight challenge tasks.
    pub async fn wait_for_idle(&self) {
        self.runner.wait_for_idle().await;
    }

    pub fn take_uncaught_errors(&self) -> Vec<crate::error::WatcherError> {
        self.runner.take_uncaught_errors()
    }

    async fn handle_native_events(&mut self) -> WatcherResult<()> {
        let events = {
            let mut state = self.shared.state.write().await;
            let events = state
                .read_unhandled_events(
                    self.shared.clients.ledger.as_ref(),
                    self.shared.clients.asset_manager.as_ref(),
                    self.shared.config.max_block_range,
                )
                .await?;
            self.shared
                .metrics
                .last_handled_native_block
                .set(state.last_event_block_handled as i64);
            self.shared.metrics.tracked_agents.set(state.agent_count() as i64);
            events
        };
        self.shared
            .metrics
            .native_events_handled
            .inc_by(events.len() as u64);

        for envelope in &events {
            match &envelope.event {
                LedgerEvent::RedemptionRequested {
                    agent_vault,
                    request_id,
                    payment_reference,
                    value_uba,
                    ..
                } => {
                    self.reference_by_request
                        .insert((*agent_vault, *request_id), *payment_reference);
                    self.shared.active_redemptions.write().await.insert(
                        *payment_reference,
                        ActiveRedemption {
                            agent_vault: *agent_vault,
                            value_uba: *value_uba,
                        },
                    );
                }
                LedgerEvent::RedemptionPerformed {
                    agent_vault,
                    request_id,
                    tx_hash,
                    ..
                }
                | LedgerEvent::RedemptionPaymentBlocked {
                    agent_vault,
                    request_id,
                    tx_hash,
                    ..
                }
                | LedgerEvent::RedemptionPaymentFailed {
                    agent_vault,
                    request_id,
                    tx_hash,
                    ..
                } => {
                    self.close_redemption(*agent_vault, *request_id).await;
                    self.shared.discard_unconfirmed(*agent_vault, *tx_hash).await;
                }
                LedgerEvent::RedemptionDefault {
                    agent_vault,
                    request_id,
                    ..
                } => {
                    self.close_redemption(*agent_vault, *request_id).await;
                }
                LedgerEvent::UnderlyingWithdrawalConfirmed {
                    agent_vault,
                    tx_hash,
                    ..
                } => {
                    self.shared.discard_unconfirmed(*agent_vault, *tx_hash).await;
                }
                LedgerEvent::AgentDestroyed { agent_vault } => {
                    self.shared
                        .unconfirmed_transactions
                        .write()
                        .await
                        .remove(agent_vault);
                }
                _ => {}
            }
        }
        Ok(())
    }

    async fn close_redemption(&mut self, agent_vault: Address, request_id: u64) {
        if let Some(reference) = self.reference_by_request.remove(&(agent_vault, request_id)) {
            self.shared.active_redemptions.write().await.remove(&reference);
            self.shared
                .transaction_for_reference
                .write()
                .await
                .remove(&reference);
        }
    }

    async fn scan_underlying(&mut self) -> WatcherResult<()> {
        let height = self.shared.clients.underlying.block_height().await?;
        let target = height.saturating_sub(self.shared.config.underlying_finality_blocks);

        if self.last_underlying_block == 0 {
            // First cycle: anchor the watermark. Configured start block, or
            // the current finalized tip.
            self.last_underlying_block = if self.shared.config.scan_from_block > 0 {
                self.shared.config.scan_from_block.saturating_sub(1)
            } else {
                target
            };
        }

        let max_block_range = self.shared.config.max_block_range.max(1);
        while self.last_underlying_block < target {
            let from = self.last_underlying_block + 1;
            let to = target.min(from + max_block_range - 1);
            let txs = self
                .shared
                .clients
                .underlying
                .transactions_within_block_range(from, to)
                .await?;
            self.shared
                .metrics
                .underlying_transactions_scanned
                .inc_by(txs.len() as u64);
            for tx in txs {
                self.examine_transaction(tx).await;
            }
            self.last_underlying_block = to;
            self.shared
                .metrics
                .last_handled_underlying_block
                .set(to as i64);
        }
        Ok(())
    }

    /// Run a transaction through the three fraud checks for every tracked
    /// agent that spends in it.
    async fn examine_transaction(&mut self, tx: UnderlyingTransaction) {
        // Agents spending in this tx, resolved against the replica. Agents
        // already in full liquidation are exempt, there is nothing more a
        // challenge could take from them.
        let spenders: Vec<(Address, String, u64)> = {
            let state = self.shared.state.read().await;
            let mut seen = HashSet::new();
            tx.inputs
                .iter()
                .filter_map(|input| state.agent_by_underlying(&input.address))
                .filter(|agent| agent.status != AgentStatus::FullLiquidation)
                .filter(|agent| seen.insert(agent.vault_address))
                .map(|agent| {
                    (
                        agent.vault_address,
                        agent.underlying_address.clone(),
                        agent.announced_underlying_withdrawal_id,
                    )
                })
                .collect()
        };

        for (agent_vault, underlying_address, announced_id) in spenders {
            debug!(%agent_vault, tx = %tx.hash, "agent spends on underlying chain");
            self.shared
                .unconfirmed_transactions
                .write()
                .await
                .entry(agent_vault)
                .or_default()
                .insert(tx.hash, tx.clone());

            let legitimate = self
                .shared
                .transaction_legitimate(&tx, agent_vault, announced_id)
                .await;
            if !legitimate {
                let shared = self.shared.clone();
                let address = underlying_address.clone();
                let tx_hash = tx.hash;
                self.runner.start_thread(move |scope| {
                    shared.illegal_payment_challenge(scope, agent_vault, address, tx_hash)
                });
            }

            // Two distinct payments carrying the same valid reference are a
            // double payment even when each alone looks legitimate. This
            // covers announced-withdrawal references too: while the
            // announcement is open every payment matching it passes the
            // legitimacy check, so reuse is only caught here.
            if let Some(reference) = tx.reference.filter(payment_reference::is_valid) {
                let mut by_reference = self.shared.transaction_for_reference.write().await;
                match by_reference.get(&reference) {
                    None => {
                        by_reference.insert(reference, tx.hash);
                    }
                    Some(first) if *first != tx.hash => {
                        let shared = self.shared.clone();
                        let address = underlying_address.clone();
                        let (h1, h2) = (*first, tx.hash);
                        self.runner.start_thread(move |scope| {
                            shared.double_payment_challenge(scope, agent_vault, address, h1, h2)
                        });
                    }
                    Some(_) => {}
                }
            }

            let shared = self.shared.clone();
            self.runner.start_thread(move |scope| {
                shared.negative_balance_challenge(scope, agent_vault, underlying_address)
            });
        }
    }
}

#[async_trait::async_trait]
impl Actor for Challenger {
    fn name(&self) -> &'static str {
        "challenger"
    }

    fn poll_interval(&self) -> Duration {
        self.shared.config.poll_interval
    }

    async fn step(&mut self) -> WatcherResult<()> {
        self.handle_native_events().await?;
        self.scan_underlying().await
    }
}
