//! Mock clients and fixtures shared across unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use alloy_primitives::{Address, B256, U256};
use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::actors::ActorClients;
use crate::clients::{
    AssetManagerClient, AttestationClient, LedgerClient, UnderlyingIndexerClient,
};
use crate::conversions::{amg_to_token_wei_price, convert_uba_to_token_wei};
use crate::error::{WatcherError, WatcherResult};
use crate::events::{LedgerEvent, LedgerEventEnvelope};
use crate::metrics::WatcherMetrics;
use crate::state::collateral::{CollateralClass, CollateralType, FeedPrice, PriceSnapshot};
use crate::state::settings::AssetSettings;
use crate::state::tracked::TrackedState;
use crate::types::{
    AgentInfo, BalanceDecreasingProof, ConfirmedBlockHeightProof,
    ReferencedPaymentNonexistenceProof, TxInput, UnderlyingTransaction,
};

pub const VAULT_TOKEN: Address = Address::repeat_byte(0xaa);
pub const POOL_TOKEN: Address = Address::repeat_byte(0xbb);
pub const CONTRACT: Address = Address::repeat_byte(0xfa);

// ========== Fixtures ==========

pub fn test_settings() -> AssetSettings {
    AssetSettings::default()
}

pub fn test_collaterals() -> Vec<CollateralType> {
    vec![
        CollateralType {
            class: CollateralClass::Vault,
            token: VAULT_TOKEN,
            decimals: 18,
            valid_until: 0,
            min_cr_bips: 15_000,
            ccb_cr_bips: 13_000,
            safety_cr_bips: 16_000,
        },
        CollateralType {
            class: CollateralClass::Pool,
            token: POOL_TOKEN,
            decimals: 18,
            valid_until: 0,
            min_cr_bips: 15_000,
            ccb_cr_bips: 13_000,
            safety_cr_bips: 16_000,
        },
    ]
}

/// $2 asset, $1 collateral tokens, 6-decimal feeds.
pub fn test_prices() -> PriceSnapshot {
    let token_price = FeedPrice {
        price: U256::from(1_000_000u64),
        decimals: 6,
    };
    PriceSnapshot {
        asset: FeedPrice {
            price: U256::from(2_000_000u64),
            decimals: 6,
        },
        tokens: HashMap::from([(VAULT_TOKEN, token_price.clone()), (POOL_TOKEN, token_price)]),
    }
}

pub fn envelope_at(block: u64, log_index: u32, event: LedgerEvent) -> LedgerEventEnvelope {
    LedgerEventEnvelope {
        block_number: block,
        log_index,
        tx_hash: B256::repeat_byte(0xee),
        emitter: CONTRACT,
        event,
    }
}

pub fn test_agent_vault_created(vault: Address, underlying: &str) -> LedgerEvent {
    LedgerEvent::AgentVaultCreated {
        agent_vault: vault,
        underlying_address: underlying.to_string(),
        vault_collateral_token: VAULT_TOKEN,
    }
}

pub fn test_redemption_requested(
    agent_vault: Address,
    request_id: u64,
    payment_reference: B256,
    value_uba: u64,
) -> LedgerEvent {
    LedgerEvent::RedemptionRequested {
        agent_vault,
        request_id,
        payment_reference,
        value_uba: U256::from(value_uba),
        fee_uba: U256::from(value_uba / 100),
        payment_address: "rREDEEMER".to_string(),
        valid_until_block: 10_000,
        valid_until_timestamp: 1_000_000,
    }
}

/// Single-input underlying payment spending `spent` UBA from `from`.
pub fn underlying_payment(
    hash_seed: u8,
    block: u64,
    from: &str,
    spent: u64,
    reference: Option<B256>,
) -> UnderlyingTransaction {
    UnderlyingTransaction {
        hash: B256::repeat_byte(hash_seed),
        block_number: block,
        reference,
        inputs: vec![TxInput {
            address: from.to_string(),
            spent_uba: U256::from(spent),
        }],
    }
}

// ========== Mock clients ==========

#[derive(Default)]
pub struct MockLedger {
    block_height: AtomicU64,
    block_timestamp: AtomicU64,
    events: Mutex<Vec<LedgerEventEnvelope>>,
    past_events_calls: AtomicUsize,
}

impl MockLedger {
    pub fn new() -> Self {
        let ledger = Self::default();
        ledger.block_timestamp.store(1_000, Ordering::SeqCst);
        ledger
    }

    pub fn set_block_height(&self, height: u64) {
        self.block_height.store(height, Ordering::SeqCst);
    }

    pub fn set_block_timestamp(&self, timestamp: u64) {
        self.block_timestamp.store(timestamp, Ordering::SeqCst);
    }

    pub fn push_event(&self, envelope: LedgerEventEnvelope) {
        self.events.lock().unwrap().push(envelope);
    }

    pub fn past_events_calls(&self) -> usize {
        self.past_events_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LedgerClient for MockLedger {
    async fn block_height(&self) -> WatcherResult<u64> {
        Ok(self.block_height.load(Ordering::SeqCst))
    }

    async fn block_timestamp(&self) -> WatcherResult<u64> {
        Ok(self.block_timestamp.load(Ordering::SeqCst))
    }

    async fn past_events(
        &self,
        _contract: Address,
        from: u64,
        to: u64,
    ) -> WatcherResult<Vec<LedgerEventEnvelope>> {
        self.past_events_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.block_number >= from && e.block_number <= to)
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct MockUnderlyingIndexer {
    block_height: AtomicU64,
    transactions: Mutex<Vec<UnderlyingTransaction>>,
}

impl MockUnderlyingIndexer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_block_height(&self, height: u64) {
        self.block_height.store(height, Ordering::SeqCst);
    }

    pub fn push_transaction(&self, tx: UnderlyingTransaction) {
        self.transactions.lock().unwrap().push(tx);
    }
}

#[async_trait]
impl UnderlyingIndexerClient for MockUnderlyingIndexer {
    async fn block_height(&self) -> WatcherResult<u64> {
        Ok(self.block_height.load(Ordering::SeqCst))
    }

    async fn transactions_within_block_range(
        &self,
        from: u64,
        to: u64,
    ) -> WatcherResult<Vec<UnderlyingTransaction>> {
        Ok(self
            .transactions
            .lock()
            .unwrap()
            .iter()
            .filter(|tx| tx.block_number >= from && tx.block_number <= to)
            .cloned()
            .collect())
    }

    async fn wait_for_transaction_finalization(&self, _tx_hash: B256) -> WatcherResult<()> {
        Ok(())
    }
}

/// Attestation provider that proves everything instantly.
#[derive(Default)]
pub struct MockAttestation;

impl MockAttestation {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl AttestationClient for MockAttestation {
    async fn prove_balance_decreasing_transaction(
        &self,
        tx_hash: B256,
        source_address: &str,
    ) -> WatcherResult<BalanceDecreasingProof> {
        Ok(BalanceDecreasingProof {
            tx_hash,
            source_address: source_address.to_string(),
            spent_uba: U256::ZERO,
            payment_reference: None,
            block_number: 0,
            merkle_proof: vec![],
        })
    }

    async fn prove_referenced_payment_nonexistence(
        &self,
        destination_address: &str,
        payment_reference: B256,
        amount_uba: U256,
        deadline_block: u64,
        deadline_timestamp: u64,
    ) -> WatcherResult<ReferencedPaymentNonexistenceProof> {
        Ok(ReferencedPaymentNonexistenceProof {
            payment_reference,
            destination_address: destination_address.to_string(),
            amount_uba,
            deadline_block,
            deadline_timestamp,
            merkle_proof: vec![],
        })
    }

    async fn prove_confirmed_block_height_exists(
        &self,
    ) -> WatcherResult<ConfirmedBlockHeightProof> {
        Ok(ConfirmedBlockHeightProof {
            block_number: 0,
            timestamp: 0,
            merkle_proof: vec![],
        })
    }
}

/// Scriptable asset manager: records every challenge and liquidation call,
/// optionally failing entry points with a configured revert reason.
#[derive(Default)]
pub struct MockAssetManager {
    agent_infos: Mutex<HashMap<Address, AgentInfo>>,
    illegal_challenges: AtomicUsize,
    double_challenges: AtomicUsize,
    negative_challenges: AtomicUsize,
    start_liquidation_calls: AtomicUsize,
    end_liquidation_calls: AtomicUsize,
    liquidate_calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    fail_illegal_with: Mutex<Option<String>>,
    fail_start_with: Mutex<Option<String>>,
    fail_end_with: Mutex<Option<String>>,
}

impl MockAssetManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_agent_info(&self, info: AgentInfo) {
        self.agent_infos.lock().unwrap().insert(info.vault_address, info);
    }

    pub fn illegal_challenges(&self) -> usize {
        self.illegal_challenges.load(Ordering::SeqCst)
    }

    pub fn double_challenges(&self) -> usize {
        self.double_challenges.load(Ordering::SeqCst)
    }

    pub fn negative_challenges(&self) -> usize {
        self.negative_challenges.load(Ordering::SeqCst)
    }

    pub fn start_liquidation_calls(&self) -> usize {
        self.start_liquidation_calls.load(Ordering::SeqCst)
    }

    pub fn end_liquidation_calls(&self) -> usize {
        self.end_liquidation_calls.load(Ordering::SeqCst)
    }

    pub fn liquidate_calls(&self) -> usize {
        self.liquidate_calls.load(Ordering::SeqCst)
    }

    pub fn fail_illegal_challenges_with(&self, reason: &str) {
        *self.fail_illegal_with.lock().unwrap() = Some(reason.to_string());
    }

    pub fn fail_start_liquidation_with(&self, reason: &str) {
        *self.fail_start_with.lock().unwrap() = Some(reason.to_string());
    }

    pub fn fail_end_liquidation_with(&self, reason: &str) {
        *self.fail_end_with.lock().unwrap() = Some(reason.to_string());
    }

    /// Peak number of concurrently running challenge submissions.
    pub fn max_in_flight_challenges(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn maybe_fail(&self, slot: &Mutex<Option<String>>) -> WatcherResult<()> {
        match slot.lock().unwrap().clone() {
            Some(reason) => Err(WatcherError::ContractRevert(reason)),
            None => Ok(()),
        }
    }

    /// Hold the call open briefly so overlapping submissions are observable.
    async fn track_in_flight(&self) {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl AssetManagerClient for MockAssetManager {
    async fn settings(&self) -> WatcherResult<AssetSettings> {
        Ok(test_settings())
    }

    async fn collateral_types(&self) -> WatcherResult<Vec<CollateralType>> {
        Ok(test_collaterals())
    }

    async fn current_prices(&self) -> WatcherResult<(PriceSnapshot, PriceSnapshot)> {
        Ok((test_prices(), test_prices()))
    }

    async fn total_supply(&self) -> WatcherResult<U256> {
        // The supply backing every registered agent snapshot.
        Ok(self
            .agent_infos
            .lock()
            .unwrap()
            .values()
            .fold(U256::ZERO, |acc, info| acc.saturating_add(info.minted_uba)))
    }

    async fn agent_info(&self, agent_vault: Address) -> WatcherResult<AgentInfo> {
        self.agent_infos
            .lock()
            .unwrap()
            .get(&agent_vault)
            .cloned()
            .ok_or_else(|| WatcherError::ContractRevert("invalid agent vault address".to_string()))
    }

    async fn illegal_payment_challenge(
        &self,
        agent_vault: Address,
        _proof: BalanceDecreasingProof,
    ) -> WatcherResult<Vec<LedgerEvent>> {
        self.track_in_flight().await;
        self.maybe_fail(&self.fail_illegal_with)?;
        self.illegal_challenges.fetch_add(1, Ordering::SeqCst);
        Ok(vec![LedgerEvent::FullLiquidationStarted {
            agent_vault,
            timestamp: 0,
        }])
    }

    async fn double_payment_challenge(
        &self,
        agent_vault: Address,
        _proof1: BalanceDecreasingProof,
        _proof2: BalanceDecreasingProof,
    ) -> WatcherResult<Vec<LedgerEvent>> {
        self.track_in_flight().await;
        self.double_challenges.fetch_add(1, Ordering::SeqCst);
        Ok(vec![LedgerEvent::FullLiquidationStarted {
            agent_vault,
            timestamp: 0,
        }])
    }

    async fn free_balance_negative_challenge(
        &self,
        agent_vault: Address,
        _proofs: Vec<BalanceDecreasingProof>,
    ) -> WatcherResult<Vec<LedgerEvent>> {
        self.track_in_flight().await;
        self.negative_challenges.fetch_add(1, Ordering::SeqCst);
        Ok(vec![LedgerEvent::FullLiquidationStarted {
            agent_vault,
            timestamp: 0,
        }])
    }

    async fn start_liquidation(&self, _agent_vault: Address) -> WatcherResult<()> {
        self.maybe_fail(&self.fail_start_with)?;
        self.start_liquidation_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn end_liquidation(&self, _agent_vault: Address) -> WatcherResult<()> {
        self.maybe_fail(&self.fail_end_with)?;
        self.end_liquidation_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn liquidate(&self, _agent_vault: Address, amount_uba: U256) -> WatcherResult<U256> {
        self.liquidate_calls.fetch_add(1, Ordering::SeqCst);
        Ok(amount_uba)
    }
}

// ========== Environment builder ==========

/// A fully wired mock environment with an initialized replica.
pub struct TestEnv {
    pub ledger: Arc<MockLedger>,
    pub underlying: Arc<MockUnderlyingIndexer>,
    pub attestation: Arc<MockAttestation>,
    pub asset_manager: Arc<MockAssetManager>,
    pub state: Arc<RwLock<TrackedState>>,
    pub metrics: Arc<WatcherMetrics>,
}

impl TestEnv {
    pub fn clients(&self) -> ActorClients {
        ActorClients {
            ledger: self.ledger.clone(),
            underlying: self.underlying.clone(),
            attestation: self.attestation.clone(),
            asset_manager: self.asset_manager.clone(),
        }
    }
}

/// Install a fmt subscriber honoring `RUST_LOG`; safe to call repeatedly.
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub async fn test_env() -> TestEnv {
    init_test_logging();
    let asset_manager = Arc::new(MockAssetManager::new());
    let state = TrackedState::initialize(asset_manager.as_ref(), CONTRACT, 0)
        .await
        .unwrap();
    TestEnv {
        ledger: Arc::new(MockLedger::new()),
        underlying: Arc::new(MockUnderlyingIndexer::new()),
        attestation: Arc::new(MockAttestation::new()),
        asset_manager,
        state: Arc::new(RwLock::new(state)),
        metrics: WatcherMetrics::new_for_testing(),
    }
}

/// Give the agent 1_000_000 minted UBA and set its vault collateral to the
/// given ratio in BIPS under the fixture prices. Pool collateral is kept
/// comfortably healthy so the vault ratio alone drives transitions.
pub async fn undercollateralize(env: &TestEnv, vault: Address, ratio_bips: u64) {
    let mut state = env.state.write().await;
    let minted = U256::from(1_000_000u64);

    let vault_ct = state
        .collaterals
        .get(CollateralClass::Vault, &VAULT_TOKEN)
        .cloned()
        .unwrap();
    let token_price = state.prices.token(&vault_ct.token).cloned().unwrap();
    let asset_price = state.prices.asset.clone();
    let amg_price =
        amg_to_token_wei_price(&state.settings, vault_ct.decimals, &token_price, &asset_price);
    let backing_wei = convert_uba_to_token_wei(&state.settings, minted, amg_price);

    let agent = state.agent_mut(&vault).unwrap();
    agent.minted_uba = minted;
    agent.vault_collateral_wei = backing_wei * U256::from(ratio_bips) / U256::from(10_000);
    agent.pool_collateral_wei = backing_wei * U256::from(3u64);
}

/// A prices-published event re-announcing the replica's current snapshots.
pub async fn prices_published(env: &TestEnv) -> LedgerEvent {
    let state = env.state.read().await;
    LedgerEvent::PricesPublished {
        prices: state.prices.clone(),
        trusted_prices: state.trusted_prices.clone(),
    }
}
