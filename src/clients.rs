//! External client traits: the seams between the watcher core and the two
//! chains plus the attestation provider.
//!
//! Production implementations wrap RPC transports; tests substitute the
//! mocks in `test_utils`. Every method returns [`WatcherResult`] so
//! transport failures surface as recoverable [`WatcherError::Rpc`] and
//! reverts as [`WatcherError::ContractRevert`] with the reason string
//! preserved for allow-list matching.

use alloy_primitives::{Address, B256, U256};
use async_trait::async_trait;

use crate::error::WatcherResult;
use crate::events::{LedgerEvent, LedgerEventEnvelope};
use crate::state::collateral::{CollateralType, PriceSnapshot};
use crate::state::settings::AssetSettings;
use crate::types::{
    AgentInfo, BalanceDecreasingProof, ConfirmedBlockHeightProof,
    ReferencedPaymentNonexistenceProof, UnderlyingTransaction,
};

/// Read access to the native chain's event log.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    async fn block_height(&self) -> WatcherResult<u64>;

    /// Timestamp of the latest block, the reference clock for liquidation
    /// transitions.
    async fn block_timestamp(&self) -> WatcherResult<u64>;

    /// Decoded events emitted by `contract` in blocks `from..=to`.
    async fn past_events(
        &self,
        contract: Address,
        from: u64,
        to: u64,
    ) -> WatcherResult<Vec<LedgerEventEnvelope>>;
}

/// Read access to an indexer over the underlying payment chain.
#[async_trait]
pub trait UnderlyingIndexerClient: Send + Sync {
    async fn block_height(&self) -> WatcherResult<u64>;

    /// All transactions in blocks `from..=to`, inputs resolved.
    async fn transactions_within_block_range(
        &self,
        from: u64,
        to: u64,
    ) -> WatcherResult<Vec<UnderlyingTransaction>>;

    /// Resolve once the transaction is buried under enough blocks to be
    /// considered final.
    async fn wait_for_transaction_finalization(&self, tx_hash: B256) -> WatcherResult<()>;
}

/// Attestation provider producing merkle-proved statements about the
/// underlying chain, consumed by the asset manager's challenge entry points.
///
/// Proof requests take at least one attestation round; until the round
/// containing the statement finalizes the provider returns
/// [`WatcherError::AttestationNotReady`](crate::error::WatcherError) and the
/// caller retries on a later cycle.
#[async_trait]
pub trait AttestationClient: Send + Sync {
    async fn prove_balance_decreasing_transaction(
        &self,
        tx_hash: B256,
        source_address: &str,
    ) -> WatcherResult<BalanceDecreasingProof>;

    async fn prove_referenced_payment_nonexistence(
        &self,
        destination_address: &str,
        payment_reference: B256,
        amount_uba: U256,
        deadline_block: u64,
        deadline_timestamp: u64,
    ) -> WatcherResult<ReferencedPaymentNonexistenceProof>;

    async fn prove_confirmed_block_height_exists(&self)
        -> WatcherResult<ConfirmedBlockHeightProof>;
}

/// Transaction and view access to the asset manager contract.
///
/// Challenge submissions return the events the call emitted, so callers can
/// log the outcome without waiting for the next event scan.
#[async_trait]
pub trait AssetManagerClient: Send + Sync {
    async fn settings(&self) -> WatcherResult<AssetSettings>;

    async fn collateral_types(&self) -> WatcherResult<Vec<CollateralType>>;

    /// Current (prices, trusted prices) snapshots.
    async fn current_prices(&self) -> WatcherResult<(PriceSnapshot, PriceSnapshot)>;

    /// Total outstanding fasset supply in UBA.
    async fn total_supply(&self) -> WatcherResult<U256>;

    async fn agent_info(&self, agent_vault: Address) -> WatcherResult<AgentInfo>;

    async fn illegal_payment_challenge(
        &self,
        agent_vault: Address,
        proof: BalanceDecreasingProof,
    ) -> WatcherResult<Vec<LedgerEvent>>;

    async fn double_payment_challenge(
        &self,
        agent_vault: Address,
        proof1: BalanceDecreasingProof,
        proof2: BalanceDecreasingProof,
    ) -> WatcherResult<Vec<LedgerEvent>>;

    async fn free_balance_negative_challenge(
        &self,
        agent_vault: Address,
        proofs: Vec<BalanceDecreasingProof>,
    ) -> WatcherResult<Vec<LedgerEvent>>;

    async fn start_liquidation(&self, agent_vault: Address) -> WatcherResult<()>;

    async fn end_liquidation(&self, agent_vault: Address) -> WatcherResult<()>;

    /// Liquidate up to `amount_uba` of the agent's backing; returns the
    /// amount actually liquidated.
    async fn liquidate(&self, agent_vault: Address, amount_uba: U256) -> WatcherResult<U256>;
}
