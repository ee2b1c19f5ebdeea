//! Shared data types crossing module boundaries.
//!
//! These are pure data and serializable; chain-specific encodings stay in
//! the external clients that produce them.

use alloy_primitives::{Address, B256, U256};
use serde::{Deserialize, Serialize};

/// Agent liquidation status. `Destroying` is driven by explicit agent
/// action and suppresses liquidation transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AgentStatus {
    Normal,
    Ccb,
    Liquidation,
    FullLiquidation,
    Destroying,
}

impl AgentStatus {
    /// Severity ordering used to pick the worse of two computed transitions.
    pub fn rank(&self) -> u8 {
        match self {
            AgentStatus::Normal => 0,
            AgentStatus::Ccb => 1,
            AgentStatus::Liquidation => 2,
            AgentStatus::FullLiquidation => 3,
            AgentStatus::Destroying => 4,
        }
    }

    /// The worse (more severe) of two statuses.
    pub fn worse(self, other: AgentStatus) -> AgentStatus {
        if other.rank() > self.rank() {
            other
        } else {
            self
        }
    }
}

/// One spending input of an underlying-chain transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxInput {
    /// Source address on the underlying chain.
    pub address: String,
    /// Amount the address spent, in underlying base units.
    pub spent_uba: U256,
}

/// Underlying-chain transaction as returned by the indexer, with the
/// payment reference already decoded from the transaction memo.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnderlyingTransaction {
    pub hash: B256,
    pub block_number: u64,
    /// Decoded payment reference, if the transaction carried one.
    pub reference: Option<B256>,
    pub inputs: Vec<TxInput>,
}

impl UnderlyingTransaction {
    /// Total amount `address` spent across the transaction's inputs.
    pub fn spent_by(&self, address: &str) -> U256 {
        self.inputs
            .iter()
            .filter(|i| i.address == address)
            .fold(U256::ZERO, |acc, i| acc.saturating_add(i.spent_uba))
    }
}

/// Proof of a balance-decreasing transaction on the underlying chain,
/// consumable as a challenge argument. Opaque to the core except for the
/// fields the challenger keys on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceDecreasingProof {
    pub tx_hash: B256,
    pub source_address: String,
    pub spent_uba: U256,
    pub payment_reference: Option<B256>,
    pub block_number: u64,
    pub merkle_proof: Vec<B256>,
}

/// Proof that no payment matching a reference/amount/deadline exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferencedPaymentNonexistenceProof {
    pub payment_reference: B256,
    pub destination_address: String,
    pub amount_uba: U256,
    pub deadline_block: u64,
    pub deadline_timestamp: u64,
    pub merkle_proof: Vec<B256>,
}

/// Proof that a block at the given height exists and is confirmed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmedBlockHeightProof {
    pub block_number: u64,
    pub timestamp: u64,
    pub merkle_proof: Vec<B256>,
}

/// Live on-chain snapshot of an agent, used to reconstruct a tracked agent
/// the first time an event references an unknown vault address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentInfo {
    pub vault_address: Address,
    pub underlying_address: String,
    pub status: AgentStatus,
    pub status_timestamp: u64,
    pub reserved_uba: U256,
    pub minted_uba: U256,
    pub redeeming_uba: U256,
    pub dust_uba: U256,
    pub free_underlying_balance_uba: U256,
    pub announced_underlying_withdrawal_id: u64,
    pub vault_collateral_token: Address,
    pub vault_collateral_wei: U256,
    pub pool_collateral_wei: U256,
}
