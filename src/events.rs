//! Decoded native-chain contract events.
//!
//! `LedgerEvent` is a closed union: every variant the state replica can
//! apply is listed here, and the clients decode raw logs into it. Unknown
//! logs are dropped at the client boundary so the application path never
//! sees an event it cannot handle.

use alloy_primitives::{Address, B256, U256};
use serde::{Deserialize, Serialize};

use crate::state::collateral::{CollateralClass, CollateralType, PriceSnapshot};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedgerEvent {
    // ========== Settings & collateral management ==========
    SettingChanged {
        name: String,
        value: U256,
    },
    CollateralTypeAdded(CollateralType),
    CollateralRatiosChanged {
        class: CollateralClass,
        token: Address,
        min_cr_bips: u64,
        ccb_cr_bips: u64,
        safety_cr_bips: u64,
    },
    CollateralTypeDeprecated {
        class: CollateralClass,
        token: Address,
        valid_until: u64,
    },
    PricesPublished {
        prices: PriceSnapshot,
        trusted_prices: PriceSnapshot,
    },

    // ========== Agent lifecycle ==========
    AgentVaultCreated {
        agent_vault: Address,
        underlying_address: String,
        vault_collateral_token: Address,
    },
    AgentDestroyAnnounced {
        agent_vault: Address,
        timestamp: u64,
    },
    AgentDestroyed {
        agent_vault: Address,
    },

    // ========== Minting ==========
    CollateralReserved {
        agent_vault: Address,
        collateral_reservation_id: u64,
        value_uba: U256,
        fee_uba: U256,
        payment_reference: B256,
    },
    MintingExecuted {
        agent_vault: Address,
        collateral_reservation_id: u64,
        minted_uba: U256,
        agent_fee_uba: U256,
    },
    MintingPaymentDefault {
        agent_vault: Address,
        collateral_reservation_id: u64,
        reserved_uba: U256,
    },
    CollateralReservationDeleted {
        agent_vault: Address,
        collateral_reservation_id: u64,
        reserved_uba: U256,
    },
    SelfClose {
        agent_vault: Address,
        value_uba: U256,
    },

    // ========== Redemption ==========
    RedemptionRequested {
        agent_vault: Address,
        request_id: u64,
        payment_reference: B256,
        value_uba: U256,
        fee_uba: U256,
        payment_address: String,
        valid_until_block: u64,
        valid_until_timestamp: u64,
    },
    RedemptionPerformed {
        agent_vault: Address,
        request_id: u64,
        value_uba: U256,
        spent_uba: U256,
        tx_hash: B256,
    },
    RedemptionPaymentBlocked {
        agent_vault: Address,
        request_id: u64,
        value_uba: U256,
        spent_uba: U256,
        tx_hash: B256,
    },
    RedemptionPaymentFailed {
        agent_vault: Address,
        request_id: u64,
        value_uba: U256,
        spent_uba: U256,
        tx_hash: B256,
        failure_reason: String,
    },
    RedemptionDefault {
        agent_vault: Address,
        request_id: u64,
        value_uba: U256,
    },
    DustChanged {
        agent_vault: Address,
        dust_uba: U256,
    },

    // ========== Liquidation ==========
    AgentInCcb {
        agent_vault: Address,
        timestamp: u64,
    },
    LiquidationStarted {
        agent_vault: Address,
        timestamp: u64,
    },
    FullLiquidationStarted {
        agent_vault: Address,
        timestamp: u64,
    },
    LiquidationEnded {
        agent_vault: Address,
    },
    LiquidationPerformed {
        agent_vault: Address,
        value_uba: U256,
    },

    // ========== Underlying balance management ==========
    UnderlyingWithdrawalAnnounced {
        agent_vault: Address,
        announcement_id: u64,
        payment_reference: B256,
    },
    UnderlyingWithdrawalConfirmed {
        agent_vault: Address,
        announcement_id: u64,
        spent_uba: U256,
        tx_hash: B256,
    },
    UnderlyingWithdrawalCancelled {
        agent_vault: Address,
        announcement_id: u64,
    },
    UnderlyingBalanceToppedUp {
        agent_vault: Address,
        deposited_uba: U256,
        tx_hash: B256,
    },

    // ========== Collateral movements ==========
    CollateralDeposited {
        agent_vault: Address,
        token: Address,
        amount_wei: U256,
    },
    CollateralWithdrawn {
        agent_vault: Address,
        token: Address,
        amount_wei: U256,
    },
}

impl LedgerEvent {
    /// The agent vault this event concerns, when it concerns one. Settings
    /// and collateral-management events are system-wide and return `None`.
    pub fn agent_vault(&self) -> Option<Address> {
        use LedgerEvent::*;
        match self {
            SettingChanged { .. }
            | CollateralTypeAdded(_)
            | CollateralRatiosChanged { .. }
            | CollateralTypeDeprecated { .. }
            | PricesPublished { .. } => None,
            AgentVaultCreated { agent_vault, .. }
            | AgentDestroyAnnounced { agent_vault, .. }
            | AgentDestroyed { agent_vault }
            | CollateralReserved { agent_vault, .. }
            | MintingExecuted { agent_vault, .. }
            | MintingPaymentDefault { agent_vault, .. }
            | CollateralReservationDeleted { agent_vault, .. }
            | SelfClose { agent_vault, .. }
            | RedemptionRequested { agent_vault, .. }
            | RedemptionPerformed { agent_vault, .. }
            | RedemptionPaymentBlocked { agent_vault, .. }
            | RedemptionPaymentFailed { agent_vault, .. }
            | RedemptionDefault { agent_vault, .. }
            | DustChanged { agent_vault, .. }
            | AgentInCcb { agent_vault, .. }
            | LiquidationStarted { agent_vault, .. }
            | FullLiquidationStarted { agent_vault, .. }
            | LiquidationEnded { agent_vault }
            | LiquidationPerformed { agent_vault, .. }
            | UnderlyingWithdrawalAnnounced { agent_vault, .. }
            | UnderlyingWithdrawalConfirmed { agent_vault, .. }
            | UnderlyingWithdrawalCancelled { agent_vault, .. }
            | UnderlyingBalanceToppedUp { agent_vault, .. }
            | CollateralDeposited { agent_vault, .. }
            | CollateralWithdrawn { agent_vault, .. } => Some(*agent_vault),
        }
    }

    /// Stable variant name for logging.
    pub fn name(&self) -> &'static str {
        use LedgerEvent::*;
        match self {
            SettingChanged { .. } => "SettingChanged",
            CollateralTypeAdded(_) => "CollateralTypeAdded",
            CollateralRatiosChanged { .. } => "CollateralRatiosChanged",
            CollateralTypeDeprecated { .. } => "CollateralTypeDeprecated",
            PricesPublished { .. } => "PricesPublished",
            AgentVaultCreated { .. } => "AgentVaultCreated",
            AgentDestroyAnnounced { .. } => "AgentDestroyAnnounced",
            AgentDestroyed { .. } => "AgentDestroyed",
            CollateralReserved { .. } => "CollateralReserved",
            MintingExecuted { .. } => "MintingExecuted",
            MintingPaymentDefault { .. } => "MintingPaymentDefault",
            CollateralReservationDeleted { .. } => "CollateralReservationDeleted",
            SelfClose { .. } => "SelfClose",
            RedemptionRequested { .. } => "RedemptionRequested",
            RedemptionPerformed { .. } => "RedemptionPerformed",
            RedemptionPaymentBlocked { .. } => "RedemptionPaymentBlocked",
            RedemptionPaymentFailed { .. } => "RedemptionPaymentFailed",
            RedemptionDefault { .. } => "RedemptionDefault",
            DustChanged { .. } => "DustChanged",
            AgentInCcb { .. } => "AgentInCcb",
            LiquidationStarted { .. } => "LiquidationStarted",
            FullLiquidationStarted { .. } => "FullLiquidationStarted",
            LiquidationEnded { .. } => "LiquidationEnded",
            LiquidationPerformed { .. } => "LiquidationPerformed",
            UnderlyingWithdrawalAnnounced { .. } => "UnderlyingWithdrawalAnnounced",
            UnderlyingWithdrawalConfirmed { .. } => "UnderlyingWithdrawalConfirmed",
            UnderlyingWithdrawalCancelled { .. } => "UnderlyingWithdrawalCancelled",
            UnderlyingBalanceToppedUp { .. } => "UnderlyingBalanceToppedUp",
            CollateralDeposited { .. } => "CollateralDeposited",
            CollateralWithdrawn { .. } => "CollateralWithdrawn",
        }
    }
}

/// An event together with its position in the chain, used to order
/// application deterministically.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEventEnvelope {
    pub block_number: u64,
    pub log_index: u32,
    pub tx_hash: B256,
    pub emitter: Address,
    pub event: LedgerEvent,
}

impl LedgerEventEnvelope {
    /// Chain position, totally ordered within one chain.
    pub fn position(&self) -> (u64, u32) {
        (self.block_number, self.log_index)
    }
}

/// Sort events into chain order: by block, then by log index within the
/// block.
pub fn sort_chain_order(events: &mut [LedgerEventEnvelope]) {
    events.sort_by_key(|e| e.position());
}
