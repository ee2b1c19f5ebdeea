//! Per-agent state replica and the liquidation state machine.
//!
//! A `TrackedAgentState` is mutated exclusively through typed event-handler
//! methods called from the state-application path, so replay stays
//! deterministic. Aggregates saturate at zero; an underflow would mean the
//! event stream itself violated conservation.

use alloy_primitives::{Address, U256};
use serde::{Deserialize, Serialize};

use crate::conversions::{amg_to_token_wei_price, convert_uba_to_token_wei};
use crate::state::collateral::{CollateralClass, CollateralRegistry, CollateralType, PriceSnapshot};
use crate::state::settings::AssetSettings;
use crate::types::{AgentInfo, AgentStatus};

/// Ratio reported when nothing is backed: no minted, reserved or redeeming
/// UBA means no risk, so the ratio is treated as unbounded.
pub const UNBOUNDED_RATIO_BIPS: u64 = u64::MAX;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedAgentState {
    pub vault_address: Address,
    pub underlying_address: String,
    pub status: AgentStatus,
    /// Timestamp of the last status transition; times the CCB window.
    pub status_timestamp: u64,
    /// Collateral reserved for in-flight mintings.
    pub reserved_uba: U256,
    /// Backing for live redemption tickets.
    pub minted_uba: U256,
    /// Currently being redeemed.
    pub redeeming_uba: U256,
    pub dust_uba: U256,
    pub free_underlying_balance_uba: U256,
    /// Zero means no announced withdrawal in flight.
    pub announced_underlying_withdrawal_id: u64,
    pub vault_collateral_token: Address,
    pub vault_collateral_wei: U256,
    pub pool_collateral_wei: U256,
}

impl TrackedAgentState {
    pub fn new(
        vault_address: Address,
        underlying_address: String,
        vault_collateral_token: Address,
    ) -> Self {
        Self {
            vault_address,
            underlying_address,
            status: AgentStatus::Normal,
            status_timestamp: 0,
            reserved_uba: U256::ZERO,
            minted_uba: U256::ZERO,
            redeeming_uba: U256::ZERO,
            dust_uba: U256::ZERO,
            free_underlying_balance_uba: U256::ZERO,
            announced_underlying_withdrawal_id: 0,
            vault_collateral_token,
            vault_collateral_wei: U256::ZERO,
            pool_collateral_wei: U256::ZERO,
        }
    }

    /// Reconstruct from a live on-chain snapshot (trigger-add path).
    pub fn from_info(info: &AgentInfo) -> Self {
        Self {
            vault_address: info.vault_address,
            underlying_address: info.underlying_address.clone(),
            status: info.status,
            status_timestamp: info.status_timestamp,
            reserved_uba: info.reserved_uba,
            minted_uba: info.minted_uba,
            redeeming_uba: info.redeeming_uba,
            dust_uba: info.dust_uba,
            free_underlying_balance_uba: info.free_underlying_balance_uba,
            announced_underlying_withdrawal_id: info.announced_underlying_withdrawal_id,
            vault_collateral_token: info.vault_collateral_token,
            vault_collateral_wei: info.vault_collateral_wei,
            pool_collateral_wei: info.pool_collateral_wei,
        }
    }

    // ========== Event handlers ==========

    pub fn handle_collateral_reserved(&mut self, value_uba: U256) {
        self.reserved_uba = self.reserved_uba.saturating_add(value_uba);
    }

    pub fn handle_minting_executed(&mut self, minted_uba: U256, agent_fee_uba: U256) {
        self.reserved_uba = self.reserved_uba.saturating_sub(minted_uba);
        self.minted_uba = self.minted_uba.saturating_add(minted_uba);
        self.free_underlying_balance_uba =
            self.free_underlying_balance_uba.saturating_add(agent_fee_uba);
    }

    pub fn handle_minting_released(&mut self, reserved_uba: U256) {
        self.reserved_uba = self.reserved_uba.saturating_sub(reserved_uba);
    }

    pub fn handle_redemption_requested(&mut self, value_uba: U256) {
        self.minted_uba = self.minted_uba.saturating_sub(value_uba);
        self.redeeming_uba = self.redeeming_uba.saturating_add(value_uba);
    }

    /// A performed redemption: the agent paid `spent_uba` to cover a
    /// `value_uba` ticket, the difference tops up its free balance.
    pub fn handle_redemption_performed(&mut self, value_uba: U256, spent_uba: U256) {
        self.redeeming_uba = self.redeeming_uba.saturating_sub(value_uba);
        self.free_underlying_balance_uba = self
            .free_underlying_balance_uba
            .saturating_add(value_uba.saturating_sub(spent_uba));
    }

    /// A blocked or failed redemption payment: the ticket value stays with
    /// the agent as free underlying balance.
    pub fn handle_redemption_not_performed(&mut self, value_uba: U256) {
        self.redeeming_uba = self.redeeming_uba.saturating_sub(value_uba);
        self.free_underlying_balance_uba =
            self.free_underlying_balance_uba.saturating_add(value_uba);
    }

    /// A defaulted redemption: the redeemer was paid from collateral, the
    /// underlying was never sent.
    pub fn handle_redemption_defaulted(&mut self, value_uba: U256) {
        self.redeeming_uba = self.redeeming_uba.saturating_sub(value_uba);
        self.free_underlying_balance_uba =
            self.free_underlying_balance_uba.saturating_add(value_uba);
    }

    pub fn handle_self_close(&mut self, value_uba: U256) {
        self.minted_uba = self.minted_uba.saturating_sub(value_uba);
        self.free_underlying_balance_uba =
            self.free_underlying_balance_uba.saturating_add(value_uba);
    }

    pub fn handle_liquidation_performed(&mut self, value_uba: U256) {
        self.minted_uba = self.minted_uba.saturating_sub(value_uba);
        self.free_underlying_balance_uba =
            self.free_underlying_balance_uba.saturating_add(value_uba);
    }

    pub fn handle_dust_changed(&mut self, dust_uba: U256) {
        self.dust_uba = dust_uba;
    }

    pub fn handle_status_change(&mut self, status: AgentStatus, timestamp: u64) {
        if self.status != status {
            self.status = status;
            self.status_timestamp = timestamp;
        }
    }

    pub fn handle_withdrawal_announced(&mut self, announcement_id: u64) {
        self.announced_underlying_withdrawal_id = announcement_id;
    }

    pub fn handle_withdrawal_confirmed(&mut self, spent_uba: U256) {
        self.announced_underlying_withdrawal_id = 0;
        self.free_underlying_balance_uba =
            self.free_underlying_balance_uba.saturating_sub(spent_uba);
    }

    pub fn handle_withdrawal_cancelled(&mut self) {
        self.announced_underlying_withdrawal_id = 0;
    }

    pub fn handle_balance_topped_up(&mut self, deposited_uba: U256) {
        self.free_underlying_balance_uba =
            self.free_underlying_balance_uba.saturating_add(deposited_uba);
    }

    pub fn handle_collateral_deposited(&mut self, class: CollateralClass, amount_wei: U256) {
        match class {
            CollateralClass::Vault => {
                self.vault_collateral_wei = self.vault_collateral_wei.saturating_add(amount_wei)
            }
            CollateralClass::Pool => {
                self.pool_collateral_wei = self.pool_collateral_wei.saturating_add(amount_wei)
            }
        }
    }

    pub fn handle_collateral_withdrawn(&mut self, class: CollateralClass, amount_wei: U256) {
        match class {
            CollateralClass::Vault => {
                self.vault_collateral_wei = self.vault_collateral_wei.saturating_sub(amount_wei)
            }
            CollateralClass::Pool => {
                self.pool_collateral_wei = self.pool_collateral_wei.saturating_sub(amount_wei)
            }
        }
    }

    // ========== Collateral ratio & liquidation transition ==========

    /// Total UBA the agent's collateral must back.
    pub fn backed_uba(&self) -> U256 {
        self.reserved_uba
            .saturating_add(self.minted_uba)
            .saturating_add(self.redeeming_uba)
    }

    pub fn collateral_balance_wei(&self, class: CollateralClass) -> U256 {
        match class {
            CollateralClass::Vault => self.vault_collateral_wei,
            CollateralClass::Pool => self.pool_collateral_wei,
        }
    }

    /// Collateral ratio for one collateral kind, in BIPS. Unbounded when
    /// nothing is backed.
    pub fn collateral_ratio_bips(
        &self,
        settings: &AssetSettings,
        collateral: &CollateralType,
        prices: &PriceSnapshot,
    ) -> Option<u64> {
        let token_price = prices.token(&collateral.token)?;
        let amg_price =
            amg_to_token_wei_price(settings, collateral.decimals, token_price, &prices.asset);
        let backing_wei = convert_uba_to_token_wei(settings, self.backed_uba(), amg_price);
        if backing_wei.is_zero() {
            return Some(UNBOUNDED_RATIO_BIPS);
        }
        let ratio = self
            .collateral_balance_wei(collateral.class)
            .saturating_mul(U256::from(10_000))
            / backing_wei;
        Some(u64::try_from(ratio).unwrap_or(UNBOUNDED_RATIO_BIPS))
    }

    /// Transition the given collateral kind's ratio implies at `timestamp`,
    /// starting from the agent's current status.
    fn transition_for_ratio(
        &self,
        ratio_bips: u64,
        collateral: &CollateralType,
        timestamp: u64,
        settings: &AssetSettings,
    ) -> AgentStatus {
        match self.status {
            AgentStatus::Normal => {
                if ratio_bips < collateral.ccb_cr_bips {
                    AgentStatus::Liquidation
                } else if ratio_bips < collateral.min_cr_bips {
                    AgentStatus::Ccb
                } else {
                    AgentStatus::Normal
                }
            }
            AgentStatus::Ccb => {
                if ratio_bips >= collateral.min_cr_bips {
                    AgentStatus::Normal
                } else if ratio_bips < collateral.ccb_cr_bips
                    || timestamp >= self.status_timestamp.saturating_add(settings.ccb_time_seconds)
                {
                    AgentStatus::Liquidation
                } else {
                    AgentStatus::Ccb
                }
            }
            AgentStatus::Liquidation => {
                if ratio_bips >= collateral.safety_cr_bips {
                    AgentStatus::Normal
                } else {
                    AgentStatus::Liquidation
                }
            }
            AgentStatus::FullLiquidation => AgentStatus::FullLiquidation,
            AgentStatus::Destroying => AgentStatus::Destroying,
        }
    }

    /// Advisory liquidation transition at `timestamp`: the worse of the two
    /// collateral kinds' computed transitions. Read-only; the authoritative
    /// status only changes when a status-change event is replayed.
    ///
    /// Returns the current status when a collateral kind cannot be
    /// evaluated (unknown type or missing price) — no judgement without
    /// data.
    pub fn possible_liquidation_transition(
        &self,
        timestamp: u64,
        settings: &AssetSettings,
        collaterals: &CollateralRegistry,
        prices: &PriceSnapshot,
    ) -> AgentStatus {
        if matches!(
            self.status,
            AgentStatus::FullLiquidation | AgentStatus::Destroying
        ) {
            return self.status;
        }

        let mut result = AgentStatus::Normal;
        for collateral in [
            collaterals.get(CollateralClass::Vault, &self.vault_collateral_token),
            collaterals.pool(),
        ] {
            let Some(collateral) = collateral else {
                return self.status;
            };
            let Some(ratio) = self.collateral_ratio_bips(settings, collateral, prices) else {
                return self.status;
            };
            result = result.worse(self.transition_for_ratio(ratio, collateral, timestamp, settings));
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::collateral::FeedPrice;
    use std::collections::HashMap;

    const VAULT_TOKEN: Address = Address::repeat_byte(0xaa);
    const POOL_TOKEN: Address = Address::repeat_byte(0xbb);

    fn settings() -> AssetSettings {
        AssetSettings::default()
    }

    fn collaterals() -> CollateralRegistry {
        CollateralRegistry::new(vec![
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
                min_cr_bips: 20_000,
                ccb_cr_bips: 19_000,
                safety_cr_bips: 21_000,
            },
        ])
    }

    // $2 asset, $1 tokens; with default settings (6 asset decimals,
    // granularity 100) one AMG is worth 2e14 token wei (scaled 2e23).
    fn prices() -> PriceSnapshot {
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

    /// Agent backing 1_000_000 UBA (= 10_000 AMG = 2e18 wei of backing per
    /// kind), with the given per-kind collateral ratios in BIPS.
    fn agent_with_ratios(vault_bips: u64, pool_bips: u64) -> TrackedAgentState {
        let mut agent = TrackedAgentState::new(Address::repeat_byte(1), "rAGENT".into(), VAULT_TOKEN);
        agent.minted_uba = U256::from(1_000_000u64);
        let backing_wei = U256::from(2u64) * U256::from(10).pow(U256::from(18));
        agent.vault_collateral_wei = backing_wei * U256::from(vault_bips) / U256::from(10_000);
        agent.pool_collateral_wei = backing_wei * U256::from(pool_bips) / U256::from(10_000);
        agent
    }

    #[test]
    fn test_ratio_computation() {
        let agent = agent_with_ratios(17_000, 22_000);
        let registry = collaterals();
        let vault_ct = registry.get(CollateralClass::Vault, &VAULT_TOKEN).unwrap();
        let ratio = agent
            .collateral_ratio_bips(&settings(), vault_ct, &prices())
            .unwrap();
        assert_eq!(ratio, 17_000);
    }

    #[test]
    fn test_unbounded_ratio_when_nothing_backed() {
        let agent = TrackedAgentState::new(Address::repeat_byte(1), "rAGENT".into(), VAULT_TOKEN);
        let registry = collaterals();
        let vault_ct = registry.get(CollateralClass::Vault, &VAULT_TOKEN).unwrap();
        assert_eq!(
            agent.collateral_ratio_bips(&settings(), vault_ct, &prices()),
            Some(UNBOUNDED_RATIO_BIPS)
        );
    }

    #[test]
    fn test_normal_stays_normal_at_or_above_min() {
        let agent = agent_with_ratios(15_000, 20_000);
        assert_eq!(
            agent.possible_liquidation_transition(100, &settings(), &collaterals(), &prices()),
            AgentStatus::Normal
        );
    }

    #[test]
    fn test_normal_to_ccb_between_ccb_and_min() {
        let agent = agent_with_ratios(14_000, 22_000);
        assert_eq!(
            agent.possible_liquidation_transition(100, &settings(), &collaterals(), &prices()),
            AgentStatus::Ccb
        );
    }

    #[test]
    fn test_normal_skips_ccb_below_ccb_threshold() {
        // Ratio below the CCB threshold goes straight to liquidation, and
        // stays there on later evaluations until recovery above safety.
        let mut agent = agent_with_ratios(12_000, 22_000);
        let t = 100;
        assert_eq!(
            agent.possible_liquidation_transition(t, &settings(), &collaterals(), &prices()),
            AgentStatus::Liquidation
        );

        agent.handle_status_change(AgentStatus::Liquidation, t);
        assert_eq!(
            agent.possible_liquidation_transition(t + 1, &settings(), &collaterals(), &prices()),
            AgentStatus::Liquidation
        );

        // Recovery above safety (16_000) returns to normal.
        let backing_wei = U256::from(2u64) * U256::from(10).pow(U256::from(18));
        agent.vault_collateral_wei = backing_wei * U256::from(16_500) / U256::from(10_000);
        agent.pool_collateral_wei = backing_wei * U256::from(22_000) / U256::from(10_000);
        assert_eq!(
            agent.possible_liquidation_transition(t + 2, &settings(), &collaterals(), &prices()),
            AgentStatus::Normal
        );
    }

    #[test]
    fn test_ccb_window_elapse_escalates() {
        let mut agent = agent_with_ratios(14_000, 22_000);
        agent.handle_status_change(AgentStatus::Ccb, 1_000);

        // Within the window, still CCB.
        let within = 1_000 + settings().ccb_time_seconds - 1;
        assert_eq!(
            agent.possible_liquidation_transition(within, &settings(), &collaterals(), &prices()),
            AgentStatus::Ccb
        );

        // Window elapsed: liquidation even though the ratio is unchanged.
        let elapsed = 1_000 + settings().ccb_time_seconds;
        assert_eq!(
            agent.possible_liquidation_transition(elapsed, &settings(), &collaterals(), &prices()),
            AgentStatus::Liquidation
        );
    }

    #[test]
    fn test_ccb_recovery() {
        let mut agent = agent_with_ratios(15_500, 22_000);
        agent.handle_status_change(AgentStatus::Ccb, 1_000);
        assert_eq!(
            agent.possible_liquidation_transition(1_001, &settings(), &collaterals(), &prices()),
            AgentStatus::Normal
        );
    }

    #[test]
    fn test_liquidation_recovery_requires_safety_not_min() {
        let mut agent = agent_with_ratios(15_500, 22_000);
        agent.handle_status_change(AgentStatus::Liquidation, 1_000);
        // 15_500 is above min (15_000) but below safety (16_000).
        assert_eq!(
            agent.possible_liquidation_transition(1_001, &settings(), &collaterals(), &prices()),
            AgentStatus::Liquidation
        );
    }

    #[test]
    fn test_worse_of_two_kinds_governs() {
        // Vault fine, pool below its CCB threshold.
        let agent = agent_with_ratios(17_000, 18_000);
        assert_eq!(
            agent.possible_liquidation_transition(100, &settings(), &collaterals(), &prices()),
            AgentStatus::Liquidation
        );
    }

    #[test]
    fn test_full_liquidation_is_terminal() {
        let mut agent = agent_with_ratios(25_000, 25_000);
        agent.handle_status_change(AgentStatus::FullLiquidation, 1_000);
        assert_eq!(
            agent.possible_liquidation_transition(2_000, &settings(), &collaterals(), &prices()),
            AgentStatus::FullLiquidation
        );
    }

    #[test]
    fn test_aggregate_conservation_over_lifecycle() {
        let mut agent = TrackedAgentState::new(Address::repeat_byte(1), "rAGENT".into(), VAULT_TOKEN);

        agent.handle_collateral_reserved(U256::from(1_000));
        assert_eq!(agent.reserved_uba, U256::from(1_000));

        agent.handle_minting_executed(U256::from(1_000), U256::from(10));
        assert_eq!(agent.reserved_uba, U256::ZERO);
        assert_eq!(agent.minted_uba, U256::from(1_000));
        assert_eq!(agent.free_underlying_balance_uba, U256::from(10));

        agent.handle_redemption_requested(U256::from(400));
        assert_eq!(agent.minted_uba, U256::from(600));
        assert_eq!(agent.redeeming_uba, U256::from(400));

        agent.handle_redemption_performed(U256::from(400), U256::from(395));
        assert_eq!(agent.redeeming_uba, U256::ZERO);
        assert_eq!(agent.free_underlying_balance_uba, U256::from(15));

        agent.handle_self_close(U256::from(600));
        assert_eq!(agent.minted_uba, U256::ZERO);
        assert_eq!(agent.free_underlying_balance_uba, U256::from(615));

        // All aggregates non-negative by construction (saturating).
        assert_eq!(agent.backed_uba(), U256::ZERO);
    }

    #[test]
    fn test_withdrawal_announcement_lifecycle() {
        let mut agent = TrackedAgentState::new(Address::repeat_byte(1), "rAGENT".into(), VAULT_TOKEN);
        agent.handle_balance_topped_up(U256::from(500));

        agent.handle_withdrawal_announced(7);
        assert_eq!(agent.announced_underlying_withdrawal_id, 7);

        agent.handle_withdrawal_confirmed(U256::from(200));
        assert_eq!(agent.announced_underlying_withdrawal_id, 0);
        assert_eq!(agent.free_underlying_balance_uba, U256::from(300));
    }
}
