//! Collateral-type registry and price snapshots.
//!
//! Collateral types are added by events and mutated by ratio-change and
//! deprecation events; entries are never removed, only deprecated, so old
//! events always find their type.

use std::collections::HashMap;

use alloy_primitives::{Address, U256};
use serde::{Deserialize, Serialize};

/// Collateral classes. Vault collateral is the agent's own token; pool
/// collateral is held by the collateral pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CollateralClass {
    Vault,
    Pool,
}

/// Descriptor of one collateral token with its ratio thresholds (in BIPS).
/// `ccb_cr_bips < min_cr_bips < safety_cr_bips` by protocol construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollateralType {
    pub class: CollateralClass,
    pub token: Address,
    pub decimals: u8,
    /// Unix timestamp after which the type is invalid; 0 = no expiry.
    pub valid_until: u64,
    /// Minimum ratio required for minting.
    pub min_cr_bips: u64,
    /// Below this, liquidation starts immediately.
    pub ccb_cr_bips: u64,
    /// Recovery target that ends a liquidation.
    pub safety_cr_bips: u64,
}

impl CollateralType {
    pub fn is_valid_at(&self, timestamp: u64) -> bool {
        self.valid_until == 0 || timestamp <= self.valid_until
    }
}

/// Ordered collection of collateral types, keyed by (class, token).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollateralRegistry {
    entries: Vec<CollateralType>,
}

impl CollateralRegistry {
    pub fn new(entries: Vec<CollateralType>) -> Self {
        Self { entries }
    }

    /// Add a collateral type. A duplicate (class, token) add is ignored;
    /// re-announcement of a known type is not a divergence.
    pub fn add(&mut self, collateral: CollateralType) {
        if self.get(collateral.class, &collateral.token).is_none() {
            self.entries.push(collateral);
        }
    }

    pub fn get(&self, class: CollateralClass, token: &Address) -> Option<&CollateralType> {
        self.entries
            .iter()
            .find(|c| c.class == class && &c.token == token)
    }

    pub fn update_ratios(
        &mut self,
        class: CollateralClass,
        token: &Address,
        min_cr_bips: u64,
        ccb_cr_bips: u64,
        safety_cr_bips: u64,
    ) {
        if let Some(entry) = self
            .entries
            .iter_mut()
            .find(|c| c.class == class && &c.token == token)
        {
            entry.min_cr_bips = min_cr_bips;
            entry.ccb_cr_bips = ccb_cr_bips;
            entry.safety_cr_bips = safety_cr_bips;
        }
    }

    /// Deprecate an entry. It stays in the registry so agents still holding
    /// it can be evaluated until they switch.
    pub fn deprecate(&mut self, class: CollateralClass, token: &Address, valid_until: u64) {
        if let Some(entry) = self
            .entries
            .iter_mut()
            .find(|c| c.class == class && &c.token == token)
        {
            entry.valid_until = valid_until;
        }
    }

    /// The pool collateral type (there is one per asset manager).
    pub fn pool(&self) -> Option<&CollateralType> {
        self.entries.iter().find(|c| c.class == CollateralClass::Pool)
    }

    pub fn iter(&self) -> impl Iterator<Item = &CollateralType> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// One price feed quote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedPrice {
    pub price: U256,
    pub decimals: u8,
}

/// Snapshot of all price feeds the watcher needs: the bridged asset and
/// every collateral token. Replaced wholesale on price finalization.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceSnapshot {
    pub asset: FeedPrice,
    pub tokens: HashMap<Address, FeedPrice>,
}

impl Default for FeedPrice {
    fn default() -> Self {
        Self {
            price: U256::ZERO,
            decimals: 0,
        }
    }
}

impl PriceSnapshot {
    pub fn token(&self, token: &Address) -> Option<&FeedPrice> {
        self.tokens.get(token)
    }
}
