//! Protocol settings replica.
//!
//! Fetched wholesale at initialization and patched in place when a
//! `SettingChanged` event is replayed. Setting names are the contract's;
//! an unrecognized name means the replica and the ledger have diverged.

use alloy_primitives::U256;
use serde::{Deserialize, Serialize};

use crate::error::{WatcherError, WatcherResult};

/// Protocol-level numeric parameters. Ratios live on collateral types;
/// everything here is global to the asset manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct AssetSettings {
    /// Decimals of the bridged asset (UBA per whole asset = 10^decimals).
    pub asset_decimals: u8,
    /// Underlying base units per AMG.
    pub asset_minting_granularity_uba: U256,
    /// Lot size in AMG.
    pub lot_size_amg: u64,
    /// How long an agent may stay in the collateral call band before
    /// liquidation starts.
    pub ccb_time_seconds: u64,
    /// Interval between liquidation premium steps.
    pub liquidation_step_seconds: u64,
    /// Maximum age of the trusted price snapshot before it is ignored.
    pub max_trusted_price_age_seconds: u64,
    /// Minimum delay between repeated settings updates.
    pub min_update_repeat_time_seconds: u64,
}

impl Default for AssetSettings {
    fn default() -> Self {
        Self {
            asset_decimals: 6,
            asset_minting_granularity_uba: U256::from(100),
            lot_size_amg: 1_000,
            ccb_time_seconds: 180,
            liquidation_step_seconds: 90,
            max_trusted_price_age_seconds: 300,
            min_update_repeat_time_seconds: 60,
        }
    }
}

impl AssetSettings {
    /// Patch one setting in place. Unknown names fail loudly: the event
    /// stream is authoritative, so a name this replica does not model means
    /// the two can no longer agree.
    pub fn apply_setting_changed(&mut self, name: &str, value: U256) -> WatcherResult<()> {
        let as_u64 = |value: U256| {
            u64::try_from(value)
                .map_err(|_| WatcherError::StateDivergence(format!("setting '{name}' overflows u64")))
        };
        match name {
            "lotSizeAMG" => {
                let lot = as_u64(value)?;
                if lot == 0 {
                    // Lot size divides UBA amounts; zero would panic there.
                    return Err(WatcherError::StateDivergence(
                        "setting 'lotSizeAMG' changed to zero".to_string(),
                    ));
                }
                self.lot_size_amg = lot;
            }
            "ccbTimeSeconds" => self.ccb_time_seconds = as_u64(value)?,
            "liquidationStepSeconds" => self.liquidation_step_seconds = as_u64(value)?,
            "maxTrustedPriceAgeSeconds" => self.max_trusted_price_age_seconds = as_u64(value)?,
            "minUpdateRepeatTimeSeconds" => self.min_update_repeat_time_seconds = as_u64(value)?,
            _ => {
                return Err(WatcherError::StateDivergence(format!(
                    "unrecognized setting '{name}' in setting-changed event"
                )))
            }
        }
        Ok(())
    }

    /// Reject a snapshot whose divisor parameters would panic conversions.
    pub fn validate(&self) -> WatcherResult<()> {
        if self.lot_size_amg == 0 {
            return Err(WatcherError::StateDivergence(
                "settings snapshot has zero lot size".to_string(),
            ));
        }
        if self.asset_minting_granularity_uba.is_zero() {
            return Err(WatcherError::StateDivergence(
                "settings snapshot has zero minting granularity".to_string(),
            ));
        }
        Ok(())
    }
}
