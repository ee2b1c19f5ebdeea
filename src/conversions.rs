//! Conversions between minted-asset units, lot counts and collateral-token
//! amounts.
//!
//! All arithmetic is integer; division truncates toward zero, so repeated
//! conversions never accumulate rounding drift and capacity computations
//! (free lots) always round down, never up.
//!
//! Units: UBA is the underlying-chain base amount, AMG the coarser asset
//! minting granularity, token wei the smallest collateral-token unit. The
//! AMG-to-token-wei price is a fixed-point multiplier scaled by
//! [`amg_token_wei_price_scale`].

use alloy_primitives::U256;
use once_cell::sync::Lazy;

use crate::state::collateral::FeedPrice;
use crate::state::settings::AssetSettings;

pub const AMG_TOKEN_WEI_PRICE_SCALE_EXP: u32 = 9;

static AMG_TOKEN_WEI_PRICE_SCALE: Lazy<U256> = Lazy::new(|| pow10(AMG_TOKEN_WEI_PRICE_SCALE_EXP));

pub fn amg_token_wei_price_scale() -> U256 {
    *AMG_TOKEN_WEI_PRICE_SCALE
}

fn pow10(exp: u32) -> U256 {
    U256::from(10).pow(U256::from(exp))
}

/// Size of one lot in underlying base units.
pub fn lot_size_uba(settings: &AssetSettings) -> U256 {
    U256::from(settings.lot_size_amg).saturating_mul(settings.asset_minting_granularity_uba)
}

pub fn convert_uba_to_amg(settings: &AssetSettings, uba: U256) -> U256 {
    uba / settings.asset_minting_granularity_uba
}

pub fn convert_amg_to_uba(settings: &AssetSettings, amg: U256) -> U256 {
    amg.saturating_mul(settings.asset_minting_granularity_uba)
}

pub fn convert_lots_to_uba(settings: &AssetSettings, lots: u64) -> U256 {
    U256::from(lots).saturating_mul(lot_size_uba(settings))
}

/// Whole lots covered by `uba`; truncates, so partial lots never count.
pub fn convert_uba_to_lots(settings: &AssetSettings, uba: U256) -> u64 {
    let lots = uba / lot_size_uba(settings);
    u64::try_from(lots).unwrap_or(u64::MAX)
}

/// Fixed-point price of one AMG in token wei, scaled by `10^9`.
///
/// Combines the asset and token USD price feeds with their respective
/// decimal scalings:
///
/// ```text
/// price = asset_price * granularity_uba * 10^(token_decimals + token_feed_decimals + 9)
///         -----------------------------------------------------------------------------
///                token_price * 10^(asset_feed_decimals + asset_decimals)
/// ```
pub fn amg_to_token_wei_price(
    settings: &AssetSettings,
    token_decimals: u8,
    token_price: &FeedPrice,
    asset_price: &FeedPrice,
) -> U256 {
    let exp_plus =
        token_decimals as u32 + token_price.decimals as u32 + AMG_TOKEN_WEI_PRICE_SCALE_EXP;
    let exp_minus = asset_price.decimals as u32 + settings.asset_decimals as u32;
    let numerator = asset_price
        .price
        .saturating_mul(settings.asset_minting_granularity_uba)
        .saturating_mul(pow10(exp_plus));
    let denominator = token_price.price.saturating_mul(pow10(exp_minus));
    if denominator.is_zero() {
        return U256::ZERO;
    }
    numerator / denominator
}

pub fn convert_amg_to_token_wei(amg: U256, amg_to_token_wei_price: U256) -> U256 {
    amg.saturating_mul(amg_to_token_wei_price) / amg_token_wei_price_scale()
}

pub fn convert_token_wei_to_amg(wei: U256, amg_to_token_wei_price: U256) -> U256 {
    if amg_to_token_wei_price.is_zero() {
        return U256::ZERO;
    }
    wei.saturating_mul(amg_token_wei_price_scale()) / amg_to_token_wei_price
}

pub fn convert_uba_to_token_wei(
    settings: &AssetSettings,
    uba: U256,
    amg_to_token_wei_price: U256,
) -> U256 {
    convert_amg_to_token_wei(convert_uba_to_amg(settings, uba), amg_to_token_wei_price)
}
