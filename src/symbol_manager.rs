//! TradingPair / Asset registry.
//!
//! Immutable at engine start (per the data model's TradingPair invariant):
//! loaded once from configuration, consulted by Intake for precision and
//! bounds, and by the engine/money module for scaling.

use crate::money::ScaledAmount;
use rustc_hash::FxHashMap;

#[derive(Debug, Clone)]
pub struct SymbolInfo {
    pub symbol: String,
    pub symbol_id: u32,
    pub base_asset_id: u32,
    pub quote_asset_id: u32,
    /// Internal price scale (e.g., 2 for 0.01 tick)
    pub price_scale: u32,
    /// API boundary precision for price
    pub price_precision: u32,
    /// Base internal scale (e.g., 8 for BTC)
    pub base_internal_scale: u32,
    /// Minimum order quantity, in base-asset internal scale
    pub min_qty: u64,
    /// Maximum order quantity, in base-asset internal scale
    pub max_qty: u64,
    /// Whether new orders are currently accepted for this pair
    pub is_active: bool,
    /// Base maker fee rate (10^6 precision: 1000 = 0.10%). Unused by the
    /// core - Trade.fee is always zero - kept for a future fee policy.
    pub base_maker_fee: u64,
    pub base_taker_fee: u64,
}

impl SymbolInfo {
    #[inline]
    pub fn price_precision(&self) -> u32 {
        self.price_precision
    }

    #[inline]
    pub fn price_scale(&self) -> u32 {
        self.price_scale
    }

    /// Get qty_unit (base asset unit) - e.g., 10^8 for BTC
    #[inline]
    pub fn qty_unit(&self) -> ScaledAmount {
        crate::money::unit_amount(self.base_internal_scale)
    }

    /// Get price_unit (internal price scale unit) - e.g., 10^2 for 2 decimal places
    #[inline]
    pub fn price_unit(&self) -> ScaledAmount {
        crate::money::unit_amount(self.price_scale())
    }

    /// Calculate quote quantity from price and quantity.
    ///
    /// Formula: (price * qty) / qty_unit
    #[inline]
    pub fn calculate_quote_qty(&self, price: u64, qty: u64) -> u64 {
        (price as u128 * qty as u128 / *self.qty_unit() as u128) as u64
    }

    /// Inverse of `calculate_quote_qty`: given a quote budget and a price,
    /// how much base quantity does it buy, truncated toward zero.
    ///
    /// Used by the matching loop for market-buy `tradeSize` derivation.
    #[inline]
    pub fn calculate_base_qty(&self, funds: u64, price: u64) -> u64 {
        if price == 0 {
            return 0;
        }
        (funds as u128 * *self.qty_unit() as u128 / price as u128) as u64
    }

    #[inline]
    pub fn price_as_decimal(&self, price: u64) -> rust_decimal::Decimal {
        rust_decimal::Decimal::from(price) / rust_decimal::Decimal::from(*self.price_unit())
    }

    #[inline]
    pub fn qty_as_decimal(&self, qty: u64) -> rust_decimal::Decimal {
        rust_decimal::Decimal::from(qty) / rust_decimal::Decimal::from(*self.qty_unit())
    }

    /// Truncate a raw base quantity toward zero so it is within bounds and
    /// representable at the pair's precision; callers must still bounds-check.
    #[inline]
    pub fn in_bounds(&self, qty: u64) -> bool {
        qty >= self.min_qty && qty <= self.max_qty
    }

    /// Truncate a decimal price toward zero to the pair's tick size
    /// (`price_scale`, not the quote asset's own internal scale).
    #[inline]
    pub fn truncate_price(&self, d: rust_decimal::Decimal) -> ScaledAmount {
        crate::money::truncate_decimal(d, self.price_scale)
    }
}

#[derive(Debug, Clone)]
pub struct AssetInfo {
    pub asset_id: u32,
    /// Internal storage scale (e.g., 8 for BTC = 10^8 satoshi)
    pub internal_scale: u32,
    /// API boundary precision for input/output (max decimals allowed)
    pub asset_precision: u32,
    pub name: String,
}

impl AssetInfo {
    #[inline]
    pub fn asset_precision(&self) -> u32 {
        self.asset_precision
    }

    #[inline]
    pub fn internal_scale(&self) -> u32 {
        self.internal_scale
    }

    /// Parse amount, truncating toward zero instead of rejecting excess
    /// precision. This is what Intake uses on raw client quantity/price
    /// input per the TradingPair truncation rule; zero is a valid (if
    /// useless) result and is rejected by the caller, not here.
    pub fn truncate_amount(&self, d: rust_decimal::Decimal) -> ScaledAmount {
        crate::money::truncate_decimal(d, self.internal_scale())
    }
}

/// Manages symbol-to-ID and ID-to-symbol mappings.
///
/// Immutable once the exchange has started: built once from `AppConfig`
/// at process start and shared read-only (`Arc<SymbolManager>`) thereafter.
#[derive(Debug, Clone)]
pub struct SymbolManager {
    pub symbol_to_id: FxHashMap<String, u32>,
    pub id_to_symbol: FxHashMap<u32, String>,
    pub symbol_info: FxHashMap<u32, SymbolInfo>,
    pub assets: FxHashMap<u32, AssetInfo>,
}

impl Default for SymbolManager {
    fn default() -> Self {
        Self::new()
    }
}

impl SymbolManager {
    pub fn new() -> Self {
        SymbolManager {
            symbol_to_id: FxHashMap::default(),
            id_to_symbol: FxHashMap::default(),
            symbol_info: FxHashMap::default(),
            assets: FxHashMap::default(),
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn insert_symbol(
        &mut self,
        symbol: &str,
        id: u32,
        base_asset_id: u32,
        quote_asset_id: u32,
        price_scale: u32,
        price_precision: u32,
        min_qty: u64,
        max_qty: u64,
        is_active: bool,
    ) -> Result<(), &'static str> {
        let base_internal_scale = self
            .assets
            .get(&base_asset_id)
            .map(|a| a.internal_scale)
            .ok_or("base_asset_id not found in assets")?;

        self.symbol_to_id.insert(symbol.to_string(), id);
        self.id_to_symbol.insert(id, symbol.to_string());
        self.symbol_info.insert(
            id,
            SymbolInfo {
                symbol: symbol.to_string(),
                symbol_id: id,
                base_asset_id,
                quote_asset_id,
                price_scale,
                price_precision,
                base_internal_scale,
                min_qty,
                max_qty,
                is_active,
                base_maker_fee: 1000,
                base_taker_fee: 2000,
            },
        );
        Ok(())
    }

    pub fn get_symbol_id(&self, symbol: &str) -> Option<u32> {
        self.symbol_to_id.get(symbol).copied()
    }

    pub fn get_symbol(&self, id: u32) -> Option<&String> {
        self.id_to_symbol.get(&id)
    }

    pub fn get_symbol_info(&self, symbol: &str) -> Option<&SymbolInfo> {
        let id = self.get_symbol_id(symbol)?;
        self.symbol_info.get(&id)
    }

    pub fn get_symbol_info_by_id(&self, id: u32) -> Option<&SymbolInfo> {
        self.symbol_info.get(&id)
    }

    pub fn add_asset(
        &mut self,
        asset_id: u32,
        internal_scale: u32,
        asset_precision: u32,
        name: &str,
    ) {
        self.assets.insert(
            asset_id,
            AssetInfo {
                asset_id,
                internal_scale,
                asset_precision,
                name: name.to_string(),
            },
        );
    }

    pub fn get_asset_name(&self, asset_id: u32) -> Option<String> {
        self.assets.get(&asset_id).map(|a| a.name.clone())
    }

    pub fn get_asset_internal_scale(&self, asset_id: u32) -> Option<u32> {
        self.assets.get(&asset_id).map(|a| a.internal_scale)
    }

    pub fn get_asset_precision(&self, asset_id: u32) -> Option<u32> {
        self.assets.get(&asset_id).map(|a| a.asset_precision)
    }

    pub fn get_asset_id(&self, name: &str) -> Option<u32> {
        self.assets
            .values()
            .find(|a| a.name == name)
            .map(|a| a.asset_id)
    }

    /// Get the number of configured symbols
    pub fn symbol_count(&self) -> usize {
        self.symbol_info.len()
    }

    /// Iterate over all symbols
    pub fn iter_symbols(&self) -> impl Iterator<Item = (&u32, &SymbolInfo)> {
        self.symbol_info.iter()
    }
}
