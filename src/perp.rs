//! Perp-accounting capability (`spec.md` §6.1, §9 design note).
//!
//! The matching engine depends on exactly four operations supplied by the
//! external perpetual-accounting module: market config, mark price, margin
//! check, position update. `spec.md` §9 calls for modeling this as "a
//! capability record of four function-typed fields... No dynamic trait
//! object inheritance beyond this capability set" — the engine holds a
//! borrow of the record rather than a `Box<dyn Trait>`, so a caller can
//! plug in closures, free functions, or a bound method pointer without the
//! engine ever depending on a concrete accounting-module type.

use crate::decimal::{Price, Quantity, Rate};
use crate::order::{MarketId, Side, TraderId};
use std::fmt;

/// Per-market fee and margin configuration, as returned by `get_market`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarketConfig {
    pub taker_fee_rate: Rate,
    pub maker_fee_rate: Rate,
    pub initial_margin_rate: Rate,
}

/// An opaque failure from the perp module (margin rejection, unknown
/// market, accounting fault). The engine only ever logs or surfaces the
/// message; it does not interpret the cause.
#[derive(Debug, Clone)]
pub struct PerpError(pub String);

impl fmt::Display for PerpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for PerpError {}

/// The engine's entire coupling surface to perp-accounting (`spec.md`
/// §6.1). Each field is a `Send + Sync` function pointer/closure so the
/// record can be constructed once and shared across scheduler tasks.
pub struct PerpCapability<'a> {
    pub get_market: Box<dyn Fn(&str) -> Option<MarketConfig> + Send + Sync + 'a>,
    pub get_mark_price: Box<dyn Fn(&str) -> Option<Price> + Send + Sync + 'a>,
    pub check_margin_requirement: Box<
        dyn Fn(&TraderId, &MarketId, Side, Quantity, Price, bool) -> Result<(), PerpError>
            + Send
            + Sync
            + 'a,
    >,
    pub update_position: Box<
        dyn Fn(&TraderId, &MarketId, Side, Quantity, Price, crate::decimal::Notional) -> Result<(), PerpError>
            + Send
            + Sync
            + 'a,
    >,
}

impl<'a> PerpCapability<'a> {
    pub fn get_market(&self, market_id: &str) -> Option<MarketConfig> {
        (self.get_market)(market_id)
    }

    pub fn get_mark_price(&self, market_id: &str) -> Option<Price> {
        (self.get_mark_price)(market_id)
    }

    /// `reduce_only` is forwarded so the perp module can reject an order
    /// that would increase the caller's absolute position in `market_id`
    /// (`spec.md` §4.5 "Reduce-only", testable property 12) — the core
    /// holds no position state of its own to check that against.
    pub fn check_margin_requirement(
        &self,
        trader: &TraderId,
        market_id: &MarketId,
        side: Side,
        quantity: Quantity,
        price: Price,
        reduce_only: bool,
    ) -> Result<(), PerpError> {
        (self.check_margin_requirement)(trader, market_id, side, quantity, price, reduce_only)
    }

    pub fn update_position(
        &self,
        trader: &TraderId,
        market_id: &MarketId,
        side: Side,
        quantity: Quantity,
        price: Price,
        fee: crate::decimal::Notional,
    ) -> Result<(), PerpError> {
        (self.update_position)(trader, market_id, side, quantity, price, fee)
    }
}
