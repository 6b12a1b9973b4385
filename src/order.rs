//! Order entities: [`Order`], [`ExtendedOrder`], [`ConditionalOrder`] and the
//! shared enums/flags from `spec.md` §3.

use crate::decimal::{Notional, Price, Quantity};
use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Monotonic order identifier, minted by the persistence keeper as
/// `order-N` (see `spec.md` §4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OrderId(pub u64);

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "order-{}", self.0)
    }
}

/// Monotonic trade identifier, minted as `trade-N`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TradeId(pub u64);

impl fmt::Display for TradeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "trade-{}", self.0)
    }
}

/// Monotonic OCO pair identifier, minted as `oco-N`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OcoId(pub u64);

impl fmt::Display for OcoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "oco-{}", self.0)
    }
}

/// Monotonic trailing-stop identifier, minted as `trail-N`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TrailId(pub u64);

impl fmt::Display for TrailId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "trail-{}", self.0)
    }
}

pub type MarketId = String;
pub type TraderId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    #[must_use]
    pub fn opposite(self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => write!(f, "buy"),
            Side::Sell => write!(f, "sell"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderKind {
    Limit,
    Market,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderStatus {
    Open,
    PartiallyFilled,
    Filled,
    Cancelled,
}

impl OrderStatus {
    /// `cancelled`/`filled` are sticky terminal states (`spec.md` §3).
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, OrderStatus::Filled | OrderStatus::Cancelled)
    }

    #[must_use]
    pub fn is_active(self) -> bool {
        !self.is_terminal()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimeInForce {
    Gtc,
    Ioc,
    Fok,
    Gtx,
}

bitflags! {
    /// Order flags from `spec.md` §3 `ExtendedOrder.flags`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct OrderFlags: u8 {
        const REDUCE_ONLY = 0b001;
        const POST_ONLY   = 0b010;
        const HIDDEN      = 0b100;
    }
}

impl Default for OrderFlags {
    fn default() -> Self {
        OrderFlags::empty()
    }
}

/// The core resting/taker order. Identity fields are immutable once minted;
/// `filled_qty`/`status`/`updated_at` are mutated only via [`Order::fill`]
/// or [`Order::cancel`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub order_id: OrderId,
    pub trader: TraderId,
    pub market_id: MarketId,
    pub side: Side,
    pub kind: OrderKind,
    /// Unused for `OrderKind::Market`.
    pub price: Price,
    pub quantity: Quantity,
    pub filled_qty: Quantity,
    pub status: OrderStatus,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Order {
    #[must_use]
    pub fn new(
        order_id: OrderId,
        trader: TraderId,
        market_id: MarketId,
        side: Side,
        kind: OrderKind,
        price: Price,
        quantity: Quantity,
        now: i64,
    ) -> Self {
        Self {
            order_id,
            trader,
            market_id,
            side,
            kind,
            price,
            quantity,
            filled_qty: Quantity::ZERO,
            status: OrderStatus::Open,
            created_at: now,
            updated_at: now,
        }
    }

    #[must_use]
    pub fn remaining_qty(&self) -> Quantity {
        self.quantity - self.filled_qty
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status.is_active() && self.remaining_qty().is_positive()
    }

    /// Apply a fill of `qty`, updating `filled_qty` and `status`.
    ///
    /// # Panics
    /// Panics if the fill would push `filled_qty` past `quantity` — callers
    /// (the matching engine) never offer more than `remaining_qty()`.
    pub fn fill(&mut self, qty: Quantity, now: i64) {
        assert!(
            (self.filled_qty + qty).0 <= self.quantity.0,
            "fill exceeds order quantity"
        );
        self.filled_qty = self.filled_qty + qty;
        self.status = if self.filled_qty == self.quantity {
            OrderStatus::Filled
        } else {
            OrderStatus::PartiallyFilled
        };
        self.updated_at = now;
    }

    pub fn cancel(&mut self, now: i64) {
        self.status = OrderStatus::Cancelled;
        self.updated_at = now;
    }
}

/// An [`Order`] plus the advanced-order-entry fields of `spec.md` §3.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtendedOrder {
    pub order: Order,
    pub time_in_force: TimeInForce,
    pub trigger_price: Option<Price>,
    pub flags: OrderFlags,
    pub client_order_id: Option<String>,
    pub triggered_at: Option<i64>,
}

impl ExtendedOrder {
    #[must_use]
    pub fn new(order: Order, time_in_force: TimeInForce) -> Self {
        Self {
            order,
            time_in_force,
            trigger_price: None,
            flags: OrderFlags::empty(),
            client_order_id: None,
            triggered_at: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConditionalKind {
    StopLoss,
    TakeProfit,
    StopLimit,
    TakeProfitLimit,
}

impl ConditionalKind {
    #[must_use]
    pub fn is_limit_variant(self) -> bool {
        matches!(self, ConditionalKind::StopLimit | ConditionalKind::TakeProfitLimit)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConditionalStatus {
    Open,
    Filled,
    Cancelled,
}

/// A stop-loss/take-profit order awaiting a mark-price trigger (C9).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConditionalOrder {
    pub order_id: OrderId,
    pub trader: TraderId,
    pub market_id: MarketId,
    pub side: Side,
    pub kind: ConditionalKind,
    pub trigger_price: Price,
    /// Only meaningful for `*_limit` variants.
    pub execution_price: Option<Price>,
    pub quantity: Quantity,
    pub flags: OrderFlags,
    pub status: ConditionalStatus,
    pub created_at: i64,
    pub triggered_at: Option<i64>,
}

impl ConditionalOrder {
    /// Whether `mark` crosses this order's trigger (`spec.md` §4.8).
    #[must_use]
    pub fn is_triggered_at(&self, mark: Price) -> bool {
        match (self.kind, self.side) {
            (ConditionalKind::StopLoss, Side::Sell)
            | (ConditionalKind::StopLimit, Side::Sell) => mark <= self.trigger_price,
            (ConditionalKind::StopLoss, Side::Buy) | (ConditionalKind::StopLimit, Side::Buy) => {
                mark >= self.trigger_price
            }
            (ConditionalKind::TakeProfit, Side::Sell)
            | (ConditionalKind::TakeProfitLimit, Side::Sell) => mark >= self.trigger_price,
            (ConditionalKind::TakeProfit, Side::Buy)
            | (ConditionalKind::TakeProfitLimit, Side::Buy) => mark <= self.trigger_price,
        }
    }
}

/// A trailing stop with a dynamically recomputed stop price (C10).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrailingStopOrder {
    pub order_id: TrailId,
    pub trader: TraderId,
    pub market_id: MarketId,
    pub side: Side,
    pub quantity: Quantity,
    /// Exactly one of `trail_amount`/`trail_percent` is positive.
    pub trail_amount: Quantity,
    pub trail_percent: rust_decimal::Decimal,
    /// Zero means "activate immediately".
    pub activation_price: Price,
    pub current_stop_price: Price,
    pub high_water_mark: Price,
    pub low_water_mark: Price,
    pub is_activated: bool,
    pub status: ConditionalStatus,
    pub created_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OcoStatus {
    Pending,
    PartialTriggered,
    Triggered,
    Cancelled,
}

/// A stop/limit pair where either leg cancels the other (C11).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcoOrder {
    pub oco_id: OcoId,
    pub stop_order: ConditionalOrder,
    pub limit_order: Order,
    pub status: OcoStatus,
    pub triggered_id: Option<OrderId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScaleDistribution {
    Linear,
    Exponential,
    Descending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScaleStatus {
    Open,
    PartiallyFilled,
    Filled,
    Cancelled,
}

/// A parent order expanded into `children.len()` resting limit orders
/// across a price range at submission time (C12, `spec.md` §4.11).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScaleOrder {
    pub scale_id: OrderId,
    pub trader: TraderId,
    pub market_id: MarketId,
    pub side: Side,
    pub distribution: ScaleDistribution,
    pub price_start: Price,
    pub price_end: Price,
    pub total_quantity: Quantity,
    pub flags: OrderFlags,
    pub status: ScaleStatus,
    pub children: Vec<OrderId>,
    pub filled_qty: Quantity,
    pub created_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TwapStatus {
    Pending,
    Active,
    Completed,
    Cancelled,
    Failed,
}

/// A parent order executed as a series of timed sub-orders (C12, `spec.md`
/// §4.11). `interval_secs` defaults to 30; `max_slippage` is a fractional
/// [`crate::decimal::Rate`] bound on sub-order execution price drift from
/// the mark price at planning time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TwapOrder {
    pub twap_id: OrderId,
    pub trader: TraderId,
    pub market_id: MarketId,
    pub side: Side,
    pub total_quantity: Quantity,
    pub filled_qty: Quantity,
    pub duration_secs: i64,
    pub interval_secs: i64,
    pub max_slippage: crate::decimal::Rate,
    pub sub_orders_total: u32,
    pub sub_orders_executed: u32,
    pub sub_orders_pending: u32,
    pub catch_up_quantity: Quantity,
    pub avg_executed_price: Option<Price>,
    pub consecutive_failures: u32,
    pub status: TwapStatus,
    pub started_at: i64,
    pub flags: OrderFlags,
}

/// A single maker/taker crossing, as recorded and persisted (`spec.md` §3
/// `Trade`, §4.3 prefix `0x03`). `price` is always the resting maker's
/// price (testable property 3, "maker-price-wins").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub trade_id: TradeId,
    pub market_id: MarketId,
    pub taker: TraderId,
    pub maker: TraderId,
    pub taker_side: Side,
    pub price: Price,
    pub quantity: Quantity,
    pub taker_fee: Notional,
    pub maker_fee: Notional,
    pub timestamp: i64,
}

/// The outcome of a single `process_order` call (`spec.md` §3
/// `MatchResult`). `position_update_errors` is the non-fatal surfacing
/// decided for the §9 open question on position-update failures: trades
/// are the durable source of truth, so a failed `perp.update_position`
/// call is reported here rather than rolling back the trade.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MatchResult {
    pub filled_qty: Quantity,
    pub avg_price: Option<Price>,
    pub remaining_qty: Quantity,
    pub trades: Vec<Trade>,
    pub position_update_errors: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn new_order(qty: i64) -> Order {
        Order::new(
            OrderId(1),
            "trader-a".into(),
            "BTC-PERP".into(),
            Side::Buy,
            OrderKind::Limit,
            Price::new(dec!(100)),
            Quantity::new(rust_decimal::Decimal::from(qty)),
            0,
        )
    }

    #[test]
    fn fill_transitions_through_states() {
        let mut order = new_order(10);
        assert_eq!(order.status, OrderStatus::Open);
        order.fill(Quantity::new(dec!(4)), 1);
        assert_eq!(order.status, OrderStatus::PartiallyFilled);
        assert_eq!(order.remaining_qty(), Quantity::new(dec!(6)));
        order.fill(Quantity::new(dec!(6)), 2);
        assert_eq!(order.status, OrderStatus::Filled);
        assert!(order.status.is_terminal());
    }

    #[test]
    #[should_panic(expected = "fill exceeds order quantity")]
    fn overfill_panics() {
        let mut order = new_order(1);
        order.fill(Quantity::new(dec!(2)), 1);
    }

    #[test]
    fn cancel_is_terminal_and_sticky() {
        let mut order = new_order(5);
        order.cancel(1);
        assert_eq!(order.status, OrderStatus::Cancelled);
        assert!(!order.is_active());
    }

    #[test]
    fn stop_loss_triggers_on_correct_side() {
        let cond = ConditionalOrder {
            order_id: OrderId(1),
            trader: "t".into(),
            market_id: "m".into(),
            side: Side::Sell,
            kind: ConditionalKind::StopLoss,
            trigger_price: Price::new(dec!(49000)),
            execution_price: None,
            quantity: Quantity::new(dec!(1)),
            flags: OrderFlags::empty(),
            status: ConditionalStatus::Open,
            created_at: 0,
            triggered_at: None,
        };
        assert!(!cond.is_triggered_at(Price::new(dec!(50000))));
        assert!(!cond.is_triggered_at(Price::new(dec!(49500))));
        assert!(cond.is_triggered_at(Price::new(dec!(48900))));
    }
}
