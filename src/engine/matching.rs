//! Matching engine (C6): the taker/maker cross algorithm, fee computation,
//! trade emission and time-in-force post-processing of `spec.md` §4.5.
//!
//! Full crossing loop: opposite-side level walk, FIFO within a level,
//! batch removal of filled makers/empty levels after each level, fees and
//! margin resolved through external lookups ([`PerpCapability`]) instead
//! of an in-process fee schedule, and a cache/keeper pair standing in for
//! direct book ownership.

use super::error::EngineError;
use crate::book::{new_book, Book, BookKind};
use crate::cache::Cache;
use crate::decimal::{Notional, Price, Quantity};
use crate::events::{Event, EventKind, EventSink};
use crate::keeper::Keeper;
use crate::order::{
    MarketId, MatchResult, Order, OrderFlags, OrderId, OrderKind, Side, TimeInForce, Trade,
    TraderId,
};
use crate::perp::PerpCapability;
use std::sync::Arc;

/// Hard cap on `process_batch`'s input length (`spec.md` §7
/// `batch_too_large`).
pub const MAX_BATCH_SIZE: usize = 100;

/// Everything needed to submit a brand-new order; the engine mints the id
/// and constructs the [`Order`] itself (`spec.md` §3 "Orders are created
/// by the matching engine on submission with a minted monotonic
/// order_id").
#[derive(Debug, Clone)]
pub struct NewOrderRequest {
    pub trader: TraderId,
    pub market_id: MarketId,
    pub side: Side,
    pub kind: OrderKind,
    pub price: Price,
    pub quantity: Quantity,
    pub time_in_force: TimeInForce,
    pub flags: OrderFlags,
}

impl NewOrderRequest {
    fn validate(&self) -> Result<(), EngineError> {
        if self.market_id.trim().is_empty() {
            return Err(EngineError::InvalidMarketId);
        }
        if self.trader.trim().is_empty() {
            return Err(EngineError::InvalidTrader);
        }
        if !self.quantity.is_positive() {
            return Err(EngineError::InvalidQuantity);
        }
        if self.kind == OrderKind::Limit && !self.price.is_positive() {
            return Err(EngineError::InvalidPrice);
        }
        Ok(())
    }
}

/// The matching engine proper. Stateless beyond its book-variant choice —
/// all mutable state lives in the [`Cache`]/[`Keeper`] the caller passes
/// in, so one `Engine` can be shared (immutably) across scheduler tasks.
pub struct Engine {
    pub book_kind: BookKind,
}

impl Engine {
    #[must_use]
    pub fn new(book_kind: BookKind) -> Self {
        Self { book_kind }
    }

    /// Primary path (`spec.md` §4.5 `process_order`): mints an id,
    /// validates, checks margin, crosses against the book, applies
    /// time-in-force post-processing, and — for a limit order with
    /// positive remaining — inserts the remainder into the book.
    pub fn process_order(
        &self,
        cache: &Cache,
        keeper: &Keeper,
        perp: &PerpCapability<'_>,
        events: &dyn EventSink,
        request: NewOrderRequest,
        now: i64,
    ) -> Result<MatchResult, EngineError> {
        request.validate()?;

        let reduce_only = request.flags.contains(OrderFlags::REDUCE_ONLY);
        perp.check_margin_requirement(
            &request.trader,
            &request.market_id,
            request.side,
            request.quantity,
            request.price,
            reduce_only,
        )
        .map_err(|_| {
            if reduce_only {
                EngineError::ReduceOnlyWouldIncrease
            } else {
                EngineError::InsufficientMargin
            }
        })?;

        let order_id = keeper.mint_order_id()?;
        let mut order = Order::new(
            order_id,
            request.trader.clone(),
            request.market_id.clone(),
            request.side,
            request.kind,
            request.price,
            request.quantity,
            now,
        );

        events.emit(Event::order(
            EventKind::PlaceOrder,
            order.order_id,
            &order.market_id,
            &order.trader,
            order.side,
            order.price,
            order.quantity,
        ));

        let book = cache.get_book(keeper, &request.market_id)?;

        if request.time_in_force == TimeInForce::Fok {
            let fillable = probe_fillable_quantity(book.as_ref(), &order);
            if fillable < order.quantity {
                cache.set_order(finalize_cancelled(order, now));
                return Err(EngineError::FokNotFilled);
            }
        }

        if request.time_in_force == TimeInForce::Gtx && would_take(book.as_ref(), &order) {
            cache.set_order(finalize_cancelled(order, now));
            return Err(EngineError::PostOnlyWouldTake);
        }

        let result = self.cross(cache, keeper, perp, events, &mut order, now)?;

        let remaining = order.remaining_qty();
        let mut result = result;
        match request.time_in_force {
            TimeInForce::Gtc | TimeInForce::Gtx => {
                if order.kind == OrderKind::Limit && remaining.is_positive() {
                    let order_id = order.order_id;
                    let market_id = order.market_id.clone();
                    cache.set_order(order);
                    // Re-fetch so the book indexes the same shared handle the
                    // order cache holds — otherwise a later fill against this
                    // resting order would mutate a disconnected copy.
                    let handle = cache.get_order(keeper, order_id)?.expect("just inserted");
                    cache.get_book(keeper, &market_id)?.add_order(handle);
                    cache.mark_book_dirty(&market_id);
                } else {
                    if order.kind == OrderKind::Market && remaining.is_positive() {
                        order.cancel(now);
                    }
                    cache.set_order(order);
                }
            }
            TimeInForce::Ioc => {
                if result.filled_qty.is_zero() {
                    cache.set_order(finalize_cancelled(order, now));
                    return Err(EngineError::IocNoFill);
                }
                if remaining.is_positive() {
                    events.emit(Event::order(
                        EventKind::IocPartialCancel,
                        order.order_id,
                        &order.market_id,
                        &order.trader,
                        order.side,
                        order.price,
                        remaining,
                    ));
                    order.cancel(now);
                }
                cache.set_order(order);
            }
            TimeInForce::Fok => {
                // Feasibility was already probed above; a full fill is
                // guaranteed bar a mark-price race, which cannot happen
                // within the single-threaded critical section (`spec.md`
                // §5 "no cooperative yield points inside the match inner
                // loop").
                debug_assert!(!remaining.is_positive(), "FOK order left a remainder after a passed feasibility probe");
                cache.set_order(order);
            }
        }

        result.remaining_qty = remaining;
        Ok(result)
    }

    /// Cancels an active order, removing it from the book (`spec.md` §4.5
    /// `cancel_order`). `caller` must match the order's own trader
    /// (`spec.md` §7 `unauthorized`); system-driven cancellations (a
    /// triggered OCO sibling, an expired scale child) pass the order's own
    /// trader as `caller` since they act on the owner's behalf.
    pub fn cancel_order(
        &self,
        cache: &Cache,
        keeper: &Keeper,
        events: &dyn EventSink,
        caller: &str,
        order_id: OrderId,
        now: i64,
    ) -> Result<Order, EngineError> {
        let handle = cache
            .get_order(keeper, order_id)?
            .ok_or(EngineError::OrderNotFound)?;
        let mut order = handle.write().unwrap();
        if order.trader != caller {
            return Err(EngineError::Unauthorized);
        }
        if !order.is_active() {
            return Err(EngineError::OrderNotActive);
        }
        let book = cache.get_book(keeper, &order.market_id)?;
        if order.kind == OrderKind::Limit {
            book.remove_order_by_id(order_id, order.side, order.price);
            book.remove_level_if_empty(order.side, order.price);
            cache.mark_book_dirty(&order.market_id);
        }
        order.cancel(now);
        let snapshot = order.clone();
        drop(order);
        cache.set_order(snapshot.clone());
        events.emit(Event::order(
            EventKind::CancelOrder,
            snapshot.order_id,
            &snapshot.market_id,
            &snapshot.trader,
            snapshot.side,
            snapshot.price,
            snapshot.remaining_qty(),
        ));
        Ok(snapshot)
    }

    /// Cancel-replace (`spec.md` §4.5 "Modify semantics"): cancels
    /// `order_id` and submits `replacement` as a brand-new order. Fill
    /// state does not carry over; the old id is returned alongside the new
    /// [`MatchResult`]. `caller` must match the original order's trader
    /// (`spec.md` §7 `unauthorized`).
    pub fn modify_order(
        &self,
        cache: &Cache,
        keeper: &Keeper,
        perp: &PerpCapability<'_>,
        events: &dyn EventSink,
        caller: &str,
        order_id: OrderId,
        replacement: NewOrderRequest,
        now: i64,
    ) -> Result<(OrderId, MatchResult), EngineError> {
        self.cancel_order(cache, keeper, events, caller, order_id, now)?;
        let result = self.process_order(cache, keeper, perp, events, replacement, now)?;
        Ok((order_id, result))
    }

    /// Applies `process_order` to each request in sequence, flushing the
    /// cache once at the end (`spec.md` §4.5 `process_batch`).
    pub fn process_batch(
        &self,
        cache: &Cache,
        keeper: &Keeper,
        perp: &PerpCapability<'_>,
        events: &dyn EventSink,
        requests: Vec<NewOrderRequest>,
        now: i64,
    ) -> Result<Vec<Result<MatchResult, EngineError>>, EngineError> {
        if requests.len() > MAX_BATCH_SIZE {
            return Err(EngineError::BatchTooLarge);
        }
        let results = requests
            .into_iter()
            .map(|request| self.process_order(cache, keeper, perp, events, request, now))
            .collect();
        cache.flush(keeper)?;
        Ok(results)
    }

    /// The core crossing loop (`spec.md` §4.5 `match(order)`). Mutates
    /// `taker` in place, records trades into the cache/keeper, and updates
    /// position state via the perp capability.
    fn cross(
        &self,
        cache: &Cache,
        keeper: &Keeper,
        perp: &PerpCapability<'_>,
        events: &dyn EventSink,
        taker: &mut Order,
        now: i64,
    ) -> Result<MatchResult, EngineError> {
        let book = cache.get_book(keeper, &taker.market_id)?;
        let market = perp
            .get_market(&taker.market_id)
            .ok_or(EngineError::InvalidMarketId)?;

        let mut total_filled = Quantity::ZERO;
        let mut total_value = Notional::ZERO;
        let mut trades = Vec::new();
        let mut position_update_errors = Vec::new();
        let opposite_side = taker.side.opposite();

        for level in book.resting_levels(opposite_side) {
            if !taker.remaining_qty().is_positive() {
                break;
            }
            if taker.kind == OrderKind::Limit && !price_compatible(taker.side, taker.price, level.price()) {
                break;
            }

            for maker_handle in level.orders() {
                if !taker.remaining_qty().is_positive() {
                    break;
                }
                let mut maker = maker_handle.write().unwrap();
                if !maker.is_active() {
                    continue;
                }

                let match_qty = taker.remaining_qty().min(maker.remaining_qty());
                let match_price = level.price();
                let notional = match_price * match_qty;
                let taker_fee = market.taker_fee_rate.apply(notional);
                let maker_fee = market.maker_fee_rate.apply(notional);

                let trade_id = keeper.mint_trade_id()?;
                let trade = Trade {
                    trade_id,
                    market_id: taker.market_id.clone(),
                    taker: taker.trader.clone(),
                    maker: maker.trader.clone(),
                    taker_side: taker.side,
                    price: match_price,
                    quantity: match_qty,
                    taker_fee,
                    maker_fee,
                    timestamp: now,
                };

                taker.fill(match_qty, now);
                maker.fill(match_qty, now);

                total_filled = total_filled + match_qty;
                total_value = total_value + notional;

                tracing::trace!(
                    trade_id = trade.trade_id.0,
                    market = %trade.market_id,
                    price = %trade.price,
                    qty = %trade.quantity,
                    "matched"
                );
                events.emit(Event::order(
                    EventKind::Trade,
                    taker.order_id,
                    &trade.market_id,
                    &trade.taker,
                    trade.taker_side,
                    trade.price,
                    trade.quantity,
                ));
                cache.add_trade(trade.clone());
                cache.mark_order_dirty(maker.order_id);

                if let Err(err) = perp.update_position(
                    &taker.trader,
                    &taker.market_id,
                    taker.side,
                    match_qty,
                    match_price,
                    taker_fee,
                ) {
                    tracing::error!(%err, trader = %taker.trader, "position update failed for taker");
                    position_update_errors.push(err.to_string());
                }
                if let Err(err) = perp.update_position(
                    &maker.trader,
                    &maker.market_id,
                    maker.side,
                    match_qty,
                    match_price,
                    maker_fee,
                ) {
                    tracing::error!(%err, trader = %maker.trader, "position update failed for maker");
                    position_update_errors.push(err.to_string());
                }

                self.notify_oco_component_fill(keeper, events, taker.order_id, now)?;
                self.notify_oco_component_fill(keeper, events, maker.order_id, now)?;

                trades.push(trade);
            }

            level.evict_inactive();
            if level.is_empty() {
                book.remove_level_if_empty(opposite_side, level.price());
            }
        }

        if total_filled.is_positive() {
            cache.mark_book_dirty(&taker.market_id);
        }

        let avg_price = if total_filled.is_positive() {
            Some(total_value / total_filled)
        } else {
            None
        };

        Ok(MatchResult {
            filled_qty: total_filled,
            avg_price,
            remaining_qty: taker.remaining_qty(),
            trades,
            position_update_errors,
        })
    }

    /// Resolves `filled_order_id` against the OCO component index and, if
    /// it is the limit leg of a still-pending pair, marks the pair
    /// triggered and cancels the stop leg (`spec.md` §4.10). The stop leg
    /// never rests in the book, so only the limit leg can ever reach here
    /// through a real fill.
    fn notify_oco_component_fill(
        &self,
        keeper: &Keeper,
        events: &dyn EventSink,
        filled_order_id: OrderId,
        _now: i64,
    ) -> Result<(), EngineError> {
        let Some(oco_id) = keeper.oco_by_component_order(filled_order_id)? else {
            return Ok(());
        };
        let Some(mut oco) = keeper.get_oco(oco_id)? else {
            return Ok(());
        };
        if !matches!(
            oco.status,
            crate::order::OcoStatus::Pending | crate::order::OcoStatus::PartialTriggered
        ) {
            return Ok(());
        }
        if filled_order_id != oco.limit_order.order_id {
            return Ok(());
        }

        oco.status = crate::order::OcoStatus::Triggered;
        oco.triggered_id = Some(filled_order_id);
        oco.stop_order.status = crate::order::ConditionalStatus::Cancelled;
        let market_id = oco.limit_order.market_id.clone();
        keeper.put_oco(&oco, &market_id)?;

        events.emit(Event::order(
            EventKind::OcoTriggered,
            filled_order_id,
            &oco.limit_order.market_id,
            &oco.limit_order.trader,
            oco.limit_order.side,
            oco.limit_order.price,
            oco.limit_order.quantity,
        ));
        Ok(())
    }
}

fn finalize_cancelled(mut order: Order, now: i64) -> Order {
    order.cancel(now);
    order
}

/// Price-priority compatibility check for a limit taker against a
/// candidate maker level (`spec.md` §4.5 step 2).
fn price_compatible(taker_side: Side, taker_price: Price, level_price: Price) -> bool {
    match taker_side {
        Side::Buy => taker_price >= level_price,
        Side::Sell => taker_price <= level_price,
    }
}

/// Read-only simulation of how much of `order` the current book could
/// fill, without mutating any resting order — the FOK feasibility probe
/// `spec.md` §4.5 requires ("the implementation MUST run FOK feasibility
/// first... and abort before any mutation if infeasible").
fn probe_fillable_quantity(book: &dyn Book, order: &Order) -> Quantity {
    let mut remaining = order.quantity;
    let mut fillable = Quantity::ZERO;
    for level in book.resting_levels(order.side.opposite()) {
        if !remaining.is_positive() {
            break;
        }
        if order.kind == OrderKind::Limit && !price_compatible(order.side, order.price, level.price()) {
            break;
        }
        let take = remaining.min(level.quantity());
        fillable = fillable + take;
        remaining = remaining - take;
    }
    fillable
}

/// Post-only pre-check (`spec.md` §4.5 GTX `check_post_only`): true if
/// submitting `order` right now would immediately cross and take
/// liquidity.
fn would_take(book: &dyn Book, order: &Order) -> bool {
    match order.side {
        Side::Buy => book.best_ask().is_some_and(|ask| order.price >= ask),
        Side::Sell => book.best_bid().is_some_and(|bid| order.price <= bid),
    }
}

/// Constructs a fresh, empty book of the engine's configured variant —
/// used by callers bootstrapping a market for the first time (the cache's
/// own `get_book` already does this lazily on a snapshot miss; this is
/// exposed for tests and tooling that want a book without going through a
/// keeper).
#[must_use]
pub fn empty_book(kind: BookKind, market_id: impl Into<String>) -> Box<dyn Book> {
    new_book(kind, market_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decimal::Rate;
    use crate::events::RecordingEventSink;
    use crate::kv::MemoryKvStore;
    use crate::perp::MarketConfig;
    use rust_decimal_macros::dec;

    fn perp_cap() -> PerpCapability<'static> {
        PerpCapability {
            get_market: Box::new(|_| {
                Some(MarketConfig {
                    taker_fee_rate: Rate::ZERO,
                    maker_fee_rate: Rate::ZERO,
                    initial_margin_rate: Rate::new(dec!(0.05)),
                })
            }),
            get_mark_price: Box::new(|_| Some(Price::new(dec!(100)))),
            check_margin_requirement: Box::new(|_, _, _, _, _, _| Ok(())),
            update_position: Box::new(|_, _, _, _, _, _| Ok(())),
        }
    }

    fn setup() -> (Engine, Cache, Keeper) {
        (
            Engine::new(BookKind::SkipList),
            Cache::new(BookKind::SkipList),
            Keeper::new(Arc::new(MemoryKvStore::new())),
        )
    }

    fn limit_request(trader: &str, market: &str, side: Side, price: i64, qty: i64) -> NewOrderRequest {
        NewOrderRequest {
            trader: trader.into(),
            market_id: market.into(),
            side,
            kind: OrderKind::Limit,
            price: Price::new(dec!(1) * rust_decimal::Decimal::from(price)),
            quantity: Quantity::new(rust_decimal::Decimal::from(qty)),
            time_in_force: TimeInForce::Gtc,
            flags: OrderFlags::empty(),
        }
    }

    #[test]
    fn scenario_a_simple_cross() {
        let (engine, cache, keeper) = setup();
        let perp = perp_cap();
        let events = RecordingEventSink::new();

        engine
            .process_order(
                &cache,
                &keeper,
                &perp,
                &events,
                limit_request("maker", "BTC-PERP", Side::Sell, 100, 1),
                1,
            )
            .unwrap();
        let result = engine
            .process_order(
                &cache,
                &keeper,
                &perp,
                &events,
                limit_request("taker", "BTC-PERP", Side::Buy, 100, 1),
                2,
            )
            .unwrap();

        assert_eq!(result.filled_qty, Quantity::new(dec!(1)));
        assert_eq!(result.trades.len(), 1);
        assert_eq!(result.trades[0].price, Price::new(dec!(100)));
        let book = cache.get_book(&keeper, "BTC-PERP").unwrap();
        assert_eq!(book.depth().bid_levels, 0);
        assert_eq!(book.depth().ask_levels, 0);
    }

    #[test]
    fn scenario_b_partial_cross_walking_the_book() {
        let (engine, cache, keeper) = setup();
        let perp = perp_cap();
        let events = RecordingEventSink::new();

        engine
            .process_order(&cache, &keeper, &perp, &events, limit_request("m1", "BTC-PERP", Side::Sell, 101, 2), 1)
            .unwrap();
        engine
            .process_order(&cache, &keeper, &perp, &events, limit_request("m2", "BTC-PERP", Side::Sell, 102, 3), 2)
            .unwrap();
        let result = engine
            .process_order(&cache, &keeper, &perp, &events, limit_request("taker", "BTC-PERP", Side::Buy, 102, 4), 3)
            .unwrap();

        assert_eq!(result.trades.len(), 2);
        assert_eq!(result.trades[0].price, Price::new(dec!(101)));
        assert_eq!(result.trades[0].quantity, Quantity::new(dec!(2)));
        assert_eq!(result.trades[1].price, Price::new(dec!(102)));
        assert_eq!(result.trades[1].quantity, Quantity::new(dec!(2)));
        assert_eq!(result.filled_qty, Quantity::new(dec!(4)));
        assert_eq!(result.avg_price, Some(Price::new(dec!(101.5))));

        let book = cache.get_book(&keeper, "BTC-PERP").unwrap();
        assert_eq!(book.best_ask(), Some(Price::new(dec!(102))));
        assert_eq!(book.ask_levels(1)[0].quantity, Quantity::new(dec!(1)));
    }

    #[test]
    fn scenario_c_time_priority_tie() {
        let (engine, cache, keeper) = setup();
        let perp = perp_cap();
        let events = RecordingEventSink::new();

        engine.process_order(&cache, &keeper, &perp, &events, limit_request("s1", "BTC-PERP", Side::Sell, 100, 1), 1).unwrap();
        engine.process_order(&cache, &keeper, &perp, &events, limit_request("s2", "BTC-PERP", Side::Sell, 100, 1), 2).unwrap();
        engine.process_order(&cache, &keeper, &perp, &events, limit_request("s3", "BTC-PERP", Side::Sell, 100, 1), 3).unwrap();

        let result = engine
            .process_order(&cache, &keeper, &perp, &events, limit_request("taker", "BTC-PERP", Side::Buy, 100, 2), 4)
            .unwrap();

        assert_eq!(result.trades.len(), 2);
        assert_eq!(result.trades[0].maker, "s1");
        assert_eq!(result.trades[1].maker, "s2");
        let book = cache.get_book(&keeper, "BTC-PERP").unwrap();
        assert_eq!(book.depth().ask_levels, 1);
        assert_eq!(book.ask_levels(1)[0].quantity, Quantity::new(dec!(1)));
    }

    #[test]
    fn scenario_d_post_only_rejection() {
        let (engine, cache, keeper) = setup();
        let perp = perp_cap();
        let events = RecordingEventSink::new();

        engine.process_order(&cache, &keeper, &perp, &events, limit_request("maker", "BTC-PERP", Side::Sell, 100, 1), 1).unwrap();

        let mut request = limit_request("taker", "BTC-PERP", Side::Buy, 100, 1);
        request.time_in_force = TimeInForce::Gtx;
        let err = engine.process_order(&cache, &keeper, &perp, &events, request, 2).unwrap_err();
        assert_eq!(err, EngineError::PostOnlyWouldTake);

        let book = cache.get_book(&keeper, "BTC-PERP").unwrap();
        assert_eq!(book.depth().ask_levels, 1);
        assert_eq!(book.depth().bid_levels, 0);
    }

    #[test]
    fn scenario_e_fok_failure_leaves_book_untouched() {
        let (engine, cache, keeper) = setup();
        let perp = perp_cap();
        let events = RecordingEventSink::new();

        engine.process_order(&cache, &keeper, &perp, &events, limit_request("maker", "BTC-PERP", Side::Sell, 100, 3), 1).unwrap();

        let mut request = limit_request("taker", "BTC-PERP", Side::Buy, 100, 5);
        request.time_in_force = TimeInForce::Fok;
        let err = engine.process_order(&cache, &keeper, &perp, &events, request, 2).unwrap_err();
        assert_eq!(err, EngineError::FokNotFilled);

        let book = cache.get_book(&keeper, "BTC-PERP").unwrap();
        assert_eq!(book.best_ask(), Some(Price::new(dec!(100))));
        assert_eq!(book.ask_levels(1)[0].quantity, Quantity::new(dec!(3)));
    }

    #[test]
    fn ioc_cancels_unfilled_remainder_without_resting() {
        let (engine, cache, keeper) = setup();
        let perp = perp_cap();
        let events = RecordingEventSink::new();

        engine.process_order(&cache, &keeper, &perp, &events, limit_request("maker", "BTC-PERP", Side::Sell, 100, 1), 1).unwrap();

        let mut request = limit_request("taker", "BTC-PERP", Side::Buy, 100, 3);
        request.time_in_force = TimeInForce::Ioc;
        let result = engine.process_order(&cache, &keeper, &perp, &events, request, 2).unwrap();
        assert_eq!(result.filled_qty, Quantity::new(dec!(1)));

        let book = cache.get_book(&keeper, "BTC-PERP").unwrap();
        assert_eq!(book.depth().bid_levels, 0);
        assert_eq!(events.count_of(EventKind::IocPartialCancel), 1);
    }

    #[test]
    fn batch_too_large_is_rejected() {
        let (engine, cache, keeper) = setup();
        let perp = perp_cap();
        let events = RecordingEventSink::new();
        let requests = (0..101)
            .map(|i| limit_request("t", "BTC-PERP", Side::Buy, 100, 1 + i % 3))
            .collect();
        let err = engine.process_batch(&cache, &keeper, &perp, &events, requests, 1).unwrap_err();
        assert_eq!(err, EngineError::BatchTooLarge);
    }

    /// A reduce-only order that the perp module reports would increase the
    /// caller's position is rejected with `ReduceOnlyWouldIncrease`, never a
    /// generic margin failure, and never crosses the book.
    #[test]
    fn reduce_only_order_that_would_increase_position_is_rejected() {
        let (engine, cache, keeper) = setup();
        let perp = PerpCapability {
            get_market: Box::new(|_| {
                Some(MarketConfig {
                    taker_fee_rate: Rate::ZERO,
                    maker_fee_rate: Rate::ZERO,
                    initial_margin_rate: Rate::new(dec!(0.05)),
                })
            }),
            get_mark_price: Box::new(|_| Some(Price::new(dec!(100)))),
            check_margin_requirement: Box::new(|_, _, _, _, _, reduce_only| {
                if reduce_only {
                    Err(crate::perp::PerpError("would increase position".into()))
                } else {
                    Ok(())
                }
            }),
            update_position: Box::new(|_, _, _, _, _, _| Ok(())),
        };
        let events = RecordingEventSink::new();

        engine
            .process_order(&cache, &keeper, &perp, &events, limit_request("maker", "BTC-PERP", Side::Sell, 100, 1), 1)
            .unwrap();

        let mut request = limit_request("taker", "BTC-PERP", Side::Buy, 100, 1);
        request.flags = OrderFlags::REDUCE_ONLY;
        let err = engine.process_order(&cache, &keeper, &perp, &events, request, 2).unwrap_err();
        assert_eq!(err, EngineError::ReduceOnlyWouldIncrease);

        let book = cache.get_book(&keeper, "BTC-PERP").unwrap();
        assert_eq!(book.depth().ask_levels, 1, "rejected order must not have crossed the book");
    }

    #[test]
    fn cancel_order_by_non_owner_is_unauthorized() {
        let (engine, cache, keeper) = setup();
        let perp = perp_cap();
        let events = RecordingEventSink::new();

        engine
            .process_order(&cache, &keeper, &perp, &events, limit_request("alice", "BTC-PERP", Side::Sell, 100, 1), 1)
            .unwrap();
        let order_id = keeper.orders_by_trader(&"alice".to_string()).unwrap()[0].order_id;

        let err = engine.cancel_order(&cache, &keeper, &events, "mallory", order_id, 2).unwrap_err();
        assert_eq!(err, EngineError::Unauthorized);

        let order = keeper.get_order(order_id).unwrap().unwrap();
        assert!(order.is_active(), "an unauthorized cancel must not mutate the order");

        engine.cancel_order(&cache, &keeper, &events, "alice", order_id, 3).unwrap();
    }

    #[test]
    fn modify_order_by_non_owner_is_unauthorized() {
        let (engine, cache, keeper) = setup();
        let perp = perp_cap();
        let events = RecordingEventSink::new();

        engine
            .process_order(&cache, &keeper, &perp, &events, limit_request("alice", "BTC-PERP", Side::Sell, 100, 1), 1)
            .unwrap();
        let order_id = keeper.orders_by_trader(&"alice".to_string()).unwrap()[0].order_id;

        let err = engine
            .modify_order(
                &cache,
                &keeper,
                &perp,
                &events,
                "mallory",
                order_id,
                limit_request("mallory", "BTC-PERP", Side::Sell, 105, 1),
                2,
            )
            .unwrap_err();
        assert_eq!(err, EngineError::Unauthorized);

        let order = keeper.get_order(order_id).unwrap().unwrap();
        assert!(order.is_active(), "an unauthorized modify must not mutate the order");
    }
}
