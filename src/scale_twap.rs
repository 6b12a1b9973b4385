//! Scale and TWAP planners (C12): expanding one parent order into timed or
//! price-laddered child orders (`spec.md` §4.11).

use crate::cache::Cache;
use crate::engine::{Engine, EngineError, NewOrderRequest};
use crate::events::{Event, EventKind, EventSink};
use crate::keeper::Keeper;
use crate::order::{
    MatchResult, OrderFlags, OrderId, OrderKind, ScaleDistribution, ScaleOrder, ScaleStatus,
    Side, TimeInForce, TwapOrder, TwapStatus,
};
use crate::perp::PerpCapability;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// A request to expand into a scale order's child ladder.
pub struct ScaleOrderRequest {
    pub trader: crate::order::TraderId,
    pub market_id: crate::order::MarketId,
    pub side: Side,
    pub distribution: ScaleDistribution,
    pub price_start: crate::decimal::Price,
    pub price_end: crate::decimal::Price,
    pub total_quantity: crate::decimal::Quantity,
    pub num_orders: usize,
    pub flags: OrderFlags,
}

/// One child's `(price, quantity)` before submission.
fn ladder(request: &ScaleOrderRequest) -> Vec<(crate::decimal::Price, crate::decimal::Quantity)> {
    let n = request.num_orders;
    let span = request.price_end.0 - request.price_start.0;
    let denom = Decimal::from(n as i64 - 1);

    match request.distribution {
        ScaleDistribution::Linear => {
            let qty_each = request.total_quantity.0 / Decimal::from(n as i64);
            (0..n)
                .map(|i| {
                    let price = request.price_start.0 + span * Decimal::from(i as i64) / denom;
                    (crate::decimal::Price::new(price), crate::decimal::Quantity::new(qty_each))
                })
                .collect()
        }
        ScaleDistribution::Exponential => {
            // Squaring the position fraction packs prices toward
            // `price_start` — early children sit close together, later
            // ones spread out toward `price_end`.
            let qty_each = request.total_quantity.0 / Decimal::from(n as i64);
            (0..n)
                .map(|i| {
                    let t = Decimal::from(i as i64) / denom;
                    let t_squared = t * t;
                    let price = request.price_start.0 + span * t_squared;
                    (crate::decimal::Price::new(price), crate::decimal::Quantity::new(qty_each))
                })
                .collect()
        }
        ScaleDistribution::Descending => {
            // Evenly spaced prices, weighted N, N-1, ..., 1 so the
            // earlier (better) prices get more size.
            let weight_sum = Decimal::from((n * (n + 1) / 2) as i64);
            (0..n)
                .map(|i| {
                    let price = request.price_start.0 + span * Decimal::from(i as i64) / denom;
                    let weight = Decimal::from((n - i) as i64);
                    let qty = request.total_quantity.0 * weight / weight_sum;
                    (crate::decimal::Price::new(price), crate::decimal::Quantity::new(qty))
                })
                .collect()
        }
    }
}

/// Expands `request` into its child ladder and submits each child as a
/// resting limit order, then records the parent (`spec.md` §4.11). `N < 2`
/// is rejected since the distribution math divides by `N - 1`.
pub fn place(
    engine: &Engine,
    cache: &Cache,
    keeper: &Keeper,
    perp: &PerpCapability<'_>,
    events: &dyn EventSink,
    request: ScaleOrderRequest,
    now: i64,
) -> Result<OrderId, EngineError> {
    if request.num_orders < 2 {
        return Err(EngineError::InvalidQuantity);
    }

    let scale_id = keeper.mint_order_id()?;
    let child_flags = request.flags & (OrderFlags::REDUCE_ONLY | OrderFlags::POST_ONLY);

    // `process_order` mints its own id internally and doesn't hand it
    // back; since this function owns the keeper's id counter exclusively
    // for the whole ladder (no other submission interleaves while it
    // runs, the same single-writer assumption the scheduler gives each
    // market task), each child's id is deterministically the next one
    // after `scale_id`.
    let mut children = Vec::with_capacity(request.num_orders);
    let mut filled_qty = crate::decimal::Quantity::ZERO;
    for (i, (price, quantity)) in ladder(&request).into_iter().enumerate() {
        let result = engine.process_order(
            cache,
            keeper,
            perp,
            events,
            NewOrderRequest {
                trader: request.trader.clone(),
                market_id: request.market_id.clone(),
                side: request.side,
                kind: OrderKind::Limit,
                price,
                quantity,
                time_in_force: TimeInForce::Gtc,
                flags: child_flags,
            },
            now,
        )?;
        filled_qty = filled_qty + result.filled_qty;
        children.push(OrderId(scale_id.0 + 1 + i as u64));
    }

    let scale = ScaleOrder {
        scale_id,
        trader: request.trader.clone(),
        market_id: request.market_id.clone(),
        side: request.side,
        distribution: request.distribution,
        price_start: request.price_start,
        price_end: request.price_end,
        total_quantity: request.total_quantity,
        flags: request.flags,
        status: if filled_qty.is_zero() {
            ScaleStatus::Open
        } else if filled_qty == request.total_quantity {
            ScaleStatus::Filled
        } else {
            ScaleStatus::PartiallyFilled
        },
        children,
        filled_qty,
        created_at: now,
    };
    keeper.put_scale(&scale)?;

    events.emit(
        Event::order(
            EventKind::ScaleOrderCreated,
            scale_id,
            &scale.market_id,
            &scale.trader,
            scale.side,
            scale.price_start,
            scale.total_quantity,
        )
        .with_attr("num_orders", request.num_orders.to_string())
        .with_attr("filled_qty", filled_qty.to_string()),
    );

    Ok(scale_id)
}

/// Cancels every still-resting child of `scale_id` (`spec.md` §4.11).
pub fn cancel(
    engine: &Engine,
    cache: &Cache,
    keeper: &Keeper,
    events: &dyn EventSink,
    scale_id: OrderId,
    now: i64,
) -> Result<(), EngineError> {
    let Some(mut scale) = keeper.get_scale(scale_id)? else {
        return Err(EngineError::OrderNotFound);
    };
    if matches!(scale.status, ScaleStatus::Filled | ScaleStatus::Cancelled) {
        return Ok(());
    }

    for &child_id in &scale.children {
        match engine.cancel_order(cache, keeper, events, &scale.trader, child_id, now) {
            Ok(_) | Err(EngineError::OrderNotActive) | Err(EngineError::OrderNotFound) => {}
            Err(err) => return Err(err),
        }
    }

    scale.status = ScaleStatus::Cancelled;
    keeper.put_scale(&scale)?;

    events.emit(Event::order(
        EventKind::ScaleOrderCancelled,
        scale_id,
        &scale.market_id,
        &scale.trader,
        scale.side,
        scale.price_start,
        scale.total_quantity,
    ));
    Ok(())
}

/// Maximum consecutive sub-order failures before a TWAP gives up
/// (`spec.md` §4.11).
const MAX_CONSECUTIVE_FAILURES: u32 = 5;

/// Cap on a single interval's target quantity, as a multiple of the
/// straight-line `total_quantity / sub_orders_total` rate (`spec.md`
/// §4.11, testable property 14).
const CATCH_UP_CAP_MULTIPLE: i64 = 3;

/// Fractional tolerance for `TwapOrder::on_track` (`spec.md` §4.11).
const ON_TRACK_TOLERANCE: Decimal = dec!(0.2);

pub struct TwapSubOrderOutcome {
    pub twap_id: OrderId,
    pub result: MatchResult,
}

/// The TWAP planner: expansion and per-block execution live together since
/// neither step owns resting book state the other needs.
pub struct TwapPlanner;

impl TwapPlanner {
    /// Records a new TWAP parent, active from `now` (`spec.md` §4.11).
    pub fn place(
        keeper: &Keeper,
        events: &dyn EventSink,
        trader: crate::order::TraderId,
        market_id: crate::order::MarketId,
        side: Side,
        total_quantity: crate::decimal::Quantity,
        duration_secs: i64,
        interval_secs: i64,
        max_slippage: crate::decimal::Rate,
        now: i64,
    ) -> Result<OrderId, EngineError> {
        let sub_orders_total = (duration_secs / interval_secs).max(1) as u32;
        let twap_id = keeper.mint_order_id()?;
        let twap = TwapOrder {
            twap_id,
            trader,
            market_id,
            side,
            total_quantity,
            filled_qty: crate::decimal::Quantity::ZERO,
            duration_secs,
            interval_secs,
            max_slippage,
            sub_orders_total,
            sub_orders_executed: 0,
            sub_orders_pending: sub_orders_total,
            catch_up_quantity: crate::decimal::Quantity::ZERO,
            avg_executed_price: None,
            consecutive_failures: 0,
            status: TwapStatus::Active,
            started_at: now,
            flags: OrderFlags::empty(),
        };
        keeper.put_twap(&twap)?;

        events.emit(Event::order(
            EventKind::TwapOrderCreated,
            twap_id,
            &twap.market_id,
            &twap.trader,
            twap.side,
            crate::decimal::Price::ZERO,
            twap.total_quantity,
        ));
        Ok(twap_id)
    }

    /// Drives every active TWAP order in `market_id` one block forward: at
    /// most one sub-order per elapsed interval, sized per `spec.md`
    /// §4.11's `remaining / pending_sub_orders + catch_up_quantity` rule,
    /// capped at `3 × base_per_interval` and `remaining`. Scoped to a
    /// single market so the scheduler's per-market tasks (C8) never race
    /// each other over the same TWAP order.
    pub fn on_tick(
        engine: &Engine,
        cache: &Cache,
        keeper: &Keeper,
        perp: &PerpCapability<'_>,
        events: &dyn EventSink,
        market_id: &str,
        now: i64,
    ) -> Result<Vec<TwapSubOrderOutcome>, EngineError> {
        let mut outcomes = Vec::new();
        let active: Vec<TwapOrder> = keeper
            .all_twaps()?
            .into_iter()
            .filter(|t| t.market_id == market_id && t.status == TwapStatus::Active)
            .collect();

        for mut twap in active {
            let elapsed = now - twap.started_at;

            if twap.sub_orders_pending == 0 || twap.filled_qty == twap.total_quantity {
                twap.status = TwapStatus::Completed;
                keeper.put_twap(&twap)?;
                events.emit(Event::order(
                    EventKind::TwapOrderCompleted,
                    twap.twap_id,
                    &twap.market_id,
                    &twap.trader,
                    twap.side,
                    crate::decimal::Price::ZERO,
                    twap.filled_qty,
                ));
                continue;
            }

            let due_sub_orders = (elapsed / twap.interval_secs).max(0) as u32;
            if due_sub_orders <= twap.sub_orders_executed {
                continue;
            }

            let remaining = twap.total_quantity - twap.filled_qty;
            let base_per_interval = crate::decimal::Quantity::new(
                twap.total_quantity.0 / Decimal::from(twap.sub_orders_total.max(1)),
            );
            let straight = crate::decimal::Quantity::new(
                remaining.0 / Decimal::from(twap.sub_orders_pending),
            );
            let raw_target = straight + twap.catch_up_quantity;
            let cap = crate::decimal::Quantity::new(base_per_interval.0 * Decimal::from(CATCH_UP_CAP_MULTIPLE));
            let target_qty = raw_target.min(cap).min(remaining);

            events.emit(Event::order(
                EventKind::TwapSubOrderCreated,
                twap.twap_id,
                &twap.market_id,
                &twap.trader,
                twap.side,
                crate::decimal::Price::ZERO,
                target_qty,
            ));

            let outcome = engine.process_order(
                cache,
                keeper,
                perp,
                events,
                NewOrderRequest {
                    trader: twap.trader.clone(),
                    market_id: twap.market_id.clone(),
                    side: twap.side,
                    kind: OrderKind::Market,
                    price: crate::decimal::Price::ZERO,
                    quantity: target_qty,
                    time_in_force: TimeInForce::Gtc,
                    flags: OrderFlags::empty(),
                },
                now,
            );

            twap.sub_orders_executed += 1;
            twap.sub_orders_pending -= 1;

            match outcome {
                Ok(result) => {
                    twap.catch_up_quantity = target_qty - result.filled_qty;
                    if result.filled_qty.is_positive() {
                        twap.consecutive_failures = 0;
                        twap.filled_qty = twap.filled_qty + result.filled_qty;
                        if let Some(price) = result.avg_price {
                            twap.avg_executed_price = Some(match twap.avg_executed_price {
                                None => price,
                                Some(prev) => {
                                    let prev_filled = twap.filled_qty - result.filled_qty;
                                    let total_value = prev.0 * prev_filled.0 + price.0 * result.filled_qty.0;
                                    crate::decimal::Price::new(total_value / twap.filled_qty.0)
                                }
                            });
                        }
                        events.emit(Event::order(
                            EventKind::TwapSubOrderFilled,
                            twap.twap_id,
                            &twap.market_id,
                            &twap.trader,
                            twap.side,
                            result.avg_price.unwrap_or(crate::decimal::Price::ZERO),
                            result.filled_qty,
                        ));
                    } else {
                        twap.consecutive_failures += 1;
                    }
                    outcomes.push(TwapSubOrderOutcome {
                        twap_id: twap.twap_id,
                        result,
                    });
                }
                Err(_) => {
                    twap.consecutive_failures += 1;
                    twap.catch_up_quantity = twap.catch_up_quantity + target_qty;
                }
            }

            if twap.consecutive_failures >= MAX_CONSECUTIVE_FAILURES {
                twap.status = TwapStatus::Failed;
            } else if twap.sub_orders_pending == 0 || twap.filled_qty == twap.total_quantity {
                twap.status = TwapStatus::Completed;
                events.emit(Event::order(
                    EventKind::TwapOrderCompleted,
                    twap.twap_id,
                    &twap.market_id,
                    &twap.trader,
                    twap.side,
                    crate::decimal::Price::ZERO,
                    twap.filled_qty,
                ));
            }

            keeper.put_twap(&twap)?;
        }

        Ok(outcomes)
    }

    /// Whether `twap` is tracking its straight-line schedule within
    /// `spec.md` §4.11's `0.2` tolerance.
    #[must_use]
    pub fn on_track(twap: &TwapOrder, now: i64) -> bool {
        if twap.duration_secs == 0 {
            return true;
        }
        let elapsed = now - twap.started_at;
        let target_ratio = Decimal::from(elapsed) / Decimal::from(twap.duration_secs);
        let actual_ratio = if twap.total_quantity.is_zero() {
            Decimal::ZERO
        } else {
            twap.filled_qty.0 / twap.total_quantity.0
        };
        (target_ratio - actual_ratio).abs() <= ON_TRACK_TOLERANCE
    }

    /// Cancels a still-active TWAP; already-executed sub-orders stand
    /// (`spec.md` §4.11).
    pub fn cancel(keeper: &Keeper, events: &dyn EventSink, twap_id: OrderId) -> Result<(), EngineError> {
        let Some(mut twap) = keeper.get_twap(twap_id)? else {
            return Err(EngineError::OrderNotFound);
        };
        if matches!(twap.status, TwapStatus::Completed | TwapStatus::Cancelled | TwapStatus::Failed) {
            return Ok(());
        }
        twap.status = TwapStatus::Cancelled;
        keeper.put_twap(&twap)?;

        events.emit(Event::order(
            EventKind::TwapOrderCancelled,
            twap_id,
            &twap.market_id,
            &twap.trader,
            twap.side,
            crate::decimal::Price::ZERO,
            twap.filled_qty,
        ));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::book::BookKind;
    use crate::decimal::{Price, Quantity, Rate};
    use crate::events::RecordingEventSink;
    use crate::kv::MemoryKvStore;
    use crate::order::OrderFlags;
    use std::sync::Arc;

    fn perp_cap() -> PerpCapability<'static> {
        PerpCapability {
            get_market: Box::new(|_| {
                Some(crate::perp::MarketConfig {
                    taker_fee_rate: Rate::ZERO,
                    maker_fee_rate: Rate::ZERO,
                    initial_margin_rate: Rate::new(dec!(0.05)),
                })
            }),
            get_mark_price: Box::new(|_| Some(Price::new(dec!(50000)))),
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

    #[test]
    fn linear_ladder_has_even_prices_and_equal_quantities() {
        let request = ScaleOrderRequest {
            trader: "alice".into(),
            market_id: "BTC-PERP".into(),
            side: Side::Buy,
            distribution: ScaleDistribution::Linear,
            price_start: Price::new(dec!(49000)),
            price_end: Price::new(dec!(49400)),
            total_quantity: Quantity::new(dec!(4)),
            num_orders: 5,
            flags: OrderFlags::empty(),
        };
        let rungs = ladder(&request);
        assert_eq!(rungs.len(), 5);
        assert_eq!(rungs[0].0, Price::new(dec!(49000)));
        assert_eq!(rungs[4].0, Price::new(dec!(49400)));
        assert_eq!(rungs[2].0, Price::new(dec!(49200)));
        for (_, qty) in &rungs {
            assert_eq!(*qty, Quantity::new(dec!(0.8)));
        }
    }

    #[test]
    fn descending_weights_earlier_rungs_more_heavily() {
        let request = ScaleOrderRequest {
            trader: "alice".into(),
            market_id: "BTC-PERP".into(),
            side: Side::Buy,
            distribution: ScaleDistribution::Descending,
            price_start: Price::new(dec!(49000)),
            price_end: Price::new(dec!(49400)),
            total_quantity: Quantity::new(dec!(10)),
            num_orders: 4,
            flags: OrderFlags::empty(),
        };
        let rungs = ladder(&request);
        assert!(rungs[0].1 > rungs[1].1);
        assert!(rungs[1].1 > rungs[2].1);
        assert!(rungs[2].1 > rungs[3].1);
        let total: Decimal = rungs.iter().map(|(_, q)| q.0).sum();
        assert_eq!(total, dec!(10));
    }

    #[test]
    fn scale_place_submits_every_rung_and_tracks_fill() {
        let (engine, cache, keeper) = setup();
        let events = RecordingEventSink::new();
        let perp = perp_cap();

        let scale_id = place(
            &engine,
            &cache,
            &keeper,
            &perp,
            &events,
            ScaleOrderRequest {
                trader: "alice".into(),
                market_id: "BTC-PERP".into(),
                side: Side::Buy,
                distribution: ScaleDistribution::Linear,
                price_start: Price::new(dec!(49000)),
                price_end: Price::new(dec!(49400)),
                total_quantity: Quantity::new(dec!(4)),
                num_orders: 4,
                flags: OrderFlags::empty(),
            },
            1,
        )
        .unwrap();

        let scale = keeper.get_scale(scale_id).unwrap().unwrap();
        assert_eq!(scale.children.len(), 4);
        assert_eq!(scale.status, ScaleStatus::Open);
        assert_eq!(events.count_of(EventKind::ScaleOrderCreated), 1);
    }

    #[test]
    fn twap_on_tick_executes_one_sub_order_per_elapsed_interval() {
        let (engine, cache, keeper) = setup();
        let events = RecordingEventSink::new();
        let perp = perp_cap();

        // resting ask so the TWAP's MARKET buys can fill
        engine
            .process_order(
                &cache,
                &keeper,
                &perp,
                &events,
                NewOrderRequest {
                    trader: "seller".into(),
                    market_id: "BTC-PERP".into(),
                    side: Side::Sell,
                    kind: OrderKind::Limit,
                    price: Price::new(dec!(50000)),
                    quantity: Quantity::new(dec!(100)),
                    time_in_force: TimeInForce::Gtc,
                    flags: OrderFlags::empty(),
                },
                0,
            )
            .unwrap();

        let twap_id = TwapPlanner::place(
            &keeper,
            &events,
            "alice".into(),
            "BTC-PERP".into(),
            Side::Buy,
            Quantity::new(dec!(10)),
            300,
            30,
            Rate::new(dec!(0.01)),
            0,
        )
        .unwrap();

        let out = TwapPlanner::on_tick(&engine, &cache, &keeper, &perp, &events, "BTC-PERP", 5).unwrap();
        assert!(out.is_empty(), "before the first interval elapses, nothing executes");

        let out = TwapPlanner::on_tick(&engine, &cache, &keeper, &perp, &events, "BTC-PERP", 30).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].twap_id, twap_id);

        let persisted = keeper.get_twap(twap_id).unwrap().unwrap();
        assert_eq!(persisted.sub_orders_executed, 1);
        assert_eq!(persisted.sub_orders_pending, 9);
        assert!(persisted.filled_qty.is_positive());

        let out = TwapPlanner::on_tick(&engine, &cache, &keeper, &perp, &events, "BTC-PERP", 35).unwrap();
        assert!(out.is_empty(), "same interval must not execute twice");
    }

    #[test]
    fn twap_cancel_is_idempotent() {
        let (_, _, keeper) = setup();
        let events = RecordingEventSink::new();
        let twap_id = TwapPlanner::place(
            &keeper,
            &events,
            "alice".into(),
            "BTC-PERP".into(),
            Side::Buy,
            Quantity::new(dec!(10)),
            300,
            30,
            Rate::new(dec!(0.01)),
            0,
        )
        .unwrap();

        TwapPlanner::cancel(&keeper, &events, twap_id).unwrap();
        TwapPlanner::cancel(&keeper, &events, twap_id).unwrap();
        assert_eq!(keeper.get_twap(twap_id).unwrap().unwrap().status, TwapStatus::Cancelled);
    }
}
