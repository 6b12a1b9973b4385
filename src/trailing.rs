//! Trailing-stop engine (C10): per-order high/low water-mark tracking and
//! dynamic stop recomputation against the mark price (`spec.md` §4.9).

use crate::cache::Cache;
use crate::engine::{Engine, EngineError, NewOrderRequest};
use crate::events::{Event, EventKind, EventSink};
use crate::keeper::Keeper;
use crate::order::{
    ConditionalStatus, MatchResult, OrderFlags, OrderKind, Side, TimeInForce, TrailingStopOrder,
};
use crate::perp::PerpCapability;
use rust_decimal_macros::dec;

/// Trail distance for the current tick: `trail_amount` if positive, else
/// `mark * trail_percent / 100` (`spec.md` §4.9).
fn trail_distance(trailing: &TrailingStopOrder, mark: crate::decimal::Price) -> crate::decimal::Quantity {
    if trailing.trail_amount.is_positive() {
        trailing.trail_amount
    } else {
        crate::decimal::Quantity::new(mark.0 * trailing.trail_percent / dec!(100))
    }
}

/// Applies one mark-price update to `trailing` in place, returning `true`
/// iff it triggers on this tick (`spec.md` §4.9). Activation and the
/// trail/trigger check happen in the same tick — an order can activate and
/// immediately be eligible to trigger on its very first update.
fn apply_update(trailing: &mut TrailingStopOrder, mark: crate::decimal::Price) -> bool {
    if !trailing.is_activated {
        let should_activate = trailing.activation_price.is_zero()
            || match trailing.side {
                Side::Sell => mark >= trailing.activation_price,
                Side::Buy => mark <= trailing.activation_price,
            };
        if !should_activate {
            return false;
        }
        trailing.is_activated = true;
        let distance = trail_distance(trailing, mark);
        match trailing.side {
            Side::Sell => {
                trailing.high_water_mark = mark;
                trailing.current_stop_price = crate::decimal::Price::new(mark.0 - distance.0);
            }
            Side::Buy => {
                trailing.low_water_mark = mark;
                trailing.current_stop_price = crate::decimal::Price::new(mark.0 + distance.0);
            }
        }
        return false;
    }

    let distance = trail_distance(trailing, mark);
    match trailing.side {
        Side::Sell => {
            if mark > trailing.high_water_mark {
                trailing.high_water_mark = mark;
                trailing.current_stop_price = crate::decimal::Price::new(mark.0 - distance.0);
            }
            mark <= trailing.current_stop_price
        }
        Side::Buy => {
            if mark < trailing.low_water_mark || trailing.low_water_mark.is_zero() {
                trailing.low_water_mark = mark;
                trailing.current_stop_price = crate::decimal::Price::new(mark.0 + distance.0);
            }
            mark >= trailing.current_stop_price
        }
    }
}

pub struct TrailingTriggerOutcome {
    pub trail_id: crate::order::TrailId,
    pub result: MatchResult,
}

/// Updates every open trailing stop in `market_id` against the current
/// mark price, submitting a MARKET execution order for each that triggers
/// this tick (`spec.md` §4.9).
pub fn evaluate_market(
    engine: &Engine,
    cache: &Cache,
    keeper: &Keeper,
    perp: &PerpCapability<'_>,
    events: &dyn EventSink,
    market_id: &str,
    now: i64,
) -> Result<Vec<TrailingTriggerOutcome>, EngineError> {
    let Some(mark) = perp.get_mark_price(market_id) else {
        return Ok(Vec::new());
    };

    let mut triggered = Vec::new();
    let open: Vec<TrailingStopOrder> = keeper
        .trailing_stops_by_market(market_id)?
        .into_iter()
        .filter(|t| t.status == ConditionalStatus::Open)
        .collect();

    for mut trailing in open {
        if !apply_update(&mut trailing, mark) {
            keeper.put_trailing_stop(&trailing)?;
            continue;
        }

        trailing.status = ConditionalStatus::Filled;
        keeper.put_trailing_stop(&trailing)?;

        events.emit(
            Event {
                kind: EventKind::TrailingStopTriggered,
                attributes: std::collections::BTreeMap::new(),
            }
            .with_attr("trail_id", trailing.order_id.to_string())
            .with_attr("market_id", trailing.market_id.clone())
            .with_attr("trader", trailing.trader.clone())
            .with_attr("side", trailing.side.to_string())
            .with_attr("current_stop_price", trailing.current_stop_price.to_string())
            .with_attr("quantity", trailing.quantity.to_string())
            .with_attr("mark_price", mark.to_string())
            .with_attr("high_water_mark", trailing.high_water_mark.to_string())
            .with_attr("low_water_mark", trailing.low_water_mark.to_string()),
        );

        let request = NewOrderRequest {
            trader: trailing.trader.clone(),
            market_id: trailing.market_id.clone(),
            side: trailing.side,
            kind: OrderKind::Market,
            price: crate::decimal::Price::ZERO,
            quantity: trailing.quantity,
            time_in_force: TimeInForce::Gtc,
            flags: OrderFlags::empty(),
        };
        let result = engine.process_order(cache, keeper, perp, events, request, now)?;
        triggered.push(TrailingTriggerOutcome {
            trail_id: trailing.order_id,
            result,
        });
    }

    Ok(triggered)
}
