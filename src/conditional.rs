//! Conditional engine (C9): stop-loss/take-profit trigger evaluation
//! against the mark price at block end (`spec.md` §4.8).
//!
//! Triggering mints a brand-new execution order and feeds it straight
//! back into [`crate::engine::Engine::process_order`] — a triggered order
//! re-enters the book as an ordinary submission, the same block-end hook
//! shape the matching engine's own scheduler (C8) uses.

use crate::cache::Cache;
use crate::engine::{Engine, EngineError, NewOrderRequest};
use crate::events::{Event, EventKind, EventSink};
use crate::keeper::Keeper;
use crate::order::{ConditionalOrder, ConditionalStatus, MatchResult, OrderFlags, OrderKind, TimeInForce};
use crate::perp::PerpCapability;

/// One conditional order's trigger outcome for the block-end sweep.
pub struct TriggerOutcome {
    pub conditional_order_id: crate::order::OrderId,
    pub result: MatchResult,
}

/// Evaluates every open conditional order in `market_id` against the
/// current mark price, triggering and submitting an execution order for
/// each that crosses (`spec.md` §4.8). Orders with no mark price
/// available are left untouched (the caller presumably has no active
/// market to evaluate yet).
pub fn evaluate_market(
    engine: &Engine,
    cache: &Cache,
    keeper: &Keeper,
    perp: &PerpCapability<'_>,
    events: &dyn EventSink,
    market_id: &str,
    now: i64,
) -> Result<Vec<TriggerOutcome>, EngineError> {
    let Some(mark) = perp.get_mark_price(market_id) else {
        return Ok(Vec::new());
    };

    let mut triggered = Vec::new();
    let conditionals: Vec<ConditionalOrder> = keeper
        .all_conditionals()?
        .into_iter()
        .filter(|c| c.market_id == market_id && c.status == ConditionalStatus::Open)
        .collect();

    for mut cond in conditionals {
        if !cond.is_triggered_at(mark) {
            continue;
        }

        cond.status = ConditionalStatus::Filled;
        cond.triggered_at = Some(now);
        keeper.put_conditional(&cond)?;

        events.emit(
            Event::order(
                EventKind::ConditionalOrderTriggered,
                cond.order_id,
                &cond.market_id,
                &cond.trader,
                cond.side,
                cond.execution_price.unwrap_or(cond.trigger_price),
                cond.quantity,
            )
            .with_attr("trigger_price", cond.trigger_price.to_string())
            .with_attr("mark_price", mark.to_string()),
        );

        let (kind, price) = if cond.kind.is_limit_variant() {
            (OrderKind::Limit, cond.execution_price.expect("limit variant carries execution_price"))
        } else {
            (OrderKind::Market, crate::decimal::Price::ZERO)
        };

        let request = NewOrderRequest {
            trader: cond.trader.clone(),
            market_id: cond.market_id.clone(),
            side: cond.side,
            kind,
            price,
            quantity: cond.quantity,
            time_in_force: TimeInForce::Gtc,
            flags: cond.flags & !OrderFlags::POST_ONLY,
        };

        let result = engine.process_order(cache, keeper, perp, events, request, now)?;
        triggered.push(TriggerOutcome {
            conditional_order_id: cond.order_id,
            result,
        });
    }

    Ok(triggered)
}
