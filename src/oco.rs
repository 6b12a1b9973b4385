//! OCO manager (C11): stop/limit pairs where either leg cancels the other
//! (`spec.md` §4.10).
//!
//! The limit leg is an ordinary resting order; the matching engine's
//! `cross()` notifies this module's half of the contract directly
//! (`Engine::notify_oco_component_fill`, wired at every fill) by
//! consulting the `component_order_id -> oco_id` index the keeper
//! maintains. The stop leg never rests in the book — it is evaluated here,
//! the same block-end mark-price sweep shape as the conditional engine
//! (C9), and triggering it cancels the limit leg in turn.

use crate::cache::Cache;
use crate::engine::{Engine, EngineError, NewOrderRequest};
use crate::events::{Event, EventKind, EventSink};
use crate::keeper::Keeper;
use crate::order::{
    ConditionalOrder, ConditionalStatus, MatchResult, OcoId, OcoOrder, OcoStatus, Order,
    OrderFlags, OrderKind, TimeInForce,
};
use crate::perp::PerpCapability;

/// One OCO pair's trigger outcome for the block-end sweep.
pub struct OcoTriggerOutcome {
    pub oco_id: OcoId,
    pub result: MatchResult,
}

/// Pairs an already-submitted limit [`Order`] with a stop leg, minting a
/// fresh [`OcoId`] (`spec.md` §4.10). The caller submits the limit leg
/// through [`Engine::process_order`] first (so it rests in the book like
/// any other order) and passes the resulting [`Order`] snapshot here; the
/// stop leg is recorded but never itself enters the book.
pub fn place(
    keeper: &Keeper,
    events: &dyn EventSink,
    stop_order: ConditionalOrder,
    limit_order: Order,
) -> Result<OcoId, EngineError> {
    let oco_id = keeper.mint_oco_id()?;
    let oco = OcoOrder {
        oco_id,
        stop_order,
        limit_order: limit_order.clone(),
        status: OcoStatus::Pending,
        triggered_id: None,
    };
    keeper.put_oco(&oco, &oco.limit_order.market_id)?;

    events.emit(
        Event::order(
            EventKind::OcoPlaced,
            limit_order.order_id,
            &limit_order.market_id,
            &limit_order.trader,
            limit_order.side,
            limit_order.price,
            limit_order.quantity,
        )
        .with_attr("oco_id", oco_id.to_string())
        .with_attr("trigger_price", oco.stop_order.trigger_price.to_string()),
    );

    Ok(oco_id)
}

/// Evaluates every pending OCO pair in `market_id` against the current
/// mark price. A triggered stop leg cancels its limit sibling (if still
/// active) and submits an execution order the same way the conditional
/// engine does (`spec.md` §4.8, §4.10).
pub fn evaluate_market(
    engine: &Engine,
    cache: &Cache,
    keeper: &Keeper,
    perp: &PerpCapability<'_>,
    events: &dyn EventSink,
    market_id: &str,
    now: i64,
) -> Result<Vec<OcoTriggerOutcome>, EngineError> {
    let Some(mark) = perp.get_mark_price(market_id) else {
        return Ok(Vec::new());
    };

    let mut triggered = Vec::new();
    let pending: Vec<OcoOrder> = keeper
        .ocos_by_market(market_id)?
        .into_iter()
        .filter(|o| matches!(o.status, OcoStatus::Pending | OcoStatus::PartialTriggered))
        .collect();

    for mut oco in pending {
        if !oco.stop_order.is_triggered_at(mark) {
            continue;
        }

        match engine.cancel_order(
            cache,
            keeper,
            events,
            &oco.limit_order.trader,
            oco.limit_order.order_id,
            now,
        ) {
            Ok(_) | Err(EngineError::OrderNotActive) | Err(EngineError::OrderNotFound) => {}
            Err(err) => return Err(err),
        }

        oco.stop_order.status = ConditionalStatus::Filled;
        oco.stop_order.triggered_at = Some(now);

        let (kind, price) = if oco.stop_order.kind.is_limit_variant() {
            (
                OrderKind::Limit,
                oco.stop_order
                    .execution_price
                    .expect("limit variant carries execution_price"),
            )
        } else {
            (OrderKind::Market, crate::decimal::Price::ZERO)
        };

        let request = NewOrderRequest {
            trader: oco.stop_order.trader.clone(),
            market_id: oco.stop_order.market_id.clone(),
            side: oco.stop_order.side,
            kind,
            price,
            quantity: oco.stop_order.quantity,
            time_in_force: TimeInForce::Gtc,
            flags: oco.stop_order.flags & !OrderFlags::POST_ONLY,
        };
        let result = engine.process_order(cache, keeper, perp, events, request, now)?;

        oco.status = OcoStatus::Triggered;
        keeper.put_oco(&oco, &oco.limit_order.market_id)?;

        events.emit(
            Event::order(
                EventKind::OcoTriggered,
                oco.limit_order.order_id,
                &oco.stop_order.market_id,
                &oco.stop_order.trader,
                oco.stop_order.side,
                oco.stop_order
                    .execution_price
                    .unwrap_or(oco.stop_order.trigger_price),
                oco.stop_order.quantity,
            )
            .with_attr("oco_id", oco.oco_id.to_string())
            .with_attr("mark_price", mark.to_string()),
        );

        triggered.push(OcoTriggerOutcome {
            oco_id: oco.oco_id,
            result,
        });
    }

    Ok(triggered)
}

/// Cancels both legs of `oco_id` atomically: the limit leg via the
/// matching engine (if still resting) and the stop leg by marking it
/// cancelled directly, since it never entered the book (`spec.md` §4.10).
pub fn cancel(
    engine: &Engine,
    cache: &Cache,
    keeper: &Keeper,
    events: &dyn EventSink,
    oco_id: OcoId,
    now: i64,
) -> Result<(), EngineError> {
    let Some(mut oco) = keeper.get_oco(oco_id)? else {
        return Err(EngineError::ConditionalOrderNotFound);
    };
    if !matches!(oco.status, OcoStatus::Pending | OcoStatus::PartialTriggered) {
        return Ok(());
    }

    match engine.cancel_order(
        cache,
        keeper,
        events,
        &oco.limit_order.trader,
        oco.limit_order.order_id,
        now,
    ) {
        Ok(_) | Err(EngineError::OrderNotActive) | Err(EngineError::OrderNotFound) => {}
        Err(err) => return Err(err),
    }

    oco.stop_order.status = ConditionalStatus::Cancelled;
    oco.status = OcoStatus::Cancelled;
    let market_id = oco.limit_order.market_id.clone();
    keeper.put_oco(&oco, &market_id)?;

    events.emit(
        Event::order(
            EventKind::OcoCancelled,
            oco.limit_order.order_id,
            &oco.limit_order.market_id,
            &oco.limit_order.trader,
            oco.limit_order.side,
            oco.limit_order.price,
            oco.limit_order.quantity,
        )
        .with_attr("oco_id", oco_id.to_string()),
    );

    Ok(())
}
