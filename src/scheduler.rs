//! Parallel scheduler (C8): block-end fan-out of pending orders to
//! isolated per-market matching tasks, committed in deterministic order
//! (`spec.md` §4.7).
//!
//! Each market runs on `tokio::task::spawn_blocking`: the crossing loop is
//! synchronous CPU work with "no cooperative yield points inside the
//! match inner loop" (§5), so running it as a plain `async` task would
//! starve the runtime's other tasks for the loop's entire duration.
//! `spawn_blocking` already converts a panicked task into an
//! `Err(JoinError)` on join, which is exactly the "panic-safe, isolated to
//! one market" contract §4.7 step 4 asks for — no manual `catch_unwind`
//! needed.

use crate::cache::Cache;
use crate::engine::{Engine, EngineError, NewOrderRequest};
use crate::events::EventSink;
use crate::keeper::Keeper;
use crate::kv::{cache_context, CacheContext, KvStore};
use crate::order::MarketId;
use crate::perp::PerpCapability;
use crate::scale_twap::TwapPlanner;
use crate::{conditional, oco, trailing};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;

/// One order awaiting block-end matching: the submission request plus the
/// time it entered the queue, used for the per-market FIFO sort `spec.md`
/// §4.7 step 3 requires ("sorts its market's orders by `created_at`
/// ascending").
#[derive(Debug, Clone)]
pub struct PendingOrder {
    pub request: NewOrderRequest,
    pub submitted_at: i64,
}

/// Worker-pool tuning (`spec.md` §4.7); `Default` matches the documented
/// defaults (16 workers, batch 500, 10s timeout).
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub workers: usize,
    pub batch_size: usize,
    pub timeout: Duration,
    /// When `false`, falls back to sequential market-by-market processing
    /// with the same deterministic commit ordering (`spec.md` §4.7
    /// "When disabled...").
    pub parallel: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            workers: 16,
            batch_size: 500,
            timeout: Duration::from_secs(10),
            parallel: true,
        }
    }
}

/// One market's isolated task result (`spec.md` §4.7 step 3 `(trades,
/// commit_fn, error?)`); `ctx` stands in for `commit_fn` — calling
/// `ctx.commit()` is the deferred write the commit phase performs.
struct MarketOutcome {
    market_id: MarketId,
    trade_count: usize,
    error: Option<String>,
    ctx: Arc<CacheContext>,
}

/// Aggregate result of one [`run_block`] call (`spec.md` §4.7 step 6).
#[derive(Debug, Clone, Default)]
pub struct SchedulerReport {
    pub total_trades: usize,
    pub duration: Duration,
    pub errors: Vec<(MarketId, String)>,
    /// Orders left unprocessed because `pending.len()` exceeded
    /// `batch_size`; nothing about them was persisted, so the caller's
    /// next block sees them again.
    pub deferred: usize,
}

fn group_pending_by_market(pending: Vec<PendingOrder>) -> BTreeMap<MarketId, Vec<PendingOrder>> {
    let mut groups: BTreeMap<MarketId, Vec<PendingOrder>> = BTreeMap::new();
    for order in pending {
        groups.entry(order.request.market_id.clone()).or_default().push(order);
    }
    groups
}

/// Runs one market's batch to completion against a fresh isolated cache
/// layer. Never panics out of the ordinary order-rejection path — engine
/// errors from an individual order (insufficient margin, FOK failure, ...)
/// are just logged and skipped, matching per-order semantics; only a
/// persistence-layer fault aborts the rest of the market's batch.
fn run_market_task(
    engine: &Engine,
    base_store: &Arc<dyn KvStore>,
    perp: &PerpCapability<'_>,
    events: &dyn EventSink,
    market_id: &str,
    mut orders: Vec<PendingOrder>,
    now: i64,
) -> MarketOutcome {
    orders.sort_by_key(|o| o.submitted_at);
    let ctx = cache_context(base_store.clone());
    let keeper = Keeper::new(ctx.clone());
    let cache = Cache::new(engine.book_kind);

    let mut trade_count = 0usize;
    let mut error = None;
    for pending in orders {
        match engine.process_order(&cache, &keeper, perp, events, pending.request, now) {
            Ok(result) => trade_count += result.trades.len(),
            Err(EngineError::Persistence(msg)) => {
                // A fault in the store itself, not a rule rejection —
                // fatal to the rest of this market's batch (`spec.md` §7:
                // "Matching-loop errors... are fatal to the task").
                error = Some(msg);
                break;
            }
            Err(err) => {
                tracing::debug!(market = market_id, %err, "order rejected during block processing");
            }
        }
    }

    // Block-end mark-price sweeps (`spec.md` §4.8/§4.9/§4.10/§4.11): run
    // only once the market's regular order flow for this block has been
    // applied, on the same isolated cache/keeper pair, so a conditional or
    // TWAP trigger can cross against liquidity this block just added.
    if error.is_none() {
        macro_rules! sweep {
            ($result:expr) => {
                match $result {
                    Ok(triggered) => trade_count += triggered,
                    Err(EngineError::Persistence(msg)) => error = Some(msg),
                    Err(err) => {
                        tracing::debug!(market = market_id, %err, "block-end trigger sweep failed");
                    }
                }
            };
        }
        sweep!(conditional::evaluate_market(engine, &cache, &keeper, perp, events, market_id, now)
            .map(|out| out.iter().map(|o| o.result.trades.len()).sum::<usize>()));
        sweep!(trailing::evaluate_market(engine, &cache, &keeper, perp, events, market_id, now)
            .map(|out| out.iter().map(|o| o.result.trades.len()).sum::<usize>()));
        sweep!(oco::evaluate_market(engine, &cache, &keeper, perp, events, market_id, now)
            .map(|out| out.iter().map(|o| o.result.trades.len()).sum::<usize>()));
        sweep!(TwapPlanner::on_tick(engine, &cache, &keeper, perp, events, market_id, now)
            .map(|out| out.iter().map(|o| o.result.trades.len()).sum::<usize>()));
    }

    if let Err(err) = cache.flush(&keeper) {
        error = Some(err.to_string());
    }

    MarketOutcome {
        market_id: market_id.to_string(),
        trade_count,
        error,
        ctx,
    }
}

/// Block-end entry point (`spec.md` §4.7): groups `pending` by market,
/// runs each market's batch on an isolated cache layer — concurrently,
/// bounded to `config.workers` in flight, unless `config.parallel` is
/// false — then commits survivors in `sort(market_id)` order.
///
/// `perp`/`events` must be `'static` since each market's work is handed to
/// `tokio::task::spawn_blocking`, which requires its closure to own
/// everything it touches; callers typically build these once behind an
/// `Arc` and pass the same handles into every block.
pub async fn run_block(
    engine: Arc<Engine>,
    base_store: Arc<dyn KvStore>,
    perp: Arc<PerpCapability<'static>>,
    events: Arc<dyn EventSink>,
    pending: Vec<PendingOrder>,
    config: &SchedulerConfig,
    now: i64,
) -> SchedulerReport {
    let started = Instant::now();

    let mut pending = pending;
    let deferred = pending.len().saturating_sub(config.batch_size);
    if deferred > 0 {
        tracing::warn!(
            deferred,
            batch_size = config.batch_size,
            "scheduler batch_size exceeded; deferring overflow orders to the next block"
        );
        pending.truncate(config.batch_size);
    }

    let groups = group_pending_by_market(pending);
    let mut outcomes: Vec<MarketOutcome> = Vec::with_capacity(groups.len());

    if config.parallel {
        let semaphore = Arc::new(Semaphore::new(config.workers.max(1)));
        let mut handles = Vec::with_capacity(groups.len());
        for (market_id, orders) in groups {
            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .expect("scheduler semaphore is never closed");
            let engine = engine.clone();
            let base_store = base_store.clone();
            let perp = perp.clone();
            let events = events.clone();
            let task_market_id = market_id.clone();
            let handle = tokio::task::spawn_blocking(move || {
                let outcome = run_market_task(&engine, &base_store, &perp, events.as_ref(), &task_market_id, orders, now);
                drop(permit);
                outcome
            });
            handles.push((market_id, handle));
        }
        for (market_id, handle) in handles {
            match tokio::time::timeout(config.timeout, handle).await {
                Ok(Ok(outcome)) => outcomes.push(outcome),
                Ok(Err(join_err)) => outcomes.push(MarketOutcome {
                    market_id: market_id.clone(),
                    trade_count: 0,
                    error: Some(format!("market task panicked: {join_err}")),
                    ctx: cache_context(base_store.clone()),
                }),
                Err(_elapsed) => outcomes.push(MarketOutcome {
                    market_id: market_id.clone(),
                    trade_count: 0,
                    error: Some("market task timed out".to_string()),
                    ctx: cache_context(base_store.clone()),
                }),
            }
        }
    } else {
        for (market_id, orders) in groups {
            outcomes.push(run_market_task(&engine, &base_store, &perp, events.as_ref(), &market_id, orders, now));
        }
    }

    // `sort(market_ids)` commit order (`spec.md` §4.7 "Deterministic-
    // ordering rule"). BTreeMap iteration above already yields this order
    // per market group, but the parallel path's completion order does not
    // — so the commit phase always re-sorts regardless of path taken.
    outcomes.sort_by(|a, b| a.market_id.cmp(&b.market_id));

    let mut total_trades = 0;
    let mut errors = Vec::new();
    for outcome in outcomes {
        if let Some(err) = &outcome.error {
            errors.push((outcome.market_id.clone(), err.clone()));
        }
        // Commit unless the task failed before producing any trade
        // (`spec.md` §4.7 step 5 "erroring tasks are discarded", narrowed
        // by §7's durability carve-out for partial progress).
        let should_commit = outcome.error.is_none() || outcome.trade_count > 0;
        if should_commit {
            match outcome.ctx.commit() {
                Ok(()) => total_trades += outcome.trade_count,
                Err(err) => errors.push((outcome.market_id.clone(), err.to_string())),
            }
        } else {
            outcome.ctx.discard();
        }
    }

    SchedulerReport {
        total_trades,
        duration: started.elapsed(),
        errors,
        deferred,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::book::BookKind;
    use crate::decimal::{Price, Quantity, Rate};
    use crate::events::RecordingEventSink;
    use crate::kv::MemoryKvStore;
    use crate::order::{OrderFlags, OrderKind, Side, TimeInForce};
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

    fn request(trader: &str, market: &str, side: Side, price: i64, qty: i64) -> NewOrderRequest {
        NewOrderRequest {
            trader: trader.into(),
            market_id: market.into(),
            side,
            kind: OrderKind::Limit,
            price: Price::new(rust_decimal::Decimal::from(price)),
            quantity: Quantity::new(rust_decimal::Decimal::from(qty)),
            time_in_force: TimeInForce::Gtc,
            flags: OrderFlags::empty(),
        }
    }

    fn crossing_pair(market: &str, t0: i64) -> Vec<PendingOrder> {
        vec![
            PendingOrder {
                request: request("maker", market, Side::Sell, 100, 1),
                submitted_at: t0,
            },
            PendingOrder {
                request: request("taker", market, Side::Buy, 100, 1),
                submitted_at: t0 + 1,
            },
        ]
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn sequential_fallback_commits_every_market_and_counts_trades() {
        let store: Arc<dyn KvStore> = Arc::new(MemoryKvStore::new());
        let engine = Arc::new(Engine::new(BookKind::SkipList));
        let perp = Arc::new(perp_cap());
        let events: Arc<dyn EventSink> = Arc::new(RecordingEventSink::new());

        let mut pending = crossing_pair("BTC-PERP", 1);
        pending.extend(crossing_pair("ETH-PERP", 10));

        let config = SchedulerConfig {
            parallel: false,
            ..Default::default()
        };
        let report = run_block(engine, store.clone(), perp, events, pending, &config, 100).await;

        assert_eq!(report.total_trades, 2);
        assert!(report.errors.is_empty());
        let keeper = Keeper::new(store);
        assert_eq!(keeper.recent_trades_by_market("BTC-PERP", 10).unwrap().len(), 1);
        assert_eq!(keeper.recent_trades_by_market("ETH-PERP", 10).unwrap().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn parallel_path_commits_deterministically_across_markets() {
        let store: Arc<dyn KvStore> = Arc::new(MemoryKvStore::new());
        let engine = Arc::new(Engine::new(BookKind::SkipList));
        let perp = Arc::new(perp_cap());
        let events: Arc<dyn EventSink> = Arc::new(RecordingEventSink::new());

        let mut pending = crossing_pair("BTC-PERP", 1);
        pending.extend(crossing_pair("ETH-PERP", 10));
        pending.extend(crossing_pair("SOL-PERP", 20));

        let config = SchedulerConfig::default();
        let report = run_block(engine, store.clone(), perp, events, pending, &config, 100).await;

        assert_eq!(report.total_trades, 3);
        assert!(report.errors.is_empty());
        let keeper = Keeper::new(store);
        for market in ["BTC-PERP", "ETH-PERP", "SOL-PERP"] {
            assert_eq!(keeper.recent_trades_by_market(market, 10).unwrap().len(), 1, "{market} missing its trade");
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn batch_size_overflow_is_deferred_not_dropped_silently() {
        let store: Arc<dyn KvStore> = Arc::new(MemoryKvStore::new());
        let engine = Arc::new(Engine::new(BookKind::SkipList));
        let perp = Arc::new(perp_cap());
        let events: Arc<dyn EventSink> = Arc::new(RecordingEventSink::new());

        let pending = crossing_pair("BTC-PERP", 1);
        let config = SchedulerConfig {
            batch_size: 1,
            ..Default::default()
        };
        let report = run_block(engine, store, perp, events, pending, &config, 100).await;

        assert_eq!(report.deferred, 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn block_end_sweep_triggers_a_conditional_order_against_fresh_liquidity() {
        use crate::order::{ConditionalKind, ConditionalOrder, ConditionalStatus, OrderId};

        let store: Arc<dyn KvStore> = Arc::new(MemoryKvStore::new());
        let keeper = Keeper::new(store.clone());
        keeper
            .put_conditional(&ConditionalOrder {
                order_id: OrderId(999),
                trader: "alice".into(),
                market_id: "BTC-PERP".into(),
                side: Side::Sell,
                kind: ConditionalKind::StopLoss,
                trigger_price: Price::new(dec!(105)),
                execution_price: None,
                quantity: Quantity::new(dec!(1)),
                flags: OrderFlags::empty(),
                status: ConditionalStatus::Open,
                created_at: 0,
                triggered_at: None,
            })
            .unwrap();

        let engine = Arc::new(Engine::new(BookKind::SkipList));
        let perp = Arc::new(perp_cap());
        let events: Arc<dyn EventSink> = Arc::new(RecordingEventSink::new());

        // The same block adds the resting buy liquidity the triggered
        // stop-loss sell will cross against — proves the sweep runs after
        // the market's regular order flow, not before it.
        let pending = vec![PendingOrder {
            request: request("buyer", "BTC-PERP", Side::Buy, 100, 1),
            submitted_at: 1,
        }];

        let config = SchedulerConfig::default();
        let report = run_block(engine, store.clone(), perp, events, pending, &config, 2).await;

        assert!(report.errors.is_empty());
        assert_eq!(report.total_trades, 1);
        let keeper = Keeper::new(store);
        let persisted = keeper.get_conditional(OrderId(999)).unwrap().unwrap();
        assert_eq!(persisted.status, ConditionalStatus::Filled);
    }
}
