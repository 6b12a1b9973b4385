//! Matching engine and order-book storage layer for a perpetual-futures
//! exchange (`spec.md` §1).
//!
//! This crate is the HARD CORE of a perpetual-futures DEX: it ingests
//! limit/market orders, executes price-time-priority matches, maintains
//! four interchangeable price-level index data structures, processes
//! conditional/trailing/OCO/scale/TWAP order types, and coordinates
//! parallel per-market matching over a write-through cache bridging an
//! in-memory book to a durable external key-value store. Wallets,
//! consensus, cross-margin risk engines and the funding-rate calculator
//! are explicitly out of scope (`spec.md` §1 Non-goals) — this crate only
//! consumes them through the narrow [`perp::PerpCapability`] seam.
//!
//! # Module map
//!
//! | Module | Component | Responsibility |
//! |---|---|---|
//! | [`decimal`] | — | Exact `Price`/`Quantity`/`Notional`/`Rate` arithmetic |
//! | [`order`] | C1 | Order/trade/conditional/trailing/OCO/scale/TWAP data model |
//! | [`price_level`] | — | A single price level's resting-order queue |
//! | [`book`] | C2/C3 | Four `Book` index implementations behind one trait |
//! | [`kv`] | — | External KV contract plus an in-memory reference impl |
//! | [`keeper`] | C4 | Prefix-scoped CRUD and ID minting over the KV |
//! | [`cache`] | C5 | Write-through per-task scratch space over the keeper |
//! | [`perp`] | — | The engine's margin/fee/position seam into perp-accounting |
//! | [`events`] | — | Structured event emission through a pluggable sink |
//! | [`engine`] | C6/C7 | The crossing algorithm and its stable error surface |
//! | [`partition`] | — | Grouping pending orders by market for dispatch |
//! | [`scheduler`] | C8 | Parallel per-market block-end matching |
//! | [`conditional`] | C9 | Stop-loss/take-profit trigger evaluation |
//! | [`trailing`] | C10 | Trailing-stop water-mark tracking |
//! | [`oco`] | C11 | Stop/limit pairs where either leg cancels the other |
//! | [`scale_twap`] | C12 | Scale ladders and TWAP planners |
//!
//! # Concurrency model
//!
//! Within a market, matching is effectively single-threaded: the engine
//! holds exclusive access to that market's book for the full duration of
//! a `match` call, with no cooperative yield points inside the crossing
//! loop (`spec.md` §5). Across markets, [`scheduler::run_block`] fans
//! pending orders out to one `tokio::task::spawn_blocking` task per
//! market, bounded by a semaphore, and commits results back in
//! deterministic `market_id` order regardless of completion order.

pub mod book;
pub mod cache;
pub mod conditional;
pub mod decimal;
pub mod engine;
pub mod events;
pub mod keeper;
pub mod kv;
pub mod oco;
pub mod order;
pub mod partition;
pub mod perp;
pub mod price_level;
pub mod scale_twap;
pub mod scheduler;
pub mod trailing;

pub use book::{new_book, Book, BookKind};
pub use cache::Cache;
pub use engine::{Engine, EngineError, NewOrderRequest};
pub use events::{Event, EventKind, EventSink};
pub use keeper::Keeper;
pub use kv::{KvError, KvStore};
pub use perp::PerpCapability;
