//! Order book indexes (C2) and the uniform [`Book`] trait (C3).
//!
//! Four interchangeable implementations are provided — [`skiplist`],
//! [`hash_heap`], [`btree`] and [`radix`] — each correct end to end and
//! satisfying the same [`Book`] capability set. `spec.md` §4.2's
//! correctness property (identical `add_order`/`remove_order` sequences
//! must yield identical `best_bid`/`best_ask`/`spread`/`depth`/top-n across
//! all four) is exercised in `tests/book_equivalence.rs`.

pub mod btree;
pub mod hash_heap;
pub mod radix;
pub mod skiplist;

use crate::decimal::{Price, Quantity};
use crate::order::{Order, OrderId, Side};
use crate::price_level::{PriceLevel, PriceLevelSnapshot};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};

/// Which concrete [`Book`] implementation to construct (`spec.md` §4.2,
/// §9 "variants are concrete implementations ... selected by configuration
/// at construction time").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BookKind {
    SkipList,
    HashHeap,
    BTree,
    Radix,
}

impl Default for BookKind {
    /// The skip-list variant is the default — stable, `O(log n)` across
    /// the board via a `crossbeam_skiplist`-backed map per side.
    fn default() -> Self {
        BookKind::SkipList
    }
}

/// A top-of-book summary level, used by `bid_levels`/`ask_levels`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelSummary {
    pub price: Price,
    pub quantity: Quantity,
}

/// Aggregate depth across both sides of the book.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookDepth {
    pub bid_levels: usize,
    pub ask_levels: usize,
    pub bid_quantity: Quantity,
    pub ask_quantity: Quantity,
}

/// The flat, serializable form of a [`Book`] used for persistence
/// (`spec.md` §4.2 `to_snapshot`/`from_snapshot`, §4.3 prefix `0x02`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookSnapshot {
    pub market_id: String,
    pub bids: Vec<PriceLevelSnapshot>,
    pub asks: Vec<PriceLevelSnapshot>,
}

/// A lookup used to resolve order ids back into shared order handles when
/// rehydrating a book from a snapshot. The persistence keeper's order
/// cache satisfies this.
pub type OrderResolver<'a> = dyn Fn(OrderId) -> Option<Arc<RwLock<Order>>> + 'a;

/// The uniform capability set every book variant exposes (`spec.md` §4.2).
///
/// All methods are ACID with respect to a single logical book instance; the
/// caller (the matching engine, under its single critical-section lock —
/// §4.6) is responsible for mutual exclusion across a `match` call. `Book`
/// itself only guarantees that each individual operation is internally
/// consistent.
pub trait Book: Send + Sync {
    fn market_id(&self) -> &str;

    /// Inserts `order` into the side/price implied by its own fields,
    /// creating the `PriceLevel` on first touch at that price.
    fn add_order(&self, order: Arc<RwLock<Order>>);

    /// Removes the order by id from the given side/price, dropping the
    /// level if it becomes empty.
    fn remove_order_by_id(
        &self,
        id: OrderId,
        side: Side,
        price: Price,
    ) -> Option<Arc<RwLock<Order>>>;

    fn best_bid(&self) -> Option<Price>;
    fn best_ask(&self) -> Option<Price>;

    fn best_levels(&self) -> (Option<Price>, Option<Price>) {
        (self.best_bid(), self.best_ask())
    }

    /// Top-`n` bid levels, best first.
    fn bid_levels(&self, n: usize) -> Vec<LevelSummary>;
    /// Top-`n` ask levels, best first.
    fn ask_levels(&self, n: usize) -> Vec<LevelSummary>;

    /// All resting levels on `side`, in price-priority (best-first) order.
    /// `side` names the side of the *resting* orders — `Side::Buy` for the
    /// bid index, `Side::Sell` for the ask index — matching the
    /// `OrderType::side` of the orders stored at each level.
    fn resting_levels(&self, side: Side) -> Vec<Arc<PriceLevel>>;

    /// Removes the level at `(side, price)` if it is empty. A no-op if the
    /// level still holds active orders or does not exist.
    fn remove_level_if_empty(&self, side: Side, price: Price);

    fn iterate_bids(&self, mut f: impl FnMut(&PriceLevel) -> bool)
    where
        Self: Sized,
    {
        for level in self.resting_levels(Side::Buy) {
            if !f(&level) {
                break;
            }
        }
    }

    fn iterate_asks(&self, mut f: impl FnMut(&PriceLevel) -> bool)
    where
        Self: Sized,
    {
        for level in self.resting_levels(Side::Sell) {
            if !f(&level) {
                break;
            }
        }
    }

    fn spread(&self) -> Option<Price> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some(ask - bid),
            _ => None,
        }
    }

    fn mid_price(&self) -> Option<Price> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => {
                Some(Price::new((bid.0 + ask.0) / rust_decimal::Decimal::TWO))
            }
            _ => None,
        }
    }

    fn depth(&self) -> BookDepth;

    fn to_snapshot(&self) -> BookSnapshot;
}

/// Walks `dyn Book`-object-safe iteration for callers that hold a
/// `Box<dyn Book>` rather than a concrete type (the `impl FnMut` default
/// methods on the trait above require `Self: Sized`, so they are not
/// callable through a trait object).
pub fn iterate_bids_dyn(book: &dyn Book, mut f: impl FnMut(&PriceLevel) -> bool) {
    for level in book.resting_levels(Side::Buy) {
        if !f(&level) {
            break;
        }
    }
}

pub fn iterate_asks_dyn(book: &dyn Book, mut f: impl FnMut(&PriceLevel) -> bool) {
    for level in book.resting_levels(Side::Sell) {
        if !f(&level) {
            break;
        }
    }
}

/// Constructs an empty book of the requested variant.
#[must_use]
pub fn new_book(kind: BookKind, market_id: impl Into<String>) -> Box<dyn Book> {
    let market_id = market_id.into();
    match kind {
        BookKind::SkipList => Box::new(skiplist::SkipListBook::new(market_id)),
        BookKind::HashHeap => Box::new(hash_heap::HashHeapBook::new(market_id)),
        BookKind::BTree => Box::new(btree::BTreeBook::new(market_id)),
        BookKind::Radix => Box::new(radix::RadixBook::new(market_id)),
    }
}

/// Rehydrates a book of the requested variant from a snapshot, resolving
/// each referenced order id via `orders_by_id` (`spec.md` §4.4 `get_book`
/// cache-miss path).
#[must_use]
pub fn hydrate_book(
    kind: BookKind,
    snapshot: &BookSnapshot,
    orders_by_id: &OrderResolver<'_>,
) -> Box<dyn Book> {
    match kind {
        BookKind::SkipList => Box::new(skiplist::SkipListBook::from_snapshot(snapshot, orders_by_id)),
        BookKind::HashHeap => Box::new(hash_heap::HashHeapBook::from_snapshot(snapshot, orders_by_id)),
        BookKind::BTree => Box::new(btree::BTreeBook::from_snapshot(snapshot, orders_by_id)),
        BookKind::Radix => Box::new(radix::RadixBook::from_snapshot(snapshot, orders_by_id)),
    }
}

/// Shared helper: builds a [`BookSnapshot`] from two already-ordered
/// `(Price, Arc<PriceLevel>)` sequences (bids best-first, asks best-first).
pub(crate) fn snapshot_from_levels(
    market_id: &str,
    bids: impl Iterator<Item = Arc<PriceLevel>>,
    asks: impl Iterator<Item = Arc<PriceLevel>>,
) -> BookSnapshot {
    BookSnapshot {
        market_id: market_id.to_string(),
        bids: bids.map(|l| l.snapshot()).collect(),
        asks: asks.map(|l| l.snapshot()).collect(),
    }
}
