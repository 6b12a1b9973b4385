//! Hash+heap book variant: `O(1)`-lookup price levels plus a lazily-cleaned
//! binary heap for best-price tracking.
//!
//! `spec.md` §9 calls for "a sidecar map from price to heap-index
//! maintained in sync inside the heap's swap function" as the rework of an
//! index keyed by stringified decimals. A fully indexed, swap-tracking
//! binary heap is one valid way to get that; the simpler and equally
//! correct way — used here — is lazy deletion: the heap may contain stale
//! prices that have since emptied out, and peeking discards them until a
//! live one surfaces. Membership in `levels` is the single source of
//! truth; the heap is just a cache of candidate best prices.

use super::{Book, BookDepth, BookSnapshot, LevelSummary, OrderResolver};
use crate::decimal::{Price, Quantity};
use crate::order::{Order, OrderId, Side};
use crate::price_level::PriceLevel;
use dashmap::DashMap;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::{Arc, Mutex, RwLock};

pub struct HashHeapBook {
    market_id: String,
    bid_levels: DashMap<Price, Arc<PriceLevel>>,
    ask_levels: DashMap<Price, Arc<PriceLevel>>,
    /// Max-heap of candidate bid prices (highest first), may contain stale
    /// entries no longer present in `bid_levels`.
    bid_heap: Mutex<BinaryHeap<Price>>,
    /// Min-heap (via `Reverse`) of candidate ask prices, same staleness
    /// caveat.
    ask_heap: Mutex<BinaryHeap<Reverse<Price>>>,
}

impl HashHeapBook {
    #[must_use]
    pub fn new(market_id: impl Into<String>) -> Self {
        Self {
            market_id: market_id.into(),
            bid_levels: DashMap::new(),
            ask_levels: DashMap::new(),
            bid_heap: Mutex::new(BinaryHeap::new()),
            ask_heap: Mutex::new(BinaryHeap::new()),
        }
    }

    pub fn from_snapshot(snapshot: &BookSnapshot, orders_by_id: &OrderResolver<'_>) -> Self {
        let book = Self::new(snapshot.market_id.clone());
        for level_snap in &snapshot.bids {
            let level = Arc::new(PriceLevel::from_snapshot(level_snap, orders_by_id));
            book.bid_levels.insert(level_snap.price, level);
            book.bid_heap.lock().unwrap().push(level_snap.price);
        }
        for level_snap in &snapshot.asks {
            let level = Arc::new(PriceLevel::from_snapshot(level_snap, orders_by_id));
            book.ask_levels.insert(level_snap.price, level);
            book.ask_heap.lock().unwrap().push(Reverse(level_snap.price));
        }
        book
    }

    fn levels_map(&self, side: Side) -> &DashMap<Price, Arc<PriceLevel>> {
        match side {
            Side::Buy => &self.bid_levels,
            Side::Sell => &self.ask_levels,
        }
    }

    fn sorted_prices(&self, side: Side) -> Vec<Price> {
        let mut prices: Vec<Price> = self.levels_map(side).iter().map(|e| *e.key()).collect();
        match side {
            Side::Buy => prices.sort_by(|a, b| b.cmp(a)),
            Side::Sell => prices.sort(),
        }
        prices
    }
}

impl Book for HashHeapBook {
    fn market_id(&self) -> &str {
        &self.market_id
    }

    fn add_order(&self, order: Arc<RwLock<Order>>) {
        let (side, price) = {
            let o = order.read().unwrap();
            (o.side, o.price)
        };
        let map = self.levels_map(side);
        let is_new = !map.contains_key(&price);
        let level = map
            .entry(price)
            .or_insert_with(|| Arc::new(PriceLevel::new(price)))
            .clone();
        level.add(order);
        if is_new {
            match side {
                Side::Buy => self.bid_heap.lock().unwrap().push(price),
                Side::Sell => self.ask_heap.lock().unwrap().push(Reverse(price)),
            }
        }
    }

    fn remove_order_by_id(
        &self,
        id: OrderId,
        side: Side,
        price: Price,
    ) -> Option<Arc<RwLock<Order>>> {
        let map = self.levels_map(side);
        let level = map.get(&price)?.clone();
        let removed = level.remove_by_id(id);
        if level.is_empty() {
            map.remove(&price);
        }
        removed
    }

    fn best_bid(&self) -> Option<Price> {
        let mut heap = self.bid_heap.lock().unwrap();
        while let Some(&price) = heap.peek() {
            if self.bid_levels.contains_key(&price) {
                return Some(price);
            }
            heap.pop();
        }
        None
    }

    fn best_ask(&self) -> Option<Price> {
        let mut heap = self.ask_heap.lock().unwrap();
        while let Some(&Reverse(price)) = heap.peek() {
            if self.ask_levels.contains_key(&price) {
                return Some(price);
            }
            heap.pop();
        }
        None
    }

    fn bid_levels(&self, n: usize) -> Vec<LevelSummary> {
        self.sorted_prices(Side::Buy)
            .into_iter()
            .take(n)
            .filter_map(|price| {
                self.bid_levels.get(&price).map(|l| LevelSummary {
                    price,
                    quantity: l.quantity(),
                })
            })
            .collect()
    }

    fn ask_levels(&self, n: usize) -> Vec<LevelSummary> {
        self.sorted_prices(Side::Sell)
            .into_iter()
            .take(n)
            .filter_map(|price| {
                self.ask_levels.get(&price).map(|l| LevelSummary {
                    price,
                    quantity: l.quantity(),
                })
            })
            .collect()
    }

    fn resting_levels(&self, side: Side) -> Vec<Arc<PriceLevel>> {
        self.sorted_prices(side)
            .into_iter()
            .filter_map(|price| self.levels_map(side).get(&price).map(|e| e.value().clone()))
            .collect()
    }

    fn remove_level_if_empty(&self, side: Side, price: Price) {
        let map = self.levels_map(side);
        if let Some(level) = map.get(&price) {
            if level.is_empty() {
                drop(level);
                map.remove(&price);
            }
        }
    }

    fn depth(&self) -> BookDepth {
        BookDepth {
            bid_levels: self.bid_levels.len(),
            ask_levels: self.ask_levels.len(),
            bid_quantity: self
                .bid_levels
                .iter()
                .map(|e| e.value().quantity())
                .fold(Quantity::ZERO, |a, b| a + b),
            ask_quantity: self
                .ask_levels
                .iter()
                .map(|e| e.value().quantity())
                .fold(Quantity::ZERO, |a, b| a + b),
        }
    }

    fn to_snapshot(&self) -> BookSnapshot {
        super::snapshot_from_levels(
            &self.market_id,
            self.resting_levels(Side::Buy).into_iter(),
            self.resting_levels(Side::Sell).into_iter(),
        )
    }
}
