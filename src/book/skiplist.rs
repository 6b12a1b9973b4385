//! Skip-list book variant (default): `crossbeam_skiplist::SkipMap<u128,
//! Arc<PriceLevel>>` per side, best bid/ask by ordered-map ends, bids
//! walked via `.iter().rev()`.

use super::{Book, BookDepth, BookSnapshot, LevelSummary, OrderResolver};
use crate::decimal::Price;
use crate::order::{Order, OrderId, Side};
use crate::price_level::PriceLevel;
use crossbeam_skiplist::SkipMap;
use std::sync::{Arc, RwLock};

pub struct SkipListBook {
    market_id: String,
    bids: SkipMap<Price, Arc<PriceLevel>>,
    asks: SkipMap<Price, Arc<PriceLevel>>,
}

impl SkipListBook {
    #[must_use]
    pub fn new(market_id: impl Into<String>) -> Self {
        Self {
            market_id: market_id.into(),
            bids: SkipMap::new(),
            asks: SkipMap::new(),
        }
    }

    fn side_map(&self, side: Side) -> &SkipMap<Price, Arc<PriceLevel>> {
        match side {
            Side::Buy => &self.bids,
            Side::Sell => &self.asks,
        }
    }

    pub fn from_snapshot(snapshot: &BookSnapshot, orders_by_id: &OrderResolver<'_>) -> Self {
        let book = Self::new(snapshot.market_id.clone());
        for level_snap in &snapshot.bids {
            let level = Arc::new(PriceLevel::from_snapshot(level_snap, orders_by_id));
            book.bids.insert(level_snap.price, level);
        }
        for level_snap in &snapshot.asks {
            let level = Arc::new(PriceLevel::from_snapshot(level_snap, orders_by_id));
            book.asks.insert(level_snap.price, level);
        }
        book
    }
}

impl Book for SkipListBook {
    fn market_id(&self) -> &str {
        &self.market_id
    }

    fn add_order(&self, order: Arc<RwLock<Order>>) {
        let (side, price) = {
            let o = order.read().unwrap();
            (o.side, o.price)
        };
        let map = self.side_map(side);
        let level = match map.get(&price) {
            Some(entry) => entry.value().clone(),
            None => {
                let level = Arc::new(PriceLevel::new(price));
                map.insert(price, level.clone());
                level
            }
        };
        level.add(order);
    }

    fn remove_order_by_id(
        &self,
        id: OrderId,
        side: Side,
        price: Price,
    ) -> Option<Arc<RwLock<Order>>> {
        let map = self.side_map(side);
        let entry = map.get(&price)?;
        let removed = entry.value().remove_by_id(id);
        if entry.value().is_empty() {
            entry.remove();
        }
        removed
    }

    fn best_bid(&self) -> Option<Price> {
        self.bids.iter().next_back().map(|e| *e.key())
    }

    fn best_ask(&self) -> Option<Price> {
        self.asks.iter().next().map(|e| *e.key())
    }

    fn bid_levels(&self, n: usize) -> Vec<LevelSummary> {
        self.bids
            .iter()
            .rev()
            .take(n)
            .map(|e| LevelSummary {
                price: *e.key(),
                quantity: e.value().quantity(),
            })
            .collect()
    }

    fn ask_levels(&self, n: usize) -> Vec<LevelSummary> {
        self.asks
            .iter()
            .take(n)
            .map(|e| LevelSummary {
                price: *e.key(),
                quantity: e.value().quantity(),
            })
            .collect()
    }

    fn resting_levels(&self, side: Side) -> Vec<Arc<PriceLevel>> {
        match side {
            Side::Buy => self.bids.iter().rev().map(|e| e.value().clone()).collect(),
            Side::Sell => self.asks.iter().map(|e| e.value().clone()).collect(),
        }
    }

    fn remove_level_if_empty(&self, side: Side, price: Price) {
        let map = self.side_map(side);
        if let Some(entry) = map.get(&price) {
            if entry.value().is_empty() {
                entry.remove();
            }
        }
    }

    fn depth(&self) -> BookDepth {
        BookDepth {
            bid_levels: self.bids.len(),
            ask_levels: self.asks.len(),
            bid_quantity: self
                .bids
                .iter()
                .map(|e| e.value().quantity())
                .fold(crate::decimal::Quantity::ZERO, |a, b| a + b),
            ask_quantity: self
                .asks
                .iter()
                .map(|e| e.value().quantity())
                .fold(crate::decimal::Quantity::ZERO, |a, b| a + b),
        }
    }

    fn to_snapshot(&self) -> BookSnapshot {
        super::snapshot_from_levels(
            &self.market_id,
            self.bids.iter().rev().map(|e| e.value().clone()),
            self.asks.iter().map(|e| e.value().clone()),
        )
    }
}
