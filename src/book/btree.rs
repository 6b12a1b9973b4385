//! B-tree book variant: `std::collections::BTreeMap` per side, supporting
//! ordered range queries natively.

use super::{Book, BookDepth, BookSnapshot, LevelSummary, OrderResolver};
use crate::decimal::{Price, Quantity};
use crate::order::{Order, OrderId, Side};
use crate::price_level::PriceLevel;
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

pub struct BTreeBook {
    market_id: String,
    bids: RwLock<BTreeMap<Price, Arc<PriceLevel>>>,
    asks: RwLock<BTreeMap<Price, Arc<PriceLevel>>>,
}

impl BTreeBook {
    #[must_use]
    pub fn new(market_id: impl Into<String>) -> Self {
        Self {
            market_id: market_id.into(),
            bids: RwLock::new(BTreeMap::new()),
            asks: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn from_snapshot(snapshot: &BookSnapshot, orders_by_id: &OrderResolver<'_>) -> Self {
        let book = Self::new(snapshot.market_id.clone());
        {
            let mut bids = book.bids.write().unwrap();
            for level_snap in &snapshot.bids {
                bids.insert(
                    level_snap.price,
                    Arc::new(PriceLevel::from_snapshot(level_snap, orders_by_id)),
                );
            }
        }
        {
            let mut asks = book.asks.write().unwrap();
            for level_snap in &snapshot.asks {
                asks.insert(
                    level_snap.price,
                    Arc::new(PriceLevel::from_snapshot(level_snap, orders_by_id)),
                );
            }
        }
        book
    }

    fn side_map(&self, side: Side) -> &RwLock<BTreeMap<Price, Arc<PriceLevel>>> {
        match side {
            Side::Buy => &self.bids,
            Side::Sell => &self.asks,
        }
    }
}

/// Range queries by price, delegating to the B-tree's native ordering.
impl BTreeBook {
    #[must_use]
    pub fn levels_in_range(&self, side: Side, low: Price, high: Price) -> Vec<LevelSummary> {
        self.side_map(side)
            .read()
            .unwrap()
            .range(low..=high)
            .map(|(price, level)| LevelSummary {
                price: *price,
                quantity: level.quantity(),
            })
            .collect()
    }
}

impl Book for BTreeBook {
    fn market_id(&self) -> &str {
        &self.market_id
    }

    fn add_order(&self, order: Arc<RwLock<Order>>) {
        let (side, price) = {
            let o = order.read().unwrap();
            (o.side, o.price)
        };
        let mut map = self.side_map(side).write().unwrap();
        let level = map
            .entry(price)
            .or_insert_with(|| Arc::new(PriceLevel::new(price)))
            .clone();
        level.add(order);
    }

    fn remove_order_by_id(
        &self,
        id: OrderId,
        side: Side,
        price: Price,
    ) -> Option<Arc<RwLock<Order>>> {
        let mut map = self.side_map(side).write().unwrap();
        let level = map.get(&price)?.clone();
        let removed = level.remove_by_id(id);
        if level.is_empty() {
            map.remove(&price);
        }
        removed
    }

    fn best_bid(&self) -> Option<Price> {
        self.bids.read().unwrap().keys().next_back().copied()
    }

    fn best_ask(&self) -> Option<Price> {
        self.asks.read().unwrap().keys().next().copied()
    }

    fn bid_levels(&self, n: usize) -> Vec<LevelSummary> {
        self.bids
            .read()
            .unwrap()
            .iter()
            .rev()
            .take(n)
            .map(|(price, level)| LevelSummary {
                price: *price,
                quantity: level.quantity(),
            })
            .collect()
    }

    fn ask_levels(&self, n: usize) -> Vec<LevelSummary> {
        self.asks
            .read()
            .unwrap()
            .iter()
            .take(n)
            .map(|(price, level)| LevelSummary {
                price: *price,
                quantity: level.quantity(),
            })
            .collect()
    }

    fn resting_levels(&self, side: Side) -> Vec<Arc<PriceLevel>> {
        let map = self.side_map(side).read().unwrap();
        match side {
            Side::Buy => map.values().rev().cloned().collect(),
            Side::Sell => map.values().cloned().collect(),
        }
    }

    fn remove_level_if_empty(&self, side: Side, price: Price) {
        let mut map = self.side_map(side).write().unwrap();
        if let Some(level) = map.get(&price) {
            if level.is_empty() {
                map.remove(&price);
            }
        }
    }

    fn depth(&self) -> BookDepth {
        let bids = self.bids.read().unwrap();
        let asks = self.asks.read().unwrap();
        BookDepth {
            bid_levels: bids.len(),
            ask_levels: asks.len(),
            bid_quantity: bids
                .values()
                .map(|l| l.quantity())
                .fold(Quantity::ZERO, |a, b| a + b),
            ask_quantity: asks
                .values()
                .map(|l| l.quantity())
                .fold(Quantity::ZERO, |a, b| a + b),
        }
    }

    fn to_snapshot(&self) -> BookSnapshot {
        super::snapshot_from_levels(
            &self.market_id,
            self.bids.read().unwrap().values().rev().cloned().collect::<Vec<_>>().into_iter(),
            self.asks.read().unwrap().values().cloned().collect::<Vec<_>>().into_iter(),
        )
    }
}
