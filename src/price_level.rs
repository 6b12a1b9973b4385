//! FIFO price level (C1): a single price's resting-order queue plus its
//! aggregate quantity.

use crate::decimal::{Price, Quantity};
use crate::order::{Order, OrderId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::RwLock;

/// A single price's FIFO queue of resting orders.
///
/// Orders are `Arc<RwLock<Order>>` so the level, the order-by-id cache and
/// the persistence keeper can all hold the same order without duplicating
/// it (`spec.md` §3 "Lifecycle & ownership").
#[derive(Debug)]
pub struct PriceLevel {
    price: Price,
    quantity: RwLock<Quantity>,
    orders: RwLock<Vec<Arc<RwLock<Order>>>>,
}

/// A lossless, serializable projection of a [`PriceLevel`] used by
/// `to_snapshot`/`from_snapshot` (`spec.md` §4.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceLevelSnapshot {
    pub price: Price,
    pub aggregate_qty: Quantity,
    pub order_ids: Vec<OrderId>,
}

impl PriceLevel {
    #[must_use]
    pub fn new(price: Price) -> Self {
        Self {
            price,
            quantity: RwLock::new(Quantity::ZERO),
            orders: RwLock::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn price(&self) -> Price {
        self.price
    }

    #[must_use]
    pub fn quantity(&self) -> Quantity {
        *self.quantity.read().unwrap()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.orders.read().unwrap().is_empty()
    }

    /// Appends `order` to the tail and adds its remaining quantity to the
    /// aggregate.
    pub fn add(&self, order: Arc<RwLock<Order>>) {
        let remaining = order.read().unwrap().remaining_qty();
        self.orders.write().unwrap().push(order);
        *self.quantity.write().unwrap() = self.quantity() + remaining;
    }

    /// Removes the order with `order_id`, returning it if present.
    ///
    /// O(n) within the level, as specified.
    pub fn remove_by_id(&self, order_id: OrderId) -> Option<Arc<RwLock<Order>>> {
        let mut orders = self.orders.write().unwrap();
        let idx = orders
            .iter()
            .position(|o| o.read().unwrap().order_id == order_id)?;
        let removed = orders.remove(idx);
        drop(orders);
        let removed_remaining = removed.read().unwrap().remaining_qty();
        *self.quantity.write().unwrap() = self.quantity() - removed_remaining;
        Some(removed)
    }

    /// The head (oldest) resting order, if any.
    #[must_use]
    pub fn first(&self) -> Option<Arc<RwLock<Order>>> {
        self.orders.read().unwrap().first().cloned()
    }

    /// Snapshot of all orders currently in the level, in arrival order.
    #[must_use]
    pub fn orders(&self) -> Vec<Arc<RwLock<Order>>> {
        self.orders.read().unwrap().clone()
    }

    /// Recomputes `quantity` by summing `remaining_qty` across all active
    /// orders. Called after in-place fills mutate orders without going
    /// through `add`/`remove_by_id`.
    pub fn recompute_quantity(&self) {
        let total = self
            .orders
            .read()
            .unwrap()
            .iter()
            .map(|o| o.read().unwrap().remaining_qty())
            .fold(Quantity::ZERO, |acc, q| acc + q);
        *self.quantity.write().unwrap() = total;
    }

    /// Drops orders that are no longer active (filled/cancelled) from the
    /// level. The matching engine calls this after each level's inner loop;
    /// it must run before the level is flushed or considered empty.
    pub fn evict_inactive(&self) {
        let mut orders = self.orders.write().unwrap();
        orders.retain(|o| o.read().unwrap().is_active());
        drop(orders);
        self.recompute_quantity();
    }

    #[must_use]
    pub fn snapshot(&self) -> PriceLevelSnapshot {
        PriceLevelSnapshot {
            price: self.price,
            aggregate_qty: self.quantity(),
            order_ids: self
                .orders
                .read()
                .unwrap()
                .iter()
                .map(|o| o.read().unwrap().order_id)
                .collect(),
        }
    }

    /// Rehydrates a level from a snapshot plus the resolved order objects
    /// (the cache looks these up by id — see [`crate::cache::Cache::get_book`]).
    #[must_use]
    pub fn from_snapshot(
        snapshot: &PriceLevelSnapshot,
        orders_by_id: &dyn Fn(OrderId) -> Option<Arc<RwLock<Order>>>,
    ) -> Self {
        let level = PriceLevel::new(snapshot.price);
        for id in &snapshot.order_ids {
            if let Some(order) = orders_by_id(*id) {
                level.add(order);
            }
        }
        level
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::order::{OrderKind, Side};
    use rust_decimal_macros::dec;
    use std::sync::RwLock as StdRwLock;

    fn order(id: u64, qty: i64, created_at: i64) -> Arc<StdRwLock<Order>> {
        Arc::new(StdRwLock::new(Order::new(
            OrderId(id),
            "trader".into(),
            "BTC-PERP".into(),
            Side::Sell,
            OrderKind::Limit,
            Price::new(dec!(100)),
            Quantity::new(dec!(qty)),
            created_at,
        )))
    }

    #[test]
    fn add_maintains_insertion_order_and_aggregate() {
        let level = PriceLevel::new(Price::new(dec!(100)));
        level.add(order(1, 2, 1));
        level.add(order(2, 3, 2));
        assert_eq!(level.quantity(), Quantity::new(dec!(5)));
        let first = level.first().unwrap();
        assert_eq!(first.read().unwrap().order_id, OrderId(1));
    }

    #[test]
    fn remove_by_id_updates_aggregate() {
        let level = PriceLevel::new(Price::new(dec!(100)));
        level.add(order(1, 2, 1));
        level.add(order(2, 3, 2));
        let removed = level.remove_by_id(OrderId(1)).unwrap();
        assert_eq!(removed.read().unwrap().order_id, OrderId(1));
        assert_eq!(level.quantity(), Quantity::new(dec!(3)));
        assert!(level.remove_by_id(OrderId(99)).is_none());
    }

    #[test]
    fn evict_inactive_drops_filled_orders() {
        let level = PriceLevel::new(Price::new(dec!(100)));
        let o1 = order(1, 2, 1);
        o1.write().unwrap().fill(Quantity::new(dec!(2)), 5);
        level.add(o1);
        level.add(order(2, 4, 2));
        level.evict_inactive();
        assert_eq!(level.quantity(), Quantity::new(dec!(4)));
        assert!(!level.is_empty());
    }

    #[test]
    fn snapshot_round_trip() {
        let level = PriceLevel::new(Price::new(dec!(100)));
        level.add(order(1, 2, 1));
        level.add(order(2, 3, 2));
        let snap = level.snapshot();
        let store = level.orders();
        let rehydrated = PriceLevel::from_snapshot(&snap, &|id| {
            store.iter().find(|o| o.read().unwrap().order_id == id).cloned()
        });
        assert_eq!(rehydrated.quantity(), level.quantity());
        assert_eq!(rehydrated.orders().len(), level.orders().len());
    }
}
