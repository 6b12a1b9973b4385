//! Per-market partitioner (C7): groups pending orders by market so each
//! group becomes an independent matching domain (`spec.md` §4.6).

use crate::order::{MarketId, Order};
use std::collections::BTreeMap;

/// Groups `orders` by `market_id`, preserving each market's relative
/// ordering (insertion-stable) and dropping inactive entries. Returned in
/// `market_id` sort order so callers that iterate the map directly
/// already see the deterministic ordering `spec.md` §4.7/§5 requires for
/// downstream visibility.
#[must_use]
pub fn group_by_market(orders: Vec<Order>) -> BTreeMap<MarketId, Vec<Order>> {
    let mut groups: BTreeMap<MarketId, Vec<Order>> = BTreeMap::new();
    for order in orders {
        if !order.is_active() {
            continue;
        }
        groups.entry(order.market_id.clone()).or_default().push(order);
    }
    groups
}
