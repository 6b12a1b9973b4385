//! Radix tree (ART) book variant.
//!
//! `spec.md` §4.2 keys this variant by a 16-byte sign-aware encoding of the
//! price so byte-wise lexicographic order equals numerical order, and
//! notes the reference variant "requires full scan-sort" for
//! best/top-n — unlike the skip-list/B-tree variants, which get ordering
//! for free from their map. We take that literally: the index is a plain
//! `HashMap` keyed by the 16-byte encoding (cache-friendly point lookups,
//! `O(k)` in the key length), and every ordering query
//! (`best_bid`/`best_ask`/top-n/`resting_levels`) decodes and sorts the
//! full key set, matching the `O(n log n)` reference-variant cost in the
//! spec's complexity table.

use super::{Book, BookDepth, BookSnapshot, LevelSummary, OrderResolver};
use crate::decimal::{Price, Quantity};
use crate::order::{Order, OrderId, Side};
use crate::price_level::PriceLevel;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// 16-byte sign-aware lexicographic encoding of a price.
///
/// Prices are first rescaled to a fixed 8-decimal-place mantissa (`price *
/// 10^8`, rounded), producing an `i128` whose two's-complement ordering
/// matches price ordering. That `i128` is then converted to `u128` by
/// flipping the sign bit — the standard trick for making a signed
/// integer's byte representation order identically to its numeric value —
/// and written big-endian. This is the single-sentinel-bit equivalent of
/// a "high sentinel / low sentinel" two-prefix scheme.
#[must_use]
pub fn encode_price_key(price: Price) -> [u8; 16] {
    const SCALE: Decimal = Decimal::from_parts(100_000_000, 0, 0, false, 0);
    let scaled = (price.0 * SCALE).round();
    let mantissa: i128 = scaled.mantissa();
    let unsigned = (mantissa as u128) ^ (1u128 << 127);
    unsigned.to_be_bytes()
}

#[must_use]
pub fn decode_price_key(key: [u8; 16]) -> Price {
    let unsigned = u128::from_be_bytes(key);
    let mantissa = (unsigned ^ (1u128 << 127)) as i128;
    Price::new(Decimal::from_i128_with_scale(mantissa, 8))
}

pub struct RadixBook {
    market_id: String,
    bids: RwLock<HashMap<[u8; 16], (Price, Arc<PriceLevel>)>>,
    asks: RwLock<HashMap<[u8; 16], (Price, Arc<PriceLevel>)>>,
}

impl RadixBook {
    #[must_use]
    pub fn new(market_id: impl Into<String>) -> Self {
        Self {
            market_id: market_id.into(),
            bids: RwLock::new(HashMap::new()),
            asks: RwLock::new(HashMap::new()),
        }
    }

    pub fn from_snapshot(snapshot: &BookSnapshot, orders_by_id: &OrderResolver<'_>) -> Self {
        let book = Self::new(snapshot.market_id.clone());
        {
            let mut bids = book.bids.write().unwrap();
            for level_snap in &snapshot.bids {
                let level = Arc::new(PriceLevel::from_snapshot(level_snap, orders_by_id));
                bids.insert(encode_price_key(level_snap.price), (level_snap.price, level));
            }
        }
        {
            let mut asks = book.asks.write().unwrap();
            for level_snap in &snapshot.asks {
                let level = Arc::new(PriceLevel::from_snapshot(level_snap, orders_by_id));
                asks.insert(encode_price_key(level_snap.price), (level_snap.price, level));
            }
        }
        book
    }

    fn side_map(&self, side: Side) -> &RwLock<HashMap<[u8; 16], (Price, Arc<PriceLevel>)>> {
        match side {
            Side::Buy => &self.bids,
            Side::Sell => &self.asks,
        }
    }

    /// Full scan + sort: the reference variant's price-priority query path.
    fn sorted_levels(&self, side: Side) -> Vec<(Price, Arc<PriceLevel>)> {
        let map = self.side_map(side).read().unwrap();
        let mut levels: Vec<(Price, Arc<PriceLevel>)> =
            map.values().map(|(p, l)| (*p, l.clone())).collect();
        match side {
            Side::Buy => levels.sort_by(|a, b| b.0.cmp(&a.0)),
            Side::Sell => levels.sort_by(|a, b| a.0.cmp(&b.0)),
        }
        levels
    }
}

impl Book for RadixBook {
    fn market_id(&self) -> &str {
        &self.market_id
    }

    fn add_order(&self, order: Arc<RwLock<Order>>) {
        let (side, price) = {
            let o = order.read().unwrap();
            (o.side, o.price)
        };
        let key = encode_price_key(price);
        let mut map = self.side_map(side).write().unwrap();
        let (_, level) = map
            .entry(key)
            .or_insert_with(|| (price, Arc::new(PriceLevel::new(price))));
        level.add(order);
    }

    fn remove_order_by_id(
        &self,
        id: OrderId,
        side: Side,
        price: Price,
    ) -> Option<Arc<RwLock<Order>>> {
        let key = encode_price_key(price);
        let mut map = self.side_map(side).write().unwrap();
        let (_, level) = map.get(&key)?.clone();
        let removed = level.remove_by_id(id);
        if level.is_empty() {
            map.remove(&key);
        }
        removed
    }

    fn best_bid(&self) -> Option<Price> {
        self.sorted_levels(Side::Buy).first().map(|(p, _)| *p)
    }

    fn best_ask(&self) -> Option<Price> {
        self.sorted_levels(Side::Sell).first().map(|(p, _)| *p)
    }

    fn bid_levels(&self, n: usize) -> Vec<LevelSummary> {
        self.sorted_levels(Side::Buy)
            .into_iter()
            .take(n)
            .map(|(price, level)| LevelSummary {
                price,
                quantity: level.quantity(),
            })
            .collect()
    }

    fn ask_levels(&self, n: usize) -> Vec<LevelSummary> {
        self.sorted_levels(Side::Sell)
            .into_iter()
            .take(n)
            .map(|(price, level)| LevelSummary {
                price,
                quantity: level.quantity(),
            })
            .collect()
    }

    fn resting_levels(&self, side: Side) -> Vec<Arc<PriceLevel>> {
        self.sorted_levels(side).into_iter().map(|(_, l)| l).collect()
    }

    fn remove_level_if_empty(&self, side: Side, price: Price) {
        let key = encode_price_key(price);
        let mut map = self.side_map(side).write().unwrap();
        if let Some((_, level)) = map.get(&key) {
            if level.is_empty() {
                map.remove(&key);
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
                .map(|(_, l)| l.quantity())
                .fold(Quantity::ZERO, |a, b| a + b),
            ask_quantity: asks
                .values()
                .map(|(_, l)| l.quantity())
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
