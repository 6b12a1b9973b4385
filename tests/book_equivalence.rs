//! Cross-implementation equivalence for the four book variants (`spec.md`
//! §4.2): identical `add_order`/`remove_order` sequences must yield
//! identical `best_bid`/`best_ask`/`spread`/`depth`/top-n across all four.

use matching_core::book::{new_book, BookKind};
use matching_core::decimal::{Price, Quantity};
use matching_core::order::{Order, OrderId, OrderKind, Side};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;
use std::sync::{Arc, RwLock};

const VARIANTS: [BookKind; 4] = [
    BookKind::SkipList,
    BookKind::HashHeap,
    BookKind::BTree,
    BookKind::Radix,
];

fn order(id: u64, side: Side, price: i64, qty: i64) -> Arc<RwLock<Order>> {
    Arc::new(RwLock::new(Order::new(
        OrderId(id),
        "trader".into(),
        "BTC-PERP".into(),
        side,
        OrderKind::Limit,
        Price::new(Decimal::from(price)),
        Quantity::new(Decimal::from(qty)),
        0,
    )))
}

#[test]
fn a_fixed_scripted_sequence_agrees_across_all_four_variants() {
    let books: Vec<_> = VARIANTS
        .iter()
        .map(|kind| new_book(*kind, "BTC-PERP"))
        .collect();

    for (id, side, price, qty) in [
        (1u64, Side::Buy, 100, 2),
        (2, Side::Buy, 101, 3),
        (3, Side::Sell, 105, 1),
        (4, Side::Sell, 104, 4),
        (5, Side::Buy, 101, 1),
    ] {
        for book in &books {
            book.add_order(order(id, side, price, qty));
        }
    }

    let reference = books[0].to_snapshot();
    for book in &books[1..] {
        assert_eq!(books[0].best_bid(), book.best_bid());
        assert_eq!(books[0].best_ask(), book.best_ask());
        assert_eq!(books[0].spread(), book.spread());
        assert_eq!(books[0].depth(), book.depth());
        assert_eq!(books[0].bid_levels(5), book.bid_levels(5));
        assert_eq!(books[0].ask_levels(5), book.ask_levels(5));

        let snapshot = book.to_snapshot();
        assert_eq!(reference.bids.len(), snapshot.bids.len());
        assert_eq!(reference.asks.len(), snapshot.asks.len());
    }

    for book in &books {
        book.remove_order_by_id(OrderId(2), Side::Buy, Price::new(Decimal::from(101)));
        book.remove_level_if_empty(Side::Sell, Price::new(Decimal::from(105)));
    }
    for book in &books[1..] {
        assert_eq!(books[0].best_bid(), book.best_bid());
        assert_eq!(books[0].depth(), book.depth());
    }
}

#[test]
fn randomized_add_remove_sequences_agree_across_all_four_variants() {
    let mut rng = StdRng::seed_from_u64(42);
    let books: Vec<_> = VARIANTS
        .iter()
        .map(|kind| new_book(*kind, "BTC-PERP"))
        .collect();

    let mut live_ids = Vec::new();
    let mut next_id = 1u64;
    for _ in 0..200 {
        let remove = !live_ids.is_empty() && rng.random_bool(0.3);
        if remove {
            let idx = rng.random_range(0..live_ids.len());
            let (id, side, price): (u64, Side, i64) = live_ids.remove(idx);
            for book in &books {
                book.remove_order_by_id(OrderId(id), side, Price::new(Decimal::from(price)));
                book.remove_level_if_empty(side, Price::new(Decimal::from(price)));
            }
        } else {
            let id = next_id;
            next_id += 1;
            let side = if rng.random_bool(0.5) { Side::Buy } else { Side::Sell };
            let price = 90 + rng.random_range(0..20);
            let qty = 1 + rng.random_range(0..5);
            for book in &books {
                book.add_order(order(id, side, price, qty));
            }
            live_ids.push((id, side, price));
        }

        for book in &books[1..] {
            assert_eq!(books[0].best_bid(), book.best_bid(), "best_bid diverged");
            assert_eq!(books[0].best_ask(), book.best_ask(), "best_ask diverged");
            assert_eq!(books[0].depth(), book.depth(), "depth diverged");
            assert_eq!(books[0].bid_levels(3), book.bid_levels(3), "bid_levels diverged");
            assert_eq!(books[0].ask_levels(3), book.ask_levels(3), "ask_levels diverged");
        }
    }
}

#[test]
fn snapshot_round_trip_rehydrates_an_equivalent_book_for_every_variant() {
    for kind in VARIANTS {
        let book = new_book(kind, "BTC-PERP");
        book.add_order(order(1, Side::Buy, 100, 2));
        book.add_order(order(2, Side::Sell, 101, 3));

        let snapshot = book.to_snapshot();
        let orders: std::collections::HashMap<OrderId, Arc<RwLock<Order>>> =
            [(OrderId(1), order(1, Side::Buy, 100, 2)), (OrderId(2), order(2, Side::Sell, 101, 3))]
                .into_iter()
                .collect();
        let resolver = move |id: OrderId| orders.get(&id).cloned();
        let rehydrated = matching_core::book::hydrate_book(kind, &snapshot, &resolver);

        assert_eq!(book.best_bid(), rehydrated.best_bid());
        assert_eq!(book.best_ask(), rehydrated.best_ask());
        assert_eq!(book.depth(), rehydrated.depth());
    }
}
