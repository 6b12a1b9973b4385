//! Write-through cache (C5): per-task scratch space between the matching
//! engine and the persistence keeper (`spec.md` §4.4).
//!
//! Built for the scheduler's need (§4.7) for an isolated cache *per
//! task* — this type is constructed fresh per scheduler task (or once,
//! for the non-parallel path) and always flushes through a [`Keeper`]
//! built on a [`CacheContext`], so committing/discarding the underlying
//! KV overlay
//! is enough to make the whole task's effects atomic.

use crate::book::{hydrate_book, Book, BookKind, BookSnapshot};
use crate::keeper::Keeper;
use crate::kv::KvError;
use crate::order::{Order, OrderId, Trade};
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, RwLock};

/// In-memory book + order cache with dirty-tracking, sitting between the
/// engine and the keeper for the lifetime of one task (`spec.md` §4.4).
pub struct Cache {
    book_kind: BookKind,
    books: DashMap<String, Arc<dyn Book>>,
    orders: DashMap<OrderId, Arc<RwLock<Order>>>,
    dirty_books: Mutex<HashSet<String>>,
    dirty_orders: Mutex<HashSet<OrderId>>,
    pending_trades: Mutex<Vec<Trade>>,
}

impl Cache {
    #[must_use]
    pub fn new(book_kind: BookKind) -> Self {
        Self {
            book_kind,
            books: DashMap::new(),
            orders: DashMap::new(),
            dirty_books: Mutex::new(HashSet::new()),
            dirty_orders: Mutex::new(HashSet::new()),
            pending_trades: Mutex::new(Vec::new()),
        }
    }

    /// Cached read-through: returns the in-memory book for `market_id`,
    /// rehydrating from the keeper's last snapshot on a cache miss and
    /// resolving each referenced order id through [`Cache::get_order`]
    /// (`spec.md` §4.4 `get_book`).
    pub fn get_book(&self, keeper: &Keeper, market_id: &str) -> Result<Arc<dyn Book>, KvError> {
        if let Some(book) = self.books.get(market_id) {
            return Ok(book.clone());
        }
        let snapshot = keeper
            .get_book_snapshot(market_id)?
            .unwrap_or_else(|| BookSnapshot {
                market_id: market_id.to_string(),
                bids: Vec::new(),
                asks: Vec::new(),
            });
        for level in snapshot.bids.iter().chain(snapshot.asks.iter()) {
            for id in &level.order_ids {
                if self.orders.contains_key(id) {
                    continue;
                }
                if let Some(order) = keeper.get_order(*id)? {
                    self.orders.insert(*id, Arc::new(RwLock::new(order)));
                }
            }
        }
        let resolver = |id: OrderId| self.orders.get(&id).map(|e| e.value().clone());
        let book: Arc<dyn Book> = Arc::from(hydrate_book(self.book_kind, &snapshot, &resolver));
        self.books.insert(market_id.to_string(), book.clone());
        Ok(book)
    }

    /// Cached read-through for a single order (`spec.md` §4.4 `get_order`).
    pub fn get_order(&self, keeper: &Keeper, id: OrderId) -> Result<Option<Arc<RwLock<Order>>>, KvError> {
        if let Some(order) = self.orders.get(&id) {
            return Ok(Some(order.value().clone()));
        }
        let Some(order) = keeper.get_order(id)? else {
            return Ok(None);
        };
        let handle = Arc::new(RwLock::new(order));
        self.orders.insert(id, handle.clone());
        Ok(Some(handle))
    }

    /// Inserts/overwrites the order cache entry for `order.order_id` and
    /// marks it dirty for the next flush.
    pub fn set_order(&self, order: Order) {
        let id = order.order_id;
        match self.orders.get(&id) {
            Some(existing) => *existing.value().write().unwrap() = order,
            None => {
                self.orders.insert(id, Arc::new(RwLock::new(order)));
            }
        }
        self.dirty_orders.lock().unwrap().insert(id);
    }

    /// Registers an already-resolved shared order handle as dirty, without
    /// re-inserting it (used when the engine mutates an order in place via
    /// its existing `Arc<RwLock<Order>>`).
    pub fn mark_order_dirty(&self, id: OrderId) {
        self.dirty_orders.lock().unwrap().insert(id);
    }

    /// Marks `market_id`'s book dirty; no copy is made (`spec.md` §4.4
    /// `mark_book_dirty`).
    pub fn mark_book_dirty(&self, market_id: &str) {
        self.dirty_books.lock().unwrap().insert(market_id.to_string());
    }

    /// Queues `trade` for persistence at the next flush.
    pub fn add_trade(&self, trade: Trade) {
        self.pending_trades.lock().unwrap().push(trade);
    }

    /// In a single pass: writes every dirty book snapshot, every dirty
    /// order, and every queued trade, then clears all dirty state
    /// (`spec.md` §4.4 `flush`). Idempotent — calling flush twice with no
    /// intervening mutation is a no-op the second time.
    pub fn flush(&self, keeper: &Keeper) -> Result<(), KvError> {
        let dirty_books = std::mem::take(&mut *self.dirty_books.lock().unwrap());
        for market_id in &dirty_books {
            if let Some(book) = self.books.get(market_id) {
                keeper.put_book_snapshot(&book.to_snapshot())?;
            }
        }
        let dirty_orders = std::mem::take(&mut *self.dirty_orders.lock().unwrap());
        for id in &dirty_orders {
            if let Some(order) = self.orders.get(id) {
                keeper.put_order(&order.value().read().unwrap())?;
            }
        }
        let trades = std::mem::take(&mut *self.pending_trades.lock().unwrap());
        for trade in &trades {
            keeper.put_trade(trade)?;
        }
        Ok(())
    }

    /// Discards all cached state (`spec.md` §4.4 `clear`, used by the
    /// scheduler between tasks so a fresh [`Cache`] need not be
    /// reallocated).
    pub fn clear(&self) {
        self.books.clear();
        self.orders.clear();
        self.dirty_books.lock().unwrap().clear();
        self.dirty_orders.lock().unwrap().clear();
        self.pending_trades.lock().unwrap().clear();
    }
}
