//! External key-value store capability (`spec.md` §6.2) plus a
//! reference in-memory implementation used by tests and the scheduler's
//! isolated per-task cache layers (§4.7 "cache context").
//!
//! The production KV is the chain's committing store — out of scope per
//! `spec.md` §1. This crate only depends on the narrow [`KvStore`]
//! contract, split between the trait and a test-only in-memory backing.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, RwLock};

#[derive(Debug, Clone)]
pub struct KvError(pub String);

impl fmt::Display for KvError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "kv error: {}", self.0)
    }
}

impl std::error::Error for KvError {}

/// A key/value pair yielded by a prefix scan, in key order.
pub type KvEntry = (Vec<u8>, Vec<u8>);

/// The external committing key-value store's contract (`spec.md` §6.2).
/// `prefix_iter`/`reverse_prefix_iter` return all entries whose key starts
/// with `prefix`, in ascending/descending key order respectively — the
/// persistence keeper (C4) relies on this for its `orders_by_trader` and
/// `recent_trades_by_market` style queries.
pub trait KvStore: Send + Sync {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, KvError>;
    fn set(&self, key: &[u8], value: Vec<u8>) -> Result<(), KvError>;
    fn delete(&self, key: &[u8]) -> Result<(), KvError>;
    fn prefix_iter(&self, prefix: &[u8]) -> Result<Vec<KvEntry>, KvError>;
    fn reverse_prefix_iter(&self, prefix: &[u8]) -> Result<Vec<KvEntry>, KvError>;
}

/// A reference, process-local implementation of [`KvStore`] backed by a
/// `BTreeMap` (gives us the ordered scans for free, matching the
/// production store's prefix-scan contract without needing an external
/// service in tests).
#[derive(Default)]
pub struct MemoryKvStore {
    data: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl MemoryKvStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvStore for MemoryKvStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, KvError> {
        Ok(self.data.read().unwrap().get(key).cloned())
    }

    fn set(&self, key: &[u8], value: Vec<u8>) -> Result<(), KvError> {
        self.data.write().unwrap().insert(key.to_vec(), value);
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<(), KvError> {
        self.data.write().unwrap().remove(key);
        Ok(())
    }

    fn prefix_iter(&self, prefix: &[u8]) -> Result<Vec<KvEntry>, KvError> {
        Ok(self
            .data
            .read()
            .unwrap()
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn reverse_prefix_iter(&self, prefix: &[u8]) -> Result<Vec<KvEntry>, KvError> {
        let mut entries = self.prefix_iter(prefix)?;
        entries.reverse();
        Ok(entries)
    }
}

/// A write-isolated overlay over a base [`KvStore`] (`spec.md` §6.2
/// `cache_context`, used by the parallel scheduler §4.7 to give each
/// per-market task a private view it can commit or silently drop).
///
/// Reads fall through to the base store for keys not yet written in this
/// overlay; deletes are recorded as tombstones so a subsequent read
/// within the same context sees the delete rather than the base value.
pub struct CacheContext {
    base: Arc<dyn KvStore>,
    overlay: RwLock<BTreeMap<Vec<u8>, Option<Vec<u8>>>>,
}

impl CacheContext {
    #[must_use]
    pub fn new(base: Arc<dyn KvStore>) -> Self {
        Self {
            base,
            overlay: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, KvError> {
        if let Some(entry) = self.overlay.read().unwrap().get(key) {
            return Ok(entry.clone());
        }
        self.base.get(key)
    }

    pub fn set(&self, key: &[u8], value: Vec<u8>) -> Result<(), KvError> {
        self.overlay
            .write()
            .unwrap()
            .insert(key.to_vec(), Some(value));
        Ok(())
    }

    pub fn delete(&self, key: &[u8]) -> Result<(), KvError> {
        self.overlay.write().unwrap().insert(key.to_vec(), None);
        Ok(())
    }

    /// Merges the overlay's base-store view with pending writes for a
    /// prefix scan: base entries win unless shadowed by an overlay entry
    /// (tombstones drop the base entry entirely).
    pub fn prefix_iter(&self, prefix: &[u8]) -> Result<Vec<KvEntry>, KvError> {
        let base_entries = self.base.prefix_iter(prefix)?;
        let overlay = self.overlay.read().unwrap();
        let mut merged: BTreeMap<Vec<u8>, Vec<u8>> = base_entries.into_iter().collect();
        for (key, value) in overlay.iter() {
            if !key.starts_with(prefix) {
                continue;
            }
            match value {
                Some(v) => {
                    merged.insert(key.clone(), v.clone());
                }
                None => {
                    merged.remove(key);
                }
            }
        }
        Ok(merged.into_iter().collect())
    }

    pub fn reverse_prefix_iter(&self, prefix: &[u8]) -> Result<Vec<KvEntry>, KvError> {
        let mut entries = self.prefix_iter(prefix)?;
        entries.reverse();
        Ok(entries)
    }

    /// Applies every pending write/delete to the base store. Idempotent:
    /// calling twice re-applies the same final state.
    pub fn commit(&self) -> Result<(), KvError> {
        for (key, value) in self.overlay.read().unwrap().iter() {
            match value {
                Some(v) => self.base.set(key, v.clone())?,
                None => self.base.delete(key)?,
            }
        }
        Ok(())
    }

    /// Drops every pending write without touching the base store.
    pub fn discard(&self) {
        self.overlay.write().unwrap().clear();
    }
}

/// Constructs an isolated [`CacheContext`] over `base`, paired with the
/// commit closure described in `spec.md` §6.2 (`cache_context() ->
/// (sub_store, commit_fn)`).
#[must_use]
pub fn cache_context(base: Arc<dyn KvStore>) -> Arc<CacheContext> {
    Arc::new(CacheContext::new(base))
}

/// Lets a [`CacheContext`] stand in anywhere a [`KvStore`] is expected, so
/// a [`crate::keeper::Keeper`] can be built directly on a task-isolated
/// context (the scheduler's per-market commit unit, §4.7).
impl KvStore for CacheContext {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, KvError> {
        CacheContext::get(self, key)
    }

    fn set(&self, key: &[u8], value: Vec<u8>) -> Result<(), KvError> {
        CacheContext::set(self, key, value)
    }

    fn delete(&self, key: &[u8]) -> Result<(), KvError> {
        CacheContext::delete(self, key)
    }

    fn prefix_iter(&self, prefix: &[u8]) -> Result<Vec<KvEntry>, KvError> {
        CacheContext::prefix_iter(self, prefix)
    }

    fn reverse_prefix_iter(&self, prefix: &[u8]) -> Result<Vec<KvEntry>, KvError> {
        CacheContext::reverse_prefix_iter(self, prefix)
    }
}
