//! Snapshot cache: latest full snapshot per symbol, overwrite-only.

use crate::domain::orderbook::wire::OrderBookSnapshot;
use crate::shared::Symbol;
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Latest order book snapshot per symbol.
///
/// Written only by the channel's event loop; any handle may read. Reads return
/// an owned copy so later overwrites never change what a caller already holds.
/// There is no merging and no sequence tracking: `insert` replaces wholesale.
#[derive(Debug, Default)]
pub struct SnapshotCache {
    books: RwLock<HashMap<Symbol, OrderBookSnapshot>>,
}

impl SnapshotCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the latest snapshot for `symbol`, or `None` if absent.
    pub fn get(&self, symbol: &str) -> Option<OrderBookSnapshot> {
        self.read().get(symbol).cloned()
    }

    /// Store `snapshot` under its own symbol, returning the replaced entry.
    pub fn insert(&self, snapshot: OrderBookSnapshot) -> Option<OrderBookSnapshot> {
        self.write().insert(snapshot.symbol.clone(), snapshot)
    }

    pub fn remove(&self, symbol: &str) -> Option<OrderBookSnapshot> {
        self.write().remove(symbol)
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.read().contains_key(symbol)
    }

    pub fn clear(&self) {
        self.write().clear();
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Symbols currently cached, sorted.
    pub fn symbols(&self) -> Vec<Symbol> {
        let mut symbols: Vec<_> = self.read().keys().cloned().collect();
        symbols.sort();
        symbols
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<Symbol, OrderBookSnapshot>> {
        self.books.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<Symbol, OrderBookSnapshot>> {
        self.books.write().unwrap_or_else(PoisonError::into_inner)
    }
}
