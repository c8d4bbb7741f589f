//! Value identity to the symbols currently bound to it.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::symbol::{SymbolId, ValueId};

/// Index of aliases: every symbol bound to a value.
///
/// Buckets are dropped as soon as they become empty, so a value is present
/// iff at least one symbol refers to it.
#[derive(Debug, Clone, Default)]
pub struct AliasIndex {
    by_value: FxHashMap<ValueId, FxHashSet<SymbolId>>,
}

impl AliasIndex {
    pub fn add(&mut self, value: ValueId, symbol: SymbolId) {
        self.by_value.entry(value).or_default().insert(symbol);
    }

    pub fn remove(&mut self, value: ValueId, symbol: SymbolId) {
        if let Some(bucket) = self.by_value.get_mut(&value) {
            bucket.remove(&symbol);
            if bucket.is_empty() {
                self.by_value.remove(&value);
            }
        }
    }

    pub fn aliases(&self, value: ValueId) -> impl Iterator<Item = SymbolId> + '_ {
        self.by_value.get(&value).into_iter().flatten().copied()
    }

    pub fn has_aliases(&self, value: ValueId) -> bool {
        self.by_value.contains_key(&value)
    }
}
