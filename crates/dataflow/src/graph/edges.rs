use std::hash::Hash;

use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};

use crate::symbol::SymbolId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SliceKind {
    /// Inferred from syntax before execution
    Static,
    /// Observed from trace events
    Dynamic,
}

/// Selects one of the four edge-map slots of a node.
///
/// Dangling slots hold edges to node versions that were already superseded
/// when the edge was recorded; slicing only follows non-dangling edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EdgeContext {
    pub kind: SliceKind,
    pub dangling: bool,
}

impl EdgeContext {
    pub const fn current(kind: SliceKind) -> Self {
        Self {
            kind,
            dangling: false,
        }
    }

    pub const fn dangling(kind: SliceKind) -> Self {
        Self {
            kind,
            dangling: true,
        }
    }

    const fn slot(self) -> usize {
        let kind = match self.kind {
            SliceKind::Static => 0,
            SliceKind::Dynamic => 1,
        };
        kind * 2 + self.dangling as usize
    }
}

/// Node key to the symbols carried by the edge
pub type EdgeMap<K> = FxHashMap<K, FxHashSet<SymbolId>>;

#[derive(Debug, Clone)]
struct EdgeSlot<K> {
    parents: EdgeMap<K>,
    children: EdgeMap<K>,
}

impl<K> Default for EdgeSlot<K> {
    fn default() -> Self {
        Self {
            parents: FxHashMap::default(),
            children: FxHashMap::default(),
        }
    }
}

/// Parent and child edges of one node version, per [`EdgeContext`]
#[derive(Debug, Clone)]
pub struct EdgeMaps<K> {
    slots: [EdgeSlot<K>; 4],
}

impl<K> Default for EdgeMaps<K> {
    fn default() -> Self {
        Self {
            slots: Default::default(),
        }
    }
}

impl<K: Eq + Hash> EdgeMaps<K> {
    pub fn parents(&self, ctx: EdgeContext) -> &EdgeMap<K> {
        &self.slots[ctx.slot()].parents
    }

    pub fn children(&self, ctx: EdgeContext) -> &EdgeMap<K> {
        &self.slots[ctx.slot()].children
    }

    pub(crate) fn parents_mut(&mut self, ctx: EdgeContext) -> &mut EdgeMap<K> {
        &mut self.slots[ctx.slot()].parents
    }

    pub(crate) fn children_mut(&mut self, ctx: EdgeContext) -> &mut EdgeMap<K> {
        &mut self.slots[ctx.slot()].children
    }

    /// Drop every dangling edge of both kinds, leaving current edges alone
    pub(crate) fn clear_dangling(&mut self) {
        for kind in [SliceKind::Static, SliceKind::Dynamic] {
            let slot = &mut self.slots[EdgeContext::dangling(kind).slot()];
            slot.parents.clear();
            slot.children.clear();
        }
    }
}

/// Union `syms` into the entry for `key`
pub(crate) fn extend_edge<K: Eq + Hash>(
    map: &mut EdgeMap<K>,
    key: K,
    syms: impl IntoIterator<Item = SymbolId>,
) {
    map.entry(key).or_default().extend(syms);
}

/// Remove `syms` from the entry for `key`, dropping it once empty
pub(crate) fn shrink_edge<K: Eq + Hash>(map: &mut EdgeMap<K>, key: &K, syms: &FxHashSet<SymbolId>) {
    if let Some(existing) = map.get_mut(key) {
        existing.retain(|sym| !syms.contains(sym));
        if existing.is_empty() {
            map.remove(key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slots_are_distinct() {
        let mut edges: EdgeMaps<&str> = EdgeMaps::default();
        extend_edge(
            edges.parents_mut(EdgeContext::current(SliceKind::Static)),
            "a",
            [SymbolId::new(0)],
        );
        extend_edge(
            edges.parents_mut(EdgeContext::dangling(SliceKind::Dynamic)),
            "b",
            [SymbolId::new(1)],
        );
        assert!(edges.parents(EdgeContext::current(SliceKind::Static)).contains_key("a"));
        assert!(edges.parents(EdgeContext::current(SliceKind::Dynamic)).is_empty());
        assert!(edges.parents(EdgeContext::dangling(SliceKind::Static)).is_empty());
        assert!(edges.parents(EdgeContext::dangling(SliceKind::Dynamic)).contains_key("b"));
    }

    #[test]
    fn test_shrink_drops_empty_entries() {
        let mut map: EdgeMap<&str> = EdgeMap::default();
        extend_edge(&mut map, "a", [SymbolId::new(0), SymbolId::new(1)]);
        shrink_edge(&mut map, &"a", &[SymbolId::new(0)].into_iter().collect());
        assert_eq!(map["a"].len(), 1);
        shrink_edge(&mut map, &"a", &[SymbolId::new(1)].into_iter().collect());
        assert!(map.is_empty());
    }
}
