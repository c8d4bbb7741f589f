//! # Symbols
//!
//! A symbol is a tracked binding: a global or local name, an attribute of a
//! namespace, or a constant subscript entry. Each symbol remembers when it was
//! last produced and which versions of it were consumed, and by whom.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use bitflags::bitflags;
use cellflow_analysis::{Atom, AtomKind};
use cellflow_parser::FunctionDef;
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};

use crate::scope::ScopeId;
use crate::timestamp::Timestamp;

index_vec::define_index_type! {
    /// A unique ID for a symbol within a session
    pub struct SymbolId = usize;

    MAX_INDEX = usize::MAX;
}

/// Identity of a runtime value, as reported by the instrumentation layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ValueId(pub u64);

impl fmt::Display for ValueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// How a symbol is addressed inside its scope or namespace
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SymbolKey {
    /// A variable or an attribute
    Name(String),
    Int(i64),
    Str(String),
}

impl SymbolKey {
    /// The key a reference atom addresses, if it is statically known
    pub fn from_atom(atom: &Atom) -> Option<Self> {
        match &atom.kind {
            AtomKind::Name(name) | AtomKind::Attribute(name) => Some(Self::Name(name.clone())),
            AtomKind::IntSubscript(i) => Some(Self::Int(*i)),
            AtomKind::StrSubscript(key) => Some(Self::Str(key.clone())),
            AtomKind::DynamicSubscript => None,
        }
    }
}

impl fmt::Display for SymbolKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Name(name) => write!(f, "{name}"),
            Self::Int(i) => write!(f, "[{i}]"),
            Self::Str(key) => write!(f, "[{key:?}]"),
        }
    }
}

bitflags! {
    #[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SymbolFlags: u8 {
        /// Bound by a `def` statement
        const FUNCTION = 1 << 0;
        /// Bound by an `import` statement
        const IMPORT = 1 << 1;
        /// Read through a `$` reference at least once
        const REACTIVE = 1 << 2;
        /// Deleted or unreachable; kept only so ids stay valid
        const GARBAGE = 1 << 3;
    }
}

/// The definition behind a function symbol, kept for call-chain analysis
#[derive(Debug, Clone)]
pub struct FunctionInfo {
    pub def: FunctionDef,
    /// Scope holding the function's locals; its parent is the defining scope
    pub local_scope: ScopeId,
}

#[derive(Debug, Clone)]
pub struct Symbol {
    pub key: SymbolKey,
    /// Scope or namespace the symbol lives in
    pub scope: ScopeId,
    pub value: ValueId,
    pub flags: SymbolFlags,
    timestamp: Timestamp,
    /// Symbols this one was computed from
    pub parents: FxHashSet<SymbolId>,
    /// Symbols computed from this one
    pub children: FxHashSet<SymbolId>,
    /// Updates of ancestors that happened after this symbol was last produced
    pub fresher_ancestors: BTreeSet<Timestamp>,
    /// Version consumed at each point of use during execution
    pub timestamp_by_used_time: BTreeMap<Timestamp, Timestamp>,
    /// Version each cell analysis saw as live at a given point
    pub timestamp_by_liveness_time: BTreeMap<Timestamp, Timestamp>,
    pub function: Option<FunctionInfo>,
}

impl Symbol {
    pub fn new(key: SymbolKey, scope: ScopeId, value: ValueId, timestamp: Timestamp) -> Self {
        Self {
            key,
            scope,
            value,
            flags: SymbolFlags::empty(),
            timestamp,
            parents: FxHashSet::default(),
            children: FxHashSet::default(),
            fresher_ancestors: BTreeSet::new(),
            timestamp_by_used_time: BTreeMap::new(),
            timestamp_by_liveness_time: BTreeMap::new(),
            function: None,
        }
    }

    /// When this symbol itself was last produced, ignoring namespace members
    pub const fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    /// Advance the symbol to `ts`.
    ///
    /// Timestamps only move forward; returns false (and changes nothing) when
    /// `ts` is not newer than the current one.
    pub fn bump(&mut self, ts: Timestamp) -> bool {
        if ts <= self.timestamp {
            return false;
        }
        self.timestamp = ts;
        self.fresher_ancestors.retain(|ancestor_ts| *ancestor_ts > ts);
        true
    }

    pub fn is_function(&self) -> bool {
        self.flags.contains(SymbolFlags::FUNCTION)
    }

    pub fn is_garbage(&self) -> bool {
        self.flags.contains(SymbolFlags::GARBAGE)
    }

    /// Stale: some ancestor changed after this symbol was produced
    pub fn is_waiting(&self) -> bool {
        !self.fresher_ancestors.is_empty()
    }

    /// Under in-order flow only ancestor updates coming from cells above
    /// `position` count. `position_of_counter` maps a cell counter to the
    /// position of the cell that ran with it.
    pub fn is_waiting_at_position(
        &self,
        position: i64,
        position_of_counter: impl Fn(i64) -> Option<i64>,
    ) -> bool {
        self.fresher_ancestors.iter().any(|ts| {
            position_of_counter(ts.cell_counter).map_or(true, |ancestor_pos| ancestor_pos < position)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn symbol(ts: Timestamp) -> Symbol {
        Symbol::new(SymbolKey::Name("x".into()), ScopeId::new(0), ValueId(1), ts)
    }

    #[test]
    fn test_bump_is_monotonic() {
        let mut sym = symbol(Timestamp::new(2, 0));
        assert!(!sym.bump(Timestamp::new(1, 3)));
        assert!(!sym.bump(Timestamp::new(2, 0)));
        assert!(sym.bump(Timestamp::new(2, 1)));
        assert_eq!(sym.timestamp(), Timestamp::new(2, 1));
    }

    #[test]
    fn test_bump_clears_older_fresher_ancestors() {
        let mut sym = symbol(Timestamp::new(1, 0));
        sym.fresher_ancestors.insert(Timestamp::new(2, 0));
        sym.fresher_ancestors.insert(Timestamp::new(5, 0));
        assert!(sym.is_waiting());
        sym.bump(Timestamp::new(3, 0));
        assert_eq!(sym.fresher_ancestors.len(), 1);
        sym.bump(Timestamp::new(6, 0));
        assert!(!sym.is_waiting());
    }

    #[test]
    fn test_waiting_at_position_ignores_later_cells() {
        let mut sym = symbol(Timestamp::new(1, 0));
        sym.fresher_ancestors.insert(Timestamp::new(4, 0));
        // counter 4 ran in the cell at position 3
        let positions = |counter: i64| (counter == 4).then_some(3);
        assert!(sym.is_waiting_at_position(5, positions));
        assert!(!sym.is_waiting_at_position(3, positions));
        assert!(!sym.is_waiting_at_position(0, positions));
    }

    #[test]
    fn test_key_display() {
        assert_eq!(SymbolKey::Name("a".into()).to_string(), "a");
        assert_eq!(SymbolKey::Int(-1).to_string(), "[-1]");
        assert_eq!(SymbolKey::Str("k".into()).to_string(), "[\"k\"]");
    }
}
