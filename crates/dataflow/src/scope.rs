//! # Scopes and namespaces
//!
//! Scopes hold the symbols bound in them. The global scope is created with the
//! table, a function gets a local scope the first time it is defined, and a
//! namespace scope holds the attributes and constant subscripts of one value.

use std::fmt;

use rustc_hash::FxHashMap;

use crate::symbol::{SymbolId, SymbolKey, ValueId};

index_vec::define_index_type! {
    /// A unique ID for a scope or namespace within a session
    pub struct ScopeId = usize;

    MAX_INDEX = usize::MAX;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    Global,
    /// Locals of the function bound to `function`
    Function { function: SymbolId },
    /// Members of the value `value`
    Namespace { value: ValueId },
}

impl fmt::Display for ScopeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Global => write!(f, "global"),
            Self::Function { function } => write!(f, "function ({})", function.index()),
            Self::Namespace { value } => write!(f, "namespace ({value})"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Scope {
    /// Enclosing scope for name lookup; namespaces have none
    pub parent: Option<ScopeId>,
    pub kind: ScopeKind,
    symbols: FxHashMap<SymbolKey, SymbolId>,
}

impl Scope {
    pub fn new(parent: Option<ScopeId>, kind: ScopeKind) -> Self {
        Self {
            parent,
            kind,
            symbols: FxHashMap::default(),
        }
    }

    pub fn get(&self, key: &SymbolKey) -> Option<SymbolId> {
        self.symbols.get(key).copied()
    }

    pub(crate) fn insert(&mut self, key: SymbolKey, symbol: SymbolId) -> Option<SymbolId> {
        self.symbols.insert(key, symbol)
    }

    pub(crate) fn remove(&mut self, key: &SymbolKey) -> Option<SymbolId> {
        self.symbols.remove(key)
    }

    pub fn symbols(&self) -> impl Iterator<Item = (&SymbolKey, SymbolId)> {
        self.symbols.iter().map(|(key, id)| (key, *id))
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    pub const fn is_namespace(&self) -> bool {
        matches!(self.kind, ScopeKind::Namespace { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_insert_and_remove() {
        let mut scope = Scope::new(None, ScopeKind::Global);
        let key = SymbolKey::Name("x".into());
        assert_eq!(scope.insert(key.clone(), SymbolId::new(0)), None);
        assert_eq!(scope.insert(key.clone(), SymbolId::new(3)), Some(SymbolId::new(0)));
        assert_eq!(scope.get(&key), Some(SymbolId::new(3)));
        scope.remove(&key);
        assert!(scope.is_empty());
    }

    #[test]
    fn test_kind_display() {
        let kind = ScopeKind::Namespace { value: ValueId(7) };
        assert_eq!(kind.to_string(), "namespace (#7)");
    }
}
