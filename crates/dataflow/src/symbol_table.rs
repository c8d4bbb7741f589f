//! # Symbol table
//!
//! Arena of every symbol and scope of a session, plus the namespace and alias
//! indices. All symbol mutation goes through here so that alias membership,
//! dependency edges and staleness stay consistent.

use cellflow_analysis::{Atom, SymbolRef};
use cellflow_parser::FunctionDef;
use index_vec::IndexVec;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::alias::AliasIndex;
use crate::scope::{Scope, ScopeId, ScopeKind};
use crate::symbol::{FunctionInfo, Symbol, SymbolFlags, SymbolId, SymbolKey, ValueId};
use crate::timestamp::Timestamp;

/// Outcome of resolving one step of a reference chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub symbol: SymbolId,
    /// The atom following `symbol` in the chain, when resolution stopped early
    pub next: Option<Atom>,
    /// Whether `symbol` is called at this point of the chain
    pub is_called: bool,
    /// The whole chain resolved down to `symbol`
    pub success: bool,
}

#[derive(Debug, Clone)]
pub struct SymbolTable {
    symbols: IndexVec<SymbolId, Symbol>,
    scopes: IndexVec<ScopeId, Scope>,
    global: ScopeId,
    namespaces: FxHashMap<ValueId, ScopeId>,
    aliases: AliasIndex,
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}

impl SymbolTable {
    pub fn new() -> Self {
        let mut scopes = IndexVec::new();
        let global = scopes.push(Scope::new(None, ScopeKind::Global));
        Self {
            symbols: IndexVec::new(),
            scopes,
            global,
            namespaces: FxHashMap::default(),
            aliases: AliasIndex::default(),
        }
    }

    pub const fn global_scope(&self) -> ScopeId {
        self.global
    }

    pub fn symbol(&self, id: SymbolId) -> &Symbol {
        &self.symbols[id]
    }

    pub(crate) fn symbol_mut(&mut self, id: SymbolId) -> &mut Symbol {
        &mut self.symbols[id]
    }

    pub fn scope(&self, id: ScopeId) -> &Scope {
        &self.scopes[id]
    }

    /// Every symbol that has not been collected
    pub fn live_symbols(&self) -> impl Iterator<Item = (SymbolId, &Symbol)> {
        self.symbols
            .iter_enumerated()
            .filter(|(_, symbol)| !symbol.is_garbage())
    }

    pub fn aliases(&self, value: ValueId) -> impl Iterator<Item = SymbolId> + '_ {
        self.aliases.aliases(value)
    }

    pub fn namespace(&self, value: ValueId) -> Option<ScopeId> {
        self.namespaces.get(&value).copied()
    }

    fn namespace_or_create(&mut self, value: ValueId) -> ScopeId {
        if let Some(ns) = self.namespaces.get(&value) {
            return *ns;
        }
        let ns = self
            .scopes
            .push(Scope::new(None, ScopeKind::Namespace { value }));
        self.namespaces.insert(value, ns);
        ns
    }

    /// Look a name up in `scope` and then in its enclosing scopes
    pub fn lookup(&self, scope: ScopeId, name: &str) -> Option<SymbolId> {
        let key = SymbolKey::Name(name.to_string());
        let mut current = Some(scope);
        while let Some(scope_id) = current {
            let scope = &self.scopes[scope_id];
            if let Some(id) = scope.get(&key) {
                return Some(id);
            }
            current = scope.parent;
        }
        None
    }

    fn member(&self, owner: SymbolId, atom: &Atom) -> Option<SymbolId> {
        let key = SymbolKey::from_atom(atom)?;
        let ns = self.namespace(self.symbols[owner].value)?;
        self.scopes[ns].get(&key)
    }

    /// Resolve `reference` as far as possible, yielding every symbol along the
    /// chain. Resolution stops at the first callpoint, since whatever follows
    /// belongs to the call's result.
    pub fn resolve_chain(&self, scope: ScopeId, reference: &SymbolRef) -> Vec<Resolution> {
        let mut resolved = Vec::new();
        let chain = reference.chain();
        let Some(mut current) = self.lookup(scope, reference.root_name()) else {
            return resolved;
        };
        for (i, atom) in chain.iter().enumerate() {
            let next = chain.get(i + 1);
            if atom.is_callpoint || next.is_none() {
                resolved.push(Resolution {
                    symbol: current,
                    next: next.cloned(),
                    is_called: atom.is_callpoint,
                    success: next.is_none(),
                });
                break;
            }
            let Some(next) = next else { break };
            resolved.push(Resolution {
                symbol: current,
                next: Some(next.clone()),
                is_called: false,
                success: false,
            });
            match self.member(current, next) {
                Some(member) => current = member,
                None => break,
            }
        }
        resolved
    }

    /// The most specific symbol `reference` resolves to
    pub fn resolve(&self, scope: ScopeId, reference: &SymbolRef) -> Option<Resolution> {
        self.resolve_chain(scope, reference).pop()
    }

    /// The symbol `reference` names exactly, if the whole chain resolves
    pub fn resolve_symbol(&self, scope: ScopeId, reference: &SymbolRef) -> Option<SymbolId> {
        self.resolve(scope, reference)
            .filter(|resolution| resolution.success)
            .map(|resolution| resolution.symbol)
    }

    /// Where a store to `target` binds: the scope itself for plain names, the
    /// owner's namespace for attributes and constant subscripts.
    ///
    /// Returns `None` when the owner does not resolve or the key is dynamic.
    pub fn resolve_target(
        &mut self,
        scope: ScopeId,
        target: &SymbolRef,
    ) -> Option<(ScopeId, SymbolKey)> {
        let chain = target.chain();
        let (last, owner_chain) = chain.split_last()?;
        let key = SymbolKey::from_atom(last)?;
        if owner_chain.is_empty() {
            return Some((scope, key));
        }
        let owner_ref = target.prefixes().pop()?;
        let owner = self.resolve_symbol(scope, &owner_ref)?;
        let ns = self.namespace_or_create(self.symbols[owner].value);
        Some((ns, key))
    }

    /// Bind `key` in `scope` to `value`, produced at `ts` from `deps`.
    ///
    /// `flags` replaces the symbol's kind flags; the reactive marker survives
    /// rebinding.
    pub fn upsert(
        &mut self,
        scope: ScopeId,
        key: SymbolKey,
        value: ValueId,
        flags: SymbolFlags,
        deps: &FxHashSet<SymbolId>,
        ts: Timestamp,
    ) -> SymbolId {
        let id = match self.scopes[scope].get(&key) {
            Some(id) => {
                let old_value = self.symbols[id].value;
                if old_value != value {
                    self.aliases.remove(old_value, id);
                    self.aliases.add(value, id);
                    self.symbols[id].value = value;
                }
                id
            }
            None => {
                let id = self.symbols.push(Symbol::new(
                    key.clone(),
                    scope,
                    value,
                    Timestamp::UNINITIALIZED,
                ));
                self.scopes[scope].insert(key, id);
                self.aliases.add(value, id);
                id
            }
        };

        let symbol = &mut self.symbols[id];
        symbol.flags = (symbol.flags & SymbolFlags::REACTIVE) | flags;
        if !flags.contains(SymbolFlags::FUNCTION) {
            symbol.function = None;
        }

        self.set_parents(id, deps);
        if self.symbols[id].bump(ts) {
            self.propagate_update(id, ts);
        }
        tracing::trace!("upsert {} at {ts}", self.display_name(id));
        id
    }

    /// In-place change of the value bound to `id`
    pub fn mutate(&mut self, id: SymbolId, deps: &FxHashSet<SymbolId>, ts: Timestamp) {
        for dep in deps.iter().copied().filter(|dep| *dep != id) {
            self.symbols[id].parents.insert(dep);
            self.symbols[dep].children.insert(id);
        }
        if self.symbols[id].bump(ts) {
            self.propagate_update(id, ts);
        }
    }

    /// Re-stamp `id` as fresh at `ts`, forgetting any staleness
    pub fn refresh(&mut self, id: SymbolId, ts: Timestamp) {
        let symbol = &mut self.symbols[id];
        symbol.bump(ts);
        symbol.fresher_ancestors.clear();
    }

    /// Unbind `id` and flag it as garbage
    pub fn delete(&mut self, id: SymbolId) {
        let symbol = &self.symbols[id];
        let (scope, key, value) = (symbol.scope, symbol.key.clone(), symbol.value);
        if self.scopes[scope].get(&key) == Some(id) {
            self.scopes[scope].remove(&key);
        }
        self.aliases.remove(value, id);
        let parents: Vec<SymbolId> = self.symbols[id].parents.drain().collect();
        for parent in parents {
            self.symbols[parent].children.remove(&id);
        }
        self.symbols[id].flags.insert(SymbolFlags::GARBAGE);
    }

    /// Attach a function definition to `id`, giving it a fresh local scope
    /// nested in `defining_scope`
    pub fn define_function(&mut self, id: SymbolId, def: FunctionDef, defining_scope: ScopeId) {
        let local_scope = self.scopes.push(Scope::new(
            Some(defining_scope),
            ScopeKind::Function { function: id },
        ));
        let symbol = &mut self.symbols[id];
        symbol.flags.insert(SymbolFlags::FUNCTION);
        symbol.function = Some(FunctionInfo { def, local_scope });
    }

    fn set_parents(&mut self, id: SymbolId, deps: &FxHashSet<SymbolId>) {
        let old: Vec<SymbolId> = self.symbols[id].parents.drain().collect();
        for parent in old {
            self.symbols[parent].children.remove(&id);
        }
        for dep in deps.iter().copied().filter(|dep| *dep != id) {
            self.symbols[id].parents.insert(dep);
            self.symbols[dep].children.insert(id);
        }
    }

    /// Symbols whose namespace holds `id`, transitively
    fn owners(&self, id: SymbolId) -> Vec<SymbolId> {
        let mut owners = Vec::new();
        let mut seen = FxHashSet::default();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            if let ScopeKind::Namespace { value } = self.scopes[self.symbols[current].scope].kind {
                if !seen.insert(value) {
                    continue;
                }
                for owner in self.aliases.aliases(value) {
                    owners.push(owner);
                    stack.push(owner);
                }
            }
        }
        owners
    }

    /// Mark every symbol derived from `origin`, or from a value containing it,
    /// as having a fresher ancestor at `ts`
    fn propagate_update(&mut self, origin: SymbolId, ts: Timestamp) {
        let mut seen: FxHashSet<SymbolId> = FxHashSet::default();
        seen.insert(origin);
        let mut stack: Vec<SymbolId> = Vec::new();
        for source in std::iter::once(origin).chain(self.owners(origin)) {
            stack.extend(self.symbols[source].children.iter().copied());
        }
        while let Some(current) = stack.pop() {
            if !seen.insert(current) {
                continue;
            }
            let symbol = &mut self.symbols[current];
            if symbol.is_garbage() || symbol.timestamp() >= ts {
                continue;
            }
            symbol.fresher_ancestors.insert(ts);
            stack.extend(symbol.children.iter().copied());
        }
    }

    /// Latest update of `id` or of anything reachable through its namespace
    pub fn deep_timestamp(&self, id: SymbolId) -> Timestamp {
        let mut latest = self.symbols[id].timestamp();
        let mut seen = FxHashSet::default();
        let mut stack = vec![self.symbols[id].value];
        while let Some(value) = stack.pop() {
            if !seen.insert(value) {
                continue;
            }
            let Some(ns) = self.namespace(value) else {
                continue;
            };
            for (_, member) in self.scopes[ns].symbols() {
                let member = &self.symbols[member];
                latest = latest.max(member.timestamp());
                stack.push(member.value);
            }
        }
        latest
    }

    /// Whether `id` can be reached from the global scope
    pub fn is_globally_accessible(&self, id: SymbolId) -> bool {
        let mut seen = FxHashSet::default();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            let symbol = &self.symbols[current];
            if symbol.is_garbage() {
                continue;
            }
            match self.scopes[symbol.scope].kind {
                ScopeKind::Global => return true,
                ScopeKind::Function { .. } => {}
                ScopeKind::Namespace { value } => {
                    if seen.insert(value) {
                        stack.extend(self.aliases.aliases(value));
                    }
                }
            }
        }
        false
    }

    /// Collect the members of namespaces whose value lost its last alias.
    ///
    /// Runs to a fixed point, since collecting a member can orphan the
    /// namespace of the member's own value.
    pub fn gc(&mut self) -> Vec<SymbolId> {
        let mut collected = Vec::new();
        loop {
            let orphaned: Vec<(ValueId, ScopeId)> = self
                .namespaces
                .iter()
                .filter(|(value, _)| !self.aliases.has_aliases(**value))
                .map(|(value, ns)| (*value, *ns))
                .collect();
            if orphaned.is_empty() {
                break;
            }
            for (value, ns) in orphaned {
                self.namespaces.remove(&value);
                let members: Vec<SymbolId> = self.scopes[ns].symbols().map(|(_, id)| id).collect();
                for member in members {
                    self.delete(member);
                    collected.push(member);
                }
            }
        }
        if !collected.is_empty() {
            tracing::debug!("collected {} unreachable symbol(s)", collected.len());
        }
        collected
    }

    /// Human-readable path of a symbol, e.g. `df.cols[0]`
    pub fn display_name(&self, id: SymbolId) -> String {
        let mut parts = Vec::new();
        let mut seen = FxHashSet::default();
        let mut current = id;
        loop {
            let symbol = &self.symbols[current];
            parts.push(&symbol.key);
            let ScopeKind::Namespace { value } = self.scopes[symbol.scope].kind else {
                break;
            };
            let owner = self.aliases.aliases(value).min();
            match owner {
                Some(owner) if seen.insert(owner) => current = owner,
                _ => break,
            }
        }
        let mut name = String::new();
        for (i, key) in parts.iter().rev().enumerate() {
            if i > 0 && matches!(key, SymbolKey::Name(_)) {
                name.push('.');
            }
            name.push_str(&key.to_string());
        }
        name
    }
}
