//! # Live symbol resolution
//!
//! Turns the analyzer's live and dead references into concrete symbols and
//! the versions they were seen at. Calls to tracked functions are followed
//! into the function bodies, up to the configured call depth, so that a cell
//! calling `f()` also depends on the globals `f` reads.

use std::collections::{BTreeSet, VecDeque};

use cellflow_analysis::{
    compute_live_dead_refs, AtomKind, LivenessOptions, LivenessResult, RebindOracle, SymbolRef,
};
use cellflow_diagnostics::Diagnostic;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::scope::ScopeId;
use crate::settings::Settings;
use crate::symbol::SymbolId;
use crate::symbol_table::{Resolution, SymbolTable};
use crate::timestamp::Timestamp;

/// A live reference resolved to a symbol version
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LiveSymbol {
    pub symbol: SymbolId,
    /// Version seen: deep or shallow depending on `is_deep`
    pub timestamp: Timestamp,
    /// Whether namespace members count as read too
    pub is_deep: bool,
    pub is_reactive: bool,
    pub stmt_index: usize,
}

/// The version of `symbol` a cell analysis saw at `liveness_time`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LivenessVersion {
    pub symbol: SymbolId,
    pub liveness_time: Timestamp,
    pub timestamp: Timestamp,
}

#[derive(Debug, Clone, Default)]
pub struct CheckerResult {
    pub live: BTreeSet<LiveSymbol>,
    pub dead: BTreeSet<SymbolId>,
    /// Counters of the cells that defined the functions this cell calls
    pub live_cells: BTreeSet<i64>,
    pub liveness_versions: Vec<LivenessVersion>,
    pub diagnostics: Vec<Diagnostic>,
}

/// Body liveness per function version
pub(crate) type CallChainMemo = FxHashMap<(SymbolId, Timestamp), LivenessResult>;

/// Answers rebind questions from the session's symbols: `a = b` does not make
/// `b` live when `a` already holds `b`'s value or is newer than it.
pub(crate) struct SymbolRebindOracle<'a> {
    pub symbols: &'a SymbolTable,
    pub scope: ScopeId,
}

impl RebindOracle for SymbolRebindOracle<'_> {
    fn suppress_rebind(&self, target: &SymbolRef, source: &SymbolRef) -> bool {
        let lhs = self.symbols.resolve_symbol(self.scope, target);
        let rhs = self.symbols.resolve_symbol(self.scope, source);
        let (Some(lhs), Some(rhs)) = (lhs, rhs) else {
            return false;
        };
        let (lhs_symbol, rhs_symbol) = (self.symbols.symbol(lhs), self.symbols.symbol(rhs));
        lhs_symbol.value == rhs_symbol.value
            || lhs_symbol.timestamp() > self.symbols.deep_timestamp(rhs)
    }
}

pub(crate) struct Resolver<'a> {
    pub symbols: &'a SymbolTable,
    pub settings: &'a Settings,
    pub memo: &'a mut CallChainMemo,
}

impl Resolver<'_> {
    /// Resolve a cell's liveness result in the global scope. With
    /// `record_versions`, every symbol along each live chain is recorded with
    /// the version it had at the cell's `counter`.
    pub fn resolve_cell(
        &mut self,
        liveness: &LivenessResult,
        counter: i64,
        record_versions: bool,
    ) -> CheckerResult {
        let scope = self.symbols.global_scope();
        let mut result = CheckerResult {
            diagnostics: liveness.diagnostics.clone(),
            ..Default::default()
        };
        let mut called: VecDeque<(SymbolId, usize, usize)> = VecDeque::new();

        for live_ref in &liveness.live {
            let liveness_time = Timestamp::new(counter, live_ref.stmt_index as i64);
            let chain = self.symbols.resolve_chain(scope, &live_ref.reference);
            if record_versions {
                for step in &chain {
                    let timestamp = if step.success {
                        self.symbols.deep_timestamp(step.symbol)
                    } else {
                        self.symbols.symbol(step.symbol).timestamp()
                    };
                    if timestamp.is_initialized() {
                        result.liveness_versions.push(LivenessVersion {
                            symbol: step.symbol,
                            liveness_time,
                            timestamp,
                        });
                    }
                }
            }
            let Some(resolution) = chain.last() else {
                tracing::trace!("`{}` does not resolve", live_ref.reference);
                continue;
            };
            if resolution.is_called {
                called.push_back((resolution.symbol, live_ref.stmt_index, 1));
            }
            if let Some(live) =
                self.live_symbol(resolution, live_ref.reference.is_reactive(), live_ref.stmt_index)
            {
                result.live.insert(live);
            }
        }

        self.follow_calls(called, counter, record_versions, &mut result);

        for dead_ref in &liveness.dead {
            if let Some(symbol) = self.symbols.resolve_symbol(scope, dead_ref) {
                result.dead.insert(symbol);
            }
        }
        result
    }

    /// Decide how a resolved reference counts as live.
    ///
    /// Fully resolved references, called values and method calls are deep. A
    /// missing member of a value that has a namespace is not live at all;
    /// without any namespace the base object is read shallowly.
    fn live_symbol(
        &self,
        resolution: &Resolution,
        is_reactive: bool,
        stmt_index: usize,
    ) -> Option<LiveSymbol> {
        let is_deep = match &resolution.next {
            None => true,
            Some(_) if resolution.is_called => true,
            Some(next) if next.is_callpoint => true,
            Some(next) if next.kind == AtomKind::DynamicSubscript => true,
            Some(_) => {
                let value = self.symbols.symbol(resolution.symbol).value;
                if self.symbols.namespace(value).is_some() {
                    return None;
                }
                false
            }
        };
        let timestamp = if is_deep {
            self.symbols.deep_timestamp(resolution.symbol)
        } else {
            self.symbols.symbol(resolution.symbol).timestamp()
        };
        Some(LiveSymbol {
            symbol: resolution.symbol,
            timestamp,
            is_deep,
            is_reactive,
            stmt_index,
        })
    }

    fn body_liveness(&mut self, function: SymbolId) -> Option<LivenessResult> {
        let symbols = self.symbols;
        let symbol = symbols.symbol(function);
        let info = symbol.function.as_ref()?;
        let liveness = self
            .memo
            .entry((function, symbol.timestamp()))
            .or_insert_with(|| {
                let params = info.def.params.iter().map(|p| p.name.value().clone());
                compute_live_dead_refs(
                    &info.def.body,
                    LivenessOptions::default().with_init_killed(params),
                )
            });
        Some(liveness.clone())
    }

    /// Walk the call chain breadth-first from the functions called directly
    /// by the cell, so each function is expanded at the shallowest depth it is
    /// reachable from. Functions are expanded once per calling statement. Only
    /// globally reachable symbols read inside a body count.
    fn follow_calls(
        &mut self,
        mut worklist: VecDeque<(SymbolId, usize, usize)>,
        counter: i64,
        record_versions: bool,
        result: &mut CheckerResult,
    ) {
        let mut seen: FxHashSet<(SymbolId, usize)> = FxHashSet::default();
        while let Some((function, stmt_index, depth)) = worklist.pop_front() {
            if depth > self.settings.max_call_depth || !seen.insert((function, stmt_index)) {
                continue;
            }
            let Some(body) = self.body_liveness(function) else {
                continue;
            };
            let symbols = self.symbols;
            let symbol = symbols.symbol(function);
            result.live_cells.insert(symbol.timestamp().cell_counter);
            let Some(local_scope) = symbol.function.as_ref().map(|info| info.local_scope) else {
                continue;
            };
            tracing::trace!(
                "following call to `{}` at depth {depth}",
                symbols.display_name(function)
            );

            for live_ref in &body.live {
                let Some(resolution) = symbols.resolve(local_scope, &live_ref.reference) else {
                    continue;
                };
                if resolution.is_called {
                    worklist.push_back((resolution.symbol, stmt_index, depth + 1));
                }
                if !symbols.is_globally_accessible(resolution.symbol) {
                    continue;
                }
                let Some(live) =
                    self.live_symbol(&resolution, live_ref.reference.is_reactive(), stmt_index)
                else {
                    continue;
                };
                if record_versions && live.timestamp.is_initialized() {
                    result.liveness_versions.push(LivenessVersion {
                        symbol: live.symbol,
                        liveness_time: Timestamp::new(counter, stmt_index as i64),
                        timestamp: live.timestamp,
                    });
                }
                result.live.insert(live);
            }
        }
    }
}
