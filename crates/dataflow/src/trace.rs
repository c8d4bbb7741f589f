//! # Trace events
//!
//! The instrumentation layer reports what a running cell does as a stream of
//! [`TraceEvent`]s. Each event is stamped with the executing cell version and
//! the current statement index; loads feed the current statement's
//! dependencies and stores turn them into symbol parents.

use cellflow_analysis::SymbolRef;
use cellflow_parser::{FunctionDef, Spanned, Statement};
use serde::{Deserialize, Serialize};

use crate::error::{DataflowError, Result};
use crate::graph::SliceKind;
use crate::scope::ScopeId;
use crate::session::{Execution, Session};
use crate::symbol::{SymbolFlags, ValueId};
use crate::timestamp::Timestamp;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreKind {
    #[default]
    Plain,
    FunctionDefinition,
    Import,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceEvent {
    /// Top-level statement `index` of the executing cell starts
    StatementStarted { index: usize },
    Load { reference: SymbolRef },
    Store {
        target: SymbolRef,
        value: ValueId,
        kind: StoreKind,
    },
    /// The value bound to `target` changed in place
    Mutate { target: SymbolRef },
    Delete { target: SymbolRef },
    CallEntry { function: SymbolRef },
    CallExit,
    StatementFinished,
}

impl Execution {
    fn now(&self) -> Timestamp {
        Timestamp::new(self.counter, self.stmt_index as i64)
    }

    fn scope(&self) -> ScopeId {
        // The global frame is pushed at construction and never popped
        self.frames[self.frames.len() - 1]
    }
}

fn find_function_def<'a>(stmt: &'a Spanned<Statement>, name: &str) -> Option<&'a FunctionDef> {
    match stmt.value() {
        Statement::FunctionDef(def) if def.name.value() == name => Some(def),
        Statement::If {
            then_block,
            else_block,
            ..
        } => then_block
            .iter()
            .chain(else_block.iter().flatten())
            .find_map(|stmt| find_function_def(stmt, name)),
        Statement::For { body, .. } | Statement::While { body, .. } => {
            body.iter().find_map(|stmt| find_function_def(stmt, name))
        }
        _ => None,
    }
}

impl Session {
    /// Apply one event of the executing cell
    pub fn handle_event(&mut self, event: TraceEvent) -> Result<()> {
        let execution = self
            .execution
            .as_mut()
            .ok_or(DataflowError::NoActiveExecution)?;
        match event {
            TraceEvent::StatementStarted { index } => {
                execution.stmt_index = index;
                execution.reads.clear();
                execution.frames.truncate(1);
            }
            TraceEvent::StatementFinished => execution.reads.clear(),
            TraceEvent::Load { reference } => self.on_load(&reference),
            TraceEvent::Store {
                target,
                value,
                kind,
            } => self.on_store(&target, value, kind),
            TraceEvent::Mutate { target } => self.on_mutate(&target),
            TraceEvent::Delete { target } => self.on_delete(&target),
            TraceEvent::CallEntry { function } => self.on_call_entry(&function),
            TraceEvent::CallExit => {
                if execution.frames.len() > 1 {
                    execution.frames.pop();
                }
            }
        }
        Ok(())
    }

    pub(crate) fn execution_state(&self) -> Option<(ScopeId, Timestamp)> {
        self.execution
            .as_ref()
            .map(|execution| (execution.scope(), execution.now()))
    }

    fn on_load(&mut self, reference: &SymbolRef) {
        let Some((scope, now)) = self.execution_state() else {
            return;
        };
        let Some(resolution) = self.symbols.resolve(scope, reference) else {
            tracing::trace!("load of untracked `{reference}`");
            return;
        };
        let id = resolution.symbol;
        let is_deep = resolution.success
            || resolution.is_called
            || resolution.next.as_ref().is_some_and(|next| next.is_callpoint);
        let version = if is_deep {
            self.symbols.deep_timestamp(id)
        } else {
            self.symbols.symbol(id).timestamp()
        };
        if let Some(execution) = self.execution.as_mut() {
            execution.reads.insert(id);
        }
        let symbol = self.symbols.symbol_mut(id);
        if reference.is_reactive() {
            symbol.flags.insert(SymbolFlags::REACTIVE);
        }
        if !version.is_initialized() {
            return;
        }
        symbol.timestamp_by_used_time.insert(now, version);
        if self.settings.dynamic_slicing_enabled {
            self.add_data_dep(SliceKind::Dynamic, now, version, id);
        }
    }

    fn on_store(&mut self, target: &SymbolRef, value: ValueId, kind: StoreKind) {
        let Some((scope, now)) = self.execution_state() else {
            return;
        };
        let deps = self
            .execution
            .as_ref()
            .map(|execution| execution.reads.clone())
            .unwrap_or_default();
        let Some((target_scope, key)) = self.symbols.resolve_target(scope, target) else {
            // Dynamic keys and untracked owners: the owner changed in place
            let owner = target
                .prefixes()
                .pop()
                .and_then(|owner| self.symbols.resolve_symbol(scope, &owner));
            if let Some(owner) = owner {
                self.symbols.mutate(owner, &deps, now);
            }
            return;
        };
        let flags = match kind {
            StoreKind::Plain => SymbolFlags::empty(),
            StoreKind::FunctionDefinition => SymbolFlags::FUNCTION,
            StoreKind::Import => SymbolFlags::IMPORT,
        };
        let id = self
            .symbols
            .upsert(target_scope, key, value, flags, &deps, now);
        if kind != StoreKind::FunctionDefinition {
            return;
        }
        let def = self.execution.as_ref().and_then(|execution| {
            execution
                .module
                .body
                .get(execution.stmt_index)
                .and_then(|stmt| find_function_def(stmt, target.root_name()))
                .cloned()
        });
        match def {
            Some(def) => self.symbols.define_function(id, def, target_scope),
            None => tracing::warn!("no definition found for function `{target}`"),
        }
    }

    fn on_mutate(&mut self, target: &SymbolRef) {
        let Some((scope, now)) = self.execution_state() else {
            return;
        };
        let Some(resolution) = self.symbols.resolve(scope, target) else {
            return;
        };
        let deps = self
            .execution
            .as_ref()
            .map(|execution| execution.reads.clone())
            .unwrap_or_default();
        self.symbols.mutate(resolution.symbol, &deps, now);
    }

    fn on_delete(&mut self, target: &SymbolRef) {
        let Some((scope, _)) = self.execution_state() else {
            return;
        };
        if let Some(id) = self.symbols.resolve_symbol(scope, target) {
            tracing::trace!("delete {}", self.symbols.display_name(id));
            self.symbols.delete(id);
        }
    }

    /// Enter the local scope of a tracked function. Untracked callables
    /// re-enter the caller's scope so that exits stay balanced.
    fn on_call_entry(&mut self, function: &SymbolRef) {
        let Some((scope, _)) = self.execution_state() else {
            return;
        };
        let local_scope = self
            .symbols
            .resolve(scope, function)
            .and_then(|resolution| self.symbols.symbol(resolution.symbol).function.as_ref())
            .map_or(scope, |info| info.local_scope);
        if let Some(execution) = self.execution.as_mut() {
            execution.frames.push(local_scope);
        }
    }
}
