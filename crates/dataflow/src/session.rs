//! # Session
//!
//! All dataflow state of one notebook kernel: cells and their versions,
//! symbols, the cell- and statement-level slice graphs, and the execution in
//! progress. A host drives it through [`Session::begin_cell`],
//! [`Session::handle_event`] and [`Session::end_cell`], and asks it for
//! schedules and slices in between.

use std::collections::{BTreeMap, BTreeSet};

use cellflow_analysis::{compute_lvals_rvals, SymbolRef};
use cellflow_diagnostics::Diagnostic;
use cellflow_parser::{parse_cell, Module, ParsedCell, ParserDatabaseImpl};
use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};

use crate::cell::{CellId, CellStore, CodeCell};
use crate::error::{DataflowError, Result};
use crate::graph::{NodeId, SliceGraph, SliceKind};
use crate::resolve::CallChainMemo;
use crate::scope::ScopeId;
use crate::settings::Settings;
use crate::statement::{Statement, StatementKey};
use crate::symbol::{SymbolFlags, SymbolId, ValueId};
use crate::symbol_table::SymbolTable;
use crate::timestamp::Timestamp;

/// Outcome of the single-cell check run when a cell starts executing
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Precheck {
    /// The cell read a symbol that is stale
    pub waiter_usage_detected: bool,
    /// Counter of the latest cell positioned below this one whose values it read
    pub out_of_order_usage_counter: Option<i64>,
    pub diagnostics: Vec<Diagnostic>,
}

/// The cell currently executing
#[derive(Debug, Clone)]
pub(crate) struct Execution {
    pub cell_id: CellId,
    pub counter: i64,
    pub stmt_index: usize,
    /// Innermost scope last; the global scope is always at the bottom
    pub frames: Vec<ScopeId>,
    /// Symbols loaded by the current statement so far
    pub reads: FxHashSet<SymbolId>,
    pub module: Module,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SliceSeed {
    Cell(CellId),
    Timestamp(Timestamp),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SliceGranularity {
    #[default]
    Statement,
    Cell,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SliceEntry {
    pub cell_id: CellId,
    pub cell_counter: i64,
    pub text: String,
}

pub struct Session {
    pub(crate) settings: Settings,
    pub(crate) db: ParserDatabaseImpl,
    pub(crate) cells: CellStore,
    pub(crate) cell_graph: SliceGraph<CodeCell>,
    pub(crate) stmt_graph: SliceGraph<Statement>,
    pub(crate) symbols: SymbolTable,
    pub(crate) static_data_deps: BTreeMap<Timestamp, BTreeSet<Timestamp>>,
    pub(crate) dynamic_data_deps: BTreeMap<Timestamp, BTreeSet<Timestamp>>,
    pub(crate) call_chain_memo: CallChainMemo,
    pub(crate) execution: Option<Execution>,
    cell_counter: i64,
    min_timestamp: i64,
    next_value: u64,
    active_cell_id: Option<CellId>,
    last_executed_cell_id: Option<CellId>,
}

impl Session {
    pub fn new(settings: Settings) -> Self {
        tracing::debug!(
            "new session: {} / {} / {}",
            settings.exec_mode,
            settings.exec_schedule,
            settings.flow_direction
        );
        Self {
            settings,
            db: ParserDatabaseImpl::default(),
            cells: CellStore::default(),
            cell_graph: SliceGraph::new(),
            stmt_graph: SliceGraph::new(),
            symbols: SymbolTable::new(),
            static_data_deps: BTreeMap::new(),
            dynamic_data_deps: BTreeMap::new(),
            call_chain_memo: CallChainMemo::default(),
            execution: None,
            cell_counter: 0,
            min_timestamp: -1,
            next_value: 0,
            active_cell_id: None,
            last_executed_cell_id: None,
        }
    }

    pub const fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Counter of the most recently started cell; 0 before any execution
    pub const fn cell_counter(&self) -> i64 {
        self.cell_counter
    }

    pub const fn min_timestamp(&self) -> i64 {
        self.min_timestamp
    }

    /// Ignore symbol updates at or below `counter` when deciding readiness
    pub fn set_min_timestamp(&mut self, counter: i64) {
        self.min_timestamp = counter;
    }

    pub fn active_cell_id(&self) -> Option<&str> {
        self.active_cell_id.as_deref()
    }

    pub fn set_active_cell(&mut self, cell_id: &str) {
        self.active_cell_id = Some(cell_id.to_string());
    }

    pub fn last_executed_cell_id(&self) -> Option<&str> {
        self.last_executed_cell_id.as_deref()
    }

    pub const fn symbols(&self) -> &SymbolTable {
        &self.symbols
    }

    pub const fn cells(&self) -> &CellStore {
        &self.cells
    }

    pub const fn cell_graph(&self) -> &SliceGraph<CodeCell> {
        &self.cell_graph
    }

    pub const fn statement_graph(&self) -> &SliceGraph<Statement> {
        &self.stmt_graph
    }

    pub const fn static_data_deps(&self) -> &BTreeMap<Timestamp, BTreeSet<Timestamp>> {
        &self.static_data_deps
    }

    pub const fn dynamic_data_deps(&self) -> &BTreeMap<Timestamp, BTreeSet<Timestamp>> {
        &self.dynamic_data_deps
    }

    /// A value identity never handed out before
    pub fn fresh_value(&mut self) -> ValueId {
        self.next_value += 1;
        ValueId(self.next_value)
    }

    /// Time stamped on host-side updates between executions: just before the
    /// first statement of the next cell
    fn host_timestamp(&self) -> Timestamp {
        Timestamp::new(self.cell_counter + 1, -1)
    }

    pub fn set_cell_content(&mut self, cell_id: &str, content: &str) {
        self.cells.upsert(&mut self.db, cell_id, content);
    }

    pub fn set_cell_position(&mut self, cell_id: &str, position: i64) -> Result<()> {
        let record = self
            .cells
            .get_mut(cell_id)
            .ok_or_else(|| DataflowError::UnknownCell(cell_id.to_string()))?;
        record.position = position;
        Ok(())
    }

    /// Extra live and dead references merged into the cell's analysis
    pub fn set_override_refs(
        &mut self,
        cell_id: &str,
        live: Vec<String>,
        dead: Vec<String>,
    ) -> Result<()> {
        let record = self
            .cells
            .get_mut(cell_id)
            .ok_or_else(|| DataflowError::UnknownCell(cell_id.to_string()))?;
        record.override_live_refs = live;
        record.override_dead_refs = dead;
        Ok(())
    }

    pub fn position_of(&self, cell_id: &str) -> Option<i64> {
        self.cells.get(cell_id).map(|record| record.position)
    }

    /// Id of the cell that ran with `counter`
    pub fn cell_id_for_counter(&self, counter: i64) -> Option<&CellId> {
        self.cell_graph
            .at_timestamp(Timestamp::new(counter, 0))
            .map(|id| &self.cell_graph.node(id).cell_id)
    }

    pub fn position_of_counter(&self, counter: i64) -> Option<i64> {
        self.cell_id_for_counter(counter)
            .and_then(|cell_id| self.position_of(cell_id))
    }

    /// Counter of the current version of `cell_id`, -1 if it never ran
    pub fn counter_of(&self, cell_id: &str) -> i64 {
        self.cell_graph
            .current(&cell_id.to_string())
            .map_or(-1, |id| self.cell_graph.node(id).counter)
    }

    pub(crate) fn parsed(&self, cell_id: &str) -> Option<&ParsedCell> {
        let record = self.cells.get(cell_id)?;
        Some(parse_cell(&self.db, record.source))
    }

    /// Resolve a global reference such as `"df.cols"` to the symbol it names
    pub fn lookup(&self, text: &str) -> Result<Option<SymbolId>> {
        let reference =
            SymbolRef::parse(text).map_err(|_| DataflowError::InvalidReference(text.to_string()))?;
        Ok(self
            .symbols
            .resolve_symbol(self.symbols.global_scope(), &reference))
    }

    /// Start executing `content` as a new version of `cell_id`.
    ///
    /// Cells that fail to parse are rejected before the counter advances.
    pub fn begin_cell(&mut self, cell_id: &str, content: &str) -> Result<Precheck> {
        if let Some(execution) = &self.execution {
            return Err(DataflowError::AlreadyExecuting(execution.cell_id.clone()));
        }
        let _span = tracing::debug_span!("begin_cell", cell_id).entered();
        self.cells.upsert(&mut self.db, cell_id, content);
        let parsed = self
            .parsed(cell_id)
            .ok_or_else(|| DataflowError::UnknownCell(cell_id.to_string()))?;
        let module = match parsed.module() {
            Some(module) => module.clone(),
            None => {
                return Err(DataflowError::Syntax {
                    cell_id: cell_id.to_string(),
                    diagnostics: parsed.diagnostics.clone(),
                })
            }
        };

        self.cell_counter += 1;
        let counter = self.cell_counter;
        self.cell_graph.insert(CodeCell::new(
            cell_id.to_string(),
            counter,
            content.to_string(),
        ));
        for (index, stmt) in module.body.iter().enumerate() {
            let span = stmt.span();
            let text = content.get(span.start..span.end).unwrap_or_default();
            self.stmt_graph.insert(Statement::new(
                StatementKey {
                    cell_id: cell_id.to_string(),
                    index,
                },
                Timestamp::new(counter, index as i64),
                text.trim().to_string(),
            ));
        }

        let precheck = self.precheck(cell_id);
        tracing::debug!(
            "cell `{cell_id}` runs as {counter} (waiter usage: {})",
            precheck.waiter_usage_detected
        );
        self.execution = Some(Execution {
            cell_id: cell_id.to_string(),
            counter,
            stmt_index: 0,
            frames: vec![self.symbols.global_scope()],
            reads: FxHashSet::default(),
            module,
        });
        Ok(precheck)
    }

    /// Finish the executing cell: wire intra-cell statement edges and collect
    /// unreachable symbols
    pub fn end_cell(&mut self) -> Result<()> {
        let execution = self
            .execution
            .take()
            .ok_or(DataflowError::NoActiveExecution)?;
        if self.settings.static_slicing_enabled {
            self.add_intra_cell_edges(&execution);
        }
        self.symbols.gc();
        self.prune_call_chain_memo();
        self.last_executed_cell_id = Some(execution.cell_id);
        Ok(())
    }

    /// Forget body liveness of function versions that were redefined or
    /// collected
    fn prune_call_chain_memo(&mut self) {
        let symbols = &self.symbols;
        self.call_chain_memo.retain(|(function, timestamp), _| {
            let symbol = symbols.symbol(*function);
            !symbol.is_garbage() && symbol.function.is_some() && symbol.timestamp() == *timestamp
        });
    }

    /// Statement `j` reading a name last bound by statement `i < j` of the
    /// same execution depends on it
    fn add_intra_cell_edges(&mut self, execution: &Execution) {
        let global = self.symbols.global_scope();
        let mut last_binding: FxHashMap<String, usize> = FxHashMap::default();
        for (index, stmt) in execution.module.body.iter().enumerate() {
            let edges = compute_lvals_rvals(stmt);
            for name in &edges.rvals {
                let (Some(&binder), Some(symbol)) =
                    (last_binding.get(name), self.symbols.lookup(global, name))
                else {
                    continue;
                };
                self.add_data_dep(
                    SliceKind::Static,
                    Timestamp::new(execution.counter, index as i64),
                    Timestamp::new(execution.counter, binder as i64),
                    symbol,
                );
            }
            for name in edges.lvals {
                last_binding.insert(name, index);
            }
        }
    }

    /// Record that whatever ran at `child` consumed `symbol` as produced at
    /// `parent`, at timestamp, statement and cell level
    pub(crate) fn add_data_dep(
        &mut self,
        kind: SliceKind,
        child: Timestamp,
        parent: Timestamp,
        symbol: SymbolId,
    ) {
        let deps = match kind {
            SliceKind::Static => &mut self.static_data_deps,
            SliceKind::Dynamic => &mut self.dynamic_data_deps,
        };
        deps.entry(child).or_default().insert(parent);

        let syms: FxHashSet<SymbolId> = std::iter::once(symbol).collect();
        if let (Some(child_stmt), Some(parent_stmt)) = (
            self.stmt_graph.at_timestamp(child),
            self.stmt_graph.at_timestamp(parent),
        ) {
            if child_stmt != parent_stmt {
                self.stmt_graph
                    .add_parent_edges(child_stmt, parent_stmt, &syms, kind);
            }
        }
        if let (Some(child_cell), Some(parent_cell)) = (
            self.cell_graph.at_timestamp(child),
            self.cell_graph.at_timestamp(parent),
        ) {
            if child_cell != parent_cell {
                self.cell_graph
                    .add_parent_edges(child_cell, parent_cell, &syms, kind);
            }
        }
    }

    /// Clear every cell's ready flag
    pub fn reactivity_cleanup(&mut self) {
        for record in self.cells.iter_mut() {
            record.set_ready(false);
        }
    }

    /// Mark the named symbols as fresh. Names that do not resolve are skipped.
    pub fn refresh_symbols(&mut self, names: &[String]) -> Result<()> {
        let ts = self.host_timestamp();
        let global = self.symbols.global_scope();
        for name in names {
            let reference = SymbolRef::parse(name)
                .map_err(|_| DataflowError::InvalidReference(name.clone()))?;
            if let Some(id) = self.symbols.resolve_symbol(global, &reference) {
                self.symbols.refresh(id, ts);
            }
        }
        Ok(())
    }

    /// Bind `name` to `value` from the host side. Rebinding the same value is
    /// a no-op.
    pub fn upsert_symbol(&mut self, name: &str, value: ValueId, deps: &[String]) -> Result<()> {
        let invalid = || DataflowError::InvalidReference(name.to_string());
        let global = self.symbols.global_scope();
        let reference = SymbolRef::parse(name).map_err(|_| invalid())?;
        if let Some(existing) = self.symbols.resolve_symbol(global, &reference) {
            if self.symbols.symbol(existing).value == value {
                return Ok(());
            }
        }
        let mut dep_ids = FxHashSet::default();
        for dep in deps {
            let dep_ref = SymbolRef::parse(dep)
                .map_err(|_| DataflowError::InvalidReference(dep.clone()))?;
            dep_ids.extend(self.symbols.resolve_symbol(global, &dep_ref));
        }
        let (scope, key) = self
            .symbols
            .resolve_target(global, &reference)
            .ok_or_else(invalid)?;
        let ts = self.host_timestamp();
        self.symbols
            .upsert(scope, key, value, SymbolFlags::empty(), &dep_ids, ts);
        Ok(())
    }

    fn slice_seed_cells(&self, seed: &SliceSeed) -> Result<NodeId> {
        match seed {
            SliceSeed::Cell(cell_id) => self
                .cell_graph
                .current(cell_id)
                .ok_or_else(|| DataflowError::UnknownCell(cell_id.clone())),
            SliceSeed::Timestamp(ts) => self
                .cell_graph
                .at_timestamp(*ts)
                .ok_or(DataflowError::UnknownTimestamp(*ts)),
        }
    }

    fn statements_of_counter(&self, counter: i64) -> Vec<NodeId> {
        (0..)
            .map_while(|index| self.stmt_graph.at_timestamp(Timestamp::new(counter, index)))
            .collect()
    }

    fn slice_seed_statements(&self, seed: &SliceSeed) -> Result<Vec<NodeId>> {
        match seed {
            SliceSeed::Cell(cell_id) => {
                let counter = self.counter_of(cell_id);
                if counter < 0 {
                    return Err(DataflowError::UnknownCell(cell_id.clone()));
                }
                Ok(self.statements_of_counter(counter))
            }
            SliceSeed::Timestamp(ts) if ts.stmt_counter < 0 => {
                let statements = self.statements_of_counter(ts.cell_counter);
                if statements.is_empty() {
                    return Err(DataflowError::UnknownTimestamp(*ts));
                }
                Ok(statements)
            }
            SliceSeed::Timestamp(ts) => self
                .stmt_graph
                .at_timestamp(*ts)
                .map(|id| vec![id])
                .ok_or(DataflowError::UnknownTimestamp(*ts)),
        }
    }

    /// The code needed to reproduce the seeds' current values, one entry per
    /// contributing cell execution in execution order
    pub fn compute_slice(
        &self,
        seeds: &[SliceSeed],
        granularity: SliceGranularity,
    ) -> Result<Vec<SliceEntry>> {
        let _span = tracing::trace_span!("compute_slice").entered();
        let kinds = self.settings.slicing_kinds();
        let texts = match granularity {
            SliceGranularity::Cell => {
                let seeds = seeds
                    .iter()
                    .map(|seed| self.slice_seed_cells(seed))
                    .collect::<Result<Vec<_>>>()?;
                let closure = self.cell_graph.make_multi_slice(seeds, &kinds);
                self.cell_graph.make_cell_dict_from_closure(&closure)
            }
            SliceGranularity::Statement => {
                let mut nodes = Vec::new();
                for seed in seeds {
                    nodes.extend(self.slice_seed_statements(seed)?);
                }
                let closure = self.stmt_graph.make_multi_slice(nodes, &kinds);
                self.stmt_graph.make_cell_dict_from_closure(&closure)
            }
        };
        Ok(texts
            .into_iter()
            .filter_map(|(cell_counter, text)| {
                let Some(cell_id) = self.cell_id_for_counter(cell_counter) else {
                    tracing::warn!("no cell executed at counter {cell_counter}, dropping it from the slice");
                    return None;
                };
                Some(SliceEntry {
                    cell_id: cell_id.clone(),
                    cell_counter,
                    text,
                })
            })
            .collect())
    }
}
