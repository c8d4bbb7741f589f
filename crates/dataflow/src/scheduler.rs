//! # Execution readiness scheduler
//!
//! One scheduling pass walks the candidate cells in position order, resolves
//! what each one reads and kills, and classifies it as ready or waiting under
//! the session's schedule. The pass then closes the waiting set over the cell
//! DAG (for DAG-based schedules), picks out cells forced to run by reactive
//! reads, and explains every waiting cell by the non-waiting cells whose
//! execution would unblock it.

use std::collections::{BTreeMap, BTreeSet};

use cellflow_analysis::{
    compute_live_dead_refs, LiveSymbolRef, LivenessOptions, LivenessResult, SymbolRef,
};
use cellflow_diagnostics::Diagnostic;
use cellflow_parser::parse_cell;
use rustc_hash::FxHashMap;
use serde::Serialize;

use crate::cell::{CellId, CellMetadata};
use crate::error::Result;
use crate::graph::{NodeId, SliceKind};
use crate::resolve::{CheckerResult, LiveSymbol, Resolver, SymbolRebindOracle};
use crate::session::{Precheck, Session};
use crate::settings::{ExecutionMode, ExecutionSchedule, FlowDirection};
use crate::symbol::{SymbolFlags, SymbolId};

/// A cell positioned above the reader that produced a value the reader used
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct UnsafeOrderCell {
    pub position: i64,
    pub counter: i64,
    pub cell_id: CellId,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FrontendCheckerResult {
    pub waiting_cells: BTreeSet<CellId>,
    pub ready_cells: BTreeSet<CellId>,
    /// Ready cells that were not ready after the previous pass
    pub new_ready_cells: BTreeSet<CellId>,
    pub forced_reactive_cells: BTreeSet<CellId>,
    /// Waiting cell to the cells whose execution would unblock it
    pub waiter_links: BTreeMap<CellId, BTreeSet<CellId>>,
    /// Reverse of `waiter_links`
    pub ready_maker_links: BTreeMap<CellId, BTreeSet<CellId>>,
    #[serde(skip)]
    pub unsafe_order_cells: BTreeMap<CellId, BTreeSet<UnsafeOrderCell>>,
    #[serde(skip)]
    pub diagnostics: Vec<Diagnostic>,
}

impl FrontendCheckerResult {
    /// Follow waiter links through waiting cells until only non-waiting cells
    /// remain, then fill in the reverse links.
    pub fn compute_waiter_and_ready_maker_links(&mut self) {
        let mut changed = true;
        while changed {
            changed = false;
            for waiting in &self.waiting_cells {
                let Some(links) = self.waiter_links.get(waiting) else {
                    continue;
                };
                let mut closed = links.clone();
                for maker in links {
                    if !self.waiting_cells.contains(maker) {
                        continue;
                    }
                    if let Some(transitive) = self.waiter_links.get(maker) {
                        closed.extend(transitive.iter().cloned());
                    }
                }
                closed.remove(waiting);
                if closed != *links {
                    changed = true;
                    self.waiter_links.insert(waiting.clone(), closed);
                }
            }
        }
        for waiting in &self.waiting_cells {
            let Some(links) = self.waiter_links.get_mut(waiting) else {
                continue;
            };
            links.retain(|maker| !self.waiting_cells.contains(maker));
            for maker in links.iter() {
                self.ready_maker_links
                    .entry(maker.clone())
                    .or_default()
                    .insert(waiting.clone());
            }
        }
    }
}

/// Classification plus the policy it was computed under
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecSchedule {
    #[serde(flatten)]
    pub result: FrontendCheckerResult,
    pub exec_mode: ExecutionMode,
    pub exec_schedule: ExecutionSchedule,
    pub flow_order: FlowDirection,
    pub last_executed_cell_id: Option<CellId>,
}

/// What a pass needs to know about one cell, taken before it is analyzed
#[derive(Debug, Clone)]
struct Candidate {
    cell_id: CellId,
    position: i64,
    /// Counter of the last execution, -1 if it never ran
    counter: i64,
    node: Option<NodeId>,
    /// Content edited since the last execution
    is_dirty: bool,
}

#[derive(Debug, Default)]
struct Pass {
    result: FrontendCheckerResult,
    waiting_symbols: BTreeMap<CellId, BTreeSet<SymbolId>>,
    killing_cells: FxHashMap<SymbolId, BTreeSet<CellId>>,
    checked: BTreeMap<CellId, CheckerResult>,
}

impl Session {
    fn candidate(&self, cell_id: &str) -> Option<Candidate> {
        let record = self.cells.get(cell_id)?;
        let node = self.cell_graph.current(&record.id);
        let counter = node.map_or(-1, |id| self.cell_graph.node(id).counter);
        let is_dirty = node.is_some_and(|id| {
            self.cells.content(&self.db, cell_id) != Some(self.cell_graph.node(id).content.as_str())
        });
        Some(Candidate {
            cell_id: record.id.clone(),
            position: record.position,
            counter,
            node,
            is_dirty,
        })
    }

    /// Liveness of the cell's current content, with host overrides merged
    /// in. `None` when the content does not parse.
    fn cell_liveness(&self, cell_id: &str) -> Option<LivenessResult> {
        let record = self.cells.get(cell_id)?;
        let parsed = parse_cell(&self.db, record.source);
        let Some(module) = parsed.module() else {
            tracing::debug!("skipping `{cell_id}`: content does not parse");
            return None;
        };
        let oracle = SymbolRebindOracle {
            symbols: &self.symbols,
            scope: self.symbols.global_scope(),
        };
        let mut options = LivenessOptions::default();
        if !self.settings.is_in_order() {
            options = options.with_rebind_oracle(&oracle);
        }
        let mut liveness = compute_live_dead_refs(&module.body, options);
        for text in &record.override_live_refs {
            match SymbolRef::parse(text) {
                Ok(reference) => {
                    liveness.live.insert(LiveSymbolRef::new(reference, 0));
                }
                Err(diagnostic) => liveness.diagnostics.push(diagnostic),
            }
        }
        for text in &record.override_dead_refs {
            match SymbolRef::parse(text) {
                Ok(reference) => {
                    liveness.dead.insert(reference);
                }
                Err(diagnostic) => liveness.diagnostics.push(diagnostic),
            }
        }
        Some(liveness)
    }

    /// Resolve a cell against the current symbols. With `record_versions`,
    /// the versions seen are stored on the symbols and become static edges.
    fn check_and_resolve_symbols(
        &mut self,
        candidate: &Candidate,
        record_versions: bool,
    ) -> Option<CheckerResult> {
        let liveness = self.cell_liveness(&candidate.cell_id)?;
        let result = Resolver {
            symbols: &self.symbols,
            settings: &self.settings,
            memo: &mut self.call_chain_memo,
        }
        .resolve_cell(&liveness, candidate.counter, record_versions);
        if record_versions {
            for version in &result.liveness_versions {
                self.symbols
                    .symbol_mut(version.symbol)
                    .timestamp_by_liveness_time
                    .insert(version.liveness_time, version.timestamp);
                if self.settings.static_slicing_enabled {
                    self.add_data_dep(
                        SliceKind::Static,
                        version.liveness_time,
                        version.timestamp,
                        version.symbol,
                    );
                }
            }
        }
        Some(result)
    }

    /// Latest cell counter among the live symbols' versions. Under in-order
    /// flow, values produced by cells at or below the candidate are ignored.
    fn max_used_live_counter(
        &self,
        candidate: &Candidate,
        live: &BTreeSet<LiveSymbol>,
        reactive_only: bool,
    ) -> i64 {
        let in_order = self.settings.is_in_order();
        live.iter()
            .filter(|live| {
                !reactive_only
                    || live.is_reactive
                    || self
                        .symbols
                        .symbol(live.symbol)
                        .flags
                        .contains(SymbolFlags::REACTIVE)
            })
            .filter(|live| live.timestamp.is_initialized())
            .filter(|live| {
                !in_order
                    || self
                        .position_of_counter(live.timestamp.cell_counter)
                        .map_or(true, |position| position < candidate.position)
            })
            .map(|live| live.timestamp.cell_counter)
            .max()
            .unwrap_or(-1)
    }

    fn readiness_floor(&self, candidate: &Candidate) -> i64 {
        candidate.counter.max(self.min_timestamp())
    }

    /// Some parent along an enabled edge kind ran after the candidate did
    fn has_fresher_parent(&self, candidate: &Candidate) -> bool {
        let Some(node) = candidate.node else {
            return false;
        };
        let floor = self.readiness_floor(candidate);
        let in_order = self.settings.is_in_order();
        self.settings.slicing_kinds().into_iter().any(|kind| {
            self.cell_graph.parents(node, kind).into_iter().any(|parent| {
                let parent = self.cell_graph.node(parent);
                if in_order
                    && self
                        .position_of(&parent.cell_id)
                        .is_some_and(|position| position >= candidate.position)
                {
                    return false;
                }
                parent.counter > floor
            })
        })
    }

    fn compute_is_ready(
        &self,
        candidate: &Candidate,
        checker: &CheckerResult,
        is_waiting: bool,
    ) -> bool {
        let floor = self.readiness_floor(candidate);
        let mut is_ready = if self.settings.exec_schedule == ExecutionSchedule::DagBased {
            (candidate.is_dirty && candidate.counter >= 0) || self.has_fresher_parent(candidate)
        } else {
            !is_waiting && self.max_used_live_counter(candidate, &checker.live, false) > floor
        };
        if self.settings.exec_schedule == ExecutionSchedule::Strict {
            // Something this cell writes was overwritten elsewhere since
            is_ready |= checker
                .dead
                .iter()
                .any(|dead| self.symbols.symbol(*dead).timestamp().cell_counter > floor);
        }
        is_ready
    }

    fn check_one_cell(
        &mut self,
        candidate: &Candidate,
        record_versions: bool,
        last_executed_position: Option<i64>,
        pass: &mut Pass,
    ) -> Option<CheckerResult> {
        let checker = self.check_and_resolve_symbols(candidate, record_versions)?;
        let cell_id = &candidate.cell_id;
        pass.result
            .diagnostics
            .extend(checker.diagnostics.iter().cloned());

        let in_order = self.settings.is_in_order();
        if in_order || self.settings.exec_schedule == ExecutionSchedule::Strict {
            for live in checker.live.iter().filter(|live| live.is_deep) {
                if !live.timestamp.is_initialized() {
                    continue;
                }
                let counter = live.timestamp.cell_counter;
                let Some(producer) = self.cell_id_for_counter(counter).cloned() else {
                    continue;
                };
                let Some(position) = self.position_of(&producer) else {
                    continue;
                };
                if position > candidate.position {
                    pass.result
                        .unsafe_order_cells
                        .entry(cell_id.clone())
                        .or_default()
                        .insert(UnsafeOrderCell {
                            position,
                            counter,
                            cell_id: producer,
                        });
                }
            }
        }
        if in_order && last_executed_position.is_some_and(|last| candidate.position <= last) {
            return Some(checker);
        }

        let mut waiting_symbols = BTreeSet::new();
        if self.settings.exec_schedule == ExecutionSchedule::LivenessBased
            && self.settings.mark_waiting_symbol_usages_unsafe
        {
            for live in &checker.live {
                let symbol = self.symbols.symbol(live.symbol);
                let is_waiting = if in_order {
                    symbol.is_waiting_at_position(candidate.position, |counter| {
                        self.position_of_counter(counter)
                    })
                } else {
                    symbol.is_waiting()
                };
                if is_waiting {
                    waiting_symbols.insert(live.symbol);
                }
            }
        }
        let is_waiting = !waiting_symbols.is_empty();
        if is_waiting {
            pass.result.waiting_cells.insert(cell_id.clone());
            pass.waiting_symbols.insert(cell_id.clone(), waiting_symbols);
        }
        for dead in &checker.dead {
            pass.killing_cells
                .entry(*dead)
                .or_default()
                .insert(cell_id.clone());
        }

        let is_ready = self.compute_is_ready(candidate, &checker, is_waiting);
        if is_ready {
            pass.result.ready_cells.insert(cell_id.clone());
        }
        let was_ready = self
            .cells
            .get_mut(cell_id)
            .is_some_and(|record| record.set_ready(is_ready));
        if is_ready && !was_ready {
            pass.result.new_ready_cells.insert(cell_id.clone());
        }
        tracing::trace!("`{cell_id}`: ready={is_ready} waiting={is_waiting}");
        Some(checker)
    }

    /// Parent cell ids of `node` along every enabled edge kind
    fn parent_cell_ids(&self, node: NodeId) -> BTreeSet<CellId> {
        self.settings
            .slicing_kinds()
            .into_iter()
            .flat_map(|kind| self.cell_graph.parent_keys(node, kind).cloned())
            .collect()
    }

    fn compute_dag_based_waiters(&mut self, candidates: &[Candidate], pass: &mut Pass) {
        if !self.settings.exec_schedule.uses_dag_waiters() {
            return;
        }
        let parents: Vec<(CellId, BTreeSet<CellId>)> = candidates
            .iter()
            .filter(|candidate| pass.checked.contains_key(&candidate.cell_id))
            .filter_map(|candidate| {
                let node = candidate.node?;
                Some((candidate.cell_id.clone(), self.parent_cell_ids(node)))
            })
            .collect();
        let result = &mut pass.result;
        loop {
            let mut changed = false;
            for (cell_id, parent_ids) in &parents {
                if result.waiting_cells.contains(cell_id) {
                    continue;
                }
                let blocked = parent_ids.iter().any(|parent| {
                    result.ready_cells.contains(parent) || result.waiting_cells.contains(parent)
                });
                if blocked {
                    result.waiting_cells.insert(cell_id.clone());
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }
        for waiting in &result.waiting_cells {
            result.ready_cells.remove(waiting);
            result.new_ready_cells.remove(waiting);
            if let Some(record) = self.cells.get_mut(waiting) {
                record.set_ready(false);
            }
        }
    }

    fn compute_reactive_cells(&self, candidates: &[Candidate], pass: &mut Pass) {
        if self.settings.exec_mode == ExecutionMode::Reactive {
            // Every ready cell already runs reactively
            return;
        }
        for candidate in candidates {
            if !pass.result.ready_cells.contains(&candidate.cell_id) {
                continue;
            }
            let Some(checker) = pass.checked.get(&candidate.cell_id) else {
                continue;
            };
            if self.max_used_live_counter(candidate, &checker.live, true)
                > self.readiness_floor(candidate)
            {
                pass.result
                    .forced_reactive_cells
                    .insert(candidate.cell_id.clone());
            }
        }
    }

    fn compute_ready_making_cells(&self, last_executed_cell_id: Option<&str>, pass: &mut Pass) {
        let eligible: BTreeSet<CellId> = pass
            .result
            .ready_cells
            .union(&pass.result.waiting_cells)
            .cloned()
            .collect();
        let mut links = BTreeMap::new();
        for waiting in &pass.result.waiting_cells {
            let mut makers: BTreeSet<CellId> = if self.settings.exec_schedule.uses_dag_waiters() {
                self.cell_graph
                    .current(waiting)
                    .map(|node| {
                        self.parent_cell_ids(node)
                            .intersection(&eligible)
                            .cloned()
                            .collect()
                    })
                    .unwrap_or_default()
            } else {
                pass.waiting_symbols
                    .get(waiting)
                    .into_iter()
                    .flatten()
                    .filter_map(|symbol| pass.killing_cells.get(symbol))
                    .flatten()
                    .cloned()
                    .collect()
            };
            if self.settings.is_in_order() {
                let position = self.position_of(waiting);
                makers.retain(|maker| match (self.position_of(maker), position) {
                    (Some(maker), Some(waiting)) => maker < waiting,
                    _ => false,
                });
            }
            if let Some(last) = last_executed_cell_id {
                makers.remove(last);
            }
            links.insert(waiting.clone(), makers);
        }
        pass.result.waiter_links = links;
    }

    /// Run one scheduling pass over `cells_to_check`, or over every executed
    /// cell when `None`
    pub fn check_and_resolve(
        &mut self,
        cells_to_check: Option<&[CellId]>,
        record_versions: bool,
        last_executed_cell_id: Option<&str>,
    ) -> FrontendCheckerResult {
        let _span = tracing::debug_span!("schedule_pass").entered();
        let ids: Vec<CellId> = match cells_to_check {
            Some(ids) => ids.to_vec(),
            None => self
                .cells
                .iter()
                .filter(|record| self.cell_graph.current(&record.id).is_some())
                .map(|record| record.id.clone())
                .collect(),
        };
        let mut candidates: Vec<Candidate> =
            ids.iter().filter_map(|id| self.candidate(id)).collect();
        candidates.sort_by(|a, b| (a.position, &a.cell_id).cmp(&(b.position, &b.cell_id)));
        let last_executed_position = last_executed_cell_id.and_then(|id| self.position_of(id));

        let mut pass = Pass::default();
        for candidate in &candidates {
            if let Some(checker) =
                self.check_one_cell(candidate, record_versions, last_executed_position, &mut pass)
            {
                pass.checked.insert(candidate.cell_id.clone(), checker);
            }
            let is_ready = self
                .cells
                .get(&candidate.cell_id)
                .is_some_and(|record| record.is_ready);
            if self.settings.exec_schedule == ExecutionSchedule::Strict && is_ready {
                break;
            }
        }

        self.compute_dag_based_waiters(&candidates, &mut pass);
        self.compute_reactive_cells(&candidates, &mut pass);
        self.compute_ready_making_cells(last_executed_cell_id, &mut pass);
        pass.result.compute_waiter_and_ready_maker_links();
        tracing::debug!(
            "{} ready, {} waiting, {} newly ready",
            pass.result.ready_cells.len(),
            pass.result.waiting_cells.len(),
            pass.result.new_ready_cells.len()
        );
        pass.result
    }

    /// Single-cell pass for the cell about to execute
    pub(crate) fn precheck(&mut self, cell_id: &str) -> Precheck {
        let ids = [cell_id.to_string()];
        let record_versions = self.settings.static_slicing_enabled;
        let result = self.check_and_resolve(Some(&ids), record_versions, None);
        Precheck {
            waiter_usage_detected: result.waiting_cells.contains(cell_id),
            out_of_order_usage_counter: result
                .unsafe_order_cells
                .get(cell_id)
                .and_then(|cells| cells.iter().max())
                .map(|cell| cell.counter),
            diagnostics: result.diagnostics,
        }
    }

    /// Sync the host's view of the notebook and classify its cells.
    ///
    /// Only code cells, and other cells carrying override references, are
    /// considered.
    pub fn compute_exec_schedule(
        &mut self,
        executed_cell_id: Option<&str>,
        cell_metadata_by_id: Option<&BTreeMap<CellId, CellMetadata>>,
    ) -> Result<ExecSchedule> {
        if self.active_cell_id().is_none() {
            if let Some(executed) = executed_cell_id {
                self.set_active_cell(executed);
            }
        }
        let mut cells_to_check = None;
        if let Some(metadata) = cell_metadata_by_id {
            let mut ids = Vec::new();
            for (cell_id, meta) in metadata.iter().filter(|(_, meta)| meta.is_checked()) {
                self.set_cell_content(cell_id, &meta.content);
                self.set_cell_position(cell_id, meta.index)?;
                self.set_override_refs(
                    cell_id,
                    meta.override_live_refs.clone().unwrap_or_default(),
                    meta.override_dead_refs.clone().unwrap_or_default(),
                )?;
                ids.push(cell_id.clone());
            }
            cells_to_check = Some(ids);
        }
        let result = self.check_and_resolve(cells_to_check.as_deref(), false, executed_cell_id);
        Ok(ExecSchedule {
            result,
            exec_mode: self.settings.exec_mode,
            exec_schedule: self.settings.exec_schedule,
            flow_order: self.settings.flow_direction,
            last_executed_cell_id: executed_cell_id.map(str::to_string),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::Settings;
    use insta::assert_snapshot;
    use proptest::prelude::*;

    fn ids<const N: usize>(ids: [&str; N]) -> BTreeSet<CellId> {
        ids.into_iter().map(str::to_string).collect()
    }

    #[test]
    fn test_waiter_links_resolve_through_waiting_chain() {
        let mut result = FrontendCheckerResult {
            waiting_cells: ids(["b", "c"]),
            ..Default::default()
        };
        result.waiter_links.insert("c".into(), ids(["b"]));
        result.waiter_links.insert("b".into(), ids(["a"]));
        result.compute_waiter_and_ready_maker_links();

        assert_eq!(result.waiter_links["c"], ids(["a"]));
        assert_eq!(result.waiter_links["b"], ids(["a"]));
        assert_eq!(result.ready_maker_links["a"], ids(["b", "c"]));
    }

    #[test]
    fn test_schedule_serializes_flat() {
        let mut session = Session::new(Settings::default());
        session.execute_cell("a", "x = 1").unwrap();
        session.execute_cell("b", "y = x + 1").unwrap();
        session.execute_cell("a", "x = 2").unwrap();
        let schedule = session.compute_exec_schedule(Some("a"), None).unwrap();
        assert_snapshot!(
            serde_json::to_string(&schedule).unwrap(),
            @r#"{"waiting_cells":[],"ready_cells":["b"],"new_ready_cells":["b"],"forced_reactive_cells":[],"waiter_links":{},"ready_maker_links":{},"exec_mode":"normal","exec_schedule":"liveness_based","flow_order":"in_order","last_executed_cell_id":"a"}"#
        );
    }

    #[test]
    fn test_unsafe_order_reported_for_values_from_below() {
        let mut session = Session::new(Settings::default());
        session.set_cell_content("top", "y = x");
        session.execute_cell("bottom", "x = 1").unwrap();
        let precheck = session.execute_cell("top", "y = x").unwrap();
        assert_eq!(precheck.out_of_order_usage_counter, Some(1));
    }

    #[test]
    fn test_strict_marks_overwritten_writers_ready() {
        let settings = Settings {
            exec_schedule: ExecutionSchedule::Strict,
            ..Settings::default()
        };
        let mut session = Session::new(settings);
        session.execute_cell("a", "x = 1").unwrap();
        session.execute_cell("b", "x = 2").unwrap();
        let result = session.check_and_resolve(None, false, None);
        assert_eq!(result.ready_cells, ids(["a"]));
    }

    #[test]
    fn test_reactive_reads_force_execution() {
        let mut session = Session::new(Settings::default());
        session.execute_cell("a", "x = 1").unwrap();
        session.execute_cell("b", "y = $x").unwrap();
        session.execute_cell("a", "x = 2").unwrap();
        let result = session.check_and_resolve(None, false, Some("a"));
        assert_eq!(result.forced_reactive_cells, ids(["b"]));

        let reactive = Settings {
            exec_mode: ExecutionMode::Reactive,
            ..Settings::default()
        };
        let mut session = Session::new(reactive);
        session.execute_cell("a", "x = 1").unwrap();
        session.execute_cell("b", "y = $x").unwrap();
        session.execute_cell("a", "x = 2").unwrap();
        let result = session.check_and_resolve(None, false, Some("a"));
        assert!(result.forced_reactive_cells.is_empty());
        assert_eq!(result.ready_cells, ids(["b"]));
    }

    fn link_inputs() -> impl Strategy<Value = (BTreeSet<CellId>, BTreeMap<CellId, BTreeSet<CellId>>)>
    {
        let cell = prop::sample::select(vec!["a", "b", "c", "d", "e", "f"]).prop_map(str::to_string);
        (
            prop::collection::btree_set(cell.clone(), 0..6),
            prop::collection::btree_map(cell.clone(), prop::collection::btree_set(cell, 0..6), 0..6),
        )
    }

    proptest! {
        #[test]
        fn waiter_links_never_point_at_waiting_cells((waiting, links) in link_inputs()) {
            let mut result = FrontendCheckerResult {
                waiting_cells: waiting.clone(),
                waiter_links: links,
                ..Default::default()
            };
            result.compute_waiter_and_ready_maker_links();
            for cell in &waiting {
                if let Some(makers) = result.waiter_links.get(cell) {
                    prop_assert!(!makers.contains(cell));
                    prop_assert!(makers.is_disjoint(&waiting));
                }
            }
            for (maker, waiters) in &result.ready_maker_links {
                for waiter in waiters {
                    prop_assert!(result.waiter_links[waiter].contains(maker));
                }
            }
        }
    }
}
