//! # Cells
//!
//! A [`CellRecord`] is the host's view of a cell: stable id, position, current
//! content and ready flag. Every execution of a cell additionally produces a
//! [`CodeCell`] version in the cell-level slice graph.

use cellflow_parser::{CellSource, ParserDatabaseImpl};
use rustc_hash::FxHashMap;
use salsa::Setter;
use serde::Deserialize;

use crate::graph::{EdgeMaps, Sliceable};
use crate::timestamp::Timestamp;

pub type CellId = String;

/// One executed version of a cell
#[derive(Debug, Clone)]
pub struct CodeCell {
    pub cell_id: CellId,
    pub counter: i64,
    /// Content as it was when this version ran
    pub content: String,
    edges: EdgeMaps<CellId>,
}

impl CodeCell {
    pub fn new(cell_id: CellId, counter: i64, content: String) -> Self {
        Self {
            cell_id,
            counter,
            content,
            edges: EdgeMaps::default(),
        }
    }
}

impl Sliceable for CodeCell {
    type Key = CellId;

    fn key(&self) -> &CellId {
        &self.cell_id
    }

    fn timestamp(&self) -> Timestamp {
        Timestamp::new(self.counter, 0)
    }

    fn locate(ts: Timestamp) -> Timestamp {
        Timestamp::new(ts.cell_counter, 0)
    }

    fn text(&self) -> &str {
        &self.content
    }

    fn edges(&self) -> &EdgeMaps<CellId> {
        &self.edges
    }

    fn edges_mut(&mut self) -> &mut EdgeMaps<CellId> {
        &mut self.edges
    }
}

#[derive(Debug, Clone)]
pub struct CellRecord {
    pub id: CellId,
    pub position: i64,
    pub source: CellSource,
    pub is_ready: bool,
    pub override_live_refs: Vec<String>,
    pub override_dead_refs: Vec<String>,
}

impl CellRecord {
    /// Set the ready flag, returning the previous value
    pub fn set_ready(&mut self, is_ready: bool) -> bool {
        std::mem::replace(&mut self.is_ready, is_ready)
    }
}

/// Per-cell data attached to a schedule request
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CellMetadata {
    #[serde(rename = "type", default = "CellMetadata::default_type")]
    pub cell_type: String,
    pub index: i64,
    pub content: String,
    #[serde(default)]
    pub override_live_refs: Option<Vec<String>>,
    #[serde(default)]
    pub override_dead_refs: Option<Vec<String>>,
}

impl CellMetadata {
    fn default_type() -> String {
        "code".to_string()
    }

    /// Non-code cells only take part when they carry override references
    pub fn is_checked(&self) -> bool {
        self.cell_type == "code"
            || self.override_live_refs.as_ref().is_some_and(|refs| !refs.is_empty())
            || self.override_dead_refs.as_ref().is_some_and(|refs| !refs.is_empty())
    }
}

/// Every cell the host has told us about, keyed by id
#[derive(Debug, Default)]
pub struct CellStore {
    records: FxHashMap<CellId, CellRecord>,
}

impl CellStore {
    pub fn get(&self, id: &str) -> Option<&CellRecord> {
        self.records.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut CellRecord> {
        self.records.get_mut(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.records.contains_key(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &CellRecord> {
        self.records.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut CellRecord> {
        self.records.values_mut()
    }

    /// Create the cell or replace its content. New cells are positioned after
    /// every known cell.
    pub fn upsert(&mut self, db: &mut ParserDatabaseImpl, id: &str, content: &str) -> &mut CellRecord {
        let next_position = self
            .records
            .values()
            .map(|record| record.position + 1)
            .max()
            .unwrap_or(0);
        let record = self
            .records
            .entry(id.to_string())
            .or_insert_with(|| CellRecord {
                id: id.to_string(),
                position: next_position,
                source: CellSource::new(&*db, content.to_string()),
                is_ready: false,
                override_live_refs: Vec::new(),
                override_dead_refs: Vec::new(),
            });
        if record.source.text(&*db) != content {
            record.source.set_text(db).to(content.to_string());
        }
        record
    }

    pub fn content<'db>(&self, db: &'db ParserDatabaseImpl, id: &str) -> Option<&'db str> {
        self.records.get(id).map(|record| record.source.text(db).as_str())
    }
}
