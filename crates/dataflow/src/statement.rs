use std::fmt;

use crate::cell::CellId;
use crate::graph::{EdgeMaps, Sliceable};
use crate::timestamp::Timestamp;

/// A top-level statement slot of a cell
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StatementKey {
    pub cell_id: CellId,
    pub index: usize,
}

impl fmt::Display for StatementKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.cell_id, self.index)
    }
}

/// One execution of a top-level statement
#[derive(Debug, Clone)]
pub struct Statement {
    pub key: StatementKey,
    pub timestamp: Timestamp,
    pub text: String,
    edges: EdgeMaps<StatementKey>,
}

impl Statement {
    pub fn new(key: StatementKey, timestamp: Timestamp, text: String) -> Self {
        Self {
            key,
            timestamp,
            text,
            edges: EdgeMaps::default(),
        }
    }
}

impl Sliceable for Statement {
    type Key = StatementKey;

    fn key(&self) -> &StatementKey {
        &self.key
    }

    fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    fn locate(ts: Timestamp) -> Timestamp {
        ts
    }

    fn text(&self) -> &str {
        &self.text
    }

    fn edges(&self) -> &EdgeMaps<StatementKey> {
        &self.edges
    }

    fn edges_mut(&mut self) -> &mut EdgeMaps<StatementKey> {
        &mut self.edges
    }
}
