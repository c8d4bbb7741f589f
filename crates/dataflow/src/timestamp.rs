use std::fmt;

use serde::{Deserialize, Serialize};

/// Logical time: the execution counter of a cell plus the index of the
/// statement within that execution.
///
/// Ordered lexicographically. Host-side updates that happen between cell
/// executions use statement index `-1` of the next counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "(i64, i64)", into = "(i64, i64)")]
pub struct Timestamp {
    pub cell_counter: i64,
    pub stmt_counter: i64,
}

impl Timestamp {
    pub const UNINITIALIZED: Self = Self::new(-1, -1);

    pub const fn new(cell_counter: i64, stmt_counter: i64) -> Self {
        Self {
            cell_counter,
            stmt_counter,
        }
    }

    pub const fn is_initialized(self) -> bool {
        self.cell_counter >= 0
    }
}

impl Default for Timestamp {
    fn default() -> Self {
        Self::UNINITIALIZED
    }
}

impl From<(i64, i64)> for Timestamp {
    fn from((cell_counter, stmt_counter): (i64, i64)) -> Self {
        Self::new(cell_counter, stmt_counter)
    }
}

impl From<Timestamp> for (i64, i64) {
    fn from(ts: Timestamp) -> Self {
        (ts.cell_counter, ts.stmt_counter)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.cell_counter, self.stmt_counter)
    }
}
