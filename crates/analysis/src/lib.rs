//! Static analysis of cell syntax trees: reference chains, liveness and
//! per-statement bound/read names.

pub mod liveness;
pub mod stmt_edges;
pub mod symbol_ref;
pub mod visitor;

pub use liveness::{
    compute_live_dead_refs, compute_live_dead_refs_for_cell, LivenessOptions, LivenessResult,
    RebindOracle,
};
pub use stmt_edges::{compute_lvals_rvals, StatementEdges};
pub use symbol_ref::{Atom, AtomKind, LiveSymbolRef, SymbolRef};
pub use visitor::Visitor;
