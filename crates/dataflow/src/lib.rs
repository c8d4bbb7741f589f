//! Fine-grained dataflow tracking for interactively executed notebook cells.
//!
//! A [`Session`] records which symbol versions every cell execution read and
//! wrote, links cells and statements through static and dynamic data edges,
//! and classifies cells as ready or waiting under the configured
//! [`Settings`]. Hosts talk to it through [`comm::handle_message`].

pub mod alias;
pub mod cell;
pub mod comm;
pub mod error;
pub mod graph;
pub mod resolve;
pub mod scheduler;
pub mod scope;
pub mod session;
pub mod settings;
pub mod statement;
pub mod symbol;
pub mod symbol_table;
pub mod synthetic;
pub mod timestamp;
pub mod trace;

pub use cell::{CellId, CellMetadata};
pub use comm::{handle_message, Request, Response};
pub use error::{CommError, ConfigError, DataflowError, Result};
pub use graph::SliceKind;
pub use scheduler::{ExecSchedule, FrontendCheckerResult};
pub use session::{Precheck, Session, SliceEntry, SliceGranularity, SliceSeed};
pub use settings::{ExecutionMode, ExecutionSchedule, FlowDirection, Settings};
pub use symbol::{SymbolFlags, SymbolId, ValueId};
pub use timestamp::Timestamp;
pub use trace::{StoreKind, TraceEvent};
