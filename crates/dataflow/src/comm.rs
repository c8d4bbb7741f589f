//! # Host requests
//!
//! JSON requests tagged with a `"type"` field, dispatched over a closed set
//! of request kinds. Failures of a single request are answered with an
//! `{"type", "error"}` payload; only a response that cannot be serialized is
//! reported to the caller as an error.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::cell::{CellId, CellMetadata};
use crate::error::{CommError, DataflowError};
use crate::scheduler::ExecSchedule;
use crate::session::{Session, SliceEntry, SliceGranularity, SliceSeed};
use crate::symbol::ValueId;

/// Every request type the dispatcher understands
pub const REQUEST_TYPES: &[&str] = &[
    "change_active_cell",
    "compute_exec_schedule",
    "reactivity_cleanup",
    "refresh_symbols",
    "upsert_symbol",
    "compute_slice",
];

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    ChangeActiveCell {
        active_cell_id: CellId,
    },
    ComputeExecSchedule {
        #[serde(default)]
        executed_cell_id: Option<CellId>,
        #[serde(default)]
        cell_metadata_by_id: Option<BTreeMap<CellId, CellMetadata>>,
    },
    ReactivityCleanup,
    RefreshSymbols {
        #[serde(default)]
        symbols: Vec<String>,
    },
    UpsertSymbol {
        symbol: String,
        value: ValueId,
        #[serde(default)]
        deps: Vec<String>,
    },
    ComputeSlice {
        seeds: Vec<SliceSeed>,
        #[serde(default)]
        granularity: SliceGranularity,
    },
}

impl Request {
    pub const fn request_type(&self) -> &'static str {
        match self {
            Self::ChangeActiveCell { .. } => "change_active_cell",
            Self::ComputeExecSchedule { .. } => "compute_exec_schedule",
            Self::ReactivityCleanup => "reactivity_cleanup",
            Self::RefreshSymbols { .. } => "refresh_symbols",
            Self::UpsertSymbol { .. } => "upsert_symbol",
            Self::ComputeSlice { .. } => "compute_slice",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    ChangeActiveCell,
    ComputeExecSchedule(ExecSchedule),
    ReactivityCleanup,
    RefreshSymbols,
    UpsertSymbol,
    ComputeSlice { slice: Vec<SliceEntry> },
}

/// Decode a request, telling unknown request types apart from malformed
/// payloads of known ones
pub fn parse_request(message: &str) -> Result<Request, CommError> {
    let value: Value = serde_json::from_str(message).map_err(|err| CommError::MalformedRequest {
        request_type: "unknown".to_string(),
        reason: err.to_string(),
    })?;
    let request_type = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| CommError::MalformedRequest {
            request_type: "unknown".to_string(),
            reason: "missing `type` field".to_string(),
        })?
        .to_string();
    if !REQUEST_TYPES.contains(&request_type.as_str()) {
        return Err(CommError::UnsupportedRequest(request_type));
    }
    serde_json::from_value(value).map_err(|err| CommError::MalformedRequest {
        request_type,
        reason: err.to_string(),
    })
}

impl Session {
    pub fn handle_request(&mut self, request: Request) -> Result<Response, CommError> {
        let request_type = request.request_type();
        let _span = tracing::debug_span!("request", request_type).entered();
        let handler_error = |source: DataflowError| CommError::Handler {
            request_type: request_type.to_string(),
            source,
        };
        let response = match request {
            Request::ChangeActiveCell { active_cell_id } => {
                self.set_active_cell(&active_cell_id);
                Response::ChangeActiveCell
            }
            Request::ComputeExecSchedule {
                executed_cell_id,
                cell_metadata_by_id,
            } => Response::ComputeExecSchedule(
                self.compute_exec_schedule(
                    executed_cell_id.as_deref(),
                    cell_metadata_by_id.as_ref(),
                )
                .map_err(handler_error)?,
            ),
            Request::ReactivityCleanup => {
                self.reactivity_cleanup();
                Response::ReactivityCleanup
            }
            Request::RefreshSymbols { symbols } => {
                self.refresh_symbols(&symbols).map_err(handler_error)?;
                Response::RefreshSymbols
            }
            Request::UpsertSymbol {
                symbol,
                value,
                deps,
            } => {
                self.upsert_symbol(&symbol, value, &deps)
                    .map_err(handler_error)?;
                Response::UpsertSymbol
            }
            Request::ComputeSlice { seeds, granularity } => Response::ComputeSlice {
                slice: self
                    .compute_slice(&seeds, granularity)
                    .map_err(handler_error)?,
            },
        };
        Ok(response)
    }
}

#[derive(Serialize)]
struct ErrorPayload<'a> {
    #[serde(rename = "type")]
    request_type: &'a str,
    error: String,
}

fn error_payload(err: &CommError) -> Result<String, CommError> {
    let payload = ErrorPayload {
        request_type: err.request_type(),
        error: err.to_string(),
    };
    serde_json::to_string(&payload).map_err(|source| CommError::Serialization {
        request_type: err.request_type().to_string(),
        source,
    })
}

/// Answer one JSON request with one JSON response
pub fn handle_message(session: &mut Session, message: &str) -> Result<String, CommError> {
    let outcome = parse_request(message).and_then(|request| {
        let request_type = request.request_type();
        let response = session.handle_request(request)?;
        serde_json::to_string(&response).map_err(|source| CommError::Serialization {
            request_type: request_type.to_string(),
            source,
        })
    });
    match outcome {
        Ok(response) => Ok(response),
        Err(err @ CommError::Serialization { .. }) => Err(err),
        Err(err @ CommError::UnsupportedRequest(_)) => {
            tracing::error!("{err}");
            error_payload(&err)
        }
        Err(err) => {
            tracing::warn!("{err}");
            error_payload(&err)
        }
    }
}
