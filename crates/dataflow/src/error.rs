use std::path::PathBuf;

use cellflow_diagnostics::Diagnostic;
use thiserror::Error;

use crate::cell::CellId;
use crate::timestamp::Timestamp;

pub type Result<T, E = DataflowError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum DataflowError {
    #[error("unknown cell `{0}`")]
    UnknownCell(CellId),
    #[error("cell `{cell_id}` does not parse ({} error(s))", .diagnostics.len())]
    Syntax {
        cell_id: CellId,
        diagnostics: Vec<Diagnostic>,
    },
    #[error("no cell or statement ran at {0}")]
    UnknownTimestamp(Timestamp),
    #[error("no cell is executing")]
    NoActiveExecution,
    #[error("cell `{0}` is still executing")]
    AlreadyExecuting(CellId),
    #[error("invalid symbol reference `{0}`")]
    InvalidReference(String),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid settings file: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("unknown value `{value}` for {setting}")]
    UnknownValue { setting: &'static str, value: String },
}

/// Failures of the host request protocol.
///
/// Everything except [`CommError::Serialization`] is reported back to the host
/// as an error payload; serialization failures abort the one request.
#[derive(Debug, Error)]
pub enum CommError {
    #[error("unsupported request type `{0}`")]
    UnsupportedRequest(String),
    #[error("malformed `{request_type}` request: {reason}")]
    MalformedRequest { request_type: String, reason: String },
    #[error("`{request_type}` failed: {source}")]
    Handler {
        request_type: String,
        #[source]
        source: DataflowError,
    },
    #[error("failed to serialize `{request_type}` response: {source}")]
    Serialization {
        request_type: String,
        #[source]
        source: serde_json::Error,
    },
}

impl CommError {
    pub fn request_type(&self) -> &str {
        match self {
            Self::UnsupportedRequest(request_type)
            | Self::MalformedRequest { request_type, .. }
            | Self::Handler { request_type, .. }
            | Self::Serialization { request_type, .. } => request_type,
        }
    }
}
