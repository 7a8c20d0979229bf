use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum HarvestError {
    #[error("invalid field name: {0}")]
    InvalidField(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("S-PLUS request failed: {0}")]
    Http(String),

    #[error("S-PLUS request timed out: {0}")]
    Timeout(String),

    #[error("S-PLUS returned status {status}: {message}")]
    Status { status: u16, message: String },

    #[error("query rejected by S-PLUS: {0}")]
    RemoteQuery(String),

    #[error("session already closed")]
    SessionClosed,

    #[error("cannot coerce column {column}: {message}")]
    Coercion { column: String, message: String },

    #[error("column {column} has conflicting types: {message}")]
    SchemaConflict { column: String, message: String },

    #[error("failed to write combined artifact: {0}")]
    Aggregation(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("failed to read field list: {0}")]
    Input(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),
}

impl HarvestError {
    /// Whether another attempt against the remote service could succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            HarvestError::Http(_)
            | HarvestError::Timeout(_)
            | HarvestError::Status { .. }
            | HarvestError::RemoteQuery(_) => true,
            HarvestError::InvalidField(_)
            | HarvestError::Auth(_)
            | HarvestError::SessionClosed
            | HarvestError::Coercion { .. }
            | HarvestError::SchemaConflict { .. }
            | HarvestError::Aggregation(_)
            | HarvestError::ConfigRead(_)
            | HarvestError::ConfigParse(_)
            | HarvestError::Input(_)
            | HarvestError::Filesystem(_) => false,
        }
    }
}
