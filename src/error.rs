use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScriptError {
    #[error("Script not found: {0}")]
    ScriptNotFound(String),

    #[error("Running script not found: {0}")]
    RunNotFound(String),

    #[error("Script execution failed: {0}")]
    Execution(String),

    #[error("No candidate could satisfy the request: {}", .causes.join("; "))]
    Service { causes: Vec<String> },

    #[error("Call timed out after {0:?}")]
    Timeout(Duration),

    #[error("gRPC error: {0}")]
    Grpc(#[from] tonic::Status),

    #[error("Transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ScriptError {
    /// Collapse per-candidate failure messages into one aggregate error.
    pub fn aggregate(causes: Vec<String>) -> Self {
        ScriptError::Service { causes }
    }
}

impl From<ScriptError> for tonic::Status {
    fn from(err: ScriptError) -> Self {
        match err {
            ScriptError::ScriptNotFound(_) | ScriptError::RunNotFound(_) => {
                tonic::Status::not_found(err.to_string())
            }
            ScriptError::Execution(_) => tonic::Status::failed_precondition(err.to_string()),
            ScriptError::Service { .. } => tonic::Status::unavailable(err.to_string()),
            ScriptError::Timeout(_) => tonic::Status::deadline_exceeded(err.to_string()),
            ScriptError::Grpc(status) => status,
            ScriptError::Transport(_) | ScriptError::Internal(_) => {
                tonic::Status::internal(err.to_string())
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, ScriptError>;
