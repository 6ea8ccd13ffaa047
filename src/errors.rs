use std::time::Duration;
use thiserror::Error;

use crate::models::ModelError;

/// Failure taxonomy for module loading and extraction calls.
///
/// Only `ContextMissing` is expected to surface to embedders as a hard error;
/// everything else is absorbed by the orchestrator's strategy fallback and
/// reported through diagnostics instead.
#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("module load failed: {0}")]
    Load(String),
    #[error("no execution context for module '{0}'")]
    ContextMissing(String),
    #[error("function not found: {0}")]
    FunctionMissing(String),
    #[error("call timed out after {0:?}")]
    Timeout(Duration),
    #[error("malformed result: {0}")]
    Malformed(String),
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error("http error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("host not allowed: {0}")]
    HostNotAllowed(String),
    #[error("cancelled")]
    Cancelled,
}

impl ExtractError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ExtractError::Cancelled)
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, ExtractError::Timeout(_))
    }
}
