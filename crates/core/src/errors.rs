use thiserror::Error;

use crate::domain::request::{RequestId, RequestStatus};

/// Error taxonomy for approval-engine operations. Every failure is a
/// typed value returned to the caller; the engine never retries on its
/// own.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum EngineError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("request `{0}` not found")]
    NotFound(RequestId),
    #[error("not permitted: {0}")]
    Authorization(String),
    #[error("no legal transition from {from:?}")]
    InvalidTransition { from: RequestStatus },
    #[error("dependency failure: {0}")]
    Dependency(String),
}
