use pipewatch_types::StackStatus;
use thiserror::Error;

/// Failure reported by a capability provider.
///
/// Lifecycle signals the engine acts on (`AlreadyExists`, `NoUpdates`,
/// `StackAbsent`) get their own variants; everything else is carried as text.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ServiceError {
    #[error("stack '{0}' already exists")]
    AlreadyExists(String),
    #[error("no updates are to be performed for stack '{0}'")]
    NoUpdates(String),
    #[error("stack '{0}' does not exist")]
    StackAbsent(String),
    #[error("stack '{stack}' was not deleted; last status {status:?}")]
    NotDeleted { stack: String, status: StackStatus },
    #[error("{kind} '{id}' was not found")]
    NotFound { kind: &'static str, id: String },
    #[error("request rejected with status {status}: {message}")]
    Rejected { status: u16, message: String },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("could not decode service response: {0}")]
    Decode(String),
}

impl ServiceError {
    /// Returns true for the "stack does not exist" lifecycle signal.
    pub fn is_absent(&self) -> bool {
        matches!(self, ServiceError::StackAbsent(_))
    }
}
