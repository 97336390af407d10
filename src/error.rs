use thiserror::Error;

pub type VellumResult<T, E = VellumError> = Result<T, E>;

#[derive(Debug, Error)]
pub enum VellumError {
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Transaction aborted: {0}")]
    TransactionAborted(String),
}

impl VellumError {
    /// True when the error means the calling transaction must abort.
    pub fn is_abort(&self) -> bool {
        matches!(self, VellumError::TransactionAborted(_))
    }
}
