use thiserror::Error;

pub type Result<T> = std::result::Result<T, CoreError>;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Invalid service name: {0:?}")]
    InvalidServiceName(String),

    #[error("Invalid service uri: {0:?} (expected host:port)")]
    InvalidUri(String),

    #[error("Malformed address record at {path}: {reason}")]
    MalformedRecord { path: String, reason: String },

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Conditional write conflict on {0}")]
    Conflict(String),

    #[error("Gave up on {path} after {attempts} conflicting writes")]
    ConflictRetriesExhausted { path: String, attempts: u32 },

    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    pub fn malformed(path: &str, reason: impl ToString) -> Self {
        CoreError::MalformedRecord {
            path: path.to_string(),
            reason: reason.to_string(),
        }
    }

    /// True for transport-level failures, as opposed to data or caller errors
    pub fn is_unavailable(&self) -> bool {
        matches!(self, CoreError::StoreUnavailable(_))
    }
}
