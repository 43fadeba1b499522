use thiserror::Error;

#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("threshold store operation failed: {0}")]
    OperationFailed(String),

    #[error("corrupt threshold record for {key}: {reason}")]
    CorruptRecord { key: String, reason: String },

    #[error("threshold store migration failed: {0}")]
    MigrationError(String),

    #[error("invalid threshold store input: {0}")]
    InvalidInput(String),
}
