use fed_types::TypesError;

#[derive(Debug, thiserror::Error)]
pub enum FedError {
    #[error(transparent)]
    Types(#[from] TypesError),

    #[error("dimension mismatch: {0}")]
    DimensionMismatch(String),

    #[error("index out of bounds: {0}")]
    IndexOutOfBounds(String),

    #[error("unsupported federated {op}: {detail}")]
    Unsupported { op: String, detail: String },

    #[error("alignment violation: {0}")]
    Alignment(String),

    #[error("dispatch to {worker} failed: {message}")]
    Dispatch { worker: String, message: String },

    #[error("dispatch to {worker} timed out after {secs}s")]
    Timeout { worker: String, secs: u64 },

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("unknown variable: {0}")]
    UnknownVariable(String),

    #[error("execution error: {0}")]
    Execution(String),
}

/// Convenience alias used throughout this crate.
pub type Result<T> = std::result::Result<T, FedError>;
