use std::fmt::Display;

/// Domain errors surfaced to clients. Everything else rides through
/// `anyhow` and is reported as an internal error at the HTTP boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum ServiceError {
    /// Bad input shape or content. Client fault, never retried.
    Validation(String),
    /// Payload content type outside the accepted set.
    UnsupportedMedia(String),
    /// Payload exceeds the configured ceiling.
    PayloadTooLarge { size: u64, limit: u64 },
    /// Required external configuration is missing. Surfaced immediately,
    /// never queued.
    Configuration(String),
    /// Unknown task, or an artifact expected but absent.
    NotFound(String),
    /// A record with this id already exists.
    AlreadyExists(String),
    /// client_id does not match the task owner.
    Authorization(String),
    /// Local retrieval is not permitted for this task (remote path set).
    Forbidden(String),
    /// The task has not reached a state where the operation applies.
    NotReady(String),
    /// A downstream dependency (processor, remote storage) failed.
    Downstream(String),
    /// Acquisition timed out. Surfaced synchronously, no task created.
    Timeout(String),
}

impl Display for ServiceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServiceError::Validation(msg) => write!(f, "validation error: {}", msg),
            ServiceError::UnsupportedMedia(msg) => write!(f, "unsupported media type: {}", msg),
            ServiceError::PayloadTooLarge { size, limit } => {
                write!(f, "payload of {} bytes exceeds limit of {} bytes", size, limit)
            }
            ServiceError::Configuration(msg) => write!(f, "configuration error: {}", msg),
            ServiceError::NotFound(msg) => write!(f, "not found: {}", msg),
            ServiceError::AlreadyExists(msg) => write!(f, "already exists: {}", msg),
            ServiceError::Authorization(msg) => write!(f, "access denied: {}", msg),
            ServiceError::Forbidden(msg) => write!(f, "forbidden: {}", msg),
            ServiceError::NotReady(msg) => write!(f, "not ready: {}", msg),
            ServiceError::Downstream(msg) => write!(f, "downstream error: {}", msg),
            ServiceError::Timeout(msg) => write!(f, "timed out: {}", msg),
        }
    }
}

impl std::error::Error for ServiceError {}
