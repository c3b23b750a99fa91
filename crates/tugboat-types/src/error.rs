use serde::{Deserialize, Serialize};

/// Error kind taxonomy shared across the signing, client, and engine layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Bad or missing signature.
    Unauthorized,
    /// The referenced container/image/host does not exist.
    NotFound,
    /// The agent ran the operation and reported a failure.
    EngineError,
    /// Connect/read/write failure talking to an agent.
    TransportError,
    /// The operation exceeded its configured deadline.
    Timeout,
    /// The request body or arguments failed validation.
    ValidationError,
    /// An internal invariant was violated (e.g. missing image spec).
    InvariantViolation,
    /// Anything else.
    Internal,
}

/// A classified error carrying engine-facing context.
#[derive(Debug, thiserror::Error)]
#[error("{kind:?}: {message}")]
pub struct TugboatError {
    /// Which bucket this error falls into.
    pub kind: ErrorKind,
    /// Human-readable detail, echoed verbatim to callers where appropriate
    /// (e.g. agent-reported stdout/stderr).
    pub message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl TugboatError {
    /// Build a new classified error with no source.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    /// Attach a source error for `Display`/`source()` chaining.
    pub fn with_source(
        kind: ErrorKind,
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            kind,
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Convenience constructor for `invariant_violation`.
    pub fn invariant(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvariantViolation, message)
    }

    /// Convenience constructor for `not_found`.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }
}
