//! Error types for SiGa middleware operations.

use thiserror::Error;

/// Result type for SiGa middleware operations
pub type SigaResult<T> = Result<T, SigaError>;

/// Error kinds surfaced by the middleware.
///
/// The variant is the error kind; lower layers pick the kind once and upper
/// layers only prepend the failing step to the message (see [`Step`]).
#[derive(Error, Debug, miette::Diagnostic)]
pub enum SigaError {
    #[error("invalid input: {0}")]
    Validation(String),

    #[error("malformed container: {0}")]
    BadContainer(String),

    #[error("service error: {0}")]
    Service(ServiceError),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("internal error: {0}")]
    Internal(String),
}

/// A non-2xx answer from the SiGa service.
#[derive(Debug, Clone)]
pub struct ServiceError {
    /// HTTP status code of the response.
    pub status: u16,
    /// `errorCode` from the response body, if the body decoded.
    pub code: Option<String>,
    /// `errorMessage` from the response body, if the body decoded.
    pub message: Option<String>,
    /// Body decode failure, when the error body was not the contracted JSON.
    pub decode: Option<String>,
}

impl std::fmt::Display for ServiceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "http {}", self.status)?;
        if let Some(decode) = &self.decode {
            write!(f, ", decode err: {decode}")?;
        } else if let Some(code) = &self.code {
            write!(f, ", code {}, {}", code, self.message.as_deref().unwrap_or(""))?;
        }
        Ok(())
    }
}

impl From<std::io::Error> for SigaError {
    fn from(err: std::io::Error) -> Self {
        SigaError::Internal(err.to_string())
    }
}

impl SigaError {
    /// Prepend the failing step to the message, keeping the error kind.
    #[must_use]
    pub fn step(self, step: &str) -> Self {
        match self {
            SigaError::Validation(msg) => SigaError::Validation(format!("{step}: {msg}")),
            SigaError::BadContainer(msg) => SigaError::BadContainer(format!("{step}: {msg}")),
            SigaError::Service(inner) => SigaError::Service(inner),
            SigaError::Transport(msg) => SigaError::Transport(format!("{step}: {msg}")),
            SigaError::Protocol(msg) => SigaError::Protocol(format!("{step}: {msg}")),
            SigaError::NotFound(msg) => SigaError::NotFound(format!("{step}: {msg}")),
            SigaError::Internal(msg) => SigaError::Internal(format!("{step}: {msg}")),
        }
    }
}

/// Tags errors with the step that failed, the way the orchestrator reports
/// them ("post siga", "put status", "from hashcode", ...).
pub trait Step<T> {
    fn step(self, step: &str) -> SigaResult<T>;
}

impl<T> Step<T> for SigaResult<T> {
    fn step(self, step: &str) -> SigaResult<T> {
        self.map_err(|e| e.step(step))
    }
}
