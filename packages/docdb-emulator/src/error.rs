//! Emulator error types.

use docdb_client::ClientError;
use thiserror::Error;

/// Errors raised by emulator operations, each mapping to one HTTP status.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EmulatorError {
    /// Malformed request: bad link, missing partition key, unsupported query
    #[error("{0}")]
    BadRequest(String),

    /// Missing, malformed or unknown credential
    #[error("{0}")]
    Unauthorized(String),

    /// Credential is valid but does not cover the request
    #[error("{0}")]
    Forbidden(String),

    /// Resource does not exist
    #[error("Resource '{0}' not found")]
    NotFound(String),

    /// Resource with the same id already exists
    #[error("Resource '{0}' already exists")]
    Conflict(String),

    /// Procedure handler failed
    #[error("Procedure '{name}' failed: {message}")]
    Procedure { name: String, message: String },
}

impl EmulatorError {
    pub fn status(&self) -> u16 {
        match self {
            EmulatorError::BadRequest(_) | EmulatorError::Procedure { .. } => 400,
            EmulatorError::Unauthorized(_) => 401,
            EmulatorError::Forbidden(_) => 403,
            EmulatorError::NotFound(_) => 404,
            EmulatorError::Conflict(_) => 409,
        }
    }

    /// Error code carried in response bodies.
    pub fn code(&self) -> &'static str {
        match self {
            EmulatorError::BadRequest(_) | EmulatorError::Procedure { .. } => "BadRequest",
            EmulatorError::Unauthorized(_) => "Unauthorized",
            EmulatorError::Forbidden(_) => "Forbidden",
            EmulatorError::NotFound(_) => "NotFound",
            EmulatorError::Conflict(_) => "Conflict",
        }
    }
}

impl From<ClientError> for EmulatorError {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::Unauthorized(msg) => EmulatorError::Unauthorized(msg),
            other => EmulatorError::BadRequest(other.to_string()),
        }
    }
}

impl From<EmulatorError> for ClientError {
    fn from(err: EmulatorError) -> Self {
        ClientError::Service {
            status: err.status(),
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, EmulatorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_to_service_errors() {
        let err: ClientError = EmulatorError::Forbidden("partition mismatch".into()).into();
        assert!(err.is_forbidden());

        let err: ClientError = EmulatorError::NotFound("dbs/a/users/u".into()).into();
        assert!(err.is_not_found());
        assert_eq!(
            err.to_string(),
            "Service returned 404 (NotFound): Resource 'dbs/a/users/u' not found"
        );
    }

    #[test]
    fn link_errors_become_bad_requests() {
        let err: EmulatorError = ClientError::InvalidLink("tables/x".into()).into();
        assert_eq!(err.status(), 400);
    }
}
