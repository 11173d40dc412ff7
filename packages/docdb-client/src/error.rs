//! Client error types.

use thiserror::Error;

/// Errors returned by [`DocumentStore`](crate::DocumentStore) operations.
#[derive(Error, Debug, Clone)]
pub enum ClientError {
    /// The service answered with a non-success status
    #[error("Service returned {status} ({code}): {message}")]
    Service {
        status: u16,
        code: String,
        message: String,
    },

    /// Transport failure before a response was received
    #[error("Network error: {0}")]
    Network(String),

    /// Request or response body could not be (de)serialized
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// No credential covers the requested resource
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// A partition resolver could not place the document
    #[error("Partition resolution failed: {0}")]
    PartitionResolution(String),

    /// Resource link could not be parsed
    #[error("Invalid resource link '{0}'")]
    InvalidLink(String),

    /// Response was well-formed but did not have the expected shape
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl ClientError {
    /// HTTP status reported by the service, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::Service { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// True when the service reported the resource as missing.
    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }

    /// True when the credential was recognised but access was refused.
    pub fn is_forbidden(&self) -> bool {
        self.status() == Some(403)
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        ClientError::Serialization(err.to_string())
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ClientError::Serialization(err.to_string())
        } else {
            ClientError::Network(err.to_string())
        }
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn service(status: u16) -> ClientError {
        ClientError::Service {
            status,
            code: "X".to_string(),
            message: "m".to_string(),
        }
    }

    #[test]
    fn classifies_service_statuses() {
        assert!(service(404).is_not_found());
        assert!(service(403).is_forbidden());
        assert_eq!(service(409).status(), Some(409));
        assert!(!service(500).is_not_found());
        assert_eq!(ClientError::Network("down".into()).status(), None);
    }

    #[test]
    fn display_includes_code_and_message() {
        let err = ClientError::Service {
            status: 403,
            code: "Forbidden".to_string(),
            message: "partition mismatch".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Service returned 403 (Forbidden): partition mismatch"
        );
    }
}
