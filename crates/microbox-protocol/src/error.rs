//! Error taxonomy shared by the kernel and every capability adapter.

use thiserror::Error;

use crate::capability::CapabilityKind;

/// Errors surfaced by assembly, lifecycle, and capability operations.
///
/// Capability-specific variants (`NotFound`, `Unauthorized`, the token
/// variants) are produced by adapters and travel to the caller unchanged.
#[derive(Debug, Error)]
pub enum KernelError {
    #[error("invalid option {option}: {reason}")]
    Validation { option: &'static str, reason: String },
    #[error("{capability} connection failed: {reason}")]
    Connection {
        capability: CapabilityKind,
        reason: String,
    },
    #[error("{capability} failed to start: {source}")]
    Startup {
        capability: CapabilityKind,
        #[source]
        source: Box<KernelError>,
    },
    #[error("not found: {0}")]
    NotFound(String),
    #[error("already exists: {0}")]
    AlreadyExists(String),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("token expired")]
    TokenExpired,
    #[error("token invalid")]
    TokenInvalid,
    #[error("token revoked")]
    TokenRevoked,
    #[error("invalid state: {0}")]
    InvalidState(String),
    #[error("io error: {0}")]
    Io(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("runtime error: {0}")]
    Runtime(String),
}

impl KernelError {
    pub fn validation(option: &'static str, reason: impl Into<String>) -> Self {
        Self::Validation {
            option,
            reason: reason.into(),
        }
    }

    pub fn connection(capability: CapabilityKind, reason: impl Into<String>) -> Self {
        Self::Connection {
            capability,
            reason: reason.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized(_))
    }
}

impl From<std::io::Error> for KernelError {
    fn from(error: std::io::Error) -> Self {
        Self::Io(error.to_string())
    }
}

impl From<serde_json::Error> for KernelError {
    fn from(error: serde_json::Error) -> Self {
        Self::Serialization(error.to_string())
    }
}

/// Convenience result type for kernel operations.
pub type KernelResult<T> = Result<T, KernelError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn startup_error_names_capability_and_cause() {
        let error = KernelError::Startup {
            capability: CapabilityKind::Registry,
            source: Box::new(KernelError::connection(
                CapabilityKind::Registry,
                "agent unreachable",
            )),
        };
        let rendered = error.to_string();
        assert!(rendered.starts_with("registry failed to start"));
        assert!(rendered.contains("agent unreachable"));
    }

    #[test]
    fn io_errors_convert() {
        let error: KernelError = std::io::Error::other("disk gone").into();
        assert!(matches!(error, KernelError::Io(message) if message.contains("disk gone")));
    }
}
