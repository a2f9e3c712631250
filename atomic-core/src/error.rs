use thiserror::Error;

/// Error type shared by every layer of the client core.
///
/// Errors are `Clone` because a fetch failure is captured on the
/// [`Resource`](crate::Resource) and handed to every subscriber.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AtomicError {
    #[error("validation failed: {message}{}", .index.map(|i| format!(" (at index {i})")).unwrap_or_default())]
    Validation {
        message: String,
        index: Option<usize>,
    },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("server error {status}: {message}")]
    Server { status: u16, message: String },

    #[error("parse error: {0}")]
    Parse(String),

    #[error("no agent set, cannot sign or write")]
    AgentMissing,

    #[error("agent has no subject, cannot sign")]
    AgentSubjectMissing,

    #[error("invalid collection: {0}")]
    InvalidCollection(String),

    #[error("index {index} out of bounds (total {total})")]
    IndexOutOfBounds { index: usize, total: usize },

    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("invalid signature: {0}")]
    InvalidSignature(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("subscriber for {0} panicked")]
    Notification(String),
}

/// Fieldless view of [`AtomicError`], for callers that only branch on the kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Unauthorized,
    Network,
    Parse,
    AgentMissing,
    InvalidCollection,
    IndexOutOfBounds,
    TypeMismatch,
    Crypto,
    Config,
    Notification,
}

impl AtomicError {
    pub(crate) fn validation(message: impl Into<String>) -> Self {
        AtomicError::Validation {
            message: message.into(),
            index: None,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            AtomicError::Validation { .. } => ErrorKind::Validation,
            AtomicError::NotFound(_) => ErrorKind::NotFound,
            AtomicError::Unauthorized(_) => ErrorKind::Unauthorized,
            AtomicError::Network(_) | AtomicError::Server { .. } => ErrorKind::Network,
            AtomicError::Parse(_) => ErrorKind::Parse,
            AtomicError::AgentMissing | AtomicError::AgentSubjectMissing => ErrorKind::AgentMissing,
            AtomicError::InvalidCollection(_) => ErrorKind::InvalidCollection,
            AtomicError::IndexOutOfBounds { .. } => ErrorKind::IndexOutOfBounds,
            AtomicError::TypeMismatch { .. } => ErrorKind::TypeMismatch,
            AtomicError::InvalidKey(_) | AtomicError::InvalidSignature(_) => ErrorKind::Crypto,
            AtomicError::Config(_) => ErrorKind::Config,
            AtomicError::Notification(_) => ErrorKind::Notification,
        }
    }
}

impl From<serde_json::Error> for AtomicError {
    fn from(e: serde_json::Error) -> Self {
        AtomicError::Parse(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_message_includes_index() {
        let err = AtomicError::Validation {
            message: "not a valid URL".into(),
            index: Some(1),
        };
        assert_eq!(err.to_string(), "validation failed: not a valid URL (at index 1)");
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn server_errors_are_network_kind() {
        let err = AtomicError::Server {
            status: 500,
            message: "boom".into(),
        };
        assert_eq!(err.kind(), ErrorKind::Network);
    }
}
