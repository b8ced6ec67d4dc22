//! Common error types for LedgerVault.

use thiserror::Error;

/// Top-level error type for LedgerVault operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed input or a rule violation in caller-supplied data.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Entry kind tag that no handler or factory is registered for.
    #[error("Unknown entry kind: {0}")]
    UnknownEntryKind(String),

    /// Resource not found (session, entry, vault metadata).
    #[error("Not found: {0}")]
    NotFound(String),

    /// Key derivation or authenticated decryption failed.
    ///
    /// Wrong passwords and tampered ciphertexts produce the same message.
    #[error("Cryptographic error: {0}")]
    Crypto(String),

    /// Content store unavailable or rejected the request.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Ledger submission failed.
    #[error("Anchor error: {0}")]
    Anchor(String),

    /// Audit/trace service unreachable. Never fatal to the caller.
    #[error("External commit error: {0}")]
    ExternalCommit(String),

    /// Durable metadata or session store failure.
    #[error("Database error: {0}")]
    Database(String),

    /// An external call exceeded its time budget.
    #[error("Timed out: {0}")]
    Timeout(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Operation not permitted.
    #[error("Not permitted: {0}")]
    NotPermitted(String),

    /// Resource already exists.
    #[error("Already exists: {0}")]
    AlreadyExists(String),
}

impl Error {
    /// Whether this error belongs to the validation class.
    ///
    /// Unknown entry kinds are validation errors too, but keep their own
    /// variant so callers can tell them apart from malformed bytes.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Error::Validation(_) | Error::UnknownEntryKind(_) | Error::Serialization(_)
        )
    }

    /// Whether this error is a transient failure of an external system.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Storage(_)
                | Error::Anchor(_)
                | Error::ExternalCommit(_)
                | Error::Timeout(_)
                | Error::Io(_)
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_class() {
        assert!(Error::Validation("bad".into()).is_validation());
        assert!(Error::UnknownEntryKind("bogus".into()).is_validation());
        assert!(!Error::NotFound("x".into()).is_validation());
    }

    #[test]
    fn test_transient_class() {
        assert!(Error::Storage("down".into()).is_transient());
        assert!(Error::Timeout("put".into()).is_transient());
        assert!(!Error::Crypto("could not open vault".into()).is_transient());
    }

    #[test]
    fn test_json_error_conversion() {
        let err: Error = serde_json::from_str::<u32>("nope").unwrap_err().into();
        assert!(matches!(err, Error::Serialization(_)));
    }
}
