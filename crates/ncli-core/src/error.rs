//! Error types for the ncli client core.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A shared error type for the client core and its collaborators.
///
/// The variants follow the client's error taxonomy: transport and protocol
/// failures, lock contention, assignment errors, test expectation mismatches
/// and local resource failures.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NcliError {
    /// Entity not found error with type information
    #[error("{entity_type} '{id}' not found")]
    NotFound {
        entity_type: &'static str,
        id: String,
    },

    /// IO error (file system operations)
    #[error("IO error: {message}")]
    Io { message: String },

    /// Serialization/deserialization error
    #[error("Serialization error: {format} - {message}")]
    Serialization {
        format: String, // "TOML", "JSON", "XML"
        message: String,
    },

    /// Configuration or preference error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Connect failure, dropped session or send failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// Malformed or rejected request
    #[error("Protocol error ({tag}): {message}")]
    Protocol { tag: String, message: String },

    /// Datastore lock could not be obtained
    #[error("Lock contention: {0}")]
    LockContention(String),

    /// Invalid assignment target, scope or syntax
    #[error("Assignment error: {0}")]
    Assignment(String),

    /// A request is already outstanding or an engine is already running
    #[error("Busy: {0}")]
    Busy(String),

    /// Operation not allowed in the current session or engine state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// A reply, lock sequence or connection attempt timed out
    #[error("Timeout: {0}")]
    Timeout(String),

    /// A test step did not produce the expected result
    #[error("Test expectation mismatch: {0}")]
    TestExpectation(String),

    /// Command execution error
    #[error("Execution error: {0}")]
    Execution(String),

    /// Internal error (should not happen in normal operation)
    #[error("Internal error: {0}")]
    Internal(String),

    /// Multiple errors
    #[error("Multiple errors occurred ({} total)", .0.len())]
    Multiple(Vec<NcliError>),
}

impl NcliError {
    // ============================================================================
    // Constructor helpers
    // ============================================================================

    /// Creates a NotFound error
    pub fn not_found(entity_type: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type,
            id: id.into(),
        }
    }

    /// Creates an IO error
    pub fn io(message: impl Into<String>) -> Self {
        Self::Io {
            message: message.into(),
        }
    }

    /// Creates a Config error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Creates a Transport error
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }

    /// Creates a Protocol error carrying the primary error tag
    pub fn protocol(tag: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Protocol {
            tag: tag.into(),
            message: message.into(),
        }
    }

    /// Creates an Assignment error
    pub fn assignment(message: impl Into<String>) -> Self {
        Self::Assignment(message.into())
    }

    /// Creates a Busy error
    pub fn busy(message: impl Into<String>) -> Self {
        Self::Busy(message.into())
    }

    /// Creates an InvalidState error
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState(message.into())
    }

    /// Creates a Timeout error
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Timeout(message.into())
    }

    /// Creates an Execution error
    pub fn execution(message: impl Into<String>) -> Self {
        Self::Execution(message.into())
    }

    /// Creates an Internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    // ============================================================================
    // Type checking methods
    // ============================================================================

    /// Check if this is a NotFound error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Check if this is an IO error
    pub fn is_io(&self) -> bool {
        matches!(self, Self::Io { .. })
    }

    /// Check if this is a transport-class error
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Timeout(_))
    }

    /// Check if this is an assignment error
    pub fn is_assignment(&self) -> bool {
        matches!(self, Self::Assignment(_))
    }

    /// Check if this is a Busy error
    pub fn is_busy(&self) -> bool {
        matches!(self, Self::Busy(_))
    }

    /// Returns true for errors raised on the local side only, which never
    /// reached the network (assignment and local resource errors).
    pub fn is_local(&self) -> bool {
        matches!(
            self,
            Self::Assignment(_)
                | Self::Io { .. }
                | Self::Serialization { .. }
                | Self::Config(_)
                | Self::NotFound { .. }
        )
    }
}

// ============================================================================
// From implementations for common error types
// ============================================================================

impl From<std::io::Error> for NcliError {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for NcliError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization {
            format: "JSON".to_string(),
            message: err.to_string(),
        }
    }
}

impl From<toml::de::Error> for NcliError {
    fn from(err: toml::de::Error) -> Self {
        Self::Serialization {
            format: "TOML".to_string(),
            message: err.to_string(),
        }
    }
}

impl From<toml::ser::Error> for NcliError {
    fn from(err: toml::ser::Error) -> Self {
        Self::Serialization {
            format: "TOML".to_string(),
            message: err.to_string(),
        }
    }
}

impl From<quick_xml::Error> for NcliError {
    fn from(err: quick_xml::Error) -> Self {
        Self::Serialization {
            format: "XML".to_string(),
            message: err.to_string(),
        }
    }
}

impl From<String> for NcliError {
    fn from(s: String) -> Self {
        Self::Internal(s)
    }
}

/// A type alias for `Result<T, NcliError>`.
pub type Result<T> = std::result::Result<T, NcliError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_display() {
        let err = NcliError::not_found("session", "lab1");
        assert_eq!(err.to_string(), "session 'lab1' not found");
        assert!(err.is_not_found());
        assert!(err.is_local());
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: NcliError = io.into();
        assert!(err.is_io());
    }

    #[test]
    fn test_transport_class() {
        assert!(NcliError::timeout("reply").is_transport());
        assert!(NcliError::transport("dropped").is_transport());
        assert!(!NcliError::assignment("x").is_transport());
    }

    #[test]
    fn test_protocol_carries_tag() {
        let err = NcliError::protocol("lock-denied", "already locked");
        assert_eq!(err.to_string(), "Protocol error (lock-denied): already locked");
    }
}
