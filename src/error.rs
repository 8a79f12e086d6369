//! Session error types

use std::fmt;

/// Errors that can occur during session operations
#[derive(Debug)]
pub enum SessionError {
    /// No provider factory registered under this name
    ProviderNotRegistered(String),
    /// A provider factory was registered twice under the same name
    DuplicateProvider(String),
    /// Invalid manager or provider configuration
    InvalidConfig(String),
    /// The OS random source could not produce a session ID
    Entropy(String),
    /// Error from the session provider
    StoreError(String),
    /// Error during serialization/deserialization
    SerializationError(String),
    /// The named operation did not finish before its deadline
    Timeout(&'static str),
    /// A provider or store error, tagged with the manager operation that hit it
    Operation {
        operation: &'static str,
        source: Box<SessionError>,
    },
    /// Redis error (when redis-store feature is enabled)
    #[cfg(feature = "redis-store")]
    RedisError(redis::RedisError),
}

impl SessionError {
    /// Tag an error with the manager operation it surfaced from.
    ///
    /// Already tagged errors keep their original operation.
    pub fn during(self, operation: &'static str) -> Self {
        match self {
            SessionError::Operation { .. } => self,
            other => SessionError::Operation {
                operation,
                source: Box::new(other),
            },
        }
    }

    /// The underlying error, with any operation tag removed
    pub fn root(&self) -> &SessionError {
        match self {
            SessionError::Operation { source, .. } => source.root(),
            other => other,
        }
    }
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::ProviderNotRegistered(name) => {
                write!(f, "Session provider not registered: {}", name)
            }
            SessionError::DuplicateProvider(name) => {
                write!(f, "Session provider registered twice: {}", name)
            }
            SessionError::InvalidConfig(msg) => write!(f, "Invalid session config: {}", msg),
            SessionError::Entropy(msg) => write!(f, "Random source unavailable: {}", msg),
            SessionError::StoreError(msg) => write!(f, "Session store error: {}", msg),
            SessionError::SerializationError(msg) => write!(f, "Serialization error: {}", msg),
            SessionError::Timeout(op) => write!(f, "Session operation timed out: {}", op),
            SessionError::Operation { operation, source } => {
                write!(f, "{} failed: {}", operation, source)
            }
            #[cfg(feature = "redis-store")]
            SessionError::RedisError(e) => write!(f, "Redis error: {}", e),
        }
    }
}

impl std::error::Error for SessionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SessionError::Operation { source, .. } => Some(source.as_ref()),
            #[cfg(feature = "redis-store")]
            SessionError::RedisError(e) => Some(e),
            _ => None,
        }
    }
}

#[cfg(feature = "redis-store")]
impl From<redis::RedisError> for SessionError {
    fn from(err: redis::RedisError) -> Self {
        SessionError::RedisError(err)
    }
}

impl From<serde_json::Error> for SessionError {
    fn from(err: serde_json::Error) -> Self {
        SessionError::SerializationError(err.to_string())
    }
}
