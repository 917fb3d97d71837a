use thiserror::Error;

/// Error taxonomy shared by the graph store, the durable cache and the pipeline
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KgError {
    /// Operation attempted before the graph was loaded or initialised
    #[error("Knowledge graph not loaded")]
    NotLoaded,

    /// Unsupported path or visualization combination
    #[error("Not implemented: {0}")]
    NotImplemented(String),

    /// Missing required fields or duplicate update id
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Value handed to a node update has the wrong shape
    #[error("Type mismatch for '{path}': expected {expected}")]
    TypeMismatch {
        /// Node path being updated
        path: String,
        /// Description of the expected shape
        expected: String,
    },

    /// Named entry does not exist
    #[error("{0} not found")]
    NotFound(String),

    /// Disk failure
    #[error("Input/output error: {0}")]
    IOError(String),

    /// Document or payload could not be decoded
    #[error("Parse error: {0}")]
    ParseError(String),

    /// Document or payload could not be encoded
    #[error("Encode error: {0}")]
    EncodeError(String),

    /// Durable cache (or another dependency) unreachable
    #[error("Dependency unavailable: {0}")]
    DependencyUnavailable(String),

    /// The coordinator refuses writes while degraded
    #[error("Service is in degraded mode")]
    Degraded,

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// A publish failure wrapped with the caller's context
    #[error("{context}: {source}")]
    Publish {
        /// What the caller was trying to do
        context: String,
        /// Underlying failure
        source: Box<KgError>,
    },
}

/// Result type for knowledge graph operations
pub type KgResult<T> = Result<T, KgError>;

impl KgError {
    /// Wrap an error with publish context
    pub fn publish(context: impl Into<String>, source: KgError) -> Self {
        KgError::Publish {
            context: context.into(),
            source: Box::new(source),
        }
    }

    /// Check if the error is (or wraps) the degraded-mode refusal
    pub fn is_degraded(&self) -> bool {
        match self {
            KgError::Degraded => true,
            KgError::Publish { source, .. } => source.is_degraded(),
            _ => false,
        }
    }

    /// Innermost error, looking through publish wrappers
    pub fn root_cause(&self) -> &KgError {
        match self {
            KgError::Publish { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

impl From<serde_json::Error> for KgError {
    fn from(err: serde_json::Error) -> Self {
        KgError::ParseError(err.to_string())
    }
}

impl From<std::io::Error> for KgError {
    fn from(err: std::io::Error) -> Self {
        KgError::IOError(err.to_string())
    }
}

#[cfg(feature = "redis")]
impl From<redis::RedisError> for KgError {
    fn from(err: redis::RedisError) -> Self {
        KgError::DependencyUnavailable(format!("Redis error: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Error as IoError, ErrorKind};

    #[test]
    fn test_error_display() {
        let errors = vec![
            (KgError::NotLoaded, "Knowledge graph not loaded"),
            (KgError::NotImplemented("deep path".to_string()), "Not implemented: deep path"),
            (KgError::ValidationError("missing id".to_string()), "Validation error: missing id"),
            (KgError::NotFound("service 'user'".to_string()), "service 'user' not found"),
            (KgError::Degraded, "Service is in degraded mode"),
            (
                KgError::TypeMismatch { path: "version".to_string(), expected: "string".to_string() },
                "Type mismatch for 'version': expected string",
            ),
        ];

        for (error, expected_msg) in errors {
            assert_eq!(error.to_string(), expected_msg);
        }
    }

    #[test]
    fn test_degraded_seen_through_wrapping() {
        let wrapped = KgError::publish(
            "failed to publish service registration for user",
            KgError::publish("failed to publish update", KgError::Degraded),
        );

        assert!(wrapped.is_degraded());
        assert_eq!(wrapped.root_cause(), &KgError::Degraded);
        assert!(!KgError::publish("ctx", KgError::NotLoaded).is_degraded());
    }

    #[test]
    fn test_from_io_error() {
        let io_error = IoError::new(ErrorKind::NotFound, "file not found");
        let error: KgError = io_error.into();

        match error {
            KgError::IOError(msg) => assert!(msg.contains("file not found")),
            _ => panic!("Expected IOError variant"),
        }
    }

    #[test]
    fn test_from_serde_json_error() {
        let json_error = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let error: KgError = json_error.into();

        assert!(matches!(error, KgError::ParseError(_)));
    }
}
