//! Error handling for the acquisition engine
//!
//! This module defines the crate error type and a Result alias. Most of these
//! errors are recoverable at the reconciliation boundary (a bad subscription or
//! an unknown signal is logged and skipped); scheduler errors are fatal to the
//! worker that hit them.

use thiserror::Error;

/// Main error type for acquisition operations
#[derive(Error, Debug)]
pub enum AcquisitionError {
    /// A value outside the accepted vocabulary (e.g. an unknown acquisition mode)
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A query parameter could not be converted to its typed field
    #[error("Failed to deserialize '{key}': {message}")]
    Deserialization { key: String, message: String },

    /// The sink registry has no sink for the requested signal
    #[error("Unknown signal: {0}")]
    UnknownSignal(String),

    /// Starting, stopping or joining the graph execution thread failed
    #[error("Scheduler error: {0}")]
    Scheduler(String),

    /// Errors related to configuration loading/saving
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<AcquisitionError>,
    },
}

impl AcquisitionError {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        AcquisitionError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Whether this error only affects a single subscription or signal.
    ///
    /// Recoverable errors are logged and skipped by the reconciliation loop.
    pub fn is_recoverable(&self) -> bool {
        match self {
            AcquisitionError::InvalidArgument(_)
            | AcquisitionError::Deserialization { .. }
            | AcquisitionError::UnknownSignal(_) => true,
            AcquisitionError::WithContext { source, .. } => source.is_recoverable(),
            _ => false,
        }
    }
}

/// Result type alias for acquisition operations
pub type Result<T> = std::result::Result<T, AcquisitionError>;

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context lazily to an error result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.with_context(f()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = AcquisitionError::InvalidArgument("unknown mode 'burst'".to_string());
        assert_eq!(err.to_string(), "Invalid argument: unknown mode 'burst'");
    }

    #[test]
    fn test_error_with_context() {
        let err = AcquisitionError::UnknownSignal("A".to_string());
        let with_ctx = err.with_context("Failed to create poller");
        assert!(with_ctx.to_string().contains("Failed to create poller"));
        assert!(with_ctx.to_string().contains("Unknown signal: A"));
    }

    #[test]
    fn test_recoverable_errors() {
        assert!(AcquisitionError::UnknownSignal("A".into()).is_recoverable());
        assert!(AcquisitionError::Deserialization {
            key: "preSamples".into(),
            message: "invalid digit".into(),
        }
        .is_recoverable());
        assert!(AcquisitionError::InvalidArgument("x".into())
            .with_context("subscription")
            .is_recoverable());
        assert!(!AcquisitionError::Scheduler("panicked".into()).is_recoverable());
    }

    #[test]
    fn test_result_ext_context() {
        let result: Result<()> = Err(AcquisitionError::Config("missing".into()));
        let err = result.context("Loading worker config").unwrap_err();
        assert!(err.to_string().starts_with("Loading worker config"));
    }
}
