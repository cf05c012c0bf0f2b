//! Error types for the common library.
//!
//! This module provides a unified error hierarchy using `thiserror` for consistent
//! error handling between the dispatcher, the backend client and the poll loop.
//!
//! # Error Categories
//!
//! - `ConfigError`: Invalid configuration
//! - `Error::Backend`: Non-success HTTP from the backend (includes endpoint and status)
//! - `Error::ProtocolMismatch`: Backend response in none of the known shapes
//! - `Error::GenerationFailed`: Backend reported a failed job
//! - `Error::TimedOut` / `Error::AttemptsExhausted`: Poll budgets exceeded
//! - `Error::Transient`: A single poll iteration failed; retried, never surfaced

use thiserror::Error;

/// Unified error type for the common library.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration errors (invalid env values)
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Backend errors with endpoint and HTTP status context.
    ///
    /// A status code of 0 means the request never produced a response
    /// (connection refused, client timeout).
    #[error("Backend returned HTTP {status_code} for {endpoint}: {message}")]
    Backend {
        /// The backend endpoint that was called
        endpoint: String,
        /// HTTP status code returned by the backend
        status_code: u16,
        /// Response body or a description of the failure
        message: String,
    },

    /// The submission response carried none of `images`, `stream` or `output`.
    #[error("Unrecognized backend response: {0}")]
    ProtocolMismatch(String),

    /// The backend reported the job as failed.
    #[error("Generation failed: {0}")]
    GenerationFailed(String),

    /// The poll loop exceeded its wall-clock ceiling.
    #[error("Generation timed out after {elapsed_secs:.1}s")]
    TimedOut {
        /// Seconds elapsed since polling started
        elapsed_secs: f64,
    },

    /// The poll loop exceeded its attempt ceiling.
    #[error("Maximum polling attempts reached ({0})")]
    AttemptsExhausted(u32),

    /// A single poll iteration failed (network error, unreadable body).
    #[error("Transient poll failure: {0}")]
    Transient(String),
}

impl Error {
    /// Create a new backend error with endpoint, status code, and message.
    ///
    /// # Example
    ///
    /// ```
    /// use edmcp_common::error::Error;
    ///
    /// let err = Error::backend("http://localhost:9000/render", 500, "CUDA out of memory");
    /// assert!(err.to_string().contains("localhost:9000"));
    /// assert!(err.to_string().contains("500"));
    /// ```
    pub fn backend(endpoint: impl Into<String>, status_code: u16, message: impl Into<String>) -> Self {
        Error::Backend {
            endpoint: endpoint.into(),
            status_code,
            message: message.into(),
        }
    }

    /// Create a new protocol mismatch error.
    pub fn protocol_mismatch(message: impl Into<String>) -> Self {
        Error::ProtocolMismatch(message.into())
    }

    /// Create a new backend-reported generation failure.
    ///
    /// # Example
    ///
    /// ```
    /// use edmcp_common::error::Error;
    ///
    /// let err = Error::generation_failed("OOM");
    /// assert_eq!(err.to_string(), "Generation failed: OOM");
    /// ```
    pub fn generation_failed(message: impl Into<String>) -> Self {
        Error::GenerationFailed(message.into())
    }

    /// Create a new transient poll error.
    pub fn transient(message: impl Into<String>) -> Self {
        Error::Transient(message.into())
    }

    /// Whether this error ends a poll loop.
    ///
    /// Only `Transient` is retried; everything else is terminal.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Error::Transient(_))
    }
}

/// Configuration errors.
///
/// Raised when an environment variable holds a value that cannot be used.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable has an invalid value
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

impl ConfigError {
    /// Create a new invalid value error.
    pub fn invalid_value(name: impl Into<String>, reason: impl Into<String>) -> Self {
        ConfigError::InvalidValue(name.into(), reason.into())
    }
}

/// Result type alias using the unified Error type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_error_includes_endpoint_and_status() {
        let err = Error::backend("http://localhost:9000/render", 503, "busy");
        let msg = err.to_string();
        assert!(msg.contains("localhost:9000/render"), "Should contain endpoint");
        assert!(msg.contains("503"), "Should contain status code");
        assert!(msg.contains("busy"), "Should contain message");
    }

    #[test]
    fn test_config_error_includes_var_name() {
        let err = ConfigError::invalid_value("EASY_DIFFUSION_ADDRESS", "not a url");
        let msg = err.to_string();
        assert!(msg.contains("EASY_DIFFUSION_ADDRESS"), "Should contain variable name");
        assert!(msg.contains("not a url"));
    }

    #[test]
    fn test_error_from_config_error() {
        let config_err = ConfigError::invalid_value("BACKEND_TIMEOUT_SECS", "not a number");
        let err: Error = config_err.into();
        assert!(matches!(err, Error::Config(_)));
        assert!(err.to_string().contains("BACKEND_TIMEOUT_SECS"));
    }

    #[test]
    fn test_timeout_error() {
        let err = Error::TimedOut { elapsed_secs: 300.4 };
        let msg = err.to_string();
        assert!(msg.contains("timed out"), "Should say timed out: {}", msg);
        assert!(msg.contains("300.4"), "Should contain elapsed seconds: {}", msg);
    }

    #[test]
    fn test_attempts_exhausted_error() {
        let err = Error::AttemptsExhausted(300);
        assert_eq!(err.to_string(), "Maximum polling attempts reached (300)");
    }

    #[test]
    fn test_only_transient_is_retryable() {
        assert!(!Error::transient("connection reset").is_terminal());
        assert!(Error::generation_failed("OOM").is_terminal());
        assert!(Error::AttemptsExhausted(1).is_terminal());
        assert!(Error::TimedOut { elapsed_secs: 1.0 }.is_terminal());
        assert!(Error::protocol_mismatch("{}").is_terminal());
    }
}
