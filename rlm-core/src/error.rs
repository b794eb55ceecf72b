//! Error types for rlm-core.

use thiserror::Error;

/// Result type alias using rlm-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during RLM operations.
#[derive(Error, Debug)]
pub enum Error {
    /// REPL execution failed
    #[error("REPL execution error: {message}")]
    ReplExecution {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Subprocess communication error
    #[error("Subprocess communication error: {0}")]
    SubprocessComm(String),

    /// Timeout during operation
    #[error("Operation timed out after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    /// LLM API error
    #[error("LLM API error: {provider} - {message}")]
    LlmApi { provider: String, message: String },

    /// LLM error (simple variant)
    #[error("LLM error: {0}")]
    LLM(String),

    /// Memory storage error
    #[error("Memory storage error: {0}")]
    MemoryStorage(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Recursion depth exceeded
    #[error("Maximum recursion depth {max_depth} exceeded")]
    MaxDepthExceeded { max_depth: u32 },

    /// Budget exhausted
    #[error("Budget exhausted: {resource}")]
    BudgetExhausted { resource: String },

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a REPL execution error.
    pub fn repl_execution(message: impl Into<String>) -> Self {
        Self::ReplExecution {
            message: message.into(),
            source: None,
        }
    }

    /// Create a REPL execution error with source.
    pub fn repl_execution_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::ReplExecution {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create an LLM API error.
    pub fn llm_api(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::LlmApi {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Create a timeout error.
    pub fn timeout(duration_ms: u64) -> Self {
        Self::Timeout { duration_ms }
    }

    /// Create a max depth exceeded error.
    pub fn max_depth_exceeded(max_depth: u32) -> Self {
        Self::MaxDepthExceeded { max_depth }
    }

    /// Create a budget exhausted error.
    pub fn budget_exhausted(resource: impl Into<String>) -> Self {
        Self::BudgetExhausted {
            resource: resource.into(),
        }
    }
}

/// Error kind for recovery decisions — orthogonal to `Error`'s variants.
///
/// A single `Error` (or a raw string surfaced from the interpreter) maps to
/// exactly one kind; the mapping is table-driven, first match wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Timeout,
    Resource,
    Retryable,
    Degradable,
    Terminal,
    Unverifiable,
}

impl ErrorKind {
    /// Classify an `Error` value.
    pub fn classify(error: &Error) -> Self {
        match error {
            Error::Timeout { .. } => ErrorKind::Timeout,
            Error::MaxDepthExceeded { .. } | Error::BudgetExhausted { .. } => ErrorKind::Resource,
            Error::Config(_) => ErrorKind::Terminal,
            _ => classify_message(&error.to_string()),
        }
    }

    /// Classify a raw message (e.g. interpreter stderr) by substring match.
    ///
    /// First match wins, case-insensitive. Falls through to `Degradable`
    /// when nothing more specific applies.
    pub fn classify_str(message: &str) -> Self {
        classify_message(message)
    }
}

fn classify_message(message: &str) -> ErrorKind {
    let lower = message.to_lowercase();

    const TIMEOUT: &[&str] = &["deadline", "timeout", "timed out"];
    const RESOURCE: &[&str] = &["memory overrun", "cpu overrun", "out of memory", "resource limit"];
    const RETRYABLE: &[&str] = &[
        "connection refused",
        "temporary failure",
        "interpreter-parse",
        "interpreter parse",
        "name-error",
        "name error",
        "nameerror",
        "type-error",
        "type error",
        "typeerror",
        "syntax-error",
        "syntax error",
        "syntaxerror",
        "repl execution failed",
    ];
    const TERMINAL: &[&str] = &["not found", "permission denied", "unauthorized", "invalid"];

    if TIMEOUT.iter().any(|p| lower.contains(p)) {
        return ErrorKind::Timeout;
    }
    if RESOURCE.iter().any(|p| lower.contains(p)) {
        return ErrorKind::Resource;
    }
    if RETRYABLE.iter().any(|p| lower.contains(p)) {
        return ErrorKind::Retryable;
    }
    if TERMINAL.iter().any(|p| lower.contains(p)) {
        return ErrorKind::Terminal;
    }
    ErrorKind::Degradable
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_timeout() {
        assert_eq!(ErrorKind::classify(&Error::timeout(5000)), ErrorKind::Timeout);
        assert_eq!(ErrorKind::classify_str("operation timed out"), ErrorKind::Timeout);
    }

    #[test]
    fn test_classify_retryable() {
        assert_eq!(
            ErrorKind::classify_str("NameError: x is not defined"),
            ErrorKind::Retryable
        );
        assert_eq!(
            ErrorKind::classify_str("SyntaxError: invalid syntax"),
            ErrorKind::Retryable
        );
    }

    #[test]
    fn test_classify_terminal() {
        assert_eq!(ErrorKind::classify_str("file not found"), ErrorKind::Terminal);
        assert_eq!(ErrorKind::classify_str("permission denied"), ErrorKind::Terminal);
    }

    #[test]
    fn test_classify_degradable_fallthrough() {
        assert_eq!(
            ErrorKind::classify_str("decomposition failed"),
            ErrorKind::Degradable
        );
    }

    #[test]
    fn test_classify_resource() {
        assert_eq!(
            ErrorKind::classify(&Error::max_depth_exceeded(3)),
            ErrorKind::Resource
        );
    }
}
