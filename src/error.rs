//! Error types for sequence pipelines.
//!
//! Every fallible operation in the crate returns [`PipelineError`]. Errors
//! raised while producing or transforming an element travel down the pull
//! chain as the `Err` item of a [`Sequence`](crate::Sequence).

use thiserror::Error;

/// Main error type for pipeline construction and execution.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// An operator received an argument it cannot work with (e.g. `first(0)`).
    #[error("Invalid argument for {operator}(): {message}")]
    InvalidArgument {
        operator: &'static str,
        message: String,
    },

    /// A value handed to the coercion layer is not a known source kind.
    #[error("Unsupported source: {0}")]
    UnsupportedSource(String),

    /// IO errors from files, pipes and sockets.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// An external program could not be started.
    #[error("Failed to spawn '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// An external program exited with a non-zero status.
    ///
    /// `stderr` holds the program's diagnostic output verbatim. The display
    /// message is that output without trailing whitespace, or a generic
    /// status line when the program wrote nothing.
    #[error("{}", exit_message(.code, .stderr))]
    ExitStatus { code: Option<i32>, stderr: String },

    /// A network request failed or ended on a non-2xx status.
    #[error("Error fetching {url}: {status}")]
    Http { url: String, status: String },

    /// Transport-level failures from the HTTP client.
    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    /// A JSON document could not be decoded.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A regular expression or glob pattern failed to compile.
    #[error("Invalid pattern '{pattern}': {message}")]
    Pattern { pattern: String, message: String },

    /// A pipeline definition could not be parsed.
    #[error("Line {line}: {message}")]
    Parse { line: usize, message: String },

    /// A pipeline definition is structurally invalid.
    #[error("Pipeline error: {0}")]
    Pipeline(String),

    /// Settings could not be loaded.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Errors raised by user-supplied transforms.
    #[error("{0}")]
    Custom(String),
}

/// Display text for [`PipelineError::ExitStatus`]; trailing newlines are cut.
fn exit_message(code: &Option<i32>, stderr: &str) -> String {
    let stderr = stderr.trim_end();
    match (code, stderr.is_empty()) {
        (_, false) => stderr.to_string(),
        (Some(code), true) => format!("Process exited with status {code}"),
        (None, true) => "Process terminated by signal".to_string(),
    }
}

impl PipelineError {
    /// Build an [`PipelineError::InvalidArgument`] for `operator`.
    pub fn invalid(operator: &'static str, message: impl Into<String>) -> Self {
        PipelineError::InvalidArgument {
            operator,
            message: message.into(),
        }
    }

    /// Build a [`PipelineError::Custom`] error from any displayable value.
    pub fn custom(message: impl std::fmt::Display) -> Self {
        PipelineError::Custom(message.to_string())
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_status_uses_stderr_as_message() {
        let err = PipelineError::ExitStatus {
            code: Some(2),
            stderr: "no such file\n".to_string(),
        };
        assert_eq!(err.to_string(), "no such file");
    }

    #[test]
    fn test_exit_status_keeps_stderr_verbatim() {
        let stderr = "  first line\nsecond line\n\n".to_string();
        let err = PipelineError::ExitStatus {
            code: Some(1),
            stderr: stderr.clone(),
        };
        assert_eq!(err.to_string(), "  first line\nsecond line");
        match err {
            PipelineError::ExitStatus { stderr: kept, .. } => assert_eq!(kept, stderr),
            other => panic!("Expected ExitStatus, got {other:?}"),
        }
    }

    #[test]
    fn test_exit_status_without_stderr() {
        let err = PipelineError::ExitStatus {
            code: Some(3),
            stderr: String::new(),
        };
        assert_eq!(err.to_string(), "Process exited with status 3");
    }

    #[test]
    fn test_invalid_argument_message() {
        let err = PipelineError::invalid("first", "Must be >= 1");
        assert_eq!(err.to_string(), "Invalid argument for first(): Must be >= 1");
    }
}
