use serde::Serialize;
use std::fmt;

use crate::app::adb::output::OutputResult;

#[derive(Debug, Clone, Serialize)]
pub struct AppError {
    pub error: String,
    pub code: String,
    pub trace_id: String,
    #[serde(skip)]
    output: Option<Box<OutputResult>>,
}

impl AppError {
    pub fn new(code: impl Into<String>, message: impl Into<String>, trace_id: impl Into<String>) -> Self {
        Self {
            error: message.into(),
            code: code.into(),
            trace_id: trace_id.into(),
            output: None,
        }
    }

    pub fn validation(message: impl Into<String>, trace_id: impl Into<String>) -> Self {
        Self::new("ERR_VALIDATION", message, trace_id)
    }

    pub fn dependency(message: impl Into<String>, trace_id: impl Into<String>) -> Self {
        Self::new("ERR_DEPENDENCY", message, trace_id)
    }

    pub fn system(message: impl Into<String>, trace_id: impl Into<String>) -> Self {
        Self::new("ERR_SYSTEM", message, trace_id)
    }

    pub fn not_found(message: impl Into<String>, trace_id: impl Into<String>) -> Self {
        Self::new("ERR_NOT_FOUND", message, trace_id)
    }

    /// Deadline exceeded. The partial result of the killed process travels with the error.
    pub fn timeout(
        message: impl Into<String>,
        trace_id: impl Into<String>,
        partial: OutputResult,
    ) -> Self {
        let mut err = Self::new("ERR_TIMEOUT", message, trace_id);
        err.output = Some(Box::new(partial));
        err
    }

    pub fn exit(exit_code: i32, stderr: &str, trace_id: impl Into<String>) -> Self {
        let message = if stderr.is_empty() {
            format!("invalid exit code: {exit_code}")
        } else {
            format!("invalid exit code: {exit_code}\n{stderr}")
        };
        Self::new("ERR_EXIT", message, trace_id)
    }

    pub fn is_timeout(&self) -> bool {
        self.code == "ERR_TIMEOUT"
    }

    pub fn partial_output(&self) -> Option<&OutputResult> {
        self.output.as_deref()
    }

    pub fn into_partial_output(self) -> Option<OutputResult> {
        self.output.map(|output| *output)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.error, self.code)
    }
}

impl std::error::Error for AppError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_error_keeps_partial_output() {
        let partial = OutputResult::new(-1, b"half".to_vec(), Vec::new()).mark_timed_out();
        let err = AppError::timeout("Command timed out", "trace-1", partial);
        assert!(err.is_timeout());
        assert_eq!(err.code, "ERR_TIMEOUT");
        let output = err.partial_output().expect("partial output");
        assert!(output.is_timed_out());
        assert_eq!(output.output(), "half");
    }

    #[test]
    fn exit_error_mentions_code_and_stderr() {
        let err = AppError::exit(3, "boom", "trace-2");
        assert_eq!(err.code, "ERR_EXIT");
        assert!(err.error.contains("invalid exit code: 3"));
        assert!(err.error.contains("boom"));
        assert_eq!(err.to_string(), format!("{} (ERR_EXIT)", err.error));
    }
}
