use std::fmt;

use crate::app::error::AppError;

/// Exit code reported for an invocation that was stopped through its [`CancelToken`].
///
/// Mirrors the shell convention of `128 + SIGINT`, so it never collides with the
/// small exit codes adb itself uses.
///
/// [`CancelToken`]: crate::app::adb::runner::CancelToken
pub const INTERRUPTED_EXIT_CODE: i32 = 130;

/// Exit code reported when the OS gives none (the process died from a signal).
pub const UNKNOWN_EXIT_CODE: i32 = -1;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutputResult {
    pub exit_code: i32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    timed_out: bool,
}

impl OutputResult {
    pub fn new(exit_code: i32, stdout: Vec<u8>, stderr: Vec<u8>) -> Self {
        Self {
            exit_code,
            stdout,
            stderr,
            timed_out: false,
        }
    }

    pub fn success(message: impl Into<String>) -> Self {
        Self::new(0, message.into().into_bytes(), Vec::new())
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self::new(1, Vec::new(), message.into().into_bytes())
    }

    pub(crate) fn mark_timed_out(mut self) -> Self {
        self.timed_out = true;
        self
    }

    pub fn is_ok(&self) -> bool {
        self.exit_code == 0
    }

    pub fn is_interrupted(&self) -> bool {
        self.exit_code == INTERRUPTED_EXIT_CODE
    }

    pub fn is_timed_out(&self) -> bool {
        self.timed_out
    }

    pub fn has_error(&self) -> bool {
        !self.stderr.is_empty()
    }

    pub fn output(&self) -> String {
        String::from_utf8_lossy(&self.stdout).trim().to_string()
    }

    pub fn error(&self) -> String {
        String::from_utf8_lossy(&self.stderr).trim().to_string()
    }

    /// Splits stdout on `\n`. Pass `trim_each_line = false` for parsers that read indentation.
    pub fn output_lines(&self, trim_each_line: bool) -> Vec<String> {
        let text = String::from_utf8_lossy(&self.stdout);
        text.split('\n')
            .map(|line| {
                if trim_each_line {
                    line.trim().to_string()
                } else {
                    line.trim_end_matches('\r').to_string()
                }
            })
            .collect()
    }

    pub fn to_error(&self, trace_id: &str) -> AppError {
        AppError::exit(self.exit_code, &self.error(), trace_id)
    }

    /// `Ok(self)` on exit code 0, otherwise the [`to_error`](Self::to_error) value.
    pub fn into_checked(self, trace_id: &str) -> Result<Self, AppError> {
        if self.is_ok() {
            Ok(self)
        } else {
            Err(self.to_error(trace_id))
        }
    }
}

impl fmt::Display for OutputResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "OutputResult(is_ok=`{}`, stdout=`{}`, stderr=`{}`, exit_code={})",
            self.is_ok(),
            self.output(),
            self.error(),
            self.exit_code
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn is_ok_requires_exact_zero() {
        assert!(OutputResult::new(0, Vec::new(), Vec::new()).is_ok());
        assert!(!OutputResult::new(1, Vec::new(), Vec::new()).is_ok());
        assert!(!OutputResult::new(-1, Vec::new(), Vec::new()).is_ok());
    }

    #[test]
    fn output_and_error_are_trimmed() {
        let result = OutputResult::new(0, b"  hello \n".to_vec(), b"\n warn\t".to_vec());
        assert_eq!(result.output(), "hello");
        assert_eq!(result.error(), "warn");
        assert!(result.has_error());
    }

    #[test]
    fn output_lines_keeps_indentation_unless_trimmed() {
        let result = OutputResult::new(0, b"Title\r\n  child\n".to_vec(), Vec::new());
        assert_eq!(result.output_lines(false), vec!["Title", "  child", ""]);
        assert_eq!(result.output_lines(true), vec!["Title", "child", ""]);
    }

    #[test]
    fn interrupted_is_tied_to_reserved_code() {
        assert!(OutputResult::new(INTERRUPTED_EXIT_CODE, Vec::new(), Vec::new()).is_interrupted());
        assert!(!OutputResult::new(2, Vec::new(), Vec::new()).is_interrupted());
    }

    #[test]
    fn to_error_carries_code_and_stderr() {
        let result = OutputResult::new(255, Vec::new(), b"error: device offline\n".to_vec());
        let err = result.to_error("trace-x");
        assert_eq!(err.code, "ERR_EXIT");
        assert_eq!(err.trace_id, "trace-x");
        assert!(err.error.contains("255"));
        assert!(err.error.ends_with("error: device offline"));
    }

    #[test]
    fn into_checked_passes_success_through() {
        let ok = OutputResult::success("done").into_checked("t").expect("ok");
        assert_eq!(ok.output(), "done");
        let err = OutputResult::failure("nope").into_checked("t").expect_err("err");
        assert!(err.error.contains("nope"));
    }
}
