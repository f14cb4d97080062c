use std::time::{Duration, Instant};

use tracing::debug;
use uuid::Uuid;

use crate::app::adb::command::AdbCommand;
use crate::app::adb::output::OutputResult;
use crate::app::adb::runner::Runner;
use crate::app::error::AppError;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Re-runs the command built by `make_command` until it exits with code 0.
pub fn wait_until<R, F>(
    runner: &R,
    make_command: F,
    timeout: Duration,
    interval: Duration,
) -> Result<OutputResult, AppError>
where
    R: Runner + ?Sized,
    F: Fn() -> AdbCommand,
{
    wait_until_with(runner, make_command, OutputResult::is_ok, timeout, interval)
}

/// Re-runs the command until `accept` holds for its result, or `timeout` elapses.
///
/// Each attempt's own deadline is capped by the time left. On expiry the error carries the
/// last result seen. `timeout == 0` polls without a deadline.
pub fn wait_until_with<R, F, P>(
    runner: &R,
    make_command: F,
    accept: P,
    timeout: Duration,
    interval: Duration,
) -> Result<OutputResult, AppError>
where
    R: Runner + ?Sized,
    F: Fn() -> AdbCommand,
    P: Fn(&OutputResult) -> bool,
{
    let trace_id = Uuid::new_v4().to_string();
    let started = Instant::now();
    let mut last: Option<OutputResult> = None;
    let mut attempts = 0u32;

    loop {
        let remaining = timeout.saturating_sub(started.elapsed());
        if !timeout.is_zero() && remaining.is_zero() {
            debug!(trace_id = %trace_id, attempts, "condition not met before deadline");
            return Err(AppError::timeout(
                format!("Condition not met within {}ms", timeout.as_millis()),
                &trace_id,
                last.unwrap_or_default().mark_timed_out(),
            ));
        }

        let command = make_command();
        let attempt_timeout = match (timeout.is_zero(), command.timeout_value().is_zero()) {
            (true, _) => command.timeout_value(),
            (false, true) => remaining,
            (false, false) => command.timeout_value().min(remaining),
        };
        attempts += 1;

        match runner.run(command.timeout(attempt_timeout)) {
            Ok(result) if accept(&result) => return Ok(result),
            Ok(result) => last = Some(result),
            Err(err) if err.is_timeout() => last = err.into_partial_output(),
            Err(err) => return Err(err),
        }

        let pause = if timeout.is_zero() {
            interval
        } else {
            interval.min(timeout.saturating_sub(started.elapsed()))
        };
        std::thread::sleep(pause);
    }
}

/// Gives the device a moment to apply a mutating call (root, remount) once it succeeded.
pub fn settle(
    result: Result<OutputResult, AppError>,
    delay: Duration,
) -> Result<OutputResult, AppError> {
    if matches!(&result, Ok(output) if output.is_ok()) && !delay.is_zero() {
        std::thread::sleep(delay);
    }
    result
}
