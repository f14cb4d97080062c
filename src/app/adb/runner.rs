use std::io::{Read, Write};
use std::process::{Child, ChildStdin, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tracing::{debug, trace, warn, Dispatch};
use uuid::Uuid;

use crate::app::adb::command::{AdbCommand, HostCommand, OutputSink};
use crate::app::adb::output::{OutputResult, INTERRUPTED_EXIT_CODE, UNKNOWN_EXIT_CODE};
use crate::app::error::AppError;

const POLL_INTERVAL: Duration = Duration::from_millis(20);
// How long a process gets to honour SIGINT before it is killed.
const TERMINATE_GRACE: Duration = Duration::from_millis(1_500);
// How long the reader threads get to hand over what is left in the pipes once the process is gone.
const DRAIN_GRACE: Duration = Duration::from_millis(500);

/// Cooperative stop signal for long-running invocations (logcat follow, screen recording, mirroring).
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

/// Seam between the façades and process execution.
pub trait Runner: Send + Sync {
    fn run(&self, command: AdbCommand) -> Result<OutputResult, AppError>;

    fn run_cancellable(
        &self,
        command: AdbCommand,
        cancel: &CancelToken,
    ) -> Result<OutputResult, AppError>;

    fn run_piped(
        &self,
        upstream: AdbCommand,
        downstream: HostCommand,
        cancel: &CancelToken,
    ) -> Result<OutputResult, AppError>;
}

#[derive(Clone, Default)]
pub struct Invoker {
    dispatch: Option<Dispatch>,
    verbose: bool,
}

impl Invoker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route this invoker's log events to `dispatch` instead of the global subscriber.
    pub fn with_dispatch(mut self, dispatch: Dispatch) -> Self {
        self.dispatch = Some(dispatch);
        self
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn has_dispatch(&self) -> bool {
        self.dispatch.is_some()
    }

    pub fn is_verbose(&self) -> bool {
        self.verbose
    }

    pub fn invoke(&self, command: AdbCommand) -> Result<OutputResult, AppError> {
        self.in_scope(|| self.execute(command, None))
    }

    pub fn invoke_cancellable(
        &self,
        command: AdbCommand,
        cancel: &CancelToken,
    ) -> Result<OutputResult, AppError> {
        self.in_scope(|| self.execute(command, Some(cancel)))
    }

    pub fn invoke_piped(
        &self,
        upstream: AdbCommand,
        downstream: HostCommand,
        cancel: &CancelToken,
    ) -> Result<OutputResult, AppError> {
        self.in_scope(|| self.execute_piped(upstream, downstream, cancel))
    }

    fn in_scope<T>(&self, f: impl FnOnce() -> T) -> T {
        match &self.dispatch {
            Some(dispatch) => tracing::dispatcher::with_default(dispatch, f),
            None => f(),
        }
    }

    fn log_start(&self, trace_id: &str, line: &str, timeout: Duration) {
        if self.verbose {
            debug!(trace_id = %trace_id, timeout_ms = timeout.as_millis() as u64, "executing `{line}`");
        } else {
            trace!(trace_id = %trace_id, timeout_ms = timeout.as_millis() as u64, "executing `{line}`");
        }
    }

    fn execute(
        &self,
        mut command: AdbCommand,
        cancel: Option<&CancelToken>,
    ) -> Result<OutputResult, AppError> {
        let trace_id = Uuid::new_v4().to_string();
        ensure_program(command.program(), &trace_id)?;
        let timeout = command.timeout_value();
        self.log_start(&trace_id, &command.display_line(), timeout);

        let started = Instant::now();
        let mut child = spawn_child(
            command.program(),
            &command.full_args(),
            Stdio::null(),
            &trace_id,
        )?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AppError::system("Failed to capture stdout", &trace_id))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| AppError::system("Failed to capture stderr", &trace_id))?;

        let stdout_buffer = SharedBuffer::default();
        let stderr_buffer = SharedBuffer::default();
        let stdout_handle = match command.take_sink() {
            Some(sink) => spawn_sink_drain(stdout, sink),
            None => spawn_drain(stdout, stdout_buffer.clone()),
        };
        let stderr_handle = spawn_drain(stderr, stderr_buffer.clone());

        let deadline = deadline_after(started, timeout);
        let outcome = supervise(&mut child, deadline, cancel);
        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(err) => {
                kill_child(&mut child);
                return Err(AppError::system(
                    format!("Failed to poll command: {err}"),
                    &trace_id,
                ));
            }
        };

        wait_for_drains(vec![stdout_handle, stderr_handle]);
        let stdout_bytes = stdout_buffer.snapshot();
        let stderr_bytes = stderr_buffer.snapshot();
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Outcome::Exited(status) => {
                let exit_code = exit_code_of(status);
                trace!(trace_id = %trace_id, exit_code, elapsed_ms, "command finished");
                Ok(OutputResult::new(exit_code, stdout_bytes, stderr_bytes))
            }
            Outcome::Cancelled(_) => {
                debug!(trace_id = %trace_id, elapsed_ms, "command interrupted");
                Ok(OutputResult::new(
                    INTERRUPTED_EXIT_CODE,
                    stdout_bytes,
                    stderr_bytes,
                ))
            }
            Outcome::TimedOut(status) => {
                warn!(trace_id = %trace_id, elapsed_ms, "command timed out: `{}`", command.display_line());
                let partial = OutputResult::new(
                    status.map(exit_code_of).unwrap_or(UNKNOWN_EXIT_CODE),
                    stdout_bytes,
                    stderr_bytes,
                )
                .mark_timed_out();
                Err(AppError::timeout(
                    format!("Command timed out after {}ms", timeout.as_millis()),
                    &trace_id,
                    partial,
                ))
            }
        }
    }

    fn execute_piped(
        &self,
        upstream: AdbCommand,
        downstream: HostCommand,
        cancel: &CancelToken,
    ) -> Result<OutputResult, AppError> {
        let trace_id = Uuid::new_v4().to_string();
        ensure_program(upstream.program(), &trace_id)?;
        ensure_program(&downstream.program, &trace_id)?;
        if upstream.has_sink() {
            return Err(AppError::validation(
                "A piped command cannot also redirect stdout to a sink",
                &trace_id,
            ));
        }
        let timeout = upstream.timeout_value();
        let line = format!(
            "{} | {} {}",
            upstream.display_line(),
            downstream.program,
            downstream.args.join(" ")
        );
        self.log_start(&trace_id, line.trim_end(), timeout);

        let started = Instant::now();
        // Downstream first, so it is already reading when the first bytes arrive.
        let mut down_child = spawn_child(
            &downstream.program,
            &downstream.args,
            Stdio::piped(),
            &trace_id,
        )?;
        let mut up_child = match spawn_child(
            upstream.program(),
            &upstream.full_args(),
            Stdio::null(),
            &trace_id,
        ) {
            Ok(child) => child,
            Err(err) => {
                kill_child(&mut down_child);
                return Err(err);
            }
        };

        let pipes = (
            up_child.stdout.take(),
            up_child.stderr.take(),
            down_child.stdin.take(),
            down_child.stdout.take(),
            down_child.stderr.take(),
        );
        let (Some(up_out), Some(up_err), Some(down_in), Some(down_out), Some(down_err)) = pipes
        else {
            kill_child(&mut up_child);
            kill_child(&mut down_child);
            return Err(AppError::system("Failed to capture pipe handles", &trace_id));
        };

        let writer: Arc<Mutex<Option<ChildStdin>>> = Arc::new(Mutex::new(Some(down_in)));
        let copy_handle = spawn_copy(up_out, Arc::clone(&writer));

        let stdout_buffer = SharedBuffer::default();
        let up_stderr_buffer = SharedBuffer::default();
        let down_stderr_buffer = SharedBuffer::default();
        let drains = vec![
            spawn_drain(down_out, stdout_buffer.clone()),
            spawn_drain(up_err, up_stderr_buffer.clone()),
            spawn_drain(down_err, down_stderr_buffer.clone()),
        ];

        let deadline = deadline_after(started, timeout);
        let mut up_status: Option<ExitStatus> = None;
        let mut down_status: Option<ExitStatus> = None;
        let mut up_exited_at: Option<Instant> = None;
        let mut writer_closed = false;
        let mut upstream_stopped_by_us = false;

        let outcome = loop {
            let polled = poll_pair(&mut up_child, &mut down_child, &mut up_status, &mut down_status);
            if let Err(err) = polled {
                kill_child(&mut up_child);
                kill_child(&mut down_child);
                return Err(AppError::system(
                    format!("Failed to poll command: {err}"),
                    &trace_id,
                ));
            }

            if up_status.is_some() && !writer_closed {
                let exited_at = *up_exited_at.get_or_insert_with(Instant::now);
                if copy_handle.is_finished() || exited_at.elapsed() >= DRAIN_GRACE {
                    writer_closed = close_writer(&writer);
                }
            }

            if let (Some(up), Some(down)) = (up_status, down_status) {
                break PipeOutcome::Exited { up, down };
            }

            if cancel.is_cancelled() {
                terminate_child(&mut up_child);
                close_writer(&writer);
                terminate_child(&mut down_child);
                break PipeOutcome::Cancelled;
            }

            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                kill_child(&mut up_child);
                close_writer(&writer);
                kill_child(&mut down_child);
                break PipeOutcome::TimedOut {
                    down: down_child.try_wait().ok().flatten(),
                };
            }

            if down_status.is_some() && up_status.is_none() {
                // Nobody is reading anymore.
                up_status = terminate_child(&mut up_child);
                upstream_stopped_by_us = true;
                continue;
            }

            std::thread::sleep(POLL_INTERVAL);
        };

        let mut handles = drains;
        handles.push(copy_handle);
        wait_for_drains(handles);

        let stdout_bytes = stdout_buffer.snapshot();
        let mut stderr_bytes = up_stderr_buffer.snapshot();
        stderr_bytes.extend(down_stderr_buffer.snapshot());
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match outcome {
            PipeOutcome::Exited { up, down } => {
                let down_code = exit_code_of(down);
                let up_code = exit_code_of(up);
                let exit_code = if down_code != 0 || upstream_stopped_by_us {
                    down_code
                } else {
                    up_code
                };
                trace!(trace_id = %trace_id, exit_code, elapsed_ms, "pipeline finished");
                Ok(OutputResult::new(exit_code, stdout_bytes, stderr_bytes))
            }
            PipeOutcome::Cancelled => {
                debug!(trace_id = %trace_id, elapsed_ms, "pipeline interrupted");
                Ok(OutputResult::new(
                    INTERRUPTED_EXIT_CODE,
                    stdout_bytes,
                    stderr_bytes,
                ))
            }
            PipeOutcome::TimedOut { down } => {
                warn!(trace_id = %trace_id, elapsed_ms, "pipeline timed out");
                let partial = OutputResult::new(
                    down.map(exit_code_of).unwrap_or(UNKNOWN_EXIT_CODE),
                    stdout_bytes,
                    stderr_bytes,
                )
                .mark_timed_out();
                Err(AppError::timeout(
                    format!("Pipeline timed out after {}ms", timeout.as_millis()),
                    &trace_id,
                    partial,
                ))
            }
        }
    }
}

impl Runner for Invoker {
    fn run(&self, command: AdbCommand) -> Result<OutputResult, AppError> {
        self.invoke(command)
    }

    fn run_cancellable(
        &self,
        command: AdbCommand,
        cancel: &CancelToken,
    ) -> Result<OutputResult, AppError> {
        self.invoke_cancellable(command, cancel)
    }

    fn run_piped(
        &self,
        upstream: AdbCommand,
        downstream: HostCommand,
        cancel: &CancelToken,
    ) -> Result<OutputResult, AppError> {
        self.invoke_piped(upstream, downstream, cancel)
    }
}

enum Outcome {
    Exited(ExitStatus),
    Cancelled(Option<ExitStatus>),
    TimedOut(Option<ExitStatus>),
}

enum PipeOutcome {
    Exited { up: ExitStatus, down: ExitStatus },
    Cancelled,
    TimedOut { down: Option<ExitStatus> },
}

#[derive(Clone, Default)]
struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    fn append(&self, chunk: &[u8]) {
        if let Ok(mut guard) = self.0.lock() {
            guard.extend_from_slice(chunk);
        }
    }

    fn snapshot(&self) -> Vec<u8> {
        self.0.lock().map(|guard| guard.clone()).unwrap_or_default()
    }
}

fn ensure_program(program: &str, trace_id: &str) -> Result<(), AppError> {
    if program.trim().is_empty() {
        return Err(AppError::validation("Executable path is empty", trace_id));
    }
    Ok(())
}

fn deadline_after(started: Instant, timeout: Duration) -> Option<Instant> {
    if timeout.is_zero() {
        None
    } else {
        Some(started + timeout)
    }
}

fn spawn_child(
    program: &str,
    args: &[String],
    stdin: Stdio,
    trace_id: &str,
) -> Result<Child, AppError> {
    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(stdin)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        // Own process group, so a timeout also reaches anything the child forked.
        cmd.process_group(0);
    }
    cmd.spawn().map_err(|err| match err.kind() {
        std::io::ErrorKind::NotFound => {
            AppError::dependency(format!("Executable not found: {program}"), trace_id)
        }
        std::io::ErrorKind::PermissionDenied => {
            AppError::dependency(format!("Executable not runnable: {program}: {err}"), trace_id)
        }
        _ => AppError::system(format!("Failed to spawn command: {err}"), trace_id),
    })
}

fn spawn_drain<R: Read + Send + 'static>(reader: R, buffer: SharedBuffer) -> JoinHandle<()> {
    std::thread::spawn(move || {
        let mut reader = reader;
        let mut temp = [0u8; 4096];
        loop {
            match reader.read(&mut temp) {
                Ok(0) => break,
                Ok(count) => buffer.append(&temp[..count]),
                Err(_) => break,
            }
        }
    })
}

fn spawn_sink_drain<R: Read + Send + 'static>(reader: R, sink: OutputSink) -> JoinHandle<()> {
    std::thread::spawn(move || {
        let mut reader = reader;
        let mut sink = sink;
        let mut temp = [0u8; 4096];
        loop {
            match reader.read(&mut temp) {
                Ok(0) => break,
                Ok(count) => {
                    if sink.write_all(&temp[..count]).is_err() {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
        let _ = sink.flush();
    })
}

fn spawn_copy<R: Read + Send + 'static>(
    reader: R,
    writer: Arc<Mutex<Option<ChildStdin>>>,
) -> JoinHandle<()> {
    std::thread::spawn(move || {
        let mut reader = reader;
        let mut temp = [0u8; 16_384];
        loop {
            let count = match reader.read(&mut temp) {
                Ok(0) => break,
                Ok(count) => count,
                Err(_) => break,
            };
            let Ok(mut guard) = writer.lock() else {
                break;
            };
            if let Some(stdin) = guard.as_mut() {
                if stdin.write_all(&temp[..count]).is_err() {
                    // Downstream went away; keep draining so upstream never blocks on a full pipe.
                    guard.take();
                }
            }
        }
    })
}

fn close_writer(writer: &Arc<Mutex<Option<ChildStdin>>>) -> bool {
    match writer.try_lock() {
        Ok(mut guard) => {
            if let Some(mut stdin) = guard.take() {
                let _ = stdin.flush();
            }
            true
        }
        Err(_) => false,
    }
}

fn wait_for_drains(handles: Vec<JoinHandle<()>>) {
    let started = Instant::now();
    for handle in handles {
        while !handle.is_finished() && started.elapsed() < DRAIN_GRACE {
            std::thread::sleep(Duration::from_millis(5));
        }
        if handle.is_finished() {
            let _ = handle.join();
        }
    }
}

fn supervise(
    child: &mut Child,
    deadline: Option<Instant>,
    cancel: Option<&CancelToken>,
) -> std::io::Result<Outcome> {
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Outcome::Exited(status));
        }
        if cancel.is_some_and(CancelToken::is_cancelled) {
            return Ok(Outcome::Cancelled(terminate_child(child)));
        }
        if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            return Ok(Outcome::TimedOut(kill_child(child)));
        }
        std::thread::sleep(POLL_INTERVAL);
    }
}

fn poll_pair(
    up: &mut Child,
    down: &mut Child,
    up_status: &mut Option<ExitStatus>,
    down_status: &mut Option<ExitStatus>,
) -> std::io::Result<()> {
    if up_status.is_none() {
        *up_status = up.try_wait()?;
    }
    if down_status.is_none() {
        *down_status = down.try_wait()?;
    }
    Ok(())
}

fn exit_code_of(status: ExitStatus) -> i32 {
    status.code().unwrap_or(UNKNOWN_EXIT_CODE)
}

/// Ask the process (group) to stop with SIGINT, then kill it if it does not exit in time.
fn terminate_child(child: &mut Child) -> Option<ExitStatus> {
    if let Ok(Some(status)) = child.try_wait() {
        return Some(status);
    }
    #[cfg(unix)]
    {
        signal_group(child, nix::sys::signal::Signal::SIGINT);
        let started = Instant::now();
        while started.elapsed() < TERMINATE_GRACE {
            match child.try_wait() {
                Ok(Some(status)) => {
                    // The leader is gone; make sure its helpers are too.
                    signal_group(child, nix::sys::signal::Signal::SIGKILL);
                    return Some(status);
                }
                Ok(None) => std::thread::sleep(POLL_INTERVAL),
                Err(_) => break,
            }
        }
    }
    kill_child(child)
}

fn kill_child(child: &mut Child) -> Option<ExitStatus> {
    #[cfg(unix)]
    signal_group(child, nix::sys::signal::Signal::SIGKILL);
    let _ = child.kill();
    child.wait().ok()
}

#[cfg(unix)]
fn signal_group(child: &Child, signal: nix::sys::signal::Signal) {
    use nix::sys::signal::killpg;
    use nix::unistd::Pid;

    let Ok(pid) = i32::try_from(child.id()) else {
        return;
    };
    let _ = killpg(Pid::from_raw(pid), signal);
}
