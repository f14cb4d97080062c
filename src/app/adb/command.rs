use std::fmt;
use std::io::Write;
use std::time::Duration;

pub const SERIAL_FLAG: &str = "-s";

/// Anything that can be turned into the `-s <selector>` value adb expects.
pub trait SerialAddress {
    fn serial_address(&self) -> String;
}

impl SerialAddress for str {
    fn serial_address(&self) -> String {
        self.trim().to_string()
    }
}

impl SerialAddress for String {
    fn serial_address(&self) -> String {
        self.as_str().serial_address()
    }
}

pub type OutputSink = Box<dyn Write + Send>;

/// One adb invocation: `<program> [-s <serial>] [<subcommand>] [args...]`.
///
/// Built with consuming setters and handed by value to a runner, which uses it once.
pub struct AdbCommand {
    program: String,
    serial: Option<String>,
    subcommand: Option<String>,
    args: Vec<String>,
    timeout: Duration,
    sink: Option<OutputSink>,
}

impl AdbCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            serial: None,
            subcommand: None,
            args: Vec::new(),
            timeout: Duration::ZERO,
            sink: None,
        }
    }

    pub fn serial<S: SerialAddress + ?Sized>(mut self, selector: &S) -> Self {
        let value = selector.serial_address();
        self.serial = Some(value).filter(|value| !value.is_empty());
        self
    }

    pub fn subcommand(mut self, subcommand: impl Into<String>) -> Self {
        let value = subcommand.into();
        self.subcommand = Some(value).filter(|value| !value.is_empty());
        self
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, T>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// `Duration::ZERO` disables the deadline.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Redirect stdout to `sink` instead of the result buffer.
    pub fn stdout_to(mut self, sink: OutputSink) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn serial_value(&self) -> Option<&str> {
        self.serial.as_deref()
    }

    pub fn subcommand_value(&self) -> Option<&str> {
        self.subcommand.as_deref()
    }

    pub fn timeout_value(&self) -> Duration {
        self.timeout
    }

    pub fn has_sink(&self) -> bool {
        self.sink.is_some()
    }

    pub(crate) fn take_sink(&mut self) -> Option<OutputSink> {
        self.sink.take()
    }

    pub fn full_args(&self) -> Vec<String> {
        let mut args = Vec::with_capacity(self.args.len() + 3);
        if let Some(serial) = &self.serial {
            args.push(SERIAL_FLAG.to_string());
            args.push(serial.clone());
        }
        if let Some(subcommand) = &self.subcommand {
            args.push(subcommand.clone());
        }
        args.extend(self.args.iter().cloned());
        args
    }

    pub fn display_line(&self) -> String {
        let program = std::path::Path::new(&self.program)
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| self.program.clone());
        let mut parts = vec![program];
        parts.extend(self.full_args());
        parts.join(" ")
    }
}

impl fmt::Debug for AdbCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdbCommand")
            .field("program", &self.program)
            .field("serial", &self.serial)
            .field("subcommand", &self.subcommand)
            .field("args", &self.args)
            .field("timeout", &self.timeout)
            .field("sink", &self.sink.is_some())
            .finish()
    }
}

/// A plain host program, used as the downstream side of a pipe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl HostCommand {
    pub fn new<I, T>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serial_comes_before_subcommand_and_args() {
        let cmd = AdbCommand::new("/opt/adb")
            .subcommand("shell")
            .args(["getprop", "ro.build.version.sdk"])
            .serial("192.168.1.10:5555");
        assert_eq!(
            cmd.full_args(),
            vec!["-s", "192.168.1.10:5555", "shell", "getprop", "ro.build.version.sdk"]
        );
    }

    #[test]
    fn absent_parts_are_omitted() {
        let cmd = AdbCommand::new("adb").arg("--version");
        assert_eq!(cmd.full_args(), vec!["--version"]);

        let cmd = AdbCommand::new("adb").serial("  ").subcommand("").arg("devices");
        assert_eq!(cmd.full_args(), vec!["devices"]);
    }

    #[test]
    fn argument_order_and_duplicates_are_preserved() {
        let cmd = AdbCommand::new("adb")
            .subcommand("logcat")
            .args(["-v", "brief", "-v", "color"])
            .arg("*:S");
        assert_eq!(cmd.full_args(), vec!["logcat", "-v", "brief", "-v", "color", "*:S"]);
    }

    #[test]
    fn display_line_uses_program_basename() {
        let cmd = AdbCommand::new("/opt/android/platform-tools/adb")
            .serial("emulator-5554")
            .subcommand("get-state");
        assert_eq!(cmd.display_line(), "adb -s emulator-5554 get-state");
    }

    #[test]
    fn sink_is_tracked() {
        let cmd = AdbCommand::new("adb").stdout_to(Box::new(Vec::<u8>::new()));
        assert!(cmd.has_sink());
        assert!(format!("{cmd:?}").contains("sink: true"));
    }
}
