use std::sync::mpsc::Receiver;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::app::adb::command::{AdbCommand, OutputSink, SerialAddress};
use crate::app::adb::dumpsys::find_section;
use crate::app::adb::files::{parse_directory_listing, validate_device_path};
use crate::app::adb::locator::{resolve_adb_program, validate_adb_program};
use crate::app::adb::logcat::LogcatOptions;
use crate::app::adb::mirror::{build_mirror_commands, check_player_availability};
use crate::app::adb::output::OutputResult;
use crate::app::adb::packages::{
    parse_package_dump, parse_pm_list_packages, parse_pm_path, PackageDumpReader,
};
use crate::app::adb::parse::{
    parse_adb_devices, parse_adb_version, parse_dumpsys_services, parse_input_devices,
    parse_mdns_services, parse_properties,
};
use crate::app::adb::polling::{settle, wait_until_with};
use crate::app::adb::runner::{CancelToken, Invoker, Runner};
use crate::app::config::{ClientConfig, MirrorSettings, TimeoutSettings};
use crate::app::error::AppError;
use crate::app::events::{ClientEvent, EventBus};
use crate::app::logging::build_dispatch;
use crate::app::models::{
    DeviceFileEntry, DeviceSummary, DiscoveryRecord, DumpSection, InputDevice, PackageDump,
    PackageRecord, PermissionRecord, PropertyPair,
};

const BOOT_COMPLETED_PROP: &str = "sys.boot_completed";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PackageListOptions {
    pub third_party_only: bool,
    pub disabled_only: bool,
    pub enabled_only: bool,
    pub system_only: bool,
}

impl PackageListOptions {
    fn to_args(&self) -> Vec<String> {
        [
            (self.third_party_only, "-3"),
            (self.disabled_only, "-d"),
            (self.enabled_only, "-e"),
            (self.system_only, "-s"),
        ]
        .into_iter()
        .filter(|(enabled, _)| *enabled)
        .map(|(_, flag)| flag.to_string())
        .collect()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct InstallOptions {
    pub keep_data: bool,
    pub allow_test_packages: bool,
    pub allow_downgrade: bool,
    pub grant_permissions: bool,
}

impl InstallOptions {
    fn to_args(&self) -> Vec<String> {
        [
            (self.keep_data, "-r"),
            (self.allow_test_packages, "-t"),
            (self.allow_downgrade, "-d"),
            (self.grant_permissions, "-g"),
        ]
        .into_iter()
        .filter(|(enabled, _)| *enabled)
        .map(|(_, flag)| flag.to_string())
        .collect()
    }
}

/// Quotes `value` for the device shell unless it is made of safe characters only.
pub fn shell_quote(value: &str) -> String {
    let safe = !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "/._-:=@%+,".contains(c));
    if safe {
        value.to_string()
    } else {
        format!("'{}'", value.replace('\'', r"'\''"))
    }
}

fn trace_id() -> String {
    Uuid::new_v4().to_string()
}

/// Device-bound wrapper that formats adb invocations and hands their output to the parsers.
pub struct AdbClient<R: Runner> {
    runner: R,
    adb: String,
    selector: String,
    timeouts: TimeoutSettings,
    mirror: MirrorSettings,
    events: EventBus,
}

impl AdbClient<Invoker> {
    /// Resolves and checks the adb executable, then builds an invoker that logs through
    /// its own dispatcher configured from `config.logging`.
    pub fn from_config<S: SerialAddress + ?Sized>(
        config: &ClientConfig,
        selector: &S,
    ) -> Result<Self, AppError> {
        let program = resolve_adb_program(&config.adb.command_path);
        validate_adb_program(&program).map_err(|err| {
            AppError::dependency(format!("{err}: {program}"), trace_id())
        })?;
        let invoker = Invoker::new()
            .verbose(config.adb.verbose)
            .with_dispatch(build_dispatch(&config.logging));
        Ok(AdbClient::new(invoker, program, selector)
            .with_timeouts(config.timeouts.clone())
            .with_mirror(config.mirror.clone()))
    }
}

impl<R: Runner> AdbClient<R> {
    pub fn new<S: SerialAddress + ?Sized>(
        runner: R,
        adb_program: impl Into<String>,
        selector: &S,
    ) -> Self {
        Self {
            runner,
            adb: adb_program.into(),
            selector: selector.serial_address(),
            timeouts: TimeoutSettings::default(),
            mirror: MirrorSettings::default(),
            events: EventBus::new(),
        }
    }

    pub fn with_timeouts(mut self, timeouts: TimeoutSettings) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn with_mirror(mut self, mirror: MirrorSettings) -> Self {
        self.mirror = mirror;
        self
    }

    pub fn selector(&self) -> &str {
        &self.selector
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    pub fn subscribe(&self) -> Receiver<ClientEvent> {
        self.events.subscribe()
    }

    /// `adb` without a device selector.
    fn host_command(&self) -> AdbCommand {
        AdbCommand::new(self.adb.as_str()).timeout(self.timeouts.command())
    }

    fn device_command(&self) -> AdbCommand {
        self.host_command().serial(self.selector.as_str())
    }

    fn shell<I, T>(&self, args: I) -> AdbCommand
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.device_command().subcommand("shell").args(args)
    }

    fn run_checked(&self, command: AdbCommand) -> Result<OutputResult, AppError> {
        let trace_id = trace_id();
        self.runner.run(command)?.into_checked(&trace_id)
    }

    // Connection

    pub fn version(&self) -> Result<String, AppError> {
        let output = self.run_checked(self.host_command().arg("--version"))?;
        parse_adb_version(&output.output())
            .ok_or_else(|| AppError::not_found("adb version not found in output", trace_id()))
    }

    pub fn get_state(&self) -> Result<OutputResult, AppError> {
        self.runner.run(self.device_command().subcommand("get-state"))
    }

    pub fn is_connected(&self) -> bool {
        match self.get_state() {
            Ok(output) => output.is_ok(),
            Err(err) => {
                debug!(trace_id = %err.trace_id, error = %err, "get-state failed");
                false
            }
        }
    }

    pub fn connect(&self) -> Result<OutputResult, AppError> {
        if self.is_connected() {
            return Ok(OutputResult::success(format!(
                "already connected to {}",
                self.selector
            )));
        }
        self.runner.run(
            self.host_command()
                .subcommand("connect")
                .arg(self.selector.as_str())
                .timeout(self.timeouts.connect()),
        )?;
        if !self.is_connected() {
            return Ok(OutputResult::failure(format!(
                "unable to connect to {}",
                self.selector
            )));
        }
        info!(serial = %self.selector, "device connected");
        self.events
            .publish(ClientEvent::Connected(self.selector.clone()));
        Ok(OutputResult::success(format!("connected to {}", self.selector)))
    }

    pub fn disconnect(&self) -> Result<OutputResult, AppError> {
        if !self.is_connected() {
            return Ok(OutputResult::success("already disconnected"));
        }
        let output = self.runner.run(
            self.host_command()
                .subcommand("disconnect")
                .arg(self.selector.as_str()),
        )?;
        if output.is_ok() {
            info!(serial = %self.selector, "device disconnected");
            self.events
                .publish(ClientEvent::Disconnected(self.selector.clone()));
        }
        Ok(output)
    }

    pub fn disconnect_all(&self) -> Result<OutputResult, AppError> {
        self.runner.run(self.host_command().subcommand("disconnect"))
    }

    /// Polls until the device answers and reports `sys.boot_completed=1`.
    pub fn wait_for_device(&self) -> Result<OutputResult, AppError> {
        wait_until_with(
            &self.runner,
            || self.shell(["getprop", BOOT_COMPLETED_PROP]),
            |output| output.is_ok() && output.output() == "1",
            self.timeouts.wait_for_device(),
            self.timeouts.poll_interval(),
        )
    }

    pub fn root(&self) -> Result<OutputResult, AppError> {
        settle(
            self.runner.run(self.device_command().subcommand("root")),
            self.timeouts.settle(),
        )
    }

    pub fn unroot(&self) -> Result<OutputResult, AppError> {
        settle(
            self.runner.run(self.device_command().subcommand("unroot")),
            self.timeouts.settle(),
        )
    }

    pub fn remount(&self) -> Result<OutputResult, AppError> {
        settle(
            self.runner.run(self.device_command().subcommand("remount")),
            self.timeouts.settle(),
        )
    }

    /// Remounts `dir` read-write.
    pub fn mount(&self, dir: &str) -> Result<OutputResult, AppError> {
        self.remount_dir(dir, "rw,remount")
    }

    /// Remounts `dir` read-only.
    pub fn unmount(&self, dir: &str) -> Result<OutputResult, AppError> {
        self.remount_dir(dir, "ro,remount")
    }

    fn remount_dir(&self, dir: &str, options: &str) -> Result<OutputResult, AppError> {
        validate_device_path(dir).map_err(|err| AppError::validation(err, trace_id()))?;
        settle(
            self.runner.run(self.shell([
                "mount".to_string(),
                "-o".to_string(),
                options.to_string(),
                shell_quote(dir.trim()),
            ])),
            self.timeouts.settle(),
        )
    }

    pub fn is_root(&self) -> Result<bool, AppError> {
        let output = self.runner.run(self.shell(["whoami"]))?;
        Ok(output.output() == "root")
    }

    pub fn reboot(&self) -> Result<OutputResult, AppError> {
        self.runner.run(
            self.device_command()
                .subcommand("reboot")
                .timeout(self.timeouts.reboot()),
        )
    }

    pub fn list_devices(&self) -> Result<Vec<DeviceSummary>, AppError> {
        let output = self.run_checked(self.host_command().subcommand("devices").arg("-l"))?;
        Ok(parse_adb_devices(&output.output()))
    }

    pub fn mdns_check(&self) -> Result<OutputResult, AppError> {
        self.runner
            .run(self.host_command().subcommand("mdns").arg("check"))
    }

    pub fn mdns_services(&self) -> Result<Vec<DiscoveryRecord>, AppError> {
        let output = self.run_checked(self.host_command().subcommand("mdns").arg("services"))?;
        Ok(parse_mdns_services(&output.output()))
    }

    // Properties and input

    pub fn getprop(&self, key: &str) -> Result<Option<String>, AppError> {
        let output = self.run_checked(self.shell(["getprop".to_string(), shell_quote(key)]))?;
        let value = output.output();
        Ok((!value.is_empty()).then_some(value))
    }

    /// `getprop -T`: `string`, `int`, `bool`, `enum ...` and so on. `None` when the device
    /// does not report a type.
    pub fn getprop_type(&self, key: &str) -> Result<Option<String>, AppError> {
        let output = self.runner.run(self.shell([
            "getprop".to_string(),
            "-T".to_string(),
            shell_quote(key),
        ]))?;
        let value = output.output();
        Ok((output.is_ok() && !value.is_empty()).then_some(value))
    }

    pub fn getprops(&self) -> Result<Vec<PropertyPair>, AppError> {
        let output = self.run_checked(self.shell(["getprop"]))?;
        Ok(parse_properties(&output.output()))
    }

    pub fn setprop(&self, key: &str, value: &str) -> Result<OutputResult, AppError> {
        self.run_checked(self.shell([
            "setprop".to_string(),
            shell_quote(key),
            shell_quote(value),
        ]))
    }

    pub fn get_events(&self) -> Result<Vec<InputDevice>, AppError> {
        let output = self.run_checked(self.shell(["getevent", "-p"]))?;
        Ok(parse_input_devices(&output.output()))
    }

    // Packages

    pub fn list_packages(
        &self,
        options: &PackageListOptions,
        filter: Option<&str>,
    ) -> Result<Vec<PackageRecord>, AppError> {
        let mut args: Vec<String> = ["pm", "list", "packages", "-f", "-U", "--show-versioncode"]
            .into_iter()
            .map(str::to_string)
            .collect();
        args.extend(options.to_args());
        if let Some(filter) = filter.filter(|value| !value.trim().is_empty()) {
            args.push(shell_quote(filter.trim()));
        }
        let output = self.run_checked(self.shell(args))?;
        Ok(parse_pm_list_packages(&output.output()))
    }

    pub fn package_path(&self, package: &str) -> Result<Vec<String>, AppError> {
        let output = self.run_checked(self.shell([
            "pm".to_string(),
            "path".to_string(),
            shell_quote(package),
        ]))?;
        Ok(parse_pm_path(&output.output()))
    }

    fn dump_package_output(&self, package: &str) -> Result<OutputResult, AppError> {
        self.run_checked(self.shell([
            "dumpsys".to_string(),
            "package".to_string(),
            shell_quote(package),
        ]))
    }

    pub fn dump_package(&self, package: &str) -> Result<PackageDump, AppError> {
        let output = self.dump_package_output(package)?;
        parse_package_dump(&String::from_utf8_lossy(&output.stdout)).ok_or_else(|| {
            AppError::not_found(format!("No package dump for {package}"), trace_id())
        })
    }

    /// Empty when the package has no runtime permission state.
    pub fn runtime_permissions(&self, package: &str) -> Result<Vec<PermissionRecord>, AppError> {
        let output = self.dump_package_output(package)?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        let reader = PackageDumpReader::new(&stdout).ok_or_else(|| {
            AppError::not_found(format!("No package dump for {package}"), trace_id())
        })?;
        Ok(reader.runtime_permissions())
    }

    // Files and dumps

    pub fn list_dir(&self, path: &str) -> Result<Vec<DeviceFileEntry>, AppError> {
        let trace_id = trace_id();
        validate_device_path(path).map_err(|err| AppError::validation(err, &trace_id))?;
        let path = path.trim();
        let output = self.runner.run(self.shell([
            "ls".to_string(),
            "-la".to_string(),
            shell_quote(path),
        ]))?;
        // `ls` exits non-zero when some entries are unreadable but still lists the rest.
        if !output.is_ok() && output.stdout.is_empty() {
            return Err(output.to_error(&trace_id));
        }
        Ok(parse_directory_listing(path, &String::from_utf8_lossy(&output.stdout)))
    }

    fn test_path(&self, path: &str, flag: &str) -> Result<bool, AppError> {
        validate_device_path(path).map_err(|err| AppError::validation(err, trace_id()))?;
        let output = self.runner.run(self.shell([format!(
            "test -{flag} {} && echo 1 || echo 0",
            shell_quote(path.trim())
        )]))?;
        Ok(output.is_ok() && output.output() == "1")
    }

    pub fn exists(&self, path: &str) -> Result<bool, AppError> {
        self.test_path(path, "e")
    }

    pub fn is_file(&self, path: &str) -> Result<bool, AppError> {
        self.test_path(path, "f")
    }

    pub fn is_dir(&self, path: &str) -> Result<bool, AppError> {
        self.test_path(path, "d")
    }

    pub fn is_symlink(&self, path: &str) -> Result<bool, AppError> {
        self.test_path(path, "h")
    }

    /// `rm [-f] <path>`; `true` when it exited cleanly.
    pub fn remove(&self, path: &str, force: bool) -> Result<bool, AppError> {
        validate_device_path(path).map_err(|err| AppError::validation(err, trace_id()))?;
        let mut args = vec!["rm".to_string()];
        if force {
            args.push("-f".to_string());
        }
        args.push(shell_quote(path.trim()));
        Ok(self.runner.run(self.shell(args))?.is_ok())
    }

    pub fn dumpsys_services(&self) -> Result<Vec<String>, AppError> {
        let output = self.run_checked(self.shell(["dumpsys", "-l"]))?;
        Ok(parse_dumpsys_services(&output.output()))
    }

    pub fn dumpsys(&self, service: &str, args: &[&str]) -> Result<OutputResult, AppError> {
        let mut shell_args = vec!["dumpsys".to_string(), shell_quote(service)];
        shell_args.extend(args.iter().map(|arg| shell_quote(arg)));
        self.runner.run(self.shell(shell_args))
    }

    pub fn dumpsys_section(&self, service: &str, title: &str) -> Result<DumpSection, AppError> {
        let trace_id = trace_id();
        let output = self.dumpsys(service, &[])?.into_checked(&trace_id)?;
        find_section(&String::from_utf8_lossy(&output.stdout), title).ok_or_else(|| {
            AppError::not_found(
                format!("Section '{title}' not found in dumpsys {service}"),
                trace_id,
            )
        })
    }

    // Transfers

    pub fn pull(&self, device_path: &str, local_path: &str) -> Result<OutputResult, AppError> {
        validate_device_path(device_path).map_err(|err| AppError::validation(err, trace_id()))?;
        self.runner.run(
            self.device_command()
                .subcommand("pull")
                .args([device_path.trim(), local_path])
                .timeout(Duration::ZERO),
        )
    }

    pub fn push(&self, local_path: &str, device_path: &str) -> Result<OutputResult, AppError> {
        validate_device_path(device_path).map_err(|err| AppError::validation(err, trace_id()))?;
        self.runner.run(
            self.device_command()
                .subcommand("push")
                .args([local_path, device_path.trim()])
                .timeout(Duration::ZERO),
        )
    }

    /// `adb bugreport [dst]`. `dst` is a host file or directory; without it adb picks a name
    /// in the working directory.
    pub fn bugreport(&self, destination: Option<&str>) -> Result<OutputResult, AppError> {
        let mut command = self
            .device_command()
            .subcommand("bugreport")
            .timeout(Duration::ZERO);
        if let Some(destination) = destination.map(str::trim).filter(|value| !value.is_empty()) {
            command = command.arg(destination);
        }
        self.runner.run(command)
    }

    pub fn install(&self, apk_path: &str, options: &InstallOptions) -> Result<OutputResult, AppError> {
        self.runner.run(
            self.device_command()
                .subcommand("install")
                .args(options.to_args())
                .arg(apk_path)
                .timeout(Duration::ZERO),
        )
    }

    pub fn uninstall(&self, package: &str) -> Result<OutputResult, AppError> {
        self.runner.run(
            self.device_command()
                .subcommand("uninstall")
                .arg(package)
                .timeout(Duration::ZERO),
        )
    }

    // Streams

    pub fn clear_logcat(&self) -> Result<OutputResult, AppError> {
        self.run_checked(
            self.device_command()
                .subcommand("logcat")
                .args(["-b", "all", "-c"]),
        )
    }

    /// Runs logcat with `options`. Without `-d` it follows until the timeout or `cancel` fires.
    pub fn logcat(
        &self,
        options: &LogcatOptions,
        sink: Option<OutputSink>,
        cancel: Option<&CancelToken>,
    ) -> Result<OutputResult, AppError> {
        if options.has_filename() && sink.is_some() {
            return Err(AppError::validation(
                "filename and sink cannot be used together",
                trace_id(),
            ));
        }
        let mut command = self
            .device_command()
            .subcommand("logcat")
            .args(options.to_args())
            .timeout(options.timeout);
        if let Some(sink) = sink {
            command = command.stdout_to(sink);
        }
        match cancel {
            Some(cancel) => self.runner.run_cancellable(command, cancel),
            None => self.runner.run(command),
        }
    }

    /// Streams the screen into the configured player until `cancel` fires or the player exits.
    pub fn mirror_screen(&self, cancel: &CancelToken) -> Result<OutputResult, AppError> {
        let availability = check_player_availability(&self.runner, &self.mirror);
        if !availability.available {
            return Err(AppError::dependency(
                format!("Player not available: {}", availability.command_path),
                trace_id(),
            ));
        }
        let (upstream, downstream) = build_mirror_commands(
            &self.adb,
            self.selector.as_str(),
            &self.mirror,
            &availability.command_path,
        );
        self.runner.run_piped(upstream, downstream, cancel)
    }
}
