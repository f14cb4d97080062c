use std::path::Path;
use std::time::Duration;

use crate::app::adb::command::{AdbCommand, HostCommand, SerialAddress};
use crate::app::adb::locator::{expand_home, find_on_path};
use crate::app::adb::runner::Runner;
use crate::app::config::MirrorSettings;

const SCREENRECORD_LOOP: &str = "while true; do screenrecord --output-format=h264 -; done";
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerAvailability {
    pub available: bool,
    pub version_output: String,
    pub command_path: String,
}

fn common_player_paths(player: &str) -> Vec<String> {
    let dirs: &[&str] = if std::env::consts::OS == "macos" {
        &["/opt/homebrew/bin", "/usr/local/bin"]
    } else {
        &["/usr/bin", "/usr/local/bin", "/snap/bin", "~/.local/bin"]
    };
    dirs.iter()
        .map(|dir| expand_home(&format!("{dir}/{player}")))
        .collect()
}

fn probe_version<R: Runner + ?Sized>(runner: &R, program: &str) -> Option<String> {
    let output = runner
        .run(AdbCommand::new(program).arg("-version").timeout(PROBE_TIMEOUT))
        .ok()?;
    if !output.is_ok() {
        return None;
    }
    output.output().lines().next().map(str::to_string)
}

/// Looks for the configured player: as given, on `PATH`, then in common install directories.
pub fn check_player_availability<R: Runner + ?Sized>(
    runner: &R,
    settings: &MirrorSettings,
) -> PlayerAvailability {
    let player = expand_home(settings.player.trim());
    let mut candidates = vec![player.clone()];
    if let Some(found) = find_on_path(&player) {
        candidates.push(found.to_string_lossy().to_string());
    }
    if !player.contains('/') {
        candidates.extend(
            common_player_paths(&player)
                .into_iter()
                .filter(|path| Path::new(path).is_file()),
        );
    }

    for candidate in candidates {
        if let Some(version_output) = probe_version(runner, &candidate) {
            return PlayerAvailability {
                available: true,
                version_output,
                command_path: candidate,
            };
        }
    }
    PlayerAvailability {
        available: false,
        version_output: String::new(),
        command_path: player,
    }
}

/// The device side (endless h264 screenrecord) and the host side (a low-latency player reading stdin).
pub fn build_mirror_commands<S: SerialAddress + ?Sized>(
    adb_program: &str,
    selector: &S,
    settings: &MirrorSettings,
    player_path: &str,
) -> (AdbCommand, HostCommand) {
    let upstream = AdbCommand::new(adb_program)
        .serial(selector)
        .subcommand("shell")
        .arg(SCREENRECORD_LOOP);

    let mut args = vec![
        "-framerate".to_string(),
        settings.framerate.to_string(),
        "-probesize".to_string(),
        "32".to_string(),
        "-sync".to_string(),
        "video".to_string(),
    ];
    args.extend(settings.extra_args.split_whitespace().map(str::to_string));
    args.push("-".to_string());

    (upstream, HostCommand::new(player_path, args))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::adb::runner::Invoker;

    #[test]
    fn builds_screenrecord_to_player_pipeline() {
        let settings = MirrorSettings::default();
        let (upstream, downstream) =
            build_mirror_commands("/opt/adb", "emulator-5554", &settings, "ffplay");
        assert_eq!(
            upstream.full_args(),
            vec!["-s", "emulator-5554", "shell", SCREENRECORD_LOOP]
        );
        assert_eq!(upstream.timeout_value(), Duration::ZERO);
        assert_eq!(downstream.program, "ffplay");
        assert_eq!(
            downstream.args,
            vec!["-framerate", "60", "-probesize", "32", "-sync", "video", "-"]
        );
    }

    #[test]
    fn extra_args_go_before_stdin_marker() {
        let settings = MirrorSettings {
            player: "ffplay".to_string(),
            framerate: 30,
            extra_args: " -an  -fflags nobuffer ".to_string(),
        };
        let (_, downstream) = build_mirror_commands("adb", "R58M", &settings, "/usr/bin/ffplay");
        assert_eq!(downstream.args[1], "30");
        assert_eq!(
            &downstream.args[6..],
            &["-an", "-fflags", "nobuffer", "-"]
        );
    }

    #[test]
    fn missing_player_is_reported_unavailable() {
        let settings = MirrorSettings {
            player: "/this/path/should/not/exist/ffplay".to_string(),
            ..MirrorSettings::default()
        };
        let availability = check_player_availability(&Invoker::new(), &settings);
        assert!(!availability.available);
        assert_eq!(availability.command_path, settings.player);
    }

    #[cfg(unix)]
    #[test]
    fn runnable_player_is_reported_with_version() {
        let dir = tempfile::tempdir().expect("temp dir");
        let player = dir.path().join("fakeplay");
        std::fs::write(&player, "#!/bin/sh\necho \"fakeplay version 6.1\"\n").expect("write");
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&player, std::fs::Permissions::from_mode(0o755))
                .expect("chmod");
        }
        let settings = MirrorSettings {
            player: player.to_string_lossy().to_string(),
            ..MirrorSettings::default()
        };
        let availability = check_player_availability(&Invoker::new(), &settings);
        assert!(availability.available);
        assert_eq!(availability.version_output, "fakeplay version 6.1");
    }
}
