use std::path::{Path, PathBuf};

#[cfg(windows)]
const ADB_BINARY: &str = "adb.exe";
#[cfg(not(windows))]
const ADB_BINARY: &str = "adb";

pub fn normalize_command_path(value: &str) -> String {
    let trimmed = value.trim();
    for quote in ['"', '\''] {
        if let Some(inner) = trimmed
            .strip_prefix(quote)
            .and_then(|candidate| candidate.strip_suffix(quote))
        {
            return inner.trim().to_string();
        }
    }
    trimmed.to_string()
}

pub fn expand_home(path: &str) -> String {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest).to_string_lossy().to_string();
        }
    }
    path.to_string()
}

fn is_file(path: &Path) -> bool {
    path.is_file()
}

/// First `name` found in the directories of `PATH`.
pub fn find_on_path(name: &str) -> Option<PathBuf> {
    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths)
        .map(|dir| dir.join(name))
        .find(|candidate| is_file(candidate))
}

fn sdk_candidates() -> Vec<PathBuf> {
    ["ANDROID_HOME", "ANDROID_SDK_ROOT"]
        .iter()
        .filter_map(|key| std::env::var_os(key))
        .map(|root| PathBuf::from(root).join("platform-tools").join(ADB_BINARY))
        .collect()
}

fn common_adb_paths() -> Vec<&'static str> {
    if std::env::consts::OS == "macos" {
        vec![
            "~/Library/Android/sdk/platform-tools/adb",
            "/opt/homebrew/bin/adb",
            "/usr/local/bin/adb",
        ]
    } else if std::env::consts::OS == "windows" {
        vec!["~/AppData/Local/Android/Sdk/platform-tools/adb.exe"]
    } else {
        vec![
            "~/Android/Sdk/platform-tools/adb",
            "/usr/bin/adb",
            "/usr/local/bin/adb",
            "/opt/android-sdk/platform-tools/adb",
        ]
    }
}

/// Locates the adb executable: `PATH`, then the SDK environment variables, then common install locations.
pub fn locate_adb() -> Option<PathBuf> {
    if let Some(found) = find_on_path(ADB_BINARY) {
        return Some(found);
    }
    sdk_candidates()
        .into_iter()
        .chain(
            common_adb_paths()
                .into_iter()
                .map(|path| PathBuf::from(expand_home(path))),
        )
        .find(|candidate| is_file(candidate))
}

/// The configured path when set, otherwise whatever [`locate_adb`] finds, falling back to a bare `adb`.
pub fn resolve_adb_program(config_command_path: &str) -> String {
    let normalized = normalize_command_path(config_command_path);
    if !normalized.is_empty() {
        return expand_home(&normalized);
    }
    locate_adb()
        .map(|path| path.to_string_lossy().to_string())
        .unwrap_or_else(|| ADB_BINARY.to_string())
}

pub fn validate_adb_program(program: &str) -> Result<(), String> {
    if program.trim().is_empty() {
        return Err("ADB command is empty".to_string());
    }
    if program == ADB_BINARY {
        return Ok(());
    }
    let path = Path::new(program);
    if path.is_dir() {
        return Err("ADB path must point to an executable file".to_string());
    }
    if !path.exists() {
        return Err("ADB executable not found at the configured path".to_string());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_wrapping_quotes() {
        assert_eq!(
            normalize_command_path("  \"/opt/android/platform-tools/adb\"  "),
            "/opt/android/platform-tools/adb"
        );
        assert_eq!(
            normalize_command_path("  '/opt/android/platform-tools/adb'  "),
            "/opt/android/platform-tools/adb"
        );
    }

    #[test]
    fn configured_path_wins() {
        assert_eq!(resolve_adb_program("'/opt/adb'"), "/opt/adb");
    }

    #[test]
    fn empty_config_resolves_to_something_runnable() {
        let program = resolve_adb_program("   ");
        assert!(!program.is_empty());
        assert!(program == ADB_BINARY || Path::new(&program).is_file());
    }

    #[test]
    fn validates_paths() {
        let err = validate_adb_program("/this/path/should/not/exist/adb").unwrap_err();
        assert!(err.to_lowercase().contains("not found"));

        let dir = tempfile::tempdir().expect("temp dir");
        let dir_path = dir.path().to_string_lossy().to_string();
        assert!(validate_adb_program(&dir_path).is_err());

        let file = tempfile::NamedTempFile::new().expect("temp file");
        assert!(validate_adb_program(&file.path().to_string_lossy()).is_ok());
        assert!(validate_adb_program("").is_err());
    }

    #[test]
    fn expands_home_prefix() {
        if let Some(home) = dirs::home_dir() {
            let expanded = expand_home("~/bin/adb");
            assert!(expanded.starts_with(&*home.to_string_lossy()));
            assert!(expanded.ends_with("adb"));
        }
        assert_eq!(expand_home("/usr/bin/adb"), "/usr/bin/adb");
    }
}
