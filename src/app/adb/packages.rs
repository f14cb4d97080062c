use std::sync::OnceLock;

use regex::Regex;

use crate::app::models::{PackageDump, PackageRecord, PermissionRecord};

const PACKAGE_LINE_PATTERN: &str =
    r"package:(.*\.apk)=([^\s]+)\s*(versionCode|uid):([^\s]+)\s+(versionCode|uid):([^\s]+)$";
const PACKAGE_NAME_PATTERN: &str = r"^\s+Package\s+\[([^\]]+)\]";
const FLAGS_PATTERN: &str = r"^\s{3,}flags=\[\s*([^\]]+?)\s*\]$";
const INSTALL_PERMISSION_PATTERN: &str = r"^\s{4,}([^:]+):\s+granted=(true|false)$";
const REQUESTED_PERMISSION_PATTERN: &str = r"^\s{4,}([\w\.]+)$";
const RUNTIME_PERMISSION_PATTERN: &str =
    r"^\s*([^:]+):\s+granted=(false|true),\s+flags=\[\s*([^\]]+)\]$";

const PACKAGES_HEADER: &str = "Packages:";
const INSTALL_PERMISSIONS_HEADER: &str = "install permissions:";
const REQUESTED_PERMISSIONS_HEADER: &str = "requested permissions:";
const RUNTIME_PERMISSIONS_HEADER: &str = "runtime permissions:";
const MIN_ITEM_INDENT: usize = 3;

macro_rules! cached_regex {
    ($name:ident, $pattern:expr) => {
        fn $name() -> Option<&'static Regex> {
            static RE: OnceLock<Option<Regex>> = OnceLock::new();
            RE.get_or_init(|| Regex::new($pattern).ok()).as_ref()
        }
    };
}

cached_regex!(package_line_regex, PACKAGE_LINE_PATTERN);
cached_regex!(package_name_regex, PACKAGE_NAME_PATTERN);
cached_regex!(flags_regex, FLAGS_PATTERN);
cached_regex!(install_permission_regex, INSTALL_PERMISSION_PATTERN);
cached_regex!(requested_permission_regex, REQUESTED_PERMISSION_PATTERN);
cached_regex!(runtime_permission_regex, RUNTIME_PERMISSION_PATTERN);

/// `pm list packages -f -U --show-versioncode`. The two trailing fields may come in either order.
pub fn parse_pm_list_packages(output: &str) -> Vec<PackageRecord> {
    let Some(re) = package_line_regex() else {
        return Vec::new();
    };
    output
        .lines()
        .filter_map(|line| {
            let caps = re.captures(line.trim())?;
            let (first_label, first_value) = (&caps[3], &caps[4]);
            let (second_label, second_value) = (&caps[5], &caps[6]);
            if first_label == second_label {
                return None;
            }
            let (version_code, uid) = if first_label == "uid" {
                (second_value, first_value)
            } else {
                (first_value, second_value)
            };
            Some(PackageRecord {
                path: caps[1].to_string(),
                name: caps[2].to_string(),
                version_code: version_code.to_string(),
                uid: uid.to_string(),
            })
        })
        .collect()
}

/// `pm path <package>`: one apk path per `package:` line (split apks yield several).
pub fn parse_pm_path(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| line.trim().strip_prefix("package:"))
        .map(|path| path.trim().to_string())
        .filter(|path| !path.is_empty())
        .collect()
}

fn indent_of(line: &str) -> usize {
    line.len() - line.trim_start().len()
}

/// Lines following the first line accepted by `is_header`, up to the next blank line or
/// the first line that is not indented deeper than the header.
pub fn carve_region<'a>(output: &'a str, is_header: impl Fn(&str) -> bool) -> Option<Vec<&'a str>> {
    let mut lines = output.lines().map(|line| line.trim_end_matches('\r'));
    let header = lines.by_ref().find(|line| is_header(line))?;
    let header_indent = indent_of(header);
    Some(
        lines
            .take_while(|line| !line.trim().is_empty() && indent_of(line) > header_indent)
            .collect(),
    )
}

fn is_indented_header(line: &str, header: &str) -> bool {
    indent_of(line) >= MIN_ITEM_INDENT && line.trim() == header
}

/// Runtime permission block of a `dumpsys package <name>` dump. Empty when the dump has no such block.
pub fn parse_runtime_permissions(output: &str) -> Vec<PermissionRecord> {
    let Some(region) = carve_region(output, |line| {
        is_indented_header(line, RUNTIME_PERMISSIONS_HEADER)
    }) else {
        return Vec::new();
    };
    let Some(re) = runtime_permission_regex() else {
        return Vec::new();
    };
    region
        .into_iter()
        .filter_map(|line| {
            let caps = re.captures(line)?;
            Some(PermissionRecord {
                name: caps[1].trim().to_string(),
                granted: &caps[2] == "true",
                flags: caps[3]
                    .split('|')
                    .map(str::trim)
                    .filter(|flag| !flag.is_empty())
                    .map(str::to_string)
                    .collect(),
            })
        })
        .collect()
}

/// Reads the `Packages:` block of a `dumpsys package <name>` dump.
pub struct PackageDumpReader<'a> {
    lines: Vec<&'a str>,
}

impl<'a> PackageDumpReader<'a> {
    /// `None` when the dump carries no `Packages:` block.
    pub fn new(output: &'a str) -> Option<Self> {
        let mut lines = output.lines().map(|line| line.trim_end_matches('\r'));
        lines.by_ref().find(|line| *line == PACKAGES_HEADER)?;
        Some(Self {
            lines: lines.take_while(|line| !line.trim().is_empty()).collect(),
        })
    }

    pub fn package_name(&self) -> Option<String> {
        let re = package_name_regex()?;
        self.lines
            .iter()
            .find_map(|line| re.captures(line).map(|caps| caps[1].to_string()))
    }

    pub fn flags(&self) -> Vec<String> {
        let Some(re) = flags_regex() else {
            return Vec::new();
        };
        self.lines
            .iter()
            .find_map(|line| re.captures(line))
            .map(|caps| caps[1].split_whitespace().map(str::to_string).collect())
            .unwrap_or_default()
    }

    /// Value of the first `   <name>=<value>` line.
    pub fn item(&self, name: &str) -> Option<String> {
        self.lines.iter().find_map(|line| {
            if indent_of(line) < MIN_ITEM_INDENT {
                return None;
            }
            let value = line.trim_start().strip_prefix(name)?.strip_prefix('=')?;
            Some(value.trim_end().to_string())
        })
    }

    pub fn install_permissions(&self) -> Vec<PermissionRecord> {
        let Some(re) = install_permission_regex() else {
            return Vec::new();
        };
        self.block_after(INSTALL_PERMISSIONS_HEADER)
            .into_iter()
            .map_while(|line| {
                let caps = re.captures(line)?;
                Some(PermissionRecord {
                    name: caps[1].trim().to_string(),
                    granted: &caps[2] == "true",
                    flags: Vec::new(),
                })
            })
            .collect()
    }

    pub fn requested_permissions(&self) -> Vec<String> {
        let Some(re) = requested_permission_regex() else {
            return Vec::new();
        };
        self.block_after(REQUESTED_PERMISSIONS_HEADER)
            .into_iter()
            .map_while(|line| re.captures(line).map(|caps| caps[1].to_string()))
            .collect()
    }

    pub fn runtime_permissions(&self) -> Vec<PermissionRecord> {
        parse_runtime_permissions(&self.lines.join("\n"))
    }

    pub fn read(&self) -> Option<PackageDump> {
        let name = self.package_name()?;
        Some(PackageDump {
            name,
            flags: self.flags(),
            version_name: self.item("versionName"),
            version_code: self
                .item("versionCode")
                .and_then(|value| value.split_whitespace().next().map(str::to_string)),
            code_path: self.item("codePath"),
            resource_path: self.item("resourcePath"),
            data_dir: self.item("dataDir"),
            user_id: self.item("userId"),
            first_install_time: self.item("firstInstallTime"),
            last_update_time: self.item("lastUpdateTime"),
            timestamp: self.item("timeStamp"),
            install_permissions: self.install_permissions(),
            requested_permissions: self.requested_permissions(),
            runtime_permissions: self.runtime_permissions(),
        })
    }

    fn block_after(&self, header: &str) -> Vec<&'a str> {
        let mut lines = self.lines.iter().copied();
        if lines.by_ref().any(|line| is_indented_header(line, header)) {
            lines.collect()
        } else {
            Vec::new()
        }
    }
}

pub fn parse_package_dump(output: &str) -> Option<PackageDump> {
    PackageDumpReader::new(output)?.read()
}

#[cfg(test)]
mod tests {
    use super::*;

    const DUMP: &str = "Activity Resolver Table:\n  Non-Data Actions:\n      android.intent.action.MAIN:\n        1a2b3c com.example.app/.MainActivity\n\nPackages:\n  Package [com.example.app] (4f1c2e1):\n    userId=10123\n    pkg=Package{8d2a1b com.example.app}\n    codePath=/data/app/~~abc==/com.example.app-xyz==\n    resourcePath=/data/app/~~abc==/com.example.app-xyz==\n    versionCode=42 minSdk=24 targetSdk=34\n    versionName=1.4.2\n    flags=[ HAS_CODE ALLOW_CLEAR_USER_DATA ALLOW_BACKUP ]\n    privateFlags=[ PRIVATE_FLAG_ACTIVITIES_RESIZE_MODE_RESIZEABLE ]\n    dataDir=/data/user/0/com.example.app\n    timeStamp=2024-05-01 10:11:12\n    firstInstallTime=2024-05-01 10:11:13\n    lastUpdateTime=2024-05-02 08:00:00\n    requested permissions:\n      android.permission.INTERNET\n      android.permission.CAMERA\n      android.permission.ACCESS_NETWORK_STATE\n    install permissions:\n      android.permission.INTERNET: granted=true\n      android.permission.ACCESS_NETWORK_STATE: granted=true\n    User 0: ceDataInode=12345 installed=true hidden=false\n      gids=[3003]\n      runtime permissions:\n        android.permission.CAMERA: granted=false, flags=[ USER_SENSITIVE_WHEN_GRANTED|USER_SENSITIVE_WHEN_DENIED ]\n        android.permission.POST_NOTIFICATIONS: granted=true, flags=[ USER_SET ]\n\nQueries:\n  system apps queryable: false\n";

    #[test]
    fn parses_package_line() {
        let records = parse_pm_list_packages("package:/data/app/x.apk=com.foo versionCode:7 uid:10042");
        assert_eq!(
            records,
            vec![PackageRecord {
                path: "/data/app/x.apk".to_string(),
                name: "com.foo".to_string(),
                version_code: "7".to_string(),
                uid: "10042".to_string(),
            }]
        );
    }

    #[test]
    fn package_trailing_fields_are_order_independent() {
        let a = parse_pm_list_packages("package:/data/app/x.apk=com.foo versionCode:7 uid:10042");
        let b = parse_pm_list_packages("package:/data/app/x.apk=com.foo uid:10042 versionCode:7");
        assert_eq!(a, b);
    }

    #[test]
    fn package_parser_skips_malformed_lines() {
        let output = "package:/system/app/Sys/Sys.apk=com.android.sys versionCode:34 uid:1000\nnot a package\npackage:/data/app/y.apk=com.bar uid:1 uid:2\npackage:/data/app/z.apk=com.baz\n\n";
        let records = parse_pm_list_packages(output);
        assert_eq!(records.len(), 1);
        assert!(records[0].maybe_is_system());
        assert!(parse_pm_list_packages("").is_empty());
    }

    #[test]
    fn parses_pm_path() {
        let output = "package:/data/app/~~a==/com.foo-b==/base.apk\npackage:/data/app/~~a==/com.foo-b==/split_config.arm64_v8a.apk\n";
        let paths = parse_pm_path(output);
        assert_eq!(paths.len(), 2);
        assert!(paths[0].ends_with("base.apk"));
    }

    #[test]
    fn carve_region_stops_at_blank_or_outdent() {
        let text = "a:\n  one\n  two\nb:\n  three\n";
        let region = carve_region(text, |line| line == "a:").expect("region");
        assert_eq!(region, vec!["  one", "  two"]);
        assert!(carve_region(text, |line| line == "c:").is_none());
    }

    #[test]
    fn runtime_permissions_are_read_from_their_region_only() {
        let records = parse_runtime_permissions(DUMP);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].name, "android.permission.CAMERA");
        assert!(!records[0].granted);
        assert_eq!(
            records[0].flags,
            vec!["USER_SENSITIVE_WHEN_GRANTED", "USER_SENSITIVE_WHEN_DENIED"]
        );
        assert!(records[1].granted);
        assert_eq!(records[1].flags, vec!["USER_SET"]);
    }

    #[test]
    fn runtime_permissions_absent_region_is_empty() {
        let dump = "Packages:\n  Package [com.example.plain] (1):\n    userId=10200\n    install permissions:\n      android.permission.INTERNET: granted=true\n    User 0: ceDataInode=1 installed=true\n";
        assert!(parse_runtime_permissions(dump).is_empty());
        assert!(parse_runtime_permissions("").is_empty());

        let reader = PackageDumpReader::new(dump).expect("packages block");
        let read = reader.read().expect("package dump");
        assert_eq!(read.install_permissions.len(), 1);
        assert!(read.runtime_permissions.is_empty());
    }

    #[test]
    fn reads_package_dump() {
        let dump = parse_package_dump(DUMP).expect("package dump");
        assert_eq!(dump.name, "com.example.app");
        assert_eq!(dump.user_id.as_deref(), Some("10123"));
        assert_eq!(dump.version_code.as_deref(), Some("42"));
        assert_eq!(dump.version_name.as_deref(), Some("1.4.2"));
        assert_eq!(dump.data_dir.as_deref(), Some("/data/user/0/com.example.app"));
        assert_eq!(dump.timestamp.as_deref(), Some("2024-05-01 10:11:12"));
        assert_eq!(dump.first_install_time.as_deref(), Some("2024-05-01 10:11:13"));
        assert_eq!(dump.last_update_time.as_deref(), Some("2024-05-02 08:00:00"));
        assert_eq!(dump.flags, vec!["HAS_CODE", "ALLOW_CLEAR_USER_DATA", "ALLOW_BACKUP"]);
        assert!(!dump.is_system());
        assert_eq!(dump.requested_permissions.len(), 3);
        assert_eq!(dump.install_permissions.len(), 2);
        assert!(dump.install_permissions.iter().all(|perm| perm.granted));
        assert_eq!(dump.runtime_permissions.len(), 2);
    }

    #[test]
    fn package_dump_without_packages_block_is_none() {
        assert!(PackageDumpReader::new("Activity Resolver Table:\n").is_none());
        assert!(parse_package_dump("").is_none());
    }
}
