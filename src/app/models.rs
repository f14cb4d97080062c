use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::app::adb::command::SerialAddress;

pub const DEFAULT_ADB_PORT: u16 = 5555;

const SYSTEM_PATH_PREFIXES: [&str; 5] = ["/system/", "/product/", "/system_ext/", "/vendor/", "/apex/"];
const SYSTEM_UID: &str = "1000";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PropertyPair {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PackageRecord {
    pub path: String,
    pub name: String,
    pub version_code: String,
    pub uid: String,
}

impl PackageRecord {
    /// Heuristic only: preinstalled partitions or the `system` uid.
    pub fn maybe_is_system(&self) -> bool {
        SYSTEM_PATH_PREFIXES
            .iter()
            .any(|prefix| self.path.starts_with(prefix))
            || self.uid == SYSTEM_UID
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceFileEntry {
    pub parent: String,
    pub permissions: String,
    pub link_count: String,
    pub owner: String,
    pub group: String,
    pub size: String,
    pub modified_at: NaiveDateTime,
    pub name: String,
}

impl DeviceFileEntry {
    pub fn is_dir(&self) -> bool {
        self.permissions.starts_with('d')
    }

    pub fn is_symlink(&self) -> bool {
        self.permissions.starts_with('l')
    }

    pub fn size_bytes(&self) -> Option<u64> {
        self.size.parse().ok()
    }

    /// Link name without the ` -> target` suffix.
    pub fn file_name(&self) -> &str {
        if self.is_symlink() {
            if let Some((name, _)) = self.name.split_once("->") {
                return name.trim_end();
            }
        }
        &self.name
    }

    pub fn symlink_target(&self) -> Option<&str> {
        if !self.is_symlink() {
            return None;
        }
        self.name
            .split_once("->")
            .map(|(_, target)| target.trim())
            .filter(|target| !target.is_empty())
    }

    /// Absolute device path; symlinks resolve to their target.
    pub fn abs(&self) -> String {
        if let Some(target) = self.symlink_target() {
            return target.to_string();
        }
        if self.name.starts_with('/') {
            return clean_device_path(&self.name);
        }
        clean_device_path(&format!("{}/{}", self.parent, self.name))
    }
}

impl fmt::Display for DeviceFileEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {} {} {} {}",
            self.permissions,
            self.link_count,
            self.owner,
            self.group,
            self.size,
            self.modified_at.format("%Y-%m-%d %H:%M"),
            self.name
        )
    }
}

/// Lexical cleanup: collapses repeated separators and resolves `.` and `..`.
pub fn clean_device_path(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    format!("/{}", parts.join("/"))
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PermissionRecord {
    pub name: String,
    pub granted: bool,
    pub flags: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DumpSection {
    pub title: String,
    pub lines: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PackageDump {
    pub name: String,
    pub flags: Vec<String>,
    pub version_name: Option<String>,
    pub version_code: Option<String>,
    pub code_path: Option<String>,
    pub resource_path: Option<String>,
    pub data_dir: Option<String>,
    pub user_id: Option<String>,
    pub first_install_time: Option<String>,
    pub last_update_time: Option<String>,
    pub timestamp: Option<String>,
    pub install_permissions: Vec<PermissionRecord>,
    pub requested_permissions: Vec<String>,
    pub runtime_permissions: Vec<PermissionRecord>,
}

impl PackageDump {
    pub fn has_flag(&self, flag: &str) -> bool {
        self.flags.iter().any(|value| value == flag)
    }

    pub fn is_system(&self) -> bool {
        self.has_flag("SYSTEM")
    }
}

/// `host:port` of a device reachable over the network.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ClientAddr {
    pub host: String,
    pub port: u16,
}

impl ClientAddr {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for ClientAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for ClientAddr {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err("address is empty".to_string());
        }
        match trimmed.rsplit_once(':') {
            Some((host, port)) if !host.is_empty() => {
                let port = port
                    .parse::<u16>()
                    .map_err(|_| format!("invalid port in address: {trimmed}"))?;
                Ok(Self::new(host, port))
            }
            Some(_) => Err(format!("missing host in address: {trimmed}")),
            None => Ok(Self::new(trimmed, DEFAULT_ADB_PORT)),
        }
    }
}

impl SerialAddress for ClientAddr {
    fn serial_address(&self) -> String {
        self.to_string()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DiscoveryRecord {
    pub name: String,
    pub service_type: String,
    pub address: ClientAddr,
}

impl SerialAddress for DiscoveryRecord {
    fn serial_address(&self) -> String {
        format!("{}.{}", self.name, self.service_type)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceSummary {
    pub serial: String,
    pub state: String,
    pub usb: Option<String>,
    pub model: Option<String>,
    pub product: Option<String>,
    pub device: Option<String>,
    pub transport_id: Option<String>,
}

impl DeviceSummary {
    pub fn is_online(&self) -> bool {
        self.state == "device"
    }
}

impl SerialAddress for DeviceSummary {
    fn serial_address(&self) -> String {
        self.serial.clone()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InputDevice {
    pub event: String,
    pub name: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn entry(permissions: &str, parent: &str, name: &str) -> DeviceFileEntry {
        DeviceFileEntry {
            parent: parent.to_string(),
            permissions: permissions.to_string(),
            link_count: "1".to_string(),
            owner: "root".to_string(),
            group: "root".to_string(),
            size: "4096".to_string(),
            modified_at: NaiveDate::from_ymd_opt(2024, 1, 1)
                .and_then(|date| date.and_hms_opt(12, 0, 0))
                .expect("valid date"),
            name: name.to_string(),
        }
    }

    #[test]
    fn package_record_system_heuristic() {
        let mut record = PackageRecord {
            path: "/system/app/Settings/Settings.apk".to_string(),
            name: "com.android.settings".to_string(),
            version_code: "34".to_string(),
            uid: "10021".to_string(),
        };
        assert!(record.maybe_is_system());

        record.path = "/data/app/x.apk".to_string();
        assert!(!record.maybe_is_system());

        record.uid = "1000".to_string();
        assert!(record.maybe_is_system());
    }

    #[test]
    fn device_file_helpers() {
        let dir = entry("drwxrwx--x", "/sdcard/", "Download");
        assert!(dir.is_dir());
        assert!(!dir.is_symlink());
        assert_eq!(dir.abs(), "/sdcard/Download");
        assert_eq!(dir.size_bytes(), Some(4096));

        let link = entry("lrw-r--r--", "/", "sdcard -> /storage/self/primary");
        assert!(link.is_symlink());
        assert_eq!(link.file_name(), "sdcard");
        assert_eq!(link.symlink_target(), Some("/storage/self/primary"));
        assert_eq!(link.abs(), "/storage/self/primary");
    }

    #[test]
    fn device_file_display_uses_listing_layout() {
        let file = entry("-rw-r--r--", "/sdcard", "a b.txt");
        assert_eq!(file.to_string(), "-rw-r--r-- 1 root root 4096 2024-01-01 12:00 a b.txt");
    }

    #[test]
    fn cleans_device_paths() {
        assert_eq!(clean_device_path("/sdcard//Download/./x"), "/sdcard/Download/x");
        assert_eq!(clean_device_path("/data/local/../tmp"), "/data/tmp");
        assert_eq!(clean_device_path("/.."), "/");
    }

    #[test]
    fn client_addr_parses_host_and_port() {
        let addr: ClientAddr = "192.168.1.105:37123".parse().expect("addr");
        assert_eq!(addr, ClientAddr::new("192.168.1.105", 37123));
        assert_eq!(addr.serial_address(), "192.168.1.105:37123");

        let addr: ClientAddr = "192.168.1.105".parse().expect("addr");
        assert_eq!(addr.port, DEFAULT_ADB_PORT);

        assert!("192.168.1.105:notaport".parse::<ClientAddr>().is_err());
        assert!(":5555".parse::<ClientAddr>().is_err());
        assert!("".parse::<ClientAddr>().is_err());
    }

    #[test]
    fn discovery_record_selects_by_service_name() {
        let record = DiscoveryRecord {
            name: "adb-R58M123ABC-xyz".to_string(),
            service_type: "_adb-tls-connect._tcp".to_string(),
            address: ClientAddr::new("192.168.1.20", 41235),
        };
        assert_eq!(record.serial_address(), "adb-R58M123ABC-xyz._adb-tls-connect._tcp");
    }

    #[test]
    fn package_dump_flags() {
        let dump = PackageDump {
            name: "com.android.shell".to_string(),
            flags: vec!["SYSTEM".to_string(), "HAS_CODE".to_string()],
            ..PackageDump::default()
        };
        assert!(dump.is_system());
        assert!(dump.has_flag("HAS_CODE"));
        assert!(!dump.has_flag("DEBUGGABLE"));
    }
}
