use std::sync::OnceLock;

use chrono::{DateTime, NaiveDateTime};
use regex::Regex;

use crate::app::models::DeviceFileEntry;

const LISTING_FIELDS: usize = 8;
const STAT_FIELDS: usize = 7;
const LISTING_TIME_FORMAT: &str = "%Y-%m-%d %H:%M";

/// `stat -c` format producing the 7-field layout read by [`parse_stat_entry`].
pub const STAT_FORMAT: &str = "%A %h %U %G %s %Y %N";

fn whitespace_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+").ok()).as_ref()
}

fn split_fields(line: &str, limit: usize) -> Option<Vec<&str>> {
    let fields: Vec<&str> = whitespace_regex()?.splitn(line.trim(), limit).collect();
    (fields.len() == limit).then_some(fields)
}

fn build_entry(parent: &str, fields: &[&str], modified_at: NaiveDateTime, name: &str) -> DeviceFileEntry {
    DeviceFileEntry {
        parent: parent.to_string(),
        permissions: fields[0].to_string(),
        link_count: fields[1].to_string(),
        owner: fields[2].to_string(),
        group: fields[3].to_string(),
        size: fields[4].to_string(),
        modified_at,
        name: name.to_string(),
    }
}

/// One `ls -l` line: `perms links owner group size YYYY-MM-DD HH:MM name`.
/// The name takes the rest of the line, so it may contain spaces or ` -> target`.
pub fn parse_list_entry(parent: &str, line: &str) -> Option<DeviceFileEntry> {
    let fields = split_fields(line, LISTING_FIELDS)?;
    let stamp = format!("{} {}", fields[5], fields[6]);
    let modified_at = NaiveDateTime::parse_from_str(&stamp, LISTING_TIME_FORMAT).ok()?;
    Some(build_entry(parent, &fields, modified_at, fields[7]))
}

/// One `stat -c '%A %h %U %G %s %Y %N'` line; the time is a Unix timestamp.
pub fn parse_stat_entry(parent: &str, line: &str) -> Option<DeviceFileEntry> {
    let fields = split_fields(line, STAT_FIELDS)?;
    let seconds = fields[5].parse::<i64>().ok()?;
    let modified_at = DateTime::from_timestamp(seconds, 0)?.naive_utc();
    let name = fields[6].replace(['\'', '`'], "");
    Some(build_entry(parent, &fields, modified_at, &name))
}

fn is_listable(entry: &DeviceFileEntry) -> bool {
    let name = entry.file_name();
    !name.is_empty() && name != "." && name != ".."
}

pub fn parse_directory_listing(parent: &str, output: &str) -> Vec<DeviceFileEntry> {
    output
        .lines()
        .filter(|line| !line.trim_start().starts_with("total"))
        .filter_map(|line| parse_list_entry(parent, line))
        .filter(is_listable)
        .collect()
}

pub fn parse_stat_listing(parent: &str, output: &str) -> Vec<DeviceFileEntry> {
    output
        .lines()
        .filter_map(|line| parse_stat_entry(parent, line))
        .filter(is_listable)
        .collect()
}

pub fn validate_device_path(path: &str) -> Result<(), String> {
    let trimmed = path.trim();
    if trimmed.is_empty() {
        return Err("device path is required".to_string());
    }
    if !trimmed.starts_with('/') {
        return Err("device path must be absolute (start with '/')".to_string());
    }
    if trimmed.contains('\0') {
        return Err("device path contains invalid characters".to_string());
    }
    if trimmed.split('/').any(|segment| segment == "..") {
        return Err("device path must not contain '..' segments".to_string());
    }
    Ok(())
}

pub fn device_parent_dir(device_path: &str) -> String {
    let trimmed = device_path.trim().trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(0) | None => "/".to_string(),
        Some(index) => trimmed[..index].to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTING: &str = "total 48\ndrwxrwx--x  4 root sdcard_rw 4096 2024-01-01 12:00 .\ndrwxr-xr-x 14 root root      4096 2023-12-31 09:15 ..\ndrwxrwx--x  2 u0_a12 sdcard_rw 4096 2024-01-01 12:00 Download\n-rw-rw----  1 u0_a12 sdcard_rw  123 2024-02-03 04:05 my notes.txt\nlrw-r--r--  1 root root 21 2024-01-01 12:00 sdcard -> /storage/self/primary\nls: /sdcard/secret: Permission denied\n";

    #[test]
    fn parses_directory_listing() {
        let entries = parse_directory_listing("/sdcard", LISTING);
        assert_eq!(entries.len(), 3);

        assert_eq!(entries[0].name, "Download");
        assert!(entries[0].is_dir());
        assert_eq!(entries[0].owner, "u0_a12");

        assert_eq!(entries[1].name, "my notes.txt");
        assert_eq!(entries[1].size_bytes(), Some(123));
        assert_eq!(entries[1].abs(), "/sdcard/my notes.txt");
        assert_eq!(
            entries[1].modified_at.format("%Y-%m-%d %H:%M").to_string(),
            "2024-02-03 04:05"
        );

        assert!(entries[2].is_symlink());
        assert_eq!(entries[2].symlink_target(), Some("/storage/self/primary"));
    }

    #[test]
    fn list_entry_needs_eight_fields_and_a_valid_date() {
        assert!(parse_list_entry("/", "drwx------ 2 root root 4096 2024-01-01").is_none());
        assert!(parse_list_entry("/", "drwx------ 2 root root 4096 Jan 1 12:00 x").is_none());
        assert!(parse_list_entry("/", "").is_none());
        assert!(parse_list_entry("/", "  -rw-r--r-- 1 a b 1 2024-01-01 00:00 f").is_some());
    }

    #[test]
    fn parses_stat_entries() {
        let output = "drwxrwx--x 4 root sdcard_rw 4096 1704110400 '/sdcard/Download'\n-rw-r--r-- 1 root root 12 notanumber '/x'\n";
        let entries = parse_stat_listing("/sdcard", output);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "/sdcard/Download");
        assert_eq!(
            entries[0].modified_at.format("%Y-%m-%d %H:%M").to_string(),
            "2024-01-01 12:00"
        );
        assert_eq!(entries[0].abs(), "/sdcard/Download");
    }

    #[test]
    fn validate_device_path_requires_absolute() {
        assert!(validate_device_path("").is_err());
        assert!(validate_device_path("sdcard/file.txt").is_err());
        assert!(validate_device_path("/sdcard/../etc/passwd").is_err());
        assert!(validate_device_path("/sdcard/file.txt").is_ok());
        assert!(validate_device_path("/").is_ok());
    }

    #[test]
    fn device_parent_dir_handles_common_cases() {
        assert_eq!(device_parent_dir("/sdcard/Download/file.txt"), "/sdcard/Download");
        assert_eq!(device_parent_dir("/sdcard/Download/"), "/sdcard");
        assert_eq!(device_parent_dir("/file.txt"), "/");
        assert_eq!(device_parent_dir("/"), "/");
        assert_eq!(device_parent_dir(""), "/");
    }
}
