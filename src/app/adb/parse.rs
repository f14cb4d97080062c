use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;

use crate::app::models::{ClientAddr, DeviceSummary, DiscoveryRecord, InputDevice, PropertyPair};

const PROPERTY_PATTERN: &str = r"^\[(.*)\]\s*:\s*\[(.*)\]\s*$";
const INPUT_DEVICE_PATTERN: &str = r#"add device [0-9]+:\s(?P<event>[^\n]+?)\s*name:\s*"(?P<name>[^"]+)""#;
const VERSION_PATTERN: &str = r".*\s([\w]+\.[\w]+\.[\w]+)";

fn property_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(PROPERTY_PATTERN).ok()).as_ref()
}

fn input_device_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(INPUT_DEVICE_PATTERN).ok()).as_ref()
}

fn version_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(VERSION_PATTERN).ok()).as_ref()
}

/// `[key]: [value]` lines from `getprop`, in input order. Anything else is dropped.
pub fn parse_properties(output: &str) -> Vec<PropertyPair> {
    let Some(re) = property_regex() else {
        return Vec::new();
    };
    output
        .lines()
        .filter_map(|line| {
            let caps = re.captures(line.trim_end_matches('\r'))?;
            Some(PropertyPair {
                key: caps[1].to_string(),
                value: caps[2].to_string(),
            })
        })
        .collect()
}

pub fn parse_getprop_map(output: &str) -> HashMap<String, String> {
    parse_properties(output)
        .into_iter()
        .map(|pair| (pair.key, pair.value))
        .collect()
}

/// `adb devices -l`
pub fn parse_adb_devices(output: &str) -> Vec<DeviceSummary> {
    output
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter(|line| !line.trim_start().starts_with('*'))
        .filter(|line| !line.to_lowercase().contains("list of devices"))
        .filter_map(|line| {
            let tokens: Vec<&str> = line.split_whitespace().collect();
            if tokens.len() < 2 {
                return None;
            }
            let mut summary = DeviceSummary {
                serial: tokens[0].to_string(),
                state: tokens[1].to_string(),
                usb: None,
                model: None,
                product: None,
                device: None,
                transport_id: None,
            };
            for token in tokens.iter().skip(2) {
                let Some((key, value)) = token.split_once(':') else {
                    continue;
                };
                let value = Some(value.to_string());
                match key {
                    "usb" => summary.usb = value,
                    "model" => summary.model = value,
                    "product" => summary.product = value,
                    "device" => summary.device = value,
                    "transport_id" => summary.transport_id = value,
                    _ => {}
                }
            }
            Some(summary)
        })
        .collect()
}

/// `getevent -p`: one record per `add device N: <path>` block that carries a `name:`.
pub fn parse_input_devices(output: &str) -> Vec<InputDevice> {
    let Some(re) = input_device_regex() else {
        return Vec::new();
    };
    re.captures_iter(output)
        .map(|caps| InputDevice {
            event: caps["event"].trim().to_string(),
            name: caps["name"].to_string(),
        })
        .collect()
}

/// `adb --version`, e.g. `Android Debug Bridge version 1.0.41` -> `1.0.41`.
pub fn parse_adb_version(output: &str) -> Option<String> {
    let re = version_regex()?;
    output
        .lines()
        .find_map(|line| re.captures(line).map(|caps| caps[1].to_string()))
}

/// `adb mdns services`: `name<TAB>type<TAB>host:port` per line.
pub fn parse_mdns_services(output: &str) -> Vec<DiscoveryRecord> {
    output
        .lines()
        .filter_map(|line| {
            let fields: Vec<&str> = line
                .split(['\t', ' '])
                .filter(|field| !field.is_empty())
                .collect();
            let [name, service_type, address] = fields.as_slice() else {
                return None;
            };
            if !address.contains(':') {
                return None;
            }
            let address = address.parse::<ClientAddr>().ok()?;
            Some(DiscoveryRecord {
                name: name.to_string(),
                service_type: service_type.trim_end_matches('.').to_string(),
                address,
            })
        })
        .collect()
}

/// `dumpsys -l`: service names, one per indented line after the header.
pub fn parse_dumpsys_services(output: &str) -> Vec<String> {
    output
        .lines()
        .filter(|line| line.starts_with([' ', '\t']))
        .map(|line| line.trim().to_string())
        .filter(|line| !line.is_empty())
        .collect()
}
