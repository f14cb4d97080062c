use std::fmt;
use std::time::Duration;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

const SINCE_FORMAT: &str = "%m-%d %H:%M:%S%.3f";
const SILENCE_OTHERS: &str = "*:S";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum LogcatLevel {
    Verbose,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogcatLevel {
    pub fn code(&self) -> &'static str {
        match self {
            LogcatLevel::Verbose => "V",
            LogcatLevel::Debug => "D",
            LogcatLevel::Info => "I",
            LogcatLevel::Warn => "W",
            LogcatLevel::Error => "E",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogcatTag {
    pub name: String,
    pub level: LogcatLevel,
}

impl LogcatTag {
    pub fn new(name: impl Into<String>, level: LogcatLevel) -> Self {
        Self {
            name: name.into(),
            level,
        }
    }
}

impl fmt::Display for LogcatTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.level.code())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogcatOptions {
    /// `-e`: only lines whose message matches this regular expression.
    pub expr: Option<String>,
    /// `-d`: dump and exit instead of following.
    pub dump: bool,
    /// `-f`: device-side output file. Cannot be combined with a host sink.
    pub filename: Option<String>,
    /// `-v`
    pub format: Option<String>,
    pub pids: Vec<String>,
    /// When set, everything else is silenced with `*:S`.
    pub tags: Vec<LogcatTag>,
    /// `-T`
    pub since: Option<NaiveDateTime>,
    #[serde(default)]
    pub timeout: Duration,
}

impl LogcatOptions {
    pub fn to_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(expr) = self.expr.as_deref().filter(|value| !value.is_empty()) {
            args.push("-e".to_string());
            args.push(expr.to_string());
        }
        if self.dump {
            args.push("-d".to_string());
        }
        if let Some(filename) = self.filename.as_deref().filter(|value| !value.is_empty()) {
            args.push("-f".to_string());
            args.push(filename.to_string());
        }
        if let Some(format) = self.format.as_deref().filter(|value| !value.is_empty()) {
            args.push("-v".to_string());
            args.push(format.to_string());
        }
        if !self.pids.is_empty() {
            args.push("--pid".to_string());
            args.extend(self.pids.iter().cloned());
        }
        if !self.tags.is_empty() {
            args.extend(self.tags.iter().map(LogcatTag::to_string));
            args.push(SILENCE_OTHERS.to_string());
        }
        if let Some(since) = self.since {
            args.push("-T".to_string());
            args.push(since.format(SINCE_FORMAT).to_string());
        }
        args
    }

    pub fn has_filename(&self) -> bool {
        self.filename.as_deref().is_some_and(|value| !value.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn empty_options_produce_no_args() {
        assert!(LogcatOptions::default().to_args().is_empty());
    }

    #[test]
    fn builds_args_in_fixed_order() {
        let since = NaiveDate::from_ymd_opt(2024, 3, 9)
            .and_then(|date| date.and_hms_milli_opt(7, 5, 3, 42))
            .expect("valid time");
        let options = LogcatOptions {
            expr: Some("Exception".to_string()),
            dump: true,
            filename: None,
            format: Some("threadtime".to_string()),
            pids: vec!["1234".to_string(), "5678".to_string()],
            tags: vec![
                LogcatTag::new("ActivityManager", LogcatLevel::Info),
                LogcatTag::new("MyApp", LogcatLevel::Verbose),
            ],
            since: Some(since),
            timeout: Duration::ZERO,
        };
        assert_eq!(
            options.to_args(),
            vec![
                "-e",
                "Exception",
                "-d",
                "-v",
                "threadtime",
                "--pid",
                "1234",
                "5678",
                "ActivityManager:I",
                "MyApp:V",
                "*:S",
                "-T",
                "03-09 07:05:03.042"
            ]
        );
    }

    #[test]
    fn filename_is_passed_through() {
        let options = LogcatOptions {
            filename: Some("/sdcard/log.txt".to_string()),
            ..LogcatOptions::default()
        };
        assert!(options.has_filename());
        assert_eq!(options.to_args(), vec!["-f", "/sdcard/log.txt"]);
    }
}
