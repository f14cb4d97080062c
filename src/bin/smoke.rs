use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use adb_bridge_lib::app::adb::logcat::LogcatOptions;
use adb_bridge_lib::app::client::{AdbClient, PackageListOptions};
use adb_bridge_lib::app::config::load_config;
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone)]
struct Args {
    serial: Option<String>,
    out_dir: Option<PathBuf>,
    json: bool,
    with_packages: bool,
    with_logcat: bool,
}

#[derive(Serialize)]
struct SmokeSummary {
    tool: &'static str,
    status: &'static str,
    trace_id: String,
    serial: Option<String>,
    adb_version: Option<String>,
    out_dir: String,
    artifacts: HashMap<String, String>,
    checks: Vec<SmokeCheck>,
}

#[derive(Serialize)]
struct SmokeCheck {
    name: &'static str,
    status: &'static str, // pass|fail|warn|skip
    duration_ms: u128,
    artifacts: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl SmokeCheck {
    fn skipped(name: &'static str) -> Self {
        Self {
            name,
            status: "skip",
            duration_ms: 0,
            artifacts: vec![],
            error_code: None,
            error: None,
        }
    }
}

type CheckError = (String, String);

fn parse_args() -> Result<Args, String> {
    let mut serial = std::env::var("ANDROID_SERIAL")
        .ok()
        .filter(|s| !s.trim().is_empty());
    let mut out_dir: Option<PathBuf> = None;
    let mut json = false;
    let mut with_packages = false;
    let mut with_logcat = false;

    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--serial" => {
                serial = it
                    .next()
                    .map(|v| v.trim().to_string())
                    .filter(|v| !v.is_empty());
                if serial.is_none() {
                    return Err("--serial requires a value".to_string());
                }
            }
            "--out" => {
                let value = it
                    .next()
                    .ok_or_else(|| "--out requires a value".to_string())?;
                out_dir = Some(PathBuf::from(value));
            }
            "--json" => json = true,
            "--with-packages" => with_packages = true,
            "--with-logcat" => with_logcat = true,
            "-h" | "--help" => {
                return Err(
                    "Usage: cargo run --bin smoke -- [--serial SERIAL] [--out DIR] [--json] [--with-packages] [--with-logcat]\n"
                        .to_string(),
                );
            }
            other => return Err(format!("Unknown arg: {other}")),
        }
    }

    Ok(Args {
        serial,
        out_dir,
        json,
        with_packages,
        with_logcat,
    })
}

fn ensure_dir(path: &Path) -> Result<(), String> {
    fs::create_dir_all(path)
        .map_err(|err| format!("Failed to create dir {}: {err}", path.display()))
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<String, CheckError> {
    let body = serde_json::to_string_pretty(value)
        .map_err(|err| ("ERR_IO".to_string(), format!("Failed to serialize: {err}")))?;
    fs::write(path, body).map_err(|err| {
        (
            "ERR_IO".to_string(),
            format!("Failed to write {}: {err}", path.display()),
        )
    })?;
    Ok(path.to_string_lossy().to_string())
}

fn run_check<F>(checks: &mut Vec<SmokeCheck>, name: &'static str, required: bool, f: F) -> bool
where
    F: FnOnce() -> Result<Vec<String>, CheckError>,
{
    let start = Instant::now();
    match f() {
        Ok(artifacts) => {
            checks.push(SmokeCheck {
                name,
                status: "pass",
                duration_ms: start.elapsed().as_millis(),
                artifacts,
                error_code: None,
                error: None,
            });
            true
        }
        Err((code, err)) => {
            checks.push(SmokeCheck {
                name,
                status: if required { "fail" } else { "warn" },
                duration_ms: start.elapsed().as_millis(),
                artifacts: vec![],
                error_code: Some(code),
                error: Some(err),
            });
            !required
        }
    }
}

fn finish(summary: SmokeSummary, json: bool) -> ! {
    let output = if json {
        serde_json::to_string_pretty(&summary).unwrap_or_else(|_| "{}".to_string())
    } else {
        let mut text = format!(
            "status: {}\ntrace_id: {}\nout: {}\n",
            summary.status, summary.trace_id, summary.out_dir
        );
        for check in &summary.checks {
            text.push_str(&format!(
                "  {:<18} {:<5} {}ms\n",
                check.name, check.status, check.duration_ms
            ));
        }
        text
    };
    println!("{output}");
    std::process::exit(if summary.status == "pass" { 0 } else { 1 });
}

fn main() {
    let args = match parse_args() {
        Ok(v) => v,
        Err(msg) => {
            eprintln!("{msg}");
            std::process::exit(2);
        }
    };

    let trace_id = Uuid::new_v4().to_string();
    let out_dir = args.out_dir.clone().unwrap_or_else(|| {
        let mut p = std::env::temp_dir();
        p.push(format!("adb_bridge_smoke_{trace_id}"));
        p
    });
    if let Err(err) = ensure_dir(&out_dir) {
        eprintln!("{err}");
        std::process::exit(1);
    }

    let mut artifacts: HashMap<String, String> = HashMap::new();
    let mut checks: Vec<SmokeCheck> = Vec::new();
    let summary = |status: &'static str,
                   serial: Option<String>,
                   adb_version: Option<String>,
                   artifacts: HashMap<String, String>,
                   checks: Vec<SmokeCheck>| SmokeSummary {
        tool: "adb_bridge_smoke",
        status,
        trace_id: trace_id.clone(),
        serial,
        adb_version,
        out_dir: out_dir.to_string_lossy().to_string(),
        artifacts,
        checks,
    };

    let config = match load_config() {
        Ok(cfg) => cfg,
        Err(err) => {
            checks.push(SmokeCheck {
                name: "load_config",
                status: "fail",
                duration_ms: 0,
                artifacts: vec![],
                error_code: Some(err.code.clone()),
                error: Some(err.to_string()),
            });
            finish(summary("fail", args.serial, None, artifacts, checks), args.json);
        }
    };
    // Host-level calls do not need a device selector.
    let host = match AdbClient::from_config(&config, "") {
        Ok(client) => client,
        Err(err) => {
            checks.push(SmokeCheck {
                name: "resolve_adb",
                status: "fail",
                duration_ms: 0,
                artifacts: vec![],
                error_code: Some(err.code.clone()),
                error: Some(err.to_string()),
            });
            finish(summary("fail", args.serial, None, artifacts, checks), args.json);
        }
    };
    let mut adb_version = None;
    if !run_check(&mut checks, "adb_version", true, || {
        let version = host
            .version()
            .map_err(|err| (err.code.clone(), err.to_string()))?;
        adb_version = Some(version);
        Ok(vec![])
    }) {
        finish(summary("fail", args.serial, None, artifacts, checks), args.json);
    }

    let mut devices = Vec::new();
    if !run_check(&mut checks, "list_devices", true, || {
        devices = host
            .list_devices()
            .map_err(|err| (err.code.clone(), err.to_string()))?;
        let path = write_json(&out_dir.join("devices.json"), &devices)?;
        Ok(vec![path])
    }) {
        finish(summary("fail", args.serial, adb_version, artifacts, checks), args.json);
    }

    let serial = match args.serial.clone() {
        Some(serial) => serial,
        None => {
            let online: Vec<String> = devices
                .iter()
                .filter(|d| d.is_online())
                .map(|d| d.serial.clone())
                .collect();
            let picked = match online.as_slice() {
                [only] => Ok(only.clone()),
                [] => Err("No online adb devices found.".to_string()),
                many => Err(format!(
                    "Multiple online devices found ({}). Set ANDROID_SERIAL or pass --serial.",
                    many.join(", ")
                )),
            };
            match picked {
                Ok(serial) => serial,
                Err(err) => {
                    checks.push(SmokeCheck {
                        name: "pick_device",
                        status: "fail",
                        duration_ms: 0,
                        artifacts: vec![],
                        error_code: Some("ERR_PICK_DEVICE".to_string()),
                        error: Some(err),
                    });
                    finish(summary("fail", None, adb_version, artifacts, checks), args.json);
                }
            }
        }
    };

    let client = match AdbClient::from_config(&config, serial.as_str()) {
        Ok(client) => client,
        Err(err) => {
            checks.push(SmokeCheck {
                name: "resolve_adb",
                status: "fail",
                duration_ms: 0,
                artifacts: vec![],
                error_code: Some(err.code.clone()),
                error: Some(err.to_string()),
            });
            finish(
                summary("fail", Some(serial), adb_version, artifacts, checks),
                args.json,
            );
        }
    };
    let mut status = "pass";

    if !run_check(&mut checks, "get_state", true, || {
        let output = client
            .get_state()
            .map_err(|err| (err.code.clone(), err.to_string()))?;
        if output.is_ok() {
            Ok(vec![])
        } else {
            Err(("ERR_EXIT".to_string(), output.error()))
        }
    }) {
        status = "fail";
    }

    if !run_check(&mut checks, "getprops", true, || {
        let props = client
            .getprops()
            .map_err(|err| (err.code.clone(), err.to_string()))?;
        if props.is_empty() {
            return Err(("ERR_EMPTY".to_string(), "getprop returned nothing".to_string()));
        }
        let path = write_json(&out_dir.join("props.json"), &props)?;
        artifacts.insert("props".to_string(), path.clone());
        Ok(vec![path])
    }) {
        status = "fail";
    }

    run_check(&mut checks, "dumpsys_services", false, || {
        let services = client
            .dumpsys_services()
            .map_err(|err| (err.code.clone(), err.to_string()))?;
        let path = write_json(&out_dir.join("dumpsys_services.json"), &services)?;
        artifacts.insert("dumpsys_services".to_string(), path.clone());
        Ok(vec![path])
    });

    run_check(&mut checks, "list_dir", false, || {
        let entries = client
            .list_dir("/sdcard")
            .map_err(|err| (err.code.clone(), err.to_string()))?;
        let lines: Vec<String> = entries.iter().map(ToString::to_string).collect();
        let path = write_json(&out_dir.join("sdcard.json"), &lines)?;
        Ok(vec![path])
    });

    if args.with_packages {
        if !run_check(&mut checks, "list_packages", true, || {
            let packages = client
                .list_packages(&PackageListOptions::default(), None)
                .map_err(|err| (err.code.clone(), err.to_string()))?;
            let path = write_json(&out_dir.join("packages.json"), &packages)?;
            artifacts.insert("packages".to_string(), path.clone());
            Ok(vec![path])
        }) {
            status = "fail";
        }
    } else {
        checks.push(SmokeCheck::skipped("list_packages"));
    }

    if args.with_logcat {
        if !run_check(&mut checks, "logcat_dump", true, || {
            let path = out_dir.join("logcat.txt");
            let file = fs::File::create(&path)
                .map_err(|err| ("ERR_IO".to_string(), format!("Failed to create logcat file: {err}")))?;
            let options = LogcatOptions {
                dump: true,
                timeout: Duration::from_secs(20),
                ..LogcatOptions::default()
            };
            client
                .logcat(&options, Some(Box::new(file)), None)
                .map_err(|err| (err.code.clone(), err.to_string()))?
                .into_checked(&trace_id)
                .map_err(|err| (err.code.clone(), err.to_string()))?;
            let path = path.to_string_lossy().to_string();
            artifacts.insert("logcat".to_string(), path.clone());
            Ok(vec![path])
        }) {
            status = "fail";
        }
    } else {
        checks.push(SmokeCheck::skipped("logcat_dump"));
    }

    finish(
        summary(status, Some(serial), adb_version, artifacts, checks),
        args.json,
    );
}
