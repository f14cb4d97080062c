use tracing::Dispatch;
use tracing_subscriber::EnvFilter;

use crate::app::config::LoggingSettings;

fn env_filter(settings: &LoggingSettings) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(settings.log_level.to_lowercase()))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Dispatcher handed to [`Invoker::with_dispatch`](crate::app::adb::runner::Invoker::with_dispatch),
/// writing to stderr. JSON lines when `settings.json` is set, human-readable otherwise.
pub fn build_dispatch(settings: &LoggingSettings) -> Dispatch {
    let env_filter = env_filter(settings);

    if settings.json {
        Dispatch::new(
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .json()
                .with_target(false)
                .with_writer(std::io::stderr)
                .finish(),
        )
    } else {
        Dispatch::new(
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .finish(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn built_dispatch_honours_level() {
        let settings = LoggingSettings {
            log_level: "warn".to_string(),
            json: false,
        };
        let dispatch = build_dispatch(&settings);
        tracing::dispatcher::with_default(&dispatch, || {
            assert!(tracing::enabled!(tracing::Level::WARN) || std::env::var("RUST_LOG").is_ok());
        });
    }

    #[test]
    fn bad_level_falls_back_without_panicking() {
        let settings = LoggingSettings {
            log_level: "not a level[".to_string(),
            json: true,
        };
        let dispatch = build_dispatch(&settings);
        tracing::dispatcher::with_default(&dispatch, || {
            tracing::info!(trace_id = "t-1", "json dispatcher accepts events");
        });
    }
}
