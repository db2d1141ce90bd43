//! Tracing subscriber setup
//!
//! File output always goes through a non-blocking rolling appender. Text
//! mode mirrors it to stdout; JSON mode writes the file only, for shipping.

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{self, RollingFileAppender};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::config::AppConfig;

/// Chatty dependencies capped below the service's own level
const QUIET_TARGETS: &[(&str, &str)] = &[
    ("sqlx", "warn"),
    ("hyper", "warn"),
    ("reqwest", "warn"),
];

fn appender(config: &AppConfig) -> RollingFileAppender {
    let (dir, file) = (&config.log_dir, &config.log_file);
    match config.rotation.as_str() {
        "hourly" => rolling::hourly(dir, file),
        "daily" => rolling::daily(dir, file),
        _ => rolling::never(dir, file),
    }
}

/// `RUST_LOG`-style directives for the configured level
pub fn filter_directives(level: &str) -> String {
    let mut directives = level.to_string();
    for (target, cap) in QUIET_TARGETS {
        directives.push_str(&format!(",{}={}", target, cap));
    }
    directives
}

/// Install the global subscriber. `RUST_LOG` overrides the configured
/// level; the returned guard must outlive the process's last log line.
pub fn init_logging(config: &AppConfig) -> WorkerGuard {
    let (writer, guard) = tracing_appender::non_blocking(appender(config));

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_directives(&config.log_level)));
    let registry = tracing_subscriber::registry().with(filter);

    if config.use_json {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(false)
                    .with_writer(writer)
                    .with_ansi(false),
            )
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(false).with_writer(writer).with_ansi(false))
            .with(fmt::layer().with_target(false))
            .init();
    }

    guard
}
