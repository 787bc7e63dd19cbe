//! Tracing initialization for the CLI and daemon.

use std::path::Path;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

/// Holds the non-blocking appender guards; drop flushes pending writes.
pub struct TelemetryGuard {
    _guards: Vec<tracing_appender::non_blocking::WorkerGuard>,
}

/// Initialize tracing for a short-lived CLI invocation (stderr only).
pub fn init_cli(verbosity: u8) -> TelemetryGuard {
    init(verbosity, None)
}

/// Initialize tracing for the daemon: stderr plus a daily-rolling file under
/// `<town>/daemon/logs/`.
pub fn init_daemon(verbosity: u8, log_dir: &Path) -> TelemetryGuard {
    init(verbosity, Some(log_dir))
}

fn init(verbosity: u8, log_dir: Option<&Path>) -> TelemetryGuard {
    let filter = EnvFilter::builder()
        .with_default_directive(level_from_verbosity(verbosity).into())
        .with_env_var("LOG")
        .from_env_lossy();

    let mut guards = Vec::new();
    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();

    layers.push(Box::new(
        tracing_subscriber::fmt::layer()
            .compact()
            .with_writer(std::io::stderr)
            .with_target(true),
    ));

    if let Some(dir) = log_dir {
        match std::fs::create_dir_all(dir) {
            Ok(()) => {
                let appender = tracing_appender::rolling::daily(dir, "gastown.log");
                let (writer, guard) = tracing_appender::non_blocking(appender);
                guards.push(guard);
                layers.push(Box::new(
                    tracing_subscriber::fmt::layer()
                        .compact()
                        .with_ansi(false)
                        .with_writer(writer)
                        .with_target(true),
                ));
            }
            Err(err) => {
                eprintln!("log dir init failed for {}: {err}", dir.display());
            }
        }
    }

    layers.push(Box::new(filter));

    // init() panics if a global subscriber is already set; tests set their own.
    let _ = Registry::default().with(layers).try_init();

    TelemetryGuard { _guards: guards }
}

fn level_from_verbosity(verbosity: u8) -> tracing::metadata::LevelFilter {
    match verbosity {
        0 => tracing::metadata::LevelFilter::ERROR,
        1 => tracing::metadata::LevelFilter::INFO,
        _ => tracing::metadata::LevelFilter::DEBUG,
    }
}
