//! Logging and tracing initialization.
//!
//! Every crate logs through `tracing` macros; only binaries and tests
//! install a subscriber.

use std::fs::OpenOptions;
use std::sync::Mutex;

use tracing_subscriber::{fmt, EnvFilter};

use crate::config::LoggingConfig;

/// Initialize the tracing subscriber with the given configuration.
///
/// `RUST_LOG` overrides `config.level`. When `config.file` is set, output is
/// appended to that file instead of stderr. Returns `false` if a global
/// subscriber was already installed.
pub fn init_logging(config: &LoggingConfig) -> bool {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let file = config.file.as_ref().and_then(|path| {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        match OpenOptions::new().create(true).append(true).open(path) {
            Ok(file) => Some(Mutex::new(file)),
            Err(e) => {
                eprintln!("reelfx: cannot open log file {}: {e}", path.display());
                None
            }
        }
    });

    let builder = fmt::Subscriber::builder()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_thread_ids(false);

    let installed = match (config.json, file) {
        (true, Some(file)) => {
            tracing::subscriber::set_global_default(builder.json().with_writer(file).finish())
        }
        (true, None) => tracing::subscriber::set_global_default(builder.json().finish()),
        (false, Some(file)) => tracing::subscriber::set_global_default(
            builder.with_ansi(false).with_writer(file).finish(),
        ),
        (false, None) => tracing::subscriber::set_global_default(builder.finish()),
    };

    installed.is_ok()
}

/// Route logs through the libtest capture so they show up only for failing tests.
pub fn init_test_logging() {
    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(EnvFilter::new("reelfx=debug"))
        .with_test_writer()
        .finish();
    tracing::subscriber::set_global_default(subscriber).ok();
}
