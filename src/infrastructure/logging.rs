//! Logging system configuration and initialization
//!
//! Console logging with `EnvFilter` level control and optional file output
//! with daily rotation. The non-blocking file writer's guard must outlive
//! the process, so it is parked in a global.

use anyhow::{anyhow, Result};
use lazy_static::lazy_static;
use std::sync::Mutex;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{
    fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry,
};

use crate::infrastructure::config::LoggingSettings;

lazy_static! {
    static ref LOG_GUARDS: Mutex<Vec<non_blocking::WorkerGuard>> = Mutex::new(Vec::new());
}

/// Initializes the global tracing subscriber. `RUST_LOG` wins over the
/// configured level when set. Errors if a subscriber is already installed.
pub fn init_logging(settings: &LoggingSettings) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(settings.level.clone()));

    let console_layer = settings
        .console_output
        .then(|| fmt::layer().with_target(true));

    let file_layer = if settings.file_output {
        let appender = rolling::daily(&settings.directory, "rewind-crawler.log");
        let (writer, guard) = non_blocking(appender);
        LOG_GUARDS
            .lock()
            .map_err(|_| anyhow!("log guard lock poisoned"))?
            .push(guard);
        Some(fmt::layer().with_writer(writer).with_ansi(false))
    } else {
        None
    };

    Registry::default()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow!("failed to initialize logging: {e}"))
}
