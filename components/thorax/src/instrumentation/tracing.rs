// Local crates
use crate::helpers::load_config::LoggingConfig;

// External crates
use anyhow::{Context, Result};
use std::any::Any;
use std::panic;
use tracing::error;
use tracing_appender::{non_blocking::WorkerGuard, rolling};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    filter::{Directive, EnvFilter},
    fmt,
    prelude::*,
    registry::Registry,
};

/// Install the global subscriber.
///
/// `RUST_LOG` wins over the configured level. The returned guard flushes the
/// log file writer when dropped, so keep it alive until the process exits.
pub fn init_tracing(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let mut filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .with_context(|| format!("Invalid log level {:?}", config.level))?;

    // HTTP client internals stay quiet unless asked for
    for quiet in ["hyper_util=warn", "reqwest=warn", "rustls=warn"] {
        if let Ok(directive) = quiet.parse::<Directive>() {
            filter = filter.add_directive(directive);
        }
    }

    let stderr_layer = if config.json {
        fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_file(true)
            .with_line_number(true)
            .with_target(false)
            .with_timer(fmt::time::UtcTime::rfc_3339())
            .boxed()
    } else {
        fmt::layer()
            .with_ansi(true)
            .with_writer(std::io::stderr)
            .with_target(false)
            .with_timer(fmt::time::UtcTime::rfc_3339())
            .boxed()
    };

    let (file_layer, guard) = match &config.directory {
        Some(directory) => {
            let file_appender = rolling::daily(directory, "thorax.log");
            let (non_blocking_writer, guard) = tracing_appender::non_blocking(file_appender);
            let layer = fmt::layer()
                .json()
                .with_ansi(false)
                .with_writer(non_blocking_writer)
                .with_file(true)
                .with_line_number(true)
                .with_thread_ids(true)
                .with_target(false)
                .with_timer(fmt::time::UtcTime::rfc_3339());
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let error_layer = ErrorLayer::default();

    let subscriber = Registry::default()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .with(error_layer);

    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set global tracing subscriber")?;
    Ok(guard)
}

/// Text of a panic payload, for `panic!` with a literal or a formatted message.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    match payload.downcast_ref::<&str>() {
        Some(s) => (*s).to_string(),
        None => match payload.downcast_ref::<String>() {
            Some(s) => s.clone(),
            None => "Unknown panic".to_string(),
        },
    }
}

/// Log panics through tracing. Publishing a panic report is left to the
/// runtime, which observes the panic when it joins the run task.
pub fn init_panic_handler() {
    panic::set_hook(Box::new(|panic_info| {
        let msg = panic_message(panic_info.payload());

        let location = panic_info
            .location()
            .map(|l| format!("{}:{}", l.file(), l.line()))
            .unwrap_or_else(|| "unknown location".to_string());

        error!(
            message = %msg,
            location = %location,
            "Application panicked!"
        );
        eprintln!("thorax panicked at {location}: {msg}");
    }));
}
