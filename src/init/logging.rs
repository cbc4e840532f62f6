// SPDX-License-Identifier: Apache-2.0

use std::io::IsTerminal;
use tower::BoxError;
use tracing::metadata::LevelFilter;
use tracing_bunyan_formatter::{BunyanFormattingLayer, JsonStorageLayer};
use tracing_log::LogTracer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, Registry};

use super::args::LogFormatArg;

pub type LoggerGuard = tracing_appender::non_blocking::WorkerGuard;

/// Install the global subscriber writing to stdout. The returned guard must be
/// held until exit so buffered lines are flushed.
pub fn setup_logging(log_format: LogFormatArg, version: &str) -> Result<LoggerGuard, BoxError> {
    LogTracer::init()?;

    let (non_blocking_writer, guard) = tracing_appender::non_blocking(std::io::stdout());

    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env()?
        .add_directive("hyper_util=warn".parse()?)
        .add_directive("rustls=warn".parse()?);

    if log_format == LogFormatArg::Json {
        let app_name = format!("{}-{}", env!("CARGO_PKG_NAME"), version);
        let bunyan_formatting_layer = BunyanFormattingLayer::new(app_name, non_blocking_writer);

        let subscriber = Registry::default()
            .with(filter)
            .with(JsonStorageLayer)
            .with(bunyan_formatting_layer);
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        // Skip color codes when not in a terminal
        let use_ansi = std::io::stdout().is_terminal();

        let layer = tracing_subscriber::fmt::layer()
            .with_writer(non_blocking_writer)
            .with_target(false)
            .with_level(true)
            .with_ansi(use_ansi)
            .compact();

        let subscriber = Registry::default().with(filter).with(layer);
        tracing::subscriber::set_global_default(subscriber)?;
    }
    Ok(guard)
}
