//! Log output driven by the `logging` section of [`ServerConfig`].
//!
//! `logging.json: true` emits one JSON object per event, suitable for log
//! shippers; otherwise a human-readable format is used. `RUST_LOG`, when set,
//! takes precedence over `logging.level`.

use tracing::Subscriber;
use tracing_subscriber::fmt::{self, MakeWriter};
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use crate::config::{LoggingSettings, ServerConfig};

/// Installs the global subscriber described by `config.logging`, writing to
/// stdout.
///
/// Returns `false` if a global subscriber was already installed, in which
/// case the existing one stays in place.
pub fn init_logging(config: &ServerConfig) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| level_filter(&config.logging));
    tracing::subscriber::set_global_default(build_subscriber(
        &config.logging,
        filter,
        std::io::stdout,
    ))
    .is_ok()
}

/// Builds a subscriber for `settings` that writes to `writer`, ignoring
/// `RUST_LOG`.
pub fn subscriber_for<W>(settings: &LoggingSettings, writer: W) -> impl Subscriber + Send + Sync
where
    W: for<'w> MakeWriter<'w> + Clone + Send + Sync + 'static,
{
    build_subscriber(settings, level_filter(settings), writer)
}

fn level_filter(settings: &LoggingSettings) -> EnvFilter {
    // Levels are checked by ServerConfig::validate.
    EnvFilter::new(settings.level.to_lowercase())
}

fn build_subscriber<W>(
    settings: &LoggingSettings,
    filter: EnvFilter,
    writer: W,
) -> impl Subscriber + Send + Sync
where
    W: for<'w> MakeWriter<'w> + Clone + Send + Sync + 'static,
{
    let json = settings.json.then(|| {
        fmt::layer()
            .json()
            .with_current_span(true)
            .with_target(true)
            .with_writer(writer.clone())
    });
    let text = (!settings.json).then(|| fmt::layer().with_target(true).with_writer(writer));

    tracing_subscriber::registry()
        .with(filter)
        .with(json)
        .with(text)
}
