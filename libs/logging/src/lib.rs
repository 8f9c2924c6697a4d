#![cfg_attr(test, allow(clippy::unwrap_used))]

#[macro_use]
mod unwrap_or;
mod err_with_sources;

use anyhow::{Context, Result};
use tracing::{Subscriber, subscriber::DefaultGuard};
use tracing_log::LogTracer;
use tracing_subscriber::{
    EnvFilter, Layer, Registry, filter::ParseError, fmt, layer::SubscriberExt as _,
    util::SubscriberInitExt,
};

pub use err_with_sources::{ErrorWithSources, err_with_src};

/// Registers a global subscriber that logs to stdout.
///
/// `directives` follow the [`EnvFilter`] syntax, e.g. `tuntap=debug`.
pub fn setup_global_subscriber(directives: &str, stdout_json: bool) -> Result<()> {
    let filter = parse_filter(directives).context("Failed to parse directives")?;

    let subscriber = Registry::default().with(match stdout_json {
        true => fmt::layer()
            .json()
            .flatten_event(true)
            .with_filter(filter)
            .boxed(),
        false => fmt::layer().with_filter(filter).boxed(),
    });
    init(subscriber)?;

    Ok(())
}

pub fn init(subscriber: impl Subscriber + Send + Sync + 'static) -> Result<()> {
    tracing::subscriber::set_global_default(subscriber).context("Could not set global default")?;
    LogTracer::init().context("Failed to init LogTracer")?;

    Ok(())
}

/// Parses `directives` into an [`EnvFilter`].
pub fn parse_filter(directives: &str) -> Result<EnvFilter, ParseError> {
    EnvFilter::try_new(directives)
}

/// Initialises a logger to be used in tests.
pub fn test(directives: &str) -> DefaultGuard {
    tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(directives)
        .set_default()
}
