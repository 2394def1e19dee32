#![cfg_attr(test, allow(clippy::unwrap_used))]

#[macro_use]
mod unwrap_or;
mod err_with_sources;

use std::str::FromStr;

use anyhow::{Context, Result};
use tracing::{Subscriber, subscriber::DefaultGuard};
use tracing_log::LogTracer;
use tracing_subscriber::{
    EnvFilter, Layer, Registry, filter::ParseError, fmt, layer::SubscriberExt as _,
    util::SubscriberInitExt,
};

pub use err_with_sources::{ErrorWithSources, err_with_src};

/// How events are rendered on stdout.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    #[default]
    Text,
    Json,
}

impl FromStr for Format {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown log format `{other}`, expected `text` or `json`")),
        }
    }
}

/// Registers a global subscriber that logs to stdout.
pub fn setup_global_subscriber(directives: &str, format: Format) -> Result<()> {
    let filter = parse_filter(directives).context("Failed to parse directives")?;

    let subscriber = Registry::default().with(match format {
        Format::Json => fmt::layer()
            .json()
            .flatten_event(true)
            .with_filter(filter)
            .boxed(),
        Format::Text => fmt::layer()
            .with_ansi(stdout_supports_ansi())
            .with_filter(filter)
            .boxed(),
    });
    init(subscriber)?;

    Ok(())
}

pub fn init(subscriber: impl Subscriber + Send + Sync + 'static) -> Result<()> {
    tracing::subscriber::set_global_default(subscriber).context("Could not set global default")?;
    LogTracer::init().context("Failed to init LogTracer")?;

    Ok(())
}

/// Parses `directives` into an [`EnvFilter`], defaulting to `info` when empty.
pub fn parse_filter(directives: &str) -> Result<EnvFilter, ParseError> {
    if directives.trim().is_empty() {
        return EnvFilter::try_new("info");
    }

    EnvFilter::try_new(directives)
}

pub fn stdout_supports_ansi() -> bool {
    supports_color::on(supports_color::Stream::Stdout).is_some()
}

/// Initialises a logger to be used in tests.
pub fn test(directives: &str) -> DefaultGuard {
    tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(directives)
        .set_default()
}

/// Same as [`test`] but for tests that log from several threads.
pub fn test_global(directives: &str) {
    init(
        tracing_subscriber::fmt()
            .with_test_writer()
            .with_env_filter(directives)
            .finish(),
    )
    .ok();
}
