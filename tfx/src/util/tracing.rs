//! Tracing helpers
// (c) 2025 Ross Younger

use std::{
    fs::File,
    sync::Arc,
    sync::atomic::{AtomicBool, Ordering},
};

use anyhow::Context;
use serde::{Deserialize, Serialize, de};
use strum::VariantNames as _;
use tracing_subscriber::{
    EnvFilter,
    fmt::{
        MakeWriter,
        time::{ChronoLocal, ChronoUtc},
    },
    prelude::*,
};

static TRACING_INITIALIZED: AtomicBool = AtomicBool::new(false);

const FRIENDLY_FORMAT_LOCAL: &str = "%Y-%m-%d %H:%M:%SL";
const FRIENDLY_FORMAT_UTC: &str = "%Y-%m-%d %H:%M:%SZ";

/// Environment variable that controls what gets logged
const STANDARD_ENV_VAR: &str = "RUST_LOG";

/// Computes the trace level from the usual pair of CLI flags
#[must_use]
pub fn trace_level(debug: bool, quiet: bool) -> &'static str {
    if debug {
        "debug"
    } else if quiet {
        "error"
    } else {
        "info"
    }
}

/// Selects the format of time stamps in output messages
#[derive(
    Copy,
    Clone,
    Debug,
    Default,
    Eq,
    PartialEq,
    strum::Display,
    strum::EnumString,
    strum::VariantNames,
    clap::ValueEnum,
    Serialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "kebab-case")]
pub enum TimeFormat {
    /// Local time, as "year-month-day HH:MM:SS"
    #[default]
    Local,
    /// UTC time, as "year-month-day HH:MM:SS"
    Utc,
    /// Local time, in the format described in [RFC 3339](https://datatracker.ietf.org/doc/html/rfc3339)
    Rfc3339,
}

impl<'de> Deserialize<'de> for TimeFormat {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let lower = s.to_ascii_lowercase();
        std::str::FromStr::from_str(&lower)
            .map_err(|_| de::Error::unknown_variant(&s, TimeFormat::VARIANTS))
    }
}

/// Result type for `filter_for()`
struct FilterResult {
    filter: EnvFilter,
    used_env: bool,
}

/// Log filter setup:
/// Use the environment variable if set; otherwise log only our own items at the given level.
fn filter_for(trace_level: &str, key: &str) -> anyhow::Result<FilterResult> {
    EnvFilter::try_from_env(key)
        .map(|filter| FilterResult {
            filter,
            used_env: true,
        })
        .or_else(|e| {
            if std::env::var(key).is_ok() {
                anyhow::bail!("{key} (set in environment) was not understood: {e}");
            }
            Ok(FilterResult {
                filter: EnvFilter::try_new(format!("tfx={trace_level}"))?,
                used_env: false,
            })
        })
}

fn make_tracing_layer<S, W, F>(
    writer: W,
    filter: F,
    time_format: TimeFormat,
    show_target: bool,
    ansi: bool,
) -> Box<dyn tracing_subscriber::Layer<S> + Send + Sync>
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
    W: for<'writer> MakeWriter<'writer> + 'static + Sync + Send,
    F: tracing_subscriber::layer::Filter<S> + 'static + Sync + Send,
{
    let layer = tracing_subscriber::fmt::layer::<S>()
        .compact()
        .with_target(show_target)
        .with_ansi(ansi);

    // The timer must be added before the writer and filter, hence the repetition.
    match time_format {
        TimeFormat::Local => layer
            .with_timer(ChronoLocal::new(FRIENDLY_FORMAT_LOCAL.into()))
            .with_writer(writer)
            .with_filter(filter)
            .boxed(),
        TimeFormat::Utc => layer
            .with_timer(ChronoUtc::new(FRIENDLY_FORMAT_UTC.into()))
            .with_writer(writer)
            .with_filter(filter)
            .boxed(),
        TimeFormat::Rfc3339 => layer
            .with_timer(ChronoLocal::rfc_3339())
            .with_writer(writer)
            .with_filter(filter)
            .boxed(),
    }
}

/// Where console trace output goes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleTraceType {
    /// Standard error
    Standard,
    /// Nowhere
    None,
}

/// Set up rust tracing, to stderr and optionally to file.
///
/// By default we log only our own events, at a given trace level.
/// This can be overridden by setting `RUST_LOG`.
///
/// The log file is opened for appending, so that a server and its
/// per-connection children can share one.
///
/// **CAUTION:** If this function fails, tracing won't be set up; callers must take extra care to report the error.
///
/// **NOTE:** You can only run this once per process. A global bool prevents re-running.
pub fn setup(
    trace_level: &str,
    display: ConsoleTraceType,
    log_file: Option<&String>,
    time_format: TimeFormat,
) -> anyhow::Result<()> {
    if is_initialized() {
        tracing::warn!("tracing::setup called a second time (ignoring)");
        return Ok(());
    }
    TRACING_INITIALIZED.store(true, Ordering::Relaxed);

    let layers = setup_inner(trace_level, display, log_file, time_format)?;
    tracing_subscriber::registry().with(layers).init();
    Ok(())
}

fn setup_inner(
    trace_level: &str,
    display: ConsoleTraceType,
    log_file: Option<&String>,
    time_format: TimeFormat,
) -> anyhow::Result<
    Vec<Box<dyn tracing_subscriber::Layer<tracing_subscriber::Registry> + Send + Sync>>,
> {
    let mut layers = Vec::new();

    let filter = filter_for(trace_level, STANDARD_ENV_VAR)?;
    if display == ConsoleTraceType::Standard {
        use std::io::IsTerminal as _;
        layers.push(make_tracing_layer(
            std::io::stderr,
            filter.filter,
            time_format,
            filter.used_env,
            std::io::stderr().is_terminal(),
        ));
    }

    if let Some(filename) = log_file {
        let out_file = Arc::new(
            File::options()
                .create(true)
                .append(true)
                .open(filename)
                .context("Failed to open log file")?,
        );
        let filter = filter_for(trace_level, STANDARD_ENV_VAR)?;
        layers.push(make_tracing_layer(
            out_file,
            filter.filter,
            time_format,
            filter.used_env,
            false,
        ));
    }

    Ok(layers)
}

/// Returns whether tracing has been initialized
pub fn is_initialized() -> bool {
    TRACING_INITIALIZED.load(Ordering::Relaxed)
}
