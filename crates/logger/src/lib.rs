use std::env::var;
use std::str::FromStr;

use tracing::level_filters::LevelFilter;
use tracing_subscriber::{
    Layer, filter::EnvFilter, layer::SubscriberExt, util::SubscriberInitExt,
    util::TryInitError,
};

/// Output format of the log layer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

impl FromStr for LogFormat {
    type Err = ();

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "compact" | "" => Ok(Self::Compact),
            _ => Err(()),
        }
    }
}

/// Install the global subscriber, silently keeping an already installed one.
pub fn init(format: Option<LogFormat>, default_level: LevelFilter) {
    let _ = try_init(format, default_level);
}

/// Install the global subscriber.
///
/// `RUST_LOG` drives the filter, `default_level` applies when it is unset.
/// `RUST_LOG_FORMAT` takes precedence over `format` when it names a known
/// format.
pub fn try_init(format: Option<LogFormat>, default_level: LevelFilter) -> Result<(), TryInitError> {
    let env_filter =
        EnvFilter::builder().with_default_directive(default_level.into()).from_env_lossy();

    let log_format = var("RUST_LOG_FORMAT")
        .ok()
        .and_then(|raw| raw.parse().ok())
        .or(format)
        .unwrap_or_default();

    let log_layer = match log_format {
        LogFormat::Json => tracing_subscriber::fmt::layer().json().with_filter(env_filter).boxed(),
        LogFormat::Compact => tracing_subscriber::fmt::layer()
            .compact()
            .without_time()
            .with_filter(env_filter)
            .boxed(),
    };

    tracing_subscriber::registry().with(log_layer).try_init()
}

/// Parse a level name such as `debug`, falling back to `INFO`.
pub fn level_from_str(level: &str) -> LevelFilter {
    level.trim().parse().unwrap_or(LevelFilter::INFO)
}
