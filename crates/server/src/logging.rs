//! Tracing setup. Output always goes to stderr so the STDIO transport keeps stdout for JSON-RPC.

use clap::ValueEnum;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum LogFormat {
    /// Human-readable multi-field lines
    #[default]
    Pretty,
    /// One JSON object per line
    Json,
    /// Single-line abbreviated output
    Compact,
}

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync + 'static>;

/// `RUST_LOG` wins when set; otherwise `level` applies to every target.
fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

fn stderr_layer(format: LogFormat, filter: EnvFilter) -> BoxedLayer {
    match format {
        LogFormat::Pretty => fmt::layer()
            .with_ansi(false)
            .with_target(true)
            .with_writer(std::io::stderr)
            .with_filter(filter)
            .boxed(),
        LogFormat::Json => fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_filter(filter)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_writer(std::io::stderr)
            .with_filter(filter)
            .boxed(),
    }
}

/// Install the global subscriber. Later calls are no-ops.
pub fn init_tracing(level: &str, format: LogFormat) {
    let _ = tracing_subscriber::registry()
        .with(stderr_layer(format, env_filter(level)))
        .try_init();
}
