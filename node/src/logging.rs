//! # Structured Logging
//!
//! `tracing` subscriber setup for the membership daemon.
//!
//! The default filter is tuned for debugging a failure detector: at
//! `debug`, the protocol crate logs exactly the decisions you want to see
//! (probe failures, suspicion transitions, refutations, view changes) —
//! but the TCP transport underneath would log a line per RPC frame, which
//! at one probe round per protocol period times every member buries the
//! signal. The transport target is therefore pinned at `info` and the
//! HTTP layer at `warn` unless `RUST_LOG` says otherwise.
//!
//! Log output goes to stderr so stdout stays free for structured data
//! (e.g. a serialized view piped into a seed file).

use tracing_subscriber::{fmt, EnvFilter};

/// Log output format for the daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Compact human-readable lines for terminals.
    Pretty,
    /// JSON lines for log aggregation.
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            other => Err(format!(
                "unknown log format \"{other}\" (expected \"pretty\" or \"json\")"
            )),
        }
    }
}

/// Builds the default filter directives for a daemon log level.
///
/// `level` applies to the daemon and the protocol crate; the noisy
/// targets are pinned independently of it. Setting `RUST_LOG` replaces
/// the whole set.
pub fn default_directives(level: &str) -> String {
    format!(
        "roster_node={level},roster_protocol={level},\
         roster_protocol::transport::tcp=info,tower_http=warn"
    )
}

/// Installs the global subscriber. Call once, before anything logs; a
/// second call panics.
pub fn init_logging(level: &str, format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(level)));

    match format {
        LogFormat::Pretty => {
            fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .with_target(true)
                .compact()
                .init();
        }
        LogFormat::Json => {
            fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .json()
                .with_current_span(false)
                .init();
        }
    }
}
