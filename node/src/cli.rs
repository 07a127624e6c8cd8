//! # CLI Interface
//!
//! Defines the command-line argument structure for `roster-node` using
//! `clap` derive. Supports three subcommands: `run`, `status`, and
//! `version`.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Roster group membership daemon.
///
/// Hosts one membership provider on a TCP transport, serves the HTTP
/// status API, and exposes Prometheus metrics.
#[derive(Parser, Debug)]
#[command(
    name = "roster-node",
    about = "Roster group membership daemon",
    version,
    propagate_version = true
)]
pub struct RosterNodeCli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level subcommands for the roster-node binary.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the membership daemon.
    Run(RunArgs),
    /// Query the status of a running node via its HTTP endpoint.
    Status(StatusArgs),
    /// Print version information and exit.
    Version,
}

/// Arguments for the `run` subcommand.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Address the RPC transport binds to (`host:port`). Peers dial the
    /// resolved address, so bind something they can reach.
    #[arg(long, short = 'l', env = "ROSTER_LISTEN", default_value = "127.0.0.1:7000")]
    pub listen: String,

    /// Provider id to register under, disambiguating multiple providers
    /// per endpoint.
    #[arg(long, env = "ROSTER_PROVIDER_ID", default_value_t = 0)]
    pub provider_id: u16,

    /// Path to the provider configuration file (JSON: group type, backend
    /// config, bootstrap method).
    ///
    /// When omitted, the node runs a SWIM group bootstrapped from itself.
    #[arg(long, short = 'c', env = "ROSTER_CONFIG")]
    pub config: Option<PathBuf>,

    /// Bootstrap method override: self, view, file, or join.
    #[arg(long, env = "ROSTER_BOOTSTRAP")]
    pub bootstrap: Option<String>,

    /// View file for the `file` and `join` bootstrap methods.
    #[arg(long, env = "ROSTER_FILE")]
    pub file: Option<PathBuf>,

    /// Address for the HTTP status API.
    #[arg(long, env = "ROSTER_API_ADDR", default_value = "127.0.0.1:7001")]
    pub api_addr: String,

    /// Address for the Prometheus metrics endpoint.
    #[arg(long, env = "ROSTER_METRICS_ADDR", default_value = "127.0.0.1:7002")]
    pub metrics_addr: String,

    /// Default log level when RUST_LOG is not set.
    #[arg(long, env = "ROSTER_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Log output format: pretty or json.
    #[arg(long, env = "ROSTER_LOG_FORMAT", default_value = "pretty")]
    pub log_format: String,
}

/// Arguments for the `status` subcommand.
#[derive(Parser, Debug)]
pub struct StatusArgs {
    /// HTTP API endpoint of the running node.
    #[arg(long, default_value = "http://127.0.0.1:7001")]
    pub api_url: String,
}

/// Returns true if `level` is a level the EnvFilter default will accept.
pub fn validate_log_level(level: &str) -> bool {
    matches!(
        level.to_lowercase().as_str(),
        "trace" | "debug" | "info" | "warn" | "error"
    )
}

/// Builds the effective provider configuration from an optional config
/// file content and CLI overrides. The CLI's `--bootstrap` and `--file`
/// replace the corresponding fields; an absent configuration defaults to
/// a self-bootstrapped SWIM group.
pub fn effective_config(
    file_content: Option<&str>,
    bootstrap: Option<&str>,
    view_file: Option<&str>,
) -> anyhow::Result<serde_json::Value> {
    let mut config: serde_json::Value = match file_content {
        Some(content) => serde_json::from_str(content)?,
        None => serde_json::json!({
            "group": { "type": "swim" },
            "bootstrap": "self",
        }),
    };
    if !config.is_object() {
        anyhow::bail!("provider configuration must be a JSON object");
    }
    if let Some(method) = bootstrap {
        config["bootstrap"] = serde_json::Value::String(method.to_string());
    }
    if let Some(path) = view_file {
        config["file"] = serde_json::Value::String(path.to_string());
    }
    Ok(config)
}
