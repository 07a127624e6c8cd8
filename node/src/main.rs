// Copyright (c) 2026 Roster Contributors. MIT License.
// See LICENSE for details.

//! # Roster Membership Daemon
//!
//! Entry point for the `roster-node` binary. Parses CLI arguments,
//! initializes logging and metrics, starts the TCP transport and the
//! membership provider, and serves the HTTP status API.
//!
//! The binary supports three subcommands:
//!
//! - `run`     — start the membership daemon
//! - `status`  — query a running node's status endpoint
//! - `version` — print build version information

mod api;
mod cli;
mod logging;
mod metrics;

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tokio::signal;

use roster_protocol::{
    MembershipUpdate, ObserverRegistry, Provider, ProviderArgs, RpcTransport, TcpTransport,
};

use cli::{Commands, RosterNodeCli};
use logging::LogFormat;
use metrics::NodeMetrics;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = RosterNodeCli::parse();

    match cli.command {
        Commands::Run(args) => run_node(args).await,
        Commands::Status(args) => query_status(args).await,
        Commands::Version => {
            print_version();
            Ok(())
        }
    }
}

// ---------------------------------------------------------------------------
// run — Full daemon startup sequence
// ---------------------------------------------------------------------------

/// Starts the full daemon: transport, provider, API server, and metrics
/// endpoint.
///
/// Startup sequence:
/// 1. Validate args and initialize logging
/// 2. Resolve the provider configuration (file + CLI overrides)
/// 3. Bind the TCP transport
/// 4. Create metrics and wire them into an observer
/// 5. Start the provider (bootstraps the view, starts the engine)
/// 6. Serve the HTTP API and /metrics
/// 7. Await shutdown signal
/// 8. Graceful teardown: provider first, then the transport
async fn run_node(args: cli::RunArgs) -> Result<()> {
    // --- 1. Logging ---
    if !cli::validate_log_level(&args.log_level) {
        anyhow::bail!("invalid log level \"{}\"", args.log_level);
    }
    let log_format: LogFormat = args
        .log_format
        .parse()
        .map_err(|e: String| anyhow::anyhow!(e))?;
    logging::init_logging(&args.log_level, log_format);

    tracing::info!(
        listen = %args.listen,
        api_addr = %args.api_addr,
        metrics_addr = %args.metrics_addr,
        provider_id = args.provider_id,
        "starting roster-node"
    );

    // --- 2. Provider configuration ---
    let file_content = match &args.config {
        Some(path) => Some(
            std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config file {}", path.display()))?,
        ),
        None => None,
    };
    let config = cli::effective_config(
        file_content.as_deref(),
        args.bootstrap.as_deref(),
        args.file.as_deref().and_then(|p| p.to_str()),
    )
    .context("invalid provider configuration")?;

    // --- 3. Transport ---
    let transport = TcpTransport::bind(&args.listen)
        .await
        .with_context(|| format!("failed to bind transport on {}", args.listen))?;
    let transport_address = transport.local_address().to_string();
    tracing::info!(address = %transport_address, "transport listening");

    // --- 4. Metrics + observer ---
    let node_metrics = Arc::new(NodeMetrics::new());
    let observers = Arc::new(ObserverRegistry::new());
    {
        let metrics = Arc::clone(&node_metrics);
        let metadata_metrics = Arc::clone(&node_metrics);
        observers.add_callbacks(
            1,
            Arc::new(move |update, address, provider_id| {
                let kind = match update {
                    MembershipUpdate::Joined => "joined",
                    MembershipUpdate::Left => "left",
                    MembershipUpdate::Died => "died",
                    MembershipUpdate::Moved => "moved",
                };
                metrics.membership_events_total.with_label_values(&[kind]).inc();
                match update {
                    MembershipUpdate::Joined => metrics.group_size.inc(),
                    MembershipUpdate::Left | MembershipUpdate::Died => metrics.group_size.dec(),
                    MembershipUpdate::Moved => {}
                }
                tracing::info!(kind, address, provider_id, "membership event");
            }),
            Arc::new(move |key, _value| {
                metadata_metrics
                    .metadata_updates_total
                    .with_label_values(&[key])
                    .inc();
            }),
        );
    }

    // --- 5. Provider ---
    let provider = Provider::start(ProviderArgs {
        transport: transport.clone(),
        provider_id: args.provider_id,
        config,
        backend: None,
        observers: Some(observers),
        initial_view: None,
    })
    .await
    .map_err(|e| anyhow::anyhow!("failed to start provider: {e}"))?;

    // The observer only counted peers; seed the gauge with the truth.
    node_metrics
        .group_size
        .set(provider.view_snapshot().members.len() as i64);

    // --- 6. HTTP servers ---
    let app_state = api::AppState {
        version: format!(
            "{} (protocol {})",
            env!("CARGO_PKG_VERSION"),
            roster_protocol::config::PROTOCOL_VERSION,
        ),
        transport_address: transport_address.clone(),
        provider: Arc::clone(&provider),
        started_at: chrono::Utc::now(),
        metrics: Arc::clone(&node_metrics),
    };

    let api_router = api::create_router(app_state);
    let api_listener = tokio::net::TcpListener::bind(&args.api_addr)
        .await
        .with_context(|| format!("failed to bind API listener on {}", args.api_addr))?;
    tracing::info!("API server listening on {}", args.api_addr);

    let metrics_router = axum::Router::new()
        .route("/metrics", axum::routing::get(metrics::metrics_handler))
        .with_state(Arc::clone(&node_metrics));
    let metrics_listener = tokio::net::TcpListener::bind(&args.metrics_addr)
        .await
        .with_context(|| format!("failed to bind metrics listener on {}", args.metrics_addr))?;
    tracing::info!("metrics server listening on {}", args.metrics_addr);

    print_startup_banner(
        &transport_address,
        &args.api_addr,
        &args.metrics_addr,
        provider.backend().kind(),
        provider.view_snapshot().members.len(),
    );

    // --- 7. Await shutdown ---
    tokio::select! {
        res = axum::serve(api_listener, api_router) => {
            if let Err(e) = res {
                tracing::error!("API server error: {e}");
            }
        }
        res = axum::serve(metrics_listener, metrics_router) => {
            if let Err(e) = res {
                tracing::error!("metrics server error: {e}");
            }
        }
        _ = shutdown_signal() => {
            tracing::info!("shutdown signal received");
        }
    }

    // --- 8. Graceful teardown ---
    // The provider announces its departure before the transport goes away.
    provider.shutdown().await;
    transport.stop();

    tracing::info!("roster-node stopped");
    Ok(())
}

// ---------------------------------------------------------------------------
// status — Query a running node
// ---------------------------------------------------------------------------

/// Queries a running node's status endpoint and prints the result.
async fn query_status(args: cli::StatusArgs) -> Result<()> {
    let url = format!("{}/status", args.api_url.trim_end_matches('/'));
    let body = http_get(&url).await?;

    // Pretty-print the JSON; fall back to raw output if parsing fails.
    match serde_json::from_str::<serde_json::Value>(&body) {
        Ok(json) => {
            println!("Node Status");
            for (label, key) in [
                ("Version", "version"),
                ("Backend", "backend"),
                ("Transport", "transport_address"),
                ("Digest", "digest"),
                ("Timestamp", "timestamp"),
            ] {
                if let Some(value) = json.get(key).and_then(|v| v.as_str()) {
                    println!("  {label:<12}: {value}");
                }
            }
            for (label, key) in [
                ("Provider ID", "provider_id"),
                ("Group Size", "group_size"),
                ("Uptime (s)", "uptime_seconds"),
            ] {
                if let Some(value) = json.get(key).and_then(|v| v.as_i64()) {
                    println!("  {label:<12}: {value}");
                }
            }
        }
        Err(_) => println!("{body}"),
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// version
// ---------------------------------------------------------------------------

/// Prints version information to stdout.
fn print_version() {
    println!("roster-node {}", env!("CARGO_PKG_VERSION"));
    println!("protocol    {}", roster_protocol::config::PROTOCOL_VERSION);
    if let Some(commit) = option_env!("GIT_COMMIT") {
        println!("commit      {commit}");
    }
}

// ---------------------------------------------------------------------------
// Startup banner
// ---------------------------------------------------------------------------

/// Prints the startup summary once everything is listening.
fn print_startup_banner(
    transport_address: &str,
    api_addr: &str,
    metrics_addr: &str,
    backend: &str,
    group_size: usize,
) {
    println!();
    println!("  roster-node v{}", env!("CARGO_PKG_VERSION"));
    println!("  ---------------------------------------------");
    println!("  Transport : {transport_address}");
    println!("  API       : http://{api_addr}");
    println!("  Metrics   : http://{metrics_addr}/metrics");
    println!("  Backend   : {backend}");
    println!("  Members   : {group_size}");
    println!();
}

// ---------------------------------------------------------------------------
// Shutdown signal
// ---------------------------------------------------------------------------

/// Waits for SIGINT (Ctrl+C) or SIGTERM, whichever comes first.
///
/// On non-Unix platforms, only Ctrl+C is supported.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

// ---------------------------------------------------------------------------
// Minimal HTTP client
// ---------------------------------------------------------------------------

/// Splits an `http://host:port/path` URL into `(host:port, path)`.
fn split_url(url: &str) -> Result<(String, String)> {
    let rest = url
        .strip_prefix("http://")
        .ok_or_else(|| anyhow::anyhow!("only http:// URLs are supported: {url}"))?;
    let (authority, path) = match rest.find('/') {
        Some(i) => (&rest[..i], &rest[i..]),
        None => (rest, "/"),
    };
    if authority.is_empty() {
        anyhow::bail!("missing host in URL: {url}");
    }
    let authority = if authority.contains(':') {
        authority.to_string()
    } else {
        format!("{authority}:80")
    };
    Ok((authority, path.to_string()))
}

/// Minimal HTTP GET without pulling in a client crate for one request.
async fn http_get(url: &str) -> Result<String> {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let (authority, path) = split_url(url)?;
    let mut stream = tokio::net::TcpStream::connect(&authority)
        .await
        .with_context(|| format!("failed to connect to {authority}"))?;

    let request =
        format!("GET {path} HTTP/1.1\r\nHost: {authority}\r\nConnection: close\r\n\r\n");
    stream.write_all(request.as_bytes()).await?;
    stream.shutdown().await?;

    let mut buf = Vec::new();
    stream.read_to_end(&mut buf).await?;
    let response = String::from_utf8_lossy(&buf);

    // Everything after the first blank line is the body.
    Ok(response
        .split_once("\r\n\r\n")
        .map(|(_, body)| body.to_string())
        .unwrap_or_else(|| response.into_owned()))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_url_variants() {
        assert_eq!(
            split_url("http://127.0.0.1:7001/status").unwrap(),
            ("127.0.0.1:7001".to_string(), "/status".to_string())
        );
        assert_eq!(
            split_url("http://example.com").unwrap(),
            ("example.com:80".to_string(), "/".to_string())
        );
        assert!(split_url("https://secure.example.com").is_err());
        assert!(split_url("ftp://nope").is_err());
    }

    #[test]
    fn startup_banner_does_not_panic() {
        print_startup_banner(
            "tcp://127.0.0.1:7000",
            "127.0.0.1:7001",
            "127.0.0.1:7002",
            "swim",
            3,
        );
    }

    #[test]
    fn status_json_fields_extract() {
        let body = r#"{"version":"0.1.0","backend":"swim","group_size":4,"provider_id":0,"uptime_seconds":12,"digest":"00000000deadbeef"}"#;
        let json: serde_json::Value = serde_json::from_str(body).unwrap();
        assert_eq!(json["backend"].as_str().unwrap(), "swim");
        assert_eq!(json["group_size"].as_i64().unwrap(), 4);
        assert_eq!(json["digest"].as_str().unwrap().len(), 16);
    }
}
