//! mockcmd: a worker that can be executed by pmux but does not do anything
//! useful. Reports progress over a pwrap bridge when given a socket path,
//! to stdout otherwise.

mod config;
mod sink;
mod worker;

use std::process::ExitCode;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use pwrap::{CancelOnCommand, CommBridge};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{Args, MockConfig};
use crate::sink::LocalSink;

/// Initialize tracing with PMUX_LOG and LOG_FORMAT support. Logs go to stderr
/// so stdout stays free for progress.
fn init_tracing() {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let level = match std::env::var("PMUX_LOG").as_deref() {
            Ok("debug") => "debug",
            Ok("trace") => "trace",
            Ok("warn") | Ok("warning") => "warn",
            Ok("error") => "error",
            _ => "info",
        };
        EnvFilter::new(format!("mockcmd={level},pwrap={level}"))
    };

    let use_json = std::env::var("LOG_FORMAT").as_deref() == Ok("json");

    if use_json {
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr));
        let _ = subscriber.try_init();
    } else {
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr));
        let _ = subscriber.try_init();
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let config = MockConfig::load(args.config.as_deref())?.apply_args(&args);
    let token = CancellationToken::new();

    let ctrl_c_token = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupt received");
            ctrl_c_token.cancel();
        }
    });

    if config.socket_path().is_none() {
        let sink = LocalSink::stdout();
        worker::run_loop(&sink, &token, config.interval(), config.iterations).await;
        return Ok(());
    }

    let bridge = CommBridge::bind(
        &token,
        config.bridge.clone(),
        CancelOnCommand::new(token.clone()),
    )
    .await
    .context("failed to start communication bridge")?;
    bridge.open(&token);

    worker::run_loop(&bridge, &token, config.interval(), config.iterations).await;

    close_within_grace(&bridge, config.bridge.shutdown_grace).await
}

/// Close the bridge, giving up after `grace` so a wedged peer cannot hold the
/// process open.
async fn close_within_grace(bridge: &CommBridge, grace: Duration) -> anyhow::Result<()> {
    match tokio::time::timeout(grace, bridge.close()).await {
        Ok(result) => result.context("failed to close communication bridge"),
        Err(_) => {
            tracing::warn!(grace_ms = grace.as_millis() as u64, "Bridge close timed out");
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    let args = Args::parse();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("mockcmd failed: {e:#}");
            ExitCode::FAILURE
        }
    }
}
