//! # orpc-echo
//!
//! Runs a server and a handful of consumers on one in-process broker. The
//! server publishes a global `Echo` provider and a per-session `Notepad`;
//! each consumer opens a session, calls both, and closes it again.

#![deny(unsafe_code)]

mod providers;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use orpc_core::logging::{init_json_subscriber, init_subscriber};
use orpc_gateway::{Gateway, MemoryBroker, MemoryConfig};
use orpc_rpc::{ProtoRpcHandler, ProviderFactory};
use orpc_settings::{OrpcSettings, load_settings, load_settings_from_path};
use serde_json::json;
use tracing::info;

use crate::providers::{Echo, Notepad};

/// In-process session demo.
#[derive(Parser, Debug)]
#[command(name = "orpc-echo", about = "In-process orpc session demo")]
struct Cli {
    /// Settings file (defaults to `~/.orpc/settings.json`).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Number of consumer sessions to open.
    #[arg(long, default_value = "2")]
    sessions: usize,

    /// Message sent through `Echo/echo`.
    #[arg(long, default_value = "hello")]
    message: String,

    /// Keep sessions open this long so heartbeats run (milliseconds).
    #[arg(long, default_value = "0")]
    hold_ms: u64,

    /// Log one JSON object per line (overrides settings if specified).
    #[arg(long)]
    json_logs: bool,
}

fn load(cli: &Cli) -> Result<OrpcSettings> {
    match &cli.settings {
        Some(path) => load_settings_from_path(path)
            .with_context(|| format!("Failed to load settings from {}", path.display())),
        None => load_settings().context("Failed to load settings"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = load(&cli)?;

    if cli.json_logs || settings.logging.json {
        init_json_subscriber(&settings.logging.level);
    } else {
        init_subscriber(&settings.logging.level);
    }

    let broker = MemoryBroker::with_config(MemoryConfig {
        response_timeout: Duration::from_millis(settings.gateway.response_timeout_ms),
    });
    info!(gateway = %settings.gateway.url, "running on in-process broker");

    let server = ProtoRpcHandler::with_settings(broker.connect(), &settings.session);
    let _ = server.register(&[ProviderFactory::of::<Echo>(), ProviderFactory::of::<Notepad>()]);

    let mut consumers = Vec::with_capacity(cli.sessions);
    for n in 0..cli.sessions {
        let gateway = broker.connect();
        let consumer = ProtoRpcHandler::with_settings(gateway.clone(), &settings.session);
        let session = consumer
            .start_session(Vec::new())
            .await
            .with_context(|| format!("Failed to start session {n}"))?;

        let echoed = gateway.make("Echo/echo", json!({ "msg": cli.message })).await;
        let Some(echoed) = echoed.data().cloned() else {
            bail!("echo failed: {}", echoed.error.unwrap_or_default());
        };

        let append = session.method_path("Notepad/append");
        let noted = gateway.make(&append, json!(format!("note from consumer {n}"))).await;
        let Some(count) = noted.data().cloned() else {
            bail!("append failed: {}", noted.error.unwrap_or_default());
        };

        println!("{} echo={echoed} notes={count}", session.id());
        consumers.push(consumer);
    }

    if cli.hold_ms > 0 {
        info!(hold_ms = cli.hold_ms, "holding sessions open");
        tokio::time::sleep(Duration::from_millis(cli.hold_ms)).await;
    }

    for consumer in &consumers {
        let closed = consumer.close_session().await.context("Failed to close session")?;
        info!(closed, "session closed");
        consumer.shutdown().await;
    }
    server.shutdown().await;

    println!("closed {} sessions, {} addresses left", consumers.len(), broker.addresses().len());
    Ok(())
}
