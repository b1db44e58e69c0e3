//! connmux - Demo Echo Server
//!
//! This is the main entry point for the connmux demo server.
//! It configures a connection manager from the command line, attaches a
//! logging listener and an echo listener, and runs the loop until Ctrl+C.

use anyhow::Context;
use bytes::Bytes;
use clap::Parser;
use connmux::{
    ConnectionInfo, ConnectionListener, ConnectionManager, ListenerResult, ManagerConfig,
    Propagation,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(name = "connmux")]
#[command(version, about = "Readiness-multiplexed echo server")]
struct Cli {
    /// Host to bind to
    #[arg(long, default_value = connmux::DEFAULT_HOST)]
    host: String,

    /// Port to listen on
    #[arg(short, long, default_value_t = connmux::DEFAULT_PORT)]
    port: u16,

    /// Idle time before a connection is closed (e.g. 30s, 5m)
    #[arg(long, default_value = "300s", value_parser = humantime::parse_duration)]
    keepalive: Duration,

    /// Time between idle sweeps (e.g. 10s, 10m)
    #[arg(long, default_value = "600s", value_parser = humantime::parse_duration)]
    sweep_interval: Duration,

    /// Log level, used when RUST_LOG is unset (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Cli {
    fn manager_config(&self) -> ManagerConfig {
        ManagerConfig {
            host: self.host.clone(),
            port: self.port,
            keepalive_timeout: self.keepalive,
            sweep_interval: self.sweep_interval,
            ..Default::default()
        }
    }
}

/// Logs connection lifecycle events.
struct LogListener;

impl ConnectionListener for LogListener {
    fn on_connection_added(
        &self,
        manager: &mut ConnectionManager,
        conn: &ConnectionInfo,
    ) -> ListenerResult {
        info!(connection = %conn, active = manager.connection_count(), "Client connected");
        Ok(Propagation::Continue)
    }

    fn on_connection_removed(
        &self,
        manager: &mut ConnectionManager,
        conn: &ConnectionInfo,
    ) -> ListenerResult {
        info!(connection = %conn, active = manager.connection_count(), "Client disconnected");
        Ok(Propagation::Continue)
    }

    fn on_connection_data_received(
        &self,
        _manager: &mut ConnectionManager,
        conn: &ConnectionInfo,
        data: &Bytes,
    ) -> ListenerResult {
        debug!(connection = %conn, bytes = data.len(), "Received data");
        Ok(Propagation::Continue)
    }
}

/// Sends every received chunk back to its sender.
struct EchoListener;

impl ConnectionListener for EchoListener {
    fn on_connection_data_received(
        &self,
        manager: &mut ConnectionManager,
        conn: &ConnectionInfo,
        data: &Bytes,
    ) -> ListenerResult {
        manager.send_to_connection(conn, data.clone())?;
        Ok(Propagation::Continue)
    }
}

fn init_tracing(level: &str) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(level))?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
    Ok(())
}

fn print_banner(addr: SocketAddr, cli: &Cli) {
    println!(
        r#"
connmux v{} - Readiness-Multiplexed Echo Server
──────────────────────────────────────────────────
Listening on {}
Keepalive {} / sweep every {}

Use Ctrl+C to shutdown gracefully.
"#,
        connmux::VERSION,
        addr,
        humantime::format_duration(cli.keepalive),
        humantime::format_duration(cli.sweep_interval),
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_tracing(&cli.log_level)?;

    let mut manager = ConnectionManager::new(cli.manager_config())?;
    manager.add_connection_listener(Arc::new(LogListener));
    manager.add_connection_listener(Arc::new(EchoListener));

    let addr = manager
        .listen()
        .with_context(|| format!("failed to listen on {}", cli.manager_config().bind_address()))?;
    print_banner(addr, &cli);

    let stop = manager.stop_handle();

    // The manager owns its thread; the runtime only waits for Ctrl+C
    let mut server = tokio::task::spawn_blocking(move || manager.run());

    tokio::select! {
        result = &mut server => {
            result??;
        }
        _ = signal::ctrl_c() => {
            info!("Shutdown signal received, stopping server...");
            stop.stop();
            server.await??;
        }
    }

    info!("Server shutdown complete");
    Ok(())
}
