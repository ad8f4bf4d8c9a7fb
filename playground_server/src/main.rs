//! Standalone server binary.
//!
//! Usage:
//!   cargo run -p playground_server -- [--addr 127.0.0.1:41000] [--room playground] [--patch-hz 20]
//!
//! The server hosts a single room. Clients join it, get a session id and
//! the full entity replay, then move around; their positions fan out to
//! everyone at the patch cadence.
//!
//! Console commands:
//!   status          - Show room status and session positions
//!   kick <session>  - End a session
//!   quit            - Shutdown server

use std::env;
use std::io::{BufRead, Write};

use anyhow::Context;
use playground_server::server::RoomServer;
use playground_shared::config::GameConfig;
use tokio::sync::mpsc;
use tracing::{info, warn};

fn parse_args() -> GameConfig {
    let mut cfg = GameConfig::default();
    let args: Vec<String> = env::args().collect();
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--addr" if i + 1 < args.len() => {
                cfg.server_addr = args[i + 1].clone();
                i += 2;
            }
            "--room" if i + 1 < args.len() => {
                cfg.room_name = args[i + 1].clone();
                i += 2;
            }
            "--patch-hz" if i + 1 < args.len() => {
                cfg.patch_hz = args[i + 1].parse().unwrap_or(cfg.patch_hz);
                i += 2;
            }
            _ => i += 1,
        }
    }
    cfg
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cfg = parse_args();
    info!(addr = %cfg.server_addr, room = %cfg.room_name, patch_hz = cfg.patch_hz, "Starting server");

    let mut server = RoomServer::new(cfg).await.context("create server")?;
    let local = server.local_addr()?;
    info!(%local, "Server listening");

    // Set up console input channel.
    let (console_tx, console_rx) = mpsc::channel::<String>(32);
    server.set_console_input(console_rx);

    // Spawn stdin reader thread.
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        let mut stdout = std::io::stdout();
        loop {
            print!("] ");
            let _ = stdout.flush();
            let mut line = String::new();
            if stdin.lock().read_line(&mut line).is_err() {
                break;
            }
            let line = line.trim().to_string();
            if !line.is_empty() && console_tx.blocking_send(line).is_err() {
                break;
            }
        }
    });

    println!("Room open. Type 'status' for info, 'quit' to exit.");
    println!();

    // Main server loop.
    let mut next_tick = tokio::time::Instant::now();

    loop {
        // Accept new sessions (non-blocking). A failed handshake only
        // costs the one connection.
        match server.try_accept(std::time::Duration::from_millis(1)).await {
            Ok(Some(session_id)) => {
                info!(session_id = %session_id, "New session accepted");
            }
            Ok(None) => {}
            Err(e) => {
                warn!(error = %e, "Join rejected");
            }
        }

        server.step().await?;

        // Wait for next patch tick.
        next_tick += server.patch_interval();
        tokio::time::sleep_until(next_tick).await;
    }
}
