//! Standalone client binary.
//!
//! Usage:
//!   cargo run -p playground_client -- [--addr 127.0.0.1:41000] [--name Alice]
//!
//! The client joins the server's room, mirrors every player as an entity,
//! and animates them toward the latest server-reported positions.
//!
//! Console commands:
//!   status        - Show session, room and entity positions
//!   move <x> <z>  - Send a move intent for our own entity
//!   leave         - Leave the room (server confirms and tears down)
//!   quit          - Exit client

use std::env;
use std::io::{BufRead, Write};
use std::time::{Duration, Instant};

use anyhow::Context;
use playground_client::client::{ClientState, GameClient};
use playground_shared::config::GameConfig;
use playground_shared::scene::HeadlessScene;
use tokio::sync::mpsc;
use tracing::info;

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
            "--name" if i + 1 < args.len() => {
                cfg.player_name = args[i + 1].clone();
                i += 2;
            }
            "--frame-hz" if i + 1 < args.len() => {
                cfg.frame_hz = args[i + 1].parse().unwrap_or(cfg.frame_hz);
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
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cfg = parse_args();
    info!(server = %cfg.server_addr, name = %cfg.player_name, "Starting client");

    let mut client = GameClient::connect(&cfg).await.context("connect")?;

    // Set up console input channel.
    let (console_tx, mut console_rx) = mpsc::channel::<String>(32);

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
            if !line.is_empty() {
                if console_tx.blocking_send(line).is_err() {
                    break;
                }
            }
        }
    });

    println!("Joined room '{}' as session {}.", client.room, client.session_id);
    println!("Type 'status' for info, 'move <x> <z>' to move, 'quit' to exit.");
    println!();

    let frame_interval = Duration::from_secs_f32(1.0 / cfg.frame_hz as f32);
    let mut scene = HeadlessScene::new();
    let mut last_frame = Instant::now();
    let mut frame: u64 = 0;

    loop {
        // Process console commands.
        while let Ok(line) = console_rx.try_recv() {
            match client.exec_console(&line).await {
                Ok(output) => {
                    for line in output {
                        println!("{}", line);
                    }
                }
                Err(e) => {
                    println!("Error: {}", e);
                }
            }
        }

        let dt = last_frame.elapsed();
        last_frame = Instant::now();
        client.before_render(&mut scene, dt);

        if client.state == ClientState::Left {
            println!(
                "Session ended: {}",
                client.end_reason().unwrap_or("unknown")
            );
            break;
        }

        frame += 1;
        if frame % 300 == 0 {
            info!(frame, entities = client.registry.len(), "Frame");
        }

        tokio::time::sleep(frame_interval).await;
    }

    Ok(())
}
