use playground_server::server::bind_ephemeral;
use tokio::sync::mpsc;

/// Smoke test: server can run a few patch ticks without panicking.
#[tokio::test]
async fn server_runs_few_ticks() -> anyhow::Result<()> {
    let (mut server, _cfg) = bind_ephemeral(64).await?;
    server.run_for_ticks(3).await?;
    Ok(())
}

/// An operator typo on the console must not stop the room.
#[tokio::test]
async fn console_typo_does_not_stop_stepping() -> anyhow::Result<()> {
    let (mut server, _cfg) = bind_ephemeral(64).await?;
    let (tx, rx) = mpsc::channel(4);
    server.set_console_input(rx);

    tx.send("set nosuch_cvar 1".to_string()).await?;
    tx.send("reset nosuch_cvar".to_string()).await?;
    server.step().await?;

    // The console itself is still healthy afterwards.
    let out = server.exec_console("set sv_patch_hz 30").await?;
    assert!(out[0].contains("30"));
    server.step().await?;
    Ok(())
}
