//! Full socket-based integration tests for client ↔ server room flow.

use std::time::Duration;

use playground_client::client::ClientState;
use playground_client::GameClient;
use playground_server::server::bind_ephemeral;
use playground_shared::math::Vec3;
use playground_shared::net::{
    decode_from_bytes, encode_to_bytes, ReliableConn, ReliableListener, RoomMsg, SessionId,
    UnreliableConn, PROTOCOL_VERSION,
};
use playground_shared::scene::HeadlessScene;
use playground_tests::{drive_frames, drive_until};
use tokio::net::{TcpStream, UdpSocket};

const FRAME: Duration = Duration::from_millis(16);

/// Unit-style test: protocol messages roundtrip correctly.
#[test]
fn protocol_messages_roundtrip() -> anyhow::Result<()> {
    let hello = RoomMsg::Hello {
        protocol: PROTOCOL_VERSION,
    };
    assert_eq!(decode_from_bytes(&encode_to_bytes(&hello)?)?, hello);

    let welcome = RoomMsg::Welcome {
        session_id: SessionId::from("abcdefghi"),
        room: "playground".to_string(),
    };
    assert_eq!(decode_from_bytes(&encode_to_bytes(&welcome)?)?, welcome);

    let changed = RoomMsg::EntityChanged {
        session_id: SessionId::from("abcdefghi"),
        position: Vec3::new(1.5, -1.0, -2.5),
    };
    assert_eq!(decode_from_bytes(&encode_to_bytes(&changed)?)?, changed);

    Ok(())
}

/// Both transport channels deliver end to end over loopback.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn reliable_and_datagram_channels_roundtrip() -> anyhow::Result<()> {
    let listener = ReliableListener::bind("127.0.0.1:0".parse()?).await?;
    let addr = listener.local_addr()?;

    let echo = tokio::spawn(async move {
        let (mut conn, _peer) = listener.accept().await?;
        let msg = conn.recv().await?;
        conn.send(&msg).await?;
        Ok::<_, anyhow::Error>(())
    });

    let mut conn = ReliableConn::new(TcpStream::connect(addr).await?);
    assert_eq!(conn.peer_addr()?, addr);
    let sent = RoomMsg::Hello {
        protocol: PROTOCOL_VERSION,
    };
    conn.send(&sent).await?;
    assert_eq!(conn.recv().await?, sent);
    echo.await??;

    // Datagram side: a bare socket plays the far end.
    let far = UdpSocket::bind("127.0.0.1:0").await?;
    let far_addr = far.local_addr()?;
    let near = UnreliableConn::connect("127.0.0.1:0".parse()?, far_addr).await?;
    assert_eq!(near.peer_addr(), far_addr);

    // Nothing in flight yet: the timed receive comes back empty.
    assert!(near
        .recv_timeout(Duration::from_millis(20))
        .await?
        .is_none());

    let ready = RoomMsg::Ready {
        session_id: SessionId::from("abcdefghi"),
    };
    far.send_to(&encode_to_bytes(&ready)?, near.local_addr()?)
        .await?;
    let got = near.recv_timeout(Duration::from_millis(500)).await?;
    assert_eq!(got, Some(ready));

    Ok(())
}

/// Full integration: two clients share a room; a move on one glides the
/// matching entity on the other; a leave removes it everywhere.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn two_clients_share_a_room() -> anyhow::Result<()> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("info")
        .with_test_writer()
        .try_init();

    // Bind server to ephemeral port.
    let (mut server, cfg) = bind_ephemeral(50).await?;

    // Spawn server accept + patch loop in background.
    let server_handle = tokio::spawn(async move {
        server.accept_one().await?;
        server.accept_one().await?;
        server.run_for_ticks(400).await?;
        Ok::<_, anyhow::Error>(())
    });

    // Give server a moment to start listening.
    tokio::time::sleep(Duration::from_millis(10)).await;

    let mut alice = GameClient::connect(&cfg).await?;
    assert_eq!(alice.state, ClientState::InRoom);
    let mut alice_scene = HeadlessScene::new();

    let mut bob_cfg = cfg.clone();
    bob_cfg.player_name = "Bob".to_string();
    let mut bob = GameClient::connect(&bob_cfg).await?;
    let mut bob_scene = HeadlessScene::new();

    // Replay plus join broadcast: each client ends up seeing both players.
    let both_visible = |c: &GameClient| c.registry.len() == 2;
    assert!(
        drive_until(&mut alice, &mut alice_scene, 200, FRAME, both_visible).await,
        "alice never saw the full room"
    );
    assert!(
        drive_until(&mut bob, &mut bob_scene, 200, FRAME, both_visible).await,
        "bob never saw the full room"
    );

    // No slide-in: bob's copy of alice stands exactly where the server
    // spawned her.
    let alice_id = alice.session_id.clone();
    let first_sight = *bob.registry.get(&alice_id).ok_or_else(|| anyhow::anyhow!("missing"))?;
    assert_eq!(first_sight.current, first_sight.target);

    // Alice moves; bob's copy of her glides to the same spot.
    let destination = Vec3::new(100.0, -1.0, 50.0);
    alice.move_to(destination).await?;

    // Her own copy retargets immediately and starts gliding, no server
    // echo required.
    let own_gap = alice
        .registry
        .get(&alice_id)
        .map(|e| e.remaining_distance())
        .unwrap_or(0.0);
    drive_frames(&mut alice, &mut alice_scene, 30, FRAME).await;
    let own = *alice.registry.get(&alice_id).ok_or_else(|| anyhow::anyhow!("missing"))?;
    assert_eq!(own.target, destination);
    assert!(
        own.remaining_distance() <= own_gap * 0.3,
        "own entity barely moved: {} of {}",
        own.remaining_distance(),
        own_gap
    );

    let converged = |c: &GameClient| {
        c.registry
            .get(&alice_id)
            .map(|e| e.target == destination && e.current.distance(destination) < 2.0)
            .unwrap_or(false)
    };
    assert!(
        drive_until(&mut bob, &mut bob_scene, 600, FRAME, converged).await,
        "bob never saw alice arrive"
    );

    // The renderable tracks the registry's rendered position.
    let entity = *bob.registry.get(&alice_id).ok_or_else(|| anyhow::anyhow!("missing"))?;
    assert_eq!(bob_scene.position_of(entity.handle), Some(entity.current));

    // Alice leaves; her entity disappears from bob's scene.
    alice.leave().await?;
    let alice_gone = |c: &GameClient| !c.registry.contains(&alice_id);
    assert!(
        drive_until(&mut bob, &mut bob_scene, 600, FRAME, alice_gone).await,
        "bob still sees alice"
    );
    assert_eq!(bob_scene.live_count(), 1);

    // Alice's own session winds down with the server's confirmation.
    let alice_left = |c: &GameClient| c.state == ClientState::Left;
    assert!(
        drive_until(&mut alice, &mut alice_scene, 600, FRAME, alice_left).await,
        "alice never saw her session end"
    );
    assert_eq!(alice.end_reason(), Some("left"));
    assert_eq!(alice_scene.live_count(), 0);

    server_handle.abort();
    Ok(())
}

/// The room rejects joins past its session cap.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn full_room_rejects_join() -> anyhow::Result<()> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("info")
        .with_test_writer()
        .try_init();

    let (mut server, cfg) = bind_ephemeral(50).await?;
    server.exec_console("set sv_max_sessions 1").await?;

    let server_handle = tokio::spawn(async move {
        server.accept_one().await?;
        assert_eq!(server.session_count(), 1);
        // The second join must fail the handshake.
        assert!(server.accept_one().await.is_err());
        assert_eq!(server.session_count(), 1);
        Ok::<_, anyhow::Error>(())
    });

    tokio::time::sleep(Duration::from_millis(10)).await;

    let _first = GameClient::connect(&cfg).await?;
    let rejected = GameClient::connect(&cfg).await;
    assert!(rejected.is_err(), "second join should have been rejected");

    server_handle.await??;
    Ok(())
}
