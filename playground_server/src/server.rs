//! Server implementation.
//!
//! An authoritative room every client joins. It owns:
//! - Session accounting (handshake, leave, kick, room capacity)
//! - The authoritative position of every player
//! - Patch broadcasting over UDP at a fixed cadence
//! - Console commands (status, kick, quit)
//!
//! Position patches are deliberately unreliable and carry no timestamps;
//! clients absorb loss and reordering through interpolation. Lifecycle
//! messages ride the reliable stream so joins and leaves are never lost.
//! Collections are iterated in stable order wherever peers can observe
//! the result.

use anyhow::Context;
use playground_shared::{
    config::GameConfig,
    console::{Console, CvarFlags, CvarValue},
    math::Vec3,
    net::{
        ReliableConn, ReliableListener, ReliableRecv, ReliableSend, RoomMsg, SessionId,
        PROTOCOL_VERSION,
    },
    scene::{clamp_to_playfield, GROUND_SIZE, GROUND_Y},
};
use rand::Rng;
use std::{
    collections::HashMap,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    time::Duration,
};
use tokio::{net::UdpSocket, sync::mpsc, time::Instant};
use tracing::{debug, info, warn};

/// Connected session state.
struct Session {
    reliable: ReliableSend,
    udp_peer: SocketAddr,
    /// Authoritative position, updated by accepted move intents.
    position: Vec3,
    /// Whether the client has confirmed setup and wants patches.
    ready: bool,
    /// Whether `position` changed since the last patch broadcast.
    dirty: bool,
}

/// What a session's reliable reader task reports back to the room.
enum SessionControl {
    Msg(RoomMsg),
    Closed,
}

/// Room server.
pub struct RoomServer {
    pub cfg: GameConfig,
    pub console: Console,
    sessions: HashMap<SessionId, Session>,

    tcp: ReliableListener,
    udp: UdpSocket,

    tick: u64,

    /// Channel for console commands from stdin.
    console_rx: Option<mpsc::Receiver<String>>,

    /// Reliable reader tasks report leaves and disconnects here.
    control_tx: mpsc::UnboundedSender<(SessionId, SessionControl)>,
    control_rx: mpsc::UnboundedReceiver<(SessionId, SessionControl)>,
}

impl RoomServer {
    /// Creates a new room server with the given config.
    pub async fn new(cfg: GameConfig) -> anyhow::Result<Self> {
        let addr: SocketAddr = cfg.server_addr.parse().context("parse server_addr")?;
        let tcp = ReliableListener::bind(addr).await?;
        let udp = UdpSocket::bind(addr).await.context("udp bind")?;

        let mut console = Console::new();
        Self::register_cvars(&mut console, &cfg);

        let (control_tx, control_rx) = mpsc::unbounded_channel();

        Ok(Self {
            cfg,
            console,
            sessions: HashMap::new(),
            tcp,
            udp,
            tick: 0,
            console_rx: None,
            control_tx,
            control_rx,
        })
    }

    fn register_cvars(console: &mut Console, cfg: &GameConfig) {
        console.register_cvar(
            "sv_patch_hz",
            CvarValue::Int(cfg.patch_hz as i64),
            "Position patch broadcast rate",
            CvarFlags::NONE,
        );
        console.register_cvar(
            "sv_max_sessions",
            CvarValue::Int(16),
            "Max concurrent sessions in the room",
            CvarFlags::NONE,
        );
    }

    /// Sets the console input receiver.
    pub fn set_console_input(&mut self, rx: mpsc::Receiver<String>) {
        self.console_rx = Some(rx);
    }

    /// Returns the local address (after binding).
    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        self.tcp.local_addr()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Current patch cadence. The cvar wins so it can be tuned live.
    pub fn patch_interval(&self) -> Duration {
        let hz = self
            .console
            .get_cvar("sv_patch_hz")
            .and_then(|v| v.as_int())
            .filter(|hz| *hz > 0)
            .unwrap_or(self.cfg.patch_hz as i64);
        Duration::from_secs_f32(1.0 / hz as f32)
    }

    /// Accepts exactly one session, blocking until a client connects.
    pub async fn accept_one(&mut self) -> anyhow::Result<SessionId> {
        let (conn, peer) = self.tcp.accept().await?;
        self.handle_new_connection(conn, peer).await
    }

    /// Accepts a session with timeout (non-blocking).
    pub async fn try_accept(&mut self, timeout: Duration) -> anyhow::Result<Option<SessionId>> {
        match tokio::time::timeout(timeout, self.tcp.accept()).await {
            Ok(Ok((conn, peer))) => self.handle_new_connection(conn, peer).await.map(Some),
            Ok(Err(e)) => Err(e),
            Err(_) => Ok(None), // Timeout
        }
    }

    async fn handle_new_connection(
        &mut self,
        mut conn: ReliableConn,
        peer: SocketAddr,
    ) -> anyhow::Result<SessionId> {
        let msg = conn.recv().await?;
        match msg {
            RoomMsg::Hello { protocol } if protocol == PROTOCOL_VERSION => {
                let udp_hello = conn.recv().await?;
                let client_udp_port = match udp_hello {
                    RoomMsg::UdpHello { client_udp_port } => client_udp_port,
                    other => anyhow::bail!("expected UdpHello, got {other:?}"),
                };

                let max_sessions = self
                    .console
                    .get_cvar("sv_max_sessions")
                    .and_then(|v| v.as_int())
                    .unwrap_or(16) as usize;
                if self.sessions.len() >= max_sessions {
                    warn!(%peer, "Room full, rejecting join");
                    let _ = conn
                        .send(&RoomMsg::SessionEnded {
                            reason: "room full".to_string(),
                        })
                        .await;
                    anyhow::bail!("room full, rejected {peer}");
                }

                let session_id = self.fresh_session_id();
                conn.send(&RoomMsg::Welcome {
                    session_id: session_id.clone(),
                    room: self.cfg.room_name.clone(),
                })
                .await?;

                let spawn = random_spawn();

                // Replay the full room to the newcomer, itself included,
                // in stable order.
                let mut replay: Vec<(SessionId, Vec3)> = self
                    .sessions
                    .iter()
                    .map(|(id, s)| (id.clone(), s.position))
                    .collect();
                replay.push((session_id.clone(), spawn));
                replay.sort_by(|a, b| a.0.as_str().cmp(b.0.as_str()));
                for (id, position) in &replay {
                    conn.send(&RoomMsg::EntityAdded {
                        session_id: id.clone(),
                        position: *position,
                    })
                    .await?;
                }

                // Everyone already here learns about the newcomer. The
                // newcomer is not in the map yet, so it is not doubled up.
                self.broadcast_reliable(&RoomMsg::EntityAdded {
                    session_id: session_id.clone(),
                    position: spawn,
                })
                .await;

                let (recv_half, send_half) = conn.into_split();
                tokio::spawn(pump_session(
                    session_id.clone(),
                    recv_half,
                    self.control_tx.clone(),
                ));

                let udp_peer = SocketAddr::new(peer.ip(), client_udp_port);
                self.sessions.insert(
                    session_id.clone(),
                    Session {
                        reliable: send_half,
                        udp_peer,
                        position: spawn,
                        ready: false,
                        dirty: false,
                    },
                );

                info!(session_id = %session_id, %udp_peer, "Session joined");
                Ok(session_id)
            }
            other => anyhow::bail!("unexpected handshake msg: {other:?}"),
        }
    }

    /// Generates a session id no live session is using.
    fn fresh_session_id(&self) -> SessionId {
        loop {
            let id = SessionId::generate();
            if !self.sessions.contains_key(&id) {
                return id;
            }
        }
    }

    /// Runs the server for a number of patch ticks.
    pub async fn run_for_ticks(&mut self, ticks: u32) -> anyhow::Result<()> {
        let mut next = Instant::now();
        for _ in 0..ticks {
            next += self.patch_interval();
            self.step().await?;
            tokio::time::sleep_until(next).await;
        }
        Ok(())
    }

    /// Executes one patch step.
    pub async fn step(&mut self) -> anyhow::Result<()> {
        self.process_console_commands().await;
        self.process_session_control().await?;
        self.recv_datagrams()?;
        self.broadcast_patches().await?;
        self.tick += 1;
        Ok(())
    }

    async fn process_console_commands(&mut self) {
        // Collect lines first to avoid borrow conflict
        let lines: Vec<String> = if let Some(ref mut rx) = self.console_rx {
            let mut collected = Vec::new();
            while let Ok(line) = rx.try_recv() {
                collected.push(line);
            }
            collected
        } else {
            Vec::new()
        };

        for line in lines {
            // A bad command answers on the console; it never stops the room.
            match self.exec_console(&line).await {
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
    }

    /// Executes a console command.
    pub async fn exec_console(&mut self, line: &str) -> anyhow::Result<Vec<String>> {
        let line = line.trim();
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.is_empty() {
            return Ok(Vec::new());
        }

        match tokens[0] {
            "status" => {
                let mut out = Vec::new();
                out.push(format!("Room: {}", self.cfg.room_name));
                out.push(format!("Tick: {}", self.tick));
                out.push(format!("Sessions: {}", self.sessions.len()));
                let mut lines = Vec::new();
                for (id, session) in &self.sessions {
                    lines.push(format!(
                        "  {}: udp={} ready={} at ({:.1}, {:.1}, {:.1})",
                        id,
                        session.udp_peer,
                        session.ready,
                        session.position.x,
                        session.position.y,
                        session.position.z,
                    ));
                }
                lines.sort();
                out.extend(lines);
                Ok(out)
            }
            "kick" => {
                if tokens.len() < 2 {
                    return Ok(vec!["Usage: kick <session>".to_string()]);
                }
                let session_id = SessionId::from(tokens[1]);
                if self.sessions.contains_key(&session_id) {
                    self.remove_session(&session_id, "kicked").await;
                    Ok(vec![format!("Kicked {}", session_id)])
                } else {
                    Ok(vec![format!("No such session: {}", session_id)])
                }
            }
            "quit" | "exit" => {
                info!("Server shutting down");
                self.shutdown("server shutting down").await;
                std::process::exit(0);
            }
            _ => {
                // Delegate to console system.
                self.console.exec(line)
            }
        }
    }

    /// Drains leave requests and disconnect notices from reader tasks.
    async fn process_session_control(&mut self) -> anyhow::Result<()> {
        while let Ok((session_id, control)) = self.control_rx.try_recv() {
            match control {
                SessionControl::Msg(RoomMsg::Leave) => {
                    self.remove_session(&session_id, "left").await;
                }
                SessionControl::Msg(other) => {
                    debug!(session_id = %session_id, ?other, "Unexpected reliable message");
                }
                SessionControl::Closed => {
                    self.remove_session(&session_id, "connection closed").await;
                }
            }
        }
        Ok(())
    }

    fn recv_datagrams(&mut self) -> anyhow::Result<()> {
        let mut buf = vec![0u8; 64 * 1024];
        loop {
            match self.udp.try_recv_from(&mut buf) {
                Ok((n, from)) => {
                    if let Ok(msg) = serde_json::from_slice::<RoomMsg>(&buf[..n]) {
                        self.handle_datagram(from, msg);
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(e).context("udp recv")?,
            }
        }
        Ok(())
    }

    fn handle_datagram(&mut self, from: SocketAddr, msg: RoomMsg) {
        match msg {
            RoomMsg::Ready { session_id } => {
                let Some(session) = self.sessions.get_mut(&session_id) else {
                    return;
                };
                // The datagram's source is ground truth for where patches
                // should go; NAT may rewrite the announced port.
                session.udp_peer = from;
                session.ready = true;
                debug!(session_id = %session_id, "Session ready");
                // Repaint the whole room on the next patch tick so the
                // new peer catches anything sent before it was ready.
                for s in self.sessions.values_mut() {
                    s.dirty = true;
                }
            }
            RoomMsg::MoveTo {
                session_id,
                position,
            } => {
                self.on_move(from, session_id, position);
            }
            other => {
                debug!(?other, "Unexpected datagram");
            }
        }
    }

    fn on_move(&mut self, from: SocketAddr, session_id: SessionId, position: Vec3) {
        if let Some(session) = self.sessions.get_mut(&session_id) {
            session.udp_peer = from;
            session.ready = true;
            // The room owns the bounds; a wild intent lands inside them.
            session.position = clamp_to_playfield(position);
            session.dirty = true;
        }
    }

    /// Sends the latest position of every moved session to every ready
    /// peer, movers included.
    async fn broadcast_patches(&mut self) -> anyhow::Result<()> {
        let mut changed: Vec<(SessionId, Vec3)> = Vec::new();
        for (id, session) in self.sessions.iter_mut() {
            if session.dirty {
                session.dirty = false;
                changed.push((id.clone(), session.position));
            }
        }
        if changed.is_empty() {
            return Ok(());
        }
        changed.sort_by(|a, b| a.0.as_str().cmp(b.0.as_str()));

        for (session_id, position) in changed {
            let msg = RoomMsg::EntityChanged {
                session_id,
                position,
            };
            let payload = serde_json::to_vec(&msg).context("serialize patch")?;
            for session in self.sessions.values() {
                if session.ready {
                    let _ = self.udp.send_to(&payload, session.udp_peer).await;
                }
            }
        }
        Ok(())
    }

    /// Sends a lifecycle message to every connected session, best effort.
    async fn broadcast_reliable(&mut self, msg: &RoomMsg) {
        for session in self.sessions.values_mut() {
            let _ = session.reliable.send(msg).await;
        }
    }

    /// Removes a session: confirms the end to it, then tells everyone
    /// else the entity is gone. Unknown ids are a no-op.
    async fn remove_session(&mut self, session_id: &SessionId, reason: &str) {
        let Some(mut session) = self.sessions.remove(session_id) else {
            return;
        };
        let _ = session
            .reliable
            .send(&RoomMsg::SessionEnded {
                reason: reason.to_string(),
            })
            .await;
        self.broadcast_reliable(&RoomMsg::EntityRemoved {
            session_id: session_id.clone(),
        })
        .await;
        info!(session_id = %session_id, reason = %reason, "Session left");
    }

    /// Ends every session with the given reason.
    pub async fn shutdown(&mut self, reason: &str) {
        let ids: Vec<SessionId> = self.sessions.keys().cloned().collect();
        for id in ids {
            self.remove_session(&id, reason).await;
        }
    }
}

/// Pumps one session's reliable stream into the room's control queue.
async fn pump_session(
    id: SessionId,
    mut conn: ReliableRecv,
    tx: mpsc::UnboundedSender<(SessionId, SessionControl)>,
) {
    loop {
        match conn.recv().await {
            Ok(msg) => {
                if tx.send((id.clone(), SessionControl::Msg(msg))).is_err() {
                    break;
                }
            }
            Err(_) => {
                let _ = tx.send((id.clone(), SessionControl::Closed));
                break;
            }
        }
    }
}

/// Spawn points are scattered over the inner part of the ground plane.
fn random_spawn() -> Vec3 {
    let mut rng = rand::thread_rng();
    Vec3::new(
        rng.gen_range(-GROUND_SIZE / 2.5..GROUND_SIZE / 2.5),
        GROUND_Y,
        rng.gen_range(-GROUND_SIZE / 2.5..GROUND_SIZE / 2.5),
    )
}

/// Helper for tests: bind to an ephemeral port.
pub async fn bind_ephemeral(patch_hz: u32) -> anyhow::Result<(RoomServer, GameConfig)> {
    let cfg = GameConfig {
        server_addr: format!("{}:{}", IpAddr::V4(Ipv4Addr::LOCALHOST), 0),
        patch_hz,
        ..Default::default()
    };

    // Bind TCP first to get an ephemeral port, then bind UDP to that same port.
    let tcp = ReliableListener::bind(cfg.server_addr.parse()?).await?;
    let addr = tcp.local_addr()?;
    let mut cfg = cfg;
    cfg.server_addr = addr.to_string();

    let udp_bind = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), addr.port());
    let udp = UdpSocket::bind(udp_bind).await?;

    let mut console = Console::new();
    RoomServer::register_cvars(&mut console, &cfg);

    let (control_tx, control_rx) = mpsc::unbounded_channel();

    Ok((
        RoomServer {
            cfg: cfg.clone(),
            console,
            sessions: HashMap::new(),
            tcp,
            udp,
            tick: 0,
            console_rx: None,
            control_tx,
            control_rx,
        },
        cfg,
    ))
}
