//! Client implementation.
//!
//! The client maintains:
//! - A reliable control stream (handshake + entity lifecycle + teardown)
//! - An unreliable datagram socket (position traffic)
//! - The entity registry of everyone in the room
//! - The interpolation scheduler that animates them
//! - Console for user commands
//!
//! Both sockets are pumped by background tasks into a single event queue.
//! The render loop drains that queue at the top of every frame via
//! [`GameClient::before_render`], so handling stays synchronous and the
//! frame never blocks on the network.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use playground_shared::{
    config::GameConfig,
    console::{Console, CvarFlags, CvarValue},
    math::Vec3,
    net::{
        ReliableConn, ReliableRecv, ReliableSend, RoomMsg, SessionId, UnreliableConn,
        PROTOCOL_VERSION,
    },
    scene::SceneBackend,
};
use tokio::{net::TcpStream, sync::mpsc};
use tracing::{debug, info, warn};

use crate::{
    input::build_move,
    interp::{InterpScheduler, Smoothing},
    registry::{EntityRegistry, RegistryError},
};

/// Client connection state.
///
/// A client is only ever handed out fully joined; `connect` either
/// returns an `InRoom` client or an error, so there is no observable
/// disconnected or handshake state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientState {
    /// Joined a room; entities flow.
    InRoom,
    /// The session is over. Entities are gone; see `end_reason`.
    Left,
}

/// High-level game client.
pub struct GameClient {
    pub session_id: SessionId,
    /// Room name the server put us in, for display.
    pub room: String,
    pub state: ClientState,
    pub console: Console,

    pub registry: EntityRegistry,
    pub scheduler: InterpScheduler,

    reliable: ReliableSend,
    udp: Arc<UnreliableConn>,
    events: mpsc::UnboundedReceiver<RoomMsg>,
    end_reason: Option<String>,
}

impl GameClient {
    /// Connects to a server, performs the handshake and joins its room.
    pub async fn connect(cfg: &GameConfig) -> anyhow::Result<Self> {
        let server_addr: SocketAddr = cfg.server_addr.parse().context("parse server_addr")?;

        info!(server = %server_addr, "Connecting to server");

        // Bind UDP first so we can tell the server where to send patches.
        let bind = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0);
        let udp = UnreliableConn::connect(bind, server_addr).await?;
        let client_udp_port = udp.local_addr().context("udp local_addr")?.port();

        let stream = TcpStream::connect(server_addr)
            .await
            .context("tcp connect")?;
        let mut reliable = ReliableConn::new(stream);

        reliable
            .send(&RoomMsg::Hello {
                protocol: PROTOCOL_VERSION,
            })
            .await?;

        reliable.send(&RoomMsg::UdpHello { client_udp_port }).await?;

        let welcome = reliable.recv().await?;
        let (session_id, room) = match welcome {
            RoomMsg::Welcome { session_id, room } => (session_id, room),
            other => anyhow::bail!("expected Welcome, got {other:?}"),
        };

        info!(session_id = %session_id, room = %room, "Joined room");

        let mut console = Console::new();
        Self::register_cvars(&mut console, cfg);

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (reliable_rx, reliable_tx) = reliable.into_split();
        tokio::spawn(pump_reliable(reliable_rx, events_tx.clone()));

        let udp = Arc::new(udp);
        tokio::spawn(pump_datagrams(udp.clone(), events_tx));

        // Unlocks position traffic for this session.
        udp.send(&RoomMsg::Ready {
            session_id: session_id.clone(),
        })
        .await?;

        Ok(Self {
            session_id,
            room,
            state: ClientState::InRoom,
            console,
            registry: EntityRegistry::new(),
            scheduler: InterpScheduler::per_frame(cfg.interp_alpha),
            reliable: reliable_tx,
            udp,
            events: events_rx,
            end_reason: None,
        })
    }

    fn register_cvars(console: &mut Console, cfg: &GameConfig) {
        console.register_cvar(
            "cl_interp_alpha",
            CvarValue::Float(cfg.interp_alpha as f64),
            "Fraction of remaining distance closed per frame",
            CvarFlags::ARCHIVE,
        );
        console.register_cvar(
            "cl_name",
            CvarValue::String(cfg.player_name.clone()),
            "Player display name",
            CvarFlags::ARCHIVE,
        );
    }

    /// Why the session ended, once `state` is [`ClientState::Left`].
    pub fn end_reason(&self) -> Option<&str> {
        self.end_reason.as_deref()
    }

    /// Per-frame hook. The render loop calls this exactly once before
    /// drawing each frame: pending room events are drained and applied,
    /// then every entity advances toward its target. Never blocks.
    pub fn before_render(&mut self, scene: &mut dyn SceneBackend, dt: Duration) {
        while let Ok(msg) = self.events.try_recv() {
            if self.state == ClientState::Left {
                // Stragglers after teardown are dropped unseen.
                break;
            }
            self.apply_room_msg(scene, msg);
        }
        self.scheduler.tick(&mut self.registry, scene, dt);
    }

    fn apply_room_msg(&mut self, scene: &mut dyn SceneBackend, msg: RoomMsg) {
        match msg {
            RoomMsg::EntityAdded {
                session_id,
                position,
            } => match self.registry.on_entity_join(scene, session_id.clone(), position) {
                Ok(()) => {
                    info!(session_id = %session_id, "Entity joined");
                }
                Err(RegistryError::DuplicateEntity) => {
                    warn!(session_id = %session_id, "Duplicate join ignored");
                }
                Err(_) => {}
            },
            RoomMsg::EntityChanged {
                session_id,
                position,
            } => {
                if self.registry.on_entity_change(&session_id, position).is_err() {
                    // Normal when a removal overtook in-flight datagrams.
                    debug!(session_id = %session_id, "Update for unknown entity dropped");
                }
            }
            RoomMsg::EntityRemoved { session_id } => {
                self.registry.on_entity_leave(scene, &session_id);
                info!(session_id = %session_id, "Entity left");
            }
            RoomMsg::SessionEnded { reason } => {
                info!(reason = %reason, "Session ended");
                self.registry.dispose_all(scene);
                self.state = ClientState::Left;
                self.end_reason = Some(reason);
            }
            other => {
                debug!(?other, "Unhandled room message");
            }
        }
    }

    /// Sends a move intent for our own entity. The target is clamped to
    /// the playfield and our own entity retargets immediately; the server
    /// echo converges everyone else to the same point.
    pub async fn move_to(&mut self, picked: Vec3) -> anyhow::Result<()> {
        anyhow::ensure!(self.state == ClientState::InRoom, "not in a room");
        let msg = build_move(self.session_id.clone(), picked);
        if let RoomMsg::MoveTo { position, .. } = &msg {
            let _ = self.registry.on_entity_change(&self.session_id, *position);
        }
        self.udp.send(&msg).await
    }

    /// Requests a voluntary leave. The server answers with a session end,
    /// which tears the entities down on a later frame.
    pub async fn leave(&mut self) -> anyhow::Result<()> {
        if self.state != ClientState::InRoom {
            return Ok(());
        }
        self.reliable.send(&RoomMsg::Leave).await?;
        info!(session_id = %self.session_id, "Leave requested");
        Ok(())
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
                out.push(format!("State: {:?}", self.state));
                out.push(format!("Session: {}", self.session_id));
                out.push(format!("Room: {}", self.room));
                if let Some(CvarValue::String(name)) = self.console.get_cvar("cl_name") {
                    out.push(format!("Name: {name}"));
                }
                out.push(format!("Entities: {}", self.registry.len()));
                let mut lines = Vec::new();
                self.registry.for_each_live_entity(|id, entity| {
                    lines.push(format!(
                        "  {} at ({:.1}, {:.1}, {:.1}) -> ({:.1}, {:.1}, {:.1})",
                        id,
                        entity.current.x,
                        entity.current.y,
                        entity.current.z,
                        entity.target.x,
                        entity.target.y,
                        entity.target.z,
                    ));
                });
                lines.sort();
                out.extend(lines);
                Ok(out)
            }
            "move" => {
                if tokens.len() < 3 {
                    return Ok(vec!["Usage: move <x> <z>".to_string()]);
                }
                let x: f32 = tokens[1].parse().context("parse x")?;
                let z: f32 = tokens[2].parse().context("parse z")?;
                let picked = Vec3::new(x, 0.0, z);
                match self.move_to(picked).await {
                    Ok(()) => Ok(vec![format!("Moving to ({x:.1}, {z:.1})")]),
                    Err(e) => Ok(vec![format!("Move failed: {e}")]),
                }
            }
            "leave" => {
                self.leave().await?;
                Ok(vec!["Leaving room".to_string()])
            }
            "quit" | "exit" => {
                std::process::exit(0);
            }
            _ => {
                // Delegate to console system.
                let out = self.console.exec(line);
                self.refresh_smoothing();
                out
            }
        }
    }

    /// Re-reads tunables the console may have changed.
    fn refresh_smoothing(&mut self) {
        if let Smoothing::PerFrame { .. } = self.scheduler.smoothing() {
            if let Some(alpha) = self
                .console
                .get_cvar("cl_interp_alpha")
                .and_then(|v| v.as_float())
            {
                self.scheduler
                    .set_smoothing(Smoothing::PerFrame { alpha: alpha as f32 });
            }
        }
    }
}

/// Pumps the reliable stream into the event queue. Transport loss counts
/// as the session ending.
async fn pump_reliable(mut conn: ReliableRecv, tx: mpsc::UnboundedSender<RoomMsg>) {
    loop {
        match conn.recv().await {
            Ok(msg) => {
                let ended = matches!(msg, RoomMsg::SessionEnded { .. });
                if tx.send(msg).is_err() || ended {
                    break;
                }
            }
            Err(e) => {
                debug!(error = %e, "Reliable stream closed");
                let _ = tx.send(RoomMsg::SessionEnded {
                    reason: "connection lost".to_string(),
                });
                break;
            }
        }
    }
}

/// Pumps position datagrams into the event queue.
async fn pump_datagrams(udp: Arc<UnreliableConn>, tx: mpsc::UnboundedSender<RoomMsg>) {
    loop {
        match udp.recv().await {
            Ok(msg) => {
                if tx.send(msg).is_err() {
                    break;
                }
            }
            Err(e) => {
                if tx.is_closed() {
                    break;
                }
                debug!(error = %e, "Datagram receive failed");
            }
        }
    }
}
