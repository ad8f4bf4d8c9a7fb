//! Room wire protocol and transport channels.
//!
//! Goals:
//! - Provide a simple reliable (TCP) and unreliable (UDP) channel.
//! - Provide the room lifecycle and position messages exchanged by
//!   client and server.
//! - Keep serialization explicit and versionable.
//!
//! Channel assignment: entity lifecycle (`EntityAdded`, `EntityRemoved`,
//! `SessionEnded`) rides the reliable channel; high-churn position traffic
//! (`EntityChanged`, `MoveTo`) rides datagrams and may be dropped or arrive
//! after a reliable removal. Consumers must tolerate that ordering.

use anyhow::Context;
use bytes::{BufMut, Bytes, BytesMut};
use rand::{distributions::Alphanumeric, Rng};
use serde::{Deserialize, Serialize};
use std::{fmt, net::SocketAddr};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpListener, TcpStream, UdpSocket,
    },
    time,
};

use crate::math::Vec3;

/// Protocol version for compatibility checks.
pub const PROTOCOL_VERSION: u32 = 1;

/// Upper bound on a frame/datagram. Anything larger is a corrupt or
/// hostile length prefix.
const MAX_FRAME_LEN: usize = 64 * 1024;

/// Opaque session identifier, assigned by the server at join time.
///
/// Ids are short random tokens. After a session leaves, its id may be
/// handed out again to an unrelated future join.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(String);

impl SessionId {
    /// Length of generated ids.
    pub const LEN: usize = 9;

    /// Generates a fresh random id.
    pub fn generate() -> Self {
        let token: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(Self::LEN)
            .map(char::from)
            .collect();
        SessionId(token)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        SessionId(s.to_string())
    }
}

impl From<String> for SessionId {
    fn from(s: String) -> Self {
        SessionId(s)
    }
}

/// High-level message envelope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum RoomMsg {
    // ─── Connection handshake ───
    Hello {
        protocol: u32,
    },
    /// Client announces its UDP port to the server.
    UdpHello {
        client_udp_port: u16,
    },
    /// Server assigns the session id and names the room being joined.
    Welcome {
        session_id: SessionId,
        room: String,
    },
    /// Client confirms it is set up; unlocks position datagrams for it.
    Ready {
        session_id: SessionId,
    },

    // ─── Entity lifecycle (reliable) ───
    /// A session joined the room at the given position.
    EntityAdded {
        session_id: SessionId,
        position: Vec3,
    },
    /// A session left the room.
    EntityRemoved {
        session_id: SessionId,
    },

    // ─── Position plane (unreliable) ───
    /// Server -> client: a session's latest reported position.
    EntityChanged {
        session_id: SessionId,
        position: Vec3,
    },
    /// Client -> server: request to move toward a target point.
    MoveTo {
        session_id: SessionId,
        position: Vec3,
    },

    // ─── Session teardown (reliable) ───
    /// Client -> server: voluntary leave.
    Leave,
    /// Server -> client: the session is over; discard all entities.
    SessionEnded {
        reason: String,
    },
}

/// Writes one length-prefixed frame.
async fn write_frame<W>(w: &mut W, msg: &RoomMsg) -> anyhow::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let payload = serde_json::to_vec(msg).context("serialize msg")?;
    let mut buf = BytesMut::with_capacity(4 + payload.len());
    buf.put_u32(payload.len() as u32);
    buf.extend_from_slice(&payload);
    w.write_all(&buf).await.context("tcp write")?;
    Ok(())
}

/// Reads one length-prefixed frame.
async fn read_frame<R>(r: &mut R) -> anyhow::Result<RoomMsg>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    r.read_exact(&mut len_buf).await.context("tcp read len")?;
    let len = u32::from_be_bytes(len_buf) as usize;
    anyhow::ensure!(len <= MAX_FRAME_LEN, "frame too large: {len} bytes");
    let mut payload = vec![0u8; len];
    r.read_exact(&mut payload).await.context("tcp read payload")?;
    let msg = serde_json::from_slice(&payload).context("deserialize msg")?;
    Ok(msg)
}

/// Reliable connection over TCP with length-prefixed frames.
#[derive(Debug)]
pub struct ReliableConn {
    stream: TcpStream,
}

impl ReliableConn {
    pub fn new(stream: TcpStream) -> Self {
        Self { stream }
    }

    pub async fn send(&mut self, msg: &RoomMsg) -> anyhow::Result<()> {
        write_frame(&mut self.stream, msg).await
    }

    pub async fn recv(&mut self) -> anyhow::Result<RoomMsg> {
        read_frame(&mut self.stream).await
    }

    pub fn peer_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.stream.peer_addr()?)
    }

    /// Splits into independently owned halves, so a reader task can pump
    /// incoming messages while the owner keeps the send side.
    pub fn into_split(self) -> (ReliableRecv, ReliableSend) {
        let (read, write) = self.stream.into_split();
        (ReliableRecv { read }, ReliableSend { write })
    }
}

/// Read half of a split [`ReliableConn`].
#[derive(Debug)]
pub struct ReliableRecv {
    read: OwnedReadHalf,
}

impl ReliableRecv {
    pub async fn recv(&mut self) -> anyhow::Result<RoomMsg> {
        read_frame(&mut self.read).await
    }
}

/// Write half of a split [`ReliableConn`].
#[derive(Debug)]
pub struct ReliableSend {
    write: OwnedWriteHalf,
}

impl ReliableSend {
    pub async fn send(&mut self, msg: &RoomMsg) -> anyhow::Result<()> {
        write_frame(&mut self.write, msg).await
    }
}

/// Unreliable channel over UDP.
#[derive(Debug)]
pub struct UnreliableConn {
    socket: UdpSocket,
    peer: SocketAddr,
}

impl UnreliableConn {
    pub async fn connect(bind_addr: SocketAddr, peer: SocketAddr) -> anyhow::Result<Self> {
        let socket = UdpSocket::bind(bind_addr).await.context("udp bind")?;
        socket.connect(peer).await.context("udp connect")?;
        Ok(Self { socket, peer })
    }

    pub async fn send(&self, msg: &RoomMsg) -> anyhow::Result<()> {
        let payload = serde_json::to_vec(msg).context("serialize udp msg")?;
        self.socket.send(&payload).await.context("udp send")?;
        Ok(())
    }

    pub async fn recv(&self) -> anyhow::Result<RoomMsg> {
        let mut buf = vec![0u8; MAX_FRAME_LEN];
        let n = self.socket.recv(&mut buf).await.context("udp recv")?;
        let msg = serde_json::from_slice(&buf[..n]).context("deserialize udp msg")?;
        Ok(msg)
    }

    /// Receives a datagram within the given timeout.
    pub async fn recv_timeout(
        &self,
        timeout: std::time::Duration,
    ) -> anyhow::Result<Option<RoomMsg>> {
        let mut buf = vec![0u8; MAX_FRAME_LEN];
        match time::timeout(timeout, self.socket.recv(&mut buf)).await {
            Ok(Ok(n)) => {
                let msg = serde_json::from_slice(&buf[..n]).context("deserialize udp msg")?;
                Ok(Some(msg))
            }
            Ok(Err(e)) => Err(e).context("udp recv")?,
            Err(_) => Ok(None),
        }
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }
}

/// TCP server listener.
pub struct ReliableListener {
    listener: TcpListener,
}

impl ReliableListener {
    pub async fn bind(addr: SocketAddr) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(addr).await.context("tcp bind")?;
        Ok(Self { listener })
    }

    pub async fn accept(&self) -> anyhow::Result<(ReliableConn, SocketAddr)> {
        let (stream, addr) = self.listener.accept().await.context("tcp accept")?;
        Ok((ReliableConn::new(stream), addr))
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }
}

/// Convenience codec helpers.
pub fn encode_to_bytes(msg: &RoomMsg) -> anyhow::Result<Bytes> {
    let payload = serde_json::to_vec(msg).context("serialize")?;
    Ok(Bytes::from(payload))
}

pub fn decode_from_bytes(b: &[u8]) -> anyhow::Result<RoomMsg> {
    serde_json::from_slice(b).context("deserialize")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roommsg_roundtrip_bytes() {
        let msg = RoomMsg::EntityAdded {
            session_id: SessionId::from("abc123XYZ"),
            position: Vec3::new(12.0, -1.0, 34.0),
        };
        let bytes = encode_to_bytes(&msg).unwrap();
        let back = decode_from_bytes(&bytes).unwrap();
        assert_eq!(msg, back);
    }

    #[test]
    fn session_id_generate_shape() {
        let id = SessionId::generate();
        assert_eq!(id.as_str().len(), SessionId::LEN);
        assert!(id.as_str().chars().all(|c| c.is_ascii_alphanumeric()));
    }
}
