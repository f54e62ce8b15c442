//! Session transport: a thin, swappable abstraction over a datagram
//! endpoint (spec.md §4.2).
//!
//! `Transport` is deliberately narrow — send, recv-with-deadline, deadline
//! setters, addresses, close — so the sender/receiver loops in `engine`
//! never see a raw socket. `UdpTransport` is the production implementation;
//! `InMemoryTransport` is a channel-backed pipe for deterministic tests.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::time::timeout_at;

use crate::error::TransportError;
use crate::wire::{Packet, error_code};

/// A connected-in-spirit datagram endpoint bound to one remote transfer id.
///
/// Deadlines are absolute instants computed from the caller-provided
/// duration and "now" (spec.md §4.2), armed independently for reads and
/// writes.
pub trait Transport: Send {
    /// Send one datagram to the bound remote endpoint.
    fn send(&mut self, buf: &[u8]) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Read one datagram. Implementations that can observe datagrams from
    /// senders other than the bound remote TID must silently discard them
    /// (optionally replying ERROR(5) to the stray sender) and keep waiting
    /// within the current deadline, per spec.md §3's TID-binding invariant —
    /// unless the TID hasn't been adopted yet (see `set_remote`), in which
    /// case the first datagram observed defines it.
    fn recv(&mut self, buf: &mut [u8]) -> impl Future<Output = Result<usize, TransportError>> + Send;

    fn set_read_deadline(&mut self, from_now: Duration);
    fn set_write_deadline(&mut self, from_now: Duration);

    /// Rebind the TID this transport treats as its session peer. The client
    /// driver constructs a transport pointed at the server's well-known
    /// listen address (to send the opening RRQ/WRQ) but must adopt the
    /// address the server's first reply actually came from — a fresh
    /// ephemeral port distinct from the listener — as the session's real
    /// remote TID (spec.md §3, §9).
    fn set_remote(&mut self, addr: SocketAddr);

    fn local_addr(&self) -> io::Result<SocketAddr>;
    fn remote_addr(&self) -> SocketAddr;

    fn close(&mut self) -> impl Future<Output = io::Result<()>> + Send;
}

/// Production transport: an unconnected UDP socket plus a remembered remote
/// address. Kept unconnected (rather than `UdpSocket::connect`-ed, as the
/// teacher's server does for MTU-probing purposes unrelated to this) so the
/// transport itself can observe and reject foreign-TID datagrams instead of
/// relying on kernel-level connected-socket filtering.
pub struct UdpTransport {
    socket: UdpSocket,
    remote: SocketAddr,
    /// Whether `remote` is the confirmed session TID yet. False right after
    /// a client dials the server's well-known listen address — `remote` is
    /// still just where the opening RRQ/WRQ was sent, not the ephemeral TID
    /// the server will actually reply from. `recv` adopts the first
    /// datagram's source as `remote` and flips this to true (spec.md §3).
    tid_locked: bool,
    read_deadline: Option<Instant>,
    write_deadline: Option<Instant>,
}

impl UdpTransport {
    pub fn new(socket: UdpSocket, remote: SocketAddr) -> Self {
        Self { socket, remote, tid_locked: true, read_deadline: None, write_deadline: None }
    }

    /// Bind a fresh ephemeral socket and target it at `remote`. This is
    /// what gives the server and client their per-session TID (spec.md §9).
    pub async fn bind_ephemeral(remote: SocketAddr) -> io::Result<Self> {
        let bind_addr: SocketAddr = if remote.is_ipv6() { "[::]:0".parse().unwrap() } else { "0.0.0.0:0".parse().unwrap() };
        let socket = bind_reuseport(bind_addr)?;
        Ok(Self::new(socket, remote))
    }

    /// Mark `remote` as not-yet-confirmed: the next successful `recv` adopts
    /// its source address as the session TID instead of requiring it to
    /// match `remote` up front. Used by the client driver, which only knows
    /// the server's listen address until the first reply arrives from the
    /// server's actual per-session ephemeral port (spec.md §3, §9). The
    /// server side never needs this — the first packet it sees on a fresh
    /// ephemeral socket is, by construction, from the peer that opened the
    /// session.
    pub fn with_pending_tid(mut self) -> Self {
        self.tid_locked = false;
        self
    }
}

/// Bind a UDP socket with `SO_REUSEPORT` set, so multiple dispatcher
/// instances can share a listen port (spec.md §4.5). Built via `socket2`
/// then handed to tokio, the same conversion dance the teacher used for its
/// (now-removed) MTU probing.
pub fn bind_reuseport(addr: SocketAddr) -> io::Result<UdpSocket> {
    let domain = if addr.is_ipv6() { socket2::Domain::IPV6 } else { socket2::Domain::IPV4 };
    let raw = socket2::Socket::new(domain, socket2::Type::DGRAM, Some(socket2::Protocol::UDP))?;
    let _ = raw.set_reuse_address(true);
    #[cfg(unix)]
    let _ = raw.set_reuse_port(true);
    raw.set_nonblocking(true)?;
    raw.bind(&addr.into())?;
    let std_sock: std::net::UdpSocket = raw.into();
    UdpSocket::from_std(std_sock)
}

impl Transport for UdpTransport {
    async fn send(&mut self, buf: &[u8]) -> Result<(), TransportError> {
        let deadline = self.write_deadline.take().ok_or_else(|| {
            TransportError::ClockError(io::Error::other("write deadline not armed"))
        })?;
        match timeout_at(deadline.into(), self.socket.send_to(buf, self.remote)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(TransportError::Io(e)),
            Err(_) => Err(TransportError::Timeout),
        }
    }

    async fn recv(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        let deadline = self.read_deadline.take().ok_or_else(|| {
            TransportError::ClockError(io::Error::other("read deadline not armed"))
        })?;
        loop {
            let (n, from) = match timeout_at(deadline.into(), self.socket.recv_from(buf)).await {
                Ok(Ok(pair)) => pair,
                Ok(Err(e)) => return Err(TransportError::Io(e)),
                Err(_) => return Err(TransportError::Timeout),
            };
            if !self.tid_locked {
                // First reply on this session defines its TID (spec.md §3).
                self.set_remote(from);
                return Ok(n);
            }
            if from == self.remote {
                return Ok(n);
            }
            // Foreign sender: not part of this session's TID. Reply
            // ERROR(5) best-effort and keep waiting on the same deadline.
            if let Ok(reply) = (Packet::Error {
                code: error_code::UNKNOWN_TID,
                msg: "unknown transfer id".into(),
            })
            .encode()
            {
                let _ = self.socket.send_to(&reply, from).await;
            }
        }
    }

    fn set_read_deadline(&mut self, from_now: Duration) {
        self.read_deadline = Some(Instant::now() + from_now);
    }

    fn set_write_deadline(&mut self, from_now: Duration) {
        self.write_deadline = Some(Instant::now() + from_now);
    }

    fn set_remote(&mut self, addr: SocketAddr) {
        self.remote = addr;
        self.tid_locked = true;
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    fn remote_addr(&self) -> SocketAddr {
        self.remote
    }

    async fn close(&mut self) -> io::Result<()> {
        // Dropping the socket is sufficient; nothing to flush for UDP.
        Ok(())
    }
}

/// One end of an in-memory datagram pipe, for deterministic engine tests
/// without touching a real socket. Each end has its own inbound channel;
/// sending on one end delivers to the other's inbound channel.
pub struct InMemoryTransport {
    tx: mpsc::UnboundedSender<Vec<u8>>,
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
    local: SocketAddr,
    remote: SocketAddr,
    read_deadline: Option<Instant>,
    write_deadline: Option<Instant>,
}

impl InMemoryTransport {
    /// Build a connected pair: `(a, b)`, where sending on `a` is received by
    /// `b` and vice versa.
    pub fn pair(addr_a: SocketAddr, addr_b: SocketAddr) -> (Self, Self) {
        let (tx_ab, rx_ab) = mpsc::unbounded_channel();
        let (tx_ba, rx_ba) = mpsc::unbounded_channel();
        let a = InMemoryTransport {
            tx: tx_ab,
            rx: rx_ba,
            local: addr_a,
            remote: addr_b,
            read_deadline: None,
            write_deadline: None,
        };
        let b = InMemoryTransport {
            tx: tx_ba,
            rx: rx_ab,
            local: addr_b,
            remote: addr_a,
            read_deadline: None,
            write_deadline: None,
        };
        (a, b)
    }
}

impl Transport for InMemoryTransport {
    async fn send(&mut self, buf: &[u8]) -> Result<(), TransportError> {
        let deadline = self.write_deadline.take().ok_or_else(|| {
            TransportError::ClockError(io::Error::other("write deadline not armed"))
        })?;
        if Instant::now() > deadline {
            return Err(TransportError::Timeout);
        }
        self.tx
            .send(buf.to_vec())
            .map_err(|_| TransportError::Io(io::Error::other("peer end closed")))
    }

    async fn recv(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        let deadline = self.read_deadline.take().ok_or_else(|| {
            TransportError::ClockError(io::Error::other("read deadline not armed"))
        })?;
        match timeout_at(deadline.into(), self.rx.recv()).await {
            Ok(Some(datagram)) => {
                let n = datagram.len().min(buf.len());
                buf[..n].copy_from_slice(&datagram[..n]);
                Ok(n)
            }
            Ok(None) => Err(TransportError::Io(io::Error::other("peer end closed"))),
            Err(_) => Err(TransportError::Timeout),
        }
    }

    fn set_read_deadline(&mut self, from_now: Duration) {
        self.read_deadline = Some(Instant::now() + from_now);
    }

    fn set_write_deadline(&mut self, from_now: Duration) {
        self.write_deadline = Some(Instant::now() + from_now);
    }

    fn set_remote(&mut self, addr: SocketAddr) {
        self.remote = addr;
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        Ok(self.local)
    }

    fn remote_addr(&self) -> SocketAddr {
        self.remote
    }

    async fn close(&mut self) -> io::Result<()> {
        self.rx.close();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::Kind;
    use std::time::Duration;

    // spec.md §8.1 property 6: a session with remote TID T discards any
    // datagram whose source is not T and replies ERROR(5) to it, without
    // ever surfacing it as that session's traffic.
    #[tokio::test]
    async fn udp_transport_discards_foreign_sender_and_replies_unknown_tid() {
        let session_sock = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let legit_sock = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let stray_sock = UdpSocket::bind("127.0.0.1:0").await.unwrap();

        let session_addr = session_sock.local_addr().unwrap();
        let legit_addr = legit_sock.local_addr().unwrap();

        let mut transport = UdpTransport::new(session_sock, legit_addr);

        // Stray sender fires first.
        stray_sock.send_to(b"not part of this session", session_addr).await.unwrap();
        // Legit sender fires second, carrying the datagram that should win.
        let legit_pkt = Packet::Ack { block_num: 1 }.encode().unwrap();
        legit_sock.send_to(&legit_pkt, session_addr).await.unwrap();

        transport.set_read_deadline(Duration::from_secs(2));
        let mut buf = vec![0u8; 64];
        let n = transport.recv(&mut buf).await.unwrap();
        assert_eq!(Packet::decode_as(Kind::Ack, &buf[..n]).unwrap(), Packet::Ack { block_num: 1 });

        // The stray sender should have received an ERROR(5) reply.
        let mut reply_buf = vec![0u8; 64];
        let (n, _) = tokio::time::timeout(Duration::from_secs(2), stray_sock.recv_from(&mut reply_buf))
            .await
            .unwrap()
            .unwrap();
        match Packet::decode_as(Kind::Error, &reply_buf[..n]).unwrap() {
            Packet::Error { code, .. } => assert_eq!(code, crate::wire::error_code::UNKNOWN_TID),
            _ => unreachable!(),
        }
    }
}
