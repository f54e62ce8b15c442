//! Client driver: resolves the remote, opens an ephemeral socket, and runs
//! the symmetric sender/receiver loop (spec.md §4.6). Grounded in
//! `original_source/pkg/client/client.go`'s `Connect`/`Get`/`Put`, translated
//! from its goroutine-plus-channel-plus-context-deadline shape into the
//! teacher's tokio idiom.

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use thiserror::Error;
use tokio::net::lookup_host;

use crate::engine::{self, SessionOptions, SessionOutcome};
use crate::error::SessionError;
use crate::transport::UdpTransport;
use crate::wire::{DATAGRAM_BUF, Packet};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("not connected; use `connect <host> <port>` first")]
    NotConnected,
    #[error("failed to resolve {addr}: {source}")]
    Resolve { addr: String, source: std::io::Error },
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Wire(#[from] crate::wire::WireError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// One client instance. Remote endpoint and per-transfer knobs are held as
/// plain fields on this struct — never process-global state — so the REPL
/// can mutate them via `connect`/`timeout`/`trace` without threading a
/// parallel set of arguments through every call (spec.md §9).
pub struct Client {
    remote: Option<SocketAddr>,
    opts: SessionOptions,
}

impl Default for Client {
    fn default() -> Self {
        Self { remote: None, opts: SessionOptions::default() }
    }
}

impl Client {
    pub fn new(opts: SessionOptions) -> Self {
        Self { remote: None, opts }
    }

    pub fn is_connected(&self) -> bool {
        self.remote.is_some()
    }

    pub fn remote(&self) -> Option<SocketAddr> {
        self.remote
    }

    pub fn set_timeout(&mut self, secs: u64) {
        let d = Duration::from_secs(secs);
        self.opts.read_timeout = d;
        self.opts.write_timeout = d;
    }

    pub fn toggle_trace(&mut self) -> bool {
        self.opts.trace = !self.opts.trace;
        self.opts.trace
    }

    pub fn trace(&self) -> bool {
        self.opts.trace
    }

    /// Resolve `host:port` and record it as the remote endpoint for
    /// subsequent `get`/`put` calls.
    pub async fn connect(&mut self, host: &str, port: u16) -> Result<(), ClientError> {
        let addr_str = format!("{host}:{port}");
        let mut addrs = lookup_host(&addr_str)
            .await
            .map_err(|source| ClientError::Resolve { addr: addr_str.clone(), source })?;
        let addr = addrs
            .next()
            .ok_or_else(|| ClientError::Resolve { addr: addr_str, source: std::io::Error::other("no addresses") })?;
        self.remote = Some(addr);
        Ok(())
    }

    /// RRQ: download `filename` from the connected remote to `dest`.
    /// `dest` MUST NOT already exist (symmetric to the server's WRQ policy,
    /// spec.md §9's open question on this point).
    pub async fn get(&self, filename: &str, dest: &Path) -> Result<SessionOutcome, ClientError> {
        let remote = self.remote.ok_or(ClientError::NotConnected)?;

        // Fail on the local precondition before ever talking to the
        // network, so a pre-existing destination never results in an
        // orphaned RRQ sent to the server.
        let mut file = tokio::fs::OpenOptions::new().write(true).create_new(true).open(dest).await?;

        // `remote` is still the server's well-known listen address; the
        // server will actually answer from a fresh ephemeral TID, which the
        // first successful `recv` below adopts (spec.md §3, §9).
        let mut transport = UdpTransport::bind_ephemeral(remote).await?.with_pending_tid();
        let req = Packet::Rrq { filename: filename.to_string(), mode: "octet".into() }.encode()?;
        transport.set_write_deadline(self.opts.write_timeout);
        engine::send_raw(&mut transport, &req).await?;

        match engine::receive(&mut transport, &mut file, &self.opts).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                drop(file);
                let _ = tokio::fs::remove_file(dest).await;
                Err(e.into())
            }
        }
    }

    /// WRQ: upload local `source` to `filename` on the connected remote.
    /// Pre-reads the server's ACK(0) before streaming data, mirroring
    /// `client.go`'s `execute` for the `put` branch.
    pub async fn put(&self, filename: &str, source: &Path) -> Result<SessionOutcome, ClientError> {
        let remote = self.remote.ok_or(ClientError::NotConnected)?;
        // Same TID-adoption caveat as `get`: the server's ACK(0) (or
        // ERROR) comes from its per-session ephemeral port, not the
        // well-known listen address `remote` points at right now.
        let mut transport = UdpTransport::bind_ephemeral(remote).await?.with_pending_tid();

        let req = Packet::Wrq { filename: filename.to_string(), mode: "octet".into() }.encode()?;
        transport.set_write_deadline(self.opts.write_timeout);
        engine::send_raw(&mut transport, &req).await?;

        let mut buf = vec![0u8; DATAGRAM_BUF];
        transport.set_read_deadline(self.opts.read_timeout);
        let n = engine::recv_raw(&mut transport, &mut buf).await?;
        match Packet::decode_any(&buf[..n])? {
            Packet::Ack { block_num: 0 } => {}
            Packet::Ack { block_num } => {
                return Err(SessionError::PeerError {
                    code: 0,
                    msg: format!("expected ACK(0) but got ACK({block_num})"),
                }
                .into());
            }
            Packet::Error { code, msg } => return Err(SessionError::PeerError { code, msg }.into()),
            _ => return Err(SessionError::Wire(crate::wire::WireError::Malformed).into()),
        }

        let mut file = tokio::fs::File::open(source).await?;
        let outcome = engine::send(&mut transport, &mut file, &self.opts).await?;
        Ok(outcome)
    }
}
