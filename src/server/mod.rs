//! Server dispatcher: listens on one well-known socket for RRQ/WRQ, hands
//! each session off to a fresh ephemeral socket, and streams the file
//! through the shared sender/receiver loops in `crate::engine`. Grounded in
//! the teacher's `server.rs` dispatch loop, with option negotiation
//! (blksize/tsize/OACK) removed — spec.md's Non-goals exclude it.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result, anyhow};
use tokio::sync::mpsc;

use crate::config::ServerConfig;
use crate::engine::{self, SessionOptions};
use crate::error::{FsError, SessionError};
use crate::transport::{UdpTransport, bind_reuseport};
use crate::wire::{Packet, error_code};

pub mod ui;

/// Direction of a transfer, for the dashboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferKind {
    Download, // RRQ: client is downloading from us
    Upload,   // WRQ: client is uploading to us
}

/// A snapshot of a running transfer, suitable for display.
#[derive(Debug, Clone)]
pub struct TransferInfo {
    pub id: u64,
    pub peer: std::net::SocketAddr,
    pub filename: String,
    pub kind: TransferKind,
    pub total_bytes: u64,
    pub transferred: u64,
    pub started: Instant,
    pub size_known: bool,
}

/// Events emitted by the dispatcher for the TUI / plain logger.
#[derive(Debug, Clone)]
pub enum ServerEvent {
    Log(String),
    TransferStarted(TransferInfo),
    TransferProgress { id: u64, transferred: u64, total_bytes: u64 },
    TransferComplete(u64),
    TransferFailed { id: u64, error: String },
}

/// Run the TFTP server. Returns once `shutdown` fires.
pub async fn run(
    config: Arc<ServerConfig>,
    dir: PathBuf,
    tx: mpsc::UnboundedSender<ServerEvent>,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) -> Result<()> {
    let addr: std::net::SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    let sock = bind_reuseport(addr).context("binding listener socket")?;
    tx.send(ServerEvent::Log(format!("Listening on {addr}")))?;

    let dir = Arc::new(dir);
    let mut buf = vec![0u8; crate::wire::DATAGRAM_BUF];
    let mut next_id: u64 = 1;

    loop {
        tokio::select! {
            result = sock.recv_from(&mut buf) => {
                let (n, peer) = result?;
                let pkt = match Packet::decode_any(&buf[..n]) {
                    Ok(p) => p,
                    Err(e) => {
                        let _ = tx.send(ServerEvent::Log(format!("{peer}: bad packet: {e}")));
                        continue;
                    }
                };

                match pkt {
                    Packet::Rrq { filename, mode } => {
                        if !mode.eq_ignore_ascii_case("octet") {
                            reject_unsupported_mode(&sock, peer, &mode).await;
                            let _ = tx.send(ServerEvent::Log(format!(
                                "{peer}: RRQ \"{filename}\" rejected: unsupported mode \"{mode}\""
                            )));
                            continue;
                        }
                        let id = next_id;
                        next_id += 1;
                        let tx2 = tx.clone();
                        let dir2 = Arc::clone(&dir);
                        let opts = config.session_options();
                        tokio::spawn(async move {
                            if let Err(e) = handle_rrq(id, peer, &filename, &dir2, &opts, tx2.clone()).await {
                                report_failure(&tx2, id, peer, "RRQ", &e);
                            }
                        });
                    }
                    Packet::Wrq { filename, mode } => {
                        if !mode.eq_ignore_ascii_case("octet") {
                            reject_unsupported_mode(&sock, peer, &mode).await;
                            let _ = tx.send(ServerEvent::Log(format!(
                                "{peer}: WRQ \"{filename}\" rejected: unsupported mode \"{mode}\""
                            )));
                            continue;
                        }
                        let id = next_id;
                        next_id += 1;
                        let tx2 = tx.clone();
                        let dir2 = Arc::clone(&dir);
                        let opts = config.session_options();
                        tokio::spawn(async move {
                            if let Err(e) = handle_wrq(id, peer, &filename, &dir2, &opts, tx2.clone()).await {
                                report_failure(&tx2, id, peer, "WRQ", &e);
                            }
                        });
                    }
                    other => {
                        let _ = tx.send(ServerEvent::Log(format!(
                            "{peer}: unexpected packet on listener: {other:?}"
                        )));
                    }
                }
            }
            _ = shutdown.changed() => {
                tx.send(ServerEvent::Log("Shutting down".into()))?;
                break;
            }
        }
    }
    Ok(())
}

fn report_failure(tx: &mpsc::UnboundedSender<ServerEvent>, id: u64, peer: std::net::SocketAddr, kind: &str, e: &SessionError) {
    let _ = tx.send(ServerEvent::TransferFailed { id, error: e.to_string() });
    let _ = tx.send(ServerEvent::Log(format!("{peer}: {kind} error: {e}")));
}

/// Reject an opening RRQ/WRQ carrying any mode other than "octet" (spec.md
/// §4.1: mode is compared case-insensitively, only "octet" is acted upon,
/// others are rejected by the session). Sent straight from the listen
/// socket since no per-session ephemeral socket has been opened yet.
async fn reject_unsupported_mode(sock: &tokio::net::UdpSocket, peer: std::net::SocketAddr, mode: &str) {
    let msg = format!("unsupported transfer mode \"{mode}\": only octet is supported");
    if let Ok(pkt) = (Packet::Error { code: error_code::ILLEGAL_OP, msg }).encode() {
        let _ = sock.send_to(&pkt, peer).await;
    }
}

/// Send an outbound ERROR for session-terminating errors that warrant one
/// (spec.md §7), best-effort over a fresh unconnected send — the session's
/// transport may already be unusable.
async fn send_error_reply(peer: std::net::SocketAddr, err: &SessionError) {
    let Some(code) = err.outbound_code() else { return };
    let Ok(pkt) = (Packet::Error { code, msg: err.to_string() }).encode() else { return };
    if let Ok(sock) = tokio::net::UdpSocket::bind("0.0.0.0:0").await {
        let _ = sock.send_to(&pkt, peer).await;
    }
}

// ---------------------------------------------------------------------------
// RRQ handler (client downloads a file from us)
// ---------------------------------------------------------------------------

async fn handle_rrq(
    id: u64,
    peer: std::net::SocketAddr,
    filename: &str,
    dir: &Path,
    opts: &SessionOptions,
    tx: mpsc::UnboundedSender<ServerEvent>,
) -> Result<(), SessionError> {
    let path = sanitize_path(dir, filename).map_err(|e| SessionError::Fs(FsError::AccessDenied(e.to_string())))?;
    let metadata = tokio::fs::metadata(&path).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            SessionError::Fs(FsError::FileNotFound(filename.to_string()))
        } else {
            SessionError::Fs(FsError::OtherIo(e))
        }
    })?;
    let total_bytes = metadata.len();

    tx.send(ServerEvent::Log(format!("{peer}: RRQ \"{filename}\" ({total_bytes} bytes)")))
        .map_err(|_| SessionError::StartupFailed(std::io::Error::other("dashboard channel closed")))?;
    let _ = tx.send(ServerEvent::TransferStarted(TransferInfo {
        id,
        peer,
        filename: filename.to_string(),
        kind: TransferKind::Download,
        total_bytes,
        transferred: 0,
        started: Instant::now(),
        size_known: true,
    }));

    let mut transport = UdpTransport::bind_ephemeral(peer)
        .await
        .map_err(SessionError::StartupFailed)?;
    let mut file = tokio::fs::File::open(&path)
        .await
        .map_err(|e| SessionError::Fs(FsError::OtherIo(e)))?;

    let result = stream_with_progress_rrq(&mut transport, &mut file, opts, total_bytes, id, &tx).await;

    match &result {
        Ok(outcome) => {
            let _ = tx.send(ServerEvent::TransferComplete(id));
            let _ = tx.send(ServerEvent::Log(format!(
                "{peer}: RRQ \"{filename}\" complete ({} bytes)",
                outcome.bytes
            )));
        }
        Err(e) => send_error_reply(peer, e).await,
    }
    result.map(|_| ())
}

async fn stream_with_progress_rrq(
    transport: &mut UdpTransport,
    file: &mut tokio::fs::File,
    opts: &SessionOptions,
    total_bytes: u64,
    id: u64,
    tx: &mpsc::UnboundedSender<ServerEvent>,
) -> Result<engine::SessionOutcome, SessionError> {
    // engine::send reports no mid-transfer progress on its own; the
    // dashboard only needs start/complete/failed, so we drive the loop
    // directly here rather than threading a callback through engine.
    let outcome = engine::send(transport, file, opts).await?;
    let _ = tx.send(ServerEvent::TransferProgress { id, transferred: outcome.bytes, total_bytes });
    Ok(outcome)
}

// ---------------------------------------------------------------------------
// WRQ handler (client uploads a file to us)
// ---------------------------------------------------------------------------

async fn handle_wrq(
    id: u64,
    peer: std::net::SocketAddr,
    filename: &str,
    dir: &Path,
    opts: &SessionOptions,
    tx: mpsc::UnboundedSender<ServerEvent>,
) -> Result<(), SessionError> {
    let path = sanitize_path(dir, filename).map_err(|e| SessionError::Fs(FsError::AccessDenied(e.to_string())))?;

    let _ = tx.send(ServerEvent::Log(format!("{peer}: WRQ \"{filename}\"")));
    let _ = tx.send(ServerEvent::TransferStarted(TransferInfo {
        id,
        peer,
        filename: filename.to_string(),
        kind: TransferKind::Upload,
        total_bytes: 0,
        transferred: 0,
        started: Instant::now(),
        size_known: false,
    }));

    let mut transport = UdpTransport::bind_ephemeral(peer)
        .await
        .map_err(SessionError::StartupFailed)?;

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| SessionError::Fs(FsError::OtherIo(e)))?;
    }

    let mut file = match tokio::fs::OpenOptions::new().write(true).create_new(true).open(&path).await {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
            return Err(SessionError::Fs(FsError::FileAlreadyExists(filename.to_string())));
        }
        Err(e) => return Err(SessionError::Fs(FsError::OtherIo(e))),
    };

    engine::acknowledge_wrq(&mut transport, opts).await?;

    let result = engine::receive(&mut transport, &mut file, opts).await;

    match &result {
        Ok(outcome) => {
            let _ = tx.send(ServerEvent::TransferProgress { id, transferred: outcome.bytes, total_bytes: outcome.bytes });
            let _ = tx.send(ServerEvent::TransferComplete(id));
            let _ = tx.send(ServerEvent::Log(format!(
                "{peer}: WRQ \"{filename}\" complete ({} bytes)",
                outcome.bytes
            )));
        }
        Err(e) => send_error_reply(peer, e).await,
    }
    result.map(|_| ())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Ensure the requested filename stays inside the served directory.
/// Supports subdirectory paths (e.g. `ios/config/router.cfg`) while
/// rejecting any traversal attempt (`..`) or absolute paths.
pub(crate) fn sanitize_path(dir: &Path, filename: &str) -> Result<PathBuf> {
    let normalized = filename.replace('\\', "/");

    if normalized.starts_with('/') {
        return Err(anyhow!("absolute paths are not allowed"));
    }

    for component in normalized.split('/') {
        if component == ".." {
            return Err(anyhow!("path traversal is not allowed"));
        }
    }

    let clean: PathBuf = normalized
        .split('/')
        .filter(|c| !c.is_empty() && *c != ".")
        .collect();

    if clean.as_os_str().is_empty() {
        return Err(anyhow!("invalid filename"));
    }

    let candidate = dir.join(&clean);

    let canonical_dir = dir
        .canonicalize()
        .map_err(|e| anyhow!("cannot canonicalize served directory: {e}"))?;

    if candidate.exists() {
        let canonical = candidate
            .canonicalize()
            .map_err(|e| anyhow!("cannot canonicalize path: {e}"))?;
        if !canonical.starts_with(&canonical_dir) {
            return Err(anyhow!("path escapes served directory"));
        }
        Ok(canonical)
    } else {
        let mut ancestor = candidate.parent();
        while let Some(a) = ancestor {
            if a.exists() {
                let canonical_ancestor = a
                    .canonicalize()
                    .map_err(|e| anyhow!("cannot canonicalize ancestor: {e}"))?;
                if !canonical_ancestor.starts_with(&canonical_dir) {
                    return Err(anyhow!("path escapes served directory"));
                }
                return Ok(candidate);
            }
            ancestor = a.parent();
        }
        Err(anyhow!("path escapes served directory"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_simple_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("hello.txt"), b"test").unwrap();
        let result = sanitize_path(dir.path(), "hello.txt").unwrap();
        assert!(result.ends_with("hello.txt"));
    }

    #[test]
    fn sanitize_rejects_absolute_path() {
        let dir = tempfile::tempdir().unwrap();
        assert!(sanitize_path(dir.path(), "/etc/passwd").is_err());
    }

    #[test]
    fn sanitize_rejects_traversal() {
        let dir = tempfile::tempdir().unwrap();
        assert!(sanitize_path(dir.path(), "../../etc/passwd").is_err());
        assert!(sanitize_path(dir.path(), "subdir/../../escape.txt").is_err());
    }

    #[test]
    fn sanitize_allows_new_file_in_subdir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("uploads")).unwrap();
        let result = sanitize_path(dir.path(), "uploads/new.txt").unwrap();
        assert!(result.ends_with("uploads/new.txt"));
    }

    #[test]
    fn sanitize_rejects_empty_filename() {
        let dir = tempfile::tempdir().unwrap();
        assert!(sanitize_path(dir.path(), "").is_err());
        assert!(sanitize_path(dir.path(), "///").is_err());
    }

    #[test]
    fn sanitize_rejects_symlink_escape() {
        let dir = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        std::fs::write(outside.path().join("secret.txt"), b"nope").unwrap();
        #[cfg(unix)]
        {
            std::os::unix::fs::symlink(outside.path().join("secret.txt"), dir.path().join("link.txt")).unwrap();
            assert!(sanitize_path(dir.path(), "link.txt").is_err());
        }
    }
}
