//! Error taxonomy for the transfer engine (spec.md §7).
//!
//! Framing and filesystem errors are fatal for the session and produce an
//! outbound ERROR packet; transport errors are counted against the retry
//! budget; `PeerError` and `UnknownTid` are protocol-level signals that never
//! get an ERROR reply of their own (the peer already knows, or isn't part of
//! this session).

use std::io;

use thiserror::Error;

use crate::wire::WireError;

/// Errors from the raw datagram transport (spec.md §4.2, §7 "Transport").
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("datagram read/write timed out")]
    Timeout,
    #[error("failed to arm a read/write deadline: {0}")]
    ClockError(io::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Filesystem errors mapped to TFTP wire ERROR codes (spec.md §7 "Filesystem").
#[derive(Debug, Error)]
pub enum FsError {
    #[error("{0} not found")]
    FileNotFound(String),
    #[error("{0} already exists")]
    FileAlreadyExists(String),
    #[error("access denied: {0}")]
    AccessDenied(String),
    #[error(transparent)]
    OtherIo(io::Error),
}

impl FsError {
    /// The TFTP wire error code this kind maps to (spec.md §3, §7).
    pub fn wire_code(&self) -> u16 {
        use crate::wire::error_code;
        match self {
            FsError::FileNotFound(_) => error_code::FILE_NOT_FOUND,
            FsError::FileAlreadyExists(_) => error_code::FILE_ALREADY_EXISTS,
            FsError::AccessDenied(_) => error_code::ACCESS_VIOLATION,
            FsError::OtherIo(_) => error_code::UNDEFINED,
        }
    }
}

/// The terminal outcome of a sender or receiver loop (spec.md §4.7).
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("framing error: {0}")]
    Wire(#[from] WireError),
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("filesystem error: {0}")]
    Fs(#[from] FsError),
    #[error("peer reported error {code}: {msg}")]
    PeerError { code: u16, msg: String },
    #[error("datagram from unbound transfer id, replied with ERROR(5)")]
    UnknownTid,
    #[error("retry budget exhausted")]
    RetriesExhausted,
    #[error("failed to arm a deadline: {0}")]
    ClockError(io::Error),
    #[error("server failed to start: {0}")]
    StartupFailed(io::Error),
}

impl SessionError {
    /// The wire ERROR code to send the peer before terminating, if any.
    /// `PeerError` never gets a reply — the peer already sent it.
    pub fn outbound_code(&self) -> Option<u16> {
        use crate::wire::error_code;
        match self {
            SessionError::Wire(_) => Some(error_code::UNDEFINED),
            SessionError::Fs(fs) => Some(fs.wire_code()),
            SessionError::ClockError(_) => Some(error_code::UNDEFINED),
            SessionError::PeerError { .. } | SessionError::UnknownTid => None,
            SessionError::Transport(_) | SessionError::RetriesExhausted => None,
            SessionError::StartupFailed(_) => None,
        }
    }
}
