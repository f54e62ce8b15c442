//! Transfer session engine: the sender loop, the receiver loop, and the
//! state-machine semantics spec.md §4.3/§4.4/§4.7 describe. Both client and
//! server drive sessions through these two functions — role symmetry is
//! expressed by generic parameters, not by duplicated per-role code
//! (spec.md §9).

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::config::{DEFAULT_NUM_TRIES, DEFAULT_READ_TIMEOUT, DEFAULT_WRITE_TIMEOUT};
use crate::error::{FsError, SessionError, TransportError};
use crate::transport::Transport;
use crate::wire::{DATAGRAM_BUF, MAX_PAYLOAD, Packet};

/// Per-session knobs threaded explicitly through every call — never kept as
/// process-global state (spec.md §9's note about the "trace" flag).
#[derive(Debug, Clone, Copy)]
pub struct SessionOptions {
    pub retries: u32,
    pub read_timeout: std::time::Duration,
    pub write_timeout: std::time::Duration,
    pub trace: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            retries: DEFAULT_NUM_TRIES,
            read_timeout: DEFAULT_READ_TIMEOUT,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            trace: false,
        }
    }
}

/// Final tally of a completed transfer, for progress reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOutcome {
    pub blocks: u32,
    pub bytes: u64,
}

/// Transmit one already-encoded datagram with no retry of its own. Used by
/// the client driver for the opening RRQ/WRQ, which the peer's own
/// retransmission (a resent request) recovers if lost — there is no ACK to
/// wait for yet.
pub async fn send_raw<T: Transport>(transport: &mut T, encoded: &[u8]) -> Result<(), SessionError> {
    match transport.send(encoded).await {
        Ok(()) => Ok(()),
        Err(TransportError::ClockError(e)) => Err(SessionError::ClockError(e)),
        Err(e) => Err(SessionError::Transport(e)),
    }
}

/// Read one datagram with no retry of its own. Used by the client driver to
/// pre-read the server's ACK(0)/ERROR reply to a WRQ before streaming data.
pub async fn recv_raw<T: Transport>(transport: &mut T, buf: &mut [u8]) -> Result<usize, SessionError> {
    match transport.recv(buf).await {
        Ok(n) => Ok(n),
        Err(TransportError::ClockError(e)) => Err(SessionError::ClockError(e)),
        Err(e) => Err(SessionError::Transport(e)),
    }
}

// ---------------------------------------------------------------------------
// Sender loop (spec.md §4.3)
// ---------------------------------------------------------------------------

/// Drive the data-producing half of a session: read `source` in 512-octet
/// chunks, emit DATA, wait for the matching ACK, retry on timeout.
/// Terminates on the first block shorter than `MAX_PAYLOAD`, sending an
/// explicit zero-length DATA if the source's length is an exact multiple of
/// `MAX_PAYLOAD` (spec.md §9's mandated fix for the non-conformant original).
pub async fn send<T, R>(
    transport: &mut T,
    source: &mut R,
    opts: &SessionOptions,
) -> Result<SessionOutcome, SessionError>
where
    T: Transport,
    R: AsyncRead + Unpin,
{
    let mut block_num: u16 = 1;
    let mut bytes: u64 = 0;
    let mut blocks: u32 = 0;
    let mut buf = vec![0u8; MAX_PAYLOAD];

    loop {
        let n = read_full_chunk(source, &mut buf)
            .await
            .map_err(|e| SessionError::Fs(FsError::OtherIo(e)))?;
        let payload = &buf[..n];

        send_block(transport, payload, block_num, opts).await?;

        bytes += n as u64;
        blocks += 1;

        if n < MAX_PAYLOAD {
            return Ok(SessionOutcome { blocks, bytes });
        }
        block_num = block_num.wrapping_add(1);
    }
}

/// Read until `buf` is full or the source reaches EOF, since a single
/// `AsyncRead::read` call may return short of a full block even mid-stream.
async fn read_full_chunk<R: AsyncRead + Unpin>(
    source: &mut R,
    buf: &mut [u8],
) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = source.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

/// Send one DATA(block_num, payload) and wait for its ACK, retrying up to
/// `opts.retries` times (spec.md §4.3).
pub async fn send_block<T: Transport>(
    transport: &mut T,
    payload: &[u8],
    block_num: u16,
    opts: &SessionOptions,
) -> Result<(), SessionError> {
    let encoded = Packet::Data { block_num, payload: payload.to_vec() }.encode()?;
    let mut recv_buf = vec![0u8; DATAGRAM_BUF];

    for _attempt in 0..opts.retries {
        transport.set_write_deadline(opts.write_timeout);
        match transport.send(&encoded).await {
            Ok(()) => {}
            Err(TransportError::ClockError(e)) => return Err(SessionError::ClockError(e)),
            Err(_) => continue,
        }

        transport.set_read_deadline(opts.read_timeout);
        let n = match transport.recv(&mut recv_buf).await {
            Ok(n) => n,
            Err(TransportError::ClockError(e)) => return Err(SessionError::ClockError(e)),
            Err(_) => continue,
        };

        match Packet::decode_any(&recv_buf[..n]) {
            Ok(Packet::Ack { block_num: bn }) if bn == block_num => {
                if opts.trace {
                    log::debug!("sent block#={block_num}, sent #bytes={}", payload.len());
                }
                return Ok(());
            }
            Ok(Packet::Ack { .. }) => continue, // stale ack, retransmit
            Ok(Packet::Error { code, msg }) => return Err(SessionError::PeerError { code, msg }),
            _ => continue, // malformed or wrong opcode, retransmit
        }
    }

    Err(SessionError::RetriesExhausted)
}

// ---------------------------------------------------------------------------
// Receiver loop (spec.md §4.4)
// ---------------------------------------------------------------------------

/// Drive the data-consuming half of a session: read DATA in order, write
/// payload to `sink`, ACK each block, retry on malformed/out-of-order
/// packets. Terminates once a block shorter than `MAX_PAYLOAD` is
/// acknowledged.
pub async fn receive<T, W>(
    transport: &mut T,
    sink: &mut W,
    opts: &SessionOptions,
) -> Result<SessionOutcome, SessionError>
where
    T: Transport,
    W: AsyncWrite + Unpin,
{
    let mut expected: u16 = 1;
    let mut bytes: u64 = 0;
    let mut blocks: u32 = 0;

    loop {
        let (block_num, len) = recv_block(transport, sink, expected, opts).await?;
        bytes += len as u64;
        blocks += 1;

        if opts.trace {
            log::debug!("received block#={block_num}, received #bytes={len}");
        }

        if len < MAX_PAYLOAD {
            return Ok(SessionOutcome { blocks, bytes });
        }
        expected = expected.wrapping_add(1);
    }
}

/// Receive one in-order DATA block, append it to `sink` exactly once, and
/// ACK it — retrying only the ACK transmission if that's what keeps
/// failing, never re-appending the same payload twice (spec.md §8.3's
/// idempotence property).
async fn recv_block<T: Transport, W: AsyncWrite + Unpin>(
    transport: &mut T,
    sink: &mut W,
    expected: u16,
    opts: &SessionOptions,
) -> Result<(u16, usize), SessionError> {
    let mut buf = vec![0u8; DATAGRAM_BUF];
    let mut appended: Option<(u16, usize)> = None;

    for _attempt in 0..opts.retries {
        if let Some((block_num, len)) = appended {
            match ack(transport, block_num, opts).await {
                Ok(()) => return Ok((block_num, len)),
                Err(SessionError::ClockError(e)) => return Err(SessionError::ClockError(e)),
                Err(_) => continue,
            }
        }

        transport.set_read_deadline(opts.read_timeout);
        let n = match transport.recv(&mut buf).await {
            Ok(n) => n,
            Err(crate::error::TransportError::ClockError(e)) => return Err(SessionError::ClockError(e)),
            Err(_) => continue,
        };

        match Packet::decode_any(&buf[..n]) {
            Ok(Packet::Data { block_num, payload }) if block_num == expected => {
                sink.write_all(&payload)
                    .await
                    .map_err(|e| SessionError::Fs(FsError::OtherIo(e)))?;
                let len = payload.len();
                appended = Some((block_num, len));
                match ack(transport, block_num, opts).await {
                    Ok(()) => return Ok((block_num, len)),
                    Err(SessionError::ClockError(e)) => return Err(SessionError::ClockError(e)),
                    Err(_) => continue,
                }
            }
            Ok(Packet::Data { block_num, .. }) if block_num == expected.wrapping_sub(1) => {
                // Duplicate of the already-acknowledged previous block: the
                // peer never saw our ACK. Re-ACK without re-appending.
                let _ = ack(transport, block_num, opts).await;
            }
            Ok(Packet::Error { code, msg }) => return Err(SessionError::PeerError { code, msg }),
            _ => {} // out-of-order or malformed: retry
        }
    }

    Err(SessionError::RetriesExhausted)
}

async fn ack<T: Transport>(transport: &mut T, block_num: u16, opts: &SessionOptions) -> Result<(), SessionError> {
    let encoded = Packet::Ack { block_num }.encode()?;
    transport.set_write_deadline(opts.write_timeout);
    match transport.send(&encoded).await {
        Ok(()) => Ok(()),
        Err(TransportError::ClockError(e)) => Err(SessionError::ClockError(e)),
        Err(e) => Err(SessionError::Transport(e)),
    }
}

/// Send the initial ACK(0) that accepts a WRQ (spec.md §4.4). Not retried
/// from this side — loss is detected only when the peer retransmits the WRQ
/// (spec.md §9's flagged-but-accepted behavior).
pub async fn acknowledge_wrq<T: Transport>(transport: &mut T, opts: &SessionOptions) -> Result<(), SessionError> {
    ack(transport, 0, opts).await
}
