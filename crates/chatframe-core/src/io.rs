//! Resumable, non-blocking frame I/O.
//!
//! A readiness-driven runtime can only move as many bytes as the kernel will
//! take in one cycle. [`FrameRecv`] and [`FrameSend`] carry the progress
//! counters across cycles: each `poll` call moves as much as possible and
//! stops cleanly at `WouldBlock`, leaving the state ready to resume on the
//! next readiness event. No byte is ever re-read or re-sent, and no partial
//! frame is ever surfaced to the caller.

use std::{
    collections::VecDeque,
    io::{Error, ErrorKind, Read, Write},
};

use bytes::Bytes;
use chatframe_proto::FRAME_LEN;
use thiserror::Error;

/// Why an I/O poll gave up on a connection.
#[derive(Error, Debug)]
pub enum IoFailure {
    /// The peer closed the connection (EOF, reset, or broken pipe).
    #[error("peer closed the connection")]
    PeerClosed,

    /// An unrecoverable socket error.
    #[error("socket error: {0}")]
    Fatal(#[from] std::io::Error),
}

/// Receive side of one connection.
///
/// Alternates between two modes: command mode fills a fixed [`FRAME_LEN`]
/// buffer, body mode fills a caller-sized buffer for a raw file payload.
/// Completing either mode yields the filled buffer and re-arms command mode.
#[derive(Debug)]
pub struct FrameRecv {
    buf: Vec<u8>,
    filled: usize,
}

impl FrameRecv {
    /// A receiver armed for one command frame.
    pub fn command() -> FrameRecv {
        FrameRecv { buf: vec![0; FRAME_LEN], filled: 0 }
    }

    /// Re-arm for a raw body of exactly `len` bytes.
    ///
    /// Only valid between frames; any partial progress is discarded. `len`
    /// comes from an untrusted header, so the buffer is reserved fallibly:
    /// a length the allocator cannot honor comes back as a failure for this
    /// one connection instead of aborting the process.
    pub fn expect(&mut self, len: usize) -> Result<(), IoFailure> {
        let mut buf = Vec::new();
        buf.try_reserve_exact(len).map_err(|_| {
            IoFailure::Fatal(Error::new(
                ErrorKind::OutOfMemory,
                format!("cannot buffer a {len}-byte body"),
            ))
        })?;
        buf.resize(len, 0);
        self.buf = buf;
        self.filled = 0;
        Ok(())
    }

    /// Bytes still missing before the current buffer completes.
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.filled
    }

    /// Read as much as the socket will give.
    ///
    /// Returns `Ok(Some(buf))` when the current frame or body completed this
    /// cycle, `Ok(None)` when the socket ran dry mid-buffer. After a
    /// completion the receiver is re-armed for a command frame; callers
    /// switching to body mode call [`FrameRecv::expect`] first and poll
    /// again, since edge-triggered runtimes will not re-signal readable for
    /// bytes already in the kernel buffer.
    pub fn poll<R: Read>(&mut self, src: &mut R) -> Result<Option<Vec<u8>>, IoFailure> {
        while self.filled < self.buf.len() {
            match src.read(&mut self.buf[self.filled..]) {
                Ok(0) => return Err(IoFailure::PeerClosed),
                Ok(n) => self.filled += n,
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(None),
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) if is_disconnect(e.kind()) => return Err(IoFailure::PeerClosed),
                Err(e) => return Err(IoFailure::Fatal(e)),
            }
        }
        let done = std::mem::replace(&mut self.buf, vec![0; FRAME_LEN]);
        self.filled = 0;
        Ok(Some(done))
    }
}

/// Send side of one connection.
///
/// Queued buffers are flushed in order; a partial write parks the offset into
/// the front buffer until the next writable cycle.
#[derive(Debug, Default)]
pub struct FrameSend {
    queue: VecDeque<Bytes>,
    sent: usize,
}

impl FrameSend {
    /// An empty send queue.
    pub fn new() -> FrameSend {
        FrameSend::default()
    }

    /// Queue a buffer for transmission after everything already queued.
    pub fn push(&mut self, bytes: Bytes) {
        if !bytes.is_empty() {
            self.queue.push_back(bytes);
        }
    }

    /// Whether nothing is queued or in flight.
    pub fn is_idle(&self) -> bool {
        self.queue.is_empty()
    }

    /// Write as much as the socket will take.
    ///
    /// Returns `Ok(true)` once the queue is fully drained, `Ok(false)` if
    /// bytes remain and the caller should keep watching for writable.
    pub fn poll<W: Write>(&mut self, dst: &mut W) -> Result<bool, IoFailure> {
        while let Some(front) = self.queue.front() {
            match dst.write(&front[self.sent..]) {
                Ok(0) => return Err(IoFailure::PeerClosed),
                Ok(n) => {
                    self.sent += n;
                    if self.sent == front.len() {
                        self.queue.pop_front();
                        self.sent = 0;
                    }
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(false),
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) if is_disconnect(e.kind()) => return Err(IoFailure::PeerClosed),
                Err(e) => return Err(IoFailure::Fatal(e)),
            }
        }
        Ok(true)
    }
}

fn is_disconnect(kind: ErrorKind) -> bool {
    matches!(
        kind,
        ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe
            | ErrorKind::UnexpectedEof
    )
}
