//! Socket ownership, request serialization and reply correlation
//!
//! A connection is split in two:
//!
//! - `Transport` is the cloneable send side. Writes go through an async
//!   mutex so frames are never interleaved.
//! - `TransportReader` owns the read half and turns bytes into `Inbound`
//!   messages. It runs in exactly one task.
//!
//! ## Reply correlation
//!
//! The protocol has no request ids: replies come back in the order the
//! requests were written. Each send records its `RequestKind` in a FIFO
//! while still holding the write lock, so queue order always equals wire
//! order, and the reader pops the front for every non-event frame.
//! Pipelining several requests is fine as long as that ordering holds; a
//! reply whose type does not match the front of the queue is treated as a
//! fatal desync instead of being guessed at.
//!
//! Once the reader stops, the queue is closed: every caller still waiting
//! for a reply gets `IpcError::ReaderGone` and new requests are refused.
//! A write abandoned halfway through a frame closes the queue as well and
//! drops the write half, since nothing sent after it could be parsed.

use std::collections::VecDeque;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard as StdMutexGuard};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;
use tokio::sync::{oneshot, Mutex, MutexGuard};
use tracing::{debug, trace, warn};

use super::codec::{self, Frame, FrameBuffer, DEFAULT_MAX_PAYLOAD};
use super::error::{IpcError, ProtocolError, TransportError};
use super::types::RequestKind;

/// Environment variable sway exports for its IPC socket
const SWAY_SOCKET_ENV: &str = "SWAYSOCK";

/// Fallback variable used by i3 and some sway setups
const I3_SOCKET_ENV: &str = "I3SOCK";

/// Bytes read from the socket per syscall
const READ_CHUNK: usize = 8192;

/// Discover the IPC socket path from the environment
///
/// Reads `$SWAYSOCK`, then `$I3SOCK`, and checks that the path exists.
///
/// # Errors
///
/// Returns `TransportError::SocketNotSet` if neither variable is set.
/// Returns `TransportError::SocketNotFound` if the path doesn't exist.
pub fn get_socket_path() -> Result<PathBuf, TransportError> {
    let socket_path_str = std::env::var(SWAY_SOCKET_ENV)
        .or_else(|_| std::env::var(I3_SOCKET_ENV))
        .map_err(|_| TransportError::SocketNotSet)?;

    let socket_path = PathBuf::from(&socket_path_str);

    if !socket_path.exists() {
        return Err(TransportError::SocketNotFound { path: socket_path });
    }

    Ok(socket_path)
}

/// A message read from the socket
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// Answer to a fire-and-forget request
    Reply { kind: RequestKind, frame: Frame },
    /// Asynchronous event notification
    Event(Frame),
}

/// An outstanding request waiting for its reply
#[derive(Debug)]
struct Pending {
    kind: RequestKind,
    /// Set when a caller awaits the reply itself instead of the dispatcher
    reply_to: Option<oneshot::Sender<Frame>>,
}

#[derive(Debug, Default)]
struct Outstanding {
    queue: VecDeque<Pending>,
    /// No reply will ever be read again
    closed: bool,
}

type PendingQueue = Arc<StdMutex<Outstanding>>;

/// Send side of an IPC connection
#[derive(Debug, Clone)]
pub struct Transport {
    /// `None` once a half-written frame made the stream unusable
    writer: Arc<Mutex<Option<OwnedWriteHalf>>>,
    pending: PendingQueue,
}

/// Read side of an IPC connection
#[derive(Debug)]
pub struct TransportReader {
    reader: OwnedReadHalf,
    buffer: FrameBuffer,
    pending: PendingQueue,
}

impl Transport {
    /// Connect to the socket at `path`
    ///
    /// # Errors
    ///
    /// Returns `TransportError::ConnectionFailed` if the connection fails.
    pub async fn connect(
        path: &Path,
        max_payload: u32,
    ) -> Result<(Transport, TransportReader), TransportError> {
        let stream =
            UnixStream::connect(path)
                .await
                .map_err(|e| TransportError::ConnectionFailed {
                    path: path.to_path_buf(),
                    source: e,
                })?;

        debug!("Connected to sway IPC at {}", path.display());

        Ok(Self::from_stream(stream, max_payload))
    }

    /// Wrap an already connected stream
    pub fn from_stream(stream: UnixStream, max_payload: u32) -> (Transport, TransportReader) {
        let (read_half, write_half) = stream.into_split();
        let pending = PendingQueue::default();

        let transport = Transport {
            writer: Arc::new(Mutex::new(Some(write_half))),
            pending: pending.clone(),
        };
        let reader = TransportReader {
            reader: read_half,
            buffer: FrameBuffer::with_max_payload(max_payload),
            pending,
        };

        (transport, reader)
    }

    /// Send a request whose reply goes to the reader's `Inbound::Reply`
    pub async fn send(&self, kind: RequestKind, payload: &[u8]) -> Result<(), IpcError> {
        self.write_request(kind, payload, None).await
    }

    /// Send a request and wait for its reply
    ///
    /// The reply is handed straight to this caller and never shows up as an
    /// `Inbound::Reply`. Some task must be driving the `TransportReader`;
    /// if it stops first this returns `IpcError::ReaderGone`.
    pub async fn request(&self, kind: RequestKind, payload: &[u8]) -> Result<Frame, IpcError> {
        let (tx, rx) = oneshot::channel();
        self.write_request(kind, payload, Some(tx)).await?;
        rx.await.map_err(|_| IpcError::ReaderGone)
    }

    async fn write_request(
        &self,
        kind: RequestKind,
        payload: &[u8],
        reply_to: Option<oneshot::Sender<Frame>>,
    ) -> Result<(), IpcError> {
        let bytes = codec::encode(kind.message_type(), payload)?;

        let writer = self.writer.lock().await;
        if writer.is_none() {
            return Err(TransportError::ConnectionClosed.into());
        }
        {
            let mut pending = self.lock_pending();
            if pending.closed {
                return Err(TransportError::ConnectionClosed.into());
            }
            pending.queue.push_back(Pending { kind, reply_to });
        }

        trace!(kind = ?kind, len = payload.len(), "Sending request");

        let mut in_flight = InFlight {
            writer,
            pending: &self.pending,
            written: 0,
            done: false,
        };
        in_flight
            .write(&bytes)
            .await
            .map_err(|e| TransportError::SendFailed(e).into())
    }

    /// Close the write side of the socket
    ///
    /// The compositor answers by closing its end, which ends the reader.
    pub async fn shutdown(&self) {
        let mut writer = self.writer.lock().await;
        if let Some(half) = writer.as_mut() {
            if let Err(e) = half.shutdown().await {
                debug!("Socket shutdown failed: {}", e);
            }
        }
    }

    /// Number of requests still waiting for a reply
    pub fn pending_len(&self) -> usize {
        self.lock_pending().queue.len()
    }

    fn lock_pending(&self) -> StdMutexGuard<'_, Outstanding> {
        lock_queue(&self.pending)
    }
}

/// One request being written, holding the write lock
///
/// Dropped before the frame is fully written, it takes its entry back out of
/// the queue. If part of the frame already went out the stream is beyond
/// repair: the write half is dropped, which the compositor sees as EOF, and
/// the queue is closed.
struct InFlight<'a> {
    writer: MutexGuard<'a, Option<OwnedWriteHalf>>,
    pending: &'a PendingQueue,
    written: usize,
    done: bool,
}

impl InFlight<'_> {
    async fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        let Some(half) = self.writer.as_mut() else {
            return Err(io::ErrorKind::NotConnected.into());
        };

        while self.written < bytes.len() {
            let n = half.write(&bytes[self.written..]).await?;
            if n == 0 {
                return Err(io::ErrorKind::WriteZero.into());
            }
            self.written += n;
        }
        half.flush().await?;

        self.done = true;
        Ok(())
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if self.done {
            return;
        }

        if self.written == 0 {
            // Nobody else can push while the write lock is held
            lock_queue(self.pending).queue.pop_back();
            return;
        }

        warn!(
            written = self.written,
            "Request abandoned mid-frame, closing the connection"
        );
        self.writer.take();
        close_queue(self.pending);
    }
}

/// Lock the pending queue, recovering it if a holder panicked
fn lock_queue(queue: &PendingQueue) -> StdMutexGuard<'_, Outstanding> {
    queue.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Refuse further requests and fail everyone still waiting
fn close_queue(queue: &PendingQueue) {
    let abandoned: Vec<Pending> = {
        let mut pending = lock_queue(queue);
        pending.closed = true;
        pending.queue.drain(..).collect()
    };

    if !abandoned.is_empty() {
        debug!("Dropping {} unanswered request(s)", abandoned.len());
    }
}

impl TransportReader {
    /// Read until the next event or dispatcher-bound reply
    ///
    /// Cancel safe: bytes are only moved into the frame buffer after a read
    /// completes, so dropping this future loses nothing.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::ConnectionClosed` on a clean EOF.
    /// Returns `ProtocolError::Truncated` on EOF in the middle of a frame.
    /// Returns `TransportError::ReceiveFailed` if reading fails.
    /// Returns other `ProtocolError`s for corrupt frames or reply desync.
    pub async fn next_inbound(&mut self) -> Result<Inbound, IpcError> {
        loop {
            while let Some(frame) = self.buffer.next_frame()? {
                if let Some(inbound) = self.classify(frame)? {
                    return Ok(inbound);
                }
            }

            let mut chunk = [0u8; READ_CHUNK];
            let read = self
                .reader
                .read(&mut chunk)
                .await
                .map_err(TransportError::ReceiveFailed)?;

            if read == 0 {
                if self.buffer.is_empty() {
                    return Err(TransportError::ConnectionClosed.into());
                }
                return Err(ProtocolError::Truncated {
                    buffered: self.buffer.len(),
                }
                .into());
            }

            self.buffer.extend(&chunk[..read]);
        }
    }

    /// Route a decoded frame; `None` if it was delivered to a waiting caller
    fn classify(&mut self, frame: Frame) -> Result<Option<Inbound>, ProtocolError> {
        if frame.is_event() {
            return Ok(Some(Inbound::Event(frame)));
        }

        let pending = lock_queue(&self.pending)
            .queue
            .pop_front()
            .ok_or(ProtocolError::UnsolicitedReply { got: frame.kind })?;

        if pending.kind.message_type() != frame.kind {
            return Err(ProtocolError::UnexpectedReply {
                expected: pending.kind,
                got: frame.kind,
            });
        }

        match pending.reply_to {
            Some(tx) => {
                // The caller may have given up waiting; that is not an error
                let _ = tx.send(frame);
                Ok(None)
            }
            None => Ok(Some(Inbound::Reply {
                kind: pending.kind,
                frame,
            })),
        }
    }

    /// Stop correlating replies
    ///
    /// Callers blocked in `Transport::request` get `IpcError::ReaderGone`
    /// and later sends fail with `TransportError::ConnectionClosed`.
    pub fn close(&self) {
        close_queue(&self.pending);
    }
}

/// Connect, send one request, and return its reply
///
/// Useful for one-off queries that do not need a long-lived bridge.
pub async fn request_once(
    path: &Path,
    kind: RequestKind,
    payload: &[u8],
) -> Result<Frame, IpcError> {
    let (transport, mut reader) = Transport::connect(path, DEFAULT_MAX_PAYLOAD).await?;
    transport.send(kind, payload).await?;

    loop {
        match reader.next_inbound().await? {
            Inbound::Reply { frame, .. } => {
                transport.shutdown().await;
                return Ok(frame);
            }
            Inbound::Event(frame) => trace!(kind = frame.kind, "Skipping event"),
        }
    }
}
