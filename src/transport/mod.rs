//! Deadline-aware byte transport over non-blocking pipe ends.
//!
//! Every attempt first checks the shutdown token, then the deadline, then
//! makes exactly one non-blocking call. `WouldBlock` and `Interrupted` put
//! the caller to sleep for one poll interval before the next attempt.

use std::io::{ErrorKind, Read, Write};
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::wire::ByteSource;

/// Poll interval for ordinary timeouts.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Poll interval once the timeout is long enough that 100 ms is just noise.
pub const SLOW_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Timeouts at or above this use [`SLOW_POLL_INTERVAL`].
pub const SLOW_POLL_THRESHOLD: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Cancelled by shutdown")]
    Cancelled,

    #[error("Deadline expired")]
    TimedOut,

    #[error("Peer closed the stream")]
    Closed,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Pick the poll interval for a configured timeout.
pub fn poll_interval_for(timeout: Duration) -> Duration {
    if timeout >= SLOW_POLL_THRESHOLD {
        SLOW_POLL_INTERVAL
    } else {
        DEFAULT_POLL_INTERVAL
    }
}

/// Deadline, shutdown token and poll cadence shared by all I/O of one
/// exchange.
#[derive(Debug, Clone)]
pub struct IoContext {
    deadline: Option<Instant>,
    shutdown: CancellationToken,
    poll_interval: Duration,
}

impl IoContext {
    /// Deadline `timeout` from now. A timeout too large to represent as an
    /// instant means no deadline.
    pub fn new(timeout: Duration, shutdown: CancellationToken) -> Self {
        Self {
            deadline: Instant::now().checked_add(timeout),
            shutdown,
            poll_interval: poll_interval_for(timeout),
        }
    }

    pub fn with_deadline(
        deadline: Option<Instant>,
        poll_interval: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            deadline,
            shutdown,
            poll_interval,
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub fn shutdown(&self) -> &CancellationToken {
        &self.shutdown
    }

    pub fn is_expired(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    fn check(&self) -> Result<(), TransportError> {
        if self.shutdown.is_cancelled() {
            return Err(TransportError::Cancelled);
        }
        if self.is_expired() {
            return Err(TransportError::TimedOut);
        }
        Ok(())
    }

    fn pause(&self) {
        let nap = match self.deadline {
            Some(d) => self
                .poll_interval
                .min(d.saturating_duration_since(Instant::now())),
            None => self.poll_interval,
        };
        std::thread::sleep(nap);
    }
}

/// Write some of `bytes`; returns how many were accepted.
pub fn send<W: Write + ?Sized>(
    ctx: &IoContext,
    writer: &mut W,
    bytes: &[u8],
) -> Result<usize, TransportError> {
    if bytes.is_empty() {
        return Ok(0);
    }
    loop {
        ctx.check()?;
        match writer.write(bytes) {
            Ok(0) => return Err(TransportError::Closed),
            Ok(n) => return Ok(n),
            Err(e) if is_retryable(&e) => ctx.pause(),
            Err(e) => return Err(e.into()),
        }
    }
}

/// Read some bytes into `buf`. End of stream is [`TransportError::Closed`].
pub fn receive<R: Read + ?Sized>(
    ctx: &IoContext,
    reader: &mut R,
    buf: &mut [u8],
) -> Result<usize, TransportError> {
    if buf.is_empty() {
        return Ok(0);
    }
    loop {
        ctx.check()?;
        match reader.read(buf) {
            Ok(0) => return Err(TransportError::Closed),
            Ok(n) => return Ok(n),
            Err(e) if is_retryable(&e) => ctx.pause(),
            Err(e) => return Err(e.into()),
        }
    }
}

/// Write all of `bytes`.
pub fn send_all<W: Write + ?Sized>(
    ctx: &IoContext,
    writer: &mut W,
    mut bytes: &[u8],
) -> Result<(), TransportError> {
    while !bytes.is_empty() {
        let n = send(ctx, writer, bytes)?;
        trace!(bytes = n, "sent");
        bytes = &bytes[n..];
    }
    Ok(())
}

/// Fill all of `buf`.
pub fn receive_exact<R: Read + ?Sized>(
    ctx: &IoContext,
    reader: &mut R,
    mut buf: &mut [u8],
) -> Result<(), TransportError> {
    while !buf.is_empty() {
        let n = receive(ctx, reader, buf)?;
        trace!(bytes = n, "received");
        buf = &mut buf[n..];
    }
    Ok(())
}

fn is_retryable(e: &std::io::Error) -> bool {
    matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::Interrupted)
}

/// Adapter feeding the streaming response decoder from a non-blocking reader.
pub struct DeadlineReader<'a, R: ?Sized> {
    ctx: &'a IoContext,
    inner: &'a mut R,
}

impl<'a, R: Read + ?Sized> DeadlineReader<'a, R> {
    pub fn new(ctx: &'a IoContext, inner: &'a mut R) -> Self {
        Self { ctx, inner }
    }
}

impl<R: Read + ?Sized> ByteSource for DeadlineReader<'_, R> {
    type Error = TransportError;

    fn fill(&mut self, buf: &mut [u8]) -> Result<(), TransportError> {
        receive_exact(self.ctx, &mut *self.inner, buf)
    }
}
