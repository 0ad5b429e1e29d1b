//! A duplex stream wrapper that limits read and write throughput.
//!
//! [`RateLimitedStream`] lets every read and write reach the inner stream unchanged and
//! then, if the transfer happened faster than the configured rate allows, pauses: a read
//! before handing its bytes back, a write before the next write goes out. The inner stream's own flow control is left to catch up: a
//! slow reader eventually makes the peer send less.
//!
//! Both directions carry an independent limit in **bytes per second**; `0` disables
//! throttling for that direction.
//!
//! ## Async usage
//! ```no_run
//! use tokio::io::{self, AsyncReadExt, AsyncWriteExt};
//! use tokio::net::TcpStream;
//! use tokio_ratelimit::RateLimitedStream;
//!
//! # #[tokio::main]
//! # async fn main() -> io::Result<()> {
//! let stream = TcpStream::connect("127.0.0.1:12345").await?;
//! let mut stream = RateLimitedStream::new(stream, 4096, 1024)?; // 4 KiB/s in, 1 KiB/s out
//!
//! stream.write_all(b"ping").await?;
//! let mut buf = [0u8; 4];
//! stream.read_exact(&mut buf).await?;
//!
//! stream.set_read_limit(0)?; // reads are now unlimited
//! # Ok(()) }
//! ```
//!
//! ## Blocking usage
//! ```no_run
//! use std::io::{self, Read};
//! use std::net::TcpStream;
//! use tokio_ratelimit::RateLimitedStream;
//!
//! # fn main() -> io::Result<()> {
//! let stream = TcpStream::connect("127.0.0.1:12345")?;
//! let mut stream = RateLimitedStream::new(stream, 1024, 0)?;
//! let mut buf = Vec::new();
//! stream.read_to_end(&mut buf)?; // sleeps the thread to stay near 1 KiB/s
//! # Ok(()) }
//! ```
//!
//! ## Under the hood
//! - The first transfer in a limited direction establishes a baseline and is not delayed.
//!   Each later transfer of `n` bytes is allowed `n * (1s / limit)`; if less time has passed
//!   since the baseline, the caller is paused for the difference.
//! - The async path never blocks the executor: bytes already pulled from the inner reader
//!   are held in the wrapper while a Tokio timer runs and are handed out when it fires.
//! - A write returns as soon as the inner write completes. The pause it owes is served
//!   before the next write reaches the inner stream, so dropping a pending write future
//!   never loses or misattributes bytes.
//! - The blocking path sleeps the calling thread with [`std::thread::sleep`] and measures
//!   elapsed time on the same wall clock, whatever the Tokio clock is doing.
//! - Read and write state are fully separate, so a split stream can be driven from two
//!   tasks without one direction's pauses affecting the other.
//!
//! ## Deadlines
//! Throttle pauses are not deadline aware. A read or write timeout configured on the inner
//! stream (see [`Deadlines`](crate::io::Deadlines)) bounds only the inner operation, never
//! the pause that follows it, so be careful when combining the two.
use std::{
    fmt,
    io::{self, IoSlice, Read, Write},
    pin::Pin,
    sync::Arc,
    task::{Context, Poll, ready},
    thread,
};

use bytes::BytesMut;
use pin_project::pin_project;
use tokio::{
    io::{AsyncRead, AsyncWrite, ReadBuf},
    time::Instant,
};
use tracing::debug;

use crate::{
    io::{Connection, Deadlines},
    limit::{Direction, DynamicLimit, LimitError, Limits, validate},
    throttle::Throttle,
};

/// A rate-limited duplex stream.
///
/// Implements [`AsyncRead`]/[`AsyncWrite`] when `T` does, and [`Read`]/[`Write`] when `T`
/// does, so it can stand in for the wrapped stream in either world. Flush and shutdown are
/// forwarded unchanged; dropping the wrapper drops (and thereby closes) the inner stream.
///
/// A single direction is expected to be driven by one caller at a time, which `&mut self`
/// and `Pin<&mut Self>` already enforce.
#[pin_project]
pub struct RateLimitedStream<T> {
    #[pin]
    inner: T,

    reader: Throttle,
    writer: Throttle,

    // read bytes waiting for the read pause to elapse
    held: BytesMut,
}

impl<T> RateLimitedStream<T> {
    /// Wrap `inner`, limiting reads to `read_limit` and writes to `write_limit` bytes per
    /// second. `0` means unlimited.
    ///
    /// Fails without touching `inner` if either limit is negative.
    pub fn new(inner: T, read_limit: i64, write_limit: i64) -> Result<Self, LimitError> {
        let limits = Limits::new(read_limit, write_limit)?;
        Ok(Self::from_limits(inner, limits))
    }

    /// Wrap `inner` with an already validated pair of limits.
    pub fn from_limits(inner: T, limits: Limits) -> Self {
        Self::with_limits(
            inner,
            DynamicLimit::new(limits.read()),
            DynamicLimit::new(limits.write()),
        )
    }

    /// Wrap `inner` with shareable limit knobs.
    ///
    /// Updating a knob changes the limit for every stream holding it, starting with each
    /// stream's next operation. Throttle state is never shared.
    pub fn with_limits(inner: T, read: Arc<DynamicLimit>, write: Arc<DynamicLimit>) -> Self {
        Self {
            inner,
            reader: Throttle::new(Direction::Read, read),
            writer: Throttle::new(Direction::Write, write),
            held: BytesMut::new(),
        }
    }

    /// Current read limit in bytes per second.
    pub fn read_limit(&self) -> u64 {
        self.reader.limit().get()
    }

    /// Current write limit in bytes per second.
    pub fn write_limit(&self) -> u64 {
        self.writer.limit().get()
    }

    pub fn limits(&self) -> Limits {
        Limits::from_parts(self.read_limit(), self.write_limit())
    }

    /// Replace the read limit. On error the previous limit stays in place.
    ///
    /// The new limit applies from the next read on; the existing baseline is kept.
    pub fn set_read_limit(&self, limit: i64) -> Result<(), LimitError> {
        set_limit(self.reader.limit(), Direction::Read, limit)
    }

    /// Replace the write limit. On error the previous limit stays in place.
    pub fn set_write_limit(&self, limit: i64) -> Result<(), LimitError> {
        set_limit(self.writer.limit(), Direction::Write, limit)
    }

    /// Shareable handle to the read limit, for adjusting it from elsewhere.
    pub fn read_limit_handle(&self) -> Arc<DynamicLimit> {
        self.reader.limit().clone()
    }

    /// Shareable handle to the write limit.
    pub fn write_limit_handle(&self) -> Arc<DynamicLimit> {
        self.writer.limit().clone()
    }

    /// Read bytes already taken from the inner stream that have not been returned yet.
    pub fn held(&self) -> &[u8] {
        &self.held
    }

    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Mutable access to the inner stream. Reading or writing through it bypasses the
    /// limits.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    pub fn get_pin_mut(self: Pin<&mut Self>) -> Pin<&mut T> {
        self.project().inner
    }

    /// Consume the wrapper and return the inner stream. Any [`held`](Self::held) bytes are
    /// discarded.
    pub fn into_inner(self) -> T {
        self.inner
    }
}

fn set_limit(knob: &DynamicLimit, direction: Direction, limit: i64) -> Result<(), LimitError> {
    let limit = validate(direction, limit)?;
    knob.set(limit);
    debug!(%direction, limit, "limit updated");
    Ok(())
}

impl<T: AsyncRead> AsyncRead for RateLimitedStream<T> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let mut this = self.project();

        loop {
            ready!(this.reader.poll_pause(cx));

            if !this.held.is_empty() {
                let amt = this.held.len().min(buf.remaining());
                buf.put_slice(&this.held.split_to(amt));
                return Poll::Ready(Ok(()));
            }

            if this.reader.bypass() {
                return this.inner.as_mut().poll_read(cx, buf);
            }

            let before = buf.filled().len();
            let res = ready!(this.inner.as_mut().poll_read(cx, buf));
            let finished = Instant::now();
            let n = match res {
                Ok(()) => buf.filled().len() - before,
                Err(_) => 0,
            };

            let Some(pause) = this.reader.account(n, finished) else {
                return Poll::Ready(res);
            };

            // take the bytes back out of the caller's buffer until the pause is over
            this.held.extend_from_slice(&buf.filled()[before..]);
            buf.set_filled(before);
            this.reader.pause_until(finished + pause);
        }
    }
}

impl<T: AsyncWrite> RateLimitedStream<T> {
    fn poll_throttled_write<F>(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        write: F,
    ) -> Poll<io::Result<usize>>
    where
        F: FnOnce(Pin<&mut T>, &mut Context<'_>) -> Poll<io::Result<usize>>,
    {
        let mut this = self.project();

        if this.writer.bypass() {
            return write(this.inner, cx);
        }

        // the previous write's pause gates this one
        ready!(this.writer.poll_pause(cx));

        let res = ready!(write(this.inner.as_mut(), cx));
        let finished = Instant::now();
        let n = match res {
            Ok(n) => n,
            Err(_) => 0,
        };

        if let Some(pause) = this.writer.account(n, finished) {
            this.writer.pause_until(finished + pause);
        }

        Poll::Ready(res)
    }
}

impl<T: AsyncWrite> AsyncWrite for RateLimitedStream<T> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.poll_throttled_write(cx, |inner, cx| inner.poll_write(cx, buf))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.project().inner.poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.project().inner.poll_shutdown(cx)
    }

    fn is_write_vectored(&self) -> bool {
        self.inner.is_write_vectored()
    }

    fn poll_write_vectored(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        self.poll_throttled_write(cx, |inner, cx| inner.poll_write_vectored(cx, bufs))
    }
}

/// The clock `thread::sleep` runs on. A paused or mocked Tokio clock would let the baseline
/// drift away from the real sleeps.
fn wall_clock() -> Instant {
    Instant::from_std(std::time::Instant::now())
}

impl<T: Read> Read for RateLimitedStream<T> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if !self.held.is_empty() {
            let amt = self.held.len().min(buf.len());
            buf[..amt].copy_from_slice(&self.held.split_to(amt));
            return Ok(amt);
        }

        if self.reader.bypass() {
            return self.inner.read(buf);
        }

        let res = self.inner.read(buf);
        let n = *res.as_ref().unwrap_or(&0);
        if let Some(pause) = self.reader.account(n, wall_clock()) {
            thread::sleep(pause);
        }

        res
    }
}

impl<T: Write> RateLimitedStream<T> {
    fn throttled_write<F>(&mut self, write: F) -> io::Result<usize>
    where
        F: FnOnce(&mut T) -> io::Result<usize>,
    {
        if self.writer.bypass() {
            return write(&mut self.inner);
        }

        let res = write(&mut self.inner);
        let n = *res.as_ref().unwrap_or(&0);
        if let Some(pause) = self.writer.account(n, wall_clock()) {
            thread::sleep(pause);
        }

        res
    }
}

impl<T: Write> Write for RateLimitedStream<T> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.throttled_write(|inner| inner.write(buf))
    }

    fn write_vectored(&mut self, bufs: &[IoSlice<'_>]) -> io::Result<usize> {
        self.throttled_write(|inner| inner.write_vectored(bufs))
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl<T: Connection> Connection for RateLimitedStream<T> {
    type Addr = T::Addr;

    fn local_addr(&self) -> io::Result<Self::Addr> {
        self.inner.local_addr()
    }

    fn peer_addr(&self) -> io::Result<Self::Addr> {
        self.inner.peer_addr()
    }
}

/// Forwards timeouts to the inner stream. They do not cover throttle pauses.
impl<T: Deadlines> Deadlines for RateLimitedStream<T> {
    fn set_read_timeout(&self, timeout: Option<std::time::Duration>) -> io::Result<()> {
        self.inner.set_read_timeout(timeout)
    }

    fn set_write_timeout(&self, timeout: Option<std::time::Duration>) -> io::Result<()> {
        self.inner.set_write_timeout(timeout)
    }
}

impl<T: fmt::Debug> fmt::Debug for RateLimitedStream<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimitedStream")
            .field("inner", &self.inner)
            .field("read_limit", &self.read_limit())
            .field("write_limit", &self.write_limit())
            .finish()
    }
}
