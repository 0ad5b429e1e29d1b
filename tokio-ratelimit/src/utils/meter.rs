//! Throughput metering for asynchronous streams.
//!
//! [`Meter`] sits on top of any `AsyncRead`/`AsyncWrite`, usually a
//! [`RateLimitedStream`](crate::RateLimitedStream), and keeps one [`Tally`] per
//! [`Direction`]. A tally knows how many bytes moved and when the first of them did, which
//! is enough to tell what throughput a limit actually produced.
//!
//! Timestamps come from the Tokio clock, so paused-clock tests see virtual time.
//!
//! ```no_run
//! use tokio::io::{self, AsyncWriteExt, duplex};
//! use tokio_ratelimit::{RateLimitedStream, utils::meter::Meter};
//!
//! # #[tokio::main]
//! # async fn main() -> io::Result<()> {
//! let (client, _server) = duplex(1 << 16);
//! let mut client = Meter::new(RateLimitedStream::new(client, 0, 1024)?);
//!
//! for _ in 0..4 {
//!     client.write_all(&[0u8; 512]).await?;
//! }
//! println!("{:.0} B/s", client.writes().rate_bps().unwrap_or_default());
//! # Ok(()) }
//! ```
use std::{
    io::{self, IoSlice},
    pin::Pin,
    task::{Context, Poll},
};

use pin_project::pin_project;
use tokio::{
    io::{AsyncRead, AsyncWrite, ReadBuf},
    time::Instant,
};

use crate::limit::Direction;

/// Byte count for one direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Tally {
    bytes: u64,
    first: Option<Instant>,
}

impl Tally {
    fn add(&mut self, n: usize) {
        if n == 0 {
            return;
        }
        self.first.get_or_insert_with(Instant::now);
        self.bytes = self.bytes.saturating_add(n as u64);
    }

    pub fn total(&self) -> u64 {
        self.bytes
    }

    /// When the first non-empty transfer completed.
    pub fn start_instant(&self) -> Option<Instant> {
        self.first
    }

    /// Average bytes per second since [`start_instant`](Self::start_instant), `None` before
    /// any byte has moved.
    pub fn rate_bps(&self) -> Option<f64> {
        let secs = self.first?.elapsed().as_secs_f64();
        Some(self.bytes as f64 / secs.max(1e-6))
    }
}

/// Counts the bytes a stream moves in each direction.
#[pin_project]
#[derive(Debug)]
pub struct Meter<T> {
    #[pin]
    inner: T,
    tallies: [Tally; 2],
}

fn slot(direction: Direction) -> usize {
    match direction {
        Direction::Read => 0,
        Direction::Write => 1,
    }
}

fn counted(tally: &mut Tally, poll: Poll<io::Result<usize>>) -> Poll<io::Result<usize>> {
    if let Poll::Ready(Ok(n)) = &poll {
        tally.add(*n);
    }
    poll
}

impl<T> Meter<T> {
    pub fn new(inner: T) -> Self {
        Self {
            inner,
            tallies: [Tally::default(); 2],
        }
    }

    pub fn tally(&self, direction: Direction) -> &Tally {
        &self.tallies[slot(direction)]
    }

    pub fn reads(&self) -> &Tally {
        self.tally(Direction::Read)
    }

    pub fn writes(&self) -> &Tally {
        self.tally(Direction::Write)
    }

    /// Start counting from scratch.
    pub fn reset(&mut self) {
        self.tallies = [Tally::default(); 2];
    }

    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    pub fn into_inner(self) -> T {
        self.inner
    }
}

impl<T: AsyncRead> AsyncRead for Meter<T> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.project();
        let before = buf.filled().len();
        let poll = this
            .inner
            .poll_read(cx, buf)
            .map_ok(|()| buf.filled().len() - before);

        counted(&mut this.tallies[slot(Direction::Read)], poll).map_ok(|_| ())
    }
}

impl<T: AsyncWrite> AsyncWrite for Meter<T> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.project();
        counted(
            &mut this.tallies[slot(Direction::Write)],
            this.inner.poll_write(cx, buf),
        )
    }

    fn poll_write_vectored(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        let this = self.project();
        counted(
            &mut this.tallies[slot(Direction::Write)],
            this.inner.poll_write_vectored(cx, bufs),
        )
    }

    fn is_write_vectored(&self) -> bool {
        self.inner.is_write_vectored()
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.project().inner.poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.project().inner.poll_shutdown(cx)
    }
}
