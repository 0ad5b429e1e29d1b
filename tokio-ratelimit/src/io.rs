//! Extension and pass-through traits.
//!
//! [`RateLimitExt`] bolts a [`RateLimitedStream`] onto any stream with a method call, in a
//! **static** flavor (plain limits, validated on the spot) and a **dynamic** flavor
//! (shared [`DynamicLimit`] knobs).
//!
//! [`Connection`] and [`Deadlines`] describe the parts of a connection that have nothing to
//! do with throttling. They are implemented for the usual socket types and forwarded
//! unchanged by [`RateLimitedStream`], so a wrapped stream still answers address and
//! timeout queries.
//!
//! ```no_run
//! use std::sync::Arc;
//! use tokio::io::{self, AsyncWriteExt};
//! use tokio::net::TcpStream;
//! use tokio_ratelimit::{DynamicLimit, io::{Connection, RateLimitExt}};
//!
//! # #[tokio::main]
//! # async fn main() -> io::Result<()> {
//! let uplink: Arc<DynamicLimit> = DynamicLimit::new(0);
//! let mut stream = TcpStream::connect("127.0.0.1:12345")
//!     .await?
//!     .rate_limit_dyn(DynamicLimit::new(0), uplink.clone());
//!
//! println!("talking to {}", stream.peer_addr()?);
//! stream.write_all(b"fast").await?;
//! uplink.set(16); // 16 B/s from here on
//! stream.write_all(b"slow").await?;
//! # Ok(()) }
//! ```
use std::{io, net::SocketAddr, sync::Arc, time::Duration};

use crate::{
    limit::{DynamicLimit, LimitError, Limits},
    stream::RateLimitedStream,
};

/// Address accessors of a connected stream.
pub trait Connection {
    type Addr;

    fn local_addr(&self) -> io::Result<Self::Addr>;

    fn peer_addr(&self) -> io::Result<Self::Addr>;
}

impl Connection for tokio::net::TcpStream {
    type Addr = SocketAddr;

    fn local_addr(&self) -> io::Result<SocketAddr> {
        tokio::net::TcpStream::local_addr(self)
    }

    fn peer_addr(&self) -> io::Result<SocketAddr> {
        tokio::net::TcpStream::peer_addr(self)
    }
}

impl Connection for std::net::TcpStream {
    type Addr = SocketAddr;

    fn local_addr(&self) -> io::Result<SocketAddr> {
        std::net::TcpStream::local_addr(self)
    }

    fn peer_addr(&self) -> io::Result<SocketAddr> {
        std::net::TcpStream::peer_addr(self)
    }
}

#[cfg(unix)]
impl Connection for tokio::net::UnixStream {
    type Addr = tokio::net::unix::SocketAddr;

    fn local_addr(&self) -> io::Result<Self::Addr> {
        tokio::net::UnixStream::local_addr(self)
    }

    fn peer_addr(&self) -> io::Result<Self::Addr> {
        tokio::net::UnixStream::peer_addr(self)
    }
}

#[cfg(unix)]
impl Connection for std::os::unix::net::UnixStream {
    type Addr = std::os::unix::net::SocketAddr;

    fn local_addr(&self) -> io::Result<Self::Addr> {
        std::os::unix::net::UnixStream::local_addr(self)
    }

    fn peer_addr(&self) -> io::Result<Self::Addr> {
        std::os::unix::net::UnixStream::peer_addr(self)
    }
}

/// Blocking read/write timeouts of a stream.
///
/// A timeout bounds the inner operation only. When the stream sits behind a
/// [`RateLimitedStream`], the throttle pause that follows a completed operation is not
/// covered, so an operation can take up to the timeout plus one pause.
pub trait Deadlines {
    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()>;

    fn set_write_timeout(&self, timeout: Option<Duration>) -> io::Result<()>;
}

impl Deadlines for std::net::TcpStream {
    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        std::net::TcpStream::set_read_timeout(self, timeout)
    }

    fn set_write_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        std::net::TcpStream::set_write_timeout(self, timeout)
    }
}

#[cfg(unix)]
impl Deadlines for std::os::unix::net::UnixStream {
    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        std::os::unix::net::UnixStream::set_read_timeout(self, timeout)
    }

    fn set_write_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        std::os::unix::net::UnixStream::set_write_timeout(self, timeout)
    }
}

/// Rate-limiting ergonomics for any stream.
///
/// # Examples
/// ```
/// use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt};
/// use tokio_ratelimit::io::RateLimitExt;
///
/// # async fn example() -> std::io::Result<()> {
/// let (mut w, r) = duplex(64);
/// let mut r = r.limit_reads(32)?;
/// w.write_all(b"hello").await?;
/// let mut buf = vec![0; 5];
/// r.read_exact(&mut buf).await?;
/// assert_eq!(&buf, b"hello");
/// # Ok(()) }
/// ```
pub trait RateLimitExt: Sized {
    /// Limit both directions, in bytes per second. `0` leaves a direction unlimited.
    fn rate_limit(self, read: i64, write: i64) -> Result<RateLimitedStream<Self>, LimitError> {
        RateLimitedStream::new(self, read, write)
    }

    /// Limit reads only.
    fn limit_reads(self, read: i64) -> Result<RateLimitedStream<Self>, LimitError> {
        RateLimitedStream::new(self, read, 0)
    }

    /// Limit writes only.
    fn limit_writes(self, write: i64) -> Result<RateLimitedStream<Self>, LimitError> {
        RateLimitedStream::new(self, 0, write)
    }

    /// Limit both directions with a pair validated up front.
    #[must_use]
    fn rate_limit_with(self, limits: Limits) -> RateLimitedStream<Self> {
        RateLimitedStream::from_limits(self, limits)
    }

    /// Limit both directions with **dynamic** knobs that can be changed at runtime.
    #[must_use]
    fn rate_limit_dyn(
        self,
        read: Arc<DynamicLimit>,
        write: Arc<DynamicLimit>,
    ) -> RateLimitedStream<Self> {
        RateLimitedStream::with_limits(self, read, write)
    }
}

impl<T> RateLimitExt for T {}
