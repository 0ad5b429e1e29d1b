//! Sleep-after-transfer bandwidth limiting for byte streams.
//!
//! [`RateLimitedStream`] wraps a duplex stream and keeps its read and write throughput at or
//! below configured limits (bytes per second, `0` for unlimited). Every transfer reaches the
//! inner stream as requested; if it completed sooner than the limit allows, the wrapper
//! pauses before the direction moves on. It works with Tokio's `AsyncRead`/`AsyncWrite`
//! (timer based, never blocks the executor) and with `std::io::Read`/`Write` (sleeps the
//! thread).
//!
//! ```no_run
//! use tokio::io::{self, AsyncWriteExt};
//! use tokio::net::TcpStream;
//! use tokio_ratelimit::io::RateLimitExt;
//!
//! # #[tokio::main]
//! # async fn main() -> io::Result<()> {
//! let mut stream = TcpStream::connect("127.0.0.1:12345")
//!     .await?
//!     .rate_limit(0, 32 * 1024)?; // 32 KiB/s upload, unlimited download
//! stream.write_all(&[0u8; 128 * 1024]).await?; // takes about four seconds
//! # Ok(()) }
//! ```
//!
//! The approximation is simple: there is no token bucket and no burst
//! allowance beyond a single operation. Large transfers converge on the limit; short ones
//! may deviate by up to one operation's worth of time.
pub mod io;
pub mod limit;
pub mod stream;
mod throttle;
pub mod utils;

pub use limit::{Direction, DynamicLimit, LimitError, Limits};
pub use stream::RateLimitedStream;
