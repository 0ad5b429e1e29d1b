//! Bandwidth limits and their validation.
//!
//! Limits are expressed in **bytes per second** and `0` means **unlimited**. Callers hand
//! limits in as signed integers so that a negative value can be rejected instead of
//! silently wrapping or clamping; once validated they are stored unsigned.
//!
//! - [`Limits`] validates a `(read, write)` pair without touching any stream.
//! - [`DynamicLimit`] is a lock-free knob that can be shared and updated at runtime.
//!
//! ```
//! use tokio_ratelimit::limit::{Direction, LimitError, Limits};
//!
//! let limits = Limits::new(4096, 0).unwrap();
//! assert_eq!(limits.read(), 4096);
//! assert!(limits.write_unlimited());
//!
//! let err = Limits::new(4096, -1).unwrap_err();
//! assert_eq!(err, LimitError::Negative { direction: Direction::Write, limit: -1 });
//! ```
use std::{
    fmt, io,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use thiserror::Error;

/// Which half of a duplex stream a limit applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Read,
    Write,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Read => f.write_str("read"),
            Direction::Write => f.write_str("write"),
        }
    }
}

/// Error returned when a limit is rejected.
///
/// Converts into an [`io::Error`] of kind [`io::ErrorKind::InvalidInput`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum LimitError {
    #[error("{direction} limit cannot be negative (got {limit} bytes/s)")]
    Negative { direction: Direction, limit: i64 },
}

impl From<LimitError> for io::Error {
    fn from(err: LimitError) -> Self {
        io::Error::new(io::ErrorKind::InvalidInput, err)
    }
}

/// Checks a single limit and converts it to its stored, unsigned form.
pub fn validate(direction: Direction, limit: i64) -> Result<u64, LimitError> {
    u64::try_from(limit).map_err(|_| LimitError::Negative { direction, limit })
}

/// A validated pair of limits in bytes per second, `0` meaning unlimited.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Limits {
    read: u64,
    write: u64,
}

impl Limits {
    /// Both directions unlimited.
    pub const UNLIMITED: Limits = Limits { read: 0, write: 0 };

    /// Validates both limits. The read limit is checked first.
    pub fn new(read: i64, write: i64) -> Result<Self, LimitError> {
        Ok(Self {
            read: validate(Direction::Read, read)?,
            write: validate(Direction::Write, write)?,
        })
    }

    pub(crate) fn from_parts(read: u64, write: u64) -> Self {
        Self { read, write }
    }

    pub fn read(&self) -> u64 {
        self.read
    }

    pub fn write(&self) -> u64 {
        self.write
    }

    pub fn read_unlimited(&self) -> bool {
        self.read == 0
    }

    pub fn write_unlimited(&self) -> bool {
        self.write == 0
    }

    /// Returns the limit for `direction`.
    pub fn get(&self, direction: Direction) -> u64 {
        match direction {
            Direction::Read => self.read,
            Direction::Write => self.write,
        }
    }
}

/// A cheap, lock-free, shareable limit knob (`bytes/sec`) you can update at runtime.
///
/// Internally an `AtomicU64`; stores use `Release` and loads use `Acquire` ordering.
/// Several streams may share one handle, in which case they share the *value* of the limit
/// but each keeps its own throttle state. Setting `0` disables throttling.
#[derive(Debug, Default)]
pub struct DynamicLimit {
    bytes_per_sec: AtomicU64,
}

impl DynamicLimit {
    /// Create a new handle holding an already validated limit.
    pub fn new(bytes_per_sec: u64) -> Arc<Self> {
        Arc::new(Self {
            bytes_per_sec: AtomicU64::new(bytes_per_sec),
        })
    }

    /// Validate `limit` for `direction` and wrap it in a new handle.
    pub fn checked(direction: Direction, limit: i64) -> Result<Arc<Self>, LimitError> {
        Ok(Self::new(validate(direction, limit)?))
    }

    /// Current limit in bytes per second. `0` means unlimited.
    pub fn get(&self) -> u64 {
        self.bytes_per_sec.load(Ordering::Acquire)
    }

    /// Update the limit. `0` disables throttling.
    pub fn set(&self, bytes_per_sec: u64) {
        self.bytes_per_sec.store(bytes_per_sec, Ordering::Release);
    }

    /// Validate and update. On error the current value is left untouched.
    pub fn try_set(&self, direction: Direction, limit: i64) -> Result<(), LimitError> {
        let limit = validate(direction, limit)?;
        self.set(limit);
        Ok(())
    }

    pub fn is_unlimited(&self) -> bool {
        self.get() == 0
    }
}
