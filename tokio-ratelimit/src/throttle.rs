//! Per-direction throttle state.
//!
//! A [`Throttle`] remembers the limit knob for one direction and a baseline instant. After
//! every transfer it compares the time elapsed since the baseline with the time the
//! transfer is allowed to take at the configured rate and reports how long the caller must
//! pause. The async adapter arms a Tokio timer for that pause; the blocking adapter sleeps
//! the thread.
//!
//! Time per byte is computed with integer nanoseconds, `1s / limit`, rounded toward zero
//! and then multiplied by the byte count. Limits above one billion bytes per second round
//! to zero and never pause.
use std::{
    pin::Pin,
    sync::Arc,
    task::{Context, Poll, ready},
    time::Duration,
};

use futures::FutureExt;
use tokio::time::{Instant, Sleep, sleep_until};
use tracing::trace;

use crate::limit::{Direction, DynamicLimit};

const NANOS_PER_SEC: u64 = 1_000_000_000;

/// Time `n` bytes may take at `limit` bytes per second. `limit` must be non-zero.
#[inline]
pub(crate) fn allowed(n: usize, limit: u64) -> Duration {
    let per_byte = NANOS_PER_SEC / limit;
    Duration::from_nanos(per_byte.saturating_mul(n as u64))
}

#[derive(Debug)]
pub(crate) struct Throttle {
    direction: Direction,
    limit: Arc<DynamicLimit>,
    baseline: Option<Instant>,
    sleep: Option<Pin<Box<Sleep>>>,
    paused: bool,
}

impl Throttle {
    pub(crate) fn new(direction: Direction, limit: Arc<DynamicLimit>) -> Self {
        Self {
            direction,
            limit,
            baseline: None,
            sleep: None,
            paused: false,
        }
    }

    pub(crate) fn limit(&self) -> &Arc<DynamicLimit> {
        &self.limit
    }

    /// Returns `true` when the direction is unlimited and the operation should go straight
    /// to the inner stream. An unlimited direction keeps no baseline and owes no pause, so
    /// the first operation after a limit is set again starts fresh.
    #[inline]
    pub(crate) fn bypass(&mut self) -> bool {
        if self.limit.is_unlimited() {
            self.baseline = None;
            self.paused = false;
            return true;
        }
        false
    }

    /// Record a transfer of `n` bytes that completed at `finished` and return the pause
    /// owed, if any.
    ///
    /// The first transfer only establishes the baseline. Afterwards the baseline moves to
    /// the instant the transfer is paid for (`finished + pause`), which is independent of
    /// when the caller actually wakes up.
    pub(crate) fn account(&mut self, n: usize, finished: Instant) -> Option<Duration> {
        let limit = self.limit.get();

        let pause = match self.baseline {
            Some(baseline) if n > 0 && limit > 0 => {
                let elapsed = finished.saturating_duration_since(baseline);
                allowed(n, limit)
                    .checked_sub(elapsed)
                    .filter(|pause| !pause.is_zero())
            }
            _ => None,
        };

        self.baseline = Some(finished + pause.unwrap_or_default());

        if let Some(pause) = pause {
            trace!(direction = %self.direction, bytes = n, limit, ?pause, "throttling");
        }

        pause
    }

    /// Arm the timer so that [`poll_pause`](Self::poll_pause) stays pending until `deadline`.
    pub(crate) fn pause_until(&mut self, deadline: Instant) {
        match self.sleep.as_mut() {
            Some(sleep) => sleep.as_mut().reset(deadline),
            None => self.sleep = Some(Box::pin(sleep_until(deadline))),
        }
        self.paused = true;
    }

    /// Ready immediately unless a pause is armed and has not elapsed yet.
    pub(crate) fn poll_pause(&mut self, cx: &mut Context<'_>) -> Poll<()> {
        if !self.paused {
            return Poll::Ready(());
        }

        if let Some(sleep) = self.sleep.as_mut() {
            ready!(sleep.poll_unpin(cx));
        }
        self.paused = false;

        Poll::Ready(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn throttle(limit: u64) -> Throttle {
        Throttle::new(Direction::Read, DynamicLimit::new(limit))
    }

    #[test]
    fn allowed_divides_before_multiplying() {
        // 1e9 / 4096 = 244140.625, truncated to 244140ns per byte
        assert_eq!(allowed(1024, 4096), Duration::from_nanos(244_140 * 1024));
        assert_eq!(allowed(1, 3), Duration::from_nanos(333_333_333));
        assert_eq!(allowed(0, 10), Duration::ZERO);
    }

    #[test]
    fn allowed_is_zero_above_one_byte_per_nanosecond() {
        assert_eq!(allowed(1 << 20, 2_000_000_000), Duration::ZERO);
    }

    #[test]
    fn first_transfer_only_sets_baseline() {
        let mut t = throttle(10);
        let now = Instant::now();
        assert_eq!(t.account(100, now), None);
        assert_eq!(t.baseline, Some(now));
    }

    #[test]
    fn back_to_back_transfer_pays_full_allowance() {
        let mut t = throttle(10);
        let now = Instant::now();
        t.account(10, now);
        assert_eq!(t.account(10, now), Some(Duration::from_secs(1)));
        assert_eq!(t.baseline, Some(now + Duration::from_secs(1)));
    }

    #[test]
    fn elapsed_time_is_credited() {
        let mut t = throttle(10);
        let now = Instant::now();
        t.account(10, now);
        let pause = t.account(10, now + Duration::from_millis(400));
        assert_eq!(pause, Some(Duration::from_millis(600)));
    }

    #[test]
    fn slow_transfer_is_not_paused() {
        let mut t = throttle(10);
        let now = Instant::now();
        t.account(10, now);
        let later = now + Duration::from_secs(5);
        assert_eq!(t.account(10, later), None);
        assert_eq!(t.baseline, Some(later));
    }

    #[test]
    fn sustained_transfers_pay_every_time() {
        let mut t = throttle(1000);
        let start = Instant::now();
        t.account(100, start);

        // a caller that wakes exactly at each deadline and transfers instantly
        let mut now = start;
        for _ in 0..9 {
            let pause = t.account(100, now).expect("should pause");
            assert_eq!(pause, Duration::from_millis(100));
            now += pause;
        }
        assert_eq!(now - start, Duration::from_millis(900));
    }

    #[test]
    fn empty_transfer_never_pauses_but_moves_baseline() {
        let mut t = throttle(10);
        let now = Instant::now();
        t.account(10, now);
        let later = now + Duration::from_millis(10);
        assert_eq!(t.account(0, later), None);
        assert_eq!(t.baseline, Some(later));
    }

    #[test]
    fn bypass_forgets_baseline() {
        let mut t = throttle(10);
        let now = Instant::now();
        t.account(10, now);

        t.limit().set(0);
        assert!(t.bypass());
        assert_eq!(t.baseline, None);

        t.limit().set(10);
        assert!(!t.bypass());
        assert_eq!(t.account(10, now), None, "fresh baseline after unlimited");
    }

    #[tokio::test(start_paused = true)]
    async fn bypass_drops_an_owed_pause() {
        let mut t = throttle(10);
        t.pause_until(Instant::now() + Duration::from_secs(60));
        assert!(t.paused);

        t.limit().set(0);
        assert!(t.bypass());
        assert!(!t.paused);
    }

    #[test]
    fn limit_change_applies_to_next_transfer() {
        let mut t = throttle(10);
        let now = Instant::now();
        t.account(10, now);
        t.limit().set(20);
        assert_eq!(t.account(10, now), Some(Duration::from_millis(500)));
    }

    #[tokio::test(start_paused = true)]
    async fn pause_blocks_until_deadline() {
        let mut t = throttle(10);
        let start = Instant::now();
        t.pause_until(start + Duration::from_millis(250));

        futures::future::poll_fn(|cx| t.poll_pause(cx)).await;
        assert_eq!(start.elapsed(), Duration::from_millis(250));

        // no pause armed, ready at once
        futures::future::poll_fn(|cx| t.poll_pause(cx)).await;
        assert_eq!(start.elapsed(), Duration::from_millis(250));
    }
}
