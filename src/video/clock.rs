//! Frame pacing clock
//!
//! Converts a target frame rate into scheduled wake times against a fixed
//! epoch. Tick n is due at `epoch + n * ticks_per_frame / clock_rate`
//! seconds, so a slow tick never shifts the schedule for later ones.

use std::time::Duration;

use tokio::time::Instant;

/// Standard 90 kHz video RTP clock
pub const VIDEO_CLOCK_RATE: u32 = 90_000;

/// Timestamp attached to one paced frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacedTimestamp {
    /// Frame sequence number, increases by 1 per frame
    pub sequence: u64,
    /// Clock ticks since the stream epoch
    pub ticks: u64,
    /// Ticks per second
    pub clock_rate: u32,
}

impl PacedTimestamp {
    /// Presentation time relative to the stream epoch
    pub fn presentation_time(&self) -> Duration {
        let nanos = self.ticks as u128 * 1_000_000_000 / self.clock_rate as u128;
        Duration::from_nanos(nanos as u64)
    }
}

#[derive(Debug)]
enum ClockPhase {
    NotStarted,
    Started { epoch: Instant, ticks: u64 },
}

/// Paces frame production at a fixed target rate.
///
/// The first `next_tick` call establishes the epoch and returns
/// immediately with tick 0. Later calls suspend until the tick's
/// scheduled instant, or return at once when the caller is already
/// behind schedule (one late tick, no catch-up burst).
#[derive(Debug)]
pub struct FrameClock {
    clock_rate: u32,
    ticks_per_frame: u64,
    phase: ClockPhase,
}

impl FrameClock {
    /// Create a clock for the given frame rate on the 90 kHz video clock
    pub fn new(target_fps: u32) -> Self {
        Self::with_clock_rate(target_fps, VIDEO_CLOCK_RATE)
    }

    /// Create a clock with an explicit clock rate
    pub fn with_clock_rate(target_fps: u32, clock_rate: u32) -> Self {
        let fps = target_fps.max(1);
        Self {
            clock_rate,
            ticks_per_frame: (clock_rate / fps) as u64,
            phase: ClockPhase::NotStarted,
        }
    }

    /// Ticks the timestamp advances per frame
    pub fn ticks_per_frame(&self) -> u64 {
        self.ticks_per_frame
    }

    /// Nominal duration of one frame
    pub fn frame_duration(&self) -> Duration {
        let nanos = self.ticks_per_frame as u128 * 1_000_000_000 / self.clock_rate as u128;
        Duration::from_nanos(nanos as u64)
    }

    /// Wait until the next tick is due and return its timestamp
    pub async fn next_tick(&mut self, sequence: u64) -> PacedTimestamp {
        let (timestamp, due) = self.schedule(Instant::now(), sequence);
        if let Some(due) = due {
            tokio::time::sleep_until(due).await;
        }
        timestamp
    }

    /// Advance the clock state and compute the tick's deadline.
    ///
    /// Returns the timestamp and, when the tick is not yet due, the
    /// instant to sleep until. Split from `next_tick` so the schedule
    /// math is testable without waiting.
    fn schedule(&mut self, now: Instant, sequence: u64) -> (PacedTimestamp, Option<Instant>) {
        match &mut self.phase {
            ClockPhase::NotStarted => {
                self.phase = ClockPhase::Started {
                    epoch: now,
                    ticks: 0,
                };
                let timestamp = PacedTimestamp {
                    sequence,
                    ticks: 0,
                    clock_rate: self.clock_rate,
                };
                (timestamp, None)
            }
            ClockPhase::Started { epoch, ticks } => {
                *ticks += self.ticks_per_frame;
                let offset = *ticks as u128 * 1_000_000_000 / self.clock_rate as u128;
                let due = *epoch + Duration::from_nanos(offset as u64);
                let timestamp = PacedTimestamp {
                    sequence,
                    ticks: *ticks,
                    clock_rate: self.clock_rate,
                };
                let wait = (due > now).then_some(due);
                (timestamp, wait)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_first_tick_returns_immediately() {
        let mut clock = FrameClock::new(30);
        let before = Instant::now();
        let ts = clock.next_tick(0).await;
        assert_eq!(ts.ticks, 0);
        assert_eq!(ts.sequence, 0);
        assert_eq!(Instant::now(), before);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tick_delta_is_clock_rate_over_fps() {
        let mut clock = FrameClock::new(30);
        let first = clock.next_tick(0).await;
        let second = clock.next_tick(1).await;
        let third = clock.next_tick(2).await;
        assert_eq!(second.ticks - first.ticks, 3000);
        assert_eq!(third.ticks - second.ticks, 3000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_cumulative_drift_over_100_ticks() {
        let mut clock = FrameClock::new(30);
        let epoch = Instant::now();
        let mut last = clock.next_tick(0).await;
        for seq in 1..=100u64 {
            let ts = clock.next_tick(seq).await;
            assert_eq!(ts.ticks - last.ticks, 3000);
            last = ts;
        }
        // Tick 100 is scheduled from the epoch, not from the previous
        // tick, so the total elapsed time stays on the absolute grid.
        let expected = Duration::from_nanos(100 * 3000 * 1_000_000_000 / 90_000);
        let elapsed = epoch.elapsed();
        let error = if elapsed > expected {
            elapsed - expected
        } else {
            expected - elapsed
        };
        assert!(error < Duration::from_millis(1), "drift: {:?}", error);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tick_pends_until_due() {
        use tokio_test::{assert_pending, assert_ready, task};

        let mut clock = FrameClock::new(30);
        clock.next_tick(0).await;

        // Tick 1 is due 3000 ticks (33.3 ms) after the epoch.
        let mut tick = task::spawn(clock.next_tick(1));
        assert_pending!(tick.poll());
        tokio::time::advance(Duration::from_millis(33)).await;
        assert_pending!(tick.poll());
        tokio::time::advance(Duration::from_millis(1)).await;
        let ts = assert_ready!(tick.poll());
        assert_eq!(ts.ticks, 3000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_caller_does_not_sleep() {
        let mut clock = FrameClock::new(30);
        clock.next_tick(0).await;
        // Fall several frame periods behind.
        tokio::time::advance(Duration::from_secs(1)).await;
        let before = Instant::now();
        let ts = clock.next_tick(1).await;
        assert_eq!(Instant::now(), before);
        // One tick of progress, no catch-up burst.
        assert_eq!(ts.ticks, 3000);
    }

    #[test]
    fn test_presentation_time() {
        let ts = PacedTimestamp {
            sequence: 60,
            ticks: 2 * VIDEO_CLOCK_RATE as u64,
            clock_rate: VIDEO_CLOCK_RATE,
        };
        assert_eq!(ts.presentation_time(), Duration::from_secs(2));
    }

    #[test]
    fn test_frame_duration() {
        let clock = FrameClock::new(30);
        assert_eq!(clock.ticks_per_frame(), 3000);
        assert_eq!(clock.frame_duration(), Duration::from_nanos(33_333_333));
    }
}
