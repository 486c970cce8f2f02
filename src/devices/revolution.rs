//! Cumulative revolution counter decoding.
//!
//! Wheel and crank sensors report a wrapping cumulative revolution count and a
//! wrapping 16-bit event timestamp. Rates come from differencing consecutive
//! samples. A sensor that stops moving keeps repeating its last timestamp, so a
//! non-advancing timestamp is only treated as "stopped" after
//! `max_identical` consecutive repeats.

/// Default number of identical timestamps before a stop is confirmed.
pub const MAX_IDENTICAL: u32 = 4;

/// BLE CSC and ANT+ event time resolution (1/1024 s).
pub const TICKS_PER_SECOND_1024: f64 = 1024.0;

/// BLE Cycling Power wheel event time resolution (1/2048 s).
pub const TICKS_PER_SECOND_2048: f64 = 2048.0;

/// Result of feeding one sample into a [`RevolutionCounter`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RevolutionUpdate {
    /// First sample: stored as reference, no rate yet
    Initialized,
    /// Timestamp advanced; rate can be computed
    Rate {
        /// Revolutions since the previous sample
        rev_diff: u32,
        /// Revolutions per second
        revs_per_second: f64,
        /// Revolutions since the first sample, unwrapped
        total_revs: u64,
    },
    /// Timestamp did not advance, stop not yet confirmed
    Stale { identical: u32 },
    /// `max_identical` repeats reached: motion has stopped
    Stopped,
}

/// Rollover-safe differencing of a cumulative counter and its event time.
#[derive(Debug, Clone)]
pub struct RevolutionCounter {
    count_mask: u32,
    ticks_per_second: f64,
    max_identical: u32,
    last: Option<(u32, u16)>,
    total_revs: u64,
    identical: u32,
}

impl RevolutionCounter {
    /// Counter with a 16-bit revolution count (crank data, ANT+ pages).
    pub fn count16(ticks_per_second: f64, max_identical: u32) -> Self {
        Self::new(0xFFFF, ticks_per_second, max_identical)
    }

    /// Counter with a 32-bit revolution count (BLE wheel data).
    pub fn count32(ticks_per_second: f64, max_identical: u32) -> Self {
        Self::new(u32::MAX, ticks_per_second, max_identical)
    }

    fn new(count_mask: u32, ticks_per_second: f64, max_identical: u32) -> Self {
        Self {
            count_mask,
            ticks_per_second,
            max_identical: max_identical.max(1),
            last: None,
            total_revs: 0,
            identical: 0,
        }
    }

    /// Feed one sample.
    pub fn update(&mut self, count: u32, event_time: u16) -> RevolutionUpdate {
        let count = count & self.count_mask;

        let Some((last_count, last_time)) = self.last else {
            self.last = Some((count, event_time));
            return RevolutionUpdate::Initialized;
        };

        let rev_diff = count.wrapping_sub(last_count) & self.count_mask;
        let time_diff = event_time.wrapping_sub(last_time);

        if time_diff == 0 {
            // Sensor has not produced a new event.
            self.identical = self.identical.saturating_add(1);
            return if self.identical == self.max_identical {
                RevolutionUpdate::Stopped
            } else {
                RevolutionUpdate::Stale {
                    identical: self.identical,
                }
            };
        }

        self.identical = 0;
        self.total_revs += u64::from(rev_diff);
        self.last = Some((count, event_time));

        RevolutionUpdate::Rate {
            rev_diff,
            revs_per_second: f64::from(rev_diff) * self.ticks_per_second / f64::from(time_diff),
            total_revs: self.total_revs,
        }
    }

    /// Revolutions since the first sample.
    pub fn total_revs(&self) -> u64 {
        self.total_revs
    }

    pub fn is_initialized(&self) -> bool {
        self.last.is_some()
    }

    /// Forget the reference sample, e.g. after a reconnect.
    pub fn reset(&mut self) {
        self.last = None;
        self.total_revs = 0;
        self.identical = 0;
    }
}
