//! Millisecond time base
//!
//! A wrapping `u32` counter advanced by a 1 ms interrupt. Elapsed time is
//! computed tolerating exactly one wrap between two samples; a separate
//! accumulated tally keeps human-readable uptime across forced rolls.

use core::cell::Cell;
use core::fmt;
use core::marker::PhantomData;

use crate::interrupt::{Interrupts, SingleCore};

const MS_PER_SEC: u32 = 1000;
const MS_PER_MIN: u32 = 60 * MS_PER_SEC;
const MS_PER_HOUR: u32 = 60 * MS_PER_MIN;

/// Largest interval `time_since` can measure unambiguously.
pub const MAX_INTERVAL: u32 = u32::MAX / 2;

/// Hours, minutes, seconds and milliseconds.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TimeStamp {
    pub hours: u32,
    pub minutes: u8,
    pub seconds: u8,
    pub millis: u16,
}

impl TimeStamp {
    pub const ZERO: TimeStamp = TimeStamp {
        hours: 0,
        minutes: 0,
        seconds: 0,
        millis: 0,
    };

    /// Split a millisecond count into its fields.
    pub const fn from_millis(ms: u32) -> Self {
        let hours = ms / MS_PER_HOUR;
        let rest = ms % MS_PER_HOUR;
        Self {
            hours,
            minutes: (rest / MS_PER_MIN) as u8,
            seconds: ((rest % MS_PER_MIN) / MS_PER_SEC) as u8,
            millis: (rest % MS_PER_SEC) as u16,
        }
    }

    /// Field-wise sum with carries.
    pub fn carry_add(self, other: TimeStamp) -> TimeStamp {
        let mut millis = self.millis + other.millis;
        let mut seconds = self.seconds + other.seconds;
        let mut minutes = self.minutes + other.minutes;
        let mut hours = self.hours.wrapping_add(other.hours);
        if millis >= 1000 {
            millis -= 1000;
            seconds += 1;
        }
        if seconds >= 60 {
            seconds -= 60;
            minutes += 1;
        }
        if minutes >= 60 {
            minutes -= 60;
            hours = hours.wrapping_add(1);
        }
        TimeStamp {
            hours,
            minutes,
            seconds,
            millis,
        }
    }
}

impl fmt::Display for TimeStamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{:02}:{:02}.{:03}",
            self.hours, self.minutes, self.seconds, self.millis
        )
    }
}

impl ufmt::uDisplay for TimeStamp {
    fn fmt<W>(&self, f: &mut ufmt::Formatter<'_, W>) -> Result<(), W::Error>
    where
        W: ufmt::uWrite + ?Sized,
    {
        ufmt::uwrite!(f, "{}:", self.hours)?;
        pad(f, self.minutes as u16, 2)?;
        f.write_str(":")?;
        pad(f, self.seconds as u16, 2)?;
        f.write_str(".")?;
        pad(f, self.millis, 3)
    }
}

// ufmt has no width specifier
fn pad<W>(f: &mut ufmt::Formatter<'_, W>, value: u16, width: u8) -> Result<(), W::Error>
where
    W: ufmt::uWrite + ?Sized,
{
    if width >= 3 && value < 100 {
        f.write_str("0")?;
    }
    if value < 10 {
        f.write_str("0")?;
    }
    ufmt::uwrite!(f, "{}", value)
}

/// System time tracking.
///
/// One instance lives for the whole program; the timer interrupt calls
/// [`Clock::increment`] and everything else reads it.
pub struct Clock<I> {
    now: Cell<u32>,
    rollover: Cell<u32>,
    total: Cell<TimeStamp>,
    _irq: PhantomData<I>,
}

// SAFETY: `SingleCore` rules out a second core. Every access to the cells
// goes through `I::free`, so the interrupt handler and the main loop never
// observe a torn `u32`.
unsafe impl<I: SingleCore> Sync for Clock<I> {}

impl<I: Interrupts> Clock<I> {
    pub const fn new() -> Self {
        Self::starting_at(0)
    }

    /// Clock whose counter starts at `ms` instead of zero.
    pub const fn starting_at(ms: u32) -> Self {
        Self {
            now: Cell::new(ms),
            rollover: Cell::new(u32::MAX),
            total: Cell::new(TimeStamp::ZERO),
            _irq: PhantomData,
        }
    }

    /// Reset the system time to zero.
    pub fn init(&self) {
        I::free(|| {
            self.now.set(0);
            self.rollover.set(u32::MAX);
            self.total.set(TimeStamp::ZERO);
        });
    }

    /// Timer interrupt hook: one millisecond elapsed.
    #[inline]
    pub fn increment(&self) {
        self.advance(1);
    }

    /// Move time forward by `ms` ticks.
    pub fn advance(&self, ms: u32) {
        I::free(|| {
            let (next, wrapped) = self.now.get().overflowing_add(ms);
            if wrapped {
                // a natural wrap always happens at the top of the range
                self.rollover.set(u32::MAX);
            }
            self.now.set(next);
        });
    }

    #[inline]
    pub fn now(&self) -> u32 {
        I::free(|| self.now.get())
    }

    pub fn now_secs(&self) -> u32 {
        self.now() / MS_PER_SEC
    }

    pub fn now_mins(&self) -> u32 {
        self.now() / MS_PER_MIN
    }

    pub fn now_hours(&self) -> u16 {
        (self.now() / MS_PER_HOUR) as u16
    }

    /// Value of the counter at the last roll (`u32::MAX` if none was forced).
    pub fn rollover_boundary(&self) -> u32 {
        I::free(|| self.rollover.get())
    }

    /// Time elapsed since `time`.
    ///
    /// Correct only if the counter wrapped at most once since `time` was
    /// sampled.
    pub fn time_since(&self, time: u32) -> u32 {
        let (now, rollover) = I::free(|| (self.now.get(), self.rollover.get()));
        if now >= time {
            now - time
        } else {
            now.wrapping_add(rollover.wrapping_sub(time)).wrapping_add(1)
        }
    }

    pub fn time_since_secs(&self, time: u32) -> u32 {
        self.time_since(time) / MS_PER_SEC
    }

    pub fn time_since_mins(&self, time: u32) -> u32 {
        self.time_since(time) / MS_PER_MIN
    }

    pub fn time_since_hours(&self, time: u32) -> u16 {
        (self.time_since(time) / MS_PER_HOUR) as u16
    }

    /// `time_since` with the one-wrap precondition checked in debug builds.
    pub fn check_interval(&self, time: u32) -> u32 {
        let elapsed = self.time_since(time);
        debug_assert!(
            elapsed <= MAX_INTERVAL,
            "interval exceeds half the counter range"
        );
        elapsed
    }

    /// Uptime including every span folded in by [`Clock::roll`].
    pub fn now_formatted(&self) -> TimeStamp {
        let (now, total) = I::free(|| (self.now.get(), self.total.get()));
        TimeStamp::from_millis(now).carry_add(total)
    }

    pub fn since_formatted(&self, time: u32) -> TimeStamp {
        TimeStamp::from_millis(self.time_since(time))
    }

    /// Force the counter back to zero.
    ///
    /// The current value is added to the accumulated uptime and becomes the
    /// rollover boundary used by `time_since`. Returns that value.
    ///
    /// Callers holding future timestamps must renormalize them first; the
    /// task manager does this in `roll_timer`.
    pub fn roll(&self) -> u32 {
        I::free(|| {
            let at = self.now.get();
            self.rollover.set(at);
            self.total.set(self.total.get().carry_add(TimeStamp::from_millis(at)));
            self.now.set(0);
            at
        })
    }

    /// Busy-wait for `delay` ms without running any task.
    pub fn delay_ms(&self, delay: u32) {
        let start = self.now();
        while self.time_since(start) <= delay {
            core::hint::spin_loop();
        }
    }
}

impl<I: Interrupts> Default for Clock<I> {
    fn default() -> Self {
        Self::new()
    }
}
