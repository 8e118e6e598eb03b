//! Logging hook for the task manager
//!
//! The task manager reports what it does through [`LogSink`]. Firmware
//! usually installs a [`SerialLog`] over the console UART; tests install a
//! recorder.

use core::cell::RefCell;

use embedded_hal::serial;
use ufmt::uWrite;

use crate::error::TaskError;
use crate::timing::TimeStamp;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Error = 0,
    Warning = 1,
    Info = 2,
    Debug = 3,
}

impl LogLevel {
    pub const fn tag(self) -> &'static str {
        match self {
            LogLevel::Error => "ERR",
            LogLevel::Warning => "WRN",
            LogLevel::Info => "INF",
            LogLevel::Debug => "DBG",
        }
    }
}

/// Something the task manager wants to report.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Event {
    /// A registration was dropped.
    TaskDropped { priority: i16, reason: TaskError },
    /// The lowest ranked one-shot task was purged to make room.
    TailEvicted { slot: usize, priority: i16 },
    /// The clock was forced back to zero at the given counter value.
    TimerRolled { at: u32 },
    /// A slot index outside the pool was dereferenced.
    InvalidSlot { index: usize },
    /// A starving queued task was promoted.
    PriorityBumped { slot: usize, priority: i16 },
    /// `shutdown` gave up draining the queue.
    ShutdownForced { left: usize },
}

impl ufmt::uDisplay for Event {
    fn fmt<W>(&self, f: &mut ufmt::Formatter<'_, W>) -> Result<(), W::Error>
    where
        W: uWrite + ?Sized,
    {
        match *self {
            Event::TaskDropped { priority, reason } => {
                ufmt::uwrite!(f, "task dropped (priority {}): {}", priority, reason)
            }
            Event::TailEvicted { slot, priority } => {
                ufmt::uwrite!(f, "queue full, purged slot {} (priority {})", slot, priority)
            }
            Event::TimerRolled { at } => ufmt::uwrite!(f, "timer rollover forced at {}", at),
            Event::InvalidSlot { index } => ufmt::uwrite!(f, "invalid slot index {}", index),
            Event::PriorityBumped { slot, priority } => {
                ufmt::uwrite!(f, "slot {} bumped to priority {}", slot, priority)
            }
            Event::ShutdownForced { left } => {
                ufmt::uwrite!(f, "shutdown with {} tasks still queued", left)
            }
        }
    }
}

/// Receives task manager log records.
pub trait LogSink {
    fn record(&self, level: LogLevel, uptime: TimeStamp, event: Event);
}

/// Writes one line per record to a serial port.
///
/// Records below `max_level` verbosity are printed, everything else is
/// discarded.
pub struct SerialLog<W> {
    port: RefCell<W>,
    max_level: LogLevel,
}

// SAFETY: single core, and interrupts run to completion: a borrow taken by
// a handler is released before the code it preempted resumes.
#[cfg(target_arch = "avr")]
unsafe impl<W: Send> Sync for SerialLog<W> {}

impl<W> SerialLog<W>
where
    W: serial::Write<u8>,
{
    pub const fn new(port: W, max_level: LogLevel) -> Self {
        Self {
            port: RefCell::new(port),
            max_level,
        }
    }

    /// Give the port back.
    pub fn release(self) -> W {
        self.port.into_inner()
    }
}

impl<W> LogSink for SerialLog<W>
where
    W: serial::Write<u8>,
{
    fn record(&self, level: LogLevel, uptime: TimeStamp, event: Event) {
        if level > self.max_level {
            return;
        }
        // a record logged from an interrupt while the main loop is printing
        // is dropped rather than interleaved
        let Ok(mut port) = self.port.try_borrow_mut() else {
            return;
        };
        let mut line = Line(&mut *port);
        ufmt::uwrite!(line, "[{}] {} ", uptime, level.tag()).ok();
        ufmt::uwriteln!(line, "{}", event).ok();
        nb::block!(line.0.flush()).ok();
    }
}

// Adapts a byte-wise serial port to ufmt.
struct Line<'a, W>(&'a mut W);

impl<W> uWrite for Line<'_, W>
where
    W: serial::Write<u8>,
{
    type Error = W::Error;

    fn write_str(&mut self, s: &str) -> Result<(), Self::Error> {
        for byte in s.bytes() {
            if byte == b'\n' {
                nb::block!(self.0.write(b'\r'))?;
            }
            nb::block!(self.0.write(byte))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use super::*;
    use embedded_hal_mock::serial::{Mock, Transaction};
    use std::vec::Vec;

    fn expect_line(text: &str) -> Vec<Transaction<u8>> {
        let mut expected = Vec::new();
        for b in text.bytes() {
            if b == b'\n' {
                expected.push(Transaction::write(b'\r'));
            }
            expected.push(Transaction::write(b));
        }
        expected.push(Transaction::flush());
        expected
    }

    #[test]
    fn writes_one_crlf_terminated_line() {
        let port = Mock::new(&expect_line(
            "[0:00:01.250] ERR timer rollover forced at 1250\n",
        ));
        let log = SerialLog::new(port, LogLevel::Info);
        log.record(
            LogLevel::Error,
            TimeStamp::from_millis(1250),
            Event::TimerRolled { at: 1250 },
        );
        log.release().done();
    }

    #[test]
    fn filters_verbose_records() {
        let port: Mock<u8> = Mock::new(&[]);
        let log = SerialLog::new(port, LogLevel::Warning);
        log.record(
            LogLevel::Debug,
            TimeStamp::ZERO,
            Event::PriorityBumped {
                slot: 2,
                priority: 4,
            },
        );
        log.release().done();
    }

    #[test]
    fn renders_dropped_task() {
        let mut out = std::string::String::new();
        ufmt::uwrite!(
            out,
            "{}",
            Event::TaskDropped {
                priority: 1,
                reason: TaskError::PoolExhausted
            }
        )
        .unwrap();
        assert_eq!(out, "task dropped (priority 1): task pool exhausted");
    }
}
