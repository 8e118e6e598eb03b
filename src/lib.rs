//! Cooperative task manager for small single-core targets
//!
//! A millisecond [`Clock`] driven by a timer interrupt, and a
//! [`TaskManager`] that runs registered callbacks to completion from the
//! main loop: queued by priority, or scheduled after a delay, optionally
//! repeating.
//!
//! ```ignore
//! static CLOCK: Clock<AvrInterrupts> = Clock::new();
//! static TASKS: TaskManager<AvrInterrupts, MAX_TASKS> = TaskManager::new(&CLOCK);
//!
//! TASKS.schedule(blink, priority::LOW, 0, 500)?;
//! loop {
//!     TASKS.tick();
//! }
//! ```

#![no_std]

pub mod config;
pub mod error;
#[cfg(target_arch = "avr")]
pub mod hal;
pub mod interrupt;
pub mod logger;
pub mod rtos;
pub mod timing;

pub use error::TaskError;
pub use interrupt::{Interrupts, NoInterrupts, SingleCore};
pub use logger::{Event, LogLevel, LogSink, SerialLog};
pub use rtos::{Action, Config, PermanentTask, Priority, TaskManager, TickingDelay};
pub use timing::{Clock, TimeStamp};

#[cfg(target_arch = "avr")]
pub use interrupt::AvrInterrupts;
