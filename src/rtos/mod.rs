//! Cooperative run-to-completion scheduler

pub mod delay;
mod list;
mod pending;
pub mod scheduler;
pub mod task;

pub use delay::TickingDelay;
pub use scheduler::{Config, PermanentTask, TaskManager};
pub use task::{Action, Membership, Priority, SlotId, FREE_PRIORITY, REPEAT_FOREVER};
