//! Error taxonomy for task registration

use core::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskError {
    /// No free slot and the ready-queue tail could not be evicted.
    PoolExhausted,
    /// The priority value that marks a free slot was requested.
    ReservedPriority,
    /// A slot index fell outside the pool.
    InvalidSlot(usize),
}

impl fmt::Display for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskError::PoolExhausted => f.write_str("task pool exhausted"),
            TaskError::ReservedPriority => f.write_str("reserved priority"),
            TaskError::InvalidSlot(index) => write!(f, "invalid slot {}", index),
        }
    }
}

impl ufmt::uDisplay for TaskError {
    fn fmt<W>(&self, f: &mut ufmt::Formatter<'_, W>) -> Result<(), W::Error>
    where
        W: ufmt::uWrite + ?Sized,
    {
        match self {
            TaskError::PoolExhausted => f.write_str("task pool exhausted"),
            TaskError::ReservedPriority => f.write_str("reserved priority"),
            TaskError::InvalidSlot(index) => ufmt::uwrite!(f, "invalid slot {}", *index),
        }
    }
}
