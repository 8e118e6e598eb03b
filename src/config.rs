//! Configuration constants for the task manager firmware

/// CPU frequency in Hz
pub const CPU_FREQ_HZ: u32 = 16_000_000;

/// UART baud rate used by the serial log sink
pub const UART_BAUD: u32 = 9600;

/// Length of one clock tick in milliseconds
pub const TICK_MS: u32 = 1;

/// Number of task slots shared by the ready queue and the schedule
pub const MAX_TASKS: usize = 20;

/// Period of the maintenance pass run from `tick`
pub const SERVICE_TASKS_PERIOD_MS: u32 = 100;

/// Period of the permanent task check
pub const CHECK_PERM_TASKS_PERIOD_MS: u32 = 1000;

/// A queued task waiting longer than this gets its priority bumped
pub const TASK_BUMP_PRIORITY_MS: u32 = 500;

/// Upper bound on how long `shutdown` keeps draining the queue
pub const SHUTDOWN_DRAIN_MS: u32 = 1000;

/// Named priority levels. Higher runs first; values above these are allowed.
pub mod priority {
    pub const NO_PRIORITY: i16 = 0;
    pub const LOWEST: i16 = 1;
    pub const LOWER: i16 = 2;
    pub const LOW: i16 = 3;
    pub const MEDIUM: i16 = 4;
    pub const HIGH: i16 = 5;
    pub const HIGHER: i16 = 6;
    pub const HIGHEST: i16 = 7;
}
