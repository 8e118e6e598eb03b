#![allow(dead_code)]

use std::cell::RefCell;

use cooptask::{Clock, Event, LogLevel, LogSink, NoInterrupts, TaskManager, TimeStamp};

pub const CAPACITY: usize = 4;

pub type Tasks = TaskManager<'static, NoInterrupts, CAPACITY>;

thread_local! {
    static CLOCK: &'static Clock<NoInterrupts> = Box::leak(Box::new(Clock::new()));
    static TASKS: &'static Tasks = CLOCK.with(|clock| &*Box::leak(Box::new(TaskManager::new(*clock))));
    static RAN: RefCell<Vec<usize>> = const { RefCell::new(Vec::new()) };
    static RAN_AT: RefCell<Vec<u32>> = const { RefCell::new(Vec::new()) };
}

/// Per-thread task manager for tests whose callbacks need to reach it.
pub fn tasks() -> &'static Tasks {
    TASKS.with(|tasks| *tasks)
}

pub fn clock() -> &'static Clock<NoInterrupts> {
    CLOCK.with(|clock| *clock)
}

/// Callback recording its input and the time it ran.
pub fn note(tag: usize) {
    RAN.with(|ran| ran.borrow_mut().push(tag));
    RAN_AT.with(|at| at.borrow_mut().push(clock().now()));
}

pub fn ran() -> Vec<usize> {
    RAN.with(|ran| ran.borrow().clone())
}

pub fn ran_at() -> Vec<u32> {
    RAN_AT.with(|at| at.borrow().clone())
}

/// Step the clock one millisecond at a time, ticking once per step.
pub fn run_for<const N: usize>(tasks: &TaskManager<'_, NoInterrupts, N>, millis: u32) {
    for _ in 0..millis {
        tasks.clock().increment();
        tasks.tick();
    }
}

/// Log sink keeping every record in memory.
#[derive(Default)]
pub struct Recorder {
    pub records: RefCell<Vec<(LogLevel, Event)>>,
}

impl LogSink for Recorder {
    fn record(&self, level: LogLevel, _uptime: TimeStamp, event: Event) {
        self.records.borrow_mut().push((level, event));
    }
}

impl Recorder {
    pub fn events(&self) -> Vec<Event> {
        self.records.borrow().iter().map(|(_, event)| *event).collect()
    }
}
