//! Cooperative task manager
//!
//! A fixed pool of task slots holds two intrusive lists: the ready queue,
//! ordered by descending priority, and the schedule, ordered by due time.
//! [`TaskManager::tick`] runs one queued task per call and moves due tasks
//! from the schedule into the queue.
//!
//! Registration and cancellation may be called from interrupt handlers. They
//! never splice a list; they fill a free slot (or flag a live one) and leave a
//! marker that the next `tick` resolves. Only `tick` and the main-loop-only
//! helpers (`reschedule`, `terminate_all`, `shutdown`) change list structure.

use core::cell::Cell;
use core::convert::Infallible;

use super::list::List;
use super::pending::{Marker, Pending};
use super::task::{
    Action, Membership, Priority, Slot, SlotId, FREE_PRIORITY, REPEAT_FOREVER,
};
use crate::config::{
    CHECK_PERM_TASKS_PERIOD_MS, SERVICE_TASKS_PERIOD_MS, SHUTDOWN_DRAIN_MS,
    TASK_BUMP_PRIORITY_MS,
};
use crate::error::TaskError;
use crate::interrupt::{Interrupts, SingleCore};
use crate::logger::{Event, LogLevel, LogSink};
use crate::timing::{Clock, MAX_INTERVAL};

/// A task that must always be registered.
///
/// The maintenance pass re-adds it whenever it is neither queued nor
/// scheduled.
#[derive(Clone, Copy, Debug)]
pub struct PermanentTask {
    pub action: Action,
    pub priority: Priority,
    pub delay: u32,
    pub period: u32,
}

/// Runtime tuning of the task manager.
#[derive(Clone, Copy, Debug)]
pub struct Config {
    /// Milliseconds between maintenance passes.
    pub service_period: u32,
    /// Bump the queue tail's priority after it waited this long.
    pub bump_priority_after: Option<u32>,
    /// Milliseconds between permanent task checks.
    pub permanent_check_period: u32,
    pub permanent: &'static [PermanentTask],
}

impl Config {
    pub const DEFAULT: Config = Config {
        service_period: SERVICE_TASKS_PERIOD_MS,
        bump_priority_after: Some(TASK_BUMP_PRIORITY_MS),
        permanent_check_period: CHECK_PERM_TASKS_PERIOD_MS,
        permanent: &[],
    };
}

impl Default for Config {
    fn default() -> Self {
        Self::DEFAULT
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Side {
    Queue,
    Schedule,
}

pub struct TaskManager<'a, I, const N: usize> {
    clock: &'a Clock<I>,
    config: Config,
    slots: [Slot; N],
    queue: List,
    schedule: List,
    next_free: Cell<Option<SlotId>>,
    queue_marker: Marker,
    schedule_marker: Marker,
    /// Set while list structure is being changed.
    splicing: Cell<bool>,
    high_water: Cell<usize>,
    last_time: Cell<u32>,
    service_time: Cell<u32>,
    permanent_time: Cell<u32>,
    log: Cell<Option<&'a dyn LogSink>>,
}

// SAFETY: `SingleCore` rules out a second core. Interrupt handlers claim free slots, flip
// membership/priority/marker cells, and unlink the queue tail only while
// `splicing` is clear, always inside `I::free`. Every other list edit happens
// from the main loop.
unsafe impl<I: SingleCore, const N: usize> Sync for TaskManager<'_, I, N> {}

impl<'a, I: Interrupts, const N: usize> TaskManager<'a, I, N> {
    pub const fn new(clock: &'a Clock<I>) -> Self {
        Self::with_config(clock, Config::DEFAULT)
    }

    pub const fn with_config(clock: &'a Clock<I>, config: Config) -> Self {
        Self {
            clock,
            config,
            slots: [const { Slot::new() }; N],
            queue: List::new(),
            schedule: List::new(),
            next_free: Cell::new(if N > 0 { Some(SlotId(0)) } else { None }),
            queue_marker: Marker::new(),
            schedule_marker: Marker::new(),
            splicing: Cell::new(false),
            high_water: Cell::new(0),
            last_time: Cell::new(0),
            service_time: Cell::new(0),
            permanent_time: Cell::new(0),
            log: Cell::new(None),
        }
    }

    /// Clear everything and register the permanent tasks.
    pub fn init(&self) {
        self.terminate_all();
        let now = self.clock.now();
        self.last_time.set(now);
        self.service_time.set(now);
        self.permanent_time.set(now);
        self.check_permanent();
    }

    pub fn set_logger(&self, sink: &'a dyn LogSink) {
        self.log.set(Some(sink));
    }

    pub fn clock(&self) -> &'a Clock<I> {
        self.clock
    }

    // ---- registration ------------------------------------------------------

    /// Queue `task` to run as soon as nothing of higher priority is ready.
    pub fn queue(&self, task: fn(), priority: Priority) -> Result<(), TaskError> {
        self.queue_action(Action::Nullary(task), priority)
    }

    pub fn queue_with_input(
        &self,
        task: fn(usize),
        input: usize,
        priority: Priority,
    ) -> Result<(), TaskError> {
        self.queue_action(Action::WithInput(task, input), priority)
    }

    /// Run `task` after `delay` ms and then every `period` ms, forever.
    /// A zero `period` runs it once.
    pub fn schedule(
        &self,
        task: fn(),
        priority: Priority,
        delay: u32,
        period: u32,
    ) -> Result<(), TaskError> {
        self.schedule_action(Action::Nullary(task), priority, delay, period, REPEAT_FOREVER)
    }

    /// Like [`TaskManager::schedule`] but runs at most `count` times.
    pub fn schedule_count(
        &self,
        task: fn(),
        priority: Priority,
        delay: u32,
        period: u32,
        count: i16,
    ) -> Result<(), TaskError> {
        self.schedule_action(Action::Nullary(task), priority, delay, period, count)
    }

    pub fn schedule_with_input(
        &self,
        task: fn(usize),
        input: usize,
        priority: Priority,
        delay: u32,
        period: u32,
    ) -> Result<(), TaskError> {
        self.schedule_action(
            Action::WithInput(task, input),
            priority,
            delay,
            period,
            REPEAT_FOREVER,
        )
    }

    pub fn schedule_count_with_input(
        &self,
        task: fn(usize),
        input: usize,
        priority: Priority,
        delay: u32,
        period: u32,
        count: i16,
    ) -> Result<(), TaskError> {
        self.schedule_action(Action::WithInput(task, input), priority, delay, period, count)
    }

    pub fn queue_action(&self, action: Action, priority: Priority) -> Result<(), TaskError> {
        let now = self.clock.now();
        self.register(action, priority, now, 0, 0, Side::Queue)
    }

    pub fn schedule_action(
        &self,
        action: Action,
        priority: Priority,
        delay: u32,
        period: u32,
        count: i16,
    ) -> Result<(), TaskError> {
        let due = self.clock.now().wrapping_add(delay);
        self.register(action, priority, due, period, count, Side::Schedule)
    }

    fn register(
        &self,
        action: Action,
        priority: Priority,
        time: u32,
        period: u32,
        repeat: i16,
        side: Side,
    ) -> Result<(), TaskError> {
        let result = if priority == FREE_PRIORITY {
            Err(TaskError::ReservedPriority)
        } else {
            self.allocate(priority)
        };
        let id = match result {
            Ok(id) => id,
            Err(reason) => {
                self.log(LogLevel::Warning, Event::TaskDropped { priority, reason });
                return Err(reason);
            }
        };

        // the claimed slot is invisible to everyone else until noted
        I::free(|| {
            let slot = &self.slots[id.0];
            slot.load(action, priority, time, period, repeat);
            match side {
                Side::Queue => {
                    slot.membership.set(Membership::PendingLinkQueue);
                    self.queue_marker.note(id);
                }
                Side::Schedule => {
                    slot.membership.set(Membership::PendingLinkSchedule);
                    self.schedule_marker.note(id);
                }
            }
        });

        self.locate_free();
        Ok(())
    }

    // ---- slot pool ---------------------------------------------------------

    /// Take a free slot, evicting the queue tail if it ranks below
    /// `priority` and is a one-shot.
    fn allocate(&self, priority: Priority) -> Result<SlotId, TaskError> {
        if let Some(id) = self.claim() {
            return Ok(id);
        }
        if self.locate_free() {
            if let Some(id) = self.claim() {
                return Ok(id);
            }
        }
        self.evict_tail(priority)?;
        self.claim().ok_or(TaskError::PoolExhausted)
    }

    fn claim(&self) -> Option<SlotId> {
        I::free(|| {
            let id = self.next_free.take()?;
            let slot = self.slots.get(id.0)?;
            if !slot.is_free() {
                return None;
            }
            // keeps the slot from being handed out twice before it is loaded
            slot.priority.set(0);
            slot.membership.set(Membership::PendingLinkQueue);
            Some(id)
        })
    }

    /// Pre-locate the next free slot. Returns whether one is now known.
    fn locate_free(&self) -> bool {
        if I::free(|| self.next_free.get().is_some()) {
            return true;
        }
        match self.slots.iter().position(Slot::is_free) {
            Some(index) => I::free(|| {
                if self.next_free.get().is_none() && self.slots[index].is_free() {
                    self.next_free.set(Some(SlotId(index)));
                }
                self.next_free.get().is_some()
            }),
            None => false,
        }
    }

    fn evict_tail(&self, priority: Priority) -> Result<(), TaskError> {
        // an interrupt landed in the middle of a splice
        if self.splicing.get() {
            return Err(TaskError::PoolExhausted);
        }
        let evicted = I::free(|| {
            let tail = self.queue.tail()?;
            let slot = self.slots.get(tail.0)?;
            let victim = slot.priority.get();
            if victim >= priority || slot.period.get() != 0 {
                return None;
            }
            self.queue.unlink(&self.slots, tail).ok()?;
            slot.release();
            self.next_free.set(Some(tail));
            Some((tail, victim))
        });
        match evicted {
            Some((slot, priority)) => {
                self.log(
                    LogLevel::Warning,
                    Event::TailEvicted {
                        slot: slot.0,
                        priority,
                    },
                );
                Ok(())
            }
            None => Err(TaskError::PoolExhausted),
        }
    }

    fn free_slot(&self, id: SlotId) {
        I::free(|| {
            if let Some(slot) = self.slots.get(id.0) {
                slot.release();
                if self.next_free.get().is_none() {
                    self.next_free.set(Some(id));
                }
            }
        });
    }

    fn slot(&self, id: SlotId) -> Option<&Slot> {
        let slot = self.slots.get(id.0);
        if slot.is_none() {
            self.fault(TaskError::InvalidSlot(id.0));
        }
        slot
    }

    // ---- cancellation and lookup -------------------------------------------

    /// Stop every registration of `task`. A run already in progress finishes.
    pub fn cancel(&self, task: fn()) {
        self.cancel_where(Action::Nullary(task), |_| true);
    }

    pub fn cancel_with_input(&self, task: fn(usize), input: usize) {
        self.cancel_where(Action::WithInput(task, input), |_| true);
    }

    /// Cancel only the copies of `task` waiting in the ready queue.
    pub fn cancel_queued(&self, task: fn()) {
        self.cancel_where(Action::Nullary(task), |side| side == Side::Queue);
    }

    pub fn cancel_queued_with_input(&self, task: fn(usize), input: usize) {
        self.cancel_where(Action::WithInput(task, input), |side| side == Side::Queue);
    }

    /// Cancel only the copies of `task` waiting in the schedule.
    pub fn cancel_scheduled(&self, task: fn()) {
        self.cancel_where(Action::Nullary(task), |side| side == Side::Schedule);
    }

    pub fn cancel_scheduled_with_input(&self, task: fn(usize), input: usize) {
        self.cancel_where(Action::WithInput(task, input), |side| side == Side::Schedule);
    }

    pub fn cancel_action(&self, action: Action) {
        self.cancel_where(action, |_| true);
    }

    fn cancel_where(&self, action: Action, wanted: impl Fn(Side) -> bool) {
        for (index, slot) in self.slots.iter().enumerate() {
            let id = SlotId(index);
            I::free(|| {
                if !slot.matches(action) {
                    return;
                }
                let side = match slot.membership.get() {
                    Membership::PendingLinkQueue | Membership::InQueue => Side::Queue,
                    Membership::PendingLinkSchedule | Membership::InSchedule => Side::Schedule,
                    _ => return,
                };
                if wanted(side) {
                    self.mark_cancelled(id, side);
                }
            });
        }
    }

    /// Free a never-linked slot or flag a linked one for unlinking. Call
    /// with interrupts masked.
    fn mark_cancelled(&self, id: SlotId, side: Side) {
        let Some(slot) = self.slots.get(id.0) else {
            return;
        };
        match slot.membership.get().cancelled() {
            Membership::Free => {
                slot.release();
                if self.next_free.get().is_none() {
                    self.next_free.set(Some(id));
                }
            }
            next => {
                slot.membership.set(next);
                match side {
                    Side::Queue => self.queue_marker.note(id),
                    Side::Schedule => self.schedule_marker.note(id),
                }
            }
        }
    }

    /// Set the priority of every registration of `task`.
    ///
    /// A slot already in the ready queue keeps its position; the new
    /// priority applies from its next insertion.
    pub fn change_priority(&self, task: fn(), priority: Priority) {
        self.change_priority_action(Action::Nullary(task), priority);
    }

    pub fn change_priority_with_input(&self, task: fn(usize), input: usize, priority: Priority) {
        self.change_priority_action(Action::WithInput(task, input), priority);
    }

    pub fn change_priority_action(&self, action: Action, priority: Priority) {
        if priority == FREE_PRIORITY {
            return;
        }
        for slot in &self.slots {
            I::free(|| {
                if slot.membership.get().is_live() && slot.matches(action) {
                    slot.priority.set(priority);
                }
            });
        }
    }

    /// Whether `task` is queued, scheduled, or about to be.
    pub fn is_scheduled(&self, task: fn()) -> bool {
        self.is_registered(Action::Nullary(task))
    }

    pub fn is_scheduled_with_input(&self, task: fn(usize), input: usize) -> bool {
        self.is_registered(Action::WithInput(task, input))
    }

    pub fn is_registered(&self, action: Action) -> bool {
        self.state_of(action).is_some()
    }

    /// Membership of the first live registration of `action` that is not
    /// on its way out.
    pub fn state_of(&self, action: Action) -> Option<Membership> {
        self.slots.iter().find_map(|slot| {
            I::free(|| {
                let state = slot.membership.get();
                let live = matches!(
                    state,
                    Membership::PendingLinkQueue
                        | Membership::PendingLinkSchedule
                        | Membership::InQueue
                        | Membership::InSchedule
                );
                (live && slot.matches(action)).then_some(state)
            })
        })
    }

    // ---- main loop ---------------------------------------------------------

    /// Run the first queued task, if any, and service the schedule.
    ///
    /// Must only be called from the main loop, never from an interrupt
    /// handler or from a task.
    pub fn tick(&self) {
        self.splice(|| self.resolve(Side::Queue));

        self.run_next();

        self.splice(|| self.resolve(Side::Schedule));

        let now = self.clock.now();
        let last = self.last_time.replace(now);
        if now == last {
            return;
        }

        self.splice(|| {
            let carried = if now < last {
                self.carry_over_wrap(now)
            } else {
                Ok(())
            };
            if let Err(err) = carried.and_then(|()| self.promote()) {
                self.fault(err);
            }
        });

        if self.clock.check_interval(self.service_time.get()) > self.config.service_period {
            self.service_time.set(self.clock.now());
            self.splice(|| self.service());
        }

        if !self.config.permanent.is_empty()
            && self.clock.time_since(self.permanent_time.get()) > self.config.permanent_check_period
        {
            self.permanent_time.set(self.clock.now());
            self.check_permanent();
        }
    }

    /// Keep calling `tick` until `wait` ms have passed.
    ///
    /// Not for use inside a task: `tick` would re-enter itself.
    pub fn wait_ms(&self, wait: u32) {
        let start = self.clock.now();
        if let Err(never) = nb::block!(self.wait_step(start, wait)) {
            match never {}
        }
    }

    /// One step of [`TaskManager::wait_ms`]: done once more than `wait` ms
    /// passed since `start`, otherwise runs one `tick`.
    pub fn wait_step(&self, start: u32, wait: u32) -> nb::Result<(), Infallible> {
        if self.clock.time_since(start) > wait {
            return Ok(());
        }
        self.tick();
        Err(nb::Error::WouldBlock)
    }

    /// Drain the queue for up to a second, then drop every task.
    pub fn shutdown(&self) {
        let start = self.clock.now();
        while self.clock.time_since(start) < SHUTDOWN_DRAIN_MS {
            self.tick();
            if self.queue.len() == 0 && self.queue_marker.peek() == Pending::None {
                break;
            }
        }
        let left = self.queue.len();
        if left > 0 {
            self.log(LogLevel::Warning, Event::ShutdownForced { left });
        }
        self.terminate_all();
    }

    /// Free every slot and empty both lists.
    pub fn terminate_all(&self) {
        I::free(|| {
            for slot in &self.slots {
                slot.release();
                slot.time.set(0);
            }
            self.queue.clear();
            self.schedule.clear();
            self.queue_marker.take();
            self.schedule_marker.take();
            self.next_free.set(if N > 0 { Some(SlotId(0)) } else { None });
            self.high_water.set(0);
        });
    }

    /// Move an existing registration to a new due time and period, or
    /// register it if there is none.
    ///
    /// Queued copies and any further scheduled copies are cancelled. Main
    /// loop only.
    pub fn reschedule(
        &self,
        task: fn(),
        priority: Priority,
        delay: u32,
        period: u32,
    ) -> Result<(), TaskError> {
        self.reschedule_action(Action::Nullary(task), priority, delay, period)
    }

    pub fn reschedule_with_input(
        &self,
        task: fn(usize),
        input: usize,
        priority: Priority,
        delay: u32,
        period: u32,
    ) -> Result<(), TaskError> {
        self.reschedule_action(Action::WithInput(task, input), priority, delay, period)
    }

    pub fn reschedule_action(
        &self,
        action: Action,
        priority: Priority,
        delay: u32,
        period: u32,
    ) -> Result<(), TaskError> {
        if priority == FREE_PRIORITY {
            return Err(TaskError::ReservedPriority);
        }
        self.cancel_where(action, |side| side == Side::Queue);

        let moved = self.splice(|| {
            let mut moved = false;
            for (index, slot) in self.slots.iter().enumerate() {
                let id = SlotId(index);
                let state = I::free(|| slot.membership.get());
                if !slot.matches(action) {
                    continue;
                }
                match state {
                    Membership::InSchedule | Membership::PendingLinkSchedule if !moved => {
                        moved = true;
                        if state == Membership::InSchedule {
                            if let Err(err) = self.schedule.unlink(&self.slots, id) {
                                self.fault(err);
                                continue;
                            }
                        }
                        I::free(|| {
                            slot.priority.set(priority);
                            slot.time.set(self.clock.now().wrapping_add(delay));
                            slot.period.set(period);
                            slot.repeat.set(REPEAT_FOREVER);
                        });
                        if state == Membership::InSchedule {
                            if let Err(err) = self.link_schedule(id) {
                                self.fault(err);
                            }
                        }
                    }
                    Membership::InSchedule | Membership::PendingLinkSchedule => {
                        I::free(|| self.mark_cancelled(id, Side::Schedule));
                    }
                    _ => {}
                }
            }
            moved
        });

        if moved {
            Ok(())
        } else {
            self.schedule_action(action, priority, delay, period, REPEAT_FOREVER)
        }
    }

    /// Renormalize every pending time stamp and force the clock to zero.
    ///
    /// Future due times become offsets from the roll; scheduled tasks that
    /// are already overdue stay due.
    pub fn roll_timer(&self) {
        let at = I::free(|| {
            let now = self.clock.now();
            for slot in &self.slots {
                let time = slot.time.get();
                match slot.membership.get() {
                    Membership::Free => {}
                    Membership::PendingLinkSchedule
                    | Membership::InSchedule
                    | Membership::PendingUnlinkSchedule => {
                        let ahead = time.wrapping_sub(now);
                        slot.time.set(if ahead <= MAX_INTERVAL { ahead } else { 0 });
                    }
                    _ => {
                        if time > now {
                            slot.time.set(time - now);
                        }
                    }
                }
            }
            self.clock.roll()
        });
        self.last_time.set(u32::MAX);
        self.log(LogLevel::Info, Event::TimerRolled { at });
    }

    // ---- tick internals ----------------------------------------------------

    fn splice<R>(&self, f: impl FnOnce() -> R) -> R {
        let was = self.splicing.replace(true);
        let result = f();
        self.splicing.set(was);
        result
    }

    fn resolve(&self, side: Side) {
        let marker = match side {
            Side::Queue => &self.queue_marker,
            Side::Schedule => &self.schedule_marker,
        };
        match I::free(|| marker.take()) {
            Pending::None => {}
            Pending::One(id) => self.resolve_slot(side, id),
            Pending::Many => {
                for index in 0..N {
                    self.resolve_slot(side, SlotId(index));
                }
            }
        }
    }

    /// Link or unlink one slot according to its membership. Idempotent.
    fn resolve_slot(&self, side: Side, id: SlotId) {
        let Some(slot) = self.slot(id) else {
            return;
        };
        let (link, unlink, linked) = match side {
            Side::Queue => (
                Membership::PendingLinkQueue,
                Membership::PendingUnlinkQueue,
                Membership::InQueue,
            ),
            Side::Schedule => (
                Membership::PendingLinkSchedule,
                Membership::PendingUnlinkSchedule,
                Membership::InSchedule,
            ),
        };
        let state = I::free(|| {
            let state = slot.membership.get();
            if state == link {
                // a cancel from here on must unlink
                slot.membership.set(linked);
            }
            state
        });

        let result = if state == link {
            match side {
                Side::Queue => self.link_queue(id),
                Side::Schedule => self.link_schedule(id),
            }
        } else if state == unlink {
            let list = match side {
                Side::Queue => &self.queue,
                Side::Schedule => &self.schedule,
            };
            let result = list.unlink(&self.slots, id);
            self.free_slot(id);
            result
        } else {
            Ok(())
        };
        if let Err(err) = result {
            self.fault(err);
        }
    }

    fn link_queue(&self, id: SlotId) -> Result<(), TaskError> {
        let priority = self
            .slots
            .get(id.0)
            .ok_or(TaskError::InvalidSlot(id.0))?
            .priority
            .get();
        self.queue
            .insert(&self.slots, id, |node| node.priority.get() >= priority)
    }

    fn link_schedule(&self, id: SlotId) -> Result<(), TaskError> {
        let slot = self.slots.get(id.0).ok_or(TaskError::InvalidSlot(id.0))?;
        let now = self.clock.now();
        let due = slot.time.get();
        // due time wrapped past the top of the counter while still ahead of
        // now: plain comparison would treat it as long overdue
        if due < now && due.wrapping_sub(now) <= MAX_INTERVAL {
            self.roll_timer();
        }
        let due = slot.time.get();
        self.schedule
            .insert(&self.slots, id, |node| node.time.get() <= due)
    }

    fn run_next(&self) {
        let id = match self.splice(|| self.queue.pop_front(&self.slots)) {
            Ok(Some(id)) => id,
            Ok(None) => return,
            Err(err) => {
                self.fault(err);
                return;
            }
        };
        let Some(slot) = self.slot(id) else {
            return;
        };

        let depth = self.queue.len() + self.schedule.len() + 1;
        if depth > self.high_water.get() {
            self.high_water.set(depth);
        }

        let (state, action) = I::free(|| (slot.membership.get(), slot.action.get()));
        if state != Membership::InQueue {
            // cancelled after this tick's queue resolution
            self.free_slot(id);
            return;
        }
        if let Some(action) = action {
            action.run();
        }

        I::free(|| {
            if slot.membership.get() != Membership::InQueue {
                // cancelled by the task itself or an interrupt while it ran
                slot.release();
            } else if slot.period.get() > 0
                && (slot.repeat.get() == REPEAT_FOREVER || slot.repeat.get() > 1)
            {
                let repeat = slot.repeat.get();
                if repeat > 1 {
                    slot.repeat.set(repeat - 1);
                }
                slot.time.set(slot.time.get().wrapping_add(slot.period.get()));
                slot.membership.set(Membership::PendingLinkSchedule);
                self.schedule_marker.note(id);
                return;
            } else {
                // last run, or a count below REPEAT_FOREVER
                slot.release();
            }
            if self.next_free.get().is_none() {
                self.next_free.set(Some(id));
            }
        });
    }

    /// The counter wrapped on its own since the last poll. Entries that fell
    /// due between that poll and the top of the range still hold large
    /// times and sit at the schedule tail; rotate them to the head in order.
    fn carry_over_wrap(&self, now: u32) -> Result<(), TaskError> {
        for _ in 0..self.schedule.len() {
            let Some(tail) = self.schedule.tail() else {
                break;
            };
            let slot = self.slots.get(tail.0).ok_or(TaskError::InvalidSlot(tail.0))?;
            let time = slot.time.get();
            if time <= now || time - now <= MAX_INTERVAL {
                break;
            }
            self.schedule.unlink(&self.slots, tail)?;
            self.schedule.insert(&self.slots, tail, |_| false)?;
        }
        Ok(())
    }

    /// Move every due schedule entry into the ready queue.
    ///
    /// An entry is due once `now` has reached its time, compared modulo the
    /// counter range.
    fn promote(&self) -> Result<(), TaskError> {
        let mut budget = N;
        while let Some(head) = self.schedule.head() {
            let slot = self.slots.get(head.0).ok_or(TaskError::InvalidSlot(head.0))?;
            let overdue = self.clock.now().wrapping_sub(slot.time.get());
            if overdue > MAX_INTERVAL || budget == 0 {
                break;
            }
            budget -= 1;
            self.schedule.unlink(&self.slots, head)?;
            let cancelled = I::free(|| {
                if slot.membership.get() == Membership::PendingUnlinkSchedule {
                    true
                } else {
                    slot.membership.set(Membership::InQueue);
                    false
                }
            });
            if cancelled {
                self.free_slot(head);
            } else {
                self.link_queue(head)?;
            }
        }
        Ok(())
    }

    /// Maintenance: finish stray links, re-arm orphaned slots, and keep the
    /// queue tail from starving.
    fn service(&self) {
        for index in 0..N {
            self.resolve_slot(Side::Queue, SlotId(index));
            self.resolve_slot(Side::Schedule, SlotId(index));
        }

        for (index, slot) in self.slots.iter().enumerate() {
            let id = SlotId(index);
            let orphan = slot.next.get().is_none() && slot.previous.get().is_none();
            if !orphan {
                continue;
            }
            let state = I::free(|| slot.membership.get());
            let rearm = match state {
                Membership::InQueue if self.queue.head() != Some(id) => Some(Side::Queue),
                Membership::InSchedule if self.schedule.head() != Some(id) => Some(Side::Schedule),
                _ => None,
            };
            let result = match rearm {
                Some(Side::Queue) => self.link_queue(id),
                Some(Side::Schedule) => {
                    if slot.period.get() > 0 {
                        slot.time
                            .set(self.clock.now().wrapping_add(slot.period.get()));
                    }
                    self.link_schedule(id)
                }
                None => Ok(()),
            };
            if let Err(err) = result {
                self.fault(err);
            }
        }

        if let Some(limit) = self.config.bump_priority_after {
            self.bump_tail(limit);
        }
    }

    fn bump_tail(&self, limit: u32) {
        let Some(tail) = self.queue.tail() else {
            return;
        };
        if self.queue.head() == Some(tail) {
            return;
        }
        let Some(slot) = self.slot(tail) else {
            return;
        };
        if self.clock.time_since(slot.time.get()) <= limit {
            return;
        }
        let priority = slot.priority.get().saturating_add(1);
        I::free(|| {
            slot.priority.set(priority);
            slot.time.set(self.clock.now());
        });
        let result = self
            .queue
            .unlink(&self.slots, tail)
            .and_then(|()| self.link_queue(tail));
        match result {
            Ok(()) => self.log(
                LogLevel::Debug,
                Event::PriorityBumped {
                    slot: tail.0,
                    priority,
                },
            ),
            Err(err) => self.fault(err),
        }
    }

    fn check_permanent(&self) {
        for task in self.config.permanent {
            if !self.is_registered(task.action) {
                // a full pool is already logged by `register`
                let _ = self.schedule_action(
                    task.action,
                    task.priority,
                    task.delay,
                    task.period,
                    REPEAT_FOREVER,
                );
            }
        }
    }

    // ---- diagnostics -------------------------------------------------------

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn schedule_len(&self) -> usize {
        self.schedule.len()
    }

    /// Largest number of linked tasks seen at once.
    pub fn high_water(&self) -> usize {
        self.high_water.get()
    }

    pub fn free_slots(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_free()).count()
    }

    pub const fn capacity(&self) -> usize {
        N
    }

    fn log(&self, level: LogLevel, event: Event) {
        if let Some(sink) = self.log.get() {
            sink.record(level, self.clock.now_formatted(), event);
        }
    }

    /// An index outside the pool halts in `debug` builds and is skipped
    /// otherwise.
    fn fault(&self, err: TaskError) {
        if cfg!(feature = "debug") {
            panic!("task manager fault: {}", err);
        }
        match err {
            TaskError::InvalidSlot(index) => {
                self.log(LogLevel::Error, Event::InvalidSlot { index })
            }
            reason => self.log(
                LogLevel::Error,
                Event::TaskDropped {
                    priority: FREE_PRIORITY,
                    reason,
                },
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use super::*;
    use crate::interrupt::NoInterrupts;
    use std::boxed::Box;
    use std::cell::RefCell;
    use std::vec::Vec;

    type Manager<'a, const N: usize> = TaskManager<'a, NoInterrupts, N>;
    type TestClock = Clock<NoInterrupts>;

    std::thread_local! {
        static RAN: RefCell<Vec<usize>> = const { RefCell::new(Vec::new()) };
    }

    fn record(tag: usize) {
        RAN.with(|ran| ran.borrow_mut().push(tag));
    }

    fn ran() -> Vec<usize> {
        RAN.with(|ran| ran.borrow().clone())
    }

    fn one() {
        record(1);
    }

    fn two() {
        record(2);
    }

    fn tagged(tag: usize) {
        record(tag);
    }

    fn queued(m: &Manager<'_, 4>) -> Vec<usize> {
        m.queue.iter(&m.slots).map(SlotId::index).collect()
    }

    #[test]
    fn registration_is_deferred_until_tick() {
        let clock = TestClock::new();
        let m = Manager::<4>::new(&clock);
        m.queue(one, 3).unwrap();
        assert_eq!(m.queue_len(), 0);
        assert_eq!(m.state_of(Action::Nullary(one)), Some(Membership::PendingLinkQueue));
        assert!(m.is_scheduled(one));
        m.tick();
        assert_eq!(ran(), [1]);
        assert_eq!(m.free_slots(), 4);
    }

    #[test]
    fn next_free_is_relocated_after_each_claim() {
        let clock = TestClock::new();
        let m = Manager::<4>::new(&clock);
        m.queue(one, 1).unwrap();
        assert_eq!(m.next_free.get(), Some(SlotId(1)));
        m.queue(two, 1).unwrap();
        assert_eq!(m.next_free.get(), Some(SlotId(2)));
    }

    #[test]
    fn eviction_refused_while_splicing() {
        let clock = TestClock::new();
        let m = Manager::<4>::new(&clock);
        for tag in 0..4 {
            m.queue_with_input(tagged, tag, 1).unwrap();
        }
        m.splice(|| m.resolve(Side::Queue));
        assert_eq!(m.queue_len(), 4);
        let refused = m.splice(|| m.queue(one, 9));
        assert_eq!(refused, Err(TaskError::PoolExhausted));
        assert_eq!(m.queue(one, 9), Ok(()));
        assert_eq!(queued(&m), [0, 1, 2]);
    }

    std::thread_local! {
        static SHARED_CLOCK: &'static TestClock = Box::leak(Box::new(TestClock::new()));
        static SHARED: &'static Manager<'static, 4> =
            SHARED_CLOCK.with(|clock| Box::leak(Box::new(Manager::new(*clock))));
    }

    fn quits() {
        record(9);
        SHARED.with(|m| m.cancel(quits));
    }

    #[test]
    fn task_cancelling_itself_is_not_rescheduled() {
        SHARED.with(|m| {
            let clock = m.clock();
            m.schedule(quits, 2, 0, 10).unwrap();
            m.tick();
            clock.advance(1);
            m.tick(); // promote
            assert_eq!(m.state_of(Action::Nullary(quits)), Some(Membership::InQueue));
            m.tick(); // run
            assert_eq!(ran(), [9]);
            assert!(!m.is_scheduled(quits));
            assert_eq!(m.free_slots(), 4);
            for _ in 0..30 {
                clock.advance(1);
                m.tick();
            }
            assert_eq!(ran(), [9]);
        });
    }

    #[test]
    fn head_cancelled_after_resolution_is_freed_unrun() {
        let clock = TestClock::new();
        let m = Manager::<4>::new(&clock);
        m.queue(one, 1).unwrap();
        m.splice(|| m.resolve(Side::Queue));
        m.cancel(one);
        assert_eq!(m.slots[0].membership.get(), Membership::PendingUnlinkQueue);
        // skip the resolution step and go straight to running
        m.run_next();
        assert!(ran().is_empty());
        assert!(m.slots[0].is_free());
    }

    #[test]
    fn roll_renormalizes_due_times() {
        let clock = TestClock::starting_at(1000);
        let m = Manager::<4>::new(&clock);
        m.schedule(one, 1, 500, 0).unwrap();
        m.tick();
        m.roll_timer();
        assert_eq!(clock.now(), 0);
        assert_eq!(m.slots[0].time.get(), 500);
        clock.advance(499);
        m.tick();
        m.tick();
        assert!(ran().is_empty());
        clock.advance(1);
        m.tick();
        m.tick();
        assert_eq!(ran(), [1]);
    }

    #[test]
    fn wrapped_due_time_forces_roll() {
        let clock = TestClock::starting_at(u32::MAX - 50);
        let m = Manager::<4>::new(&clock);
        m.schedule(one, 1, 100, 0).unwrap();
        m.tick();
        assert_eq!(clock.rollover_boundary(), u32::MAX - 50);
        assert_eq!(clock.now(), 0);
        assert_eq!(m.slots[0].time.get(), 100);
        assert_eq!(m.schedule_len(), 1);
    }

    #[test]
    fn natural_wrap_moves_stranded_entries_ahead() {
        let clock = TestClock::starting_at(u32::MAX - 20);
        let m = Manager::<4>::new(&clock);
        m.init();
        m.schedule(one, 1, 15, 0).unwrap();
        m.schedule(two, 1, 18, 0).unwrap();
        m.tick();
        assert_eq!(m.schedule_len(), 2);

        clock.advance(30);
        m.schedule_with_input(tagged, 7, 1, 100, 0).unwrap();
        m.tick();
        assert_eq!(m.queue.head(), Some(SlotId(0)));
        assert_eq!(m.queue_len(), 2);
        assert_eq!(m.schedule.head(), Some(SlotId(2)));
        assert_eq!(m.schedule_len(), 1);

        m.tick();
        m.tick();
        assert_eq!(ran(), [1, 2]);
    }

    #[test]
    fn count_below_forever_runs_once() {
        let clock = TestClock::new();
        let m = Manager::<4>::new(&clock);
        m.schedule_count(one, 1, 0, 10, -5).unwrap();
        for _ in 0..50 {
            clock.increment();
            m.tick();
        }
        assert_eq!(ran(), [1]);
        assert_eq!(m.free_slots(), 4);
    }

    #[test]
    fn overdue_entry_is_not_mistaken_for_wrapped() {
        let clock = TestClock::starting_at(0x8000_0010);
        let m = Manager::<4>::new(&clock);
        m.slots[0].load(Action::Nullary(one), 1, 0x7FFF_FFF0, 0, 0);
        m.slots[0].membership.set(Membership::InSchedule);
        m.link_schedule(SlotId(0)).unwrap();
        assert_eq!(clock.now(), 0x8000_0010);
        m.promote().unwrap();
        assert_eq!(m.queue_len(), 1);
    }

    #[test]
    fn starving_tail_is_bumped() {
        let clock = TestClock::new();
        let config = Config {
            bump_priority_after: Some(50),
            service_period: 10,
            ..Config::DEFAULT
        };
        let m = TaskManager::<NoInterrupts, 4>::with_config(&clock, config);
        m.queue(one, 5).unwrap();
        m.queue(two, 1).unwrap();
        m.splice(|| m.resolve(Side::Queue));
        clock.advance(60);
        m.service();
        assert_eq!(m.slots[1].priority.get(), 2);
        assert_eq!(m.queue.tail(), Some(SlotId(1)));
    }

    #[test]
    fn orphaned_periodic_slot_is_rearmed() {
        let clock = TestClock::new();
        let m = Manager::<4>::new(&clock);
        m.schedule(one, 1, 10, 20).unwrap();
        m.schedule(two, 1, 5, 20).unwrap();
        m.tick();
        assert_eq!(m.schedule_len(), 2);
        // lose slot 0 from the list without telling it
        m.schedule.unlink(&m.slots, SlotId(0)).unwrap();
        m.slots[0].membership.set(Membership::InSchedule);
        m.service();
        assert_eq!(m.schedule_len(), 2);
        assert_eq!(m.slots[0].time.get(), 20);
    }

    #[test]
    fn reserved_priority_is_rejected() {
        let clock = TestClock::new();
        let m = Manager::<4>::new(&clock);
        assert_eq!(m.queue(one, FREE_PRIORITY), Err(TaskError::ReservedPriority));
        assert_eq!(m.free_slots(), 4);
    }
}
