//! Task slots and what is stored in them

use core::cell::Cell;
use core::fmt;

/// Higher runs first.
pub type Priority = i16;

/// Written into the priority of a slot that holds no task.
pub const FREE_PRIORITY: Priority = -1;

/// Repeat count meaning "forever".
pub const REPEAT_FOREVER: i16 = -1;

/// Position of a slot in the pool.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SlotId(pub(crate) usize);

impl SlotId {
    #[inline]
    pub const fn index(self) -> usize {
        self.0
    }
}

/// The callback a slot runs.
///
/// The input is an opaque word handed back to the callback, typically an
/// index or an address the caller owns.
#[derive(Clone, Copy)]
pub enum Action {
    Nullary(fn()),
    WithInput(fn(usize), usize),
}

impl Action {
    #[inline]
    pub fn run(self) {
        match self {
            Action::Nullary(f) => f(),
            Action::WithInput(f, input) => f(input),
        }
    }
}

// Callbacks are identified by address.
impl PartialEq for Action {
    fn eq(&self, other: &Self) -> bool {
        match (*self, *other) {
            (Action::Nullary(a), Action::Nullary(b)) => a as usize == b as usize,
            (Action::WithInput(a, x), Action::WithInput(b, y)) => {
                a as usize == b as usize && x == y
            }
            _ => false,
        }
    }
}

impl Eq for Action {}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Action::Nullary(a) => write!(f, "Nullary({:#x})", a as usize),
            Action::WithInput(a, input) => write!(f, "WithInput({:#x}, {})", a as usize, input),
        }
    }
}

/// Which list, if any, owns a slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Membership {
    Free,
    PendingLinkQueue,
    PendingLinkSchedule,
    InQueue,
    InSchedule,
    PendingUnlinkQueue,
    PendingUnlinkSchedule,
}

impl Membership {
    /// Registered and not yet released.
    pub const fn is_live(self) -> bool {
        !matches!(self, Membership::Free)
    }

    /// State after a cancellation request.
    pub(crate) const fn cancelled(self) -> Membership {
        match self {
            Membership::InQueue => Membership::PendingUnlinkQueue,
            Membership::InSchedule => Membership::PendingUnlinkSchedule,
            // never linked, nothing to splice out
            Membership::PendingLinkQueue | Membership::PendingLinkSchedule => Membership::Free,
            other => other,
        }
    }
}

/// One entry of the task pool.
pub(crate) struct Slot {
    pub action: Cell<Option<Action>>,
    pub priority: Cell<Priority>,
    /// Due time while scheduled, enqueue time while queued.
    pub time: Cell<u32>,
    pub period: Cell<u32>,
    pub repeat: Cell<i16>,
    pub next: Cell<Option<SlotId>>,
    pub previous: Cell<Option<SlotId>>,
    pub membership: Cell<Membership>,
}

impl Slot {
    pub const fn new() -> Self {
        Self {
            action: Cell::new(None),
            priority: Cell::new(FREE_PRIORITY),
            time: Cell::new(0),
            period: Cell::new(0),
            repeat: Cell::new(0),
            next: Cell::new(None),
            previous: Cell::new(None),
            membership: Cell::new(Membership::Free),
        }
    }

    #[inline]
    pub fn is_free(&self) -> bool {
        self.membership.get() == Membership::Free
    }

    pub fn matches(&self, action: Action) -> bool {
        self.action.get() == Some(action)
    }

    /// Fill a claimed slot.
    pub fn load(&self, action: Action, priority: Priority, time: u32, period: u32, repeat: i16) {
        self.action.set(Some(action));
        self.priority.set(priority);
        self.time.set(time);
        self.period.set(period);
        self.repeat.set(repeat);
        self.next.set(None);
        self.previous.set(None);
    }

    /// Back to the unused state.
    pub fn release(&self) {
        self.action.set(None);
        self.priority.set(FREE_PRIORITY);
        self.period.set(0);
        self.repeat.set(0);
        self.next.set(None);
        self.previous.set(None);
        self.membership.set(Membership::Free);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alpha() {
        core::hint::black_box(1);
    }
    fn beta() {
        core::hint::black_box(2);
    }
    fn gamma(input: usize) {
        core::hint::black_box(input);
    }

    #[test]
    fn actions_compare_by_callback_and_input() {
        assert_eq!(Action::Nullary(alpha), Action::Nullary(alpha));
        assert_ne!(Action::Nullary(alpha), Action::Nullary(beta));
        assert_eq!(Action::WithInput(gamma, 3), Action::WithInput(gamma, 3));
        assert_ne!(Action::WithInput(gamma, 3), Action::WithInput(gamma, 4));
    }

    #[test]
    fn cancelling_unlinked_slot_frees_it() {
        assert_eq!(Membership::PendingLinkQueue.cancelled(), Membership::Free);
        assert_eq!(Membership::InSchedule.cancelled(), Membership::PendingUnlinkSchedule);
        assert_eq!(
            Membership::PendingUnlinkQueue.cancelled(),
            Membership::PendingUnlinkQueue
        );
    }

    #[test]
    fn release_clears_slot() {
        let slot = Slot::new();
        slot.load(Action::Nullary(alpha), 5, 10, 20, 3);
        slot.membership.set(Membership::InSchedule);
        assert!(slot.matches(Action::Nullary(alpha)));
        slot.release();
        assert!(slot.is_free());
        assert_eq!(slot.priority.get(), FREE_PRIORITY);
        assert!(!slot.matches(Action::Nullary(alpha)));
    }
}
