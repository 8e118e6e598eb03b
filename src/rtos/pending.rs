//! Deferred link/unlink marker
//!
//! Registration and cancellation only record which slot needs attention;
//! `tick` does the actual splicing. One marker per list.

use core::cell::Cell;

use super::task::SlotId;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Pending {
    None,
    One(SlotId),
    /// More than one request since the last `take`: scan the pool.
    Many,
}

pub(crate) struct Marker(Cell<Pending>);

impl Marker {
    pub const fn new() -> Self {
        Self(Cell::new(Pending::None))
    }

    /// Record a request. Call with interrupts masked.
    pub fn note(&self, id: SlotId) {
        let next = match self.0.get() {
            Pending::None => Pending::One(id),
            Pending::One(old) if old == id => Pending::One(id),
            _ => Pending::Many,
        };
        self.0.set(next);
    }

    /// Read and clear. Call with interrupts masked.
    pub fn take(&self) -> Pending {
        self.0.replace(Pending::None)
    }

    pub fn peek(&self) -> Pending {
        self.0.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_request_escalates_to_many() {
        let marker = Marker::new();
        marker.note(SlotId(3));
        assert_eq!(marker.peek(), Pending::One(SlotId(3)));
        marker.note(SlotId(3));
        assert_eq!(marker.peek(), Pending::One(SlotId(3)));
        marker.note(SlotId(1));
        assert_eq!(marker.take(), Pending::Many);
        assert_eq!(marker.take(), Pending::None);
    }
}
