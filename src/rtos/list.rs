//! Doubly linked list threaded through the slot array
//!
//! The ready queue and the schedule are both a `List`; a slot's `next` and
//! `previous` belong to whichever list currently holds it.

use core::cell::Cell;

use super::task::{Slot, SlotId};
use crate::error::TaskError;

pub(crate) struct List {
    head: Cell<Option<SlotId>>,
    tail: Cell<Option<SlotId>>,
    len: Cell<usize>,
}

#[inline]
fn slot(slots: &[Slot], id: SlotId) -> Result<&Slot, TaskError> {
    slots.get(id.0).ok_or(TaskError::InvalidSlot(id.0))
}

impl List {
    pub const fn new() -> Self {
        Self {
            head: Cell::new(None),
            tail: Cell::new(None),
            len: Cell::new(0),
        }
    }

    #[inline]
    pub fn head(&self) -> Option<SlotId> {
        self.head.get()
    }

    #[inline]
    pub fn tail(&self) -> Option<SlotId> {
        self.tail.get()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len.get()
    }

    pub fn clear(&self) {
        self.head.set(None);
        self.tail.set(None);
        self.len.set(0);
    }

    /// Link `id` into the list.
    ///
    /// The scan starts at the tail and walks toward the head. `id` is placed
    /// right behind the first node for which `stays_ahead` holds, or at the
    /// head when no node does.
    pub fn insert(
        &self,
        slots: &[Slot],
        id: SlotId,
        stays_ahead: impl Fn(&Slot) -> bool,
    ) -> Result<(), TaskError> {
        let this = slot(slots, id)?;

        let mut cursor = self.tail.get();
        let mut visited = 0;
        while let Some(at) = cursor {
            let node = slot(slots, at)?;
            if stays_ahead(node) {
                let after = node.next.get();
                this.previous.set(Some(at));
                this.next.set(after);
                node.next.set(Some(id));
                match after {
                    Some(after) => slot(slots, after)?.previous.set(Some(id)),
                    None => self.tail.set(Some(id)),
                }
                self.len.set(self.len.get() + 1);
                return Ok(());
            }
            cursor = node.previous.get();
            visited += 1;
            if visited > slots.len() {
                return Err(TaskError::InvalidSlot(at.0));
            }
        }

        // new head
        let old_head = self.head.get();
        this.previous.set(None);
        this.next.set(old_head);
        match old_head {
            Some(old) => slot(slots, old)?.previous.set(Some(id)),
            None => self.tail.set(Some(id)),
        }
        self.head.set(Some(id));
        self.len.set(self.len.get() + 1);
        Ok(())
    }

    /// Splice `id` out, leaving its own links cleared.
    pub fn unlink(&self, slots: &[Slot], id: SlotId) -> Result<(), TaskError> {
        let this = slot(slots, id)?;
        let previous = this.previous.get();
        let next = this.next.get();

        match previous {
            Some(p) => slot(slots, p)?.next.set(next),
            None => self.head.set(next),
        }
        match next {
            Some(n) => slot(slots, n)?.previous.set(previous),
            None => self.tail.set(previous),
        }
        this.next.set(None);
        this.previous.set(None);
        self.len.set(self.len.get().saturating_sub(1));
        Ok(())
    }

    /// Detach and return the head.
    pub fn pop_front(&self, slots: &[Slot]) -> Result<Option<SlotId>, TaskError> {
        match self.head.get() {
            Some(id) => {
                self.unlink(slots, id)?;
                Ok(Some(id))
            }
            None => Ok(None),
        }
    }

    /// Walk head to tail. Stops early on a broken link.
    #[cfg(test)]
    pub fn iter<'a>(&self, slots: &'a [Slot]) -> Iter<'a> {
        Iter {
            slots,
            cursor: self.head.get(),
            budget: slots.len(),
        }
    }
}

#[cfg(test)]
pub(crate) struct Iter<'a> {
    slots: &'a [Slot],
    cursor: Option<SlotId>,
    budget: usize,
}

#[cfg(test)]
impl Iterator for Iter<'_> {
    type Item = SlotId;

    fn next(&mut self) -> Option<SlotId> {
        let id = self.cursor?;
        if self.budget == 0 {
            return None;
        }
        self.budget -= 1;
        self.cursor = self.slots.get(id.0).and_then(|s| s.next.get());
        Some(id)
    }
}
