//! `embedded-hal` delay that keeps the task manager running

use embedded_hal::blocking::delay::DelayMs;

use super::scheduler::TaskManager;
use crate::interrupt::Interrupts;

/// Blocks like a delay but calls [`TaskManager::tick`] while waiting.
///
/// Hand this to drivers from the main loop only; a task that waits through
/// it re-enters `tick`. Use [`crate::timing::Clock::delay_ms`] inside tasks.
pub struct TickingDelay<'m, 'a, I, const N: usize> {
    tasks: &'m TaskManager<'a, I, N>,
}

impl<'m, 'a, I: Interrupts, const N: usize> TickingDelay<'m, 'a, I, N> {
    pub fn new(tasks: &'m TaskManager<'a, I, N>) -> Self {
        Self { tasks }
    }
}

impl<I: Interrupts, const N: usize> DelayMs<u32> for TickingDelay<'_, '_, I, N> {
    fn delay_ms(&mut self, ms: u32) {
        self.tasks.wait_ms(ms);
    }
}

impl<I: Interrupts, const N: usize> DelayMs<u16> for TickingDelay<'_, '_, I, N> {
    fn delay_ms(&mut self, ms: u16) {
        self.tasks.wait_ms(u32::from(ms));
    }
}

impl<I: Interrupts, const N: usize> DelayMs<u8> for TickingDelay<'_, '_, I, N> {
    fn delay_ms(&mut self, ms: u8) {
        self.tasks.wait_ms(u32::from(ms));
    }
}
