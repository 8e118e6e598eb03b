//! Critical-section capability
//!
//! The task manager and the clock never talk to an interrupt controller
//! directly. They are generic over [`Interrupts`], implemented once per target.

/// Runs a closure with interrupts masked.
pub trait Interrupts {
    fn free<R>(f: impl FnOnce() -> R) -> R;
}

/// An [`Interrupts`] whose critical section shuts out every other context
/// that can reach the shared state: a single core, with `free` masking the
/// interrupt handlers.
///
/// Only these let a [`Clock`](crate::Clock) or a
/// [`TaskManager`](crate::TaskManager) sit in a `static`.
///
/// ```compile_fail
/// use cooptask::{Clock, NoInterrupts};
///
/// static CLOCK: Clock<NoInterrupts> = Clock::new();
/// ```
///
/// # Safety
///
/// While `free` runs its closure, no other code may touch memory the closure
/// can reach.
pub unsafe trait SingleCore: Interrupts {}

/// Global interrupt enable/disable on the AVR status register.
#[cfg(target_arch = "avr")]
pub struct AvrInterrupts;

#[cfg(target_arch = "avr")]
impl Interrupts for AvrInterrupts {
    #[inline]
    fn free<R>(f: impl FnOnce() -> R) -> R {
        avr_device::interrupt::free(|_cs| f())
    }
}

// SAFETY: the ATmega128 has one core and `interrupt::free` clears the global
// interrupt flag.
#[cfg(target_arch = "avr")]
unsafe impl SingleCore for AvrInterrupts {}

/// For contexts without interrupts: host simulation and tests.
///
/// Masks nothing, so it is not [`SingleCore`].
pub struct NoInterrupts;

impl Interrupts for NoInterrupts {
    #[inline]
    fn free<R>(f: impl FnOnce() -> R) -> R {
        f()
    }
}
