#![allow(clippy::missing_safety_doc)]

use avr_device::atmega128a::{usart0::RegisterBlock, USART0};
use core::convert::Infallible;
use core::marker::PhantomData;
use embedded_hal::serial;

use crate::config::{CPU_FREQ_HZ, UART_BAUD};

const UBRR: u16 = (CPU_FREQ_HZ / (16 * UART_BAUD) - 1) as u16;

const UDRE: u8 = 1 << 5;
const TXC: u8 = 1 << 6;
const TXEN: u8 = 1 << 3;
// 8 data bits, no parity, 1 stop bit
const FRAME_8N1: u8 = 0b11 << 1;

/// Polled transmitter on USART0.
///
/// Polling keeps it usable from inside a critical section, which is where
/// the task manager may log from. Construction is `const` so the port can
/// live in a `static` log sink; call [`Usart0::configure`] once at startup.
pub struct Usart0 {
    _usart: PhantomData<USART0>,
}

impl Usart0 {
    pub const fn new() -> Self {
        Self {
            _usart: PhantomData,
        }
    }

    /// Set baud rate and frame format, enable the transmitter.
    pub fn configure(usart: USART0) {
        unsafe {
            usart.ubrr0h.write(|w| w.bits((UBRR >> 8) as u8));
            usart.ubrr0l.write(|w| w.bits(UBRR as u8));
            usart.ucsr0c.write(|w| w.bits(FRAME_8N1));
            usart.ucsr0b.write(|w| w.bits(TXEN));
        }
    }

    fn regs(&self) -> &RegisterBlock {
        // SAFETY: the peripheral token was consumed by `configure`
        unsafe { &*USART0::ptr() }
    }
}

impl Default for Usart0 {
    fn default() -> Self {
        Self::new()
    }
}

impl serial::Write<u8> for Usart0 {
    type Error = Infallible;

    fn write(&mut self, byte: u8) -> nb::Result<(), Self::Error> {
        let regs = self.regs();
        if regs.ucsr0a.read().bits() & UDRE == 0 {
            return Err(nb::Error::WouldBlock);
        }
        unsafe {
            // writing TXC clears it, so `flush` waits for this byte
            regs.ucsr0a.modify(|r, w| w.bits(r.bits() | TXC));
            regs.udr0.write(|w| w.bits(byte));
        }
        Ok(())
    }

    fn flush(&mut self) -> nb::Result<(), Self::Error> {
        let status = self.regs().ucsr0a.read().bits();
        if status & UDRE != 0 && status & TXC != 0 {
            Ok(())
        } else {
            Err(nb::Error::WouldBlock)
        }
    }
}

impl ufmt::uWrite for Usart0 {
    type Error = Infallible;

    fn write_str(&mut self, s: &str) -> Result<(), Self::Error> {
        for byte in s.bytes() {
            nb::block!(serial::Write::write(self, byte))?;
        }
        Ok(())
    }
}
