use avr_device::atmega128a::TC0;

use crate::config::{CPU_FREQ_HZ, TICK_MS};

#[derive(Clone, Copy)]
pub enum Prescaler {
    Stop = 0,
    Direct = 1,
    Div8 = 2,
    Div32 = 3,
    Div64 = 4,
    Div128 = 5,
    Div256 = 6,
    Div1024 = 7,
}

const PRESCALER_MASK: u8 = 0x07;
// WGM01: clear timer on compare match
const CTC: u8 = 1 << 3;
const OCIE0: u8 = 1 << 1;

// 16MHz/64 = 250kHz, 250 counts = 1ms
const COUNTS_PER_TICK: u32 = CPU_FREQ_HZ / 64 / 1000 * TICK_MS;

/// Timer0 in CTC mode firing `TIMER0_COMP` once per clock tick.
pub struct SysTick {
    tc0: TC0,
}

impl SysTick {
    pub fn new(tc0: TC0) -> Self {
        unsafe {
            tc0.tccr0.write(|w| w.bits(0));
            tc0.tcnt0.write(|w| w.bits(0));
            tc0.ocr0.write(|w| w.bits((COUNTS_PER_TICK - 1) as u8));
        }
        Self { tc0 }
    }

    /// Start counting and enable the compare interrupt.
    pub fn start(&mut self) {
        unsafe {
            self.tc0
                .tccr0
                .write(|w| w.bits(CTC | (Prescaler::Div64 as u8 & PRESCALER_MASK)));
            self.tc0.timsk.modify(|r, w| w.bits(r.bits() | OCIE0));
        }
    }

    pub fn stop(&mut self) {
        unsafe {
            self.tc0.timsk.modify(|r, w| w.bits(r.bits() & !OCIE0));
            self.tc0
                .tccr0
                .modify(|r, w| w.bits(r.bits() & !PRESCALER_MASK));
        }
    }

    pub fn release(self) -> TC0 {
        self.tc0
    }
}
