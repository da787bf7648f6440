//! DIV/TIMA timer unit.
//!
//! The divider is a free-running 16-bit counter incremented every T-cycle;
//! DIV reads out its upper 8 bits, and TIMA increments on falling edges of
//! the TAC-selected divider bit. Because components are stepped once per
//! M-cycle, the counter is advanced by 4 per step.

use crate::interrupts::InterruptRegisters;
use crate::sm83::InterruptType;
use crate::GbSystem;
use bincode::{Decode, Encode};
use megaboy_common::num::GetBit;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
enum ClockSelect {
    Zero,
    One,
    Two,
    Three,
}

impl ClockSelect {
    fn from_byte(byte: u8) -> Self {
        match byte & 0x3 {
            0x0 => Self::Zero,
            0x1 => Self::One,
            0x2 => Self::Two,
            0x3 => Self::Three,
            _ => unreachable!("value & 0x3 is always <= 0x3"),
        }
    }

    fn to_bits(self) -> u8 {
        match self {
            Self::Zero => 0,
            Self::One => 1,
            Self::Two => 2,
            Self::Three => 3,
        }
    }

    fn divider_bit(self) -> u8 {
        match self {
            // Every 1024 T-cycles (4.096 KHz)
            Self::Zero => 9,
            // Every 16 T-cycles (262.144 KHz)
            Self::One => 3,
            // Every 64 T-cycles (65.536 KHz)
            Self::Two => 5,
            // Every 256 T-cycles (16.384 KHz)
            Self::Three => 7,
        }
    }
}

#[derive(Debug, Clone, Encode, Decode)]
pub struct GbTimer {
    divider: u16,
    enabled: bool,
    counter: u8,
    modulo: u8,
    clock_select: ClockSelect,
    previous_divider_bit: bool,
    overflow_pending: bool,
    just_reloaded: bool,
    stopped: bool,
}

impl GbTimer {
    pub fn new(system: GbSystem) -> Self {
        // Post-boot-ROM DIV values; DMG boot leaves DIV at $AB
        let divider = match system {
            GbSystem::Dmg => 0xAB00,
            GbSystem::Cgb | GbSystem::DmgCompat => 0x1E00,
        };

        Self { divider, ..Self::new_pre_boot() }
    }

    pub fn new_pre_boot() -> Self {
        Self {
            divider: 0,
            enabled: false,
            counter: 0,
            modulo: 0,
            clock_select: ClockSelect::Zero,
            previous_divider_bit: false,
            overflow_pending: false,
            just_reloaded: false,
            stopped: false,
        }
    }

    pub fn tick_m_cycle(&mut self, interrupt_registers: &mut InterruptRegisters) {
        self.just_reloaded = false;

        // The divider always runs (even with TIMA disabled) except in STOP
        if !self.stopped {
            self.divider = self.divider.wrapping_add(4);
        }

        if !self.enabled {
            return;
        }

        // A TIMA overflow reloads from TMA and raises the interrupt one
        // M-cycle (4 T-cycles) after the increment that overflowed
        if self.overflow_pending {
            self.counter = self.modulo;
            self.overflow_pending = false;
            self.just_reloaded = true;
            interrupt_registers.set_flag(InterruptType::Timer);

            return;
        }

        self.check_for_counter_increment();
    }

    fn check_for_counter_increment(&mut self) {
        let divider_bit = self.enabled && self.divider.bit(self.clock_select.divider_bit());
        if self.previous_divider_bit && !divider_bit {
            let (new_counter, overflow) = self.counter.overflowing_add(1);
            self.counter = new_counter;
            self.overflow_pending = overflow;
        }

        self.previous_divider_bit = divider_bit;
    }

    pub fn set_stopped(&mut self, stopped: bool) {
        self.stopped = stopped;
    }

    // DIV: Divider (upper 8 bits of the internal counter)
    pub fn read_div(&self) -> u8 {
        (self.divider >> 8) as u8
    }

    // Writing any value resets the whole counter, which can glitch-increment
    // TIMA through the falling-edge detector
    pub fn write_div(&mut self) {
        self.divider = 0;
        self.check_for_counter_increment();
    }

    /// A CGB speed switch resets the divider without the glitch increment.
    pub fn reset_divider(&mut self) {
        self.divider = 0;
        self.previous_divider_bit = false;
    }

    // TIMA: Timer counter
    pub fn read_tima(&self) -> u8 {
        self.counter
    }

    pub fn write_tima(&mut self, value: u8) {
        // Writing during the overflow delay cancels the reload; writing on
        // the reload cycle itself loses to TMA
        if self.just_reloaded {
            return;
        }

        self.counter = value;
        self.overflow_pending = false;
    }

    // TMA: Timer modulo
    pub fn read_tma(&self) -> u8 {
        self.modulo
    }

    pub fn write_tma(&mut self, value: u8) {
        self.modulo = value;

        if self.just_reloaded {
            self.counter = value;
        }
    }

    // TAC: Timer control
    pub fn read_tac(&self) -> u8 {
        0xF8 | (u8::from(self.enabled) << 2) | self.clock_select.to_bits()
    }

    pub fn write_tac(&mut self, value: u8) {
        self.enabled = value.bit(2);
        self.clock_select = ClockSelect::from_byte(value);

        self.check_for_counter_increment();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_m_cycles(timer: &mut GbTimer, interrupts: &mut InterruptRegisters, m_cycles: u32) {
        for _ in 0..m_cycles {
            timer.tick_m_cycle(interrupts);
        }
    }

    #[test]
    fn div_read_is_high_byte() {
        let mut timer = GbTimer::new_pre_boot();
        let mut interrupts = InterruptRegisters::new();

        // 256 T-cycles = 64 M-cycles per DIV increment
        run_m_cycles(&mut timer, &mut interrupts, 63);
        assert_eq!(timer.read_div(), 0);

        run_m_cycles(&mut timer, &mut interrupts, 1);
        assert_eq!(timer.read_div(), 1);
    }

    #[test]
    fn div_write_resets_counter() {
        let mut timer = GbTimer::new_pre_boot();
        let mut interrupts = InterruptRegisters::new();

        run_m_cycles(&mut timer, &mut interrupts, 1000);
        assert_ne!(timer.read_div(), 0);

        timer.write_div();
        assert_eq!(timer.read_div(), 0);
    }

    #[test]
    fn tima_overflow_reloads_from_tma_after_delay() {
        let mut timer = GbTimer::new_pre_boot();
        let mut interrupts = InterruptRegisters::new();

        timer.write_tma(0xFC);
        // Enabled, 16 T-cycles (4 M-cycles) per increment
        timer.write_tac(0x05);
        timer.write_tima(0xFF);

        // Run until the increment that overflows TIMA to 0
        while timer.read_tima() == 0xFF {
            timer.tick_m_cycle(&mut interrupts);
        }
        assert_eq!(timer.read_tima(), 0x00);
        assert_eq!(interrupts.read_if() & 0x04, 0);

        // One more M-cycle (4 T-cycles): reload + interrupt
        timer.tick_m_cycle(&mut interrupts);
        assert_eq!(timer.read_tima(), 0xFC);
        assert_ne!(interrupts.read_if() & 0x04, 0);
    }

    #[test]
    fn tima_write_during_overflow_delay_cancels_reload() {
        let mut timer = GbTimer::new_pre_boot();
        let mut interrupts = InterruptRegisters::new();

        timer.write_tma(0xFC);
        timer.write_tac(0x05);
        timer.write_tima(0xFF);

        while timer.read_tima() == 0xFF {
            timer.tick_m_cycle(&mut interrupts);
        }

        timer.write_tima(0x42);
        timer.tick_m_cycle(&mut interrupts);

        assert_eq!(timer.read_tima(), 0x42);
        assert_eq!(interrupts.read_if() & 0x04, 0);
    }
}
