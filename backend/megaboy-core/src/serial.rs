//! Serial port link shifter.
//!
//! No peer is attached, so every incoming bit reads as 1, but games still
//! depend on the transfer clock and the Serial interrupt timing.

use crate::interrupts::InterruptRegisters;
use crate::sm83::InterruptType;
use crate::GbSystem;
use bincode::{Decode, Encode};
use megaboy_common::num::GetBit;

// 8192 Hz bit clock = 1 bit per 128 M-cycles at single speed
const M_CYCLES_PER_BIT: u16 = 128;
// The CGB fast clock (SC bit 1) shifts 32x faster (262144 Hz)
const FAST_CLOCK_SHIFT: u16 = 5;

#[derive(Debug, Clone, Encode, Decode)]
pub struct SerialPort {
    system: GbSystem,
    data: u8,
    transfer_enabled: bool,
    fast_clock: bool,
    internal_clock: bool,
    bit_cycles: u16,
    transferred_bits: u8,
}

impl SerialPort {
    pub fn new(system: GbSystem) -> Self {
        Self {
            system,
            data: 0,
            transfer_enabled: false,
            fast_clock: false,
            internal_clock: false,
            bit_cycles: 0,
            transferred_bits: 0,
        }
    }

    pub fn set_system(&mut self, system: GbSystem) {
        self.system = system;
    }

    pub fn tick_m_cycle(&mut self, interrupt_registers: &mut InterruptRegisters) {
        // Only an internally clocked transfer makes progress with no peer
        if !self.transfer_enabled || !self.internal_clock {
            return;
        }

        self.bit_cycles += 1;

        let cycles_per_bit =
            if self.fast_clock { M_CYCLES_PER_BIT >> FAST_CLOCK_SHIFT } else { M_CYCLES_PER_BIT };

        if self.bit_cycles >= cycles_per_bit {
            self.bit_cycles -= cycles_per_bit;

            // Disconnected link: incoming bits are all 1
            self.data = (self.data << 1) | 0x01;
            self.transferred_bits += 1;

            if self.transferred_bits == 8 {
                self.transfer_enabled = false;
                self.transferred_bits = 0;
                interrupt_registers.set_flag(InterruptType::Serial);
            }
        }
    }

    // SB: transfer data
    pub fn read_data(&self) -> u8 {
        self.data
    }

    pub fn write_data(&mut self, value: u8) {
        self.data = value;

        log::trace!("SB write: {value:02X}");
    }

    // SC: transfer control
    pub fn read_control(&self) -> u8 {
        0x7C | (u8::from(self.transfer_enabled) << 7)
            | (u8::from(self.fast_clock) << 1)
            | u8::from(self.internal_clock)
    }

    pub fn write_control(&mut self, value: u8) {
        self.transfer_enabled = value.bit(7);
        self.fast_clock = self.system.is_cgb_device() && value.bit(1);
        self.internal_clock = value.bit(0);

        if self.transfer_enabled {
            self.bit_cycles = 0;
            self.transferred_bits = 0;
        }

        log::trace!("SC write: {value:02X}");
    }
}
