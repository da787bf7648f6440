//! The IE and IF interrupt registers.

use crate::sm83::InterruptType;
use bincode::{Decode, Encode};

#[derive(Debug, Clone, Default, Encode, Decode)]
pub struct InterruptRegisters {
    enabled: u8,
    flags: u8,
}

impl InterruptRegisters {
    pub fn new() -> Self {
        // IF bit 0 is set at the end of the boot ROM (the first VBlank)
        Self { enabled: 0x00, flags: 0x01 }
    }

    // The upper 3 bits of IE and IF always read back set
    pub fn read_ie(&self) -> u8 {
        self.enabled | 0xE0
    }

    pub fn write_ie(&mut self, value: u8) {
        self.enabled = value & 0x1F;
    }

    pub fn read_if(&self) -> u8 {
        self.flags | 0xE0
    }

    pub fn write_if(&mut self, value: u8) {
        self.flags = value & 0x1F;
    }

    pub fn set_flag(&mut self, interrupt_type: InterruptType) {
        log::trace!("Interrupt flag set: {interrupt_type:?}");

        self.flags |= interrupt_type.register_mask();
    }

    pub fn clear_flag(&mut self, interrupt_type: InterruptType) {
        log::trace!("Interrupt flag cleared: {interrupt_type:?}");

        self.flags &= !interrupt_type.register_mask();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upper_bits_always_read_set() {
        let mut registers = InterruptRegisters::new();
        registers.write_if(0x00);
        registers.write_ie(0x00);

        assert_eq!(registers.read_if(), 0xE0);
        assert_eq!(registers.read_ie(), 0xE0);

        registers.write_if(0xFF);
        assert_eq!(registers.read_if(), 0xFF);
        assert_eq!(registers.read_if() & 0x1F, 0x1F);
    }
}
