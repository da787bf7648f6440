//! Joypad register and button state.

use crate::interrupts::InterruptRegisters;
use crate::sm83::InterruptType;
use crate::GbSystem;
use bincode::{Decode, Encode};
use megaboy_common::num::GetBit;

/// Abstract button identifiers accepted by [`Joypad::update`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GbButton {
    A,
    B,
    Select,
    Start,
    Right,
    Left,
    Up,
    Down,
}

impl GbButton {
    // Bit position within the shared low nibble of JOYP
    fn line(self) -> u8 {
        match self {
            Self::A | Self::Right => 0,
            Self::B | Self::Left => 1,
            Self::Select | Self::Up => 2,
            Self::Start | Self::Down => 3,
        }
    }

    fn is_direction(self) -> bool {
        matches!(self, Self::Right | Self::Left | Self::Up | Self::Down)
    }
}

#[derive(Debug, Clone, Encode, Decode)]
pub struct Joypad {
    select_buttons: bool,
    select_dpad: bool,
    // Active-low line states
    dpad_lines: u8,
    button_lines: u8,
}

impl Joypad {
    pub fn new(system: GbSystem) -> Self {
        // The CGB boot ROM leaves both groups deselected in DMG-compat mode
        let selected = system != GbSystem::DmgCompat;

        Self { select_buttons: selected, select_dpad: selected, dpad_lines: 0xF, button_lines: 0xF }
    }

    /// Press or release a button. A high-to-low transition on a currently
    /// selected line raises the Joypad interrupt.
    pub fn update(
        &mut self,
        button: GbButton,
        pressed: bool,
        interrupt_registers: &mut InterruptRegisters,
    ) {
        let line = button.line();
        let (lines, selected) = if button.is_direction() {
            (&mut self.dpad_lines, self.select_dpad)
        } else {
            (&mut self.button_lines, self.select_buttons)
        };

        if pressed {
            let was_high = lines.bit(line);
            *lines &= !(1 << line);

            if was_high && selected {
                interrupt_registers.set_flag(InterruptType::Joypad);
            }
        } else {
            *lines |= 1 << line;
        }
    }

    // JOYP/P1: select bits are written; the low nibble reflects the selected
    // group(s), all active-low
    pub fn read_joyp(&self) -> u8 {
        if !self.select_buttons && !self.select_dpad {
            return 0xFF;
        }

        let mut value = 0xF0;

        if self.select_dpad {
            value &= !(1 << 4);
            value |= self.dpad_lines;
        }
        if self.select_buttons {
            value &= !(1 << 5);
            value |= self.button_lines;
        }

        value
    }

    pub fn write_joyp(&mut self, value: u8) {
        self.select_buttons = !value.bit(5);
        self.select_dpad = !value.bit(4);
    }
}
