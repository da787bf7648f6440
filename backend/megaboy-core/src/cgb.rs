//! CGB-only machine registers: the KEY0/KEY1 speed and compatibility
//! switches plus the undocumented FF72-FF75 scratch registers.

use bincode::{Decode, Encode};
use megaboy_common::num::GetBit;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Encode, Decode)]
pub enum CpuSpeed {
    #[default]
    Normal,
    Double,
}

impl CpuSpeed {
    pub fn t_cycles_per_m(self) -> u8 {
        match self {
            Self::Normal => 4,
            Self::Double => 2,
        }
    }

    fn toggle(self) -> Self {
        match self {
            Self::Normal => Self::Double,
            Self::Double => Self::Normal,
        }
    }
}

#[derive(Debug, Clone, Encode, Decode)]
pub struct CgbRegisters {
    pub speed: CpuSpeed,
    pub speed_switch_armed: bool,
    pub double_speed_odd_cycle: bool,
    pub dmg_compat_armed: bool,
    // Undocumented scratch registers
    ff72: u8,
    ff73: u8,
    ff74: u8,
    ff75: u8,
}

impl CgbRegisters {
    pub fn new() -> Self {
        Self {
            speed: CpuSpeed::default(),
            speed_switch_armed: false,
            double_speed_odd_cycle: false,
            dmg_compat_armed: false,
            ff72: 0,
            ff73: 0,
            ff74: 0,
            ff75: 0,
        }
    }

    // KEY0: written by the CGB boot ROM to enable DMG compatibility mode
    pub fn write_key0(&mut self, value: u8) {
        self.dmg_compat_armed = value.bit(2);

        log::trace!("KEY0 write: {value:02X} (DMG compatibility armed = {})", self.dmg_compat_armed);
    }

    // KEY1: speed switch arming + current speed readback
    pub fn read_key1(&self) -> u8 {
        0x7E | (u8::from(self.speed == CpuSpeed::Double) << 7) | u8::from(self.speed_switch_armed)
    }

    pub fn write_key1(&mut self, value: u8) {
        self.speed_switch_armed = value.bit(0);

        log::trace!("KEY1 write: {value:02X} (speed switch armed = {})", self.speed_switch_armed);
    }

    pub fn perform_speed_switch(&mut self) {
        self.speed = self.speed.toggle();
        self.speed_switch_armed = false;
        self.double_speed_odd_cycle = false;

        log::trace!("CPU speed changed to {:?}", self.speed);
    }

    pub fn read_ff72(&self) -> u8 {
        self.ff72
    }

    pub fn write_ff72(&mut self, value: u8) {
        self.ff72 = value;
    }

    pub fn read_ff73(&self) -> u8 {
        self.ff73
    }

    pub fn write_ff73(&mut self, value: u8) {
        self.ff73 = value;
    }

    pub fn read_ff74(&self) -> u8 {
        self.ff74
    }

    pub fn write_ff74(&mut self, value: u8) {
        self.ff74 = value;
    }

    pub fn read_ff75(&self) -> u8 {
        self.ff75 | 0x8F
    }

    pub fn write_ff75(&mut self, value: u8) {
        self.ff75 = value;
    }
}
