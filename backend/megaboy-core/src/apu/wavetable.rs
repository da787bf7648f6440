//! Channel 3: the 32-sample wave channel.

use crate::apu::components::{WaveLengthCounter, WaveTimer};
use crate::GbSystem;
use bincode::{Decode, Encode};
use megaboy_common::num::GetBit;

pub const WAVE_RAM_LEN: usize = 16;

// Power-on wave RAM contents differ between models
const DMG_INITIAL_RAM: [u8; WAVE_RAM_LEN] = [
    0x84, 0x40, 0x43, 0xAA, 0x2D, 0x78, 0x92, 0x3C, 0x60, 0x59, 0x59, 0xB0, 0x34, 0xB8, 0x2E, 0xDA,
];

const CGB_INITIAL_RAM: [u8; WAVE_RAM_LEN] = [
    0x00, 0xFF, 0x00, 0xFF, 0x00, 0xFF, 0x00, 0xFF, 0x00, 0xFF, 0x00, 0xFF, 0x00, 0xFF, 0x00, 0xFF,
];

#[derive(Debug, Clone, Encode, Decode)]
pub struct WaveChannel {
    ram: [u8; WAVE_RAM_LEN],
    timer: WaveTimer,
    length_counter: WaveLengthCounter,
    // NR32 volume code: mute, 100%, 50%, 25%
    volume_code: u8,
    dac_enabled: bool,
    channel_enabled: bool,
}

impl WaveChannel {
    pub fn new(system: GbSystem) -> Self {
        let ram = match system {
            GbSystem::Dmg => DMG_INITIAL_RAM,
            GbSystem::Cgb | GbSystem::DmgCompat => CGB_INITIAL_RAM,
        };

        Self {
            ram,
            timer: WaveTimer::new(),
            length_counter: WaveLengthCounter::new(),
            volume_code: 0,
            dac_enabled: false,
            channel_enabled: false,
        }
    }

    /// APU power-off clears the registers but preserves wave RAM.
    pub fn reset(&mut self) {
        let ram = self.ram;
        *self = Self { ram, ..Self::new(GbSystem::Dmg) };
    }

    pub fn tick(&mut self) {
        if self.channel_enabled {
            self.timer.tick();
        }
    }

    pub fn clock_length_counter(&mut self) {
        self.length_counter.clock(&mut self.channel_enabled);
    }

    pub fn enabled(&self) -> bool {
        self.channel_enabled
    }

    /// Current output amplitude, 0-15.
    pub fn sample(&self) -> u8 {
        if !self.dac_enabled || !self.channel_enabled || self.volume_code == 0 {
            return 0;
        }

        // 32 nibble samples, high nibble first
        let byte = self.ram[usize::from(self.timer.phase >> 1)];
        let nibble = if self.timer.phase.bit(0) { byte & 0x0F } else { byte >> 4 };

        nibble >> (self.volume_code - 1)
    }

    pub fn read_ram(&self, address: u16) -> u8 {
        // While playing, CPU accesses hit the byte at the current wave
        // position instead of the addressed one
        if self.channel_enabled {
            return self.ram[usize::from(self.timer.phase >> 1)];
        }

        self.ram[(address & 0xF) as usize]
    }

    pub fn write_ram(&mut self, address: u16, value: u8) {
        if self.channel_enabled {
            self.ram[usize::from(self.timer.phase >> 1)] = value;
            return;
        }

        self.ram[(address & 0xF) as usize] = value;
    }

    // NR30: DAC power
    pub fn read_register_0(&self) -> u8 {
        0x7F | (u8::from(self.dac_enabled) << 7)
    }

    pub fn write_register_0(&mut self, value: u8) {
        self.dac_enabled = value.bit(7);

        if !self.dac_enabled {
            self.channel_enabled = false;
        }
    }

    // NR31: length reload (write-only)
    pub fn write_register_1(&mut self, value: u8) {
        self.length_counter.load(value);
    }

    // NR32: volume code
    pub fn read_register_2(&self) -> u8 {
        0x9F | (self.volume_code << 5)
    }

    pub fn write_register_2(&mut self, value: u8) {
        self.volume_code = (value >> 5) & 0x03;
    }

    // NR33: frequency low (write-only)
    pub fn write_register_3(&mut self, value: u8) {
        self.timer.write_frequency_low(value);
    }

    // NR34: frequency high + length enable + trigger
    pub fn read_register_4(&self) -> u8 {
        0xBF | (u8::from(self.length_counter.enabled) << 6)
    }

    pub fn write_register_4(&mut self, value: u8, frame_sequencer_step: u8) {
        self.timer.write_frequency_high(value);
        self.length_counter.set_enabled(
            value.bit(6),
            frame_sequencer_step,
            &mut self.channel_enabled,
        );

        if value.bit(7) {
            self.timer.trigger();
            self.length_counter.trigger(frame_sequencer_step);
            self.channel_enabled = self.dac_enabled;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn volume_code_shifts_samples() {
        let mut channel = WaveChannel::new(GbSystem::Dmg);
        channel.ram[0] = 0xF0;
        channel.write_register_0(0x80);
        channel.write_register_4(0x80, 1);

        // Muted by default
        assert_eq!(channel.sample(), 0);

        channel.write_register_2(0x20);
        assert_eq!(channel.sample(), 0xF);

        channel.write_register_2(0x40);
        assert_eq!(channel.sample(), 0x7);

        channel.write_register_2(0x60);
        assert_eq!(channel.sample(), 0x3);
    }

    #[test]
    fn ram_reads_redirect_while_playing() {
        let mut channel = WaveChannel::new(GbSystem::Dmg);
        channel.ram = [0; WAVE_RAM_LEN];
        channel.ram[0] = 0xAB;

        channel.write_register_0(0x80);
        channel.write_register_4(0x80, 1);

        assert_eq!(channel.read_ram(0xFF35), 0xAB);

        // Disabled channel reads the addressed byte
        channel.write_register_0(0x00);
        assert_eq!(channel.read_ram(0xFF35), 0x00);
    }

    #[test]
    fn power_off_reset_preserves_ram() {
        let mut channel = WaveChannel::new(GbSystem::Dmg);
        channel.ram[3] = 0x77;
        channel.write_register_2(0x60);

        channel.reset();
        assert_eq!(channel.ram[3], 0x77);
        assert_eq!(channel.read_register_2(), 0x9F);
    }
}
