//! Channel 4: LFSR noise.

use crate::apu::components::{Envelope, StandardLengthCounter};
use bincode::{Decode, Encode};
use megaboy_common::num::GetBit;

#[derive(Debug, Clone, Encode, Decode)]
pub struct NoiseChannel {
    lfsr: u16,
    timer: u32,
    clock_shift: u8,
    divisor_code: u8,
    // 7-bit mode feeds the new bit into bit 6 as well
    narrow_width: bool,
    length_counter: StandardLengthCounter,
    envelope: Envelope,
    channel_enabled: bool,
}

impl NoiseChannel {
    pub fn new() -> Self {
        Self {
            lfsr: 0x7FFF,
            timer: 8,
            clock_shift: 0,
            divisor_code: 0,
            narrow_width: false,
            length_counter: StandardLengthCounter::new(),
            envelope: Envelope::new(),
            channel_enabled: false,
        }
    }

    // Divisor table: {8, 16, 32, 48, 64, 80, 96, 112} T-cycles, shifted left
    // by the clock shift. The channel ticks at 1/4 that rate here because it
    // is advanced once per M-cycle.
    fn period(&self) -> u32 {
        let base = if self.divisor_code == 0 { 8 } else { 16 * u32::from(self.divisor_code) };
        (base << self.clock_shift) / 4
    }

    pub fn tick(&mut self) {
        self.timer -= 1;
        if self.timer > 0 {
            return;
        }
        self.timer = self.period().max(1);

        let feedback = (self.lfsr ^ (self.lfsr >> 1)) & 1;
        self.lfsr = (self.lfsr >> 1) | (feedback << 14);

        if self.narrow_width {
            self.lfsr = (self.lfsr & !(1 << 6)) | (feedback << 6);
        }
    }

    pub fn clock_length_counter(&mut self) {
        self.length_counter.clock(&mut self.channel_enabled);
    }

    pub fn clock_envelope(&mut self) {
        self.envelope.clock();
    }

    pub fn enabled(&self) -> bool {
        self.channel_enabled
    }

    /// Current output amplitude, 0-15.
    pub fn sample(&self) -> u8 {
        if !self.channel_enabled || !self.envelope.dac_enabled() {
            return 0;
        }

        u8::from(!self.lfsr.bit(0)) * self.envelope.volume
    }

    // NR41: length reload (write-only)
    pub fn write_register_1(&mut self, value: u8) {
        self.length_counter.load(value);
    }

    // NR42: envelope + DAC power
    pub fn read_register_2(&self) -> u8 {
        self.envelope.read_register()
    }

    pub fn write_register_2(&mut self, value: u8) {
        self.envelope.write_register(value);

        if !self.envelope.dac_enabled() {
            self.channel_enabled = false;
        }
    }

    // NR43: clock shift + width + divisor
    pub fn read_register_3(&self) -> u8 {
        (self.clock_shift << 4) | (u8::from(self.narrow_width) << 3) | self.divisor_code
    }

    pub fn write_register_3(&mut self, value: u8) {
        self.clock_shift = value >> 4;
        self.narrow_width = value.bit(3);
        self.divisor_code = value & 0x07;
    }

    // NR44: length enable + trigger
    pub fn read_register_4(&self) -> u8 {
        0xBF | (u8::from(self.length_counter.enabled) << 6)
    }

    pub fn write_register_4(&mut self, value: u8, frame_sequencer_step: u8) {
        self.length_counter.set_enabled(
            value.bit(6),
            frame_sequencer_step,
            &mut self.channel_enabled,
        );

        if value.bit(7) {
            self.length_counter.trigger(frame_sequencer_step);
            self.envelope.trigger();
            self.lfsr = 0x7FFF;
            self.timer = self.period().max(1);

            self.channel_enabled = self.envelope.dac_enabled();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn triggered_channel(nr43: u8) -> NoiseChannel {
        let mut channel = NoiseChannel::new();
        channel.write_register_2(0xF0);
        channel.write_register_3(nr43);
        channel.write_register_4(0x80, 1);
        channel
    }

    #[test]
    fn lfsr_fifteen_bit_sequence_length() {
        let mut channel = triggered_channel(0x00);

        // A maximal 15-bit LFSR repeats after 32767 shifts
        let initial = channel.lfsr;
        let mut period = 0_u32;
        loop {
            for _ in 0..channel.period().max(1) {
                channel.tick();
            }
            period += 1;
            if channel.lfsr == initial {
                break;
            }
            assert!(period <= 0x8000, "LFSR sequence did not repeat");
        }

        assert_eq!(period, 0x7FFF);
    }

    #[test]
    fn narrow_mode_shortens_sequence() {
        let mut channel = triggered_channel(0x08);

        let initial = channel.lfsr;
        let mut period = 0_u32;
        loop {
            channel.tick();
            period += 1;
            if channel.lfsr & 0x7F == initial & 0x7F && period >= 127 {
                break;
            }
            assert!(period < 0x8000, "7-bit LFSR did not cycle");
        }

        assert!(period <= 0x7FFF / 2);
    }

    #[test]
    fn output_inverts_lfsr_bit_0() {
        let mut channel = triggered_channel(0x00);

        // Freshly triggered LFSR is all ones: output silent
        assert_eq!(channel.sample(), 0);

        channel.lfsr = 0x7FFE;
        assert_eq!(channel.sample(), 15);
    }
}
