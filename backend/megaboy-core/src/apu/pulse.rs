//! The two pulse channels; channel 1 carries the frequency sweep unit.

use crate::apu::components::{Envelope, PulseTimer, StandardLengthCounter};
use bincode::{Decode, Encode};
use megaboy_common::num::GetBit;

// The four duty waveforms, one bit per phase step
const DUTY_PATTERNS: [u8; 4] = [
    // 12.5%
    0b0000_0001,
    // 25%
    0b1000_0001,
    // 50%
    0b1000_0111,
    // 75%
    0b0111_1110,
];

#[derive(Debug, Clone, Encode, Decode)]
struct SweepUnit {
    enabled: bool,
    shadow_frequency: u16,
    timer: u8,
    period: u8,
    negate: bool,
    shift: u8,
}

impl SweepUnit {
    fn new() -> Self {
        Self { enabled: false, shadow_frequency: 0, timer: 0, period: 0, negate: false, shift: 0 }
    }

    fn read_register(&self) -> u8 {
        0x80 | (self.period << 4) | (u8::from(self.negate) << 3) | self.shift
    }

    fn write_register(&mut self, value: u8) {
        self.period = (value >> 4) & 0x07;
        self.negate = value.bit(3);
        self.shift = value & 0x07;
    }

    fn timer_reload(&self) -> u8 {
        // A zero period reloads the timer with 8
        if self.period == 0 { 8 } else { self.period }
    }

    fn next_frequency(&self) -> u16 {
        let delta = self.shadow_frequency >> self.shift;
        if self.negate {
            self.shadow_frequency.wrapping_sub(delta)
        } else {
            self.shadow_frequency + delta
        }
    }

    fn trigger(&mut self, timer: &PulseTimer, channel_enabled: &mut bool) {
        self.shadow_frequency = timer.frequency();
        self.timer = self.timer_reload();
        self.enabled = self.period != 0 || self.shift != 0;

        // A non-zero shift runs an immediate overflow check
        if self.shift != 0 && self.next_frequency() > 2047 {
            *channel_enabled = false;
        }
    }

    fn clock(&mut self, timer: &mut PulseTimer, channel_enabled: &mut bool) {
        if self.timer == 0 {
            return;
        }

        self.timer -= 1;
        if self.timer != 0 {
            return;
        }
        self.timer = self.timer_reload();

        if !self.enabled || self.period == 0 {
            return;
        }

        let next_frequency = self.next_frequency();
        if next_frequency > 2047 {
            *channel_enabled = false;
        } else if self.shift != 0 {
            self.shadow_frequency = next_frequency;
            timer.write_frequency(next_frequency);

            // Writing back runs a second calculation purely for its
            // overflow check
            if self.next_frequency() > 2047 {
                *channel_enabled = false;
            }
        }
    }
}

#[derive(Debug, Clone, Encode, Decode)]
pub struct PulseChannel {
    duty: u8,
    timer: PulseTimer,
    length_counter: StandardLengthCounter,
    envelope: Envelope,
    sweep: Option<SweepUnit>,
    channel_enabled: bool,
}

impl PulseChannel {
    /// Channel 1, with the sweep unit.
    pub fn new_with_sweep() -> Self {
        Self { sweep: Some(SweepUnit::new()), ..Self::new() }
    }

    /// Channel 2.
    pub fn new() -> Self {
        Self {
            duty: 0,
            timer: PulseTimer::new(),
            length_counter: StandardLengthCounter::new(),
            envelope: Envelope::new(),
            sweep: None,
            channel_enabled: false,
        }
    }

    pub fn tick(&mut self) {
        self.timer.tick();
    }

    pub fn clock_length_counter(&mut self) {
        self.length_counter.clock(&mut self.channel_enabled);
    }

    pub fn clock_envelope(&mut self) {
        self.envelope.clock();
    }

    pub fn clock_sweep(&mut self) {
        if let Some(mut sweep) = self.sweep.take() {
            sweep.clock(&mut self.timer, &mut self.channel_enabled);
            self.sweep = Some(sweep);
        }
    }

    pub fn enabled(&self) -> bool {
        self.channel_enabled
    }

    /// Current output amplitude, 0-15.
    pub fn sample(&self) -> u8 {
        if !self.channel_enabled || !self.envelope.dac_enabled() {
            return 0;
        }

        let waveform = DUTY_PATTERNS[usize::from(self.duty)];
        u8::from(waveform.bit(self.timer.phase)) * self.envelope.volume
    }

    // NR10
    pub fn read_register_0(&self) -> u8 {
        self.sweep.as_ref().map_or(0xFF, SweepUnit::read_register)
    }

    pub fn write_register_0(&mut self, value: u8) {
        if let Some(sweep) = &mut self.sweep {
            sweep.write_register(value);

            log::trace!("NR10 write: {value:02X}");
        }
    }

    // NRx1: duty + length reload
    pub fn read_register_1(&self) -> u8 {
        0x3F | (self.duty << 6)
    }

    pub fn write_register_1(&mut self, value: u8, apu_enabled: bool) {
        // On DMG the length counter is writable even with the APU off, but
        // the duty bits are not
        if apu_enabled {
            self.duty = value >> 6;
        }

        self.length_counter.load(value);
    }

    // NRx2: envelope + DAC power
    pub fn read_register_2(&self) -> u8 {
        self.envelope.read_register()
    }

    pub fn write_register_2(&mut self, value: u8) {
        self.envelope.write_register(value);

        if !self.envelope.dac_enabled() {
            self.channel_enabled = false;
        }
    }

    // NRx3: frequency low (write-only)
    pub fn write_register_3(&mut self, value: u8) {
        self.timer.write_frequency_low(value);
    }

    // NRx4: frequency high + length enable + trigger
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
            self.channel_enabled = true;

            self.length_counter.trigger(frame_sequencer_step);
            self.envelope.trigger();
            self.timer.trigger();

            if let Some(mut sweep) = self.sweep.take() {
                sweep.trigger(&self.timer, &mut self.channel_enabled);
                self.sweep = Some(sweep);
            }

            self.channel_enabled &= self.envelope.dac_enabled();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn triggered_channel(frequency: u16) -> PulseChannel {
        let mut channel = PulseChannel::new();
        // Full volume, no envelope
        channel.write_register_2(0xF0);
        channel.write_register_3(frequency as u8);
        channel.write_register_4(0x80 | ((frequency >> 8) as u8 & 0x07), 1);
        channel
    }

    #[test]
    fn trigger_enables_channel() {
        let channel = triggered_channel(0x700);
        assert!(channel.enabled());
    }

    #[test]
    fn disabled_dac_forces_channel_off() {
        let mut channel = triggered_channel(0x700);

        channel.write_register_2(0x00);
        assert!(!channel.enabled());

        // Triggering with the DAC off does not enable the channel
        channel.write_register_4(0x80, 1);
        assert!(!channel.enabled());
    }

    #[test]
    fn duty_cycle_produces_expected_pulse_ratio() {
        // Period 2048-2047=1: one phase step per tick
        let mut channel = triggered_channel(2047);
        channel.write_register_1(0x80, true);

        let mut high = 0;
        for _ in 0..8 {
            channel.tick();
            if channel.sample() > 0 {
                high += 1;
            }
        }

        // 50% duty
        assert_eq!(high, 4);
    }

    #[test]
    fn length_counter_expiry_disables() {
        let mut channel = triggered_channel(0x400);
        channel.write_register_1(0x3F, true);
        // Enable the length counter on an odd step to avoid the immediate
        // extra clock
        channel.write_register_4(0xC0 | 0x04, 1);

        // Length = 64 - 63 = 1
        channel.clock_length_counter();
        assert!(!channel.enabled());
    }

    #[test]
    fn sweep_overflow_disables_channel() {
        let mut channel = PulseChannel::new_with_sweep();
        channel.write_register_2(0xF0);
        // Period 1, shift 1, increasing
        channel.write_register_0(0x11);
        // Frequency high enough that freq + (freq >> 1) overflows 2047
        channel.write_register_3(0xFF);
        channel.write_register_4(0x80 | 0x05, 1);

        // The immediate trigger calculation already overflows
        assert!(!channel.enabled());
    }

    #[test]
    fn sweep_updates_frequency() {
        let mut channel = PulseChannel::new_with_sweep();
        channel.write_register_2(0xF0);
        // Period 1, shift 2, increasing
        channel.write_register_0(0x12);
        channel.write_register_3(0x00);
        channel.write_register_4(0x81, 1);
        assert!(channel.enabled());

        // Frequency 0x100; after one sweep clock: 0x100 + 0x40 = 0x140
        channel.clock_sweep();
        assert_eq!(channel.timer.frequency(), 0x140);
    }
}
