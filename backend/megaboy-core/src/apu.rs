//! Audio processing unit: frame sequencer, the four channels, the stereo
//! mixer, and the host-facing sample queue.

mod components;
mod noise;
mod pulse;
mod wav;
mod wavetable;

use crate::api::LoadError;
use crate::apu::noise::NoiseChannel;
use crate::apu::pulse::PulseChannel;
use crate::apu::wav::WavRecorder;
use crate::apu::wavetable::WaveChannel;
use crate::audio::SampleClock;
use crate::{savestate, GbSystem};
use megaboy_common::num::GetBit;
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::path::Path;

// The frame sequencer divides the 1.048576 MHz channel clock down to 512 Hz
const FRAME_SEQUENCER_PERIOD: u16 = 2048;

// Bound on buffered output; roughly a quarter second
const MAX_QUEUED_SAMPLES: usize = 16 * 1024;

#[derive(Debug)]
pub struct Apu {
    system: GbSystem,
    enabled: bool,
    pulse_1: PulseChannel,
    pulse_2: PulseChannel,
    wave: WaveChannel,
    noise: NoiseChannel,
    nr50: u8,
    nr51: u8,
    frame_sequencer_cycles: u16,
    frame_sequencer_step: u8,
    sample_clock: SampleClock,
    sample_queue: VecDeque<(i16, i16)>,
    volume: f32,
    channel_mask: [bool; 4],
    recorder: Option<WavRecorder>,
}

impl Apu {
    pub fn new(system: GbSystem) -> Self {
        Self {
            system,
            enabled: true,
            pulse_1: PulseChannel::new_with_sweep(),
            pulse_2: PulseChannel::new(),
            wave: WaveChannel::new(system),
            noise: NoiseChannel::new(),
            // Post-boot-ROM mixer state
            nr50: 0x77,
            nr51: 0xF3,
            frame_sequencer_cycles: 0,
            frame_sequencer_step: 0,
            sample_clock: SampleClock::new(),
            sample_queue: VecDeque::new(),
            volume: 0.5,
            channel_mask: [true; 4],
            recorder: None,
        }
    }

    pub fn set_system(&mut self, system: GbSystem) {
        self.system = system;
    }

    /// The only pre-boot-ROM state that is known is that the APU is off.
    pub fn disable_for_boot_rom(&mut self) {
        self.enabled = false;
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_volume(&mut self, volume: f32) {
        self.volume = volume.clamp(0.0, 1.0);
    }

    pub fn set_channel_enabled(&mut self, channel: usize, enabled: bool) {
        if let Some(flag) = self.channel_mask.get_mut(channel) {
            *flag = enabled;
        }
    }

    /// Advance one cycle of the 1.048576 MHz channel clock. In CGB double
    /// speed this is called every other M-cycle so the absolute rate stays
    /// fixed.
    pub fn tick(&mut self) {
        if self.enabled {
            self.tick_frame_sequencer();

            self.pulse_1.tick();
            self.pulse_2.tick();
            self.wave.tick();
            self.noise.tick();
        }

        if self.sample_clock.tick() {
            let frame = if self.enabled { self.mix_sample() } else { (0, 0) };
            self.push_frame(frame);
        }
    }

    fn tick_frame_sequencer(&mut self) {
        self.frame_sequencer_cycles += 1;
        if self.frame_sequencer_cycles < FRAME_SEQUENCER_PERIOD {
            return;
        }
        self.frame_sequencer_cycles = 0;

        // Steps 0/2/4/6 clock lengths, 2 and 6 clock the sweep, 7 clocks
        // the envelopes
        if !self.frame_sequencer_step.bit(0) {
            self.pulse_1.clock_length_counter();
            self.pulse_2.clock_length_counter();
            self.wave.clock_length_counter();
            self.noise.clock_length_counter();

            if self.frame_sequencer_step == 2 || self.frame_sequencer_step == 6 {
                self.pulse_1.clock_sweep();
            }
        } else if self.frame_sequencer_step == 7 {
            self.pulse_1.clock_envelope();
            self.pulse_2.clock_envelope();
            self.noise.clock_envelope();
        }

        self.frame_sequencer_step = (self.frame_sequencer_step + 1) & 7;
    }

    fn mix_sample(&self) -> (i16, i16) {
        let samples = [
            f32::from(self.pulse_1.sample()) / 15.0 * f32::from(u8::from(self.channel_mask[0])),
            f32::from(self.pulse_2.sample()) / 15.0 * f32::from(u8::from(self.channel_mask[1])),
            f32::from(self.wave.sample()) / 15.0 * f32::from(u8::from(self.channel_mask[2])),
            f32::from(self.noise.sample()) / 15.0 * f32::from(u8::from(self.channel_mask[3])),
        ];

        let mut left = 0.0_f32;
        let mut right = 0.0_f32;

        for (i, sample) in samples.into_iter().enumerate() {
            if self.nr51.bit(4 + i as u8) {
                left += sample;
            }
            if self.nr51.bit(i as u8) {
                right += sample;
            }
        }

        let left_volume = f32::from(((self.nr50 >> 4) & 0x7) + 1) / 8.0;
        let right_volume = f32::from((self.nr50 & 0x7) + 1) / 8.0;
        let scale = self.volume * f32::from(i16::MAX) / 4.0;

        ((left * left_volume * scale) as i16, (right * right_volume * scale) as i16)
    }

    fn push_frame(&mut self, frame: (i16, i16)) {
        if self.sample_queue.len() >= MAX_QUEUED_SAMPLES {
            self.sample_queue.pop_front();
        }
        self.sample_queue.push_back(frame);

        if let Some(recorder) = &mut self.recorder {
            if let Err(err) = recorder.push_frame(frame.0, frame.1) {
                log::error!("WAV recording failed, stopping: {err}");
                self.recorder = None;
            }
        }
    }

    pub fn queued_samples(&self) -> usize {
        self.sample_queue.len()
    }

    pub fn pop_sample(&mut self) -> Option<(i16, i16)> {
        self.sample_queue.pop_front()
    }

    pub fn start_recording<P: AsRef<Path>>(&mut self, path: P) -> io::Result<()> {
        self.recorder = Some(WavRecorder::create(path)?);
        Ok(())
    }

    pub fn stop_recording(&mut self) -> io::Result<()> {
        match self.recorder.take() {
            Some(recorder) => recorder.finish(),
            None => Ok(()),
        }
    }

    pub fn is_recording(&self) -> bool {
        self.recorder.is_some()
    }

    // Register interface

    pub fn read_register(&self, address: u16) -> u8 {
        match address & 0x7F {
            0x10 => self.pulse_1.read_register_0(),
            0x11 => self.pulse_1.read_register_1(),
            0x12 => self.pulse_1.read_register_2(),
            0x14 => self.pulse_1.read_register_4(),
            0x16 => self.pulse_2.read_register_1(),
            0x17 => self.pulse_2.read_register_2(),
            0x19 => self.pulse_2.read_register_4(),
            0x1A => self.wave.read_register_0(),
            0x1C => self.wave.read_register_2(),
            0x1E => self.wave.read_register_4(),
            0x21 => self.noise.read_register_2(),
            0x22 => self.noise.read_register_3(),
            0x23 => self.noise.read_register_4(),
            0x24 => self.nr50,
            0x25 => self.nr51,
            0x26 => self.read_nr52(),
            0x30..=0x3F => self.wave.read_ram(address),
            // NR13/NR23/NR31/NR33/NR41 and the gaps are write-only
            _ => 0xFF,
        }
    }

    fn read_nr52(&self) -> u8 {
        0x70 | (u8::from(self.enabled) << 7)
            | (u8::from(self.noise.enabled()) << 3)
            | (u8::from(self.wave.enabled()) << 2)
            | (u8::from(self.pulse_2.enabled()) << 1)
            | u8::from(self.pulse_1.enabled())
    }

    pub fn write_register(&mut self, address: u16, value: u8) {
        let register = address & 0x7F;

        if !self.enabled {
            // Only NR52 and wave RAM are writable while powered off, plus
            // the length counters on DMG
            match register {
                0x26 => self.write_nr52(value),
                0x30..=0x3F => self.wave.write_ram(address, value),
                0x11 if self.system == GbSystem::Dmg => self.pulse_1.write_register_1(value, false),
                0x16 if self.system == GbSystem::Dmg => self.pulse_2.write_register_1(value, false),
                0x1B if self.system == GbSystem::Dmg => self.wave.write_register_1(value),
                0x20 if self.system == GbSystem::Dmg => self.noise.write_register_1(value),
                _ => {}
            }
            return;
        }

        match register {
            0x10 => self.pulse_1.write_register_0(value),
            0x11 => self.pulse_1.write_register_1(value, true),
            0x12 => self.pulse_1.write_register_2(value),
            0x13 => self.pulse_1.write_register_3(value),
            0x14 => self.pulse_1.write_register_4(value, self.frame_sequencer_step),
            0x16 => self.pulse_2.write_register_1(value, true),
            0x17 => self.pulse_2.write_register_2(value),
            0x18 => self.pulse_2.write_register_3(value),
            0x19 => self.pulse_2.write_register_4(value, self.frame_sequencer_step),
            0x1A => self.wave.write_register_0(value),
            0x1B => self.wave.write_register_1(value),
            0x1C => self.wave.write_register_2(value),
            0x1D => self.wave.write_register_3(value),
            0x1E => self.wave.write_register_4(value, self.frame_sequencer_step),
            0x20 => self.noise.write_register_1(value),
            0x21 => self.noise.write_register_2(value),
            0x22 => self.noise.write_register_3(value),
            0x23 => self.noise.write_register_4(value, self.frame_sequencer_step),
            0x24 => self.nr50 = value,
            0x25 => self.nr51 = value,
            0x26 => self.write_nr52(value),
            0x30..=0x3F => self.wave.write_ram(address, value),
            _ => {}
        }
    }

    fn write_nr52(&mut self, value: u8) {
        let enable = value.bit(7);

        if self.enabled && !enable {
            // Power-off zeroes every register; wave RAM survives
            self.pulse_1 = PulseChannel::new_with_sweep();
            self.pulse_2 = PulseChannel::new();
            self.wave.reset();
            self.noise = NoiseChannel::new();
            self.nr50 = 0;
            self.nr51 = 0;
        } else if !self.enabled && enable {
            self.frame_sequencer_cycles = 0;
            self.frame_sequencer_step = 0;
        }

        self.enabled = enable;

        log::trace!("NR52 write, APU enabled: {}", self.enabled);
    }

    // PCM12/PCM34: CGB-only digital output readback
    pub fn read_pcm12(&self) -> u8 {
        if !self.enabled {
            return 0;
        }
        (self.pulse_2.sample() << 4) | self.pulse_1.sample()
    }

    pub fn read_pcm34(&self) -> u8 {
        if !self.enabled {
            return 0;
        }
        (self.noise.sample() << 4) | self.wave.sample()
    }

    // Save states

    pub fn save_state<W: Write>(&self, out: &mut W) -> io::Result<()> {
        savestate::encode(out, &self.nr50)?;
        savestate::encode(out, &self.nr51)?;
        savestate::encode(out, &self.enabled)?;
        savestate::encode(out, &self.frame_sequencer_cycles)?;
        savestate::encode(out, &self.frame_sequencer_step)?;

        savestate::encode(out, &self.pulse_1)?;
        savestate::encode(out, &self.pulse_2)?;
        savestate::encode(out, &self.wave)?;
        savestate::encode(out, &self.noise)
    }

    pub fn load_state<R: Read>(&mut self, reader: &mut R) -> Result<(), LoadError> {
        self.nr50 = savestate::decode(reader)?;
        self.nr51 = savestate::decode(reader)?;
        self.enabled = savestate::decode(reader)?;
        self.frame_sequencer_cycles = savestate::decode(reader)?;
        self.frame_sequencer_step = savestate::decode(reader)?;

        self.pulse_1 = savestate::decode(reader)?;
        self.pulse_2 = savestate::decode(reader)?;
        self.wave = savestate::decode(reader)?;
        self.noise = savestate::decode(reader)?;

        self.sample_queue.clear();

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nr52_reports_channel_status() {
        let mut apu = Apu::new(GbSystem::Dmg);

        assert_eq!(apu.read_register(0x26) & 0x0F, 0);

        apu.write_register(0x12, 0xF0);
        apu.write_register(0x14, 0x80);
        assert_eq!(apu.read_register(0x26) & 0x01, 1);
    }

    #[test]
    fn power_off_clears_registers_and_blocks_writes() {
        let mut apu = Apu::new(GbSystem::Cgb);

        apu.write_register(0x12, 0xF3);
        apu.write_register(0x26, 0x00);

        assert_eq!(apu.read_register(0x12), 0x00);
        assert_eq!(apu.read_register(0x24), 0x00);

        apu.write_register(0x24, 0x77);
        assert_eq!(apu.read_register(0x24), 0x00);

        // Wave RAM stays writable
        apu.write_register(0x30, 0xAB);
        assert_eq!(apu.read_register(0x30), 0xAB);

        apu.write_register(0x26, 0x80);
        apu.write_register(0x24, 0x44);
        assert_eq!(apu.read_register(0x24), 0x44);
    }

    #[test]
    fn dmg_length_writes_allowed_while_off() {
        // Load a length of 1 while powered off, then power on, trigger, and
        // enable the length counter on an even step (immediate clock).
        // On DMG the off-state write landed, so the channel dies instantly;
        // on CGB the write was ignored and the channel stays alive.
        let run = |system| {
            let mut apu = Apu::new(system);
            apu.write_register(0x26, 0x00);
            apu.write_register(0x11, 0x3F);

            apu.write_register(0x26, 0x80);
            apu.write_register(0x12, 0xF0);
            apu.write_register(0x14, 0x80);
            apu.write_register(0x14, 0x40);

            apu.read_register(0x26) & 0x01
        };

        assert_eq!(run(GbSystem::Dmg), 0);
        assert_eq!(run(GbSystem::Cgb), 1);
    }

    #[test]
    fn write_only_registers_read_ff() {
        let apu = Apu::new(GbSystem::Dmg);

        for register in [0x13, 0x15, 0x18, 0x1B, 0x1D, 0x1F, 0x20] {
            assert_eq!(apu.read_register(register), 0xFF, "register FF{register:02X}");
        }
    }

    #[test]
    fn sample_queue_fills_at_output_rate() {
        let mut apu = Apu::new(GbSystem::Dmg);

        for _ in 0..crate::audio::APU_CLOCK_HZ / 100 {
            apu.tick();
        }

        let expected = crate::audio::SAMPLE_RATE / 100;
        let queued = apu.queued_samples() as u32;
        assert!(queued.abs_diff(expected) <= 1, "queued {queued}, expected ~{expected}");
    }

    #[test]
    fn silence_while_disabled_still_produces_samples() {
        let mut apu = Apu::new(GbSystem::Dmg);
        apu.write_register(0x26, 0x00);

        for _ in 0..1000 {
            apu.tick();
        }

        assert!(apu.queued_samples() > 0);
        assert!(apu.pop_sample().is_some_and(|frame| frame == (0, 0)));
    }
}
