//! Output sample pacing: the APU runs at the 1.048576 MHz channel clock and
//! the host consumes 44.1 kHz stereo, leaving a fractional cycles-per-sample
//! ratio that is tracked with a rolling accumulator.

use bincode::{Decode, Encode};

pub const APU_CLOCK_HZ: u32 = 1_048_576;
pub const SAMPLE_RATE: u32 = 44_100;

pub const CYCLES_PER_SAMPLE: f64 = APU_CLOCK_HZ as f64 / SAMPLE_RATE as f64;

#[derive(Debug, Clone, Encode, Decode)]
pub struct SampleClock {
    accumulator: f64,
}

impl SampleClock {
    pub fn new() -> Self {
        Self { accumulator: 0.0 }
    }

    /// Advance by one APU cycle; returns true when an output sample is due.
    pub fn tick(&mut self) -> bool {
        self.accumulator += 1.0;
        if self.accumulator >= CYCLES_PER_SAMPLE {
            self.accumulator -= CYCLES_PER_SAMPLE;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn long_run_average_matches_ratio() {
        let mut clock = SampleClock::new();

        let mut samples = 0_u32;
        for _ in 0..APU_CLOCK_HZ {
            if clock.tick() {
                samples += 1;
            }
        }

        // One emulated second must produce within one sample of 44100
        assert!((i64::from(samples) - i64::from(SAMPLE_RATE)).abs() <= 1);
    }
}
