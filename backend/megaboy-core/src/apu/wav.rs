//! WAV capture of the mixer output: 44.1 kHz stereo 16-bit PCM, with the
//! RIFF length fields backpatched when recording stops.

use crate::audio;
use megaboy_common::encoding::WriteLeExt;
use std::fs::File;
use std::io::{self, BufWriter, Seek, SeekFrom, Write};
use std::path::Path;

const RIFF_HEADER_LEN: u32 = 44;
const BITS_PER_SAMPLE: u16 = 16;
const CHANNELS: u16 = 2;

#[derive(Debug)]
pub struct WavRecorder {
    writer: BufWriter<File>,
    data_bytes: u32,
}

impl WavRecorder {
    pub fn create<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = File::create(path)?;
        let mut recorder = Self { writer: BufWriter::new(file), data_bytes: 0 };
        recorder.write_header()?;

        Ok(recorder)
    }

    fn write_header(&mut self) -> io::Result<()> {
        let byte_rate = audio::SAMPLE_RATE * u32::from(CHANNELS) * u32::from(BITS_PER_SAMPLE / 8);
        let block_align = CHANNELS * (BITS_PER_SAMPLE / 8);

        self.writer.write_all(b"RIFF")?;
        // Chunk length placeholder, patched in finish()
        self.writer.write_u32_le(0)?;
        self.writer.write_all(b"WAVE")?;

        self.writer.write_all(b"fmt ")?;
        self.writer.write_u32_le(16)?;
        // PCM format tag
        self.writer.write_u16_le(1)?;
        self.writer.write_u16_le(CHANNELS)?;
        self.writer.write_u32_le(audio::SAMPLE_RATE)?;
        self.writer.write_u32_le(byte_rate)?;
        self.writer.write_u16_le(block_align)?;
        self.writer.write_u16_le(BITS_PER_SAMPLE)?;

        self.writer.write_all(b"data")?;
        self.writer.write_u32_le(0)
    }

    pub fn push_frame(&mut self, sample_l: i16, sample_r: i16) -> io::Result<()> {
        self.writer.write_u16_le(sample_l as u16)?;
        self.writer.write_u16_le(sample_r as u16)?;
        self.data_bytes += 4;

        Ok(())
    }

    /// Backpatch the RIFF/data lengths and flush the file.
    pub fn finish(mut self) -> io::Result<()> {
        self.writer.flush()?;

        let file = self.writer.get_mut();
        file.seek(SeekFrom::Start(4))?;
        file.write_all(&(RIFF_HEADER_LEN - 8 + self.data_bytes).to_le_bytes())?;

        file.seek(SeekFrom::Start(40))?;
        file.write_all(&self.data_bytes.to_le_bytes())?;

        file.flush()
    }

    pub fn recorded_seconds(&self) -> f64 {
        f64::from(self.data_bytes / 4) / f64::from(audio::SAMPLE_RATE)
    }
}
