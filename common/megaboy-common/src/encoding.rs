//! Little-endian stream I/O extensions used by the save-state envelope,
//! battery files, and the WAV recorder.

use std::io::{self, Read, Write};

pub trait WriteLeExt {
    fn write_u8_le(&mut self, value: u8) -> io::Result<()>;
    fn write_u16_le(&mut self, value: u16) -> io::Result<()>;
    fn write_u32_le(&mut self, value: u32) -> io::Result<()>;
    fn write_u64_le(&mut self, value: u64) -> io::Result<()>;
}

impl<W: Write> WriteLeExt for W {
    fn write_u8_le(&mut self, value: u8) -> io::Result<()> {
        self.write_all(&[value])
    }

    fn write_u16_le(&mut self, value: u16) -> io::Result<()> {
        self.write_all(&value.to_le_bytes())
    }

    fn write_u32_le(&mut self, value: u32) -> io::Result<()> {
        self.write_all(&value.to_le_bytes())
    }

    fn write_u64_le(&mut self, value: u64) -> io::Result<()> {
        self.write_all(&value.to_le_bytes())
    }
}

pub trait ReadLeExt {
    fn read_u8_le(&mut self) -> io::Result<u8>;
    fn read_u16_le(&mut self) -> io::Result<u16>;
    fn read_u32_le(&mut self) -> io::Result<u32>;
    fn read_u64_le(&mut self) -> io::Result<u64>;
}

impl<R: Read> ReadLeExt for R {
    fn read_u8_le(&mut self) -> io::Result<u8> {
        let mut bytes = [0; 1];
        self.read_exact(&mut bytes)?;
        Ok(bytes[0])
    }

    fn read_u16_le(&mut self) -> io::Result<u16> {
        let mut bytes = [0; 2];
        self.read_exact(&mut bytes)?;
        Ok(u16::from_le_bytes(bytes))
    }

    fn read_u32_le(&mut self) -> io::Result<u32> {
        let mut bytes = [0; 4];
        self.read_exact(&mut bytes)?;
        Ok(u32::from_le_bytes(bytes))
    }

    fn read_u64_le(&mut self) -> io::Result<u64> {
        let mut bytes = [0; 8];
        self.read_exact(&mut bytes)?;
        Ok(u64::from_le_bytes(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn round_trip() {
        let mut buffer = Vec::new();
        buffer.write_u8_le(0xAB).unwrap();
        buffer.write_u16_le(0x1234).unwrap();
        buffer.write_u32_le(0xDEADBEEF).unwrap();
        buffer.write_u64_le(0x0123_4567_89AB_CDEF).unwrap();

        assert_eq!(buffer.len(), 15);
        assert_eq!(&buffer[1..3], &[0x34, 0x12]);

        let mut cursor = Cursor::new(buffer);
        assert_eq!(cursor.read_u8_le().unwrap(), 0xAB);
        assert_eq!(cursor.read_u16_le().unwrap(), 0x1234);
        assert_eq!(cursor.read_u32_le().unwrap(), 0xDEADBEEF);
        assert_eq!(cursor.read_u64_le().unwrap(), 0x0123_4567_89AB_CDEF);
    }
}
