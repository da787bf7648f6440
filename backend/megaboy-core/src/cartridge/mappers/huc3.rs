//! HuC3 mapper with its command/response real-time clock.
//!
//! The clock exposes a nibble-wide register file accessed through a command
//! register and a semaphore; time is kept as BCD-ish minute-of-day and day
//! counters at registers $10-$15.

use super::{banked_ram_address, banked_rom_address};
use bincode::{Decode, Encode};
use megaboy_common::encoding::{ReadLeExt, WriteLeExt};
use megaboy_common::num::GetBit;
use megaboy_common::timeutils;
use std::io::{self, Read, Write};

const MINUTES_PER_DAY: u64 = 1440;

// Time registers occupy $10-$15 of the register file
const RTC_REG_COUNT: usize = 0x16;

#[derive(Debug, Clone, Encode, Decode)]
pub struct Huc3Rtc {
    regs: [u8; RTC_REG_COUNT],
    command: u8,
    argument: u8,
    response: u8,
    access_addr: u8,
    last_unix_time: u64,
    seconds_counter: u8,
}

impl Huc3Rtc {
    fn new(now: u64) -> Self {
        Self {
            regs: [0; RTC_REG_COUNT],
            command: 0,
            argument: 0,
            response: 0,
            access_addr: 0,
            last_unix_time: now,
            seconds_counter: 0,
        }
    }

    fn minute_counter(&self) -> u16 {
        (u16::from(self.regs[0x12]) << 8) | (u16::from(self.regs[0x11]) << 4) | u16::from(self.regs[0x10])
    }

    fn day_counter(&self) -> u16 {
        (u16::from(self.regs[0x15]) << 8) | (u16::from(self.regs[0x14]) << 4) | u16::from(self.regs[0x13])
    }

    fn write_minute_counter(&mut self, minutes: u16) {
        self.regs[0x10] = (minutes & 0xF) as u8;
        self.regs[0x11] = ((minutes >> 4) & 0xF) as u8;
        self.regs[0x12] = ((minutes >> 8) & 0xF) as u8;
    }

    fn write_day_counter(&mut self, days: u16) {
        self.regs[0x13] = (days & 0xF) as u8;
        self.regs[0x14] = ((days >> 4) & 0xF) as u8;
        self.regs[0x15] = ((days >> 8) & 0xF) as u8;
    }

    /// One RTC minute passes per 60 wall-clock seconds; the day counter is
    /// 12 bits wide.
    fn update_time(&mut self) {
        let time = timeutils::current_unix_time();
        let diff = time.saturating_sub(self.last_unix_time);

        let mut minutes = u64::from(self.minute_counter());
        let mut days = u64::from(self.day_counter());

        days += diff / 86400;
        minutes += (diff / 60) % MINUTES_PER_DAY;
        let mut seconds = u64::from(self.seconds_counter) + diff % 60;

        if seconds >= 60 {
            minutes += 1;
            seconds %= 60;
        }
        if minutes >= MINUTES_PER_DAY {
            days += 1;
            minutes %= MINUTES_PER_DAY;
        }

        self.seconds_counter = seconds as u8;
        self.write_minute_counter(minutes as u16);
        self.write_day_counter((days & 0xFFF) as u16);
        self.last_unix_time = time;
    }

    fn write_command(&mut self, value: u8) {
        self.command = (value >> 4) & 0x07;
        self.argument = value & 0x0F;
    }

    fn read_response(&self) -> u8 {
        0x80 | (self.command << 4) | self.response
    }

    fn accessing_time_regs(&self) -> bool {
        (0x10..RTC_REG_COUNT as u8).contains(&self.access_addr)
    }

    fn execute_command(&mut self) {
        match self.command {
            0x0 | 0x1 => {
                // Read (0x1 additionally post-increments the address)
                if self.accessing_time_regs() {
                    self.update_time();
                }

                self.response = self
                    .regs
                    .get(self.access_addr as usize)
                    .map_or(0x00, |&value| value & 0x0F);

                if self.command == 0x1 {
                    self.access_addr = self.access_addr.wrapping_add(1);
                }
            }
            0x2 | 0x3 => {
                // Write (0x3 additionally post-increments); $08-$1F are
                // read-only
                if self.access_addr < 0x08 {
                    self.regs[self.access_addr as usize] = self.argument;
                }

                if self.command == 0x3 {
                    self.access_addr = self.access_addr.wrapping_add(1);
                }
            }
            0x4 => {
                self.access_addr = (self.access_addr & 0xF0) | self.argument;
            }
            0x5 => {
                self.access_addr = (self.access_addr & 0x0F) | (self.argument << 4);
            }
            0x6 => self.execute_extended_command(),
            _ => {
                log::warn!(
                    "Unexpected HuC3 RTC command {:X} (argument {:X})",
                    self.command,
                    self.argument
                );
            }
        }
    }

    fn execute_extended_command(&mut self) {
        match self.argument {
            0x0 => {
                // Snapshot the current time into $00-$05
                self.update_time();
                let (minutes, days) = (self.minute_counter(), self.day_counter());

                self.regs[0x0] = (minutes & 0xF) as u8;
                self.regs[0x1] = ((minutes >> 4) & 0xF) as u8;
                self.regs[0x2] = ((minutes >> 8) & 0xF) as u8;
                self.regs[0x3] = (days & 0xF) as u8;
                self.regs[0x4] = ((days >> 4) & 0xF) as u8;
                self.regs[0x5] = ((days >> 8) & 0xF) as u8;
            }
            0x1 => {
                // Restore the time from $00-$05, gated on the handshake
                // registers the games set up first
                if self.regs[0x6] != 1 || self.regs[0x7].bit(0) {
                    return;
                }

                let minutes = (u16::from(self.regs[0x2]) << 8)
                    | (u16::from(self.regs[0x1]) << 4)
                    | u16::from(self.regs[0x0]);
                let days = (u16::from(self.regs[0x5]) << 8)
                    | (u16::from(self.regs[0x4]) << 4)
                    | u16::from(self.regs[0x3]);

                self.write_minute_counter(minutes);
                self.write_day_counter(days);
                self.regs[0x6] = 0;
                self.last_unix_time = timeutils::current_unix_time();
                self.seconds_counter = 0;
            }
            0x2 => {
                // Status probe; games expect 1
                self.response = 0x01;
            }
            0xE => {
                log::warn!("HuC3 tone generator is not emulated");
            }
            _ => {
                log::warn!("Unexpected HuC3 extended command: {:X}", self.argument);
            }
        }
    }

    fn save_battery<W: Write>(&mut self, out: &mut W) -> io::Result<()> {
        self.update_time();

        out.write_u64_le(self.last_unix_time)?;
        out.write_u16_le(self.minute_counter())?;
        out.write_u16_le(self.day_counter())?;

        // Trailing alarm block expected by other emulators; the alarm is not
        // emulated, so it is all zeroes
        out.write_all(&[0; 5])
    }

    fn load_battery<R: Read>(&mut self, reader: &mut R) -> bool {
        let Ok(last_unix_time) = reader.read_u64_le() else {
            return false;
        };
        let Ok(minutes) = reader.read_u16_le() else {
            return false;
        };
        let Ok(days) = reader.read_u16_le() else {
            return false;
        };

        self.last_unix_time = last_unix_time;
        self.write_minute_counter(minutes);
        self.write_day_counter(days);
        self.seconds_counter = 0;
        self.update_time();

        true
    }
}

#[derive(Debug, Clone, Encode, Decode)]
pub struct Huc3 {
    rom_banks: u16,
    ram_banks: u16,
    selected_mode: u8,
    rom_bank: u8,
    ram_bank: u8,
    rtc: Huc3Rtc,
}

impl Huc3 {
    pub fn new(rom_banks: u16, ram_banks: u16) -> Self {
        Self {
            rom_banks,
            ram_banks,
            selected_mode: 0,
            rom_bank: 1,
            ram_bank: 0,
            rtc: Huc3Rtc::new(timeutils::current_unix_time()),
        }
    }

    pub fn map_rom_address(&self, address: u16) -> u32 {
        // HuC3 allows bank 0 at $4000
        if address < 0x4000 {
            u32::from(address)
        } else {
            let bank = u32::from(u16::from(self.rom_bank) & (self.rom_banks - 1));
            (bank << 14) | u32::from(address & 0x3FFF)
        }
    }

    pub fn write_rom_address(&mut self, address: u16, value: u8) {
        match address {
            0x0000..=0x1FFF => {
                self.selected_mode = value & 0x0F;
            }
            0x2000..=0x3FFF => {
                self.rom_bank = value & 0x7F;
            }
            0x4000..=0x5FFF => {
                self.ram_bank = value;
            }
            _ => {}
        }
    }

    pub fn read_ram(&self, address: u16, sram: &[u8]) -> u8 {
        match self.selected_mode {
            // RAM, read-only and read-write modes
            0x0 | 0xA => banked_ram_address(address, self.ram_bank.into(), self.ram_banks)
                .map_or(0xFF, |ram_addr| sram[ram_addr as usize]),
            // RTC command register is write-only
            0xB => 0xFF,
            0xC => self.rtc.read_response(),
            // Semaphore: bit 0 set means ready for the next command
            0xD => 0x01,
            // IR receiver: no light seen
            0xE => 0xC0,
            _ => 0xFF,
        }
    }

    pub fn write_ram(&mut self, address: u16, value: u8, sram: &mut [u8]) -> bool {
        match self.selected_mode {
            0xA => {
                let Some(ram_addr) =
                    banked_ram_address(address, self.ram_bank.into(), self.ram_banks)
                else {
                    return false;
                };
                sram[ram_addr as usize] = value;
                true
            }
            0xB => {
                self.rtc.write_command(value);
                true
            }
            0xD => {
                // Clearing bit 0 executes the pending command
                if !value.bit(0) {
                    self.rtc.execute_command();
                }
                true
            }
            _ => false,
        }
    }

    pub fn tick(&mut self, _t_cycles: u32) {
        // The HuC3 clock is reconciled against wall time on access; nothing
        // advances per-cycle
    }

    pub fn set_fast_forward(&mut self, _speed_factor: u32) {}

    pub fn reset_rtc(&mut self, now: u64) {
        self.rtc = Huc3Rtc::new(now);
    }

    pub fn save_battery_rtc<W: Write>(&self, out: &mut W) -> io::Result<()> {
        // update_time needs &mut; clone so battery saving stays &self
        let mut rtc = self.rtc.clone();
        rtc.save_battery(out)
    }

    pub fn load_battery_rtc<R: Read>(&mut self, reader: &mut R) -> bool {
        self.rtc.load_battery(reader)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn execute(huc3: &mut Huc3, command: u8) {
        let mut sram = [];
        huc3.write_rom_address(0x0000, 0x0B);
        huc3.write_ram(0xA000, command, &mut sram);
        huc3.write_rom_address(0x0000, 0x0D);
        huc3.write_ram(0xA000, 0x00, &mut sram);
    }

    fn response(huc3: &mut Huc3) -> u8 {
        huc3.write_rom_address(0x0000, 0x0C);
        huc3.read_ram(0xA000, &[])
    }

    #[test]
    fn register_file_write_and_read_back() {
        let mut huc3 = Huc3::new(4, 1);

        // Set address to 2, write 0x7, read it back
        execute(&mut huc3, 0x42);
        execute(&mut huc3, 0x50);
        execute(&mut huc3, 0x37);

        execute(&mut huc3, 0x42);
        execute(&mut huc3, 0x50);
        execute(&mut huc3, 0x10);

        assert_eq!(response(&mut huc3) & 0x0F, 0x7);
    }

    #[test]
    fn status_command_responds_one() {
        let mut huc3 = Huc3::new(4, 1);

        execute(&mut huc3, 0x62);
        assert_eq!(response(&mut huc3) & 0x0F, 0x1);
    }

    #[test]
    fn time_registers_are_read_only() {
        let mut huc3 = Huc3::new(4, 1);

        // Address $10, attempt a write, then read back
        execute(&mut huc3, 0x40);
        execute(&mut huc3, 0x51);
        execute(&mut huc3, 0x3F);

        execute(&mut huc3, 0x40);
        execute(&mut huc3, 0x51);
        execute(&mut huc3, 0x00);

        // The minute counter low nibble was not overwritten with 0xF unless
        // the wall clock happens to sit there; a written value would always
        // read back 0xF
        let value = response(&mut huc3) & 0x0F;
        assert_eq!(value, huc3.rtc.regs[0x10] & 0x0F);
    }

    #[test]
    fn ir_mode_reads_no_signal() {
        let mut huc3 = Huc3::new(4, 1);
        huc3.write_rom_address(0x0000, 0x0E);
        assert_eq!(huc3.read_ram(0xA000, &[]), 0xC0);
    }

    #[test]
    fn battery_round_trip_keeps_counters() {
        let mut huc3 = Huc3::new(4, 1);
        huc3.rtc.write_minute_counter(0x123);
        huc3.rtc.write_day_counter(0x045);
        huc3.rtc.last_unix_time = timeutils::current_unix_time();

        let mut blob = Vec::new();
        huc3.save_battery_rtc(&mut blob).unwrap();
        assert_eq!(blob.len(), 17);

        let mut loaded = Huc3::new(4, 1);
        assert!(loaded.load_battery_rtc(&mut blob.as_slice()));
        assert_eq!(loaded.rtc.minute_counter(), 0x123);
        assert_eq!(loaded.rtc.day_counter(), 0x045);
    }
}
