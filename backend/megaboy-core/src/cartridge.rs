//! Cartridge loading, header parsing, and the mapper family.

pub mod mappers;

use crate::api::LoadError;
use crate::cartridge::mappers::huc3::Huc3;
use crate::cartridge::mappers::mbc3::Mbc3;
use crate::cartridge::mappers::{Huc1, Mbc1, Mbc2, Mbc5};
use crate::GbSystem;
use bincode::{Decode, Encode};
use megaboy_common::timeutils;
use megaboy_config::SystemPreference;
use std::io::{self, Read, Write};

const MIN_ROM_LEN: usize = 0x4000;
const HEADER_CHECKSUM_ADDR: usize = 0x14D;

#[derive(Debug, Clone, Encode, Decode)]
pub enum Mapper {
    RomOnly,
    Mbc1(Mbc1),
    Mbc2(Mbc2),
    Mbc3(Mbc3),
    Mbc5(Mbc5),
    Huc1(Huc1),
    Huc3(Huc3),
}

impl Mapper {
    fn name(&self) -> &'static str {
        match self {
            Self::RomOnly => "ROM only",
            Self::Mbc1(..) => "MBC1",
            Self::Mbc2(..) => "MBC2",
            Self::Mbc3(..) => "MBC3",
            Self::Mbc5(..) => "MBC5",
            Self::Huc1(..) => "HuC1",
            Self::Huc3(..) => "HuC3",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Cartridge {
    rom: Box<[u8]>,
    sram: Box<[u8]>,
    mapper: Mapper,
    rom_banks: u16,
    ram_banks: u16,
    has_battery: bool,
    title: String,
    header_checksum: u8,
    sram_dirty: bool,
}

impl Cartridge {
    pub fn create(rom: Vec<u8>) -> Result<Self, LoadError> {
        if rom.len() < MIN_ROM_LEN {
            return Err(LoadError::InvalidRom);
        }

        let header_checksum = compute_header_checksum(&rom);
        if header_checksum != rom[HEADER_CHECKSUM_ADDR] {
            log::error!(
                "ROM header checksum mismatch: computed {header_checksum:02X}, header says {:02X}",
                rom[HEADER_CHECKSUM_ADDR]
            );
            return Err(LoadError::InvalidRom);
        }

        let rom_banks_exp = rom[0x148];
        if rom_banks_exp > 8 {
            return Err(LoadError::InvalidRom);
        }
        let rom_banks = 1_u16 << (rom_banks_exp + 1);
        if usize::from(rom_banks) > rom.len() / 0x4000 {
            return Err(LoadError::InvalidRom);
        }

        let ram_banks: u16 = match rom[0x149] {
            0x02 => 1,
            0x03 => 4,
            0x04 => 16,
            0x05 => 8,
            _ => 0,
        };

        let mapper_byte = rom[0x147];
        let (mapper, has_battery) = match mapper_byte {
            0x00 => (Mapper::RomOnly, false),
            0x01 | 0x02 => (Mapper::Mbc1(Mbc1::new(rom_banks, ram_banks)), false),
            0x03 => (Mapper::Mbc1(Mbc1::new(rom_banks, ram_banks)), true),
            0x05 => (Mapper::Mbc2(Mbc2::new(rom_banks)), false),
            0x06 => (Mapper::Mbc2(Mbc2::new(rom_banks)), true),
            0x0F | 0x10 => (Mapper::Mbc3(Mbc3::new(rom_banks, ram_banks, true)), true),
            0x11 | 0x12 => (Mapper::Mbc3(Mbc3::new(rom_banks, ram_banks, false)), false),
            0x13 => (Mapper::Mbc3(Mbc3::new(rom_banks, ram_banks, false)), true),
            0x19 | 0x1A => (Mapper::Mbc5(Mbc5::new(rom_banks, ram_banks, false)), false),
            0x1B => (Mapper::Mbc5(Mbc5::new(rom_banks, ram_banks, false)), true),
            0x1C | 0x1D => (Mapper::Mbc5(Mbc5::new(rom_banks, ram_banks, true)), false),
            0x1E => (Mapper::Mbc5(Mbc5::new(rom_banks, ram_banks, true)), true),
            0xFE => (Mapper::Huc3(Huc3::new(rom_banks, ram_banks)), true),
            0xFF => (Mapper::Huc1(Huc1::new(rom_banks, ram_banks)), true),
            _ => {
                log::error!("Unsupported mapper byte: {mapper_byte:02X}");
                return Err(LoadError::InvalidRom);
            }
        };

        let title = parse_title(&rom);

        log::info!(
            "Loaded '{title}': {} ({rom_banks} ROM banks, {ram_banks} RAM banks, battery: {has_battery})",
            mapper.name()
        );

        let sram_len = usize::from(ram_banks) * 0x2000;

        Ok(Self {
            rom: rom.into_boxed_slice(),
            sram: vec![0; sram_len].into_boxed_slice(),
            mapper,
            rom_banks,
            ram_banks,
            has_battery,
            title,
            header_checksum,
            sram_dirty: false,
        })
    }

    /// Which system the cartridge header asks for, honoring the user's
    /// hardware preference. A DMG-only cartridge under `PreferCgb` runs on
    /// CGB hardware in DMG compatibility mode.
    pub fn resolve_system(&self, preference: SystemPreference) -> GbSystem {
        let cgb_flag = self.rom[0x143];

        match (cgb_flag, preference) {
            (_, SystemPreference::ForceDmg) => GbSystem::Dmg,
            (0xC0, _) => GbSystem::Cgb,
            (0x80, SystemPreference::PreferCgb) => GbSystem::Cgb,
            (0x80, SystemPreference::PreferDmg) => GbSystem::Dmg,
            (_, SystemPreference::PreferCgb) => GbSystem::DmgCompat,
            _ => GbSystem::Dmg,
        }
    }

    /// Whether a CGB boot ROM will drop into DMG compatibility mode for this
    /// cartridge.
    pub fn is_dmg_only(&self) -> bool {
        !matches!(self.rom[0x143], 0x80 | 0xC0)
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn header_checksum(&self) -> u8 {
        self.header_checksum
    }

    pub fn has_battery(&self) -> bool {
        self.has_battery
    }

    pub fn take_sram_dirty(&mut self) -> bool {
        std::mem::take(&mut self.sram_dirty)
    }

    pub fn sram(&self) -> &[u8] {
        &self.sram
    }

    pub fn rom(&self) -> &[u8] {
        &self.rom
    }

    pub fn reset(&mut self, preserve_sram: bool) {
        self.mapper = match &self.mapper {
            Mapper::RomOnly => Mapper::RomOnly,
            Mapper::Mbc1(..) => Mapper::Mbc1(Mbc1::new(self.rom_banks, self.ram_banks)),
            Mapper::Mbc2(mbc2) => {
                let mut fresh = Mbc2::new(self.rom_banks);
                if preserve_sram {
                    fresh.copy_ram_from(mbc2);
                }
                Mapper::Mbc2(fresh)
            }
            Mapper::Mbc3(mbc3) => {
                Mapper::Mbc3(Mbc3::new(self.rom_banks, self.ram_banks, mbc3.has_rtc()))
            }
            Mapper::Mbc5(mbc5) => {
                Mapper::Mbc5(Mbc5::new(self.rom_banks, self.ram_banks, mbc5.has_rumble()))
            }
            Mapper::Huc1(..) => Mapper::Huc1(Huc1::new(self.rom_banks, self.ram_banks)),
            Mapper::Huc3(..) => Mapper::Huc3(Huc3::new(self.rom_banks, self.ram_banks)),
        };

        if !preserve_sram {
            self.sram.fill(0);
        }
    }

    pub fn read_rom(&self, address: u16) -> u8 {
        let rom_addr = match &self.mapper {
            Mapper::RomOnly => u32::from(address) & (self.rom.len() as u32 - 1),
            Mapper::Mbc1(mbc1) => mbc1.map_rom_address(address),
            Mapper::Mbc2(mbc2) => mbc2.map_rom_address(address),
            Mapper::Mbc3(mbc3) => mbc3.map_rom_address(address),
            Mapper::Mbc5(mbc5) => mbc5.map_rom_address(address),
            Mapper::Huc1(huc1) => huc1.map_rom_address(address),
            Mapper::Huc3(huc3) => huc3.map_rom_address(address),
        };

        self.rom[rom_addr as usize]
    }

    pub fn write_rom(&mut self, address: u16, value: u8) {
        match &mut self.mapper {
            Mapper::RomOnly => {}
            Mapper::Mbc1(mbc1) => mbc1.write_rom_address(address, value),
            Mapper::Mbc2(mbc2) => mbc2.write_rom_address(address, value),
            Mapper::Mbc3(mbc3) => mbc3.write_rom_address(address, value),
            Mapper::Mbc5(mbc5) => mbc5.write_rom_address(address, value),
            Mapper::Huc1(huc1) => huc1.write_rom_address(address, value),
            Mapper::Huc3(huc3) => huc3.write_rom_address(address, value),
        }
    }

    pub fn read_ram(&self, address: u16) -> u8 {
        match &self.mapper {
            Mapper::RomOnly => 0xFF,
            Mapper::Mbc1(mbc1) => mbc1.read_ram(address, &self.sram),
            Mapper::Mbc2(mbc2) => mbc2.read_ram(address),
            Mapper::Mbc3(mbc3) => mbc3.read_ram(address, &self.sram),
            Mapper::Mbc5(mbc5) => mbc5.read_ram(address, &self.sram),
            Mapper::Huc1(huc1) => huc1.read_ram(address, &self.sram),
            Mapper::Huc3(huc3) => huc3.read_ram(address, &self.sram),
        }
    }

    pub fn write_ram(&mut self, address: u16, value: u8) {
        let dirty = match &mut self.mapper {
            Mapper::RomOnly => false,
            Mapper::Mbc1(mbc1) => mbc1.write_ram(address, value, &mut self.sram),
            Mapper::Mbc2(mbc2) => mbc2.write_ram(address, value),
            Mapper::Mbc3(mbc3) => mbc3.write_ram(address, value, &mut self.sram),
            Mapper::Mbc5(mbc5) => mbc5.write_ram(address, value, &mut self.sram),
            Mapper::Huc1(huc1) => huc1.write_ram(address, value, &mut self.sram),
            Mapper::Huc3(huc3) => huc3.write_ram(address, value, &mut self.sram),
        };

        self.sram_dirty |= dirty;
    }

    /// Advance mapper-internal timekeeping by the elapsed T-cycles.
    pub fn tick(&mut self, t_cycles: u32) {
        match &mut self.mapper {
            Mapper::Mbc3(mbc3) => mbc3.tick(t_cycles),
            Mapper::Huc3(huc3) => huc3.tick(t_cycles),
            _ => {}
        }
    }

    /// Fast-forward scales the RTC's cycles-per-second target so the clock
    /// keeps tracking real time.
    pub fn set_fast_forward(&mut self, speed_factor: u32) {
        match &mut self.mapper {
            Mapper::Mbc3(mbc3) => mbc3.set_fast_forward(speed_factor),
            Mapper::Huc3(huc3) => huc3.set_fast_forward(speed_factor),
            _ => {}
        }
    }

    /// Battery file: raw SRAM, followed by an RTC blob for RTC-equipped
    /// mappers.
    pub fn save_battery<W: Write>(&self, out: &mut W) -> io::Result<()> {
        match &self.mapper {
            Mapper::Mbc2(mbc2) => out.write_all(mbc2.ram())?,
            _ => out.write_all(&self.sram)?,
        }

        match &self.mapper {
            Mapper::Mbc3(mbc3) => mbc3.save_battery_rtc(out)?,
            Mapper::Huc3(huc3) => huc3.save_battery_rtc(out)?,
            _ => {}
        }

        Ok(())
    }

    pub fn load_battery<R: Read>(&mut self, reader: &mut R) -> Result<(), LoadError> {
        match &mut self.mapper {
            Mapper::Mbc2(mbc2) => {
                let mut ram = vec![0; mappers::MBC2_RAM_LEN];
                reader.read_exact(&mut ram).map_err(|_| LoadError::InvalidBattery)?;
                mbc2.load_ram(&ram);
            }
            _ => {
                reader.read_exact(&mut self.sram).map_err(|_| LoadError::InvalidBattery)?;
            }
        }

        // A battery file with a missing or truncated RTC blob is still
        // accepted; the RTC just restarts from the current wall time
        match &mut self.mapper {
            Mapper::Mbc3(mbc3) => {
                if !mbc3.load_battery_rtc(reader) {
                    mbc3.reset_rtc(timeutils::current_unix_time());
                }
            }
            Mapper::Huc3(huc3) => {
                if !huc3.load_battery_rtc(reader) {
                    huc3.reset_rtc(timeutils::current_unix_time());
                }
            }
            _ => {}
        }

        Ok(())
    }

    /// Save-state block: mapper state, then SRAM, then RTC data.
    pub fn save_state<W: Write>(&self, out: &mut W) -> io::Result<()> {
        crate::savestate::encode(out, &self.mapper)?;
        self.save_battery(out)
    }

    pub fn load_state<R: Read>(&mut self, reader: &mut R) -> Result<(), LoadError> {
        let mapper: Mapper = crate::savestate::decode(reader)?;

        // The mapper kind is derived from the ROM header; a state for a
        // different mapper means the state doesn't belong to this ROM
        if std::mem::discriminant(&mapper) != std::mem::discriminant(&self.mapper) {
            return Err(LoadError::CorruptSaveState);
        }

        self.mapper = mapper;
        self.load_battery(reader).map_err(|_| LoadError::CorruptSaveState)
    }
}

fn compute_header_checksum(rom: &[u8]) -> u8 {
    rom[0x134..=0x14C]
        .iter()
        .fold(0_u8, |checksum, &byte| checksum.wrapping_sub(byte).wrapping_sub(1))
}

fn parse_title(rom: &[u8]) -> String {
    let title_end = if matches!(rom[0x143], 0x80 | 0xC0) { 0x142 } else { 0x143 };

    let mut title = String::new();
    for &byte in &rom[0x134..=title_end] {
        if byte == 0 || byte > 127 {
            break;
        }
        title.push(byte as char);
    }

    title
}

#[cfg(test)]
pub(crate) mod test_roms {
    /// Build a syntactically valid ROM image: correct header checksum, the
    /// requested mapper/size bytes, and `code` placed at the entry point.
    pub fn build_rom(mapper_byte: u8, rom_banks_exp: u8, ram_size_byte: u8, code: &[u8]) -> Vec<u8> {
        let rom_len = 0x4000 * (1 << (u32::from(rom_banks_exp) + 1));
        let mut rom = vec![0; rom_len as usize];

        rom[0x147] = mapper_byte;
        rom[0x148] = rom_banks_exp;
        rom[0x149] = ram_size_byte;

        for (i, &byte) in b"TEST".iter().enumerate() {
            rom[0x134 + i] = byte;
        }

        rom[0x14D] = rom[0x134..=0x14C]
            .iter()
            .fold(0_u8, |checksum, &byte| checksum.wrapping_sub(byte).wrapping_sub(1));

        rom[0x100..0x100 + code.len()].copy_from_slice(code);

        // Tag each bank's first byte with its index so banking is observable
        for bank in 1..(rom.len() / 0x4000) {
            rom[bank * 0x4000] = bank as u8;
        }

        rom
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_bad_header_checksum() {
        let mut rom = test_roms::build_rom(0x00, 0, 0, &[]);
        rom[0x14D] ^= 0xFF;

        assert!(matches!(Cartridge::create(rom), Err(LoadError::InvalidRom)));
    }

    #[test]
    fn rejects_unknown_mapper() {
        let rom = test_roms::build_rom(0x42, 0, 0, &[]);
        assert!(matches!(Cartridge::create(rom), Err(LoadError::InvalidRom)));
    }

    #[test]
    fn parses_title_and_battery() {
        let rom = test_roms::build_rom(0x13, 1, 0x03, &[]);
        let cartridge = Cartridge::create(rom).unwrap();

        assert_eq!(cartridge.title(), "TEST");
        assert!(cartridge.has_battery());
        assert_eq!(cartridge.sram().len(), 4 * 0x2000);
    }

    #[test]
    fn system_resolution_honors_preference() {
        let mut rom = test_roms::build_rom(0x00, 0, 0, &[]);
        rom[0x143] = 0x80;
        rom[0x14D] = compute_header_checksum(&rom);
        let cartridge = Cartridge::create(rom).unwrap();

        assert_eq!(cartridge.resolve_system(SystemPreference::PreferCgb), GbSystem::Cgb);
        assert_eq!(cartridge.resolve_system(SystemPreference::PreferDmg), GbSystem::Dmg);
        assert_eq!(cartridge.resolve_system(SystemPreference::ForceDmg), GbSystem::Dmg);

        let dmg_rom = test_roms::build_rom(0x00, 0, 0, &[]);
        let dmg_cartridge = Cartridge::create(dmg_rom).unwrap();
        assert_eq!(dmg_cartridge.resolve_system(SystemPreference::PreferCgb), GbSystem::DmgCompat);
        assert!(dmg_cartridge.is_dmg_only());
    }
}
