//! The simpler mapper chips: MBC1, MBC2, MBC5, and HuC1. MBC3 and HuC3
//! carry real-time clocks and live in their own modules.

pub mod huc3;
pub mod mbc3;

use bincode::{Decode, Encode};
use megaboy_common::num::GetBit;

// Shared $4000-$7FFF mapping for the single-register-bank mappers
fn banked_rom_address(address: u16, rom_bank: u16, rom_banks: u16) -> u32 {
    if address < 0x4000 {
        u32::from(address)
    } else {
        let bank = u32::from(rom_bank & (rom_banks - 1));
        (bank << 14) | u32::from(address & 0x3FFF)
    }
}

fn banked_ram_address(address: u16, ram_bank: u16, ram_banks: u16) -> Option<u32> {
    if ram_banks == 0 {
        return None;
    }

    let bank = u32::from(ram_bank & (ram_banks - 1));
    Some((bank << 13) | u32::from(address & 0x1FFF))
}

#[derive(Debug, Clone, Encode, Decode)]
pub struct Mbc1 {
    rom_banks: u16,
    ram_banks: u16,
    ram_enabled: bool,
    rom_bank: u8,
    bank2: u8,
    banking_mode: u8,
}

impl Mbc1 {
    pub fn new(rom_banks: u16, ram_banks: u16) -> Self {
        Self { rom_banks, ram_banks, ram_enabled: false, rom_bank: 1, bank2: 0, banking_mode: 0 }
    }

    pub fn map_rom_address(&self, address: u16) -> u32 {
        if address < 0x4000 {
            // $0000-$3FFF uses bank2 << 5 in banking mode 1, bank 0 otherwise
            let bank = if self.banking_mode == 1 {
                u16::from(self.bank2) << 5 & (self.rom_banks - 1)
            } else {
                0
            };
            (u32::from(bank) << 14) | u32::from(address & 0x3FFF)
        } else {
            let bank =
                ((u16::from(self.bank2) << 5) | u16::from(self.rom_bank)) & (self.rom_banks - 1);
            (u32::from(bank) << 14) | u32::from(address & 0x3FFF)
        }
    }

    pub fn write_rom_address(&mut self, address: u16, value: u8) {
        match address {
            0x0000..=0x1FFF => {
                self.ram_enabled = value & 0x0F == 0x0A;
            }
            0x2000..=0x3FFF => {
                self.rom_bank = value & 0x1F;
                if self.rom_bank == 0 {
                    self.rom_bank = 1;
                }
            }
            0x4000..=0x5FFF => {
                self.bank2 = value & 0x03;
            }
            _ => {
                // Small cartridges ignore the banking mode register
                if self.rom_banks <= 32 && self.ram_banks <= 1 {
                    return;
                }
                self.banking_mode = value & 0x01;
            }
        }
    }

    fn ram_bank(&self) -> u16 {
        if self.banking_mode == 1 { self.bank2.into() } else { 0 }
    }

    pub fn read_ram(&self, address: u16, sram: &[u8]) -> u8 {
        if !self.ram_enabled {
            return 0xFF;
        }

        banked_ram_address(address, self.ram_bank(), self.ram_banks)
            .map_or(0xFF, |ram_addr| sram[ram_addr as usize])
    }

    pub fn write_ram(&mut self, address: u16, value: u8, sram: &mut [u8]) -> bool {
        if !self.ram_enabled {
            return false;
        }

        let Some(ram_addr) = banked_ram_address(address, self.ram_bank(), self.ram_banks) else {
            return false;
        };
        sram[ram_addr as usize] = value;
        true
    }
}

// Every MBC2 cartridge has 512 nibbles of RAM built into the mapper chip
pub const MBC2_RAM_LEN: usize = 512;

#[derive(Debug, Clone, Encode, Decode)]
pub struct Mbc2 {
    rom_banks: u16,
    ram_enabled: bool,
    rom_bank: u8,
    ram: Vec<u8>,
}

impl Mbc2 {
    pub fn new(rom_banks: u16) -> Self {
        Self { rom_banks, ram_enabled: false, rom_bank: 1, ram: vec![0; MBC2_RAM_LEN] }
    }

    pub fn map_rom_address(&self, address: u16) -> u32 {
        banked_rom_address(address, self.rom_bank.into(), self.rom_banks)
    }

    pub fn write_rom_address(&mut self, address: u16, value: u8) {
        if address >= 0x4000 {
            return;
        }

        // Address bit 8 selects between the two registers
        if address.bit(8) {
            self.rom_bank = value & 0x0F;
            if self.rom_bank == 0 {
                self.rom_bank = 1;
            }
        } else {
            self.ram_enabled = value & 0x0F == 0x0A;
        }
    }

    pub fn read_ram(&self, address: u16) -> u8 {
        if !self.ram_enabled {
            return 0xFF;
        }

        // The upper nibble is open bus
        self.ram[(address & 0x1FF) as usize] | 0xF0
    }

    pub fn write_ram(&mut self, address: u16, value: u8) -> bool {
        if !self.ram_enabled {
            return false;
        }

        self.ram[(address & 0x1FF) as usize] = value & 0x0F;
        true
    }

    pub fn ram(&self) -> &[u8] {
        &self.ram
    }

    pub fn load_ram(&mut self, ram: &[u8]) {
        if ram.len() == MBC2_RAM_LEN {
            self.ram.copy_from_slice(ram);
        }
    }

    pub fn copy_ram_from(&mut self, other: &Mbc2) {
        self.ram.copy_from_slice(&other.ram);
    }
}

#[derive(Debug, Clone, Encode, Decode)]
pub struct Mbc5 {
    rom_banks: u16,
    ram_banks: u16,
    has_rumble: bool,
    ram_enabled: bool,
    rom_bank: u16,
    ram_bank: u8,
    rumble_active: bool,
}

impl Mbc5 {
    pub fn new(rom_banks: u16, ram_banks: u16, has_rumble: bool) -> Self {
        Self {
            rom_banks,
            ram_banks,
            has_rumble,
            ram_enabled: false,
            rom_bank: 1,
            ram_bank: 0,
            rumble_active: false,
        }
    }

    pub fn has_rumble(&self) -> bool {
        self.has_rumble
    }

    pub fn rumble_active(&self) -> bool {
        self.rumble_active
    }

    pub fn map_rom_address(&self, address: u16) -> u32 {
        if address < 0x4000 {
            u32::from(address)
        } else {
            // MBC5 allows mapping bank 0 into $4000-$7FFF
            let bank = u32::from(self.rom_bank & (self.rom_banks - 1));
            (bank << 14) | u32::from(address & 0x3FFF)
        }
    }

    pub fn write_rom_address(&mut self, address: u16, value: u8) {
        match address {
            0x0000..=0x1FFF => {
                self.ram_enabled = value & 0x0F == 0x0A;
            }
            0x2000..=0x2FFF => {
                self.rom_bank = (self.rom_bank & 0x100) | u16::from(value);
            }
            0x3000..=0x3FFF => {
                self.rom_bank = (self.rom_bank & 0x0FF) | (u16::from(value & 0x01) << 8);
            }
            0x4000..=0x5FFF => {
                if self.has_rumble {
                    // Rumble motor occupies RAM bank bit 3
                    self.rumble_active = value.bit(3);
                    self.ram_bank = value & 0x07;
                } else {
                    self.ram_bank = value & 0x0F;
                }
            }
            _ => {}
        }
    }

    pub fn read_ram(&self, address: u16, sram: &[u8]) -> u8 {
        if !self.ram_enabled {
            return 0xFF;
        }

        banked_ram_address(address, self.ram_bank.into(), self.ram_banks)
            .map_or(0xFF, |ram_addr| sram[ram_addr as usize])
    }

    pub fn write_ram(&mut self, address: u16, value: u8, sram: &mut [u8]) -> bool {
        if !self.ram_enabled {
            return false;
        }

        let Some(ram_addr) = banked_ram_address(address, self.ram_bank.into(), self.ram_banks)
        else {
            return false;
        };
        sram[ram_addr as usize] = value;
        true
    }
}

#[derive(Debug, Clone, Encode, Decode)]
pub struct Huc1 {
    rom_banks: u16,
    ram_banks: u16,
    // HuC1 repurposes the RAM-enable register to switch between RAM and the
    // IR transceiver
    ir_selected: bool,
    rom_bank: u8,
    ram_bank: u8,
}

impl Huc1 {
    pub fn new(rom_banks: u16, ram_banks: u16) -> Self {
        Self { rom_banks, ram_banks, ir_selected: false, rom_bank: 1, ram_bank: 0 }
    }

    pub fn map_rom_address(&self, address: u16) -> u32 {
        banked_rom_address(address, self.rom_bank.into(), self.rom_banks)
    }

    pub fn write_rom_address(&mut self, address: u16, value: u8) {
        match address {
            0x0000..=0x1FFF => {
                self.ir_selected = value & 0x0F == 0x0E;
            }
            0x2000..=0x3FFF => {
                self.rom_bank = value;
                if self.rom_bank == 0 {
                    self.rom_bank = 1;
                }
            }
            0x4000..=0x5FFF => {
                self.ram_bank = value;
            }
            _ => {}
        }
    }

    pub fn read_ram(&self, address: u16, sram: &[u8]) -> u8 {
        if self.ir_selected {
            // IR receiver with no light source: "no signal"
            return 0xC0;
        }

        banked_ram_address(address, self.ram_bank.into(), self.ram_banks)
            .map_or(0xFF, |ram_addr| sram[ram_addr as usize])
    }

    pub fn write_ram(&mut self, address: u16, value: u8, sram: &mut [u8]) -> bool {
        if self.ir_selected {
            return false;
        }

        let Some(ram_addr) = banked_ram_address(address, self.ram_bank.into(), self.ram_banks)
        else {
            return false;
        };
        sram[ram_addr as usize] = value;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mbc1_bank_0_substitution() {
        // 64-bank cartridge, the spec scenario
        let mut mbc1 = Mbc1::new(64, 1);

        mbc1.write_rom_address(0x2000, 0x00);
        assert_eq!(mbc1.map_rom_address(0x4000), 0x4000);

        mbc1.write_rom_address(0x2000, 0x20);
        // 0x20 & 0x1F == 0 substitutes bank 1 again
        assert_eq!(mbc1.map_rom_address(0x4000), 0x4000);

        mbc1.write_rom_address(0x2000, 0x12);
        assert_eq!(mbc1.map_rom_address(0x4000), 0x12 * 0x4000);

        // bank2 provides the upper bits
        mbc1.write_rom_address(0x4000, 0x01);
        assert_eq!(mbc1.map_rom_address(0x4000), 0x32 * 0x4000);
    }

    #[test]
    fn mbc1_banking_mode_ignored_on_small_carts() {
        let mut small = Mbc1::new(32, 1);
        small.write_rom_address(0x6000, 0x01);
        assert_eq!(small.map_rom_address(0x0000), 0x0000);

        let mut large = Mbc1::new(64, 4);
        large.write_rom_address(0x4000, 0x01);
        large.write_rom_address(0x6000, 0x01);
        assert_eq!(large.map_rom_address(0x0000), 0x20 * 0x4000);
    }

    #[test]
    fn mbc1_ram_enable() {
        let mut mbc1 = Mbc1::new(4, 1);
        let mut sram = vec![0; 0x2000];

        assert!(!mbc1.write_ram(0xA000, 0x42, &mut sram));
        assert_eq!(mbc1.read_ram(0xA000, &sram), 0xFF);

        mbc1.write_rom_address(0x0000, 0x0A);
        assert!(mbc1.write_ram(0xA000, 0x42, &mut sram));
        assert_eq!(mbc1.read_ram(0xA000, &sram), 0x42);

        mbc1.write_rom_address(0x0000, 0x00);
        assert_eq!(mbc1.read_ram(0xA000, &sram), 0xFF);
    }

    #[test]
    fn mbc2_register_select_by_address_bit_8() {
        let mut mbc2 = Mbc2::new(16);

        // Bit 8 clear: RAM enable
        mbc2.write_rom_address(0x0000, 0x0A);
        assert!(mbc2.write_ram(0xA000, 0x5));

        // Bit 8 set: ROM bank
        mbc2.write_rom_address(0x0100, 0x07);
        assert_eq!(mbc2.map_rom_address(0x4000), 0x07 * 0x4000);

        // Nibble RAM reads with open-bus upper bits
        assert_eq!(mbc2.read_ram(0xA000), 0xF5);
        // RAM mirrors every 512 bytes
        assert_eq!(mbc2.read_ram(0xA200), 0xF5);
    }

    #[test]
    fn mbc5_nine_bit_rom_bank() {
        let mut mbc5 = Mbc5::new(512, 16, false);

        mbc5.write_rom_address(0x2000, 0x34);
        mbc5.write_rom_address(0x3000, 0x01);
        assert_eq!(mbc5.map_rom_address(0x4000), 0x134 * 0x4000);

        // MBC5 does map bank 0 at $4000
        mbc5.write_rom_address(0x2000, 0x00);
        mbc5.write_rom_address(0x3000, 0x00);
        assert_eq!(mbc5.map_rom_address(0x4000), 0x0000);
    }

    #[test]
    fn mbc5_rumble_steals_ram_bank_bit() {
        let mut mbc5 = Mbc5::new(64, 16, true);

        mbc5.write_rom_address(0x4000, 0x0B);
        assert!(mbc5.rumble_active());

        mbc5.write_rom_address(0x0000, 0x0A);
        let mut sram = vec![0xAA; 16 * 0x2000];
        // Bank 3, not bank 11
        sram[3 * 0x2000] = 0x42;
        assert_eq!(mbc5.read_ram(0xA000, &sram), 0x42);
    }

    #[test]
    fn huc1_ir_mode_reads_no_signal() {
        let mut huc1 = Huc1::new(4, 1);
        let sram = vec![0x42; 0x2000];

        // RAM mode by default
        assert_eq!(huc1.read_ram(0xA000, &sram), 0x42);

        huc1.write_rom_address(0x0000, 0x0E);
        assert_eq!(huc1.read_ram(0xA000, &sram), 0xC0);
    }
}
