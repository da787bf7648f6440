//! PPU register file: the DMG register bytes and the CGB palette RAM ports.

use crate::ppu::PpuMode;
use crate::GbSystem;
use bincode::{Decode, Encode};
use megaboy_common::num::GetBit;

/// Raw register bytes, stored exactly as written so STAT masking and
/// save-state layout stay simple.
#[derive(Debug, Clone, Encode, Decode)]
pub struct Registers {
    pub lcdc: u8,
    pub stat: u8,
    pub scy: u8,
    pub scx: u8,
    pub lyc: u8,
    pub bgp: u8,
    pub obp0: u8,
    pub obp1: u8,
    pub wy: u8,
    pub wx: u8,
}

impl Registers {
    pub fn new() -> Self {
        // Post-boot-ROM values
        Self {
            lcdc: 0x91,
            stat: 0x85,
            scy: 0x00,
            scx: 0x00,
            lyc: 0x00,
            bgp: 0xFC,
            obp0: 0x00,
            obp1: 0x00,
            wy: 0x00,
            wx: 0x00,
        }
    }

    pub fn lcd_enabled(&self) -> bool {
        self.lcdc.bit(7)
    }

    pub fn window_tile_map_addr(&self) -> u16 {
        if self.lcdc.bit(6) { 0x1C00 } else { 0x1800 }
    }

    pub fn window_enabled(&self) -> bool {
        self.lcdc.bit(5)
    }

    pub fn bg_unsigned_addressing(&self) -> bool {
        self.lcdc.bit(4)
    }

    pub fn bg_tile_map_addr(&self) -> u16 {
        if self.lcdc.bit(3) { 0x1C00 } else { 0x1800 }
    }

    pub fn double_height_obj(&self) -> bool {
        self.lcdc.bit(2)
    }

    pub fn obj_enabled(&self) -> bool {
        self.lcdc.bit(1)
    }

    /// LCDC bit 0 on DMG: BG/window rendering enable.
    pub fn dmg_bg_enabled(&self) -> bool {
        self.lcdc.bit(0)
    }

    /// LCDC bit 0 on CGB: clear means sprites always win ("master priority").
    pub fn cgb_master_priority(&self) -> bool {
        !self.lcdc.bit(0)
    }

    pub fn set_mode_bits(&mut self, mode: PpuMode) {
        self.stat = (self.stat & !0x03) | mode.to_bits();
    }

    pub fn set_lyc_flag(&mut self, flag: bool) {
        self.stat = (self.stat & !0x04) | (u8::from(flag) << 2);
    }

    pub fn lyc_interrupt_enabled(&self) -> bool {
        self.stat.bit(6)
    }

    pub fn oam_interrupt_enabled(&self) -> bool {
        self.stat.bit(5)
    }

    pub fn vblank_interrupt_enabled(&self) -> bool {
        self.stat.bit(4)
    }

    pub fn hblank_interrupt_enabled(&self) -> bool {
        self.stat.bit(3)
    }

    /// STAT writes only land on bits 3-6; bit 7 reads as set and the low
    /// three bits are hardware-owned.
    pub fn masked_stat_write(&self, value: u8) -> u8 {
        0x80 | (self.stat & 0x07) | (value & 0x78)
    }
}

/// A two-bit-per-entry DMG palette register parsed into color indices.
pub fn parse_dmg_palette(value: u8) -> [u8; 4] {
    std::array::from_fn(|i| (value >> (2 * i)) & 0x3)
}

/// CGB palette RAM behind its BCPS/BCPD-style address/data port pair.
#[derive(Debug, Clone, Encode, Decode)]
pub struct CgbPaletteRam {
    pub ram: [u8; 64],
    address: u8,
    auto_increment: bool,
}

// Palettes the CGB boot ROM installs for DMG cartridges (grayscale BG,
// red-ish OBP0 / green-ish OBP1 defaults)
const DMG_COMPAT_BG: [u8; 8] = [255, 127, 239, 27, 128, 97, 0, 0];
const DMG_COMPAT_OBJ: [u8; 16] =
    [255, 127, 31, 66, 242, 28, 0, 0, 255, 127, 31, 66, 242, 28, 0, 0];

impl CgbPaletteRam {
    pub fn new_bg(system: GbSystem) -> Self {
        let mut ram = [0; 64];

        let preset = if system == GbSystem::DmgCompat { DMG_COMPAT_BG.len() } else { 0 };
        ram[..preset].copy_from_slice(&DMG_COMPAT_BG[..preset]);

        // BG palette RAM powers on white ($7FFF pattern)
        for (i, byte) in ram.iter_mut().enumerate().skip(preset) {
            *byte = if i % 2 == 0 { 0xFF } else { 0x7F };
        }

        Self { ram, address: 0, auto_increment: false }
    }

    pub fn new_obj(system: GbSystem) -> Self {
        let mut ram = [0; 64];

        let preset = if system == GbSystem::DmgCompat { DMG_COMPAT_OBJ.len() } else { 0 };
        ram[..preset].copy_from_slice(&DMG_COMPAT_OBJ[..preset]);

        // OBJ palette RAM powers on with garbage
        for byte in ram.iter_mut().skip(preset) {
            *byte = rand::random();
        }

        Self { ram, address: 0, auto_increment: false }
    }

    // BCPS/OCPS: palette address + auto-increment flag
    pub fn read_address_port(&self) -> u8 {
        0x40 | (u8::from(self.auto_increment) << 7) | self.address
    }

    pub fn write_address_port(&mut self, value: u8) {
        self.auto_increment = value.bit(7);
        self.address = value & 0x3F;
    }

    // BCPD/OCPD: palette data; writes honor auto-increment, reads do not
    pub fn read_data_port(&self) -> u8 {
        self.ram[self.address as usize]
    }

    pub fn write_data_port(&mut self, value: u8) {
        self.ram[self.address as usize] = value;
        if self.auto_increment {
            self.address = (self.address + 1) & 0x3F;
        }
    }

    /// The raw RGB555 entry for a palette/color pair.
    pub fn color(&self, palette: u8, color_id: u8) -> u16 {
        let index = (usize::from(palette) * 8 + usize::from(color_id) * 2) & 0x3F;
        u16::from_le_bytes([self.ram[index], self.ram[index + 1]])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stat_write_masking() {
        let mut registers = Registers::new();
        registers.stat = 0x85;

        registers.stat = registers.masked_stat_write(0x00);
        // Mode and LYC bits survive, bit 7 forced
        assert_eq!(registers.stat, 0x85);

        registers.stat = registers.masked_stat_write(0xFF);
        assert_eq!(registers.stat, 0xFD);
    }

    #[test]
    fn palette_parse() {
        assert_eq!(parse_dmg_palette(0xE4), [0, 1, 2, 3]);
        assert_eq!(parse_dmg_palette(0x1B), [3, 2, 1, 0]);
    }

    #[test]
    fn palette_ram_auto_increment() {
        let mut palette_ram = CgbPaletteRam::new_bg(GbSystem::Cgb);

        palette_ram.write_address_port(0x80);
        palette_ram.write_data_port(0x11);
        palette_ram.write_data_port(0x22);

        palette_ram.write_address_port(0x00);
        assert_eq!(palette_ram.read_data_port(), 0x11);
        // Reads do not auto-increment
        assert_eq!(palette_ram.read_data_port(), 0x11);

        assert_eq!(palette_ram.color(0, 0), 0x2211);
    }
}
