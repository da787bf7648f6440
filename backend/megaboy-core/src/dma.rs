//! The OAM DMA engine and the CGB general-purpose / HBlank VRAM DMA engine.

use crate::cartridge::Cartridge;
use crate::memory::Memory;
use crate::ppu::{Ppu, PpuMode};
use bincode::{Decode, Encode};
use megaboy_common::num::GetBit;

const OAM_DMA_BYTES: u8 = 160;
const VRAM_DMA_BLOCK_LEN: u8 = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Encode, Decode)]
enum VramDmaMode {
    #[default]
    None,
    // Immediate transfer, CPU stalled for the duration
    General,
    // One 16-byte block per HBlank
    HBlank,
}

#[derive(Debug, Clone, Encode, Decode)]
pub struct DmaUnit {
    // OAM DMA
    oam_dma_reg: u8,
    oam_dma_active: bool,
    oam_dma_source: u16,
    oam_dma_bytes_copied: u8,
    oam_dma_startup_delay: u8,
    oam_dma_restart_pending: bool,
    oam_dma_restart_delay: u8,
    // GDMA/HDMA
    vram_dma_mode: VramDmaMode,
    vram_dma_active: bool,
    vram_dma_source: u16,
    vram_dma_dest: u16,
    // Stored as (remaining 16-byte blocks - 1), the HDMA5 readback encoding
    vram_dma_blocks: u8,
    vram_dma_block_bytes: u8,
}

impl DmaUnit {
    pub fn new() -> Self {
        Self {
            oam_dma_reg: 0xFF,
            oam_dma_active: false,
            oam_dma_source: 0,
            oam_dma_bytes_copied: 0,
            oam_dma_startup_delay: 0,
            oam_dma_restart_pending: false,
            oam_dma_restart_delay: 0,
            vram_dma_mode: VramDmaMode::default(),
            vram_dma_active: false,
            vram_dma_source: 0,
            vram_dma_dest: 0,
            vram_dma_blocks: 0xFF,
            vram_dma_block_bytes: 0,
        }
    }

    pub fn read_dma_register(&self) -> u8 {
        self.oam_dma_reg
    }

    pub fn write_dma_register(&mut self, value: u8) {
        self.oam_dma_reg = value;

        if self.oam_dma_active {
            // A restart during an active transfer takes effect after one
            // more copied byte
            self.oam_dma_restart_pending = true;
            self.oam_dma_restart_delay = 1;
        } else {
            self.begin_oam_dma(2);
        }

        log::trace!("DMA write: {value:02X}");
    }

    fn begin_oam_dma(&mut self, startup_delay: u8) {
        self.oam_dma_active = true;
        self.oam_dma_bytes_copied = 0;
        self.oam_dma_startup_delay = startup_delay;
        self.oam_dma_restart_pending = false;

        // Source values of $FE/$FF redirect into the echo RAM region
        self.oam_dma_source = if self.oam_dma_reg >= 0xFE {
            0xDE00 + (u16::from(self.oam_dma_reg - 0xFE) << 8)
        } else {
            u16::from(self.oam_dma_reg) << 8
        };
    }

    /// Whether the CPU's bus accesses outside HRAM/IE are currently blocked.
    pub fn oam_dma_blocking(&self) -> bool {
        self.oam_dma_active && self.oam_dma_startup_delay == 0
    }

    pub fn oam_dma_in_progress(&self) -> bool {
        self.oam_dma_active
    }

    pub fn oam_dma_tick_m_cycle(
        &mut self,
        cartridge: &Cartridge,
        memory: &Memory,
        ppu: &mut Ppu,
    ) {
        if !self.oam_dma_active {
            return;
        }

        if self.oam_dma_startup_delay > 0 && !self.oam_dma_restart_pending {
            self.oam_dma_startup_delay -= 1;
            return;
        }

        let byte = read_dma_source(self.oam_dma_source, cartridge, memory, ppu);
        ppu.write_oam_for_dma(0xFE00 | u16::from(self.oam_dma_bytes_copied), byte);

        self.oam_dma_source = self.oam_dma_source.wrapping_add(1);
        self.oam_dma_bytes_copied += 1;

        if self.oam_dma_restart_pending {
            if self.oam_dma_restart_delay == 0 {
                self.begin_oam_dma(0);
            } else {
                self.oam_dma_restart_delay -= 1;
            }
        } else if self.oam_dma_bytes_copied == OAM_DMA_BYTES {
            self.oam_dma_active = false;
        }
    }

    // HDMA1: VRAM DMA source, high byte
    pub fn write_hdma1(&mut self, value: u8) {
        self.vram_dma_source = (self.vram_dma_source & 0x00FF) | (u16::from(value) << 8);
    }

    // HDMA2: VRAM DMA source, low byte (low nibble forced to zero)
    pub fn write_hdma2(&mut self, value: u8) {
        self.vram_dma_source = (self.vram_dma_source & 0xFF00) | u16::from(value & 0xF0);
    }

    // HDMA3: VRAM DMA destination, high byte
    pub fn write_hdma3(&mut self, value: u8) {
        self.vram_dma_dest = (self.vram_dma_dest & 0x00FF) | (u16::from(value) << 8);
    }

    // HDMA4: VRAM DMA destination, low byte (low nibble forced to zero)
    pub fn write_hdma4(&mut self, value: u8) {
        self.vram_dma_dest = (self.vram_dma_dest & 0xFF00) | u16::from(value & 0xF0);
    }

    // HDMA5: length / mode / trigger, and cancellation while active
    pub fn write_hdma5(&mut self, value: u8, ppu_mode: PpuMode) {
        if self.vram_dma_mode != VramDmaMode::None {
            // Writing with bit 7 clear cancels an in-flight HDMA; the length
            // bits are still latched
            self.vram_dma_blocks = value & 0x7F;
            if !value.bit(7) {
                self.vram_dma_mode = VramDmaMode::None;
                self.vram_dma_active = false;
            }
            return;
        }

        self.vram_dma_blocks = value & 0x7F;
        self.vram_dma_block_bytes = 0;

        if value.bit(7) {
            self.vram_dma_mode = VramDmaMode::HBlank;
            self.vram_dma_active = ppu_mode == PpuMode::HBlank;
        } else {
            self.vram_dma_mode = VramDmaMode::General;
            self.vram_dma_active = true;
        }

        log::trace!(
            "HDMA5 write: {value:02X} ({:?} from {:04X} to {:04X}, {} blocks)",
            self.vram_dma_mode,
            self.vram_dma_source,
            self.vram_dma_dest,
            u16::from(self.vram_dma_blocks) + 1
        );
    }

    pub fn read_hdma5(&self) -> u8 {
        (u8::from(self.vram_dma_mode == VramDmaMode::None) << 7) | self.vram_dma_blocks
    }

    /// Whether the CPU is stalled by an in-flight VRAM DMA transfer.
    pub fn vram_dma_active(&self) -> bool {
        self.vram_dma_active
    }

    /// HBlank entry resumes an armed HDMA transfer for one block.
    pub fn on_hblank_start(&mut self) {
        if self.vram_dma_mode == VramDmaMode::HBlank {
            self.vram_dma_active = true;
        }
    }

    /// Copy one byte to VRAM. Called twice per M-cycle at the single-speed
    /// rate, which works out to the specified 16 bytes per 32 T-cycles.
    pub fn vram_dma_copy_byte(
        &mut self,
        cartridge: &Cartridge,
        memory: &Memory,
        ppu: &mut Ppu,
    ) {
        if !self.vram_dma_active {
            return;
        }

        let byte = read_dma_source(self.vram_dma_source, cartridge, memory, ppu);
        ppu.write_vram_for_dma(self.vram_dma_dest & 0x1FFF, byte);

        self.vram_dma_source = self.vram_dma_source.wrapping_add(1);
        self.vram_dma_dest = self.vram_dma_dest.wrapping_add(1);
        self.vram_dma_block_bytes += 1;

        if self.vram_dma_block_bytes == VRAM_DMA_BLOCK_LEN {
            self.vram_dma_block_bytes = 0;
            self.vram_dma_blocks = self.vram_dma_blocks.wrapping_sub(1);

            // The block count underflowing past zero ends the transfer, as
            // does the destination overflowing past $FFFF
            if self.vram_dma_blocks == 0xFF || self.vram_dma_dest == 0x0000 {
                self.vram_dma_mode = VramDmaMode::None;
                self.vram_dma_active = false;
            } else if self.vram_dma_mode == VramDmaMode::HBlank {
                self.vram_dma_active = false;
            }
        }
    }
}

// DMA engines bypass the CPU bus: OAM, I/O registers, and HRAM are not
// readable, and VRAM reads ignore the PPU access gating
fn read_dma_source(address: u16, cartridge: &Cartridge, memory: &Memory, ppu: &Ppu) -> u8 {
    match address {
        0x0000..=0x7FFF => cartridge.read_rom(address),
        0x8000..=0x9FFF => ppu.read_vram_for_dma(address),
        0xA000..=0xBFFF => cartridge.read_ram(address),
        0xC000..=0xFDFF => memory.read_wram(address),
        0xFE00..=0xFFFF => 0xFF,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hdma5_readback() {
        let mut dma = DmaUnit::new();
        assert_eq!(dma.read_hdma5() & 0x80, 0x80);

        dma.write_hdma5(0x05, PpuMode::VBlank);
        // General-purpose DMA is immediately active
        assert!(dma.vram_dma_active());
        assert_eq!(dma.read_hdma5(), 0x05);
    }

    #[test]
    fn hdma_waits_for_hblank() {
        let mut dma = DmaUnit::new();

        dma.write_hdma5(0x85, PpuMode::VBlank);
        assert!(!dma.vram_dma_active());

        dma.on_hblank_start();
        assert!(dma.vram_dma_active());

        // Cancelling clears bit 7 of the readback
        dma.write_hdma5(0x00, PpuMode::HBlank);
        assert!(!dma.vram_dma_active());
        assert_eq!(dma.read_hdma5() & 0x80, 0x80);
    }

    #[test]
    fn oam_dma_startup_delay() {
        let mut dma = DmaUnit::new();

        dma.write_dma_register(0xC0);
        assert!(dma.oam_dma_in_progress());
        assert!(!dma.oam_dma_blocking());
    }
}
