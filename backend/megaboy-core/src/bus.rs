//! The memory bus: address decoding, I/O register dispatch, and the
//! per-M-cycle component stepping the CPU drives through `BusInterface`.

use crate::apu::Apu;
use crate::cartridge::Cartridge;
use crate::cgb::{CgbRegisters, CpuSpeed};
use crate::dma::DmaUnit;
use crate::inputs::Joypad;
use crate::interrupts::InterruptRegisters;
use crate::memory::Memory;
use crate::ppu::Ppu;
use crate::serial::SerialPort;
use crate::sm83::bus::BusInterface;
use crate::sm83::InterruptType;
use crate::timer::GbTimer;
use crate::GbSystem;

pub struct Bus<'a> {
    pub system: GbSystem,
    pub ppu: &'a mut Ppu,
    pub apu: &'a mut Apu,
    pub memory: &'a mut Memory,
    pub serial: &'a mut SerialPort,
    pub cartridge: &'a mut Cartridge,
    pub interrupts: &'a mut InterruptRegisters,
    pub cgb: &'a mut CgbRegisters,
    pub timer: &'a mut GbTimer,
    pub dma: &'a mut DmaUnit,
    pub joypad: &'a mut Joypad,
    pub total_cycles: &'a mut u64,
}

impl Bus<'_> {
    fn cgb_mode(&self) -> bool {
        self.system == GbSystem::Cgb
    }

    fn cgb_device(&self) -> bool {
        self.system.is_cgb_device()
    }

    fn tick_components(&mut self) {
        let t_cycles_per_m = self.cgb.speed.t_cycles_per_m();
        *self.total_cycles += u64::from(t_cycles_per_m);

        // These run per M-cycle and therefore speed up in double speed
        self.timer.tick_m_cycle(self.interrupts);
        self.dma.oam_dma_tick_m_cycle(self.cartridge, self.memory, self.ppu);
        self.serial.tick_m_cycle(self.interrupts);
        self.cartridge.tick(t_cycles_per_m.into());

        // The PPU, APU, and VRAM DMA stay on the absolute clock: in double
        // speed they only advance every other M-cycle
        if self.cgb.speed == CpuSpeed::Double {
            self.cgb.double_speed_odd_cycle = !self.cgb.double_speed_odd_cycle;
            if self.cgb.double_speed_odd_cycle {
                return;
            }
        }

        for _ in 0..2 {
            self.dma.vram_dma_copy_byte(self.cartridge, self.memory, self.ppu);
        }

        self.ppu.execute(4, self.interrupts);
        if self.ppu.take_hblank_signal() {
            self.dma.on_hblank_start();
        }

        self.apu.tick();
    }

    /// While an OAM DMA transfer is running, the CPU can only reach HRAM,
    /// IE, and the DMA register itself (rewriting it restarts the transfer).
    fn blocked_by_oam_dma(&self, address: u16) -> bool {
        self.dma.oam_dma_blocking()
            && !matches!(address, 0xFF80..=0xFFFE | 0xFFFF | 0xFF46)
    }

    fn read_io_register(&self, address: u16) -> u8 {
        match address & 0x7F {
            0x00 => self.joypad.read_joyp(),
            0x01 => self.serial.read_data(),
            0x02 => self.serial.read_control(),
            0x04 => self.timer.read_div(),
            0x05 => self.timer.read_tima(),
            0x06 => self.timer.read_tma(),
            0x07 => self.timer.read_tac(),
            0x0F => self.interrupts.read_if(),
            0x10..=0x3F => self.apu.read_register(address),
            0x40..=0x45 | 0x47..=0x4B => self.ppu.read_register(address),
            0x46 => self.dma.read_dma_register(),
            0x4D => {
                if self.cgb_mode() {
                    self.cgb.read_key1()
                } else {
                    0xFF
                }
            }
            0x4F | 0x68..=0x6B => {
                if self.cgb_device() {
                    self.ppu.read_register(address)
                } else {
                    0xFF
                }
            }
            0x55 => {
                if self.cgb_mode() {
                    self.dma.read_hdma5()
                } else {
                    0xFF
                }
            }
            0x70 => {
                if self.cgb_mode() {
                    self.memory.read_svbk()
                } else {
                    0xFF
                }
            }
            0x72 => {
                if self.cgb_device() {
                    self.cgb.read_ff72()
                } else {
                    0xFF
                }
            }
            0x73 => {
                if self.cgb_device() {
                    self.cgb.read_ff73()
                } else {
                    0xFF
                }
            }
            0x74 => {
                if self.cgb_mode() {
                    self.cgb.read_ff74()
                } else {
                    0xFF
                }
            }
            0x75 => {
                if self.cgb_device() {
                    self.cgb.read_ff75()
                } else {
                    0xFF
                }
            }
            0x76 => {
                if self.cgb_device() {
                    self.apu.read_pcm12()
                } else {
                    0xFF
                }
            }
            0x77 => {
                if self.cgb_device() {
                    self.apu.read_pcm34()
                } else {
                    0xFF
                }
            }
            _ => {
                log::debug!("Unmapped I/O register read: {address:04X}");
                0xFF
            }
        }
    }

    fn write_io_register(&mut self, address: u16, value: u8) {
        match address & 0x7F {
            0x00 => self.joypad.write_joyp(value),
            0x01 => self.serial.write_data(value),
            0x02 => self.serial.write_control(value),
            0x04 => self.timer.write_div(),
            0x05 => self.timer.write_tima(value),
            0x06 => self.timer.write_tma(value),
            0x07 => self.timer.write_tac(value),
            0x0F => self.interrupts.write_if(value),
            0x10..=0x3F => self.apu.write_register(address, value),
            0x40..=0x45 | 0x47..=0x4B => self.ppu.write_register(address, value),
            0x46 => self.dma.write_dma_register(value),
            0x4C => {
                // KEY0 is only writable while the CGB boot ROM runs
                if self.cgb_mode() && self.memory.boot_rom_mapped() {
                    self.cgb.write_key0(value);
                }
            }
            0x4D => {
                if self.cgb_mode() {
                    self.cgb.write_key1(value);
                }
            }
            0x4F | 0x68..=0x6B => {
                if self.cgb_device() {
                    self.ppu.write_register(address, value);
                }
            }
            0x50 => {
                // BANK: unmaps the boot ROM permanently until reset
                if self.memory.boot_rom_mapped() {
                    self.memory.unmap_boot_rom();
                    log::debug!("Boot ROM unmapped");
                }
            }
            0x51 => {
                if self.cgb_mode() {
                    self.dma.write_hdma1(value);
                }
            }
            0x52 => {
                if self.cgb_mode() {
                    self.dma.write_hdma2(value);
                }
            }
            0x53 => {
                if self.cgb_mode() {
                    self.dma.write_hdma3(value);
                }
            }
            0x54 => {
                if self.cgb_mode() {
                    self.dma.write_hdma4(value);
                }
            }
            0x55 => {
                if self.cgb_mode() {
                    self.dma.write_hdma5(value, self.ppu.mode());
                }
            }
            0x70 => {
                if self.cgb_mode() {
                    self.memory.write_svbk(value);
                }
            }
            0x72 => {
                if self.cgb_device() {
                    self.cgb.write_ff72(value);
                }
            }
            0x73 => {
                if self.cgb_device() {
                    self.cgb.write_ff73(value);
                }
            }
            0x74 => {
                if self.cgb_mode() {
                    self.cgb.write_ff74(value);
                }
            }
            0x75 => {
                if self.cgb_device() {
                    self.cgb.write_ff75(value);
                }
            }
            _ => {
                log::debug!("Unmapped I/O register write: {address:04X} {value:02X}");
            }
        }
    }
}

impl BusInterface for Bus<'_> {
    fn read(&mut self, address: u16) -> u8 {
        self.tick_components();

        if self.blocked_by_oam_dma(address) {
            return 0xFF;
        }

        match address {
            0x0000..=0x7FFF => self
                .memory
                .try_read_boot_rom(address)
                .unwrap_or_else(|| self.cartridge.read_rom(address)),
            0x8000..=0x9FFF => self.ppu.read_vram(address),
            0xA000..=0xBFFF => self.cartridge.read_ram(address),
            0xC000..=0xFDFF => self.memory.read_wram(address),
            0xFE00..=0xFE9F => self.ppu.read_oam(address),
            0xFEA0..=0xFEFF => self.ppu.read_prohibited_area(),
            0xFF00..=0xFF7F => self.read_io_register(address),
            0xFF80..=0xFFFE => self.memory.read_hram(address),
            0xFFFF => self.interrupts.read_ie(),
        }
    }

    fn write(&mut self, address: u16, value: u8) {
        self.tick_components();

        if self.blocked_by_oam_dma(address) {
            return;
        }

        match address {
            0x0000..=0x7FFF => self.cartridge.write_rom(address, value),
            0x8000..=0x9FFF => self.ppu.write_vram(address, value),
            0xA000..=0xBFFF => self.cartridge.write_ram(address, value),
            0xC000..=0xFDFF => self.memory.write_wram(address, value),
            0xFE00..=0xFE9F => self.ppu.write_oam(address, value),
            0xFEA0..=0xFEFF => {}
            0xFF00..=0xFF7F => self.write_io_register(address, value),
            0xFF80..=0xFFFE => self.memory.write_hram(address, value),
            0xFFFF => self.interrupts.write_ie(value),
        }
    }

    fn idle(&mut self) {
        self.tick_components();
    }

    fn read_ie_register(&self) -> u8 {
        self.interrupts.read_ie() & 0x1F
    }

    fn read_if_register(&self) -> u8 {
        self.interrupts.read_if() & 0x1F
    }

    fn acknowledge_interrupt(&mut self, interrupt_type: InterruptType) {
        self.interrupts.clear_flag(interrupt_type);
    }

    fn halt(&self) -> bool {
        self.dma.vram_dma_active()
    }

    fn speed_switch_armed(&self) -> bool {
        self.cgb_mode() && self.cgb.speed_switch_armed
    }

    fn perform_speed_switch(&mut self) {
        self.cgb.perform_speed_switch();
        // The speed switch resets DIV
        self.timer.reset_divider();
    }

    fn set_cpu_stopped(&mut self, stopped: bool) {
        self.timer.set_stopped(stopped);
    }
}
