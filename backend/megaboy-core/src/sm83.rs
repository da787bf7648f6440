//! Sharp SM83 (LR35902), the Game Boy CPU.
//!
//! Every memory access and internal delay goes through [`bus::BusInterface`],
//! which advances the rest of the machine by one M-cycle, so instruction
//! timing falls out of the access pattern.

mod arithmetic;
mod bits;
pub mod bus;
mod flow;
mod load;

use crate::api::LoadError;
use crate::sm83::bus::BusInterface;
use crate::{savestate, GbSystem};
use bincode::{Decode, Encode};
use megaboy_common::num::GetBit;
use std::io::{self, Read, Write};

// STOP with a speed switch armed halts for $20000 T-cycles after switching
const STOP_HALT_M_CYCLES: u32 = 0x20000 / 4;

#[derive(Debug, Clone, Copy, Default, Encode, Decode)]
struct Flags {
    zero: bool,
    subtract: bool,
    half_carry: bool,
    carry: bool,
}

impl From<Flags> for u8 {
    fn from(value: Flags) -> Self {
        (u8::from(value.zero) << 7)
            | (u8::from(value.subtract) << 6)
            | (u8::from(value.half_carry) << 5)
            | (u8::from(value.carry) << 4)
    }
}

impl From<u8> for Flags {
    // The low nibble of F does not exist in hardware; this conversion is the
    // reason POP AF cannot set it
    fn from(value: u8) -> Self {
        Self {
            zero: value.bit(7),
            subtract: value.bit(6),
            half_carry: value.bit(5),
            carry: value.bit(4),
        }
    }
}

#[derive(Debug, Clone, Encode, Decode)]
struct Registers {
    a: u8,
    f: Flags,
    b: u8,
    c: u8,
    d: u8,
    e: u8,
    h: u8,
    l: u8,
    sp: u16,
    pc: u16,
    ime: bool,
}

const ENTRY_POINT: u16 = 0x0100;
const POST_BOOT_SP: u16 = 0xFFFE;

impl Registers {
    /// Post-boot-ROM values. The important part is A: $01 on DMG, $11 on CGB
    /// (including DMG-compat mode).
    fn new(system: GbSystem) -> Self {
        match system {
            GbSystem::Dmg => Self {
                a: 0x01,
                f: Flags { zero: true, subtract: false, half_carry: true, carry: true },
                b: 0x00,
                c: 0x13,
                d: 0x00,
                e: 0xD8,
                h: 0x01,
                l: 0x4D,
                sp: POST_BOOT_SP,
                pc: ENTRY_POINT,
                ime: false,
            },
            GbSystem::Cgb | GbSystem::DmgCompat => Self {
                a: 0x11,
                f: Flags { zero: true, subtract: false, half_carry: false, carry: false },
                b: 0x00,
                c: 0x00,
                d: 0xFF,
                e: 0x56,
                h: 0x00,
                l: 0x0D,
                sp: POST_BOOT_SP,
                pc: ENTRY_POINT,
                ime: false,
            },
        }
    }

    /// Pre-boot-ROM state: everything zeroed, execution starts at $0000.
    fn new_for_boot_rom() -> Self {
        Self {
            a: 0,
            f: Flags::default(),
            b: 0,
            c: 0,
            d: 0,
            e: 0,
            h: 0,
            l: 0,
            sp: 0,
            pc: 0,
            ime: false,
        }
    }

    fn bc(&self) -> u16 {
        u16::from_be_bytes([self.b, self.c])
    }

    fn de(&self) -> u16 {
        u16::from_be_bytes([self.d, self.e])
    }

    fn hl(&self) -> u16 {
        u16::from_be_bytes([self.h, self.l])
    }

    fn af(&self) -> u16 {
        u16::from_be_bytes([self.a, self.f.into()])
    }

    fn set_bc(&mut self, value: u16) {
        [self.b, self.c] = value.to_be_bytes();
    }

    fn set_de(&mut self, value: u16) {
        [self.d, self.e] = value.to_be_bytes();
    }

    fn set_hl(&mut self, value: u16) {
        [self.h, self.l] = value.to_be_bytes();
    }

    fn set_af(&mut self, value: u16) {
        let [a, f] = value.to_be_bytes();
        self.a = a;
        self.f = f.into();
    }
}

#[derive(Debug, Clone, Encode, Decode)]
struct State {
    pending_ime_set: bool,
    halted: bool,
    halt_bug: bool,
    stop_state: bool,
    stop_cycles_remaining: u32,
}

impl State {
    fn new() -> Self {
        Self {
            pending_ime_set: false,
            halted: false,
            halt_bug: false,
            stop_state: false,
            stop_cycles_remaining: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptType {
    VBlank,
    LcdStatus,
    Timer,
    Serial,
    Joypad,
}

impl InterruptType {
    // Descending priority order
    pub const ALL: [Self; 5] =
        [Self::VBlank, Self::LcdStatus, Self::Timer, Self::Serial, Self::Joypad];

    fn interrupt_vector(self) -> u16 {
        match self {
            Self::VBlank => 0x0040,
            Self::LcdStatus => 0x0048,
            Self::Timer => 0x0050,
            Self::Serial => 0x0058,
            Self::Joypad => 0x0060,
        }
    }

    pub fn register_mask(self) -> u8 {
        match self {
            Self::VBlank => 1 << 0,
            Self::LcdStatus => 1 << 1,
            Self::Timer => 1 << 2,
            Self::Serial => 1 << 3,
            Self::Joypad => 1 << 4,
        }
    }

    pub fn from_bits(bits: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|interrupt_type| bits & interrupt_type.register_mask() != 0)
    }
}

#[derive(Debug, Clone, Encode, Decode)]
pub struct Sm83 {
    registers: Registers,
    state: State,
}

impl Sm83 {
    pub fn new(system: GbSystem, boot_rom_mapped: bool) -> Self {
        let registers =
            if boot_rom_mapped { Registers::new_for_boot_rom() } else { Registers::new(system) };

        Self { registers, state: State::new() }
    }

    pub fn pc(&self) -> u16 {
        self.registers.pc
    }

    /// Execute one instruction (or one halted M-cycle), including any
    /// interrupt dispatch that follows it.
    pub fn execute_instruction<B: BusInterface>(&mut self, bus: &mut B) {
        if bus.halt() {
            // CPU is stalled by a VRAM DMA transfer
            bus.idle();
            return;
        }

        if self.state.pending_ime_set {
            self.registers.ime = true;
            self.state.pending_ime_set = false;
        }

        if self.state.halted {
            self.run_halted_cycle(bus);
            return;
        }

        let opcode = self.fetch_operand(bus);

        log::trace!(
            "Executing opcode {opcode:02X} at PC {:04X}; A={:02X} F={:02X} BC={:04X} DE={:04X} HL={:04X} SP={:04X} IME={}",
            self.registers.pc.wrapping_sub(1),
            self.registers.a,
            u8::from(self.registers.f),
            self.registers.bc(),
            self.registers.de(),
            self.registers.hl(),
            self.registers.sp,
            self.registers.ime,
        );

        self.execute_opcode(bus, opcode);
        self.handle_interrupts(bus);
    }

    fn run_halted_cycle<B: BusInterface>(&mut self, bus: &mut B) {
        bus.idle();

        if self.state.stop_state {
            self.state.stop_cycles_remaining = self.state.stop_cycles_remaining.saturating_sub(1);
            if self.state.stop_cycles_remaining == 0 {
                self.state.halted = false;
                self.state.stop_state = false;
                bus.set_cpu_stopped(false);
            }
            return;
        }

        // HALT ends on any latched interrupt, whether or not IME is set
        if bus.interrupt_pending() {
            self.state.halted = false;
            self.handle_interrupts(bus);
        }
    }

    fn handle_interrupts<B: BusInterface>(&mut self, bus: &mut B) {
        if !self.registers.ime || !bus.interrupt_pending() {
            return;
        }

        // Dispatch spends five M-cycles: two idles, the two PC-push writes,
        // and a final idle
        bus.idle();
        bus.idle();

        let [pc_lsb, pc_msb] = self.registers.pc.to_le_bytes();
        self.push_stack(bus, pc_msb);

        // IE is sampled between the two pushes, which matters when a push
        // lands on $FFFF
        let ie_register = bus.read_ie_register();
        self.push_stack(bus, pc_lsb);

        bus.idle();

        let if_register = bus.read_if_register();
        self.registers.ime = false;
        self.state.pending_ime_set = false;

        let Some(interrupt_type) = InterruptType::from_bits(ie_register & if_register) else {
            // The push overwrote IE and cleared every pending bit; the CPU
            // ends up at $0000
            self.registers.pc = 0x0000;
            return;
        };

        bus.acknowledge_interrupt(interrupt_type);
        self.registers.pc = interrupt_type.interrupt_vector();

        log::trace!("Dispatched interrupt {interrupt_type:?}");
    }

    fn execute_opcode<B: BusInterface>(&mut self, bus: &mut B, opcode: u8) {
        match opcode {
            // NOP
            0x00 => {}
            // LD rr, u16
            0x01 | 0x11 | 0x21 | 0x31 => self.ld_rr_nn(bus, opcode),
            // INC rr
            0x03 | 0x13 | 0x23 | 0x33 => self.inc_rr(bus, opcode),
            // DEC rr
            0x0B | 0x1B | 0x2B | 0x3B => self.dec_rr(bus, opcode),
            // ADD HL, rr
            0x09 | 0x19 | 0x29 | 0x39 => self.add_hl_rr(bus, opcode),
            // INC r / INC (HL)
            0x04 | 0x0C | 0x14 | 0x1C | 0x24 | 0x2C | 0x34 | 0x3C => self.inc_r(bus, opcode),
            // DEC r / DEC (HL)
            0x05 | 0x0D | 0x15 | 0x1D | 0x25 | 0x2D | 0x35 | 0x3D => self.dec_r(bus, opcode),
            // LD r, u8 / LD (HL), u8
            0x06 | 0x0E | 0x16 | 0x1E | 0x26 | 0x2E | 0x36 | 0x3E => self.ld_r_imm(bus, opcode),
            // LD (BC), A
            0x02 => self.ld_bc_a(bus),
            // RLCA
            0x07 => self.rlca(),
            // LD (u16), SP
            0x08 => self.ld_indirect_sp(bus),
            // LD A, (BC)
            0x0A => self.ld_a_bc(bus),
            // RRCA
            0x0F => self.rrca(),
            // STOP
            0x10 => self.stop(bus),
            // LD (DE), A
            0x12 => self.ld_de_a(bus),
            // RLA
            0x17 => self.rla(),
            // JR i8
            0x18 => self.jr_e(bus),
            // LD A, (DE)
            0x1A => self.ld_a_de(bus),
            // RRA
            0x1F => self.rra(),
            // JR cc, i8
            0x20 | 0x28 | 0x30 | 0x38 => self.jr_cc_e(bus, opcode),
            // LD (HL+), A
            0x22 => self.ld_hl_a_postinc(bus),
            // DAA
            0x27 => self.daa(),
            // LD A, (HL+)
            0x2A => self.ld_a_hl_postinc(bus),
            // CPL
            0x2F => self.cpl(),
            // LD (HL-), A
            0x32 => self.ld_hl_a_postdec(bus),
            // SCF
            0x37 => self.scf(),
            // LD A, (HL-)
            0x3A => self.ld_a_hl_postdec(bus),
            // CCF
            0x3F => self.ccf(),
            // LD r, r' / LD (HL), r / LD r, (HL)
            0x40..=0x75 | 0x77..=0x7F => self.ld_r_r(bus, opcode),
            // HALT
            0x76 => self.halt(bus),
            // ADD A, r
            0x80..=0x87 => self.add_a_r(bus, opcode),
            // ADC A, r
            0x88..=0x8F => self.adc_a_r(bus, opcode),
            // SUB A, r
            0x90..=0x97 => self.sub_a_r(bus, opcode),
            // SBC A, r
            0x98..=0x9F => self.sbc_a_r(bus, opcode),
            // AND A, r
            0xA0..=0xA7 => self.and_a_r(bus, opcode),
            // XOR A, r
            0xA8..=0xAF => self.xor_a_r(bus, opcode),
            // OR A, r
            0xB0..=0xB7 => self.or_a_r(bus, opcode),
            // CP A, r
            0xB8..=0xBF => self.cp_a_r(bus, opcode),
            // POP rr
            0xC1 | 0xD1 | 0xE1 | 0xF1 => self.pop_rr(bus, opcode),
            // PUSH rr
            0xC5 | 0xD5 | 0xE5 | 0xF5 => self.push_rr(bus, opcode),
            // RET cc
            0xC0 | 0xC8 | 0xD0 | 0xD8 => self.ret_cc(bus, opcode),
            // JP cc, u16
            0xC2 | 0xCA | 0xD2 | 0xDA => self.jp_cc_nn(bus, opcode),
            // CALL cc, u16
            0xC4 | 0xCC | 0xD4 | 0xDC => self.call_cc_nn(bus, opcode),
            // RST $xx
            0xC7 | 0xCF | 0xD7 | 0xDF | 0xE7 | 0xEF | 0xF7 | 0xFF => self.rst(bus, opcode),
            // JP u16
            0xC3 => self.jp_nn(bus),
            // ADD A, u8
            0xC6 => self.add_a_imm(bus),
            // RET
            0xC9 => self.ret(bus),
            // $CB prefix: a second fetch selects the real instruction
            0xCB => self.execute_cb_opcode(bus),
            // CALL u16
            0xCD => self.call_nn(bus),
            // ADC A, u8
            0xCE => self.adc_a_imm(bus),
            // SUB A, u8
            0xD6 => self.sub_a_imm(bus),
            // RETI
            0xD9 => self.reti(bus),
            // SBC A, u8
            0xDE => self.sbc_a_imm(bus),
            // LDH (u8), A
            0xE0 => self.ldh_imm_a(bus),
            // LD ($FF00+C), A
            0xE2 => self.ld_c_a_high_page(bus),
            // AND A, u8
            0xE6 => self.and_a_imm(bus),
            // ADD SP, i8
            0xE8 => self.add_sp_e(bus),
            // JP HL
            0xE9 => self.jp_hl(),
            // LD (u16), A
            0xEA => self.ld_indirect_a(bus),
            // XOR A, u8
            0xEE => self.xor_a_imm(bus),
            // LDH A, (u8)
            0xF0 => self.ldh_a_imm(bus),
            // LD A, ($FF00+C)
            0xF2 => self.ld_a_c_high_page(bus),
            // DI
            0xF3 => self.di(),
            // OR A, u8
            0xF6 => self.or_a_imm(bus),
            // LD HL, SP+i8
            0xF8 => self.ld_hl_sp_e(bus),
            // LD SP, HL
            0xF9 => self.ld_sp_hl(bus),
            // LD A, (u16)
            0xFA => self.ld_a_indirect(bus),
            // EI
            0xFB => self.ei(),
            // CP A, u8
            0xFE => self.cp_a_imm(bus),
            // Unknown opcodes execute as a one-byte, one-M-cycle no-op
            0xD3 | 0xDB | 0xDD | 0xE3 | 0xE4 | 0xEB | 0xEC | 0xED | 0xF4 | 0xFC | 0xFD => {
                log::warn!(
                    "Unknown opcode {opcode:02X} at {:04X}; continuing",
                    self.registers.pc.wrapping_sub(1)
                );
            }
        }
    }

    fn execute_cb_opcode<B: BusInterface>(&mut self, bus: &mut B) {
        let opcode = self.fetch_operand(bus);

        match opcode {
            // RLC r / RLC (HL)
            0x00..=0x07 => self.rlc_r(bus, opcode),
            // RRC r
            0x08..=0x0F => self.rrc_r(bus, opcode),
            // RL r
            0x10..=0x17 => self.rl_r(bus, opcode),
            // RR r
            0x18..=0x1F => self.rr_r(bus, opcode),
            // SLA r
            0x20..=0x27 => self.sla_r(bus, opcode),
            // SRA r
            0x28..=0x2F => self.sra_r(bus, opcode),
            // SWAP r
            0x30..=0x37 => self.swap_r(bus, opcode),
            // SRL r
            0x38..=0x3F => self.srl_r(bus, opcode),
            // BIT n, r
            0x40..=0x7F => self.bit_n_r(bus, opcode),
            // RES n, r
            0x80..=0xBF => self.res_n_r(bus, opcode),
            // SET n, r
            0xC0..=0xFF => self.set_n_r(bus, opcode),
        }
    }

    fn fetch_operand<B: BusInterface>(&mut self, bus: &mut B) -> u8 {
        let operand = bus.read(self.registers.pc);

        if self.state.halt_bug {
            // HALT bug: PC fails to increment for the fetch right after the
            // bugged HALT
            self.state.halt_bug = false;
        } else {
            self.registers.pc = self.registers.pc.wrapping_add(1);
        }

        operand
    }

    fn fetch_operand_u16<B: BusInterface>(&mut self, bus: &mut B) -> u16 {
        let lsb = self.fetch_operand(bus);
        let msb = self.fetch_operand(bus);
        u16::from_le_bytes([lsb, msb])
    }

    fn push_stack<B: BusInterface>(&mut self, bus: &mut B, value: u8) {
        self.registers.sp = self.registers.sp.wrapping_sub(1);
        bus.write(self.registers.sp, value);
    }

    fn push_stack_u16<B: BusInterface>(&mut self, bus: &mut B, value: u16) {
        let [lsb, msb] = value.to_le_bytes();
        self.push_stack(bus, msb);
        self.push_stack(bus, lsb);
    }

    fn pop_stack<B: BusInterface>(&mut self, bus: &mut B) -> u8 {
        let value = bus.read(self.registers.sp);
        self.registers.sp = self.registers.sp.wrapping_add(1);
        value
    }

    fn pop_stack_u16<B: BusInterface>(&mut self, bus: &mut B) -> u16 {
        let lsb = self.pop_stack(bus);
        let msb = self.pop_stack(bus);
        u16::from_le_bytes([lsb, msb])
    }

    fn read_register<B: BusInterface>(&self, bus: &mut B, register_bits: u8) -> u8 {
        match register_bits & 0x7 {
            0x0 => self.registers.b,
            0x1 => self.registers.c,
            0x2 => self.registers.d,
            0x3 => self.registers.e,
            0x4 => self.registers.h,
            0x5 => self.registers.l,
            // (HL)
            0x6 => bus.read(self.registers.hl()),
            0x7 => self.registers.a,
            _ => unreachable!("value & 0x7 is always <= 0x7"),
        }
    }

    fn write_register<B: BusInterface>(&mut self, bus: &mut B, register_bits: u8, value: u8) {
        match register_bits & 0x7 {
            0x0 => self.registers.b = value,
            0x1 => self.registers.c = value,
            0x2 => self.registers.d = value,
            0x3 => self.registers.e = value,
            0x4 => self.registers.h = value,
            0x5 => self.registers.l = value,
            // (HL)
            0x6 => bus.write(self.registers.hl(), value),
            0x7 => self.registers.a = value,
            _ => unreachable!("value & 0x7 is always <= 0x7"),
        }
    }

    // Save states: the scalar state block, then the register pairs

    pub fn save_state<W: Write>(&self, out: &mut W) -> io::Result<()> {
        savestate::encode(out, &self.registers.pc)?;
        savestate::encode(out, &self.registers.sp)?;
        savestate::encode(out, &self.registers.ime)?;
        savestate::encode(out, &self.state)?;

        savestate::encode(out, &self.registers.af())?;
        savestate::encode(out, &self.registers.bc())?;
        savestate::encode(out, &self.registers.de())?;
        savestate::encode(out, &self.registers.hl())
    }

    pub fn load_state<R: Read>(&mut self, reader: &mut R) -> Result<(), LoadError> {
        self.registers.pc = savestate::decode(reader)?;
        self.registers.sp = savestate::decode(reader)?;
        self.registers.ime = savestate::decode(reader)?;
        self.state = savestate::decode(reader)?;

        let af: u16 = savestate::decode(reader)?;
        let bc: u16 = savestate::decode(reader)?;
        let de: u16 = savestate::decode(reader)?;
        let hl: u16 = savestate::decode(reader)?;
        self.registers.set_af(af);
        self.registers.set_bc(bc);
        self.registers.set_de(de);
        self.registers.set_hl(hl);

        Ok(())
    }
}

#[cfg(test)]
mod tests;
