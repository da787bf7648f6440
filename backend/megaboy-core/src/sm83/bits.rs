//! Rotates, shifts, and the $CB-prefixed bit instructions.

use crate::sm83::bus::BusInterface;
use crate::sm83::{Flags, Sm83};
use megaboy_common::num::GetBit;

impl Sm83 {
    // RLCA: rotate A left, Z always cleared
    pub(super) fn rlca(&mut self) {
        self.registers.a = self.registers.a.rotate_left(1);
        self.registers.f = Flags {
            zero: false,
            subtract: false,
            half_carry: false,
            carry: self.registers.a.bit(0),
        };
    }

    // RRCA: rotate A right, Z always cleared
    pub(super) fn rrca(&mut self) {
        self.registers.a = self.registers.a.rotate_right(1);
        self.registers.f = Flags {
            zero: false,
            subtract: false,
            half_carry: false,
            carry: self.registers.a.bit(7),
        };
    }

    // RLA: rotate A left through carry, Z always cleared
    pub(super) fn rla(&mut self) {
        let carry = self.registers.a.bit(7);
        self.registers.a = (self.registers.a << 1) | u8::from(self.registers.f.carry);
        self.registers.f = Flags { zero: false, subtract: false, half_carry: false, carry };
    }

    // RRA: rotate A right through carry, Z always cleared
    pub(super) fn rra(&mut self) {
        let carry = self.registers.a.bit(0);
        self.registers.a = (self.registers.a >> 1) | (u8::from(self.registers.f.carry) << 7);
        self.registers.f = Flags { zero: false, subtract: false, half_carry: false, carry };
    }

    // RLC r: rotate left
    pub(super) fn rlc_r<B: BusInterface>(&mut self, bus: &mut B, opcode: u8) {
        let value = self.read_register(bus, opcode).rotate_left(1);
        self.write_register(bus, opcode, value);
        self.set_shift_flags(value, value.bit(0));
    }

    // RRC r: rotate right
    pub(super) fn rrc_r<B: BusInterface>(&mut self, bus: &mut B, opcode: u8) {
        let value = self.read_register(bus, opcode).rotate_right(1);
        self.write_register(bus, opcode, value);
        self.set_shift_flags(value, value.bit(7));
    }

    // RL r: rotate left through carry
    pub(super) fn rl_r<B: BusInterface>(&mut self, bus: &mut B, opcode: u8) {
        let value = self.read_register(bus, opcode);
        let rotated = (value << 1) | u8::from(self.registers.f.carry);
        self.write_register(bus, opcode, rotated);
        self.set_shift_flags(rotated, value.bit(7));
    }

    // RR r: rotate right through carry
    pub(super) fn rr_r<B: BusInterface>(&mut self, bus: &mut B, opcode: u8) {
        let value = self.read_register(bus, opcode);
        let rotated = (value >> 1) | (u8::from(self.registers.f.carry) << 7);
        self.write_register(bus, opcode, rotated);
        self.set_shift_flags(rotated, value.bit(0));
    }

    // SLA r: arithmetic shift left
    pub(super) fn sla_r<B: BusInterface>(&mut self, bus: &mut B, opcode: u8) {
        let value = self.read_register(bus, opcode);
        let shifted = value << 1;
        self.write_register(bus, opcode, shifted);
        self.set_shift_flags(shifted, value.bit(7));
    }

    // SRA r: arithmetic shift right (bit 7 preserved)
    pub(super) fn sra_r<B: BusInterface>(&mut self, bus: &mut B, opcode: u8) {
        let value = self.read_register(bus, opcode);
        let shifted = (value >> 1) | (value & 0x80);
        self.write_register(bus, opcode, shifted);
        self.set_shift_flags(shifted, value.bit(0));
    }

    // SWAP r: exchange nibbles
    pub(super) fn swap_r<B: BusInterface>(&mut self, bus: &mut B, opcode: u8) {
        let value = self.read_register(bus, opcode).rotate_left(4);
        self.write_register(bus, opcode, value);
        self.set_shift_flags(value, false);
    }

    // SRL r: logical shift right
    pub(super) fn srl_r<B: BusInterface>(&mut self, bus: &mut B, opcode: u8) {
        let value = self.read_register(bus, opcode);
        let shifted = value >> 1;
        self.write_register(bus, opcode, shifted);
        self.set_shift_flags(shifted, value.bit(0));
    }

    // BIT n, r: test a bit; only reads (HL)
    pub(super) fn bit_n_r<B: BusInterface>(&mut self, bus: &mut B, opcode: u8) {
        let value = self.read_register(bus, opcode);
        let bit = (opcode >> 3) & 0x7;

        self.registers.f.zero = !value.bit(bit);
        self.registers.f.subtract = false;
        self.registers.f.half_carry = true;
    }

    // RES n, r: clear a bit, no flags
    pub(super) fn res_n_r<B: BusInterface>(&mut self, bus: &mut B, opcode: u8) {
        let value = self.read_register(bus, opcode);
        let bit = (opcode >> 3) & 0x7;
        self.write_register(bus, opcode, value & !(1 << bit));
    }

    // SET n, r: set a bit, no flags
    pub(super) fn set_n_r<B: BusInterface>(&mut self, bus: &mut B, opcode: u8) {
        let value = self.read_register(bus, opcode);
        let bit = (opcode >> 3) & 0x7;
        self.write_register(bus, opcode, value | (1 << bit));
    }

    fn set_shift_flags(&mut self, result: u8, carry: bool) {
        self.registers.f =
            Flags { zero: result == 0, subtract: false, half_carry: false, carry };
    }
}
