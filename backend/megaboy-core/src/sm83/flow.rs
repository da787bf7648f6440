//! Jumps, calls, returns, interrupt masking, HALT and STOP.

use crate::sm83::bus::BusInterface;
use crate::sm83::{Flags, Sm83, STOP_HALT_M_CYCLES};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JumpCondition {
    NotZero,
    Zero,
    NoCarry,
    Carry,
}

impl JumpCondition {
    fn from_opcode(opcode: u8) -> Self {
        match (opcode >> 3) & 0x3 {
            0x0 => Self::NotZero,
            0x1 => Self::Zero,
            0x2 => Self::NoCarry,
            0x3 => Self::Carry,
            _ => unreachable!("value & 0x3 is always <= 0x3"),
        }
    }

    fn check(self, flags: Flags) -> bool {
        match self {
            Self::NotZero => !flags.zero,
            Self::Zero => flags.zero,
            Self::NoCarry => !flags.carry,
            Self::Carry => flags.carry,
        }
    }
}

impl Sm83 {
    // JP u16
    pub(super) fn jp_nn<B: BusInterface>(&mut self, bus: &mut B) {
        self.registers.pc = self.fetch_operand_u16(bus);
        bus.idle();
    }

    // JP HL: no internal cycle
    pub(super) fn jp_hl(&mut self) {
        self.registers.pc = self.registers.hl();
    }

    // JP cc, u16: the address is always read; the internal cycle is spent
    // only when the jump is taken
    pub(super) fn jp_cc_nn<B: BusInterface>(&mut self, bus: &mut B, opcode: u8) {
        let address = self.fetch_operand_u16(bus);

        if JumpCondition::from_opcode(opcode).check(self.registers.f) {
            self.registers.pc = address;
            bus.idle();
        }
    }

    // JR i8
    pub(super) fn jr_e<B: BusInterface>(&mut self, bus: &mut B) {
        let offset = self.fetch_operand(bus) as i8;
        self.registers.pc = self.registers.pc.wrapping_add(offset as u16);
        bus.idle();
    }

    // JR cc, i8
    pub(super) fn jr_cc_e<B: BusInterface>(&mut self, bus: &mut B, opcode: u8) {
        let offset = self.fetch_operand(bus) as i8;

        if JumpCondition::from_opcode(opcode).check(self.registers.f) {
            self.registers.pc = self.registers.pc.wrapping_add(offset as u16);
            bus.idle();
        }
    }

    // CALL u16
    pub(super) fn call_nn<B: BusInterface>(&mut self, bus: &mut B) {
        let address = self.fetch_operand_u16(bus);

        bus.idle();
        self.push_stack_u16(bus, self.registers.pc);
        self.registers.pc = address;
    }

    // CALL cc, u16
    pub(super) fn call_cc_nn<B: BusInterface>(&mut self, bus: &mut B, opcode: u8) {
        let address = self.fetch_operand_u16(bus);

        if !JumpCondition::from_opcode(opcode).check(self.registers.f) {
            return;
        }

        bus.idle();
        self.push_stack_u16(bus, self.registers.pc);
        self.registers.pc = address;
    }

    // RET
    pub(super) fn ret<B: BusInterface>(&mut self, bus: &mut B) {
        self.registers.pc = self.pop_stack_u16(bus);
        bus.idle();
    }

    // RET cc: an extra internal cycle for the condition check
    pub(super) fn ret_cc<B: BusInterface>(&mut self, bus: &mut B, opcode: u8) {
        bus.idle();

        if !JumpCondition::from_opcode(opcode).check(self.registers.f) {
            return;
        }

        self.registers.pc = self.pop_stack_u16(bus);
        bus.idle();
    }

    // RETI: RET plus an immediate (not delayed) IME set
    pub(super) fn reti<B: BusInterface>(&mut self, bus: &mut B) {
        self.registers.pc = self.pop_stack_u16(bus);
        self.registers.ime = true;
        bus.idle();
    }

    // RST: call a fixed vector
    pub(super) fn rst<B: BusInterface>(&mut self, bus: &mut B, opcode: u8) {
        bus.idle();
        self.push_stack_u16(bus, self.registers.pc);
        self.registers.pc = (opcode & 0x38).into();
    }

    // EI: the IME set lands one instruction late, so EI immediately followed
    // by DI never opens an interrupt window
    pub(super) fn ei(&mut self) {
        self.state.pending_ime_set = true;
    }

    // DI: masks interrupts at once and cancels any EI still in flight
    pub(super) fn di(&mut self) {
        self.registers.ime = false;
        self.state.pending_ime_set = false;
    }

    // HALT: sleep until an interrupt is latched
    pub(super) fn halt<B: BusInterface>(&mut self, bus: &mut B) {
        self.state.halted = true;

        // HALT bug: with IME clear and an interrupt already pending, the
        // next opcode fetch does not increment PC
        self.state.halt_bug = !self.registers.ime && bus.interrupt_pending();
    }

    // STOP: on CGB with KEY1 armed this performs the speed switch; otherwise
    // it behaves like a NOP that swallows the following byte
    pub(super) fn stop<B: BusInterface>(&mut self, bus: &mut B) {
        self.fetch_operand(bus);

        if !bus.speed_switch_armed() {
            return;
        }

        bus.perform_speed_switch();

        // Unless an enabled interrupt is already pending, the CPU sleeps
        // for $20000 T-cycles after the switch
        if !(self.registers.ime && bus.interrupt_pending()) {
            self.state.halted = true;
            self.state.stop_state = true;
            self.state.stop_cycles_remaining = STOP_HALT_M_CYCLES;
            bus.set_cpu_stopped(true);
        }
    }
}
