use super::bus::{BusInterface, InMemoryBus};
use super::*;

fn new_cpu() -> Sm83 {
    let mut cpu = Sm83::new(GbSystem::Dmg, false);
    // Start from a clean slate at $0000 for program-based tests
    cpu.registers = Registers::new_for_boot_rom();
    cpu.registers.sp = 0xFFFE;
    cpu
}

fn run(cpu: &mut Sm83, bus: &mut InMemoryBus, instructions: u32) {
    for _ in 0..instructions {
        cpu.execute_instruction(bus);
    }
}

#[test]
fn ld_store_load_round_trip() {
    // LD A, $42; LD ($C000), A; LD A, ($C000)
    let mut bus = InMemoryBus::with_program(&[0x3E, 0x42, 0xEA, 0x00, 0xC0, 0xFA, 0x00, 0xC0]);
    let mut cpu = new_cpu();

    run(&mut cpu, &mut bus, 3);

    assert_eq!(cpu.registers.a, 0x42);
    assert_eq!(bus.memory[0xC000], 0x42);
    assert_eq!(cpu.registers.pc, 0x0008);
    // 2 + 4 + 4 M-cycles
    assert_eq!(bus.m_cycles, 10);
}

#[test]
fn conditional_jump_timing() {
    // JR NZ, +2 with Z clear: taken, 3 M-cycles
    let mut bus = InMemoryBus::with_program(&[0x20, 0x02]);
    let mut cpu = new_cpu();
    cpu.execute_instruction(&mut bus);
    assert_eq!(cpu.registers.pc, 0x0004);
    assert_eq!(bus.m_cycles, 3);

    // JR NZ with Z set: not taken, 2 M-cycles
    let mut bus = InMemoryBus::with_program(&[0x20, 0x02]);
    let mut cpu = new_cpu();
    cpu.registers.f.zero = true;
    cpu.execute_instruction(&mut bus);
    assert_eq!(cpu.registers.pc, 0x0002);
    assert_eq!(bus.m_cycles, 2);
}

#[test]
fn call_and_ret_timing() {
    // CALL $0010 ... RET at $0010
    let mut bus = InMemoryBus::with_program(&[0xCD, 0x10, 0x00]);
    bus.memory[0x0010] = 0xC9;
    let mut cpu = new_cpu();

    cpu.execute_instruction(&mut bus);
    assert_eq!(cpu.registers.pc, 0x0010);
    assert_eq!(cpu.registers.sp, 0xFFFC);
    assert_eq!(bus.m_cycles, 6);

    cpu.execute_instruction(&mut bus);
    assert_eq!(cpu.registers.pc, 0x0003);
    assert_eq!(cpu.registers.sp, 0xFFFE);
    assert_eq!(bus.m_cycles, 6 + 4);
}

#[test]
fn push_pop_af_masks_flag_low_nibble() {
    // LD SP, $D000; LD BC, $12FF; PUSH BC; POP AF; PUSH AF; POP DE
    let mut bus = InMemoryBus::with_program(&[
        0x31, 0x00, 0xD0, 0x01, 0xFF, 0x12, 0xC5, 0xF1, 0xF5, 0xD1,
    ]);
    let mut cpu = new_cpu();

    run(&mut cpu, &mut bus, 6);

    assert_eq!(cpu.registers.a, 0x12);
    // Only the flag bits survive the round trip
    assert_eq!(cpu.registers.de(), 0x12F0);
}

#[test]
fn daa_after_addition_and_subtraction() {
    // LD A, $45; ADD A, $38; DAA  => $83
    let mut bus = InMemoryBus::with_program(&[0x3E, 0x45, 0xC6, 0x38, 0x27]);
    let mut cpu = new_cpu();
    run(&mut cpu, &mut bus, 3);
    assert_eq!(cpu.registers.a, 0x83);
    assert!(!cpu.registers.f.carry);

    // LD A, $45; SUB A, $38; DAA  => $07
    let mut bus = InMemoryBus::with_program(&[0x3E, 0x45, 0xD6, 0x38, 0x27]);
    let mut cpu = new_cpu();
    run(&mut cpu, &mut bus, 3);
    assert_eq!(cpu.registers.a, 0x07);

    // BCD carry: $99 + $01 = $00 with carry
    let mut bus = InMemoryBus::with_program(&[0x3E, 0x99, 0xC6, 0x01, 0x27]);
    let mut cpu = new_cpu();
    run(&mut cpu, &mut bus, 3);
    assert_eq!(cpu.registers.a, 0x00);
    assert!(cpu.registers.f.carry);
    assert!(cpu.registers.f.zero);
}

#[test]
fn interrupt_dispatch_timing_and_vector() {
    // EI; NOP; then a pending VBlank interrupt
    let mut bus = InMemoryBus::with_program(&[0xFB, 0x00]);
    bus.ie_register = 0x01;
    bus.if_register = 0x01;
    let mut cpu = new_cpu();

    // EI: no dispatch yet (1-instruction delay)
    cpu.execute_instruction(&mut bus);
    assert_eq!(cpu.registers.pc, 0x0001);

    // NOP executes, then the interrupt dispatches: 1 + 5 M-cycles
    let before = bus.m_cycles;
    cpu.execute_instruction(&mut bus);
    assert_eq!(cpu.registers.pc, 0x0040);
    assert_eq!(bus.m_cycles - before, 6);
    assert!(!cpu.registers.ime);
    // The serviced IF bit is cleared
    assert_eq!(bus.if_register, 0x00);
    // Return address on the stack
    assert_eq!(bus.memory[0xFFFD], 0x00);
    assert_eq!(bus.memory[0xFFFC], 0x02);
}

#[test]
fn interrupt_priority_order() {
    // Timer (bit 2) and Joypad (bit 4) both pending: Timer wins
    let mut bus = InMemoryBus::with_program(&[0x00]);
    bus.ie_register = 0x14;
    bus.if_register = 0x14;
    let mut cpu = new_cpu();
    cpu.registers.ime = true;

    cpu.execute_instruction(&mut bus);
    assert_eq!(cpu.registers.pc, 0x0050);
    assert_eq!(bus.if_register, 0x10);
}

#[test]
fn halt_wakes_on_pending_interrupt() {
    let mut bus = InMemoryBus::with_program(&[0x76, 0x00]);
    let mut cpu = new_cpu();

    cpu.execute_instruction(&mut bus);
    assert!(cpu.state.halted);

    // Idle M-cycles while halted
    for _ in 0..10 {
        cpu.execute_instruction(&mut bus);
    }
    assert!(cpu.state.halted);

    // A latched interrupt ends HALT even with IME clear
    bus.ie_register = 0x01;
    bus.if_register = 0x01;
    cpu.execute_instruction(&mut bus);
    assert!(!cpu.state.halted);
    // IME clear: the interrupt is not dispatched
    assert_eq!(bus.if_register, 0x01);
}

#[test]
fn halt_bug_double_reads_next_opcode() {
    // HALT with IME=0 and a pending interrupt: the next fetch does not
    // advance PC, so `INC A` executes twice
    let mut bus = InMemoryBus::with_program(&[0x76, 0x3C, 0x00]);
    bus.ie_register = 0x01;
    bus.if_register = 0x01;
    let mut cpu = new_cpu();

    cpu.execute_instruction(&mut bus);
    run(&mut cpu, &mut bus, 3);

    assert_eq!(cpu.registers.a, 2);
    assert_eq!(cpu.registers.pc, 0x0002);
}

#[test]
fn unknown_opcode_is_skipped() {
    let mut bus = InMemoryBus::with_program(&[0xD3, 0x3C]);
    let mut cpu = new_cpu();

    cpu.execute_instruction(&mut bus);
    assert_eq!(cpu.registers.pc, 0x0001);
    assert_eq!(bus.m_cycles, 1);

    cpu.execute_instruction(&mut bus);
    assert_eq!(cpu.registers.a, 1);
}

#[test]
fn stop_performs_armed_speed_switch() {
    let mut bus = InMemoryBus::with_program(&[0x10, 0x00, 0x3C]);
    bus.speed_switch_armed = true;
    let mut cpu = new_cpu();

    cpu.execute_instruction(&mut bus);
    assert_eq!(bus.speed_switches, 1);
    assert!(cpu.state.halted);
    assert!(cpu.state.stop_state);

    // The CPU sleeps for $20000 T-cycles worth of M-cycles, then resumes
    // after the skipped operand byte
    for _ in 0..STOP_HALT_M_CYCLES {
        cpu.execute_instruction(&mut bus);
    }
    assert!(!cpu.state.halted);

    cpu.execute_instruction(&mut bus);
    assert_eq!(cpu.registers.a, 1);
}

#[test]
fn stop_without_arming_is_a_two_byte_nop() {
    let mut bus = InMemoryBus::with_program(&[0x10, 0x00, 0x3C]);
    let mut cpu = new_cpu();

    cpu.execute_instruction(&mut bus);
    assert!(!cpu.state.halted);
    assert_eq!(cpu.registers.pc, 0x0002);
    assert_eq!(bus.speed_switches, 0);
}

#[test]
fn cb_bit_and_swap() {
    // SWAP A after LD A, $F1; then BIT 0, A
    let mut bus = InMemoryBus::with_program(&[0x3E, 0xF1, 0xCB, 0x37, 0xCB, 0x47]);
    let mut cpu = new_cpu();

    run(&mut cpu, &mut bus, 2);
    assert_eq!(cpu.registers.a, 0x1F);

    cpu.execute_instruction(&mut bus);
    assert!(!cpu.registers.f.zero);
    assert!(cpu.registers.f.half_carry);
}

#[test]
fn indirect_hl_cb_ops_hit_memory() {
    // LD HL, $C080; LD (HL), $01; SET 7, (HL); RES 0, (HL)
    let mut bus = InMemoryBus::with_program(&[
        0x21, 0x80, 0xC0, 0x36, 0x01, 0xCB, 0xFE, 0xCB, 0x86,
    ]);
    let mut cpu = new_cpu();

    run(&mut cpu, &mut bus, 4);
    assert_eq!(bus.memory[0xC080], 0x80);
}

#[test]
fn add_sp_and_ld_hl_sp_flags() {
    // LD SP, $00FF; ADD SP, $01; LD HL, SP+$00
    let mut bus = InMemoryBus::with_program(&[0x31, 0xFF, 0x00, 0xE8, 0x01, 0xF8, 0x00]);
    let mut cpu = new_cpu();

    run(&mut cpu, &mut bus, 2);
    assert_eq!(cpu.registers.sp, 0x0100);
    assert!(cpu.registers.f.carry);
    assert!(cpu.registers.f.half_carry);
    assert!(!cpu.registers.f.zero);

    cpu.execute_instruction(&mut bus);
    assert_eq!(cpu.registers.hl(), 0x0100);
    assert!(!cpu.registers.f.carry);
}

#[test]
fn save_state_round_trips() {
    let mut bus = InMemoryBus::with_program(&[0x3E, 0x42, 0x06, 0x07, 0x76]);
    let mut cpu = new_cpu();
    run(&mut cpu, &mut bus, 3);

    let mut state = Vec::new();
    cpu.save_state(&mut state).unwrap();

    let mut restored = Sm83::new(GbSystem::Dmg, false);
    restored.load_state(&mut state.as_slice()).unwrap();

    assert_eq!(restored.registers.a, 0x42);
    assert_eq!(restored.registers.b, 0x07);
    assert_eq!(restored.registers.pc, cpu.registers.pc);
    assert!(restored.state.halted);
}
