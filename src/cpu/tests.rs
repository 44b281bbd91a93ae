use std::sync::Arc;

use parking_lot::Mutex;

use super::*;
use crate::bus::{IoDevice, IoHandler, MemoryMap};

const STACK: u32 = 0x8000;
const START: u32 = 0x400;

fn write_words(bus: &mut MemoryMap, addr: u32, words: &[u16]) {
    let bytes: Vec<u8> = words.iter().flat_map(|w| w.to_be_bytes()).collect();
    bus.upload(addr, &bytes).unwrap();
}

fn set_vector(bus: &mut MemoryMap, vector: u8, handler: u32) {
    bus.upload(u32::from(vector) * 4, &handler.to_be_bytes()).unwrap();
}

/// 64 KiB machine with `program` at 0x400, reset and ready to run.
fn boot(program: &[u16]) -> (Cpu68000, MemoryMap) {
    let mut bus = MemoryMap::new(64 * 1024).unwrap();
    bus.upload(0, &STACK.to_be_bytes()).unwrap();
    bus.upload(4, &START.to_be_bytes()).unwrap();
    write_words(&mut bus, START, program);
    let mut cpu = Cpu68000::new();
    cpu.reset(&mut bus);
    (cpu, bus)
}

#[test]
fn reset_fetches_vectors() {
    let (cpu, _) = boot(&[0x4E71]);
    assert_eq!(cpu.regs.ssp, STACK);
    assert_eq!(cpu.regs.pc, START);
    assert_eq!(cpu.regs.sr, 0x2700);
    assert_eq!(cpu.total_cycles(), u64::from(RESET_CYCLES));
    assert_eq!(cpu.state(), CpuState::Running);
}

#[test]
fn moveq_then_stop() {
    // MOVEQ #42,D0 ; MOVEQ #-1,D1 ; STOP #$2700
    let (mut cpu, mut bus) = boot(&[0x702A, 0x72FF, 0x4E72, 0x2700]);
    let used = cpu.execute(&mut bus, 1_000);
    assert_eq!(used, 1_000);
    assert_eq!(cpu.regs.d[0], 42);
    assert_eq!(cpu.regs.d[1], 0xFFFF_FFFF);
    assert!(cpu.is_stopped());
    assert_eq!(cpu.pc(), START + 8);
}

#[test]
fn move_sets_condition_codes() {
    // MOVE.L #$80000000,D2 ; MOVE.L D2,D3 ; MOVEQ #0,D4
    let (mut cpu, mut bus) = boot(&[0x243C, 0x8000, 0x0000, 0x2602, 0x7800]);
    cpu.regs.sr |= status::V | status::C | status::X;

    cpu.step(&mut bus);
    assert_eq!(cpu.regs.d[2], 0x8000_0000);
    assert!(cpu.regs.sr & status::N != 0);
    assert!(cpu.regs.sr & (status::Z | status::V | status::C) == 0);
    // MOVE leaves X alone
    assert!(cpu.regs.sr & status::X != 0);

    cpu.step(&mut bus);
    assert_eq!(cpu.regs.d[3], 0x8000_0000);

    cpu.step(&mut bus);
    assert!(cpu.regs.sr & status::Z != 0);
    assert!(cpu.regs.sr & status::N == 0);
}

#[test]
fn dbra_loop_runs_count_plus_one_times() {
    // MOVEQ #4,D0 ; MOVEQ #0,D1
    // loop: ADDQ.L #1,D1 ; DBRA D0,loop ; STOP #$2700
    let (mut cpu, mut bus) = boot(&[0x7004, 0x7200, 0x5281, 0x51C8, 0xFFFC, 0x4E72, 0x2700]);
    cpu.execute(&mut bus, 2_000);
    assert!(cpu.is_stopped());
    assert_eq!(cpu.regs.d[1], 5);
    assert_eq!(cpu.regs.d[0] & 0xFFFF, 0xFFFF);
}

#[test]
fn memory_round_trip_through_address_modes() {
    // LEA $2000.W,A0 ; MOVE.L #$DEADBEEF,(A0)+ ; MOVE.L -(A0),D5 ; STOP
    let (mut cpu, mut bus) = boot(&[
        0x41F8, 0x2000, 0x20FC, 0xDEAD, 0xBEEF, 0x2A20, 0x4E72, 0x2700,
    ]);
    cpu.execute(&mut bus, 500);
    assert!(cpu.is_stopped());
    assert_eq!(bus.read_long(0x2000), 0xDEAD_BEEF);
    assert_eq!(cpu.regs.d[5], 0xDEAD_BEEF);
    assert_eq!(cpu.regs.a[0], 0x2000);
}

#[test]
fn trap_stacks_frame_and_rte_returns() {
    // TRAP #0 ; STOP          handler: MOVEQ #7,D0 ; RTE
    let (mut cpu, mut bus) = boot(&[0x4E40, 0x4E72, 0x2700]);
    set_vector(&mut bus, vectors::TRAP_BASE, 0x600);
    write_words(&mut bus, 0x600, &[0x7007, 0x4E73]);

    cpu.step(&mut bus);
    assert_eq!(cpu.pc(), 0x600);
    assert_eq!(cpu.regs.ssp, STACK - 6);
    assert_eq!(bus.read_word(STACK - 6), 0x2700);
    assert_eq!(bus.read_long(STACK - 4), START + 2);

    cpu.execute(&mut bus, 500);
    assert_eq!(cpu.regs.d[0], 7);
    assert_eq!(cpu.regs.ssp, STACK);
    assert!(cpu.is_stopped());
}

#[test]
fn illegal_and_line_a_stack_the_faulting_pc() {
    let (mut cpu, mut bus) = boot(&[0x4AFC]);
    set_vector(&mut bus, vectors::ILLEGAL, 0x600);
    cpu.step(&mut bus);
    assert_eq!(cpu.pc(), 0x600);
    assert_eq!(bus.read_long(STACK - 4), START);

    let (mut cpu, mut bus) = boot(&[0xA00F]);
    set_vector(&mut bus, vectors::LINE_A, 0x700);
    cpu.step(&mut bus);
    assert_eq!(cpu.pc(), 0x700);
    assert_eq!(bus.read_long(STACK - 4), START);

    let (mut cpu, mut bus) = boot(&[0xF200]);
    set_vector(&mut bus, vectors::LINE_F, 0x780);
    cpu.step(&mut bus);
    assert_eq!(cpu.pc(), 0x780);
}

#[test]
fn privileged_instruction_in_user_mode() {
    // MOVE #$0000,SR ; STOP #$2700
    let (mut cpu, mut bus) = boot(&[0x46FC, 0x0000, 0x4E72, 0x2700]);
    set_vector(&mut bus, vectors::PRIVILEGE, 0x600);
    cpu.regs.usp = 0x7000;

    cpu.step(&mut bus);
    assert!(!cpu.regs.is_supervisor());
    assert_eq!(cpu.regs.a(7), 0x7000);

    cpu.step(&mut bus);
    assert!(!cpu.is_stopped());
    assert_eq!(cpu.pc(), 0x600);
    assert!(cpu.regs.is_supervisor());
    // stacked PC is the STOP itself, stacked SR the user-mode SR
    assert_eq!(bus.read_long(STACK - 4), START + 4);
    assert_eq!(bus.read_word(STACK - 6), 0x0000);
    assert_eq!(cpu.regs.usp, 0x7000);
}

#[test]
fn divide_by_zero_traps_after_the_instruction() {
    // DIVU D1,D0
    let (mut cpu, mut bus) = boot(&[0x80C1]);
    set_vector(&mut bus, vectors::ZERO_DIVIDE, 0x600);
    cpu.regs.d[0] = 100;
    cpu.step(&mut bus);
    assert_eq!(cpu.pc(), 0x600);
    assert_eq!(bus.read_long(STACK - 4), START + 2);
    assert_eq!(cpu.regs.d[0], 100);
}

#[test]
fn divu_quotient_and_remainder() {
    // DIVU D1,D0
    let (mut cpu, mut bus) = boot(&[0x80C1]);
    cpu.regs.d[0] = 100;
    cpu.regs.d[1] = 7;
    cpu.step(&mut bus);
    assert_eq!(cpu.regs.d[0], (2 << 16) | 14);
}

#[test]
fn odd_word_read_raises_address_error() {
    // MOVE.W (A0),D0
    let (mut cpu, mut bus) = boot(&[0x3010]);
    set_vector(&mut bus, vectors::ADDRESS_ERROR, 0x700);
    cpu.regs.a[0] = 0x1001;

    cpu.execute(&mut bus, 20);
    assert_eq!(cpu.pc(), 0x700);
    assert_eq!(cpu.regs.ssp, STACK - 14);
    // status word: read, supervisor data access
    assert_eq!(bus.read_word(STACK - 14), 0x15);
    assert_eq!(bus.read_long(STACK - 12), 0x1001);
    assert_eq!(bus.read_word(STACK - 8), 0x3010);
    assert_eq!(bus.read_word(STACK - 6), 0x2700);
    assert_eq!(bus.read_long(STACK - 4), START + 2);
    assert_eq!(bus.stats().address_faults, 1);
}

#[test]
fn unmapped_read_raises_bus_error() {
    // MOVE.L $00100000,D0
    let (mut cpu, mut bus) = boot(&[0x2039, 0x0010, 0x0000]);
    set_vector(&mut bus, vectors::BUS_ERROR, 0x700);
    cpu.execute(&mut bus, 30);
    assert_eq!(cpu.pc(), 0x700);
    assert_eq!(bus.read_long(STACK - 12), 0x0010_0000);
    assert!(bus.stats().bus_faults >= 1);
}

#[test]
fn fault_while_stacking_halts() {
    let (mut cpu, mut bus) = boot(&[0x3010]);
    cpu.regs.a[0] = 0x1001;
    cpu.regs.ssp = 0x7FFF;
    cpu.execute(&mut bus, 100);
    assert!(cpu.is_halted());
    let cycles = cpu.total_cycles();
    assert_eq!(cpu.execute(&mut bus, 64), 64);
    assert_eq!(cpu.total_cycles(), cycles + 64);
    assert!(cpu.is_halted());
}

#[test]
fn halted_cpu_ignores_interrupts() {
    let (mut cpu, mut bus) = boot(&[0x3010]);
    set_vector(&mut bus, vectors::AUTOVECTOR_BASE + 7, 0x800);
    cpu.regs.a[0] = 0x1001;
    cpu.regs.ssp = 0x7FFF;
    cpu.execute(&mut bus, 100);
    assert!(cpu.is_halted());
    let _ = cpu.take_interrupt_ack();
    let (ssp, pc) = (cpu.regs.ssp, cpu.pc());

    cpu.set_ipl(7);
    assert_eq!(cpu.execute(&mut bus, 100), 100);
    assert!(cpu.is_halted());
    assert_eq!(cpu.take_interrupt_ack(), None);
    assert_eq!(cpu.regs.ssp, ssp);
    assert_eq!(cpu.pc(), pc);
    assert_eq!(cpu.ipl(), 7);

    cpu.reset(&mut bus);
    assert!(!cpu.is_halted());
}

#[test]
fn interrupt_respects_mask_and_wakes_stop() {
    // STOP #$2300          handler: STOP #$2700
    let (mut cpu, mut bus) = boot(&[0x4E72, 0x2300]);
    set_vector(&mut bus, vectors::AUTOVECTOR_BASE + 4, 0x800);
    write_words(&mut bus, 0x800, &[0x4E72, 0x2700]);

    cpu.set_ipl(2);
    cpu.execute(&mut bus, 100);
    assert!(cpu.is_stopped());
    assert_eq!(cpu.take_interrupt_ack(), None);

    cpu.set_ipl(4);
    cpu.execute(&mut bus, 100);
    assert_eq!(
        cpu.take_interrupt_ack(),
        Some(InterruptAck {
            level: 4,
            vector: vectors::AUTOVECTOR_BASE + 4
        })
    );
    assert_eq!(cpu.take_interrupt_ack(), None);
    assert_eq!(cpu.ipl(), 0);
    assert_eq!(bus.read_long(STACK - 4), START + 4);
    assert_eq!(bus.read_word(STACK - 6), 0x2300);
    assert_eq!(cpu.pc(), 0x804);
    assert!(cpu.is_stopped());
}

#[test]
fn level_six_uses_vector_override_and_level_seven_is_unmaskable() {
    let (mut cpu, mut bus) = boot(&[0x4E71, 0x4E71, 0x4E71, 0x4E71]);
    set_vector(&mut bus, 0x4D, 0x900);
    set_vector(&mut bus, vectors::AUTOVECTOR_BASE + 7, 0xA00);
    write_words(&mut bus, 0x900, &[0x4E71; 8]);
    write_words(&mut bus, 0xA00, &[0x4E71; 8]);
    cpu.regs.sr = 0x2000;

    cpu.set_vector_override(Some(0x4D));
    cpu.set_ipl(6);
    cpu.execute(&mut bus, 1);
    assert_eq!(cpu.take_interrupt_ack().map(|a| a.vector), Some(0x4D));
    assert_eq!(status::interrupt_mask(cpu.regs.sr), 6);

    cpu.set_ipl(7);
    cpu.execute(&mut bus, 1);
    let ack = cpu.take_interrupt_ack();
    assert_eq!(ack.map(|a| a.level), Some(7));
    assert_eq!(ack.map(|a| a.vector), Some(vectors::AUTOVECTOR_BASE + 7));
    assert!((0xA00..0xA10).contains(&cpu.pc()));
}

#[test]
fn vector_override_is_kept_for_level_six() {
    let (mut cpu, mut bus) = boot(&[0x4E71; 8]);
    set_vector(&mut bus, vectors::AUTOVECTOR_BASE + 4, 0x900);
    set_vector(&mut bus, 0x4D, 0xA00);
    write_words(&mut bus, 0x900, &[0x4E71; 8]);
    write_words(&mut bus, 0xA00, &[0x4E71; 8]);
    cpu.regs.sr = 0x2000;

    cpu.set_vector_override(Some(0x4D));
    cpu.set_ipl(4);
    cpu.execute(&mut bus, 1);
    assert_eq!(
        cpu.take_interrupt_ack().map(|a| a.vector),
        Some(vectors::AUTOVECTOR_BASE + 4)
    );

    cpu.set_ipl(6);
    cpu.execute(&mut bus, 1);
    assert_eq!(cpu.take_interrupt_ack().map(|a| a.vector), Some(0x4D));
}

#[test]
fn trace_exception_follows_each_instruction() {
    // MOVEQ #1,D0 ; MOVEQ #2,D0
    let (mut cpu, mut bus) = boot(&[0x7001, 0x7002]);
    set_vector(&mut bus, vectors::TRACE, 0x600);
    write_words(&mut bus, 0x600, &[0x4E72, 0x2700]);
    cpu.regs.sr |= status::T1;

    cpu.execute(&mut bus, 1);
    assert_eq!(cpu.regs.d[0], 1);
    assert_eq!(cpu.pc(), 0x600);
    assert_eq!(bus.read_long(STACK - 4), START + 2);
    assert!(cpu.regs.sr & status::T1 == 0);
}

struct ResetCounter(u32);

impl IoDevice for ResetCounter {
    fn reset(&mut self) {
        self.0 += 1;
    }
}

#[test]
fn reset_instruction_resets_devices_only() {
    let (mut cpu, mut bus) = boot(&[0x7005, 0x4E70, 0x4E72, 0x2700]);
    let device = Arc::new(Mutex::new(ResetCounter(0)));
    bus.register_io(IoHandler::new("counter", 0xFF_FA00, 0xFF_FA3F, device.clone()))
        .unwrap();
    cpu.execute(&mut bus, 500);
    assert_eq!(device.lock().0, 1);
    assert_eq!(cpu.regs.d[0], 5);
    assert!(cpu.is_stopped());
}

#[test]
fn state_round_trip() {
    let (mut cpu, mut bus) = boot(&[0x702A, 0x41F8, 0x1234, 0x4E72, 0x2000]);
    cpu.execute(&mut bus, 100);
    let state = cpu.save_state();
    assert_eq!(state.len(), STATE_SIZE);

    let mut other = Cpu68000::new();
    other.load_state(&state).unwrap();
    assert_eq!(other.regs, cpu.regs);
    assert_eq!(other.state(), CpuState::Stopped);
    assert_eq!(other.total_cycles(), cpu.total_cycles());

    assert!(matches!(
        other.load_state(&state[..10]),
        Err(CoreError::InvalidSize { .. })
    ));
    let mut bad = state.clone();
    bad[78] = 9;
    assert!(other.load_state(&bad).is_err());
}

#[test]
fn budget_overshoot_is_at_most_one_instruction() {
    // BRA.S * (10 cycles each)
    let (mut cpu, mut bus) = boot(&[0x60FE]);
    let used = cpu.execute(&mut bus, 25);
    assert_eq!(used, 30);
    assert_eq!(cpu.pc(), START);
}
