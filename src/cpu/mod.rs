//! Motorola 68000 instruction engine.
//!
//! Instruction-granular emulation: each call to [`Cpu68000::step`] fetches,
//! decodes and executes one instruction and returns its cycle cost. The
//! register file, cycle counter and interrupt latch live in the
//! [`Cpu68000`] value; all memory traffic goes through a borrowed
//! [`Bus`], so several machines can coexist in one process.
//!
//! Before every instruction [`Cpu68000::execute`] services, in order:
//! 1. a fault latched by the bus during the previous instruction
//! 2. an interrupt whose level exceeds the mask (level 7 is never masked)
//! 3. the instruction itself
//! 4. the trace exception if T1 was set when the instruction started

mod alu;
mod arith;
mod branch;
mod decode;
mod ea;
mod exceptions;
mod immediate;
mod misc;
mod moves;
mod quick;
mod registers;
mod shifts;
pub mod status;
#[cfg(feature = "cpu-trace")]
mod trace;

pub use ea::Size;
pub use exceptions::vectors;
pub use registers::Registers;
#[cfg(feature = "cpu-trace")]
pub use trace::{TraceEntry, TraceRing};

use log::error;

use crate::bus::Bus;
use crate::component::{Component, CpuComponent, InterruptAck, InterruptLine};
use crate::error::{CoreError, Result};

/// Cycles consumed by the reset sequence.
pub const RESET_CYCLES: u32 = 40;

/// Size of a serialized CPU state.
pub const STATE_SIZE: usize = 19 * 4 + 2 + 1 + 1 + 8;

/// Execution state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CpuState {
    /// Fetching and executing instructions
    Running,
    /// STOP executed; waiting for an interrupt above the mask
    Stopped,
    /// Double bus fault; only a reset recovers
    Halted,
}

/// MC68000 CPU core.
pub struct Cpu68000 {
    /// Register file
    pub regs: Registers,
    state: CpuState,
    /// Interrupt level presented on the IPL lines
    pending_ipl: u8,
    /// Vector supplied by an external interrupt controller for level 6
    vector_override: Option<u8>,
    last_ack: Option<InterruptAck>,
    cycles: u64,
    /// Opcode of the instruction being executed
    opcode: u16,
    /// Address of the instruction being executed
    instr_pc: u32,
    #[cfg(feature = "cpu-trace")]
    trace: Option<TraceRing>,
}

impl Default for Cpu68000 {
    fn default() -> Self {
        Self::new()
    }
}

impl Cpu68000 {
    /// Create a CPU in the pre-reset state.
    pub fn new() -> Self {
        Self {
            regs: Registers::new(),
            state: CpuState::Running,
            pending_ipl: 0,
            vector_override: None,
            last_ack: None,
            cycles: 0,
            opcode: 0,
            instr_pc: 0,
            #[cfg(feature = "cpu-trace")]
            trace: None,
        }
    }

    /// Hardware reset: load SSP from address 0 and PC from address 4,
    /// enter supervisor mode with all interrupts masked.
    pub fn reset(&mut self, bus: &mut dyn Bus) {
        self.regs = Registers::new();
        self.state = CpuState::Running;
        self.pending_ipl = 0;
        self.vector_override = None;
        self.last_ack = None;
        self.regs.ssp = bus.read_long(0);
        self.regs.pc = bus.read_long(4);
        self.cycles += u64::from(RESET_CYCLES);
    }

    /// Run until at least `cycles` have elapsed; returns the cycles consumed.
    ///
    /// The budget may be overshot by up to one instruction or exception.
    /// A stopped or halted CPU consumes the whole budget.
    pub fn execute(&mut self, bus: &mut dyn Bus, cycles: u32) -> u32 {
        let start = self.cycles;
        let target = start + u64::from(cycles);

        while self.cycles < target {
            // only reset leaves the halted state
            if self.state == CpuState::Halted {
                self.cycles = target;
                break;
            }

            if let Some(fault) = bus.take_fault() {
                let c = self.fault_exception(bus, fault);
                self.cycles += u64::from(c);
                continue;
            }

            if self.interrupt_pending() {
                let c = self.take_interrupt(bus);
                self.cycles += u64::from(c);
                continue;
            }

            if self.state != CpuState::Running {
                self.cycles = target;
                break;
            }

            let tracing = self.regs.sr & status::T1 != 0;
            let c = self.step(bus);
            self.cycles += u64::from(c);

            if tracing && self.state == CpuState::Running {
                let c = match bus.take_fault() {
                    Some(fault) => self.fault_exception(bus, fault),
                    None => self.exception(bus, vectors::TRACE, self.regs.pc),
                };
                self.cycles += u64::from(c);
            }
        }

        (self.cycles - start) as u32
    }

    /// Fetch, decode and execute a single instruction.
    pub fn step(&mut self, bus: &mut dyn Bus) -> u32 {
        self.instr_pc = self.regs.pc;
        let op = self.fetch_word(bus);
        if let Some(fault) = bus.take_fault() {
            return self.fault_exception(bus, fault);
        }
        self.opcode = op;

        #[cfg(feature = "cpu-trace")]
        if let Some(ring) = self.trace.as_mut() {
            ring.record(self.instr_pc, op, &self.regs);
        }

        self.dispatch(bus, op)
    }

    /// Latch the interrupt level presented by the interrupt controller.
    pub fn set_ipl(&mut self, level: u8) {
        self.pending_ipl = level & 7;
    }

    /// Interrupt level currently latched.
    pub fn ipl(&self) -> u8 {
        self.pending_ipl
    }

    /// Vector to use for the next level-6 interrupt instead of the autovector.
    pub fn set_vector_override(&mut self, vector: Option<u8>) {
        self.vector_override = vector;
    }

    /// Most recently delivered interrupt, consumed on read.
    pub fn take_interrupt_ack(&mut self) -> Option<InterruptAck> {
        self.last_ack.take()
    }

    /// Execution state.
    pub fn state(&self) -> CpuState {
        self.state
    }

    /// True while waiting in STOP.
    pub fn is_stopped(&self) -> bool {
        self.state == CpuState::Stopped
    }

    /// True after a double bus fault.
    pub fn is_halted(&self) -> bool {
        self.state == CpuState::Halted
    }

    /// Cycles executed since creation.
    pub fn total_cycles(&self) -> u64 {
        self.cycles
    }

    /// Program counter.
    pub fn pc(&self) -> u32 {
        self.regs.pc
    }

    /// Enable the execution trace ring for PCs inside `range`.
    #[cfg(feature = "cpu-trace")]
    pub fn enable_trace(&mut self, range: std::ops::Range<u32>, capacity: usize) {
        self.trace = Some(TraceRing::new(range, capacity));
    }

    /// Trace ring contents, oldest first.
    #[cfg(feature = "cpu-trace")]
    pub fn trace(&self) -> Option<&TraceRing> {
        self.trace.as_ref()
    }

    fn interrupt_pending(&self) -> bool {
        self.pending_ipl == 7 || self.pending_ipl > self.regs.interrupt_mask()
    }

    // ------------------------------------------------------------------
    // Memory helpers
    // ------------------------------------------------------------------

    /// Fetch the next instruction word and advance PC.
    pub(crate) fn fetch_word(&mut self, bus: &mut dyn Bus) -> u16 {
        let pc = self.regs.pc;
        self.regs.pc = pc.wrapping_add(2);
        if pc & 1 != 0 {
            bus.address_error(pc, false);
            return 0;
        }
        bus.read_word(pc)
    }

    /// Fetch a long extension and advance PC.
    pub(crate) fn fetch_long(&mut self, bus: &mut dyn Bus) -> u32 {
        let hi = u32::from(self.fetch_word(bus));
        let lo = u32::from(self.fetch_word(bus));
        (hi << 16) | lo
    }

    /// Read memory; odd word/long addresses raise an address error.
    pub(crate) fn read_mem(&mut self, bus: &mut dyn Bus, addr: u32, size: Size) -> u32 {
        match size {
            Size::Byte => u32::from(bus.read_byte(addr)),
            _ if addr & 1 != 0 => {
                bus.address_error(addr, false);
                0
            }
            Size::Word => u32::from(bus.read_word(addr)),
            Size::Long => bus.read_long(addr),
        }
    }

    /// Write memory; odd word/long addresses raise an address error.
    pub(crate) fn write_mem(&mut self, bus: &mut dyn Bus, addr: u32, size: Size, value: u32) {
        match size {
            Size::Byte => bus.write_byte(addr, value as u8),
            _ if addr & 1 != 0 => bus.address_error(addr, true),
            Size::Word => bus.write_word(addr, value as u16),
            Size::Long => bus.write_long(addr, value),
        }
    }

    pub(crate) fn push_word(&mut self, bus: &mut dyn Bus, value: u16) {
        let sp = self.regs.sp().wrapping_sub(2);
        self.regs.set_sp(sp);
        self.write_mem(bus, sp, Size::Word, u32::from(value));
    }

    pub(crate) fn push_long(&mut self, bus: &mut dyn Bus, value: u32) {
        let sp = self.regs.sp().wrapping_sub(4);
        self.regs.set_sp(sp);
        self.write_mem(bus, sp, Size::Long, value);
    }

    pub(crate) fn pop_word(&mut self, bus: &mut dyn Bus) -> u16 {
        let sp = self.regs.sp();
        self.regs.set_sp(sp.wrapping_add(2));
        self.read_mem(bus, sp, Size::Word) as u16
    }

    pub(crate) fn pop_long(&mut self, bus: &mut dyn Bus) -> u32 {
        let sp = self.regs.sp();
        self.regs.set_sp(sp.wrapping_add(4));
        self.read_mem(bus, sp, Size::Long)
    }

    /// Replace SR. Leaving supervisor mode switches A7 to the USP.
    pub(crate) fn set_sr(&mut self, value: u16) {
        self.regs.sr = value & status::SR_MASK;
    }

    pub(crate) fn halt(&mut self) {
        error!(
            "68000 halted: double fault at PC 0x{:06X} (opcode 0x{:04X})",
            self.instr_pc, self.opcode
        );
        self.state = CpuState::Halted;
    }

    pub(crate) fn stop(&mut self) {
        self.state = CpuState::Stopped;
    }

    // ------------------------------------------------------------------
    // State save/restore
    // ------------------------------------------------------------------

    /// Serialize registers, execution state and cycle counter.
    pub fn save_state(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(STATE_SIZE);
        for d in self.regs.d {
            out.extend_from_slice(&d.to_be_bytes());
        }
        for a in self.regs.a {
            out.extend_from_slice(&a.to_be_bytes());
        }
        for v in [self.regs.usp, self.regs.ssp, self.regs.pc] {
            out.extend_from_slice(&v.to_be_bytes());
        }
        out.extend_from_slice(&self.regs.sr.to_be_bytes());
        out.push(match self.state {
            CpuState::Running => 0,
            CpuState::Stopped => 1,
            CpuState::Halted => 2,
        });
        out.push(self.pending_ipl);
        out.extend_from_slice(&self.cycles.to_be_bytes());
        out
    }

    /// Restore a state produced by [`Cpu68000::save_state`].
    pub fn load_state(&mut self, state: &[u8]) -> Result<()> {
        if state.len() != STATE_SIZE {
            return Err(CoreError::InvalidSize {
                what: "CPU state",
                expected: STATE_SIZE,
                actual: state.len(),
            });
        }
        let long = |i: usize| {
            u32::from_be_bytes([state[i * 4], state[i * 4 + 1], state[i * 4 + 2], state[i * 4 + 3]])
        };
        let mut regs = Registers::new();
        for (i, d) in regs.d.iter_mut().enumerate() {
            *d = long(i);
        }
        for (i, a) in regs.a.iter_mut().enumerate() {
            *a = long(8 + i);
        }
        regs.usp = long(15);
        regs.ssp = long(16);
        regs.pc = long(17);
        regs.sr = u16::from_be_bytes([state[76], state[77]]);
        let run_state = match state[78] {
            0 => CpuState::Running,
            1 => CpuState::Stopped,
            2 => CpuState::Halted,
            other => {
                return Err(CoreError::InvalidArgument(format!(
                    "CPU state: unknown execution state {other}"
                )))
            }
        };
        let mut cycles = [0u8; 8];
        cycles.copy_from_slice(&state[80..88]);

        self.regs = regs;
        self.state = run_state;
        self.pending_ipl = state[79] & 7;
        self.cycles = u64::from_be_bytes(cycles);
        self.vector_override = None;
        self.last_ack = None;
        Ok(())
    }
}

impl InterruptLine for Cpu68000 {
    fn set_ipl(&mut self, level: u8) {
        Cpu68000::set_ipl(self, level);
    }

    fn set_vector_override(&mut self, vector: Option<u8>) {
        Cpu68000::set_vector_override(self, vector);
    }
}

impl Component for Cpu68000 {
    fn name(&self) -> &str {
        "mc68000"
    }

    fn reset(&mut self) {
        self.regs = Registers::new();
        self.state = CpuState::Running;
        self.pending_ipl = 0;
        self.vector_override = None;
        self.last_ack = None;
    }

    fn save_state(&self) -> Vec<u8> {
        Cpu68000::save_state(self)
    }

    fn load_state(&mut self, state: &[u8]) -> Result<()> {
        Cpu68000::load_state(self, state)
    }
}

impl CpuComponent for Cpu68000 {
    fn reset_cpu(&mut self, bus: &mut dyn Bus) {
        Cpu68000::reset(self, bus);
    }

    fn execute(&mut self, bus: &mut dyn Bus, cycles: u32) -> u32 {
        Cpu68000::execute(self, bus, cycles)
    }

    fn total_cycles(&self) -> u64 {
        self.cycles
    }

    fn pc(&self) -> u32 {
        self.regs.pc
    }

    fn is_stopped(&self) -> bool {
        self.state != CpuState::Running
    }

    fn take_interrupt_ack(&mut self) -> Option<InterruptAck> {
        Cpu68000::take_interrupt_ack(self)
    }

    fn as_interrupt_line(&mut self) -> &mut dyn InterruptLine {
        self
    }
}

#[cfg(test)]
mod tests;
