//! Exception processing.
//!
//! Group 1/2 exceptions push a 6-byte frame (PC then SR). Bus and address
//! errors push the 14-byte group-0 frame the 68000 builds: PC, SR,
//! instruction register, access address and the access status word
//! (lowest address first: status word, address, IR, SR, PC).

use log::{debug, trace};

use super::status::{self, S, TRACE_MASK};
use super::{Cpu68000, CpuState, Size};
use crate::bus::{Bus, BusFault};
use crate::component::InterruptAck;

/// Exception vector numbers.
pub mod vectors {
    /// Bus error
    pub const BUS_ERROR: u8 = 2;
    /// Address error
    pub const ADDRESS_ERROR: u8 = 3;
    /// Illegal instruction
    pub const ILLEGAL: u8 = 4;
    /// Integer divide by zero
    pub const ZERO_DIVIDE: u8 = 5;
    /// CHK out of bounds
    pub const CHK: u8 = 6;
    /// TRAPV with V set
    pub const TRAPV: u8 = 7;
    /// Privilege violation
    pub const PRIVILEGE: u8 = 8;
    /// Trace
    pub const TRACE: u8 = 9;
    /// Line 1010 emulator
    pub const LINE_A: u8 = 10;
    /// Line 1111 emulator
    pub const LINE_F: u8 = 11;
    /// Spurious interrupt
    pub const SPURIOUS: u8 = 24;
    /// Level 1-7 autovectors start here (level `n` uses `AUTOVECTOR_BASE + n`)
    pub const AUTOVECTOR_BASE: u8 = 24;
    /// TRAP #0-#15 start here
    pub const TRAP_BASE: u8 = 32;
}

/// Cycles for bus/address error processing.
pub const GROUP0_CYCLES: u32 = 50;
/// Cycles for interrupt acknowledge and processing.
pub const INTERRUPT_CYCLES: u32 = 44;
/// Cycles for TRAP, illegal, privilege, line-A/F and trace.
pub const TRAP_CYCLES: u32 = 34;
/// Cycles for a CHK trap.
pub const CHK_CYCLES: u32 = 40;
/// Cycles for a divide-by-zero trap.
pub const ZERO_DIVIDE_CYCLES: u32 = 38;

impl Cpu68000 {
    /// Enter supervisor mode, clear trace, stack PC/SR and jump through `vector`.
    pub(crate) fn exception(&mut self, bus: &mut dyn Bus, vector: u8, return_pc: u32) -> u32 {
        trace!(
            "exception vector {} at PC 0x{:06X} (return 0x{:06X})",
            vector,
            self.instr_pc,
            return_pc
        );
        let old_sr = self.enter_supervisor();
        self.push_long(bus, return_pc);
        self.push_word(bus, old_sr);
        self.regs.pc = self.read_mem(bus, u32::from(vector) * 4, Size::Long);

        match vector {
            vectors::ZERO_DIVIDE => ZERO_DIVIDE_CYCLES,
            vectors::CHK => CHK_CYCLES,
            _ => TRAP_CYCLES,
        }
    }

    /// Illegal-class exception: the stacked PC is the faulting instruction.
    pub(crate) fn illegal_exception(&mut self, bus: &mut dyn Bus, vector: u8) -> u32 {
        debug!(
            "illegal opcode 0x{:04X} at 0x{:06X} (vector {})",
            self.opcode, self.instr_pc, vector
        );
        self.exception(bus, vector, self.instr_pc)
    }

    /// Raise a privilege violation unless in supervisor mode.
    pub(crate) fn require_supervisor(&mut self, bus: &mut dyn Bus) -> Option<u32> {
        if self.regs.is_supervisor() {
            None
        } else {
            Some(self.illegal_exception(bus, vectors::PRIVILEGE))
        }
    }

    /// Build the group-0 frame for a bus or address error.
    ///
    /// A fault raised while stacking the frame is a double fault and halts
    /// the processor.
    pub(crate) fn fault_exception(&mut self, bus: &mut dyn Bus, fault: BusFault) -> u32 {
        debug!(
            "{:?} fault at 0x{:06X} ({}) during opcode 0x{:04X} at 0x{:06X}",
            fault.kind,
            fault.address,
            if fault.write { "write" } else { "read" },
            self.opcode,
            self.instr_pc
        );

        let supervisor = self.regs.is_supervisor();
        let old_sr = self.enter_supervisor();
        let return_pc = self.regs.pc;
        let status_word = access_status(fault.write, supervisor);

        self.push_long(bus, return_pc);
        self.push_word(bus, old_sr);
        self.push_word(bus, self.opcode);
        self.push_long(bus, fault.address);
        self.push_word(bus, status_word);
        self.regs.pc = self.read_mem(bus, u32::from(fault.vector()) * 4, Size::Long);

        if bus.take_fault().is_some() {
            self.halt();
        }
        GROUP0_CYCLES
    }

    /// Acknowledge the pending interrupt.
    ///
    /// Accepting consumes the latched level; the interrupt controller
    /// re-asserts it if the source is still active.
    pub(crate) fn take_interrupt(&mut self, bus: &mut dyn Bus) -> u32 {
        let level = self.pending_ipl;
        let vector = match level {
            6 => self
                .vector_override
                .take()
                .unwrap_or(vectors::AUTOVECTOR_BASE + 6),
            _ => vectors::AUTOVECTOR_BASE + level,
        };
        self.pending_ipl = 0;
        if self.state == CpuState::Stopped {
            self.state = CpuState::Running;
        }

        let old_sr = self.enter_supervisor();
        self.regs.sr = status::with_interrupt_mask(self.regs.sr, level);
        let return_pc = self.regs.pc;
        self.push_long(bus, return_pc);
        self.push_word(bus, old_sr);
        self.regs.pc = self.read_mem(bus, u32::from(vector) * 4, Size::Long);
        self.last_ack = Some(InterruptAck { level, vector });

        trace!("interrupt level {} vector {} -> 0x{:06X}", level, vector, self.regs.pc);
        INTERRUPT_CYCLES
    }

    /// Set S, clear trace and return the SR as it was before.
    fn enter_supervisor(&mut self) -> u16 {
        let old_sr = self.regs.sr;
        self.regs.sr = (old_sr | S) & !TRACE_MASK;
        old_sr
    }
}

/// Access status word: R/W in bit 4, I/N in bit 3, function code in bits 0-2.
fn access_status(write: bool, supervisor: bool) -> u16 {
    let rw = if write { 0 } else { 0x10 };
    let fc = if supervisor { 5 } else { 1 };
    rw | fc
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_word_encodes_direction_and_mode() {
        assert_eq!(access_status(false, true), 0x15);
        assert_eq!(access_status(true, false), 0x01);
    }
}
