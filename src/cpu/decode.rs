//! Top-level opcode dispatch on the line number (bits 15-12).

use super::exceptions::vectors;
use super::Cpu68000;
use crate::bus::Bus;

impl Cpu68000 {
    pub(crate) fn dispatch(&mut self, bus: &mut dyn Bus, op: u16) -> u32 {
        match op >> 12 {
            0x0 => self.op_immediate_group(bus, op),
            0x1 | 0x2 | 0x3 => self.op_move(bus, op),
            0x4 => self.op_misc(bus, op),
            0x5 => self.op_quick_group(bus, op),
            0x6 => self.op_branch(bus, op),
            0x7 => self.op_moveq(bus, op),
            0x8 => self.op_or_group(bus, op),
            0x9 => self.op_sub_group(bus, op),
            0xA => self.illegal_exception(bus, vectors::LINE_A),
            0xB => self.op_cmp_group(bus, op),
            0xC => self.op_and_group(bus, op),
            0xD => self.op_add_group(bus, op),
            0xE => self.op_shift_group(bus, op),
            _ => self.illegal_exception(bus, vectors::LINE_F),
        }
    }

    /// Unimplemented or invalid encoding.
    pub(crate) fn illegal(&mut self, bus: &mut dyn Bus) -> u32 {
        self.illegal_exception(bus, vectors::ILLEGAL)
    }
}

/// Source/destination mode field (bits 5-3).
#[inline]
pub(crate) fn ea_mode(op: u16) -> u16 {
    (op >> 3) & 7
}

/// Source/destination register field (bits 2-0).
#[inline]
pub(crate) fn ea_reg(op: u16) -> u16 {
    op & 7
}

/// Register field in bits 11-9.
#[inline]
pub(crate) fn reg_hi(op: u16) -> usize {
    ((op >> 9) & 7) as usize
}
