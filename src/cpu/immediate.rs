//! Line 0: immediate arithmetic, bit manipulation and MOVEP.

use super::alu;
use super::decode::{ea_mode, ea_reg, reg_hi};
use super::ea::{ea_cycles, is_data_alterable, is_valid, Size};
use super::status::{set_flag, CCR_MASK, Z};
use super::Cpu68000;
use crate::bus::Bus;

impl Cpu68000 {
    pub(crate) fn op_immediate_group(&mut self, bus: &mut dyn Bus, op: u16) -> u32 {
        if op & 0x0100 != 0 {
            if ea_mode(op) == 1 {
                return self.op_movep(bus, op);
            }
            let bit = self.regs.d[reg_hi(op)];
            return self.op_bit(bus, op, bit, 0);
        }

        match (op >> 9) & 7 {
            4 => {
                let bit = u32::from(self.fetch_word(bus) & 0xFF);
                self.op_bit(bus, op, bit, 4)
            }
            7 => self.illegal(bus),
            kind => self.op_alu_immediate(bus, op, kind),
        }
    }

    /// BTST/BCHG/BCLR/BSET. Register operands use the bit number modulo 32,
    /// memory operands modulo 8.
    fn op_bit(&mut self, bus: &mut dyn Bus, op: u16, bit: u32, extra: u32) -> u32 {
        let mode = ea_mode(op);
        let reg = ea_reg(op);
        let kind = (op >> 6) & 3;
        if mode == 1 || !is_valid(mode, reg) || (kind != 0 && !is_data_alterable(mode, reg)) {
            return self.illegal(bus);
        }

        if mode == 0 {
            let r = reg as usize;
            let mask = 1u32 << (bit & 31);
            let set = self.regs.d[r] & mask != 0;
            self.regs.sr = set_flag(self.regs.sr, Z, !set);
            match kind {
                1 => self.regs.d[r] ^= mask,
                2 => self.regs.d[r] &= !mask,
                3 => self.regs.d[r] |= mask,
                _ => {}
            }
            let base = match kind {
                0 => 6,
                1 | 3 => 8,
                _ => 10,
            };
            return base + extra;
        }

        let Some(ea) = self.resolve_ea(bus, mode, reg, Size::Byte) else {
            return self.illegal(bus);
        };
        let value = self.read_ea(bus, ea, Size::Byte);
        let mask = 1u32 << (bit & 7);
        self.regs.sr = set_flag(self.regs.sr, Z, value & mask == 0);
        let result = match kind {
            1 => Some(value ^ mask),
            2 => Some(value & !mask),
            3 => Some(value | mask),
            _ => None,
        };
        if let Some(result) = result {
            self.write_ea(bus, ea, Size::Byte, result);
        }
        let base = if kind == 0 { 4 } else { 8 };
        base + extra + ea_cycles(mode, reg, Size::Byte)
    }

    /// ORI, ANDI, SUBI, ADDI, EORI, CMPI (and the CCR/SR forms).
    fn op_alu_immediate(&mut self, bus: &mut dyn Bus, op: u16, kind: u16) -> u32 {
        let mode = ea_mode(op);
        let reg = ea_reg(op);

        if mode == 7 && reg == 4 {
            return match (kind, (op >> 6) & 3) {
                (0 | 1 | 5, 0) => self.op_immediate_to_sr(bus, kind, false),
                (0 | 1 | 5, 1) => self.op_immediate_to_sr(bus, kind, true),
                _ => self.illegal(bus),
            };
        }

        let Some(size) = Size::from_bits(op >> 6) else {
            return self.illegal(bus);
        };
        if !is_data_alterable(mode, reg) {
            return self.illegal(bus);
        }

        let imm = match size {
            Size::Byte => u32::from(self.fetch_word(bus) & 0xFF),
            Size::Word => u32::from(self.fetch_word(bus)),
            Size::Long => self.fetch_long(bus),
        };
        let Some(ea) = self.resolve_ea(bus, mode, reg, size) else {
            return self.illegal(bus);
        };
        let dst = self.read_ea(bus, ea, size);
        let sr = self.regs.sr;

        let (result, sr) = match kind {
            0 => (dst | imm, alu::logic(sr, dst | imm, size)),
            1 => (dst & imm, alu::logic(sr, dst & imm, size)),
            2 => alu::sub(sr, imm, dst, size),
            3 => alu::add(sr, imm, dst, size),
            5 => (dst ^ imm, alu::logic(sr, dst ^ imm, size)),
            _ => (dst, alu::cmp(sr, imm, dst, size)),
        };
        self.regs.sr = sr;
        let compare = kind == 6;
        if !compare {
            self.write_ea(bus, ea, size, result);
        }

        if mode == 0 {
            match (compare, size) {
                (true, Size::Long) => 14,
                (false, Size::Long) => 16,
                _ => 8,
            }
        } else {
            let base = match (compare, size) {
                (true, Size::Long) => 12,
                (true, _) => 8,
                (false, Size::Long) => 20,
                (false, _) => 12,
            };
            base + ea_cycles(mode, reg, size)
        }
    }

    /// ORI/ANDI/EORI to CCR (byte) or SR (word, privileged).
    fn op_immediate_to_sr(&mut self, bus: &mut dyn Bus, kind: u16, word: bool) -> u32 {
        if word {
            if let Some(cycles) = self.require_supervisor(bus) {
                return cycles;
            }
        }
        let imm = self.fetch_word(bus);
        let mask = if word { 0xFFFF } else { CCR_MASK };
        let sr = self.regs.sr;
        let value = match kind {
            0 => sr | (imm & mask),
            1 => sr & (imm | !mask),
            _ => sr ^ (imm & mask),
        };
        self.set_sr(value);
        20
    }

    /// MOVEP: transfer a word or long to/from alternate bytes of memory.
    fn op_movep(&mut self, bus: &mut dyn Bus, op: u16) -> u32 {
        let dreg = reg_hi(op);
        let areg = ea_reg(op) as usize;
        let disp = Size::Word.sign_extend(u32::from(self.fetch_word(bus)));
        let addr = self.regs.a(areg).wrapping_add(disp);

        let (count, to_memory) = match (op >> 6) & 3 {
            0 => (2, false),
            1 => (4, false),
            2 => (2, true),
            _ => (4, true),
        };

        if to_memory {
            let value = self.regs.d[dreg];
            for i in 0..count {
                let byte = value >> (8 * (count - 1 - i));
                self.write_mem(bus, addr.wrapping_add(2 * i), Size::Byte, byte);
            }
        } else {
            let mut value = 0u32;
            for i in 0..count {
                let byte = self.read_mem(bus, addr.wrapping_add(2 * i), Size::Byte);
                value = (value << 8) | byte;
            }
            if count == 2 {
                self.regs.d[dreg] = (self.regs.d[dreg] & 0xFFFF_0000) | value;
            } else {
                self.regs.d[dreg] = value;
            }
        }

        if count == 2 {
            16
        } else {
            24
        }
    }
}
