//! MOVE, MOVEA and MOVEQ.

use super::alu;
use super::decode::{ea_mode, ea_reg, reg_hi};
use super::ea::{ea_cycles, is_data_alterable, is_valid, Ea, Size};
use super::Cpu68000;
use crate::bus::Bus;

impl Cpu68000 {
    /// Lines 1-3. The size field here is 01 byte, 11 word, 10 long.
    pub(crate) fn op_move(&mut self, bus: &mut dyn Bus, op: u16) -> u32 {
        let size = match op >> 12 {
            1 => Size::Byte,
            3 => Size::Word,
            _ => Size::Long,
        };
        let src_mode = ea_mode(op);
        let src_reg = ea_reg(op);
        let dst_reg = reg_hi(op) as u16;
        let dst_mode = (op >> 6) & 7;

        if !is_valid(src_mode, src_reg) || (size == Size::Byte && src_mode == 1) {
            return self.illegal(bus);
        }

        if dst_mode == 1 {
            if size == Size::Byte {
                return self.illegal(bus);
            }
            let Some(value) = self.read_operand(bus, src_mode, src_reg, size) else {
                return self.illegal(bus);
            };
            self.regs.set_a(dst_reg as usize, size.sign_extend(value));
            return 4 + ea_cycles(src_mode, src_reg, size);
        }

        if !is_data_alterable(dst_mode, dst_reg) {
            return self.illegal(bus);
        }

        let Some(value) = self.read_operand(bus, src_mode, src_reg, size) else {
            return self.illegal(bus);
        };
        let Some(dst) = self.resolve_ea(bus, dst_mode, dst_reg, size) else {
            return self.illegal(bus);
        };
        self.regs.sr = alu::logic(self.regs.sr, value, size);
        self.write_ea(bus, dst, size, value);

        // A predecrement destination costs the same as (An)
        let dst_cost_mode = if dst_mode == 4 { 2 } else { dst_mode };
        4 + ea_cycles(src_mode, src_reg, size) + ea_cycles(dst_cost_mode, dst_reg, size)
    }

    /// MOVEQ #d8,Dn.
    pub(crate) fn op_moveq(&mut self, bus: &mut dyn Bus, op: u16) -> u32 {
        if op & 0x0100 != 0 {
            return self.illegal(bus);
        }
        let value = Size::Byte.sign_extend(u32::from(op));
        self.write_ea(bus, Ea::D(reg_hi(op)), Size::Long, value);
        self.regs.sr = alu::logic(self.regs.sr, value, Size::Long);
        4
    }
}
