//! Line 5: ADDQ, SUBQ, Scc, DBcc.

use super::alu;
use super::decode::{ea_mode, ea_reg};
use super::ea::{ea_cycles, is_data_alterable, is_valid, Ea, Size};
use super::status;
use super::Cpu68000;
use crate::bus::Bus;

impl Cpu68000 {
    pub(crate) fn op_quick_group(&mut self, bus: &mut dyn Bus, op: u16) -> u32 {
        let mode = ea_mode(op);
        let reg = ea_reg(op);
        let Some(size) = Size::from_bits(op >> 6) else {
            let cc = ((op >> 8) & 0x0F) as u8;
            return if mode == 1 {
                self.op_dbcc(bus, cc, reg as usize)
            } else {
                self.op_scc(bus, cc, mode, reg)
            };
        };

        let data = match (op >> 9) & 7 {
            0 => 8,
            n => u32::from(n),
        };
        let subtract = op & 0x0100 != 0;

        if mode == 1 {
            // Address register: whole register, flags untouched
            if size == Size::Byte {
                return self.illegal(bus);
            }
            let r = reg as usize;
            let value = self.regs.a(r);
            let value = if subtract {
                value.wrapping_sub(data)
            } else {
                value.wrapping_add(data)
            };
            self.regs.set_a(r, value);
            return 8;
        }

        if !is_data_alterable(mode, reg) {
            return self.illegal(bus);
        }
        let Some(ea) = self.resolve_ea(bus, mode, reg, size) else {
            return self.illegal(bus);
        };
        let dst = self.read_ea(bus, ea, size);
        let (result, sr) = if subtract {
            alu::sub(self.regs.sr, data, dst, size)
        } else {
            alu::add(self.regs.sr, data, dst, size)
        };
        self.regs.sr = sr;
        self.write_ea(bus, ea, size, result);

        match (mode, size) {
            (0, Size::Long) => 8,
            (0, _) => 4,
            (_, Size::Long) => 12 + ea_cycles(mode, reg, size),
            _ => 8 + ea_cycles(mode, reg, size),
        }
    }

    /// DBcc Dn,<label>: exit when the condition holds, otherwise decrement
    /// the low word and loop until it reaches -1.
    fn op_dbcc(&mut self, bus: &mut dyn Bus, cc: u8, r: usize) -> u32 {
        let base = self.regs.pc;
        let disp = Size::Word.sign_extend(u32::from(self.fetch_word(bus)));
        if status::condition(self.regs.sr, cc) {
            return 12;
        }
        let counter = (self.regs.d[r] as u16).wrapping_sub(1);
        self.write_ea(bus, Ea::D(r), Size::Word, u32::from(counter));
        if counter == 0xFFFF {
            14
        } else {
            self.regs.pc = base.wrapping_add(disp);
            10
        }
    }

    /// Scc <ea>: 0xFF if the condition holds, else 0x00.
    fn op_scc(&mut self, bus: &mut dyn Bus, cc: u8, mode: u16, reg: u16) -> u32 {
        if !is_valid(mode, reg) || !is_data_alterable(mode, reg) {
            return self.illegal(bus);
        }
        let Some(ea) = self.resolve_ea(bus, mode, reg, Size::Byte) else {
            return self.illegal(bus);
        };
        let set = status::condition(self.regs.sr, cc);
        self.write_ea(bus, ea, Size::Byte, if set { 0xFF } else { 0 });
        match (mode, set) {
            (0, true) => 6,
            (0, false) => 4,
            _ => 8 + ea_cycles(mode, reg, Size::Byte),
        }
    }
}
