//! Line 6: BRA, BSR, Bcc.

use super::ea::Size;
use super::status;
use super::Cpu68000;
use crate::bus::Bus;

impl Cpu68000 {
    /// A zero 8-bit displacement means a 16-bit displacement word follows.
    /// Displacements are relative to the address after the opcode.
    pub(crate) fn op_branch(&mut self, bus: &mut dyn Bus, op: u16) -> u32 {
        let base = self.regs.pc;
        let cc = ((op >> 8) & 0x0F) as u8;
        let short = op as u8;
        let disp = if short == 0 {
            Size::Word.sign_extend(u32::from(self.fetch_word(bus)))
        } else {
            Size::Byte.sign_extend(u32::from(short))
        };
        let target = base.wrapping_add(disp);

        match cc {
            // BRA
            0 => {
                self.regs.pc = target;
                10
            }
            // BSR
            1 => {
                let ret = self.regs.pc;
                self.push_long(bus, ret);
                self.regs.pc = target;
                18
            }
            _ if status::condition(self.regs.sr, cc) => {
                self.regs.pc = target;
                10
            }
            _ if short == 0 => 12,
            _ => 8,
        }
    }
}
