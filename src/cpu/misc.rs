//! Line 4: miscellaneous instructions (control flow, SR access, single
//! operand arithmetic, MOVEM, LEA/PEA, CHK).

use super::alu;
use super::decode::{ea_mode, ea_reg, reg_hi};
use super::ea::{ea_cycles, is_control, is_data, is_data_alterable, Ea, Size};
use super::exceptions::vectors;
use super::status::{self, N, V};
use super::Cpu68000;
use crate::bus::Bus;

const JMP_CYCLES: [u32; 7] = [8, 10, 14, 10, 12, 10, 14];
const JSR_CYCLES: [u32; 7] = [16, 18, 22, 18, 20, 18, 22];
const LEA_CYCLES: [u32; 7] = [4, 8, 12, 8, 12, 8, 12];
const PEA_CYCLES: [u32; 7] = [12, 16, 20, 16, 20, 16, 20];
const MOVEM_CYCLES: [u32; 7] = [0, 4, 6, 4, 8, 4, 6];

/// Row into the control-mode timing tables.
fn control_index(mode: u16, reg: u16) -> usize {
    match (mode, reg) {
        (2, _) => 0,
        (5, _) => 1,
        (6, _) => 2,
        (7, 0) => 3,
        (7, 1) => 4,
        (7, 2) => 5,
        _ => 6,
    }
}

impl Cpu68000 {
    pub(crate) fn op_misc(&mut self, bus: &mut dyn Bus, op: u16) -> u32 {
        match op {
            0x4AFC => return self.illegal(bus),
            0x4E70 => return self.op_reset(bus),
            0x4E71 => return 4,
            0x4E72 => return self.op_stop(bus),
            0x4E73 => return self.op_rte(bus),
            0x4E75 => {
                self.regs.pc = self.pop_long(bus);
                return 16;
            }
            0x4E76 => {
                return if self.regs.flag(V) {
                    self.exception(bus, vectors::TRAPV, self.regs.pc)
                } else {
                    4
                };
            }
            0x4E77 => {
                let ccr = self.pop_word(bus);
                self.regs.pc = self.pop_long(bus);
                self.regs.sr = status::with_ccr(self.regs.sr, ccr);
                return 20;
            }
            _ => {}
        }

        let mode = ea_mode(op);
        let reg = ea_reg(op);

        match op & 0xFFF0 {
            0x4E40 => {
                let vector = vectors::TRAP_BASE + (op & 0x0F) as u8;
                return self.exception(bus, vector, self.regs.pc);
            }
            0x4E50 if op & 8 == 0 => return self.op_link(bus, reg as usize),
            0x4E50 => return self.op_unlk(bus, reg as usize),
            0x4E60 => return self.op_move_usp(bus, op),
            _ => {}
        }

        match op & 0xFFC0 {
            0x4E80 => return self.op_jump(bus, mode, reg, true),
            0x4EC0 => return self.op_jump(bus, mode, reg, false),
            0x40C0 => return self.op_move_from_sr(bus, mode, reg),
            0x44C0 => return self.op_move_to_sr(bus, mode, reg, false),
            0x46C0 => return self.op_move_to_sr(bus, mode, reg, true),
            0x4800 => return self.op_nbcd(bus, mode, reg),
            0x4840 if mode == 0 => {
                let r = reg as usize;
                self.regs.d[r] = self.regs.d[r].rotate_left(16);
                self.regs.sr = alu::logic(self.regs.sr, self.regs.d[r], Size::Long);
                return 4;
            }
            0x4840 => return self.op_pea(bus, mode, reg),
            0x4880 if mode == 0 => {
                let r = reg as usize;
                let value = Size::Byte.sign_extend(self.regs.d[r]);
                self.write_ea(bus, Ea::D(r), Size::Word, value);
                self.regs.sr = alu::logic(self.regs.sr, value, Size::Word);
                return 4;
            }
            0x48C0 if mode == 0 => {
                let r = reg as usize;
                self.regs.d[r] = Size::Word.sign_extend(self.regs.d[r]);
                self.regs.sr = alu::logic(self.regs.sr, self.regs.d[r], Size::Long);
                return 4;
            }
            0x4880 | 0x48C0 => return self.op_movem(bus, op, true),
            0x4C80 | 0x4CC0 => return self.op_movem(bus, op, false),
            0x4AC0 => return self.op_tas(bus, mode, reg),
            _ => {}
        }

        match op & 0xF1C0 {
            0x41C0 => return self.op_lea(bus, op, mode, reg),
            0x4180 => return self.op_chk(bus, op, mode, reg),
            _ => {}
        }

        match op & 0xFF00 {
            0x4000 | 0x4200 | 0x4400 | 0x4600 | 0x4A00 => self.op_single_operand(bus, op),
            _ => self.illegal(bus),
        }
    }

    fn op_reset(&mut self, bus: &mut dyn Bus) -> u32 {
        if let Some(cycles) = self.require_supervisor(bus) {
            return cycles;
        }
        bus.reset_devices();
        132
    }

    fn op_stop(&mut self, bus: &mut dyn Bus) -> u32 {
        if let Some(cycles) = self.require_supervisor(bus) {
            return cycles;
        }
        let sr = self.fetch_word(bus);
        self.set_sr(sr);
        self.stop();
        4
    }

    fn op_rte(&mut self, bus: &mut dyn Bus) -> u32 {
        if let Some(cycles) = self.require_supervisor(bus) {
            return cycles;
        }
        // Both values come off the supervisor stack before SR can drop S
        let sp = self.regs.ssp;
        let sr = self.read_mem(bus, sp, Size::Word) as u16;
        self.regs.pc = self.read_mem(bus, sp.wrapping_add(2), Size::Long);
        self.regs.ssp = sp.wrapping_add(6);
        self.set_sr(sr);
        20
    }

    fn op_link(&mut self, bus: &mut dyn Bus, r: usize) -> u32 {
        let disp = Size::Word.sign_extend(u32::from(self.fetch_word(bus)));
        let value = self.regs.a(r);
        self.push_long(bus, value);
        let sp = self.regs.sp();
        self.regs.set_a(r, sp);
        self.regs.set_sp(sp.wrapping_add(disp));
        16
    }

    fn op_unlk(&mut self, bus: &mut dyn Bus, r: usize) -> u32 {
        let frame = self.regs.a(r);
        self.regs.set_sp(frame);
        let value = self.pop_long(bus);
        self.regs.set_a(r, value);
        12
    }

    fn op_move_usp(&mut self, bus: &mut dyn Bus, op: u16) -> u32 {
        if let Some(cycles) = self.require_supervisor(bus) {
            return cycles;
        }
        let r = ea_reg(op) as usize;
        if op & 8 == 0 {
            self.regs.usp = self.regs.a(r);
        } else {
            let usp = self.regs.usp;
            self.regs.set_a(r, usp);
        }
        4
    }

    fn op_jump(&mut self, bus: &mut dyn Bus, mode: u16, reg: u16, subroutine: bool) -> u32 {
        let Some(target) = self.control_address(bus, mode, reg) else {
            return self.illegal(bus);
        };
        let row = control_index(mode, reg);
        if subroutine {
            let ret = self.regs.pc;
            self.push_long(bus, ret);
            self.regs.pc = target;
            JSR_CYCLES[row]
        } else {
            self.regs.pc = target;
            JMP_CYCLES[row]
        }
    }

    fn op_lea(&mut self, bus: &mut dyn Bus, op: u16, mode: u16, reg: u16) -> u32 {
        let Some(addr) = self.control_address(bus, mode, reg) else {
            return self.illegal(bus);
        };
        self.regs.set_a(reg_hi(op), addr);
        LEA_CYCLES[control_index(mode, reg)]
    }

    fn op_pea(&mut self, bus: &mut dyn Bus, mode: u16, reg: u16) -> u32 {
        let Some(addr) = self.control_address(bus, mode, reg) else {
            return self.illegal(bus);
        };
        self.push_long(bus, addr);
        PEA_CYCLES[control_index(mode, reg)]
    }

    fn op_move_from_sr(&mut self, bus: &mut dyn Bus, mode: u16, reg: u16) -> u32 {
        if !is_data_alterable(mode, reg) {
            return self.illegal(bus);
        }
        let Some(ea) = self.resolve_ea(bus, mode, reg, Size::Word) else {
            return self.illegal(bus);
        };
        let sr = u32::from(self.regs.sr);
        self.write_ea(bus, ea, Size::Word, sr);
        if mode == 0 {
            6
        } else {
            8 + ea_cycles(mode, reg, Size::Word)
        }
    }

    fn op_move_to_sr(&mut self, bus: &mut dyn Bus, mode: u16, reg: u16, whole: bool) -> u32 {
        if whole {
            if let Some(cycles) = self.require_supervisor(bus) {
                return cycles;
            }
        }
        if !is_data(mode, reg) {
            return self.illegal(bus);
        }
        let Some(value) = self.read_operand(bus, mode, reg, Size::Word) else {
            return self.illegal(bus);
        };
        if whole {
            self.set_sr(value as u16);
        } else {
            self.regs.sr = status::with_ccr(self.regs.sr, value as u16);
        }
        12 + ea_cycles(mode, reg, Size::Word)
    }

    fn op_nbcd(&mut self, bus: &mut dyn Bus, mode: u16, reg: u16) -> u32 {
        if !is_data_alterable(mode, reg) {
            return self.illegal(bus);
        }
        let Some(ea) = self.resolve_ea(bus, mode, reg, Size::Byte) else {
            return self.illegal(bus);
        };
        let dst = self.read_ea(bus, ea, Size::Byte) as u8;
        let (result, sr) = alu::sbcd(self.regs.sr, dst, 0);
        self.regs.sr = sr;
        self.write_ea(bus, ea, Size::Byte, u32::from(result));
        if mode == 0 {
            6
        } else {
            8 + ea_cycles(mode, reg, Size::Byte)
        }
    }

    fn op_tas(&mut self, bus: &mut dyn Bus, mode: u16, reg: u16) -> u32 {
        if !is_data_alterable(mode, reg) {
            return self.illegal(bus);
        }
        let Some(ea) = self.resolve_ea(bus, mode, reg, Size::Byte) else {
            return self.illegal(bus);
        };
        let value = self.read_ea(bus, ea, Size::Byte);
        self.regs.sr = alu::logic(self.regs.sr, value, Size::Byte);
        self.write_ea(bus, ea, Size::Byte, value | 0x80);
        if mode == 0 {
            4
        } else {
            10 + ea_cycles(mode, reg, Size::Byte)
        }
    }

    /// CHK.W <ea>,Dn: trap if Dn < 0 or Dn > bound.
    fn op_chk(&mut self, bus: &mut dyn Bus, op: u16, mode: u16, reg: u16) -> u32 {
        if !is_data(mode, reg) {
            return self.illegal(bus);
        }
        let Some(bound) = self.read_operand(bus, mode, reg, Size::Word) else {
            return self.illegal(bus);
        };
        let ea_cost = ea_cycles(mode, reg, Size::Word);
        let value = self.regs.d[reg_hi(op)] as u16 as i16;
        let bound = bound as u16 as i16;
        if value < 0 {
            self.regs.set_flag(N, true);
        } else if value > bound {
            self.regs.set_flag(N, false);
        } else {
            return 10 + ea_cost;
        }
        self.exception(bus, vectors::CHK, self.regs.pc) + ea_cost
    }

    /// NEGX, CLR, NEG, NOT, TST.
    fn op_single_operand(&mut self, bus: &mut dyn Bus, op: u16) -> u32 {
        let mode = ea_mode(op);
        let reg = ea_reg(op);
        let Some(size) = Size::from_bits(op >> 6) else {
            return self.illegal(bus);
        };
        if !is_data_alterable(mode, reg) {
            return self.illegal(bus);
        }
        let Some(ea) = self.resolve_ea(bus, mode, reg, size) else {
            return self.illegal(bus);
        };
        let dst = self.read_ea(bus, ea, size);
        let sr = self.regs.sr;

        let kind = (op >> 9) & 7;
        if kind == 5 {
            self.regs.sr = alu::logic(sr, dst, size);
            return 4 + ea_cycles(mode, reg, size);
        }

        let (result, sr) = match kind {
            0 => alu::subx(sr, dst, 0, size),
            1 => (0, alu::logic(sr, 0, size)),
            2 => alu::sub(sr, dst, 0, size),
            _ => (!dst, alu::logic(sr, !dst, size)),
        };
        self.regs.sr = sr;
        self.write_ea(bus, ea, size, result);

        match (mode, size) {
            (0, Size::Long) => 6,
            (0, _) => 4,
            (_, Size::Long) => 12 + ea_cycles(mode, reg, size),
            _ => 8 + ea_cycles(mode, reg, size),
        }
    }

    /// MOVEM register list transfer. Word loads are sign-extended to 32 bits.
    fn op_movem(&mut self, bus: &mut dyn Bus, op: u16, to_memory: bool) -> u32 {
        let size = if op & 0x40 != 0 { Size::Long } else { Size::Word };
        let mode = ea_mode(op);
        let reg = ea_reg(op);
        let mask = self.fetch_word(bus);
        let per_reg = if size == Size::Long { 8 } else { 4 };
        let transfer = mask.count_ones() * per_reg;
        let r = reg as usize;

        if to_memory {
            if mode == 4 {
                // Predecrement uses a reversed mask: bit 0 is A7, bit 15 is D0
                let mut addr = self.regs.a(r);
                for i in 0..16 {
                    if mask & (1 << i) != 0 {
                        let value = self.reg_by_index(15 - i);
                        addr = addr.wrapping_sub(size.bytes());
                        self.write_mem(bus, addr, size, value);
                    }
                }
                self.regs.set_a(r, addr);
                return 8 + transfer;
            }
            if !is_control(mode, reg) || (mode == 7 && reg >= 2) {
                return self.illegal(bus);
            }
            let Some(mut addr) = self.control_address(bus, mode, reg) else {
                return self.illegal(bus);
            };
            for i in 0..16 {
                if mask & (1 << i) != 0 {
                    let value = self.reg_by_index(i);
                    self.write_mem(bus, addr, size, value);
                    addr = addr.wrapping_add(size.bytes());
                }
            }
            return 8 + MOVEM_CYCLES[control_index(mode, reg)] + transfer;
        }

        let (mut addr, extra) = if mode == 3 {
            (self.regs.a(r), 0)
        } else if is_control(mode, reg) {
            match self.control_address(bus, mode, reg) {
                Some(addr) => (addr, MOVEM_CYCLES[control_index(mode, reg)]),
                None => return self.illegal(bus),
            }
        } else {
            return self.illegal(bus);
        };
        for i in 0..16 {
            if mask & (1 << i) != 0 {
                let value = self.read_mem(bus, addr, size);
                self.set_reg_by_index(i, size.sign_extend(value));
                addr = addr.wrapping_add(size.bytes());
            }
        }
        if mode == 3 {
            self.regs.set_a(r, addr);
        }
        12 + extra + transfer
    }

    /// D0-D7 then A0-A7.
    fn reg_by_index(&self, index: usize) -> u32 {
        if index < 8 {
            self.regs.d[index]
        } else {
            self.regs.a(index - 8)
        }
    }

    fn set_reg_by_index(&mut self, index: usize, value: u32) {
        if index < 8 {
            self.regs.d[index] = value;
        } else {
            self.regs.set_a(index - 8, value);
        }
    }
}
