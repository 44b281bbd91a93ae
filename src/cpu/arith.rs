//! Lines 8, 9, B, C, D: two-operand arithmetic and logic.
//!
//! | Line | Opmode 0-2 | 3 / 7      | 4-6, mode 0/1  | 4-6 other   |
//! |------|------------|------------|----------------|-------------|
//! | 8    | OR ea,Dn   | DIVU/DIVS  | SBCD (4)       | OR Dn,ea    |
//! | 9    | SUB ea,Dn  | SUBA       | SUBX           | SUB Dn,ea   |
//! | B    | CMP ea,Dn  | CMPA       | CMPM (mode 1)  | EOR Dn,ea   |
//! | C    | AND ea,Dn  | MULU/MULS  | ABCD, EXG      | AND Dn,ea   |
//! | D    | ADD ea,Dn  | ADDA       | ADDX           | ADD Dn,ea   |

use super::alu;
use super::decode::{ea_mode, ea_reg, reg_hi};
use super::ea::{ea_cycles, is_data, is_data_alterable, is_memory_alterable, is_valid, Ea, Size};
use super::exceptions::vectors;
use super::status::{set_flag, C, N, V, Z};
use super::Cpu68000;
use crate::bus::Bus;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Logic {
    Or,
    And,
    Eor,
}

impl Logic {
    fn apply(self, a: u32, b: u32) -> u32 {
        match self {
            Logic::Or => a | b,
            Logic::And => a & b,
            Logic::Eor => a ^ b,
        }
    }
}

/// Long `<ea>,Dn` forms take two extra cycles when the source is a
/// register or immediate.
fn long_to_register_cycles(mode: u16, reg: u16) -> u32 {
    if mode <= 1 || (mode == 7 && reg == 4) {
        8
    } else {
        6
    }
}

/// Exact DIVU timing (Cwik's restoring division model).
fn divu_cycles(dividend: u32, divisor: u16) -> u32 {
    if (dividend >> 16) >= u32::from(divisor) {
        return 10;
    }
    let mut mcycles: u32 = 38;
    let hdivisor = u32::from(divisor) << 16;
    let mut dvd = dividend;
    for _ in 0..15 {
        let carry = dvd & 0x8000_0000 != 0;
        dvd <<= 1;
        if carry {
            dvd = dvd.wrapping_sub(hdivisor);
        } else {
            mcycles += 2;
            if dvd >= hdivisor {
                dvd = dvd.wrapping_sub(hdivisor);
                mcycles -= 1;
            }
        }
    }
    mcycles * 2
}

/// Exact DIVS timing.
fn divs_cycles(dividend: i32, divisor: i16) -> u32 {
    let mut mcycles: u32 = 6;
    if dividend < 0 {
        mcycles += 1;
    }
    let abs_dividend = i64::from(dividend).unsigned_abs() as u32;
    let abs_divisor = i32::from(divisor).unsigned_abs();
    if (abs_dividend >> 16) >= abs_divisor {
        return (mcycles + 2) * 2;
    }
    let mut quotient = abs_dividend / abs_divisor;
    mcycles += 55;
    if divisor >= 0 {
        if dividend >= 0 {
            mcycles -= 1;
        } else {
            mcycles += 1;
        }
    }
    for _ in 0..15 {
        if (quotient as i16) >= 0 {
            mcycles += 1;
        }
        quotient <<= 1;
    }
    mcycles * 2
}

impl Cpu68000 {
    pub(crate) fn op_or_group(&mut self, bus: &mut dyn Bus, op: u16) -> u32 {
        match ((op >> 6) & 7, ea_mode(op)) {
            (3, _) => self.op_divide(bus, op, false),
            (7, _) => self.op_divide(bus, op, true),
            (4, 0 | 1) => self.op_bcd(bus, op, true),
            _ => self.op_logical(bus, op, Logic::Or),
        }
    }

    pub(crate) fn op_and_group(&mut self, bus: &mut dyn Bus, op: u16) -> u32 {
        match ((op >> 6) & 7, ea_mode(op)) {
            (3, _) => self.op_multiply(bus, op, false),
            (7, _) => self.op_multiply(bus, op, true),
            (4, 0 | 1) => self.op_bcd(bus, op, false),
            (5, 0 | 1) | (6, 1) => self.op_exg(op),
            _ => self.op_logical(bus, op, Logic::And),
        }
    }

    pub(crate) fn op_cmp_group(&mut self, bus: &mut dyn Bus, op: u16) -> u32 {
        match ((op >> 6) & 7, ea_mode(op)) {
            (0..=2, _) => self.op_cmp(bus, op),
            (3, _) | (7, _) => self.op_cmpa(bus, op),
            (_, 1) => self.op_cmpm(bus, op),
            _ => self.op_logical(bus, op, Logic::Eor),
        }
    }

    pub(crate) fn op_add_group(&mut self, bus: &mut dyn Bus, op: u16) -> u32 {
        self.op_add_sub(bus, op, false)
    }

    pub(crate) fn op_sub_group(&mut self, bus: &mut dyn Bus, op: u16) -> u32 {
        self.op_add_sub(bus, op, true)
    }

    fn op_add_sub(&mut self, bus: &mut dyn Bus, op: u16, subtract: bool) -> u32 {
        let opmode = (op >> 6) & 7;
        let mode = ea_mode(op);
        let reg = ea_reg(op);
        let dn = reg_hi(op);

        if opmode == 3 || opmode == 7 {
            return self.op_address_arith(bus, op, subtract);
        }
        if opmode >= 4 && mode <= 1 {
            return self.op_extended(bus, op, subtract);
        }
        let Some(size) = Size::from_bits(opmode) else {
            return self.illegal(bus);
        };
        let sr = self.regs.sr;

        if opmode < 4 {
            if !is_valid(mode, reg) || (mode == 1 && size == Size::Byte) {
                return self.illegal(bus);
            }
            let Some(src) = self.read_operand(bus, mode, reg, size) else {
                return self.illegal(bus);
            };
            let dst = self.regs.d[dn] & size.mask();
            let (result, sr) = if subtract {
                alu::sub(sr, src, dst, size)
            } else {
                alu::add(sr, src, dst, size)
            };
            self.regs.sr = sr;
            self.write_ea(bus, Ea::D(dn), size, result);
            return match size {
                Size::Long => long_to_register_cycles(mode, reg) + ea_cycles(mode, reg, size),
                _ => 4 + ea_cycles(mode, reg, size),
            };
        }

        if !is_memory_alterable(mode, reg) {
            return self.illegal(bus);
        }
        let Some(ea) = self.resolve_ea(bus, mode, reg, size) else {
            return self.illegal(bus);
        };
        let dst = self.read_ea(bus, ea, size);
        let src = self.regs.d[dn] & size.mask();
        let (result, sr) = if subtract {
            alu::sub(sr, src, dst, size)
        } else {
            alu::add(sr, src, dst, size)
        };
        self.regs.sr = sr;
        self.write_ea(bus, ea, size, result);
        let base = if size == Size::Long { 12 } else { 8 };
        base + ea_cycles(mode, reg, size)
    }

    /// ADDA/SUBA: source sign-extended, whole register, no flags.
    fn op_address_arith(&mut self, bus: &mut dyn Bus, op: u16, subtract: bool) -> u32 {
        let mode = ea_mode(op);
        let reg = ea_reg(op);
        let size = if op & 0x0100 != 0 { Size::Long } else { Size::Word };
        if !is_valid(mode, reg) {
            return self.illegal(bus);
        }
        let Some(src) = self.read_operand(bus, mode, reg, size) else {
            return self.illegal(bus);
        };
        let src = size.sign_extend(src);
        let an = reg_hi(op);
        let value = self.regs.a(an);
        let value = if subtract {
            value.wrapping_sub(src)
        } else {
            value.wrapping_add(src)
        };
        self.regs.set_a(an, value);
        match size {
            Size::Long => long_to_register_cycles(mode, reg) + ea_cycles(mode, reg, size),
            _ => 8 + ea_cycles(mode, reg, size),
        }
    }

    /// ADDX/SUBX: Dy,Dx or -(Ay),-(Ax).
    fn op_extended(&mut self, bus: &mut dyn Bus, op: u16, subtract: bool) -> u32 {
        let Some(size) = Size::from_bits(op >> 6) else {
            return self.illegal(bus);
        };
        let memory = op & 0x0008 != 0;
        let (src_ea, dst_ea) = match self.extended_operands(bus, op, size) {
            Some(pair) => pair,
            None => return self.illegal(bus),
        };
        let src = self.read_ea(bus, src_ea, size);
        let dst = self.read_ea(bus, dst_ea, size);
        let (result, sr) = if subtract {
            alu::subx(self.regs.sr, src, dst, size)
        } else {
            alu::addx(self.regs.sr, src, dst, size)
        };
        self.regs.sr = sr;
        self.write_ea(bus, dst_ea, size, result);
        match (memory, size) {
            (false, Size::Long) => 8,
            (false, _) => 4,
            (true, Size::Long) => 30,
            (true, _) => 18,
        }
    }

    /// ABCD/SBCD: same operand forms as ADDX, byte only.
    fn op_bcd(&mut self, bus: &mut dyn Bus, op: u16, subtract: bool) -> u32 {
        let memory = op & 0x0008 != 0;
        let (src_ea, dst_ea) = match self.extended_operands(bus, op, Size::Byte) {
            Some(pair) => pair,
            None => return self.illegal(bus),
        };
        let src = self.read_ea(bus, src_ea, Size::Byte) as u8;
        let dst = self.read_ea(bus, dst_ea, Size::Byte) as u8;
        let (result, sr) = if subtract {
            alu::sbcd(self.regs.sr, src, dst)
        } else {
            alu::abcd(self.regs.sr, src, dst)
        };
        self.regs.sr = sr;
        self.write_ea(bus, dst_ea, Size::Byte, u32::from(result));
        if memory {
            18
        } else {
            6
        }
    }

    /// Source (bits 2-0) and destination (bits 11-9) of the X-forms.
    fn extended_operands(&mut self, bus: &mut dyn Bus, op: u16, size: Size) -> Option<(Ea, Ea)> {
        let mode = if op & 0x0008 != 0 { 4 } else { 0 };
        let src = self.resolve_ea(bus, mode, ea_reg(op), size)?;
        let dst = self.resolve_ea(bus, mode, reg_hi(op) as u16, size)?;
        Some((src, dst))
    }

    fn op_logical(&mut self, bus: &mut dyn Bus, op: u16, kind: Logic) -> u32 {
        let opmode = (op >> 6) & 7;
        let mode = ea_mode(op);
        let reg = ea_reg(op);
        let dn = reg_hi(op);
        let Some(size) = Size::from_bits(opmode) else {
            return self.illegal(bus);
        };

        if opmode < 4 {
            if kind == Logic::Eor || !is_data(mode, reg) {
                return self.illegal(bus);
            }
            let Some(src) = self.read_operand(bus, mode, reg, size) else {
                return self.illegal(bus);
            };
            let result = kind.apply(src, self.regs.d[dn]) & size.mask();
            self.regs.sr = alu::logic(self.regs.sr, result, size);
            self.write_ea(bus, Ea::D(dn), size, result);
            return match size {
                Size::Long => long_to_register_cycles(mode, reg) + ea_cycles(mode, reg, size),
                _ => 4 + ea_cycles(mode, reg, size),
            };
        }

        let allowed = match kind {
            Logic::Eor => is_data_alterable(mode, reg),
            _ => is_memory_alterable(mode, reg),
        };
        if !allowed {
            return self.illegal(bus);
        }
        let Some(ea) = self.resolve_ea(bus, mode, reg, size) else {
            return self.illegal(bus);
        };
        let dst = self.read_ea(bus, ea, size);
        let result = kind.apply(self.regs.d[dn], dst) & size.mask();
        self.regs.sr = alu::logic(self.regs.sr, result, size);
        self.write_ea(bus, ea, size, result);
        match (mode, size) {
            (0, Size::Long) => 8,
            (0, _) => 4,
            (_, Size::Long) => 12 + ea_cycles(mode, reg, size),
            _ => 8 + ea_cycles(mode, reg, size),
        }
    }

    fn op_cmp(&mut self, bus: &mut dyn Bus, op: u16) -> u32 {
        let mode = ea_mode(op);
        let reg = ea_reg(op);
        let Some(size) = Size::from_bits(op >> 6) else {
            return self.illegal(bus);
        };
        if !is_valid(mode, reg) || (mode == 1 && size == Size::Byte) {
            return self.illegal(bus);
        }
        let Some(src) = self.read_operand(bus, mode, reg, size) else {
            return self.illegal(bus);
        };
        let dst = self.regs.d[reg_hi(op)] & size.mask();
        self.regs.sr = alu::cmp(self.regs.sr, src, dst, size);
        let base = if size == Size::Long { 6 } else { 4 };
        base + ea_cycles(mode, reg, size)
    }

    /// CMPA: word sources are sign-extended and compared as longs.
    fn op_cmpa(&mut self, bus: &mut dyn Bus, op: u16) -> u32 {
        let mode = ea_mode(op);
        let reg = ea_reg(op);
        let size = if op & 0x0100 != 0 { Size::Long } else { Size::Word };
        if !is_valid(mode, reg) {
            return self.illegal(bus);
        }
        let Some(src) = self.read_operand(bus, mode, reg, size) else {
            return self.illegal(bus);
        };
        let dst = self.regs.a(reg_hi(op));
        self.regs.sr = alu::cmp(self.regs.sr, size.sign_extend(src), dst, Size::Long);
        6 + ea_cycles(mode, reg, size)
    }

    /// CMPM (Ay)+,(Ax)+.
    fn op_cmpm(&mut self, bus: &mut dyn Bus, op: u16) -> u32 {
        let Some(size) = Size::from_bits(op >> 6) else {
            return self.illegal(bus);
        };
        let (Some(src_ea), Some(dst_ea)) = (
            self.resolve_ea(bus, 3, ea_reg(op), size),
            self.resolve_ea(bus, 3, reg_hi(op) as u16, size),
        ) else {
            return self.illegal(bus);
        };
        let src = self.read_ea(bus, src_ea, size);
        let dst = self.read_ea(bus, dst_ea, size);
        self.regs.sr = alu::cmp(self.regs.sr, src, dst, size);
        if size == Size::Long {
            20
        } else {
            12
        }
    }

    fn op_exg(&mut self, op: u16) -> u32 {
        let rx = reg_hi(op);
        let ry = ea_reg(op) as usize;
        match (op >> 3) & 0x1F {
            // Dx,Dy
            0x08 => self.regs.d.swap(rx, ry),
            // Ax,Ay
            0x09 => {
                let (x, y) = (self.regs.a(rx), self.regs.a(ry));
                self.regs.set_a(rx, y);
                self.regs.set_a(ry, x);
            }
            // Dx,Ay
            _ => {
                let (x, y) = (self.regs.d[rx], self.regs.a(ry));
                self.regs.d[rx] = y;
                self.regs.set_a(ry, x);
            }
        }
        6
    }

    /// MULU/MULS: 16x16 -> 32.
    fn op_multiply(&mut self, bus: &mut dyn Bus, op: u16, signed: bool) -> u32 {
        let mode = ea_mode(op);
        let reg = ea_reg(op);
        if !is_data(mode, reg) {
            return self.illegal(bus);
        }
        let Some(src) = self.read_operand(bus, mode, reg, Size::Word) else {
            return self.illegal(bus);
        };
        let dn = reg_hi(op);
        let src = src as u16;
        let dst = self.regs.d[dn] as u16;

        let (result, bit_cost) = if signed {
            let product = i32::from(src as i16) * i32::from(dst as i16);
            let pattern = (u32::from(src) << 1) ^ u32::from(src);
            (product as u32, (pattern & 0xFFFF).count_ones())
        } else {
            (u32::from(src) * u32::from(dst), src.count_ones())
        };
        self.regs.d[dn] = result;
        self.regs.sr = alu::logic(self.regs.sr, result, Size::Long);
        38 + 2 * bit_cost + ea_cycles(mode, reg, Size::Word)
    }

    /// DIVU/DIVS: 32/16 -> 16r:16q. Overflow sets V and leaves Dn intact.
    fn op_divide(&mut self, bus: &mut dyn Bus, op: u16, signed: bool) -> u32 {
        let mode = ea_mode(op);
        let reg = ea_reg(op);
        if !is_data(mode, reg) {
            return self.illegal(bus);
        }
        let Some(src) = self.read_operand(bus, mode, reg, Size::Word) else {
            return self.illegal(bus);
        };
        let ea_cost = ea_cycles(mode, reg, Size::Word);
        let divisor = src as u16;
        if divisor == 0 {
            self.regs.sr &= !C;
            return self.exception(bus, vectors::ZERO_DIVIDE, self.regs.pc) + ea_cost;
        }

        let dn = reg_hi(op);
        let dividend = self.regs.d[dn];
        let (outcome, cycles) = if signed {
            let num = i64::from(dividend as i32);
            let den = i64::from(divisor as i16);
            let quotient = num / den;
            let remainder = num % den;
            let fits = i16::try_from(quotient).is_ok();
            let cycles = divs_cycles(dividend as i32, divisor as i16);
            (fits.then_some((quotient as u16, remainder as u16)), cycles)
        } else {
            let quotient = dividend / u32::from(divisor);
            let remainder = dividend % u32::from(divisor);
            let fits = quotient <= 0xFFFF;
            let cycles = divu_cycles(dividend, divisor);
            (fits.then_some((quotient as u16, remainder as u16)), cycles)
        };

        let mut sr = self.regs.sr & !C;
        match outcome {
            Some((quotient, remainder)) => {
                self.regs.d[dn] = (u32::from(remainder) << 16) | u32::from(quotient);
                sr = set_flag(sr, N, quotient & 0x8000 != 0);
                sr = set_flag(sr, Z, quotient == 0);
                sr &= !V;
            }
            None => sr |= V,
        }
        self.regs.sr = sr;
        cycles + ea_cost
    }
}
