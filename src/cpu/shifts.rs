//! Line E: shifts and rotates.

use super::decode::{ea_mode, ea_reg, reg_hi};
use super::ea::{ea_cycles, is_memory_alterable, Ea, Size};
use super::status::{set_flag, C, N, V, X, Z};
use super::Cpu68000;
use crate::bus::Bus;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ShiftKind {
    Arithmetic,
    Logical,
    RotateExtend,
    Rotate,
}

impl ShiftKind {
    fn from_bits(bits: u16) -> Self {
        match bits & 3 {
            0 => ShiftKind::Arithmetic,
            1 => ShiftKind::Logical,
            2 => ShiftKind::RotateExtend,
            _ => ShiftKind::Rotate,
        }
    }
}

/// Shift `value` by `count` one bit at a time and return `(result, sr)`.
///
/// A zero count clears C (ROXL/ROXR copy X into C instead) and leaves X alone.
fn shift(sr: u16, kind: ShiftKind, left: bool, value: u32, count: u32, size: Size) -> (u32, u16) {
    let msb = size.msb();
    let mask = size.mask();
    let mut value = value & mask;
    let mut x = sr & X != 0;
    let mut carry = false;
    let mut overflow = false;

    for _ in 0..count {
        if left {
            let out = value & msb != 0;
            let fill = match kind {
                ShiftKind::Rotate => out,
                ShiftKind::RotateExtend => x,
                _ => false,
            };
            value = ((value << 1) | u32::from(fill)) & mask;
            if kind == ShiftKind::Arithmetic && (value & msb != 0) != out {
                overflow = true;
            }
            carry = out;
        } else {
            let out = value & 1 != 0;
            let fill = match kind {
                ShiftKind::Arithmetic => value & msb != 0,
                ShiftKind::Rotate => out,
                ShiftKind::RotateExtend => x,
                ShiftKind::Logical => false,
            };
            value = (value >> 1) | if fill { msb } else { 0 };
            carry = out;
        }
        if kind != ShiftKind::Rotate {
            x = carry;
        }
    }

    let mut sr = set_flag(sr, N, value & msb != 0);
    sr = set_flag(sr, Z, value == 0);
    sr = set_flag(sr, V, overflow);
    if count == 0 {
        sr = set_flag(sr, C, kind == ShiftKind::RotateExtend && x);
    } else {
        sr = set_flag(sr, C, carry);
        if kind != ShiftKind::Rotate {
            sr = set_flag(sr, X, x);
        }
    }
    // ROXL/ROXR: C mirrors X after the last step
    if kind == ShiftKind::RotateExtend {
        sr = set_flag(sr, C, x);
    }
    (value, sr)
}

impl Cpu68000 {
    pub(crate) fn op_shift_group(&mut self, bus: &mut dyn Bus, op: u16) -> u32 {
        let left = op & 0x0100 != 0;

        let Some(size) = Size::from_bits(op >> 6) else {
            // Memory form: word, shift by one
            let mode = ea_mode(op);
            let reg = ea_reg(op);
            if op & 0x0800 != 0 || !is_memory_alterable(mode, reg) {
                return self.illegal(bus);
            }
            let kind = ShiftKind::from_bits(op >> 9);
            let Some(ea) = self.resolve_ea(bus, mode, reg, Size::Word) else {
                return self.illegal(bus);
            };
            let value = self.read_ea(bus, ea, Size::Word);
            let (result, sr) = shift(self.regs.sr, kind, left, value, 1, Size::Word);
            self.regs.sr = sr;
            self.write_ea(bus, ea, Size::Word, result);
            return 8 + ea_cycles(mode, reg, Size::Word);
        };

        let kind = ShiftKind::from_bits(op >> 3);
        let dn = ea_reg(op) as usize;
        let count = if op & 0x0020 != 0 {
            self.regs.d[reg_hi(op)] & 63
        } else {
            match reg_hi(op) {
                0 => 8,
                n => n as u32,
            }
        };
        let (result, sr) = shift(self.regs.sr, kind, left, self.regs.d[dn], count, size);
        self.regs.sr = sr;
        self.write_ea(bus, Ea::D(dn), size, result);

        let base = if size == Size::Long { 8 } else { 6 };
        base + 2 * count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn asl_detects_sign_change() {
        let (res, sr) = shift(0, ShiftKind::Arithmetic, true, 0x40, 1, Size::Byte);
        assert_eq!(res, 0x80);
        assert!(sr & V != 0);
        assert!(sr & C == 0);
    }

    #[test]
    fn asr_keeps_sign() {
        let (res, sr) = shift(0, ShiftKind::Arithmetic, false, 0x8001, 1, Size::Word);
        assert_eq!(res, 0xC000);
        assert!(sr & (C | X) == C | X);
        assert!(sr & N != 0);
    }

    #[test]
    fn rotate_leaves_extend() {
        let (res, sr) = shift(X, ShiftKind::Rotate, true, 0x8000_0000, 1, Size::Long);
        assert_eq!(res, 1);
        assert!(sr & C != 0);
        assert!(sr & X != 0);
        let (_, sr) = shift(0, ShiftKind::Rotate, true, 0x8000_0000, 1, Size::Long);
        assert!(sr & X == 0);
    }

    #[test]
    fn roxr_through_extend() {
        let (res, sr) = shift(X, ShiftKind::RotateExtend, false, 0x00, 1, Size::Byte);
        assert_eq!(res, 0x80);
        assert!(sr & (X | C) == 0);
    }

    #[test]
    fn zero_count_clears_carry() {
        let (res, sr) = shift(C | X, ShiftKind::Logical, true, 0x12, 0, Size::Byte);
        assert_eq!(res, 0x12);
        assert!(sr & C == 0);
        assert!(sr & X != 0);
    }
}
