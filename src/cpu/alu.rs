//! Arithmetic and logic with condition-code computation.
//!
//! Carry and overflow are derived from the sign bits of source, destination
//! and result, exactly as the 68000 programmer's reference describes them.
//! Every function takes the current SR and returns the updated one.

use super::ea::Size;
use super::status::{set_flag, C, N, V, X, Z};

#[inline]
fn nz(sr: u16, result: u32, size: Size) -> u16 {
    let sr = set_flag(sr, Z, result & size.mask() == 0);
    set_flag(sr, N, size.is_negative(result))
}

/// N/Z from `result`, V and C cleared (MOVE, AND, OR, EOR, NOT, TST, ...).
#[inline]
pub fn logic(sr: u16, result: u32, size: Size) -> u16 {
    nz(sr, result, size) & !(V | C)
}

/// `dst + src` with X/N/Z/V/C.
pub fn add(sr: u16, src: u32, dst: u32, size: Size) -> (u32, u16) {
    let res = dst.wrapping_add(src) & size.mask();
    let msb = size.msb();
    let carry = ((src & dst) | (!res & dst) | (src & !res)) & msb != 0;
    let overflow = ((src & dst & !res) | (!src & !dst & res)) & msb != 0;
    let mut sr = nz(sr, res, size);
    sr = set_flag(sr, V, overflow);
    sr = set_flag(sr, C, carry);
    sr = set_flag(sr, X, carry);
    (res, sr)
}

/// `dst + src + X`. Z is only cleared, never set, so multi-precision chains work.
pub fn addx(sr: u16, src: u32, dst: u32, size: Size) -> (u32, u16) {
    let x = u32::from(sr & X != 0);
    let res = dst.wrapping_add(src).wrapping_add(x) & size.mask();
    let msb = size.msb();
    let carry = ((src & dst) | (!res & dst) | (src & !res)) & msb != 0;
    let overflow = ((src & dst & !res) | (!src & !dst & res)) & msb != 0;
    let mut sr = set_flag(sr, N, size.is_negative(res));
    if res != 0 {
        sr &= !Z;
    }
    sr = set_flag(sr, V, overflow);
    sr = set_flag(sr, C, carry);
    sr = set_flag(sr, X, carry);
    (res, sr)
}

/// `dst - src` with X/N/Z/V/C.
pub fn sub(sr: u16, src: u32, dst: u32, size: Size) -> (u32, u16) {
    let (res, sr) = sub_nzvc(sr, src, dst, size);
    (res, set_flag(sr, X, sr & C != 0))
}

/// `dst - src - X`. Z is only cleared, never set.
pub fn subx(sr: u16, src: u32, dst: u32, size: Size) -> (u32, u16) {
    let x = u32::from(sr & X != 0);
    let res = dst.wrapping_sub(src).wrapping_sub(x) & size.mask();
    let msb = size.msb();
    let borrow = ((src & !dst) | (res & !dst) | (src & res)) & msb != 0;
    let overflow = ((!src & dst & !res) | (src & !dst & res)) & msb != 0;
    let mut sr = set_flag(sr, N, size.is_negative(res));
    if res != 0 {
        sr &= !Z;
    }
    sr = set_flag(sr, V, overflow);
    sr = set_flag(sr, C, borrow);
    sr = set_flag(sr, X, borrow);
    (res, sr)
}

/// `dst - src` setting N/Z/V/C only (CMP family; X untouched).
pub fn cmp(sr: u16, src: u32, dst: u32, size: Size) -> u16 {
    sub_nzvc(sr, src, dst, size).1
}

fn sub_nzvc(sr: u16, src: u32, dst: u32, size: Size) -> (u32, u16) {
    let res = dst.wrapping_sub(src) & size.mask();
    let msb = size.msb();
    let borrow = ((src & !dst) | (res & !dst) | (src & res)) & msb != 0;
    let overflow = ((!src & dst & !res) | (src & !dst & res)) & msb != 0;
    let mut sr = nz(sr, res, size);
    sr = set_flag(sr, V, overflow);
    sr = set_flag(sr, C, borrow);
    (res, sr)
}

/// Packed BCD `dst + src + X`.
pub fn abcd(sr: u16, src: u8, dst: u8) -> (u8, u16) {
    let x = u16::from(sr & X != 0);
    let mut lo = u16::from(src & 0x0F) + u16::from(dst & 0x0F) + x;
    let mut hi = u16::from(src >> 4) + u16::from(dst >> 4);
    if lo > 9 {
        lo -= 10;
        hi += 1;
    }
    let carry = hi > 9;
    if carry {
        hi -= 10;
    }
    let res = (((hi << 4) | lo) & 0xFF) as u8;
    (res, bcd_flags(sr, res, carry))
}

/// Packed BCD `dst - src - X`.
pub fn sbcd(sr: u16, src: u8, dst: u8) -> (u8, u16) {
    let x = i16::from(sr & X != 0);
    let mut lo = i16::from(dst & 0x0F) - i16::from(src & 0x0F) - x;
    let mut hi = i16::from(dst >> 4) - i16::from(src >> 4);
    if lo < 0 {
        lo += 10;
        hi -= 1;
    }
    let borrow = hi < 0;
    if borrow {
        hi += 10;
    }
    let res = ((((hi as u16) << 4) | (lo as u16)) & 0xFF) as u8;
    (res, bcd_flags(sr, res, borrow))
}

fn bcd_flags(sr: u16, res: u8, carry: bool) -> u16 {
    let mut sr = set_flag(sr, C, carry);
    sr = set_flag(sr, X, carry);
    if res != 0 {
        sr &= !Z;
    }
    set_flag(sr, N, res & 0x80 != 0)
}
