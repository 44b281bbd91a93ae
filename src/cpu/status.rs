//! 68000 status register bit fields.
//!
//! The status register is a plain `u16`:
//! - Bits 0-4: condition codes C, V, Z, N, X
//! - Bits 8-10: interrupt mask
//! - Bit 13: supervisor
//! - Bits 14-15: trace (T0 is reserved on the 68000 but kept writable)

/// Carry.
pub const C: u16 = 0x0001;
/// Overflow.
pub const V: u16 = 0x0002;
/// Zero.
pub const Z: u16 = 0x0004;
/// Negative.
pub const N: u16 = 0x0008;
/// Extend.
pub const X: u16 = 0x0010;

/// Interrupt mask field.
pub const IPL_MASK: u16 = 0x0700;
/// Supervisor.
pub const S: u16 = 0x2000;
/// Trace bit T0.
pub const T0: u16 = 0x4000;
/// Trace bit T1.
pub const T1: u16 = 0x8000;
/// Both trace bits.
pub const TRACE_MASK: u16 = T0 | T1;

/// Condition code byte.
pub const CCR_MASK: u16 = 0x001F;
/// Implemented SR bits.
pub const SR_MASK: u16 = 0xE71F;

/// Interrupt mask level (0-7).
#[inline]
pub fn interrupt_mask(sr: u16) -> u8 {
    ((sr & IPL_MASK) >> 8) as u8
}

/// Replace the interrupt mask level.
#[inline]
pub fn with_interrupt_mask(sr: u16, level: u8) -> u16 {
    (sr & !IPL_MASK) | (u16::from(level & 7) << 8)
}

/// True if `flag` is set.
#[inline]
pub fn flag(sr: u16, flag: u16) -> bool {
    sr & flag != 0
}

/// Set or clear `flag`.
#[inline]
pub fn set_flag(sr: u16, flag: u16, on: bool) -> u16 {
    if on {
        sr | flag
    } else {
        sr & !flag
    }
}

/// Replace the condition codes with `ccr`.
#[inline]
pub fn with_ccr(sr: u16, ccr: u16) -> u16 {
    (sr & !CCR_MASK) | (ccr & CCR_MASK)
}

/// Evaluate condition code `cc` (0-15) against `sr`.
pub fn condition(sr: u16, cc: u8) -> bool {
    let c = flag(sr, C);
    let v = flag(sr, V);
    let z = flag(sr, Z);
    let n = flag(sr, N);
    match cc & 0x0F {
        0x0 => true,        // T
        0x1 => false,       // F
        0x2 => !c && !z,    // HI
        0x3 => c || z,      // LS
        0x4 => !c,          // CC
        0x5 => c,           // CS
        0x6 => !z,          // NE
        0x7 => z,           // EQ
        0x8 => !v,          // VC
        0x9 => v,           // VS
        0xA => !n,          // PL
        0xB => n,           // MI
        0xC => n == v,      // GE
        0xD => n != v,      // LT
        0xE => !z && n == v, // GT
        _ => z || n != v,   // LE
    }
}
