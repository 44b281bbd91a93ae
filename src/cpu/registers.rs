//! 68000 register file.

use super::status::{self, S};

/// Data, address and control registers.
///
/// A7 is not stored directly: it resolves to `usp` or `ssp` depending on the
/// supervisor bit, so switching modes never needs an explicit swap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Registers {
    /// D0-D7
    pub d: [u32; 8],
    /// A0-A6
    pub a: [u32; 7],
    /// User stack pointer
    pub usp: u32,
    /// Supervisor stack pointer
    pub ssp: u32,
    /// Program counter
    pub pc: u32,
    /// Status register
    pub sr: u16,
}

impl Default for Registers {
    fn default() -> Self {
        Self::new()
    }
}

impl Registers {
    /// Registers in reset state: supervisor mode, interrupts masked.
    pub const fn new() -> Self {
        Self {
            d: [0; 8],
            a: [0; 7],
            usp: 0,
            ssp: 0,
            pc: 0,
            sr: 0x2700,
        }
    }

    /// Address register `n` (A7 is the active stack pointer).
    #[inline]
    pub fn a(&self, n: usize) -> u32 {
        if n < 7 {
            self.a[n]
        } else {
            self.sp()
        }
    }

    /// Set address register `n`.
    #[inline]
    pub fn set_a(&mut self, n: usize, value: u32) {
        if n < 7 {
            self.a[n] = value;
        } else {
            self.set_sp(value);
        }
    }

    /// Active stack pointer.
    #[inline]
    pub fn sp(&self) -> u32 {
        if self.is_supervisor() {
            self.ssp
        } else {
            self.usp
        }
    }

    /// Set the active stack pointer.
    #[inline]
    pub fn set_sp(&mut self, value: u32) {
        if self.is_supervisor() {
            self.ssp = value;
        } else {
            self.usp = value;
        }
    }

    /// Supervisor bit.
    #[inline]
    pub fn is_supervisor(&self) -> bool {
        self.sr & S != 0
    }

    /// Current interrupt mask level.
    #[inline]
    pub fn interrupt_mask(&self) -> u8 {
        status::interrupt_mask(self.sr)
    }

    /// Condition code byte.
    #[inline]
    pub fn ccr(&self) -> u8 {
        (self.sr & status::CCR_MASK) as u8
    }

    /// Test a status flag.
    #[inline]
    pub fn flag(&self, flag: u16) -> bool {
        self.sr & flag != 0
    }

    /// Set or clear a status flag.
    #[inline]
    pub fn set_flag(&mut self, flag: u16, on: bool) {
        self.sr = status::set_flag(self.sr, flag, on);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn a7_follows_supervisor_bit() {
        let mut regs = Registers::new();
        regs.ssp = 0x8000;
        regs.usp = 0x4000;
        assert_eq!(regs.a(7), 0x8000);
        regs.sr &= !S;
        assert_eq!(regs.a(7), 0x4000);
        regs.set_a(7, 0x3FFC);
        assert_eq!(regs.usp, 0x3FFC);
        assert_eq!(regs.ssp, 0x8000);
    }
}
