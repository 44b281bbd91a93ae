//! Operand sizes and effective-address resolution.
//!
//! Mode/register encoding (bits 5-3 / 2-0 of the opcode):
//!
//! | Mode | Reg | Syntax        | Surcharge B/W | Surcharge L |
//! |------|-----|---------------|---------------|-------------|
//! | 000  | n   | Dn            | 0             | 0           |
//! | 001  | n   | An            | 0             | 0           |
//! | 010  | n   | (An)          | 4             | 8           |
//! | 011  | n   | (An)+         | 4             | 8           |
//! | 100  | n   | -(An)         | 6             | 10          |
//! | 101  | n   | d16(An)       | 8             | 12          |
//! | 110  | n   | d8(An,Xn)     | 10            | 14          |
//! | 111  | 000 | abs.W         | 8             | 12          |
//! | 111  | 001 | abs.L         | 12            | 16          |
//! | 111  | 010 | d16(PC)       | 8             | 12          |
//! | 111  | 011 | d8(PC,Xn)     | 10            | 14          |
//! | 111  | 100 | #imm          | 4             | 8           |

use super::Cpu68000;
use crate::bus::Bus;

/// Operand size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Size {
    /// 8 bits
    Byte,
    /// 16 bits
    Word,
    /// 32 bits
    Long,
}

impl Size {
    /// Standard size field (bits 7-6): 00 byte, 01 word, 10 long.
    pub fn from_bits(bits: u16) -> Option<Self> {
        match bits & 3 {
            0 => Some(Size::Byte),
            1 => Some(Size::Word),
            2 => Some(Size::Long),
            _ => None,
        }
    }

    /// Operand width in bytes.
    #[inline]
    pub fn bytes(self) -> u32 {
        match self {
            Size::Byte => 1,
            Size::Word => 2,
            Size::Long => 4,
        }
    }

    /// Value mask.
    #[inline]
    pub fn mask(self) -> u32 {
        match self {
            Size::Byte => 0xFF,
            Size::Word => 0xFFFF,
            Size::Long => 0xFFFF_FFFF,
        }
    }

    /// Sign bit.
    #[inline]
    pub fn msb(self) -> u32 {
        match self {
            Size::Byte => 0x80,
            Size::Word => 0x8000,
            Size::Long => 0x8000_0000,
        }
    }

    /// Width in bits.
    #[inline]
    pub fn bits(self) -> u32 {
        self.bytes() * 8
    }

    /// Sign-extend the low bits of `value` to 32 bits.
    #[inline]
    pub fn sign_extend(self, value: u32) -> u32 {
        match self {
            Size::Byte => value as u8 as i8 as i32 as u32,
            Size::Word => value as u16 as i16 as i32 as u32,
            Size::Long => value,
        }
    }

    /// True if the sign bit of `value` is set.
    #[inline]
    pub fn is_negative(self, value: u32) -> bool {
        value & self.msb() != 0
    }
}

/// A resolved operand location.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ea {
    /// Data register
    D(usize),
    /// Address register
    A(usize),
    /// Memory at a 24-bit address
    Mem(u32),
    /// Immediate value (already fetched)
    Imm(u32),
}

/// Mode field value for the "special" modes (abs, PC-relative, immediate).
pub const MODE_SPECIAL: u16 = 7;

/// Fixed cycle surcharge for an addressing mode.
pub fn ea_cycles(mode: u16, reg: u16, size: Size) -> u32 {
    let long = size == Size::Long;
    let (bw, l) = match (mode, reg) {
        (0, _) | (1, _) => (0, 0),
        (2, _) | (3, _) => (4, 8),
        (4, _) => (6, 10),
        (5, _) => (8, 12),
        (6, _) => (10, 14),
        (7, 0) => (8, 12),
        (7, 1) => (12, 16),
        (7, 2) => (8, 12),
        (7, 3) => (10, 14),
        (7, 4) => (4, 8),
        _ => (0, 0),
    };
    if long {
        l
    } else {
        bw
    }
}

/// Mode is a data register.
#[inline]
pub fn is_data_reg(mode: u16) -> bool {
    mode == 0
}

/// Valid encoding at all (mode 7 only defines regs 0-4).
#[inline]
pub fn is_valid(mode: u16, reg: u16) -> bool {
    mode != MODE_SPECIAL || reg <= 4
}

/// Data alterable: Dn and alterable memory modes.
#[inline]
pub fn is_data_alterable(mode: u16, reg: u16) -> bool {
    mode != 1 && (mode != MODE_SPECIAL || reg <= 1)
}

/// Memory alterable: memory modes except PC-relative and immediate.
#[inline]
pub fn is_memory_alterable(mode: u16, reg: u16) -> bool {
    mode >= 2 && (mode != MODE_SPECIAL || reg <= 1)
}

/// Control modes: (An), d16(An), d8(An,Xn), abs, PC-relative.
#[inline]
pub fn is_control(mode: u16, reg: u16) -> bool {
    matches!(mode, 2 | 5 | 6) || (mode == MODE_SPECIAL && reg <= 3)
}

/// Data addressing: everything except An.
#[inline]
pub fn is_data(mode: u16, reg: u16) -> bool {
    mode != 1 && is_valid(mode, reg)
}

impl Cpu68000 {
    /// Decode the brief extension word of an indexed mode and return the offset.
    fn index_offset(&self, ext: u16) -> u32 {
        let reg = ((ext >> 12) & 7) as usize;
        let xn = if ext & 0x8000 != 0 {
            self.regs.a(reg)
        } else {
            self.regs.d[reg]
        };
        let xn = if ext & 0x0800 != 0 {
            xn
        } else {
            Size::Word.sign_extend(xn)
        };
        let disp = Size::Byte.sign_extend(u32::from(ext));
        xn.wrapping_add(disp)
    }

    /// Post-increment / pre-decrement step. A7 stays word aligned for bytes.
    #[inline]
    fn step_for(reg: usize, size: Size) -> u32 {
        if reg == 7 && size == Size::Byte {
            2
        } else {
            size.bytes()
        }
    }

    /// Resolve mode/reg into an operand location.
    ///
    /// Post-increment and pre-decrement are applied here, so a resolved [`Ea`]
    /// may be read and written back without touching the register again.
    /// Returns `None` for invalid encodings.
    pub(crate) fn resolve_ea(
        &mut self,
        bus: &mut dyn Bus,
        mode: u16,
        reg: u16,
        size: Size,
    ) -> Option<Ea> {
        let r = reg as usize;
        let ea = match mode {
            0 => Ea::D(r),
            1 => Ea::A(r),
            2 => Ea::Mem(self.regs.a(r)),
            3 => {
                let addr = self.regs.a(r);
                self.regs
                    .set_a(r, addr.wrapping_add(Self::step_for(r, size)));
                Ea::Mem(addr)
            }
            4 => {
                let addr = self.regs.a(r).wrapping_sub(Self::step_for(r, size));
                self.regs.set_a(r, addr);
                Ea::Mem(addr)
            }
            5 => {
                let disp = Size::Word.sign_extend(u32::from(self.fetch_word(bus)));
                Ea::Mem(self.regs.a(r).wrapping_add(disp))
            }
            6 => {
                let ext = self.fetch_word(bus);
                Ea::Mem(self.regs.a(r).wrapping_add(self.index_offset(ext)))
            }
            MODE_SPECIAL => match reg {
                0 => Ea::Mem(Size::Word.sign_extend(u32::from(self.fetch_word(bus)))),
                1 => Ea::Mem(self.fetch_long(bus)),
                2 => {
                    let base = self.regs.pc;
                    let disp = Size::Word.sign_extend(u32::from(self.fetch_word(bus)));
                    Ea::Mem(base.wrapping_add(disp))
                }
                3 => {
                    let base = self.regs.pc;
                    let ext = self.fetch_word(bus);
                    Ea::Mem(base.wrapping_add(self.index_offset(ext)))
                }
                4 => Ea::Imm(match size {
                    Size::Byte => u32::from(self.fetch_word(bus) & 0xFF),
                    Size::Word => u32::from(self.fetch_word(bus)),
                    Size::Long => self.fetch_long(bus),
                }),
                _ => return None,
            },
            _ => return None,
        };
        Some(ea)
    }

    /// Resolve a control-mode address (LEA, PEA, JMP, JSR, MOVEM).
    pub(crate) fn control_address(&mut self, bus: &mut dyn Bus, mode: u16, reg: u16) -> Option<u32> {
        if !is_control(mode, reg) {
            return None;
        }
        match self.resolve_ea(bus, mode, reg, Size::Long)? {
            Ea::Mem(addr) => Some(addr),
            _ => None,
        }
    }

    /// Read an operand.
    pub(crate) fn read_ea(&mut self, bus: &mut dyn Bus, ea: Ea, size: Size) -> u32 {
        match ea {
            Ea::D(r) => self.regs.d[r] & size.mask(),
            Ea::A(r) => self.regs.a(r) & size.mask(),
            Ea::Mem(addr) => self.read_mem(bus, addr, size),
            Ea::Imm(v) => v & size.mask(),
        }
    }

    /// Write an operand. Data registers keep their untouched upper bits;
    /// address registers always receive the full (sign-extended) value.
    pub(crate) fn write_ea(&mut self, bus: &mut dyn Bus, ea: Ea, size: Size, value: u32) {
        match ea {
            Ea::D(r) => {
                let mask = size.mask();
                self.regs.d[r] = (self.regs.d[r] & !mask) | (value & mask);
            }
            Ea::A(r) => self.regs.set_a(r, size.sign_extend(value)),
            Ea::Mem(addr) => self.write_mem(bus, addr, size, value),
            Ea::Imm(_) => {}
        }
    }

    /// Resolve then read in one go. Returns `None` for invalid encodings.
    pub(crate) fn read_operand(
        &mut self,
        bus: &mut dyn Bus,
        mode: u16,
        reg: u16,
        size: Size,
    ) -> Option<u32> {
        let ea = self.resolve_ea(bus, mode, reg, size)?;
        Some(self.read_ea(bus, ea, size))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_extension() {
        assert_eq!(Size::Byte.sign_extend(0x80), 0xFFFF_FF80);
        assert_eq!(Size::Word.sign_extend(0x7FFF), 0x7FFF);
        assert_eq!(Size::Word.sign_extend(0x1_8000), 0xFFFF_8000);
    }

    #[test]
    fn surcharges_follow_size() {
        assert_eq!(ea_cycles(2, 0, Size::Word), 4);
        assert_eq!(ea_cycles(2, 0, Size::Long), 8);
        assert_eq!(ea_cycles(4, 3, Size::Byte), 6);
        assert_eq!(ea_cycles(7, 1, Size::Long), 16);
        assert_eq!(ea_cycles(0, 0, Size::Long), 0);
    }

    #[test]
    fn addressing_categories() {
        assert!(is_data_alterable(0, 0));
        assert!(!is_data_alterable(1, 0));
        assert!(!is_data_alterable(7, 2));
        assert!(is_control(7, 3));
        assert!(!is_control(3, 0));
        assert!(is_memory_alterable(4, 7));
        assert!(!is_valid(7, 5));
    }
}
