//! Relocation of a freshly laid-out module image.
//!
//! Every entry is bounds checked against its section before patching.
//! Bad entries are counted and skipped; the batch fails as a whole if any
//! entry failed, but the good entries stay applied.

use log::warn;
use num_derive::FromPrimitive;
use num_traits::FromPrimitive as _;

use super::format::{RelocEntry, SECTION_CODE, SECTION_DATA};
use crate::error::{CoreError, Result};

/// Relocation kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
pub enum RelocKind {
    /// Add the code load address to a 32-bit value
    Absolute = 0,
    /// Same-image PC-relative reference; nothing to patch
    PcRelative = 1,
    /// Add the high half of the load address to a 16-bit value
    High16 = 2,
    /// Add the low half of the load address to a 16-bit value
    Low16 = 3,
}

impl RelocKind {
    /// Decode a raw kind byte.
    pub fn from_raw(raw: u8) -> Option<Self> {
        Self::from_u8(raw)
    }

    /// Bytes patched.
    pub fn width(self) -> usize {
        match self {
            RelocKind::Absolute => 4,
            RelocKind::PcRelative => 0,
            RelocKind::High16 | RelocKind::Low16 => 2,
        }
    }
}

fn patch(section: &mut [u8], entry: &RelocEntry, kind: RelocKind, load_address: u32) -> bool {
    let at = entry.offset as usize;
    let Some(end) = at.checked_add(kind.width()) else {
        return false;
    };
    // PC-relative still has to point inside its section
    if end > section.len() || at >= section.len() {
        return false;
    }
    match kind {
        RelocKind::Absolute => {
            let mut word = [0u8; 4];
            word.copy_from_slice(&section[at..end]);
            let value = u32::from_le_bytes(word).wrapping_add(load_address);
            section[at..end].copy_from_slice(&value.to_le_bytes());
        }
        RelocKind::High16 | RelocKind::Low16 => {
            let half = if kind == RelocKind::High16 {
                (load_address >> 16) as u16
            } else {
                load_address as u16
            };
            let value = u16::from_le_bytes([section[at], section[at + 1]]).wrapping_add(half);
            section[at..end].copy_from_slice(&value.to_le_bytes());
        }
        RelocKind::PcRelative => {}
    }
    true
}

/// Apply `entries` to the code and data sections loaded at `load_address`.
///
/// Returns the number of entries applied, or [`CoreError::Relocation`] if
/// any entry was out of bounds or of an unknown kind.
pub fn apply_relocations(
    code: &mut [u8],
    data: &mut [u8],
    entries: &[RelocEntry],
    load_address: u32,
) -> Result<usize> {
    let mut failed = 0usize;
    for entry in entries {
        let applied = match (RelocKind::from_raw(entry.kind), entry.section) {
            (Some(kind), SECTION_CODE) => patch(code, entry, kind, load_address),
            (Some(kind), SECTION_DATA) => patch(data, entry, kind, load_address),
            _ => false,
        };
        if !applied {
            warn!(
                "relocation failed: offset 0x{:X} kind {} section {}",
                entry.offset, entry.kind, entry.section
            );
            failed += 1;
        }
    }
    if failed > 0 {
        return Err(CoreError::Relocation {
            failed,
            total: entries.len(),
        });
    }
    Ok(entries.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(offset: u32, kind: RelocKind, section: u8) -> RelocEntry {
        RelocEntry {
            offset,
            kind: kind as u8,
            section,
        }
    }

    #[test]
    fn absolute_adds_load_address() {
        let mut code = vec![0u8; 8];
        code[4..8].copy_from_slice(&0x0000_0100u32.to_le_bytes());
        let mut data = vec![];
        let n = apply_relocations(
            &mut code,
            &mut data,
            &[entry(4, RelocKind::Absolute, SECTION_CODE)],
            0x1000_0000,
        )
        .unwrap();
        assert_eq!(n, 1);
        assert_eq!(u32::from_le_bytes([code[4], code[5], code[6], code[7]]), 0x1000_0100);
    }

    #[test]
    fn half_relocations_patch_data() {
        let mut code = vec![0u8; 4];
        let mut data = vec![0x01, 0x00, 0x02, 0x00];
        apply_relocations(
            &mut code,
            &mut data,
            &[
                entry(0, RelocKind::High16, SECTION_DATA),
                entry(2, RelocKind::Low16, SECTION_DATA),
            ],
            0x1234_5678,
        )
        .unwrap();
        assert_eq!(u16::from_le_bytes([data[0], data[1]]), 0x1235);
        assert_eq!(u16::from_le_bytes([data[2], data[3]]), 0x567A);
    }

    #[test]
    fn zero_entries_leave_buffers_alone() {
        let mut code = vec![0xAA; 16];
        let mut data = vec![0x55; 16];
        assert_eq!(apply_relocations(&mut code, &mut data, &[], 0xDEAD_0000).unwrap(), 0);
        assert!(code.iter().all(|&b| b == 0xAA));
        assert!(data.iter().all(|&b| b == 0x55));
    }

    #[test]
    fn bad_entries_fail_batch_but_good_ones_apply() {
        let mut code = vec![0u8; 8];
        let mut data = vec![0u8; 4];
        let entries = [
            entry(0, RelocKind::Absolute, SECTION_CODE),
            entry(6, RelocKind::Absolute, SECTION_CODE),
            RelocEntry {
                offset: 0,
                kind: 9,
                section: SECTION_DATA,
            },
            RelocEntry {
                offset: 0,
                kind: 0,
                section: 7,
            },
        ];
        let err = apply_relocations(&mut code, &mut data, &entries, 0x40).unwrap_err();
        assert!(matches!(err, CoreError::Relocation { failed: 3, total: 4 }));
        assert_eq!(u32::from_le_bytes([code[0], code[1], code[2], code[3]]), 0x40);
        assert_eq!(&code[4..], &[0, 0, 0, 0]);
        assert_eq!(data, vec![0, 0, 0, 0]);
    }

    #[test]
    fn pc_relative_is_a_no_op() {
        let mut code = vec![1, 2, 3, 4];
        let mut data = vec![];
        apply_relocations(
            &mut code,
            &mut data,
            &[entry(2, RelocKind::PcRelative, SECTION_CODE)],
            0xFFFF_0000,
        )
        .unwrap();
        assert_eq!(code, vec![1, 2, 3, 4]);
    }
}
