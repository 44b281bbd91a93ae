//! Execution trace ring for debugging guest code.
//!
//! Only compiled with the `cpu-trace` feature. Records the last N
//! instructions whose PC falls inside a watched range.

use std::collections::VecDeque;
use std::ops::Range;

use super::Registers;

/// One executed instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceEntry {
    /// Instruction address
    pub pc: u32,
    /// First opcode word
    pub opcode: u16,
    /// D0
    pub d0: u32,
    /// A7 at the time of execution
    pub sp: u32,
    /// Status register
    pub sr: u16,
}

/// Bounded ring of [`TraceEntry`] values.
#[derive(Debug, Clone)]
pub struct TraceRing {
    range: Range<u32>,
    capacity: usize,
    entries: VecDeque<TraceEntry>,
}

impl TraceRing {
    /// Watch `range`, keeping at most `capacity` entries.
    pub fn new(range: Range<u32>, capacity: usize) -> Self {
        Self {
            range,
            capacity: capacity.max(1),
            entries: VecDeque::with_capacity(capacity.max(1)),
        }
    }

    pub(crate) fn record(&mut self, pc: u32, opcode: u16, regs: &Registers) {
        if !self.range.contains(&pc) {
            return;
        }
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(TraceEntry {
            pc,
            opcode,
            d0: regs.d[0],
            sp: regs.sp(),
            sr: regs.sr,
        });
    }

    /// Entries, oldest first.
    pub fn entries(&self) -> impl Iterator<Item = &TraceEntry> {
        self.entries.iter()
    }

    /// Number of recorded entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_drops_oldest_and_filters_range() {
        let regs = Registers::new();
        let mut ring = TraceRing::new(0x1000..0x2000, 2);
        ring.record(0x0800, 0x4E71, &regs);
        ring.record(0x1000, 0x4E71, &regs);
        ring.record(0x1002, 0x4E71, &regs);
        ring.record(0x1004, 0x4E75, &regs);
        let pcs: Vec<u32> = ring.entries().map(|e| e.pc).collect();
        assert_eq!(pcs, vec![0x1002, 0x1004]);
    }
}
