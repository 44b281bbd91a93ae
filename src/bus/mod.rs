//! System bus: the capability set every bus master (CPU, video, audio DMA)
//! uses to reach memory and memory-mapped peripherals.
//!
//! The bus is a routing façade. Storage lives in [`MemoryMap`]; peripherals
//! plug in as [`IoHandler`] records inside the I/O window.
//!
//! All addresses are 24-bit. Word and long accesses are big-endian and must
//! be even; an odd word/long address is an address-error condition.

mod io;
mod memory_map;

pub use io::{IoDevice, IoHandler, SharedDevice};
pub use memory_map::{
    BusStats, MemoryMap, CARTRIDGE_BASE, CARTRIDGE_MAX_SIZE, IO_BASE, IO_END, MAX_RAM_SIZE,
    ROM_BASE_LARGE, ROM_BASE_SMALL, ROM_MAX_SIZE, ROM_SMALL_LIMIT,
};

/// Mask applied to every address (68000 has 24 address lines).
pub const ADDRESS_MASK: u32 = 0x00FF_FFFF;

/// Value returned for unmapped byte reads.
pub const OPEN_BUS_BYTE: u8 = 0xFF;

/// Value returned for unmapped word reads.
pub const OPEN_BUS_WORD: u16 = 0xFFFF;

/// Kind of runtime fault signalled by the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    /// No device answered, or a write hit read-only memory (vector 2)
    Bus,
    /// Word/long access to an odd address (vector 3)
    Address,
}

/// A runtime bus fault waiting to be turned into a guest exception.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusFault {
    /// Fault class
    pub kind: FaultKind,
    /// Faulting 24-bit address
    pub address: u32,
    /// True if the faulting cycle was a write
    pub write: bool,
}

impl BusFault {
    /// Exception vector number the CPU takes for this fault.
    pub fn vector(&self) -> u8 {
        match self.kind {
            FaultKind::Bus => 2,
            FaultKind::Address => 3,
        }
    }
}

/// Bus capability contract.
///
/// Six access operations plus two fault notifications. Implementations route
/// accesses and latch faults; the CPU collects them with [`Bus::take_fault`]
/// at the next instruction boundary.
pub trait Bus {
    /// Read a byte.
    fn read_byte(&mut self, addr: u32) -> u8;

    /// Read a big-endian word.
    fn read_word(&mut self, addr: u32) -> u16;

    /// Read a big-endian long.
    fn read_long(&mut self, addr: u32) -> u32;

    /// Write a byte.
    fn write_byte(&mut self, addr: u32, value: u8);

    /// Write a big-endian word.
    fn write_word(&mut self, addr: u32, value: u16);

    /// Write a big-endian long.
    fn write_long(&mut self, addr: u32, value: u32);

    /// Signal a bus error at `addr`.
    fn bus_error(&mut self, addr: u32, write: bool);

    /// Signal an address error at `addr`.
    fn address_error(&mut self, addr: u32, write: bool);

    /// Take the pending fault, if any.
    fn take_fault(&mut self) -> Option<BusFault>;

    /// Pulse the reset line of every attached device (RESET instruction).
    fn reset_devices(&mut self) {}
}
