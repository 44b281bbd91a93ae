//! Memory-mapped I/O handler records.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

/// A peripheral reachable through the I/O window.
///
/// Every callback is optional. A missing byte read answers open bus, a missing
/// byte write is ignored, and missing word callbacks fall back to two byte
/// accesses (high byte first). Addresses passed in are absolute 24-bit
/// addresses; the device itself is the opaque context.
pub trait IoDevice: Send {
    /// Read a byte register.
    fn read_byte(&mut self, _addr: u32) -> Option<u8> {
        None
    }

    /// Write a byte register. Returns `false` if the device has no byte write.
    fn write_byte(&mut self, _addr: u32, _value: u8) -> bool {
        false
    }

    /// Read a word register.
    fn read_word(&mut self, _addr: u32) -> Option<u16> {
        None
    }

    /// Write a word register. Returns `false` if the device has no word write.
    fn write_word(&mut self, _addr: u32, _value: u16) -> bool {
        false
    }

    /// Bus reset line pulsed.
    fn reset(&mut self) {}
}

/// Device shared between the bus and other owners (timing controller, registry).
pub type SharedDevice = Arc<Mutex<dyn IoDevice>>;

/// One registered address range in the I/O window.
#[derive(Clone)]
pub struct IoHandler {
    /// First address (inclusive)
    pub base: u32,
    /// Last address (inclusive)
    pub end: u32,
    /// Display name, unique per memory map
    pub name: String,
    /// Device answering the range
    pub device: SharedDevice,
}

impl IoHandler {
    /// Create a handler record.
    pub fn new(name: impl Into<String>, base: u32, end: u32, device: SharedDevice) -> Self {
        Self {
            base,
            end,
            name: name.into(),
            device,
        }
    }

    /// True if `addr` falls inside this handler's range.
    #[inline]
    pub fn contains(&self, addr: u32) -> bool {
        addr >= self.base && addr <= self.end
    }

    /// True if the two ranges share at least one address.
    pub fn overlaps(&self, other: &IoHandler) -> bool {
        self.base <= other.end && other.base <= self.end
    }
}

impl fmt::Debug for IoHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IoHandler")
            .field("name", &self.name)
            .field("base", &format_args!("0x{:06X}", self.base))
            .field("end", &format_args!("0x{:06X}", self.end))
            .finish()
    }
}
