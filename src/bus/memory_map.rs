//! Atari ST memory map.
//!
//! Address decoding priority:
//! - 0x000000 - RAM end: RAM (fast path)
//! - ROM base - ROM end: TOS ROM (writes fault and are discarded)
//! - 0xFF8000 - 0xFFFFFF: I/O window, registered handlers (linear scan)
//! - 0xFA0000 - 0xFBFFFF: cartridge (optional)
//! - anything else: bus fault, open bus value
//!
//! The ROM base depends on the image size: TOS 1.0x images (192 KiB) live at
//! 0xFC0000, larger images at 0xE00000. While a ROM is present the first
//! eight bytes read back the ROM's reset vectors.

use log::{debug, warn};

use super::io::IoHandler;
use super::{Bus, BusFault, FaultKind, ADDRESS_MASK, OPEN_BUS_BYTE, OPEN_BUS_WORD};
use crate::error::{CoreError, Result};

/// Largest RAM configuration the ST decodes (4 MiB).
pub const MAX_RAM_SIZE: usize = 4 * 1024 * 1024;

/// ROM base for images up to [`ROM_SMALL_LIMIT`] bytes.
pub const ROM_BASE_SMALL: u32 = 0xFC_0000;

/// ROM base for larger images.
pub const ROM_BASE_LARGE: u32 = 0xE0_0000;

/// Largest image placed at [`ROM_BASE_SMALL`].
pub const ROM_SMALL_LIMIT: usize = 192 * 1024;

/// Largest ROM image accepted.
pub const ROM_MAX_SIZE: usize = 1024 * 1024;

/// Cartridge port base.
pub const CARTRIDGE_BASE: u32 = 0xFA_0000;

/// Largest cartridge image accepted.
pub const CARTRIDGE_MAX_SIZE: usize = 128 * 1024;

/// First address of the I/O window.
pub const IO_BASE: u32 = 0xFF_8000;

/// Last address of the I/O window.
pub const IO_END: u32 = 0xFF_FFFF;

/// Bytes of the address space shadowed by the ROM reset vectors.
const RESET_VECTOR_SHADOW: u32 = 8;

/// Access statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BusStats {
    /// Read accesses (any width)
    pub reads: u64,
    /// Write accesses (any width)
    pub writes: u64,
    /// Bus faults (unmapped access, ROM write)
    pub bus_faults: u64,
    /// Address faults (odd word/long access)
    pub address_faults: u64,
    /// Subset of `bus_faults` caused by writes to ROM
    pub rom_write_faults: u64,
    /// Most recent fault
    pub last_fault: Option<BusFault>,
}

struct RomImage {
    base: u32,
    data: Vec<u8>,
}

impl RomImage {
    #[inline]
    fn offset(&self, addr: u32) -> Option<usize> {
        let off = addr.checked_sub(self.base)? as usize;
        (off < self.data.len()).then_some(off)
    }
}

/// RAM, ROM, cartridge and I/O handler routing for one machine.
pub struct MemoryMap {
    ram: Vec<u8>,
    rom: Option<RomImage>,
    cartridge: Option<Vec<u8>>,
    handlers: Vec<IoHandler>,
    stats: BusStats,
    pending_fault: Option<BusFault>,
}

impl MemoryMap {
    /// Create a memory map with `ram_bytes` of zeroed RAM.
    pub fn new(ram_bytes: usize) -> Result<Self> {
        if ram_bytes == 0 || ram_bytes % 2 != 0 || ram_bytes > MAX_RAM_SIZE {
            return Err(CoreError::InvalidSize {
                what: "RAM",
                expected: MAX_RAM_SIZE,
                actual: ram_bytes,
            });
        }
        let mut ram = Vec::new();
        ram.try_reserve_exact(ram_bytes)
            .map_err(|e| CoreError::ResourceExhausted(format!("RAM ({ram_bytes} bytes): {e}")))?;
        ram.resize(ram_bytes, 0);
        Ok(Self {
            ram,
            rom: None,
            cartridge: None,
            handlers: Vec::new(),
            stats: BusStats::default(),
            pending_fault: None,
        })
    }

    /// Zero RAM and clear statistics. The ROM and cartridge images are kept.
    pub fn reset(&mut self) {
        self.ram.fill(0);
        self.stats = BusStats::default();
        self.pending_fault = None;
    }

    /// RAM size in bytes.
    pub fn ram_size(&self) -> usize {
        self.ram.len()
    }

    /// Direct RAM view (video DMA, debuggers).
    pub fn ram(&self) -> &[u8] {
        &self.ram
    }

    /// Load a TOS ROM image. Returns the base address it was mapped at.
    pub fn load_rom(&mut self, data: Vec<u8>) -> Result<u32> {
        if data.is_empty() || data.len() % 2 != 0 || data.len() > ROM_MAX_SIZE {
            return Err(CoreError::InvalidSize {
                what: "ROM image",
                expected: ROM_MAX_SIZE,
                actual: data.len(),
            });
        }
        let base = if data.len() <= ROM_SMALL_LIMIT {
            ROM_BASE_SMALL
        } else {
            ROM_BASE_LARGE
        };
        debug!("ROM: {} bytes mapped at 0x{base:06X}", data.len());
        self.rom = Some(RomImage { base, data });
        Ok(base)
    }

    /// ROM base address, if a ROM is loaded.
    pub fn rom_base(&self) -> Option<u32> {
        self.rom.as_ref().map(|r| r.base)
    }

    /// Load a cartridge image at [`CARTRIDGE_BASE`].
    pub fn load_cartridge(&mut self, data: Vec<u8>) -> Result<()> {
        if data.is_empty() || data.len() > CARTRIDGE_MAX_SIZE {
            return Err(CoreError::InvalidSize {
                what: "cartridge image",
                expected: CARTRIDGE_MAX_SIZE,
                actual: data.len(),
            });
        }
        self.cartridge = Some(data);
        Ok(())
    }

    /// Remove the cartridge image.
    pub fn eject_cartridge(&mut self) {
        self.cartridge = None;
    }

    /// Register an I/O handler.
    ///
    /// The range must lie inside the I/O window, must not be empty and must
    /// not overlap an already registered handler.
    pub fn register_io(&mut self, handler: IoHandler) -> Result<()> {
        if handler.end < handler.base {
            return Err(CoreError::InvalidArgument(format!(
                "I/O handler '{}': end 0x{:06X} below base 0x{:06X}",
                handler.name, handler.end, handler.base
            )));
        }
        if handler.base < IO_BASE || handler.end > IO_END {
            return Err(CoreError::InvalidArgument(format!(
                "I/O handler '{}': range 0x{:06X}-0x{:06X} outside I/O window",
                handler.name, handler.base, handler.end
            )));
        }
        if let Some(existing) = self.handlers.iter().find(|h| h.overlaps(&handler)) {
            return Err(CoreError::InvalidArgument(format!(
                "I/O handler '{}' overlaps '{}'",
                handler.name, existing.name
            )));
        }
        if self.handlers.iter().any(|h| h.name == handler.name) {
            return Err(CoreError::InvalidArgument(format!(
                "I/O handler '{}' already registered",
                handler.name
            )));
        }
        debug!("I/O: registered {:?}", handler);
        self.handlers.push(handler);
        Ok(())
    }

    /// Remove a handler by name.
    pub fn unregister_io(&mut self, name: &str) -> Result<IoHandler> {
        let idx = self
            .handlers
            .iter()
            .position(|h| h.name == name)
            .ok_or_else(|| CoreError::NotFound(format!("I/O handler '{name}'")))?;
        Ok(self.handlers.remove(idx))
    }

    /// Registered handlers in registration order.
    pub fn handlers(&self) -> &[IoHandler] {
        &self.handlers
    }

    /// Access statistics.
    pub fn stats(&self) -> BusStats {
        self.stats
    }

    /// Read a byte without touching statistics or devices (RAM/ROM/cartridge only).
    pub fn peek(&self, addr: u32) -> u8 {
        let addr = addr & ADDRESS_MASK;
        if let Some(b) = self.ram.get(addr as usize) {
            return *b;
        }
        if let Some(rom) = &self.rom {
            if let Some(off) = rom.offset(addr) {
                return rom.data[off];
            }
        }
        if let Some(off) = self.cartridge_offset(addr) {
            if let Some(cart) = &self.cartridge {
                return cart[off];
            }
        }
        OPEN_BUS_BYTE
    }

    /// Write RAM directly, bypassing statistics. Out-of-RAM writes are ignored.
    pub fn poke(&mut self, addr: u32, value: u8) {
        if let Some(b) = self.ram.get_mut((addr & ADDRESS_MASK) as usize) {
            *b = value;
        }
    }

    /// Copy a block into RAM.
    pub fn upload(&mut self, addr: u32, data: &[u8]) -> Result<()> {
        let start = (addr & ADDRESS_MASK) as usize;
        let end = start + data.len();
        if end > self.ram.len() {
            return Err(CoreError::InvalidSize {
                what: "RAM upload",
                expected: self.ram.len() - start.min(self.ram.len()),
                actual: data.len(),
            });
        }
        self.ram[start..end].copy_from_slice(data);
        Ok(())
    }

    fn cartridge_offset(&self, addr: u32) -> Option<usize> {
        let cart = self.cartridge.as_ref()?;
        let off = addr.checked_sub(CARTRIDGE_BASE)? as usize;
        (off < cart.len()).then_some(off)
    }

    fn handler_index(&self, addr: u32) -> Option<usize> {
        if addr < IO_BASE {
            return None;
        }
        self.handlers.iter().position(|h| h.contains(addr))
    }

    fn is_mapped(&self, addr: u32) -> bool {
        (addr as usize) < self.ram.len()
            || self.rom.as_ref().and_then(|r| r.offset(addr)).is_some()
            || self.handler_index(addr).is_some()
            || self.cartridge_offset(addr).is_some()
    }

    fn latch_fault(&mut self, kind: FaultKind, address: u32, write: bool) {
        let fault = BusFault {
            kind,
            address,
            write,
        };
        match kind {
            FaultKind::Bus => self.stats.bus_faults += 1,
            FaultKind::Address => self.stats.address_faults += 1,
        }
        if self.stats.bus_faults + self.stats.address_faults == 1 {
            warn!("bus: first fault {fault:?}");
        }
        self.stats.last_fault = Some(fault);
        // The first fault of an instruction is the one the CPU reports.
        if self.pending_fault.is_none() {
            self.pending_fault = Some(fault);
        }
    }

    fn load_byte(&mut self, addr: u32) -> u8 {
        if let Some(b) = self.ram.get(addr as usize) {
            if addr < RESET_VECTOR_SHADOW {
                if let Some(rom) = &self.rom {
                    return rom.data[addr as usize];
                }
            }
            return *b;
        }

        if let Some(rom) = &self.rom {
            if let Some(off) = rom.offset(addr) {
                return rom.data[off];
            }
        }

        if let Some(idx) = self.handler_index(addr) {
            let mut dev = self.handlers[idx].device.lock();
            return dev.read_byte(addr).unwrap_or(OPEN_BUS_BYTE);
        }

        if let Some(off) = self.cartridge_offset(addr) {
            if let Some(cart) = &self.cartridge {
                return cart[off];
            }
        }

        self.latch_fault(FaultKind::Bus, addr, false);
        OPEN_BUS_BYTE
    }

    fn store_byte(&mut self, addr: u32, value: u8) {
        if let Some(b) = self.ram.get_mut(addr as usize) {
            *b = value;
            return;
        }

        if self.rom.as_ref().and_then(|r| r.offset(addr)).is_some() {
            self.stats.rom_write_faults += 1;
            self.latch_fault(FaultKind::Bus, addr, true);
            return;
        }

        if let Some(idx) = self.handler_index(addr) {
            self.handlers[idx].device.lock().write_byte(addr, value);
            return;
        }

        if self.cartridge_offset(addr).is_some() {
            self.stats.rom_write_faults += 1;
        }
        self.latch_fault(FaultKind::Bus, addr, true);
    }

    fn load_word(&mut self, addr: u32) -> u16 {
        let a = addr as usize;
        if addr >= RESET_VECTOR_SHADOW && a + 1 < self.ram.len() {
            return u16::from_be_bytes([self.ram[a], self.ram[a + 1]]);
        }

        if let Some(rom) = &self.rom {
            if let Some(off) = rom.offset(addr) {
                if off + 1 < rom.data.len() {
                    return u16::from_be_bytes([rom.data[off], rom.data[off + 1]]);
                }
            }
        }

        if let Some(idx) = self.handler_index(addr) {
            let word = self.handlers[idx].device.lock().read_word(addr);
            if let Some(word) = word {
                return word;
            }
        } else if !self.is_mapped(addr) {
            self.latch_fault(FaultKind::Bus, addr, false);
            return OPEN_BUS_WORD;
        }

        let hi = self.load_byte(addr);
        let lo = self.load_byte((addr + 1) & ADDRESS_MASK);
        u16::from_be_bytes([hi, lo])
    }

    fn store_word(&mut self, addr: u32, value: u16) {
        let a = addr as usize;
        if a + 1 < self.ram.len() {
            self.ram[a..a + 2].copy_from_slice(&value.to_be_bytes());
            return;
        }

        if let Some(idx) = self.handler_index(addr) {
            if self.handlers[idx].device.lock().write_word(addr, value) {
                return;
            }
        } else if self.rom.as_ref().and_then(|r| r.offset(addr)).is_some()
            || self.cartridge_offset(addr).is_some()
        {
            self.stats.rom_write_faults += 1;
            self.latch_fault(FaultKind::Bus, addr, true);
            return;
        } else if !self.is_mapped(addr) {
            self.latch_fault(FaultKind::Bus, addr, true);
            return;
        }

        let [hi, lo] = value.to_be_bytes();
        self.store_byte(addr, hi);
        self.store_byte((addr + 1) & ADDRESS_MASK, lo);
    }

    fn check_alignment(&mut self, addr: u32, write: bool) -> bool {
        if addr & 1 != 0 {
            self.latch_fault(FaultKind::Address, addr, write);
            false
        } else {
            true
        }
    }
}

impl Bus for MemoryMap {
    fn read_byte(&mut self, addr: u32) -> u8 {
        self.stats.reads += 1;
        self.load_byte(addr & ADDRESS_MASK)
    }

    fn read_word(&mut self, addr: u32) -> u16 {
        let addr = addr & ADDRESS_MASK;
        self.stats.reads += 1;
        if !self.check_alignment(addr, false) {
            return OPEN_BUS_WORD;
        }
        self.load_word(addr)
    }

    fn read_long(&mut self, addr: u32) -> u32 {
        let addr = addr & ADDRESS_MASK;
        self.stats.reads += 1;
        if !self.check_alignment(addr, false) {
            return 0xFFFF_FFFF;
        }
        let hi = self.load_word(addr);
        let lo = self.load_word((addr + 2) & ADDRESS_MASK);
        (u32::from(hi) << 16) | u32::from(lo)
    }

    fn write_byte(&mut self, addr: u32, value: u8) {
        self.stats.writes += 1;
        self.store_byte(addr & ADDRESS_MASK, value);
    }

    fn write_word(&mut self, addr: u32, value: u16) {
        let addr = addr & ADDRESS_MASK;
        self.stats.writes += 1;
        if self.check_alignment(addr, true) {
            self.store_word(addr, value);
        }
    }

    fn write_long(&mut self, addr: u32, value: u32) {
        let addr = addr & ADDRESS_MASK;
        self.stats.writes += 1;
        if self.check_alignment(addr, true) {
            self.store_word(addr, (value >> 16) as u16);
            self.store_word((addr + 2) & ADDRESS_MASK, value as u16);
        }
    }

    fn bus_error(&mut self, addr: u32, write: bool) {
        self.latch_fault(FaultKind::Bus, addr & ADDRESS_MASK, write);
    }

    fn address_error(&mut self, addr: u32, write: bool) {
        self.latch_fault(FaultKind::Address, addr & ADDRESS_MASK, write);
    }

    fn take_fault(&mut self) -> Option<BusFault> {
        self.pending_fault.take()
    }

    fn reset_devices(&mut self) {
        for handler in &self.handlers {
            handler.device.lock().reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{IoDevice, SharedDevice};
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[derive(Default)]
    struct Latch {
        value: u8,
        resets: u32,
    }

    impl IoDevice for Latch {
        fn read_byte(&mut self, _addr: u32) -> Option<u8> {
            Some(self.value)
        }
        fn write_byte(&mut self, _addr: u32, value: u8) -> bool {
            self.value = value;
            true
        }
        fn reset(&mut self) {
            self.resets += 1;
        }
    }

    /// Device with only word callbacks.
    struct WordOnly(u16);

    impl IoDevice for WordOnly {
        fn read_word(&mut self, _addr: u32) -> Option<u16> {
            Some(self.0)
        }
        fn write_word(&mut self, _addr: u32, value: u16) -> bool {
            self.0 = value;
            true
        }
    }

    fn map() -> MemoryMap {
        MemoryMap::new(512 * 1024).unwrap()
    }

    #[test]
    fn ram_round_trip_is_big_endian() {
        let mut m = map();
        m.write_long(0x1000, 0x1234_5678);
        assert_eq!(m.read_byte(0x1000), 0x12);
        assert_eq!(m.read_byte(0x1003), 0x78);
        assert_eq!(m.read_word(0x1002), 0x5678);
        assert_eq!(m.read_long(0x1000), 0x1234_5678);
        assert_eq!(m.stats().bus_faults, 0);
    }

    #[test]
    fn unmapped_gap_faults_and_reads_open_bus() {
        let mut m = map();
        m.load_rom(vec![0; 192 * 1024]).unwrap();
        assert_eq!(m.read_byte(0x10_0000), 0xFF);
        assert_eq!(m.read_word(0x10_0000), 0xFFFF);
        assert_eq!(m.stats().bus_faults, 2);
        let fault = m.take_fault().unwrap();
        assert_eq!(fault.kind, FaultKind::Bus);
        assert_eq!(fault.address, 0x10_0000);
        assert!(m.take_fault().is_none());
    }

    #[test]
    fn unhandled_io_reads_all_ones() {
        let mut m = map();
        assert_eq!(m.read_byte(0xFF8A00), 0xFF);
        assert_eq!(m.read_word(0xFF8A00), 0xFFFF);
        assert_eq!(m.read_long(0xFF8A00), 0xFFFF_FFFF);
    }

    #[test]
    fn rom_base_depends_on_size() {
        let mut m = map();
        assert_eq!(m.load_rom(vec![0; 192 * 1024]).unwrap(), ROM_BASE_SMALL);
        assert_eq!(m.load_rom(vec![0; 256 * 1024]).unwrap(), ROM_BASE_LARGE);
        assert!(m.load_rom(vec![0; 3]).is_err());
    }

    #[test]
    fn rom_write_is_discarded_and_counted() {
        let mut m = map();
        let mut rom = vec![0u8; 192 * 1024];
        rom[0x10] = 0xAB;
        m.load_rom(rom).unwrap();
        m.write_byte(0xFC0010, 0x55);
        assert_eq!(m.read_byte(0xFC0010), 0xAB);
        let stats = m.stats();
        assert_eq!(stats.rom_write_faults, 1);
        assert_eq!(stats.bus_faults, 1);
    }

    #[test]
    fn rom_shadows_reset_vectors() {
        let mut m = map();
        let mut rom = vec![0u8; 192 * 1024];
        rom[..8].copy_from_slice(&[0x00, 0x00, 0x60, 0x00, 0x00, 0xFC, 0x00, 0x30]);
        m.load_rom(rom).unwrap();
        assert_eq!(m.read_long(0), 0x0000_6000);
        assert_eq!(m.read_long(4), 0x00FC_0030);
    }

    #[test]
    fn odd_word_access_is_address_error() {
        let mut m = map();
        m.write_word(0x1001, 0xBEEF);
        assert_eq!(m.read_word(0x1001), 0xFFFF);
        assert_eq!(m.stats().address_faults, 2);
        assert_eq!(m.take_fault().unwrap().kind, FaultKind::Address);
    }

    #[test]
    fn registration_validates_range() {
        let mut m = map();
        let dev: SharedDevice = Arc::new(Mutex::new(Latch::default()));
        assert!(m
            .register_io(IoHandler::new("low", 0x1000, 0x10FF, dev.clone()))
            .is_err());
        assert!(m
            .register_io(IoHandler::new("inverted", 0xFF8810, 0xFF8800, dev.clone()))
            .is_err());
        m.register_io(IoHandler::new("psg", 0xFF8800, 0xFF88FF, dev.clone()))
            .unwrap();
        assert!(m
            .register_io(IoHandler::new("overlap", 0xFF88F0, 0xFF8900, dev))
            .is_err());
        assert_eq!(m.handlers().len(), 1);
    }

    #[test]
    fn handler_receives_byte_traffic() {
        let mut m = map();
        let latch = Arc::new(Mutex::new(Latch::default()));
        m.register_io(IoHandler::new("latch", 0xFFFA00, 0xFFFA3F, latch.clone()))
            .unwrap();
        m.write_byte(0xFFFA01, 0x42);
        assert_eq!(latch.lock().value, 0x42);
        // Word read falls back to two byte reads
        assert_eq!(m.read_word(0xFFFA00), 0x4242);
        m.reset_devices();
        assert_eq!(latch.lock().resets, 1);
        assert_eq!(m.stats().bus_faults, 0);
    }

    #[test]
    fn long_access_composes_word_handlers() {
        let mut m = map();
        let dev = Arc::new(Mutex::new(WordOnly(0x1234)));
        m.register_io(IoHandler::new("word", 0xFF8200, 0xFF82FF, dev.clone()))
            .unwrap();
        assert_eq!(m.read_long(0xFF8200), 0x1234_1234);
        m.write_long(0xFF8200, 0xAAAA_5555);
        assert_eq!(dev.lock().0, 0x5555);
        // No byte callback: open bus, no fault
        assert_eq!(m.read_byte(0xFF8201), 0xFF);
        assert_eq!(m.stats().bus_faults, 0);
    }

    #[test]
    fn reset_keeps_rom_and_clears_ram() {
        let mut m = map();
        m.load_rom(vec![0x11; 192 * 1024]).unwrap();
        m.write_word(0x2000, 0xCAFE);
        m.read_byte(0x30_0000);
        m.reset();
        assert_eq!(m.read_word(0x2000), 0);
        assert_eq!(m.read_byte(0xFC0000), 0x11);
        assert_eq!(m.stats().bus_faults, 0);
    }

    #[test]
    fn cartridge_is_read_only() {
        let mut m = map();
        m.load_cartridge(vec![0xAB, 0xCD, 0xF0, 0x0D]).unwrap();
        assert_eq!(m.read_word(CARTRIDGE_BASE), 0xABCD);
        m.write_byte(CARTRIDGE_BASE, 0);
        assert_eq!(m.read_byte(CARTRIDGE_BASE), 0xAB);
        assert_eq!(m.stats().bus_faults, 1);
    }

    #[test]
    fn ram_size_is_validated() {
        assert!(MemoryMap::new(0).is_err());
        assert!(MemoryMap::new(MAX_RAM_SIZE + 2).is_err());
        assert!(MemoryMap::new(1023).is_err());
    }
}
