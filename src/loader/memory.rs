//! Module memory regions.
//!
//! A [`Region`] is one contiguous, 8-byte aligned allocation holding a
//! module's code, data and bss. Regions carry a load address from a
//! bump-addressed arena and a cache-synchronisation flag the loader checks
//! before calling the module's entry point.

use log::{debug, warn};

use crate::error::{CoreError, Result};

/// Base address of the executable pool.
pub const EXEC_POOL_BASE: u32 = 0x1000_0000;

/// Base address of the general-purpose pool.
pub const GENERAL_POOL_BASE: u32 = 0x2000_0000;

/// Default pool capacity.
pub const DEFAULT_POOL_CAPACITY: usize = 16 * 1024 * 1024;

/// Alignment of every region.
pub const REGION_ALIGN: usize = 8;

/// Memory class of a region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionKind {
    /// Execute-capable
    Executable,
    /// Data only; code placed here cannot run
    General,
}

/// One contiguous module allocation.
#[derive(Debug)]
pub struct Region {
    base: u32,
    kind: RegionKind,
    bytes: Vec<u8>,
    synced: bool,
}

impl Region {
    /// Load address.
    pub fn base(&self) -> u32 {
        self.base
    }

    /// Memory class.
    pub fn kind(&self) -> RegionKind {
        self.kind
    }

    /// Size in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// True for a zero-sized region.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Contents.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Mutable contents. Writing invalidates the cache-sync flag.
    pub fn bytes_mut(&mut self) -> &mut [u8] {
        self.synced = false;
        &mut self.bytes
    }

    /// Make instruction and data views of the contents coherent.
    pub fn sync_caches(&mut self) {
        std::sync::atomic::fence(std::sync::atomic::Ordering::SeqCst);
        self.synced = true;
    }

    /// True if no write happened since the last [`Region::sync_caches`].
    pub fn is_synced(&self) -> bool {
        self.synced
    }
}

/// Source of module memory.
pub trait RegionAllocator: Send {
    /// Allocate `size` zeroed bytes, preferring `prefer` and falling back
    /// to the other pool.
    fn allocate(&mut self, size: usize, prefer: RegionKind) -> Result<Region>;

    /// Return a region.
    fn free(&mut self, region: Region);

    /// Bytes still available in the executable pool.
    fn available(&self) -> usize;
}

#[derive(Debug)]
struct Pool {
    base: u32,
    capacity: usize,
    used: usize,
    next: u32,
}

impl Pool {
    fn new(base: u32, capacity: usize) -> Self {
        Self {
            base,
            capacity,
            used: 0,
            next: base,
        }
    }

    fn try_take(&mut self, size: usize) -> Option<u32> {
        if self.used + size > self.capacity {
            return None;
        }
        let addr = self.next;
        self.next = self.next.wrapping_add(size as u32);
        self.used += size;
        Some(addr)
    }

    fn give_back(&mut self, size: usize) {
        self.used = self.used.saturating_sub(size);
        if self.used == 0 {
            self.next = self.base;
        }
    }
}

/// Heap-backed allocator with executable and general pools.
///
/// Addresses are handed out bump-style; capacity is returned on free and
/// the address cursor rewinds once a pool is empty.
#[derive(Debug)]
pub struct HeapRegionAllocator {
    exec: Pool,
    general: Pool,
}

impl Default for HeapRegionAllocator {
    fn default() -> Self {
        Self::new(DEFAULT_POOL_CAPACITY, DEFAULT_POOL_CAPACITY)
    }
}

impl HeapRegionAllocator {
    /// Allocator with the given pool capacities.
    pub fn new(exec_capacity: usize, general_capacity: usize) -> Self {
        Self {
            exec: Pool::new(EXEC_POOL_BASE, exec_capacity),
            general: Pool::new(GENERAL_POOL_BASE, general_capacity),
        }
    }

    fn pool(&mut self, kind: RegionKind) -> &mut Pool {
        match kind {
            RegionKind::Executable => &mut self.exec,
            RegionKind::General => &mut self.general,
        }
    }
}

fn align(size: usize) -> usize {
    (size + REGION_ALIGN - 1) & !(REGION_ALIGN - 1)
}

impl RegionAllocator for HeapRegionAllocator {
    fn allocate(&mut self, size: usize, prefer: RegionKind) -> Result<Region> {
        let size = align(size);
        let other = match prefer {
            RegionKind::Executable => RegionKind::General,
            RegionKind::General => RegionKind::Executable,
        };

        let (kind, base) = if let Some(base) = self.pool(prefer).try_take(size) {
            (prefer, base)
        } else if let Some(base) = self.pool(other).try_take(size) {
            warn!("{:?} pool exhausted, {} bytes placed in {:?} memory", prefer, size, other);
            (other, base)
        } else {
            return Err(CoreError::ResourceExhausted(format!(
                "no pool can hold {size} bytes"
            )));
        };

        let mut bytes = Vec::new();
        if bytes.try_reserve_exact(size).is_err() {
            self.pool(kind).give_back(size);
            return Err(CoreError::ResourceExhausted(format!(
                "host allocation of {size} bytes failed"
            )));
        }
        bytes.resize(size, 0);
        debug!("allocated {} bytes of {:?} memory at 0x{:08X}", size, kind, base);
        Ok(Region {
            base,
            kind,
            bytes,
            synced: false,
        })
    }

    fn free(&mut self, region: Region) {
        debug!("freed {} bytes at 0x{:08X}", region.len(), region.base);
        self.pool(region.kind).give_back(region.len());
    }

    fn available(&self) -> usize {
        self.exec.capacity - self.exec.used
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn regions_are_aligned_and_zeroed() {
        let mut alloc = HeapRegionAllocator::new(64, 64);
        let region = alloc.allocate(13, RegionKind::Executable).unwrap();
        assert_eq!(region.len(), 16);
        assert_eq!(region.base(), EXEC_POOL_BASE);
        assert!(region.bytes().iter().all(|&b| b == 0));
        assert_eq!(alloc.available(), 48);
        let second = alloc.allocate(8, RegionKind::Executable).unwrap();
        assert_eq!(second.base(), EXEC_POOL_BASE + 16);
    }

    #[test]
    fn falls_back_to_general_then_exhausts() {
        let mut alloc = HeapRegionAllocator::new(16, 32);
        let a = alloc.allocate(16, RegionKind::Executable).unwrap();
        assert_eq!(a.kind(), RegionKind::Executable);
        let b = alloc.allocate(16, RegionKind::Executable).unwrap();
        assert_eq!(b.kind(), RegionKind::General);
        assert_eq!(b.base(), GENERAL_POOL_BASE);
        alloc.allocate(16, RegionKind::Executable).unwrap();
        assert!(matches!(
            alloc.allocate(16, RegionKind::Executable),
            Err(CoreError::ResourceExhausted(_))
        ));
        alloc.free(a);
        assert_eq!(alloc.available(), 16);
    }

    #[test]
    fn writes_clear_sync_flag() {
        let mut alloc = HeapRegionAllocator::default();
        let mut region = alloc.allocate(8, RegionKind::Executable).unwrap();
        assert!(!region.is_synced());
        region.sync_caches();
        assert!(region.is_synced());
        region.bytes_mut()[0] = 1;
        assert!(!region.is_synced());
    }
}
