//! Entries of the memory map handed over by the bootloader.

use super::{PhysAddr, Range};

/// The type of a memory map region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionKind {
    /// Usable RAM.
    Free,
    /// Memory used by firmware or devices.
    Reserved,
    /// ACPI tables, usable once they have been parsed.
    AcpiReclaimable,
    /// ACPI non-volatile storage.
    AcpiNvs,
    /// Memory that was reported as defective.
    Bad,
}

/// A single, page aligned region of the physical memory map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryRegion {
    /// The first address of this region.
    pub base: PhysAddr,
    /// The length of this region in bytes.
    pub len: usize,
    /// What this region may be used for.
    pub kind: RegionKind,
}

impl MemoryRegion {
    /// Create a new region that covers `base..base + len`.
    pub const fn new(base: PhysAddr, len: usize, kind: RegionKind) -> Self {
        Self { base, len, kind }
    }

    /// Check if the buddy allocator may hand out this region.
    pub fn is_free(&self) -> bool {
        self.kind == RegionKind::Free
    }

    /// The first address behind this region.
    ///
    /// Saturates at the end of the address space.
    pub fn end(&self) -> PhysAddr {
        PhysAddr(self.base.0.saturating_add(self.len))
    }

    /// Return the addresses covered by this region.
    pub fn range(&self) -> Range {
        Range::new(self.base, self.end())
    }
}
