//! Translation between physical addresses and page descriptors.
//!
//! This is the only place that does arithmetic on physical addresses,
//! including the XOR trick that locates the buddy of a block.

use super::{size_for_order, PAGE_SIZE};
use core::{fmt, ops};

/// A physical memory address.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct PhysAddr(pub usize);

impl PhysAddr {
    /// Return the raw address.
    pub const fn as_usize(self) -> usize {
        self.0
    }

    /// Check if this address is aligned to the page size.
    pub const fn is_page_aligned(self) -> bool {
        self.0 % PAGE_SIZE == 0
    }

    /// The global page frame number of this address.
    pub const fn pfn(self) -> usize {
        self.0 / PAGE_SIZE
    }
}

impl ops::Add<usize> for PhysAddr {
    type Output = PhysAddr;

    fn add(self, rhs: usize) -> PhysAddr {
        PhysAddr(self.0 + rhs)
    }
}

impl ops::Sub<PhysAddr> for PhysAddr {
    type Output = usize;

    fn sub(self, rhs: PhysAddr) -> usize {
        self.0 - rhs.0
    }
}

impl fmt::Debug for PhysAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PhysAddr({:#x})", self.0)
    }
}

impl fmt::Display for PhysAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// The index of a [page descriptor](super::Page) inside the descriptor table.
///
/// A `PageFrame` is the handle that is given out by the allocator. The block
/// it refers to starts at the physical address of the indexed page.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Default)]
pub struct PageFrame(pub usize);

impl PageFrame {
    /// Return the index into the descriptor table.
    pub const fn index(self) -> usize {
        self.0
    }
}

/// Describes which physical addresses are covered by the descriptor table.
///
/// Descriptor `i` belongs to the page at `base + i * PAGE_SIZE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameMap {
    base: PhysAddr,
    npages: usize,
}

impl FrameMap {
    /// Create a new map for `npages` pages starting at `base`.
    ///
    /// # Panics
    ///
    /// Panics if `base` is not page aligned or the range would overflow.
    pub fn new(base: PhysAddr, npages: usize) -> Self {
        assert!(base.is_page_aligned(), "base {} is not page aligned", base);
        assert!(
            npages
                .checked_mul(PAGE_SIZE)
                .and_then(|len| base.0.checked_add(len))
                .is_some(),
            "managed range overflows the address space"
        );

        Self { base, npages }
    }

    /// The physical address of descriptor `0`.
    pub fn base(&self) -> PhysAddr {
        self.base
    }

    /// The first physical address behind the managed range.
    pub fn end(&self) -> PhysAddr {
        self.base + self.npages * PAGE_SIZE
    }

    /// The number of pages inside the managed range.
    pub fn npages(&self) -> usize {
        self.npages
    }

    /// Check if `addr` lies inside the managed range.
    pub fn contains(&self, addr: PhysAddr) -> bool {
        addr >= self.base && addr < self.end()
    }

    /// Return the physical address of the page described by `page`.
    ///
    /// # Panics
    ///
    /// Panics if `page` is outside of the descriptor table.
    pub fn page_to_physaddr(&self, page: PageFrame) -> PhysAddr {
        assert!(
            page.0 < self.npages,
            "page {} is outside of the descriptor table ({} pages)",
            page.0,
            self.npages
        );
        self.base + page.0 * PAGE_SIZE
    }

    /// Return the descriptor that belongs to the page at `addr`.
    ///
    /// # Panics
    ///
    /// Panics if `addr` is not page aligned or not inside the managed range.
    pub fn physaddr_to_page(&self, addr: PhysAddr) -> PageFrame {
        assert!(addr.is_page_aligned(), "address {} is not page aligned", addr);
        assert!(
            self.contains(addr),
            "address {} is outside of {}..{}",
            addr,
            self.base,
            self.end()
        );
        PageFrame((addr - self.base) / PAGE_SIZE)
    }

    /// Calculate the address of the buddy of the `order` block at `page`.
    ///
    /// The addresses of two buddies differ in exactly one bit, the bit
    /// that corresponds to the size of the block.
    pub fn buddy_address(&self, page: PageFrame, order: usize) -> PhysAddr {
        PhysAddr(self.page_to_physaddr(page).0 ^ size_for_order(order))
    }

    /// Return the buddy of the `order` block at `page`, if the whole buddy
    /// lies inside the managed range.
    pub fn buddy_of(&self, page: PageFrame, order: usize) -> Option<PageFrame> {
        let buddy = self.buddy_address(page, order);
        let fits = buddy >= self.base
            && buddy
                .0
                .checked_add(size_for_order(order))
                .map_or(false, |end| end <= self.end().0);

        if fits {
            Some(self.physaddr_to_page(buddy))
        } else {
            None
        }
    }
}

/// Describes how the kernel reaches physical memory.
///
/// Physical address `pa` is accessible at virtual address `pa + offset`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirectMap {
    offset: usize,
}

impl DirectMap {
    /// Create a direct map where every physical address is mapped at `pa + offset`.
    ///
    /// # Safety
    ///
    /// All memory handed to the allocator must be readable and writable
    /// through this mapping for as long as the allocator is in use.
    pub const unsafe fn new(offset: usize) -> Self {
        Self { offset }
    }

    /// Create a direct map for identity mapped physical memory.
    ///
    /// # Safety
    ///
    /// See [`DirectMap::new`].
    pub const unsafe fn identity() -> Self {
        Self { offset: 0 }
    }

    /// Return the virtual address where `addr` can be accessed.
    pub fn phys_to_virt(&self, addr: PhysAddr) -> *mut u8 {
        addr.0.wrapping_add(self.offset) as *mut u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map() -> FrameMap {
        FrameMap::new(PhysAddr(0x8000_0000), 16)
    }

    #[test]
    fn translation_round_trips() {
        let map = map();

        for idx in 0..map.npages() {
            let page = PageFrame(idx);
            let addr = map.page_to_physaddr(page);
            assert_eq!(addr, PhysAddr(0x8000_0000 + idx * PAGE_SIZE));
            assert_eq!(map.physaddr_to_page(addr), page);
        }
    }

    #[test]
    fn buddy_address_flips_one_bit() {
        let map = map();

        assert_eq!(map.buddy_address(PageFrame(0), 0), PhysAddr(0x8000_1000));
        assert_eq!(map.buddy_address(PageFrame(1), 0), PhysAddr(0x8000_0000));
        assert_eq!(map.buddy_address(PageFrame(4), 2), PhysAddr(0x8000_0000));
        assert_eq!(map.buddy_address(PageFrame(8), 3), PhysAddr(0x8000_0000));

        assert_eq!(map.buddy_of(PageFrame(6), 1), Some(PageFrame(4)));
        assert_eq!(map.buddy_of(PageFrame(0), 3), Some(PageFrame(8)));
    }

    #[test]
    fn buddy_outside_of_range() {
        let map = map();

        // the order 4 buddy of the whole range starts right behind it
        assert_eq!(map.buddy_of(PageFrame(0), 4), None);

        let map = FrameMap::new(PhysAddr(0x8000_1000), 3);
        // page 0 is at pfn 0x80001, its order 0 buddy is pfn 0x80000
        assert_eq!(map.buddy_of(PageFrame(0), 0), None);
        assert_eq!(map.buddy_of(PageFrame(1), 0), Some(PageFrame(2)));
    }

    #[test]
    #[should_panic(expected = "not page aligned")]
    fn unaligned_address_panics() {
        map().physaddr_to_page(PhysAddr(0x8000_0010));
    }

    #[test]
    #[should_panic(expected = "outside of")]
    fn address_out_of_range_panics() {
        map().physaddr_to_page(PhysAddr(0x8001_0000));
    }

    #[test]
    #[should_panic(expected = "outside of the descriptor table")]
    fn page_out_of_range_panics() {
        map().page_to_physaddr(PageFrame(16));
    }
}
