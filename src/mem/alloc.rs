//! Allocation flags, errors and the lock around the buddy allocator.

use super::{AllocStats, BuddyAllocator, PageFrame, PhysAddr};
use bitflags::bitflags;
use displaydoc_lite::displaydoc;
use spin::{Mutex, MutexGuard, Once};

/// Result for every memory allocation operation.
pub type Result<T, E = Error> = core::result::Result<T, E>;

displaydoc! {
    /// Any error that can happen while allocating memory or
    /// while handing memory to the allocator.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum Error {
        /// tried to allocate, but there was no free block of the requested order left.
        NoMemoryAvailable,
        /// a memory region does not start or end at a page boundary.
        UnalignedRegion,
        /// a memory region is not covered by the page descriptor table.
        RegionOutOfRange,
        /// a memory region overlaps memory that was already handed to the allocator.
        RegionOverlap,
        /// the end of a memory region lies before its start.
        InvalidRange,
        /// the memory map is split into too many ranges.
        TooManyRanges,
    }
}

bitflags! {
    /// Flags that change the behaviour of an allocation.
    pub struct AllocFlags: u32 {
        /// Fill the whole block with zeroes before returning it.
        const ZERO = 1 << 0;
        /// Allocate a huge page instead of a single page.
        const HUGE = 1 << 1;
    }
}

/// A [`BuddyAllocator`] behind a spinlock.
///
/// Every operation takes the one lock that guards all free lists and
/// the whole descriptor table.
pub struct LockedBuddy<'a>(Mutex<BuddyAllocator<'a>>);

impl<'a> LockedBuddy<'a> {
    /// Put the given allocator behind a lock.
    pub fn new(inner: BuddyAllocator<'a>) -> Self {
        Self(Mutex::new(inner))
    }

    /// Lock the allocator, to do multiple operations at once.
    pub fn lock(&self) -> MutexGuard<'_, BuddyAllocator<'a>> {
        self.0.lock()
    }

    /// Allocate a single page, or a huge page if [`AllocFlags::HUGE`] is set.
    pub fn alloc(&self, flags: AllocFlags) -> Result<PageFrame> {
        self.0.lock().alloc(flags)
    }

    /// Allocate a block that can hold at least `count` pages.
    pub fn alloc_pages(&self, count: usize, flags: AllocFlags) -> Result<PageFrame> {
        self.0.lock().alloc_pages(count, flags)
    }

    /// Allocate a block with the given order.
    pub fn alloc_order(&self, order: usize, flags: AllocFlags) -> Result<PageFrame> {
        self.0.lock().alloc_order(order, flags)
    }

    /// Increment the reference count of the block at `page`.
    pub fn incref(&self, page: PageFrame) {
        self.0.lock().incref(page)
    }

    /// Decrement the reference count of the block at `page`, and free
    /// the block if no references are left.
    pub fn decref(&self, page: PageFrame) {
        self.0.lock().decref(page)
    }

    /// The reference count of the block at `page`.
    pub fn ref_count(&self, page: PageFrame) -> u32 {
        self.0.lock().ref_count(page)
    }

    /// Return the physical address of the given page.
    pub fn page_to_physaddr(&self, page: PageFrame) -> PhysAddr {
        self.0.lock().page_to_physaddr(page)
    }

    /// Return the descriptor for the page at the given physical address.
    pub fn physaddr_to_page(&self, addr: PhysAddr) -> PageFrame {
        self.0.lock().physaddr_to_page(addr)
    }

    /// The number of free blocks with the given order.
    pub fn free_blocks(&self, order: usize) -> usize {
        self.0.lock().free_blocks(order)
    }

    /// Return the statistics for this allocator.
    pub fn stats(&self) -> AllocStats {
        self.0.lock().stats()
    }
}

static PHYS_MEM_ALLOCATOR: Once<LockedBuddy<'static>> = Once::new();

/// Install the allocator for physical memory that is used by the whole kernel.
///
/// # Panics
///
/// Panics if the global allocator was already installed.
pub fn init_global(inner: BuddyAllocator<'static>) -> &'static LockedBuddy<'static> {
    let mut installed = false;
    let allocator = PHYS_MEM_ALLOCATOR.call_once(|| {
        installed = true;
        LockedBuddy::new(inner)
    });

    assert!(installed, "the physical memory allocator is already initialized");
    allocator
}

/// Return a reference to the global allocator for physical memory.
///
/// # Panics
///
/// Panics if [`init_global`] was not called yet.
pub fn allocator() -> &'static LockedBuddy<'static> {
    PHYS_MEM_ALLOCATOR
        .get()
        .expect("the physical memory allocator is not initialized")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mem::{DirectMap, Page, Range, PAGE_SIZE};

    #[test]
    fn error_messages() {
        assert!(Error::NoMemoryAvailable
            .to_string()
            .contains("no free block of the requested order"));
        assert!(Error::TooManyRanges
            .to_string()
            .contains("too many ranges"));
    }

    #[test]
    fn global_allocator() {
        let pages: &'static mut [Page] = Box::leak(vec![Page::RESERVED; 4].into_boxed_slice());
        let base = PhysAddr(0x8000_0000);
        let mut inner = BuddyAllocator::new(pages, base, unsafe { DirectMap::identity() });
        inner
            .add_range(Range::new(base, base + 4 * PAGE_SIZE))
            .unwrap();

        let global = init_global(inner);
        assert!(core::ptr::eq(global, allocator()));

        let page = allocator().alloc(AllocFlags::empty()).unwrap();
        allocator().incref(page);
        assert_eq!(allocator().ref_count(page), 1);
        assert_eq!(allocator().page_to_physaddr(page), base);
        assert_eq!(allocator().physaddr_to_page(base), page);
        assert_eq!(allocator().stats().allocated, PAGE_SIZE);

        allocator().decref(page);
        assert_eq!(allocator().free_blocks(2), 1);
        allocator().lock().check_invariants();

        let again = std::panic::catch_unwind(|| {
            let pages: &'static mut [Page] = Box::leak(vec![Page::RESERVED; 1].into_boxed_slice());
            init_global(BuddyAllocator::new(pages, base, unsafe { DirectMap::identity() }));
        });
        assert!(again.is_err());
    }
}
