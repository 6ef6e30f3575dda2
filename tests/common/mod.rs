//! Test fixture that backs "physical memory" with a heap buffer.

#![allow(dead_code)]

use buddy_pmem::mem::{BuddyAllocator, DirectMap, Page, PageFrame, PhysAddr, Range, PAGE_SIZE};

/// The physical address of the first page in every fixture.
///
/// Aligned far beyond the largest block, so the page frame numbers
/// inside the fixture have the same alignment as their indices.
pub const BASE: PhysAddr = PhysAddr(0x4000_0000);

/// The byte every page is filled with before the allocator sees it.
pub const POISON: u8 = 0xAA;

/// Create an allocator for `npages` pages where every page is still reserved.
///
/// The descriptor table and the memory are leaked, so the allocator
/// can live for `'static`.
pub fn allocator(npages: usize) -> BuddyAllocator<'static> {
    let pages: &'static mut [Page] = Box::leak(vec![Page::default(); npages].into_boxed_slice());
    let memory: &'static mut [u8] =
        Box::leak(vec![POISON; npages * PAGE_SIZE].into_boxed_slice());

    let offset = (memory.as_mut_ptr() as usize).wrapping_sub(BASE.as_usize());
    // SAFETY
    // The leaked buffer covers exactly the managed physical range.
    let direct_map = unsafe { DirectMap::new(offset) };
    BuddyAllocator::new(pages, BASE, direct_map)
}

/// Create an allocator for `npages` pages that are all free.
pub fn seeded(npages: usize) -> BuddyAllocator<'static> {
    let mut alloc = allocator(npages);
    alloc.add_range(pages(0, npages)).unwrap();
    alloc
}

/// The physical range that covers the pages `start..end` of a fixture.
pub fn pages(start: usize, end: usize) -> Range {
    Range::new(BASE + start * PAGE_SIZE, BASE + end * PAGE_SIZE)
}

/// Return the bytes of the block at `page` with the given order.
pub fn block_bytes<'a>(alloc: &'a BuddyAllocator<'_>, page: PageFrame, order: usize) -> &'a [u8] {
    let len = PAGE_SIZE << order;
    // SAFETY
    // The pointer lies inside the leaked buffer of the fixture.
    unsafe { core::slice::from_raw_parts(alloc.page_to_virt(page), len) }
}

/// The number of free blocks for every order.
pub fn occupancy(alloc: &BuddyAllocator<'_>) -> Vec<usize> {
    (0..buddy_pmem::mem::ORDER_COUNT)
        .map(|order| alloc.free_blocks(order))
        .collect()
}

/// A tiny xorshift generator, so the interleavings are reproducible.
pub struct XorShift(u64);

impl XorShift {
    pub fn new(seed: u64) -> Self {
        Self(seed | 1)
    }

    pub fn next(&mut self) -> u64 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.0 = x;
        x
    }

    pub fn below(&mut self, bound: usize) -> usize {
        (self.next() % bound as u64) as usize
    }
}
