//! Implementation of a Buddy Allocator that is responsible for handing out
//! physically contiguous blocks of pages.
//!
//! Every block of order `k` spans `2^k` pages and starts at a page frame
//! number that is a multiple of `2^k`. The state of a block is stored in
//! the descriptor of its first page (the head), and every free block is
//! linked into exactly one [`FreeList`], the one for its order.

use super::{
    order_for_pages, size_for_order, AllocFlags, AllocStats, DirectMap, Error, FrameMap, FreeList,
    MemoryRegion, Page, PageFlags, PageFrame, PhysAddr, Range, RangeSet, Result, BASE_ORDER,
    HUGE_ORDER, MAX_ORDER, ORDER_COUNT, PAGE_SIZE,
};
use crate::unit;
use core::{cmp, ptr};
use log::{debug, info, trace};

/// Return the largest order whose blocks fit into `count` pages.
fn prev_order(count: usize) -> usize {
    (usize::BITS - 1 - count.leading_zeros()) as usize
}

/// The central structure that is responsible for allocating
/// physical memory using the buddy allocation algorithm.
pub struct BuddyAllocator<'a> {
    pages: &'a mut [Page],
    map: FrameMap,
    direct_map: DirectMap,
    free_lists: [FreeList; ORDER_COUNT],
    stats: AllocStats,
}

impl<'a> BuddyAllocator<'a> {
    /// Create a new allocator that manages one page for every descriptor
    /// in `pages`, where `pages[0]` describes the page at `base`.
    ///
    /// Every page starts out reserved. Memory has to be made available using
    /// [`add_range`](Self::add_range) or
    /// [`init_from_memory_map`](Self::init_from_memory_map).
    ///
    /// # Panics
    ///
    /// Panics if `base` is not page aligned.
    pub fn new(pages: &'a mut [Page], base: PhysAddr, direct_map: DirectMap) -> Self {
        let map = FrameMap::new(base, pages.len());
        pages.iter_mut().for_each(|page| *page = Page::RESERVED);

        let mut free_lists = [FreeList::new(0); ORDER_COUNT];
        for (order, list) in free_lists.iter_mut().enumerate() {
            *list = FreeList::new(order as u8);
        }

        Self {
            pages,
            map,
            direct_map,
            free_lists,
            stats: AllocStats::with_name("Buddy Allocator"),
        }
    }

    /// Make all memory that is marked as free inside the memory map
    /// available for allocation.
    ///
    /// Regions of any other kind take precedence, so a free region that
    /// overlaps a reserved one only contributes the pages outside of it.
    ///
    /// Returns the total number of bytes that were added.
    pub fn init_from_memory_map(&mut self, regions: &[MemoryRegion]) -> Result<usize> {
        let mut usable = RangeSet::new();

        regions
            .iter()
            .filter(|region| region.is_free())
            .try_for_each(|region| usable.insert(region.range()))?;

        regions
            .iter()
            .filter(|region| !region.is_free())
            .try_for_each(|region| usable.remove(region.range()))?;

        let mut total = 0;
        for &range in usable.iter() {
            total += self.add_range(range)?;
        }

        info!(
            "Buddy allocator manages {} of {} pages ({} free)",
            total / PAGE_SIZE,
            self.map.npages(),
            unit::bytes(self.stats.free)
        );

        Ok(total)
    }

    /// Make a single range of physical memory available for allocation.
    ///
    /// The range is split into the largest blocks that are aligned to their
    /// own size, and every block is merged with its buddy if possible, so
    /// adjacent ranges end up in the same large blocks.
    ///
    /// Returns the number of bytes that were added.
    pub fn add_range(&mut self, range: Range) -> Result<usize> {
        if range.start > range.end {
            return Err(Error::InvalidRange);
        }
        if !range.start.is_page_aligned() || !range.end.is_page_aligned() {
            return Err(Error::UnalignedRegion);
        }
        if range.is_empty() {
            return Ok(0);
        }
        if range.start < self.map.base() || range.end > self.map.end() {
            return Err(Error::RegionOutOfRange);
        }

        let first = self.map.physaddr_to_page(range.start).0;
        let count = range.len() / PAGE_SIZE;
        let pages = &mut self.pages[first..first + count];
        if pages.iter().any(|page| !page.is_reserved()) {
            return Err(Error::RegionOverlap);
        }
        pages.iter_mut().for_each(|page| page.flags = PageFlags::empty());

        debug!(
            "Making region {}..{} available for allocation",
            range.start, range.end
        );

        let mut addr = range.start;
        while addr < range.end {
            let remaining = (range.end - addr) / PAGE_SIZE;
            let align = addr.pfn().trailing_zeros() as usize;
            let order = cmp::min(cmp::min(align, prev_order(remaining)), MAX_ORDER);

            debug!("Adding block at {} with order {}", addr, order);

            let head = self.map.physaddr_to_page(addr);
            let page = &mut self.pages[head.0];
            page.order = order as u8;
            page.flags = PageFlags::HEAD;
            self.merge(head);

            addr = addr + size_for_order(order);
        }

        let bytes = range.len();
        self.stats.total += bytes;
        self.stats.free += bytes;

        info!(
            "Made {} available for physical memory allocation",
            unit::bytes(bytes)
        );

        Ok(bytes)
    }

    /// Split the block at `page` until it has the order `target`.
    ///
    /// The upper half of every split is marked free and published in the free
    /// list of its new order. The returned block is the lower half of the last
    /// split and is not part of any free list.
    ///
    /// # Panics
    ///
    /// Panics if the block is not larger than `target`, or if it is still
    /// linked into a free list.
    pub fn split(&mut self, page: PageFrame, target: usize) -> PageFrame {
        let head = &mut self.pages[page.0];
        assert!(
            head.order() > target,
            "can not split order {} block at {} into order {}",
            head.order(),
            page.0,
            target
        );
        assert!(
            head.link.list.is_none(),
            "block at {} must be removed from its free list before splitting",
            page.0
        );
        head.flags.remove(PageFlags::FREE);

        while self.pages[page.0].order() > target {
            let order = self.pages[page.0].order() - 1;
            let buddy = self
                .map
                .buddy_of(page, order)
                .expect("the upper half of a block is always inside the table");

            trace!(
                "Splitting block at {} into two order {} blocks (buddy at {})",
                page.0,
                order,
                buddy.0
            );

            self.pages[page.0].order = order as u8;

            let upper = &mut self.pages[buddy.0];
            upper.order = order as u8;
            upper.flags = PageFlags::FREE | PageFlags::HEAD;
            self.free_lists[order].push(self.pages, buddy);
        }

        page
    }

    /// Merge the block at `page` with its buddy, as long as the buddy is free
    /// and has the same order, and insert the resulting block into the free
    /// list of its final order.
    ///
    /// The merged block always starts at the lower of the two addresses.
    ///
    /// # Panics
    ///
    /// Panics if `page` is not the head of an unreferenced block that
    /// is not part of a free list.
    pub fn merge(&mut self, page: PageFrame) -> PageFrame {
        let head = &self.pages[page.0];
        assert!(
            head.is_head() && !head.is_reserved(),
            "page {} is not the head of a block",
            page.0
        );
        assert!(
            !head.is_free() && head.link.list.is_none(),
            "block at {} is already free",
            page.0
        );
        assert_eq!(
            head.ref_count, 0,
            "block at {} is still referenced",
            page.0
        );

        let mut block = page;
        let mut order = head.order();

        while order < MAX_ORDER {
            let buddy = match self.map.buddy_of(block, order) {
                Some(buddy) => buddy,
                None => break,
            };

            let other = &self.pages[buddy.0];
            if !other.is_free() || other.order() != order {
                break;
            }

            trace!(
                "Merging order {} blocks at {} and {}",
                order,
                block.0,
                buddy.0
            );

            self.free_lists[order].remove(self.pages, buddy);

            let (lower, upper) = (cmp::min(block, buddy), cmp::max(block, buddy));
            self.pages[upper.0].flags = PageFlags::empty();
            self.pages[upper.0].order = 0;

            block = lower;
            order += 1;
            self.pages[block.0].order = order as u8;
        }

        let head = &mut self.pages[block.0];
        head.order = order as u8;
        head.flags = PageFlags::FREE | PageFlags::HEAD;
        self.free_lists[order].push(self.pages, block);

        block
    }

    /// Find a free block with at least the given order.
    ///
    /// The free lists are searched from `order` upwards and the first block
    /// found is split down to `order` if it is larger.
    ///
    /// Returns `None` if no block of a sufficient order is free.
    ///
    /// # Panics
    ///
    /// Panics if `order` is larger than [`MAX_ORDER`].
    pub fn find_block(&mut self, order: usize) -> Option<PageFrame> {
        assert!(
            order <= MAX_ORDER,
            "requested order {} exceeds the maximum order {}",
            order,
            MAX_ORDER
        );

        for current in order..ORDER_COUNT {
            if let Some(page) = self.free_lists[current].pop(self.pages) {
                self.pages[page.0].flags.remove(PageFlags::FREE);

                if current > order {
                    return Some(self.split(page, order));
                }
                return Some(page);
            }
        }

        None
    }

    /// Allocate a single page, or a huge page if [`AllocFlags::HUGE`] is set.
    ///
    /// The reference count of the returned page is not touched, initializing
    /// it is the responsibility of the caller.
    pub fn alloc(&mut self, flags: AllocFlags) -> Result<PageFrame> {
        let order = if flags.contains(AllocFlags::HUGE) {
            HUGE_ORDER
        } else {
            BASE_ORDER
        };

        self.alloc_order(order, flags)
    }

    /// Allocate a block that can hold at least `count` pages.
    ///
    /// # Panics
    ///
    /// Panics if `count` is zero or larger than the biggest block.
    pub fn alloc_pages(&mut self, count: usize, flags: AllocFlags) -> Result<PageFrame> {
        assert!(count > 0, "tried to allocate zero pages");
        self.alloc_order(order_for_pages(count), flags)
    }

    /// Allocate a block with the given order.
    ///
    /// If [`AllocFlags::ZERO`] is set, the whole block is filled with zeroes.
    ///
    /// # Panics
    ///
    /// Panics if `order` is larger than [`MAX_ORDER`].
    pub fn alloc_order(&mut self, order: usize, flags: AllocFlags) -> Result<PageFrame> {
        let page = match self.find_block(order) {
            Some(page) => page,
            None => {
                debug!("No free block for an order {} allocation", order);
                return Err(Error::NoMemoryAvailable);
            }
        };
        debug_assert_eq!(self.pages[page.0].ref_count, 0);

        let size = size_for_order(order);
        self.stats.free -= size;
        self.stats.allocated += size;

        if flags.contains(AllocFlags::ZERO) {
            // SAFETY
            // The creator of the direct map guarantees that all managed
            // memory is writable through it, and the block is ours now.
            unsafe { ptr::write_bytes(self.page_to_virt(page), 0, size) };
        }

        Ok(page)
    }

    /// Return the block at `page` to the allocator.
    ///
    /// Must only be called once the reference count of the block dropped to
    /// zero. The block is merged with its free buddies.
    ///
    /// # Panics
    ///
    /// Panics if `page` is not the head of an allocated, unreferenced block.
    pub fn release(&mut self, page: PageFrame) {
        let head = &self.pages[page.0];
        assert!(
            !head.is_free(),
            "tried to release block at {} which is already free",
            page.0
        );

        let size = size_for_order(head.order());
        self.merge(page);

        self.stats.allocated -= size;
        self.stats.free += size;
    }

    /// Increment the reference count of the block at `page`.
    ///
    /// # Panics
    ///
    /// Panics if `page` is not the head of an allocated block.
    pub fn incref(&mut self, page: PageFrame) {
        let head = &mut self.pages[page.0];
        assert!(
            head.is_head() && !head.is_free() && !head.is_reserved(),
            "tried to reference page {} which is not an allocated block",
            page.0
        );
        head.ref_count += 1;
    }

    /// Decrement the reference count of the block at `page`, and
    /// [release](Self::release) it once no references are left.
    ///
    /// # Panics
    ///
    /// Panics if the block has no references.
    pub fn decref(&mut self, page: PageFrame) {
        let head = &mut self.pages[page.0];
        assert!(
            head.ref_count > 0,
            "tried to drop a reference to page {} which is not referenced",
            page.0
        );

        head.ref_count -= 1;
        if head.ref_count == 0 {
            self.release(page);
        }
    }

    /// The reference count of the block at `page`.
    pub fn ref_count(&self, page: PageFrame) -> u32 {
        self.pages[page.0].ref_count
    }

    /// Return the descriptor of the given page.
    pub fn page(&self, page: PageFrame) -> &Page {
        &self.pages[page.0]
    }

    /// Return the whole descriptor table.
    pub fn pages(&self) -> &[Page] {
        &*self.pages
    }

    /// The number of pages described by the descriptor table.
    pub fn npages(&self) -> usize {
        self.map.npages()
    }

    /// The mapping between descriptors and physical addresses.
    pub fn frame_map(&self) -> &FrameMap {
        &self.map
    }

    /// Return the physical address of the given page.
    pub fn page_to_physaddr(&self, page: PageFrame) -> PhysAddr {
        self.map.page_to_physaddr(page)
    }

    /// Return the descriptor for the page at the given physical address.
    pub fn physaddr_to_page(&self, addr: PhysAddr) -> PageFrame {
        self.map.physaddr_to_page(addr)
    }

    /// Return a pointer to the memory of the given page inside the direct map.
    pub fn page_to_virt(&self, page: PageFrame) -> *mut u8 {
        self.direct_map.phys_to_virt(self.page_to_physaddr(page))
    }

    /// The number of free blocks with the given order.
    pub fn free_blocks(&self, order: usize) -> usize {
        self.free_lists.get(order).map_or(0, FreeList::len)
    }

    /// The total number of free pages.
    pub fn free_pages(&self) -> usize {
        self.free_lists
            .iter()
            .map(|list| list.len() << list.order())
            .sum()
    }

    /// Return a copy of the statistics for this allocator.
    pub fn stats(&self) -> AllocStats {
        self.stats.clone()
    }

    /// Verify the consistency of the free lists and the descriptor table.
    ///
    /// # Panics
    ///
    /// Panics if any invariant of the allocator is violated.
    pub fn check_invariants(&self) {
        let mut free_pages = 0;
        for (order, list) in self.free_lists.iter().enumerate() {
            let mut count = 0;
            for page in list.iter(&*self.pages) {
                let head = &self.pages[page.0];
                assert!(
                    head.is_free() && head.is_head(),
                    "page {} in free list {} is not a free block",
                    page.0,
                    order
                );
                assert_eq!(
                    head.order(),
                    order,
                    "page {} has the wrong order for its free list",
                    page.0
                );

                count += 1;
                assert!(count <= list.len(), "free list {} contains a cycle", order);
            }

            assert_eq!(count, list.len(), "free list {} has a wrong length", order);
            free_pages += count << order;
        }

        let mut allocated_pages = 0;
        let mut reserved_pages = 0;
        let mut idx = 0;
        while idx < self.pages.len() {
            let head = &self.pages[idx];
            if head.is_reserved() {
                assert_eq!(
                    head.flags,
                    PageFlags::RESERVED,
                    "page {} is reserved and in use",
                    idx
                );
                reserved_pages += 1;
                idx += 1;
                continue;
            }

            assert!(head.is_head(), "page {} is not part of any block", idx);

            let size = 1 << head.order();
            let pfn = self.map.page_to_physaddr(PageFrame(idx)).pfn();
            assert_eq!(pfn % size, 0, "block at {} is not aligned to its order", idx);
            assert!(
                idx + size <= self.pages.len(),
                "block at {} exceeds the descriptor table",
                idx
            );

            if head.is_free() {
                assert_eq!(head.link.list(), Some(head.order()));
            } else {
                assert_eq!(head.link.list, None, "allocated block at {} is linked", idx);
                allocated_pages += size;
            }

            for inner in &self.pages[idx + 1..idx + size] {
                assert!(
                    inner.flags.is_empty() && inner.link.list.is_none(),
                    "block at {} overlaps another block",
                    idx
                );
            }

            idx += size;
        }

        assert_eq!(free_pages * PAGE_SIZE, self.stats.free);
        assert_eq!(allocated_pages * PAGE_SIZE, self.stats.allocated);
        assert_eq!(
            free_pages + allocated_pages + reserved_pages,
            self.pages.len(),
            "pages went missing"
        );
    }
}
