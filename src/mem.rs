//! Physical memory management.
//!
//! The central type is the [`BuddyAllocator`], which owns the page
//! descriptor table and one free list per order. [`LockedBuddy`] wraps it
//! behind a spinlock for use from multiple harts.

use crate::unit::{self, KIB};
use core::{cmp, fmt};

pub mod addr;
pub use addr::{DirectMap, FrameMap, PageFrame, PhysAddr};

mod page;
pub use page::{Link, Page, PageFlags};

mod linked_list;
pub use linked_list::{FreeList, Iter};

pub mod rangeset;
pub use rangeset::{Range, RangeSet};

mod region;
pub use region::{MemoryRegion, RegionKind};

pub mod buddy;
pub use buddy::BuddyAllocator;

pub mod alloc;
pub use self::alloc::{AllocFlags, Error, LockedBuddy, Result};

/// The size of a single page of physical memory.
///
/// This is also the size of an order `0` block.
pub const PAGE_SIZE: usize = 4 * KIB;

/// The largest order a block can have (inclusive).
///
/// An order `9` block is exactly one 2MiB huge page.
pub const MAX_ORDER: usize = 9;

/// The number of free lists, one for every order `0..=MAX_ORDER`.
pub const ORDER_COUNT: usize = MAX_ORDER + 1;

/// The order that is used for a single base page.
pub const BASE_ORDER: usize = 0;

/// The order that is used for a huge page.
pub const HUGE_ORDER: usize = 9;

/// Calculates the size in bytes of a block with the given order.
pub const fn size_for_order(order: usize) -> usize {
    PAGE_SIZE << order
}

/// Calculates the smallest order whose blocks can hold `size` bytes.
///
/// This function may return an order that is larger than [`MAX_ORDER`].
pub fn order_for_size(size: usize) -> usize {
    let size = cmp::max(size, PAGE_SIZE);
    let pages = size.next_power_of_two() / PAGE_SIZE;
    pages.trailing_zeros() as usize
}

/// Calculates the smallest order whose blocks can hold `count` pages.
pub fn order_for_pages(count: usize) -> usize {
    cmp::max(count, 1).next_power_of_two().trailing_zeros() as usize
}

/// Statistics for a physical memory allocator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocStats {
    /// The name of the allocator that collected these stats.
    pub name: &'static str,
    /// The number of bytes that are currently handed out.
    pub allocated: usize,
    /// The number of bytes that are left for allocation.
    pub free: usize,
    /// The total number of bytes that this allocator manages.
    pub total: usize,
}

impl AllocStats {
    /// Create a new [`AllocStats`] instance for the given allocator name.
    pub const fn with_name(name: &'static str) -> Self {
        Self {
            name,
            allocated: 0,
            free: 0,
            total: 0,
        }
    }
}

impl fmt::Display for AllocStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.name)?;
        self.name.chars().try_for_each(|_| write!(f, "~"))?;
        writeln!(f, "\nAllocated: {}", unit::bytes(self.allocated))?;
        writeln!(f, "Free: {}", unit::bytes(self.free))?;
        writeln!(f, "Total: {}", unit::bytes(self.total))?;
        self.name.chars().try_for_each(|_| write!(f, "~"))?;
        writeln!(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_sizes() {
        assert_eq!(size_for_order(0), PAGE_SIZE);
        assert_eq!(size_for_order(HUGE_ORDER), 2 * crate::unit::MIB);

        assert_eq!(order_for_size(1), 0);
        assert_eq!(order_for_size(PAGE_SIZE), 0);
        assert_eq!(order_for_size(PAGE_SIZE + 1), 1);
        assert_eq!(order_for_size(5 * PAGE_SIZE), 3);

        assert_eq!(order_for_pages(0), 0);
        assert_eq!(order_for_pages(1), 0);
        assert_eq!(order_for_pages(2), 1);
        assert_eq!(order_for_pages(3), 2);
        assert_eq!(order_for_pages(512), HUGE_ORDER);
    }

    #[test]
    fn display_stats() {
        let stats = AllocStats {
            name: "Test",
            allocated: 4 * KIB,
            free: 8 * KIB,
            total: 12 * KIB,
        };

        let out = stats.to_string();
        assert!(out.starts_with("Test\n~~~~\n"));
        assert!(out.contains("Allocated: 4.00 KiB"));
        assert!(out.contains("Free: 8.00 KiB"));
        assert!(out.contains("Total: 12.00 KiB"));
    }
}
