//! The per-page metadata.

use super::PageFrame;
use bitflags::bitflags;

bitflags! {
    /// State bits of a [`Page`] descriptor.
    pub struct PageFlags: u8 {
        /// The page is the head of a free block that is linked into a free list.
        const FREE = 1 << 0;
        /// The page is the first page of a block, either free or allocated.
        const HEAD = 1 << 1;
        /// The page was never made available to the allocator.
        const RESERVED = 1 << 2;
    }
}

/// The linkage of a page descriptor into one of the free lists.
///
/// The links are indices into the descriptor table instead of pointers,
/// and `list` records which order's list the page is currently part of.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Link {
    pub(super) prev: Option<PageFrame>,
    pub(super) next: Option<PageFrame>,
    pub(super) list: Option<u8>,
}

impl Link {
    /// A link that is not part of any list.
    pub const UNLINKED: Link = Link {
        prev: None,
        next: None,
        list: None,
    };

    /// The order of the free list this page is linked into.
    pub fn list(&self) -> Option<usize> {
        self.list.map(usize::from)
    }
}

/// Metadata for a single physical page.
///
/// Only the head page of a block carries meaningful `order` and free state,
/// the remaining pages of the block are not tracked individually.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub(super) order: u8,
    pub(super) flags: PageFlags,
    pub(super) ref_count: u32,
    pub(super) link: Link,
}

impl Page {
    /// A descriptor for a page that is not managed by the allocator.
    pub const RESERVED: Page = Page {
        order: 0,
        flags: PageFlags::RESERVED,
        ref_count: 0,
        link: Link::UNLINKED,
    };

    /// The order of the block this page is the head of.
    pub fn order(&self) -> usize {
        usize::from(self.order)
    }

    /// The state bits of this page.
    pub fn flags(&self) -> PageFlags {
        self.flags
    }

    /// Check if this page is the head of a free block.
    pub fn is_free(&self) -> bool {
        self.flags.contains(PageFlags::FREE)
    }

    /// Check if this page is the first page of a block.
    pub fn is_head(&self) -> bool {
        self.flags.contains(PageFlags::HEAD)
    }

    /// Check if this page is excluded from allocation.
    pub fn is_reserved(&self) -> bool {
        self.flags.contains(PageFlags::RESERVED)
    }

    /// The number of outstanding references to this page.
    pub fn ref_count(&self) -> u32 {
        self.ref_count
    }

    /// The free list linkage of this page.
    pub fn link(&self) -> &Link {
        &self.link
    }
}

impl Default for Page {
    fn default() -> Self {
        Page::RESERVED
    }
}
