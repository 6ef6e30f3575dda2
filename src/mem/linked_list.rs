//! Doubly linked free lists that live inside the descriptor table.
//!
//! The nodes of a [`FreeList`] are the [`Link`](super::Link)s embedded in
//! every [`Page`], addressed by their index in the table. Every operation
//! therefore takes the table as an argument.

use super::{Link, Page, PageFrame};

/// A list of free blocks that all have the same order.
#[derive(Debug, Clone, Copy)]
pub struct FreeList {
    head: Option<PageFrame>,
    len: usize,
    order: u8,
}

impl FreeList {
    /// Create a new, empty list for blocks of the given order.
    pub const fn new(order: u8) -> Self {
        Self {
            head: None,
            len: 0,
            order,
        }
    }

    /// The order of the blocks inside this list.
    pub fn order(&self) -> usize {
        usize::from(self.order)
    }

    /// Returns whether this list is empty.
    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    /// The number of blocks inside this list.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Push the given page to the front of this list.
    ///
    /// # Panics
    ///
    /// Panics if the page is already part of a list.
    pub fn push(&mut self, pages: &mut [Page], page: PageFrame) {
        let link = &mut pages[page.0].link;
        assert!(
            link.list.is_none(),
            "page {} is already linked into free list {:?}",
            page.0,
            link.list
        );

        link.list = Some(self.order);
        link.prev = None;
        link.next = self.head;

        if let Some(head) = self.head {
            pages[head.0].link.prev = Some(page);
        }

        self.head = Some(page);
        self.len += 1;
    }

    /// Unlink the given page from this list.
    ///
    /// # Panics
    ///
    /// Panics if the page is not part of this list.
    pub fn remove(&mut self, pages: &mut [Page], page: PageFrame) {
        let link = pages[page.0].link;
        assert_eq!(
            link.list,
            Some(self.order),
            "page {} is not linked into free list {}",
            page.0,
            self.order
        );

        match link.prev {
            Some(prev) => pages[prev.0].link.next = link.next,
            None => self.head = link.next,
        }

        if let Some(next) = link.next {
            pages[next.0].link.prev = link.prev;
        }

        pages[page.0].link = Link::UNLINKED;
        self.len -= 1;
    }

    /// Remove the first page of this list.
    pub fn pop(&mut self, pages: &mut [Page]) -> Option<PageFrame> {
        let head = self.head?;
        self.remove(pages, head);
        Some(head)
    }

    /// Returns an iterator over the pages of this list.
    pub fn iter<'list>(&self, pages: &'list [Page]) -> Iter<'list> {
        Iter {
            pages,
            next: self.head,
        }
    }
}

/// Iterator over the pages of a [`FreeList`].
pub struct Iter<'list> {
    pages: &'list [Page],
    next: Option<PageFrame>,
}

impl Iterator for Iter<'_> {
    type Item = PageFrame;

    fn next(&mut self) -> Option<Self::Item> {
        let item = self.next?;
        self.next = self.pages[item.0].link.next;
        Some(item)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(list: &FreeList, pages: &[Page]) -> Vec<usize> {
        list.iter(pages).map(PageFrame::index).collect()
    }

    #[test]
    fn push_pop() {
        let mut pages = vec![Page::RESERVED; 4];
        let mut list = FreeList::new(0);
        assert!(list.is_empty());

        list.push(&mut pages, PageFrame(0));
        list.push(&mut pages, PageFrame(2));
        list.push(&mut pages, PageFrame(3));
        assert_eq!(list.len(), 3);
        assert_eq!(collect(&list, &pages), [3, 2, 0]);
        assert_eq!(pages[2].link().list(), Some(0));

        assert_eq!(list.pop(&mut pages), Some(PageFrame(3)));
        assert_eq!(list.pop(&mut pages), Some(PageFrame(2)));
        assert_eq!(list.pop(&mut pages), Some(PageFrame(0)));
        assert_eq!(list.pop(&mut pages), None);
        assert!(list.is_empty());
        assert!(pages.iter().all(|page| *page.link() == Link::UNLINKED));
    }

    #[test]
    fn remove_from_middle_and_ends() {
        let mut pages = vec![Page::RESERVED; 5];
        let mut list = FreeList::new(2);
        (0..5).for_each(|idx| list.push(&mut pages, PageFrame(idx)));

        list.remove(&mut pages, PageFrame(2));
        assert_eq!(collect(&list, &pages), [4, 3, 1, 0]);

        list.remove(&mut pages, PageFrame(4));
        assert_eq!(collect(&list, &pages), [3, 1, 0]);

        list.remove(&mut pages, PageFrame(0));
        assert_eq!(collect(&list, &pages), [3, 1]);
        assert_eq!(list.len(), 2);

        // removed pages can be pushed again
        list.push(&mut pages, PageFrame(2));
        assert_eq!(collect(&list, &pages), [2, 3, 1]);
    }

    #[test]
    #[should_panic(expected = "already linked")]
    fn double_push_panics() {
        let mut pages = vec![Page::RESERVED; 2];
        let mut first = FreeList::new(0);
        let mut second = FreeList::new(1);

        first.push(&mut pages, PageFrame(1));
        second.push(&mut pages, PageFrame(1));
    }

    #[test]
    #[should_panic(expected = "not linked into free list")]
    fn remove_from_wrong_list_panics() {
        let mut pages = vec![Page::RESERVED; 2];
        let mut first = FreeList::new(0);
        let mut second = FreeList::new(1);

        first.push(&mut pages, PageFrame(0));
        second.remove(&mut pages, PageFrame(0));
    }
}
