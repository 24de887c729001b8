//! ## emnet-core::queue
//! **Intrusive FIFO threaded through an index arena**
//!
//! Every list in the stack (pool free lists, ARP pending slots, timer lists)
//! is a `Queue`. The queue itself only stores `head`, `tail` and `len`; the
//! forward link of each item lives inside the item (`Link`), which is reached
//! through a [`LinkArena`]. A queue never owns its items, it only threads the
//! items some other component owns.
//!
//! `Queue` is not synchronised. Queues that are mutated from completion
//! context are wrapped in [`crate::sync::Critical`] together with their arena.

use std::fmt;

/// Forward link embedded in every queueable item.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Link {
    next: Option<usize>,
    linked: bool,
}

impl Link {
    pub const fn new() -> Self {
        Self {
            next: None,
            linked: false,
        }
    }

    /// True while the owning item sits in some queue.
    #[inline]
    pub fn is_linked(&self) -> bool {
        self.linked
    }
}

/// Storage that hands out the embedded [`Link`] of an item by index.
pub trait LinkArena {
    fn link(&self, item: usize) -> &Link;
    fn link_mut(&mut self, item: usize) -> &mut Link;
}

impl LinkArena for [Link] {
    #[inline]
    fn link(&self, item: usize) -> &Link {
        &self[item]
    }

    #[inline]
    fn link_mut(&mut self, item: usize) -> &mut Link {
        &mut self[item]
    }
}

impl LinkArena for Vec<Link> {
    #[inline]
    fn link(&self, item: usize) -> &Link {
        &self[item]
    }

    #[inline]
    fn link_mut(&mut self, item: usize) -> &mut Link {
        &mut self[item]
    }
}

/// Singly-linked FIFO with O(1) `add` and `remove_first`.
#[derive(Default, Clone, PartialEq, Eq)]
pub struct Queue {
    head: Option<usize>,
    tail: Option<usize>,
    len: usize,
}

impl Queue {
    pub const fn new() -> Self {
        Self {
            head: None,
            tail: None,
            len: 0,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Appends `item` at the tail.
    ///
    /// # Panics
    ///
    /// If `item` is already linked into a queue.
    pub fn add<A: LinkArena + ?Sized>(&mut self, arena: &mut A, item: usize) {
        let link = arena.link_mut(item);
        assert!(!link.linked, "queue: item {item} is already linked");
        link.linked = true;
        link.next = None;

        match self.tail {
            Some(tail) => arena.link_mut(tail).next = Some(item),
            None => self.head = Some(item),
        }
        self.tail = Some(item);
        self.len += 1;
        self.check();
    }

    /// Returns the head without unlinking it.
    #[inline]
    pub fn peek_first(&self) -> Option<usize> {
        self.head
    }

    /// Unlinks and returns the head, or `None` when the queue is empty.
    pub fn try_remove_first<A: LinkArena + ?Sized>(&mut self, arena: &mut A) -> Option<usize> {
        let item = self.head?;
        let link = arena.link_mut(item);
        self.head = link.next.take();
        link.linked = false;
        if self.head.is_none() {
            self.tail = None;
        }
        self.len -= 1;
        self.check();
        Some(item)
    }

    /// Unlinks and returns the head of a queue the caller knows is non-empty.
    ///
    /// # Panics
    ///
    /// If the queue is empty.
    pub fn remove_first<A: LinkArena + ?Sized>(&mut self, arena: &mut A) -> usize {
        match self.try_remove_first(arena) {
            Some(item) => item,
            None => panic!("queue: remove_first on an empty queue"),
        }
    }

    /// Unlinks `item` from anywhere in the queue. O(n).
    ///
    /// # Panics
    ///
    /// If `item` is not in this queue.
    pub fn remove_item<A: LinkArena + ?Sized>(&mut self, arena: &mut A, item: usize) {
        let mut prev: Option<usize> = None;
        let mut cur = self.head;

        while let Some(idx) = cur {
            if idx == item {
                let next = arena.link(idx).next;
                match prev {
                    Some(p) => arena.link_mut(p).next = next,
                    None => self.head = next,
                }
                if self.tail == Some(idx) {
                    self.tail = prev;
                }
                let link = arena.link_mut(idx);
                link.next = None;
                link.linked = false;
                self.len -= 1;
                self.check();
                return;
            }
            prev = cur;
            cur = arena.link(idx).next;
        }

        panic!("queue: item {item} not found");
    }

    /// Walks the queue from head to tail.
    pub fn iter<'a, A: LinkArena + ?Sized>(&self, arena: &'a A) -> Iter<'a, A> {
        Iter {
            arena,
            cur: self.head,
        }
    }

    #[inline]
    fn check(&self) {
        debug_assert_eq!(self.head.is_none(), self.len == 0, "queue: head/len out of sync");
        debug_assert_eq!(self.tail.is_none(), self.len == 0, "queue: tail/len out of sync");
    }
}

impl fmt::Debug for Queue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Queue")
            .field("head", &self.head)
            .field("tail", &self.tail)
            .field("len", &self.len)
            .finish()
    }
}

pub struct Iter<'a, A: LinkArena + ?Sized> {
    arena: &'a A,
    cur: Option<usize>,
}

impl<'a, A: LinkArena + ?Sized> Iterator for Iter<'a, A> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        let item = self.cur?;
        self.cur = self.arena.link(item).next;
        Some(item)
    }
}
