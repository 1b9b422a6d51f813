// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! FIFO queue
//!
//! A doubly linked list of item handles, used by the scheduler as its ready
//! and zombie lists and usable on its own.
//!
//! # Design
//!
//! - **Arena nodes**: nodes live in a slot vector and link to their
//!   neighbors by index, so no node is ever aliased through a raw pointer
//! - **Slot recycling**: freed slots go on a free list and are reused by the
//!   next enqueue, so a queue that has reached its working size stops
//!   touching the allocator
//! - **Identity by equality**: items are handles (TIDs, indices, references);
//!   `delete` removes the oldest item equal to its argument
//!
//! Every operation is O(1) except [`Queue::delete`] and [`Queue::iterate`],
//! which walk the list.
//!
//! # Usage
//!
//! ```rust
//! use std::ops::ControlFlow;
//! use uthread::Queue;
//!
//! let mut queue = Queue::new();
//! queue.enqueue(1).unwrap();
//! queue.enqueue(2).unwrap();
//! queue.enqueue(3).unwrap();
//!
//! // The callback may delete the item it is visiting
//! queue.iterate(|q, item| {
//!     if *item == 2 {
//!         q.delete(item).unwrap();
//!     }
//!     ControlFlow::Continue(())
//! });
//!
//! assert_eq!(queue.dequeue(), Ok(1));
//! assert_eq!(queue.dequeue(), Ok(3));
//! ```

use core::fmt;
use core::ops::ControlFlow;

use crate::error::QueueError;

/// Index of a node slot
type Link = Option<usize>;

/// A linked node holding one item
struct Node<T> {
    item: T,
    prev: Link,
    next: Link,
}

/// Arena slot: a live node or a link in the free list
enum Slot<T> {
    Occupied(Node<T>),
    Vacant { next_free: Link },
}

/// FIFO queue of item handles
pub struct Queue<T> {
    /// Node arena
    slots: Vec<Slot<T>>,
    /// Head of the free-slot list
    free: Link,
    /// Number of slots on the free list
    free_count: usize,
    /// Oldest node
    head: Link,
    /// Newest node
    tail: Link,
    /// Number of linked nodes
    len: usize,
    /// Positions of running `iterate` walks, innermost last, repaired by
    /// `unlink`
    walks: Vec<Walk>,
}

/// Position of an `iterate` walk
#[derive(Clone, Copy)]
struct Walk {
    /// Node handed to the callback, cleared if the callback deletes it
    visiting: Link,
    /// Successor of the visited node
    next: Link,
}

impl<T> Queue<T> {
    /// Create an empty queue
    pub const fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: None,
            free_count: 0,
            head: None,
            tail: None,
            len: 0,
            walks: Vec::new(),
        }
    }

    /// Destroy an empty queue
    ///
    /// Fails if the queue still holds items, in which case the queue is
    /// handed back untouched.
    pub fn destroy(self) -> Result<(), Self> {
        if self.len > 0 {
            return Err(self);
        }
        Ok(())
    }

    /// Number of items in the queue
    pub fn len(&self) -> usize {
        self.len
    }

    /// Check if the queue holds no items
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Make sure the next `additional` enqueues will not allocate
    pub fn reserve(&mut self, additional: usize) -> Result<(), QueueError> {
        let needed = additional.saturating_sub(self.free_count);
        self.slots.try_reserve(needed)?;
        Ok(())
    }

    /// Append an item at the tail
    pub fn enqueue(&mut self, item: T) -> Result<(), QueueError> {
        let index = self.alloc_slot(Node {
            item,
            prev: self.tail,
            next: None,
        })?;

        match self.tail {
            Some(tail) => self.node_mut(tail).next = Some(index),
            None => self.head = Some(index),
        }
        self.tail = Some(index);
        self.len += 1;

        Ok(())
    }

    /// Remove and return the oldest item
    pub fn dequeue(&mut self) -> Result<T, QueueError> {
        let head = self.head.ok_or(QueueError::Empty)?;
        Ok(self.unlink(head))
    }

    /// Remove the oldest item equal to `item`
    ///
    /// Scans from the head through the tail inclusive and returns the
    /// removed item.
    pub fn delete(&mut self, item: &T) -> Result<T, QueueError>
    where
        T: PartialEq,
    {
        let mut cursor = self.head;
        while let Some(index) = cursor {
            let node = self.node(index);
            if node.item == *item {
                return Ok(self.unlink(index));
            }
            cursor = node.next;
        }
        Err(QueueError::NotFound)
    }

    /// Visit every item from oldest to newest
    ///
    /// The callback receives the queue itself and a copy of the visited
    /// item, and may modify the queue. Deletions repair the walk position:
    /// deleting the current item continues with its successor, and a
    /// deleted item that has not been visited yet is skipped. Items
    /// enqueued during the walk are visited. The callback may also start a
    /// nested `iterate`, whose deletions repair the outer walk as well.
    ///
    /// # Returns
    ///
    /// The item at which the callback returned [`ControlFlow::Break`], or
    /// `None` if the walk reached the end.
    pub fn iterate<F>(&mut self, mut callback: F) -> Option<T>
    where
        T: Clone,
        F: FnMut(&mut Self, &T) -> ControlFlow<()>,
    {
        let depth = self.walks.len();
        self.walks.push(Walk {
            visiting: None,
            next: self.head,
        });
        let mut stopped = None;

        while let Some(index) = self.walks[depth].next {
            let node = self.node(index);
            let item = node.item.clone();
            let next = node.next;
            self.walks[depth] = Walk {
                visiting: Some(index),
                next,
            };

            if callback(self, &item).is_break() {
                stopped = Some(item);
                break;
            }

            // A surviving current node may have gained a successor
            if let Some(current) = self.walks[depth].visiting {
                self.walks[depth].next = self.node(current).next;
            }
        }

        self.walks.truncate(depth);
        stopped
    }

    /// Borrowing iterator from oldest to newest
    pub fn iter(&self) -> Iter<'_, T> {
        Iter {
            queue: self,
            cursor: self.head,
            remaining: self.len,
        }
    }

    fn node(&self, index: usize) -> &Node<T> {
        match &self.slots[index] {
            Slot::Occupied(node) => node,
            Slot::Vacant { .. } => unreachable!("queue link to vacant slot {}", index),
        }
    }

    fn node_mut(&mut self, index: usize) -> &mut Node<T> {
        match &mut self.slots[index] {
            Slot::Occupied(node) => node,
            Slot::Vacant { .. } => unreachable!("queue link to vacant slot {}", index),
        }
    }

    fn alloc_slot(&mut self, node: Node<T>) -> Result<usize, QueueError> {
        if let Some(index) = self.free {
            let next_free = match &self.slots[index] {
                Slot::Vacant { next_free } => *next_free,
                Slot::Occupied(_) => unreachable!("free list points at live slot {}", index),
            };
            self.free = next_free;
            self.free_count -= 1;
            self.slots[index] = Slot::Occupied(node);
            return Ok(index);
        }

        self.slots.try_reserve(1)?;
        self.slots.push(Slot::Occupied(node));
        Ok(self.slots.len() - 1)
    }

    /// Unlink a live node, repair its neighbors, and recycle its slot
    fn unlink(&mut self, index: usize) -> T {
        let vacant = Slot::Vacant {
            next_free: self.free,
        };
        let node = match core::mem::replace(&mut self.slots[index], vacant) {
            Slot::Occupied(node) => node,
            Slot::Vacant { .. } => unreachable!("unlink of vacant slot {}", index),
        };
        self.free = Some(index);
        self.free_count += 1;

        for walk in &mut self.walks {
            if walk.visiting == Some(index) {
                walk.visiting = None;
            }
            if walk.next == Some(index) {
                walk.next = node.next;
            }
        }

        match node.prev {
            Some(prev) => self.node_mut(prev).next = node.next,
            None => self.head = node.next,
        }
        match node.next {
            Some(next) => self.node_mut(next).prev = node.prev,
            None => self.tail = node.prev,
        }
        self.len -= 1;

        node.item
    }
}

impl<T> Default for Queue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: fmt::Debug> fmt::Debug for Queue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

/// Iterator over queue items, oldest first
pub struct Iter<'a, T> {
    queue: &'a Queue<T>,
    cursor: Link,
    remaining: usize,
}

impl<'a, T> Iterator for Iter<'a, T> {
    type Item = &'a T;

    fn next(&mut self) -> Option<&'a T> {
        let index = self.cursor?;
        let node = self.queue.node(index);
        self.cursor = node.next;
        self.remaining -= 1;
        Some(&node.item)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<T> ExactSizeIterator for Iter<'_, T> {}

impl<'a, T> IntoIterator for &'a Queue<T> {
    type Item = &'a T;
    type IntoIter = Iter<'a, T>;

    fn into_iter(self) -> Iter<'a, T> {
        self.iter()
    }
}

// ============================================================================
// Tests
// ============================================================================
