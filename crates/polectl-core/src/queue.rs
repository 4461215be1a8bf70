//! FIFO of pending operations.
//!
//! [`CommandQueue`] holds operations that have been accepted but not yet
//! started. It carries no notion of "running"; the owning IO task tracks the
//! current operation separately so the at-most-one-outstanding invariant is
//! enforced in exactly one place.

use std::collections::VecDeque;

/// A first-in, first-out queue of pending operations.
#[derive(Debug)]
pub struct CommandQueue<T> {
    items: VecDeque<T>,
}

impl<T> CommandQueue<T> {
    pub fn new() -> Self {
        CommandQueue {
            items: VecDeque::new(),
        }
    }

    /// Append an operation at the tail.
    pub fn enqueue(&mut self, item: T) {
        self.items.push_back(item);
    }

    /// Remove and return the head, if any.
    pub fn dequeue(&mut self) -> Option<T> {
        self.items.pop_front()
    }

    /// Drop every pending operation, returning how many were discarded.
    pub fn flush(&mut self) -> usize {
        let n = self.items.len();
        self.items.clear();
        n
    }

    /// Take every pending operation in FIFO order, leaving the queue empty.
    pub fn drain(&mut self) -> impl Iterator<Item = T> + '_ {
        self.items.drain(..)
    }

    pub fn front(&self) -> Option<&T> {
        self.items.front()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl<T> Default for CommandQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dequeue_preserves_fifo_order() {
        let mut q = CommandQueue::new();
        q.enqueue(1);
        q.enqueue(2);
        q.enqueue(3);
        assert_eq!(q.len(), 3);
        assert_eq!(q.front(), Some(&1));
        assert_eq!(q.dequeue(), Some(1));
        assert_eq!(q.dequeue(), Some(2));
        assert_eq!(q.dequeue(), Some(3));
        assert_eq!(q.dequeue(), None);
        assert!(q.is_empty());
    }

    #[test]
    fn flush_discards_everything() {
        let mut q = CommandQueue::new();
        q.enqueue("a");
        q.enqueue("b");
        assert_eq!(q.flush(), 2);
        assert!(q.is_empty());
        assert_eq!(q.dequeue(), None);
    }

    #[test]
    fn drain_yields_in_order() {
        let mut q: CommandQueue<u8> = CommandQueue::default();
        q.enqueue(7);
        q.enqueue(8);
        let drained: Vec<u8> = q.drain().collect();
        assert_eq!(drained, vec![7, 8]);
        assert!(q.is_empty());
    }
}
