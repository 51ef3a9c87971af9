//! ---
//! plcsim_section: "03-transport"
//! plcsim_subsection: "module"
//! plcsim_type: "source"
//! plcsim_scope: "code"
//! plcsim_description: "Bounded drop-oldest ring buffer for undelivered messages."
//! plcsim_version: "v0.1.0"
//! plcsim_owner: "tbd"
//! ---
use std::collections::VecDeque;

/// Fixed-capacity FIFO that evicts its oldest entry instead of refusing a push.
#[derive(Debug, Clone)]
pub struct RingBuffer<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T> RingBuffer<T> {
    /// Buffer holding at most `capacity` items (at least one).
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append `item`, returning the evicted oldest entry when full.
    pub fn push(&mut self, item: T) -> Option<T> {
        let evicted = if self.items.len() == self.capacity {
            self.items.pop_front()
        } else {
            None
        };
        self.items.push_back(item);
        evicted
    }

    /// Put `items` back in front of the queue, keeping their relative order.
    ///
    /// When the result would exceed capacity the oldest entries are evicted and
    /// returned.
    pub fn push_front_all(&mut self, items: Vec<T>) -> Vec<T> {
        for item in items.into_iter().rev() {
            self.items.push_front(item);
        }
        let overflow = self.items.len().saturating_sub(self.capacity);
        self.items.drain(..overflow).collect()
    }

    /// Remove and return everything, oldest first.
    pub fn drain_all(&mut self) -> Vec<T> {
        self.items.drain(..).collect()
    }

    /// Oldest entry, if any.
    pub fn front(&self) -> Option<&T> {
        self.items.front()
    }

    /// Iterate oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }

    /// Current occupancy.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Maximum occupancy.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_grows_until_capacity_then_evicts_oldest() {
        let mut buffer = RingBuffer::with_capacity(3);
        for (expected_len, item) in (1..=3).zip(["a", "b", "c"]) {
            assert_eq!(buffer.push(item), None);
            assert_eq!(buffer.len(), expected_len);
        }
        assert_eq!(buffer.push("d"), Some("a"));
        assert_eq!(buffer.len(), 3);
        assert_eq!(buffer.iter().copied().collect::<Vec<_>>(), ["b", "c", "d"]);
    }

    #[test]
    fn requeued_items_go_first_and_overflow_drops_oldest() {
        let mut buffer = RingBuffer::with_capacity(4);
        buffer.push(10);
        buffer.push(11);
        let evicted = buffer.push_front_all(vec![1, 2, 3]);
        assert_eq!(evicted, [1]);
        assert_eq!(buffer.drain_all(), [2, 3, 10, 11]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn zero_capacity_is_promoted_to_one() {
        let mut buffer = RingBuffer::with_capacity(0);
        assert_eq!(buffer.capacity(), 1);
        buffer.push('x');
        assert_eq!(buffer.push('y'), Some('x'));
        assert_eq!(buffer.front(), Some(&'y'));
    }
}
