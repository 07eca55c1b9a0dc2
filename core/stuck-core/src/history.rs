//! Fixed-capacity ring buffer for recent tracker history.

use serde::{Serialize, Serializer};

/// Keeps the last `capacity` items; pushing past capacity overwrites the oldest.
#[derive(Debug, Clone)]
pub struct BoundedRing<T> {
    slots: Vec<T>,
    capacity: usize,
    // Index of the oldest element once the ring is full.
    head: usize,
}

impl<T> BoundedRing<T> {
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            slots: Vec::with_capacity(capacity),
            capacity,
            head: 0,
        }
    }

    /// Appends `item`, returning the evicted oldest item when full.
    pub fn push(&mut self, item: T) -> Option<T> {
        if self.slots.len() < self.capacity {
            self.slots.push(item);
            return None;
        }
        let evicted = std::mem::replace(&mut self.slots[self.head], item);
        self.head = (self.head + 1) % self.capacity;
        Some(evicted)
    }

    /// Oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        let (newer, older) = self.slots.split_at(self.head);
        older.iter().chain(newer.iter())
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

impl<T: Clone> BoundedRing<T> {
    pub fn to_vec(&self) -> Vec<T> {
        self.iter().cloned().collect()
    }
}

impl<T: Serialize> Serialize for BoundedRing<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_insertion_order_below_capacity() {
        let mut ring = BoundedRing::with_capacity(4);
        assert!(ring.is_empty());
        assert_eq!(ring.push(1), None);
        assert_eq!(ring.push(2), None);

        assert_eq!(ring.to_vec(), vec![1, 2]);
    }

    #[test]
    fn overwrites_oldest_when_full() {
        let mut ring = BoundedRing::with_capacity(3);
        for value in 1..=3 {
            ring.push(value);
        }

        assert_eq!(ring.push(4), Some(1));
        assert_eq!(ring.push(5), Some(2));

        assert_eq!(ring.len(), 3);
        assert_eq!(ring.to_vec(), vec![3, 4, 5]);
    }

    #[test]
    fn wraps_many_times() {
        let mut ring = BoundedRing::with_capacity(10);
        for value in 0..37 {
            ring.push(value);
        }
        assert_eq!(ring.to_vec(), (27..37).collect::<Vec<_>>());
        assert_eq!(ring.len(), 10);
    }

    #[test]
    fn serializes_oldest_first() {
        let mut ring = BoundedRing::with_capacity(2);
        ring.push("a");
        ring.push("b");
        ring.push("c");
        let json = serde_json::to_string(&ring).expect("serialize");
        assert_eq!(json, r#"["b","c"]"#);
    }
}
