use rustc_hash::FxHashMap;

/// Indexed binary max-heap with addressable entries, the building block of
/// the FM priority queues: a per-block vertex queue keyed by best gain and a
/// block queue keyed by the top gain of the corresponding vertex queue.
///
/// Keys can be adjusted in place; positions are tracked so `adjust_key` and
/// `remove` run in O(log n).
#[derive(Default)]
pub struct IndexedMaxHeap {
    heap: Vec<(u32, i64)>,
    pos: FxHashMap<u32, usize>,
}

impl IndexedMaxHeap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn clear(&mut self) {
        self.heap.clear();
        self.pos.clear();
    }

    pub fn contains(&self, id: u32) -> bool {
        self.pos.contains_key(&id)
    }

    pub fn key_of(&self, id: u32) -> Option<i64> {
        self.pos.get(&id).map(|&i| self.heap[i].1)
    }

    pub fn top(&self) -> Option<(u32, i64)> {
        self.heap.first().copied()
    }

    pub fn insert(&mut self, id: u32, key: i64) {
        debug_assert!(!self.contains(id));
        let i = self.heap.len();
        self.heap.push((id, key));
        self.pos.insert(id, i);
        self.sift_up(i);
    }

    /// Inserts `id` or adjusts its key if present.
    pub fn insert_or_adjust(&mut self, id: u32, key: i64) {
        if self.contains(id) {
            self.adjust_key(id, key);
        } else {
            self.insert(id, key);
        }
    }

    pub fn adjust_key(&mut self, id: u32, key: i64) {
        let i = self.pos[&id];
        let old = self.heap[i].1;
        self.heap[i].1 = key;
        if key > old {
            self.sift_up(i);
        } else if key < old {
            self.sift_down(i);
        }
    }

    pub fn pop(&mut self) -> Option<(u32, i64)> {
        let top = *self.heap.first()?;
        self.remove_at(0);
        Some(top)
    }

    pub fn remove(&mut self, id: u32) {
        if let Some(&i) = self.pos.get(&id) {
            self.remove_at(i);
        }
    }

    fn remove_at(&mut self, i: usize) {
        let last = self.heap.len() - 1;
        self.heap.swap(i, last);
        let (removed, _) = self.heap.pop().unwrap();
        self.pos.remove(&removed);
        if i <= last && i < self.heap.len() {
            self.pos.insert(self.heap[i].0, i);
            self.sift_down(i);
            self.sift_up(i);
        }
    }

    fn sift_up(&mut self, mut i: usize) {
        while i > 0 {
            let parent = (i - 1) / 2;
            if self.heap[parent].1 >= self.heap[i].1 {
                break;
            }
            self.swap_entries(i, parent);
            i = parent;
        }
    }

    fn sift_down(&mut self, mut i: usize) {
        loop {
            let left = 2 * i + 1;
            if left >= self.heap.len() {
                break;
            }
            let right = left + 1;
            let mut largest = left;
            if right < self.heap.len() && self.heap[right].1 > self.heap[left].1 {
                largest = right;
            }
            if self.heap[i].1 >= self.heap[largest].1 {
                break;
            }
            self.swap_entries(i, largest);
            i = largest;
        }
    }

    fn swap_entries(&mut self, a: usize, b: usize) {
        self.heap.swap(a, b);
        self.pos.insert(self.heap[a].0, a);
        self.pos.insert(self.heap[b].0, b);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pop_returns_entries_in_key_order() {
        // Arrange
        let mut pq = IndexedMaxHeap::new();
        pq.insert(1, 5);
        pq.insert(2, 9);
        pq.insert(3, -4);
        pq.insert(4, 7);

        // Act & Assert
        assert_eq!(pq.pop(), Some((2, 9)));
        assert_eq!(pq.pop(), Some((4, 7)));
        assert_eq!(pq.pop(), Some((1, 5)));
        assert_eq!(pq.pop(), Some((3, -4)));
        assert_eq!(pq.pop(), None);
    }

    #[test]
    fn test_adjust_key_reorders() {
        // Arrange
        let mut pq = IndexedMaxHeap::new();
        pq.insert(1, 5);
        pq.insert(2, 9);

        // Act: stale key refreshed downward, another upward
        pq.adjust_key(2, 1);
        pq.adjust_key(1, 8);

        // Assert
        assert_eq!(pq.top(), Some((1, 8)));
        assert_eq!(pq.key_of(2), Some(1));
    }

    #[test]
    fn test_remove_middle_entry() {
        // Arrange
        let mut pq = IndexedMaxHeap::new();
        for (id, key) in [(1, 4), (2, 8), (3, 6), (4, 2)] {
            pq.insert(id, key);
        }

        // Act
        pq.remove(3);

        // Assert
        assert!(!pq.contains(3));
        assert_eq!(pq.pop(), Some((2, 8)));
        assert_eq!(pq.pop(), Some((1, 4)));
        assert_eq!(pq.pop(), Some((4, 2)));
    }
}
