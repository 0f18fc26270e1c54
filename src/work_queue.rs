use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};

use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

/// Fixed-capacity concurrent bag: pushes take the next slot, pops hand back
/// the most recent one. Contention is a single atomic cursor.
struct WorkBucket {
    size: AtomicI64,
    slots: Vec<AtomicU32>,
}

impl WorkBucket {
    fn new(capacity: usize) -> Self {
        WorkBucket {
            size: AtomicI64::new(0),
            slots: (0..capacity).map(|_| AtomicU32::new(0)).collect(),
        }
    }

    fn push(&self, item: u32) {
        let idx = self.size.fetch_add(1, Ordering::AcqRel);
        debug_assert!((idx as usize) < self.slots.len());
        self.slots[idx as usize].store(item, Ordering::Release);
    }

    fn try_pop(&self) -> Option<u32> {
        loop {
            let cur = self.size.load(Ordering::Acquire);
            if cur <= 0 {
                return None;
            }
            if self
                .size
                .compare_exchange_weak(cur, cur - 1, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                return Some(self.slots[cur as usize - 1].load(Ordering::Acquire));
            }
        }
    }

    fn len(&self) -> usize {
        self.size.load(Ordering::Acquire).max(0) as usize
    }
}

/// Work queue feeding refinement seeds to the workers. Each worker pushes
/// and pops against its own bucket; when that runs dry it steals from the
/// currently largest bucket.
pub struct WorkQueue {
    buckets: Vec<WorkBucket>,
}

impl WorkQueue {
    pub fn new(num_buckets: usize, capacity: usize) -> Self {
        assert!(num_buckets > 0);
        WorkQueue {
            buckets: (0..num_buckets).map(|_| WorkBucket::new(capacity)).collect(),
        }
    }

    pub fn push(&self, item: u32, bucket: usize) {
        self.buckets[bucket % self.buckets.len()].push(item);
    }

    /// Pops from the preferred bucket, falling back to the globally largest.
    pub fn try_pop(&self, preferred: usize) -> Option<u32> {
        let preferred = preferred % self.buckets.len();
        if let Some(item) = self.buckets[preferred].try_pop() {
            return Some(item);
        }
        let largest = (0..self.buckets.len()).max_by_key(|&b| self.buckets[b].len())?;
        self.buckets[largest].try_pop()
    }

    pub fn len(&self) -> usize {
        self.buckets.iter().map(WorkBucket::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Shuffles every bucket in place, seeded per bucket.
    pub fn shuffle(&mut self, seed: u64) {
        for (i, bucket) in self.buckets.iter_mut().enumerate() {
            let len = bucket.len();
            let mut items: Vec<u32> = bucket.slots[..len]
                .iter()
                .map(|s| s.load(Ordering::Relaxed))
                .collect();
            let mut rng = SmallRng::seed_from_u64(seed ^ i as u64);
            items.shuffle(&mut rng);
            for (slot, item) in bucket.slots[..len].iter().zip(items) {
                slot.store(item, Ordering::Relaxed);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pop_prefers_own_bucket() {
        // Arrange
        let q = WorkQueue::new(2, 8);
        q.push(1, 0);
        q.push(2, 1);

        // Act & Assert
        assert_eq!(q.try_pop(1), Some(2));
        assert_eq!(q.try_pop(1), Some(1));
        assert_eq!(q.try_pop(1), None);
    }

    #[test]
    fn test_steal_takes_from_largest_bucket() {
        // Arrange
        let q = WorkQueue::new(3, 8);
        q.push(1, 1);
        for item in 2..6 {
            q.push(item, 2);
        }

        // Act: bucket 0 is empty, bucket 2 is largest
        let stolen = q.try_pop(0);

        // Assert
        assert_eq!(stolen, Some(5));
        assert_eq!(q.len(), 4);
    }

    #[test]
    fn test_concurrent_drain_yields_every_item() {
        // Arrange
        let q = WorkQueue::new(4, 1024);
        for item in 0..1024u32 {
            q.push(item, (item % 4) as usize);
        }

        // Act
        let popped: Vec<u32> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..4)
                .map(|t| {
                    let q = &q;
                    s.spawn(move || {
                        let mut local = Vec::new();
                        while let Some(item) = q.try_pop(t) {
                            local.push(item);
                        }
                        local
                    })
                })
                .collect();
            handles.into_iter().flat_map(|h| h.join().unwrap()).collect()
        });

        // Assert
        let mut sorted = popped;
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(sorted.len(), 1024);
    }
}
