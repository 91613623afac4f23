use crate::types::CapturedEntry;
use std::collections::VecDeque;

/// Capacity-bounded record of entries in arrival order.
///
/// Rotation is batched: when a push takes the length past capacity, only the newest
/// `ceil(capacity / 2)` entries are kept.
#[derive(Debug, Clone)]
pub struct LogBuffer {
    entries: VecDeque<CapturedEntry>,
    capacity: usize,
}

impl LogBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity + 1),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Appends `entry` and returns how many old entries were evicted.
    pub fn push(&mut self, entry: CapturedEntry) -> usize {
        self.entries.push_back(entry);
        if self.entries.len() <= self.capacity {
            return 0;
        }
        let keep = self.capacity.div_ceil(2);
        let evicted = self.entries.len() - keep;
        self.entries.drain(..evicted);
        evicted
    }

    pub fn iter(&self) -> impl Iterator<Item = &CapturedEntry> {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Level, LogEntry};
    use chrono::Utc;

    fn entry(seq: u64) -> CapturedEntry {
        CapturedEntry {
            seq,
            received_at: Utc::now(),
            entry: LogEntry::new(Level::Info, "A", format!("m{seq}")),
        }
    }

    fn seqs(buffer: &LogBuffer) -> Vec<u64> {
        buffer.iter().map(|e| e.seq).collect()
    }

    #[test]
    fn length_never_exceeds_capacity() {
        for capacity in [1, 2, 3, 7, 10] {
            let mut buffer = LogBuffer::new(capacity);
            for seq in 0..100 {
                buffer.push(entry(seq));
                assert!(buffer.len() <= capacity, "capacity {capacity}, len {}", buffer.len());
            }
        }
    }

    #[test]
    fn overflow_keeps_newest_half_in_order() {
        let mut buffer = LogBuffer::new(10);
        for seq in 0..10 {
            assert_eq!(buffer.push(entry(seq)), 0);
        }
        assert_eq!(buffer.len(), 10);

        let evicted = buffer.push(entry(10));
        assert_eq!(evicted, 6);
        assert_eq!(seqs(&buffer), vec![6, 7, 8, 9, 10]);
    }

    #[test]
    fn odd_capacity_evicts_ceil_half() {
        let mut buffer = LogBuffer::new(5);
        for seq in 0..5 {
            buffer.push(entry(seq));
        }
        assert_eq!(buffer.push(entry(5)), 3);
        assert_eq!(seqs(&buffer), vec![3, 4, 5]);
    }

    #[test]
    fn zero_capacity_is_clamped_to_one() {
        let mut buffer = LogBuffer::new(0);
        assert_eq!(buffer.capacity(), 1);
        buffer.push(entry(0));
        buffer.push(entry(1));
        assert_eq!(seqs(&buffer), vec![1]);
    }
}
