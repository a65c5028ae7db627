// src/session/history.rs
//! Fixed-capacity rolling history of snapshots and system stats

use crate::{gps::GpsSnapshot, stats::SystemStats};
use std::{
    collections::VecDeque,
    sync::{PoisonError, RwLock},
};

/// Append-only FIFO ring: once full, every push evicts the oldest entry
#[derive(Debug, Clone)]
pub struct HistoryBuffer<T> {
    entries: VecDeque<T>,
    capacity: usize,
}

impl<T: Clone> HistoryBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append an entry, returning the one evicted to make room
    pub fn push(&mut self, entry: T) -> Option<T> {
        let evicted = if self.entries.len() == self.capacity {
            self.entries.pop_front()
        } else {
            None
        };
        self.entries.push_back(entry);
        evicted
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn latest(&self) -> Option<&T> {
        self.entries.back()
    }

    /// Oldest first
    pub fn to_vec(&self) -> Vec<T> {
        self.entries.iter().cloned().collect()
    }
}

/// Position and system-stat histories shared between the session and readers.
///
/// Positions are written by the session read loop, stats by the stats sampler.
/// Everyone else only takes copies.
#[derive(Debug)]
pub struct HistoryStore {
    positions: RwLock<HistoryBuffer<GpsSnapshot>>,
    stats: RwLock<HistoryBuffer<SystemStats>>,
}

impl HistoryStore {
    pub fn new(max_data_points: usize) -> Self {
        Self {
            positions: RwLock::new(HistoryBuffer::new(max_data_points)),
            stats: RwLock::new(HistoryBuffer::new(max_data_points)),
        }
    }

    pub fn append_position(&self, snapshot: GpsSnapshot) {
        self.positions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(snapshot);
    }

    pub fn positions(&self) -> Vec<GpsSnapshot> {
        self.positions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .to_vec()
    }

    pub fn position_count(&self) -> usize {
        self.positions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Empty the position history; readers see the empty buffer once this returns
    pub fn clear_positions(&self) -> usize {
        let mut positions = self.positions.write().unwrap_or_else(PoisonError::into_inner);
        let removed = positions.len();
        positions.clear();
        removed
    }

    pub fn append_stats(&self, stats: SystemStats) {
        self.stats
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(stats);
    }

    pub fn stats(&self) -> Vec<SystemStats> {
        self.stats
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .to_vec()
    }

    pub fn latest_stats(&self) -> Option<SystemStats> {
        self.stats
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .latest()
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_eviction() {
        let mut buffer = HistoryBuffer::new(50);
        let mut evicted = Vec::new();
        for sample in 0..60 {
            if let Some(old) = buffer.push(sample) {
                evicted.push(old);
            }
        }
        assert_eq!(buffer.len(), 50);
        assert_eq!(evicted, (0..10).collect::<Vec<_>>());
        assert_eq!(buffer.to_vec(), (10..60).collect::<Vec<_>>());
        assert_eq!(buffer.latest(), Some(&59));
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let mut buffer = HistoryBuffer::new(0);
        buffer.push("a");
        buffer.push("b");
        assert_eq!(buffer.capacity(), 1);
        assert_eq!(buffer.to_vec(), vec!["b"]);
    }

    #[test]
    fn test_store_clear_positions() {
        let store = HistoryStore::new(50);
        for sequence in 0..30 {
            store.append_position(GpsSnapshot {
                sequence,
                ..GpsSnapshot::default()
            });
        }
        assert_eq!(store.position_count(), 30);
        assert_eq!(store.clear_positions(), 30);
        assert!(store.positions().is_empty());
    }

    #[test]
    fn test_store_keeps_order() {
        let store = HistoryStore::new(3);
        for sequence in 1..=5 {
            store.append_position(GpsSnapshot {
                sequence,
                ..GpsSnapshot::default()
            });
        }
        let sequences: Vec<u64> = store.positions().iter().map(|s| s.sequence).collect();
        assert_eq!(sequences, vec![3, 4, 5]);
    }
}
