//! Rate-limited latency sampling
//!
//! Each worker owns one sampler whose storage is reserved during setup.
//! `offer` runs inside the measured loop, so it only compares and stores.

use serde::Serialize;
use vmops_api::{Error, Result, Ticks};

/// One recorded operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LatencySample {
    /// Worker that performed the operation
    pub thread_id: usize,
    /// Time since the worker started measuring
    pub elapsed: Ticks,
    /// Sequence number of the operation, starting at 1
    pub op_seq: u64,
    /// Duration of this operation
    pub latency: Ticks,
}

/// Fixed-capacity sample buffer with a minimum spacing between samples
#[derive(Debug, Clone)]
pub struct LatencySampler {
    samples: Vec<LatencySample>,
    capacity: usize,
    interval: Ticks,
    next_deadline: Ticks,
}

impl LatencySampler {
    /// Reserves room for `capacity` samples spaced at least `interval` apart
    ///
    /// Fails with [`Error::OutOfMemory`] if the buffer cannot be reserved.
    pub fn new(capacity: usize, interval: Ticks) -> Result<Self> {
        let mut samples = Vec::new();
        samples.try_reserve_exact(capacity).map_err(|_| Error::OutOfMemory)?;
        Ok(Self { samples, capacity, interval, next_deadline: 0 })
    }

    /// A sampler that accepts nothing
    pub fn disabled() -> Self {
        Self { samples: Vec::new(), capacity: 0, interval: 0, next_deadline: 0 }
    }

    /// Records the sample if there is room and its deadline has passed
    #[inline]
    pub fn offer(&mut self, thread_id: usize, op_seq: u64, elapsed: Ticks, latency: Ticks) -> bool {
        if elapsed < self.next_deadline || self.samples.len() == self.capacity {
            return false;
        }
        self.samples.push(LatencySample { thread_id, elapsed, op_seq, latency });
        self.next_deadline = elapsed.saturating_add(self.interval);
        true
    }

    /// Maximum number of samples
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of recorded samples
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Returns true if nothing was recorded
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Returns true if no further sample will be accepted
    pub fn is_full(&self) -> bool {
        self.samples.len() == self.capacity
    }

    /// Recorded samples in recording order
    pub fn samples(&self) -> &[LatencySample] {
        &self.samples
    }

    /// Consumes the sampler
    pub fn into_samples(self) -> Vec<LatencySample> {
        self.samples
    }
}

/// Merges per-worker samples into one timeline ordered by elapsed time
///
/// Ties have no defined order.
pub fn merge_samples<I>(per_worker: I) -> Vec<LatencySample>
where
    I: IntoIterator<Item = Vec<LatencySample>>,
{
    let mut all: Vec<LatencySample> = per_worker.into_iter().flatten().collect();
    all.sort_unstable_by_key(|s| s.elapsed);
    all
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limit() {
        let mut sampler = LatencySampler::new(10, 100).unwrap();
        assert!(sampler.offer(0, 1, 0, 5));
        assert!(!sampler.offer(0, 2, 50, 5));
        assert!(!sampler.offer(0, 3, 99, 5));
        assert!(sampler.offer(0, 4, 100, 5));
        assert!(sampler.offer(0, 5, 350, 5));
        assert!(!sampler.offer(0, 6, 449, 5));
        let seqs: Vec<u64> = sampler.samples().iter().map(|s| s.op_seq).collect();
        assert_eq!(seqs, vec![1, 4, 5]);
    }

    #[test]
    fn test_capacity_drops_newest() {
        let mut sampler = LatencySampler::new(2, 0).unwrap();
        assert!(sampler.offer(1, 1, 10, 1));
        assert!(sampler.offer(1, 2, 20, 1));
        assert!(sampler.is_full());
        assert!(!sampler.offer(1, 3, 30, 1));
        assert_eq!(sampler.samples()[1].elapsed, 20);
    }

    #[test]
    fn test_disabled_accepts_nothing() {
        let mut sampler = LatencySampler::disabled();
        assert!(!sampler.offer(0, 1, 1_000, 1));
        assert!(sampler.is_empty());
    }

    #[test]
    fn test_oversized_buffer_is_refused() {
        assert_eq!(LatencySampler::new(usize::MAX / 4, 1).unwrap_err(), Error::OutOfMemory);
    }

    #[test]
    fn test_offer_never_reallocates() {
        let mut sampler = LatencySampler::new(64, 1).unwrap();
        let ptr = sampler.samples().as_ptr();
        for i in 0..1000u64 {
            sampler.offer(0, i, i, 1);
        }
        assert_eq!(sampler.len(), 64);
        assert_eq!(sampler.samples().as_ptr(), ptr);
    }

    #[test]
    fn test_merge_orders_by_elapsed() {
        let a = vec![
            LatencySample { thread_id: 0, elapsed: 10, op_seq: 1, latency: 1 },
            LatencySample { thread_id: 0, elapsed: 30, op_seq: 2, latency: 1 },
        ];
        let b = vec![LatencySample { thread_id: 1, elapsed: 20, op_seq: 1, latency: 1 }];
        let merged = merge_samples(vec![a, b]);
        let order: Vec<(usize, Ticks)> = merged.iter().map(|s| (s.thread_id, s.elapsed)).collect();
        assert_eq!(order, vec![(0, 10), (1, 20), (0, 30)]);
    }
}
