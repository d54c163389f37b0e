//! Spinning rendezvous barrier for benchmark phases
//!
//! The barrier is reused for every phase boundary of a run. Participants
//! may leave permanently (a worker whose setup failed) and the whole
//! barrier can be aborted (a worker thread failed to start), so waiters
//! are never stranded.

use vmops_api::sync::{AtomicBool, AtomicU64, Ordering};
use vmops_api::{Error, Result};

const ARRIVED_MASK: u64 = 0xffff_ffff;
const PARTICIPANTS_SHIFT: u32 = 32;

/// Spin iterations before a waiter starts yielding its core
const SPINS_BEFORE_YIELD: u32 = 1 << 12;

/// Counting barrier built only from atomics
#[derive(Debug)]
pub struct SpinBarrier {
    /// `participants << 32 | arrived`
    state: AtomicU64,
    /// Completed cycles
    generation: AtomicU64,
    /// Set once by `abort`
    aborted: AtomicBool,
}

impl SpinBarrier {
    /// Creates a barrier for `participants` threads
    pub fn new(participants: usize) -> Self {
        Self {
            state: AtomicU64::new((participants as u64) << PARTICIPANTS_SHIFT),
            generation: AtomicU64::new(0),
            aborted: AtomicBool::new(false),
        }
    }

    /// Threads currently required to complete a cycle
    pub fn participants(&self) -> usize {
        (self.state.load(Ordering::Acquire) >> PARTICIPANTS_SHIFT) as usize
    }

    /// Threads waiting in the current cycle
    pub fn waiting(&self) -> usize {
        (self.state.load(Ordering::Acquire) & ARRIVED_MASK) as usize
    }

    /// Number of completed cycles
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Returns true once the barrier has been aborted
    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::Acquire)
    }

    /// Blocks until every participant has arrived
    ///
    /// Returns `Ok(true)` for the thread that completed the cycle and
    /// `Ok(false)` for the others; fails with [`Error::BarrierAborted`] if
    /// the barrier is or becomes aborted before the cycle completes.
    pub fn wait(&self) -> Result<bool> {
        if self.is_aborted() {
            return Err(Error::BarrierAborted);
        }
        let generation = self.generation.load(Ordering::Acquire);
        let prev = self.state.fetch_add(1, Ordering::AcqRel);
        let arrived = (prev & ARRIVED_MASK) + 1;
        if arrived == prev >> PARTICIPANTS_SHIFT {
            self.release();
            return Ok(true);
        }

        let mut spins = 0u32;
        while self.generation.load(Ordering::Acquire) == generation {
            if self.is_aborted() {
                return Err(Error::BarrierAborted);
            }
            if spins < SPINS_BEFORE_YIELD {
                spins += 1;
                core::hint::spin_loop();
            } else {
                std::thread::yield_now();
            }
        }
        Ok(false)
    }

    /// Permanently removes the calling thread from the participants
    ///
    /// If everyone still participating is already waiting, the current
    /// cycle is released.
    pub fn leave(&self) {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            let participants = (current >> PARTICIPANTS_SHIFT).saturating_sub(1);
            let arrived = current & ARRIVED_MASK;
            let next = (participants << PARTICIPANTS_SHIFT) | arrived;
            match self.state.compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire) {
                Ok(_) => {
                    if arrived > 0 && arrived == participants {
                        self.release();
                    }
                    return;
                }
                Err(actual) => current = actual,
            }
        }
    }

    /// Releases every waiter with an error; later waits fail immediately
    pub fn abort(&self) {
        self.aborted.store(true, Ordering::Release);
    }

    fn release(&self) {
        self.state.fetch_and(!ARRIVED_MASK, Ordering::AcqRel);
        self.generation.fetch_add(1, Ordering::AcqRel);
    }
}
