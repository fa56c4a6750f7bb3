//! Join barrier and write-once result slots for fan-out phases.
//!
//! A phase knows up front how many units it launched. Each unit holds an
//! [`Arrival`] that counts it exactly once, whether the unit finished with
//! data, with an error, or by unwinding. The waiter is woken once, when the
//! count reaches the expected total. Results go into [`Slots`] by index so
//! output order follows launch order, not completion order.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use thiserror::Error;
use tokio::sync::Notify;
use tracing::error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BarrierError {
    #[error("join barrier over-counted: expected {expected} arrivals")]
    Overflow { expected: usize },
    #[error("result slot {0} written twice")]
    SlotTaken(usize),
    #[error("result slot {index} out of range (len {len})")]
    OutOfRange { index: usize, len: usize },
}

#[derive(Debug)]
pub struct JoinBarrier {
    expected: usize,
    arrived: AtomicUsize,
    fired: AtomicBool,
    done: Notify,
}

impl JoinBarrier {
    pub fn new(expected: usize) -> Arc<Self> {
        Arc::new(Self {
            expected,
            arrived: AtomicUsize::new(0),
            fired: AtomicBool::new(expected == 0),
            done: Notify::new(),
        })
    }

    pub fn expected(&self) -> usize {
        self.expected
    }

    pub fn arrived(&self) -> usize {
        self.arrived.load(Ordering::Acquire).min(self.expected)
    }

    pub fn is_complete(&self) -> bool {
        self.arrived.load(Ordering::Acquire) >= self.expected
    }

    /// Counts one terminal unit. Returns `Ok(true)` for the arrival that
    /// completed the barrier.
    pub fn arrive(&self) -> Result<bool, BarrierError> {
        let prev = self.arrived.fetch_add(1, Ordering::AcqRel);
        if prev >= self.expected {
            return Err(BarrierError::Overflow {
                expected: self.expected,
            });
        }
        if prev + 1 == self.expected && !self.fired.swap(true, Ordering::AcqRel) {
            // notify_one stores a permit, so a waiter that arrives late still wakes.
            self.done.notify_one();
            return Ok(true);
        }
        Ok(false)
    }

    /// Hands out the one-shot arrival for a unit.
    pub fn arrival(self: &Arc<Self>) -> Arrival {
        Arrival {
            barrier: Arc::clone(self),
            done: false,
        }
    }

    /// Resolves once every expected unit has arrived. Single waiter.
    pub async fn wait(&self) {
        while !self.is_complete() {
            self.done.notified().await;
        }
    }
}

/// Counts toward its barrier when dropped, unless already counted.
#[derive(Debug)]
pub struct Arrival {
    barrier: Arc<JoinBarrier>,
    done: bool,
}

impl Arrival {
    pub fn complete(mut self) -> Result<bool, BarrierError> {
        self.done = true;
        self.barrier.arrive()
    }
}

impl Drop for Arrival {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        self.done = true;
        if let Err(err) = self.barrier.arrive() {
            error!("{err}");
        }
    }
}

/// Fixed-length, write-once result storage indexed by launch position.
#[derive(Debug)]
pub struct Slots<T> {
    slots: Vec<OnceLock<T>>,
}

impl<T> Slots<T> {
    pub fn new(len: usize) -> Arc<Self> {
        Arc::new(Self {
            slots: (0..len).map(|_| OnceLock::new()).collect(),
        })
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn fill(&self, index: usize, value: T) -> Result<(), BarrierError> {
        let len = self.slots.len();
        let slot = self
            .slots
            .get(index)
            .ok_or(BarrierError::OutOfRange { index, len })?;
        slot.set(value).map_err(|_| BarrierError::SlotTaken(index))
    }

    pub fn into_vec(self) -> Vec<Option<T>> {
        self.slots.into_iter().map(OnceLock::into_inner).collect()
    }
}
