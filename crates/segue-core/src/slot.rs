//! Reusable inference job records.
//!
//! A slot carries one model input tensor and one model output tensor
//! between the audio thread and a worker. Ownership rotates through three
//! states guarded by two atomic flags:
//!
//! - **free** - the audio thread may claim the slot and write the input.
//! - **in-flight** - exactly one worker reads the input and writes the
//!   output (neither flag is set).
//! - **done** - the audio thread may read the output, then release the
//!   slot back to free.
//!
//! # Safety
//! The tensors live in `UnsafeCell` because the flag protocol guarantees
//! exclusive access at every point: `free` is taken with an acquire swap
//! before the input is written, `done` is released with a store-release
//! after the output is written and taken with an acquire swap before it is
//! read. No two threads ever hold the same tensor at the same time.

use crate::lockfree::AtomicFlag;
use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU16, Ordering};

pub struct InferenceSlot {
    input: UnsafeCell<Vec<f32>>,
    output: UnsafeCell<Vec<f32>>,
    timestamp: AtomicU16,
    free: AtomicFlag,
    done: AtomicFlag,
}

// Safety: tensor access is serialized by the free/done flag protocol
// described in the module docs; the flags use release/acquire ordering.
unsafe impl Send for InferenceSlot {}
unsafe impl Sync for InferenceSlot {}

impl InferenceSlot {
    pub fn new(input_size: usize, output_size: usize) -> Self {
        Self {
            input: UnsafeCell::new(vec![0.0; input_size]),
            output: UnsafeCell::new(vec![0.0; output_size]),
            timestamp: AtomicU16::new(0),
            free: AtomicFlag::new(true),
            done: AtomicFlag::new(false),
        }
    }

    /// Claim the slot for a new input. On success the caller owns the input
    /// tensor until the slot is dispatched.
    #[inline]
    pub fn try_claim(&self) -> bool {
        self.free.try_claim()
    }

    /// Return the slot to the free state. Called after post-processing, or
    /// to roll back a claim whose dispatch failed.
    #[inline]
    pub fn release(&self) {
        self.free.release();
    }

    /// Mark the output tensor complete. Worker side.
    #[inline]
    pub fn set_done(&self) {
        self.done.release();
    }

    /// Take the done state if the worker has finished. On success the
    /// caller owns the output tensor until `release`.
    #[inline]
    pub fn try_take_done(&self) -> bool {
        self.done.try_claim()
    }

    #[inline]
    pub fn set_timestamp(&self, timestamp: u16) {
        self.timestamp.store(timestamp, Ordering::Relaxed);
    }

    #[inline]
    pub fn timestamp(&self) -> u16 {
        self.timestamp.load(Ordering::Relaxed)
    }

    /// Input tensor for writing. Only the claim holder may call this,
    /// between `try_claim` and dispatch.
    #[allow(clippy::mut_from_ref)]
    #[inline]
    pub fn input_mut(&self) -> &mut [f32] {
        // Safety: caller holds the free claim (see module docs).
        unsafe { &mut *self.input.get() }
    }

    /// Input tensor for reading. Only the worker processing this slot may
    /// call this.
    #[inline]
    pub fn input(&self) -> &[f32] {
        // Safety: the slot is in-flight and this worker owns it.
        unsafe { &*self.input.get() }
    }

    /// Output tensor for writing. Only the worker processing this slot may
    /// call this.
    #[allow(clippy::mut_from_ref)]
    #[inline]
    pub fn output_mut(&self) -> &mut [f32] {
        // Safety: the slot is in-flight and this worker owns it.
        unsafe { &mut *self.output.get() }
    }

    /// Output tensor for reading. Only the done holder may call this,
    /// between `try_take_done` and `release`.
    #[inline]
    pub fn output(&self) -> &[f32] {
        // Safety: caller holds the done claim (see module docs).
        unsafe { &*self.output.get() }
    }

    /// True when the slot is claimable. Diagnostic only.
    pub fn is_free(&self) -> bool {
        self.free.get()
    }

    /// True when the output is complete and unconsumed. Diagnostic only.
    pub fn is_done(&self) -> bool {
        self.done.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle() {
        let slot = InferenceSlot::new(4, 2);
        assert!(slot.is_free());
        assert!(!slot.is_done());

        // free -> in-flight
        assert!(slot.try_claim());
        assert!(!slot.try_claim());
        slot.input_mut().copy_from_slice(&[1.0, 2.0, 3.0, 4.0]);
        slot.set_timestamp(7);

        // worker completes
        slot.output_mut().copy_from_slice(&[3.0, 4.0]);
        slot.set_done();
        assert!(slot.is_done());

        // in-flight -> done -> free
        assert!(slot.try_take_done());
        assert!(!slot.try_take_done());
        assert_eq!(slot.output(), &[3.0, 4.0]);
        assert_eq!(slot.timestamp(), 7);
        slot.release();
        assert!(slot.is_free());
    }

    #[test]
    fn test_states_are_exclusive() {
        let slot = InferenceSlot::new(1, 1);
        // Exactly one of free / in-flight / done at every step.
        assert!(slot.is_free() && !slot.is_done());
        assert!(slot.try_claim());
        assert!(!slot.is_free() && !slot.is_done());
        slot.set_done();
        assert!(!slot.is_free() && slot.is_done());
        assert!(slot.try_take_done());
        slot.release();
        assert!(slot.is_free() && !slot.is_done());
    }

    #[test]
    fn test_rollback_releases_claim() {
        let slot = InferenceSlot::new(1, 1);
        assert!(slot.try_claim());
        slot.release();
        assert!(slot.try_claim());
    }
}
