//! Lock-free primitives for real-time audio.

use std::sync::atomic::{AtomicBool, Ordering};

/// Cache-line aligned atomic flag with single-permit claim semantics.
///
/// Models a binary token: `release` makes the token available,
/// `try_claim` takes it if present. Used for the `free` and `done`
/// states of an inference slot.
#[derive(Debug)]
#[repr(align(64))]
pub struct AtomicFlag {
    value: AtomicBool,
}

impl AtomicFlag {
    pub fn new(value: bool) -> Self {
        Self {
            value: AtomicBool::new(value),
        }
    }

    #[inline]
    pub fn get(&self) -> bool {
        self.value.load(Ordering::Acquire)
    }

    /// Take the token if it is available. Wait-free single CAS.
    #[inline]
    pub fn try_claim(&self) -> bool {
        self.value.swap(false, Ordering::AcqRel)
    }

    /// Make the token available again.
    #[inline]
    pub fn release(&self) {
        self.value.store(true, Ordering::Release);
    }

    #[inline]
    pub fn set(&self, value: bool) {
        self.value.store(value, Ordering::Release);
    }
}

impl Default for AtomicFlag {
    fn default() -> Self {
        Self::new(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claim_release() {
        let flag = AtomicFlag::new(true);
        assert!(flag.try_claim());
        assert!(!flag.try_claim());
        flag.release();
        assert!(flag.get());
        assert!(flag.try_claim());
    }

    #[test]
    fn test_default_unavailable() {
        let flag = AtomicFlag::default();
        assert!(!flag.get());
        assert!(!flag.try_claim());
    }
}
