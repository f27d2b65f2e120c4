//! Backend tags and the processor contract.
//!
//! Concrete inference runtimes live behind the [`Processor`] trait and are
//! registered through [`ProcessorFactory`] closures on the context config.
//! Backend selection is a tag stored atomically on the session; the set of
//! selectable tags is fixed at configuration time.

use crate::config::InferenceConfig;
use crate::error::Result;
use crate::session::Session;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

/// Tag identifying which runtime a session dispatches to.
///
/// `Custom` selects the caller-supplied processor (or the built-in
/// round-trip when none was supplied).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum InferenceBackend {
    Libtorch = 0,
    Onnx = 1,
    Tflite = 2,
    Custom = 3,
}

impl InferenceBackend {
    pub(crate) const COUNT: usize = 4;

    #[inline]
    pub(crate) fn index(self) -> usize {
        self as usize
    }

    pub(crate) fn all() -> [InferenceBackend; Self::COUNT] {
        [
            InferenceBackend::Libtorch,
            InferenceBackend::Onnx,
            InferenceBackend::Tflite,
            InferenceBackend::Custom,
        ]
    }

    fn from_u8(value: u8) -> InferenceBackend {
        match value {
            0 => InferenceBackend::Libtorch,
            1 => InferenceBackend::Onnx,
            2 => InferenceBackend::Tflite,
            _ => InferenceBackend::Custom,
        }
    }
}

/// Lock-free cell holding a session's currently selected backend.
///
/// Relaxed ordering: selection is a preference, not a synchronization
/// point. It takes effect on whichever pre/post-process observes it next.
#[derive(Debug)]
pub struct AtomicBackend {
    value: AtomicU8,
}

impl AtomicBackend {
    pub fn new(backend: InferenceBackend) -> Self {
        Self {
            value: AtomicU8::new(backend as u8),
        }
    }

    #[inline]
    pub fn load(&self) -> InferenceBackend {
        InferenceBackend::from_u8(self.value.load(Ordering::Relaxed))
    }

    #[inline]
    pub fn store(&self, backend: InferenceBackend) {
        self.value.store(backend as u8, Ordering::Relaxed);
    }
}

/// A runtime that can execute one model invocation.
///
/// Implementations are shared across sessions and invoked concurrently from
/// multiple worker threads, so `process` takes `&self`; any internal state
/// needs interior synchronization.
pub trait Processor: Send + Sync {
    /// One-time warm-up after construction (load weights, allocate device
    /// memory). Called before the processor is attached to any session.
    fn prepare(&self) -> Result<()> {
        Ok(())
    }

    /// Run the model: read the flat input tensor, write the flat output
    /// tensor. `session` gives access to the inference config for shape
    /// information.
    fn process(&self, input: &[f32], output: &mut [f32], session: &Session) -> Result<()>;
}

/// Constructor for a backend's processor, registered on the context config.
///
/// Invoked at session creation with the session's inference config; the
/// result is pooled and shared across sessions with equal configs unless
/// the config marks the processor session-exclusive.
pub type ProcessorFactory = Arc<dyn Fn(&InferenceConfig) -> Result<Arc<dyn Processor>> + Send + Sync>;

/// Fallback processor behind the `Custom` tag when the caller supplies
/// none: passes the most recent output-length window of the input through
/// unchanged. Useful for bypass switching and latency measurement.
pub struct RoundTripProcessor;

impl Processor for RoundTripProcessor {
    fn process(&self, input: &[f32], output: &mut [f32], _session: &Session) -> Result<()> {
        let offset = input.len().saturating_sub(output.len());
        let len = output.len().min(input.len());
        output[..len].copy_from_slice(&input[offset..offset + len]);
        for value in output[len..].iter_mut() {
            *value = 0.0;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_atomic_backend() {
        let backend = AtomicBackend::new(InferenceBackend::Custom);
        assert_eq!(backend.load(), InferenceBackend::Custom);
        backend.store(InferenceBackend::Onnx);
        assert_eq!(backend.load(), InferenceBackend::Onnx);
    }

    #[test]
    fn test_round_trip_copies_most_recent_window() {
        let session = Session::for_tests();
        let input = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let mut output = [0.0; 2];
        RoundTripProcessor
            .process(&input, &mut output, &session)
            .unwrap();
        assert_eq!(output, [5.0, 6.0]);
    }

    #[test]
    fn test_round_trip_identity_when_sizes_match() {
        let session = Session::for_tests();
        let input = [0.25, -0.5, 0.75];
        let mut output = [0.0; 3];
        RoundTripProcessor
            .process(&input, &mut output, &session)
            .unwrap();
        assert_eq!(output, input);
    }
}
