//! Test helpers and fixtures for segue integration tests.
//!
//! Each scenario lives in its own test binary because the scheduler
//! context is process-wide; tests inside one file serialize on a
//! file-local lock where needed.
//!
//! Deterministic tests run the context in `SyncMode::Semaphore` with a
//! large wait factor so `request` waits (bounded) for in-flight work
//! instead of emitting silence. Realtime-behavior tests use
//! `SyncMode::AtomicFlag` and assert on the degradation path instead.

#![allow(dead_code)]

use segue::prelude::*;
use segue::Session;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Default test sample rate (matches common hardware).
pub const TEST_SAMPLE_RATE: f64 = 48_000.0;

/// Small block size so saturation scenarios stay fast.
pub const TEST_BLOCK_SIZE: usize = 64;

/// Generous per-block wait multiplier for deterministic tests.
pub const TEST_WAIT_FACTOR: f32 = 10_000.0;

/// Linear ramp starting at 1.0 (so silence is distinguishable).
pub fn generate_ramp(num_samples: usize) -> Vec<f32> {
    (1..=num_samples).map(|i| i as f32).collect()
}

/// Copy the most recent `output.len()` samples of `input`: the shared
/// tail-window behavior of all test processors.
fn copy_tail(input: &[f32], output: &mut [f32]) {
    let offset = input.len().saturating_sub(output.len());
    let len = output.len().min(input.len());
    output[..len].copy_from_slice(&input[offset..offset + len]);
}

/// Scales the stream by a constant factor. Its output is the "characteristic"
/// used to observe backend switches.
pub struct GainProcessor {
    pub gain: f32,
}

impl Processor for GainProcessor {
    fn process(&self, input: &[f32], output: &mut [f32], _session: &Session) -> Result<()> {
        copy_tail(input, output);
        for value in output.iter_mut() {
            *value *= self.gain;
        }
        Ok(())
    }
}

/// Pass-through that sleeps for a fixed duration per invocation, simulating
/// a model slower than the block period.
pub struct SleepyProcessor {
    pub sleep: Duration,
}

impl Processor for SleepyProcessor {
    fn process(&self, input: &[f32], output: &mut [f32], _session: &Session) -> Result<()> {
        std::thread::sleep(self.sleep);
        copy_tail(input, output);
        Ok(())
    }
}

/// Pass-through whose first invocation is much slower than the rest, so
/// later submissions complete first and the scheduler's reordering logic
/// is exercised.
pub struct SlowFirstProcessor {
    calls: AtomicUsize,
    pub first_delay: Duration,
    pub rest_delay: Duration,
}

impl SlowFirstProcessor {
    pub fn new(first_delay: Duration, rest_delay: Duration) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            first_delay,
            rest_delay,
        }
    }
}

impl Processor for SlowFirstProcessor {
    fn process(&self, input: &[f32], output: &mut [f32], _session: &Session) -> Result<()> {
        let call = self.calls.fetch_add(1, Ordering::AcqRel);
        std::thread::sleep(if call == 0 {
            self.first_delay
        } else {
            self.rest_delay
        });
        copy_tail(input, output);
        Ok(())
    }
}

/// Factory producing [`GainProcessor`]s, for attaching a gain behind a real
/// backend tag.
pub fn gain_factory(gain: f32) -> ProcessorFactory {
    Arc::new(move |_config: &InferenceConfig| {
        Ok(Arc::new(GainProcessor { gain }) as Arc<dyn Processor>)
    })
}

/// Context config for deterministic tests: bounded waiting on request.
pub fn semaphore_context(num_threads: usize) -> ContextConfig {
    ContextConfig {
        num_threads,
        sync_mode: SyncMode::Semaphore,
        ..ContextConfig::default()
    }
}

/// Context config with realtime (non-waiting) request semantics.
pub fn atomic_context(num_threads: usize) -> ContextConfig {
    ContextConfig {
        num_threads,
        sync_mode: SyncMode::AtomicFlag,
        ..ContextConfig::default()
    }
}

/// Mono inference config with no model files: the `Custom` backend serves
/// the stream.
pub fn mono_config(input_samples: usize, output_samples: usize) -> InferenceConfig {
    let mut config = InferenceConfig::new(
        Vec::new(),
        vec![TensorShape::new(
            vec![1, 1, input_samples],
            vec![1, 1, output_samples],
            InferenceBackend::Custom,
        )],
        0.0,
    );
    config.wait_factor = TEST_WAIT_FACTOR;
    config
}

/// Mono inference config that also names an ONNX model so a pooled
/// processor is attached behind `InferenceBackend::Onnx`.
pub fn onnx_config(input_samples: usize, output_samples: usize) -> InferenceConfig {
    let mut config = InferenceConfig::new(
        vec![ModelData::new("gain.onnx", InferenceBackend::Onnx)],
        vec![TensorShape::new(
            vec![1, 1, input_samples],
            vec![1, 1, output_samples],
            InferenceBackend::Onnx,
        )],
        0.0,
    );
    config.wait_factor = TEST_WAIT_FACTOR;
    config
}

/// Submit one mono block.
pub fn submit_block(stream: &mut SegueStream, block: &[f32]) {
    stream.submit(&[block]).expect("submit failed");
}

/// Request one mono block.
pub fn request_block(stream: &mut SegueStream, block_size: usize) -> Vec<f32> {
    let mut block = vec![0.0f32; block_size];
    stream
        .request(&mut [block.as_mut_slice()])
        .expect("request failed");
    block
}

/// True when every sample is exactly zero.
pub fn is_silence(block: &[f32]) -> bool {
    block.iter().all(|&value| value == 0.0)
}
