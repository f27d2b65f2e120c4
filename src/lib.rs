//! # Segue - realtime neural inference for audio streams
//!
//! Segue sits between a realtime audio producer and one or more
//! neural-network inference engines whose per-invocation latency is
//! variable and frequently longer than one audio block. It streams audio
//! through a model without blocking the audio callback, without allocating
//! or locking on the realtime path, and while tolerating model latency
//! longer than a single block.
//!
//! ## Architecture
//!
//! - **segue** - this crate: the per-stream [`SegueStream`] facade and its
//!   builder.
//! - **segue-core** - the scheduling and buffering core: process-wide
//!   scheduler context, sessions, lock-free inference slots, ring buffers,
//!   worker threads, and the pre/post-processing contract.
//!
//! Concrete inference runtimes are not part of segue: they plug in behind
//! the [`Processor`] trait via factories on the [`ContextConfig`].
//!
//! ## Quick Start
//!
//! ```ignore
//! use segue::prelude::*;
//! use std::sync::Arc;
//!
//! let context_config = ContextConfig {
//!     enabled_backends: vec![InferenceBackend::Onnx],
//!     ..ContextConfig::default()
//! }
//! .with_factory(InferenceBackend::Onnx, my_onnx_factory());
//!
//! let inference_config = InferenceConfig::new(
//!     vec![ModelData::new("denoiser.onnx", InferenceBackend::Onnx)],
//!     vec![TensorShape::new(vec![1, 1, 2048], vec![1, 1, 2048], InferenceBackend::Onnx)],
//!     5.0,
//! );
//!
//! let mut stream = SegueStream::builder()
//!     .context_config(context_config)
//!     .inference_config(inference_config)
//!     .build()?;
//!
//! // From the host's prepare callback:
//! stream.prepare_to_play(48_000.0, 512)?;
//!
//! // From the audio callback:
//! stream.submit(&[input_block])?;
//! stream.request(&mut [output_block])?;
//! ```
//!
//! ## Degradation
//!
//! When the model cannot keep up (no free inference slot, or the dispatch
//! queue is full) the scheduler drops one model step of input and emits
//! one model step of silence in its place; the stream never stalls the
//! audio thread. Output that arrives late is zero-filled and later caught
//! up by dropping surplus blocks.

/// Re-export of segue-core for direct access.
pub use segue_core as core;

pub use segue_core::{
    AtomicBackend,
    ContextConfig,
    // Error
    Error,
    HostConfig,
    HostTaskHook,
    // Backends
    InferenceBackend,
    // Configuration
    InferenceConfig,
    InferenceSlot,
    ModelData,
    // Pre/post-processing
    PrePostProcessor,
    Processor,
    ProcessorFactory,
    Result,
    // Buffers
    RingBuffer,
    RoundTripProcessor,
    // Scheduler
    SchedulerContext,
    Session,
    SessionStream,
    StreamingPrePostProcessor,
    SyncMode,
    TensorShape,
    WindowedPrePostProcessor,
};

mod stream;
pub use stream::SegueStream;

mod builder;
pub use builder::SegueStreamBuilder;

/// Common imports for building on segue.
pub mod prelude {
    pub use crate::{
        ContextConfig, Error, HostConfig, HostTaskHook, InferenceBackend, InferenceConfig,
        ModelData, PrePostProcessor, Processor, ProcessorFactory, Result, SchedulerContext,
        SegueStream, SegueStreamBuilder, StreamingPrePostProcessor, SyncMode, TensorShape,
        WindowedPrePostProcessor,
    };
}
