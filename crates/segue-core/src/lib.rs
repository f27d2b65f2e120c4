//! Scheduling and buffering core for realtime neural audio inference.
//!
//! Streams fixed-size audio blocks through neural-network models whose
//! per-invocation latency is variable and often longer than one block,
//! without blocking, allocating, or locking on the audio thread.
//!
//! # Architecture
//!
//! - [`SchedulerContext`]: process-wide controller (worker pool, dispatch
//!   queue, session list, shared per-backend processors)
//! - [`Session`] / [`SessionStream`]: per-stream state, split between the
//!   shared side and the audio-thread side
//! - [`RingBuffer`]: per-channel audio FIFO with history reads
//! - [`InferenceSlot`]: reusable job record with a lock-free
//!   free/in-flight/done protocol
//! - [`Processor`] / [`PrePostProcessor`]: the seams where concrete
//!   inference runtimes and tensor layouts plug in
//!
//! The higher-level `segue` crate wraps this in a per-stream facade.

// Error types
pub mod error;
pub use error::{Error, Result};

// Configuration
pub mod config;
pub use config::{
    ContextConfig, HostConfig, HostTaskHook, InferenceConfig, ModelData, SyncMode, TensorShape,
    DEFAULT_SLOT_POOL_SIZE, RETENTION_SECONDS,
};

// Backend tags and the processor contract
pub mod backend;
pub use backend::{
    AtomicBackend, InferenceBackend, Processor, ProcessorFactory, RoundTripProcessor,
};

// Audio buffering
pub mod buffer;
pub use buffer::RingBuffer;

// Pre/post-processing
pub mod prepost;
pub use prepost::{PrePostProcessor, StreamingPrePostProcessor, WindowedPrePostProcessor};

// Sessions
pub mod session;
pub use session::{Session, SessionStream};

// Scheduler
pub mod context;
pub use context::SchedulerContext;

// Workers
pub mod worker;
pub use worker::InferenceJob;

// Lock-free primitives
pub(crate) mod lockfree;
pub use lockfree::AtomicFlag;

// Inference slots
pub mod slot;
pub use slot::InferenceSlot;
