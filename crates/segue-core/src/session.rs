//! Per-stream state.
//!
//! A stream's state is split along the threading contract:
//!
//! - [`Session`] is the shared half, owned by the context's session list
//!   and referenced by in-flight dispatch jobs: the slot pool, the
//!   per-backend processors, the selected backend, and the lifecycle
//!   atomics. Everything here is lock-free to read.
//! - [`SessionStream`] is the audio-thread half, owned by the stream
//!   facade: both ring buffers, the pending-timestamp list, the wrapping
//!   timestamp counter, and the host config. Only the realtime thread
//!   touches it, so it is plain mutable data.

use crate::backend::{AtomicBackend, InferenceBackend, Processor};
use crate::buffer::RingBuffer;
use crate::config::{HostConfig, InferenceConfig, RETENTION_SECONDS};
use crate::prepost::PrePostProcessor;
use crate::slot::InferenceSlot;
use arc_swap::ArcSwap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// One processor handle per backend tag.
#[derive(Clone, Default)]
pub(crate) struct ProcessorSet {
    slots: [Option<Arc<dyn Processor>>; InferenceBackend::COUNT],
}

/// Shared per-stream state. See the module docs for the split with
/// [`SessionStream`].
pub struct Session {
    session_id: u64,
    config: InferenceConfig,
    pp_processor: Arc<dyn PrePostProcessor>,
    slots: ArcSwap<Vec<Arc<InferenceSlot>>>,
    processors: ArcSwap<ProcessorSet>,
    current_backend: AtomicBackend,
    initialized: AtomicBool,
    active_inferences: AtomicUsize,
}

impl Session {
    pub(crate) fn new(
        session_id: u64,
        pp_processor: Arc<dyn PrePostProcessor>,
        config: InferenceConfig,
    ) -> Self {
        Self {
            session_id,
            config,
            pp_processor,
            slots: ArcSwap::from_pointee(Vec::new()),
            processors: ArcSwap::from_pointee(ProcessorSet::default()),
            current_backend: AtomicBackend::new(InferenceBackend::Custom),
            initialized: AtomicBool::new(false),
            active_inferences: AtomicUsize::new(0),
        }
    }

    pub fn session_id(&self) -> u64 {
        self.session_id
    }

    pub fn config(&self) -> &InferenceConfig {
        &self.config
    }

    pub(crate) fn pp_processor(&self) -> &Arc<dyn PrePostProcessor> {
        &self.pp_processor
    }

    /// Current slot pool. Wait-free load; the pool is only replaced while
    /// the session is quiesced during prepare.
    pub(crate) fn slots(&self) -> arc_swap::Guard<Arc<Vec<Arc<InferenceSlot>>>> {
        self.slots.load()
    }

    /// Discard the slot pool and allocate a fresh one sized for the
    /// config's tensors. Caller must have quiesced the session first.
    pub(crate) fn rebuild_slots(&self) {
        let input_size = self.config.input_size();
        let output_size = self.config.output_size();
        let pool: Vec<Arc<InferenceSlot>> = (0..self.config.slot_pool_size)
            .map(|_| Arc::new(InferenceSlot::new(input_size, output_size)))
            .collect();
        self.slots.store(Arc::new(pool));
    }

    pub(crate) fn clear_slots(&self) {
        self.slots.store(Arc::new(Vec::new()));
    }

    /// Assign `processor` to the slot for `backend`, leaving the other
    /// backends untouched.
    pub fn set_processor(&self, backend: InferenceBackend, processor: Arc<dyn Processor>) {
        let mut set = ProcessorSet::clone(&self.processors.load());
        set.slots[backend.index()] = Some(processor);
        self.processors.store(Arc::new(set));
    }

    pub fn processor_for(&self, backend: InferenceBackend) -> Option<Arc<dyn Processor>> {
        self.processors.load().slots[backend.index()].clone()
    }

    /// Processor for the currently selected backend.
    pub fn current_processor(&self) -> Option<Arc<dyn Processor>> {
        self.processor_for(self.current_backend())
    }

    pub fn current_backend(&self) -> InferenceBackend {
        self.current_backend.load()
    }

    pub fn set_backend(&self, backend: InferenceBackend) {
        self.current_backend.store(backend);
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    pub(crate) fn set_initialized(&self, value: bool) {
        self.initialized.store(value, Ordering::Release);
    }

    pub(crate) fn begin_inference(&self) {
        self.active_inferences.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn end_inference(&self) {
        self.active_inferences.fetch_sub(1, Ordering::AcqRel);
    }

    pub fn active_inferences(&self) -> usize {
        self.active_inferences.load(Ordering::Acquire)
    }

    #[cfg(test)]
    pub(crate) fn for_tests() -> Self {
        use crate::prepost::StreamingPrePostProcessor;
        Self::new(
            0,
            Arc::new(StreamingPrePostProcessor),
            InferenceConfig::default(),
        )
    }
}

/// Audio-thread half of a stream: ring buffers, pending timestamps, and
/// host configuration. Owned by the stream facade; handed mutably into the
/// context's submit/request entry points.
pub struct SessionStream {
    pub(crate) send_buffer: RingBuffer,
    pub(crate) receive_buffer: RingBuffer,
    /// Pending timestamps, newest at the front. Drained from the back so
    /// completions are emitted in submit order.
    pub(crate) time_stamps: Vec<u16>,
    /// Next timestamp to assign, wrapping mod 2^16.
    pub(crate) current_queue: u16,
    pub(crate) host_config: HostConfig,
}

impl SessionStream {
    pub(crate) fn new() -> Self {
        Self {
            send_buffer: RingBuffer::new(),
            receive_buffer: RingBuffer::new(),
            time_stamps: Vec::new(),
            current_queue: 0,
            host_config: HostConfig::default(),
        }
    }

    /// Size the ring buffers for the host sample rate and reset all
    /// positions and timestamps.
    pub(crate) fn prepare(&mut self, host_config: HostConfig, config: &InferenceConfig) {
        let capacity = (host_config.sample_rate as usize).max(1) * RETENTION_SECONDS;
        self.send_buffer
            .initialize_with_positions(config.input_channels, capacity);
        self.receive_buffer
            .initialize_with_positions(config.output_channels, capacity);
        self.time_stamps = Vec::with_capacity(config.slot_pool_size);
        self.current_queue = 0;
        self.host_config = host_config;
    }

    /// Reset both ring buffers and forget pending timestamps, keeping the
    /// allocations.
    pub(crate) fn clear(&mut self) {
        self.send_buffer.clear_with_positions();
        self.receive_buffer.clear_with_positions();
        self.time_stamps.clear();
        self.current_queue = 0;
    }

    /// Send ring, for the facade's submit path.
    pub fn send(&mut self) -> &mut RingBuffer {
        &mut self.send_buffer
    }

    /// Receive ring, for the facade's request path.
    pub fn receive(&mut self) -> &mut RingBuffer {
        &mut self.receive_buffer
    }

    /// Unread output samples currently buffered.
    pub fn output_available(&self) -> usize {
        if self.receive_buffer.num_channels() == 0 {
            0
        } else {
            self.receive_buffer.available(0)
        }
    }

    pub fn host_config(&self) -> &HostConfig {
        &self.host_config
    }
}
