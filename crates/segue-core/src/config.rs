//! Configuration types for the scheduler context, sessions, and the host.

use crate::backend::{InferenceBackend, ProcessorFactory};
use crate::error::{Error, Result};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// How `new_data_request` waits for a slot's `done` state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    /// One non-blocking check per slot. The only mode safe for realtime
    /// callers.
    AtomicFlag,
    /// Bounded wait per slot, scaled by the host block duration and the
    /// inference config's wait factor. For non-realtime callers only.
    Semaphore,
}

/// A model file and the backend that loads it.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelData {
    pub path: PathBuf,
    pub backend: InferenceBackend,
}

impl ModelData {
    pub fn new(path: impl Into<PathBuf>, backend: InferenceBackend) -> Self {
        Self {
            path: path.into(),
            backend,
        }
    }
}

/// Flat tensor shapes for one backend's model.
///
/// Shapes may differ between backends (e.g. channels-first vs time-first),
/// but the total element counts must agree: slot tensors are allocated once
/// per session and reinterpreted per backend by the pre/post-processor.
#[derive(Debug, Clone, PartialEq)]
pub struct TensorShape {
    pub input: Vec<usize>,
    pub output: Vec<usize>,
    pub backend: InferenceBackend,
}

impl TensorShape {
    pub fn new(input: Vec<usize>, output: Vec<usize>, backend: InferenceBackend) -> Self {
        Self {
            input,
            output,
            backend,
        }
    }
}

/// Per-session inference configuration. Immutable once the session exists.
#[derive(Debug, Clone, PartialEq)]
pub struct InferenceConfig {
    pub model_data: Vec<ModelData>,
    pub tensor_shapes: Vec<TensorShape>,
    /// Worst-case model invocation latency, used for default latency
    /// reporting.
    pub max_inference_time_ms: f32,
    /// Extra latency introduced by the model itself (lookahead, internal
    /// buffering), added to the reported stream latency.
    pub internal_latency_samples: usize,
    pub input_channels: usize,
    pub output_channels: usize,
    /// Upper bound on concurrent invocations of this session's processor.
    /// Clamped to the worker pool size at session creation.
    pub num_parallel_processors: usize,
    /// When true the session never shares its processor, even with equal
    /// configs.
    pub session_exclusive_processor: bool,
    /// Scales the bounded post-process wait in [`SyncMode::Semaphore`].
    pub wait_factor: f32,
    /// Number of in-flight inference slots per session.
    pub slot_pool_size: usize,
    /// Index of the audio tensor pair when a backend registers several
    /// shape entries (input, output).
    pub index_audio_data: [usize; 2],
}

/// Default slot pool depth per session.
pub const DEFAULT_SLOT_POOL_SIZE: usize = 20;

/// Seconds of audio each ring buffer retains.
pub const RETENTION_SECONDS: usize = 20;

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            model_data: Vec::new(),
            tensor_shapes: Vec::new(),
            max_inference_time_ms: 0.0,
            internal_latency_samples: 0,
            input_channels: 1,
            output_channels: 1,
            num_parallel_processors: 1,
            session_exclusive_processor: false,
            wait_factor: 0.5,
            slot_pool_size: DEFAULT_SLOT_POOL_SIZE,
            index_audio_data: [0, 0],
        }
    }
}

impl InferenceConfig {
    pub fn new(
        model_data: Vec<ModelData>,
        tensor_shapes: Vec<TensorShape>,
        max_inference_time_ms: f32,
    ) -> Self {
        Self {
            model_data,
            tensor_shapes,
            max_inference_time_ms,
            ..Self::default()
        }
    }

    /// Shape entry for `backend`. `Custom` falls back to the first entry
    /// when it has none of its own, so a caller-supplied processor can run
    /// against the universal shapes.
    fn entry(&self, backend: InferenceBackend, index: usize) -> Option<&TensorShape> {
        let mut matching = self.tensor_shapes.iter().filter(|t| t.backend == backend);
        match matching.nth(index) {
            Some(entry) => Some(entry),
            None => {
                if let Some(first) = self.tensor_shapes.iter().find(|t| t.backend == backend) {
                    Some(first)
                } else if backend == InferenceBackend::Custom {
                    self.tensor_shapes.first()
                } else {
                    None
                }
            }
        }
    }

    pub fn input_shape(&self, backend: InferenceBackend) -> Option<&[usize]> {
        self.entry(backend, self.index_audio_data[0])
            .map(|t| t.input.as_slice())
    }

    pub fn output_shape(&self, backend: InferenceBackend) -> Option<&[usize]> {
        self.entry(backend, self.index_audio_data[1])
            .map(|t| t.output.as_slice())
    }

    /// Total input tensor size. Equal across backends (validated).
    pub fn input_size(&self) -> usize {
        self.tensor_shapes
            .first()
            .map(|t| t.input.iter().product())
            .unwrap_or(0)
    }

    /// Total output tensor size. Equal across backends (validated).
    pub fn output_size(&self) -> usize {
        self.tensor_shapes
            .first()
            .map(|t| t.output.iter().product())
            .unwrap_or(0)
    }

    /// New samples produced (and consumed from the send ring) per model
    /// invocation.
    pub fn hop_samples(&self) -> usize {
        self.output_size() / self.output_channels.max(1)
    }

    /// Input samples per channel, including any past-context window.
    pub fn input_samples_per_channel(&self) -> usize {
        self.input_size() / self.input_channels.max(1)
    }

    pub fn validate(&self) -> Result<()> {
        if self.tensor_shapes.is_empty() {
            return Err(Error::InvalidConfig(
                "inference config declares no tensor shapes".to_string(),
            ));
        }
        if self.input_channels == 0 || self.output_channels == 0 {
            return Err(Error::InvalidConfig(
                "inference config declares zero audio channels".to_string(),
            ));
        }
        if self.slot_pool_size == 0 {
            return Err(Error::InvalidConfig(
                "inference config declares an empty slot pool".to_string(),
            ));
        }
        let input_size = self.input_size();
        let output_size = self.output_size();
        if output_size == 0 {
            return Err(Error::InvalidConfig(
                "inference config declares an empty output tensor".to_string(),
            ));
        }
        for shape in &self.tensor_shapes {
            let this_input: usize = shape.input.iter().product();
            let this_output: usize = shape.output.iter().product();
            if this_input != input_size || this_output != output_size {
                return Err(Error::InvalidConfig(format!(
                    "tensor sizes disagree across backends: {:?} declares {}x{}, expected {}x{}",
                    shape.backend, this_input, this_output, input_size, output_size
                )));
            }
        }
        Ok(())
    }
}

/// Optional hook through which the engine asks the host to run `n` units of
/// inference work on host-provided threads. Returns false when the host
/// pool can no longer accept work.
pub type HostTaskHook = Arc<dyn Fn(usize) -> bool + Send + Sync>;

/// Audio configuration handed down by the host at prepare time.
#[derive(Clone, Default)]
pub struct HostConfig {
    pub block_size: usize,
    pub sample_rate: f64,
    pub submit_task: Option<HostTaskHook>,
}

impl HostConfig {
    pub fn new(block_size: usize, sample_rate: f64) -> Self {
        Self {
            block_size,
            sample_rate,
            submit_task: None,
        }
    }

    pub fn with_host_threads(mut self, hook: HostTaskHook) -> Self {
        self.submit_task = Some(hook);
        self
    }

    /// Duration of one host block in seconds.
    pub fn buffer_seconds(&self) -> f64 {
        if self.sample_rate > 0.0 {
            self.block_size as f64 / self.sample_rate
        } else {
            0.0
        }
    }
}

impl fmt::Debug for HostConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostConfig")
            .field("block_size", &self.block_size)
            .field("sample_rate", &self.sample_rate)
            .field("submit_task", &self.submit_task.is_some())
            .finish()
    }
}

/// Process-wide context configuration.
#[derive(Clone)]
pub struct ContextConfig {
    /// Compatibility tag; re-entry with a different version is an error.
    pub version: String,
    /// Internal worker pool size. Zero means host threads only.
    pub num_threads: usize,
    pub enabled_backends: Vec<InferenceBackend>,
    pub sync_mode: SyncMode,
    /// Dispatch inference to host-provided threads when the host supplies a
    /// task hook. Can be disabled later, but re-enabling requires all
    /// sessions to be released first.
    pub use_host_threads: bool,
    /// Processor constructors per backend.
    pub processor_factories: Vec<(InferenceBackend, ProcessorFactory)>,
}

impl Default for ContextConfig {
    fn default() -> Self {
        let num_threads = std::thread::available_parallelism()
            .map(|n| (n.get() / 2).max(1))
            .unwrap_or(1);
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            num_threads,
            enabled_backends: Vec::new(),
            sync_mode: SyncMode::AtomicFlag,
            use_host_threads: false,
            processor_factories: Vec::new(),
        }
    }
}

impl ContextConfig {
    pub fn with_factory(
        mut self,
        backend: InferenceBackend,
        factory: ProcessorFactory,
    ) -> Self {
        self.processor_factories.push((backend, factory));
        self
    }
}

impl fmt::Debug for ContextConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextConfig")
            .field("version", &self.version)
            .field("num_threads", &self.num_threads)
            .field("enabled_backends", &self.enabled_backends)
            .field("sync_mode", &self.sync_mode)
            .field("use_host_threads", &self.use_host_threads)
            .field("processor_factories", &self.processor_factories.len())
            .finish()
    }
}
