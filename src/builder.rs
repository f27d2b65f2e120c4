//! SegueStreamBuilder for configuring a stream.

use crate::{Error, Result, SegueStream};
use segue_core::{
    ContextConfig, HostTaskHook, InferenceBackend, InferenceConfig, PrePostProcessor, Processor,
    SchedulerContext, StreamingPrePostProcessor,
};
use std::sync::Arc;

/// Builder for [`SegueStream`].
///
/// # Example
///
/// ```ignore
/// use segue::prelude::*;
///
/// let stream = SegueStream::builder()
///     .context_config(context_config)
///     .inference_config(inference_config)
///     .build()?;
/// ```
pub struct SegueStreamBuilder {
    context_config: ContextConfig,
    inference_config: Option<InferenceConfig>,
    pp_processor: Option<Arc<dyn PrePostProcessor>>,
    custom_processor: Option<Arc<dyn Processor>>,
    host_task_hook: Option<HostTaskHook>,
    latency_seconds: Option<f64>,
    initial_backend: Option<InferenceBackend>,
}

impl Default for SegueStreamBuilder {
    fn default() -> Self {
        Self {
            context_config: ContextConfig::default(),
            inference_config: None,
            pp_processor: None,
            custom_processor: None,
            host_task_hook: None,
            latency_seconds: None,
            initial_backend: None,
        }
    }
}

impl SegueStreamBuilder {
    /// Set the process-wide context configuration. Only the first stream
    /// in the process constructs the context; later streams must pass a
    /// compatible configuration.
    pub fn context_config(mut self, config: ContextConfig) -> Self {
        self.context_config = config;
        self
    }

    /// Set the per-stream inference configuration (required).
    pub fn inference_config(mut self, config: InferenceConfig) -> Self {
        self.inference_config = Some(config);
        self
    }

    /// Set the pre/post-processor moving samples between ring buffers and
    /// tensors (default: [`StreamingPrePostProcessor`]).
    pub fn pre_post_processor(mut self, pp: Arc<dyn PrePostProcessor>) -> Self {
        self.pp_processor = Some(pp);
        self
    }

    /// Supply a processor for the `Custom` backend tag, shadowing the
    /// built-in pass-through.
    pub fn custom_processor(mut self, processor: Arc<dyn Processor>) -> Self {
        self.custom_processor = Some(processor);
        self
    }

    /// Route inference to host-provided threads through this hook
    /// (requires `use_host_threads` in the context config).
    pub fn host_task_hook(mut self, hook: HostTaskHook) -> Self {
        self.host_task_hook = Some(hook);
        self
    }

    /// Override the latency allowance used for latency reporting
    /// (default: the config's max inference time, or 0.1 s).
    pub fn latency_seconds(mut self, seconds: f64) -> Self {
        self.latency_seconds = Some(seconds);
        self
    }

    /// Backend selected by `prepare_to_play` (default: the first
    /// enabled backend named in the model data, else `Custom`).
    pub fn initial_backend(mut self, backend: InferenceBackend) -> Self {
        self.initial_backend = Some(backend);
        self
    }

    /// Build the stream: get or create the scheduler context and register
    /// a session on it.
    pub fn build(self) -> Result<SegueStream> {
        let inference_config = self.inference_config.ok_or_else(|| {
            Error::InvalidConfig("No inference config set. Use .inference_config().".to_string())
        })?;

        let context = SchedulerContext::get_instance(self.context_config);
        let pp_processor = self
            .pp_processor
            .unwrap_or_else(|| Arc::new(StreamingPrePostProcessor));
        let (session, stream) =
            context.create_session(pp_processor, inference_config, self.custom_processor)?;

        let latency_seconds = self.latency_seconds.unwrap_or_else(|| {
            let max_ms = session.config().max_inference_time_ms;
            if max_ms > 0.0 {
                max_ms as f64 / 1000.0
            } else {
                0.1
            }
        });
        let initial_backend = self.initial_backend.unwrap_or_else(|| {
            session
                .config()
                .model_data
                .iter()
                .map(|model| model.backend)
                .find(|backend| context.enabled_backends().contains(backend))
                .unwrap_or(InferenceBackend::Custom)
        });

        Ok(SegueStream::from_parts(
            context,
            session,
            stream,
            self.host_task_hook,
            latency_seconds,
            initial_backend,
        ))
    }
}
