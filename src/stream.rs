//! Per-stream handle used by the audio thread.

use crate::{Error, Result};
use segue_core::{
    HostConfig, HostTaskHook, InferenceBackend, SchedulerContext, Session, SessionStream,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Streams audio blocks through a neural model.
///
/// The realtime entry points are [`submit`](Self::submit) and
/// [`request`](Self::request): submit copies a block into the stream's send
/// ring and lets the scheduler dispatch any complete model inputs; request
/// drains completed inferences and fills a block from the receive ring,
/// zero-filling (and later catching up) when the model falls behind.
///
/// Dropping the stream releases its session; the process-wide scheduler
/// context tears itself down with the last stream.
///
/// ```ignore
/// let mut stream = SegueStream::builder()
///     .inference_config(config)
///     .build()?;
/// stream.prepare_to_play(48_000.0, 512)?;
///
/// // In the audio callback:
/// stream.submit(&[input_block])?;
/// stream.request(&mut [output_block])?;
/// ```
pub struct SegueStream {
    context: Arc<SchedulerContext>,
    session: Arc<Session>,
    stream: SessionStream,
    host_task_hook: Option<HostTaskHook>,
    latency_seconds: f64,
    latency_samples: usize,
    sample_rate: f64,
    block_size: usize,
    initial_backend: InferenceBackend,
    offline: AtomicBool,
    /// Blocks the output has fallen behind by; drives catch-up drops.
    shortfall_blocks: u32,
}

impl SegueStream {
    /// Create a new stream builder.
    pub fn builder() -> crate::SegueStreamBuilder {
        crate::SegueStreamBuilder::default()
    }

    pub(crate) fn from_parts(
        context: Arc<SchedulerContext>,
        session: Arc<Session>,
        stream: SessionStream,
        host_task_hook: Option<HostTaskHook>,
        latency_seconds: f64,
        initial_backend: InferenceBackend,
    ) -> Self {
        Self {
            context,
            session,
            stream,
            host_task_hook,
            latency_seconds,
            latency_samples: 0,
            sample_rate: 0.0,
            block_size: 0,
            initial_backend,
            offline: AtomicBool::new(false),
            shortfall_blocks: 0,
        }
    }

    /// Size the stream for the host's sample rate and block size and select
    /// the initial backend. Safe to call again on a live stream; in-flight
    /// work is drained first.
    pub fn prepare_to_play(&mut self, sample_rate: f64, block_size: usize) -> Result<()> {
        if sample_rate <= 0.0 || block_size == 0 {
            return Err(Error::InvalidConfig(format!(
                "invalid host audio config: {} Hz, block of {}",
                sample_rate, block_size
            )));
        }
        self.sample_rate = sample_rate;
        self.block_size = block_size;
        self.latency_samples = (self.latency_seconds * sample_rate).round() as usize
            + self.session.config().internal_latency_samples;
        self.shortfall_blocks = 0;

        let mut host_config = HostConfig::new(block_size, sample_rate);
        if let Some(hook) = &self.host_task_hook {
            host_config = host_config.with_host_threads(hook.clone());
        }
        self.context.prepare(&self.session, &mut self.stream, host_config)?;
        self.session.set_backend(self.initial_backend);
        Ok(())
    }

    /// Submit one block of input, one slice per channel.
    ///
    /// Realtime mode copies the samples into the send ring and dispatches
    /// any complete model inputs. Offline mode runs the processor
    /// synchronously on a full-size tensor instead.
    pub fn submit(&mut self, input: &[&[f32]]) -> Result<()> {
        if self.is_offline() {
            return self.submit_offline(input);
        }
        let channels = self.session.config().input_channels.min(input.len());
        let block = input.first().map(|c| c.len()).unwrap_or(0);
        for sample in 0..block {
            for (channel, data) in input.iter().enumerate().take(channels) {
                self.stream.send().push_sample(channel, data[sample]);
            }
        }
        self.context.new_data_submitted(&self.session, &mut self.stream)
    }

    /// Fill one block of output, one slice per channel.
    ///
    /// Realtime mode drains completed inferences first. When the receive
    /// ring cannot cover the block the output is zeroed and the stream
    /// remembers the shortfall; once the ring runs two or more blocks
    /// ahead, one block is dropped per call to catch back up.
    pub fn request(&mut self, output: &mut [&mut [f32]]) -> Result<()> {
        let block = output.first().map(|c| c.len()).unwrap_or(0);
        if block == 0 {
            return Ok(());
        }
        if self.is_offline() {
            self.drain_offline(output);
            return Ok(());
        }

        let buffer_seconds = if self.sample_rate > 0.0 {
            block as f64 / self.sample_rate
        } else {
            0.0
        };
        self.context
            .new_data_request(&self.session, &mut self.stream, buffer_seconds)?;
        self.drain_realtime(output, block);
        Ok(())
    }

    fn drain_realtime(&mut self, output: &mut [&mut [f32]], block: usize) {
        let channels = self.session.config().output_channels.min(output.len());

        while self.shortfall_blocks > 0 && self.stream.output_available() >= 2 * block {
            for channel in 0..channels {
                for _ in 0..block {
                    self.stream.receive().pop_sample(channel);
                }
            }
            self.shortfall_blocks -= 1;
            tracing::warn!(
                "Catching up one block in session {}",
                self.session.session_id()
            );
        }

        if self.stream.output_available() >= block {
            for (channel, data) in output.iter_mut().enumerate().take(channels) {
                for value in data.iter_mut() {
                    *value = self.stream.receive().pop_sample(channel);
                }
            }
        } else {
            for data in output.iter_mut() {
                data.fill(0.0);
            }
            self.shortfall_blocks += 1;
            tracing::warn!("Missing samples in session {}", self.session.session_id());
        }
    }

    /// Offline submit: interleave the block into a full-size model input,
    /// run the processor on the calling thread, and buffer the output.
    fn submit_offline(&mut self, input: &[&[f32]]) -> Result<()> {
        let session = self.session.clone();
        let config = session.config();
        let input_samples = config.input_samples_per_channel();
        let output_samples = config.output_size() / config.output_channels.max(1);

        let mut model_input = vec![0.0f32; config.input_size()];
        let mut model_output = vec![0.0f32; config.output_size()];
        for (channel, data) in input.iter().enumerate().take(config.input_channels) {
            let base = channel * input_samples;
            let len = data.len().min(input_samples);
            model_input[base..base + len].copy_from_slice(&data[..len]);
        }

        let backend = session.current_backend();
        let processor = session
            .processor_for(backend)
            .ok_or(Error::InvalidBackend(backend))?;
        processor.process(&model_input, &mut model_output, &session)?;

        for channel in 0..config.output_channels {
            let base = channel * output_samples;
            for sample in 0..output_samples {
                self.stream
                    .receive()
                    .push_sample(channel, model_output[base + sample]);
            }
        }
        Ok(())
    }

    fn drain_offline(&mut self, output: &mut [&mut [f32]]) {
        let channels = self.session.config().output_channels.min(output.len());
        for (channel, data) in output.iter_mut().enumerate().take(channels) {
            for value in data.iter_mut() {
                *value = self.stream.receive().pop_sample(channel);
            }
        }
    }

    /// Select the backend for subsequent pre/post-processing and
    /// inference. Takes effect on the next block.
    pub fn set_backend(&self, backend: InferenceBackend) {
        self.session.set_backend(backend);
    }

    pub fn backend(&self) -> InferenceBackend {
        self.session.current_backend()
    }

    /// Switch between realtime scheduling and synchronous offline
    /// processing.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::Release);
    }

    pub fn is_offline(&self) -> bool {
        self.offline.load(Ordering::Acquire)
    }

    /// Reported stream latency in samples: the configured inference-time
    /// allowance plus the model's internal latency.
    pub fn latency_samples(&self) -> usize {
        self.latency_samples
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn session_id(&self) -> u64 {
        self.session.session_id()
    }

    /// Unread output samples currently buffered.
    pub fn output_samples_available(&self) -> usize {
        self.stream.output_available()
    }

    /// The process-wide scheduler context this stream runs on.
    pub fn context(&self) -> &Arc<SchedulerContext> {
        &self.context
    }

    /// Run one unit of inference work on the calling thread. For hosts
    /// that provide their own thread pool.
    pub fn exec_inference(&self) {
        self.context.exec_inference();
    }
}

impl Drop for SegueStream {
    fn drop(&mut self) {
        self.context.release_session(self.session.clone());
    }
}
