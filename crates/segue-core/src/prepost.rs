//! The pre/post-processing contract between ring buffers and model tensors.
//!
//! A pre-processor runs on the audio thread at submit time and fills a
//! slot's input tensor from the send ring; a post-processor runs on the
//! audio thread at request time and pushes a slot's output tensor into the
//! receive ring. Implementations are stateless between calls; all shape
//! information comes from the inference config.
//!
//! The send ring is advanced by one hop per invocation regardless of the
//! input tensor size, so models that consume past context see overlapping
//! windows.

use crate::backend::InferenceBackend;
use crate::buffer::RingBuffer;
use crate::config::InferenceConfig;
use crate::error::{Error, Result};

/// Moves samples between a session's ring buffers and a slot's tensors.
///
/// Must be safe to call from the audio thread: no allocation, no locking.
pub trait PrePostProcessor: Send + Sync {
    /// Fill `model_input` from the send ring in the layout `backend`
    /// expects. Advances the ring by one hop.
    fn pre_process(
        &self,
        send: &mut RingBuffer,
        model_input: &mut [f32],
        backend: InferenceBackend,
        config: &InferenceConfig,
    ) -> Result<()>;

    /// Push the newly produced samples from `model_output` into the receive
    /// ring.
    fn post_process(
        &self,
        model_output: &[f32],
        receive: &mut RingBuffer,
        backend: InferenceBackend,
        config: &InferenceConfig,
    ) -> Result<()>;

    /// Fill `window` for one channel: `history_samples` already-consumed
    /// samples read from behind the ring's read position, followed by
    /// `new_samples` popped from the ring. Oldest first.
    fn pop_samples_with_history(
        &self,
        ring: &mut RingBuffer,
        channel: usize,
        window: &mut [f32],
        new_samples: usize,
        history_samples: usize,
    ) {
        debug_assert_eq!(window.len(), new_samples + history_samples);
        for (i, value) in window[..history_samples].iter_mut().enumerate() {
            *value = ring.read_behind(channel, history_samples - i);
        }
        for value in window[history_samples..].iter_mut() {
            *value = ring.pop_sample(channel);
        }
    }

    /// Push `samples` into one channel of the ring, oldest first.
    fn push_samples(&self, ring: &mut RingBuffer, channel: usize, samples: &[f32]) {
        for &value in samples {
            ring.push_sample(channel, value);
        }
    }
}

/// Memory layout of a flat audio tensor, derived from its declared shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TensorLayout {
    /// `[.., channels, samples]`: each channel contiguous.
    ChannelsFirst,
    /// `[.., samples, channels]`: samples interleaved across channels.
    Interleaved,
}

fn layout_of(shape: &[usize], channels: usize, samples: usize) -> TensorLayout {
    match shape.last() {
        Some(&last) if channels > 1 && last == channels && last != samples => {
            TensorLayout::Interleaved
        }
        _ => TensorLayout::ChannelsFirst,
    }
}

/// Default pre/post-processor for streaming models whose input is one
/// window per channel: `hop` new samples preceded by `input - hop` samples
/// of past context.
pub struct StreamingPrePostProcessor;

impl PrePostProcessor for StreamingPrePostProcessor {
    fn pre_process(
        &self,
        send: &mut RingBuffer,
        model_input: &mut [f32],
        backend: InferenceBackend,
        config: &InferenceConfig,
    ) -> Result<()> {
        let shape = config
            .input_shape(backend)
            .ok_or(Error::InvalidBackend(backend))?;
        let channels = config.input_channels;
        let samples = config.input_samples_per_channel();
        let hop = config.hop_samples().min(samples);
        let history = samples - hop;

        match layout_of(shape, channels, samples) {
            TensorLayout::ChannelsFirst => {
                for channel in 0..channels {
                    let base = channel * samples;
                    self.pop_samples_with_history(
                        send,
                        channel,
                        &mut model_input[base..base + samples],
                        hop,
                        history,
                    );
                }
            }
            TensorLayout::Interleaved => {
                for sample in 0..samples {
                    for channel in 0..channels {
                        model_input[sample * channels + channel] = if sample < history {
                            send.read_behind(channel, history - sample)
                        } else {
                            send.pop_sample(channel)
                        };
                    }
                }
            }
        }
        Ok(())
    }

    fn post_process(
        &self,
        model_output: &[f32],
        receive: &mut RingBuffer,
        backend: InferenceBackend,
        config: &InferenceConfig,
    ) -> Result<()> {
        let shape = config
            .output_shape(backend)
            .ok_or(Error::InvalidBackend(backend))?;
        let channels = config.output_channels;
        let hop = config.hop_samples();

        match layout_of(shape, channels, hop) {
            TensorLayout::ChannelsFirst => {
                for channel in 0..channels {
                    let base = channel * hop;
                    self.push_samples(receive, channel, &model_output[base..base + hop]);
                }
            }
            TensorLayout::Interleaved => {
                for sample in 0..hop {
                    for channel in 0..channels {
                        receive.push_sample(channel, model_output[sample * channels + channel]);
                    }
                }
            }
        }
        Ok(())
    }
}

/// Pre/post-processor for batch-of-windows models: the input tensor is
/// `batches` overlapping windows over a mono stream, each producing a small
/// number of new samples (e.g. an LSTM that predicts one sample from 150 of
/// context, batched 256 wide).
pub struct WindowedPrePostProcessor;

impl PrePostProcessor for WindowedPrePostProcessor {
    fn pre_process(
        &self,
        send: &mut RingBuffer,
        model_input: &mut [f32],
        backend: InferenceBackend,
        config: &InferenceConfig,
    ) -> Result<()> {
        if config.input_channels != 1 || config.output_channels != 1 {
            return Err(Error::InvalidConfig(
                "windowed pre-processing expects a mono stream".to_string(),
            ));
        }
        let shape = config
            .input_shape(backend)
            .ok_or(Error::InvalidBackend(backend))?;
        let batches = *shape.first().unwrap_or(&1);
        let window = config.input_size() / batches.max(1);
        let new_per_batch = config.output_size() / batches.max(1);
        if new_per_batch == 0 || new_per_batch > window {
            return Err(Error::InvalidConfig(format!(
                "window of {} cannot produce {} new samples per batch",
                window, new_per_batch
            )));
        }
        let history = window - new_per_batch;

        // Each batch advances the ring by its own new samples, so
        // consecutive windows overlap by `history`.
        for batch in 0..batches {
            let base = batch * window;
            self.pop_samples_with_history(
                send,
                0,
                &mut model_input[base..base + window],
                new_per_batch,
                history,
            );
        }
        Ok(())
    }

    fn post_process(
        &self,
        model_output: &[f32],
        receive: &mut RingBuffer,
        backend: InferenceBackend,
        config: &InferenceConfig,
    ) -> Result<()> {
        config
            .output_shape(backend)
            .ok_or(Error::InvalidBackend(backend))?;
        self.push_samples(receive, 0, model_output);
        Ok(())
    }
}
