//! Process-wide scheduler context.
//!
//! The context owns the dispatch queue, the internal worker pool, the
//! session list, and the per-backend shared processor pool. It is a
//! process-wide singleton with explicit [`get_instance`] /
//! [`release_instance`] semantics: the first caller constructs it, later
//! callers get the existing instance (with a compatibility check), and it
//! tears itself down when the last session is released.
//!
//! [`get_instance`]: SchedulerContext::get_instance
//! [`release_instance`]: SchedulerContext::release_instance

use crate::backend::{InferenceBackend, Processor, ProcessorFactory, RoundTripProcessor};
use crate::config::{ContextConfig, HostConfig, InferenceConfig, SyncMode};
use crate::error::{Error, Result};
use crate::prepost::PrePostProcessor;
use crate::session::{Session, SessionStream};
use crate::slot::InferenceSlot;
use crate::worker::{self, InferenceJob, InferenceWorker};
use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

/// Capacity of the shared dispatch queue.
const DISPATCH_QUEUE_CAPACITY: usize = 256;

/// Sleep between polls while waiting for workers or in-flight jobs.
const POLL_INTERVAL: Duration = Duration::from_micros(50);

static CONTEXT: Mutex<Weak<SchedulerContext>> = Mutex::new(Weak::new());

/// A pooled processor and the config it was built for.
struct PoolEntry {
    backend: InferenceBackend,
    config: InferenceConfig,
    processor: Arc<dyn Processor>,
}

/// Outcome of one claim-and-dispatch attempt.
enum Dispatch {
    Submitted,
    /// Nothing was consumed from the send ring.
    NoFreeSlot,
    /// The pre-processor already advanced the send ring by one hop.
    QueueFull,
}

pub struct SchedulerContext {
    version: String,
    enabled_backends: Vec<InferenceBackend>,
    sync_mode: SyncMode,
    factories: Vec<(InferenceBackend, ProcessorFactory)>,
    num_threads: AtomicUsize,
    use_host_threads: AtomicBool,
    host_threads_active: AtomicBool,
    job_tx: Sender<InferenceJob>,
    job_rx: Receiver<InferenceJob>,
    workers: Mutex<Vec<InferenceWorker>>,
    sessions: Mutex<Vec<Arc<Session>>>,
    processor_pool: Mutex<Vec<PoolEntry>>,
    next_session_id: AtomicU64,
    active_sessions: AtomicUsize,
}

impl SchedulerContext {
    fn new(config: ContextConfig) -> Self {
        let (job_tx, job_rx) = crossbeam_channel::bounded(DISPATCH_QUEUE_CAPACITY);
        let workers = (0..config.num_threads)
            .map(|i| InferenceWorker::new(i, job_rx.clone()))
            .collect();
        Self {
            version: config.version,
            enabled_backends: config.enabled_backends,
            sync_mode: config.sync_mode,
            factories: config.processor_factories,
            num_threads: AtomicUsize::new(config.num_threads),
            use_host_threads: AtomicBool::new(config.use_host_threads),
            host_threads_active: AtomicBool::new(false),
            job_tx,
            job_rx,
            workers: Mutex::new(workers),
            sessions: Mutex::new(Vec::new()),
            processor_pool: Mutex::new(Vec::new()),
            next_session_id: AtomicU64::new(0),
            active_sessions: AtomicUsize::new(0),
        }
    }

    /// Get or create the process-wide context.
    ///
    /// When an instance already exists its version, enabled backends, and
    /// synchronization mode must match `config`; mismatches are logged and
    /// the existing instance is returned unchanged. A smaller
    /// `num_threads` shrinks the pool; `use_host_threads == false` is
    /// honored immediately (re-enabling requires all sessions released).
    pub fn get_instance(config: ContextConfig) -> Arc<SchedulerContext> {
        let mut cell = CONTEXT.lock();
        if let Some(existing) = cell.upgrade() {
            existing.check_reentry(&config);
            return existing;
        }
        let context = Arc::new(SchedulerContext::new(config));
        *cell = Arc::downgrade(&context);
        tracing::info!("segue context version {}", context.version);
        context
    }

    /// Forget the process-wide instance. Called automatically when the
    /// last session is released; the context itself drops with its last
    /// `Arc`.
    pub fn release_instance() {
        *CONTEXT.lock() = Weak::new();
    }

    fn check_reentry(&self, config: &ContextConfig) {
        if self.version != config.version {
            tracing::error!(
                "Context already initialized with version {} (requested {})",
                self.version,
                config.version
            );
        }
        if self.enabled_backends != config.enabled_backends {
            tracing::error!("Context already initialized with different backends enabled");
        }
        if self.sync_mode != config.sync_mode {
            tracing::error!("Context already initialized with different synchronization mode");
        }
        if config.num_threads < self.workers.lock().len() {
            self.resize_worker_pool(config.num_threads);
        }
        // Disabling host threads is honored immediately; re-enabling only
        // happens through a fresh context.
        if !config.use_host_threads && self.use_host_threads.load(Ordering::Acquire) {
            self.use_host_threads.store(false, Ordering::Release);
        }
    }

    /// Create a session for one audio stream.
    ///
    /// Attaches a shared (or fresh) processor per enabled backend named in
    /// the config's model data, plus the caller's custom processor behind
    /// the `Custom` tag (a pass-through when none is supplied).
    pub fn create_session(
        &self,
        pp_processor: Arc<dyn PrePostProcessor>,
        mut config: InferenceConfig,
        custom_processor: Option<Arc<dyn Processor>>,
    ) -> Result<(Arc<Session>, SessionStream)> {
        config.validate()?;

        let session_id = self.next_session_id.fetch_add(1, Ordering::AcqRel) + 1;
        let pool_size = self.workers.lock().len();
        if pool_size > 0 && config.num_parallel_processors > pool_size {
            tracing::warn!(
                "Session {} requested {} parallel processors but only {} worker threads exist; clamping",
                session_id,
                config.num_parallel_processors,
                pool_size
            );
            config.num_parallel_processors = pool_size;
        }

        let session = Arc::new(Session::new(session_id, pp_processor, config));

        let custom = match custom_processor {
            Some(custom) => {
                custom.prepare()?;
                custom
            }
            None => Arc::new(RoundTripProcessor) as Arc<dyn Processor>,
        };
        session.set_processor(InferenceBackend::Custom, custom);

        let mut attached = Vec::new();
        for model in &session.config().model_data {
            if attached.contains(&model.backend) {
                continue;
            }
            if !self.enabled_backends.contains(&model.backend) {
                tracing::warn!(
                    "Backend {:?} is not enabled in this context; {} will not be attached",
                    model.backend,
                    model.path.display()
                );
                continue;
            }
            self.attach_processor(&session, model.backend)?;
            attached.push(model.backend);
        }

        self.sessions.lock().push(session.clone());
        self.active_sessions.fetch_add(1, Ordering::AcqRel);
        session.set_initialized(true);

        Ok((session, SessionStream::new()))
    }

    fn attach_processor(&self, session: &Arc<Session>, backend: InferenceBackend) -> Result<()> {
        let factory = self
            .factories
            .iter()
            .find(|(tag, _)| *tag == backend)
            .map(|(_, factory)| factory.clone())
            .ok_or(Error::BackendUnavailable(backend))?;

        let mut pool = self.processor_pool.lock();
        if !session.config().session_exclusive_processor {
            if let Some(entry) = pool
                .iter()
                .find(|entry| entry.backend == backend && entry.config == *session.config())
            {
                session.set_processor(backend, entry.processor.clone());
                return Ok(());
            }
        }

        let processor = factory(session.config())?;
        processor.prepare()?;
        pool.push(PoolEntry {
            backend,
            config: session.config().clone(),
            processor: processor.clone(),
        });
        session.set_processor(backend, processor);
        Ok(())
    }

    /// Release a session: quiesce it, purge its queued jobs, detach its
    /// processors, and tear the context down when it was the last one.
    pub fn release_session(&self, session: Arc<Session>) {
        session.set_initialized(false);
        while session.active_inferences() != 0 {
            std::thread::sleep(POLL_INTERVAL);
        }
        self.drain_session_jobs(&session);

        self.sessions
            .lock()
            .retain(|other| !Arc::ptr_eq(other, &session));
        self.release_processors(&session);

        if self.active_sessions.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.workers.lock().clear();
            Self::release_instance();
        }
    }

    fn release_processors(&self, session: &Arc<Session>) {
        let config = session.config();
        for backend in InferenceBackend::all() {
            if backend == InferenceBackend::Custom {
                continue;
            }
            let Some(processor) = session.processor_for(backend) else {
                continue;
            };
            let shared_elsewhere = !config.session_exclusive_processor
                && self
                    .sessions
                    .lock()
                    .iter()
                    .any(|other| other.config() == config);
            if shared_elsewhere {
                continue;
            }
            self.processor_pool
                .lock()
                .retain(|entry| !Arc::ptr_eq(&entry.processor, &processor));
        }
    }

    /// Remove the session's queued jobs, putting everyone else's back.
    fn drain_session_jobs(&self, session: &Arc<Session>) {
        let mut requeue = Vec::new();
        while let Ok(job) = self.job_rx.try_recv() {
            if !Arc::ptr_eq(&job.session, session) {
                requeue.push(job);
            }
        }
        for job in requeue {
            if self.job_tx.try_send(job).is_err() {
                tracing::error!("Could not requeue inference job");
            }
        }
    }

    /// Re-prepare a session for a new host block size / sample rate.
    ///
    /// Uses the same quiesce-and-drain protocol as release, then rebuilds
    /// the ring buffers and slot pool and (re)starts the worker pool.
    pub fn prepare(
        &self,
        session: &Arc<Session>,
        stream: &mut SessionStream,
        host_config: HostConfig,
    ) -> Result<()> {
        session.set_initialized(false);
        while session.active_inferences() != 0 {
            std::thread::sleep(POLL_INTERVAL);
        }
        self.drain_session_jobs(session);

        stream.clear();
        session.clear_slots();
        stream.prepare(host_config, session.config());
        session.rebuild_slots();

        if stream.host_config().submit_task.is_none() {
            self.use_host_threads.store(false, Ordering::Release);
        }
        self.start_worker_pool()?;
        session.set_initialized(true);

        self.host_threads_active
            .store(self.use_host_threads.load(Ordering::Acquire), Ordering::Release);
        Ok(())
    }

    /// Drain newly submitted samples into inference jobs.
    ///
    /// While the send ring holds at least one hop, claim a slot,
    /// pre-process, and dispatch. When no slot is claimable or the queue
    /// rejects the job, the stream degrades gracefully: the hop is dropped
    /// and one hop of silence is pushed downstream.
    pub fn new_data_submitted(
        &self,
        session: &Arc<Session>,
        stream: &mut SessionStream,
    ) -> Result<()> {
        let hop = session.config().hop_samples();
        if hop == 0 {
            return Ok(());
        }
        let input_channels = session.config().input_channels;
        let output_channels = session.config().output_channels;

        while stream.send_buffer.available(0) >= hop {
            let outcome = self.dispatch_one(session, stream)?;

            if matches!(outcome, Dispatch::Submitted) {
                self.submit_to_host_threads(stream)?;
                continue;
            }

            // One dropped model step becomes one silent model step.
            if matches!(outcome, Dispatch::NoFreeSlot) {
                for channel in 0..input_channels {
                    for _ in 0..hop {
                        stream.send_buffer.pop_sample(channel);
                    }
                }
            }
            for channel in 0..output_channels {
                for _ in 0..hop {
                    stream.receive_buffer.push_sample(channel, 0.0);
                }
            }
        }
        Ok(())
    }

    /// Hand one task to the host thread pool when that mode is active,
    /// falling back to the internal pool the first time the host refuses.
    fn submit_to_host_threads(&self, stream: &SessionStream) -> Result<()> {
        if !self.host_threads_active.load(Ordering::Acquire) {
            return Ok(());
        }
        let Some(hook) = stream.host_config().submit_task.clone() else {
            return Ok(());
        };
        if !hook(1) {
            tracing::warn!(
                "Host thread pool rejected a task; falling back to the internal worker pool"
            );
            self.host_threads_active.store(false, Ordering::Release);
            self.use_host_threads.store(false, Ordering::Release);
            self.start_worker_pool()?;
        }
        Ok(())
    }

    /// Claim the first free slot (index order), pre-process into it, and
    /// enqueue the job. Rolls the claim and timestamp back when the queue
    /// is full.
    fn dispatch_one(&self, session: &Arc<Session>, stream: &mut SessionStream) -> Result<Dispatch> {
        let slots = session.slots();
        let backend = session.current_backend();
        for slot in slots.iter() {
            if !slot.try_claim() {
                continue;
            }

            if let Err(e) = session.pp_processor().pre_process(
                &mut stream.send_buffer,
                slot.input_mut(),
                backend,
                session.config(),
            ) {
                slot.release();
                return Err(e);
            }

            let timestamp = stream.current_queue;
            stream.time_stamps.insert(0, timestamp);
            slot.set_timestamp(timestamp);

            let job = InferenceJob {
                session: session.clone(),
                slot: slot.clone(),
            };
            if self.job_tx.try_send(job).is_err() {
                tracing::error!(
                    "Could not enqueue next inference in session {}",
                    session.session_id()
                );
                slot.release();
                stream.time_stamps.remove(0);
                return Ok(Dispatch::QueueFull);
            }

            stream.current_queue = stream.current_queue.wrapping_add(1);
            return Ok(Dispatch::Submitted);
        }
        tracing::warn!("No free inference slot in session {}", session.session_id());
        Ok(Dispatch::NoFreeSlot)
    }

    /// Drain completed slots into the receive ring, oldest timestamp
    /// first. Stops at the first pending timestamp whose slot is not done;
    /// completions are never reordered.
    ///
    /// `buffer_seconds` scales the bounded per-slot wait in
    /// [`SyncMode::Semaphore`]; it is ignored in [`SyncMode::AtomicFlag`].
    pub fn new_data_request(
        &self,
        session: &Arc<Session>,
        stream: &mut SessionStream,
        buffer_seconds: f64,
    ) -> Result<()> {
        let deadline = match self.sync_mode {
            SyncMode::Semaphore => {
                let micros = buffer_seconds * 1e6 * session.config().wait_factor as f64;
                (micros > 0.0).then(|| Instant::now() + Duration::from_micros(micros as u64))
            }
            SyncMode::AtomicFlag => None,
        };

        while let Some(&timestamp) = stream.time_stamps.last() {
            let slots = session.slots();
            let Some(slot) = slots.iter().find(|slot| slot.timestamp() == timestamp) else {
                tracing::error!(
                    "No slot carries pending timestamp {} in session {}",
                    timestamp,
                    session.session_id()
                );
                stream.time_stamps.pop();
                continue;
            };

            if !Self::acquire_done(slot, deadline) {
                return Ok(());
            }
            stream.time_stamps.pop();

            let result = session.pp_processor().post_process(
                slot.output(),
                &mut stream.receive_buffer,
                session.current_backend(),
                session.config(),
            );
            slot.release();
            result?;
        }
        Ok(())
    }

    fn acquire_done(slot: &InferenceSlot, deadline: Option<Instant>) -> bool {
        if slot.try_take_done() {
            return true;
        }
        let Some(deadline) = deadline else {
            return false;
        };
        while Instant::now() < deadline {
            std::thread::sleep(POLL_INTERVAL);
            if slot.try_take_done() {
                return true;
            }
        }
        false
    }

    /// Run one unit of queued inference work on the calling thread.
    /// Only meaningful in host-threads mode; spins until a job was
    /// executed.
    pub fn exec_inference(&self) {
        if !self.host_threads_active.load(Ordering::Acquire) {
            tracing::warn!("exec_inference called without an active host thread pool");
            return;
        }
        while !worker::execute_one(&self.job_rx) {
            std::thread::sleep(Duration::from_micros(10));
        }
    }

    /// Start every internal worker that is not yet running. No-op in
    /// host-threads mode. Repopulates the pool when it was torn down by a
    /// previous last-session release.
    fn start_worker_pool(&self) -> Result<()> {
        if self.use_host_threads.load(Ordering::Acquire) {
            return Ok(());
        }
        let mut workers = self.workers.lock();
        let target = self.num_threads.load(Ordering::Acquire);
        if workers.is_empty() && target > 0 {
            for i in 0..target {
                workers.push(InferenceWorker::new(i, self.job_rx.clone()));
            }
        }
        for worker in workers.iter_mut() {
            worker.start()?;
            while !worker.is_running() {
                std::thread::sleep(POLL_INTERVAL);
            }
        }
        Ok(())
    }

    /// Shrink (or grow) the internal worker pool. Shrinking waits for each
    /// removed worker to observe its stop request.
    fn resize_worker_pool(&self, new_num_threads: usize) {
        let mut workers = self.workers.lock();
        let current = workers.len();
        if new_num_threads < current {
            while workers.len() > new_num_threads {
                if let Some(worker) = workers.pop() {
                    worker.stop();
                    while worker.is_running() {
                        std::thread::sleep(POLL_INTERVAL);
                    }
                }
            }
        } else {
            for i in current..new_num_threads {
                workers.push(InferenceWorker::new(i, self.job_rx.clone()));
            }
        }
        self.num_threads.store(new_num_threads, Ordering::Release);
    }

    /// Number of live sessions.
    pub fn num_sessions(&self) -> usize {
        self.active_sessions.load(Ordering::Acquire)
    }

    pub fn enabled_backends(&self) -> &[InferenceBackend] {
        &self.enabled_backends
    }

    pub fn sync_mode(&self) -> SyncMode {
        self.sync_mode
    }

    pub fn host_threads_active(&self) -> bool {
        self.host_threads_active.load(Ordering::Acquire)
    }

    /// Current internal worker pool size.
    pub fn num_worker_threads(&self) -> usize {
        self.workers.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ModelData, TensorShape};
    use crate::prepost::StreamingPrePostProcessor;

    // The context is process-wide; tests in this module serialize on this
    // lock so each one sees a fresh instance.
    static SINGLETON_TEST_LOCK: Mutex<()> = Mutex::new(());

    fn passthrough_factory() -> ProcessorFactory {
        Arc::new(|_config| Ok(Arc::new(RoundTripProcessor) as Arc<dyn Processor>))
    }

    fn context_config(num_threads: usize) -> ContextConfig {
        ContextConfig {
            num_threads,
            enabled_backends: vec![InferenceBackend::Onnx],
            use_host_threads: false,
            ..ContextConfig::default()
        }
        .with_factory(InferenceBackend::Onnx, passthrough_factory())
    }

    fn inference_config(slot_pool_size: usize) -> InferenceConfig {
        let mut config = InferenceConfig::new(
            vec![ModelData::new("model.onnx", InferenceBackend::Onnx)],
            vec![TensorShape::new(
                vec![1, 4],
                vec![1, 4],
                InferenceBackend::Onnx,
            )],
            1.0,
        );
        config.slot_pool_size = slot_pool_size;
        config
    }

    fn host_mode_config() -> ContextConfig {
        ContextConfig {
            num_threads: 0,
            use_host_threads: true,
            ..context_config(0)
        }
    }

    fn submit_block(
        context: &SchedulerContext,
        session: &Arc<Session>,
        stream: &mut SessionStream,
        block: &[f32],
    ) {
        for &value in block {
            stream.send().push_sample(0, value);
        }
        context.new_data_submitted(session, stream).unwrap();
    }

    #[test]
    fn test_singleton_reentry_returns_same_instance() {
        let _guard = SINGLETON_TEST_LOCK.lock();
        let first = SchedulerContext::get_instance(context_config(2));
        let second = SchedulerContext::get_instance(ContextConfig {
            enabled_backends: vec![InferenceBackend::Tflite],
            ..context_config(2)
        });
        assert!(Arc::ptr_eq(&first, &second));
        // The mismatching backend set is not applied.
        assert_eq!(second.enabled_backends(), &[InferenceBackend::Onnx]);
        SchedulerContext::release_instance();
    }

    #[test]
    fn test_reentry_shrinks_worker_pool() {
        let _guard = SINGLETON_TEST_LOCK.lock();
        let context = SchedulerContext::get_instance(context_config(4));
        assert_eq!(context.num_worker_threads(), 4);
        let again = SchedulerContext::get_instance(context_config(1));
        assert_eq!(again.num_worker_threads(), 1);
        SchedulerContext::release_instance();
    }

    #[test]
    fn test_session_lifecycle_tears_down_context() {
        let _guard = SINGLETON_TEST_LOCK.lock();
        let context = SchedulerContext::get_instance(context_config(1));
        let (session, _stream) = context
            .create_session(
                Arc::new(StreamingPrePostProcessor),
                inference_config(2),
                None,
            )
            .unwrap();
        assert_eq!(context.num_sessions(), 1);

        context.release_session(session);
        assert_eq!(context.num_sessions(), 0);
        assert_eq!(context.num_worker_threads(), 0);

        // The next get_instance builds a fresh context.
        let fresh = SchedulerContext::get_instance(context_config(1));
        assert!(!Arc::ptr_eq(&context, &fresh));
        SchedulerContext::release_instance();
    }

    #[test]
    fn test_processor_sharing_by_config_identity() {
        let _guard = SINGLETON_TEST_LOCK.lock();
        let context = SchedulerContext::get_instance(context_config(1));
        let (a, _sa) = context
            .create_session(
                Arc::new(StreamingPrePostProcessor),
                inference_config(2),
                None,
            )
            .unwrap();
        let (b, _sb) = context
            .create_session(
                Arc::new(StreamingPrePostProcessor),
                inference_config(2),
                None,
            )
            .unwrap();
        let pa = a.processor_for(InferenceBackend::Onnx).unwrap();
        let pb = b.processor_for(InferenceBackend::Onnx).unwrap();
        assert!(Arc::ptr_eq(&pa, &pb));

        // An exclusive session gets its own instance.
        let mut exclusive = inference_config(2);
        exclusive.session_exclusive_processor = true;
        let (c, _sc) = context
            .create_session(Arc::new(StreamingPrePostProcessor), exclusive, None)
            .unwrap();
        let pc = c.processor_for(InferenceBackend::Onnx).unwrap();
        assert!(!Arc::ptr_eq(&pa, &pc));

        context.release_session(a);
        context.release_session(b);
        context.release_session(c);
    }

    #[test]
    fn test_missing_factory_is_an_error() {
        let _guard = SINGLETON_TEST_LOCK.lock();
        let context = SchedulerContext::get_instance(ContextConfig {
            enabled_backends: vec![InferenceBackend::Onnx],
            ..ContextConfig::default()
        });
        let result = context.create_session(
            Arc::new(StreamingPrePostProcessor),
            inference_config(2),
            None,
        );
        assert!(matches!(result, Err(Error::BackendUnavailable(_))));
        SchedulerContext::release_instance();
    }

    #[test]
    fn test_host_mode_round_trip_in_submit_order() {
        let _guard = SINGLETON_TEST_LOCK.lock();
        let context = SchedulerContext::get_instance(host_mode_config());
        let (session, mut stream) = context
            .create_session(
                Arc::new(StreamingPrePostProcessor),
                inference_config(4),
                None,
            )
            .unwrap();

        let hook: crate::config::HostTaskHook = Arc::new(|_| true);
        context
            .prepare(
                &session,
                &mut stream,
                HostConfig::new(4, 1000.0).with_host_threads(hook),
            )
            .unwrap();
        assert!(context.host_threads_active());

        // Two hops queued, executed on this thread, drained in order.
        submit_block(&context, &session, &mut stream, &[1.0, 2.0, 3.0, 4.0]);
        submit_block(&context, &session, &mut stream, &[5.0, 6.0, 7.0, 8.0]);
        context.exec_inference();
        context.exec_inference();

        context.new_data_request(&session, &mut stream, 0.0).unwrap();
        assert_eq!(stream.output_available(), 8);
        let drained: Vec<f32> = (0..8).map(|_| stream.receive().pop_sample(0)).collect();
        assert_eq!(drained, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0]);

        context.release_session(session);
    }

    #[test]
    fn test_out_of_order_completion_waits_for_oldest() {
        let _guard = SINGLETON_TEST_LOCK.lock();
        let context = SchedulerContext::get_instance(host_mode_config());
        let (session, mut stream) = context
            .create_session(
                Arc::new(StreamingPrePostProcessor),
                inference_config(4),
                None,
            )
            .unwrap();
        let hook: crate::config::HostTaskHook = Arc::new(|_| true);
        context
            .prepare(
                &session,
                &mut stream,
                HostConfig::new(4, 1000.0).with_host_threads(hook),
            )
            .unwrap();

        submit_block(&context, &session, &mut stream, &[1.0; 4]);
        submit_block(&context, &session, &mut stream, &[2.0; 4]);

        // Complete only the second job by hand.
        let slots = session.slots();
        let second = slots.iter().find(|slot| slot.timestamp() == 1).unwrap();
        second.output_mut().copy_from_slice(&[2.0; 4]);
        second.set_done();
        drop(slots);

        // The older timestamp is still pending, so nothing is emitted.
        context.new_data_request(&session, &mut stream, 0.0).unwrap();
        assert_eq!(stream.output_available(), 0);

        // Once the first job lands (both were queued), order is restored.
        context.exec_inference();
        context.exec_inference();
        context.new_data_request(&session, &mut stream, 0.0).unwrap();
        assert_eq!(stream.output_available(), 8);
        assert_eq!(stream.receive().pop_sample(0), 1.0);

        context.release_session(session);
    }

    #[test]
    fn test_degradation_when_no_slot_is_free() {
        let _guard = SINGLETON_TEST_LOCK.lock();
        let context = SchedulerContext::get_instance(host_mode_config());
        let (session, mut stream) = context
            .create_session(
                Arc::new(StreamingPrePostProcessor),
                inference_config(2),
                None,
            )
            .unwrap();
        let hook: crate::config::HostTaskHook = Arc::new(|_| true);
        context
            .prepare(
                &session,
                &mut stream,
                HostConfig::new(4, 1000.0).with_host_threads(hook),
            )
            .unwrap();

        // Five hops at once against a pool of two slots: two dispatch,
        // three degrade to silence.
        let block: Vec<f32> = (1..=20).map(|i| i as f32).collect();
        submit_block(&context, &session, &mut stream, &block);

        assert_eq!(stream.send().available(0), 0);
        assert_eq!(stream.output_available(), 12);
        for _ in 0..12 {
            assert_eq!(stream.receive().pop_sample(0), 0.0);
        }

        context.exec_inference();
        context.exec_inference();
        context.new_data_request(&session, &mut stream, 0.0).unwrap();
        assert_eq!(stream.output_available(), 8);
        assert_eq!(stream.receive().pop_sample(0), 1.0);

        context.release_session(session);
    }

    #[test]
    fn test_host_hook_failure_falls_back_permanently() {
        let _guard = SINGLETON_TEST_LOCK.lock();
        let context = SchedulerContext::get_instance(ContextConfig {
            num_threads: 1,
            use_host_threads: true,
            ..context_config(1)
        });
        let (session, mut stream) = context
            .create_session(
                Arc::new(StreamingPrePostProcessor),
                inference_config(4),
                None,
            )
            .unwrap();
        let hook: crate::config::HostTaskHook = Arc::new(|_| false);
        context
            .prepare(
                &session,
                &mut stream,
                HostConfig::new(4, 1000.0).with_host_threads(hook),
            )
            .unwrap();
        assert!(context.host_threads_active());

        submit_block(&context, &session, &mut stream, &[1.0, 2.0, 3.0, 4.0]);
        assert!(!context.host_threads_active());

        // The internal pool picks the job up.
        let deadline = Instant::now() + Duration::from_secs(2);
        loop {
            context.new_data_request(&session, &mut stream, 0.0).unwrap();
            if stream.output_available() >= 4 {
                break;
            }
            assert!(Instant::now() < deadline, "fallback pool never ran the job");
            std::thread::sleep(Duration::from_millis(1));
        }

        context.release_session(session);
    }

    #[test]
    fn test_release_purges_queued_jobs_for_that_session_only() {
        let _guard = SINGLETON_TEST_LOCK.lock();
        let context = SchedulerContext::get_instance(host_mode_config());
        let (a, mut stream_a) = context
            .create_session(
                Arc::new(StreamingPrePostProcessor),
                inference_config(4),
                None,
            )
            .unwrap();
        let (b, mut stream_b) = context
            .create_session(
                Arc::new(StreamingPrePostProcessor),
                inference_config(4),
                None,
            )
            .unwrap();
        let hook: crate::config::HostTaskHook = Arc::new(|_| true);
        context
            .prepare(
                &a,
                &mut stream_a,
                HostConfig::new(4, 1000.0).with_host_threads(hook.clone()),
            )
            .unwrap();
        context
            .prepare(
                &b,
                &mut stream_b,
                HostConfig::new(4, 1000.0).with_host_threads(hook),
            )
            .unwrap();

        submit_block(&context, &a, &mut stream_a, &[1.0; 4]);
        submit_block(&context, &b, &mut stream_b, &[2.0; 4]);

        context.release_session(a);
        assert_eq!(context.num_sessions(), 1);

        // B's job survived the drain and still completes.
        context.exec_inference();
        context.new_data_request(&b, &mut stream_b, 0.0).unwrap();
        assert_eq!(stream_b.output_available(), 4);
        assert_eq!(stream_b.receive().pop_sample(0), 2.0);

        context.release_session(b);
    }
}
