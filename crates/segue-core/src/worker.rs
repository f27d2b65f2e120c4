//! Inference worker threads.
//!
//! Workers pull (session, slot) jobs off the shared dispatch queue, run the
//! session's selected processor on the slot's tensors, and mark the slot
//! done. The same unit of work also runs on host-provided threads through
//! the context's `exec_inference`.

use crate::session::Session;
use crate::slot::InferenceSlot;
use crossbeam_channel::Receiver;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// One queued inference: which session's processor to run on which slot.
#[derive(Clone)]
pub struct InferenceJob {
    pub session: Arc<Session>,
    pub slot: Arc<InferenceSlot>,
}

/// Pop and execute one job. Returns false when the queue was empty.
pub(crate) fn execute_one(jobs: &Receiver<InferenceJob>) -> bool {
    match jobs.try_recv() {
        Ok(job) => {
            run_job(job);
            true
        }
        Err(_) => false,
    }
}

/// Run one job to completion. Sessions that are being torn down are
/// skipped; their slots are reclaimed by the drain protocol.
fn run_job(job: InferenceJob) {
    if !job.session.is_initialized() {
        return;
    }
    job.session.begin_inference();

    let backend = job.session.current_backend();
    let output = job.slot.output_mut();
    match job.session.processor_for(backend) {
        Some(processor) => {
            if let Err(e) = processor.process(job.slot.input(), output, &job.session) {
                tracing::error!(
                    "Processor failed in session {}: {}",
                    job.session.session_id(),
                    e
                );
                output.fill(0.0);
            }
        }
        None => {
            tracing::error!(
                "No processor attached for backend {:?} in session {}",
                backend,
                job.session.session_id()
            );
            output.fill(0.0);
        }
    }

    job.slot.set_done();
    job.session.end_inference();
}

/// A single worker thread with cooperative stop.
pub struct InferenceWorker {
    name: String,
    jobs: Receiver<InferenceJob>,
    should_stop: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl InferenceWorker {
    pub(crate) fn new(index: usize, jobs: Receiver<InferenceJob>) -> Self {
        Self {
            name: format!("segue-worker-{index}"),
            jobs,
            should_stop: Arc::new(AtomicBool::new(false)),
            running: Arc::new(AtomicBool::new(false)),
            thread: None,
        }
    }

    /// Spawn the worker thread. Idempotent while running.
    pub(crate) fn start(&mut self) -> std::io::Result<()> {
        if self.is_running() {
            return Ok(());
        }
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
        self.should_stop.store(false, Ordering::Release);

        let jobs = self.jobs.clone();
        let should_stop = self.should_stop.clone();
        let running = self.running.clone();
        let handle = std::thread::Builder::new().name(self.name.clone()).spawn(move || {
            running.store(true, Ordering::Release);
            while !should_stop.load(Ordering::Acquire) {
                if !execute_one(&jobs) {
                    std::thread::sleep(Duration::from_micros(100));
                }
            }
            running.store(false, Ordering::Release);
        })?;
        self.thread = Some(handle);
        Ok(())
    }

    /// Request the worker to stop after its current job. Observed between
    /// loop iterations; pair with [`is_running`](Self::is_running) to wait.
    pub(crate) fn stop(&self) {
        self.should_stop.store(true, Ordering::Release);
    }

    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

impl Drop for InferenceWorker {
    fn drop(&mut self) {
        self.stop();
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}
