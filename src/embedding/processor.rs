//! The embedding queue manager.
//!
//! An [`EmbeddingProcessor`] owns a two-class work queue (priority and
//! normal), a fixed pool of persistent workers and the processing flags.
//! Dispatch and completion are decoupled: the dispatch loop hands a photo to
//! any free worker and moves on, while a separate completion task persists
//! results and frees workers as they report back.
//!
//! States: idle -> processing <-> paused -> idle. Pausing only stops new
//! dispatch; photos already handed to a worker run to completion and workers
//! stay loaded.

use serde::Serialize;
use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::protocol::{WorkerEnvelope, WorkerRequest, WorkerResponse};
use super::worker::WorkerHandle;
use super::EmbedderFactory;
use crate::analysis::quality::QualityMetrics;
use crate::config::EmbeddingConfig;
use crate::db::settings::WORKER_COUNT_KEY;
use crate::db::{setting_or, PhotoRecord, PhotoStore};
use crate::error::ProcessorError;

pub const DEFAULT_WORKER_COUNT: usize = 4;
pub const MAX_WORKER_COUNT: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessorConfig {
    /// Pool size used when the store has no `embedding.worker_count` setting.
    pub worker_count: usize,
    /// Dispatch backoff while every worker is busy.
    pub poll_interval: Duration,
    /// How long `initialize_workers` waits for every model to load.
    pub init_timeout: Duration,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            worker_count: DEFAULT_WORKER_COUNT,
            poll_interval: Duration::from_millis(50),
            init_timeout: Duration::from_secs(120),
        }
    }
}

impl From<&EmbeddingConfig> for ProcessorConfig {
    fn from(config: &EmbeddingConfig) -> Self {
        Self {
            worker_count: config.worker_count,
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            init_timeout: Duration::from_secs(config.init_timeout_secs),
        }
    }
}

/// Snapshot of the processor for status displays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProcessorState {
    pub queue_length: usize,
    pub is_processing: bool,
    pub is_paused: bool,
    pub workers_initialized: bool,
    pub worker_count: usize,
    pub in_flight: usize,
    /// Photos handled since the processor was created, failures included.
    pub processed: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProcessorEvent {
    QueueChanged { queue_length: usize },
    PhotoCompleted { file_id: String },
    PhotoFailed { file_id: String, error: String },
    /// The queue emptied and every in-flight photo finished.
    Drained { processed: usize, failed: usize },
}

struct WorkerSlot {
    handle: WorkerHandle,
    ready: bool,
    busy: bool,
    current: Option<String>,
}

#[derive(Default)]
struct Inner {
    priority: VecDeque<PhotoRecord>,
    normal: VecDeque<PhotoRecord>,
    queued: HashSet<String>,
    in_flight: HashSet<String>,
    workers: Vec<WorkerSlot>,
    workers_initialized: bool,
    /// Bumped whenever the pool is replaced; stale replies are ignored.
    generation: u64,
    /// Bumped whenever a dispatch loop is started; older loops exit.
    dispatch_epoch: u64,
    is_processing: bool,
    is_paused: bool,
    processed: usize,
    failed: usize,
}

impl Inner {
    fn queue_length(&self) -> usize {
        self.priority.len() + self.normal.len()
    }

    fn pop_next(&mut self) -> Option<PhotoRecord> {
        self.priority.pop_front().or_else(|| self.normal.pop_front())
    }

    fn any_busy(&self) -> bool {
        self.workers.iter().any(|w| w.busy)
    }
}

struct Shared {
    inner: Mutex<Inner>,
    store: Arc<dyn PhotoStore>,
    factory: EmbedderFactory,
    config: ProcessorConfig,
    events: Mutex<Option<mpsc::UnboundedSender<ProcessorEvent>>>,
    init_lock: tokio::sync::Mutex<()>,
    dispatch_task: Mutex<Option<JoinHandle<()>>>,
    completion_task: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for Shared {
    fn drop(&mut self) {
        let inner = self.inner.get_mut().unwrap_or_else(|e| e.into_inner());
        for slot in &inner.workers {
            slot.handle.shutdown();
        }
        for task in [&self.dispatch_task, &self.completion_task] {
            if let Some(handle) = task.lock().unwrap_or_else(|e| e.into_inner()).take() {
                handle.abort();
            }
        }
    }
}

enum Step {
    Dispatched(usize),
    Wait,
    Stop,
    Stalled,
    Drained { processed: usize, failed: usize },
}

/// Handle to an embedding processor. Clones share the same queue and pool.
#[derive(Clone)]
pub struct EmbeddingProcessor {
    shared: Arc<Shared>,
}

impl EmbeddingProcessor {
    pub fn new(store: Arc<dyn PhotoStore>, factory: EmbedderFactory, config: ProcessorConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner::default()),
                store,
                factory,
                config,
                events: Mutex::new(None),
                init_lock: tokio::sync::Mutex::new(()),
                dispatch_task: Mutex::new(None),
                completion_task: Mutex::new(None),
            }),
        }
    }

    fn from_weak(weak: &Weak<Shared>) -> Option<Self> {
        weak.upgrade().map(|shared| Self { shared })
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.shared.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn emit(&self, event: ProcessorEvent) {
        let events = self.shared.events.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(tx) = events.as_ref() {
            let _ = tx.send(event);
        }
    }

    /// Receive processor events. A new subscriber replaces the previous one.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<ProcessorEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.shared.events.lock().unwrap_or_else(|e| e.into_inner()) = Some(tx);
        rx
    }

    pub fn get_state(&self) -> ProcessorState {
        let inner = self.lock();
        ProcessorState {
            queue_length: inner.queue_length(),
            is_processing: inner.is_processing,
            is_paused: inner.is_paused,
            workers_initialized: inner.workers_initialized,
            worker_count: inner.workers.len(),
            in_flight: inner.in_flight.len(),
            processed: inner.processed,
            failed: inner.failed,
        }
    }

    pub fn queue_length(&self) -> usize {
        self.lock().queue_length()
    }

    /// Queue photos for embedding, skipping any already queued or in flight.
    /// Priority photos dispatch before every normal photo; each class is FIFO.
    /// Returns how many photos were added.
    pub fn add_to_queue(&self, photos: Vec<PhotoRecord>, priority: bool) -> usize {
        let (added, queue_length) = {
            let mut inner = self.lock();
            let mut fresh = Vec::new();
            for photo in photos {
                if inner.in_flight.contains(&photo.file_id)
                    || !inner.queued.insert(photo.file_id.clone())
                {
                    continue;
                }
                fresh.push(photo);
            }
            let added = fresh.len();
            if priority {
                inner.priority.extend(fresh);
            } else {
                inner.normal.extend(fresh);
            }
            (added, inner.queue_length())
        };

        if added > 0 {
            tracing::debug!(added, queue_length, priority, "Photos queued for embedding");
            self.emit(ProcessorEvent::QueueChanged { queue_length });
        }
        added
    }

    fn resolve_worker_count(&self) -> usize {
        setting_or(
            self.shared.store.as_ref(),
            WORKER_COUNT_KEY,
            self.shared.config.worker_count,
        )
        .clamp(1, MAX_WORKER_COUNT)
    }

    /// Spawn the worker pool and wait until every worker has loaded its
    /// model. Does nothing if the pool is already up.
    pub async fn initialize_workers(&self) -> Result<(), ProcessorError> {
        let _guard = self.shared.init_lock.lock().await;
        if self.lock().workers_initialized {
            return Ok(());
        }

        let worker_count = self.resolve_worker_count();
        let generation = {
            let mut inner = self.lock();
            inner.generation += 1;
            inner.generation
        };

        tracing::info!(workers = worker_count, "Starting embedding workers");

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut slots = Vec::with_capacity(worker_count);
        for id in 0..worker_count {
            let embedder = (self.shared.factory)(id);
            let handle = match WorkerHandle::spawn(id, generation, embedder, tx.clone()) {
                Ok(handle) => handle,
                Err(e) => {
                    slots.iter().for_each(|s: &WorkerSlot| s.handle.shutdown());
                    return Err(ProcessorError::Spawn(e));
                }
            };
            handle.send(WorkerRequest::SetWorkerId { worker_id: id });
            handle.send(WorkerRequest::Init);
            slots.push(WorkerSlot {
                handle,
                ready: false,
                busy: false,
                current: None,
            });
        }
        drop(tx);

        let handshake = async {
            let mut ready = vec![false; worker_count];
            let mut remaining = worker_count;
            while remaining > 0 {
                let Some(envelope) = rx.recv().await else {
                    let worker_id = ready.iter().position(|r| !r).unwrap_or_default();
                    return Err(ProcessorError::WorkerInit {
                        worker_id,
                        error: "worker exited before reporting ready".to_string(),
                    });
                };
                match envelope.response {
                    WorkerResponse::ModelReady => {
                        if let Some(flag) = ready.get_mut(envelope.worker_id) {
                            if !*flag {
                                *flag = true;
                                remaining -= 1;
                            }
                        }
                    }
                    WorkerResponse::InitFailed { error } => {
                        return Err(ProcessorError::WorkerInit {
                            worker_id: envelope.worker_id,
                            error,
                        });
                    }
                    other => {
                        tracing::warn!(worker = envelope.worker_id, response = ?other, "Unexpected message during startup");
                    }
                }
            }
            Ok(())
        };

        let timeout = self.shared.config.init_timeout;
        let result = match tokio::time::timeout(timeout, handshake).await {
            Ok(result) => result,
            Err(_) => Err(ProcessorError::InitTimeout(timeout)),
        };
        if let Err(e) = result {
            tracing::error!(error = %e, "Embedding workers failed to start");
            for slot in &slots {
                slot.handle.shutdown();
            }
            return Err(e);
        }

        {
            let mut inner = self.lock();
            for slot in &mut slots {
                slot.ready = true;
            }
            inner.workers = slots;
            inner.workers_initialized = true;
        }

        let weak = Arc::downgrade(&self.shared);
        let completion = tokio::spawn(handle_completions(weak, rx, generation));
        if let Some(old) = self
            .shared
            .completion_task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .replace(completion)
        {
            old.abort();
        }

        tracing::info!(workers = worker_count, "Embedding workers ready");
        Ok(())
    }

    /// Start processing. When the queue is empty, photos still marked `new`
    /// in the store are queued first, which recovers the queue after a
    /// restart. Returns false when there is nothing to do.
    pub async fn start(&self) -> Result<bool, ProcessorError> {
        if self.lock().is_processing {
            return Ok(true);
        }

        if self.queue_length() == 0 {
            let store = Arc::clone(&self.shared.store);
            let pending =
                tokio::task::spawn_blocking(move || store.get_photos_without_embedding()).await??;
            self.add_to_queue(pending, false);
            if self.queue_length() == 0 {
                tracing::info!("No photos need embeddings");
                return Ok(false);
            }
        }

        self.initialize_workers().await?;

        {
            let mut inner = self.lock();
            if inner.is_processing {
                return Ok(true);
            }
            inner.is_processing = true;
            inner.is_paused = false;
        }
        tracing::info!(queue_length = self.queue_length(), "Embedding started");
        self.spawn_dispatch();
        Ok(true)
    }

    /// Stop dispatching new photos. Returns false when not processing.
    pub fn pause(&self) -> bool {
        let mut inner = self.lock();
        if !inner.is_processing {
            return false;
        }
        inner.is_processing = false;
        inner.is_paused = true;
        tracing::info!(
            queue_length = inner.queue_length(),
            in_flight = inner.in_flight.len(),
            "Embedding paused"
        );
        true
    }

    /// Continue after `pause`. From idle this behaves like `start`.
    pub async fn resume(&self) -> Result<bool, ProcessorError> {
        let (paused, processing) = {
            let inner = self.lock();
            (inner.is_paused, inner.is_processing)
        };
        if processing {
            return Ok(true);
        }
        if !paused {
            return self.start().await;
        }

        self.initialize_workers().await?;
        {
            let mut inner = self.lock();
            if inner.is_processing {
                return Ok(true);
            }
            inner.is_paused = false;
            inner.is_processing = true;
        }
        tracing::info!(queue_length = self.queue_length(), "Embedding resumed");
        self.spawn_dispatch();
        Ok(true)
    }

    /// Stop and discard every worker. Photos in flight are dropped from the
    /// queue; they are still `new` in the store and come back on next start.
    pub fn terminate_workers(&self) {
        let slots = {
            let mut inner = self.lock();
            inner.is_processing = false;
            inner.is_paused = false;
            inner.workers_initialized = false;
            inner.generation += 1;
            inner.dispatch_epoch += 1;
            inner.in_flight.clear();
            std::mem::take(&mut inner.workers)
        };
        for slot in &slots {
            slot.handle.shutdown();
        }
        for task in [&self.shared.dispatch_task, &self.shared.completion_task] {
            if let Some(handle) = task.lock().unwrap_or_else(|e| e.into_inner()).take() {
                handle.abort();
            }
        }
        tracing::info!(workers = slots.len(), "Embedding workers terminated");
    }

    /// Wait for the current dispatch loop to exit and for photos already
    /// handed to workers to finish.
    pub async fn wait_until_idle(&self) {
        let handle = self
            .shared
            .dispatch_task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        loop {
            {
                let inner = self.lock();
                if !inner.any_busy() {
                    return;
                }
            }
            tokio::time::sleep(self.shared.config.poll_interval).await;
        }
    }

    fn spawn_dispatch(&self) {
        let epoch = {
            let mut inner = self.lock();
            inner.dispatch_epoch += 1;
            inner.dispatch_epoch
        };
        let weak = Arc::downgrade(&self.shared);
        let poll_interval = self.shared.config.poll_interval;
        let handle = tokio::spawn(process_queue(weak, epoch, poll_interval));
        if let Some(old) = self
            .shared
            .dispatch_task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .replace(handle)
        {
            // The old loop sees the epoch change and exits on its own.
            drop(old);
        }
    }

    /// One iteration of the dispatch loop, under the state lock.
    fn dispatch_step(&self, epoch: u64) -> Step {
        let mut inner = self.lock();
        if inner.dispatch_epoch != epoch || inner.is_paused || !inner.is_processing {
            return Step::Stop;
        }

        if inner.queue_length() == 0 {
            if inner.any_busy() {
                return Step::Wait;
            }
            inner.is_processing = false;
            return Step::Drained {
                processed: inner.processed,
                failed: inner.failed,
            };
        }

        let Some(index) = inner.workers.iter().position(|w| w.ready && !w.busy) else {
            if !inner.workers.iter().any(|w| w.ready) {
                inner.is_processing = false;
                return Step::Stalled;
            }
            return Step::Wait;
        };
        let Some(photo) = inner.pop_next() else {
            return Step::Wait;
        };

        let file_id = photo.file_id.clone();
        inner.queued.remove(&file_id);
        inner.in_flight.insert(file_id.clone());

        let slot = &mut inner.workers[index];
        slot.busy = true;
        slot.current = Some(file_id.clone());
        let sent = slot.handle.send(WorkerRequest::Process { photo });
        let worker = slot.handle.id();

        if !sent {
            tracing::error!(worker, file_id = %file_id, "Embedding worker is gone");
            slot.ready = false;
            slot.busy = false;
            slot.current = None;
            inner.in_flight.remove(&file_id);
            inner.processed += 1;
            inner.failed += 1;
        } else {
            tracing::trace!(worker, file_id = %file_id, "Dispatched photo");
        }

        Step::Dispatched(inner.queue_length())
    }

    /// Free the worker that finished `file_id` and update counters.
    fn release_worker(&self, generation: u64, worker_id: usize, file_id: &str, failed: bool) {
        let mut inner = self.lock();
        if inner.generation != generation {
            return;
        }
        inner.in_flight.remove(file_id);
        inner.processed += 1;
        if failed {
            inner.failed += 1;
        }
        if let Some(slot) = inner.workers.get_mut(worker_id) {
            slot.busy = false;
            slot.current = None;
        }
    }

    async fn persist(
        &self,
        file_id: String,
        embedding: Vec<f32>,
        quality_metrics: Option<QualityMetrics>,
    ) -> Result<(), String> {
        let store = Arc::clone(&self.shared.store);
        let id = file_id.clone();
        let write = tokio::task::spawn_blocking(move || {
            store.update_photo_embedding(&id, &embedding, quality_metrics.as_ref())
        })
        .await;

        match write {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(e.to_string()),
            Err(e) => Err(format!("store write task failed: {e}")),
        }
    }
}

/// Dispatch loop. Runs until the queue drains, the processor is paused, or a
/// newer loop replaces it.
async fn process_queue(weak: Weak<Shared>, epoch: u64, poll_interval: Duration) {
    loop {
        let Some(processor) = EmbeddingProcessor::from_weak(&weak) else {
            return;
        };
        match processor.dispatch_step(epoch) {
            Step::Dispatched(queue_length) => {
                processor.emit(ProcessorEvent::QueueChanged { queue_length });
            }
            Step::Wait => {
                drop(processor);
                tokio::time::sleep(poll_interval).await;
            }
            Step::Stop => return,
            Step::Stalled => {
                tracing::error!("No embedding worker is available; stopping dispatch");
                return;
            }
            Step::Drained { processed, failed } => {
                tracing::info!(processed, failed, "Embedding queue drained");
                processor.emit(ProcessorEvent::Drained { processed, failed });
                return;
            }
        }
    }
}

/// Completion loop for one worker pool generation.
async fn handle_completions(
    weak: Weak<Shared>,
    mut rx: mpsc::UnboundedReceiver<WorkerEnvelope>,
    generation: u64,
) {
    while let Some(envelope) = rx.recv().await {
        if envelope.generation != generation {
            continue;
        }
        let Some(processor) = EmbeddingProcessor::from_weak(&weak) else {
            return;
        };

        match envelope.response {
            WorkerResponse::Complete {
                file_id,
                embedding,
                quality_metrics,
            } => {
                let result = processor
                    .persist(file_id.clone(), embedding, quality_metrics)
                    .await;
                match result {
                    Ok(()) => {
                        tracing::debug!(worker = envelope.worker_id, file_id = %file_id, "Embedding stored");
                        processor.release_worker(generation, envelope.worker_id, &file_id, false);
                        processor.emit(ProcessorEvent::PhotoCompleted { file_id });
                    }
                    Err(error) => {
                        tracing::error!(file_id = %file_id, error = %error, "Failed to store embedding");
                        processor.release_worker(generation, envelope.worker_id, &file_id, true);
                        processor.emit(ProcessorEvent::PhotoFailed { file_id, error });
                    }
                }
            }
            WorkerResponse::Error { file_id, error } => {
                tracing::warn!(worker = envelope.worker_id, file_id = %file_id, error = %error, "Embedding failed");
                processor.release_worker(generation, envelope.worker_id, &file_id, true);
                processor.emit(ProcessorEvent::PhotoFailed { file_id, error });
            }
            WorkerResponse::ModelReady | WorkerResponse::InitFailed { .. } => {
                tracing::debug!(worker = envelope.worker_id, "Ignoring late startup message");
            }
        }
    }
}
