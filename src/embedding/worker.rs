//! Persistent embedding workers.
//!
//! Each worker is a dedicated thread owning one [`Embedder`]. It receives
//! [`WorkerRequest`]s over its own channel and answers on the processor's
//! shared completion channel, so the processor never blocks on a result.

use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc;
use std::thread;
use tokio::sync::mpsc::UnboundedSender;

use super::protocol::{WorkerEnvelope, WorkerRequest, WorkerResponse};
use super::Embedder;

pub struct WorkerHandle {
    id: usize,
    sender: mpsc::Sender<WorkerRequest>,
}

impl WorkerHandle {
    /// Spawn a worker thread. The worker stays idle until it receives `Init`.
    pub fn spawn(
        id: usize,
        generation: u64,
        embedder: Box<dyn Embedder>,
        replies: UnboundedSender<WorkerEnvelope>,
    ) -> std::io::Result<Self> {
        let (sender, requests) = mpsc::channel();
        thread::Builder::new()
            .name(format!("snapcull-embed-{id}"))
            .spawn(move || run_worker(id, generation, embedder, requests, replies))?;
        Ok(Self { id, sender })
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// Queue a request for the worker. Returns false when the worker thread
    /// has exited.
    pub fn send(&self, request: WorkerRequest) -> bool {
        self.sender.send(request).is_ok()
    }

    /// Ask the worker to exit after its current job. The thread is detached.
    pub fn shutdown(&self) {
        let _ = self.sender.send(WorkerRequest::Shutdown);
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "embedder panicked".to_string()
    }
}

fn run_worker(
    spawn_id: usize,
    generation: u64,
    mut embedder: Box<dyn Embedder>,
    requests: mpsc::Receiver<WorkerRequest>,
    replies: UnboundedSender<WorkerEnvelope>,
) {
    let mut worker_id = spawn_id;
    let reply = |worker_id: usize, response: WorkerResponse| {
        replies
            .send(WorkerEnvelope {
                worker_id,
                generation,
                response,
            })
            .is_ok()
    };

    while let Ok(request) = requests.recv() {
        match request {
            WorkerRequest::SetWorkerId { worker_id: id } => worker_id = id,
            WorkerRequest::Init => {
                tracing::debug!(worker = worker_id, "Loading embedding model");
                let response = match embedder.load() {
                    Ok(()) => WorkerResponse::ModelReady,
                    Err(e) => WorkerResponse::InitFailed {
                        error: format!("{e:#}"),
                    },
                };
                if !reply(worker_id, response) {
                    break;
                }
            }
            WorkerRequest::Process { photo } => {
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| embedder.embed(&photo)));
                let response = match outcome {
                    Ok(Ok(output)) => WorkerResponse::Complete {
                        file_id: photo.file_id,
                        embedding: output.embedding,
                        quality_metrics: output.quality_metrics,
                    },
                    Ok(Err(e)) => WorkerResponse::Error {
                        file_id: photo.file_id,
                        error: format!("{e:#}"),
                    },
                    Err(payload) => WorkerResponse::Error {
                        file_id: photo.file_id,
                        error: panic_message(payload.as_ref()),
                    },
                };
                if !reply(worker_id, response) {
                    break;
                }
            }
            WorkerRequest::Shutdown => break,
        }
    }

    tracing::debug!(worker = worker_id, "Embedding worker stopped");
}
