//! Bounded worker pool for the blocking comment-to-subtitle transformation.
//!
//! The pool is a fixed set of named OS threads pulling [`Job`]s from a shared
//! MPMC queue. A worker never touches HTTP state: it only runs the
//! [`Transformer`] and sends the [`CompletionResult`] back over the job's
//! oneshot channel, where the dispatcher task that submitted the job resumes
//! and writes the response.

use std::{
    io,
    num::NonZeroUsize,
    panic::{self, AssertUnwindSafe},
    path::PathBuf,
    sync::Arc,
    thread::{self, JoinHandle},
    time::Instant,
};

use flume::{Receiver, Sender};
use metrics::{counter, gauge, histogram};
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::domain::parameters::RequestParameters;

pub const DEFAULT_WORKERS: usize = 8;

/// Comment stream handed to the transformation step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputHandle {
    /// A path on the local filesystem, read by the transformer itself.
    LocalPath(PathBuf),
    /// A document already retrieved by the resource fetcher.
    Text(String),
}

impl InputHandle {
    pub fn kind(&self) -> &'static str {
        match self {
            InputHandle::LocalPath(_) => "local",
            InputHandle::Text(_) => "remote",
        }
    }
}

#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct TransformError {
    message: String,
}

impl TransformError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// The opaque, CPU-bound conversion. Implementations block and are only ever
/// invoked on a worker thread.
pub trait Transformer: Send + Sync {
    fn convert(
        &self,
        input: &InputHandle,
        params: &RequestParameters,
    ) -> Result<String, TransformError>;
}

#[derive(Debug, Clone, Error)]
pub enum ConversionError {
    #[error("conversion failed: {0}")]
    Transform(#[from] TransformError),
    #[error("conversion worker pool is not running")]
    WorkerUnavailable,
    #[error("conversion was abandoned before completion")]
    Cancelled,
}

/// Either the converted artifact or the reason it could not be produced.
pub type CompletionResult = Result<String, ConversionError>;

/// Unit of work owned by the pool until its completion is sent exactly once.
pub struct Job {
    pub input: InputHandle,
    pub parameters: RequestParameters,
    completion: oneshot::Sender<CompletionResult>,
}

/// Submission side of the pool. Cheap to clone; every clone feeds the same queue.
#[derive(Clone)]
pub struct ConversionDispatcher {
    queue: Sender<Job>,
}

/// Owner of the worker threads, used to wait for them at shutdown.
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl ConversionDispatcher {
    pub fn start(
        workers: NonZeroUsize,
        transformer: Arc<dyn Transformer>,
    ) -> io::Result<(Self, WorkerPool)> {
        let (queue, jobs) = flume::unbounded::<Job>();
        let mut handles = Vec::with_capacity(workers.get());

        for index in 0..workers.get() {
            let jobs = jobs.clone();
            let transformer = Arc::clone(&transformer);
            let handle = thread::Builder::new()
                .name(format!("convert-worker-{index}"))
                .spawn(move || run_worker(jobs, transformer))?;
            handles.push(handle);
        }

        info!(
            target = "danmaku_gateway::conversion",
            workers = workers.get(),
            "Conversion worker pool started"
        );

        Ok((Self { queue }, WorkerPool { handles }))
    }

    /// Queue a job and wait for its completion without blocking the caller's thread.
    ///
    /// There is no load shedding: when every worker is busy the job waits in
    /// the queue until one frees up.
    pub async fn submit(&self, input: InputHandle, parameters: RequestParameters) -> CompletionResult {
        let (completion, receiver) = oneshot::channel();
        let job = Job {
            input,
            parameters,
            completion,
        };

        self.queue
            .send(job)
            .map_err(|_| ConversionError::WorkerUnavailable)?;
        gauge!("gateway_conversion_queue_depth").set(self.queue.len() as f64);

        receiver.await.map_err(|_| ConversionError::Cancelled)?
    }
}

impl WorkerPool {
    /// Wait for every worker to exit. Workers stop once all dispatchers are dropped
    /// and the queue has drained.
    pub fn join(self) {
        for handle in self.handles {
            let name = handle.thread().name().unwrap_or("convert-worker").to_string();
            if handle.join().is_err() {
                warn!(
                    target = "danmaku_gateway::conversion",
                    worker = %name,
                    "Conversion worker exited by panic"
                );
            }
        }
    }
}

fn run_worker(jobs: Receiver<Job>, transformer: Arc<dyn Transformer>) {
    while let Ok(job) = jobs.recv() {
        gauge!("gateway_conversion_queue_depth").set(jobs.len() as f64);

        if job.completion.is_closed() {
            debug!(
                target = "danmaku_gateway::conversion",
                input = job.input.kind(),
                "Requester went away before the job started; skipping"
            );
            counter!("gateway_conversions_total", "result" => "skipped").increment(1);
            continue;
        }

        let Job {
            input,
            parameters,
            completion,
        } = job;

        let started_at = Instant::now();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            transformer.convert(&input, &parameters)
        }))
        .unwrap_or_else(|payload| Err(TransformError::new(panic_message(payload.as_ref()))));
        let elapsed_ms = started_at.elapsed().as_millis() as u64;

        histogram!("gateway_conversion_ms").record(elapsed_ms as f64);
        let result = match &outcome {
            Ok(_) => "ok",
            Err(_) => "error",
        };
        counter!("gateway_conversions_total", "result" => result).increment(1);
        debug!(
            target = "danmaku_gateway::conversion",
            input = input.kind(),
            elapsed_ms,
            result,
            "Conversion finished"
        );

        if completion.send(outcome.map_err(ConversionError::from)).is_err() {
            debug!(
                target = "danmaku_gateway::conversion",
                elapsed_ms, "Requester went away before the result was delivered"
            );
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("transformer panicked: {message}")
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("transformer panicked: {message}")
    } else {
        "transformer panicked".to_string()
    }
}
