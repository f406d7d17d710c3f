//! Dispatch of long-running pipeline invocations.
//!
//! The coordinator owns a fixed pool of worker threads fed from a bounded
//! FIFO queue.  The in-flight job table is the only mutable shared
//! resource; its lock is held for insertion, status updates and lookups
//! only, never across a pipeline invocation.

use std::collections::HashMap;
use std::sync::mpsc::{sync_channel, Receiver, SyncSender, TrySendError};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde::Serialize;
use uuid::Uuid;

use crate::annotate::{AnnotationRequest, AnnotationResult, Annotator};
use crate::msa::annotate::{annotate_msa, AnnotatedMsa};
use crate::msa::{Method, MsaEngine, MsaResult};
use crate::process::CancelToken;
use crate::schemes::Scheme;

pub use self::error::Error;

mod error {
    /// Error type for job submission.
    #[derive(thiserror::Error, Debug, Clone)]
    pub enum Error {
        #[error("job queue is full")]
        Overloaded,
        #[error("job coordinator is shut down")]
        ShutDown,
    }
}

/// Configuration for the `JobCoordinator`.
#[derive(Debug, PartialEq, Clone)]
pub struct Config {
    /// Number of pipelines executing concurrently.
    pub max_running: usize,
    /// Bound on jobs waiting for a worker; submissions beyond it are
    /// rejected with [`Error::Overloaded`].
    pub queue_size: usize,
    /// Terminal jobs older than this are purged.
    pub ttl: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_running: 4,
            queue_size: 32,
            ttl: Duration::from_secs(3600),
        }
    }
}

/// A queued pipeline invocation.
#[derive(Debug, Clone)]
pub enum JobRequest {
    Annotate(AnnotationRequest),
    Msa {
        sequences: Vec<(String, String)>,
        method: Method,
    },
    AnnotatedMsa {
        sequences: Vec<(String, String)>,
        method: Method,
        scheme: Scheme,
    },
}

/// The result payload of a finished job.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum JobOutcome {
    Annotation(AnnotationResult),
    Msa(MsaResult),
    AnnotatedMsa(AnnotatedMsa),
}

/// Lifecycle state of a job.  Completed, failed and cancelled are terminal
/// and sticky.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Failed | JobState::Cancelled
        )
    }
}

/// Point-in-time view of a job, returned by [`JobCoordinator::status`].
#[derive(Debug, Clone, Serialize)]
pub struct JobStatus {
    pub job_id: Uuid,
    pub status: JobState,
    /// Fraction of the pipeline finished, in `[0, 1]`.
    pub progress: f64,
    pub message: String,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Arc<JobOutcome>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

struct JobEntry {
    status: JobStatus,
    cancel: CancelToken,
}

struct Inner {
    jobs: Mutex<HashMap<Uuid, JobEntry>>,
    annotator: Arc<Annotator>,
    msa_engine: Arc<MsaEngine>,
    config: Config,
}

/// Bounded worker pool dispatching annotation and MSA pipelines.
pub struct JobCoordinator {
    inner: Arc<Inner>,
    sender: SyncSender<(Uuid, JobRequest)>,
}

impl JobCoordinator {
    pub fn new(annotator: Arc<Annotator>, msa_engine: Arc<MsaEngine>, config: Config) -> Self {
        let (sender, receiver) = sync_channel::<(Uuid, JobRequest)>(config.queue_size);
        let receiver = Arc::new(Mutex::new(receiver));
        let inner = Arc::new(Inner {
            jobs: Mutex::new(HashMap::new()),
            annotator,
            msa_engine,
            config,
        });

        for worker in 0..inner.config.max_running.max(1) {
            let receiver = Arc::clone(&receiver);
            let inner = Arc::clone(&inner);
            std::thread::Builder::new()
                .name(format!("abseq-job-{}", worker))
                .spawn(move || worker_loop(&inner, &receiver))
                .expect("spawning job worker");
        }

        Self { inner, sender }
    }

    /// Enqueue a job.  Returns its id immediately; rejects with
    /// [`Error::Overloaded`] when the queue is full.
    pub fn submit(&self, request: JobRequest) -> Result<Uuid, Error> {
        self.purge_expired();

        let job_id = Uuid::new_v4();
        let entry = JobEntry {
            status: JobStatus {
                job_id,
                status: JobState::Pending,
                progress: 0.0,
                message: "job created".to_string(),
                created_at: Utc::now(),
                completed_at: None,
                result: None,
                error: None,
            },
            cancel: CancelToken::new(),
        };
        self.inner.jobs.lock().unwrap().insert(job_id, entry);

        match self.sender.try_send((job_id, request)) {
            Ok(()) => Ok(job_id),
            Err(e) => {
                self.inner.jobs.lock().unwrap().remove(&job_id);
                match e {
                    TrySendError::Full(_) => Err(Error::Overloaded),
                    TrySendError::Disconnected(_) => Err(Error::ShutDown),
                }
            }
        }
    }

    /// Current status of a job, if it exists and has not been purged.
    pub fn status(&self, job_id: Uuid) -> Option<JobStatus> {
        self.purge_expired();
        self.inner
            .jobs
            .lock()
            .unwrap()
            .get(&job_id)
            .map(|entry| entry.status.clone())
    }

    /// Request cancellation.  Returns whether a non-terminal job was found.
    pub fn cancel(&self, job_id: Uuid) -> bool {
        let mut jobs = self.inner.jobs.lock().unwrap();
        let Some(entry) = jobs.get_mut(&job_id) else {
            return false;
        };
        if entry.status.status.is_terminal() {
            return false;
        }
        entry.cancel.cancel();
        if entry.status.status == JobState::Pending {
            entry.status.status = JobState::Cancelled;
            entry.status.message = "cancelled before start".to_string();
            entry.status.completed_at = Some(Utc::now());
        } else {
            entry.status.message = "cancellation requested".to_string();
        }
        true
    }

    /// Drop terminal jobs whose completion is older than the TTL.
    fn purge_expired(&self) {
        let ttl = match chrono::Duration::from_std(self.inner.config.ttl) {
            Ok(ttl) => ttl,
            Err(_) => return,
        };
        let now = Utc::now();
        self.inner.jobs.lock().unwrap().retain(|job_id, entry| {
            let expired = entry.status.status.is_terminal()
                && entry
                    .status
                    .completed_at
                    .map(|done| now - done >= ttl)
                    .unwrap_or(false);
            if expired {
                debug!("purging expired job {}", job_id);
            }
            !expired
        });
    }
}

fn worker_loop(inner: &Inner, receiver: &Mutex<Receiver<(Uuid, JobRequest)>>) {
    loop {
        let message = {
            let receiver = receiver.lock().unwrap();
            receiver.recv()
        };
        let Ok((job_id, request)) = message else {
            // Coordinator dropped; no more work will arrive.
            return;
        };
        let cancel = {
            let jobs = inner.jobs.lock().unwrap();
            match jobs.get(&job_id) {
                Some(entry) => entry.cancel.clone(),
                // Entry purged between enqueue and dequeue.
                None => continue,
            }
        };
        execute(inner, job_id, request, cancel);
    }
}

fn execute(inner: &Inner, job_id: Uuid, request: JobRequest, cancel: CancelToken) {
    if cancel.is_cancelled() {
        finish(inner, job_id, JobState::Cancelled, None, Some("cancelled".to_string()));
        return;
    }
    update(inner, job_id, 0.1, "starting pipeline");

    let outcome: Result<JobOutcome, (bool, String)> = match request {
        JobRequest::Annotate(annotation_request) => {
            update(inner, job_id, 0.3, "numbering and assembling domains");
            inner
                .annotator
                .annotate(&annotation_request, &cancel)
                .map(JobOutcome::Annotation)
                .map_err(|e| (e.is_cancellation(), e.to_string()))
        }
        JobRequest::Msa { sequences, method } => {
            update(
                inner,
                job_id,
                0.3,
                &format!("aligning {} sequences", sequences.len()),
            );
            inner
                .msa_engine
                .align(&sequences, method, &cancel)
                .map(JobOutcome::Msa)
                .map_err(|e| (matches!(e, crate::msa::Error::Cancelled), e.to_string()))
        }
        JobRequest::AnnotatedMsa {
            sequences,
            method,
            scheme,
        } => {
            update(
                inner,
                job_id,
                0.3,
                &format!("aligning {} sequences", sequences.len()),
            );
            inner
                .msa_engine
                .align(&sequences, method, &cancel)
                .and_then(|msa| {
                    update(inner, job_id, 0.7, "annotating alignment");
                    annotate_msa(&inner.annotator, &msa, scheme, &cancel)
                })
                .map(JobOutcome::AnnotatedMsa)
                .map_err(|e| (matches!(e, crate::msa::Error::Cancelled), e.to_string()))
        }
    };

    match outcome {
        Ok(result) => finish(inner, job_id, JobState::Completed, Some(result), None),
        Err((true, message)) => {
            finish(inner, job_id, JobState::Cancelled, None, Some(message))
        }
        Err((false, message)) => {
            warn!("job {} failed: {}", job_id, message);
            finish(inner, job_id, JobState::Failed, None, Some(message))
        }
    }
}

fn update(inner: &Inner, job_id: Uuid, progress: f64, message: &str) {
    let mut jobs = inner.jobs.lock().unwrap();
    if let Some(entry) = jobs.get_mut(&job_id) {
        if entry.status.status.is_terminal() {
            return;
        }
        entry.status.status = JobState::Running;
        entry.status.progress = progress;
        entry.status.message = message.to_string();
    }
}

fn finish(
    inner: &Inner,
    job_id: Uuid,
    state: JobState,
    result: Option<JobOutcome>,
    error: Option<String>,
) {
    let mut jobs = inner.jobs.lock().unwrap();
    if let Some(entry) = jobs.get_mut(&job_id) {
        if entry.status.status.is_terminal() {
            return;
        }
        entry.status.status = state;
        entry.status.progress = if state == JobState::Completed { 1.0 } else { entry.status.progress };
        entry.status.message = match state {
            JobState::Completed => "finished".to_string(),
            JobState::Cancelled => "cancelled".to_string(),
            _ => error.clone().unwrap_or_else(|| "failed".to_string()),
        };
        entry.status.completed_at = Some(Utc::now());
        entry.status.result = result.map(Arc::new);
        entry.status.error = error;
    }
}
