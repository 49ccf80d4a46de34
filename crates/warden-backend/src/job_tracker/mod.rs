//! The per-container job tracker.
//!
//! Jobs get sequential ids and live in a registry guarded by one
//! reader/writer lock. The lock is only ever held to look up or insert; all
//! waiting happens on the job itself.

mod job;
pub mod named_stream;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{RwLock, mpsc};
use warden_common::error::{Result, WardenError};
use warden_common::types::{JobId, JobStream};

use crate::command_runner::{CommandOutput, CommandRunner, JobCommand};

pub use job::Job;

/// A tracked job, as reported by [`JobTracker::active_jobs`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct JobInfo {
    /// The job's id.
    pub id: JobId,
    /// Whether the job's output is being discarded.
    pub discard_output: bool,
    /// When the job was spawned or restored.
    pub spawned_at: DateTime<Utc>,
}

#[derive(Debug)]
struct Registry {
    /// `None` once every id has been handed out.
    next_id: Option<JobId>,
    jobs: HashMap<JobId, Arc<Job>>,
    /// Ids claimed by a spawn or restore that has not inserted its job yet.
    reserved: HashSet<JobId>,
}

impl Registry {
    fn is_claimed(&self, id: JobId) -> bool {
        self.jobs.contains_key(&id) || self.reserved.contains(&id)
    }

    fn allocate(&mut self) -> Result<JobId> {
        loop {
            let id = self
                .next_id
                .ok_or(WardenError::PoolExhausted { pool: "job id" })?;
            self.next_id = id.next();
            if !self.is_claimed(id) {
                let _ = self.reserved.insert(id);
                return Ok(id);
            }
        }
    }

    fn release(&mut self, id: JobId) {
        let _ = self.reserved.remove(&id);
    }

    fn insert(&mut self, id: JobId, job: Arc<Job>) {
        self.release(id);
        let _ = self.jobs.insert(id, job);
    }
}

struct Inner {
    runner: Arc<dyn CommandRunner>,
    registry: RwLock<Registry>,
}

/// Tracks every job of one container. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct JobTracker {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for JobTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobTracker").finish_non_exhaustive()
    }
}

impl JobTracker {
    /// Creates an empty tracker starting processes through `runner`.
    #[must_use]
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            inner: Arc::new(Inner {
                runner,
                registry: RwLock::new(Registry {
                    next_id: Some(JobId::new(0)),
                    jobs: HashMap::new(),
                    reserved: HashSet::new(),
                }),
            }),
        }
    }

    /// Starts `command` as a new job and returns its id.
    ///
    /// With `auto_link`, the job starts collecting output immediately rather
    /// than on the first [`link`](Self::link) or [`stream`](Self::stream).
    ///
    /// # Errors
    ///
    /// Returns [`WardenError::PoolExhausted`] once every id has been used,
    /// or an error if the process cannot be started. The id it would have
    /// had is not reused.
    pub async fn spawn(
        &self,
        command: &JobCommand,
        discard_output: bool,
        auto_link: bool,
    ) -> Result<JobId> {
        let id = self.inner.registry.write().await.allocate()?;

        let process = match self.inner.runner.spawn(command) {
            Ok(process) => process,
            Err(e) => {
                self.inner.registry.write().await.release(id);
                return Err(WardenError::io(&command.program, e));
            }
        };
        let job = Arc::new(Job::new(id, discard_output, Ok(process)));
        if auto_link {
            job.start_linking();
        }

        self.inner.registry.write().await.insert(id, job);
        tracing::info!(job = %id, command = %command.command_line(), discard_output, "spawned job");
        Ok(id)
    }

    /// Waits for a job to finish and returns its status and output.
    ///
    /// The first link to return removes the job; linking it again fails.
    ///
    /// # Errors
    ///
    /// Returns [`WardenError::UnknownJob`] if no job with this id is tracked.
    pub async fn link(&self, id: JobId) -> Result<CommandOutput> {
        let job = self.lookup(id).await?;
        job.start_linking();
        let output = job.wait().await;

        if self.inner.registry.write().await.jobs.remove(&id).is_some() {
            tracing::debug!(job = %id, "job reaped");
        }
        Ok(output)
    }

    /// Subscribes to a job's live output.
    ///
    /// The receiver yields output chunks as they are written, then one
    /// [`JobStream::Exit`], then closes. A background link makes sure the
    /// job is reaped even if nobody links to it.
    ///
    /// # Errors
    ///
    /// Returns [`WardenError::UnknownJob`] if no job with this id is tracked.
    pub async fn stream(&self, id: JobId) -> Result<mpsc::UnboundedReceiver<JobStream>> {
        let job = self.lookup(id).await?;
        let rx = job.subscribe();
        self.link_in_background(id);
        Ok(rx)
    }

    /// Tracks a job that was already running before this tracker existed.
    ///
    /// The process is recovered through the runner's reattach and its output
    /// collected right away. Later spawns get ids above `id`. Restoring an
    /// id that is already tracked does nothing.
    pub async fn restore(&self, id: JobId, discard_output: bool) {
        {
            let mut registry = self.inner.registry.write().await;
            if registry.next_id.is_some_and(|next| next <= id) {
                registry.next_id = id.next();
            }
            if registry.is_claimed(id) {
                tracing::warn!(job = %id, "job is already tracked; not restoring");
                return;
            }
            let _ = registry.reserved.insert(id);
        }

        let process = self.inner.runner.reattach(id);
        if let Err(e) = &process {
            tracing::warn!(job = %id, error = %e, "cannot reattach to job");
        }
        let job = Arc::new(Job::new(id, discard_output, process));
        job.start_linking();
        self.inner.registry.write().await.insert(id, job);
        tracing::info!(job = %id, discard_output, "restored job");
    }

    /// Returns the currently tracked jobs, ordered by id.
    pub async fn active_jobs(&self) -> Vec<JobInfo> {
        let registry = self.inner.registry.read().await;
        let mut jobs: Vec<_> = registry.jobs.values().map(|job| job.info()).collect();
        jobs.sort_unstable_by_key(|info| info.id);
        jobs
    }

    async fn lookup(&self, id: JobId) -> Result<Arc<Job>> {
        self.inner
            .registry
            .read()
            .await
            .jobs
            .get(&id)
            .cloned()
            .ok_or(WardenError::UnknownJob { id })
    }

    fn link_in_background(&self, id: JobId) {
        let tracker = self.clone();
        let _ = tokio::spawn(async move {
            if let Err(e) = tracker.link(id).await {
                tracing::debug!(job = %id, error = %e, "background link found no job");
            }
        });
    }
}
