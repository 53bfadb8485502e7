//! Job storage
//!
//! [`JobStore`] is the only shared mutable state in the system. After a job
//! is created, only its engine task writes to it; any number of pollers may
//! read concurrently. Each write replaces the whole record under the lock,
//! so readers never observe a half-applied transition.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{Error, Result};
use crate::job::{GeneratedImage, Job, JobId};
use crate::request::GenerationRequest;

/// Registry of generation jobs keyed by id
///
/// The in-memory implementation never evicts; a bounded or TTL-based store
/// can be swapped in without touching the engine.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Register a new processing job at progress 10
    async fn create(&self, request: &GenerationRequest, model_name: &str) -> Result<Job>;

    async fn get(&self, id: JobId) -> Result<Job>;

    /// Most recently created jobs first, at most `limit`
    async fn list(&self, limit: usize) -> Result<Vec<Job>>;

    async fn delete(&self, id: JobId) -> Result<()>;

    /// Raise a processing job's progress; lower values are ignored
    async fn advance(&self, id: JobId, progress: u8) -> Result<()>;

    async fn complete(
        &self,
        id: JobId,
        image: GeneratedImage,
        thinking: Option<String>,
    ) -> Result<()>;

    async fn fail(&self, id: JobId, error: String) -> Result<()>;
}

#[derive(Debug, Clone)]
struct Entry {
    /// Insertion order, breaks created_at ties
    seq: u64,
    job: Job,
}

#[derive(Debug, Default)]
struct Inner {
    jobs: HashMap<JobId, Entry>,
    next_seq: u64,
}

/// Process-local job store
#[derive(Debug, Clone, Default)]
pub struct InMemoryJobStore {
    inner: Arc<RwLock<Inner>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.jobs.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Apply `update` to a copy of the job and store it back on success
    async fn update<F, T>(&self, id: JobId, update: F) -> Result<T>
    where
        F: FnOnce(&mut Job) -> Result<T> + Send,
        T: Send,
    {
        let mut inner = self.inner.write().await;
        let entry = inner
            .jobs
            .get_mut(&id)
            .ok_or_else(|| Error::JobNotFound(id.to_string()))?;

        let mut job = entry.job.clone();
        let out = update(&mut job)?;
        entry.job = job;
        Ok(out)
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn create(&self, request: &GenerationRequest, model_name: &str) -> Result<Job> {
        let job = Job::new(request.prompt.clone(), model_name);

        let mut inner = self.inner.write().await;
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.jobs.insert(
            job.id,
            Entry {
                seq,
                job: job.clone(),
            },
        );

        debug!(job_id = %job.id, model = %model_name, "Job created");
        Ok(job)
    }

    async fn get(&self, id: JobId) -> Result<Job> {
        self.inner
            .read()
            .await
            .jobs
            .get(&id)
            .map(|e| e.job.clone())
            .ok_or_else(|| Error::JobNotFound(id.to_string()))
    }

    async fn list(&self, limit: usize) -> Result<Vec<Job>> {
        let inner = self.inner.read().await;
        let mut entries: Vec<&Entry> = inner.jobs.values().collect();
        entries.sort_by(|a, b| {
            b.job
                .created_at
                .cmp(&a.job.created_at)
                .then_with(|| b.seq.cmp(&a.seq))
        });

        Ok(entries
            .into_iter()
            .take(limit)
            .map(|e| e.job.clone())
            .collect())
    }

    async fn delete(&self, id: JobId) -> Result<()> {
        let removed = self.inner.write().await.jobs.remove(&id);
        match removed {
            Some(_) => {
                debug!(job_id = %id, "Job deleted");
                Ok(())
            }
            None => Err(Error::JobNotFound(id.to_string())),
        }
    }

    async fn advance(&self, id: JobId, progress: u8) -> Result<()> {
        self.update(id, |job| job.advance(progress).map(|_| ())).await
    }

    async fn complete(
        &self,
        id: JobId,
        image: GeneratedImage,
        thinking: Option<String>,
    ) -> Result<()> {
        self.update(id, move |job| job.complete(image, thinking)).await
    }

    async fn fail(&self, id: JobId, error: String) -> Result<()> {
        self.update(id, move |job| job.fail(error)).await
    }
}
