//! Fetch strategies for issue detail pages.
//!
//! `ConcurrentFetch` runs a bounded number of requests at once on a tokio
//! `JoinSet`; `SequentialFetch` fetches one URL after another. `FetchPolicy`
//! starts on the concurrent path and switches to the sequential one for the
//! rest of the run once the concurrent machinery itself fails.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::models::IssueRecord;
use crate::network::FetchError;
use crate::source::IssueSource;

#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    Fetched(IssueRecord),
    /// Per-URL failure that does not stop the batch.
    Skipped { url: String, reason: String },
}

#[derive(Error, Debug)]
pub enum BatchError {
    #[error("Batch fetch machinery failed: {0}")]
    Systemic(String),

    #[error("Fatal fetch error: {0}")]
    Fatal(#[from] FetchError),
}

#[async_trait]
pub trait FetchStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    async fn fetch_batch(
        &self,
        source: Arc<dyn IssueSource>,
        urls: &[String],
    ) -> Result<Vec<FetchOutcome>, BatchError>;
}

/// Single detail fetch, shared by every strategy.
pub async fn fetch_one(source: &dyn IssueSource, url: &str) -> Result<IssueRecord, FetchError> {
    source.fetch_issue(url).await
}

fn to_outcome(url: &str, result: Result<IssueRecord, FetchError>) -> Result<FetchOutcome, BatchError> {
    match result {
        Ok(record) => Ok(FetchOutcome::Fetched(record)),
        Err(e) if e.is_fatal() => Err(BatchError::Fatal(e)),
        Err(e) => {
            warn!("Skipping {}: {}", url, e);
            Ok(FetchOutcome::Skipped {
                url: url.to_string(),
                reason: e.to_string(),
            })
        }
    }
}

pub struct SequentialFetch;

#[async_trait]
impl FetchStrategy for SequentialFetch {
    fn name(&self) -> &'static str {
        "sequential"
    }

    async fn fetch_batch(
        &self,
        source: Arc<dyn IssueSource>,
        urls: &[String],
    ) -> Result<Vec<FetchOutcome>, BatchError> {
        let mut outcomes = Vec::with_capacity(urls.len());
        for url in urls {
            outcomes.push(to_outcome(url, fetch_one(source.as_ref(), url).await)?);
        }
        Ok(outcomes)
    }
}

/// At most `max_concurrent` detail requests in flight. Results come back in
/// completion order.
pub struct ConcurrentFetch {
    max_concurrent: usize,
}

impl ConcurrentFetch {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            max_concurrent: max_concurrent.max(1),
        }
    }
}

#[async_trait]
impl FetchStrategy for ConcurrentFetch {
    fn name(&self) -> &'static str {
        "concurrent"
    }

    async fn fetch_batch(
        &self,
        source: Arc<dyn IssueSource>,
        urls: &[String],
    ) -> Result<Vec<FetchOutcome>, BatchError> {
        let permits = Arc::new(Semaphore::new(self.max_concurrent));
        let mut tasks = JoinSet::new();

        for url in urls {
            let permit = permits
                .clone()
                .acquire_owned()
                .await
                .map_err(|e| BatchError::Systemic(format!("semaphore closed: {e}")))?;
            let source = source.clone();
            let url = url.clone();
            tasks.spawn(async move {
                let _permit = permit;
                let result = fetch_one(source.as_ref(), &url).await;
                (url, result)
            });
        }

        let mut outcomes = Vec::with_capacity(urls.len());
        while let Some(joined) = tasks.join_next().await {
            let (url, result) = match joined {
                Ok(pair) => pair,
                Err(e) => {
                    tasks.abort_all();
                    return Err(BatchError::Systemic(format!("fetch task failed: {e}")));
                }
            };
            match to_outcome(&url, result) {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => {
                    tasks.abort_all();
                    return Err(e);
                }
            }
        }
        Ok(outcomes)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchState {
    Idle,
    Fetching,
    /// Concurrent path failed; sequential from now on.
    Degraded,
}

pub struct FetchPolicy {
    primary: Box<dyn FetchStrategy>,
    fallback: Box<dyn FetchStrategy>,
    state: Mutex<FetchState>,
}

impl FetchPolicy {
    pub fn new(primary: Box<dyn FetchStrategy>, fallback: Box<dyn FetchStrategy>) -> Self {
        Self {
            primary,
            fallback,
            state: Mutex::new(FetchState::Idle),
        }
    }

    /// Concurrent with a sequential fallback.
    pub fn concurrent(max_concurrent: usize) -> Self {
        Self::new(
            Box::new(ConcurrentFetch::new(max_concurrent)),
            Box::new(SequentialFetch),
        )
    }

    pub fn sequential() -> Self {
        Self::new(Box::new(SequentialFetch), Box::new(SequentialFetch))
    }

    pub fn state(&self) -> FetchState {
        *self.state.lock()
    }

    pub async fn fetch_one(&self, source: &dyn IssueSource, url: &str) -> Result<IssueRecord, FetchError> {
        fetch_one(source, url).await
    }

    pub async fn fetch_batch(
        &self,
        source: Arc<dyn IssueSource>,
        urls: &[String],
    ) -> Result<Vec<FetchOutcome>, BatchError> {
        if urls.is_empty() {
            return Ok(Vec::new());
        }

        if self.state() == FetchState::Degraded {
            return self.fallback.fetch_batch(source, urls).await;
        }

        *self.state.lock() = FetchState::Fetching;
        debug!(urls = urls.len(), strategy = self.primary.name(), "Fetching batch");
        match self.primary.fetch_batch(source.clone(), urls).await {
            Ok(outcomes) => {
                *self.state.lock() = FetchState::Idle;
                Ok(outcomes)
            }
            Err(BatchError::Systemic(reason)) => {
                warn!(
                    "{} fetch failed ({}), degrading to {} for the rest of the run",
                    self.primary.name(),
                    reason,
                    self.fallback.name()
                );
                *self.state.lock() = FetchState::Degraded;
                self.fallback.fetch_batch(source, urls).await
            }
            Err(fatal) => {
                *self.state.lock() = FetchState::Idle;
                Err(fatal)
            }
        }
    }
}
