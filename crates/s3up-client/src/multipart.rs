//! Parallel multipart upload
//!
//! One task per planned part, all started at once unless a concurrency cap
//! is configured. Part failures are collected rather than propagated, so a
//! single bad part never throws away the transfers that already finished.

use crate::error::{ConfigError, UploadError};
use crate::source::PartSource;
use crate::store::ObjectStore;
use crate::types::{PartPlan, PartResult, PutOptions, SessionState, UploadSession};
use std::future::Future;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Progress callback type
pub type ProgressCallback = Arc<dyn Fn(UploadProgress) + Send + Sync>;

/// Upload progress information
#[derive(Clone, Debug)]
pub struct UploadProgress {
    /// Part that just finished
    pub index: u32,
    /// Whether it was acknowledged
    pub succeeded: bool,
    /// Bytes in that part
    pub part_bytes: u64,
    /// Total number of parts in the plan
    pub total_parts: u32,
}

/// Uploader settings
#[derive(Clone, Default)]
pub struct UploaderOptions {
    /// Maximum parts in flight; `None` starts every part at once
    pub concurrency: Option<NonZeroUsize>,
    /// Called as each part finishes
    pub progress: Option<ProgressCallback>,
}

impl UploaderOptions {
    pub fn with_concurrency(mut self, limit: NonZeroUsize) -> Self {
        self.concurrency = Some(limit);
        self
    }

    pub fn with_progress(mut self, progress: ProgressCallback) -> Self {
        self.progress = Some(progress);
        self
    }
}

/// Drives multipart sessions against an [`ObjectStore`]
pub struct MultipartUploader {
    store: Arc<dyn ObjectStore>,
    options: UploaderOptions,
}

impl MultipartUploader {
    pub fn new(store: Arc<dyn ObjectStore>, options: UploaderOptions) -> Self {
        Self { store, options }
    }

    /// Get the store
    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    /// Upload `source` to `key` following `plan`
    pub async fn upload(
        &self,
        key: &str,
        source: Arc<dyn PartSource>,
        plan: &[PartPlan],
        options: &PutOptions,
    ) -> Result<UploadSession, UploadError> {
        self.upload_until(key, source, plan, options, std::future::pending())
            .await
    }

    /// Like [`upload`](Self::upload), but aborts the session when `shutdown` resolves.
    ///
    /// Dropping the returned future stops every part task, but the remote
    /// session stays open; only `shutdown` also aborts it.
    pub async fn upload_until<F>(
        &self,
        key: &str,
        source: Arc<dyn PartSource>,
        plan: &[PartPlan],
        options: &PutOptions,
        shutdown: F,
    ) -> Result<UploadSession, UploadError>
    where
        F: Future<Output = ()> + Send,
    {
        validate_plan(plan, source.size())?;

        let session_id = self
            .store
            .initiate_multipart_upload(key, options)
            .await
            .map_err(UploadError::Initiate)?;
        info!(
            key,
            session_id = %session_id,
            parts = plan.len(),
            size = source.size(),
            "Initiated multipart upload"
        );

        let session = UploadSession::open(session_id, key, source.size(), plan);
        self.transfer(session, source, plan, shutdown).await
    }

    /// Re-upload every part of an open session that has not succeeded yet
    pub async fn resume(
        &self,
        session: UploadSession,
        source: Arc<dyn PartSource>,
        plan: &[PartPlan],
    ) -> Result<UploadSession, UploadError> {
        self.resume_until(session, source, plan, std::future::pending())
            .await
    }

    /// Like [`resume`](Self::resume), but aborts the session when `shutdown` resolves
    pub async fn resume_until<F>(
        &self,
        session: UploadSession,
        source: Arc<dyn PartSource>,
        plan: &[PartPlan],
        shutdown: F,
    ) -> Result<UploadSession, UploadError>
    where
        F: Future<Output = ()> + Send,
    {
        ensure_open(&session)?;
        validate_plan(plan, source.size())?;
        if session.total_size != source.size()
            || plan.len() != session.parts.len()
            || plan.iter().any(|p| session.part(p.index).is_none())
        {
            return Err(ConfigError::PlanMismatch(format!(
                "plan does not match session {}",
                session.session_id
            ))
            .into());
        }
        self.transfer(session, source, plan, shutdown).await
    }

    /// Ask the store to assemble a session whose parts have all succeeded
    pub async fn complete(&self, mut session: UploadSession) -> Result<UploadSession, UploadError> {
        ensure_open(&session)?;
        let Some(parts) = session.completed_parts() else {
            let failed = session.outstanding();
            return Err(UploadError::PartsFailed {
                session: Box::new(session),
                failed,
            });
        };

        match self
            .store
            .complete_multipart_upload(&session.key, &session.session_id, &parts)
            .await
        {
            Ok(etag) => {
                info!(
                    key = %session.key,
                    session_id = %session.session_id,
                    etag = %etag,
                    "Completed multipart upload"
                );
                session.state = SessionState::Completed { etag };
                Ok(session)
            }
            Err(source) => Err(UploadError::Assembly {
                session: Box::new(session),
                source,
            }),
        }
    }

    /// Abort a session. Best effort: a store failure is logged, not returned.
    pub async fn abort(&self, mut session: UploadSession) -> UploadSession {
        if session.is_open() {
            self.abort_remote(&session.key, &session.session_id).await;
            session.state = SessionState::Aborted;
        }
        session
    }

    async fn abort_remote(&self, key: &str, session_id: &str) {
        match self.store.abort_multipart_upload(key, session_id).await {
            Ok(()) => info!(key, session_id, "Aborted multipart upload"),
            Err(e) => warn!(key, session_id, error = %e, "Failed to abort multipart upload"),
        }
    }

    async fn transfer<F>(
        &self,
        mut session: UploadSession,
        source: Arc<dyn PartSource>,
        plan: &[PartPlan],
        shutdown: F,
    ) -> Result<UploadSession, UploadError>
    where
        F: Future<Output = ()> + Send,
    {
        let outstanding = session.outstanding();
        let total_parts = plan.len() as u32;
        let limiter = self
            .options
            .concurrency
            .map(|limit| Arc::new(Semaphore::new(limit.get())));

        // Dropping the set aborts every part task, so a dropped caller
        // leaves nothing running.
        let mut tasks = JoinSet::new();
        for part in plan.iter().filter(|part| outstanding.contains(&part.index)) {
            let part = *part;
            let store = Arc::clone(&self.store);
            let source = Arc::clone(&source);
            let limiter = limiter.clone();
            let key = session.key.clone();
            let session_id = session.session_id.clone();
            tasks.spawn(async move {
                let _permit = match limiter {
                    // The semaphore is never closed.
                    Some(limiter) => limiter.acquire_owned().await.ok(),
                    None => None,
                };
                let result =
                    upload_one(store.as_ref(), source.as_ref(), &key, &session_id, part).await;
                (part, result)
            });
        }

        let progress = self.options.progress.clone();
        let joined = collect_parts(&mut tasks, progress, total_parts);
        tokio::pin!(shutdown);
        let finished = tokio::select! {
            results = joined => Some(results),
            () = &mut shutdown => None,
        };

        let Some(results) = finished else {
            tasks.abort_all();
            warn!(
                key = %session.key,
                session_id = %session.session_id,
                "Shutdown requested, aborting multipart upload"
            );
            self.abort_remote(&session.key, &session.session_id).await;
            return Err(UploadError::Cancelled {
                session_id: session.session_id,
            });
        };

        for result in results {
            session.record(result);
        }

        let failed = session.outstanding();
        if !failed.is_empty() {
            warn!(
                key = %session.key,
                session_id = %session.session_id,
                failed = ?failed,
                "Multipart upload has failed parts"
            );
            return Err(UploadError::PartsFailed {
                session: Box::new(session),
                failed,
            });
        }

        self.complete(session).await
    }
}

/// Drain `tasks`, reporting each part as it finishes.
///
/// A task that panicked leaves its part unrecorded, so it stays outstanding.
async fn collect_parts(
    tasks: &mut JoinSet<(PartPlan, PartResult)>,
    progress: Option<ProgressCallback>,
    total_parts: u32,
) -> Vec<PartResult> {
    let mut results = Vec::with_capacity(tasks.len());
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((part, result)) => {
                if let Some(progress) = &progress {
                    progress(UploadProgress {
                        index: part.index,
                        succeeded: result.is_succeeded(),
                        part_bytes: part.length,
                        total_parts,
                    });
                }
                results.push(result);
            }
            Err(e) => warn!(error = %e, "Part task failed"),
        }
    }
    results.sort_by_key(|r| r.index);
    results
}

async fn upload_one(
    store: &dyn ObjectStore,
    source: &dyn PartSource,
    key: &str,
    session_id: &str,
    part: PartPlan,
) -> PartResult {
    debug!(key, index = part.index, offset = part.offset, length = part.length, "Uploading part");

    let body = match source.open_range(part.offset, part.length).await {
        Ok(body) => body,
        Err(e) => {
            warn!(key, index = part.index, error = %e, "Failed to read part");
            return PartResult::failed(part.index, format!("read failed: {}", e));
        }
    };

    match store.upload_part(key, session_id, part.index, body).await {
        Ok(etag) => {
            debug!(key, index = part.index, etag = %etag, "Uploaded part");
            PartResult::succeeded(part.index, etag)
        }
        Err(e) => {
            warn!(key, index = part.index, error = %e, "Failed to upload part");
            PartResult::failed(part.index, e.to_string())
        }
    }
}

fn ensure_open(session: &UploadSession) -> Result<(), UploadError> {
    if session.is_open() {
        Ok(())
    } else {
        Err(UploadError::SessionClosed {
            session_id: session.session_id.clone(),
            state: session.state.to_string(),
        })
    }
}

/// A plan must be non-empty, 1-indexed, contiguous and cover the whole source
fn validate_plan(plan: &[PartPlan], total_size: u64) -> Result<(), ConfigError> {
    if plan.is_empty() {
        return Err(ConfigError::EmptyPlan);
    }
    let mut offset = 0;
    for (expected, part) in (1u32..).zip(plan) {
        if part.index != expected || part.offset != offset || part.length == 0 {
            return Err(ConfigError::PlanMismatch(format!(
                "part {} (offset {}, length {}) breaks the sequence",
                part.index, part.offset, part.length
            )));
        }
        offset = part.end();
    }
    if offset != total_size {
        return Err(ConfigError::PlanMismatch(format!(
            "plan covers {} bytes, source has {}",
            offset, total_size
        )));
    }
    Ok(())
}
