//! Batch uploads of a file or directory
//!
//! Every file gets its own outcome. A failed file is logged and counted but
//! never stops the batch; only a shutdown request does.

use crate::config::{Target, UploadSettings};
use crate::error::CliError;
use crate::shutdown::ShutdownSignal;
use s3up_client::{
    FileSource, MultipartUploader, ObjectStore, PartPlan, PartSource, PutOptions, SessionState,
    UploadError, UploadProgress, UploadSession, UploaderOptions,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// What happened to one file
#[derive(Debug)]
pub enum FileOutcome {
    Uploaded {
        etag: String,
        size: u64,
        /// 1 for a single PUT
        parts: usize,
    },
    /// The key already exists in the bucket
    Skipped,
    Failed(CliError),
}

/// One file of a batch
#[derive(Debug)]
pub struct FileReport {
    pub path: PathBuf,
    pub key: String,
    pub outcome: FileOutcome,
}

/// Per-file results of a batch, in the order the files were visited
#[derive(Debug, Default)]
pub struct BatchReport {
    pub files: Vec<FileReport>,
}

impl BatchReport {
    pub fn uploaded(&self) -> usize {
        self.count(|o| matches!(o, FileOutcome::Uploaded { .. }))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, FileOutcome::Skipped))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, FileOutcome::Failed(_)))
    }

    /// Process exit code: the number of failed files, clamped to 255
    pub fn exit_code(&self) -> i32 {
        self.failed().min(255) as i32
    }

    fn count(&self, pred: impl Fn(&FileOutcome) -> bool) -> usize {
        self.files.iter().filter(|f| pred(&f.outcome)).count()
    }
}

/// Uploads files to one bucket
pub struct BatchUploader {
    store: Arc<dyn ObjectStore>,
    settings: UploadSettings,
    shutdown: ShutdownSignal,
}

impl BatchUploader {
    pub fn new(store: Arc<dyn ObjectStore>, settings: UploadSettings, shutdown: ShutdownSignal) -> Self {
        Self {
            store,
            settings,
            shutdown,
        }
    }

    /// Upload `source` (a file or a directory) under `target`.
    ///
    /// Fails only when `source` itself cannot be read; problems with
    /// individual files end up in the report.
    pub async fn run(&self, source: &Path, target: &Target) -> Result<BatchReport, CliError> {
        let metadata = tokio::fs::metadata(source).await?;
        let files = if metadata.is_dir() {
            collect_files(source, self.settings.recursive).await?
        } else {
            let name = source
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .ok_or_else(|| {
                    std::io::Error::new(std::io::ErrorKind::InvalidInput, "source has no file name")
                })?;
            vec![(source.to_path_buf(), name)]
        };
        info!(
            source = %source.display(),
            target = %target,
            files = files.len(),
            "Starting upload"
        );

        let mut report = BatchReport::default();
        for (path, relative) in files {
            let key = target.key_for(&relative);
            let outcome = if self.shutdown.is_shutdown() {
                FileOutcome::Failed(CliError::Interrupted)
            } else {
                self.upload_file(&path, &key).await
            };

            match &outcome {
                FileOutcome::Uploaded { size, parts, .. } => {
                    info!(path = %path.display(), key = %key, size, parts, "Uploaded")
                }
                FileOutcome::Skipped => {
                    info!(path = %path.display(), key = %key, "Already in the bucket, skipping")
                }
                FileOutcome::Failed(e) => {
                    error!(path = %path.display(), key = %key, error = %e, "Upload failed")
                }
            }

            let interrupted = matches!(&outcome, FileOutcome::Failed(e) if e.is_interrupt());
            report.files.push(FileReport { path, key, outcome });
            if interrupted {
                warn!("Shutdown requested, stopping batch");
                break;
            }
        }

        info!(
            uploaded = report.uploaded(),
            skipped = report.skipped(),
            failed = report.failed(),
            "Batch finished"
        );
        Ok(report)
    }

    /// Upload a single file to `key`
    pub async fn upload_file(&self, path: &Path, key: &str) -> FileOutcome {
        match self.try_upload_file(path, key).await {
            Ok(Some((etag, size, parts))) => FileOutcome::Uploaded { etag, size, parts },
            Ok(None) => FileOutcome::Skipped,
            Err(e) => FileOutcome::Failed(e),
        }
    }

    async fn try_upload_file(
        &self,
        path: &Path,
        key: &str,
    ) -> Result<Option<(String, u64, usize)>, CliError> {
        if !self.settings.overwrite && self.store.object_exists(key).await? {
            return Ok(None);
        }

        let file = FileSource::open(path).await?;
        let size = file.size();
        let options = self.put_options(path);

        if !self.settings.policy.use_multipart(size) {
            debug!(key, size, "Uploading with a single PUT");
            let body = file.open_all().await?;
            let etag = tokio::select! {
                etag = self.store.put_object(key, body, &options) => etag?,
                () = self.shutdown.wait() => {
                    warn!(key, "Shutdown requested, dropping single PUT");
                    return Err(CliError::Interrupted);
                }
            };
            return Ok(Some((etag, size, 1)));
        }

        let plan = self.settings.policy.plan(size)?;
        let source: Arc<dyn PartSource> = Arc::new(file);
        let session = self.upload_multipart(key, source, &plan, &options).await?;
        let etag = match session.state {
            SessionState::Completed { etag } => etag,
            _ => String::new(),
        };
        Ok(Some((etag, size, plan.len())))
    }

    /// Multipart upload with part and completion retries; gives up by
    /// aborting the session.
    ///
    /// Part retries and completion retries each get `part_retries` attempts.
    async fn upload_multipart(
        &self,
        key: &str,
        source: Arc<dyn PartSource>,
        plan: &[PartPlan],
        options: &PutOptions,
    ) -> Result<UploadSession, UploadError> {
        let uploader = self.uploader(key);
        let mut result = uploader
            .upload_until(key, Arc::clone(&source), plan, options, self.shutdown.wait())
            .await;

        let mut part_attempts = 0;
        let mut complete_attempts = 0;
        loop {
            match result {
                Ok(session) => return Ok(session),
                Err(UploadError::PartsFailed { session, failed })
                    if part_attempts < self.settings.part_retries =>
                {
                    part_attempts += 1;
                    warn!(key, attempt = part_attempts, failed = ?failed, "Retrying failed parts");
                    result = uploader
                        .resume_until(*session, Arc::clone(&source), plan, self.shutdown.wait())
                        .await;
                }
                Err(UploadError::Assembly { session, source: e })
                    if complete_attempts < self.settings.part_retries =>
                {
                    complete_attempts += 1;
                    warn!(key, attempt = complete_attempts, error = %e, "Retrying completion");
                    let pending = (*session).clone();
                    result = tokio::select! {
                        completed = uploader.complete(*session) => completed,
                        () = self.shutdown.wait() => {
                            warn!(key, session_id = %pending.session_id, "Shutdown requested, aborting upload");
                            let session = uploader.abort(pending).await;
                            return Err(UploadError::Cancelled {
                                session_id: session.session_id,
                            });
                        }
                    };
                }
                Err(UploadError::PartsFailed { session, failed }) => {
                    let session = uploader.abort(*session).await;
                    return Err(UploadError::PartsFailed {
                        session: Box::new(session),
                        failed,
                    });
                }
                Err(UploadError::Assembly { session, source: e }) => {
                    let session = uploader.abort(*session).await;
                    return Err(UploadError::Assembly {
                        session: Box::new(session),
                        source: e,
                    });
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn uploader(&self, key: &str) -> MultipartUploader {
        let key = key.to_string();
        let mut options = UploaderOptions::default().with_progress(Arc::new(move |p: UploadProgress| {
            debug!(
                key = %key,
                part = p.index,
                of = p.total_parts,
                bytes = p.part_bytes,
                succeeded = p.succeeded,
                "Part finished"
            );
        }));
        options.concurrency = self.settings.concurrency;
        MultipartUploader::new(Arc::clone(&self.store), options)
    }

    fn put_options(&self, path: &Path) -> PutOptions {
        let content_type = mime_guess::from_path(path).first_or_octet_stream();
        self.settings
            .put
            .clone()
            .with_content_type(content_type.essence_str())
    }
}

/// Files under `root` with their `/`-separated paths relative to it, sorted.
///
/// Without `recursive` only the top level is read and directories are skipped.
pub async fn collect_files(root: &Path, recursive: bool) -> std::io::Result<Vec<(PathBuf, String)>> {
    let mut files = Vec::new();
    let mut pending = vec![(root.to_path_buf(), String::new())];

    while let Some((dir, relative_dir)) = pending.pop() {
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let name = entry.file_name().to_string_lossy().into_owned();
            let relative = if relative_dir.is_empty() {
                name
            } else {
                format!("{}/{}", relative_dir, name)
            };

            let metadata = match tokio::fs::metadata(&path).await {
                Ok(metadata) => metadata,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping unreadable entry");
                    continue;
                }
            };
            if metadata.is_dir() {
                if recursive {
                    pending.push((path, relative));
                } else {
                    debug!(path = %path.display(), "Skipping directory");
                }
            } else if metadata.is_file() {
                files.push((path, relative));
            }
        }
    }

    files.sort_by(|a, b| a.1.cmp(&b.1));
    Ok(files)
}
