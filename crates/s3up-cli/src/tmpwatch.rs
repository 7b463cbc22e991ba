//! Expire objects under a prefix by age

use chrono::{DateTime, Duration, Utc};
use s3up_client::{ObjectStore, StoreError};
use tracing::{debug, error, info};

/// Result of one expiry pass
#[derive(Debug, Default)]
pub struct TmpwatchReport {
    /// Keys deleted, or that would be deleted on a dry run
    pub expired: Vec<String>,
    /// Keys whose delete request failed
    pub failed: Vec<(String, StoreError)>,
    /// Objects newer than the cutoff
    pub kept: usize,
}

impl TmpwatchReport {
    /// Process exit code: the number of failed deletions, clamped to 255
    pub fn exit_code(&self) -> i32 {
        self.failed.len().min(255) as i32
    }
}

/// Objects last modified before this instant are expired
pub fn cutoff(now: DateTime<Utc>, days: u32) -> DateTime<Utc> {
    now - Duration::days(i64::from(days))
}

/// Delete every object under `prefix` last modified before `cutoff`.
///
/// Listing errors abort the pass; a failed delete is recorded and the pass
/// continues.
pub async fn tmpwatch(
    store: &dyn ObjectStore,
    prefix: Option<&str>,
    cutoff: DateTime<Utc>,
    dry_run: bool,
) -> Result<TmpwatchReport, StoreError> {
    info!(prefix = prefix.unwrap_or(""), cutoff = %cutoff, dry_run, "Expiring objects");

    let mut report = TmpwatchReport::default();
    let mut token: Option<String> = None;
    loop {
        let page = store.list_objects(prefix, token.as_deref()).await?;
        debug!(objects = page.objects.len(), "Listed page");

        for object in page.objects {
            if object.last_modified >= cutoff {
                report.kept += 1;
                continue;
            }
            if dry_run {
                info!(key = %object.key, last_modified = %object.last_modified, "Would delete");
                report.expired.push(object.key);
                continue;
            }
            match store.delete_object(&object.key).await {
                Ok(()) => {
                    info!(key = %object.key, last_modified = %object.last_modified, "Deleted");
                    report.expired.push(object.key);
                }
                Err(e) => {
                    error!(key = %object.key, error = %e, "Failed to delete object");
                    report.failed.push((object.key, e));
                }
            }
        }

        match page.next_continuation_token {
            Some(next) => token = Some(next),
            None => break,
        }
    }

    info!(
        expired = report.expired.len(),
        kept = report.kept,
        failed = report.failed.len(),
        "Expiry finished"
    );
    Ok(report)
}
