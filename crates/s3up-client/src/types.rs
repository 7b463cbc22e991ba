//! Common types for the upload client

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// One planned chunk of the source byte range
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PartPlan {
    /// 1-based part number
    pub index: u32,
    /// Byte offset into the source
    pub offset: u64,
    /// Length in bytes
    pub length: u64,
}

impl PartPlan {
    /// Offset one past the last byte of this part
    pub fn end(&self) -> u64 {
        self.offset + self.length
    }
}

/// Upload state of a single part
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PartStatus {
    Pending,
    Succeeded,
    Failed { reason: String },
}

/// Outcome of uploading one [`PartPlan`]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartResult {
    /// 1-based part number
    pub index: u32,
    /// ETag returned by the store
    pub etag: Option<String>,
    /// Current status
    pub status: PartStatus,
}

impl PartResult {
    pub fn pending(index: u32) -> Self {
        Self {
            index,
            etag: None,
            status: PartStatus::Pending,
        }
    }

    pub fn succeeded(index: u32, etag: impl Into<String>) -> Self {
        Self {
            index,
            etag: Some(etag.into()),
            status: PartStatus::Succeeded,
        }
    }

    pub fn failed(index: u32, reason: impl Into<String>) -> Self {
        Self {
            index,
            etag: None,
            status: PartStatus::Failed {
                reason: reason.into(),
            },
        }
    }

    pub fn is_succeeded(&self) -> bool {
        self.status == PartStatus::Succeeded
    }
}

/// A part reference handed to the completion call
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletedPart {
    /// 1-based part number
    pub part_number: u32,
    /// ETag returned when the part was uploaded
    pub etag: String,
}

/// Lifecycle of a multipart session
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    /// Accepting part uploads
    Open,
    /// Assembled by the store
    Completed { etag: String },
    /// Abandoned; the store discarded the parts
    Aborted,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open => f.write_str("open"),
            Self::Completed { .. } => f.write_str("completed"),
            Self::Aborted => f.write_str("aborted"),
        }
    }
}

/// One multipart upload in progress
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UploadSession {
    /// Upload id issued by the store
    pub session_id: String,
    /// Destination object key
    pub key: String,
    /// Source size in bytes
    pub total_size: u64,
    /// Per-part results, ordered by index
    pub parts: Vec<PartResult>,
    /// Lifecycle state
    pub state: SessionState,
}

impl UploadSession {
    /// Open a session with every planned part pending
    pub fn open(
        session_id: impl Into<String>,
        key: impl Into<String>,
        total_size: u64,
        plan: &[PartPlan],
    ) -> Self {
        Self {
            session_id: session_id.into(),
            key: key.into(),
            total_size,
            parts: plan.iter().map(|p| PartResult::pending(p.index)).collect(),
            state: SessionState::Open,
        }
    }

    pub fn is_open(&self) -> bool {
        self.state == SessionState::Open
    }

    /// Store a part outcome, replacing any earlier attempt
    pub fn record(&mut self, result: PartResult) {
        match self.parts.binary_search_by_key(&result.index, |p| p.index) {
            Ok(pos) => self.parts[pos] = result,
            Err(pos) => self.parts.insert(pos, result),
        }
    }

    /// Status of one part, if it belongs to this session
    pub fn part(&self, index: u32) -> Option<&PartResult> {
        self.parts
            .binary_search_by_key(&index, |p| p.index)
            .ok()
            .map(|pos| &self.parts[pos])
    }

    /// Indices that have not been acknowledged by the store
    pub fn outstanding(&self) -> BTreeSet<u32> {
        self.parts
            .iter()
            .filter(|p| !p.is_succeeded())
            .map(|p| p.index)
            .collect()
    }

    /// Indices whose last attempt failed
    pub fn failed(&self) -> BTreeSet<u32> {
        self.parts
            .iter()
            .filter(|p| matches!(p.status, PartStatus::Failed { .. }))
            .map(|p| p.index)
            .collect()
    }

    /// Completion list in strictly increasing index order, if every part succeeded
    pub fn completed_parts(&self) -> Option<Vec<CompletedPart>> {
        self.parts
            .iter()
            .map(|p| match (&p.status, &p.etag) {
                (PartStatus::Succeeded, Some(etag)) => Some(CompletedPart {
                    part_number: p.index,
                    etag: etag.clone(),
                }),
                _ => None,
            })
            .collect()
    }
}

/// Headers applied to new objects
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PutOptions {
    /// Content type
    pub content_type: Option<String>,
    /// Cache control
    pub cache_control: Option<String>,
    /// Expires header (HTTP date)
    pub expires: Option<String>,
    /// Canned ACL (`x-amz-acl`)
    pub acl: Option<String>,
}

impl PutOptions {
    /// Create new empty options
    pub fn new() -> Self {
        Self::default()
    }

    /// Set content type
    pub fn with_content_type(mut self, ct: impl Into<String>) -> Self {
        self.content_type = Some(ct.into());
        self
    }

    /// Set cache control
    pub fn with_cache_control(mut self, cc: impl Into<String>) -> Self {
        self.cache_control = Some(cc.into());
        self
    }

    pub fn with_expires(mut self, expires: impl Into<String>) -> Self {
        self.expires = Some(expires.into());
        self
    }

    /// Set the canned ACL
    pub fn with_acl(mut self, acl: impl Into<String>) -> Self {
        self.acl = Some(acl.into());
        self
    }

    /// Header name/value pairs for this set of options
    pub fn headers(&self) -> Vec<(&'static str, String)> {
        let mut headers = Vec::new();
        if let Some(ct) = &self.content_type {
            headers.push(("content-type", ct.clone()));
        }
        if let Some(cc) = &self.cache_control {
            headers.push(("cache-control", cc.clone()));
        }
        if let Some(expires) = &self.expires {
            headers.push(("expires", expires.clone()));
        }
        if let Some(acl) = &self.acl {
            headers.push(("x-amz-acl", acl.clone()));
        }
        headers
    }
}

/// An object in a listing
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ObjectInfo {
    /// Object key
    pub key: String,
    /// Last modified time
    pub last_modified: DateTime<Utc>,
    /// ETag
    pub etag: String,
    /// Size in bytes
    pub size: u64,
}

/// One page of a prefix listing
#[derive(Clone, Debug, Default)]
pub struct ObjectPage {
    /// Objects on this page
    pub objects: Vec<ObjectInfo>,
    /// Token for fetching the next page
    pub next_continuation_token: Option<String>,
}
