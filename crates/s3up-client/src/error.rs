//! Client error types

use crate::types::UploadSession;
use std::collections::BTreeSet;
use thiserror::Error;

/// Result type alias for object store operations
pub type Result<T> = std::result::Result<T, StoreError>;

/// Invalid chunking or store configuration, detected before any network call
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Maximum chunk size must exceed the minimum trailing part size
    #[error("max chunk size {max_chunk_size} must be greater than min trailing size {min_trailing_size}")]
    ChunkSizes {
        max_chunk_size: u64,
        min_trailing_size: u64,
    },

    /// A size knob was zero
    #[error("{0} must be greater than zero")]
    ZeroSize(&'static str),

    /// The chunk size would split the source into more parts than allowed
    #[error("{parts} parts exceed the limit of {max_parts}; raise the max chunk size")]
    TooManyParts { parts: u64, max_parts: u32 },

    /// Multipart sessions need at least one part
    #[error("cannot start a multipart upload with an empty plan")]
    EmptyPlan,

    /// The plan does not describe the source or the session
    #[error("part plan mismatch: {0}")]
    PlanMismatch(String),

    /// Bad endpoint, bucket or credential settings
    #[error("invalid store configuration: {0}")]
    Store(String),
}

/// Errors returned by an object store
#[derive(Error, Debug)]
pub enum StoreError {
    /// HTTP transport error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Error reported by the store
    #[error("S3 error ({code}, HTTP {status}): {message}")]
    S3 {
        code: String,
        message: String,
        status: u16,
        request_id: Option<String>,
    },

    /// Response could not be understood
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// IO error while reading the source
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl StoreError {
    /// Parse an S3 error from an XML response body
    pub fn from_s3_xml(xml: &str, status: u16) -> Self {
        match crate::xml::parse_error(xml) {
            Some(body) => Self::S3 {
                code: body.code,
                message: body.message.unwrap_or_else(|| "Unknown error".to_string()),
                status,
                request_id: body.request_id,
            },
            None => Self::S3 {
                code: format!("HTTP{}", status),
                message: "Unknown error".to_string(),
                status,
                request_id: None,
            },
        }
    }

    /// The S3 error code, if the store returned one
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::S3 { code, .. } => Some(code),
            _ => None,
        }
    }

    /// Check if this is a "not found" error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::S3 { status: 404, .. })
            || matches!(self.code(), Some("NoSuchKey" | "NoSuchBucket" | "NoSuchUpload"))
    }

    /// Check if this is an access denied error
    pub fn is_access_denied(&self) -> bool {
        matches!(self, Self::S3 { status: 403, .. }) || self.code() == Some("AccessDenied")
    }
}

/// Errors returned by [`crate::MultipartUploader`]
///
/// Each variant maps to a different recovery path: `PartsFailed` is retried
/// with `resume`, `Assembly` with `complete`, everything else is final.
#[derive(Error, Debug)]
pub enum UploadError {
    /// Rejected before any request was made
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The store refused to open a session; nothing was uploaded
    #[error("failed to initiate multipart upload: {0}")]
    Initiate(#[source] StoreError),

    /// Some parts failed; the session is still open
    #[error("{} of {} parts failed for {}: {:?}", .failed.len(), .session.parts.len(), .session.key, .failed)]
    PartsFailed {
        session: Box<UploadSession>,
        failed: BTreeSet<u32>,
    },

    /// Every part was acknowledged but the store rejected assembly
    #[error("failed to complete multipart upload {}: {source}", .session.session_id)]
    Assembly {
        session: Box<UploadSession>,
        #[source]
        source: StoreError,
    },

    /// The session is already completed or aborted
    #[error("multipart upload {session_id} is {state}")]
    SessionClosed { session_id: String, state: String },

    /// Shutdown was requested; in-flight parts were dropped and the session aborted
    #[error("multipart upload {session_id} cancelled")]
    Cancelled { session_id: String },
}

impl UploadError {
    /// The open session carried by a retryable error
    pub fn into_session(self) -> Option<UploadSession> {
        match self {
            Self::PartsFailed { session, .. } | Self::Assembly { session, .. } => Some(*session),
            _ => None,
        }
    }
}
