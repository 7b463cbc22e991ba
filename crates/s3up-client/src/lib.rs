//! # s3up client
//!
//! Chunked multipart uploads to S3-compatible object stores.
//!
//! ## Features
//!
//! - **Chunk planning**: gap-free part layouts that never leave an undersized final part
//! - **Parallel parts**: one task per part, with an optional concurrency cap
//! - **Resumable sessions**: failed parts are reported and can be re-sent against the same upload id
//! - **S3 REST store**: path-style requests signed with AWS Signature V4
//!
//! ## Example
//!
//! ```rust,ignore
//! use s3up_client::{ChunkPolicy, Credentials, FileSource, MultipartUploader, PutOptions,
//!     S3Store, StoreConfig, UploaderOptions};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = StoreConfig::new("https://s3.us-east-1.amazonaws.com")
//!         .with_credentials(Credentials::new("AKID", "SECRET"));
//!     let store = Arc::new(S3Store::new(config, "backups")?);
//!
//!     let source = Arc::new(FileSource::open("dump.tar").await?);
//!     let plan = ChunkPolicy::default().plan(source.size())?;
//!
//!     let uploader = MultipartUploader::new(store, UploaderOptions::default());
//!     let session = uploader
//!         .upload("db/dump.tar", source, &plan, &PutOptions::default())
//!         .await?;
//!     println!("{:?}", session.state);
//!     Ok(())
//! }
//! ```

mod client;
mod config;
mod error;
mod memory;
mod multipart;
mod planner;
mod sign;
mod source;
mod store;
mod types;
mod xml;

pub use client::S3Store;
pub use config::{Credentials, StoreConfig};
pub use error::{ConfigError, Result, StoreError, UploadError};
pub use memory::{CallLog, MemoryStore, StoredObject};
pub use multipart::{MultipartUploader, ProgressCallback, UploadProgress, UploaderOptions};
pub use planner::{
    plan_parts, ChunkPolicy, DEFAULT_MAX_CHUNK_SIZE, DEFAULT_MAX_PARTS, DEFAULT_MIN_TRAILING_SIZE,
};
pub use source::{FileSource, PartBody, PartSource};
pub use store::ObjectStore;
pub use types::*;
