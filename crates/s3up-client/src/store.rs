//! Object store capability used by the uploader

use crate::source::PartBody;
use crate::types::{CompletedPart, ObjectPage, PutOptions};
use crate::Result;
use async_trait::async_trait;

/// Operations a multipart-capable object store must provide.
///
/// Keys are relative to the bucket the store was created for.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Open a multipart session and return its upload id
    async fn initiate_multipart_upload(&self, key: &str, options: &PutOptions) -> Result<String>;

    /// Upload one part and return its ETag. Safe to repeat for the same index.
    async fn upload_part(
        &self,
        key: &str,
        session_id: &str,
        index: u32,
        body: PartBody,
    ) -> Result<String>;

    /// Assemble the object from parts listed in increasing index order
    async fn complete_multipart_upload(
        &self,
        key: &str,
        session_id: &str,
        parts: &[CompletedPart],
    ) -> Result<String>;

    /// Discard a session and its uploaded parts
    async fn abort_multipart_upload(&self, key: &str, session_id: &str) -> Result<()>;

    /// Single-shot upload
    async fn put_object(&self, key: &str, body: PartBody, options: &PutOptions) -> Result<String>;

    /// Check if an object exists
    async fn object_exists(&self, key: &str) -> Result<bool>;

    /// List one page of objects under a prefix
    async fn list_objects(
        &self,
        prefix: Option<&str>,
        continuation_token: Option<&str>,
    ) -> Result<ObjectPage>;

    /// Delete an object
    async fn delete_object(&self, key: &str) -> Result<()>;
}
