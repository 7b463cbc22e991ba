//! In-memory object store for testing and dry runs

use crate::source::PartBody;
use crate::store::ObjectStore;
use crate::types::{CompletedPart, ObjectInfo, ObjectPage, PutOptions};
use crate::{Result, StoreError};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// A stored object
#[derive(Clone, Debug)]
pub struct StoredObject {
    pub data: Bytes,
    pub etag: String,
    pub last_modified: DateTime<Utc>,
    pub options: PutOptions,
}

#[derive(Default)]
struct Session {
    key: String,
    options: PutOptions,
    parts: BTreeMap<u32, (String, Bytes)>,
}

/// Injected failures, consumed as they fire
#[derive(Default)]
struct Faults {
    initiate: usize,
    parts: HashMap<u32, usize>,
    complete: usize,
    put: HashMap<String, usize>,
    delete: HashMap<String, usize>,
}

/// Calls observed by the store
#[derive(Clone, Debug, Default)]
pub struct CallLog {
    pub initiated: Vec<String>,
    /// `(session_id, index)` per upload_part call, in arrival order
    pub parts: Vec<(String, u32)>,
    /// Part lists passed to complete
    pub completed: Vec<Vec<CompletedPart>>,
    pub aborted: Vec<String>,
    pub puts: Vec<String>,
    pub deletes: Vec<String>,
}

/// An in-memory multipart-capable store with fault injection
#[derive(Clone, Default)]
pub struct MemoryStore {
    objects: Arc<DashMap<String, StoredObject>>,
    sessions: Arc<DashMap<String, Session>>,
    faults: Arc<Mutex<Faults>>,
    delays: Arc<DashMap<u32, Duration>>,
    put_delay: Arc<Mutex<Option<Duration>>>,
    complete_delay: Arc<Mutex<Option<Duration>>>,
    calls: Arc<Mutex<CallLog>>,
    in_flight: Arc<AtomicUsize>,
    peak_in_flight: Arc<AtomicUsize>,
}

fn etag_of(data: &[u8]) -> String {
    hex::encode(&Sha256::digest(data)[..16])
}

fn injected(code: &str) -> StoreError {
    StoreError::S3 {
        code: code.to_string(),
        message: "injected failure".to_string(),
        status: 500,
        request_id: None,
    }
}

fn take_fault(counter: &mut usize) -> bool {
    if *counter > 0 {
        *counter -= 1;
        true
    } else {
        false
    }
}

fn take_keyed_fault<K: std::hash::Hash + Eq>(map: &mut HashMap<K, usize>, key: &K) -> bool {
    map.get_mut(key).map(take_fault).unwrap_or(false)
}

impl MemoryStore {
    /// Create a new empty memory store
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `times` initiate calls
    pub fn fail_initiate(&self, times: usize) {
        self.faults.lock().initiate = times;
    }

    /// Fail the next `times` uploads of part `index`
    pub fn fail_part(&self, index: u32, times: usize) {
        self.faults.lock().parts.insert(index, times);
    }

    /// Fail the next `times` complete calls
    pub fn fail_complete(&self, times: usize) {
        self.faults.lock().complete = times;
    }

    /// Fail the next `times` single-shot puts of `key`
    pub fn fail_put(&self, key: impl Into<String>, times: usize) {
        self.faults.lock().put.insert(key.into(), times);
    }

    /// Fail the next `times` deletes of `key`
    pub fn fail_delete(&self, key: impl Into<String>, times: usize) {
        self.faults.lock().delete.insert(key.into(), times);
    }

    /// Hold uploads of part `index` for `delay`
    pub fn delay_part(&self, index: u32, delay: Duration) {
        self.delays.insert(index, delay);
    }

    /// Hold every single-shot put for `delay`
    pub fn delay_put(&self, delay: Duration) {
        *self.put_delay.lock() = Some(delay);
    }

    /// Hold complete calls that are not failed by injection for `delay`
    pub fn delay_complete(&self, delay: Duration) {
        *self.complete_delay.lock() = Some(delay);
    }

    /// Seed an object with an explicit modification time
    pub fn insert_object(&self, key: impl Into<String>, data: impl Into<Bytes>, last_modified: DateTime<Utc>) {
        let data = data.into();
        self.objects.insert(
            key.into(),
            StoredObject {
                etag: etag_of(&data),
                data,
                last_modified,
                options: PutOptions::default(),
            },
        );
    }

    /// Get a stored object
    pub fn object(&self, key: &str) -> Option<StoredObject> {
        self.objects.get(key).map(|entry| entry.value().clone())
    }

    /// Keys of all stored objects, sorted
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.objects.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }

    /// Number of sessions neither completed nor aborted
    pub fn open_sessions(&self) -> usize {
        self.sessions.len()
    }

    /// Parts stored across all open sessions
    pub fn stored_parts(&self) -> usize {
        self.sessions.iter().map(|s| s.value().parts.len()).sum()
    }

    /// Snapshot of the calls made so far
    pub fn calls(&self) -> CallLog {
        self.calls.lock().clone()
    }

    /// Highest number of concurrent upload_part calls observed
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    fn no_such_upload(session_id: &str) -> StoreError {
        StoreError::S3 {
            code: "NoSuchUpload".to_string(),
            message: format!("upload {} does not exist", session_id),
            status: 404,
            request_id: None,
        }
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn initiate_multipart_upload(&self, key: &str, options: &PutOptions) -> Result<String> {
        self.calls.lock().initiated.push(key.to_string());
        if take_fault(&mut self.faults.lock().initiate) {
            return Err(injected("AccessDenied"));
        }
        let session_id = uuid::Uuid::new_v4().to_string();
        self.sessions.insert(
            session_id.clone(),
            Session {
                key: key.to_string(),
                options: options.clone(),
                parts: BTreeMap::new(),
            },
        );
        Ok(session_id)
    }

    async fn upload_part(
        &self,
        key: &str,
        session_id: &str,
        index: u32,
        body: PartBody,
    ) -> Result<String> {
        self.calls.lock().parts.push((session_id.to_string(), index));
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        let _guard = InFlight(&self.in_flight);
        self.peak_in_flight.fetch_max(current, Ordering::SeqCst);

        let delay = self.delays.get(&index).map(|d| *d.value());
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let data = body.collect().await?;
        if take_keyed_fault(&mut self.faults.lock().parts, &index) {
            return Err(injected("InternalError"));
        }

        let mut session = self
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| Self::no_such_upload(session_id))?;
        if session.key != key {
            return Err(Self::no_such_upload(session_id));
        }
        let etag = etag_of(&data);
        session.parts.insert(index, (etag.clone(), data));
        Ok(etag)
    }

    async fn complete_multipart_upload(
        &self,
        key: &str,
        session_id: &str,
        parts: &[CompletedPart],
    ) -> Result<String> {
        self.calls.lock().completed.push(parts.to_vec());
        if take_fault(&mut self.faults.lock().complete) {
            return Err(injected("InternalError"));
        }
        let delay = *self.complete_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let (_, session) = self
            .sessions
            .remove(session_id)
            .ok_or_else(|| Self::no_such_upload(session_id))?;

        let assembled = (|| {
            if session.key != key || parts.is_empty() {
                return Err("InvalidRequest");
            }
            if parts.windows(2).any(|w| w[0].part_number >= w[1].part_number) {
                return Err("InvalidPartOrder");
            }
            let mut data = BytesMut::new();
            for part in parts {
                match session.parts.get(&part.part_number) {
                    Some((etag, bytes)) if *etag == part.etag => data.extend_from_slice(bytes),
                    _ => return Err("InvalidPart"),
                }
            }
            Ok(data.freeze())
        })();

        match assembled {
            Ok(data) => {
                let etag = format!("{}-{}", etag_of(&data), parts.len());
                self.objects.insert(
                    key.to_string(),
                    StoredObject {
                        data,
                        etag: etag.clone(),
                        last_modified: Utc::now(),
                        options: session.options,
                    },
                );
                Ok(etag)
            }
            Err(code) => {
                // A rejected assembly leaves the session open for another try.
                self.sessions.insert(session_id.to_string(), session);
                Err(StoreError::S3 {
                    code: code.to_string(),
                    message: "assembly rejected".to_string(),
                    status: 400,
                    request_id: None,
                })
            }
        }
    }

    async fn abort_multipart_upload(&self, _key: &str, session_id: &str) -> Result<()> {
        self.calls.lock().aborted.push(session_id.to_string());
        self.sessions
            .remove(session_id)
            .map(|_| ())
            .ok_or_else(|| Self::no_such_upload(session_id))
    }

    async fn put_object(&self, key: &str, body: PartBody, options: &PutOptions) -> Result<String> {
        self.calls.lock().puts.push(key.to_string());
        let delay = *self.put_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let data = body.collect().await?;
        if take_keyed_fault(&mut self.faults.lock().put, &key.to_string()) {
            return Err(injected("InternalError"));
        }
        let etag = etag_of(&data);
        self.objects.insert(
            key.to_string(),
            StoredObject {
                data,
                etag: etag.clone(),
                last_modified: Utc::now(),
                options: options.clone(),
            },
        );
        Ok(etag)
    }

    async fn object_exists(&self, key: &str) -> Result<bool> {
        Ok(self.objects.contains_key(key))
    }

    async fn list_objects(
        &self,
        prefix: Option<&str>,
        continuation_token: Option<&str>,
    ) -> Result<ObjectPage> {
        const PAGE_SIZE: usize = 1000;

        let prefix = prefix.unwrap_or("");
        let mut matching: Vec<ObjectInfo> = self
            .objects
            .iter()
            .filter(|e| e.key().starts_with(prefix))
            .filter(|e| continuation_token.map_or(true, |after| e.key().as_str() > after))
            .map(|e| ObjectInfo {
                key: e.key().clone(),
                last_modified: e.value().last_modified,
                etag: e.value().etag.clone(),
                size: e.value().data.len() as u64,
            })
            .collect();
        matching.sort_by(|a, b| a.key.cmp(&b.key));

        let next_continuation_token = if matching.len() > PAGE_SIZE {
            matching.truncate(PAGE_SIZE);
            matching.last().map(|o| o.key.clone())
        } else {
            None
        };

        Ok(ObjectPage {
            objects: matching,
            next_continuation_token,
        })
    }

    async fn delete_object(&self, key: &str) -> Result<()> {
        self.calls.lock().deletes.push(key.to_string());
        if take_keyed_fault(&mut self.faults.lock().delete, &key.to_string()) {
            return Err(injected("InternalError"));
        }
        self.objects.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_multipart_roundtrip() {
        let store = MemoryStore::new();
        let id = store
            .initiate_multipart_upload("k", &PutOptions::default())
            .await
            .unwrap();
        let e2 = store
            .upload_part("k", &id, 2, PartBody::from_bytes("world"))
            .await
            .unwrap();
        let e1 = store
            .upload_part("k", &id, 1, PartBody::from_bytes("hello "))
            .await
            .unwrap();
        let parts = vec![
            CompletedPart { part_number: 1, etag: e1 },
            CompletedPart { part_number: 2, etag: e2 },
        ];
        store.complete_multipart_upload("k", &id, &parts).await.unwrap();
        assert_eq!(store.object("k").unwrap().data, Bytes::from_static(b"hello world"));
        assert_eq!(store.open_sessions(), 0);
    }

    #[tokio::test]
    async fn test_complete_rejects_out_of_order_parts() {
        let store = MemoryStore::new();
        let id = store
            .initiate_multipart_upload("k", &PutOptions::default())
            .await
            .unwrap();
        let e1 = store.upload_part("k", &id, 1, PartBody::from_bytes("a")).await.unwrap();
        let e2 = store.upload_part("k", &id, 2, PartBody::from_bytes("b")).await.unwrap();
        let parts = vec![
            CompletedPart { part_number: 2, etag: e2 },
            CompletedPart { part_number: 1, etag: e1 },
        ];
        let err = store.complete_multipart_upload("k", &id, &parts).await.unwrap_err();
        assert_eq!(err.code(), Some("InvalidPartOrder"));
        assert_eq!(store.open_sessions(), 1);
    }

    #[tokio::test]
    async fn test_listing_pages_by_key() {
        let store = MemoryStore::new();
        for i in 0..1500 {
            store.insert_object(format!("logs/{:05}", i), "x", Utc::now());
        }
        store.insert_object("other/file", "x", Utc::now());

        let first = store.list_objects(Some("logs/"), None).await.unwrap();
        assert_eq!(first.objects.len(), 1000);
        let token = first.next_continuation_token.unwrap();
        let second = store.list_objects(Some("logs/"), Some(&token)).await.unwrap();
        assert_eq!(second.objects.len(), 500);
        assert!(second.next_continuation_token.is_none());
    }
}
