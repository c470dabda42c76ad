use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use bytes::Bytes;
use chrono::{DateTime, Utc};

use super::{ByteStream, ListEntry, ObjectClient, ObjectStat};
use crate::error::ClientError;

#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    last_modified: DateTime<Utc>,
}

type Bucket = BTreeMap<String, StoredObject>;

/// In-memory object store with S3 listing semantics.
///
/// Intended for tests and embedding. Buckets are kept behind a `RwLock`,
/// objects are cloned (cheaply, as `Bytes`) on read.
#[derive(Debug, Default)]
pub struct MemoryClient {
    buckets: RwLock<HashMap<String, Bucket>>,
}

impl MemoryClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// All keys of a bucket in lexicographic order, empty if the bucket is missing.
    pub fn keys(&self, bucket: &str) -> Vec<String> {
        let buckets = self.buckets.read().expect("lock poisoned");
        buckets
            .get(bucket)
            .map(|objects| objects.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Raw content of an object, if present.
    pub fn object(&self, bucket: &str, key: &str) -> Option<Bytes> {
        let buckets = self.buckets.read().expect("lock poisoned");
        buckets
            .get(bucket)
            .and_then(|objects| objects.get(key))
            .map(|obj| obj.data.clone())
    }
}

#[async_trait::async_trait]
impl ObjectClient for MemoryClient {
    async fn bucket_exists(&self, bucket: &str) -> Result<bool, ClientError> {
        let buckets = self.buckets.read().expect("lock poisoned");
        Ok(buckets.contains_key(bucket))
    }

    async fn make_bucket(&self, bucket: &str) -> Result<(), ClientError> {
        let mut buckets = self.buckets.write().expect("lock poisoned");
        buckets.entry(bucket.to_string()).or_default();
        Ok(())
    }

    async fn put_object(&self, bucket: &str, key: &str, data: Bytes) -> Result<(), ClientError> {
        let mut buckets = self.buckets.write().expect("lock poisoned");
        let objects = buckets
            .get_mut(bucket)
            .ok_or_else(|| ClientError::NoSuchBucket(bucket.to_string()))?;
        objects.insert(
            key.to_string(),
            StoredObject {
                data,
                last_modified: Utc::now(),
            },
        );
        Ok(())
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<ByteStream, ClientError> {
        let data = {
            let buckets = self.buckets.read().expect("lock poisoned");
            let objects = buckets
                .get(bucket)
                .ok_or_else(|| ClientError::NoSuchBucket(bucket.to_string()))?;
            objects
                .get(key)
                .map(|obj| obj.data.clone())
                .ok_or_else(|| ClientError::NoSuchKey(key.to_string()))?
        };
        Ok(Box::pin(futures::stream::iter(vec![Ok(data)])))
    }

    async fn stat_object(&self, bucket: &str, key: &str) -> Result<ObjectStat, ClientError> {
        let buckets = self.buckets.read().expect("lock poisoned");
        let objects = buckets
            .get(bucket)
            .ok_or_else(|| ClientError::NoSuchBucket(bucket.to_string()))?;
        objects
            .get(key)
            .map(|obj| ObjectStat {
                size: obj.data.len() as u64,
                last_modified: obj.last_modified,
            })
            .ok_or_else(|| ClientError::NoSuchKey(key.to_string()))
    }

    async fn list_objects(&self, bucket: &str, prefix: &str) -> Result<Vec<ListEntry>, ClientError> {
        let buckets = self.buckets.read().expect("lock poisoned");
        let objects = buckets
            .get(bucket)
            .ok_or_else(|| ClientError::NoSuchBucket(bucket.to_string()))?;

        let mut entries: Vec<ListEntry> = Vec::new();
        for (key, obj) in objects.range(prefix.to_string()..) {
            let Some(rest) = key.strip_prefix(prefix) else {
                break;
            };
            match rest.find('/') {
                Some(idx) => {
                    let common = format!("{}{}", prefix, &rest[..=idx]);
                    // keys are sorted, so a repeated prefix is always the last entry
                    if entries.last().map(|e| e.key()) != Some(common.as_str()) {
                        entries.push(ListEntry::Prefix(common));
                    }
                }
                None => entries.push(ListEntry::Object {
                    key: key.clone(),
                    stat: ObjectStat {
                        size: obj.data.len() as u64,
                        last_modified: obj.last_modified,
                    },
                }),
            }
        }
        Ok(entries)
    }

    async fn remove_object(&self, bucket: &str, key: &str) -> Result<(), ClientError> {
        let mut buckets = self.buckets.write().expect("lock poisoned");
        let objects = buckets
            .get_mut(bucket)
            .ok_or_else(|| ClientError::NoSuchBucket(bucket.to_string()))?;
        objects.remove(key);
        Ok(())
    }
}
