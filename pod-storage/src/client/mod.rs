//! Raw object-store clients.
//!
//! [`ObjectClient`] is the seam between the storage layer and the network:
//! it speaks buckets and flat keys, nothing else. [`MemoryClient`] keeps
//! everything in process, [`S3Client`] talks to S3 or MinIO.

use std::pin::Pin;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::Stream;

use crate::error::ClientError;

pub mod memory;
pub mod s3;

pub use memory::MemoryClient;
pub use s3::{S3Client, S3Config};

/// A stream of object bytes. The stream owns whatever connection backs it and
/// releases it when dropped.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, std::io::Error>> + Send>>;

/// Size and modification time of a stored object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectStat {
    pub size: u64,
    pub last_modified: DateTime<Utc>,
}

/// One entry of a single-level listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListEntry {
    /// A stored object.
    Object { key: String, stat: ObjectStat },
    /// A group of keys sharing `prefix` up to the next `/` (the prefix ends in `/`).
    Prefix(String),
}

impl ListEntry {
    pub fn key(&self) -> &str {
        match self {
            ListEntry::Object { key, .. } => key,
            ListEntry::Prefix(prefix) => prefix,
        }
    }
}

/// Object storage primitives over named buckets.
#[async_trait::async_trait]
pub trait ObjectClient: Send + Sync {
    async fn bucket_exists(&self, bucket: &str) -> Result<bool, ClientError>;

    /// Creates the bucket. Creating a bucket that already exists is not an error.
    async fn make_bucket(&self, bucket: &str) -> Result<(), ClientError>;

    async fn put_object(&self, bucket: &str, key: &str, data: Bytes) -> Result<(), ClientError>;

    async fn get_object(&self, bucket: &str, key: &str) -> Result<ByteStream, ClientError>;

    async fn stat_object(&self, bucket: &str, key: &str) -> Result<ObjectStat, ClientError>;

    /// Lists the keys directly below `prefix`, using `/` as delimiter.
    async fn list_objects(&self, bucket: &str, prefix: &str) -> Result<Vec<ListEntry>, ClientError>;

    /// Removes the object. Removing an absent key succeeds, as it does on S3.
    async fn remove_object(&self, bucket: &str, key: &str) -> Result<(), ClientError>;
}
