use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use tracing::{debug, info, warn};

use crate::client::{ByteStream, ObjectClient};
use crate::error::{ClientError, StorageError, StorageResult};
use crate::metrics::SharedMetrics;

/// Separator used in storage keys. Keys ending in it denote containers.
pub const SEPARATOR: char = '/';

/// Result of [`BlobStore::stat_object`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    pub key: String,
    pub size: u64,
    pub last_modified: DateTime<Utc>,
    pub is_container: bool,
}

/// Object storage primitives for one bucket, plus the pseudo-directory
/// convention: a container key `a/b/` exists when its marker object
/// `a/b/<marker suffix>` exists.
pub struct BlobStore {
    client: Arc<dyn ObjectClient>,
    bucket: String,
    marker_suffix: String,
    bucket_ready: AtomicBool,
    metrics: SharedMetrics,
}

impl BlobStore {
    pub fn new(
        client: Arc<dyn ObjectClient>,
        bucket: impl Into<String>,
        marker_suffix: impl Into<String>,
        metrics: SharedMetrics,
    ) -> Self {
        Self {
            client,
            bucket: bucket.into(),
            marker_suffix: marker_suffix.into(),
            bucket_ready: AtomicBool::new(false),
            metrics,
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn marker_suffix(&self) -> &str {
        &self.marker_suffix
    }

    /// Key of the marker object for a container key.
    pub fn marker_key(&self, container_key: &str) -> String {
        format!("{}{}", container_key, self.marker_suffix)
    }

    fn track<T>(&self, res: Result<T, ClientError>) -> StorageResult<T> {
        res.map_err(|err| {
            if !err.is_not_found() {
                self.metrics.backend_error();
            }
            err.into()
        })
    }

    /// Creates the bucket if it does not exist yet. The outcome is cached
    /// after the first success.
    pub async fn ensure_bucket(&self) -> StorageResult<()> {
        if self.bucket_ready.load(Ordering::Acquire) {
            return Ok(());
        }
        // check-then-act; creation is idempotent on the backend
        if !self.track(self.client.bucket_exists(&self.bucket).await)? {
            info!("Creating bucket: {}", self.bucket);
            self.track(self.client.make_bucket(&self.bucket).await)?;
        }
        self.bucket_ready.store(true, Ordering::Release);
        Ok(())
    }

    /// Writes the whole stream to `key`.
    pub async fn put_object(&self, key: &str, mut data: ByteStream) -> StorageResult<()> {
        let mut buf = BytesMut::new();
        while let Some(chunk) = data
            .try_next()
            .await
            .map_err(|e| StorageError::Backend(e.into()))?
        {
            buf.extend_from_slice(&chunk);
        }
        self.put_bytes(key, buf.freeze()).await
    }

    pub async fn put_bytes(&self, key: &str, data: Bytes) -> StorageResult<()> {
        self.ensure_bucket().await?;
        debug!(key = %key, size = data.len(), "putting object");
        let size = data.len();
        self.track(self.client.put_object(&self.bucket, key, data).await)?;
        self.metrics.object_written();
        self.metrics.bytes_received(size);
        Ok(())
    }

    /// Opens a stream over the object's bytes. Fails with NotFound if the key
    /// does not exist.
    pub async fn get_object(&self, key: &str) -> StorageResult<ByteStream> {
        debug!(key = %key, "getting object");
        let stream = self.track(self.client.get_object(&self.bucket, key).await)?;
        self.metrics.object_read();
        let metrics = self.metrics.clone();
        Ok(Box::pin(
            stream.inspect_ok(move |chunk| metrics.bytes_sent(chunk.len())),
        ))
    }

    /// Reads the whole object into memory.
    pub async fn get_bytes(&self, key: &str) -> StorageResult<Bytes> {
        let chunks: Vec<Bytes> = self
            .get_object(key)
            .await?
            .try_collect()
            .await
            .map_err(|e| StorageError::Backend(e.into()))?;
        Ok(Bytes::from(chunks.concat()))
    }

    /// Stats `key`; container keys are answered by their marker object.
    pub async fn stat_object(&self, key: &str) -> StorageResult<ObjectInfo> {
        let is_container = key.ends_with(SEPARATOR);
        let stat_key = if is_container {
            self.marker_key(key)
        } else {
            key.to_string()
        };
        let stat = self
            .track(self.client.stat_object(&self.bucket, &stat_key).await)
            .map_err(|err| match err {
                StorageError::NotFound(_) => StorageError::NotFound(key.to_string()),
                err => err,
            })?;
        Ok(ObjectInfo {
            key: key.to_string(),
            size: stat.size,
            last_modified: stat.last_modified,
            is_container,
        })
    }

    /// Keys directly below `prefix`, child containers included as `prefix/child/`.
    /// The prefix's own marker is left out.
    pub async fn list_objects(&self, prefix: &str) -> StorageResult<Vec<String>> {
        let prefix = if prefix.ends_with(SEPARATOR) {
            prefix.to_string()
        } else {
            format!("{}{}", prefix, SEPARATOR)
        };
        let own_marker = self.marker_key(&prefix);
        let entries = self.track(self.client.list_objects(&self.bucket, &prefix).await)?;
        Ok(entries
            .into_iter()
            .map(|entry| entry.key().to_string())
            .filter(|key| *key != own_marker && *key != prefix)
            .collect())
    }

    /// Deletes `key`. Returns `false` if there was nothing to delete.
    pub async fn delete_object(&self, key: &str) -> StorageResult<bool> {
        match self.client.stat_object(&self.bucket, key).await {
            Ok(_) => {}
            Err(err) if err.is_not_found() => {
                debug!(key = %key, "nothing to delete");
                return Ok(false);
            }
            Err(err) => return self.track(Err(err)),
        }
        debug!(key = %key, "deleting object");
        self.track(self.client.remove_object(&self.bucket, key).await)?;
        self.metrics.object_deleted();
        Ok(true)
    }

    /// Creates the marker object of a container key. Returns `true` if the
    /// marker was created, `false` if the container already existed.
    pub async fn write_container_marker(&self, key: &str) -> StorageResult<bool> {
        self.ensure_bucket().await?;
        let marker = self.marker_key(key);
        match self.client.stat_object(&self.bucket, &marker).await {
            Ok(_) => return Ok(false),
            Err(err) if err.is_not_found() => {}
            Err(err) => {
                warn!(key = %key, "could not check container marker: {}", err);
                return self.track(Err(err));
            }
        }
        self.put_bytes(&marker, Bytes::new()).await?;
        Ok(true)
    }
}
