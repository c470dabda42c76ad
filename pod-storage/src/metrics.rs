use std::sync::Arc;

/// Receives counters from the [`BlobStore`](crate::blob_store::BlobStore).
///
/// The binary records them in prometheus; the library only needs the trait.
pub trait MetricsCollector: Send + Sync {
    fn object_read(&self);
    fn object_written(&self);
    fn object_deleted(&self);
    /// A backend call failed for a reason other than a missing key or bucket.
    fn backend_error(&self);
    /// Bytes streamed out of the object store.
    fn bytes_sent(&self, amount: usize);
    /// Bytes written into the object store.
    fn bytes_received(&self, amount: usize);
}

/// Discards everything; used when no collector is configured.
#[derive(Debug, Clone, Default)]
pub struct NoOpMetrics;

impl MetricsCollector for NoOpMetrics {
    fn object_read(&self) {}
    fn object_written(&self) {}
    fn object_deleted(&self) {}
    fn backend_error(&self) {}
    fn bytes_sent(&self, _amount: usize) {}
    fn bytes_received(&self, _amount: usize) {}
}

/// Shared reference to metrics collector
#[derive(Clone)]
pub struct SharedMetrics(Arc<dyn MetricsCollector>);

impl SharedMetrics {
    pub fn new(collector: Arc<dyn MetricsCollector>) -> Self {
        Self(collector)
    }

    pub fn object_read(&self) {
        self.0.object_read();
    }

    pub fn object_written(&self) {
        self.0.object_written();
    }

    pub fn object_deleted(&self) {
        self.0.object_deleted();
    }

    pub fn backend_error(&self) {
        self.0.backend_error();
    }

    pub fn bytes_sent(&self, amount: usize) {
        self.0.bytes_sent(amount);
    }

    pub fn bytes_received(&self, amount: usize) {
        self.0.bytes_received(amount);
    }
}

impl Default for SharedMetrics {
    fn default() -> Self {
        Self(Arc::new(NoOpMetrics))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counting {
        writes: AtomicUsize,
        bytes: AtomicUsize,
    }

    impl MetricsCollector for Counting {
        fn object_read(&self) {}
        fn object_written(&self) {
            self.writes.fetch_add(1, Ordering::Relaxed);
        }
        fn object_deleted(&self) {}
        fn backend_error(&self) {}
        fn bytes_sent(&self, _amount: usize) {}
        fn bytes_received(&self, amount: usize) {
            self.bytes.fetch_add(amount, Ordering::Relaxed);
        }
    }

    #[tokio::test]
    async fn test_blob_store_reports_writes() {
        use crate::blob_store::BlobStore;
        use crate::client::MemoryClient;

        let counting = Arc::new(Counting::default());
        let store = BlobStore::new(
            Arc::new(MemoryClient::new()),
            "pod",
            ".meta",
            SharedMetrics::new(counting.clone()),
        );
        store
            .put_bytes("data/a.txt", bytes::Bytes::from_static(b"hello"))
            .await
            .unwrap();
        assert!(!store.delete_object("data/missing").await.unwrap());

        assert_eq!(counting.writes.load(Ordering::Relaxed), 1);
        assert_eq!(counting.bytes.load(Ordering::Relaxed), 5);
    }
}
