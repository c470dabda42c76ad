//! # Pod Storage Library
//!
//! Stores hierarchical web resources (documents and containers) as flat
//! objects in an S3-compatible bucket.
//!
//! ## Features
//!
//! - **Pseudo-Directories**: Containers are key prefixes, marked by an empty `.meta` object
//! - **Content-Type Reconciliation**: Keys carry an extension matching their content type, e.g. `test.txt$.ttl`
//! - **Metadata Sidecars**: Attached metadata is kept next to the document in `<key>.meta`
//! - **Pluggable Backends**: Any [`ObjectClient`]; [`S3Client`] for S3/MinIO, [`MemoryClient`] in process
//! - **Streaming I/O**: Document bodies and child listings are handed out as streams
//!
//! ## Example
//!
//! ```no_run
//! use pod_storage::{
//!     BlobDataAccessor, DataAccessor, RepresentationMetadata, ResourceIdentifier, S3Client,
//!     S3Config, StorageConfig,
//! };
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = S3Client::new(&S3Config::default()).await;
//! let accessor = BlobDataAccessor::from_config(
//!     StorageConfig::default(),
//!     Arc::new(client),
//!     Default::default(), // metrics
//! )?;
//! accessor.ensure_root().await?;
//!
//! let id = ResourceIdentifier::new("http://localhost:3000/notes.ttl");
//! let data = Box::pin(futures::stream::once(async {
//!     Ok(bytes::Bytes::from_static(b"<a> <b> <c>."))
//! }));
//! let metadata = RepresentationMetadata::with_content_type(id.path(), "text/turtle");
//! accessor.write_document(&id, data, metadata).await?;
//! # Ok(())
//! # }
//! ```

pub mod accessor;
pub mod blob_store;
pub mod client;
pub mod config;
pub mod content_types;
pub mod error;
pub mod mapper;
pub mod metadata;
pub mod metrics;

// Re-export main types from accessor
pub use accessor::{BlobDataAccessor, ChildStream, DataAccessor, Representation};

// Re-export storage primitives
pub use blob_store::{BlobStore, ObjectInfo};
pub use client::{ByteStream, ListEntry, MemoryClient, ObjectClient, ObjectStat, S3Client, S3Config};

// Re-export mapping and metadata types
pub use config::StorageConfig;
pub use content_types::ContentTypeTable;
pub use error::{ClientError, StorageError, StorageResult};
pub use mapper::{ExtensionMapper, ResourceIdentifier, ResourceLink, ResourceMapper};
pub use metadata::{vocab, RepresentationMetadata, SidecarFormat, Term};

// Re-export metrics types
pub use metrics::{MetricsCollector, NoOpMetrics, SharedMetrics};
