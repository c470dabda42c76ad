use std::sync::Arc;

use bytes::Bytes;
use chrono::SecondsFormat;
use futures::stream::BoxStream;
use futures::StreamExt;
use tracing::{debug, info, warn};

use crate::blob_store::{BlobStore, ObjectInfo};
use crate::client::{ByteStream, ObjectClient};
use crate::config::StorageConfig;
use crate::content_types::has_parameters;
use crate::error::{StorageError, StorageResult};
use crate::mapper::{ExtensionMapper, ResourceIdentifier, ResourceLink, ResourceMapper};
use crate::metadata::{vocab, RepresentationMetadata, SidecarFormat, Term};
use crate::metrics::SharedMetrics;

/// Data and metadata of a resource as handed over by the protocol layer.
pub struct Representation {
    pub metadata: RepresentationMetadata,
    pub data: ByteStream,
    /// `false` for in-memory structured values, which this layer cannot store.
    pub binary: bool,
}

impl Representation {
    pub fn binary(metadata: RepresentationMetadata, data: ByteStream) -> Self {
        Self {
            metadata,
            data,
            binary: true,
        }
    }
}

/// Lazily evaluated listing of a container's children.
pub type ChildStream = BoxStream<'static, StorageResult<RepresentationMetadata>>;

/// Reads and writes resources on behalf of the protocol layer.
#[async_trait::async_trait]
pub trait DataAccessor: Send + Sync {
    /// Fails with UnsupportedMediaType unless the representation is binary.
    fn can_handle(&self, representation: &Representation) -> StorageResult<()>;

    async fn get_data(&self, identifier: &ResourceIdentifier) -> StorageResult<ByteStream>;

    async fn get_metadata(
        &self,
        identifier: &ResourceIdentifier,
    ) -> StorageResult<RepresentationMetadata>;

    /// Metadata of every direct child of a container, in listing order.
    async fn get_children(&self, identifier: &ResourceIdentifier) -> StorageResult<ChildStream>;

    async fn write_document(
        &self,
        identifier: &ResourceIdentifier,
        data: ByteStream,
        metadata: RepresentationMetadata,
    ) -> StorageResult<()>;

    /// Creates the container. Metadata is only stored when the container is new.
    async fn write_container(
        &self,
        identifier: &ResourceIdentifier,
        metadata: RepresentationMetadata,
    ) -> StorageResult<()>;

    /// Replaces the stored metadata, leaving the data untouched.
    async fn write_metadata(
        &self,
        identifier: &ResourceIdentifier,
        metadata: RepresentationMetadata,
    ) -> StorageResult<()>;

    async fn delete_resource(&self, identifier: &ResourceIdentifier) -> StorageResult<()>;
}

/// [`DataAccessor`] storing resources as objects in a [`BlobStore`], with
/// metadata in sidecar objects.
pub struct BlobDataAccessor {
    mapper: Arc<dyn ResourceMapper>,
    store: Arc<BlobStore>,
    sidecar_format: SidecarFormat,
}

impl BlobDataAccessor {
    pub fn new(mapper: Arc<dyn ResourceMapper>, store: Arc<BlobStore>) -> Self {
        let sidecar_format = SidecarFormat::for_key(mapper.sidecar_suffix());
        Self {
            mapper,
            store,
            sidecar_format,
        }
    }

    /// Wires a blob store and an [`ExtensionMapper`] from `config`.
    pub fn from_config(
        config: StorageConfig,
        client: Arc<dyn ObjectClient>,
        metrics: SharedMetrics,
    ) -> StorageResult<Self> {
        let config = config.validate()?;
        let store = Arc::new(BlobStore::new(
            client,
            &config.bucket,
            &config.sidecar_suffix,
            metrics,
        ));
        let mapper = Arc::new(ExtensionMapper::new(&config, store.clone()));
        Ok(Self::new(mapper, store))
    }

    pub fn mapper(&self) -> &Arc<dyn ResourceMapper> {
        &self.mapper
    }

    /// Creates the bucket and the root container if they are missing.
    /// Returns whether the root container was created.
    pub async fn ensure_root(&self) -> StorageResult<bool> {
        let root = self.mapper.root_identifier();
        let link = self.mapper.resolve_to_storage(&root, false, None).await?;
        let created = self.store.write_container_marker(&link.storage_key).await?;
        if created {
            info!("Created root container {}", root);
        }
        Ok(created)
    }

    async fn read_sidecar(
        &self,
        identifier: &ResourceIdentifier,
    ) -> StorageResult<RepresentationMetadata> {
        let link = self.mapper.resolve_to_storage(identifier, true, None).await?;
        match self.store.get_bytes(&link.storage_key).await {
            Ok(data) => self.sidecar_format.decode(identifier.path(), &data),
            Err(StorageError::NotFound(_)) => Ok(RepresentationMetadata::new(identifier.path())),
            Err(err) => Err(err),
        }
    }

    /// Stores the externally attached part of `metadata` in the sidecar.
    /// Document sidecars left without attributes are deleted, container
    /// sidecars are reset to an empty marker. Returns whether a non-empty
    /// sidecar was written.
    async fn write_sidecar(
        &self,
        identifier: &ResourceIdentifier,
        metadata: RepresentationMetadata,
    ) -> StorageResult<bool> {
        let sidecar = self.mapper.resolve_to_storage(identifier, true, None).await?;
        if metadata.is_empty() {
            if identifier.is_container() {
                self.store
                    .put_bytes(&sidecar.storage_key, Bytes::new())
                    .await?;
            } else if self.store.delete_object(&sidecar.storage_key).await? {
                debug!(key = %sidecar.storage_key, "removed stale sidecar");
            }
            return Ok(false);
        }

        let data = self.sidecar_format.encode(&metadata)?;
        self.store
            .put_bytes(&sidecar.storage_key, Bytes::from(data))
            .await?;
        Ok(true)
    }

    /// Deletes an object stored for `identifier` under a key other than
    /// `link`'s, left behind by a write with a different content type.
    async fn remove_stale_variant(
        &self,
        identifier: &ResourceIdentifier,
        link: &ResourceLink,
    ) -> StorageResult<()> {
        let existing = self.mapper.resolve_to_storage(identifier, false, None).await?;
        if existing.storage_key != link.storage_key
            && self.store.delete_object(&existing.storage_key).await?
        {
            debug!(
                old = %existing.storage_key,
                new = %link.storage_key,
                "removed object stored under previous content type"
            );
        }
        Ok(())
    }
}

/// Removes everything the storage layer derives by itself. The content type
/// is only removed when the key encodes it; parameters such as `charset`
/// are never encoded by a key.
fn strip_storage_metadata(metadata: &mut RepresentationMetadata, key_encodes_content_type: bool) {
    metadata.retain(vocab::RDF_TYPE, |term| {
        let value = term.value();
        value != vocab::LDP_RESOURCE
            && value != vocab::LDP_CONTAINER
            && value != vocab::LDP_BASIC_CONTAINER
            && !value.starts_with(vocab::IANA_MEDIA_TYPES)
    });
    metadata.remove_all(vocab::LDP_CONTAINS);
    metadata.remove_all(vocab::DC_MODIFIED);
    metadata.remove_all(vocab::POSIX_MTIME);
    metadata.remove_all(vocab::POSIX_SIZE);
    if key_encodes_content_type {
        metadata.remove_all(vocab::CONTENT_TYPE);
    }
}

/// Attributes derived from the object itself.
fn storage_metadata(
    identifier: &str,
    info: &ObjectInfo,
    content_type: Option<&str>,
) -> RepresentationMetadata {
    let mut metadata = RepresentationMetadata::new(identifier);
    metadata.add(vocab::RDF_TYPE, Term::iri(vocab::LDP_RESOURCE));
    if info.is_container {
        metadata.add(vocab::RDF_TYPE, Term::iri(vocab::LDP_CONTAINER));
        metadata.add(vocab::RDF_TYPE, Term::iri(vocab::LDP_BASIC_CONTAINER));
    } else {
        metadata.set(
            vocab::POSIX_SIZE,
            Term::typed(info.size.to_string(), vocab::XSD_INTEGER),
        );
        metadata.set_content_type(content_type);
    }
    metadata.set(
        vocab::DC_MODIFIED,
        Term::typed(
            info.last_modified.to_rfc3339_opts(SecondsFormat::Secs, true),
            vocab::XSD_DATE_TIME,
        ),
    );
    metadata.set(
        vocab::POSIX_MTIME,
        Term::typed(info.last_modified.timestamp().to_string(), vocab::XSD_INTEGER),
    );
    metadata
}

/// Metadata of a listed child, including its media type class.
fn child_metadata(link: &ResourceLink, info: &ObjectInfo) -> RepresentationMetadata {
    let mut metadata = storage_metadata(
        link.identifier.path(),
        info,
        link.content_type.as_deref(),
    );
    if let Some(content_type) = link.content_type.as_deref() {
        match content_type.parse::<mime::Mime>() {
            Ok(mime) => metadata.add(
                vocab::RDF_TYPE,
                Term::iri(format!(
                    "{}{}#Resource",
                    vocab::IANA_MEDIA_TYPES,
                    mime.essence_str()
                )),
            ),
            Err(err) => warn!(
                identifier = %link.identifier,
                "Detected an invalid content type '{}' ({}), skipping media type class",
                content_type,
                err
            ),
        }
    }
    metadata
}

#[async_trait::async_trait]
impl DataAccessor for BlobDataAccessor {
    fn can_handle(&self, representation: &Representation) -> StorageResult<()> {
        if !representation.binary {
            return Err(StorageError::UnsupportedMediaType(
                "only binary data can be stored".into(),
            ));
        }
        Ok(())
    }

    async fn get_data(&self, identifier: &ResourceIdentifier) -> StorageResult<ByteStream> {
        if identifier.is_container() {
            return Err(StorageError::NotFound(format!(
                "{} is a container and has no data",
                identifier
            )));
        }
        let link = self.mapper.resolve_to_storage(identifier, false, None).await?;
        self.store.get_object(&link.storage_key).await
    }

    async fn get_metadata(
        &self,
        identifier: &ResourceIdentifier,
    ) -> StorageResult<RepresentationMetadata> {
        let link = self.mapper.resolve_to_storage(identifier, false, None).await?;
        let info = self
            .store
            .stat_object(&link.storage_key)
            .await
            .map_err(|err| match err {
                StorageError::NotFound(_) => StorageError::NotFound(identifier.to_string()),
                err => err,
            })?;

        let mut metadata =
            storage_metadata(identifier.path(), &info, link.content_type.as_deref());
        let sidecar = self.read_sidecar(identifier).await?;
        if sidecar.content_type().is_some() {
            metadata.set_content_type(None);
        }
        metadata.merge(sidecar);
        Ok(metadata)
    }

    async fn get_children(&self, identifier: &ResourceIdentifier) -> StorageResult<ChildStream> {
        if !identifier.is_container() {
            return Err(StorageError::NotFound(format!(
                "{} is not a container",
                identifier
            )));
        }
        let link = self.mapper.resolve_to_storage(identifier, false, None).await?;
        self.store
            .stat_object(&link.storage_key)
            .await
            .map_err(|err| match err {
                StorageError::NotFound(_) => StorageError::NotFound(identifier.to_string()),
                err => err,
            })?;
        let keys = self.store.list_objects(&link.storage_key).await?;
        debug!(container = %identifier, entries = keys.len(), "listing children");

        let store = self.store.clone();
        let mapper = self.mapper.clone();
        let stream = futures::stream::iter(keys).filter_map(move |key| {
            let store = store.clone();
            let mapper = mapper.clone();
            async move {
                if key.ends_with(mapper.sidecar_suffix()) {
                    return None;
                }
                let info = match store.stat_object(&key).await {
                    Ok(info) => info,
                    Err(err) => {
                        warn!(key = %key, "skipping unreadable child: {}", err);
                        return None;
                    }
                };
                match mapper.resolve_to_identifier(&key, info.is_container) {
                    Ok(link) if link.is_metadata => None,
                    Ok(link) => Some(Ok(child_metadata(&link, &info))),
                    Err(err) => Some(Err(err)),
                }
            }
        });
        Ok(stream.boxed())
    }

    async fn write_document(
        &self,
        identifier: &ResourceIdentifier,
        data: ByteStream,
        mut metadata: RepresentationMetadata,
    ) -> StorageResult<()> {
        if identifier.is_container() {
            return Err(StorageError::BadRequest(format!(
                "{} identifies a container, not a document",
                identifier
            )));
        }
        let link = self
            .mapper
            .resolve_to_storage(identifier, false, metadata.content_type())
            .await?;

        self.remove_stale_variant(identifier, &link).await?;

        let key_encodes_content_type = link.content_type.is_some()
            && !metadata.content_type().is_some_and(has_parameters);
        strip_storage_metadata(&mut metadata, key_encodes_content_type);
        let wrote_sidecar = self.write_sidecar(identifier, metadata).await?;

        if let Err(err) = self.store.put_object(&link.storage_key, data).await {
            if wrote_sidecar {
                let sidecar = self.mapper.resolve_to_storage(identifier, true, None).await?;
                if let Err(cleanup) = self.store.delete_object(&sidecar.storage_key).await {
                    warn!(
                        key = %sidecar.storage_key,
                        "could not remove sidecar after failed write: {}", cleanup
                    );
                }
            }
            return Err(err);
        }
        debug!(identifier = %identifier, key = %link.storage_key, "wrote document");
        Ok(())
    }

    async fn write_container(
        &self,
        identifier: &ResourceIdentifier,
        mut metadata: RepresentationMetadata,
    ) -> StorageResult<()> {
        if !identifier.is_container() {
            return Err(StorageError::BadRequest(format!(
                "{} identifies a document, not a container",
                identifier
            )));
        }
        let link = self.mapper.resolve_to_storage(identifier, false, None).await?;
        if !self.store.write_container_marker(&link.storage_key).await? {
            debug!(container = %identifier, "container exists, keeping its metadata");
            return Ok(());
        }

        strip_storage_metadata(&mut metadata, true);
        if !metadata.is_empty() {
            self.write_sidecar(identifier, metadata).await?;
        }
        Ok(())
    }

    async fn write_metadata(
        &self,
        identifier: &ResourceIdentifier,
        mut metadata: RepresentationMetadata,
    ) -> StorageResult<()> {
        let link = self.mapper.resolve_to_storage(identifier, false, None).await?;
        if identifier.is_container() {
            // the sidecar doubles as the marker, writing it must not create the container
            self.store.stat_object(&link.storage_key).await?;
        }
        let key_encodes_content_type = identifier.is_container()
            || (link.content_type.is_some()
                && !metadata.content_type().is_some_and(has_parameters));
        strip_storage_metadata(&mut metadata, key_encodes_content_type);
        self.write_sidecar(identifier, metadata).await?;
        Ok(())
    }

    async fn delete_resource(&self, identifier: &ResourceIdentifier) -> StorageResult<()> {
        let link = self.mapper.resolve_to_storage(identifier, false, None).await?;
        let info = self
            .store
            .stat_object(&link.storage_key)
            .await
            .map_err(|err| match err {
                StorageError::NotFound(_) => StorageError::NotFound(identifier.to_string()),
                err => err,
            })?;

        let sidecar = self.mapper.resolve_to_storage(identifier, true, None).await?;
        self.store.delete_object(&sidecar.storage_key).await?;
        if !info.is_container {
            self.store.delete_object(&link.storage_key).await?;
        }
        debug!(identifier = %identifier, "deleted resource");
        Ok(())
    }
}
