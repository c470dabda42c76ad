use std::fmt;
use std::sync::Arc;

use tracing::{debug, trace};

use crate::blob_store::{BlobStore, SEPARATOR};
use crate::config::StorageConfig;
use crate::content_types::{essence, extension, ContentTypeTable};
use crate::error::{StorageError, StorageResult};

/// Marks a generated extension: `test.txt$.ttl` stores `test.txt` as turtle.
pub const RECONCILIATION_MARKER: &str = "$.";

/// Absolute identifier of a resource. A trailing `/` marks a container.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceIdentifier {
    path: String,
}

impl ResourceIdentifier {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn is_container(&self) -> bool {
        self.path.ends_with(SEPARATOR)
    }
}

impl fmt::Display for ResourceIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path)
    }
}

impl From<&str> for ResourceIdentifier {
    fn from(path: &str) -> Self {
        Self::new(path)
    }
}

impl From<String> for ResourceIdentifier {
    fn from(path: String) -> Self {
        Self::new(path)
    }
}

/// Outcome of mapping in either direction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceLink {
    pub identifier: ResourceIdentifier,
    pub storage_key: String,
    /// `None` when the key cannot encode the content type, or for
    /// containers and sidecars.
    pub content_type: Option<String>,
    pub is_metadata: bool,
}

/// Translation between resource identifiers and storage keys.
#[async_trait::async_trait]
pub trait ResourceMapper: Send + Sync {
    /// Maps an identifier to its storage key.
    ///
    /// Without `content_type` the existing key is looked up (read path).
    /// With it, the key is derived so that it encodes that content type
    /// where possible (write path).
    async fn resolve_to_storage(
        &self,
        identifier: &ResourceIdentifier,
        is_metadata: bool,
        content_type: Option<&str>,
    ) -> StorageResult<ResourceLink>;

    /// Maps a storage key produced by this mapper back to its identifier.
    fn resolve_to_identifier(&self, storage_key: &str, is_container: bool)
        -> StorageResult<ResourceLink>;

    /// Suffix appended to a key to address its sidecar.
    fn sidecar_suffix(&self) -> &str;

    /// Identifier of the root container.
    fn root_identifier(&self) -> ResourceIdentifier;
}

/// [`ResourceMapper`] deriving content types from file extensions.
pub struct ExtensionMapper {
    base: String,
    root: String,
    table: ContentTypeTable,
    unknown_extension: String,
    sidecar_suffix: String,
    store: Arc<BlobStore>,
}

/// Splits `path$.ext` into `(path, Some(ext))`.
fn split_reconciled(path: &str) -> (&str, Option<&str>) {
    if let Some(idx) = path.rfind(RECONCILIATION_MARKER) {
        let ext = &path[idx + RECONCILIATION_MARKER.len()..];
        if !ext.is_empty() && !ext.contains(['.', '/', '$']) {
            return (&path[..idx], Some(ext));
        }
    }
    (path, None)
}

impl ExtensionMapper {
    /// `config` is expected to have passed [`StorageConfig::validate`].
    pub fn new(config: &StorageConfig, store: Arc<BlobStore>) -> Self {
        Self {
            base: config.base_url.trim_end_matches(SEPARATOR).to_string(),
            root: config.root.clone(),
            table: config.content_type_table(),
            unknown_extension: config.unknown_extension.clone(),
            sidecar_suffix: config.sidecar_suffix.clone(),
            store,
        }
    }

    pub fn table(&self) -> &ContentTypeTable {
        &self.table
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    /// Path of `identifier` after the base, starting with `/`.
    fn relative_path<'a>(&self, identifier: &'a ResourceIdentifier) -> StorageResult<&'a str> {
        let path = identifier.path();
        let relative = path.strip_prefix(self.base.as_str()).ok_or_else(|| {
            StorageError::NotFound(format!("{} is not in the configured base", path))
        })?;
        if !relative.starts_with(SEPARATOR) {
            return Err(StorageError::BadRequest(format!(
                "{} needs a / after the base",
                path
            )));
        }
        if relative.split(SEPARATOR).any(|segment| segment == "..") {
            return Err(StorageError::BadRequest(format!(
                "{} contains a disallowed .. segment",
                path
            )));
        }
        Ok(relative)
    }

    fn link(
        identifier: &ResourceIdentifier,
        storage_key: String,
        content_type: Option<String>,
        is_metadata: bool,
    ) -> ResourceLink {
        ResourceLink {
            identifier: identifier.clone(),
            storage_key,
            content_type,
            is_metadata,
        }
    }

    /// Content type a document key encodes, `None` for the fallback extension.
    fn content_type_for_key(&self, key: &str) -> Option<String> {
        match split_reconciled(key) {
            (_, Some(ext)) if ext == self.unknown_extension => None,
            _ => Some(self.table.resolve(extension(key)).to_string()),
        }
    }

    async fn resolve_existing(
        &self,
        identifier: &ResourceIdentifier,
        candidate: String,
    ) -> StorageResult<ResourceLink> {
        // the root always ends in '/', so a separator is always found
        let parent = &candidate[..=candidate.rfind(SEPARATOR).unwrap_or_default()];
        let key = match self.store.list_objects(parent).await {
            Ok(keys) => {
                if keys.iter().any(|k| *k == candidate) {
                    candidate
                } else {
                    keys.into_iter()
                        .find(|k| {
                            k.strip_prefix(candidate.as_str())
                                .map(|rest| {
                                    rest.starts_with(RECONCILIATION_MARKER)
                                        && split_reconciled(rest).1.is_some()
                                })
                                .unwrap_or(false)
                        })
                        .unwrap_or(candidate)
                }
            }
            Err(StorageError::NotFound(_)) => {
                debug!(parent = %parent, "parent listing unavailable, using candidate key");
                candidate
            }
            Err(err) => return Err(err),
        };

        let content_type = self.content_type_for_key(&key);
        trace!(identifier = %identifier, key = %key, "resolved existing key");
        Ok(Self::link(identifier, key, content_type, false))
    }

    fn resolve_new(
        &self,
        identifier: &ResourceIdentifier,
        candidate: String,
        content_type: &str,
    ) -> ResourceLink {
        let implied = self.table.resolve(extension(&candidate));
        if essence(implied) == essence(content_type) {
            return Self::link(identifier, candidate, Some(content_type.to_string()), false);
        }

        match self.table.extension_for(content_type) {
            Some(ext) => Self::link(
                identifier,
                format!("{}{}{}", candidate, RECONCILIATION_MARKER, ext),
                Some(content_type.to_string()),
                false,
            ),
            None => {
                debug!(
                    content_type = %content_type,
                    "no extension for content type, using fallback extension"
                );
                Self::link(
                    identifier,
                    format!("{}{}{}", candidate, RECONCILIATION_MARKER, self.unknown_extension),
                    None,
                    false,
                )
            }
        }
    }
}

#[async_trait::async_trait]
impl ResourceMapper for ExtensionMapper {
    async fn resolve_to_storage(
        &self,
        identifier: &ResourceIdentifier,
        is_metadata: bool,
        content_type: Option<&str>,
    ) -> StorageResult<ResourceLink> {
        let relative = self.relative_path(identifier)?;
        // generated keys carry exactly one marker, so callers may not supply any
        if relative.contains(RECONCILIATION_MARKER) {
            return Err(StorageError::NotImplemented(format!(
                "{} uses the reserved {} syntax",
                identifier, RECONCILIATION_MARKER
            )));
        }

        let candidate = format!("{}{}", self.root, &relative[1..]);
        if is_metadata {
            let key = format!("{}{}", candidate, self.sidecar_suffix);
            return Ok(Self::link(identifier, key, None, true));
        }
        if identifier.is_container() {
            return Ok(Self::link(identifier, candidate, None, false));
        }

        match content_type {
            None => self.resolve_existing(identifier, candidate).await,
            Some(content_type) => Ok(self.resolve_new(identifier, candidate, content_type)),
        }
    }

    fn resolve_to_identifier(
        &self,
        storage_key: &str,
        is_container: bool,
    ) -> StorageResult<ResourceLink> {
        let relative = storage_key.strip_prefix(self.root.as_str()).ok_or_else(|| {
            StorageError::Internal(format!(
                "storage key {} is outside the root {}",
                storage_key, self.root
            ))
        })?;

        let (relative, is_metadata) = match relative.strip_suffix(self.sidecar_suffix.as_str()) {
            Some(stripped) => (stripped, true),
            None => (relative, false),
        };
        let is_container = is_container || relative.is_empty() || relative.ends_with(SEPARATOR);

        let (logical, content_type) = if is_container || is_metadata {
            (relative, None)
        } else {
            let (logical, ext) = split_reconciled(relative);
            let ext = ext.or_else(|| extension(logical));
            (logical, Some(self.table.resolve(ext).to_string()))
        };

        let mut path = format!("{}{}{}", self.base, SEPARATOR, logical);
        if is_container && !path.ends_with(SEPARATOR) {
            path.push(SEPARATOR);
        }

        Ok(ResourceLink {
            identifier: ResourceIdentifier::new(path),
            storage_key: storage_key.to_string(),
            content_type,
            is_metadata,
        })
    }

    fn sidecar_suffix(&self) -> &str {
        &self.sidecar_suffix
    }

    fn root_identifier(&self) -> ResourceIdentifier {
        ResourceIdentifier::new(format!("{}{}", self.base, SEPARATOR))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{MemoryClient, ObjectClient};
    use crate::error::ClientError;
    use crate::metrics::SharedMetrics;
    use bytes::Bytes;

    const BASE: &str = "http://localhost:3000";

    fn mapper_with(client: Arc<dyn ObjectClient>) -> ExtensionMapper {
        let config = StorageConfig::default().validate().unwrap();
        let store = Arc::new(BlobStore::new(
            client,
            &config.bucket,
            &config.sidecar_suffix,
            SharedMetrics::default(),
        ));
        ExtensionMapper::new(&config, store)
    }

    fn mapper() -> (Arc<MemoryClient>, ExtensionMapper) {
        let client = Arc::new(MemoryClient::new());
        (client.clone(), mapper_with(client))
    }

    fn id(path: &str) -> ResourceIdentifier {
        ResourceIdentifier::new(format!("{}{}", BASE, path))
    }

    async fn write(client: &MemoryClient, key: &str) {
        client.make_bucket("pod").await.unwrap();
        client
            .put_object("pod", key, Bytes::from_static(b"x"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_rejects_foreign_and_malformed_identifiers() {
        let (_client, mapper) = mapper();

        let err = mapper
            .resolve_to_storage(&"http://other.example/a".into(), false, None)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));

        let err = mapper
            .resolve_to_storage(&"http://localhost:3000a/b".into(), false, None)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::BadRequest(_)));

        let err = mapper
            .resolve_to_storage(&id("/a/../b"), false, None)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::BadRequest(_)));
    }

    #[tokio::test]
    async fn test_reserved_marker_is_not_implemented() {
        let (_client, mapper) = mapper();
        for path in ["/test$.txt", "/test$.txt.bak", "/a$.b/test.txt", "/a$.b/"] {
            for content_type in [None, Some("text/turtle")] {
                let err = mapper
                    .resolve_to_storage(&id(path), false, content_type)
                    .await
                    .unwrap_err();
                assert!(matches!(err, StorageError::NotImplemented(_)), "{}", path);
                assert_eq!(err.status_code(), 501);
            }
        }
        let err = mapper
            .resolve_to_storage(&id("/test$.txt.bak"), true, None)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::NotImplemented(_)));

        // a lone '$' is an ordinary character
        let link = mapper
            .resolve_to_storage(&id("/price$5.txt"), false, Some("text/turtle"))
            .await
            .unwrap();
        assert_eq!(link.storage_key, "data/price$5.txt$.ttl");
    }

    #[tokio::test]
    async fn test_write_matching_extension() {
        let (_client, mapper) = mapper();
        let link = mapper
            .resolve_to_storage(&id("/test.txt"), false, Some("text/plain"))
            .await
            .unwrap();
        assert_eq!(link.storage_key, "data/test.txt");
        assert_eq!(link.content_type.as_deref(), Some("text/plain"));
        assert!(!link.is_metadata);
    }

    #[tokio::test]
    async fn test_write_mismatching_extension() {
        let (_client, mapper) = mapper();
        let link = mapper
            .resolve_to_storage(&id("/test.txt"), false, Some("text/turtle"))
            .await
            .unwrap();
        assert_eq!(link.storage_key, "data/test.txt$.ttl");
        assert_eq!(link.content_type.as_deref(), Some("text/turtle"));
    }

    #[tokio::test]
    async fn test_write_unknown_content_type() {
        let (_client, mapper) = mapper();
        let link = mapper
            .resolve_to_storage(&id("/test"), false, Some("unknown/content-type"))
            .await
            .unwrap();
        assert_eq!(link.storage_key, "data/test$.unknown");
        assert_eq!(link.content_type, None);
    }

    #[tokio::test]
    async fn test_write_default_type_without_extension() {
        let (_client, mapper) = mapper();
        let link = mapper
            .resolve_to_storage(&id("/test"), false, Some("application/octet-stream"))
            .await
            .unwrap();
        assert_eq!(link.storage_key, "data/test");
    }

    #[tokio::test]
    async fn test_read_finds_reconciled_key() {
        let (client, mapper) = mapper();
        write(&client, "data/test.txt$.ttl").await;
        write(&client, "data/test.txt.bak").await;

        let link = mapper
            .resolve_to_storage(&id("/test.txt"), false, None)
            .await
            .unwrap();
        assert_eq!(link.storage_key, "data/test.txt$.ttl");
        assert_eq!(link.content_type.as_deref(), Some("text/turtle"));
    }

    #[tokio::test]
    async fn test_read_prefers_exact_key() {
        let (client, mapper) = mapper();
        write(&client, "data/a/test.txt").await;

        let link = mapper
            .resolve_to_storage(&id("/a/test.txt"), false, None)
            .await
            .unwrap();
        assert_eq!(link.storage_key, "data/a/test.txt");
        assert_eq!(link.content_type.as_deref(), Some("text/plain"));
    }

    #[tokio::test]
    async fn test_read_unknown_extension_has_no_content_type() {
        let (client, mapper) = mapper();
        write(&client, "data/test$.unknown").await;

        let link = mapper
            .resolve_to_storage(&id("/test"), false, None)
            .await
            .unwrap();
        assert_eq!(link.storage_key, "data/test$.unknown");
        assert_eq!(link.content_type, None);
    }

    #[tokio::test]
    async fn test_read_without_parent_uses_candidate() {
        // no bucket at all: the parent listing fails with NotFound
        let (_client, mapper) = mapper();
        let link = mapper
            .resolve_to_storage(&id("/missing/test.ttl"), false, None)
            .await
            .unwrap();
        assert_eq!(link.storage_key, "data/missing/test.ttl");
        assert_eq!(link.content_type.as_deref(), Some("text/turtle"));
    }

    struct BrokenList;

    #[async_trait::async_trait]
    impl ObjectClient for BrokenList {
        async fn bucket_exists(&self, _: &str) -> Result<bool, ClientError> {
            Ok(true)
        }
        async fn make_bucket(&self, _: &str) -> Result<(), ClientError> {
            Ok(())
        }
        async fn put_object(&self, _: &str, _: &str, _: Bytes) -> Result<(), ClientError> {
            Ok(())
        }
        async fn get_object(
            &self,
            _: &str,
            key: &str,
        ) -> Result<crate::client::ByteStream, ClientError> {
            Err(ClientError::NoSuchKey(key.to_string()))
        }
        async fn stat_object(
            &self,
            _: &str,
            key: &str,
        ) -> Result<crate::client::ObjectStat, ClientError> {
            Err(ClientError::NoSuchKey(key.to_string()))
        }
        async fn list_objects(
            &self,
            _: &str,
            _: &str,
        ) -> Result<Vec<crate::client::ListEntry>, ClientError> {
            Err(ClientError::Other(anyhow::anyhow!("connection refused")))
        }
        async fn remove_object(&self, _: &str, _: &str) -> Result<(), ClientError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_read_propagates_backend_failure() {
        let mapper = mapper_with(Arc::new(BrokenList));
        let err = mapper
            .resolve_to_storage(&id("/test.txt"), false, None)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Backend(_)));
    }

    #[tokio::test]
    async fn test_metadata_and_container_keys() {
        let (_client, mapper) = mapper();
        let link = mapper
            .resolve_to_storage(&id("/test.txt"), true, None)
            .await
            .unwrap();
        assert_eq!(link.storage_key, "data/test.txt.meta");
        assert!(link.is_metadata);

        let link = mapper
            .resolve_to_storage(&id("/folder/"), false, None)
            .await
            .unwrap();
        assert_eq!(link.storage_key, "data/folder/");
        assert_eq!(link.content_type, None);

        let link = mapper
            .resolve_to_storage(&id("/folder/"), true, None)
            .await
            .unwrap();
        assert_eq!(link.storage_key, "data/folder/.meta");

        let link = mapper
            .resolve_to_storage(&mapper.root_identifier(), false, None)
            .await
            .unwrap();
        assert_eq!(link.storage_key, "data/");
    }

    #[tokio::test]
    async fn test_round_trip() {
        let (_client, mapper) = mapper();
        let cases = [
            ("/test.txt", "text/plain", "text/plain"),
            ("/test.txt", "text/turtle", "text/turtle"),
            ("/a/b/image", "image/png", "image/png"),
            ("/test", "unknown/content-type", "application/octet-stream"),
        ];
        for (path, content_type, expected) in cases {
            let identifier = id(path);
            let link = mapper
                .resolve_to_storage(&identifier, false, Some(content_type))
                .await
                .unwrap();
            assert!(link.storage_key.matches(RECONCILIATION_MARKER).count() <= 1);

            let back = mapper
                .resolve_to_identifier(&link.storage_key, false)
                .unwrap();
            assert_eq!(back.identifier, identifier);
            assert_eq!(back.content_type.as_deref(), Some(expected));
            assert!(!back.is_metadata);
        }
    }

    #[tokio::test]
    async fn test_round_trip_with_overridden_extension() {
        let mut config = StorageConfig::default();
        config
            .content_types
            .insert("txt".to_string(), "text/x-custom".to_string());
        let config = config.validate().unwrap();
        let store = Arc::new(BlobStore::new(
            Arc::new(MemoryClient::new()),
            &config.bucket,
            &config.sidecar_suffix,
            SharedMetrics::default(),
        ));
        let mapper = ExtensionMapper::new(&config, store);

        let cases = [
            ("/a.bin", "text/plain", "data/a.bin$.unknown", None),
            ("/a.bin", "text/x-custom", "data/a.bin$.txt", Some("text/x-custom")),
        ];
        for (path, content_type, key, stored) in cases {
            let link = mapper
                .resolve_to_storage(&id(path), false, Some(content_type))
                .await
                .unwrap();
            assert_eq!(link.storage_key, key);
            assert_eq!(link.content_type.as_deref(), stored);

            let back = mapper.resolve_to_identifier(key, false).unwrap();
            assert_eq!(back.identifier, id(path));
            if let Some(stored) = stored {
                assert_eq!(back.content_type.as_deref(), Some(stored));
            }
        }
    }

    #[test]
    fn test_identifier_from_sidecar_and_container_keys() {
        let config = StorageConfig::default().validate().unwrap();
        let store = Arc::new(BlobStore::new(
            Arc::new(MemoryClient::new()),
            "pod",
            ".meta",
            SharedMetrics::default(),
        ));
        let mapper = ExtensionMapper::new(&config, store);

        let link = mapper.resolve_to_identifier("data/test.txt.meta", false).unwrap();
        assert!(link.is_metadata);
        assert_eq!(link.identifier, id("/test.txt"));

        let link = mapper.resolve_to_identifier("data/folder/", true).unwrap();
        assert_eq!(link.identifier, id("/folder/"));
        assert!(link.identifier.is_container());
        assert_eq!(link.content_type, None);

        let link = mapper.resolve_to_identifier("data/", true).unwrap();
        assert_eq!(link.identifier, mapper.root_identifier());

        let link = mapper.resolve_to_identifier("data/noext", false).unwrap();
        assert_eq!(link.content_type.as_deref(), Some("application/octet-stream"));

        let err = mapper.resolve_to_identifier("elsewhere/a.txt", false).unwrap_err();
        assert!(matches!(err, StorageError::Internal(_)));
        assert_eq!(err.status_code(), 500);
    }
}
