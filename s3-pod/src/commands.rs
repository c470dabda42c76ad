use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Result};
use bytes::Bytes;
use futures::TryStreamExt;
use tracing::info;

use pod_storage::content_types::extension;
use pod_storage::{
    vocab, BlobDataAccessor, ByteStream, ContentTypeTable, DataAccessor, ObjectClient,
    RepresentationMetadata, ResourceIdentifier, S3Client, SharedMetrics, StorageConfig, Term,
};

use crate::config::AppConfig;

/// A pod opened for command line access. Paths are relative to the base URL.
pub struct Pod {
    accessor: BlobDataAccessor,
    table: ContentTypeTable,
    base: String,
}

impl Pod {
    pub async fn connect(config: AppConfig, metrics: SharedMetrics) -> Result<Self> {
        let client = S3Client::new(&config.s3).await;
        Self::with_client(config.storage, Arc::new(client), metrics)
    }

    pub fn with_client(
        storage: StorageConfig,
        client: Arc<dyn ObjectClient>,
        metrics: SharedMetrics,
    ) -> Result<Self> {
        let table = storage.content_type_table();
        let accessor = BlobDataAccessor::from_config(storage, client, metrics)?;
        let base = accessor.mapper().root_identifier().path().to_string();
        Ok(Self {
            accessor,
            table,
            base,
        })
    }

    /// Identifier of `path`, a path relative to the base URL.
    pub fn identifier(&self, path: &str) -> ResourceIdentifier {
        ResourceIdentifier::new(format!("{}{}", self.base, path.trim_start_matches('/')))
    }

    fn container(&self, path: &str) -> ResourceIdentifier {
        if path.ends_with('/') {
            self.identifier(path)
        } else {
            self.identifier(&format!("{}/", path))
        }
    }

    fn relative<'a>(&self, identifier: &'a str) -> &'a str {
        // keep the leading '/' of the path
        identifier
            .strip_prefix(self.base.trim_end_matches('/'))
            .unwrap_or(identifier)
    }

    pub async fn init(&self, out: &mut impl Write) -> Result<()> {
        if self.accessor.ensure_root().await? {
            writeln!(out, "created root container {}", self.base)?;
        } else {
            writeln!(out, "root container {} already exists", self.base)?;
        }
        Ok(())
    }

    pub async fn ls(&self, path: &str, out: &mut impl Write) -> Result<()> {
        let mut children = self.accessor.get_children(&self.container(path)).await?;
        while let Some(child) = children.try_next().await? {
            let kind = if child.is_container() { 'd' } else { '-' };
            let size = child
                .size()
                .map(|size| size.to_string())
                .unwrap_or_else(|| "-".to_string());
            let modified = child.first(vocab::DC_MODIFIED).map(Term::value).unwrap_or("-");
            let content_type = child.content_type().unwrap_or("-");
            writeln!(
                out,
                "{} {:>10} {} {:<24} {}",
                kind,
                size,
                modified,
                content_type,
                self.relative(child.identifier())
            )?;
        }
        Ok(())
    }

    pub async fn stat(&self, path: &str, out: &mut impl Write) -> Result<()> {
        let metadata = self.accessor.get_metadata(&self.identifier(path)).await?;
        writeln!(out, "<{}>", metadata.identifier())?;
        for (predicate, term) in metadata.iter() {
            writeln!(out, "    <{}> {}", predicate, render(term))?;
        }
        Ok(())
    }

    pub async fn cat(&self, path: &str, out: &mut impl Write) -> Result<()> {
        let mut data = self.accessor.get_data(&self.identifier(path)).await?;
        while let Some(chunk) = data.try_next().await? {
            out.write_all(&chunk)?;
        }
        out.flush()?;
        Ok(())
    }

    /// Uploads a local file. A `path` ending in `/` receives the file's name.
    pub async fn put(
        &self,
        local: &Path,
        path: &str,
        content_type: Option<&str>,
        out: &mut impl Write,
    ) -> Result<()> {
        let path = if path.ends_with('/') {
            let Some(name) = local.file_name().and_then(|name| name.to_str()) else {
                bail!("{} has no usable file name", local.display());
            };
            format!("{}{}", path, name)
        } else {
            path.to_string()
        };

        let content_type = match content_type {
            Some(content_type) => content_type.to_string(),
            None => {
                let local_name = local.to_string_lossy();
                self.table.resolve(extension(&local_name)).to_string()
            }
        };

        let data = Bytes::from(tokio::fs::read(local).await?);
        let size = data.len();
        let stream: ByteStream = Box::pin(futures::stream::once(async move { Ok(data) }));

        let identifier = self.identifier(&path);
        let metadata = RepresentationMetadata::with_content_type(identifier.path(), &content_type);
        self.accessor
            .write_document(&identifier, stream, metadata)
            .await?;
        info!(identifier = %identifier, size, "uploaded {}", local.display());
        writeln!(out, "{} ({}, {} bytes)", identifier, content_type, size)?;
        Ok(())
    }

    /// Creates a container. With `parents`, missing ancestors are created too.
    pub async fn mkdir(&self, path: &str, parents: bool, out: &mut impl Write) -> Result<()> {
        let target = self.container(path);
        let mut containers = Vec::new();
        if parents {
            let relative = self.relative(target.path()).trim_matches('/');
            let mut prefix = String::new();
            for segment in relative.split('/').filter(|s| !s.is_empty()) {
                prefix.push_str(segment);
                prefix.push('/');
                containers.push(self.identifier(&prefix));
            }
        } else {
            containers.push(target);
        }

        for container in containers {
            let metadata = RepresentationMetadata::new(container.path());
            self.accessor.write_container(&container, metadata).await?;
            writeln!(out, "{}", container)?;
        }
        Ok(())
    }

    /// Attaches attributes to a resource. Without `replace`, existing
    /// attributes are kept.
    pub async fn meta(
        &self,
        path: &str,
        attributes: &[(String, String)],
        replace: bool,
        out: &mut impl Write,
    ) -> Result<()> {
        let identifier = self.identifier(path);
        let current = self.accessor.get_metadata(&identifier).await?;
        let mut metadata = if replace {
            let mut metadata = RepresentationMetadata::new(identifier.path());
            metadata.set_content_type(current.content_type());
            metadata
        } else {
            current
        };
        for (predicate, value) in attributes {
            metadata.add(predicate, parse_term(value));
        }
        self.accessor.write_metadata(&identifier, metadata).await?;
        writeln!(out, "updated metadata of {}", identifier)?;
        Ok(())
    }

    pub async fn rm(&self, path: &str, out: &mut impl Write) -> Result<()> {
        let identifier = self.identifier(path);
        self.accessor.delete_resource(&identifier).await?;
        writeln!(out, "removed {}", identifier)?;
        Ok(())
    }
}

/// Parses a `predicate=value` pair given on the command line.
pub fn parse_attribute(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((predicate, value)) if !predicate.is_empty() => {
            Ok((predicate.to_string(), value.to_string()))
        }
        _ => Err(format!("expected predicate=value, got '{}'", s)),
    }
}

/// `<...>` denotes an IRI, anything else a plain literal.
fn parse_term(value: &str) -> Term {
    match value.strip_prefix('<').and_then(|v| v.strip_suffix('>')) {
        Some(iri) => Term::iri(iri),
        None => Term::literal(value),
    }
}

fn render(term: &Term) -> String {
    match term {
        Term::Iri { value } => format!("<{}>", value),
        Term::Literal {
            value,
            datatype: Some(datatype),
        } => format!("{:?}^^<{}>", value, datatype),
        Term::Literal {
            value,
            datatype: None,
        } => format!("{:?}", value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pod_storage::MemoryClient;

    const TITLE: &str = "http://purl.org/dc/terms/title";

    async fn pod() -> (Arc<MemoryClient>, Pod) {
        let client = Arc::new(MemoryClient::new());
        let pod = Pod::with_client(
            StorageConfig::default(),
            client.clone(),
            SharedMetrics::default(),
        )
        .unwrap();
        let mut out = Vec::new();
        pod.init(&mut out).await.unwrap();
        (client, pod)
    }

    fn output(out: Vec<u8>) -> String {
        String::from_utf8(out).unwrap()
    }

    #[tokio::test]
    async fn test_init_is_idempotent() {
        let (_client, pod) = pod().await;
        let mut out = Vec::new();
        pod.init(&mut out).await.unwrap();
        assert_eq!(
            output(out),
            "root container http://localhost:3000/ already exists\n"
        );
    }

    #[tokio::test]
    async fn test_put_guesses_content_type() {
        let (client, pod) = pod().await;
        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("notes.ttl");
        std::fs::write(&local, "<a> <b> <c>.").unwrap();

        let mut out = Vec::new();
        pod.put(&local, "/docs/", None, &mut out).await.unwrap();
        assert_eq!(
            output(out),
            "http://localhost:3000/docs/notes.ttl (text/turtle, 12 bytes)\n"
        );
        assert!(client.object("pod", "data/docs/notes.ttl").is_some());

        let mut out = Vec::new();
        pod.put(&local, "/notes.txt", Some("text/turtle"), &mut out)
            .await
            .unwrap();
        assert!(client.object("pod", "data/notes.txt$.ttl").is_some());

        let mut out = Vec::new();
        pod.cat("/notes.txt", &mut out).await.unwrap();
        assert_eq!(output(out), "<a> <b> <c>.");
    }

    #[tokio::test]
    async fn test_mkdir_and_ls() {
        let (_client, pod) = pod().await;
        let mut out = Vec::new();
        pod.mkdir("/a/b", true, &mut out).await.unwrap();
        assert_eq!(
            output(out),
            "http://localhost:3000/a/\nhttp://localhost:3000/a/b/\n"
        );

        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("readme.txt");
        std::fs::write(&local, "hello").unwrap();
        pod.put(&local, "/a/", None, &mut Vec::new()).await.unwrap();

        let mut out = Vec::new();
        pod.ls("/a", &mut out).await.unwrap();
        let listing = output(out);
        let lines: Vec<&str> = listing.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines.iter().any(|l| l.starts_with('d') && l.ends_with(" /a/b/")));
        assert!(lines
            .iter()
            .any(|l| l.starts_with('-') && l.contains("text/plain") && l.ends_with(" /a/readme.txt")));
    }

    #[tokio::test]
    async fn test_meta_and_stat() {
        let (_client, pod) = pod().await;
        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("doc.txt");
        std::fs::write(&local, "x").unwrap();
        pod.put(&local, "/doc.txt", None, &mut Vec::new())
            .await
            .unwrap();

        let attributes = vec![
            (TITLE.to_string(), "Notes".to_string()),
            (
                vocab::RDF_TYPE.to_string(),
                "<http://schema.org/Note>".to_string(),
            ),
        ];
        pod.meta("/doc.txt", &attributes, false, &mut Vec::new())
            .await
            .unwrap();

        let mut out = Vec::new();
        pod.stat("/doc.txt", &mut out).await.unwrap();
        let stat = output(out);
        assert!(stat.starts_with("<http://localhost:3000/doc.txt>\n"));
        assert!(stat.contains(&format!("<{}> \"Notes\"", TITLE)));
        assert!(stat.contains("<http://schema.org/Note>"));
        assert!(stat.contains("\"text/plain\""));

        pod.meta("/doc.txt", &[], true, &mut Vec::new()).await.unwrap();
        let mut out = Vec::new();
        pod.stat("/doc.txt", &mut out).await.unwrap();
        assert!(!output(out).contains("Notes"));
    }

    #[tokio::test]
    async fn test_rm() {
        let (client, pod) = pod().await;
        pod.mkdir("/tmp", false, &mut Vec::new()).await.unwrap();
        let mut out = Vec::new();
        pod.rm("/tmp/", &mut out).await.unwrap();
        assert_eq!(output(out), "removed http://localhost:3000/tmp/\n");
        assert!(client.object("pod", "data/tmp/.meta").is_none());

        assert!(pod.rm("/tmp/", &mut Vec::new()).await.is_err());
    }

    #[test]
    fn test_parse_attribute() {
        assert_eq!(
            parse_attribute("http://purl.org/dc/terms/title=a=b").unwrap(),
            (TITLE.to_string(), "a=b".to_string())
        );
        assert!(parse_attribute("no-separator").is_err());
        assert!(parse_attribute("=value").is_err());
        assert_eq!(parse_term("<http://x/>"), Term::iri("http://x/"));
        assert_eq!(parse_term("plain"), Term::literal("plain"));
    }
}
