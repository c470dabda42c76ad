use std::collections::{BTreeMap, HashMap};

use lazy_static::lazy_static;

/// Content type for documents without a usable extension.
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Extension used when a content type has no known extension.
pub const UNKNOWN_EXTENSION: &str = "unknown";

lazy_static! {
    /// Built-in extension table. Where several extensions share a content
    /// type, the preferred one is listed last so it wins the reverse lookup.
    static ref DEFAULT_TYPES: Vec<(&'static str, &'static str)> = vec![
        ("acl", "text/turtle"),
        ("ttl", "text/turtle"),
        ("n3", "text/n3"),
        ("nt", "application/n-triples"),
        ("nq", "application/n-quads"),
        ("trig", "application/trig"),
        ("rdf", "application/rdf+xml"),
        ("owl", "application/rdf+xml"),
        ("jsonld", "application/ld+json"),
        ("json", "application/json"),
        ("txt", "text/plain"),
        ("md", "text/markdown"),
        ("csv", "text/csv"),
        ("css", "text/css"),
        ("htm", "text/html"),
        ("html", "text/html"),
        ("js", "text/javascript"),
        ("mjs", "text/javascript"),
        ("xml", "application/xml"),
        ("xhtml", "application/xhtml+xml"),
        ("pdf", "application/pdf"),
        ("zip", "application/zip"),
        ("gz", "application/gzip"),
        ("tar", "application/x-tar"),
        ("wasm", "application/wasm"),
        ("bin", "application/octet-stream"),
        ("png", "image/png"),
        ("gif", "image/gif"),
        ("jpeg", "image/jpeg"),
        ("jpg", "image/jpeg"),
        ("svg", "image/svg+xml"),
        ("webp", "image/webp"),
        ("ico", "image/vnd.microsoft.icon"),
        ("mp3", "audio/mpeg"),
        ("ogg", "audio/ogg"),
        ("wav", "audio/wav"),
        ("mp4", "video/mp4"),
        ("webm", "video/webm"),
        ("woff", "font/woff"),
        ("woff2", "font/woff2"),
    ];
}

/// Bidirectional mapping between file extensions and content types.
///
/// Extensions are stored lower case and looked up case-insensitively.
/// Registering an extension replaces its previous content type; the reverse
/// direction keeps whichever extension was registered last.
#[derive(Debug, Clone)]
pub struct ContentTypeTable {
    by_extension: HashMap<String, String>,
    by_content_type: HashMap<String, String>,
    default_content_type: String,
}

impl ContentTypeTable {
    /// An empty table that resolves everything to `default_content_type`.
    pub fn empty(default_content_type: impl Into<String>) -> Self {
        Self {
            by_extension: HashMap::new(),
            by_content_type: HashMap::new(),
            default_content_type: default_content_type.into(),
        }
    }

    /// The built-in table, optionally extended by `overrides` (extension -> content type).
    pub fn with_overrides(
        default_content_type: impl Into<String>,
        overrides: &BTreeMap<String, String>,
    ) -> Self {
        let mut table = Self::empty(default_content_type);
        for (ext, content_type) in DEFAULT_TYPES.iter() {
            table.register(ext, content_type);
        }
        for (ext, content_type) in overrides {
            table.register(ext.trim_start_matches('.'), content_type);
        }
        table
    }

    pub fn register(&mut self, extension: &str, content_type: &str) {
        let extension = extension.to_ascii_lowercase();
        let content_type = content_type.to_ascii_lowercase();
        let previous = self
            .by_extension
            .insert(extension.clone(), content_type.clone());
        if let Some(previous) = previous.filter(|previous| *previous != content_type) {
            self.unlink_reverse(&previous, &extension);
        }
        self.by_content_type.insert(content_type, extension);
    }

    /// Drops the reverse entry of `content_type` if it still names
    /// `extension`, falling back to another extension of that type.
    fn unlink_reverse(&mut self, content_type: &str, extension: &str) {
        if self.by_content_type.get(content_type).map(String::as_str) != Some(extension) {
            return;
        }
        let replacement = self
            .by_extension
            .iter()
            .filter(|(_, ct)| ct.as_str() == content_type)
            .map(|(ext, _)| ext)
            .max()
            .cloned();
        match replacement {
            Some(replacement) => {
                self.by_content_type
                    .insert(content_type.to_string(), replacement);
            }
            None => {
                self.by_content_type.remove(content_type);
            }
        }
    }

    /// Content type registered for `extension`, if any.
    pub fn content_type_for(&self, extension: &str) -> Option<&str> {
        self.by_extension
            .get(&extension.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Extension registered for `content_type`, if any. Parameters such as
    /// `; charset=utf-8` are ignored.
    pub fn extension_for(&self, content_type: &str) -> Option<&str> {
        self.by_content_type
            .get(&essence(content_type))
            .map(String::as_str)
    }

    /// Content type for `extension`, or the table default.
    pub fn resolve(&self, extension: Option<&str>) -> &str {
        extension
            .and_then(|ext| self.content_type_for(ext))
            .unwrap_or(&self.default_content_type)
    }

    pub fn default_content_type(&self) -> &str {
        &self.default_content_type
    }
}

impl Default for ContentTypeTable {
    fn default() -> Self {
        Self::with_overrides(DEFAULT_CONTENT_TYPE, &BTreeMap::new())
    }
}

/// `type/subtype` of a content type, lower case and without parameters.
pub fn essence(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

/// Whether a content type carries parameters such as `charset`.
pub fn has_parameters(content_type: &str) -> bool {
    content_type
        .split_once(';')
        .is_some_and(|(_, params)| !params.trim().is_empty())
}

/// Extension of the last path segment, without the dot. Dotfiles such as
/// `.acl` count as having the extension `acl`.
pub fn extension(path: &str) -> Option<&str> {
    let name = path.rsplit('/').next().unwrap_or(path);
    match name.rfind('.') {
        Some(idx) if idx + 1 < name.len() => Some(&name[idx + 1..]),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_lookups() {
        let table = ContentTypeTable::default();
        assert_eq!(table.content_type_for("ttl"), Some("text/turtle"));
        assert_eq!(table.content_type_for("TXT"), Some("text/plain"));
        assert_eq!(table.extension_for("text/turtle"), Some("ttl"));
        assert_eq!(table.extension_for("image/jpeg"), Some("jpg"));
        assert_eq!(table.extension_for("text/plain; charset=utf-8"), Some("txt"));
        assert_eq!(table.extension_for("unknown/content-type"), None);
    }

    #[test]
    fn test_overrides_win() {
        let mut overrides = BTreeMap::new();
        overrides.insert("txt".to_string(), "text/x-custom".to_string());
        overrides.insert(".dat".to_string(), "application/x-data".to_string());
        let table = ContentTypeTable::with_overrides(DEFAULT_CONTENT_TYPE, &overrides);

        assert_eq!(table.content_type_for("txt"), Some("text/x-custom"));
        assert_eq!(table.extension_for("text/x-custom"), Some("txt"));
        assert_eq!(table.content_type_for("dat"), Some("application/x-data"));
        // txt no longer stores text/plain, so nothing does
        assert_eq!(table.extension_for("text/plain"), None);
    }

    #[test]
    fn test_override_keeps_other_extensions_of_a_type() {
        let mut overrides = BTreeMap::new();
        overrides.insert("ttl".to_string(), "text/x-custom".to_string());
        let table = ContentTypeTable::with_overrides(DEFAULT_CONTENT_TYPE, &overrides);

        assert_eq!(table.extension_for("text/turtle"), Some("acl"));
        assert_eq!(table.content_type_for("acl"), Some("text/turtle"));
        assert_eq!(table.extension_for("text/x-custom"), Some("ttl"));

        let mut table = ContentTypeTable::empty(DEFAULT_CONTENT_TYPE);
        table.register("txt", "text/plain");
        table.register("txt", "text/plain");
        assert_eq!(table.extension_for("text/plain"), Some("txt"));
    }

    #[test]
    fn test_essence_and_parameters() {
        assert_eq!(essence("Text/Plain; charset=utf-8"), "text/plain");
        assert_eq!(essence("text/turtle"), "text/turtle");
        assert!(has_parameters("text/plain; charset=utf-8"));
        assert!(!has_parameters("text/plain"));
        assert!(!has_parameters("text/plain;"));
    }

    #[test]
    fn test_reverse_last_registered_wins() {
        let mut table = ContentTypeTable::empty(DEFAULT_CONTENT_TYPE);
        table.register("htm", "text/html");
        table.register("html", "text/html");
        assert_eq!(table.extension_for("text/html"), Some("html"));
        assert_eq!(table.content_type_for("htm"), Some("text/html"));
    }

    #[test]
    fn test_resolve_falls_back_to_default() {
        let table = ContentTypeTable::default();
        assert_eq!(table.resolve(Some("png")), "image/png");
        assert_eq!(table.resolve(Some("nope")), DEFAULT_CONTENT_TYPE);
        assert_eq!(table.resolve(None), DEFAULT_CONTENT_TYPE);
    }

    #[test]
    fn test_extension() {
        assert_eq!(extension("data/a/test.txt"), Some("txt"));
        assert_eq!(extension("data/a.b/test"), None);
        assert_eq!(extension("data/test."), None);
        assert_eq!(extension("data/.acl"), Some("acl"));
        assert_eq!(extension("test.txt$.ttl"), Some("ttl"));
    }
}
