//! Descriptive metadata records and their sidecar serialization.
//!
//! A record is a multimap from predicate IRIs to terms. Only the part that
//! the storage layer cannot derive by itself is written to the sidecar.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{StorageError, StorageResult};

/// Predicates and classes used in descriptive metadata.
pub mod vocab {
    pub const RDF_TYPE: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#type";

    pub const LDP_RESOURCE: &str = "http://www.w3.org/ns/ldp#Resource";
    pub const LDP_CONTAINER: &str = "http://www.w3.org/ns/ldp#Container";
    pub const LDP_BASIC_CONTAINER: &str = "http://www.w3.org/ns/ldp#BasicContainer";
    pub const LDP_CONTAINS: &str = "http://www.w3.org/ns/ldp#contains";

    pub const DC_MODIFIED: &str = "http://purl.org/dc/terms/modified";
    pub const POSIX_SIZE: &str = "http://www.w3.org/ns/posix/stat#size";
    pub const POSIX_MTIME: &str = "http://www.w3.org/ns/posix/stat#mtime";

    pub const CONTENT_TYPE: &str = "http://www.w3.org/ns/ma-ont#format";

    /// Prefix of the per media type classes, e.g. `.../text/turtle#Resource`.
    pub const IANA_MEDIA_TYPES: &str = "http://www.w3.org/ns/iana/media-types/";

    pub const XSD_DATE_TIME: &str = "http://www.w3.org/2001/XMLSchema#dateTime";
    pub const XSD_INTEGER: &str = "http://www.w3.org/2001/XMLSchema#integer";
}

/// Object of an attribute.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Term {
    Iri {
        value: String,
    },
    Literal {
        value: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        datatype: Option<String>,
    },
}

impl Term {
    pub fn iri(value: impl Into<String>) -> Self {
        Term::Iri {
            value: value.into(),
        }
    }

    pub fn literal(value: impl Into<String>) -> Self {
        Term::Literal {
            value: value.into(),
            datatype: None,
        }
    }

    pub fn typed(value: impl Into<String>, datatype: &str) -> Self {
        Term::Literal {
            value: value.into(),
            datatype: Some(datatype.to_string()),
        }
    }

    pub fn value(&self) -> &str {
        match self {
            Term::Iri { value } | Term::Literal { value, .. } => value,
        }
    }
}

/// Metadata describing a single resource.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RepresentationMetadata {
    identifier: String,
    attributes: BTreeMap<String, Vec<Term>>,
}

impl RepresentationMetadata {
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            attributes: BTreeMap::new(),
        }
    }

    /// Record for a document of the given content type.
    pub fn with_content_type(identifier: impl Into<String>, content_type: &str) -> Self {
        let mut metadata = Self::new(identifier);
        metadata.set_content_type(Some(content_type));
        metadata
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    /// Number of (predicate, term) pairs.
    pub fn len(&self) -> usize {
        self.attributes.values().map(Vec::len).sum()
    }

    /// Adds a term; duplicates are ignored.
    pub fn add(&mut self, predicate: &str, term: Term) {
        let terms = self.attributes.entry(predicate.to_string()).or_default();
        if !terms.contains(&term) {
            terms.push(term);
        }
    }

    /// Replaces all terms of `predicate` with `term`.
    pub fn set(&mut self, predicate: &str, term: Term) {
        self.attributes.insert(predicate.to_string(), vec![term]);
    }

    pub fn get(&self, predicate: &str) -> &[Term] {
        self.attributes
            .get(predicate)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn first(&self, predicate: &str) -> Option<&Term> {
        self.get(predicate).first()
    }

    pub fn has(&self, predicate: &str, term: &Term) -> bool {
        self.get(predicate).contains(term)
    }

    /// Removes one term. Returns whether it was present.
    pub fn remove(&mut self, predicate: &str, term: &Term) -> bool {
        let Some(terms) = self.attributes.get_mut(predicate) else {
            return false;
        };
        let before = terms.len();
        terms.retain(|t| t != term);
        let removed = terms.len() != before;
        if terms.is_empty() {
            self.attributes.remove(predicate);
        }
        removed
    }

    pub fn remove_all(&mut self, predicate: &str) {
        self.attributes.remove(predicate);
    }

    /// Removes every term for which `f` returns `false`.
    pub fn retain(&mut self, predicate: &str, f: impl Fn(&Term) -> bool) {
        if let Some(terms) = self.attributes.get_mut(predicate) {
            terms.retain(|t| f(t));
            if terms.is_empty() {
                self.attributes.remove(predicate);
            }
        }
    }

    /// Copies all attributes of `other` into this record.
    pub fn merge(&mut self, other: RepresentationMetadata) {
        for (predicate, terms) in other.attributes {
            for term in terms {
                self.add(&predicate, term);
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Term)> {
        self.attributes
            .iter()
            .flat_map(|(p, terms)| terms.iter().map(move |t| (p.as_str(), t)))
    }

    pub fn content_type(&self) -> Option<&str> {
        self.first(vocab::CONTENT_TYPE).map(Term::value)
    }

    pub fn set_content_type(&mut self, content_type: Option<&str>) {
        match content_type {
            Some(content_type) => self.set(vocab::CONTENT_TYPE, Term::literal(content_type)),
            None => self.remove_all(vocab::CONTENT_TYPE),
        }
    }

    pub fn size(&self) -> Option<u64> {
        self.first(vocab::POSIX_SIZE)
            .and_then(|t| t.value().parse().ok())
    }

    pub fn modified(&self) -> Option<DateTime<Utc>> {
        self.first(vocab::DC_MODIFIED)
            .and_then(|t| DateTime::parse_from_rfc3339(t.value()).ok())
            .map(|ts| ts.with_timezone(&Utc))
    }

    pub fn is_container(&self) -> bool {
        self.has(vocab::RDF_TYPE, &Term::iri(vocab::LDP_CONTAINER))
    }
}

/// Serialization format of a sidecar object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SidecarFormat {
    Json,
    Toml,
}

#[derive(Serialize, Deserialize)]
struct SidecarDocument {
    #[serde(default)]
    attributes: BTreeMap<String, Vec<Term>>,
}

impl SidecarFormat {
    /// Picks the format from the extension of a sidecar key or suffix.
    /// `.toml` selects TOML, everything else (`.meta`, `.json`) JSON.
    pub fn for_key(key: &str) -> Self {
        match crate::content_types::extension(key) {
            Some(ext) if ext.eq_ignore_ascii_case("toml") => SidecarFormat::Toml,
            _ => SidecarFormat::Json,
        }
    }

    pub fn encode(&self, metadata: &RepresentationMetadata) -> StorageResult<Vec<u8>> {
        let doc = SidecarDocument {
            attributes: metadata.attributes.clone(),
        };
        match self {
            SidecarFormat::Json => serde_json::to_vec_pretty(&doc)
                .map_err(|e| StorageError::Serialization(e.to_string())),
            SidecarFormat::Toml => toml::to_string(&doc)
                .map(String::into_bytes)
                .map_err(|e| StorageError::Serialization(e.to_string())),
        }
    }

    /// Decodes a sidecar into a record for `identifier`.
    pub fn decode(&self, identifier: &str, data: &[u8]) -> StorageResult<RepresentationMetadata> {
        let mut metadata = RepresentationMetadata::new(identifier);
        // an empty sidecar is a bare container marker
        if data.iter().all(u8::is_ascii_whitespace) {
            return Ok(metadata);
        }
        let doc: SidecarDocument = match self {
            SidecarFormat::Json => serde_json::from_slice(data)
                .map_err(|e| StorageError::Serialization(e.to_string()))?,
            SidecarFormat::Toml => {
                let text = std::str::from_utf8(data)
                    .map_err(|e| StorageError::Serialization(e.to_string()))?;
                toml::from_str(text).map_err(|e| StorageError::Serialization(e.to_string()))?
            }
        };
        metadata.attributes = doc.attributes;
        Ok(metadata)
    }
}
