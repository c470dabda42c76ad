/// Errors returned by the mapper, blob store and accessor.
///
/// The variants follow the status classes the protocol layer answers with,
/// see [`StorageError::status_code`].
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The identifier or storage key does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The identifier is malformed.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// The identifier uses syntax reserved for generated storage keys.
    #[error("not implemented: {0}")]
    NotImplemented(String),

    /// The representation is not a byte stream.
    #[error("unsupported media type: {0}")]
    UnsupportedMediaType(String),

    /// A storage key or configuration violates an internal invariant.
    #[error("internal error: {0}")]
    Internal(String),

    /// A sidecar could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Any other failure reported by the object store.
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

impl StorageError {
    /// HTTP status code the protocol layer should answer with.
    pub fn status_code(&self) -> u16 {
        match self {
            StorageError::NotFound(_) => 404,
            StorageError::BadRequest(_) => 400,
            StorageError::NotImplemented(_) => 501,
            StorageError::UnsupportedMediaType(_) => 415,
            StorageError::Internal(_)
            | StorageError::Serialization(_)
            | StorageError::Backend(_) => 500,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound(_))
    }
}

/// Result alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors reported by an [`ObjectClient`](crate::client::ObjectClient).
///
/// Absence is kept apart from every other failure so callers can treat it as
/// an expected outcome.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("no such key: {0}")]
    NoSuchKey(String),

    #[error("no such bucket: {0}")]
    NoSuchBucket(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ClientError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ClientError::NoSuchKey(_) | ClientError::NoSuchBucket(_))
    }
}

impl From<ClientError> for StorageError {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::NoSuchKey(key) => StorageError::NotFound(key),
            ClientError::NoSuchBucket(bucket) => {
                StorageError::NotFound(format!("bucket {}", bucket))
            }
            ClientError::Other(e) => StorageError::Backend(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(StorageError::NotFound("x".into()).status_code(), 404);
        assert_eq!(StorageError::BadRequest("x".into()).status_code(), 400);
        assert_eq!(StorageError::NotImplemented("x".into()).status_code(), 501);
        assert_eq!(
            StorageError::UnsupportedMediaType("x".into()).status_code(),
            415
        );
        assert_eq!(StorageError::Internal("x".into()).status_code(), 500);
        assert_eq!(
            StorageError::Backend(anyhow::anyhow!("boom")).status_code(),
            500
        );
    }

    #[test]
    fn test_client_error_conversion() {
        let err: StorageError = ClientError::NoSuchKey("pod/a.txt".into()).into();
        assert!(err.is_not_found());

        let err: StorageError = ClientError::NoSuchBucket("pod".into()).into();
        assert!(err.is_not_found());

        let err: StorageError = ClientError::Other(anyhow::anyhow!("connection reset")).into();
        assert!(!err.is_not_found());
        assert_eq!(err.to_string(), "connection reset");
    }
}
