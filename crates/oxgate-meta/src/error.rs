//! Metadata layer error types.

/// Errors surfaced by the metadata adapter and cache.
#[derive(Debug, thiserror::Error)]
pub enum MetaError {
    /// The specified bucket does not exist.
    #[error("no such bucket: {bucket}")]
    NoSuchBucket {
        /// The bucket name that was not found.
        bucket: String,
    },

    /// The specified key does not exist.
    #[error("no such key: {key}")]
    NoSuchKey {
        /// The key that was not found.
        key: String,
    },

    /// The specified object version does not exist.
    #[error("no such version: key={key}, version={version}")]
    NoSuchVersion {
        /// The key the version was requested for.
        key: String,
        /// The version id that was not found.
        version: String,
    },

    /// The specified multipart upload does not exist.
    #[error("no such upload: {upload_id}")]
    NoSuchUpload {
        /// The upload id that was not found.
        upload_id: String,
    },

    /// A version or upload id could not be decoded back into a timestamp.
    #[error("invalid version id: {value}")]
    InvalidVersionId {
        /// The offending id.
        value: String,
    },

    /// A row decoded from the store is missing cells or carries malformed
    /// values.
    #[error("corrupt row in table {table}: {reason}")]
    CorruptRow {
        /// The table the row was read from.
        table: &'static str,
        /// What was wrong with it.
        reason: String,
    },

    /// A compare-and-set mutation lost the race on every retry.
    #[error("compare-and-set exhausted retries for row {row}")]
    CasExhausted {
        /// The contended row key (printable form).
        row: String,
    },

    /// The store did not answer within the configured deadline.
    #[error("metadata store call timed out")]
    Timeout,

    /// The underlying store failed.
    #[error("metadata store error: {0}")]
    Store(String),

    /// Cached bytes failed to (de)serialize.
    #[error("cache codec error: {0}")]
    CacheCodec(#[from] serde_json::Error),
}
