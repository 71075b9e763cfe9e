//! Gateway error taxonomy.
//!
//! Every component method returns [`GatewayError`]; only the HTTP layer
//! turns variants into wire responses. [`GatewayError::code`] is the
//! S3-level error code and [`GatewayError::status`] the matching HTTP
//! status, so that mapping stays mechanical.

use oxgate_blob::BlobError;
use oxgate_meta::MetaError;

/// Convenience result type for gateway operations.
pub type GatewayResult<T> = Result<T, GatewayError>;

/// All errors the gateway core can surface.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    // -----------------------------------------------------------------------
    // Authentication
    // -----------------------------------------------------------------------
    /// The request signature does not match the payload.
    #[error("the request signature we calculated does not match the signature you provided")]
    SignatureDoesNotMatch,

    /// The access key id does not exist.
    #[error("the access key id you provided does not exist in our records")]
    InvalidAccessKeyId,

    /// Access denied.
    #[error("access denied")]
    AccessDenied,

    /// The request time is too far from server time.
    #[error("the difference between the request time and the server time is too large")]
    RequestTimeTooSkewed,

    /// The presigned request has expired.
    #[error("the presigned request has expired")]
    ExpiredPresignRequest,

    // -----------------------------------------------------------------------
    // Client request
    // -----------------------------------------------------------------------
    /// The Content-MD5 did not match the received body.
    #[error("the Content-MD5 you specified did not match what we received")]
    BadDigest,

    /// The body ended before the declared content length.
    #[error("you did not provide the number of bytes specified by the Content-Length header")]
    IncompleteBody,

    /// The body exceeds the allowed size.
    #[error("your proposed upload exceeds the maximum allowed object size")]
    EntityTooLarge,

    /// A referenced part does not exist or its entity tag does not match.
    #[error("one or more of the specified parts could not be found")]
    InvalidPart,

    /// The part list was not in ascending order.
    #[error("the list of parts was not in ascending order")]
    InvalidPartOrder,

    /// An argument provided is invalid.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// What was wrong.
        message: String,
    },

    /// The request XML is malformed.
    #[error("the XML you provided was not well-formed")]
    MalformedXml,

    /// The POST policy form is malformed.
    #[error("the body of your POST request is not well-formed multipart/form-data")]
    MalformedPostRequest,

    /// Content-Length is required.
    #[error("you must provide the Content-Length HTTP header")]
    MissingContentLength,

    /// Content-MD5 is required for this request.
    #[error("you must provide the Content-MD5 HTTP header")]
    MissingContentMd5,

    /// The requested functionality is not implemented.
    #[error("a header you provided implies functionality that is not implemented")]
    NotImplemented,

    // -----------------------------------------------------------------------
    // Not found
    // -----------------------------------------------------------------------
    /// The specified bucket does not exist.
    #[error("the specified bucket does not exist: {bucket}")]
    NoSuchBucket {
        /// The bucket that was not found.
        bucket: String,
    },

    /// The specified key does not exist.
    #[error("the specified key does not exist: {key}")]
    NoSuchKey {
        /// The key that was not found.
        key: String,
    },

    /// The specified version does not exist.
    #[error("the specified version does not exist: {version_id}")]
    NoSuchVersion {
        /// The version that was not found.
        version_id: String,
    },

    /// The specified multipart upload does not exist.
    #[error("the specified multipart upload does not exist: {upload_id}")]
    NoSuchUpload {
        /// The upload id that was not found.
        upload_id: String,
    },

    // -----------------------------------------------------------------------
    // State
    // -----------------------------------------------------------------------
    /// The bucket name is taken by another account.
    #[error("the requested bucket name is not available: {bucket}")]
    BucketAlreadyExists {
        /// The taken bucket name.
        bucket: String,
    },

    /// The bucket exists and the caller already owns it.
    #[error("your previous request to create the named bucket succeeded: {bucket}")]
    BucketAlreadyOwnedByYou {
        /// The owned bucket name.
        bucket: String,
    },

    /// The bucket still holds objects or uploads.
    #[error("the bucket you tried to delete is not empty: {bucket}")]
    BucketNotEmpty {
        /// The non-empty bucket name.
        bucket: String,
    },

    /// The caller may not write to this bucket.
    #[error("bucket access forbidden: {bucket}")]
    BucketAccessForbidden {
        /// The protected bucket name.
        bucket: String,
    },

    /// A non-final part is below the minimum size.
    #[error("part {part_number} is too small at {size} bytes, minimum is {min} bytes")]
    PartTooSmall {
        /// The offending part number.
        part_number: u32,
        /// Its size in bytes.
        size: i64,
        /// The enforced minimum.
        min: i64,
    },

    // -----------------------------------------------------------------------
    // Server
    // -----------------------------------------------------------------------
    /// A metadata or backend failure not attributable to the client.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl GatewayError {
    /// The S3 error code string of this variant.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::SignatureDoesNotMatch => "SignatureDoesNotMatch",
            Self::InvalidAccessKeyId => "InvalidAccessKeyId",
            Self::AccessDenied => "AccessDenied",
            Self::RequestTimeTooSkewed => "RequestTimeTooSkewed",
            Self::ExpiredPresignRequest => "ExpiredPresignRequest",
            Self::BadDigest => "BadDigest",
            Self::IncompleteBody => "IncompleteBody",
            Self::EntityTooLarge => "EntityTooLarge",
            Self::InvalidPart => "InvalidPart",
            Self::InvalidPartOrder => "InvalidPartOrder",
            Self::InvalidArgument { .. } => "InvalidArgument",
            Self::MalformedXml => "MalformedXML",
            Self::MalformedPostRequest => "MalformedPOSTRequest",
            Self::MissingContentLength => "MissingContentLength",
            Self::MissingContentMd5 => "MissingContentMD5",
            Self::NotImplemented => "NotImplemented",
            Self::NoSuchBucket { .. } => "NoSuchBucket",
            Self::NoSuchKey { .. } => "NoSuchKey",
            Self::NoSuchVersion { .. } => "NoSuchVersion",
            Self::NoSuchUpload { .. } => "NoSuchUpload",
            Self::BucketAlreadyExists { .. } => "BucketAlreadyExists",
            Self::BucketAlreadyOwnedByYou { .. } => "BucketAlreadyOwnedByYou",
            Self::BucketNotEmpty { .. } => "BucketNotEmpty",
            Self::BucketAccessForbidden { .. } => "BucketAccessForbidden",
            Self::PartTooSmall { .. } => "EntityTooSmall",
            Self::Internal(_) => "InternalError",
        }
    }

    /// The HTTP status the code maps to.
    #[must_use]
    pub fn status(&self) -> u16 {
        match self {
            Self::SignatureDoesNotMatch
            | Self::InvalidAccessKeyId
            | Self::AccessDenied
            | Self::RequestTimeTooSkewed
            | Self::ExpiredPresignRequest
            | Self::BucketAccessForbidden { .. } => 403,
            Self::NoSuchBucket { .. }
            | Self::NoSuchKey { .. }
            | Self::NoSuchVersion { .. }
            | Self::NoSuchUpload { .. } => 404,
            Self::BucketAlreadyExists { .. }
            | Self::BucketAlreadyOwnedByYou { .. }
            | Self::BucketNotEmpty { .. } => 409,
            Self::MissingContentLength => 411,
            Self::NotImplemented => 501,
            Self::Internal(_) => 500,
            _ => 400,
        }
    }
}

impl From<MetaError> for GatewayError {
    fn from(err: MetaError) -> Self {
        match err {
            MetaError::NoSuchBucket { bucket } => Self::NoSuchBucket { bucket },
            MetaError::NoSuchKey { key } => Self::NoSuchKey { key },
            MetaError::NoSuchVersion { version, .. } => Self::NoSuchVersion {
                version_id: version,
            },
            MetaError::NoSuchUpload { upload_id } => Self::NoSuchUpload { upload_id },
            MetaError::InvalidVersionId { value } => Self::NoSuchVersion { version_id: value },
            other => Self::Internal(anyhow::anyhow!(other)),
        }
    }
}

impl From<BlobError> for GatewayError {
    fn from(err: BlobError) -> Self {
        match err {
            BlobError::NotFound { pool, blob_id } => {
                Self::Internal(anyhow::anyhow!("blob missing from backend: {pool}/{blob_id}"))
            }
            other => Self::Internal(anyhow::anyhow!(other)),
        }
    }
}
