//! Request payload seam.
//!
//! The HTTP layer wraps the request body before it reaches the core. For
//! streaming-signed uploads the wrapper authenticates the payload; the
//! signature only becomes checkable once the body has been fully consumed,
//! so the core calls [`PayloadVerifier::verify`] after streaming finishes
//! and before any metadata commit.

use std::io::Cursor;
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::AsyncRead;

use crate::error::GatewayError;
use crate::types::Credential;

/// Deferred payload authentication handle.
///
/// `verify` is only valid after the associated reader has reached EOF.
pub trait PayloadVerifier: Send + Sync {
    /// Authenticate the consumed payload and return the caller it proves.
    fn verify(&self) -> Result<Credential, GatewayError>;
}

/// A request body: the byte stream plus an optional deferred verifier.
pub struct StreamPayload {
    /// The body stream.
    pub reader: Box<dyn AsyncRead + Send + Unpin>,
    /// Present for streaming-signed uploads.
    pub verifier: Option<Arc<dyn PayloadVerifier>>,
}

impl StreamPayload {
    /// Payload from an arbitrary reader, without deferred verification.
    #[must_use]
    pub fn from_reader(reader: Box<dyn AsyncRead + Send + Unpin>) -> Self {
        Self {
            reader,
            verifier: None,
        }
    }

    /// Payload from an in-memory body.
    #[must_use]
    pub fn from_bytes(data: Bytes) -> Self {
        Self::from_reader(Box::new(Cursor::new(data)))
    }

    /// Attach a deferred verifier.
    #[must_use]
    pub fn with_verifier(mut self, verifier: Arc<dyn PayloadVerifier>) -> Self {
        self.verifier = Some(verifier);
        self
    }
}

impl std::fmt::Debug for StreamPayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamPayload")
            .field("verifier", &self.verifier.is_some())
            .finish()
    }
}
