//! Server-side encryption.
//!
//! Object bytes go through AES-256-CTR with a fresh 16-byte IV per object
//! (and per part). For gateway-managed mode the per-object key is sealed
//! with AES-256-GCM under the 32-byte master key, using the first 12 IV
//! bytes as the nonce, and stored next to the object. For customer-key
//! mode only the IV is stored; the key never touches persistent state.
//!
//! Encrypted range reads must come off a block-aligned reader; the cipher
//! is seeked to the aligned start and the alignment slack is trimmed from
//! the decrypted stream.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use ctr::cipher::{KeyIvInit, StreamCipherSeek};
use rand::rngs::OsRng;
use rand::RngCore;
use tokio::io::AsyncRead;

use crate::stream::{Aes256Ctr, CipherReader, SkipReader};
use oxgate_blob::{align_down, AES_BLOCK_SIZE};
use oxgate_meta::SseType;

use crate::error::GatewayError;
use crate::types::SseRequest;

/// Object data keys are 32 bytes (AES-256).
pub const ENCRYPTION_KEY_LENGTH: usize = 32;

/// IVs are 16 bytes for the CTR data path; the GCM envelope uses the first
/// 12 of them.
pub const INITIALIZATION_VECTOR_LENGTH: usize = 16;

const GCM_NONCE_LENGTH: usize = 12;

/// Errors of the encryption layer.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    /// A key or IV had the wrong length.
    #[error("invalid key or IV length")]
    InvalidKeyLength,

    /// Sealing the per-object key failed.
    #[error("cannot seal object key")]
    SealFailure,

    /// Opening a sealed key failed; wrong master key or corrupt cells.
    #[error("cannot open sealed object key")]
    OpenFailure,
}

impl From<CryptoError> for GatewayError {
    fn from(err: CryptoError) -> Self {
        match err {
            // A bad customer key surfaces as an authorization problem, not
            // a server fault.
            CryptoError::OpenFailure => GatewayError::AccessDenied,
            other => GatewayError::Internal(anyhow::anyhow!(other)),
        }
    }
}

/// Generate a fresh 32-byte object key.
#[must_use]
pub fn generate_object_key() -> Vec<u8> {
    let mut key = vec![0u8; ENCRYPTION_KEY_LENGTH];
    OsRng.fill_bytes(&mut key);
    key
}

/// Generate a fresh 16-byte IV.
#[must_use]
pub fn generate_iv() -> Vec<u8> {
    let mut iv = vec![0u8; INITIALIZATION_VECTOR_LENGTH];
    OsRng.fill_bytes(&mut iv);
    iv
}

/// Resolve the data key a write should encrypt with: a fresh key for
/// gateway-managed mode, the caller's key for customer mode, nothing
/// otherwise.
pub fn encryption_key_from_sse_request(
    sse: &SseRequest,
) -> Result<Option<Vec<u8>>, GatewayError> {
    match sse.sse_type {
        SseType::None => Ok(None),
        SseType::S3 => Ok(Some(generate_object_key())),
        SseType::Customer => {
            if sse.customer_key.len() != ENCRYPTION_KEY_LENGTH {
                return Err(GatewayError::InvalidArgument {
                    message: "customer encryption key must be 32 bytes".to_owned(),
                });
            }
            Ok(Some(sse.customer_key.clone()))
        }
    }
}

/// Seal a per-object key under the master key. The ciphertext carries the
/// GCM tag and is what gets stored in the object row.
pub fn seal_object_key(
    master_key: &[u8; 32],
    iv: &[u8],
    plain_key: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    if iv.len() < GCM_NONCE_LENGTH {
        return Err(CryptoError::InvalidKeyLength);
    }
    let cipher = Aes256Gcm::new_from_slice(master_key).map_err(|_| CryptoError::InvalidKeyLength)?;
    cipher
        .encrypt(Nonce::from_slice(&iv[..GCM_NONCE_LENGTH]), plain_key)
        .map_err(|_| CryptoError::SealFailure)
}

/// Open a sealed per-object key.
pub fn open_object_key(
    master_key: &[u8; 32],
    iv: &[u8],
    sealed_key: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    if iv.len() < GCM_NONCE_LENGTH {
        return Err(CryptoError::InvalidKeyLength);
    }
    let cipher = Aes256Gcm::new_from_slice(master_key).map_err(|_| CryptoError::InvalidKeyLength)?;
    cipher
        .decrypt(Nonce::from_slice(&iv[..GCM_NONCE_LENGTH]), sealed_key)
        .map_err(|_| CryptoError::OpenFailure)
}

/// Wrap a write-path reader with encryption. An empty key passes the
/// stream through untouched.
pub fn wrap_encryption_reader(
    reader: Box<dyn AsyncRead + Send + Unpin>,
    key: &[u8],
    iv: &[u8],
) -> Result<Box<dyn AsyncRead + Send + Unpin>, CryptoError> {
    if key.is_empty() {
        return Ok(reader);
    }
    let cipher = Aes256Ctr::new_from_slices(key, iv).map_err(|_| CryptoError::InvalidKeyLength)?;
    Ok(Box::new(CipherReader::new(reader, cipher)))
}

/// Wrap a block-aligned read-path reader with decryption for a range
/// starting at `offset`. The cipher is positioned at the aligned start and
/// the slack up to `offset` is trimmed from the decrypted stream.
pub fn wrap_aligned_decryption_reader(
    reader: Box<dyn AsyncRead + Send + Unpin>,
    offset: u64,
    key: &[u8],
    iv: &[u8],
) -> Result<Box<dyn AsyncRead + Send + Unpin>, CryptoError> {
    let mut cipher =
        Aes256Ctr::new_from_slices(key, iv).map_err(|_| CryptoError::InvalidKeyLength)?;
    let aligned = align_down(offset, AES_BLOCK_SIZE);
    cipher.seek(aligned);
    let decrypted = CipherReader::new(reader, cipher);
    Ok(Box::new(SkipReader::new(decrypted, (offset - aligned) as usize)))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
