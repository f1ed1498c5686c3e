//! Error types shared by every parsing stage.
//!
//! Structural failures found while indexing an archive ([`ApkError::MalformedArchive`],
//! [`ApkError::MalformedSigningBlock`]) abort [`Apk::open`](crate::Apk::open). Everything
//! else is scoped to the single call that produced it.

use thiserror::Error;

/// A Result type alias over [`ApkError`].
pub type Result<V> = std::result::Result<V, ApkError>;

/// Every failure the parser can report.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum ApkError {
    #[error("read of {width} bytes at offset {offset} is out of bounds (buffer length {len})")]
    OutOfBounds { offset: u64, width: u64, len: u64 },

    #[error("malformed archive: {0}")]
    MalformedArchive(String),

    #[error("entry not found: '{0}'")]
    EntryNotFound(String),

    #[error("CRC-32 mismatch for '{name}' (declared: {declared:08x}, computed: {computed:08x})")]
    IntegrityMismatch {
        name: String,
        declared: u32,
        computed: u32,
        /// The decompressed bytes that failed the check.
        data: Vec<u8>,
    },

    #[error("decompressing '{name}' exceeded the output limit of {limit} bytes")]
    DecompressionBoundsExceeded { name: String, limit: u64 },

    #[error("compression method {method} of '{name}' is not supported")]
    UnsupportedCompression { name: String, method: u16 },

    #[error("malformed APK Signing Block: {0}")]
    MalformedSigningBlock(String),

    #[error("unsupported signature format in '{name}': {reason}")]
    UnsupportedSignatureFormat { name: String, reason: String },
}

impl ApkError {
    pub(crate) fn malformed(msg: impl Into<String>) -> Self {
        ApkError::MalformedArchive(msg.into())
    }

    pub(crate) fn signing_block(msg: impl Into<String>) -> Self {
        ApkError::MalformedSigningBlock(msg.into())
    }

    /// Whether a caller may keep using the bytes attached to this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, ApkError::IntegrityMismatch { .. })
    }

    /// Hands back the unverified member bytes of an [`ApkError::IntegrityMismatch`].
    ///
    /// Hostile or corrupted archives routinely carry wrong checksums, so a caller may decide to
    /// accept the data anyway. Any other variant is returned unchanged.
    pub fn into_unverified_bytes(self) -> std::result::Result<Vec<u8>, ApkError> {
        match self {
            ApkError::IntegrityMismatch { data, .. } => Ok(data),
            other => Err(other),
        }
    }
}
