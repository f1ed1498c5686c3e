//! Locating and splitting the APK Signing Block.
//!
//! Layout, immediately before the central directory:
//!
//! ```text
//! OFFSET  TYPE     DESCRIPTION
//! @+0     uint64   size in bytes (excluding this field)
//! @+8     pairs    uint64 length, uint32 ID, value (length - 4 bytes)
//! @-24    uint64   size in bytes (same as the one above)
//! @-16    16 bytes magic "APK Sig Block 42"
//! ```

use tracing::{debug, warn};

use crate::cursor::ByteCursor;
use crate::error::{ApkError, Result};

pub const APK_SIGNING_BLOCK_MAGIC: &[u8; 16] = b"APK Sig Block 42";

/// Smallest block: both size fields, the magic and no pairs.
const APK_SIGNING_BLOCK_MIN_SIZE: u64 = 32;

/// Trailing size field plus magic.
const FOOTER_SIZE: u64 = 24;

pub const SIGNATURE_SCHEME_V2_BLOCK_ID: u32 = 0x7109_871A;
pub const SIGNATURE_SCHEME_V3_BLOCK_ID: u32 = 0xF053_68C0;
pub const SIGNATURE_SCHEME_V31_BLOCK_ID: u32 = 0x1B93_AD61;
pub const VERITY_PADDING_BLOCK_ID: u32 = 0x4272_6577;

/// What a signing block pair carries, as far as this crate knows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairId {
    SignatureSchemeV2,
    SignatureSchemeV3,
    SignatureSchemeV31,
    VerityPadding,
    Other(u32),
}

impl PairId {
    pub fn from_u32(id: u32) -> Self {
        match id {
            SIGNATURE_SCHEME_V2_BLOCK_ID => PairId::SignatureSchemeV2,
            SIGNATURE_SCHEME_V3_BLOCK_ID => PairId::SignatureSchemeV3,
            SIGNATURE_SCHEME_V31_BLOCK_ID => PairId::SignatureSchemeV31,
            VERITY_PADDING_BLOCK_ID => PairId::VerityPadding,
            other => PairId::Other(other),
        }
    }
}

/// One ID-value pair of the signing block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SigningBlockPair<'a> {
    pub id: u32,
    pub value: &'a [u8],
    /// Offset of the pair's length field in the archive.
    pub offset: u64,
}

impl SigningBlockPair<'_> {
    pub fn kind(&self) -> PairId {
        PairId::from_u32(self.id)
    }
}

/// A parsed APK Signing Block.
#[derive(Debug, Clone)]
pub struct SigningBlock<'a> {
    /// Offset of the leading size field.
    pub offset: u64,
    /// Declared size, excluding the leading size field.
    pub size: u64,
    pub pairs: Vec<SigningBlockPair<'a>>,
}

impl<'a> SigningBlock<'a> {
    /// The first pair with the given ID.
    pub fn find(&self, id: u32) -> Option<&SigningBlockPair<'a>> {
        self.pairs.iter().find(|pair| pair.id == id)
    }

    pub fn has(&self, id: u32) -> bool {
        self.find(id).is_some()
    }
}

/// Look for a signing block ending at `cd_offset`.
///
/// The block is accepted only when the magic is present and the size in the footer agrees with
/// the size in the header found where the footer says the block starts. Anything else means
/// there is no block: `Ok(None)`, never a guess.
///
/// # Errors
///
/// [`ApkError::MalformedSigningBlock`] when the block frames correctly but a pair inside it
/// overruns the space that is left.
pub fn locate_signing_block<'a>(
    cursor: &ByteCursor<'a>,
    cd_offset: u64,
) -> Result<Option<SigningBlock<'a>>> {
    if cd_offset < APK_SIGNING_BLOCK_MIN_SIZE || cd_offset > cursor.len() {
        debug!(cd_offset, "no room for an APK Signing Block");
        return Ok(None);
    }

    let footer = cd_offset - FOOTER_SIZE;
    if !cursor.matches_at(footer + 8, APK_SIGNING_BLOCK_MAGIC) {
        debug!("no APK Signing Block magic before the central directory");
        return Ok(None);
    }

    let size_in_footer = cursor.read_u64_le(footer)?;
    let block_start = match cd_offset
        .checked_sub(size_in_footer)
        .and_then(|start| start.checked_sub(8))
    {
        Some(start) if size_in_footer >= FOOTER_SIZE => start,
        _ => {
            warn!(
                size_in_footer,
                cd_offset, "APK Signing Block size out of range; ignoring block"
            );
            return Ok(None);
        }
    };

    let size_in_header = cursor.read_u64_le(block_start)?;
    if size_in_header != size_in_footer {
        warn!(
            size_in_header,
            size_in_footer, "APK Signing Block sizes in header and footer do not match; ignoring block"
        );
        return Ok(None);
    }

    let pairs_start = block_start + 8;
    let pairs = parse_pairs(cursor, pairs_start, footer)?;
    debug!(
        offset = block_start,
        size = size_in_footer,
        pairs = pairs.len(),
        "located APK Signing Block"
    );

    Ok(Some(SigningBlock {
        offset: block_start,
        size: size_in_footer,
        pairs,
    }))
}

/// Split `[start, end)` into ID-value pairs, requiring the region to be consumed exactly.
fn parse_pairs<'a>(
    cursor: &ByteCursor<'a>,
    start: u64,
    end: u64,
) -> Result<Vec<SigningBlockPair<'a>>> {
    let mut pairs = Vec::new();
    let mut position = start;

    while position < end {
        let number = pairs.len() + 1;
        let remaining = end - position;
        if remaining < 8 {
            return Err(ApkError::signing_block(format!(
                "insufficient data to read size of entry #{number} at offset {position} ({remaining} bytes left)"
            )));
        }

        let length = cursor.read_u64_le(position)?;
        if length < 4 {
            return Err(ApkError::signing_block(format!(
                "entry #{number} at offset {position} declares length {length}, too short for its ID"
            )));
        }
        if length > remaining - 8 {
            return Err(ApkError::signing_block(format!(
                "entry #{number} at offset {position} declares length {length} but only {} bytes remain",
                remaining - 8
            )));
        }

        let id = cursor.read_u32_le(position + 8)?;
        let value = cursor.read_slice(position + 12, length - 4)?;
        pairs.push(SigningBlockPair {
            id,
            value,
            offset: position,
        });
        position += 8 + length;
    }

    Ok(pairs)
}
