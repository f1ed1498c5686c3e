use std::borrow::Cow;
use std::io::Read;

use flate2::read::DeflateDecoder;
use tracing::{debug, warn};

use crate::cursor::ByteCursor;
use crate::error::{ApkError, Result};

use super::structures::{
    CentralDirectoryEntry, CompressionMethod, FLAG_DATA_DESCRIPTOR, LocalFileHeader,
    ZIP64_MARKER_U32,
};

/// Upper bound on the buffer reserved up front for an inflated member.
const MAX_PREALLOCATION: u64 = 16 * 1024 * 1024;

/// Limits and checks applied when extracting members.
#[derive(Debug, Clone)]
pub struct ExtractOptions {
    /// Compare the CRC-32 of the extracted bytes with the central directory.
    pub verify_crc: bool,
    /// Bytes an inflated member may produce beyond its declared uncompressed size.
    pub inflate_slack: u64,
    /// Absolute ceiling on the uncompressed size of any single member.
    pub max_entry_size: Option<u64>,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            verify_crc: true,
            inflate_slack: 0,
            max_entry_size: Some(512 * 1024 * 1024),
        }
    }
}

impl ExtractOptions {
    pub fn with_verify_crc(mut self, verify_crc: bool) -> Self {
        self.verify_crc = verify_crc;
        self
    }

    pub fn with_inflate_slack(mut self, slack: u64) -> Self {
        self.inflate_slack = slack;
        self
    }

    pub fn with_max_entry_size(mut self, max: Option<u64>) -> Self {
        self.max_entry_size = max;
        self
    }
}

/// ZIP member extractor over an in-memory archive.
pub struct ZipExtractor<'a> {
    cursor: ByteCursor<'a>,
    options: ExtractOptions,
}

impl<'a> ZipExtractor<'a> {
    pub fn new(data: &'a [u8], options: ExtractOptions) -> Self {
        Self {
            cursor: ByteCursor::new(data),
            options,
        }
    }

    pub fn options(&self) -> &ExtractOptions {
        &self.options
    }

    /// Get the offset of the member data for an entry.
    ///
    /// Reads the Local File Header and checks it against the central directory record: the file
    /// name must match, and unless a data descriptor follows the data, so must CRC-32 and sizes.
    pub fn data_offset(&self, entry: &CentralDirectoryEntry<'a>) -> Result<u64> {
        let name = entry.name_lossy();
        let header = LocalFileHeader::parse(&self.cursor, entry.local_header_offset).map_err(
            |err| match err {
                ApkError::OutOfBounds { .. } => ApkError::malformed(format!(
                    "local file header of '{name}' at offset {} runs past the end of the archive",
                    entry.local_header_offset
                )),
                other => other,
            },
        )?;

        if header.file_name != entry.file_name {
            return Err(ApkError::malformed(format!(
                "local file header at offset {} names '{}' but the central directory names '{name}'",
                entry.local_header_offset,
                String::from_utf8_lossy(header.file_name)
            )));
        }

        if header.flags & FLAG_DATA_DESCRIPTOR == 0 {
            check_field(&name, "CRC-32", header.crc32, entry.crc32 as u64, false)?;
            check_field(
                &name,
                "compressed size",
                header.compressed_size,
                entry.compressed_size,
                true,
            )?;
            check_field(
                &name,
                "uncompressed size",
                header.uncompressed_size,
                entry.uncompressed_size,
                true,
            )?;
        }

        if header.compression_method != entry.compression_method.as_u16() {
            warn!(
                %name,
                local = header.compression_method,
                central = entry.compression_method.as_u16(),
                "local header compression method differs; using the central directory"
            );
        }

        // Data starts after: LFH (30 bytes) + filename + extra field
        entry
            .local_header_offset
            .checked_add(header.size())
            .ok_or_else(|| ApkError::malformed(format!("data offset of '{name}' overflows")))
    }

    /// The member's bytes exactly as stored in the archive, still compressed.
    pub fn raw_data(&self, entry: &CentralDirectoryEntry<'a>) -> Result<&'a [u8]> {
        let offset = self.data_offset(entry)?;
        self.cursor
            .read_slice(offset, entry.compressed_size)
            .map_err(|_| {
                ApkError::malformed(format!(
                    "data of '{}' ({} bytes at offset {offset}) runs past the end of the archive",
                    entry.name_lossy(),
                    entry.compressed_size
                ))
            })
    }

    /// Extract a member to memory.
    ///
    /// Stored members are borrowed straight from the archive; deflated members are inflated
    /// into a fresh buffer whose size is capped by the declared uncompressed size.
    ///
    /// # Errors
    ///
    /// - [`ApkError::DecompressionBoundsExceeded`] if inflating produces more than allowed.
    /// - [`ApkError::IntegrityMismatch`] if the CRC-32 differs; the bytes ride along in the
    ///   error so the caller can still use them.
    /// - [`ApkError::UnsupportedCompression`] for anything but Stored and Deflated.
    pub fn extract(&self, entry: &CentralDirectoryEntry<'a>) -> Result<Cow<'a, [u8]>> {
        let name = entry.name_lossy();

        if let Some(max) = self.options.max_entry_size {
            if entry.uncompressed_size > max {
                return Err(ApkError::DecompressionBoundsExceeded { name, limit: max });
            }
        }

        let raw = self.raw_data(entry)?;
        let data = match entry.compression_method {
            CompressionMethod::Stored => {
                if entry.compressed_size != entry.uncompressed_size {
                    return Err(ApkError::malformed(format!(
                        "stored entry '{name}' declares {} compressed but {} uncompressed bytes",
                        entry.compressed_size, entry.uncompressed_size
                    )));
                }
                Cow::Borrowed(raw)
            }
            CompressionMethod::Deflated => Cow::Owned(self.inflate(&name, raw, entry)?),
            CompressionMethod::Other(method) => {
                return Err(ApkError::UnsupportedCompression { name, method });
            }
        };

        if self.options.verify_crc {
            let computed = crc32fast::hash(&data);
            if computed != entry.crc32 {
                return Err(ApkError::IntegrityMismatch {
                    name,
                    declared: entry.crc32,
                    computed,
                    data: data.into_owned(),
                });
            }
        }

        debug!(%name, len = data.len(), "extracted entry");
        Ok(data)
    }

    fn inflate(
        &self,
        name: &str,
        raw: &[u8],
        entry: &CentralDirectoryEntry<'a>,
    ) -> Result<Vec<u8>> {
        let mut limit = entry
            .uncompressed_size
            .saturating_add(self.options.inflate_slack);
        if let Some(max) = self.options.max_entry_size {
            limit = limit.min(max);
        }

        let mut out = Vec::with_capacity(entry.uncompressed_size.min(MAX_PREALLOCATION) as usize);
        // One byte past the limit is enough to tell that the stream overflows it.
        DeflateDecoder::new(raw)
            .take(limit.saturating_add(1))
            .read_to_end(&mut out)
            .map_err(|err| {
                ApkError::malformed(format!("corrupt deflate stream in '{name}': {err}"))
            })?;

        let inflated = out.len() as u64;
        if inflated > limit {
            return Err(ApkError::DecompressionBoundsExceeded {
                name: name.to_string(),
                limit,
            });
        }
        if inflated < entry.uncompressed_size {
            return Err(ApkError::malformed(format!(
                "'{name}' inflated to {inflated} bytes but declares {}",
                entry.uncompressed_size
            )));
        }
        if inflated > entry.uncompressed_size {
            warn!(
                %name,
                inflated,
                declared = entry.uncompressed_size,
                "inflated size exceeds the declared size within the allowed slack"
            );
        }

        Ok(out)
    }
}

/// Compare a local header field with its central directory counterpart.
fn check_field(name: &str, what: &str, local: u32, central: u64, zip64: bool) -> Result<()> {
    if zip64 && local == ZIP64_MARKER_U32 {
        return Ok(());
    }
    if local as u64 != central {
        return Err(ApkError::malformed(format!(
            "local header of '{name}' declares {what} {local} but the central directory declares {central}"
        )));
    }
    Ok(())
}

/// Find the entry for `path`, by exact byte comparison.
///
/// When several entries share a name the one latest in the central directory wins, the same
/// precedence standard ZIP readers apply.
pub fn find_by_path<'e, 'a>(
    entries: &'e [CentralDirectoryEntry<'a>],
    path: &[u8],
) -> Option<&'e CentralDirectoryEntry<'a>> {
    entries.iter().rev().find(|entry| entry.file_name == path)
}
