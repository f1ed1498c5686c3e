//! Low-level ZIP archive parser.
//!
//! This module handles the binary parsing of ZIP file structures from an
//! in-memory archive, always through a [`ByteCursor`].
//!
//! ## Parsing Strategy
//!
//! ZIP files are designed to be read from the end:
//! 1. Find the End of Central Directory (EOCD) at the file's end
//! 2. If ZIP64, read the ZIP64 EOCD for large file support
//! 3. Read the Central Directory to get metadata for all files
//!
//! Reading member data (Local File Headers onwards) is the extractor's job.

use std::collections::HashSet;

use tracing::{debug, warn};

use crate::cursor::ByteCursor;
use crate::error::{ApkError, Result};

use super::structures::*;

/// Maximum ZIP comment size allowed by the format (65535 bytes).
///
/// This bounds the backward search for the EOCD signature.
const MAX_COMMENT_SIZE: u64 = 65535;

/// Low-level ZIP file parser over an in-memory archive.
///
/// ## Example
///
/// ```ignore
/// let parser = ZipParser::new(&bytes);
/// let eocd = parser.find_eocd()?;
/// let entries = parser.list_entries(&eocd)?;
/// ```
pub struct ZipParser<'a> {
    cursor: ByteCursor<'a>,
}

impl<'a> ZipParser<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            cursor: ByteCursor::new(data),
        }
    }

    pub fn cursor(&self) -> &ByteCursor<'a> {
        &self.cursor
    }

    /// Find and parse the End of Central Directory record.
    ///
    /// Scans backwards from `len - 22` for at most 65535 further bytes. Candidates are tried
    /// from the highest offset down; the first one whose central directory lies before it wins.
    /// A declared comment length that overshoots the buffer is clamped, not rejected. A signature
    /// that merely appears inside a comment or inside trailing garbage is skipped because its
    /// fields do not describe a directory.
    ///
    /// # Errors
    ///
    /// [`ApkError::MalformedArchive`] if no consistent record exists inside the window.
    pub fn find_eocd(&self) -> Result<EndOfCentralDirectory<'a>> {
        let size = self.cursor.len();
        if size < RawEndOfCentralDirectory::SIZE {
            return Err(ApkError::malformed(format!(
                "archive of {size} bytes is too small to hold an end of central directory record"
            )));
        }

        let highest = size - RawEndOfCentralDirectory::SIZE;
        let lowest = highest.saturating_sub(MAX_COMMENT_SIZE);

        let mut last_rejection = None;
        for offset in (lowest..=highest).rev() {
            if !self
                .cursor
                .matches_at(offset, RawEndOfCentralDirectory::SIGNATURE)
            {
                continue;
            }

            match self.resolve_eocd(offset) {
                Ok(eocd) => {
                    debug!(
                        offset,
                        entries = eocd.entry_count,
                        cd_offset = eocd.cd_offset,
                        cd_size = eocd.cd_size,
                        zip64 = eocd.zip64,
                        "located end of central directory"
                    );
                    return Ok(eocd);
                }
                Err(err) => {
                    debug!(offset, %err, "rejected end of central directory candidate");
                    last_rejection = Some(err);
                }
            }
        }

        Err(last_rejection.unwrap_or_else(|| {
            ApkError::malformed(format!(
                "no end of central directory signature in the last {} bytes",
                size - lowest
            ))
        }))
    }

    /// Turn a signature hit into a fully resolved record, following ZIP64 if needed.
    fn resolve_eocd(&self, offset: u64) -> Result<EndOfCentralDirectory<'a>> {
        let raw = RawEndOfCentralDirectory::parse(&self.cursor, offset)?;

        if raw.disk_number != raw.disk_with_cd || raw.disk_entries != raw.total_entries {
            return Err(ApkError::malformed(format!(
                "multi-disk archives are not supported (disk {}, central directory on disk {}, {} of {} entries)",
                raw.disk_number, raw.disk_with_cd, raw.disk_entries, raw.total_entries
            )));
        }

        let (entry_count, cd_size, cd_offset, directory_end) = if raw.is_zip64() {
            let (eocd64, eocd64_offset) = self.read_zip64_eocd(offset)?;
            (
                eocd64.total_entries,
                eocd64.cd_size,
                eocd64.cd_offset,
                eocd64_offset,
            )
        } else {
            (
                raw.total_entries as u64,
                raw.cd_size as u64,
                raw.cd_offset as u64,
                offset,
            )
        };

        // The central directory must sit entirely before the record that describes it.
        match cd_offset.checked_add(cd_size) {
            Some(end) if end <= directory_end => {}
            _ => {
                return Err(ApkError::malformed(format!(
                    "central directory [{cd_offset}, +{cd_size}) overlaps the end of central directory at offset {directory_end}"
                )));
            }
        }

        if entry_count.saturating_mul(CDFH_MIN_SIZE) > cd_size {
            return Err(ApkError::malformed(format!(
                "{entry_count} entries cannot fit in a central directory of {cd_size} bytes"
            )));
        }

        Ok(EndOfCentralDirectory {
            offset,
            entry_count,
            cd_size,
            cd_offset,
            comment: raw.comment,
            zip64: raw.is_zip64(),
        })
    }

    /// Read the ZIP64 End of Central Directory record.
    ///
    /// Called when the regular EOCD indicates ZIP64 extensions are needed
    /// (fields set to 0xFFFF or 0xFFFFFFFF). Returns the record and its offset.
    pub fn read_zip64_eocd(&self, eocd_offset: u64) -> Result<(Zip64Eocd, u64)> {
        // The ZIP64 EOCD Locator is located immediately before the regular EOCD
        let locator_offset = eocd_offset
            .checked_sub(Zip64EocdLocator::SIZE)
            .ok_or_else(|| ApkError::malformed("no room for a ZIP64 locator before the EOCD"))?;
        let locator = Zip64EocdLocator::parse(&self.cursor, locator_offset)?;

        if locator.disk_with_eocd64 != 0 {
            return Err(ApkError::malformed(format!(
                "ZIP64 end of central directory lives on disk {}",
                locator.disk_with_eocd64
            )));
        }

        match locator.eocd64_offset.checked_add(Zip64Eocd::MIN_SIZE) {
            Some(end) if end <= locator_offset => {}
            _ => {
                return Err(ApkError::malformed(format!(
                    "ZIP64 end of central directory offset {} overlaps its locator at {locator_offset}",
                    locator.eocd64_offset
                )));
            }
        }

        let eocd64 = Zip64Eocd::parse(&self.cursor, locator.eocd64_offset)?;
        if eocd64.disk_number != eocd64.disk_with_cd || eocd64.disk_entries != eocd64.total_entries
        {
            return Err(ApkError::malformed(
                "multi-disk ZIP64 archives are not supported",
            ));
        }

        Ok((eocd64, locator.eocd64_offset))
    }

    /// List all entries of the central directory, in on-disk order.
    ///
    /// Reads exactly `eocd.entry_count` records. Each record is bounded by the declared central
    /// directory size; running out of room or hitting a bad signature before the count is
    /// reached is treated as truncation.
    pub fn list_entries(
        &self,
        eocd: &EndOfCentralDirectory<'a>,
    ) -> Result<Vec<CentralDirectoryEntry<'a>>> {
        let directory = self
            .cursor
            .sub_cursor(eocd.cd_offset, eocd.cd_size)
            .map_err(|_| {
                ApkError::malformed(format!(
                    "central directory [{}, +{}) lies outside the archive",
                    eocd.cd_offset, eocd.cd_size
                ))
            })?;

        // entry_count was checked against cd_size, so this cannot be attacker-sized.
        let mut entries = Vec::with_capacity(eocd.entry_count as usize);
        let mut position = 0u64;

        for index in 0..eocd.entry_count as usize {
            let (entry, next) = self
                .parse_cdfh(&directory, position, index, eocd.cd_offset)
                .map_err(|err| match err {
                    ApkError::OutOfBounds { .. } => ApkError::malformed(format!(
                        "central directory record {index} at offset {} runs past the end of the central directory (found {index} of {} entries)",
                        eocd.cd_offset + position,
                        eocd.entry_count
                    )),
                    other => other,
                })?;
            entries.push(entry);
            position = next;
        }

        if position != eocd.cd_size {
            debug!(
                trailing = eocd.cd_size - position,
                "central directory has bytes after its last declared record"
            );
        }

        let mut seen = HashSet::with_capacity(entries.len());
        for entry in &entries {
            if !seen.insert(entry.file_name) {
                warn!(
                    name = %entry.name_lossy(),
                    index = entry.index,
                    "duplicate entry name; later entries take precedence"
                );
            }
        }

        Ok(entries)
    }

    /// Parse a Central Directory File Header at `position` inside `directory`.
    ///
    /// Returns the entry and the position just past it.
    fn parse_cdfh(
        &self,
        directory: &ByteCursor<'a>,
        position: u64,
        index: usize,
        cd_offset: u64,
    ) -> Result<(CentralDirectoryEntry<'a>, u64)> {
        // Read and verify the signature (PK\x01\x02)
        if !directory.matches_at(position, CDFH_SIGNATURE) {
            return Err(ApkError::malformed(format!(
                "expected central directory signature at offset {} (found {index} valid entries)",
                cd_offset + position
            )));
        }
        directory.read_slice(position, CDFH_MIN_SIZE)?;

        let flags = directory.read_u16_le(position + 8)?;
        let compression_method = directory.read_u16_le(position + 10)?;
        let last_mod_time = directory.read_u16_le(position + 12)?;
        let last_mod_date = directory.read_u16_le(position + 14)?;
        let crc32 = directory.read_u32_le(position + 16)?;
        let compressed_size = directory.read_u32_le(position + 20)?;
        let uncompressed_size = directory.read_u32_le(position + 24)?;
        let file_name_length = directory.read_u16_le(position + 28)? as u64;
        let extra_field_length = directory.read_u16_le(position + 30)? as u64;
        let file_comment_length = directory.read_u16_le(position + 32)? as u64;
        let local_header_offset = directory.read_u32_le(position + 42)?;

        // All three lengths are u16, so the sum cannot overflow.
        let name_start = position + CDFH_MIN_SIZE;
        let extra_start = name_start + file_name_length;
        let record_end = extra_start + extra_field_length + file_comment_length;
        directory.read_slice(position, record_end - position)?;

        let file_name = directory.read_slice(name_start, file_name_length)?;
        let extra = directory.sub_cursor(extra_start, extra_field_length)?;

        let mut sizes = Zip64Sizes {
            uncompressed: uncompressed_size as u64,
            compressed: compressed_size as u64,
            local_header_offset: local_header_offset as u64,
        };
        if uncompressed_size == ZIP64_MARKER_U32
            || compressed_size == ZIP64_MARKER_U32
            || local_header_offset == ZIP64_MARKER_U32
        {
            sizes = read_zip64_extra(
                &extra,
                sizes,
                uncompressed_size,
                compressed_size,
                local_header_offset,
            )?;
        }

        if sizes.local_header_offset >= cd_offset {
            return Err(ApkError::malformed(format!(
                "entry {index} ('{}') has local header offset {} at or after the central directory at {cd_offset}",
                String::from_utf8_lossy(file_name),
                sizes.local_header_offset
            )));
        }

        let entry = CentralDirectoryEntry {
            file_name,
            compression_method: CompressionMethod::from_u16(compression_method),
            compressed_size: sizes.compressed,
            uncompressed_size: sizes.uncompressed,
            crc32,
            local_header_offset: sizes.local_header_offset,
            flags,
            last_mod_time,
            last_mod_date,
            index,
        };

        Ok((entry, record_end))
    }
}

struct Zip64Sizes {
    uncompressed: u64,
    compressed: u64,
    local_header_offset: u64,
}

/// Replace saturated 32-bit fields with the values from the ZIP64 extra field (ID 0x0001).
///
/// Fields appear in the extra block only when the header field is 0xFFFFFFFF, always in the
/// order uncompressed size, compressed size, local header offset.
fn read_zip64_extra(
    extra: &ByteCursor<'_>,
    mut sizes: Zip64Sizes,
    uncompressed_size: u32,
    compressed_size: u32,
    local_header_offset: u32,
) -> Result<Zip64Sizes> {
    let mut position = 0u64;

    while position + 4 <= extra.len() {
        let header_id = extra.read_u16_le(position)?;
        let field_size = extra.read_u16_le(position + 2)? as u64;
        let field = extra.sub_cursor(position + 4, field_size).map_err(|_| {
            ApkError::malformed(format!(
                "extra field 0x{header_id:04x} declares {field_size} bytes past the end of its block"
            ))
        })?;

        if header_id == ZIP64_EXTRA_ID {
            let mut field_offset = 0u64;
            let mut next = |present: bool, current: u64| -> Result<u64> {
                if !present {
                    return Ok(current);
                }
                let value = field.read_u64_le(field_offset).map_err(|_| {
                    ApkError::malformed("ZIP64 extra field is too short for its saturated fields")
                })?;
                field_offset += 8;
                Ok(value)
            };

            sizes.uncompressed = next(uncompressed_size == ZIP64_MARKER_U32, sizes.uncompressed)?;
            sizes.compressed = next(compressed_size == ZIP64_MARKER_U32, sizes.compressed)?;
            sizes.local_header_offset = next(
                local_header_offset == ZIP64_MARKER_U32,
                sizes.local_header_offset,
            )?;
            return Ok(sizes);
        }

        position += 4 + field_size;
    }

    Err(ApkError::malformed(
        "entry has saturated size fields but no ZIP64 extra field",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eocd(entries: u16, cd_size: u32, cd_offset: u32, comment: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(b"PK\x05\x06");
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&entries.to_le_bytes());
        out.extend_from_slice(&entries.to_le_bytes());
        out.extend_from_slice(&cd_size.to_le_bytes());
        out.extend_from_slice(&cd_offset.to_le_bytes());
        out.extend_from_slice(&(comment.len() as u16).to_le_bytes());
        out.extend_from_slice(comment);
        out
    }

    #[test]
    fn finds_empty_archive_record() {
        let data = eocd(0, 0, 0, b"");
        let found = ZipParser::new(&data).find_eocd().unwrap();

        assert_eq!(found.offset, 0);
        assert_eq!(found.entry_count, 0);
        assert!(found.comment.is_empty());
        assert!(!found.zip64);
    }

    #[test]
    fn finds_record_behind_comment() {
        let data = eocd(0, 0, 0, b"hello world");
        let found = ZipParser::new(&data).find_eocd().unwrap();

        assert_eq!(found.offset, 0);
        assert_eq!(found.comment, b"hello world");
    }

    #[test]
    fn overlong_comment_length_is_clamped() {
        let mut data = eocd(0, 0, 0, b"abc");
        data[20..22].copy_from_slice(&40u16.to_le_bytes());
        let found = ZipParser::new(&data).find_eocd().unwrap();

        assert_eq!(found.offset, 0);
        assert_eq!(found.comment, b"abc");
    }

    #[test]
    fn skips_signature_hidden_in_comment() {
        // The comment carries a bogus record whose directory would overlap itself.
        let fake = eocd(5, 1000, 1000, b"");
        let data = eocd(0, 0, 0, &fake);
        let found = ZipParser::new(&data).find_eocd().unwrap();

        assert_eq!(found.offset, 0);
        assert_eq!(found.entry_count, 0);
    }

    #[test]
    fn tolerates_trailing_garbage() {
        let mut data = eocd(0, 0, 0, b"");
        data.extend_from_slice(&[0xAB; 100]);
        let found = ZipParser::new(&data).find_eocd().unwrap();
        assert_eq!(found.offset, 0);
    }

    #[test]
    fn rejects_tiny_and_signatureless_input() {
        assert!(matches!(
            ZipParser::new(b"PK\x05\x06").find_eocd(),
            Err(ApkError::MalformedArchive(_))
        ));
        assert!(matches!(
            ZipParser::new(&[0u8; 64]).find_eocd(),
            Err(ApkError::MalformedArchive(_))
        ));
    }

    #[test]
    fn record_beyond_search_window_is_not_found() {
        let mut data = eocd(0, 0, 0, b"");
        data.extend_from_slice(&vec![0u8; 70_000]);

        assert!(matches!(
            ZipParser::new(&data).find_eocd(),
            Err(ApkError::MalformedArchive(_))
        ));
    }

    #[test]
    fn truncated_central_directory_is_malformed() {
        // Room for two records, but only the first one carries a signature.
        let mut data = vec![0u8; 46];
        let mut record = vec![0u8; 46];
        record[0..4].copy_from_slice(CDFH_SIGNATURE);
        data.extend_from_slice(&record);
        data.extend_from_slice(&[0u8; 46]);
        data.extend_from_slice(&eocd(2, 92, 46, b""));

        let parser = ZipParser::new(&data);
        let found = parser.find_eocd().unwrap();
        let err = parser.list_entries(&found).unwrap_err();
        assert!(matches!(err, ApkError::MalformedArchive(_)), "{err}");
    }

    #[test]
    fn count_larger_than_directory_is_rejected_early() {
        let data = eocd(1000, 46, 0, b"");
        let mut padded = vec![0u8; 46];
        padded.extend_from_slice(&data);

        assert!(matches!(
            ZipParser::new(&padded).find_eocd(),
            Err(ApkError::MalformedArchive(_))
        ));
    }
}
