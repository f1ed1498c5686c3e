use tracing::warn;

use crate::cursor::ByteCursor;
use crate::error::{ApkError, Result};

/// ZIP compression methods
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionMethod {
    Stored,
    Deflated,
    Other(u16),
}

impl CompressionMethod {
    pub fn from_u16(value: u16) -> Self {
        match value {
            0 => CompressionMethod::Stored,
            8 => CompressionMethod::Deflated,
            _ => CompressionMethod::Other(value),
        }
    }

    pub fn as_u16(&self) -> u16 {
        match self {
            CompressionMethod::Stored => 0,
            CompressionMethod::Deflated => 8,
            CompressionMethod::Other(v) => *v,
        }
    }
}

/// General purpose flag: sizes and CRC live in a data descriptor after the member data.
pub const FLAG_DATA_DESCRIPTOR: u16 = 1 << 3;

/// Value stored in a 32-bit field whose real value lives in the ZIP64 extra field.
pub const ZIP64_MARKER_U32: u32 = 0xFFFF_FFFF;
pub const ZIP64_MARKER_U16: u16 = 0xFFFF;

/// Extra field header ID of the ZIP64 extended information block.
pub const ZIP64_EXTRA_ID: u16 = 0x0001;

/// The fixed part of the End of Central Directory record - 22 bytes
#[derive(Debug, Clone)]
pub struct RawEndOfCentralDirectory<'a> {
    pub disk_number: u16,
    pub disk_with_cd: u16,
    pub disk_entries: u16,
    pub total_entries: u16,
    pub cd_size: u32,
    pub cd_offset: u32,
    pub comment: &'a [u8],
}

impl<'a> RawEndOfCentralDirectory<'a> {
    pub const SIGNATURE: &'static [u8] = b"PK\x05\x06";
    pub const SIZE: u64 = 22;

    /// Parse the record at `offset`.
    ///
    /// The comment is whatever the declared comment length covers, clamped to the end of the
    /// buffer when the declared length overshoots it.
    pub fn parse(cursor: &ByteCursor<'a>, offset: u64) -> Result<Self> {
        if !cursor.matches_at(offset, Self::SIGNATURE) {
            return Err(ApkError::malformed(format!(
                "no end of central directory signature at offset {offset}"
            )));
        }

        let comment_start = offset + Self::SIZE;
        let declared = cursor.read_u16_le(offset + 20)? as u64;
        let available = cursor.len().saturating_sub(comment_start);
        if declared > available {
            warn!(
                offset,
                declared,
                available,
                "end of central directory comment runs past the end of the archive; truncating"
            );
        }
        let comment = cursor.read_slice(comment_start, declared.min(available))?;

        Ok(Self {
            disk_number: cursor.read_u16_le(offset + 4)?,
            disk_with_cd: cursor.read_u16_le(offset + 6)?,
            disk_entries: cursor.read_u16_le(offset + 8)?,
            total_entries: cursor.read_u16_le(offset + 10)?,
            cd_size: cursor.read_u32_le(offset + 12)?,
            cd_offset: cursor.read_u32_le(offset + 16)?,
            comment,
        })
    }

    pub fn is_zip64(&self) -> bool {
        self.disk_entries == ZIP64_MARKER_U16
            || self.total_entries == ZIP64_MARKER_U16
            || self.cd_size == ZIP64_MARKER_U32
            || self.cd_offset == ZIP64_MARKER_U32
    }
}

/// ZIP64 End of Central Directory Locator - 20 bytes
pub struct Zip64EocdLocator {
    pub disk_with_eocd64: u32,
    pub eocd64_offset: u64,
    pub total_disks: u32,
}

impl Zip64EocdLocator {
    pub const SIGNATURE: &'static [u8] = b"PK\x06\x07";
    pub const SIZE: u64 = 20;

    pub fn parse(cursor: &ByteCursor<'_>, offset: u64) -> Result<Self> {
        if !cursor.matches_at(offset, Self::SIGNATURE) {
            return Err(ApkError::malformed(format!(
                "missing ZIP64 end of central directory locator at offset {offset}"
            )));
        }

        Ok(Self {
            disk_with_eocd64: cursor.read_u32_le(offset + 4)?,
            eocd64_offset: cursor.read_u64_le(offset + 8)?,
            total_disks: cursor.read_u32_le(offset + 16)?,
        })
    }
}

/// ZIP64 End of Central Directory - 56 bytes minimum
pub struct Zip64Eocd {
    pub eocd64_size: u64,
    pub disk_number: u32,
    pub disk_with_cd: u32,
    pub disk_entries: u64,
    pub total_entries: u64,
    pub cd_size: u64,
    pub cd_offset: u64,
}

impl Zip64Eocd {
    pub const SIGNATURE: &'static [u8] = b"PK\x06\x06";
    pub const MIN_SIZE: u64 = 56;

    pub fn parse(cursor: &ByteCursor<'_>, offset: u64) -> Result<Self> {
        if !cursor.matches_at(offset, Self::SIGNATURE) {
            return Err(ApkError::malformed(format!(
                "missing ZIP64 end of central directory record at offset {offset}"
            )));
        }
        // Bounds-check the whole fixed record before picking fields out of it.
        cursor.read_slice(offset, Self::MIN_SIZE)?;

        Ok(Self {
            eocd64_size: cursor.read_u64_le(offset + 4)?,
            disk_number: cursor.read_u32_le(offset + 16)?,
            disk_with_cd: cursor.read_u32_le(offset + 20)?,
            disk_entries: cursor.read_u64_le(offset + 24)?,
            total_entries: cursor.read_u64_le(offset + 32)?,
            cd_size: cursor.read_u64_le(offset + 40)?,
            cd_offset: cursor.read_u64_le(offset + 48)?,
        })
    }
}

/// The End of Central Directory after ZIP64 resolution.
#[derive(Debug, Clone)]
pub struct EndOfCentralDirectory<'a> {
    /// Offset of the `PK\x05\x06` record in the archive.
    pub offset: u64,
    pub entry_count: u64,
    pub cd_size: u64,
    pub cd_offset: u64,
    pub comment: &'a [u8],
    pub zip64: bool,
}

impl EndOfCentralDirectory<'_> {
    /// One past the last byte of the central directory.
    pub fn cd_end(&self) -> u64 {
        // Validated against the EOCD offset when the record was located.
        self.cd_offset + self.cd_size
    }
}

/// Central Directory File Header (CDFH) - 46 bytes minimum
pub const CDFH_SIGNATURE: &[u8] = b"PK\x01\x02";
pub const CDFH_MIN_SIZE: u64 = 46;

/// Local File Header (LFH) - 30 bytes
pub const LFH_SIGNATURE: &[u8] = b"PK\x03\x04";
pub const LFH_SIZE: u64 = 30;

/// One member as described by the central directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CentralDirectoryEntry<'a> {
    /// Raw file name bytes; not necessarily UTF-8.
    pub file_name: &'a [u8],
    pub compression_method: CompressionMethod,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    pub crc32: u32,
    pub local_header_offset: u64,
    pub flags: u16,
    pub last_mod_time: u16,
    pub last_mod_date: u16,
    /// Position in the central directory, counting from zero.
    pub index: usize,
}

impl CentralDirectoryEntry<'_> {
    /// The file name with invalid UTF-8 replaced.
    pub fn name_lossy(&self) -> String {
        String::from_utf8_lossy(self.file_name).into_owned()
    }

    pub fn is_directory(&self) -> bool {
        self.file_name.ends_with(b"/")
    }

    pub fn has_data_descriptor(&self) -> bool {
        self.flags & FLAG_DATA_DESCRIPTOR != 0
    }

    /// Parse modification date to (year, month, day)
    pub fn mod_date(&self) -> (u16, u8, u8) {
        let day = (self.last_mod_date & 0x1F) as u8;
        let month = ((self.last_mod_date >> 5) & 0x0F) as u8;
        let year = ((self.last_mod_date >> 9) & 0x7F) + 1980;
        (year, month, day)
    }

    /// Parse modification time to (hour, minute, second)
    pub fn mod_time(&self) -> (u8, u8, u8) {
        let second = ((self.last_mod_time & 0x1F) * 2) as u8;
        let minute = ((self.last_mod_time >> 5) & 0x3F) as u8;
        let hour = ((self.last_mod_time >> 11) & 0x1F) as u8;
        (hour, minute, second)
    }
}

/// The fields of a Local File Header that extraction checks against the central directory.
#[derive(Debug, Clone)]
pub struct LocalFileHeader<'a> {
    pub flags: u16,
    pub compression_method: u16,
    pub crc32: u32,
    pub compressed_size: u32,
    pub uncompressed_size: u32,
    pub file_name: &'a [u8],
    pub extra_field_length: u16,
}

impl<'a> LocalFileHeader<'a> {
    pub fn parse(cursor: &ByteCursor<'a>, offset: u64) -> Result<Self> {
        if !cursor.matches_at(offset, LFH_SIGNATURE) {
            return Err(ApkError::malformed(format!(
                "invalid local file header signature at offset {offset}"
            )));
        }

        let file_name_length = cursor.read_u16_le(offset + 26)? as u64;
        let extra_field_length = cursor.read_u16_le(offset + 28)?;

        Ok(Self {
            flags: cursor.read_u16_le(offset + 6)?,
            compression_method: cursor.read_u16_le(offset + 8)?,
            crc32: cursor.read_u32_le(offset + 14)?,
            compressed_size: cursor.read_u32_le(offset + 18)?,
            uncompressed_size: cursor.read_u32_le(offset + 22)?,
            file_name: cursor.read_slice(offset + LFH_SIZE, file_name_length)?,
            extra_field_length,
        })
    }

    /// Size of the header including its variable-length fields.
    pub fn size(&self) -> u64 {
        LFH_SIZE + self.file_name.len() as u64 + self.extra_field_length as u64
    }
}
