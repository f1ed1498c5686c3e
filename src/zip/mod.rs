//! ZIP container parsing and member extraction.
//!
//! An APK is a ZIP archive, usually with an APK Signing Block squeezed in
//! between the last member's data and the central directory.
//!
//! ## Architecture
//!
//! - [`structures`]: Data structures representing ZIP format elements (EOCD, file headers, etc.)
//! - [`parser`]: Locating the EOCD and reading the central directory
//! - [`extractor`]: Local header validation, decompression and CRC checks
//!
//! ## Supported Features
//!
//! - Standard ZIP format (PKZIP APPNOTE 6.3.x compatible)
//! - ZIP64 extensions
//! - STORED and DEFLATE compression methods
//!
//! ## Limitations
//!
//! - No encryption support
//! - No multi-disk archive support
//! - No BZIP2, LZMA, or other compression methods

mod extractor;
mod parser;
mod structures;

pub use extractor::{ExtractOptions, ZipExtractor, find_by_path};
pub use parser::ZipParser;
pub use structures::*;
