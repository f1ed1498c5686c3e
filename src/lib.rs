//! # apkparse
//!
//! Structural parsing of Android APK files.
//!
//! An APK is opened from a complete in-memory buffer. Opening locates the ZIP end of central
//! directory record, reads the central directory and, if present, splits the APK Signing Block
//! into its ID-value pairs. Members can then be extracted with their local headers and CRC-32
//! checked, and the DER certificates of every signature scheme can be collected.
//!
//! Nothing here verifies signatures or decodes binary XML; the parser hands raw bytes to
//! whatever does.
//!
//! ## Features
//!
//! - Bounded EOCD scan that tolerates archive comments and trailing data
//! - ZIP64 end records and extra fields
//! - STORED and DEFLATE members, with limits on inflated size
//! - APK Signing Block pairs, v2/v3 signer certificates and v1 `META-INF` certificates
//! - Loading from local files or HTTP/HTTPS URLs using Range requests
//!
//! ## Example
//!
//! ```no_run
//! use apkparse::{Apk, LocalFileReader, io};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let reader = LocalFileReader::new("app.apk".as_ref())?;
//!     let data = io::read_fully(&reader).await?;
//!
//!     let apk = Apk::open(&data)?;
//!     for name in apk.file_names() {
//!         println!("{name}");
//!     }
//!
//!     let manifest = apk.manifest_bytes()?;
//!     println!("manifest: {} bytes", manifest.len());
//!
//!     for certificate in &apk.certificates().records {
//!         println!("{:?}: {} bytes", certificate.source, certificate.bytes.len());
//!     }
//!
//!     Ok(())
//! }
//! ```

pub mod apk;
pub mod cli;
pub mod cursor;
pub mod error;
pub mod io;
pub mod signing;
pub mod zip;

pub use apk::{ANDROID_MANIFEST, Apk};
pub use cli::Cli;
pub use cursor::ByteCursor;
pub use error::{ApkError, Result};
pub use io::{HttpRangeReader, LocalFileReader, ReadAt};
pub use signing::{CertificateRecord, CertificateSet, CertificateSource, SigningBlockPair};
pub use zip::{CentralDirectoryEntry, CompressionMethod, ExtractOptions};
