//! Byte sources an APK can be loaded from.
//!
//! Parsing always happens on a complete in-memory buffer; these readers only
//! fetch that buffer, from a local file or over HTTP Range requests.

mod http;
mod local;

pub use http::HttpRangeReader;
pub use local::LocalFileReader;

use anyhow::{Result, bail};
use async_trait::async_trait;

/// Size of each positional read while loading a whole source.
const CHUNK_SIZE: usize = 4 * 1024 * 1024;

/// Trait for random access reading from a data source
#[async_trait]
pub trait ReadAt: Send + Sync {
    /// Read data at the specified offset into the buffer
    async fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize>;

    /// Get the total size of the data source
    fn size(&self) -> u64;
}

/// Load an entire source into memory.
///
/// Fails if the source ends before its advertised size.
pub async fn read_fully<R: ReadAt + ?Sized>(reader: &R) -> Result<Vec<u8>> {
    let size = usize::try_from(reader.size())?;
    let mut data = vec![0u8; size];
    let mut filled = 0;

    while filled < size {
        let end = (filled + CHUNK_SIZE).min(size);
        let read = reader.read_at(filled as u64, &mut data[filled..end]).await?;
        if read == 0 {
            bail!("source ended after {filled} of {size} bytes");
        }
        filled += read;
    }

    tracing::debug!(size, "loaded source into memory");
    Ok(data)
}
