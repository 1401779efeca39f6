//! Range-based reader interface for raster sources
//!
//! This module provides a unified interface for reading byte ranges from various sources
//! (local files, S3, HTTP, memory). Cloud Optimized GeoTIFFs are laid out so that a tile
//! only needs a handful of range reads: the header, the IFD chain, and the chunks the
//! tile touches. [`RangeCursor`] adapts any [`RangeReader`] to `Read + Seek` so the TIFF
//! decoder performs those windowed reads instead of downloading the whole file.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

/// Default read-ahead for [`RangeCursor`]. Large enough to cover a typical COG
/// header and IFD chain in a single request.
pub const DEFAULT_BLOCK_SIZE: usize = 64 * 1024;

/// Trait for reading byte ranges from any source
///
/// This abstraction allows the same raster reading code to work with:
/// - Local files (using seek + read)
/// - S3 objects (using `GetObject` with Range header)
/// - HTTP URLs (using Range header)
/// - In-memory buffers
pub trait RangeReader: Send + Sync {
    /// Read a range of bytes from the source. Reads past the end are truncated.
    fn read_range(&self, offset: u64, length: usize) -> io::Result<Vec<u8>>;

    /// Get the total size of the source in bytes
    fn size(&self) -> u64;

    /// Get a human-readable identifier for this source (for logging/errors)
    fn identifier(&self) -> &str;
}

/// Local file range reader
pub struct LocalRangeReader {
    path: PathBuf,
    identifier: String,
    size: u64,
}

impl LocalRangeReader {
    pub fn new(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let metadata = std::fs::metadata(&path)?;
        if !metadata.is_file() {
            return Err(io::Error::new(io::ErrorKind::NotFound, format!("{} is not a file", path.display())));
        }
        Ok(Self {
            identifier: path.display().to_string(),
            path,
            size: metadata.len(),
        })
    }
}

impl RangeReader for LocalRangeReader {
    fn read_range(&self, offset: u64, length: usize) -> io::Result<Vec<u8>> {
        let mut file = File::open(&self.path)?;
        file.seek(SeekFrom::Start(offset))?;
        let available = self.size.saturating_sub(offset).min(length as u64) as usize;
        let mut buffer = vec![0u8; available];
        file.read_exact(&mut buffer)?;
        Ok(buffer)
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn identifier(&self) -> &str {
        &self.identifier
    }
}

/// HTTP range reader for remote COG files
/// Uses reqwest with blocking client; call from a blocking thread.
pub struct HttpRangeReader {
    url: String,
    size: u64,
    client: reqwest::blocking::Client,
}

impl HttpRangeReader {
    pub fn new(url: &str) -> io::Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(io::Error::other)?;

        // Get file size via HEAD request
        let response = client.head(url).send().map_err(io::Error::other)?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(io::Error::new(io::ErrorKind::NotFound, format!("{url} returned 404")));
        }
        if !response.status().is_success() {
            return Err(io::Error::other(format!("HEAD {url} failed: {}", response.status())));
        }

        let size = response
            .headers()
            .get(reqwest::header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
            .ok_or_else(|| io::Error::other(format!("{url} did not report a content length")))?;

        Ok(Self {
            url: url.to_string(),
            size,
            client,
        })
    }
}

impl RangeReader for HttpRangeReader {
    fn read_range(&self, offset: u64, length: usize) -> io::Result<Vec<u8>> {
        let end = (offset + length as u64).min(self.size);
        if end <= offset {
            return Ok(Vec::new());
        }
        let range = format!("bytes={}-{}", offset, end - 1);
        let response = self
            .client
            .get(&self.url)
            .header(reqwest::header::RANGE, range)
            .send()
            .map_err(io::Error::other)?;

        if !response.status().is_success() {
            return Err(io::Error::other(format!("HTTP request failed: {}", response.status())));
        }

        Ok(response.bytes().map_err(io::Error::other)?.to_vec())
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn identifier(&self) -> &str {
        &self.url
    }
}

/// In-memory range reader, mostly useful for tests and for small rasters
/// already fetched by the caller.
pub struct MemoryRangeReader {
    data: Arc<[u8]>,
    identifier: String,
}

impl MemoryRangeReader {
    #[must_use]
    pub fn new(identifier: impl Into<String>, data: impl Into<Arc<[u8]>>) -> Self {
        Self {
            data: data.into(),
            identifier: identifier.into(),
        }
    }
}

impl RangeReader for MemoryRangeReader {
    fn read_range(&self, offset: u64, length: usize) -> io::Result<Vec<u8>> {
        let start = (offset as usize).min(self.data.len());
        let end = start.saturating_add(length).min(self.data.len());
        Ok(self.data[start..end].to_vec())
    }

    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    fn identifier(&self) -> &str {
        &self.identifier
    }
}

/// Create a range reader from a path or URL
///
/// Must be called from a blocking context: the HTTP and S3 readers issue a
/// request while opening.
pub fn create_range_reader(source: &str) -> io::Result<Arc<dyn RangeReader>> {
    if source.starts_with("s3://") {
        Ok(Arc::new(crate::s3::S3RangeReaderSync::new(source)?))
    } else if source.starts_with("http://") || source.starts_with("https://") {
        Ok(Arc::new(HttpRangeReader::new(source)?))
    } else {
        Ok(Arc::new(LocalRangeReader::new(source)?))
    }
}

/// `Read + Seek` over a [`RangeReader`] with a single read-ahead block.
///
/// Small reads (tags, IFD entries) are served from the block; reads at least
/// as large as the block (compressed chunks) bypass it.
pub struct RangeCursor {
    reader: Arc<dyn RangeReader>,
    position: u64,
    block: Vec<u8>,
    block_start: u64,
    block_size: usize,
    requests: usize,
}

impl RangeCursor {
    #[must_use]
    pub fn new(reader: Arc<dyn RangeReader>) -> Self {
        Self::with_block_size(reader, DEFAULT_BLOCK_SIZE)
    }

    #[must_use]
    pub fn with_block_size(reader: Arc<dyn RangeReader>, block_size: usize) -> Self {
        Self {
            reader,
            position: 0,
            block: Vec::new(),
            block_start: 0,
            block_size: block_size.max(1),
            requests: 0,
        }
    }

    /// Number of range requests issued so far.
    #[must_use]
    pub fn requests(&self) -> usize {
        self.requests
    }

    fn block_contains(&self, position: u64) -> bool {
        position >= self.block_start && position < self.block_start + self.block.len() as u64
    }
}

impl Read for RangeCursor {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let size = self.reader.size();
        if buf.is_empty() || self.position >= size {
            return Ok(0);
        }

        if !self.block_contains(self.position) {
            let remaining = size - self.position;
            if buf.len() >= self.block_size {
                let length = (buf.len() as u64).min(remaining) as usize;
                let data = self.reader.read_range(self.position, length)?;
                self.requests += 1;
                let n = data.len().min(buf.len());
                buf[..n].copy_from_slice(&data[..n]);
                self.position += n as u64;
                return Ok(n);
            }

            let length = (self.block_size as u64).min(remaining) as usize;
            self.block = self.reader.read_range(self.position, length)?;
            self.block_start = self.position;
            self.requests += 1;
            debug!(
                source = self.reader.identifier(),
                offset = self.block_start,
                length = self.block.len(),
                "range read"
            );
            if self.block.is_empty() {
                return Ok(0);
            }
        }

        let offset = (self.position - self.block_start) as usize;
        let n = buf.len().min(self.block.len() - offset);
        buf[..n].copy_from_slice(&self.block[offset..offset + n]);
        self.position += n as u64;
        Ok(n)
    }
}

impl Seek for RangeCursor {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(p) => Some(p),
            SeekFrom::End(delta) => self.reader.size().checked_add_signed(delta),
            SeekFrom::Current(delta) => self.position.checked_add_signed(delta),
        };
        let target = target.ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "seek to a negative or overflowing position")
        })?;
        self.position = target;
        Ok(target)
    }
}
