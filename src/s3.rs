//! S3 Range Reader implementation using `object_store`
//!
//! Raster sources named `s3://bucket/key` are read with ranged `GET`s.
//! Works with AWS S3, MinIO and other S3-compatible stores.
//!
//! # Configuration
//!
//! The reader can be configured via environment variables:
//! - `AWS_ACCESS_KEY_ID` - AWS access key
//! - `AWS_SECRET_ACCESS_KEY` - AWS secret key
//! - `AWS_REGION` - AWS region (default: us-east-1)
//! - `AWS_ENDPOINT_URL` - Custom endpoint for MinIO/S3-compatible services
//! - `AWS_ALLOW_HTTP` - Set to "true" to allow HTTP endpoints (for local MinIO)
//! - `AWS_SKIP_SIGNATURE` - Set to "true" for anonymous access to public buckets

use std::io;
use std::ops::Range;
use std::sync::Arc;

use object_store::aws::AmazonS3Builder;
use object_store::path::Path as ObjectPath;
use object_store::{GetOptions, GetRange, ObjectStore};
use tokio::runtime::Handle;

use crate::range_reader::RangeReader;

fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|v| v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

fn store_error(e: object_store::Error) -> io::Error {
    match e {
        object_store::Error::NotFound { .. } => io::Error::new(io::ErrorKind::NotFound, e),
        other => io::Error::other(other),
    }
}

/// S3 configuration for connecting to S3-compatible storage
#[derive(Debug, Clone)]
pub struct S3Config {
    pub bucket: String,
    /// Object key (path within the bucket)
    pub key: String,
    pub region: Option<String>,
    /// Custom endpoint URL (for MinIO, LocalStack, etc.)
    pub endpoint_url: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    /// Allow HTTP connections (required for local MinIO without TLS)
    pub allow_http: bool,
    /// Skip signature verification (for anonymous access to public buckets)
    pub skip_signature: bool,
}

impl S3Config {
    /// Parse `s3://bucket/key/path`, taking credentials from the environment.
    pub fn from_url(url: &str) -> io::Result<Self> {
        let invalid = |msg: String| io::Error::new(io::ErrorKind::InvalidInput, msg);
        let parsed = url::Url::parse(url).map_err(|e| invalid(format!("{url}: {e}")))?;

        if parsed.scheme() != "s3" {
            return Err(invalid(format!("expected s3:// URL, got: {}", parsed.scheme())));
        }

        let bucket = parsed
            .host_str()
            .ok_or_else(|| invalid(format!("missing bucket in {url}")))?
            .to_string();

        let key = parsed.path().trim_start_matches('/').to_string();
        if key.is_empty() {
            return Err(invalid(format!("missing key in {url}")));
        }

        Ok(Self {
            bucket,
            key,
            region: std::env::var("AWS_REGION").ok().or(Some("us-east-1".to_string())),
            endpoint_url: std::env::var("AWS_ENDPOINT_URL").ok(),
            access_key_id: std::env::var("AWS_ACCESS_KEY_ID").ok(),
            secret_access_key: std::env::var("AWS_SECRET_ACCESS_KEY").ok(),
            allow_http: env_flag("AWS_ALLOW_HTTP"),
            skip_signature: env_flag("AWS_SKIP_SIGNATURE"),
        })
    }
}

/// Async S3 range reader using `object_store`
pub struct S3RangeReaderAsync {
    store: Arc<dyn ObjectStore>,
    path: ObjectPath,
    size: u64,
    url: String,
}

impl S3RangeReaderAsync {
    pub async fn new(url: &str) -> io::Result<Self> {
        Self::from_config(S3Config::from_url(url)?).await
    }

    pub async fn from_config(config: S3Config) -> io::Result<Self> {
        let mut builder = AmazonS3Builder::new().with_bucket_name(&config.bucket);

        if let Some(region) = &config.region {
            builder = builder.with_region(region);
        }
        if let Some(endpoint) = &config.endpoint_url {
            builder = builder.with_endpoint(endpoint);
        }
        if let Some(access_key) = &config.access_key_id {
            builder = builder.with_access_key_id(access_key);
        }
        if let Some(secret_key) = &config.secret_access_key {
            builder = builder.with_secret_access_key(secret_key);
        }
        if config.allow_http {
            builder = builder.with_allow_http(true);
        }
        if config.skip_signature {
            builder = builder.with_skip_signature(true);
        }

        let store = builder.build().map_err(store_error)?;
        let path = ObjectPath::from(config.key.as_str());

        // Get file size via HEAD request
        let meta = store.head(&path).await.map_err(store_error)?;

        Ok(Self {
            store: Arc::new(store),
            path,
            size: meta.size,
            url: format!("s3://{}/{}", config.bucket, config.key),
        })
    }

    pub async fn read_range_async(&self, offset: u64, length: usize) -> io::Result<Vec<u8>> {
        let end = (offset + length as u64).min(self.size);
        if end <= offset {
            return Ok(Vec::new());
        }

        let options = GetOptions {
            range: Some(GetRange::Bounded(Range { start: offset, end })),
            ..Default::default()
        };

        let result = self.store.get_opts(&self.path, options).await.map_err(store_error)?;
        let bytes = result.bytes().await.map_err(store_error)?;
        Ok(bytes.to_vec())
    }
}

/// Blocking adapter implementing [`RangeReader`].
///
/// Must be used from a blocking thread owned by a tokio runtime
/// (`spawn_blocking`), never from inside an async task.
pub struct S3RangeReaderSync {
    inner: S3RangeReaderAsync,
    runtime: Handle,
}

impl S3RangeReaderSync {
    pub fn new(url: &str) -> io::Result<Self> {
        let runtime = Handle::try_current()
            .map_err(|_| io::Error::other("S3RangeReaderSync must be created within a tokio runtime"))?;
        let inner = runtime.block_on(S3RangeReaderAsync::new(url))?;
        Ok(Self { inner, runtime })
    }
}

impl RangeReader for S3RangeReaderSync {
    fn read_range(&self, offset: u64, length: usize) -> io::Result<Vec<u8>> {
        self.runtime.block_on(self.inner.read_range_async(offset, length))
    }

    fn size(&self) -> u64 {
        self.inner.size
    }

    fn identifier(&self) -> &str {
        &self.inner.url
    }
}
