//! Blob store collaborator: the S3-compatible object store behind the agent.
//!
//! Transfer handlers drive the capability-typed [`BlobStore`] trait; the
//! production implementation adapts `object_store`'s S3 client. Objects are
//! keyed by OID inside a single configured bucket.

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::TryStreamExt;
use object_store::aws::{AmazonS3, AmazonS3Builder};
use object_store::{ObjectStore, PutPayload};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::io::StreamReader;

/// Reader handed across the store boundary.
pub type ByteStream = Box<dyn AsyncRead + Send + Unpin>;

/// Capability interface consumed by the transfer handlers.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `size` bytes from `reader` under `key`.
    async fn put(&self, key: &str, reader: ByteStream, size: u64) -> Result<()>;

    /// Fetch the content stored under `key`.
    async fn get(&self, key: &str) -> Result<ByteStream>;
}

// =============================================================================
// Configuration
// =============================================================================

/// Store configuration read from the environment.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Endpoint host (and optional port), without a scheme.
    pub endpoint: String,
    pub bucket: String,
    pub region: String,
    /// TLS toward the store; `LFS_S3_SECURE=0` selects plaintext HTTP.
    pub secure: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreConfigError {
    #[error("missing {0} env")]
    MissingEnv(&'static str),
}

impl StoreConfig {
    /// Read configuration from the environment. Credentials are left to the
    /// standard `AWS_ACCESS_KEY_ID` / `AWS_SECRET_ACCESS_KEY` variables the
    /// S3 client consumes itself.
    pub fn from_env() -> Result<Self, StoreConfigError> {
        Ok(Self {
            endpoint: require_env("LFS_S3_ENDPOINT")?,
            bucket: require_env("LFS_S3_BUCKET")?,
            region: std::env::var("LFS_S3_REGION").unwrap_or_else(|_| "us-east-1".to_string()),
            secure: std::env::var("LFS_S3_SECURE").map(|v| v != "0").unwrap_or(true),
        })
    }
}

fn require_env(key: &'static str) -> Result<String, StoreConfigError> {
    std::env::var(key).map_err(|_| StoreConfigError::MissingEnv(key))
}

// =============================================================================
// S3 implementation
// =============================================================================

/// Upper bound on the buffer pre-allocated from the peer-declared size.
/// The declared size is not trusted; larger objects grow the buffer as
/// they are read.
const MAX_PUT_PREALLOC: u64 = 8 * 1024 * 1024;

/// `object_store`-backed S3 store.
pub struct S3Store {
    store: AmazonS3,
}

impl S3Store {
    pub fn connect(config: &StoreConfig) -> Result<Self> {
        let scheme = if config.secure { "https" } else { "http" };
        let store = AmazonS3Builder::from_env()
            .with_endpoint(format!("{scheme}://{}", config.endpoint))
            .with_bucket_name(&config.bucket)
            .with_region(&config.region)
            .with_allow_http(!config.secure)
            .build()
            .context("build s3 client")?;
        Ok(Self { store })
    }
}

#[async_trait]
impl BlobStore for S3Store {
    /// Single-shot put; multipart/resumable uploads are out of scope, so
    /// the whole object is buffered in memory before the request goes out.
    async fn put(&self, key: &str, mut reader: ByteStream, size: u64) -> Result<()> {
        let mut buf = Vec::with_capacity(size.min(MAX_PUT_PREALLOC) as usize);
        reader
            .read_to_end(&mut buf)
            .await
            .context("read upload source")?;
        self.store
            .put(&object_store::path::Path::from(key), PutPayload::from(buf))
            .await
            .context("store put")?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<ByteStream> {
        let result = self
            .store
            .get(&object_store::path::Path::from(key))
            .await
            .context("store get")?;
        let stream = result.into_stream().map_err(std::io::Error::other);
        Ok(Box::new(StreamReader::new(stream)))
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    // Env mutation in one test body to avoid races between parallel tests.
    #[test]
    fn test_config_from_env() {
        std::env::remove_var("LFS_S3_ENDPOINT");
        std::env::remove_var("LFS_S3_BUCKET");
        std::env::remove_var("LFS_S3_REGION");
        std::env::remove_var("LFS_S3_SECURE");

        match StoreConfig::from_env() {
            Err(StoreConfigError::MissingEnv(key)) => assert_eq!(key, "LFS_S3_ENDPOINT"),
            other => panic!("expected missing endpoint, got {other:?}"),
        }

        std::env::set_var("LFS_S3_ENDPOINT", "localhost:9000");
        match StoreConfig::from_env() {
            Err(StoreConfigError::MissingEnv(key)) => assert_eq!(key, "LFS_S3_BUCKET"),
            other => panic!("expected missing bucket, got {other:?}"),
        }

        std::env::set_var("LFS_S3_BUCKET", "lfs");
        let config = StoreConfig::from_env().unwrap();
        assert_eq!(config.endpoint, "localhost:9000");
        assert_eq!(config.bucket, "lfs");
        assert_eq!(config.region, "us-east-1");
        assert!(config.secure);

        std::env::set_var("LFS_S3_SECURE", "0");
        let config = StoreConfig::from_env().unwrap();
        assert!(!config.secure);

        std::env::remove_var("LFS_S3_ENDPOINT");
        std::env::remove_var("LFS_S3_BUCKET");
        std::env::remove_var("LFS_S3_SECURE");
    }
}
