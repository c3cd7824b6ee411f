use async_trait::async_trait;
use s3::creds::Credentials;
use s3::error::S3Error;
use s3::{Bucket, Region};

/// Read access to the object store holding collection files.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Fetch an object's bytes. A missing key is `Ok(None)`, not an error,
    /// so callers can skip absent files without aborting the job.
    async fn fetch(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;
}

/// Client for S3-compatible object storage.
pub struct BucketClient {
    bucket: Box<Bucket>,
}

impl BucketClient {
    pub fn new(
        bucket_name: &str,
        endpoint: &str,
        region: &str,
        access_key: &str,
        secret_key: &str,
    ) -> Result<Self, StorageError> {
        let region = Region::Custom {
            region: region.to_string(),
            endpoint: endpoint.to_string(),
        };

        let credentials =
            Credentials::new(Some(access_key), Some(secret_key), None, None, None)
                .map_err(|e| StorageError::Config(e.to_string()))?;

        let bucket = Bucket::new(bucket_name, region, credentials)
            .map_err(|e| StorageError::Config(e.to_string()))?;

        Ok(Self { bucket })
    }
}

#[async_trait]
impl BlobStore for BucketClient {
    async fn fetch(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        match self.bucket.get_object(key).await {
            Ok(response) => match response.status_code() {
                200 => Ok(Some(response.to_vec())),
                404 => Ok(None),
                status => Err(StorageError::Status(status)),
            },
            Err(S3Error::HttpFailWithBody(404, _)) => Ok(None),
            Err(e) => Err(StorageError::S3(e)),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("S3 operation failed: {0}")]
    S3(#[from] s3::error::S3Error),

    #[error("Storage returned status {0}")]
    Status(u16),

    #[error("Storage configuration error: {0}")]
    Config(String),
}
