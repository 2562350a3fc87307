//! S3/MinIO-compatible object storage client.
//!
//! Wraps `aws-sdk-s3` to provide the write-once blob store the ingest
//! gateway (C6) needs at `ingest/{device_id}/{batch_id}.json`. The gateway
//! never reads these objects back — the downstream processing worker and
//! the query-side read APIs (out of scope here) do that.

use anyhow::{Context, Result};
use aws_sdk_s3::{
    config::{Builder as S3Builder, Credentials, Region},
    primitives::ByteStream,
    Client,
};
use async_trait::async_trait;

use crowdpm_common::error::{CrowdpmError, CrowdpmResult};
use crowdpm_common::ports::BlobStore;

use crate::deadline::{with_deadline, INGEST_CALL_TIMEOUT};
use crate::retry::with_backoff;

/// Storage configuration (loaded from app config).
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// MinIO / S3 endpoint URL (e.g. `http://localhost:9000`).
    pub endpoint: String,
    pub access_key: String,
    pub secret_key: String,
    pub bucket: String,
    /// Region (use `us-east-1` for MinIO).
    pub region: String,
}

/// S3/MinIO storage client — wraps the AWS SDK.
#[derive(Clone)]
pub struct StorageClient {
    inner: Client,
    bucket: String,
}

impl StorageClient {
    /// Initialise client from config.
    pub fn new(cfg: &StorageConfig) -> Result<Self> {
        let creds = Credentials::new(&cfg.access_key, &cfg.secret_key, None, None, "crowdpm-storage");

        let s3_cfg = S3Builder::new()
            .endpoint_url(&cfg.endpoint)
            .credentials_provider(creds)
            .region(Region::new(cfg.region.clone()))
            // Force path-style URLs (required for MinIO).
            .force_path_style(true)
            .build();

        Ok(Self { inner: Client::from_conf(s3_cfg), bucket: cfg.bucket.clone() })
    }

    /// Upload bytes to the given key.
    pub async fn put_object(&self, key: &str, data: Vec<u8>, content_type: &str) -> Result<()> {
        self.inner
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .body(ByteStream::from(data))
            .send()
            .await
            .with_context(|| format!("failed to upload {key} to object storage"))?;
        Ok(())
    }

    /// Ensure the bucket exists; create it if absent. Run once at startup,
    /// not on the ingest hot path — mirrors spec.md §9's guidance to move
    /// emulator/bucket auto-creation out of request handling.
    pub async fn ensure_bucket(&self) -> Result<()> {
        match self.inner.head_bucket().bucket(&self.bucket).send().await {
            Ok(_) => {
                tracing::debug!(bucket = %self.bucket, "bucket already exists");
                Ok(())
            }
            Err(_) => {
                tracing::info!(bucket = %self.bucket, "bucket does not exist, creating");
                self.inner
                    .create_bucket()
                    .bucket(&self.bucket)
                    .send()
                    .await
                    .context("failed to create object storage bucket")?;
                Ok(())
            }
        }
    }
}

#[async_trait]
impl BlobStore for StorageClient {
    async fn put_object(&self, path: &str, content_type: &str, bytes: &[u8]) -> CrowdpmResult<()> {
        with_deadline(INGEST_CALL_TIMEOUT, "blob_store.put_object", async {
            with_backoff("blob_store.put_object", || {
                let data = bytes.to_vec();
                async move { StorageClient::put_object(self, path, data, content_type).await }
            })
            .await
            .map_err(|e| CrowdpmError::StorageError(e.to_string()))
        })
        .await
    }
}
