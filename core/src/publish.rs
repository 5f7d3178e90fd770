use std::path::Path;
use tracing::{info, warn};

use crate::cloud::ObjectStore;
use crate::errors::S3Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BucketOutcome {
    AlreadyExists,
    Created,
}

/// Puts archives where the stack can read them.
pub struct ArtifactPublisher<'a> {
    store: &'a dyn ObjectStore,
}

impl<'a> ArtifactPublisher<'a> {
    pub fn new(store: &'a dyn ObjectStore) -> Self {
        Self { store }
    }

    /// Creates `bucket` unless it already exists. `location_constraint` is
    /// `None` for the default region.
    pub async fn ensure_bucket(
        &self,
        bucket: &str,
        location_constraint: Option<String>,
    ) -> Result<BucketOutcome, S3Error> {
        if self.store.bucket_exists(bucket).await {
            info!("S3 bucket '{}' exists and is accessible", bucket);
            return Ok(BucketOutcome::AlreadyExists);
        }

        info!(
            "Creating S3 bucket '{}'{}",
            bucket,
            location_constraint
                .as_deref()
                .map(|region| format!(" in {region}"))
                .unwrap_or_default()
        );
        match self.store.create_bucket(bucket, location_constraint).await {
            Ok(()) => Ok(BucketOutcome::Created),
            Err(e) if e.code.as_deref() == Some("BucketAlreadyOwnedByYou") => {
                warn!("Bucket '{}' was already ours, reusing it", bucket);
                Ok(BucketOutcome::AlreadyExists)
            }
            Err(e) => Err(S3Error::BucketCreation {
                bucket: bucket.to_string(),
                reason: e.to_string(),
            }),
        }
    }

    /// Overwrites `s3://bucket/key` with the archive.
    pub async fn upload(&self, archive: &Path, bucket: &str, key: &str) -> Result<(), S3Error> {
        self.store
            .put_object(bucket, key, archive)
            .await
            .map_err(|e| S3Error::Upload {
                bucket: bucket.to_string(),
                key: key.to_string(),
                reason: e.to_string(),
            })?;

        info!("Uploaded {} to s3://{}/{}", archive.display(), bucket, key);
        Ok(())
    }

    pub async fn remove(&self, bucket: &str, key: &str) -> Result<(), S3Error> {
        self.store
            .delete_object(bucket, key)
            .await
            .map_err(|e| S3Error::Delete {
                bucket: bucket.to_string(),
                key: key.to_string(),
                reason: e.to_string(),
            })?;
        info!("Deleted s3://{}/{}", bucket, key);
        Ok(())
    }

    pub async fn remove_bucket(&self, bucket: &str) -> Result<(), S3Error> {
        self.store
            .delete_bucket(bucket)
            .await
            .map_err(|e| S3Error::BucketDeletion {
                bucket: bucket.to_string(),
                reason: e.to_string(),
            })?;
        info!("Deleted bucket '{}'", bucket);
        Ok(())
    }
}
