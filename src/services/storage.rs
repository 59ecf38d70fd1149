use async_trait::async_trait;
use dashmap::DashMap;
use s3::creds::Credentials;
use s3::{Bucket, Region};
use uuid::Uuid;

use crate::services::encryption::{EncryptionError, PhotoCipher};

/// Object key for a job's photo.
pub fn photo_key(job_id: Uuid) -> String {
    format!("scans/{}.img", job_id)
}

/// Blob storage for scan photos.
#[async_trait]
pub trait PhotoStore: Send + Sync {
    async fn put(&self, key: &str, photo: &[u8]) -> Result<(), StorageError>;

    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError>;

    async fn delete(&self, key: &str) -> Result<(), StorageError>;
}

/// Cloudflare R2 (S3-compatible) photo store that encrypts before upload.
pub struct R2PhotoStore {
    bucket: Box<Bucket>,
    cipher: PhotoCipher,
}

impl R2PhotoStore {
    pub fn new(
        bucket_name: &str,
        endpoint: &str,
        access_key: &str,
        secret_key: &str,
        cipher: PhotoCipher,
    ) -> Result<Self, StorageError> {
        let region = Region::Custom {
            region: "auto".to_string(),
            endpoint: endpoint.to_string(),
        };

        let credentials =
            Credentials::new(Some(access_key), Some(secret_key), None, None, None)
                .map_err(|e| StorageError::Config(e.to_string()))?;

        let bucket = Bucket::new(bucket_name, region, credentials)
            .map_err(|e| StorageError::Config(e.to_string()))?;

        Ok(Self { bucket, cipher })
    }
}

#[async_trait]
impl PhotoStore for R2PhotoStore {
    async fn put(&self, key: &str, photo: &[u8]) -> Result<(), StorageError> {
        let sealed = self.cipher.seal(key, photo)?;
        self.bucket
            .put_object_with_content_type(key, &sealed, "application/octet-stream")
            .await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let response = self.bucket.get_object(key).await?;
        if response.status_code() == 404 {
            return Err(StorageError::NotFound(key.to_string()));
        }
        let sealed = response.to_vec();
        Ok(self.cipher.open(key, &sealed)?)
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.bucket.delete_object(key).await?;
        Ok(())
    }
}

/// Process-local photo store for development and tests.
#[derive(Debug, Default)]
pub struct MemoryPhotoStore {
    objects: DashMap<String, Vec<u8>>,
}

impl MemoryPhotoStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.objects.contains_key(key)
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

#[async_trait]
impl PhotoStore for MemoryPhotoStore {
    async fn put(&self, key: &str, photo: &[u8]) -> Result<(), StorageError> {
        self.objects.insert(key.to_string(), photo.to_vec());
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        self.objects
            .get(key)
            .map(|photo| photo.clone())
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.objects.remove(key);
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("S3 operation failed: {0}")]
    S3(#[from] s3::error::S3Error),

    #[error("Storage configuration error: {0}")]
    Config(String),

    #[error("Photo not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Encryption(#[from] EncryptionError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_store_round_trip_and_delete() {
        let store = MemoryPhotoStore::new();
        let key = photo_key(Uuid::new_v4());

        store.put(&key, b"jpeg").await.unwrap();
        assert_eq!(store.get(&key).await.unwrap(), b"jpeg");

        store.delete(&key).await.unwrap();
        assert!(matches!(store.get(&key).await, Err(StorageError::NotFound(_))));
    }

    #[test]
    fn test_photo_key_layout() {
        let id = Uuid::nil();
        assert_eq!(photo_key(id), "scans/00000000-0000-0000-0000-000000000000.img");
    }
}
