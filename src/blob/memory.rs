//! テスト用のインメモリブロブストア。

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use bytes::Bytes;

use super::BlobStore;

#[derive(Default)]
pub struct MemoryBlobStore {
    objects: Mutex<HashMap<String, (String, Bytes)>>,
}

impl MemoryBlobStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// 保存中のキー一覧（アサーション用）。
    pub fn keys(&self) -> Vec<String> {
        let objects = self.objects.lock().expect("objects lock");
        let mut keys: Vec<String> = objects.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn contains(&self, key: &str) -> bool {
        self.objects.lock().expect("objects lock").contains_key(key)
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, key: &str, bytes: Bytes, content_type: &str) -> Result<()> {
        let mut objects = self.objects.lock().expect("objects lock");
        objects.insert(key.to_string(), (content_type.to_string(), bytes));
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Bytes> {
        let objects = self.objects.lock().expect("objects lock");
        objects
            .get(key)
            .map(|(_, bytes)| bytes.clone())
            .ok_or_else(|| anyhow!("blob not found: {key}"))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut objects = self.objects.lock().expect("objects lock");
        objects.remove(key);
        Ok(())
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<()> {
        let mut objects = self.objects.lock().expect("objects lock");
        objects.retain(|key, _| !key.starts_with(prefix));
        Ok(())
    }

    async fn presign_get(&self, key: &str) -> Result<String> {
        Ok(format!("memory://{key}?presigned=1"))
    }

    fn public_url(&self, key: &str) -> String {
        format!("memory://{key}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_get_delete_round_trip() -> Result<()> {
        let store = MemoryBlobStore::new();
        store
            .put("jobs/x/original/a.jpg", Bytes::from_static(b"abc"), "image/jpeg")
            .await?;

        let bytes = store.get("jobs/x/original/a.jpg").await?;
        assert_eq!(&bytes[..], b"abc");

        store.delete("jobs/x/original/a.jpg").await?;
        assert!(store.get("jobs/x/original/a.jpg").await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn presigned_url_references_the_key() -> Result<()> {
        let store = MemoryBlobStore::new();
        store
            .put("jobs/x/original/a.jpg", Bytes::from_static(b"abc"), "image/jpeg")
            .await?;

        let url = store.presign_get("jobs/x/original/a.jpg").await?;
        assert!(url.contains("jobs/x/original/a.jpg"));
        Ok(())
    }

    #[tokio::test]
    async fn delete_prefix_clears_job_blobs() -> Result<()> {
        let store = MemoryBlobStore::new();
        store
            .put("jobs/x/original/a.jpg", Bytes::from_static(b"a"), "image/jpeg")
            .await?;
        store
            .put("jobs/x/enhanced/enhanced_a.jpg", Bytes::from_static(b"b"), "image/jpeg")
            .await?;
        store
            .put("jobs/y/original/c.jpg", Bytes::from_static(b"c"), "image/jpeg")
            .await?;

        store.delete_prefix("jobs/x/").await?;

        assert!(!store.contains("jobs/x/original/a.jpg"));
        assert!(!store.contains("jobs/x/enhanced/enhanced_a.jpg"));
        assert!(store.contains("jobs/y/original/c.jpg"));
        Ok(())
    }
}
