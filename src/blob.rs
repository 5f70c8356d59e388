//! コンテンツアドレスされたブロブストアへのアダプタ。
//!
//! オリジナルは `jobs/{job_id}/original/{filename}`、補正済みは
//! `jobs/{job_id}/enhanced/enhanced_{filename}` に置く。

pub mod memory;
pub mod s3;

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use uuid::Uuid;

pub use memory::MemoryBlobStore;
pub use s3::S3BlobStore;

/// put/get/delete/presign だけを公開する最小のストレージ面。
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, key: &str, bytes: Bytes, content_type: &str) -> Result<()>;

    async fn get(&self, key: &str) -> Result<Bytes>;

    async fn delete(&self, key: &str) -> Result<()>;

    /// プレフィックス配下のオブジェクトをすべて削除する。
    async fn delete_prefix(&self, prefix: &str) -> Result<()>;

    /// 期限付きの読み取り URL を発行する。
    async fn presign_get(&self, key: &str) -> Result<String>;

    /// ダッシュボードに埋め込む公開 URL。
    fn public_url(&self, key: &str) -> String;
}

/// ファイル名をキーに使える形へ正規化する。`[A-Za-z0-9.-]` 以外は `_` に置換。
#[must_use]
pub fn sanitize_filename(filename: &str) -> String {
    filename
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// ジョブ配下のすべてのブロブを束ねるプレフィックス。
#[must_use]
pub fn job_prefix(job_id: Uuid) -> String {
    format!("jobs/{job_id}/")
}

#[must_use]
pub fn original_key(job_id: Uuid, sanitized_filename: &str) -> String {
    format!("jobs/{job_id}/original/{sanitized_filename}")
}

#[must_use]
pub fn enhanced_key(job_id: Uuid, sanitized_filename: &str) -> String {
    format!("jobs/{job_id}/enhanced/enhanced_{sanitized_filename}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_keeps_safe_characters() {
        assert_eq!(sanitize_filename("IMG_0001.jpg"), "IMG_0001.jpg");
        assert_eq!(sanitize_filename("shot-2.heic"), "shot-2.heic");
    }

    #[test]
    fn sanitize_replaces_unsafe_characters() {
        assert_eq!(sanitize_filename("my photo (1).jpg"), "my_photo__1_.jpg");
        assert_eq!(sanitize_filename("日本語.png"), "___.png");
        assert_eq!(sanitize_filename("a/b\\c.jpg"), "a_b_c.jpg");
    }

    #[test]
    fn keys_are_scoped_under_job_prefix() {
        let job_id = Uuid::new_v4();
        let original = original_key(job_id, "a.jpg");
        let enhanced = enhanced_key(job_id, "a.jpg");
        let prefix = job_prefix(job_id);

        assert!(original.starts_with(&prefix));
        assert!(enhanced.starts_with(&prefix));
        assert!(enhanced.ends_with("enhanced/enhanced_a.jpg"));
    }
}
