//! S3 互換ストア実装。
//!
//! パススタイルアドレッシングで Cloudflare R2 形式のエンドポイントにも
//! そのまま接続できる。一時的な失敗は Full Jitter バックオフで再試行する。

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use bytes::Bytes;
use tracing::warn;

use crate::config::Config;
use crate::util::retry::RetryConfig;

use super::BlobStore;

pub struct S3BlobStore {
    client: Client,
    bucket: String,
    endpoint: String,
    public_base_url: Option<String>,
    presign_ttl: std::time::Duration,
    retry: RetryConfig,
}

impl S3BlobStore {
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        let credentials = Credentials::new(
            config.blob_access_key_id(),
            config.blob_secret_access_key(),
            None,
            None,
            "cull-worker",
        );

        let s3_config = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(config.blob_region().to_string()))
            .endpoint_url(config.blob_endpoint())
            .credentials_provider(credentials)
            .force_path_style(true)
            .build();

        Self {
            client: Client::from_conf(s3_config),
            bucket: config.blob_bucket().to_string(),
            endpoint: config.blob_endpoint().trim_end_matches('/').to_string(),
            public_base_url: config
                .blob_public_base_url()
                .map(|url| url.trim_end_matches('/').to_string()),
            presign_ttl: config.presign_ttl(),
            retry: RetryConfig::new(
                config.model_max_retries(),
                config.model_backoff_base_ms(),
                config.model_backoff_cap_ms(),
            ),
        }
    }

    /// ネットワーク起因の失敗のみ再試行対象とする。
    fn is_transient<E, R>(error: &SdkError<E, R>) -> bool {
        matches!(
            error,
            SdkError::DispatchFailure(_) | SdkError::TimeoutError(_) | SdkError::ResponseError(_)
        )
    }

    async fn put_once(&self, key: &str, bytes: Bytes, content_type: &str) -> Result<bool> {
        match self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .body(ByteStream::from(bytes.to_vec()))
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(error) if Self::is_transient(&error) => {
                warn!(key, error = %error, "transient blob put failure");
                Ok(false)
            }
            Err(error) => Err(anyhow!(error).context(format!("failed to put blob {key}"))),
        }
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    async fn put(&self, key: &str, bytes: Bytes, content_type: &str) -> Result<()> {
        let mut attempt = 0;
        loop {
            if self.put_once(key, bytes.clone(), content_type).await? {
                return Ok(());
            }
            attempt += 1;
            if !self.retry.can_retry(attempt) {
                return Err(anyhow!("blob put exhausted retries for key {key}"));
            }
            tokio::time::sleep(self.retry.delay_for_attempt(attempt)).await;
        }
    }

    async fn get(&self, key: &str) -> Result<Bytes> {
        let mut attempt = 0;
        loop {
            match self
                .client
                .get_object()
                .bucket(&self.bucket)
                .key(key)
                .send()
                .await
            {
                Ok(output) => {
                    let data = output
                        .body
                        .collect()
                        .await
                        .with_context(|| format!("failed to read blob body for {key}"))?;
                    return Ok(data.into_bytes());
                }
                Err(error) if Self::is_transient(&error) => {
                    attempt += 1;
                    if !self.retry.can_retry(attempt) {
                        return Err(
                            anyhow!(error).context(format!("blob get exhausted retries for {key}"))
                        );
                    }
                    warn!(key, attempt, "transient blob get failure, retrying");
                    tokio::time::sleep(self.retry.delay_for_attempt(attempt)).await;
                }
                Err(error) => {
                    return Err(anyhow!(error).context(format!("failed to get blob {key}")));
                }
            }
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|error| anyhow!(error).context(format!("failed to delete blob {key}")))?;

        Ok(())
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<()> {
        let mut continuation: Option<String> = None;

        loop {
            let mut request = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(prefix);
            if let Some(token) = continuation.take() {
                request = request.continuation_token(token);
            }

            let page = request.send().await.map_err(|error| {
                anyhow!(error).context(format!("failed to list blobs under {prefix}"))
            })?;

            for object in page.contents() {
                if let Some(key) = object.key() {
                    self.delete(key).await?;
                }
            }

            match page.next_continuation_token() {
                Some(token) => continuation = Some(token.to_string()),
                None => break,
            }
        }

        Ok(())
    }

    async fn presign_get(&self, key: &str) -> Result<String> {
        let presigning = PresigningConfig::expires_in(self.presign_ttl)
            .context("invalid presign expiration")?;

        let presigned = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(presigning)
            .await
            .map_err(|error| anyhow!(error).context(format!("failed to presign blob {key}")))?;

        Ok(presigned.uri().to_string())
    }

    fn public_url(&self, key: &str) -> String {
        match &self.public_base_url {
            Some(base) => format!("{base}/{key}"),
            // 公開ベース未設定時はパススタイルの直接URLにフォールバック
            None => format!("{}/{}/{key}", self.endpoint, self.bucket),
        }
    }
}
