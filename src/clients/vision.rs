//! マルチモーダルモデルプロバイダへのクライアント。
//!
//! パイプラインが必要とする論理呼び出しは5つ：説明生成（describe）、
//! 同一テイク判定（same_take）、品質比較（compare_quality）、
//! 画像補正（enhance）、バケット命名（name_group）。

pub mod client;
pub mod models;
pub mod prompts;

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;

use crate::store::models::MediaType;

pub use client::VisionClient;
pub use models::QualityVerdict;

/// モデルに渡すメディア1件分のペイロード。
#[derive(Debug, Clone, Copy)]
pub struct MediaInput<'a> {
    pub bytes: &'a [u8],
    pub mime_type: &'a str,
}

impl<'a> MediaInput<'a> {
    #[must_use]
    pub fn new(bytes: &'a [u8], mime_type: &'a str) -> Self {
        Self { bytes, mime_type }
    }
}

/// モデルプロバイダの論理呼び出し面。
///
/// 実装はリトライとタイムアウトを内包する。テストはスクリプト化した
/// フェイクを差し込む。
#[async_trait]
pub trait ModelAdapter: Send + Sync {
    /// 1文の説明文を返す。
    async fn describe(&self, media: MediaInput<'_>) -> Result<String>;

    /// 2枚が同一テイクかどうかを判定する。
    async fn same_take(&self, a: MediaInput<'_>, b: MediaInput<'_>) -> Result<bool>;

    /// 2つのメディアの品質を比較する。
    async fn compare_quality(
        &self,
        media_type: MediaType,
        a: MediaInput<'_>,
        b: MediaInput<'_>,
    ) -> Result<QualityVerdict>;

    /// 補正済み画像バイトを返す。モデルが画像を返さなかった場合は None。
    async fn enhance(&self, media: MediaInput<'_>) -> Result<Option<Bytes>>;

    /// メンバーの説明文からグループ名（2〜4語）を生成する。
    async fn name_group(&self, labels: &[String]) -> Result<String>;
}
