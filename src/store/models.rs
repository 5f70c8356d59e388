//! ジョブ・メディア・バケット・対戦記録のエンティティ定義。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::util::elo::INITIAL_RATING;

/// ジョブの処理ステージ。
///
/// `uploading → extracting → labeling → clustering → merging → ranking →
/// enhancing → completed` の順に単調に進む。`failed` は任意の非終端状態から
/// 到達しうる。`completed` と `failed` が終端。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Uploading,
    Extracting,
    Labeling,
    Clustering,
    Merging,
    Ranking,
    Enhancing,
    Completed,
    Failed,
}

impl JobStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Uploading => "uploading",
            Self::Extracting => "extracting",
            Self::Labeling => "labeling",
            Self::Clustering => "clustering",
            Self::Merging => "merging",
            Self::Ranking => "ranking",
            Self::Enhancing => "enhancing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "uploading" => Some(Self::Uploading),
            "extracting" => Some(Self::Extracting),
            "labeling" => Some(Self::Labeling),
            "clustering" => Some(Self::Clustering),
            "merging" => Some(Self::Merging),
            "ranking" => Some(Self::Ranking),
            "enhancing" => Some(Self::Enhancing),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// メディア種別。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaType {
    Image,
    Video,
}

impl MediaType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Video => "video",
        }
    }

    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "image" => Some(Self::Image),
            "video" => Some(Self::Video),
            _ => None,
        }
    }
}

impl std::fmt::Display for MediaType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 1回のエンドツーエンド実行。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub name: Option<String>,
    pub status: JobStatus,
    pub total_files: i32,
    pub processed_files: i32,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    /// `uploading` 状態の新しいジョブを作成する。
    #[must_use]
    pub fn new(name: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name,
            status: JobStatus::Uploading,
            total_files: 0,
            processed_files: 0,
            error: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }
}

/// 取り込まれた1枚の写真または動画クリップ。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaFile {
    pub id: Uuid,
    pub job_id: Uuid,
    pub filename: String,
    pub original_path: String,
    pub blob_key: String,
    pub blob_url: String,
    pub media_type: MediaType,
    pub mime_type: String,
    pub size_bytes: i64,
    pub label: Option<String>,
    pub rating_score: f64,
    pub is_top_pick: bool,
    pub enhanced_blob_key: Option<String>,
    pub enhanced_blob_url: Option<String>,
    pub bucket_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl MediaFile {
    /// 展開直後の未注釈レコードを作成する。
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        job_id: Uuid,
        filename: impl Into<String>,
        original_path: impl Into<String>,
        blob_key: impl Into<String>,
        blob_url: impl Into<String>,
        media_type: MediaType,
        mime_type: impl Into<String>,
        size_bytes: i64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_id,
            filename: filename.into(),
            original_path: original_path.into(),
            blob_key: blob_key.into(),
            blob_url: blob_url.into(),
            media_type,
            mime_type: mime_type.into(),
            size_bytes,
            label: None,
            rating_score: INITIAL_RATING,
            is_top_pick: false,
            enhanced_blob_key: None,
            enhanced_blob_url: None,
            bucket_id: None,
            created_at: Utc::now(),
        }
    }
}

/// 同一テイクのグループ。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bucket {
    pub id: Uuid,
    pub job_id: Uuid,
    pub name: String,
    /// 埋め込みセントロイドの予約フィールド。現状どのステージも書き込まない。
    pub centroid: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Bucket {
    #[must_use]
    pub fn new(job_id: Uuid, name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_id,
            name: name.into(),
            centroid: None,
            created_at: Utc::now(),
        }
    }
}

/// 1回のペアワイズ品質判定の記録。作成後は不変。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TournamentMatch {
    pub id: Uuid,
    pub bucket_id: Uuid,
    pub media_type: MediaType,
    pub round: i32,
    pub media1_id: Uuid,
    pub media2_id: Uuid,
    pub winner_id: Uuid,
    pub reasoning: String,
    /// media1 に実際に適用されたレーティング変化。
    pub change1: f64,
    /// media2 に実際に適用されたレーティング変化。
    pub change2: f64,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_strings() {
        for status in [
            JobStatus::Uploading,
            JobStatus::Extracting,
            JobStatus::Labeling,
            JobStatus::Clustering,
            JobStatus::Merging,
            JobStatus::Ranking,
            JobStatus::Enhancing,
            JobStatus::Completed,
            JobStatus::Failed,
        ] {
            assert_eq!(JobStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(JobStatus::parse("bogus"), None);
    }

    #[test]
    fn only_completed_and_failed_are_terminal() {
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(!JobStatus::Uploading.is_terminal());
        assert!(!JobStatus::Ranking.is_terminal());
    }

    #[test]
    fn new_media_file_has_default_annotations() {
        let file = MediaFile::new(
            Uuid::new_v4(),
            "IMG_0001.jpg",
            "shoot/IMG_0001.jpg",
            "jobs/x/original/IMG_0001.jpg",
            "https://blobs.example/jobs/x/original/IMG_0001.jpg",
            MediaType::Image,
            "image/jpeg",
            1024,
        );

        assert_eq!(file.rating_score, INITIAL_RATING);
        assert!(!file.is_top_pick);
        assert!(file.label.is_none());
        assert!(file.bucket_id.is_none());
        assert!(file.enhanced_blob_key.is_none());
    }
}
