//! レコードストアへの唯一のアクセス面。
//!
//! すべての永続化はこのトレイトを経由する。本番実装は
//! [`super::postgres::PgCullDao`]、テストは [`super::memory::MemoryDao`] を使う。

use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

use crate::store::models::{Bucket, Job, JobStatus, MediaFile, TournamentMatch};

#[async_trait]
pub trait CullDao: Send + Sync {
    // --- jobs ---

    async fn insert_job(&self, job: &Job) -> Result<()>;

    async fn get_job(&self, id: Uuid) -> Result<Option<Job>>;

    /// 作成日時の降順でページングする。
    async fn list_jobs(&self, limit: i64, offset: i64) -> Result<Vec<Job>>;

    async fn count_jobs(&self) -> Result<i64>;

    /// ステータスを更新する。`completed` への遷移では `completed_at` も打刻する。
    async fn update_job_status(&self, id: Uuid, status: JobStatus) -> Result<()>;

    /// 次のステージへ進め、進捗カウンタをリセットする。
    async fn advance_job_stage(&self, id: Uuid, status: JobStatus) -> Result<()>;

    async fn mark_job_failed(&self, id: Uuid, message: &str) -> Result<()>;

    async fn set_job_progress(&self, id: Uuid, processed: i32, total: i32) -> Result<()>;

    async fn increment_processed_files(&self, id: Uuid) -> Result<()>;

    /// 終端状態（completed / failed）以外のジョブをすべて返す。起動時リカバリ用。
    async fn list_unfinished_jobs(&self) -> Result<Vec<Job>>;

    /// ジョブと配下のレコードを削除する。存在しなかった場合は false。
    async fn delete_job(&self, id: Uuid) -> Result<bool>;

    // --- media files ---

    async fn insert_media_file(&self, file: &MediaFile) -> Result<()>;

    /// アーカイブ内の出現順で返す。
    async fn list_media_files(&self, job_id: Uuid) -> Result<Vec<MediaFile>>;

    async fn set_media_label(&self, id: Uuid, label: &str) -> Result<()>;

    /// 複数メディアのバケット割り当てを一括更新する。
    async fn assign_bucket(&self, media_ids: &[Uuid], bucket_id: Uuid) -> Result<()>;

    async fn update_rating(&self, id: Uuid, rating: f64) -> Result<()>;

    async fn set_top_pick(&self, id: Uuid, is_top_pick: bool) -> Result<()>;

    async fn set_enhanced(&self, id: Uuid, blob_key: &str, blob_url: &str) -> Result<()>;

    // --- buckets ---

    async fn insert_bucket(&self, bucket: &Bucket) -> Result<()>;

    async fn list_buckets(&self, job_id: Uuid) -> Result<Vec<Bucket>>;

    /// マージ確定後にモデル生成の名前を与える。
    async fn rename_bucket(&self, id: Uuid, name: &str) -> Result<()>;

    /// マージで畳まれた空バケットを削除する。
    async fn delete_buckets(&self, ids: &[Uuid]) -> Result<()>;

    // --- tournament matches ---

    async fn insert_match(&self, record: &TournamentMatch) -> Result<()>;

    async fn list_matches(&self, bucket_id: Uuid) -> Result<Vec<TournamentMatch>>;

    async fn list_matches_for_job(&self, job_id: Uuid) -> Result<Vec<TournamentMatch>>;
}
