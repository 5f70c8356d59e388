//! インメモリ実装。
//!
//! 結合テストとローカル実験用。挿入順を保持し、Postgres 実装と同じ
//! 可視順序（ジョブは作成日時降順、メディアはアーカイブ順）を再現する。

use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::store::models::{Bucket, Job, JobStatus, MediaFile, TournamentMatch};

use super::dao_trait::CullDao;

#[derive(Default)]
struct State {
    jobs: Vec<Job>,
    media_files: Vec<MediaFile>,
    buckets: Vec<Bucket>,
    matches: Vec<TournamentMatch>,
}

#[derive(Default)]
pub struct MemoryDao {
    state: Mutex<State>,
}

impl MemoryDao {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CullDao for MemoryDao {
    async fn insert_job(&self, job: &Job) -> Result<()> {
        let mut state = self.state.lock().expect("state lock");
        state.jobs.push(job.clone());
        Ok(())
    }

    async fn get_job(&self, id: Uuid) -> Result<Option<Job>> {
        let state = self.state.lock().expect("state lock");
        Ok(state.jobs.iter().find(|j| j.id == id).cloned())
    }

    async fn list_jobs(&self, limit: i64, offset: i64) -> Result<Vec<Job>> {
        let state = self.state.lock().expect("state lock");
        let mut jobs = state.jobs.clone();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(jobs
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn count_jobs(&self) -> Result<i64> {
        let state = self.state.lock().expect("state lock");
        Ok(state.jobs.len() as i64)
    }

    async fn update_job_status(&self, id: Uuid, status: JobStatus) -> Result<()> {
        let mut state = self.state.lock().expect("state lock");
        if let Some(job) = state.jobs.iter_mut().find(|j| j.id == id) {
            job.status = status;
            job.updated_at = Utc::now();
            if status == JobStatus::Completed && job.completed_at.is_none() {
                job.completed_at = Some(Utc::now());
            }
        }
        Ok(())
    }

    async fn advance_job_stage(&self, id: Uuid, status: JobStatus) -> Result<()> {
        let mut state = self.state.lock().expect("state lock");
        if let Some(job) = state.jobs.iter_mut().find(|j| j.id == id) {
            job.status = status;
            job.processed_files = 0;
            job.updated_at = Utc::now();
            if status == JobStatus::Completed && job.completed_at.is_none() {
                job.completed_at = Some(Utc::now());
            }
        }
        Ok(())
    }

    async fn mark_job_failed(&self, id: Uuid, message: &str) -> Result<()> {
        let mut state = self.state.lock().expect("state lock");
        if let Some(job) = state.jobs.iter_mut().find(|j| j.id == id) {
            job.status = JobStatus::Failed;
            job.error = Some(message.to_string());
            job.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn set_job_progress(&self, id: Uuid, processed: i32, total: i32) -> Result<()> {
        let mut state = self.state.lock().expect("state lock");
        if let Some(job) = state.jobs.iter_mut().find(|j| j.id == id) {
            job.processed_files = processed;
            job.total_files = total;
            job.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn increment_processed_files(&self, id: Uuid) -> Result<()> {
        let mut state = self.state.lock().expect("state lock");
        if let Some(job) = state.jobs.iter_mut().find(|j| j.id == id) {
            job.processed_files = (job.processed_files + 1).min(job.total_files);
            job.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn list_unfinished_jobs(&self) -> Result<Vec<Job>> {
        let state = self.state.lock().expect("state lock");
        Ok(state
            .jobs
            .iter()
            .filter(|j| !j.status.is_terminal())
            .cloned()
            .collect())
    }

    async fn delete_job(&self, id: Uuid) -> Result<bool> {
        let mut state = self.state.lock().expect("state lock");
        let existed = state.jobs.iter().any(|j| j.id == id);
        if !existed {
            return Ok(false);
        }

        let bucket_ids: Vec<Uuid> = state
            .buckets
            .iter()
            .filter(|b| b.job_id == id)
            .map(|b| b.id)
            .collect();

        state.jobs.retain(|j| j.id != id);
        state.media_files.retain(|f| f.job_id != id);
        state.buckets.retain(|b| b.job_id != id);
        state.matches.retain(|m| !bucket_ids.contains(&m.bucket_id));

        Ok(true)
    }

    async fn insert_media_file(&self, file: &MediaFile) -> Result<()> {
        let mut state = self.state.lock().expect("state lock");
        state.media_files.push(file.clone());
        Ok(())
    }

    async fn list_media_files(&self, job_id: Uuid) -> Result<Vec<MediaFile>> {
        let state = self.state.lock().expect("state lock");
        Ok(state
            .media_files
            .iter()
            .filter(|f| f.job_id == job_id)
            .cloned()
            .collect())
    }

    async fn set_media_label(&self, id: Uuid, label: &str) -> Result<()> {
        let mut state = self.state.lock().expect("state lock");
        if let Some(file) = state.media_files.iter_mut().find(|f| f.id == id) {
            file.label = Some(label.to_string());
        }
        Ok(())
    }

    async fn assign_bucket(&self, media_ids: &[Uuid], bucket_id: Uuid) -> Result<()> {
        let mut state = self.state.lock().expect("state lock");
        for file in &mut state.media_files {
            if media_ids.contains(&file.id) {
                file.bucket_id = Some(bucket_id);
            }
        }
        Ok(())
    }

    async fn update_rating(&self, id: Uuid, rating: f64) -> Result<()> {
        let mut state = self.state.lock().expect("state lock");
        if let Some(file) = state.media_files.iter_mut().find(|f| f.id == id) {
            file.rating_score = rating;
        }
        Ok(())
    }

    async fn set_top_pick(&self, id: Uuid, is_top_pick: bool) -> Result<()> {
        let mut state = self.state.lock().expect("state lock");
        if let Some(file) = state.media_files.iter_mut().find(|f| f.id == id) {
            file.is_top_pick = is_top_pick;
        }
        Ok(())
    }

    async fn set_enhanced(&self, id: Uuid, blob_key: &str, blob_url: &str) -> Result<()> {
        let mut state = self.state.lock().expect("state lock");
        if let Some(file) = state.media_files.iter_mut().find(|f| f.id == id) {
            file.enhanced_blob_key = Some(blob_key.to_string());
            file.enhanced_blob_url = Some(blob_url.to_string());
        }
        Ok(())
    }

    async fn insert_bucket(&self, bucket: &Bucket) -> Result<()> {
        let mut state = self.state.lock().expect("state lock");
        state.buckets.push(bucket.clone());
        Ok(())
    }

    async fn list_buckets(&self, job_id: Uuid) -> Result<Vec<Bucket>> {
        let state = self.state.lock().expect("state lock");
        Ok(state
            .buckets
            .iter()
            .filter(|b| b.job_id == job_id)
            .cloned()
            .collect())
    }

    async fn rename_bucket(&self, id: Uuid, name: &str) -> Result<()> {
        let mut state = self.state.lock().expect("state lock");
        if let Some(bucket) = state.buckets.iter_mut().find(|b| b.id == id) {
            bucket.name = name.to_string();
        }
        Ok(())
    }

    async fn delete_buckets(&self, ids: &[Uuid]) -> Result<()> {
        let mut state = self.state.lock().expect("state lock");
        state.buckets.retain(|b| !ids.contains(&b.id));
        Ok(())
    }

    async fn insert_match(&self, record: &TournamentMatch) -> Result<()> {
        let mut state = self.state.lock().expect("state lock");
        state.matches.push(record.clone());
        Ok(())
    }

    async fn list_matches(&self, bucket_id: Uuid) -> Result<Vec<TournamentMatch>> {
        let state = self.state.lock().expect("state lock");
        Ok(state
            .matches
            .iter()
            .filter(|m| m.bucket_id == bucket_id)
            .cloned()
            .collect())
    }

    async fn list_matches_for_job(&self, job_id: Uuid) -> Result<Vec<TournamentMatch>> {
        let state = self.state.lock().expect("state lock");
        let bucket_ids: Vec<Uuid> = state
            .buckets
            .iter()
            .filter(|b| b.job_id == job_id)
            .map(|b| b.id)
            .collect();
        Ok(state
            .matches
            .iter()
            .filter(|m| bucket_ids.contains(&m.bucket_id))
            .cloned()
            .collect())
    }
}
