//! PostgreSQL 実装。
//!
//! クエリはすべて実行時バインドで発行し、行は `try_get` でマップする。

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::store::models::{Bucket, Job, JobStatus, MediaFile, MediaType, TournamentMatch};

use super::dao_trait::CullDao;

pub struct PgCullDao {
    pool: PgPool,
}

impl PgCullDao {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn job_from_row(row: &PgRow) -> Result<Job> {
    let status_raw: String = row.try_get("status").context("jobs.status")?;
    let status = JobStatus::parse(&status_raw)
        .ok_or_else(|| anyhow!("unknown job status in database: {status_raw}"))?;

    Ok(Job {
        id: row.try_get("id").context("jobs.id")?,
        name: row.try_get("name").context("jobs.name")?,
        status,
        total_files: row.try_get("total_files").context("jobs.total_files")?,
        processed_files: row
            .try_get("processed_files")
            .context("jobs.processed_files")?,
        error: row.try_get("error").context("jobs.error")?,
        created_at: row.try_get("created_at").context("jobs.created_at")?,
        updated_at: row.try_get("updated_at").context("jobs.updated_at")?,
        completed_at: row.try_get("completed_at").context("jobs.completed_at")?,
    })
}

fn media_file_from_row(row: &PgRow) -> Result<MediaFile> {
    let media_type_raw: String = row.try_get("media_type").context("media_files.media_type")?;
    let media_type = MediaType::parse(&media_type_raw)
        .ok_or_else(|| anyhow!("unknown media type in database: {media_type_raw}"))?;

    Ok(MediaFile {
        id: row.try_get("id")?,
        job_id: row.try_get("job_id")?,
        filename: row.try_get("filename")?,
        original_path: row.try_get("original_path")?,
        blob_key: row.try_get("blob_key")?,
        blob_url: row.try_get("blob_url")?,
        media_type,
        mime_type: row.try_get("mime_type")?,
        size_bytes: row.try_get("size_bytes")?,
        label: row.try_get("label")?,
        rating_score: row.try_get("rating_score")?,
        is_top_pick: row.try_get("is_top_pick")?,
        enhanced_blob_key: row.try_get("enhanced_blob_key")?,
        enhanced_blob_url: row.try_get("enhanced_blob_url")?,
        bucket_id: row.try_get("bucket_id")?,
        created_at: row.try_get("created_at")?,
    })
}

fn bucket_from_row(row: &PgRow) -> Result<Bucket> {
    Ok(Bucket {
        id: row.try_get("id")?,
        job_id: row.try_get("job_id")?,
        name: row.try_get("name")?,
        centroid: row.try_get("centroid")?,
        created_at: row.try_get("created_at")?,
    })
}

fn match_from_row(row: &PgRow) -> Result<TournamentMatch> {
    let media_type_raw: String = row.try_get("media_type")?;
    let media_type = MediaType::parse(&media_type_raw)
        .ok_or_else(|| anyhow!("unknown media type in database: {media_type_raw}"))?;

    Ok(TournamentMatch {
        id: row.try_get("id")?,
        bucket_id: row.try_get("bucket_id")?,
        media_type,
        round: row.try_get("round")?,
        media1_id: row.try_get("media1_id")?,
        media2_id: row.try_get("media2_id")?,
        winner_id: row.try_get("winner_id")?,
        reasoning: row.try_get("reasoning")?,
        change1: row.try_get("change1")?,
        change2: row.try_get("change2")?,
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait]
impl CullDao for PgCullDao {
    async fn insert_job(&self, job: &Job) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO jobs (id, name, status, total_files, processed_files, error,
                              created_at, updated_at, completed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ",
        )
        .bind(job.id)
        .bind(&job.name)
        .bind(job.status.as_str())
        .bind(job.total_files)
        .bind(job.processed_files)
        .bind(&job.error)
        .bind(job.created_at)
        .bind(job.updated_at)
        .bind(job.completed_at)
        .execute(&self.pool)
        .await
        .context("failed to insert job")?;

        Ok(())
    }

    async fn get_job(&self, id: Uuid) -> Result<Option<Job>> {
        let row = sqlx::query("SELECT * FROM jobs WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("failed to fetch job")?;

        row.as_ref().map(job_from_row).transpose()
    }

    async fn list_jobs(&self, limit: i64, offset: i64) -> Result<Vec<Job>> {
        let rows = sqlx::query(
            "SELECT * FROM jobs ORDER BY created_at DESC, id DESC LIMIT $1 OFFSET $2",
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .context("failed to list jobs")?;

        rows.iter().map(job_from_row).collect()
    }

    async fn count_jobs(&self) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS count FROM jobs")
            .fetch_one(&self.pool)
            .await
            .context("failed to count jobs")?;

        row.try_get("count").context("jobs count")
    }

    async fn update_job_status(&self, id: Uuid, status: JobStatus) -> Result<()> {
        let completed_at: Option<DateTime<Utc>> =
            (status == JobStatus::Completed).then(Utc::now);

        sqlx::query(
            r"
            UPDATE jobs
            SET status = $2,
                completed_at = COALESCE($3, completed_at),
                updated_at = NOW()
            WHERE id = $1
            ",
        )
        .bind(id)
        .bind(status.as_str())
        .bind(completed_at)
        .execute(&self.pool)
        .await
        .context("failed to update job status")?;

        Ok(())
    }

    async fn advance_job_stage(&self, id: Uuid, status: JobStatus) -> Result<()> {
        let completed_at: Option<DateTime<Utc>> =
            (status == JobStatus::Completed).then(Utc::now);

        sqlx::query(
            r"
            UPDATE jobs
            SET status = $2,
                processed_files = 0,
                completed_at = COALESCE($3, completed_at),
                updated_at = NOW()
            WHERE id = $1
            ",
        )
        .bind(id)
        .bind(status.as_str())
        .bind(completed_at)
        .execute(&self.pool)
        .await
        .context("failed to advance job stage")?;

        Ok(())
    }

    async fn mark_job_failed(&self, id: Uuid, message: &str) -> Result<()> {
        sqlx::query(
            r"
            UPDATE jobs
            SET status = 'failed',
                error = $2,
                updated_at = NOW()
            WHERE id = $1
            ",
        )
        .bind(id)
        .bind(message)
        .execute(&self.pool)
        .await
        .context("failed to mark job failed")?;

        Ok(())
    }

    async fn set_job_progress(&self, id: Uuid, processed: i32, total: i32) -> Result<()> {
        sqlx::query(
            r"
            UPDATE jobs
            SET processed_files = $2,
                total_files = $3,
                updated_at = NOW()
            WHERE id = $1
            ",
        )
        .bind(id)
        .bind(processed)
        .bind(total)
        .execute(&self.pool)
        .await
        .context("failed to set job progress")?;

        Ok(())
    }

    async fn increment_processed_files(&self, id: Uuid) -> Result<()> {
        sqlx::query(
            r"
            UPDATE jobs
            SET processed_files = LEAST(processed_files + 1, total_files),
                updated_at = NOW()
            WHERE id = $1
            ",
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .context("failed to increment processed files")?;

        Ok(())
    }

    async fn list_unfinished_jobs(&self) -> Result<Vec<Job>> {
        let rows = sqlx::query(
            r"
            SELECT * FROM jobs
            WHERE status NOT IN ('completed', 'failed')
            ORDER BY created_at ASC
            ",
        )
        .fetch_all(&self.pool)
        .await
        .context("failed to list unfinished jobs")?;

        rows.iter().map(job_from_row).collect()
    }

    async fn delete_job(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM jobs WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .context("failed to delete job")?;

        Ok(result.rows_affected() > 0)
    }

    async fn insert_media_file(&self, file: &MediaFile) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO media_files (id, job_id, filename, original_path, blob_key, blob_url,
                                     media_type, mime_type, size_bytes, label, rating_score,
                                     is_top_pick, enhanced_blob_key, enhanced_blob_url,
                                     bucket_id, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            ",
        )
        .bind(file.id)
        .bind(file.job_id)
        .bind(&file.filename)
        .bind(&file.original_path)
        .bind(&file.blob_key)
        .bind(&file.blob_url)
        .bind(file.media_type.as_str())
        .bind(&file.mime_type)
        .bind(file.size_bytes)
        .bind(&file.label)
        .bind(file.rating_score)
        .bind(file.is_top_pick)
        .bind(&file.enhanced_blob_key)
        .bind(&file.enhanced_blob_url)
        .bind(file.bucket_id)
        .bind(file.created_at)
        .execute(&self.pool)
        .await
        .context("failed to insert media file")?;

        Ok(())
    }

    async fn list_media_files(&self, job_id: Uuid) -> Result<Vec<MediaFile>> {
        let rows = sqlx::query("SELECT * FROM media_files WHERE job_id = $1 ORDER BY seq ASC")
            .bind(job_id)
            .fetch_all(&self.pool)
            .await
            .context("failed to list media files")?;

        rows.iter().map(media_file_from_row).collect()
    }

    async fn set_media_label(&self, id: Uuid, label: &str) -> Result<()> {
        sqlx::query("UPDATE media_files SET label = $2 WHERE id = $1")
            .bind(id)
            .bind(label)
            .execute(&self.pool)
            .await
            .context("failed to set media label")?;

        Ok(())
    }

    async fn assign_bucket(&self, media_ids: &[Uuid], bucket_id: Uuid) -> Result<()> {
        sqlx::query("UPDATE media_files SET bucket_id = $2 WHERE id = ANY($1)")
            .bind(media_ids)
            .bind(bucket_id)
            .execute(&self.pool)
            .await
            .context("failed to assign bucket")?;

        Ok(())
    }

    async fn update_rating(&self, id: Uuid, rating: f64) -> Result<()> {
        sqlx::query("UPDATE media_files SET rating_score = $2 WHERE id = $1")
            .bind(id)
            .bind(rating)
            .execute(&self.pool)
            .await
            .context("failed to update rating")?;

        Ok(())
    }

    async fn set_top_pick(&self, id: Uuid, is_top_pick: bool) -> Result<()> {
        sqlx::query("UPDATE media_files SET is_top_pick = $2 WHERE id = $1")
            .bind(id)
            .bind(is_top_pick)
            .execute(&self.pool)
            .await
            .context("failed to set top pick")?;

        Ok(())
    }

    async fn set_enhanced(&self, id: Uuid, blob_key: &str, blob_url: &str) -> Result<()> {
        sqlx::query(
            "UPDATE media_files SET enhanced_blob_key = $2, enhanced_blob_url = $3 WHERE id = $1",
        )
        .bind(id)
        .bind(blob_key)
        .bind(blob_url)
        .execute(&self.pool)
        .await
        .context("failed to set enhanced blob")?;

        Ok(())
    }

    async fn insert_bucket(&self, bucket: &Bucket) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO buckets (id, job_id, name, centroid, created_at)
            VALUES ($1, $2, $3, $4, $5)
            ",
        )
        .bind(bucket.id)
        .bind(bucket.job_id)
        .bind(&bucket.name)
        .bind(&bucket.centroid)
        .bind(bucket.created_at)
        .execute(&self.pool)
        .await
        .context("failed to insert bucket")?;

        Ok(())
    }

    async fn list_buckets(&self, job_id: Uuid) -> Result<Vec<Bucket>> {
        let rows = sqlx::query("SELECT * FROM buckets WHERE job_id = $1 ORDER BY created_at ASC")
            .bind(job_id)
            .fetch_all(&self.pool)
            .await
            .context("failed to list buckets")?;

        rows.iter().map(bucket_from_row).collect()
    }

    async fn rename_bucket(&self, id: Uuid, name: &str) -> Result<()> {
        sqlx::query("UPDATE buckets SET name = $2 WHERE id = $1")
            .bind(id)
            .bind(name)
            .execute(&self.pool)
            .await
            .context("failed to rename bucket")?;

        Ok(())
    }

    async fn delete_buckets(&self, ids: &[Uuid]) -> Result<()> {
        sqlx::query("DELETE FROM buckets WHERE id = ANY($1)")
            .bind(ids)
            .execute(&self.pool)
            .await
            .context("failed to delete buckets")?;

        Ok(())
    }

    async fn insert_match(&self, record: &TournamentMatch) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO tournament_matches (id, bucket_id, media_type, round, media1_id,
                                            media2_id, winner_id, reasoning, change1, change2,
                                            created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ",
        )
        .bind(record.id)
        .bind(record.bucket_id)
        .bind(record.media_type.as_str())
        .bind(record.round)
        .bind(record.media1_id)
        .bind(record.media2_id)
        .bind(record.winner_id)
        .bind(&record.reasoning)
        .bind(record.change1)
        .bind(record.change2)
        .bind(record.created_at)
        .execute(&self.pool)
        .await
        .context("failed to insert tournament match")?;

        Ok(())
    }

    async fn list_matches(&self, bucket_id: Uuid) -> Result<Vec<TournamentMatch>> {
        let rows = sqlx::query(
            "SELECT * FROM tournament_matches WHERE bucket_id = $1 ORDER BY created_at ASC",
        )
        .bind(bucket_id)
        .fetch_all(&self.pool)
        .await
        .context("failed to list matches")?;

        rows.iter().map(match_from_row).collect()
    }

    async fn list_matches_for_job(&self, job_id: Uuid) -> Result<Vec<TournamentMatch>> {
        let rows = sqlx::query(
            r"
            SELECT m.* FROM tournament_matches m
            JOIN buckets b ON b.id = m.bucket_id
            WHERE b.job_id = $1
            ORDER BY m.created_at ASC
            ",
        )
        .bind(job_id)
        .fetch_all(&self.pool)
        .await
        .context("failed to list matches for job")?;

        rows.iter().map(match_from_row).collect()
    }
}

#[cfg(test)]
mod tests {
    use sqlx::postgres::PgPoolOptions;

    use super::*;
    use crate::store::models::{Bucket, Job, JobStatus, MediaFile, MediaType};
    use crate::store::schema::ensure_schema;

    async fn test_pool() -> Option<PgPool> {
        let Ok(database_url) = std::env::var("DATABASE_URL") else {
            return None;
        };
        let pool = PgPoolOptions::new()
            .max_connections(1)
            .connect(&database_url)
            .await
            .expect("database connects");
        ensure_schema(&pool).await.expect("schema bootstraps");
        Some(pool)
    }

    fn sample_media(job_id: Uuid, filename: &str) -> MediaFile {
        MediaFile::new(
            job_id,
            filename,
            format!("shoot/{filename}"),
            format!("jobs/{job_id}/original/{filename}"),
            format!("https://blobs.example/jobs/{job_id}/original/{filename}"),
            MediaType::Image,
            "image/jpeg",
            2048,
        )
    }

    #[tokio::test]
    async fn job_lifecycle_round_trips() -> anyhow::Result<()> {
        let Some(pool) = test_pool().await else {
            return Ok(());
        };
        let dao = PgCullDao::new(pool);

        let job = Job::new(Some("wedding shoot".to_string()));
        dao.insert_job(&job).await?;

        let fetched = dao.get_job(job.id).await?.expect("job exists");
        assert_eq!(fetched.status, JobStatus::Uploading);
        assert_eq!(fetched.name.as_deref(), Some("wedding shoot"));

        dao.advance_job_stage(job.id, JobStatus::Extracting).await?;
        dao.set_job_progress(job.id, 0, 4).await?;
        dao.increment_processed_files(job.id).await?;

        let fetched = dao.get_job(job.id).await?.expect("job exists");
        assert_eq!(fetched.status, JobStatus::Extracting);
        assert_eq!(fetched.total_files, 4);
        assert_eq!(fetched.processed_files, 1);

        assert!(dao.delete_job(job.id).await?);
        assert!(!dao.delete_job(job.id).await?);
        Ok(())
    }

    #[tokio::test]
    async fn delete_job_cascades_to_descendants() -> anyhow::Result<()> {
        let Some(pool) = test_pool().await else {
            return Ok(());
        };
        let dao = PgCullDao::new(pool.clone());

        let job = Job::new(None);
        dao.insert_job(&job).await?;

        let bucket = Bucket::new(job.id, "Sunset takes");
        dao.insert_bucket(&bucket).await?;

        let file = sample_media(job.id, "IMG_0001.jpg");
        dao.insert_media_file(&file).await?;
        dao.assign_bucket(&[file.id], bucket.id).await?;

        assert!(dao.delete_job(job.id).await?);

        let files = dao.list_media_files(job.id).await?;
        assert!(files.is_empty());
        let buckets = dao.list_buckets(job.id).await?;
        assert!(buckets.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn media_files_keep_archive_order() -> anyhow::Result<()> {
        let Some(pool) = test_pool().await else {
            return Ok(());
        };
        let dao = PgCullDao::new(pool);

        let job = Job::new(None);
        dao.insert_job(&job).await?;

        for name in ["c.jpg", "a.jpg", "b.jpg"] {
            dao.insert_media_file(&sample_media(job.id, name)).await?;
        }

        let files = dao.list_media_files(job.id).await?;
        let names: Vec<&str> = files.iter().map(|f| f.filename.as_str()).collect();
        assert_eq!(names, vec!["c.jpg", "a.jpg", "b.jpg"]);

        dao.delete_job(job.id).await?;
        Ok(())
    }
}
