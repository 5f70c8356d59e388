//! 起動時のスキーマ初期化。
//!
//! すべて `CREATE TABLE IF NOT EXISTS` で冪等に作成し、1トランザクションで
//! 適用する。

use anyhow::{Context, Result};
use sqlx::PgPool;

/// 必要なテーブルとインデックスを作成する。
pub async fn ensure_schema(pool: &PgPool) -> Result<()> {
    let mut tx = pool.begin().await.context("failed to begin transaction")?;

    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS jobs (
            id UUID PRIMARY KEY,
            name TEXT,
            status TEXT NOT NULL,
            total_files INT NOT NULL DEFAULT 0,
            processed_files INT NOT NULL DEFAULT 0,
            error TEXT,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            completed_at TIMESTAMPTZ
        )
        ",
    )
    .execute(&mut *tx)
    .await
    .context("failed to create jobs table")?;

    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS buckets (
            id UUID PRIMARY KEY,
            job_id UUID NOT NULL REFERENCES jobs(id) ON DELETE CASCADE,
            name TEXT NOT NULL,
            centroid TEXT,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        ",
    )
    .execute(&mut *tx)
    .await
    .context("failed to create buckets table")?;

    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS media_files (
            id UUID PRIMARY KEY,
            seq BIGSERIAL,
            job_id UUID NOT NULL REFERENCES jobs(id) ON DELETE CASCADE,
            filename TEXT NOT NULL,
            original_path TEXT NOT NULL,
            blob_key TEXT NOT NULL,
            blob_url TEXT NOT NULL,
            media_type TEXT NOT NULL,
            mime_type TEXT NOT NULL,
            size_bytes BIGINT NOT NULL,
            label TEXT,
            rating_score DOUBLE PRECISION NOT NULL DEFAULT 1000,
            is_top_pick BOOLEAN NOT NULL DEFAULT FALSE,
            enhanced_blob_key TEXT,
            enhanced_blob_url TEXT,
            bucket_id UUID REFERENCES buckets(id) ON DELETE SET NULL,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        ",
    )
    .execute(&mut *tx)
    .await
    .context("failed to create media_files table")?;

    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS tournament_matches (
            id UUID PRIMARY KEY,
            bucket_id UUID NOT NULL REFERENCES buckets(id) ON DELETE CASCADE,
            media_type TEXT NOT NULL,
            round INT NOT NULL DEFAULT 1,
            media1_id UUID NOT NULL,
            media2_id UUID NOT NULL,
            winner_id UUID NOT NULL,
            reasoning TEXT NOT NULL DEFAULT '',
            change1 DOUBLE PRECISION NOT NULL,
            change2 DOUBLE PRECISION NOT NULL,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        ",
    )
    .execute(&mut *tx)
    .await
    .context("failed to create tournament_matches table")?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_media_files_job ON media_files(job_id, seq)")
        .execute(&mut *tx)
        .await
        .context("failed to create media_files index")?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_buckets_job ON buckets(job_id)")
        .execute(&mut *tx)
        .await
        .context("failed to create buckets index")?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_tournament_matches_bucket ON tournament_matches(bucket_id)",
    )
    .execute(&mut *tx)
    .await
    .context("failed to create tournament_matches index")?;

    tx.commit().await.context("failed to commit schema")?;

    Ok(())
}
