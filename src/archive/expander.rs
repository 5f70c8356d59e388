//! スクラッチアーカイブの展開とブロブストアへの取り込み。

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::blob::{BlobStore, original_key, sanitize_filename};
use crate::store::dao::CullDao;
use crate::store::models::{MediaFile, MediaType};

use super::media::classify_entry;

/// ZIP から取り出した1エントリ。
struct ExtractedEntry {
    original_path: String,
    media_type: MediaType,
    mime_type: &'static str,
    bytes: Vec<u8>,
}

pub(crate) struct ArchiveExpander {
    dao: Arc<dyn CullDao>,
    blob: Arc<dyn BlobStore>,
}

impl ArchiveExpander {
    pub(crate) fn new(dao: Arc<dyn CullDao>, blob: Arc<dyn BlobStore>) -> Self {
        Self { dao, blob }
    }

    /// アーカイブを展開し、作成した `MediaFile` の件数を返す。
    ///
    /// `skip_paths` にある元パスは取り込み済みとして飛ばす（再開時の冪等性）。
    /// ZIP の走査は blocking スレッドで行い、エントリはチャネル越しに
    /// 1件ずつ受け取ってアップロードする。巨大アーカイブでも全体を
    /// メモリに載せない。
    pub(crate) async fn expand(
        &self,
        job_id: Uuid,
        archive_path: &Path,
        skip_paths: &HashSet<String>,
    ) -> Result<usize> {
        let (tx, mut rx) = mpsc::channel::<ExtractedEntry>(4);

        let path: PathBuf = archive_path.to_path_buf();
        let skip: HashSet<String> = skip_paths.clone();
        let reader = tokio::task::spawn_blocking(move || -> Result<()> {
            let file = std::fs::File::open(&path)
                .with_context(|| format!("failed to open archive {}", path.display()))?;
            let mut zip = zip::ZipArchive::new(file).context("failed to read archive")?;

            for index in 0..zip.len() {
                let mut entry = zip
                    .by_index(index)
                    .with_context(|| format!("failed to read archive entry {index}"))?;
                if entry.is_dir() {
                    continue;
                }

                let original_path = entry.name().to_string();
                if skip.contains(&original_path) {
                    continue;
                }
                let Some(kind) = classify_entry(&original_path) else {
                    debug!(entry = %original_path, "skipping unsupported archive entry");
                    continue;
                };

                let mut bytes = Vec::with_capacity(entry.size() as usize);
                std::io::Read::read_to_end(&mut entry, &mut bytes)
                    .with_context(|| format!("failed to extract {original_path}"))?;

                let extracted = ExtractedEntry {
                    original_path,
                    media_type: kind.media_type,
                    mime_type: kind.mime_type,
                    bytes,
                };
                if tx.blocking_send(extracted).is_err() {
                    // 受信側が先に終了した
                    break;
                }
            }

            Ok(())
        });

        let mut created = 0_usize;
        while let Some(entry) = rx.recv().await {
            self.ingest_entry(job_id, entry).await?;
            created += 1;
        }

        reader
            .await
            .context("archive reader task panicked")?
            .context("archive walk failed")?;

        if let Err(error) = tokio::fs::remove_file(archive_path).await {
            warn!(
                path = %archive_path.display(),
                error = %error,
                "failed to remove scratch archive"
            );
        }

        info!(%job_id, created, "archive expansion finished");
        Ok(created)
    }

    async fn ingest_entry(&self, job_id: Uuid, entry: ExtractedEntry) -> Result<()> {
        let basename = entry
            .original_path
            .replace('\\', "/")
            .rsplit('/')
            .next()
            .unwrap_or(&entry.original_path)
            .to_string();
        let sanitized = sanitize_filename(&basename);
        let key = original_key(job_id, &sanitized);
        let size_bytes = entry.bytes.len() as i64;

        self.blob
            .put(&key, Bytes::from(entry.bytes), entry.mime_type)
            .await
            .with_context(|| format!("failed to upload {}", entry.original_path))?;

        let record = MediaFile::new(
            job_id,
            sanitized,
            entry.original_path,
            key.clone(),
            self.blob.public_url(&key),
            entry.media_type,
            entry.mime_type,
            size_bytes,
        );

        self.dao
            .insert_media_file(&record)
            .await
            .context("failed to record media file")?;

        debug!(
            %job_id,
            filename = %record.filename,
            media_type = %record.media_type,
            size_bytes,
            "ingested archive entry"
        );

        Ok(())
    }
}
