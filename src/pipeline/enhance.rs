//! 補正ステージ：トップピックの画像だけをモデルで再レンダリングする。
//!
//! 失敗やモデルが画像を返さなかった場合はスキップして続行する。
//! 補正フィールドが未設定のまま残るのは許容された結果。

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::blob::{BlobStore, enhanced_key};
use crate::clients::{MediaInput, ModelAdapter};
use crate::store::dao::CullDao;
use crate::store::models::{MediaFile, MediaType};

use super::{StageContext, StageOutcome};

pub(crate) struct EnhanceStage {
    dao: Arc<dyn CullDao>,
    blob: Arc<dyn BlobStore>,
    model: Arc<dyn ModelAdapter>,
    semaphore: Arc<Semaphore>,
}

impl EnhanceStage {
    pub(crate) fn new(
        dao: Arc<dyn CullDao>,
        blob: Arc<dyn BlobStore>,
        model: Arc<dyn ModelAdapter>,
        concurrency: usize,
    ) -> Self {
        Self {
            dao,
            blob,
            model,
            semaphore: Arc::new(Semaphore::new(concurrency.max(1))),
        }
    }

    /// 補正対象（画像のトップピック）を返す。進捗の分母にも使う。
    pub(crate) fn targets(files: &[MediaFile]) -> Vec<MediaFile> {
        files
            .iter()
            .filter(|f| f.is_top_pick && f.media_type == MediaType::Image)
            .cloned()
            .collect()
    }

    pub(crate) async fn run(
        &self,
        ctx: &Arc<StageContext>,
        files: &[MediaFile],
    ) -> Result<StageOutcome> {
        let targets = Self::targets(files);
        info!(
            job_id = %ctx.job_id(),
            targets = targets.len(),
            "starting enhancement"
        );

        let mut tasks = Vec::with_capacity(targets.len());
        for file in targets {
            if ctx.is_cancelled() {
                break;
            }

            let permit = Arc::clone(&self.semaphore)
                .acquire_owned()
                .await
                .context("enhance semaphore closed")?;
            let dao = Arc::clone(&self.dao);
            let blob = Arc::clone(&self.blob);
            let model = Arc::clone(&self.model);
            let ctx = Arc::clone(ctx);

            tasks.push(tokio::spawn(async move {
                let _permit = permit;
                if ctx.is_cancelled() {
                    return Ok(());
                }

                if let Err(error) = enhance_one(&dao, &blob, &model, &file).await {
                    // 個別の補正失敗はジョブを止めない
                    warn!(
                        media_id = %file.id,
                        filename = %file.filename,
                        error = %error,
                        "enhancement failed, keeping original only"
                    );
                }
                ctx.advance(Some(file.filename.clone())).await?;

                Ok::<(), anyhow::Error>(())
            }));
        }

        for task in tasks {
            task.await.context("enhance task panicked")??;
        }

        if ctx.is_cancelled() {
            return Ok(StageOutcome::Cancelled);
        }
        Ok(StageOutcome::Completed)
    }
}

async fn enhance_one(
    dao: &Arc<dyn CullDao>,
    blob: &Arc<dyn BlobStore>,
    model: &Arc<dyn ModelAdapter>,
    file: &MediaFile,
) -> Result<()> {
    let bytes = blob
        .get(&file.blob_key)
        .await
        .with_context(|| format!("failed to fetch {}", file.filename))?;

    let Some(enhanced) = model
        .enhance(MediaInput::new(&bytes, &file.mime_type))
        .await?
    else {
        debug!(media_id = %file.id, "model returned no enhanced rendering");
        return Ok(());
    };

    let key = enhanced_key(file.job_id, &file.filename);
    blob.put(&key, enhanced, &file.mime_type)
        .await
        .with_context(|| format!("failed to upload enhanced {}", file.filename))?;

    let url = blob.public_url(&key);
    dao.set_enhanced(file.id, &key, &url).await?;

    debug!(media_id = %file.id, key = %key, "stored enhanced rendering");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::MemoryBlobStore;
    use crate::clients::QualityVerdict;
    use crate::pipeline::progress::ProgressBroadcaster;
    use crate::store::dao::MemoryDao;
    use crate::store::models::{Job, JobStatus};
    use async_trait::async_trait;
    use bytes::Bytes;
    use tokio_util::sync::CancellationToken;
    use uuid::Uuid;

    /// 特定の入力だけ補正を返すフェイク。
    struct SelectiveEnhancer;

    #[async_trait]
    impl ModelAdapter for SelectiveEnhancer {
        async fn describe(&self, _media: MediaInput<'_>) -> Result<String> {
            unreachable!("enhancement never describes")
        }

        async fn same_take(&self, _a: MediaInput<'_>, _b: MediaInput<'_>) -> Result<bool> {
            unreachable!("enhancement never clusters")
        }

        async fn compare_quality(
            &self,
            _media_type: MediaType,
            _a: MediaInput<'_>,
            _b: MediaInput<'_>,
        ) -> Result<QualityVerdict> {
            unreachable!("enhancement never ranks")
        }

        async fn enhance(&self, media: MediaInput<'_>) -> Result<Option<Bytes>> {
            if media.bytes == b"no-thanks" {
                return Ok(None);
            }
            if media.bytes == b"boom" {
                return Err(anyhow::anyhow!("provider rejected the image"));
            }
            let mut enhanced = media.bytes.to_vec();
            enhanced.extend_from_slice(b"-enhanced");
            Ok(Some(Bytes::from(enhanced)))
        }

        async fn name_group(&self, _labels: &[String]) -> Result<String> {
            unreachable!("enhancement never names groups")
        }
    }

    async fn seed_pick(
        dao: &MemoryDao,
        blob: &MemoryBlobStore,
        job_id: Uuid,
        filename: &str,
        media_type: MediaType,
        content: &[u8],
        is_top_pick: bool,
    ) -> MediaFile {
        let key = format!("jobs/{job_id}/original/{filename}");
        blob.put(&key, Bytes::copy_from_slice(content), "image/jpeg")
            .await
            .expect("seed blob");

        let file = MediaFile::new(
            job_id,
            filename,
            format!("shoot/{filename}"),
            key.clone(),
            format!("memory://{key}"),
            media_type,
            "image/jpeg",
            content.len() as i64,
        );
        dao.insert_media_file(&file).await.expect("insert media");
        if is_top_pick {
            dao.set_top_pick(file.id, true).await.expect("set pick");
        }
        file
    }

    #[tokio::test]
    async fn enhances_only_image_top_picks() -> Result<()> {
        let dao = Arc::new(MemoryDao::new());
        let blob = Arc::new(MemoryBlobStore::new());
        let stage = EnhanceStage::new(dao.clone(), blob.clone(), Arc::new(SelectiveEnhancer), 3);

        let job = Job::new(None);
        dao.insert_job(&job).await?;

        seed_pick(&dao, &blob, job.id, "pick.jpg", MediaType::Image, b"good", true).await;
        seed_pick(&dao, &blob, job.id, "skip.jpg", MediaType::Image, b"meh", false).await;
        seed_pick(&dao, &blob, job.id, "clip.mp4", MediaType::Video, b"vid", true).await;

        let files = dao.list_media_files(job.id).await?;
        let ctx = Arc::new(
            StageContext::begin(
                job.id,
                JobStatus::Enhancing,
                1,
                dao.clone(),
                ProgressBroadcaster::new(16),
                CancellationToken::new(),
            )
            .await?,
        );

        let outcome = stage.run(&ctx, &files).await?;
        assert_eq!(outcome, StageOutcome::Completed);

        let files = dao.list_media_files(job.id).await?;
        let pick = files.iter().find(|f| f.filename == "pick.jpg").expect("pick");
        let expected_key = format!("jobs/{}/enhanced/enhanced_pick.jpg", job.id);
        assert_eq!(pick.enhanced_blob_key.as_deref(), Some(expected_key.as_str()));
        assert!(blob.contains(&expected_key));
        assert_eq!(&blob.get(&expected_key).await?[..], b"good-enhanced");

        // 非ピック画像と動画ピックは対象外
        let skip = files.iter().find(|f| f.filename == "skip.jpg").expect("skip");
        assert!(skip.enhanced_blob_key.is_none());
        let clip = files.iter().find(|f| f.filename == "clip.mp4").expect("clip");
        assert!(clip.enhanced_blob_key.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn failures_and_refusals_leave_fields_unset() -> Result<()> {
        let dao = Arc::new(MemoryDao::new());
        let blob = Arc::new(MemoryBlobStore::new());
        let stage = EnhanceStage::new(dao.clone(), blob.clone(), Arc::new(SelectiveEnhancer), 3);

        let job = Job::new(None);
        dao.insert_job(&job).await?;

        seed_pick(&dao, &blob, job.id, "refused.jpg", MediaType::Image, b"no-thanks", true).await;
        seed_pick(&dao, &blob, job.id, "error.jpg", MediaType::Image, b"boom", true).await;

        let files = dao.list_media_files(job.id).await?;
        let ctx = Arc::new(
            StageContext::begin(
                job.id,
                JobStatus::Enhancing,
                2,
                dao.clone(),
                ProgressBroadcaster::new(16),
                CancellationToken::new(),
            )
            .await?,
        );

        // どちらも失敗するがステージは完了する
        let outcome = stage.run(&ctx, &files).await?;
        assert_eq!(outcome, StageOutcome::Completed);

        let files = dao.list_media_files(job.id).await?;
        assert!(files.iter().all(|f| f.enhanced_blob_key.is_none()));
        Ok(())
    }
}
