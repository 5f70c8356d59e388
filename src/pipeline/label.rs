//! ラベリングステージ：各メディアに1文の説明を付ける。
//!
//! 既にラベルを持つメディアはスキップする（再実行で describe を呼ばない）。
//! ラベル付与はクラスタリングの前提条件のため、リトライ枯渇はステージ失敗になる。

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::Semaphore;
use tracing::{debug, info};

use crate::blob::BlobStore;
use crate::clients::{MediaInput, ModelAdapter};
use crate::store::dao::CullDao;
use crate::store::models::MediaFile;

use super::{StageContext, StageOutcome};

pub(crate) struct LabelStage {
    dao: Arc<dyn CullDao>,
    blob: Arc<dyn BlobStore>,
    model: Arc<dyn ModelAdapter>,
    semaphore: Arc<Semaphore>,
}

impl LabelStage {
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

    /// ラベルの無いメディアをすべて処理する。
    pub(crate) async fn run(
        &self,
        ctx: &Arc<StageContext>,
        files: &[MediaFile],
    ) -> Result<StageOutcome> {
        let pending: Vec<MediaFile> = files
            .iter()
            .filter(|f| f.label.is_none())
            .cloned()
            .collect();

        info!(
            job_id = %ctx.job_id(),
            pending = pending.len(),
            total = files.len(),
            "starting labeling"
        );

        let mut tasks = Vec::with_capacity(pending.len());
        for file in pending {
            if ctx.is_cancelled() {
                break;
            }

            let permit = Arc::clone(&self.semaphore)
                .acquire_owned()
                .await
                .context("label semaphore closed")?;
            let dao = Arc::clone(&self.dao);
            let blob = Arc::clone(&self.blob);
            let model = Arc::clone(&self.model);
            let ctx = Arc::clone(ctx);

            tasks.push(tokio::spawn(async move {
                let _permit = permit;
                if ctx.is_cancelled() {
                    return Ok(());
                }

                let bytes = blob
                    .get(&file.blob_key)
                    .await
                    .with_context(|| format!("failed to fetch {}", file.filename))?;
                let label = model
                    .describe(MediaInput::new(&bytes, &file.mime_type))
                    .await
                    .with_context(|| format!("failed to describe {}", file.filename))?;

                dao.set_media_label(file.id, &label).await?;
                debug!(media_id = %file.id, label = %label, "labeled media file");
                ctx.advance(Some(file.filename.clone())).await?;

                Ok::<(), anyhow::Error>(())
            }));
        }

        for task in tasks {
            task.await.context("label task panicked")??;
        }

        if ctx.is_cancelled() {
            return Ok(StageOutcome::Cancelled);
        }
        Ok(StageOutcome::Completed)
    }
}
