//! クラスタリングステージ。
//!
//! Phase A: アーカイブ順の逐次グルーピング。新しい画像を既存バケットの
//! 代表と並行比較し、最初に SAME が返ったバケットへ入れる。比較はレースであり、
//! どの判定が先に完了するかで所属が決まる。断片化は Phase B のマージで回収する。
//!
//! Phase B: 代表同士の全ペア比較を Union-Find で畳み込み、連結成分ごとに
//! 1バケットへ集約する。

use std::sync::Arc;

use anyhow::{Context, Result};
use bytes::Bytes;
use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::blob::BlobStore;
use crate::clients::{MediaInput, ModelAdapter};
use crate::store::dao::CullDao;
use crate::store::models::{Bucket, MediaFile, MediaType};
use crate::util::union_find::UnionFind;

use super::{StageContext, StageOutcome};

/// 動画バケットの固定名。
pub(crate) const VIDEO_BUCKET_NAME: &str = "Videos";

/// Phase A 中のメモリ上バケット。
struct ProtoBucket {
    /// 最初に入ったメンバーが代表になる
    rep_bytes: Bytes,
    rep_mime: String,
    member_ids: Vec<Uuid>,
}

pub(crate) struct ClusterStage {
    dao: Arc<dyn CullDao>,
    blob: Arc<dyn BlobStore>,
    model: Arc<dyn ModelAdapter>,
    compare_limit: usize,
    merge_limit: usize,
}

impl ClusterStage {
    pub(crate) fn new(
        dao: Arc<dyn CullDao>,
        blob: Arc<dyn BlobStore>,
        model: Arc<dyn ModelAdapter>,
        compare_limit: usize,
        merge_limit: usize,
    ) -> Self {
        Self {
            dao,
            blob,
            model,
            compare_limit: compare_limit.max(1),
            merge_limit: merge_limit.max(1),
        }
    }

    /// Phase A: 画像をアーカイブ順に走査してバケットを作る。
    ///
    /// 動画は比較せず、ジョブごとに1つのバケットへまとめる。
    pub(crate) async fn run_grouping(
        &self,
        ctx: &Arc<StageContext>,
        files: &[MediaFile],
    ) -> Result<StageOutcome> {
        let images: Vec<&MediaFile> = files
            .iter()
            .filter(|f| f.media_type == MediaType::Image)
            .collect();
        let videos: Vec<&MediaFile> = files
            .iter()
            .filter(|f| f.media_type == MediaType::Video)
            .collect();

        info!(
            job_id = %ctx.job_id(),
            images = images.len(),
            videos = videos.len(),
            "starting take grouping"
        );

        let mut buckets: Vec<ProtoBucket> = Vec::new();

        for image in images {
            if ctx.is_cancelled() {
                return Ok(StageOutcome::Cancelled);
            }

            let candidate_bytes = self
                .blob
                .get(&image.blob_key)
                .await
                .with_context(|| format!("failed to fetch {}", image.filename))?;

            let chosen = self
                .race_against_representatives(&candidate_bytes, &image.mime_type, &buckets)
                .await;

            match chosen {
                Some(index) => {
                    buckets[index].member_ids.push(image.id);
                    debug!(
                        media_id = %image.id,
                        bucket_index = index,
                        "joined existing take"
                    );
                }
                None => {
                    buckets.push(ProtoBucket {
                        rep_bytes: candidate_bytes,
                        rep_mime: image.mime_type.clone(),
                        member_ids: vec![image.id],
                    });
                    debug!(media_id = %image.id, "opened new take");
                }
            }

            ctx.advance(Some(image.filename.clone())).await?;
        }

        if ctx.is_cancelled() {
            return Ok(StageOutcome::Cancelled);
        }

        // 確定した分割をまとめて書き出す
        for (index, proto) in buckets.iter().enumerate() {
            let bucket = Bucket::new(ctx.job_id(), format!("Bucket {}", index + 1));
            self.dao.insert_bucket(&bucket).await?;
            self.dao.assign_bucket(&proto.member_ids, bucket.id).await?;
        }

        if !videos.is_empty() {
            let bucket = Bucket::new(ctx.job_id(), VIDEO_BUCKET_NAME);
            self.dao.insert_bucket(&bucket).await?;
            let video_ids: Vec<Uuid> = videos.iter().map(|v| v.id).collect();
            self.dao.assign_bucket(&video_ids, bucket.id).await?;
        }

        info!(
            job_id = %ctx.job_id(),
            image_buckets = buckets.len(),
            has_video_bucket = !videos.is_empty(),
            "take grouping finished"
        );

        Ok(StageOutcome::Completed)
    }

    /// 候補画像を全バケット代表と並行比較し、最初に SAME を返した
    /// バケットの添字を返す。残りの比較は打ち切る。
    async fn race_against_representatives(
        &self,
        candidate_bytes: &Bytes,
        candidate_mime: &str,
        buckets: &[ProtoBucket],
    ) -> Option<usize> {
        if buckets.is_empty() {
            return None;
        }

        let semaphore = Arc::new(Semaphore::new(self.compare_limit));
        let mut race = FuturesUnordered::new();

        for (index, bucket) in buckets.iter().enumerate() {
            let model = Arc::clone(&self.model);
            let semaphore = Arc::clone(&semaphore);
            let candidate = candidate_bytes.clone();
            let candidate_mime = candidate_mime.to_string();
            let rep = bucket.rep_bytes.clone();
            let rep_mime = bucket.rep_mime.clone();

            race.push(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .expect("comparison semaphore closed");
                let result = model
                    .same_take(
                        MediaInput::new(&candidate, &candidate_mime),
                        MediaInput::new(&rep, &rep_mime),
                    )
                    .await;
                (index, result)
            });
        }

        while let Some((index, result)) = race.next().await {
            match result {
                Ok(true) => return Some(index),
                Ok(false) => {}
                Err(error) => {
                    // 個別の比較失敗は不一致として扱い、走査を続ける
                    warn!(bucket_index = index, error = %error, "same-take probe failed");
                }
            }
        }

        None
    }

    /// Phase B: 代表同士の全ペア比較とバケット集約、確定バケットの命名。
    pub(crate) async fn run_merge(
        &self,
        ctx: &Arc<StageContext>,
        files: &[MediaFile],
    ) -> Result<StageOutcome> {
        let buckets = self.dao.list_buckets(ctx.job_id()).await?;

        // 画像バケットだけがマージ対象。メンバーはアーカイブ順に並んでいる。
        let mut image_buckets: Vec<(Bucket, Vec<&MediaFile>)> = Vec::new();
        for bucket in &buckets {
            let members: Vec<&MediaFile> = files
                .iter()
                .filter(|f| f.bucket_id == Some(bucket.id))
                .collect();
            if members
                .first()
                .is_some_and(|m| m.media_type == MediaType::Image)
            {
                image_buckets.push((bucket.clone(), members));
            }
        }

        let merged = self.merge_image_buckets(ctx, &image_buckets).await?;
        if merged == StageOutcome::Cancelled {
            return Ok(StageOutcome::Cancelled);
        }

        self.name_final_buckets(ctx.job_id()).await?;

        Ok(StageOutcome::Completed)
    }

    async fn merge_image_buckets(
        &self,
        ctx: &Arc<StageContext>,
        image_buckets: &[(Bucket, Vec<&MediaFile>)],
    ) -> Result<StageOutcome> {
        let count = image_buckets.len();
        if count < 2 {
            return Ok(StageOutcome::Completed);
        }

        // 代表＝各バケットの先頭メンバー
        let mut rep_payloads: Vec<(Bytes, String)> = Vec::with_capacity(count);
        for (bucket, members) in image_buckets {
            let rep = members
                .first()
                .with_context(|| format!("bucket {} has no members", bucket.id))?;
            let bytes = self
                .blob
                .get(&rep.blob_key)
                .await
                .with_context(|| format!("failed to fetch representative {}", rep.filename))?;
            rep_payloads.push((bytes, rep.mime_type.clone()));
        }

        let semaphore = Arc::new(Semaphore::new(self.merge_limit));
        let mut comparisons = FuturesUnordered::new();

        for i in 0..count {
            for j in (i + 1)..count {
                let model = Arc::clone(&self.model);
                let semaphore = Arc::clone(&semaphore);
                let (left, left_mime) = rep_payloads[i].clone();
                let (right, right_mime) = rep_payloads[j].clone();

                comparisons.push(async move {
                    let _permit = semaphore
                        .acquire_owned()
                        .await
                        .expect("merge semaphore closed");
                    let result = model
                        .same_take(
                            MediaInput::new(&left, &left_mime),
                            MediaInput::new(&right, &right_mime),
                        )
                        .await;
                    (i, j, result)
                });
            }
        }

        let mut uf = UnionFind::new(count);
        let cancel = ctx.cancel_token();
        loop {
            let completed = tokio::select! {
                completed = comparisons.next() => completed,
                () = cancel.cancelled() => return Ok(StageOutcome::Cancelled),
            };
            let Some((i, j, result)) = completed else {
                break;
            };

            match result {
                Ok(true) => {
                    uf.union(i, j);
                }
                Ok(false) => {}
                Err(error) => {
                    warn!(left = i, right = j, error = %error, "merge probe failed");
                }
            }
            ctx.advance(None).await?;
        }

        // 連結成分ごとに最小添字のバケットへ集約する
        let roots = uf.roots();
        let mut absorbed: Vec<Uuid> = Vec::new();
        for index in 0..count {
            let root = roots[index];
            let survivor_index = (0..count).find(|&k| roots[k] == root).expect("root exists");
            if index == survivor_index {
                continue;
            }

            let survivor_id = image_buckets[survivor_index].0.id;
            let member_ids: Vec<Uuid> = image_buckets[index].1.iter().map(|m| m.id).collect();
            self.dao.assign_bucket(&member_ids, survivor_id).await?;
            absorbed.push(image_buckets[index].0.id);

            debug!(
                absorbed = %image_buckets[index].0.id,
                survivor = %survivor_id,
                members = member_ids.len(),
                "merged fragmented take"
            );
        }

        if !absorbed.is_empty() {
            self.dao.delete_buckets(&absorbed).await?;
            info!(
                job_id = %ctx.job_id(),
                merged_away = absorbed.len(),
                "bucket merge collapsed fragmented takes"
            );
        }

        Ok(StageOutcome::Completed)
    }

    /// 確定したバケットにモデル生成の短い名前を与える。
    ///
    /// 命名に失敗したバケットは `Bucket N` のまま残す。
    async fn name_final_buckets(&self, job_id: Uuid) -> Result<()> {
        let buckets = self.dao.list_buckets(job_id).await?;
        let files = self.dao.list_media_files(job_id).await?;

        for bucket in buckets {
            if bucket.name == VIDEO_BUCKET_NAME {
                continue;
            }

            let labels: Vec<String> = files
                .iter()
                .filter(|f| f.bucket_id == Some(bucket.id))
                .filter_map(|f| f.label.clone())
                .collect();
            if labels.is_empty() {
                continue;
            }

            match self.model.name_group(&labels).await {
                Ok(name) if !name.trim().is_empty() => {
                    self.dao.rename_bucket(bucket.id, name.trim()).await?;
                }
                Ok(_) => {}
                Err(error) => {
                    warn!(bucket_id = %bucket.id, error = %error, "bucket naming failed");
                }
            }
        }

        Ok(())
    }
}
