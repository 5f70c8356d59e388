//! ランキングステージ。
//!
//! 同一バケット・同一メディア種別のメンバー全ペアを総当たりで品質比較し、
//! 確信度で重み付けした Elo でレーティングを更新する。対戦記録は完了順に
//! 書き込まれるため、再実行では異なるトランスクリプトになりうる。
//! 上位3件（メンバーが3未満なら全員）をトップピックとして確定する。

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use bytes::Bytes;
use chrono::Utc;
use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::Semaphore;
use tracing::{info, warn};
use uuid::Uuid;

use crate::blob::BlobStore;
use crate::clients::{MediaInput, ModelAdapter, QualityVerdict};
use crate::store::dao::CullDao;
use crate::store::models::{MediaFile, MediaType, TournamentMatch};
use crate::util::elo::{INITIAL_RATING, rating_delta};

use super::{StageContext, StageOutcome};

/// トップピックに残す枚数。
const TOP_PICK_COUNT: usize = 3;

/// 1つのトーナメントの実行単位。
struct Tournament {
    bucket_id: Uuid,
    media_type: MediaType,
    members: Vec<MediaFile>,
}

pub(crate) struct RankStage {
    dao: Arc<dyn CullDao>,
    blob: Arc<dyn BlobStore>,
    model: Arc<dyn ModelAdapter>,
    match_limit: usize,
    tournament_limit: usize,
}

impl RankStage {
    pub(crate) fn new(
        dao: Arc<dyn CullDao>,
        blob: Arc<dyn BlobStore>,
        model: Arc<dyn ModelAdapter>,
        match_limit: usize,
        tournament_limit: usize,
    ) -> Self {
        Self {
            dao,
            blob,
            model,
            match_limit: match_limit.max(1),
            tournament_limit: tournament_limit.max(1),
        }
    }

    /// ジョブ全体で予定される対戦数。進捗の分母になる。
    pub(crate) fn planned_match_count(files: &[MediaFile]) -> usize {
        let mut sizes: HashMap<(Uuid, MediaType), usize> = HashMap::new();
        for file in files {
            if let Some(bucket_id) = file.bucket_id {
                *sizes.entry((bucket_id, file.media_type)).or_insert(0) += 1;
            }
        }
        sizes.values().map(|&n| n * (n.saturating_sub(1)) / 2).sum()
    }

    pub(crate) async fn run(
        &self,
        ctx: &Arc<StageContext>,
        files: &[MediaFile],
    ) -> Result<StageOutcome> {
        let tournaments = Self::plan_tournaments(files);
        info!(
            job_id = %ctx.job_id(),
            tournaments = tournaments.len(),
            planned_matches = Self::planned_match_count(files),
            "starting ranking"
        );

        let semaphore = Arc::new(Semaphore::new(self.tournament_limit));
        let mut tasks = Vec::with_capacity(tournaments.len());

        for tournament in tournaments {
            if ctx.is_cancelled() {
                break;
            }

            let permit = Arc::clone(&semaphore)
                .acquire_owned()
                .await
                .context("tournament semaphore closed")?;
            let dao = Arc::clone(&self.dao);
            let blob = Arc::clone(&self.blob);
            let model = Arc::clone(&self.model);
            let ctx = Arc::clone(ctx);
            let match_limit = self.match_limit;

            tasks.push(tokio::spawn(async move {
                let _permit = permit;
                run_tournament(dao, blob, model, ctx, tournament, match_limit).await
            }));
        }

        let mut cancelled = false;
        for task in tasks {
            match task.await.context("tournament task panicked")?? {
                StageOutcome::Completed => {}
                StageOutcome::Cancelled => cancelled = true,
            }
        }

        if cancelled || ctx.is_cancelled() {
            return Ok(StageOutcome::Cancelled);
        }
        Ok(StageOutcome::Completed)
    }

    /// バケット×メディア種別ごとに2名以上のメンバーを持つ単位を拾う。
    fn plan_tournaments(files: &[MediaFile]) -> Vec<Tournament> {
        let mut grouped: Vec<((Uuid, MediaType), Vec<MediaFile>)> = Vec::new();
        for file in files {
            let Some(bucket_id) = file.bucket_id else {
                continue;
            };
            let key = (bucket_id, file.media_type);
            match grouped.iter_mut().find(|(k, _)| *k == key) {
                Some((_, members)) => members.push(file.clone()),
                None => grouped.push((key, vec![file.clone()])),
            }
        }

        grouped
            .into_iter()
            .filter(|(_, members)| members.len() >= 2)
            .map(|((bucket_id, media_type), members)| Tournament {
                bucket_id,
                media_type,
                members,
            })
            .collect()
    }
}

/// 1バケット分の総当たり戦を実行する。
async fn run_tournament(
    dao: Arc<dyn CullDao>,
    blob: Arc<dyn BlobStore>,
    model: Arc<dyn ModelAdapter>,
    ctx: Arc<StageContext>,
    tournament: Tournament,
    match_limit: usize,
) -> Result<StageOutcome> {
    let member_count = tournament.members.len();

    // メンバーのバイトは1回だけ取得して使い回す
    let mut payloads: HashMap<Uuid, Bytes> = HashMap::with_capacity(member_count);
    for member in &tournament.members {
        let bytes = blob
            .get(&member.blob_key)
            .await
            .with_context(|| format!("failed to fetch {}", member.filename))?;
        payloads.insert(member.id, bytes);
    }

    // 再実行でも初期値から。以前のピックはクリアする
    let mut ratings: HashMap<Uuid, f64> = HashMap::with_capacity(member_count);
    for member in &tournament.members {
        ratings.insert(member.id, INITIAL_RATING);
        dao.set_top_pick(member.id, false).await?;
    }

    let semaphore = Arc::new(Semaphore::new(match_limit));
    let mut matches = FuturesUnordered::new();

    for i in 0..member_count {
        for j in (i + 1)..member_count {
            let first = tournament.members[i].clone();
            let second = tournament.members[j].clone();
            let first_bytes = payloads[&first.id].clone();
            let second_bytes = payloads[&second.id].clone();
            let model = Arc::clone(&model);
            let semaphore = Arc::clone(&semaphore);
            let media_type = tournament.media_type;

            matches.push(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .expect("match semaphore closed");
                let verdict = model
                    .compare_quality(
                        media_type,
                        MediaInput::new(&first_bytes, &first.mime_type),
                        MediaInput::new(&second_bytes, &second.mime_type),
                    )
                    .await;
                (first, second, verdict)
            });
        }
    }

    // 完了順に Elo を適用し、その場で記録する。キャンセルは次の完了を
    // 待たずに観測する
    let cancel = ctx.cancel_token();
    loop {
        let completed = tokio::select! {
            completed = matches.next() => completed,
            () = cancel.cancelled() => return Ok(StageOutcome::Cancelled),
        };
        let Some((first, second, verdict)) = completed else {
            break;
        };

        match verdict {
            Ok(verdict) => {
                apply_match(
                    &dao,
                    &mut ratings,
                    tournament.bucket_id,
                    tournament.media_type,
                    &first,
                    &second,
                    verdict,
                )
                .await?;
            }
            Err(error) => {
                warn!(
                    bucket_id = %tournament.bucket_id,
                    first = %first.filename,
                    second = %second.filename,
                    error = %error,
                    "quality comparison failed, skipping match"
                );
            }
        }
        ctx.advance(None).await?;

        if ctx.is_cancelled() {
            return Ok(StageOutcome::Cancelled);
        }
    }

    // レーティング降順で上位をピック。同点はアーカイブ順を保つ
    let mut ranked = tournament.members.clone();
    ranked.sort_by(|a, b| {
        let ra = ratings[&a.id];
        let rb = ratings[&b.id];
        rb.partial_cmp(&ra).unwrap_or(std::cmp::Ordering::Equal)
    });

    for member in ranked.iter().take(TOP_PICK_COUNT) {
        dao.set_top_pick(member.id, true).await?;
    }

    info!(
        bucket_id = %tournament.bucket_id,
        media_type = %tournament.media_type,
        members = member_count,
        picks = ranked.len().min(TOP_PICK_COUNT),
        "tournament finished"
    );

    Ok(StageOutcome::Completed)
}

/// 1試合分の Elo 更新と永続化。
async fn apply_match(
    dao: &Arc<dyn CullDao>,
    ratings: &mut HashMap<Uuid, f64>,
    bucket_id: Uuid,
    media_type: MediaType,
    first: &MediaFile,
    second: &MediaFile,
    verdict: QualityVerdict,
) -> Result<()> {
    let first_won = verdict.winner == 1;
    let rating_first = ratings[&first.id];
    let rating_second = ratings[&second.id];

    let delta = rating_delta(rating_first, rating_second, first_won, verdict.confidence);

    let new_first = rating_first + delta.change_a;
    let new_second = rating_second + delta.change_b;
    ratings.insert(first.id, new_first);
    ratings.insert(second.id, new_second);

    dao.update_rating(first.id, new_first).await?;
    dao.update_rating(second.id, new_second).await?;

    let record = TournamentMatch {
        id: Uuid::new_v4(),
        bucket_id,
        media_type,
        round: 1,
        media1_id: first.id,
        media2_id: second.id,
        winner_id: if first_won { first.id } else { second.id },
        reasoning: verdict.reasoning,
        change1: delta.change_a,
        change2: delta.change_b,
        created_at: Utc::now(),
    };
    dao.insert_match(&record).await?;

    Ok(())
}
