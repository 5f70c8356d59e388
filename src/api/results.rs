//! 結果投影：処理途中の部分結果と、完了ジョブの最終結果。

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Serialize;
use uuid::Uuid;

use crate::app::AppState;
use crate::store::models::{Bucket, Job, JobStatus, MediaFile, MediaType};

use super::jobs::{error_response, internal_error};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct MediaFileView {
    id: Uuid,
    filename: String,
    original_path: String,
    blob_url: String,
    media_type: MediaType,
    mime_type: String,
    size_bytes: i64,
    label: Option<String>,
    rating_score: f64,
    is_top_pick: bool,
    enhanced_blob_url: Option<String>,
    bucket_id: Option<Uuid>,
}

impl From<&MediaFile> for MediaFileView {
    fn from(file: &MediaFile) -> Self {
        Self {
            id: file.id,
            filename: file.filename.clone(),
            original_path: file.original_path.clone(),
            blob_url: file.blob_url.clone(),
            media_type: file.media_type,
            mime_type: file.mime_type.clone(),
            size_bytes: file.size_bytes,
            label: file.label.clone(),
            rating_score: file.rating_score,
            is_top_pick: file.is_top_pick,
            enhanced_blob_url: file.enhanced_blob_url.clone(),
            bucket_id: file.bucket_id,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PartialBucketView {
    id: Uuid,
    name: String,
    media_files: Vec<MediaFileView>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PartialResultsResponse {
    job_id: Uuid,
    status: JobStatus,
    buckets: Vec<PartialBucketView>,
    unclustered: Vec<MediaFileView>,
}

/// `GET /jobs/{id}/partial` — パイプライン途中でも読める進行中の結果。
pub(crate) async fn partial(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    let (job, buckets, files) = match load_job_data(&state, id).await {
        Ok(Some(data)) => data,
        Ok(None) => return error_response(StatusCode::NOT_FOUND, "job not found"),
        Err(error) => return internal_error(&error),
    };

    let bucket_views = buckets
        .iter()
        .map(|bucket| PartialBucketView {
            id: bucket.id,
            name: bucket.name.clone(),
            media_files: members_by_rating(&files, bucket.id),
        })
        .collect();

    let unclustered = files
        .iter()
        .filter(|f| f.bucket_id.is_none())
        .map(MediaFileView::from)
        .collect();

    Json(PartialResultsResponse {
        job_id: job.id,
        status: job.status,
        buckets: bucket_views,
        unclustered,
    })
    .into_response()
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FinalBucketView {
    id: Uuid,
    name: String,
    top_images: Vec<MediaFileView>,
    top_videos: Vec<MediaFileView>,
    ranked: Vec<MediaFileView>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FinalResultsResponse {
    job_id: Uuid,
    buckets: Vec<FinalBucketView>,
}

/// `GET /jobs/{id}/results` — 完了ジョブの最終結果。未完了なら 400。
pub(crate) async fn final_results(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    let (job, buckets, files) = match load_job_data(&state, id).await {
        Ok(Some(data)) => data,
        Ok(None) => return error_response(StatusCode::NOT_FOUND, "job not found"),
        Err(error) => return internal_error(&error),
    };

    if job.status != JobStatus::Completed {
        return error_response(
            StatusCode::BAD_REQUEST,
            format!("job is not completed (status: {})", job.status),
        );
    }

    let bucket_views = buckets
        .iter()
        .map(|bucket| {
            let ranked = members_by_rating(&files, bucket.id);
            let top_images = ranked
                .iter()
                .filter(|f| f.is_top_pick && f.media_type == MediaType::Image)
                .cloned()
                .collect();
            let top_videos = ranked
                .iter()
                .filter(|f| f.is_top_pick && f.media_type == MediaType::Video)
                .cloned()
                .collect();

            FinalBucketView {
                id: bucket.id,
                name: bucket.name.clone(),
                top_images,
                top_videos,
                ranked,
            }
        })
        .collect();

    Json(FinalResultsResponse {
        job_id: job.id,
        buckets: bucket_views,
    })
    .into_response()
}

async fn load_job_data(
    state: &AppState,
    id: Uuid,
) -> anyhow::Result<Option<(Job, Vec<Bucket>, Vec<MediaFile>)>> {
    let Some(job) = state.dao().get_job(id).await? else {
        return Ok(None);
    };
    let buckets = state.dao().list_buckets(id).await?;
    let files = state.dao().list_media_files(id).await?;
    Ok(Some((job, buckets, files)))
}

/// バケットのメンバーをレーティング降順で返す。
fn members_by_rating(files: &[MediaFile], bucket_id: Uuid) -> Vec<MediaFileView> {
    let mut members: Vec<&MediaFile> = files
        .iter()
        .filter(|f| f.bucket_id == Some(bucket_id))
        .collect();
    members.sort_by(|a, b| {
        b.rating_score
            .partial_cmp(&a.rating_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    members.into_iter().map(MediaFileView::from).collect()
}
