use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info};
use uuid::Uuid;

use crate::app::AppState;
use crate::blob::job_prefix;
use crate::store::models::{Job, JobStatus};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct JobSummary {
    pub(crate) id: Uuid,
    pub(crate) name: Option<String>,
    pub(crate) status: JobStatus,
    pub(crate) total_files: i32,
    pub(crate) processed_files: i32,
    pub(crate) error: Option<String>,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) updated_at: DateTime<Utc>,
    pub(crate) completed_at: Option<DateTime<Utc>>,
}

impl From<Job> for JobSummary {
    fn from(job: Job) -> Self {
        Self {
            id: job.id,
            name: job.name,
            status: job.status,
            total_files: job.total_files,
            processed_files: job.processed_files,
            error: job.error,
            created_at: job.created_at,
            updated_at: job.updated_at,
            completed_at: job.completed_at,
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

pub(crate) fn error_response(status: StatusCode, message: impl Into<String>) -> axum::response::Response {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
        .into_response()
}

pub(crate) fn internal_error(error: &anyhow::Error) -> axum::response::Response {
    error!(error = %error, "request handling failed");
    error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
}

#[derive(Debug, Deserialize)]
pub(crate) struct ListJobsQuery {
    #[serde(default = "default_limit")]
    limit: i64,
    #[serde(default)]
    offset: i64,
}

fn default_limit() -> i64 {
    20
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ListJobsResponse {
    jobs: Vec<JobSummary>,
    total: i64,
    limit: i64,
    offset: i64,
}

/// `GET /jobs` — 作成日時降順のページングされたサマリー。
pub(crate) async fn list(
    State(state): State<AppState>,
    Query(query): Query<ListJobsQuery>,
) -> impl IntoResponse {
    let limit = query.limit.clamp(1, 100);
    let offset = query.offset.max(0);

    let jobs = match state.dao().list_jobs(limit, offset).await {
        Ok(jobs) => jobs,
        Err(error) => return internal_error(&error),
    };
    let total = match state.dao().count_jobs().await {
        Ok(total) => total,
        Err(error) => return internal_error(&error),
    };

    Json(ListJobsResponse {
        jobs: jobs.into_iter().map(JobSummary::from).collect(),
        total,
        limit,
        offset,
    })
    .into_response()
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct CreateJobRequest {
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateJobResponse {
    job_id: Uuid,
    ws_url: String,
}

/// `POST /jobs` — `uploading` 状態のジョブを確保し、アップロード先を返す。
pub(crate) async fn create(
    State(state): State<AppState>,
    payload: Option<Json<CreateJobRequest>>,
) -> impl IntoResponse {
    let name = payload.and_then(|Json(body)| body.name);
    let job = Job::new(name);

    if let Err(error) = state.dao().insert_job(&job).await {
        return internal_error(&error);
    }

    info!(job_id = %job.id, "allocated upload job");
    (
        StatusCode::CREATED,
        Json(CreateJobResponse {
            job_id: job.id,
            ws_url: state.config().ws_public_url(),
        }),
    )
        .into_response()
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct JobDetailResponse {
    #[serde(flatten)]
    summary: JobSummary,
    media_count: usize,
    bucket_count: usize,
}

/// `GET /jobs/{id}` — サマリーとカウンタ。
pub(crate) async fn get_one(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    let job = match state.dao().get_job(id).await {
        Ok(Some(job)) => job,
        Ok(None) => return error_response(StatusCode::NOT_FOUND, "job not found"),
        Err(error) => return internal_error(&error),
    };

    let media_count = match state.dao().list_media_files(id).await {
        Ok(files) => files.len(),
        Err(error) => return internal_error(&error),
    };
    let bucket_count = match state.dao().list_buckets(id).await {
        Ok(buckets) => buckets.len(),
        Err(error) => return internal_error(&error),
    };

    Json(JobDetailResponse {
        summary: JobSummary::from(job),
        media_count,
        bucket_count,
    })
    .into_response()
}

/// `DELETE /jobs/{id}` — レコードとブロブをまとめて削除する。
pub(crate) async fn delete(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    match state.dao().get_job(id).await {
        Ok(Some(_)) => {}
        Ok(None) => return error_response(StatusCode::NOT_FOUND, "job not found"),
        Err(error) => return internal_error(&error),
    }

    // 実行中ならまず止める
    state.orchestrator().cancel(id);

    if let Err(error) = state.blob().delete_prefix(&job_prefix(id)).await {
        return internal_error(&error);
    }

    match state.dao().delete_job(id).await {
        Ok(true) => {
            info!(job_id = %id, "job deleted");
            StatusCode::NO_CONTENT.into_response()
        }
        Ok(false) => error_response(StatusCode::NOT_FOUND, "job not found"),
        Err(error) => internal_error(&error),
    }
}
