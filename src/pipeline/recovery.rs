//! 起動時のジョブリカバリ。
//!
//! 終端状態でないジョブをすべてオーケストレータへ再投入する。
//! `uploading` のまま取り残されたジョブも対象で、スクラッチを失っているため
//! オーケストレータ側で failed になる。

use std::sync::Arc;

use anyhow::Result;
use tracing::{error, info};

use super::PipelineOrchestrator;

/// 未完了ジョブを再投入し、見つけた件数を返す。
///
/// 各ジョブは独立したタスクとして走らせる。失敗はジョブごとに記録され、
/// 起動処理は止めない。
pub async fn resume_unfinished_jobs(orchestrator: Arc<PipelineOrchestrator>) -> Result<usize> {
    let jobs = orchestrator.dao().list_unfinished_jobs().await?;
    let count = jobs.len();

    if count == 0 {
        info!("no unfinished jobs to recover");
        return Ok(0);
    }

    info!(count, "re-enqueueing unfinished jobs");
    for job in jobs {
        let orchestrator = Arc::clone(&orchestrator);
        let job_id = job.id;
        let status = job.status;
        tokio::spawn(async move {
            info!(%job_id, status = %status, "resuming recovered job");
            if let Err(e) = orchestrator.run_job(job_id).await {
                error!(%job_id, error = %e, "recovered job failed");
            }
        });
    }

    Ok(count)
}
