//! ステージ実行の共有コンテキスト。
//!
//! 進捗の永続化とブロードキャスト、キャンセル監視をまとめる。
//! 進捗は完了順にカウントされる。

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::store::dao::CullDao;
use crate::store::models::JobStatus;

use super::progress::{ProgressBroadcaster, ProgressEvent};

/// ステージの終わり方。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StageOutcome {
    Completed,
    /// キャンセルにより中断。ジョブは現在の状態のまま残す。
    Cancelled,
}

pub(crate) struct StageContext {
    job_id: Uuid,
    stage: JobStatus,
    total: usize,
    completed: AtomicUsize,
    dao: Arc<dyn CullDao>,
    progress: ProgressBroadcaster,
    cancel: CancellationToken,
}

impl StageContext {
    /// ステージを開始し、進捗カウンタを `(0, total)` にリセットする。
    pub(crate) async fn begin(
        job_id: Uuid,
        stage: JobStatus,
        total: usize,
        dao: Arc<dyn CullDao>,
        progress: ProgressBroadcaster,
        cancel: CancellationToken,
    ) -> Result<Self> {
        dao.set_job_progress(job_id, 0, total as i32).await?;
        progress.send(ProgressEvent::new(job_id, stage, 0, total));

        Ok(Self {
            job_id,
            stage,
            total,
            completed: AtomicUsize::new(0),
            dao,
            progress,
            cancel,
        })
    }

    pub(crate) fn job_id(&self) -> Uuid {
        self.job_id
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub(crate) fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// 1ユニット完了。完了順にカウントし、永続化とブロードキャストを行う。
    pub(crate) async fn advance(&self, message: Option<String>) -> Result<()> {
        let current = self.completed.fetch_add(1, Ordering::SeqCst) + 1;

        self.dao
            .set_job_progress(self.job_id, current.min(self.total) as i32, self.total as i32)
            .await?;

        let mut event = ProgressEvent::new(self.job_id, self.stage, current, self.total);
        if let Some(message) = message {
            event = event.with_message(message);
        }
        self.progress.send(event);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::dao::MemoryDao;
    use crate::store::models::Job;

    #[tokio::test]
    async fn advance_counts_in_completion_order() -> Result<()> {
        let dao = Arc::new(MemoryDao::new());
        let job = Job::new(None);
        dao.insert_job(&job).await?;

        let progress = ProgressBroadcaster::new(8);
        let mut rx = progress.subscribe();

        let ctx = StageContext::begin(
            job.id,
            JobStatus::Labeling,
            2,
            dao.clone(),
            progress,
            CancellationToken::new(),
        )
        .await?;

        ctx.advance(Some("first".to_string())).await?;
        ctx.advance(None).await?;

        // begin が (0, total) を送っている
        let initial = rx.recv().await.expect("initial event");
        assert_eq!(initial.current, 0);
        assert_eq!(initial.total, 2);

        let first = rx.recv().await.expect("first event");
        assert_eq!(first.current, 1);
        assert_eq!(first.message.as_deref(), Some("first"));

        let stored = dao.get_job(job.id).await?.expect("job exists");
        assert_eq!(stored.processed_files, 2);
        assert_eq!(stored.total_files, 2);
        Ok(())
    }
}
