//! ステージ進捗のブロードキャスト。
//!
//! オーケストレータが唯一の送信者。WebSocket セッションが購読し、
//! 自分のジョブのイベントだけをクライアントへ転送する。

use std::sync::Arc;

use tokio::sync::broadcast;
use uuid::Uuid;

use crate::store::models::JobStatus;

/// `(stage, current, total, message?)` の進捗タプル。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressEvent {
    pub job_id: Uuid,
    pub stage: JobStatus,
    pub current: usize,
    pub total: usize,
    pub message: Option<String>,
}

impl ProgressEvent {
    #[must_use]
    pub fn new(job_id: Uuid, stage: JobStatus, current: usize, total: usize) -> Self {
        Self {
            job_id,
            stage,
            current,
            total,
            message: None,
        }
    }

    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// 進捗イベントの送信ハブ。
#[derive(Clone)]
pub struct ProgressBroadcaster {
    sender: Arc<broadcast::Sender<ProgressEvent>>,
}

impl ProgressBroadcaster {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// 購読者がいなくても送信は失敗扱いにしない。
    pub fn send(&self, event: ProgressEvent) {
        let _ = self.sender.send(event);
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.sender.subscribe()
    }
}

impl Default for ProgressBroadcaster {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_without_subscribers_does_not_panic() {
        let broadcaster = ProgressBroadcaster::new(4);
        broadcaster.send(ProgressEvent::new(
            Uuid::new_v4(),
            JobStatus::Labeling,
            1,
            3,
        ));
    }

    #[tokio::test]
    async fn subscriber_receives_events_in_order() {
        let broadcaster = ProgressBroadcaster::new(8);
        let mut rx = broadcaster.subscribe();
        let job_id = Uuid::new_v4();

        broadcaster.send(ProgressEvent::new(job_id, JobStatus::Labeling, 1, 2));
        broadcaster.send(
            ProgressEvent::new(job_id, JobStatus::Labeling, 2, 2).with_message("done"),
        );

        let first = rx.recv().await.expect("first event");
        assert_eq!(first.current, 1);
        let second = rx.recv().await.expect("second event");
        assert_eq!(second.message.as_deref(), Some("done"));
    }
}
