//! アップロードセッションの実行。
//!
//! ライフサイクル: init フレーム受信 → `uploading` ジョブ作成 →
//! チャンクループ（到着順追記 + ack）→ 全チャンク受信でパイプラインへ引き渡し →
//! 以降は進捗フレームの転送に切り替わる。
//!
//! チャンク本体は到着順に追記する。WebSocket フレームは TCP 上で順序保証
//! されるため、4バイトのインデックスは ack の会計にだけ使い、食い違いは
//! 警告ログに残す。

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::ws::{Message, WebSocket};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::pipeline::PipelineOrchestrator;
use crate::store::models::{Job, JobStatus};

use super::protocol::{
    ChunkAckData, ClientFrame, ProcessingProgressData, ServerFrame, StatusUpdateData,
    parse_chunk_frame,
};

/// 受信済みチャンクの状態。
struct UploadState {
    job_id: Uuid,
    scratch_path: PathBuf,
    file: File,
    total_chunks: u32,
    received: u32,
}

pub(crate) async fn run(orchestrator: Arc<PipelineOrchestrator>, mut socket: WebSocket) {
    match drive_session(&orchestrator, &mut socket).await {
        Ok(Some(job_id)) => forward_progress(&orchestrator, &mut socket, job_id).await,
        Ok(None) => {}
        Err(error) => {
            warn!(error = %error, "upload session aborted");
            let frame = ServerFrame::error(format!("{error:#}"));
            let _ = socket.send(Message::Text(frame.to_json().into())).await;
        }
    }
}

/// セッション本体。アップロードが完了したらジョブ ID を返す。
///
/// 途中切断（None 受信）はジョブを `uploading` のまま残し、スクラッチだけ
/// 片付けて静かに終了する。
async fn drive_session(
    orchestrator: &Arc<PipelineOrchestrator>,
    socket: &mut WebSocket,
) -> Result<Option<Uuid>> {
    let mut state: Option<UploadState> = None;

    loop {
        let Some(message) = socket.recv().await else {
            // クライアント切断
            if let Some(state) = state.take() {
                info!(
                    job_id = %state.job_id,
                    received = state.received,
                    total = state.total_chunks,
                    "client disconnected mid-upload"
                );
                cleanup_scratch(state).await;
            }
            return Ok(None);
        };
        let message = message.context("websocket receive failed")?;

        match message {
            Message::Text(text) => {
                if state.is_some() {
                    warn!("unexpected text frame during chunk loop, ignoring");
                    continue;
                }

                let frame: ClientFrame = serde_json::from_str(text.as_str())
                    .context("malformed init frame")?;
                let ClientFrame::Init {
                    total_chunks,
                    total_size,
                } = frame;

                let opened = open_session(orchestrator, total_chunks, total_size).await?;
                let job_id = opened.job_id;

                let reply = ServerFrame::StatusUpdate {
                    job_id,
                    data: StatusUpdateData {
                        status: JobStatus::Uploading,
                        processed_files: 0,
                        total_files: 0,
                    },
                };
                socket
                    .send(Message::Text(reply.to_json().into()))
                    .await
                    .context("failed to send session status")?;

                // チャンク0個のアーカイブは即座に確定する
                if total_chunks == 0 {
                    finalize_upload(orchestrator, opened).await?;
                    return Ok(Some(job_id));
                }

                state = Some(opened);
            }
            Message::Binary(payload) => {
                let Some(current) = state.as_mut() else {
                    let frame = ServerFrame::error("no active upload session");
                    socket
                        .send(Message::Text(frame.to_json().into()))
                        .await
                        .context("failed to send error frame")?;
                    continue;
                };

                let (chunk_index, bytes) = parse_chunk_frame(&payload)?;

                if let Err(error) = current.file.write_all(bytes).await {
                    let job_id = current.job_id;
                    orchestrator
                        .dao()
                        .mark_job_failed(job_id, &format!("scratch write failed: {error}"))
                        .await?;
                    let taken = state.take().expect("state present");
                    cleanup_scratch(taken).await;
                    return Err(anyhow::Error::new(error).context("scratch write failed"));
                }

                current.received += 1;
                if chunk_index != current.received - 1 {
                    // 順序は輸送路が保証する。インデックスは会計専用
                    warn!(
                        job_id = %current.job_id,
                        chunk_index,
                        expected = current.received - 1,
                        "chunk index does not match arrival order"
                    );
                }

                let ack = ServerFrame::ChunkAck {
                    job_id: current.job_id,
                    data: ChunkAckData {
                        chunk_index,
                        received: current.received,
                        total: current.total_chunks,
                    },
                };
                socket
                    .send(Message::Text(ack.to_json().into()))
                    .await
                    .context("failed to send chunk ack")?;

                if current.received == current.total_chunks {
                    let finished = state.take().expect("state present");
                    let job_id = finished.job_id;
                    finalize_upload(orchestrator, finished).await?;
                    return Ok(Some(job_id));
                }
            }
            Message::Close(_) => {
                if let Some(state) = state.take() {
                    info!(job_id = %state.job_id, "upload session closed by client");
                    cleanup_scratch(state).await;
                }
                return Ok(None);
            }
            Message::Ping(_) | Message::Pong(_) => {}
        }
    }
}

async fn open_session(
    orchestrator: &Arc<PipelineOrchestrator>,
    total_chunks: u32,
    total_size: u64,
) -> Result<UploadState> {
    let job = Job::new(None);
    orchestrator.dao().insert_job(&job).await?;

    let scratch_path = orchestrator.scratch_path(job.id);
    if let Some(parent) = scratch_path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .context("failed to create scratch directory")?;
    }
    let file = File::create(&scratch_path)
        .await
        .context("failed to allocate scratch file")?;

    info!(
        job_id = %job.id,
        total_chunks,
        total_size,
        scratch = %scratch_path.display(),
        "upload session opened"
    );

    Ok(UploadState {
        job_id: job.id,
        scratch_path,
        file,
        total_chunks,
        received: 0,
    })
}

/// スクラッチを閉じてパイプラインを起動する。
async fn finalize_upload(
    orchestrator: &Arc<PipelineOrchestrator>,
    mut state: UploadState,
) -> Result<()> {
    state.file.flush().await.context("failed to flush scratch")?;
    drop(state.file);

    info!(
        job_id = %state.job_id,
        chunks = state.received,
        "upload complete, handing archive to the pipeline"
    );

    orchestrator
        .dao()
        .advance_job_stage(state.job_id, JobStatus::Extracting)
        .await?;

    let orchestrator = Arc::clone(orchestrator);
    let job_id = state.job_id;
    tokio::spawn(async move {
        if let Err(error) = orchestrator.run_job(job_id).await {
            // 失敗はオーケストレータ側で記録済み
            debug!(%job_id, error = %error, "pipeline run finished with error");
        }
    });

    Ok(())
}

async fn cleanup_scratch(state: UploadState) {
    drop(state.file);
    if let Err(error) = tokio::fs::remove_file(&state.scratch_path).await {
        warn!(
            path = %state.scratch_path.display(),
            error = %error,
            "failed to remove scratch file on teardown"
        );
    }
}

/// パイプラインの進捗をクライアントへ転送する。
///
/// ジョブが終端状態に達したら最終の status_update を送って終了する。
async fn forward_progress(
    orchestrator: &Arc<PipelineOrchestrator>,
    socket: &mut WebSocket,
    job_id: Uuid,
) {
    let mut events = orchestrator.progress().subscribe();

    loop {
        tokio::select! {
            received = events.recv() => {
                let event = match received {
                    Ok(event) => event,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(%job_id, skipped, "progress stream lagged");
                        continue;
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                };
                if event.job_id != job_id {
                    continue;
                }

                if event.stage.is_terminal() {
                    let _ = send_status_update(orchestrator, socket, job_id).await;
                    break;
                }

                let frame = ServerFrame::ProcessingProgress {
                    job_id,
                    data: ProcessingProgressData {
                        stage: event.stage.as_str().to_string(),
                        current: event.current,
                        total: event.total,
                        message: event.message,
                    },
                };
                if socket
                    .send(Message::Text(frame.to_json().into()))
                    .await
                    .is_err()
                {
                    break;
                }
            }
            message = socket.recv() => {
                match message {
                    None | Some(Err(_)) | Some(Ok(Message::Close(_))) => break,
                    // 処理中のクライアント入力は読み捨てる
                    Some(Ok(_)) => {}
                }
            }
        }
    }
}

async fn send_status_update(
    orchestrator: &Arc<PipelineOrchestrator>,
    socket: &mut WebSocket,
    job_id: Uuid,
) -> Result<()> {
    let Some(job) = orchestrator.dao().get_job(job_id).await? else {
        return Ok(());
    };

    let frame = ServerFrame::StatusUpdate {
        job_id,
        data: StatusUpdateData {
            status: job.status,
            processed_files: job.processed_files,
            total_files: job.total_files,
        },
    };
    socket
        .send(Message::Text(frame.to_json().into()))
        .await
        .context("failed to send final status update")?;

    Ok(())
}
