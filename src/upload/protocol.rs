//! アップロードセッションのワイヤフォーマット。
//!
//! テキストフレームはすべて JSON。バイナリフレームは 4 バイトのビッグエンディアン
//! チャンク番号に続けてチャンク本体を載せる。

use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::store::models::JobStatus;

/// クライアントから届くテキストフレーム。
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub(crate) enum ClientFrame {
    Init {
        #[serde(rename = "totalChunks")]
        total_chunks: u32,
        #[serde(rename = "totalSize")]
        total_size: u64,
    },
}

/// サーバーからクライアントへ送るテキストフレーム。
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub(crate) enum ServerFrame {
    StatusUpdate {
        #[serde(rename = "jobId")]
        job_id: Uuid,
        data: StatusUpdateData,
    },
    ChunkAck {
        #[serde(rename = "jobId")]
        job_id: Uuid,
        data: ChunkAckData,
    },
    ProcessingProgress {
        #[serde(rename = "jobId")]
        job_id: Uuid,
        data: ProcessingProgressData,
    },
    Error {
        data: ErrorData,
    },
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub(crate) struct StatusUpdateData {
    pub(crate) status: JobStatus,
    pub(crate) processed_files: i32,
    pub(crate) total_files: i32,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ChunkAckData {
    pub(crate) chunk_index: u32,
    pub(crate) received: u32,
    pub(crate) total: u32,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ProcessingProgressData {
    pub(crate) stage: String,
    pub(crate) current: usize,
    pub(crate) total: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) message: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub(crate) struct ErrorData {
    pub(crate) message: String,
}

impl ServerFrame {
    pub(crate) fn error(message: impl Into<String>) -> Self {
        Self::Error {
            data: ErrorData {
                message: message.into(),
            },
        }
    }

    pub(crate) fn to_json(&self) -> String {
        serde_json::to_string(self).expect("server frame serializes")
    }
}

/// バイナリフレームを (チャンク番号, 本体) に分解する。
pub(crate) fn parse_chunk_frame(payload: &[u8]) -> Result<(u32, &[u8])> {
    if payload.len() < 4 {
        return Err(anyhow!(
            "binary frame too short: {} bytes, need at least 4",
            payload.len()
        ));
    }

    let index = u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]);
    Ok((index, &payload[4..]))
}
