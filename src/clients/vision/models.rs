//! generateContent API のリクエスト／レスポンス型と応答パースのヘルパ。

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

// --- request (serialize only) ---

#[derive(Debug, Serialize)]
pub(crate) struct GenerateContentRequest {
    pub(crate) contents: Vec<RequestContent>,
    #[serde(rename = "generationConfig", skip_serializing_if = "Option::is_none")]
    pub(crate) generation_config: Option<GenerationConfig>,
}

#[derive(Debug, Serialize)]
pub(crate) struct RequestContent {
    pub(crate) parts: Vec<RequestPart>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub(crate) enum RequestPart {
    Text {
        text: String,
    },
    InlineData {
        #[serde(rename = "inline_data")]
        inline_data: InlineData,
    },
}

#[derive(Debug, Serialize)]
pub(crate) struct InlineData {
    #[serde(rename = "mime_type")]
    pub(crate) mime_type: String,
    /// base64 エンコード済みのメディアバイト。
    pub(crate) data: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) response_modalities: Option<Vec<String>>,
}

// --- response (deserialize only) ---

#[derive(Debug, Deserialize)]
pub(crate) struct GenerateContentResponse {
    #[serde(default)]
    pub(crate) candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Candidate {
    pub(crate) content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CandidateContent {
    #[serde(default)]
    pub(crate) parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ResponsePart {
    #[serde(default)]
    pub(crate) text: Option<String>,
    #[serde(default, rename = "inlineData", alias = "inline_data")]
    pub(crate) inline_data: Option<ResponseInlineData>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ResponseInlineData {
    #[serde(rename = "mimeType", alias = "mime_type")]
    #[allow(dead_code)]
    pub(crate) mime_type: Option<String>,
    pub(crate) data: String,
}

impl GenerateContentResponse {
    /// 最初の候補からテキストパートを連結して返す。
    pub(crate) fn text(&self) -> Result<String> {
        let text: String = self
            .candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|content| {
                content
                    .parts
                    .iter()
                    .filter_map(|p| p.text.as_deref())
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        if text.trim().is_empty() {
            return Err(anyhow!("model returned an empty text response"));
        }
        Ok(text)
    }

    /// 最初の候補から画像データパートを探す。
    pub(crate) fn inline_image(&self) -> Option<&ResponseInlineData> {
        self.candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .and_then(|content| content.parts.iter().find_map(|p| p.inline_data.as_ref()))
    }
}

/// 品質比較の判定結果。
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct QualityVerdict {
    /// 勝者。1 なら先手、2 なら後手。
    pub winner: u8,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
}

fn default_confidence() -> f64 {
    0.5
}

impl QualityVerdict {
    /// 応答の妥当性を検証する。
    pub(crate) fn validate(self) -> Result<Self> {
        if self.winner != 1 && self.winner != 2 {
            return Err(anyhow!("verdict winner must be 1 or 2, got {}", self.winner));
        }
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(anyhow!(
                "verdict confidence must be within [0,1], got {}",
                self.confidence
            ));
        }
        Ok(self)
    }
}

/// モデル出力からJSONオブジェクトを取り出す。
///
/// コードフェンスや前置きの混入に耐えるため、最初の `{` から最後の `}` までを
/// 切り出してからパースする。
pub(crate) fn extract_json_object(raw: &str) -> Result<serde_json::Value> {
    let start = raw
        .find('{')
        .ok_or_else(|| anyhow!("no JSON object in model output: {raw:.120}"))?;
    let end = raw
        .rfind('}')
        .filter(|&end| end >= start)
        .ok_or_else(|| anyhow!("unterminated JSON object in model output"))?;

    serde_json::from_str(&raw[start..=end]).context("failed to parse JSON from model output")
}
