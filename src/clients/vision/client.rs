use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use bytes::Bytes;
use reqwest::{Client, Url};
use tracing::{debug, warn};

use crate::config::Config;
use crate::store::models::MediaType;
use crate::util::retry::{RetryConfig, with_retries};

use super::models::{
    GenerateContentRequest, GenerateContentResponse, GenerationConfig, InlineData, QualityVerdict,
    RequestContent, RequestPart, extract_json_object,
};
use super::prompts;
use super::{MediaInput, ModelAdapter};

/// generateContent 形式の REST API を話すクライアント。
///
/// 全呼び出しに per-call タイムアウトと Full Jitter リトライを適用する。
#[derive(Debug, Clone)]
pub struct VisionClient {
    client: Client,
    base_url: Url,
    api_key: String,
    vision_model: String,
    enhance_model: String,
    call_timeout: Duration,
    retry: RetryConfig,
}

impl VisionClient {
    pub fn from_config(config: &Config) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .context("failed to build model provider client")?;

        let mut base = config.model_base_url().to_string();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base_url = Url::parse(&base).context("invalid model provider base URL")?;

        Ok(Self {
            client,
            base_url,
            api_key: config.model_api_key().to_string(),
            vision_model: config.vision_model().to_string(),
            enhance_model: config.enhance_model().to_string(),
            call_timeout: config.model_call_timeout(),
            retry: RetryConfig::new(
                config.model_max_retries(),
                config.model_backoff_base_ms(),
                config.model_backoff_cap_ms(),
            ),
        })
    }

    fn endpoint(&self, model: &str) -> Result<Url> {
        self.base_url
            .join(&format!("v1beta/models/{model}:generateContent"))
            .context("failed to build generateContent URL")
    }

    fn media_part(media: MediaInput<'_>) -> RequestPart {
        RequestPart::InlineData {
            inline_data: InlineData {
                mime_type: media.mime_type.to_string(),
                data: BASE64.encode(media.bytes),
            },
        }
    }

    /// リクエストを一度だけ送信する。リトライ判定は呼び出し側で行う。
    async fn generate_once(
        &self,
        model: &str,
        request: &GenerateContentRequest,
    ) -> Result<GenerateContentResponse> {
        let url = self.endpoint(model)?;

        let send = async {
            let response = self
                .client
                .post(url)
                .header("x-goog-api-key", &self.api_key)
                .json(request)
                .send()
                .await
                .context("model provider request failed")?
                .error_for_status()
                .context("model provider returned error status")?;

            response
                .json::<GenerateContentResponse>()
                .await
                .context("failed to deserialize model provider response")
        };

        tokio::time::timeout(self.call_timeout, send)
            .await
            .map_err(anyhow::Error::new)
            .context("model provider call timed out")?
    }

    async fn generate(
        &self,
        operation: &str,
        model: &str,
        request: GenerateContentRequest,
    ) -> Result<GenerateContentResponse> {
        with_retries(self.retry, operation, || self.generate_once(model, &request)).await
    }

    fn text_request(prompt: &str, media: Vec<MediaInput<'_>>) -> GenerateContentRequest {
        let mut parts = vec![RequestPart::Text {
            text: prompt.to_string(),
        }];
        parts.extend(media.into_iter().map(Self::media_part));

        GenerateContentRequest {
            contents: vec![RequestContent { parts }],
            generation_config: Some(GenerationConfig {
                temperature: Some(0.2),
                response_modalities: None,
            }),
        }
    }
}

#[async_trait]
impl ModelAdapter for VisionClient {
    async fn describe(&self, media: MediaInput<'_>) -> Result<String> {
        let request = Self::text_request(prompts::DESCRIBE_PROMPT, vec![media]);
        let response = self.generate("describe", &self.vision_model, request).await?;

        let text = response.text()?;
        Ok(text.trim().to_string())
    }

    async fn same_take(&self, a: MediaInput<'_>, b: MediaInput<'_>) -> Result<bool> {
        let request = Self::text_request(prompts::SAME_TAKE_PROMPT, vec![a, b]);
        let response = self.generate("same_take", &self.vision_model, request).await?;

        let text = response.text()?;
        let answer = text.trim().to_uppercase();
        if answer.contains("SAME") && !answer.contains("DIFFERENT") {
            return Ok(true);
        }
        if answer.contains("DIFFERENT") {
            return Ok(false);
        }

        warn!(answer = %text.trim(), "ambiguous same-take answer, treating as different");
        Ok(false)
    }

    async fn compare_quality(
        &self,
        media_type: MediaType,
        a: MediaInput<'_>,
        b: MediaInput<'_>,
    ) -> Result<QualityVerdict> {
        let prompt = match media_type {
            MediaType::Image => prompts::COMPARE_IMAGES_PROMPT,
            MediaType::Video => prompts::COMPARE_VIDEOS_PROMPT,
        };
        let request = Self::text_request(prompt, vec![a, b]);
        let response = self
            .generate("compare_quality", &self.vision_model, request)
            .await?;

        let text = response.text()?;
        let value = extract_json_object(&text)?;
        let verdict: QualityVerdict = serde_json::from_value(value)
            .context("quality verdict did not match the expected shape")?;

        verdict.validate()
    }

    async fn enhance(&self, media: MediaInput<'_>) -> Result<Option<Bytes>> {
        let request = GenerateContentRequest {
            contents: vec![RequestContent {
                parts: vec![
                    RequestPart::Text {
                        text: prompts::ENHANCE_PROMPT.to_string(),
                    },
                    Self::media_part(media),
                ],
            }],
            generation_config: Some(GenerationConfig {
                temperature: None,
                response_modalities: Some(vec!["TEXT".to_string(), "IMAGE".to_string()]),
            }),
        };

        let response = self.generate("enhance", &self.enhance_model, request).await?;

        let Some(image) = response.inline_image() else {
            debug!("enhance call returned no image part");
            return Ok(None);
        };

        let bytes = BASE64
            .decode(image.data.as_bytes())
            .context("failed to decode enhanced image payload")?;
        Ok(Some(Bytes::from(bytes)))
    }

    async fn name_group(&self, labels: &[String]) -> Result<String> {
        if labels.is_empty() {
            return Err(anyhow!("cannot name a group without labels"));
        }

        let prompt = prompts::name_group_prompt(labels);
        let request = GenerateContentRequest {
            contents: vec![RequestContent {
                parts: vec![RequestPart::Text { text: prompt }],
            }],
            generation_config: Some(GenerationConfig {
                temperature: Some(0.4),
                response_modalities: None,
            }),
        };

        let response = self.generate("name_group", &self.vision_model, request).await?;
        let name = response.text()?.trim().trim_matches('"').to_string();
        Ok(name)
    }
}
