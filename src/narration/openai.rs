//! OpenAI 兼容的语音合成（/audio/speech）
//!
//! 直接用 reqwest 发请求以拿到 HTTP 状态码：429 / 5xx 可重试，其余 4xx 终止。

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;

use crate::llm::ProviderError;
use crate::narration::NarrationProvider;

pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

#[derive(Serialize)]
struct SpeechRequest<'a> {
    model: &'a str,
    input: &'a str,
    voice: &'a str,
    response_format: &'a str,
}

/// 语音合成客户端
pub struct OpenAiSpeechClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    voice: String,
    format: String,
}

impl OpenAiSpeechClient {
    pub fn new(
        base_url: Option<&str>,
        api_key: &str,
        model: &str,
        voice: &str,
        format: &str,
        request_timeout_secs: u64,
    ) -> Result<Self, ProviderError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(request_timeout_secs))
            .build()
            .map_err(|e| ProviderError::Transport(e.to_string()))?;
        Ok(Self {
            http,
            base_url: base_url
                .unwrap_or(OPENAI_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
            voice: voice.to_string(),
            format: format.to_string(),
        })
    }
}

/// 音频格式 → MIME 类型
pub fn mime_for_format(format: &str) -> &'static str {
    match format {
        "wav" => "audio/wav",
        "opus" => "audio/ogg",
        "aac" => "audio/aac",
        "flac" => "audio/flac",
        _ => "audio/mpeg",
    }
}

#[async_trait]
impl NarrationProvider for OpenAiSpeechClient {
    async fn synthesize(&self, text: &str) -> Result<Bytes, ProviderError> {
        let resp = self
            .http
            .post(format!("{}/audio/speech", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&SpeechRequest {
                model: &self.model,
                input: text,
                voice: &self.voice,
                response_format: &self.format,
            })
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(status.as_u16(), body));
        }

        let audio = resp.bytes().await?;
        if audio.is_empty() {
            return Err(ProviderError::MalformedResponse("empty audio payload".into()));
        }
        Ok(audio)
    }

    fn mime_type(&self) -> &'static str {
        mime_for_format(&self.format)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mime_for_format() {
        assert_eq!(mime_for_format("mp3"), "audio/mpeg");
        assert_eq!(mime_for_format("wav"), "audio/wav");
        assert_eq!(mime_for_format("unknown"), "audio/mpeg");
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_retryable_transport() {
        let client =
            OpenAiSpeechClient::new(Some("http://127.0.0.1:9/v1/"), "sk-test", "tts-1", "alloy", "mp3", 2)
                .unwrap();
        assert_eq!(client.base_url, "http://127.0.0.1:9/v1");
        let err = client.synthesize("hello").await.unwrap_err();
        assert_eq!(err.class(), crate::llm::ErrorClass::Retryable);
    }
}
