//! 语音播报：把模拟角色的回复合成为音频
//!
//! 播报是可选功能：未配置时直接跳过；合成失败只记日志，不影响文字回复。

pub mod openai;

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;

use crate::config::NarrationSection;
use crate::llm::ProviderError;

pub use openai::{mime_for_format, OpenAiSpeechClient};

/// 语音合成服务：文本 → 音频字节
#[async_trait]
pub trait NarrationProvider: Send + Sync {
    async fn synthesize(&self, text: &str) -> Result<Bytes, ProviderError>;

    /// 合成结果的 MIME 类型
    fn mime_type(&self) -> &'static str {
        "audio/mpeg"
    }
}

/// Mock 语音合成：预置结果按 FIFO 弹出，队列空时返回文本字节本身
#[derive(Debug, Default)]
pub struct MockNarrator {
    results: Mutex<VecDeque<Result<Bytes, ProviderError>>>,
    calls: Mutex<Vec<String>>,
}

impl MockNarrator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_error(&self, error: ProviderError) {
        self.results
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(Err(error));
    }

    /// 收到的合成请求文本（按调用顺序）
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl NarrationProvider for MockNarrator {
    async fn synthesize(&self, text: &str) -> Result<Bytes, ProviderError> {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(text.to_string());
        let scripted = self
            .results
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front();
        scripted.unwrap_or_else(|| Ok(Bytes::copy_from_slice(text.as_bytes())))
    }
}

/// 按 [narration] 配置创建语音合成服务；未启用或没有 API Key 时返回 None
pub fn create_narrator_from_config(
    cfg: &NarrationSection,
    request_timeout_secs: u64,
) -> Option<Arc<dyn NarrationProvider>> {
    if !cfg.enabled {
        tracing::debug!("narration disabled by config");
        return None;
    }
    if cfg.provider == "mock" {
        return Some(Arc::new(MockNarrator::new()));
    }

    let key = std::env::var("OPENAI_API_KEY").ok();
    if key.as_deref().unwrap_or("").trim().is_empty() {
        tracing::debug!("narration skipped: no OPENAI_API_KEY");
        return None;
    }

    match OpenAiSpeechClient::new(
        cfg.base_url.as_deref(),
        key.as_deref().unwrap_or_default(),
        &cfg.model,
        &cfg.voice,
        &cfg.format,
        request_timeout_secs,
    ) {
        Ok(client) => Some(Arc::new(client)),
        Err(e) => {
            tracing::warn!("narration client unavailable: {}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_narration_is_none() {
        let cfg = NarrationSection {
            enabled: false,
            ..NarrationSection::default()
        };
        assert!(create_narrator_from_config(&cfg, 30).is_none());
    }

    #[tokio::test]
    async fn test_mock_narrator_scripted_error_then_default() {
        let narrator = MockNarrator::new();
        narrator.push_error(ProviderError::Timeout);
        assert_eq!(narrator.synthesize("a").await, Err(ProviderError::Timeout));
        assert_eq!(narrator.synthesize("b").await.unwrap(), Bytes::from_static(b"b"));
        assert_eq!(narrator.calls(), vec!["a".to_string(), "b".to_string()]);
    }
}
