//! 训练器构建器：按配置组装编排器的各个组件
//!
//! 终端驱动与集成测试共用同一套初始化逻辑。

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[cfg(feature = "playback")]
use crate::audio::RodioAudioSink;
use crate::audio::{AudioPlaybackQueue, AudioSink, NullAudioSink, SpoolAudioSink};
use crate::config::AppConfig;
use crate::core::{ExchangeOrchestrator, TrainerError};
use crate::llm::{create_chat_client, LlmClient, RetryExecutor};
use crate::memory::{HttpTranscriptStore, InMemoryTranscriptStore, SqliteTranscriptStore, TranscriptStore};
use crate::narration::{create_narrator_from_config, NarrationProvider};
use crate::scenario::{ScenarioLoader, TrainingBrief};
use crate::session::SessionStore;

/// 训练器构建器
pub struct TrainerBuilder {
    config: AppConfig,
    headless_audio: bool,
}

impl TrainerBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            headless_audio: false,
        }
    }

    /// 不落盘播放片段（测试或无音频环境）
    pub fn with_headless_audio(mut self, headless: bool) -> Self {
        self.headless_audio = headless;
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn build_sessions(&self) -> Arc<SessionStore> {
        Arc::new(SessionStore::new(Duration::from_secs(
            self.config.app.idle_window_secs,
        )))
    }

    pub fn build_chat(&self) -> Arc<dyn LlmClient> {
        create_chat_client(&self.config.llm)
    }

    pub fn build_narrator(&self) -> Option<Arc<dyn NarrationProvider>> {
        create_narrator_from_config(&self.config.narration, self.config.llm.timeouts.request)
    }

    pub fn build_executor(&self) -> RetryExecutor {
        RetryExecutor::new(self.config.retry.to_retry_config())
    }

    /// 按 [storage] 选择对话记录后端
    pub fn build_transcripts(&self) -> Result<Arc<dyn TranscriptStore>, TrainerError> {
        let storage = &self.config.storage;
        match storage.backend.as_str() {
            "memory" => Ok(Arc::new(InMemoryTranscriptStore::new())),
            "http" => {
                let base = storage.base_url.as_deref().ok_or_else(|| {
                    TrainerError::Config("storage.base_url is required for the http backend".to_string())
                })?;
                let store = HttpTranscriptStore::new(base, storage.timeout_secs)
                    .map_err(|e| TrainerError::Storage(e.to_string()))?;
                Ok(Arc::new(store))
            }
            "sqlite" => {
                let path = storage
                    .path
                    .clone()
                    .unwrap_or_else(|| self.config.app.data_dir().join("transcripts.db"));
                let store = SqliteTranscriptStore::open(&path)
                    .map_err(|e| TrainerError::Storage(e.to_string()))?;
                tracing::info!(path = %path.display(), "using sqlite transcript store");
                Ok(Arc::new(store))
            }
            other => Err(TrainerError::Config(format!(
                "unknown storage backend: {other}"
            ))),
        }
    }

    /// 创建播放队列（先探测自动播放能力）
    pub async fn build_audio(&self) -> Result<AudioPlaybackQueue, TrainerError> {
        let sink = self.build_sink().await?;
        Ok(AudioPlaybackQueue::with_probe(sink, self.config.audio.start_muted).await)
    }

    /// 按 [audio].sink 选择输出端；headless 时一律丢弃
    async fn build_sink(&self) -> Result<Arc<dyn AudioSink>, TrainerError> {
        if self.headless_audio {
            return Ok(Arc::new(NullAudioSink));
        }
        match self.config.audio.sink.as_str() {
            "null" => Ok(Arc::new(NullAudioSink)),
            "spool" => Ok(Arc::new(SpoolAudioSink::new(self.spool_dir()))),
            "rodio" => self.device_sink(),
            "auto" => Ok(self.auto_sink().await),
            other => Err(TrainerError::Config(format!("unknown audio sink: {other}"))),
        }
    }

    #[cfg(feature = "playback")]
    fn device_sink(&self) -> Result<Arc<dyn AudioSink>, TrainerError> {
        Ok(Arc::new(RodioAudioSink::new()))
    }

    #[cfg(not(feature = "playback"))]
    fn device_sink(&self) -> Result<Arc<dyn AudioSink>, TrainerError> {
        Err(TrainerError::Config(
            "audio.sink = \"rodio\" requires the `playback` feature".to_string(),
        ))
    }

    /// 能打开声卡就直接播放，否则落盘
    #[cfg(feature = "playback")]
    async fn auto_sink(&self) -> Arc<dyn AudioSink> {
        let device = RodioAudioSink::new();
        match device.probe_autoplay().await {
            Ok(()) => Arc::new(device),
            Err(e) => {
                tracing::warn!(error = %e, "no audio output device, spooling narration to files");
                Arc::new(SpoolAudioSink::new(self.spool_dir()))
            }
        }
    }

    #[cfg(not(feature = "playback"))]
    async fn auto_sink(&self) -> Arc<dyn AudioSink> {
        Arc::new(SpoolAudioSink::new(self.spool_dir()))
    }

    fn spool_dir(&self) -> PathBuf {
        self.config
            .audio
            .spool_dir
            .clone()
            .unwrap_or_else(|| self.config.app.data_dir().join("audio"))
    }

    /// 加载场景：优先 [scenario].default_id，否则取目录中第一个
    pub async fn load_brief(&self) -> Result<TrainingBrief, TrainerError> {
        let loader = match &self.config.scenario.dir {
            Some(dir) => ScenarioLoader::new(dir),
            None => ScenarioLoader::from_default(),
        };
        let briefs = loader
            .load_all()
            .await
            .map_err(|e| TrainerError::Config(e.to_string()))?;

        match &self.config.scenario.default_id {
            Some(id) => loader
                .get(id)
                .await
                .map_err(|e| TrainerError::Config(e.to_string())),
            None => briefs.into_iter().next().ok_or_else(|| {
                TrainerError::Config(format!(
                    "no scenarios found in {}",
                    loader.dir().display()
                ))
            }),
        }
    }

    /// 组装编排器；brief 由调用方提供（通常来自 `load_brief`）
    pub async fn build(&self, brief: TrainingBrief) -> Result<ExchangeOrchestrator, TrainerError> {
        let transcripts = self.build_transcripts()?;
        let mut orchestrator =
            ExchangeOrchestrator::new(self.build_sessions(), self.build_chat(), transcripts, brief)
                .with_executor(self.build_executor());

        if let Some(narrator) = self.build_narrator() {
            orchestrator = orchestrator
                .with_narrator(narrator)
                .with_audio(self.build_audio().await?);
        }
        Ok(orchestrator)
    }
}
