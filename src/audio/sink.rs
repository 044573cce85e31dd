//! 音频输出端：播放单个片段，并提供自动播放能力探测
//!
//! 能力探测代替按 User-Agent 判断平台：尝试一次空播放，被拒绝则说明需要用户手势才能出声。

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

/// 一段待播放的语音
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioSegment {
    pub payload: Bytes,
    pub mime_type: &'static str,
}

impl AudioSegment {
    pub fn new(payload: impl Into<Bytes>, mime_type: &'static str) -> Self {
        Self {
            payload: payload.into(),
            mime_type,
        }
    }
}

/// 单个片段的播放错误；队列遇到后视为该片段已消费，不重试
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlaybackError {
    #[error("autoplay blocked without user gesture")]
    AutoplayBlocked,

    #[error("cannot decode audio: {0}")]
    Decode(String),

    #[error("audio output failed: {0}")]
    Output(String),
}

/// 自动播放能力
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutoplayCapability {
    /// 可以自主开始播放
    Allowed,
    /// 只有用户手势触发的调用才能开始播放（显示“点击播放”）
    RequiresGesture,
}

/// 音频输出端
#[async_trait]
pub trait AudioSink: Send + Sync {
    /// 播放一个片段，播放完成后返回
    async fn play(&self, segment: &AudioSegment) -> Result<(), PlaybackError>;

    /// 尝试一次静音 / 空播放；返回 AutoplayBlocked 表示需要用户手势
    async fn probe_autoplay(&self) -> Result<(), PlaybackError> {
        Ok(())
    }
}

/// 通过探测得出自动播放能力
pub async fn probe_capability(sink: &dyn AudioSink) -> AutoplayCapability {
    match sink.probe_autoplay().await {
        Ok(()) => AutoplayCapability::Allowed,
        Err(PlaybackError::AutoplayBlocked) => {
            tracing::info!("autoplay blocked; narration will wait for a user gesture");
            AutoplayCapability::RequiresGesture
        }
        Err(e) => {
            tracing::warn!("autoplay probe failed, assuming allowed: {}", e);
            AutoplayCapability::Allowed
        }
    }
}

/// 丢弃所有片段（未接音频设备时使用）
#[derive(Debug, Default)]
pub struct NullAudioSink;

#[async_trait]
impl AudioSink for NullAudioSink {
    async fn play(&self, _segment: &AudioSegment) -> Result<(), PlaybackError> {
        Ok(())
    }
}

/// 终端模式：把“播放”的片段按顺序落盘为 0001.mp3、0002.mp3 …，由外部播放器打开
#[derive(Debug)]
pub struct SpoolAudioSink {
    dir: PathBuf,
    counter: AtomicU64,
}

fn extension_for(mime_type: &str) -> &'static str {
    match mime_type {
        "audio/wav" => "wav",
        "audio/ogg" => "ogg",
        "audio/aac" => "aac",
        "audio/flac" => "flac",
        _ => "mp3",
    }
}

impl SpoolAudioSink {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            counter: AtomicU64::new(0),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[async_trait]
impl AudioSink for SpoolAudioSink {
    async fn play(&self, segment: &AudioSegment) -> Result<(), PlaybackError> {
        if segment.payload.is_empty() {
            return Err(PlaybackError::Decode("empty payload".into()));
        }
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| PlaybackError::Output(e.to_string()))?;

        let n = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        let path = self
            .dir
            .join(format!("{:04}.{}", n, extension_for(segment.mime_type)));
        tokio::fs::write(&path, &segment.payload)
            .await
            .map_err(|e| PlaybackError::Output(e.to_string()))?;

        tracing::info!(path = %path.display(), bytes = segment.payload.len(), "narration segment ready");
        Ok(())
    }

    async fn probe_autoplay(&self) -> Result<(), PlaybackError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| PlaybackError::Output(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct BlockedSink;

    #[async_trait]
    impl AudioSink for BlockedSink {
        async fn play(&self, _segment: &AudioSegment) -> Result<(), PlaybackError> {
            Err(PlaybackError::AutoplayBlocked)
        }

        async fn probe_autoplay(&self) -> Result<(), PlaybackError> {
            Err(PlaybackError::AutoplayBlocked)
        }
    }

    #[tokio::test]
    async fn test_probe_capability() {
        assert_eq!(probe_capability(&NullAudioSink).await, AutoplayCapability::Allowed);
        assert_eq!(
            probe_capability(&BlockedSink).await,
            AutoplayCapability::RequiresGesture
        );
    }

    #[tokio::test]
    async fn test_spool_sink_writes_numbered_files() {
        let dir = tempfile::tempdir().unwrap();
        let sink = SpoolAudioSink::new(dir.path().join("audio"));
        sink.play(&AudioSegment::new(&b"one"[..], "audio/mpeg")).await.unwrap();
        sink.play(&AudioSegment::new(&b"two"[..], "audio/wav")).await.unwrap();

        assert_eq!(std::fs::read(sink.dir().join("0001.mp3")).unwrap(), b"one");
        assert_eq!(std::fs::read(sink.dir().join("0002.wav")).unwrap(), b"two");
    }

    #[tokio::test]
    async fn test_spool_sink_rejects_empty_payload() {
        let dir = tempfile::tempdir().unwrap();
        let sink = SpoolAudioSink::new(dir.path());
        let err = sink
            .play(&AudioSegment::new(Bytes::new(), "audio/mpeg"))
            .await
            .unwrap_err();
        assert!(matches!(err, PlaybackError::Decode(_)));
    }
}
