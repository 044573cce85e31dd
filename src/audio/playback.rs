//! 本机声卡播放（rodio），需启用 `playback` 特性
//!
//! 先解码再打开输出设备：坏数据直接报 Decode，不占用声卡。解码与播放都是阻塞调用，放在 spawn_blocking 中执行。

use std::io::Cursor;

use async_trait::async_trait;
use bytes::Bytes;
use rodio::{Decoder, OutputStream, OutputStreamBuilder, Sink};

use crate::audio::{AudioSegment, AudioSink, PlaybackError};

/// 用默认输出设备播放，play 在片段播放完后返回
#[derive(Debug, Default)]
pub struct RodioAudioSink;

impl RodioAudioSink {
    pub fn new() -> Self {
        Self
    }
}

fn decode(payload: Bytes) -> Result<Decoder<Cursor<Bytes>>, PlaybackError> {
    if payload.is_empty() {
        return Err(PlaybackError::Decode("empty payload".into()));
    }
    Decoder::new(Cursor::new(payload)).map_err(|e| PlaybackError::Decode(e.to_string()))
}

fn open_output() -> Result<OutputStream, PlaybackError> {
    OutputStreamBuilder::open_default_stream().map_err(|e| PlaybackError::Output(e.to_string()))
}

fn play_blocking(payload: Bytes) -> Result<(), PlaybackError> {
    let source = decode(payload)?;
    let stream = open_output()?;
    let sink = Sink::connect_new(&stream.mixer());
    sink.append(source);
    sink.sleep_until_end();
    Ok(())
}

#[async_trait]
impl AudioSink for RodioAudioSink {
    async fn play(&self, segment: &AudioSegment) -> Result<(), PlaybackError> {
        let payload = segment.payload.clone();
        tokio::task::spawn_blocking(move || play_blocking(payload))
            .await
            .map_err(|e| PlaybackError::Output(e.to_string()))?
    }

    /// 终端没有自动播放限制；这里只确认默认输出设备能打开
    async fn probe_autoplay(&self) -> Result<(), PlaybackError> {
        tokio::task::spawn_blocking(|| open_output().map(drop))
            .await
            .map_err(|e| PlaybackError::Output(e.to_string()))?
    }
}
