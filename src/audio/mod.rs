//! 音频层：播放队列与输出端（声卡 / 落盘 / 丢弃）

#[cfg(feature = "playback")]
pub mod playback;
pub mod queue;
pub mod sink;

#[cfg(feature = "playback")]
pub use playback::RodioAudioSink;

pub use queue::{AudioPlaybackQueue, QueueSnapshot};
pub use sink::{
    probe_capability, AudioSegment, AudioSink, AutoplayCapability, NullAudioSink, PlaybackError,
    SpoolAudioSink,
};
