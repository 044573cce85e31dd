//! 语音播放队列
//!
//! 按入队顺序逐个播放，同一时刻最多一个片段在播；静音时不启动新片段。
//! 播放由显式循环驱动（不递归），单个片段失败只记日志并继续下一个。
//! 自动播放受限时不会自主开始，等待 `manual_play`（用户手势）。
//!
//! 队列状态只在同一个同步临界区内读写（检查长度与出队之间没有 `.await`）。

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::audio::{AudioSegment, AudioSink, AutoplayCapability};

#[derive(Debug, Default)]
struct QueueState {
    queue: VecDeque<AudioSegment>,
    playing: bool,
    muted: bool,
    awaiting_gesture: bool,
}

/// 队列状态快照（供 UI 渲染“点击播放”与静音按钮）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueSnapshot {
    pub pending: usize,
    pub playing: bool,
    pub muted: bool,
    pub awaiting_gesture: bool,
}

/// 语音播放队列；clone 共享同一队列
#[derive(Clone)]
pub struct AudioPlaybackQueue {
    state: Arc<Mutex<QueueState>>,
    sink: Arc<dyn AudioSink>,
    autoplay: AutoplayCapability,
}

impl AudioPlaybackQueue {
    pub fn new(sink: Arc<dyn AudioSink>, autoplay: AutoplayCapability, start_muted: bool) -> Self {
        Self {
            state: Arc::new(Mutex::new(QueueState {
                muted: start_muted,
                ..QueueState::default()
            })),
            sink,
            autoplay,
        }
    }

    /// 先探测自动播放能力再创建
    pub async fn with_probe(sink: Arc<dyn AudioSink>, start_muted: bool) -> Self {
        let autoplay = super::probe_capability(sink.as_ref()).await;
        Self::new(sink, autoplay, start_muted)
    }

    pub fn autoplay(&self) -> AutoplayCapability {
        self.autoplay
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        let s = self.lock();
        QueueSnapshot {
            pending: s.queue.len(),
            playing: s.playing,
            muted: s.muted,
            awaiting_gesture: s.awaiting_gesture,
        }
    }

    /// 在同一临界区内判断能否开始播放，可以则占用 playing 标志
    fn try_claim(s: &mut QueueState, autoplay: AutoplayCapability) -> bool {
        if s.muted || s.playing || s.queue.is_empty() {
            return false;
        }
        if autoplay == AutoplayCapability::RequiresGesture {
            s.awaiting_gesture = true;
            return false;
        }
        s.playing = true;
        true
    }

    /// 入队；未静音且空闲时在后台开始播放
    pub fn enqueue(&self, segment: AudioSegment) {
        let start = {
            let mut s = self.lock();
            s.queue.push_back(segment);
            Self::try_claim(&mut s, self.autoplay)
        };
        if start {
            self.spawn_drain();
        }
    }

    fn spawn_drain(&self) {
        let queue = self.clone();
        tokio::spawn(async move {
            queue.drain(false).await;
        });
    }

    /// 播放下一个片段直到队列为空或静音；已在播放时立即返回 0
    ///
    /// 返回本次处理（成功或失败）的片段数。
    pub async fn play_next(&self) -> usize {
        let start = {
            let mut s = self.lock();
            Self::try_claim(&mut s, self.autoplay)
        };
        if start {
            self.drain(false).await
        } else {
            0
        }
    }

    /// 切换静音，返回新的静音状态
    ///
    /// 静音：丢弃当时排队中的片段（正在播放的片段会播完）；之后入队的片段保留。
    /// 取消静音：队列非空且空闲时恢复播放。
    pub fn toggle_mute(&self) -> bool {
        let (muted, start, discarded) = {
            let mut s = self.lock();
            s.muted = !s.muted;
            let discarded = if s.muted {
                let n = s.queue.len();
                s.queue.clear();
                s.awaiting_gesture = false;
                n
            } else {
                0
            };
            let start = Self::try_claim(&mut s, self.autoplay);
            (s.muted, start, discarded)
        };

        if discarded > 0 {
            tracing::debug!(discarded, "muted: dropped queued narration");
        }
        if start {
            self.spawn_drain();
        }
        muted
    }

    /// 用户手势触发的播放：播放队首片段（自动播放受限平台上唯一能出声的路径）
    pub async fn manual_play(&self) -> usize {
        let start = {
            let mut s = self.lock();
            if s.muted || s.playing || s.queue.is_empty() {
                false
            } else {
                s.playing = true;
                s.awaiting_gesture = false;
                true
            }
        };
        if start {
            self.drain(true).await
        } else {
            0
        }
    }

    /// 播放循环；调用方必须已占用 playing 标志
    async fn drain(&self, mut gesture: bool) -> usize {
        let mut processed = 0usize;

        loop {
            let segment = {
                let mut s = self.lock();
                if s.muted || s.queue.is_empty() {
                    s.playing = false;
                    break;
                }
                if !gesture && self.autoplay == AutoplayCapability::RequiresGesture {
                    s.playing = false;
                    s.awaiting_gesture = true;
                    break;
                }
                match s.queue.pop_front() {
                    Some(segment) => segment,
                    None => {
                        s.playing = false;
                        break;
                    }
                }
            };
            gesture = false;

            match self.sink.play(&segment).await {
                Ok(()) => tracing::debug!(bytes = segment.payload.len(), "narration segment played"),
                Err(e) => tracing::warn!("narration segment skipped: {}", e),
            }
            processed += 1;
        }

        tracing::debug!(processed, "playback queue drained");
        processed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::PlaybackError;
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::time::Duration;
    use tokio::sync::{mpsc, Semaphore};

    fn seg(tag: &'static str) -> AudioSegment {
        AudioSegment::new(Bytes::from_static(tag.as_bytes()), "audio/mpeg")
    }

    /// 记录每次播放尝试；payload 为 "bad" 的片段播放失败；可用 gate 阻塞播放完成
    struct RecordingSink {
        attempts: mpsc::UnboundedSender<(String, bool)>,
        gate: Option<Arc<Semaphore>>,
    }

    #[async_trait]
    impl AudioSink for RecordingSink {
        async fn play(&self, segment: &AudioSegment) -> Result<(), PlaybackError> {
            let tag = String::from_utf8_lossy(&segment.payload).to_string();
            let ok = tag != "bad";
            let _ = self.attempts.send((tag, ok));
            if let Some(gate) = &self.gate {
                gate.acquire().await.expect("gate closed").forget();
            }
            if ok {
                Ok(())
            } else {
                Err(PlaybackError::Decode("corrupt".into()))
            }
        }
    }

    fn queue_with(
        gate: Option<Arc<Semaphore>>,
        autoplay: AutoplayCapability,
        muted: bool,
    ) -> (AudioPlaybackQueue, mpsc::UnboundedReceiver<(String, bool)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sink = Arc::new(RecordingSink { attempts: tx, gate });
        (AudioPlaybackQueue::new(sink, autoplay, muted), rx)
    }

    async fn next_attempt(rx: &mut mpsc::UnboundedReceiver<(String, bool)>) -> (String, bool) {
        tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("no playback attempt")
            .expect("sink dropped")
    }

    #[tokio::test]
    async fn test_muted_enqueue_then_unmute_plays_head_once() {
        let gate = Arc::new(Semaphore::new(0));
        let (queue, mut rx) = queue_with(Some(gate.clone()), AutoplayCapability::Allowed, true);

        queue.enqueue(seg("a"));
        queue.enqueue(seg("b"));
        queue.enqueue(seg("c"));
        tokio::task::yield_now().await;
        assert!(rx.try_recv().is_err());
        assert_eq!(queue.snapshot().pending, 3);

        assert!(!queue.toggle_mute());
        assert_eq!(next_attempt(&mut rx).await.0, "a");
        // 队首仍在播放（gate 未放行），不应出现第二次尝试
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(rx.try_recv().is_err());
        assert_eq!(queue.snapshot().pending, 2);
        assert!(queue.snapshot().playing);

        gate.add_permits(2);
        assert_eq!(next_attempt(&mut rx).await.0, "b");
        assert_eq!(next_attempt(&mut rx).await.0, "c");
    }

    #[tokio::test]
    async fn test_failed_segment_does_not_block_next() {
        let (queue, mut rx) = queue_with(None, AutoplayCapability::Allowed, false);
        queue.enqueue(seg("bad"));
        queue.enqueue(seg("good"));

        assert_eq!(next_attempt(&mut rx).await, ("bad".to_string(), false));
        assert_eq!(next_attempt(&mut rx).await, ("good".to_string(), true));
        tokio::time::sleep(Duration::from_millis(10)).await;
        let snap = queue.snapshot();
        assert_eq!(snap.pending, 0);
        assert!(!snap.playing);
    }

    #[tokio::test]
    async fn test_play_next_drains_in_order_with_counter() {
        let (queue, mut rx) = queue_with(None, AutoplayCapability::Allowed, true);
        for tag in ["1", "bad", "bad", "2"] {
            queue.enqueue(seg(tag));
        }
        // 静音时 play_next 什么都不做
        assert_eq!(queue.play_next().await, 0);

        {
            let mut s = queue.lock();
            s.muted = false;
        }
        assert_eq!(queue.play_next().await, 4);
        let order: Vec<String> = (0..4).map(|_| rx.try_recv().unwrap().0).collect();
        assert_eq!(order, vec!["1", "bad", "bad", "2"]);
    }

    #[tokio::test]
    async fn test_mute_discards_queued_segments() {
        let gate = Arc::new(Semaphore::new(0));
        let (queue, mut rx) = queue_with(Some(gate.clone()), AutoplayCapability::Allowed, false);
        queue.enqueue(seg("playing"));
        queue.enqueue(seg("queued"));
        assert_eq!(next_attempt(&mut rx).await.0, "playing");

        assert!(queue.toggle_mute());
        assert_eq!(queue.snapshot().pending, 0);

        gate.add_permits(1);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(rx.try_recv().is_err());
        assert!(!queue.snapshot().playing);
    }

    #[tokio::test]
    async fn test_gesture_required_waits_for_manual_play() {
        let (queue, mut rx) = queue_with(None, AutoplayCapability::RequiresGesture, false);
        queue.enqueue(seg("x"));
        queue.enqueue(seg("y"));
        tokio::task::yield_now().await;
        assert!(rx.try_recv().is_err());
        assert!(queue.snapshot().awaiting_gesture);

        assert_eq!(queue.play_next().await, 0);
        assert_eq!(queue.manual_play().await, 1);
        assert_eq!(rx.try_recv().unwrap().0, "x");
        let snap = queue.snapshot();
        assert_eq!(snap.pending, 1);
        assert!(snap.awaiting_gesture);

        assert_eq!(queue.manual_play().await, 1);
        assert_eq!(rx.try_recv().unwrap().0, "y");
        assert!(!queue.snapshot().awaiting_gesture);
    }
}
