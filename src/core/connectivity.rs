//! 网络恢复监控
//!
//! 写入失败的发言进入待写缓冲区；收到 Online 事件（或在线时同一对话再次写入）后按原顺序逐条补写，
//! 成功的移出，失败的留待下一次补写。同一对话有积压时，新条目排在积压之后。
//! 补写不做退避：触发源是明确的网络状态变化，而不是定时重试。

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::memory::{Exchange, TranscriptStore};

/// 离线横幅文案
pub const OFFLINE_NOTICE: &str = "Messages will be saved when your connection returns.";

/// 网络状态事件
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityEvent {
    Online,
    Offline,
}

/// 待补写的发言
#[derive(Debug, Clone)]
pub struct PendingExchange {
    pub conversation_id: String,
    pub exchange: Exchange,
    /// 本地视图中的条目 ID，补写成功后用于确认
    pub local_id: Option<u64>,
}

/// 一次补写的结果
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReplayReport {
    pub persisted: usize,
    pub remaining: usize,
    pub confirmed_local_ids: Vec<u64>,
}

/// 网络恢复监控器
pub struct ConnectivityMonitor {
    offline: AtomicBool,
    pending: Mutex<VecDeque<PendingExchange>>,
    transcripts: Arc<dyn TranscriptStore>,
}

impl ConnectivityMonitor {
    pub fn new(transcripts: Arc<dyn TranscriptStore>) -> Self {
        Self {
            offline: AtomicBool::new(false),
            pending: Mutex::new(VecDeque::new()),
            transcripts,
        }
    }

    pub fn is_offline(&self) -> bool {
        self.offline.load(Ordering::SeqCst)
    }

    /// 标记离线；返回是否为新进入离线状态
    pub fn mark_offline(&self) -> bool {
        !self.offline.swap(true, Ordering::SeqCst)
    }

    /// 放入待写缓冲区（追加到末尾）
    pub async fn defer(&self, entry: PendingExchange) {
        let mut pending = self.pending.lock().await;
        pending.push_back(entry);
        tracing::debug!(buffered = pending.len(), "exchange deferred until online");
    }

    pub async fn pending_len(&self) -> usize {
        self.pending.lock().await.len()
    }

    /// 该对话是否还有未补写的条目（补写进行中时等待其结束）
    pub async fn has_pending(&self, conversation_id: &str) -> bool {
        self.pending
            .lock()
            .await
            .iter()
            .any(|e| e.conversation_id == conversation_id)
    }

    /// 处理网络状态事件
    pub async fn handle(&self, event: ConnectivityEvent) -> ReplayReport {
        match event {
            ConnectivityEvent::Offline => {
                if self.mark_offline() {
                    tracing::info!("connection lost, deferring transcript writes");
                }
                ReplayReport {
                    remaining: self.pending_len().await,
                    ..ReplayReport::default()
                }
            }
            ConnectivityEvent::Online => {
                self.offline.store(false, Ordering::SeqCst);
                self.flush().await
            }
        }
    }

    /// 按原顺序补写缓冲区，不改变离线标记
    ///
    /// 补写期间持有缓冲区锁，同一对话的新条目只能排在补写之后。
    /// 某个对话的一条补写失败后，该对话后续条目本轮不再尝试，保持记录顺序。
    pub async fn flush(&self) -> ReplayReport {
        let mut pending = self.pending.lock().await;
        if pending.is_empty() {
            return ReplayReport::default();
        }
        tracing::info!(buffered = pending.len(), "replaying deferred exchanges");

        let mut report = ReplayReport::default();
        let mut kept = VecDeque::new();
        let mut blocked: HashSet<String> = HashSet::new();

        for entry in std::mem::take(&mut *pending) {
            if blocked.contains(&entry.conversation_id) {
                kept.push_back(entry);
                continue;
            }
            match self
                .transcripts
                .append(&entry.conversation_id, &entry.exchange)
                .await
            {
                Ok(()) => {
                    report.persisted += 1;
                    if let Some(id) = entry.local_id {
                        report.confirmed_local_ids.push(id);
                    }
                }
                Err(e) => {
                    tracing::warn!(conversation_id = %entry.conversation_id, error = %e, "replay failed, keeping buffered");
                    blocked.insert(entry.conversation_id.clone());
                    kept.push_back(entry);
                }
            }
        }

        *pending = kept;
        report.remaining = pending.len();
        report
    }
}

/// 后台探测网络：定时 TCP 连接 target，只在状态变化时发送事件
pub fn spawn_probe(
    target: String,
    interval: Duration,
    tx: mpsc::Sender<ConnectivityEvent>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let connect_timeout = interval.min(Duration::from_secs(5));
        let mut online = true;
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let reachable = matches!(
                        tokio::time::timeout(connect_timeout, TcpStream::connect(target.as_str())).await,
                        Ok(Ok(_))
                    );
                    if reachable != online {
                        online = reachable;
                        let event = if online { ConnectivityEvent::Online } else { ConnectivityEvent::Offline };
                        tracing::debug!(?event, target = %target, "connectivity changed");
                        if tx.send(event).await.is_err() {
                            break;
                        }
                    }
                }
            }
        }
    })
}
