//! 会话存储
//!
//! conversation_id → 指令上下文（角色设定）+ 最后活跃时间；空闲超过窗口的会话由定时清理移除。
//! 指令上下文只在新建会话时生成一次，之后原样复用，保证模拟角色在整段对话中不“换人”。
//! 使用 tokio 的 Instant，测试可通过暂停时钟精确控制清理边界。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// 会话 ID
pub type ConversationId = String;

/// 单个会话
#[derive(Debug, Clone)]
pub struct ConversationSession {
    pub id: ConversationId,
    /// 不可变的指令上下文
    pub instruction_context: Arc<str>,
    /// 最后活跃时间
    pub last_activity: Instant,
}

impl ConversationSession {
    fn new(instruction_context: Arc<str>) -> Self {
        Self {
            id: format!("conv_{}", uuid::Uuid::new_v4()),
            instruction_context,
            last_activity: Instant::now(),
        }
    }

    /// 空闲时长达到窗口即视为过期（边界值算过期）
    pub fn is_idle(&self, now: Instant, idle_window: Duration) -> bool {
        now.saturating_duration_since(self.last_activity) >= idle_window
    }
}

/// resolve 的结果：会话 ID 与指令上下文（编排器只在单轮对话内持有）
#[derive(Debug, Clone)]
pub struct ResolvedSession {
    pub id: ConversationId,
    pub instruction_context: Arc<str>,
    /// 本次是否新建
    pub created: bool,
}

/// 会话存储（进程内共享，按 ID 隔离）
#[derive(Debug)]
pub struct SessionStore {
    sessions: RwLock<HashMap<ConversationId, ConversationSession>>,
    idle_window: Duration,
}

impl SessionStore {
    pub fn new(idle_window: Duration) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            idle_window,
        }
    }

    pub fn idle_window(&self) -> Duration {
        self.idle_window
    }

    /// 获取或创建会话
    ///
    /// - ID 已知：刷新最后活跃时间，返回已存的上下文（不会调用 `build_context`）
    /// - ID 缺省或未知：调用 `build_context` 生成上下文，分配新 ID
    pub async fn resolve<F>(&self, conversation_id: Option<&str>, build_context: F) -> ResolvedSession
    where
        F: FnOnce() -> String,
    {
        let mut sessions = self.sessions.write().await;

        if let Some(id) = conversation_id {
            if let Some(session) = sessions.get_mut(id) {
                session.last_activity = Instant::now();
                return ResolvedSession {
                    id: session.id.clone(),
                    instruction_context: Arc::clone(&session.instruction_context),
                    created: false,
                };
            }
            tracing::info!(conversation_id = id, "unknown or expired conversation, starting a new one");
        }

        let session = ConversationSession::new(Arc::from(build_context()));
        let resolved = ResolvedSession {
            id: session.id.clone(),
            instruction_context: Arc::clone(&session.instruction_context),
            created: true,
        };
        sessions.insert(session.id.clone(), session);
        tracing::debug!(conversation_id = %resolved.id, "conversation session created");
        resolved
    }

    /// 清理空闲会话，返回移除数量；重复调用无副作用
    pub async fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, s| !s.is_idle(now, self.idle_window));
        let removed = before - sessions.len();
        if removed > 0 {
            tracing::info!(removed, remaining = sessions.len(), "idle conversation sessions swept");
        }
        removed
    }

    /// 活跃会话数
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    pub async fn contains(&self, conversation_id: &str) -> bool {
        self.sessions.read().await.contains_key(conversation_id)
    }

    /// 后台定时清理，直到 cancel 被触发
    pub fn spawn_sweeper(self: Arc<Self>, interval: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // 第一个 tick 立即完成，跳过
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        self.sweep().await;
                    }
                }
            }
            tracing::debug!("session sweeper stopped");
        })
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new(Duration::from_secs(3600))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    const HOUR: Duration = Duration::from_secs(3600);

    #[tokio::test(start_paused = true)]
    async fn test_resolve_new_then_reuse_same_context() {
        let store = SessionStore::new(HOUR);
        let builds = Cell::new(0);

        let first = store
            .resolve(None, || {
                builds.set(builds.get() + 1);
                "You are Dana, an upset customer.".to_string()
            })
            .await;
        assert!(first.created);
        assert!(first.id.starts_with("conv_"));

        let second = store
            .resolve(Some(&first.id), || {
                builds.set(builds.get() + 1);
                "rebuilt".to_string()
            })
            .await;
        assert!(!second.created);
        assert_eq!(second.id, first.id);
        assert!(Arc::ptr_eq(&first.instruction_context, &second.instruction_context));
        assert_eq!(builds.get(), 1);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_id_mints_new_session() {
        let store = SessionStore::new(HOUR);
        let resolved = store.resolve(Some("conv_missing"), || "ctx".to_string()).await;
        assert!(resolved.created);
        assert_ne!(resolved.id, "conv_missing");
        assert!(!store.contains("conv_missing").await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_distinct_new_conversations_get_distinct_ids() {
        let store = SessionStore::new(HOUR);
        let a = store.resolve(None, || "a".to_string()).await;
        let b = store.resolve(None, || "b".to_string()).await;
        assert_ne!(a.id, b.id);
        assert_eq!(&*b.instruction_context, "b");
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_boundary_at_exact_threshold() {
        let store = SessionStore::new(HOUR);
        let old = store.resolve(None, || "old".to_string()).await;
        tokio::time::advance(Duration::from_secs(1)).await;
        let young = store.resolve(None, || "young".to_string()).await;

        // old 恰好空闲一小时，young 差一秒
        tokio::time::advance(HOUR - Duration::from_secs(1)).await;
        assert_eq!(store.sweep().await, 1);
        assert!(!store.contains(&old.id).await);
        assert!(store.contains(&young.id).await);

        // 幂等
        assert_eq!(store.sweep().await, 0);
        assert!(store.contains(&young.id).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resolve_refreshes_last_activity() {
        let store = SessionStore::new(HOUR);
        let s = store.resolve(None, || "ctx".to_string()).await;
        tokio::time::advance(HOUR - Duration::from_secs(10)).await;
        store.resolve(Some(&s.id), || unreachable!()).await;
        tokio::time::advance(Duration::from_secs(20)).await;
        assert_eq!(store.sweep().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_task_evicts_and_stops() {
        let store = Arc::new(SessionStore::new(Duration::from_secs(60)));
        store.resolve(None, || "ctx".to_string()).await;

        let cancel = CancellationToken::new();
        let handle = Arc::clone(&store).spawn_sweeper(Duration::from_secs(60), cancel.clone());

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert!(store.is_empty().await);

        cancel.cancel();
        handle.await.unwrap();
    }
}
