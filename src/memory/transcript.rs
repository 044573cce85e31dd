//! 对话记录存储抽象
//!
//! 只追加：每个对话一个记录集合（conversation_id → Vec<Exchange>）。
//! 编排器只依赖此 trait；具体后端见 InMemory / Sqlite / Http 实现。

use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::memory::Exchange;

/// 持久化错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PersistError {
    /// 客户端离线：写入延后，并非真正失败
    #[error("storage unreachable (offline)")]
    Offline,

    #[error("storage backend error: {0}")]
    Backend(String),
}

impl PersistError {
    pub fn is_offline(&self) -> bool {
        matches!(self, PersistError::Offline)
    }
}

/// 对话记录存储接口
#[async_trait]
pub trait TranscriptStore: Send + Sync {
    /// 向对话记录追加一条发言
    async fn append(&self, conversation_id: &str, exchange: &Exchange) -> Result<(), PersistError>;

    /// 读取完整对话记录（按追加顺序）
    async fn load(&self, conversation_id: &str) -> Result<Vec<Exchange>, PersistError>;
}

/// 内存实现：测试与未配置存储时使用
#[derive(Debug, Default)]
pub struct InMemoryTranscriptStore {
    transcripts: RwLock<HashMap<String, Vec<Exchange>>>,
}

impl InMemoryTranscriptStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 所有对话中的发言总数
    pub async fn total_exchanges(&self) -> usize {
        self.transcripts.read().await.values().map(Vec::len).sum()
    }
}

#[async_trait]
impl TranscriptStore for InMemoryTranscriptStore {
    async fn append(&self, conversation_id: &str, exchange: &Exchange) -> Result<(), PersistError> {
        self.transcripts
            .write()
            .await
            .entry(conversation_id.to_string())
            .or_default()
            .push(exchange.clone());
        Ok(())
    }

    async fn load(&self, conversation_id: &str) -> Result<Vec<Exchange>, PersistError> {
        Ok(self
            .transcripts
            .read()
            .await
            .get(conversation_id)
            .cloned()
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_append_keeps_order_per_conversation() {
        let store = InMemoryTranscriptStore::new();
        store.append("a", &Exchange::trainee("one")).await.unwrap();
        store.append("b", &Exchange::trainee("other")).await.unwrap();
        store.append("a", &Exchange::character("two")).await.unwrap();

        let a = store.load("a").await.unwrap();
        assert_eq!(a.len(), 2);
        assert_eq!(a[0].content, "one");
        assert_eq!(a[1].content, "two");
        assert_eq!(store.total_exchanges().await, 3);
    }

    #[tokio::test]
    async fn test_in_memory_load_unknown_is_empty() {
        let store = InMemoryTranscriptStore::new();
        assert!(store.load("missing").await.unwrap().is_empty());
    }
}
