//! SQLite 对话记录存储
//!
//! 每条 Exchange 一行，按 conversation_id 分组、按自增 id 排序；rusqlite 为同步 API，
//! 通过 spawn_blocking 调用，避免阻塞 async 运行时。

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};

use crate::memory::{Exchange, PersistError, Speaker, TranscriptStore};

/// SQLite 持久化
pub struct SqliteTranscriptStore {
    conn: Arc<Mutex<Connection>>,
}

fn backend<E: std::fmt::Display>(e: E) -> PersistError {
    PersistError::Backend(e.to_string())
}

impl SqliteTranscriptStore {
    /// 打开（或创建）数据库文件；父目录不存在时自动创建
    pub fn open(path: impl AsRef<Path>) -> Result<Self, PersistError> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(backend)?;
            }
        }
        let conn = Connection::open(path.as_ref()).map_err(backend)?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, PersistError> {
        let conn = Connection::open_in_memory().map_err(backend)?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self, PersistError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS exchanges (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                conversation_id TEXT NOT NULL,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_exchanges_conversation ON exchanges(conversation_id);",
        )
        .map_err(backend)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

#[async_trait]
impl TranscriptStore for SqliteTranscriptStore {
    async fn append(&self, conversation_id: &str, exchange: &Exchange) -> Result<(), PersistError> {
        let conn = Arc::clone(&self.conn);
        let conversation_id = conversation_id.to_string();
        let exchange = exchange.clone();

        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().map_err(backend)?;
            conn.execute(
                "INSERT INTO exchanges (conversation_id, role, content, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![
                    conversation_id,
                    exchange.role.as_str(),
                    exchange.content,
                    exchange.timestamp
                ],
            )
            .map_err(backend)?;
            Ok(())
        })
        .await
        .map_err(backend)?
    }

    async fn load(&self, conversation_id: &str) -> Result<Vec<Exchange>, PersistError> {
        let conn = Arc::clone(&self.conn);
        let conversation_id = conversation_id.to_string();

        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().map_err(backend)?;
            let mut stmt = conn
                .prepare(
                    "SELECT role, content, created_at FROM exchanges WHERE conversation_id = ?1 ORDER BY id",
                )
                .map_err(backend)?;
            let rows = stmt
                .query_map(params![conversation_id], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, DateTime<Utc>>(2)?,
                    ))
                })
                .map_err(backend)?;

            let mut exchanges = Vec::new();
            for row in rows {
                let (role, content, timestamp) = row.map_err(backend)?;
                let role = Speaker::parse(&role)
                    .ok_or_else(|| PersistError::Backend(format!("unknown role '{role}'")))?;
                exchanges.push(Exchange {
                    role,
                    content,
                    timestamp,
                });
            }
            Ok(exchanges)
        })
        .await
        .map_err(backend)?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sqlite_roundtrip_preserves_order_and_roles() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteTranscriptStore::open(dir.path().join("data/transcripts.db")).unwrap();

        store.append("conv_1", &Exchange::trainee("Hello")).await.unwrap();
        store.append("conv_2", &Exchange::trainee("Elsewhere")).await.unwrap();
        store.append("conv_1", &Exchange::character("Welcome!")).await.unwrap();

        let loaded = store.load("conv_1").await.unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].role, Speaker::Trainee);
        assert_eq!(loaded[0].content, "Hello");
        assert_eq!(loaded[1].role, Speaker::Character);
        assert_eq!(loaded[1].content, "Welcome!");
    }

    #[tokio::test]
    async fn test_sqlite_reopen_keeps_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.db");
        {
            let store = SqliteTranscriptStore::open(&path).unwrap();
            store.append("c", &Exchange::trainee("persisted")).await.unwrap();
        }
        let store = SqliteTranscriptStore::open(&path).unwrap();
        assert_eq!(store.load("c").await.unwrap()[0].content, "persisted");
    }
}
