//! 记录层：对话发言模型与只追加的对话记录存储（内存 / SQLite / 远程文档库）

pub mod conversation;
pub mod remote;
pub mod sqlite;
pub mod transcript;

pub use conversation::{build_chat_request, Exchange, Message, Role, Speaker};
pub use remote::HttpTranscriptStore;
pub use sqlite::SqliteTranscriptStore;
pub use transcript::{InMemoryTranscriptStore, PersistError, TranscriptStore};
