//! 会话层：对话会话与指令上下文的生命周期

pub mod store;

pub use store::{ConversationId, ConversationSession, ResolvedSession, SessionStore};
