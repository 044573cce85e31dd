//! Mock 聊天客户端（用于测试与离线演示，无需 API）
//!
//! 预置回复按 FIFO 弹出（可为错误，用于演练重试）；队列为空时回显最后一条学员消息。
//! 每次请求的消息列表都会被记录，便于断言系统指令与历史是否正确传入。

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::llm::{LlmClient, ProviderError};
use crate::memory::{Message, Role};

/// Mock 客户端
#[derive(Debug, Default)]
pub struct MockLlmClient {
    replies: Mutex<VecDeque<Result<String, ProviderError>>>,
    requests: Mutex<Vec<Vec<Message>>>,
}

impl MockLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// 预置一组成功回复
    pub fn with_replies<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let client = Self::new();
        for reply in replies {
            client.push_reply(reply);
        }
        client
    }

    pub fn push_reply(&self, reply: impl Into<String>) {
        self.lock_replies().push_back(Ok(reply.into()));
    }

    pub fn push_error(&self, error: ProviderError) {
        self.lock_replies().push_back(Err(error));
    }

    /// 已收到的请求数
    pub fn call_count(&self) -> usize {
        self.lock_requests().len()
    }

    /// 已收到的全部请求（按调用顺序）
    pub fn requests(&self) -> Vec<Vec<Message>> {
        self.lock_requests().clone()
    }

    fn lock_replies(&self) -> std::sync::MutexGuard<'_, VecDeque<Result<String, ProviderError>>> {
        self.replies.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_requests(&self) -> std::sync::MutexGuard<'_, Vec<Vec<Message>>> {
        self.requests.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, ProviderError> {
        self.lock_requests().push(messages.to_vec());

        if let Some(reply) = self.lock_replies().pop_front() {
            return reply;
        }

        let last_user = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .unwrap_or("(no input)");
        Ok(format!("(mock customer) You said: {last_user}"))
    }
}
