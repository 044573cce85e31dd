//! 外部服务抽象：聊天客户端 trait 与统一的服务错误
//!
//! 聊天（OpenAI 兼容 / DeepSeek / Mock）实现 LlmClient；语音合成复用同一 ProviderError，
//! 以便 RetryExecutor 用同一套分类规则决定重试或终止。

use async_trait::async_trait;
use thiserror::Error;

use crate::llm::retry::ErrorClass;
use crate::memory::Message;

/// 外部服务调用错误（原始信息只写日志，不直接展示给学员）
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// 缺少凭据或端点配置；在任何网络 I/O 之前返回
    #[error("{0} service not configured")]
    NotConfigured(&'static str),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("request timed out")]
    Timeout,

    #[error("rate limited")]
    RateLimited,

    #[error("server error {status}: {message}")]
    Server { status: u16, message: String },

    #[error("request rejected: {message}")]
    Rejected { status: Option<u16>, message: String },

    #[error("malformed response: {0}")]
    MalformedResponse(String),
}

impl ProviderError {
    /// 按 HTTP 状态码归类：429 限流、5xx 服务端、其余 4xx 拒绝
    pub fn from_status(status: u16, body: impl Into<String>) -> Self {
        let message = body.into();
        match status {
            429 => ProviderError::RateLimited,
            500..=599 => ProviderError::Server { status, message },
            _ => ProviderError::Rejected {
                status: Some(status),
                message,
            },
        }
    }

    /// 重试分类：网络、超时、5xx、429 可重试；其余（4xx、响应格式错误、未配置）终止
    pub fn class(&self) -> ErrorClass {
        match self {
            ProviderError::Transport(_)
            | ProviderError::Timeout
            | ProviderError::RateLimited
            | ProviderError::Server { .. } => ErrorClass::Retryable,
            ProviderError::NotConfigured(_)
            | ProviderError::Rejected { .. }
            | ProviderError::MalformedResponse(_) => ErrorClass::Terminal,
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ProviderError::Timeout
        } else if e.is_decode() {
            ProviderError::MalformedResponse(e.to_string())
        } else if let Some(status) = e.status() {
            ProviderError::from_status(status.as_u16(), e.to_string())
        } else {
            ProviderError::Transport(e.to_string())
        }
    }
}

/// 供 RetryExecutor 使用的分类函数
pub fn classify_provider_error(e: &ProviderError) -> ErrorClass {
    e.class()
}

/// 聊天客户端 trait：系统指令 + 有序 role/content 消息 → 回复文本
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// 非流式完成
    async fn complete(&self, messages: &[Message]) -> Result<String, ProviderError>;
}
