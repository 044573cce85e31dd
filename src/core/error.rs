//! 训练错误类型与恢复动作
//!
//! 与 RecoveryEngine 配合：根据 TrainerError 决定横幅文案、是否允许重发。
//! 展示给学员的文案不包含服务商的原始错误内容。

use thiserror::Error;

use crate::llm::{CallFailure, ProviderError};

/// 一轮对话中可能出现、需要告知学员的错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TrainerError {
    /// 空输入：在任何网络调用之前拒绝
    #[error("Please type a message before sending.")]
    EmptyMessage,

    #[error("The {0} service is not configured.")]
    ServiceNotConfigured(&'static str),

    /// 可重试错误耗尽次数
    #[error("The {0} service is not responding right now. Please try again in a moment.")]
    ServiceUnavailable(&'static str),

    /// 终止错误（4xx、响应格式不对等）
    #[error("The {0} service could not handle this message. Please rephrase and send again.")]
    ServiceRejected(&'static str),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl From<CallFailure<ProviderError>> for TrainerError {
    fn from(failure: CallFailure<ProviderError>) -> Self {
        let service = failure.service();
        match failure {
            CallFailure::Terminal {
                error: ProviderError::NotConfigured(_),
                ..
            } => TrainerError::ServiceNotConfigured(service),
            CallFailure::Exhausted { .. } => TrainerError::ServiceUnavailable(service),
            CallFailure::Terminal { .. } => TrainerError::ServiceRejected(service),
        }
    }
}

/// 恢复引擎根据错误类型给出的建议动作
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryAction {
    /// 显示可关闭的横幅，学员可重新输入发送
    ShowBanner(String),
    /// 需要运维处理（配置缺失等），重发无意义
    Escalate(String),
}

impl RecoveryAction {
    pub fn message(&self) -> &str {
        match self {
            RecoveryAction::ShowBanner(m) | RecoveryAction::Escalate(m) => m,
        }
    }

    /// 学员是否可以直接重发
    pub fn allows_resend(&self) -> bool {
        matches!(self, RecoveryAction::ShowBanner(_))
    }
}
