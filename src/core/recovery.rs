//! 错误恢复引擎
//!
//! 根据 TrainerError 返回 RecoveryAction：失败的一轮保留学员消息并显示可关闭的横幅，不自动重发。

use crate::core::{RecoveryAction, TrainerError};

/// 语义化错误恢复：将错误映射为横幅动作
#[derive(Debug, Default)]
pub struct RecoveryEngine;

impl RecoveryEngine {
    pub fn new() -> Self {
        Self
    }

    pub fn handle(&self, err: &TrainerError) -> RecoveryAction {
        match err {
            TrainerError::EmptyMessage
            | TrainerError::ServiceUnavailable(_)
            | TrainerError::ServiceRejected(_) => RecoveryAction::ShowBanner(err.to_string()),
            TrainerError::ServiceNotConfigured(_) => RecoveryAction::Escalate(format!(
                "{err} Ask your administrator to set it up."
            )),
            TrainerError::Config(_) => {
                RecoveryAction::Escalate("The trainer is misconfigured.".to_string())
            }
            // 存储错误不应阻断对话，这里只给一个笼统提示
            TrainerError::Storage(_) => RecoveryAction::ShowBanner(
                "Your conversation could not be saved right now.".to_string(),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recovery_empty_message() {
        let engine = RecoveryEngine::new();
        let action = engine.handle(&TrainerError::EmptyMessage);
        assert!(action.allows_resend());
        assert_eq!(action.message(), "Please type a message before sending.");
    }

    #[test]
    fn test_recovery_unavailable_allows_resend() {
        let engine = RecoveryEngine::new();
        let action = engine.handle(&TrainerError::ServiceUnavailable("chat"));
        assert!(matches!(action, RecoveryAction::ShowBanner(_)));
        assert!(action.message().contains("chat"));
    }

    #[test]
    fn test_recovery_not_configured_escalates() {
        let engine = RecoveryEngine::new();
        let action = engine.handle(&TrainerError::ServiceNotConfigured("chat"));
        assert!(!action.allows_resend());
        assert!(action.message().starts_with("The chat service is not configured."));
    }

    #[test]
    fn test_recovery_storage_hides_detail() {
        let engine = RecoveryEngine::new();
        let action = engine.handle(&TrainerError::Storage("disk I/O error".to_string()));
        assert!(!action.message().contains("disk"));
    }
}
