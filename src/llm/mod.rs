//! LLM 层：聊天客户端抽象与实现（OpenAI 兼容 / DeepSeek / Mock），以及带退避的调用执行器

pub mod deepseek;
pub mod mock;
pub mod openai;
pub mod retry;
pub mod traits;

use std::sync::Arc;

use crate::config::LlmSection;

pub use deepseek::{create_deepseek_client, DEEPSEEK_CHAT};
pub use mock::MockLlmClient;
pub use openai::OpenAiClient;
pub use retry::{CallFailure, ErrorClass, RetryConfig, RetryExecutor};
pub use traits::{classify_provider_error, LlmClient, ProviderError};

/// 按 [llm] 配置创建聊天客户端：mock / deepseek / 其余按 OpenAI 兼容处理
pub fn create_chat_client(cfg: &LlmSection) -> Arc<dyn LlmClient> {
    let timeout = cfg.timeouts.request;
    match cfg.provider.as_str() {
        "mock" => {
            tracing::info!("Using mock chat provider");
            Arc::new(MockLlmClient::new())
        }
        "deepseek" => {
            Arc::new(create_deepseek_client(cfg.deepseek.model.as_deref(), timeout))
        }
        _ => {
            let model = cfg.openai.model.as_deref().unwrap_or(cfg.model.as_str());
            Arc::new(OpenAiClient::new(cfg.base_url.as_deref(), model, None, timeout))
        }
    }
}
